//! C10's relay transport controller (spec.md §4.1, §4.10): an outbound
//! WebSocket to a rendezvous endpoint, `role=server`, carrying this
//! daemon's `ServerId`. The rendezvous multiplexes many clients onto one
//! connection; this controller dials a second, per-client data socket for
//! each `client_connected` control message and runs the E2EE handshake
//! before handing the encrypted channel to a fresh `ClientSession`.
//!
//! Reconnect backoff follows the same `util::backoff` shape used elsewhere
//! in this codebase: exponential with jitter, capped rather than unbounded,
//! so a flaky rendezvous endpoint doesn't busy-loop the daemon.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use paseo_core::manager::AgentManager;
use paseo_protocol::ServerId;
use paseo_protocol::message::RawMessage;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::crypto;
use crate::guard::ProcessGuard;
use crate::session::ClientSession;
use crate::session::OutboxItem;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Sync,
    ClientConnected { client_id: String },
    ClientDisconnected { client_id: String },
}

/// Run the relay controller until `shutdown` resolves, reconnecting with
/// backoff on any transport error. Never mints a new `ServerId`/keypair
/// across reconnects — both are loaded once by the caller and reused here.
pub async fn run(
    relay_endpoint: String,
    server_id: ServerId,
    secret: x25519_dalek::StaticSecret,
    manager: Arc<AgentManager>,
    guard: Option<Arc<ProcessGuard>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return;
        }
        match run_once(&relay_endpoint, &server_id, &secret, manager.clone(), guard.clone(), &mut shutdown).await {
            Ok(()) => attempt = 0,
            Err(err) => {
                attempt += 1;
                tracing::warn!(error = %err, attempt, "relay connection dropped, reconnecting");
            }
        }
        if *shutdown.borrow() {
            return;
        }
        let delay = backoff(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let base = INITIAL_BACKOFF.saturating_mul(1 << attempt.min(8));
    let jittered = base.min(MAX_BACKOFF).mul_f64(rand::rng().random_range(0.8..1.2));
    jittered.min(MAX_BACKOFF)
}

async fn run_once(
    relay_endpoint: &str,
    server_id: &ServerId,
    secret: &x25519_dalek::StaticSecret,
    manager: Arc<AgentManager>,
    guard: Option<Arc<ProcessGuard>>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let control_url = format!("{relay_endpoint}?role=server&serverId={}", server_id.0);
    let (control_stream, _) = connect_async(&control_url).await?;
    let (mut control_tx, mut control_rx) = control_stream.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            message = control_rx.next() => {
                let Some(message) = message else { return Ok(()) };
                let message = message?;
                let WsMessage::Text(text) = message else { continue };
                let Ok(control) = serde_json::from_str::<ControlMessage>(&text) else { continue };
                match control {
                    ControlMessage::Sync => {
                        let _ = control_tx.send(WsMessage::Text("{\"type\":\"sync\"}".into())).await;
                    }
                    ControlMessage::ClientConnected { client_id } => {
                        let manager = manager.clone();
                        let guard = guard.clone();
                        let relay_endpoint = relay_endpoint.to_string();
                        let secret = secret.clone();
                        tokio::spawn(async move {
                            if let Err(err) =
                                dial_data_socket(&relay_endpoint, &client_id, &secret, manager, guard).await
                            {
                                tracing::warn!(client_id, error = %err, "relay data socket failed");
                            }
                        });
                    }
                    ControlMessage::ClientDisconnected { .. } => {}
                }
            }
        }
    }
}

/// Dial the per-client data socket, run the E2EE handshake, then hand the
/// decrypted frame stream to a fresh `ClientSession` exactly as the local
/// transport does (spec.md §4.1: "surfaces the resulting encrypted channel
/// to C2 as if it were a local socket").
async fn dial_data_socket(
    relay_endpoint: &str,
    client_id: &str,
    secret: &x25519_dalek::StaticSecret,
    manager: Arc<AgentManager>,
    guard: Option<Arc<ProcessGuard>>,
) -> anyhow::Result<()> {
    let data_url = format!("{relay_endpoint}?role=data&clientId={client_id}");
    let (data_stream, _) = connect_async(&data_url).await?;
    let (mut tx, mut rx) = data_stream.split();

    let handshake = match rx.next().await {
        Some(Ok(WsMessage::Binary(bytes))) => bytes,
        _ => anyhow::bail!("data socket closed before handshake"),
    };
    let cipher = crypto::respond_to_handshake(secret, &handshake)
        .map_err(|err| anyhow::anyhow!("E2EE handshake failed: {err}"))?;

    let session = ClientSession::new(client_id.to_string(), manager, guard);
    session.attach().await;
    let outbox = session.outbox();

    loop {
        tokio::select! {
            item = outbox.next() => {
                match item {
                    OutboxItem::Frame(frame) => {
                        let sealed = match crypto::seal(&cipher, frame.as_bytes()) {
                            Ok(sealed) => sealed,
                            Err(_) => continue,
                        };
                        if tx.send(WsMessage::Binary(sealed.into())).await.is_err() {
                            break;
                        }
                    }
                    OutboxItem::Close(_) => {
                        let _ = tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let Ok(plaintext) = crypto::open(&cipher, &bytes) else { continue };
                        let Ok(text) = String::from_utf8(plaintext) else { continue };
                        if let Ok(raw) = serde_json::from_str::<RawMessage>(&text) {
                            session.handle_raw(raw).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_and_nondecreasing_in_expectation() {
        let zero = backoff(0);
        assert_eq!(zero, Duration::ZERO);
        for attempt in 1..20 {
            let delay = backoff(attempt);
            assert!(delay <= MAX_BACKOFF);
        }
    }

    #[test]
    fn control_messages_round_trip_through_json() {
        let msg = ControlMessage::ClientConnected {
            client_id: "abc".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: ControlMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded, ControlMessage::ClientConnected { client_id } if client_id == "abc"));
    }
}
