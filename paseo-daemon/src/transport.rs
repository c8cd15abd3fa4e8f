//! C1: the local WebSocket transport. Upgrades HTTP to WebSocket, validates
//! the `Host` header against an allowlist (Vite-style host protection) and
//! applies a CORS allowlist for cross-origin clients, then bridges frames
//! to a freshly attached `ClientSession` (spec.md §4.1).
//!
//! `ws_handler`/`handle_socket` follow the same upgrade-then-bridge shape as
//! this codebase's `http::ws::handle_socket`, and the Host/CORS allowlist
//! mirrors `http::security`'s loopback-origin check, generalized from a
//! fixed loopback check to a configured allowlist.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use paseo_core::manager::AgentManager;
use paseo_protocol::message::RawMessage;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::guard::ProcessGuard;
use crate::session::ClientSession;
use crate::session::OutboxItem;

/// Hosts accepted on the `Host` header for a TCP listener, beyond the
/// literal bind address itself. A client presenting anything else gets a
/// 421 before the WebSocket upgrade even starts.
const ALLOWED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

#[derive(Clone)]
struct AppState {
    manager: Arc<AgentManager>,
    guard: Option<Arc<ProcessGuard>>,
    bind_host: String,
}

/// Bind the local transport and serve until the process is asked to stop.
/// `shutdown` resolves when `C11`'s guard has begun its graceful-stop
/// sequence, draining the axum listener per spec.md §4.11's close ordering.
pub async fn serve(
    listen_addr: &str,
    manager: Arc<AgentManager>,
    guard: Option<Arc<ProcessGuard>>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind_host = listen_addr
        .rsplit_once(':')
        .map(|(host, _)| host.to_string())
        .unwrap_or_else(|| listen_addr.to_string());

    let state = AppState {
        manager,
        guard,
        bind_host,
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| {
            is_allowed_origin(origin.to_str().unwrap_or(""))
        }))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "local transport listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !is_allowed_host(host, &state.bind_host) {
        return (StatusCode::MISDIRECTED_REQUEST, "host not allowed").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();
    let session = ClientSession::new(client_id, state.manager, state.guard);
    session.attach().await;
    let outbox = session.outbox();

    loop {
        tokio::select! {
            item = outbox.next() => {
                match item {
                    OutboxItem::Frame(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    OutboxItem::Close(reason) => {
                        let _ = socket
                            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                code: 1008,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RawMessage>(&text) {
                            Ok(raw) => session.handle_raw(raw).await,
                            Err(_) => {
                                let _ = socket
                                    .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                        code: 1003,
                                        reason: "invalid frame".into(),
                                    })))
                                    .await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    session.close();
}

fn is_allowed_host(host: &str, bind_host: &str) -> bool {
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    host.is_empty() || host == bind_host || ALLOWED_HOSTS.contains(&host)
}

fn is_allowed_origin(origin: &str) -> bool {
    origin.contains("localhost") || origin.contains("127.0.0.1") || origin.contains("[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_hosts_are_allowed() {
        assert!(is_allowed_host("localhost:7890", "0.0.0.0"));
        assert!(is_allowed_host("127.0.0.1:7890", "0.0.0.0"));
    }

    #[test]
    fn bind_host_itself_is_allowed() {
        assert!(is_allowed_host("example.internal:7890", "example.internal"));
    }

    #[test]
    fn unrelated_host_is_rejected() {
        assert!(!is_allowed_host("evil.example:7890", "127.0.0.1"));
    }

    #[test]
    fn loopback_origins_are_allowed() {
        assert!(is_allowed_origin("http://localhost:5173"));
        assert!(is_allowed_origin("http://127.0.0.1:5173"));
        assert!(!is_allowed_origin("https://evil.example"));
    }
}
