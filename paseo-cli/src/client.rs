//! A thin client of the daemon's protocol (spec.md §6): opens one WebSocket
//! to `paseod`'s local transport, correlates requests by `requestId`, and
//! lets callers also drain the raw event stream (used by `logs -f`/`ls`).
//! Uses the same request/response-over-a-socket shape as this codebase's
//! own MCP client code, retargeted from stdio+JSON-RPC onto this daemon's
//! WebSocket envelope.

use anyhow::Context;
use anyhow::Result;
use futures::SinkExt;
use futures::StreamExt;
use paseo_protocol::error::RpcError;
use paseo_protocol::message::RawMessage;
use paseo_protocol::message::ServerEvent;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// One raw inbound frame: either a server event, a reply to one of our own
/// requests, or an `rpc_error` tied to a `requestId`.
pub enum Frame {
    Event(ServerEvent),
    Response { request_id: String, value: serde_json::Value },
    Error(RpcError),
}

pub struct DaemonClient {
    socket: Socket,
}

impl DaemonClient {
    /// Connect to `paseod`'s local WebSocket endpoint at `listen_addr`.
    /// Failure here is the CLI's "daemon-connect failure" exit condition
    /// (spec.md §6).
    pub async fn connect(listen_addr: &str) -> Result<Self> {
        let url = format!("ws://{listen_addr}/ws");
        let (socket, _) = tokio_tungstenite::connect_async(&url)
            .await
            .with_context(|| format!("connecting to paseod at {url}"))?;
        Ok(Self { socket })
    }

    /// Send one request and wait for its correlated response or error,
    /// ignoring any unrelated events interleaved on the wire.
    pub async fn request(&mut self, kind: &str, payload: serde_json::Value) -> Result<serde_json::Value> {
        let request_id = self.send(kind, payload).await?;
        loop {
            match self.next_frame().await?.context("connection closed before a response arrived")? {
                Frame::Response { request_id: id, value } if id == request_id => return Ok(value),
                Frame::Error(err) if err.request_id == request_id => {
                    anyhow::bail!("{}: {}", err.code_description(), err.message)
                }
                _ => continue,
            }
        }
    }

    /// Send a request without waiting for its reply; returns the
    /// `requestId` the caller can watch for on the frame stream (used by
    /// `logs -f`, which interleaves one request with a long-lived event
    /// subscription).
    pub async fn send(&mut self, kind: &str, payload: serde_json::Value) -> Result<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = RawMessage {
            kind: kind.to_string(),
            payload: Some(payload),
            request_id: Some(request_id.clone()),
        };
        let text = serde_json::to_string(&frame)?;
        self.socket.send(WsMessage::Text(text)).await?;
        Ok(request_id)
    }

    /// Read and classify the next inbound frame, or `None` on a clean close.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let Some(msg) = self.socket.next().await else {
                return Ok(None);
            };
            match msg? {
                WsMessage::Text(text) => return Ok(Some(classify(&text)?)),
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            }
        }
    }
}

fn classify(text: &str) -> Result<Frame> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or_default();
    if kind == "rpc_error" {
        return Ok(Frame::Error(serde_json::from_value(value)?));
    }
    if let Some(request_id) = value.get("requestId").and_then(|v| v.as_str()) {
        return Ok(Frame::Response {
            request_id: request_id.to_string(),
            value,
        });
    }
    Ok(Frame::Event(serde_json::from_value(value)?))
}

trait RpcErrorExt {
    fn code_description(&self) -> &'static str;
}

impl RpcErrorExt for RpcError {
    fn code_description(&self) -> &'static str {
        use paseo_protocol::error::ErrorKind::*;
        match self.code {
            NotFound => "NOT_FOUND",
            Invalid => "INVALID",
            Unsupported => "UNSUPPORTED",
            PermissionsOutstanding => "PERMISSIONS_OUTSTANDING",
            ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Timeout => "TIMEOUT",
            Internal => "INTERNAL",
        }
    }
}
