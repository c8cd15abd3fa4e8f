//! Routes incoming JSON-RPC frames to the right handler and enqueues the
//! matching response. Mirrors the stdin/processor/stdout split common to
//! stdio MCP servers: this type is driven by `lib.rs`'s processor task and
//! only ever talks back through `outgoing_tx`.

use std::sync::Arc;

use paseo_core::AgentManager;
use paseo_mcp_types::CallToolRequestParams;
use paseo_mcp_types::Implementation;
use paseo_mcp_types::InitializeResult;
use paseo_mcp_types::JSONRPCErrorDetail;
use paseo_mcp_types::JSONRPCErrorMessage;
use paseo_mcp_types::JSONRPCMessage;
use paseo_mcp_types::JSONRPCNotification;
use paseo_mcp_types::JSONRPCRequest;
use paseo_mcp_types::JSONRPCResponse;
use paseo_mcp_types::ListToolsResult;
use paseo_mcp_types::MCP_SCHEMA_VERSION;
use paseo_mcp_types::RequestId;
use paseo_mcp_types::ServerCapabilities;
use paseo_mcp_types::error_codes;
use serde_json::json;
use tokio::sync::mpsc;

use crate::tools;

pub struct MessageProcessor {
    outgoing_tx: mpsc::Sender<JSONRPCMessage>,
    manager: Arc<AgentManager>,
}

impl MessageProcessor {
    pub fn new(outgoing_tx: mpsc::Sender<JSONRPCMessage>, manager: Arc<AgentManager>) -> Self {
        Self { outgoing_tx, manager }
    }

    pub async fn process_request(&self, request: JSONRPCRequest) {
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => self.handle_initialize(id).await,
            "tools/list" => self.handle_tools_list(id).await,
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "ping" => self.reply(id, json!({})).await,
            other => {
                self.reply_error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("unknown method: {other}"),
                )
                .await
            }
        }
    }

    pub async fn process_notification(&self, _notification: JSONRPCNotification) {
        // `notifications/initialized` and friends carry nothing this server
        // acts on; the stdin/stdout loop itself is the only lifecycle state.
    }

    async fn handle_initialize(&self, id: RequestId) {
        let result = InitializeResult {
            protocol_version: MCP_SCHEMA_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
            },
            server_info: Implementation {
                name: "paseo-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        // `capabilities`/`client_info` from the request are accepted but not
        // currently negotiated against; every agent-control tool is always
        // available once an agent registry exists.
        match serde_json::to_value(result) {
            Ok(value) => self.reply(id, value).await,
            Err(err) => {
                self.reply_error(id, error_codes::INTERNAL_ERROR, err.to_string())
                    .await
            }
        }
    }

    async fn handle_tools_list(&self, id: RequestId) {
        let result = ListToolsResult { tools: tools::catalog() };
        match serde_json::to_value(result) {
            Ok(value) => self.reply(id, value).await,
            Err(err) => {
                self.reply_error(id, error_codes::INTERNAL_ERROR, err.to_string())
                    .await
            }
        }
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<serde_json::Value>) {
        let Some(params) = params else {
            self.reply_error(id, error_codes::INVALID_PARAMS, "missing params".to_string())
                .await;
            return;
        };
        let params: CallToolRequestParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => {
                self.reply_error(id, error_codes::INVALID_PARAMS, err.to_string())
                    .await;
                return;
            }
        };
        let arguments = params.arguments.unwrap_or(json!({}));
        let result = tools::call(&self.manager, &params.name, arguments).await;
        match serde_json::to_value(result) {
            Ok(value) => self.reply(id, value).await,
            Err(err) => {
                self.reply_error(id, error_codes::INTERNAL_ERROR, err.to_string())
                    .await
            }
        }
    }

    async fn reply(&self, id: RequestId, result: serde_json::Value) {
        let message = JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: paseo_mcp_types::JSONRPC_VERSION.to_string(),
            id,
            result,
        });
        let _ = self.outgoing_tx.send(message).await;
    }

    async fn reply_error(&self, id: RequestId, code: i64, message: String) {
        let frame = JSONRPCMessage::Error(JSONRPCErrorMessage {
            jsonrpc: paseo_mcp_types::JSONRPC_VERSION.to_string(),
            id,
            error: JSONRPCErrorDetail {
                code,
                message,
                data: None,
            },
        });
        let _ = self.outgoing_tx.send(frame).await;
    }
}
