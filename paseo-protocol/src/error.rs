//! Error kinds surfaced to clients, per spec.md §7.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Unsupported,
    PermissionsOutstanding,
    ProviderUnavailable,
    Timeout,
    Internal,
}

/// The wire shape of an `rpc_error` response (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub request_id: String,
    pub request_type: String,
    pub code: ErrorKind,
    pub message: String,
}
