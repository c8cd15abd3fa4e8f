//! Typed daemon errors, converted to the wire `rpc_error` shape at the
//! session boundary (spec.md §7). Structural descendant of this codebase's
//! own top-level error enum.

use paseo_protocol::AgentId;
use paseo_protocol::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("no agent with id: {0}")]
    AgentNotFound(AgentId),

    #[error("no pending permission with id: {0}")]
    UnknownPermission(String),

    #[error("agent {0} has {1} pending permission(s) outstanding")]
    PermissionsOutstanding(AgentId, usize),

    #[error("agent {0} is not in a state that accepts this operation (status={1:?})")]
    InvalidTransition(AgentId, paseo_protocol::AgentStatus),

    #[error("{selector} is not supported by provider {provider}")]
    UnsupportedSelector { provider: String, selector: String },

    #[error("agent {0} does not support switching {1} while running")]
    UnsupportedLiveSwitch(AgentId, String),

    #[error("provider {0} is not configured or its binary could not be located")]
    ProviderUnavailable(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaemonError::AgentNotFound(_) | DaemonError::UnknownPermission(_) => {
                ErrorKind::NotFound
            }
            DaemonError::InvalidTransition(..) => ErrorKind::Invalid,
            DaemonError::UnsupportedSelector { .. } | DaemonError::UnsupportedLiveSwitch(..) => {
                ErrorKind::Unsupported
            }
            DaemonError::PermissionsOutstanding(..) => ErrorKind::PermissionsOutstanding,
            DaemonError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            DaemonError::Timeout(_) => ErrorKind::Timeout,
            DaemonError::Io(_) | DaemonError::Json(_) | DaemonError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}
