//! C5: the pluggable `AgentClient` capability set (spec.md §4.5). The
//! concrete bindings per provider live in the sibling `paseo-providers`
//! crate; this module only defines the contract paseo-core's agent
//! instance (C4) drives.

use std::path::Path;

use async_trait::async_trait;
use paseo_protocol::agent::Capabilities;
use paseo_protocol::agent::PersistenceHandle;
use paseo_protocol::model_catalog::ModelInfo;
use paseo_protocol::permission::PermissionRequest;
use paseo_protocol::permission::PermissionResolution;
use paseo_protocol::timeline::TimelineItem;

use crate::error::Result;

/// Events a provider adapter emits back to the agent instance that owns it
/// (spec.md §4.5). These are pulled one at a time from
/// `ProviderConversation::next_event`.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    TurnStarted,
    TurnCompleted { usage: Option<paseo_protocol::agent::Usage> },
    TurnFailed { error: String },
    TurnCanceled,
    Timeline(TimelineItem),
    PermissionRequested(PermissionRequest),
    PermissionResolved { request_id: String },
    CapabilitiesChanged(Capabilities),
    ModesUpdated { current_mode_id: Option<String>, available_modes: Vec<String> },
    /// The provider process exited or the connection was lost unexpectedly.
    Closed { error: Option<String> },
}

/// One live connection to a provider-managed agent session. Owned
/// exclusively by the `paseo-core` agent instance that created it; all
/// methods are driven from under that instance's per-agent mutex, so `&mut
/// self` is safe without additional internal locking.
#[async_trait]
pub trait ProviderConversation: Send {
    async fn send(&mut self, text: &str, attachments: &[String]) -> Result<()>;
    async fn cancel(&mut self) -> Result<()>;
    async fn set_mode(&mut self, mode_id: &str) -> Result<()>;
    async fn set_model(&mut self, model_id: &str) -> Result<()>;
    async fn set_thinking(&mut self, thinking_option_id: &str) -> Result<()>;
    async fn set_variant(&mut self, variant_id: &str) -> Result<()>;
    async fn resolve_permission(
        &mut self,
        request_id: &str,
        decision: PermissionResolution,
    ) -> Result<()>;
    async fn close(&mut self) -> Result<()>;

    /// Block until the next event is available. Returns `None` once the
    /// provider has fully shut down and no further events will arrive.
    async fn next_event(&mut self) -> Option<ProviderEvent>;

    /// The opaque handle that would let a future `AgentClient::resume` pick
    /// this conversation back up.
    fn persistence_handle(&self) -> PersistenceHandle;
}

/// Per-provider capability set: creates and resumes conversations, and
/// serves the model catalog (spec.md §4.5). One instance per configured
/// provider id (`claude`, `codex`, `opencode`, ...); looked up by
/// `ProviderRegistry`.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn create(
        &self,
        cwd: &Path,
        config: Option<serde_json::Value>,
    ) -> Result<Box<dyn ProviderConversation>>;

    async fn resume(
        &self,
        persistence: &PersistenceHandle,
    ) -> Result<Box<dyn ProviderConversation>>;

    async fn list_models(&self, cwd: Option<&Path>) -> Result<Vec<ModelInfo>>;
}
