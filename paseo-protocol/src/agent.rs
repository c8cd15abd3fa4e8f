//! The central `Agent` entity and its lifecycle state machine.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::ids::AgentId;
use crate::permission::PermissionRequest;

/// Tag identifying which provider backs an agent (`claude`, `codex`,
/// `opencode`, ...). Kept as an open string rather than an enum: the set of
/// providers is configured, not compiled in.
pub type ProviderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Idle,
    Running,
    Error,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionReason {
    Finished,
    Permission,
    Error,
}

/// Opaque provider-scoped handle that lets a closed/crashed agent be
/// reconstructed later via `AgentClient::resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceHandle {
    pub provider: ProviderId,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Set of capability flags a provider adapter reports for a given agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub supports_images: bool,
    #[serde(default)]
    pub supports_resume: bool,
    #[serde(default)]
    pub supports_live_mode_switch: bool,
    #[serde(default)]
    pub supports_live_model_switch: bool,
}

/// Provider-reported usage accounting for the most recently completed turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
}

/// The central entity: one managed conversational session with one
/// provider, bound to a working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub provider: ProviderId,
    pub cwd: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub status: AgentStatus,
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub current_mode_id: Option<String>,
    #[serde(default)]
    pub available_modes: Vec<String>,

    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thinking_option_id: Option<String>,
    #[serde(default)]
    pub variant_id: Option<String>,

    #[serde(default)]
    pub runtime_info: Option<serde_json::Value>,
    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub pending_permissions: Vec<PermissionRequest>,

    #[serde(default)]
    pub persistence: Option<PersistenceHandle>,

    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_usage: Option<Usage>,
    #[serde(default)]
    pub last_user_message_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,

    #[serde(default)]
    pub requires_attention: bool,
    #[serde(default)]
    pub attention_reason: Option<AttentionReason>,
    #[serde(default)]
    pub attention_timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Agent {
    pub fn new(id: AgentId, provider: ProviderId, cwd: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider,
            cwd,
            created_at: now,
            updated_at: now,
            status: AgentStatus::Initializing,
            title: None,
            current_mode_id: None,
            available_modes: Vec::new(),
            model: None,
            thinking_option_id: None,
            variant_id: None,
            runtime_info: None,
            capabilities: Capabilities::default(),
            pending_permissions: Vec::new(),
            persistence: None,
            last_error: None,
            last_usage: None,
            last_user_message_at: None,
            last_activity_at: now,
            requires_attention: false,
            attention_reason: None,
            attention_timestamp: None,
            archived_at: None,
            labels: HashMap::new(),
        }
    }

    /// Invariant check used by tests and by the store on load: `Agent`
    /// records should never violate spec.md §3's Agent invariants.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.pending_permissions.is_empty() == self.requires_attention
            && self.attention_reason == Some(AttentionReason::Permission)
        {
            // requires_attention with reason=permission must agree with
            // pending_permissions being non-empty; anything else is fine.
            if self.pending_permissions.is_empty() {
                return Err("requires_attention=permission but pending_permissions is empty");
            }
        }
        if self.requires_attention && self.attention_reason.is_none() {
            return Err("requires_attention is true but attention_reason is null");
        }
        if self.last_activity_at < self.created_at {
            return Err("last_activity_at precedes created_at");
        }
        if let Some(last_user_message_at) = self.last_user_message_at
            && last_user_message_at > self.updated_at
        {
            return Err("last_user_message_at is after updated_at");
        }
        Ok(())
    }

    /// A lifecycle transition is valid per spec.md §3's transition table.
    pub fn can_transition(&self, to: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self.status, to),
            (Initializing, Idle)
                | (Idle, Running)
                | (Running, Idle)
                | (Running, Error)
                | (_, Closed)
        )
    }
}

/// The durable subset of `Agent` persisted in the on-disk registry
/// (spec.md §3, "Agent storage on disk").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub provider: ProviderId,
    pub cwd: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub last_user_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
    pub last_status: AgentStatus,
    #[serde(default)]
    pub last_mode_id: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub persistence: Option<PersistenceHandle>,
}

impl From<&Agent> for AgentRecord {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            provider: agent.provider.clone(),
            cwd: agent.cwd.clone(),
            created_at: agent.created_at,
            updated_at: agent.updated_at,
            last_activity_at: agent.last_activity_at,
            last_user_message_at: agent.last_user_message_at,
            title: agent.title.clone(),
            last_status: agent.status,
            last_mode_id: agent.current_mode_id.clone(),
            config: None,
            persistence: agent.persistence.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_agent_satisfies_invariants() {
        let agent = Agent::new(AgentId::new(), "codex".into(), PathBuf::from("/tmp"));
        assert!(agent.check_invariants().is_ok());
        assert_eq!(agent.status, AgentStatus::Initializing);
    }

    #[test]
    fn valid_transitions_per_lifecycle_table() {
        let mut agent = Agent::new(AgentId::new(), "codex".into(), PathBuf::from("/tmp"));
        assert!(agent.can_transition(AgentStatus::Idle));
        agent.status = AgentStatus::Idle;
        assert!(agent.can_transition(AgentStatus::Running));
        assert!(!agent.can_transition(AgentStatus::Error));
        agent.status = AgentStatus::Running;
        assert!(agent.can_transition(AgentStatus::Idle));
        assert!(agent.can_transition(AgentStatus::Error));
        assert!(agent.can_transition(AgentStatus::Closed));
    }

    #[test]
    fn requires_attention_without_reason_is_invalid() {
        let mut agent = Agent::new(AgentId::new(), "codex".into(), PathBuf::from("/tmp"));
        agent.requires_attention = true;
        assert!(agent.check_invariants().is_err());
    }
}
