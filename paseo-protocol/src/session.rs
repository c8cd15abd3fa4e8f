//! Per-client UX state tracked by C2 and consumed by C9 (spec.md §3, §4.9).

use serde::Deserialize;
use serde::Serialize;

use crate::ids::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Web,
    Mobile,
    Desktop,
    Cli,
}

/// A point-in-time snapshot of one connected client's UX state, as observed
/// by the attention/notification policy (C9). `is_stale` reflects whether a
/// heartbeat has been seen recently; it is computed by C2, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientState {
    pub client_id: String,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    pub app_visible: bool,
    pub is_stale: bool,
    #[serde(default)]
    pub focused_agent_id: Option<AgentId>,
}

impl ClientState {
    pub fn is_focused_on(&self, agent: AgentId) -> bool {
        self.focused_agent_id == Some(agent)
    }
}
