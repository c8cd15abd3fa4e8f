//! The bidirectional JSON-over-WebSocket protocol (spec.md §6): every
//! message is `{type, payload?, requestId?}`. Request types carry a
//! `*_request` suffix and receive a `*_response` correlated by `requestId`,
//! or an `rpc_error`. Event types are server-initiated and carry no
//! `requestId`.

use serde::Deserialize;
use serde::Serialize;

use crate::agent::Agent;
use crate::error::RpcError;
use crate::ids::AgentId;
use crate::model_catalog::ModelInfo;
use crate::permission::PermissionRequest;
use crate::permission::PermissionResolution;
use crate::timeline::Projection;
use crate::timeline::ProjectedEntry;
use crate::timeline::Seq;
use crate::timeline::TimelineItem;
use crate::timeline::TimelineRow;

/// The untyped envelope every frame is decoded into first; `type` then
/// selects how `payload` is interpreted (as a `ClientRequest` or, for
/// replies, folded back into a typed `*_response`/`rpc_error`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineDirection {
    Head,
    Tail,
    Before,
    After,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    pub provider: String,
    pub cwd: std::path::PathBuf,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAgentMessage {
    pub agent_id: AgentId,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAgentRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAgentRequest {
    pub agent_id: AgentId,
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeAgentRequest {
    pub persistence: crate::agent::PersistenceHandle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPermissionResponse {
    pub agent_id: AgentId,
    pub request_id: String,
    pub resolution: PermissionResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAgentSelector {
    pub agent_id: AgentId,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeAgentRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAgentTimelineRequest {
    pub agent_id: AgentId,
    pub direction: TimelineDirection,
    #[serde(default)]
    pub cursor: Option<Seq>,
    pub limit: usize,
    #[serde(default = "default_projection")]
    pub projection: Projection,
    #[serde(default = "default_true")]
    pub collapse_tool_lifecycle: bool,
}

fn default_projection() -> Projection {
    Projection::Canonical
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeAgentStreamRequest {
    pub agent_id: AgentId,
    #[serde(default)]
    pub from_seq: Option<Seq>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProviderModelsRequest {
    pub provider: String,
    #[serde(default)]
    pub cwd: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutStatusRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutDiffRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExplorerRequest {
    pub cwd: std::path::PathBuf,
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Inbound request types, tagged by `type` per spec.md §6's mandatory list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    CreateAgentRequest(CreateAgentRequest),
    SendAgentMessage(SendAgentMessage),
    CancelAgentRequest(CancelAgentRequest),
    DeleteAgentRequest(DeleteAgentRequest),
    ResumeAgentRequest(ResumeAgentRequest),
    AgentPermissionResponse(AgentPermissionResponse),
    SetAgentMode(SetAgentSelector),
    SetAgentModel(SetAgentSelector),
    SetAgentThinkingOption(SetAgentSelector),
    SetAgentVariant(SetAgentSelector),
    InitializeAgentRequest(InitializeAgentRequest),
    FetchAgentTimelineRequest(FetchAgentTimelineRequest),
    SubscribeAgentStreamRequest(SubscribeAgentStreamRequest),
    ListProviderModelsRequest(ListProviderModelsRequest),
    CheckoutStatusRequest(CheckoutStatusRequest),
    CheckoutDiffRequest(CheckoutDiffRequest),
    FileExplorerRequest(FileExplorerRequest),
    Ping(Ping),
    Shutdown,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchTimelineResponse {
    pub entries: Vec<TimelineEntry>,
    pub start_cursor: Option<Seq>,
    pub end_cursor: Option<Seq>,
    pub has_older: bool,
    pub has_newer: bool,
}

/// Either a verbatim canonical row or a projected entry, depending on the
/// request's `projection` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimelineEntry {
    Canonical(TimelineRow),
    Projected(ProjectedEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub seq: Seq,
    pub item: TimelineItem,
}

/// Server-initiated events, no `requestId` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionState {
        client_id: String,
    },
    AgentState {
        agent: Box<Agent>,
    },
    AgentDeleted {
        agent_id: AgentId,
    },
    AgentStream {
        agent_id: AgentId,
        event: StreamEvent,
    },
    AgentStreamSnapshot {
        agent_id: AgentId,
        events: Vec<StreamEvent>,
    },
    AgentPermissionRequest {
        agent_id: AgentId,
        request: PermissionRequest,
    },
    AgentPermissionResolved {
        agent_id: AgentId,
        request_id: String,
        resolution: PermissionResolution,
    },
    ActivityLog {
        agent_id: AgentId,
        lines: Vec<String>,
    },
    TranscriptionResult {
        text: String,
    },
    AudioOutput {
        audio_base64: String,
    },
    CheckoutStatusResponse {
        agent_id: AgentId,
        dirty: bool,
    },
    CheckoutDiffResponse {
        agent_id: AgentId,
        diff: String,
    },
    ListProviderModelsResponse {
        provider: String,
        models: Vec<ModelInfo>,
    },
}

/// A fully-typed outbound frame: either a server event, a `*_response` tied
/// to a `requestId`, or an `rpc_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Event(ServerEvent),
    Response(ClientResponse),
    Error(RpcError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatch {
    pub path: String,
    pub score: u32,
}

/// Replies to request types whose natural response shape isn't already one
/// of `ServerEvent`'s variants (spec.md §6: "request types ... receive a
/// `*_response` with the same requestId"). `requestId` itself is not a field
/// here; it is spliced onto the serialized object at the C2 boundary, same
/// as every other outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientResponse {
    CreateAgentResponse { agent: Box<Agent> },
    AgentSnapshotResponse { agent: Box<Agent> },
    AckResponse,
    FetchAgentTimelineResponse(FetchTimelineResponse),
    FileExplorerResponse { matches: Vec<FileMatch>, total_match_count: usize },
    PongResponse { nonce: Option<String> },
}
