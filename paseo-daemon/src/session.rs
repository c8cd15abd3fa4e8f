//! C2: one `ClientSession` per live socket. Owns the outbox backpressure
//! policy, the inbound/outbound JSON splicing at the wire boundary, and the
//! dispatch of every `ClientRequest` to the manager/guard it was attached
//! with. Follows a per-connection task shape (one state machine per socket,
//! fed by channels rather than shared mutable state) generalized from a
//! single conversation stream to the full C3/C7/C10/C11 operation surface
//! spec.md §4.2 lists.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::num::NonZero;
use std::path::Path;
use std::sync::Arc;

use paseo_core::error::DaemonError;
use paseo_core::manager::AgentManager;
use paseo_protocol::agent::Agent;
use paseo_protocol::error::ErrorKind;
use paseo_protocol::error::RpcError;
use paseo_protocol::ids::AgentId;
use paseo_protocol::message::CheckoutDiffRequest;
use paseo_protocol::message::CheckoutStatusRequest;
use paseo_protocol::message::ClientRequest;
use paseo_protocol::message::ClientResponse;
use paseo_protocol::message::FetchAgentTimelineRequest;
use paseo_protocol::message::FetchTimelineResponse;
use paseo_protocol::message::FileExplorerRequest;
use paseo_protocol::message::FileMatch;
use paseo_protocol::message::RawMessage;
use paseo_protocol::message::ServerEvent;
use paseo_protocol::message::StreamEvent;
use paseo_protocol::message::TimelineDirection;
use paseo_protocol::message::TimelineEntry;
use paseo_protocol::permission::PermissionResolution;
use paseo_protocol::session::ClientState;
use paseo_protocol::timeline::Projection;
use paseo_protocol::timeline::Seq;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::guard::LifecycleIntent;
use crate::guard::ProcessGuard;

/// Critical lifecycle events (status, permission, deletion, error) never
/// drop. Capacity is generous headroom, not a real limit: overflowing it
/// means the client has stopped reading entirely, at which point closing
/// the session is the only sane response (spec.md §4.2).
const CRITICAL_CAPACITY: usize = 1024;

/// Stream-delta ring buffer. Overflow drops the oldest delta, never the
/// connection (spec.md §4.2: "drop oldest non-critical stream deltas").
const DELTA_CAPACITY: usize = 2048;

pub enum OutboxItem {
    Frame(String),
    Close(String),
}

struct OutboxState {
    critical: VecDeque<String>,
    delta: VecDeque<String>,
    close_reason: Option<String>,
}

/// The per-session bounded outbox (spec.md §4.2, §5): a single slow client
/// must never block another client or the agent manager, so every outbound
/// frame lands here instead of being written to the socket directly.
pub struct Outbox {
    state: Mutex<OutboxState>,
    notify: Notify,
}

impl Outbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(OutboxState {
                critical: VecDeque::new(),
                delta: VecDeque::new(),
                close_reason: None,
            }),
            notify: Notify::new(),
        })
    }

    /// Enqueue a lifecycle frame. If the critical queue is already full the
    /// session is marked for closure — a client that can't keep up with
    /// lifecycle events can't keep up at all.
    pub async fn push_critical(&self, frame: String) {
        let mut state = self.state.lock().await;
        if state.close_reason.is_some() {
            return;
        }
        if state.critical.len() >= CRITICAL_CAPACITY {
            state.close_reason = Some("critical outbox overflow".to_string());
        } else {
            state.critical.push_back(frame);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Enqueue a stream-delta frame, dropping the oldest one on overflow.
    pub async fn push_delta(&self, frame: String) {
        let mut state = self.state.lock().await;
        if state.close_reason.is_some() {
            return;
        }
        if state.delta.len() >= DELTA_CAPACITY {
            state.delta.pop_front();
        }
        state.delta.push_back(frame);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Next frame to write to the socket, critical frames ahead of deltas;
    /// `Close` once both queues have drained after an overflow.
    pub async fn next(&self) -> OutboxItem {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(frame) = state.critical.pop_front() {
                    return OutboxItem::Frame(frame);
                }
                if let Some(frame) = state.delta.pop_front() {
                    return OutboxItem::Frame(frame);
                }
                if let Some(reason) = state.close_reason.clone() {
                    return OutboxItem::Close(reason);
                }
            }
            self.notify.notified().await;
        }
    }
}

/// One connected client. `guard` is `None` for sessions that shouldn't be
/// able to trigger lifecycle intents (none, currently — kept optional so a
/// future read-only transport can omit it without changing the type).
pub struct ClientSession {
    client_id: String,
    manager: Arc<AgentManager>,
    guard: Option<Arc<ProcessGuard>>,
    outbox: Arc<Outbox>,
    #[allow(dead_code)]
    state: Mutex<ClientState>,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
    session_cancel: CancellationToken,
    /// Last-seen `pending_permissions` ids per agent, used to diff
    /// consecutive `Agent` snapshots into `agent_permission_request` events
    /// (see the module doc comment on the synthesis tradeoff this implies).
    permission_cache: Mutex<HashMap<AgentId, HashSet<String>>>,
}

impl ClientSession {
    pub fn new(
        client_id: String,
        manager: Arc<AgentManager>,
        guard: Option<Arc<ProcessGuard>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ClientState {
                client_id: client_id.clone(),
                device_type: None,
                app_visible: true,
                is_stale: false,
                focused_agent_id: None,
            }),
            client_id,
            manager,
            guard,
            outbox: Outbox::new(),
            cancellations: Mutex::new(HashMap::new()),
            session_cancel: CancellationToken::new(),
            permission_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn outbox(&self) -> Arc<Outbox> {
        self.outbox.clone()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Implicit directory subscription (spec.md §4.2): every session
    /// attaches to the full agent directory immediately, no explicit
    /// subscribe-directory request exists in the protocol. Pushes
    /// `session_state` plus one `agent_state` per existing agent, then
    /// starts the background forwarders that keep the directory live.
    pub async fn attach(self: &Arc<Self>) {
        self.outbox
            .push_critical(encode_event(&ServerEvent::SessionState {
                client_id: self.client_id.clone(),
            }))
            .await;
        for agent in self.manager.list_agents().await {
            self.remember_pending(&agent).await;
            self.outbox
                .push_critical(encode_event(&ServerEvent::AgentState {
                    agent: Box::new(agent),
                }))
                .await;
        }
        self.spawn_state_forwarder();
        self.spawn_deletion_forwarder();
    }

    /// Cancel all outstanding per-request work and stop the forwarders
    /// (spec.md §4.2: "a session close cancels all pending per-session
    /// work").
    pub fn close(&self) {
        self.session_cancel.cancel();
    }

    fn spawn_state_forwarder(self: &Arc<Self>) {
        let session = self.clone();
        let mut rx = self.manager.subscribe_agent_states();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = session.session_cancel.cancelled() => break,
                    received = rx.recv() => {
                        match received {
                            Ok(agent) => session.handle_state_update(agent).await,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    fn spawn_deletion_forwarder(self: &Arc<Self>) {
        let session = self.clone();
        let mut rx = self.manager.subscribe_agent_deletions();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = session.session_cancel.cancelled() => break,
                    received = rx.recv() => {
                        match received {
                            Ok(agent_id) => {
                                session.permission_cache.lock().await.remove(&agent_id);
                                session
                                    .outbox
                                    .push_critical(encode_event(&ServerEvent::AgentDeleted { agent_id }))
                                    .await;
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    async fn remember_pending(&self, agent: &Agent) {
        let ids = agent.pending_permissions.iter().map(|p| p.id.clone()).collect();
        self.permission_cache.lock().await.insert(agent.id, ids);
    }

    /// Synthesize `agent_permission_request` by diffing this snapshot's
    /// `pending_permissions` against the last one seen for this agent, then
    /// forward the snapshot itself as `agent_state`.
    async fn handle_state_update(&self, agent: Agent) {
        let new_ids: HashSet<String> =
            agent.pending_permissions.iter().map(|p| p.id.clone()).collect();
        {
            let mut cache = self.permission_cache.lock().await;
            let prior = cache.entry(agent.id).or_default();
            for request in &agent.pending_permissions {
                if !prior.contains(&request.id) {
                    self.outbox
                        .push_critical(encode_event(&ServerEvent::AgentPermissionRequest {
                            agent_id: agent.id,
                            request: request.clone(),
                        }))
                        .await;
                }
            }
            *prior = new_ids;
        }
        self.outbox
            .push_critical(encode_event(&ServerEvent::AgentState {
                agent: Box::new(agent),
            }))
            .await;
    }

    /// Decode one inbound frame and dispatch it. Malformed frames that
    /// still carry a `requestId` get an `rpc_error`; a frame with neither a
    /// valid request nor a `requestId` is silently dropped, matching
    /// transport-layer framing: truly garbage frames close the connection
    /// one layer up (spec.md §4.1), this only covers well-formed JSON that
    /// fails to match any `ClientRequest` shape.
    pub async fn handle_raw(self: &Arc<Self>, raw: RawMessage) {
        let request_id = raw.request_id.clone();
        match decode_request(&raw) {
            Ok(request) => self.dispatch(raw.kind, request_id, request).await,
            Err(err) => {
                if let Some(id) = request_id {
                    self.push_error(&id, &raw.kind, ErrorKind::Invalid, &err.to_string())
                        .await;
                }
            }
        }
    }

    async fn dispatch(
        self: &Arc<Self>,
        request_type: String,
        request_id: Option<String>,
        request: ClientRequest,
    ) {
        let outcome = self.run_request(request_id.as_deref(), request).await;
        let Some(request_id) = request_id else {
            return;
        };
        match outcome {
            Ok(OutboundPayload::Response(response)) => {
                self.outbox
                    .push_critical(encode_response(&request_id, &response))
                    .await;
            }
            Ok(OutboundPayload::Event(event)) => {
                self.outbox
                    .push_critical(encode_response_event(&request_id, &event))
                    .await;
            }
            Err(err) => {
                self.push_error(&request_id, &request_type, err.kind(), &err.to_string())
                    .await;
            }
        }
    }

    async fn push_error(&self, request_id: &str, request_type: &str, code: ErrorKind, message: &str) {
        let rpc_error = RpcError {
            request_id: request_id.to_string(),
            request_type: request_type.to_string(),
            code,
            message: message.to_string(),
        };
        self.outbox.push_critical(encode_error(&rpc_error)).await;
    }

    async fn run_request(
        self: &Arc<Self>,
        request_id: Option<&str>,
        request: ClientRequest,
    ) -> Result<OutboundPayload, DaemonError> {
        use ClientRequest::*;
        match request {
            CreateAgentRequest(req) => {
                let agent = self.manager.create_agent(&req.provider, req.cwd, req.config).await?;
                Ok(OutboundPayload::Response(ClientResponse::CreateAgentResponse {
                    agent: Box::new(agent),
                }))
            }
            SendAgentMessage(req) => {
                self.manager
                    .send_message(req.agent_id, &req.text, &req.attachments)
                    .await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            CancelAgentRequest(req) => {
                self.manager.cancel_agent(req.agent_id).await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            DeleteAgentRequest(req) => {
                self.manager.delete_agent(req.agent_id, req.hard).await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            ResumeAgentRequest(req) => {
                let agent = self.manager.resume_agent(req.persistence).await?;
                Ok(OutboundPayload::Response(ClientResponse::CreateAgentResponse {
                    agent: Box::new(agent),
                }))
            }
            AgentPermissionResponse(req) => {
                self.manager
                    .resolve_permission(req.agent_id, &req.request_id, req.resolution.clone())
                    .await?;
                self.permission_cache
                    .lock()
                    .await
                    .entry(req.agent_id)
                    .or_default()
                    .remove(&req.request_id);
                self.outbox
                    .push_critical(encode_event(&ServerEvent::AgentPermissionResolved {
                        agent_id: req.agent_id,
                        request_id: req.request_id,
                        resolution: req.resolution,
                    }))
                    .await;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            SetAgentMode(req) => {
                self.manager.set_agent_mode(req.agent_id, &req.value).await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            SetAgentModel(req) => {
                self.manager.set_agent_model(req.agent_id, &req.value).await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            SetAgentThinkingOption(req) => {
                self.manager.set_agent_thinking(req.agent_id, &req.value).await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            SetAgentVariant(req) => {
                self.manager.set_agent_variant(req.agent_id, &req.value).await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            InitializeAgentRequest(req) => {
                let agent = self.manager.initialize_agent(req.agent_id).await?;
                Ok(OutboundPayload::Response(ClientResponse::AgentSnapshotResponse {
                    agent: Box::new(agent),
                }))
            }
            FetchAgentTimelineRequest(req) => self.fetch_timeline(req).await,
            SubscribeAgentStreamRequest(req) => {
                self.subscribe_stream(req.agent_id, req.from_seq).await?;
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            ListProviderModelsRequest(req) => {
                let models = self
                    .manager
                    .list_provider_models(&req.provider, req.cwd.as_deref())
                    .await?;
                Ok(OutboundPayload::Event(ServerEvent::ListProviderModelsResponse {
                    provider: req.provider,
                    models,
                }))
            }
            CheckoutStatusRequest(req) => self.checkout_status(req).await,
            CheckoutDiffRequest(req) => self.checkout_diff(request_id, req).await,
            FileExplorerRequest(req) => self.file_explorer(req).await,
            Ping(req) => Ok(OutboundPayload::Response(ClientResponse::PongResponse {
                nonce: req.nonce,
            })),
            Shutdown => {
                if let Some(guard) = &self.guard {
                    guard.handle_lifecycle_intent(LifecycleIntent::Shutdown);
                }
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
            Restart => {
                if let Some(guard) = &self.guard {
                    guard.handle_lifecycle_intent(LifecycleIntent::Restart);
                }
                Ok(OutboundPayload::Response(ClientResponse::AckResponse))
            }
        }
    }

    /// `FetchAgentTimelineRequest` translates a `{direction, cursor, limit}`
    /// window into the `[from, to]` range `AgentManager::fetch_timeline`
    /// takes. Canonical `seq`s start at 1, so `Head`/`Tail` need no upper
    /// bound beyond "everything that exists" — `fetch_timeline` only reads
    /// the segments its on-disk index actually covers, so an unbounded `to`
    /// costs nothing beyond what the timeline already holds.
    async fn fetch_timeline(
        &self,
        req: FetchAgentTimelineRequest,
    ) -> Result<OutboundPayload, DaemonError> {
        let (from, to) = match (req.direction, req.cursor) {
            (TimelineDirection::Head, _) => (1, Seq::MAX),
            (TimelineDirection::Tail, _) => (1, Seq::MAX),
            (TimelineDirection::Before, Some(cursor)) => (1, cursor.saturating_sub(1).max(1)),
            (TimelineDirection::Before, None) => (1, Seq::MAX),
            (TimelineDirection::After, Some(cursor)) => (cursor.saturating_add(1), Seq::MAX),
            (TimelineDirection::After, None) => (1, Seq::MAX),
        };
        let (rows, projected) = self
            .manager
            .fetch_timeline(req.agent_id, from, to, req.projection)
            .await?;

        let take_from_tail = matches!(
            req.direction,
            TimelineDirection::Tail | TimelineDirection::Before
        );

        let (entries, has_older, has_newer) = match req.projection {
            Projection::Canonical => {
                let total = rows.len();
                let window = window_slice(rows, req.limit, take_from_tail);
                let trimmed = window.len() < total;
                let has_older = trimmed && take_from_tail;
                let has_newer = trimmed && !take_from_tail;
                (
                    window.into_iter().map(TimelineEntry::Canonical).collect::<Vec<_>>(),
                    has_older,
                    has_newer,
                )
            }
            Projection::Projected => {
                let total = projected.len();
                let window = window_slice(projected, req.limit, take_from_tail);
                let trimmed = window.len() < total;
                let has_older = trimmed && take_from_tail;
                let has_newer = trimmed && !take_from_tail;
                (
                    window.into_iter().map(TimelineEntry::Projected).collect::<Vec<_>>(),
                    has_older,
                    has_newer,
                )
            }
        };

        let start_cursor = entries.first().and_then(entry_start_seq);
        let end_cursor = entries.last().and_then(entry_end_seq);

        Ok(OutboundPayload::Response(ClientResponse::FetchAgentTimelineResponse(
            FetchTimelineResponse {
                entries,
                start_cursor,
                end_cursor,
                has_older,
                has_newer,
            },
        )))
    }

    async fn subscribe_stream(&self, agent_id: AgentId, from_seq: Option<Seq>) -> Result<(), DaemonError> {
        let backfill = self
            .manager
            .fetch_timeline(agent_id, from_seq.unwrap_or(1), Seq::MAX, Projection::Canonical)
            .await?
            .0;
        if !backfill.is_empty() {
            let events = backfill
                .into_iter()
                .map(|row| StreamEvent {
                    seq: row.seq,
                    item: row.item,
                })
                .collect();
            self.outbox
                .push_critical(encode_event(&ServerEvent::AgentStreamSnapshot { agent_id, events }))
                .await;
        }

        let mut rx = self.manager.subscribe_stream(agent_id).await?;
        let outbox = self.outbox.clone();
        let cancel = self.session_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => {
                        match received {
                            Ok(row) => {
                                let event = ServerEvent::AgentStream {
                                    agent_id,
                                    event: StreamEvent { seq: row.seq, item: row.item },
                                };
                                outbox.push_delta(encode_event(&event)).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn checkout_status(&self, req: CheckoutStatusRequest) -> Result<OutboundPayload, DaemonError> {
        let agent = self.manager.get_agent(req.agent_id).await?;
        let dirty = git_status_dirty(&agent.cwd).await?;
        Ok(OutboundPayload::Event(ServerEvent::CheckoutStatusResponse {
            agent_id: req.agent_id,
            dirty,
        }))
    }

    /// The one request type spec.md §4.2 names explicitly as cancellable
    /// ("outstanding `checkout_diff` computations"): register a token keyed
    /// by `requestId` so a session close or a future explicit-cancel
    /// message can abandon the `git diff` child process before it replies.
    async fn checkout_diff(
        &self,
        request_id: Option<&str>,
        req: CheckoutDiffRequest,
    ) -> Result<OutboundPayload, DaemonError> {
        let agent = self.manager.get_agent(req.agent_id).await?;
        let token = self.session_cancel.child_token();
        if let Some(id) = request_id {
            self.cancellations.lock().await.insert(id.to_string(), token.clone());
        }
        let result = tokio::select! {
            _ = token.cancelled() => Err(DaemonError::Internal("checkout_diff cancelled".to_string())),
            diff = git_diff(&agent.cwd) => diff,
        };
        if let Some(id) = request_id {
            self.cancellations.lock().await.remove(id);
        }
        let diff = result?;
        Ok(OutboundPayload::Event(ServerEvent::CheckoutDiffResponse {
            agent_id: req.agent_id,
            diff,
        }))
    }

    async fn file_explorer(&self, req: FileExplorerRequest) -> Result<OutboundPayload, DaemonError> {
        let limit = NonZero::new(req.limit.unwrap_or(200)).unwrap_or(NonZero::<usize>::MIN);
        let threads = std::thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN);
        let results = paseo_file_search::run(&req.query, limit, req.cwd, Vec::new(), threads)
            .await
            .map_err(|err| DaemonError::Internal(err.to_string()))?;
        let matches = results
            .matches
            .into_iter()
            .map(|(score, path)| FileMatch { path, score })
            .collect();
        Ok(OutboundPayload::Response(ClientResponse::FileExplorerResponse {
            matches,
            total_match_count: results.total_match_count,
        }))
    }
}

enum OutboundPayload {
    Response(ClientResponse),
    Event(ServerEvent),
}

fn window_slice<T>(mut rows: Vec<T>, limit: usize, take_from_tail: bool) -> Vec<T> {
    if rows.len() <= limit {
        return rows;
    }
    if take_from_tail {
        rows.split_off(rows.len() - limit)
    } else {
        rows.truncate(limit);
        rows
    }
}

fn entry_start_seq(entry: &TimelineEntry) -> Option<Seq> {
    match entry {
        TimelineEntry::Canonical(row) => Some(row.seq),
        TimelineEntry::Projected(projected) => projected.source_seq_ranges.first().map(|(from, _)| *from),
    }
}

fn entry_end_seq(entry: &TimelineEntry) -> Option<Seq> {
    match entry {
        TimelineEntry::Canonical(row) => Some(row.seq),
        TimelineEntry::Projected(projected) => {
            projected.source_seq_ranges.iter().map(|(_, to)| *to).max()
        }
    }
}

async fn git_status_dirty(cwd: &Path) -> Result<bool, DaemonError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(cwd)
        .arg("status")
        .arg("--porcelain")
        .output()
        .await?;
    Ok(!output.stdout.is_empty())
}

async fn git_diff(cwd: &Path) -> Result<String, DaemonError> {
    let output = Command::new("git").arg("-C").arg(cwd).arg("diff").output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Splice `raw.kind` into the payload object's `type` key so the
/// internally-tagged `ClientRequest` enum can deserialize it, per
/// `message.rs`'s envelope doc comment.
fn decode_request(raw: &RawMessage) -> Result<ClientRequest, serde_json::Error> {
    let mut value = raw
        .payload
        .clone()
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
    if let serde_json::Value::Object(map) = &mut value {
        map.insert("type".to_string(), serde_json::Value::String(raw.kind.clone()));
    }
    serde_json::from_value(value)
}

fn encode_event(event: &ServerEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

fn encode_response(request_id: &str, response: &ClientResponse) -> String {
    splice_request_id(request_id, serde_json::to_value(response))
}

fn encode_response_event(request_id: &str, event: &ServerEvent) -> String {
    splice_request_id(request_id, serde_json::to_value(event))
}

fn encode_error(err: &RpcError) -> String {
    let mut value = serde_json::to_value(err).unwrap_or(serde_json::Value::Null);
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "type".to_string(),
            serde_json::Value::String("rpc_error".to_string()),
        );
    }
    serde_json::to_string(&value).unwrap_or_default()
}

fn splice_request_id(request_id: &str, value: serde_json::Result<serde_json::Value>) -> String {
    let mut value = value.unwrap_or(serde_json::Value::Null);
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "requestId".to_string(),
            serde_json::Value::String(request_id.to_string()),
        );
    }
    serde_json::to_string(&value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn critical_overflow_marks_outbox_for_close() {
        let outbox = Outbox::new();
        for i in 0..CRITICAL_CAPACITY {
            outbox.push_critical(format!("frame-{i}")).await;
        }
        outbox.push_critical("one-too-many".to_string()).await;
        for _ in 0..CRITICAL_CAPACITY {
            match outbox.next().await {
                OutboxItem::Frame(_) => {}
                OutboxItem::Close(_) => panic!("closed before queue drained"),
            }
        }
        match outbox.next().await {
            OutboxItem::Close(reason) => assert!(reason.contains("overflow")),
            OutboxItem::Frame(_) => panic!("expected close after overflow"),
        }
    }

    #[tokio::test]
    async fn delta_overflow_drops_oldest_not_connection() {
        let outbox = Outbox::new();
        for i in 0..(DELTA_CAPACITY + 10) {
            outbox.push_delta(format!("delta-{i}")).await;
        }
        match outbox.next().await {
            OutboxItem::Frame(frame) => assert_eq!(frame, "delta-10"),
            OutboxItem::Close(_) => panic!("delta overflow must not close the session"),
        }
    }

    #[test]
    fn decode_request_splices_kind_into_payload() {
        let raw = RawMessage {
            kind: "ping".to_string(),
            payload: Some(serde_json::json!({ "nonce": "abc" })),
            request_id: Some("req-1".to_string()),
        };
        let request = decode_request(&raw).unwrap();
        assert!(matches!(request, ClientRequest::Ping(p) if p.nonce.as_deref() == Some("abc")));
    }

    #[test]
    fn encode_response_splices_request_id() {
        let frame = encode_response("req-42", &ClientResponse::AckResponse);
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["requestId"], "req-42");
        assert_eq!(value["type"], "ack_response");
    }

    #[test]
    fn window_slice_from_tail_keeps_most_recent() {
        let rows = vec![1, 2, 3, 4, 5];
        let windowed = window_slice(rows, 2, true);
        assert_eq!(windowed, vec![4, 5]);
    }

    #[test]
    fn window_slice_from_head_keeps_earliest() {
        let rows = vec![1, 2, 3, 4, 5];
        let windowed = window_slice(rows, 2, false);
        assert_eq!(windowed, vec![1, 2]);
    }
}
