//! C4: one running agent. Owns the `Agent` state, the timeline log, and the
//! live `ProviderConversation`; every mutation happens under
//! `AgentInstance`'s own mutex so state-machine transitions, timeline
//! appends, and permission bookkeeping never race each other. Follows a
//! `Session`-style task-per-conversation loop, generalized from one
//! hardcoded provider to the pluggable `ProviderConversation` trait.

use std::sync::Arc;

use chrono::Utc;
use paseo_protocol::agent::Agent;
use paseo_protocol::agent::AgentStatus;
use paseo_protocol::agent::AttentionReason;
use paseo_protocol::agent::PersistenceHandle;
use paseo_protocol::ids::AgentId;
use paseo_protocol::permission::PermissionResolution;
use paseo_protocol::timeline::TimelineRow;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use crate::error::DaemonError;
use crate::error::Result;
use crate::permissions::PermissionBroker;
use crate::provider::ProviderConversation;
use crate::provider::ProviderEvent;
use crate::store::TimelineLog;

/// Capacity of the per-agent stream broadcast; a lagging subscriber drops
/// the oldest rows and resynchronizes via a `subscribe_agent_stream_request`
/// replay rather than blocking the writer.
const STREAM_CHANNEL_CAPACITY: usize = 256;

pub struct AgentInstance {
    id: AgentId,
    state: Mutex<Agent>,
    timeline: Mutex<TimelineLog>,
    conversation: Mutex<Box<dyn ProviderConversation>>,
    permissions: Arc<PermissionBroker>,
    stream: broadcast::Sender<TimelineRow>,
    /// Manager-wide fan-out of `Agent` snapshots, one send per state
    /// mutation, so `paseo-daemon`'s session layer learns about
    /// provider-driven transitions (e.g. a spontaneous `turn_completed`)
    /// without polling every live agent.
    state_tx: broadcast::Sender<Agent>,
    dirty: mpsc::UnboundedSender<()>,
}

impl AgentInstance {
    /// Wrap a freshly created or resumed conversation, and spawn the
    /// background task that drains `ProviderEvent`s for its whole lifetime.
    pub fn spawn(
        agent: Agent,
        conversation: Box<dyn ProviderConversation>,
        timeline: TimelineLog,
        permissions: Arc<PermissionBroker>,
        state_tx: broadcast::Sender<Agent>,
        dirty: mpsc::UnboundedSender<()>,
    ) -> Arc<Self> {
        let (stream_tx, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        let instance = Arc::new(Self {
            id: agent.id,
            state: Mutex::new(agent),
            timeline: Mutex::new(timeline),
            conversation: Mutex::new(conversation),
            permissions,
            stream: stream_tx,
            state_tx,
            dirty,
        });
        tokio::spawn(drive(instance.clone()));
        instance
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub async fn snapshot(&self) -> Agent {
        self.state.lock().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimelineRow> {
        self.stream.subscribe()
    }

    pub async fn timeline_snapshot(&self) -> (paseo_protocol::timeline::Seq, Vec<TimelineRow>) {
        let log = self.timeline.lock().await;
        let next = log.next_seq();
        let from = next.saturating_sub(1).max(1);
        let rows = log.read_range(1, from).await.unwrap_or_default();
        (next, rows)
    }

    pub async fn read_range(
        &self,
        from: paseo_protocol::timeline::Seq,
        to: paseo_protocol::timeline::Seq,
    ) -> Result<Vec<TimelineRow>> {
        Ok(self.timeline.lock().await.read_range(from, to).await?)
    }

    pub async fn read_tail(&self, limit: usize) -> Result<Vec<TimelineRow>> {
        Ok(self.timeline.lock().await.read_tail(limit).await?)
    }

    pub async fn send_message(&self, text: &str, attachments: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        if !matches!(state.status, AgentStatus::Idle | AgentStatus::Error) {
            return Err(DaemonError::InvalidTransition(self.id, state.status));
        }
        if !state.pending_permissions.is_empty() {
            return Err(DaemonError::PermissionsOutstanding(
                self.id,
                state.pending_permissions.len(),
            ));
        }
        state.status = AgentStatus::Running;
        self.conversation.lock().await.send(text, attachments).await?;
        let now = Utc::now();
        state.last_user_message_at = Some(now);
        state.updated_at = now;
        state.last_activity_at = now;
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn cancel(&self) -> Result<()> {
        self.conversation.lock().await.cancel().await?;
        Ok(())
    }

    pub async fn set_mode(&self, mode_id: &str) -> Result<()> {
        self.conversation.lock().await.set_mode(mode_id).await?;
        let mut state = self.state.lock().await;
        state.current_mode_id = Some(mode_id.to_string());
        state.updated_at = Utc::now();
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn set_model(&self, model_id: &str) -> Result<()> {
        {
            let state = self.state.lock().await;
            if state.status == AgentStatus::Running && !state.capabilities.supports_live_model_switch
            {
                return Err(DaemonError::UnsupportedLiveSwitch(self.id, "model".into()));
            }
        }
        self.conversation.lock().await.set_model(model_id).await?;
        let mut state = self.state.lock().await;
        state.model = Some(model_id.to_string());
        state.updated_at = Utc::now();
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn set_thinking(&self, thinking_option_id: &str) -> Result<()> {
        self.conversation
            .lock()
            .await
            .set_thinking(thinking_option_id)
            .await?;
        let mut state = self.state.lock().await;
        state.thinking_option_id = Some(thinking_option_id.to_string());
        state.updated_at = Utc::now();
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn set_variant(&self, variant_id: &str) -> Result<()> {
        self.conversation.lock().await.set_variant(variant_id).await?;
        let mut state = self.state.lock().await;
        state.variant_id = Some(variant_id.to_string());
        state.updated_at = Utc::now();
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn resolve_permission(
        &self,
        request_id: &str,
        resolution: PermissionResolution,
    ) -> Result<()> {
        if self.permissions.resolve(request_id).is_none() {
            return Err(DaemonError::UnknownPermission(request_id.to_string()));
        }
        self.conversation
            .lock()
            .await
            .resolve_permission(request_id, resolution)
            .await?;
        let mut state = self.state.lock().await;
        state.pending_permissions.retain(|p| p.id != request_id);
        if state.pending_permissions.is_empty() && state.attention_reason == Some(AttentionReason::Permission)
        {
            state.requires_attention = false;
            state.attention_reason = None;
            state.attention_timestamp = None;
        }
        state.updated_at = Utc::now();
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.conversation.lock().await.close().await?;
        let mut state = self.state.lock().await;
        state.status = AgentStatus::Closed;
        state.updated_at = Utc::now();
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn persistence_handle(&self) -> PersistenceHandle {
        self.conversation.lock().await.persistence_handle()
    }

    /// Stamp an arbitrary label, e.g. `parentAgentId` set by the MCP tool
    /// surface (C8) when one agent spawns another.
    pub async fn set_label(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        state.labels.insert(key.to_string(), value.to_string());
        state.updated_at = Utc::now();
        drop(state);
        self.mark_dirty().await;
    }

    /// Re-read the current snapshot, fan it out to every
    /// `subscribe_agent_states` receiver, and signal the registry persister.
    async fn mark_dirty(&self) {
        let snapshot = self.state.lock().await.clone();
        let _ = self.state_tx.send(snapshot);
        let _ = self.dirty.send(());
    }

    async fn append_and_broadcast(&self, item: paseo_protocol::timeline::TimelineItem) {
        let mut log = self.timeline.lock().await;
        let seq = log.next_seq();
        let row = TimelineRow {
            seq,
            timestamp: Utc::now(),
            item,
        };
        if let Err(err) = log.append(&row).await {
            tracing::error!(agent_id = %self.id, "failed to append timeline row: {err}");
            return;
        }
        drop(log);
        let _ = self.stream.send(row);
    }
}

/// The per-agent background loop: pull `ProviderEvent`s until the
/// conversation closes, applying each to `Agent` state and the timeline.
async fn drive(instance: Arc<AgentInstance>) {
    loop {
        let event = {
            let mut conversation = instance.conversation.lock().await;
            conversation.next_event().await
        };
        let Some(event) = event else {
            break;
        };
        apply_event(&instance, event).await;
        instance.mark_dirty().await;
    }

    let mut state = instance.state.lock().await;
    if state.status != AgentStatus::Closed {
        state.status = AgentStatus::Closed;
        state.updated_at = Utc::now();
    }
    drop(state);
    instance.mark_dirty().await;
}

async fn apply_event(instance: &Arc<AgentInstance>, event: ProviderEvent) {
    match event {
        ProviderEvent::TurnStarted => {
            let mut state = instance.state.lock().await;
            state.status = AgentStatus::Running;
            state.updated_at = Utc::now();
        }
        ProviderEvent::TurnCompleted { usage } => {
            let mut state = instance.state.lock().await;
            state.status = AgentStatus::Idle;
            if let Some(usage) = usage {
                state.last_usage = Some(usage);
            }
            state.requires_attention = true;
            state.attention_reason = Some(AttentionReason::Finished);
            state.attention_timestamp = Some(Utc::now());
            state.updated_at = Utc::now();
            state.last_activity_at = Utc::now();
        }
        ProviderEvent::TurnFailed { error } => {
            let mut state = instance.state.lock().await;
            state.status = AgentStatus::Error;
            state.last_error = Some(error);
            state.requires_attention = true;
            state.attention_reason = Some(AttentionReason::Error);
            state.attention_timestamp = Some(Utc::now());
            state.updated_at = Utc::now();
        }
        ProviderEvent::TurnCanceled => {
            let mut state = instance.state.lock().await;
            state.status = AgentStatus::Idle;
            state.updated_at = Utc::now();
        }
        ProviderEvent::Timeline(item) => {
            instance.append_and_broadcast(item).await;
            let mut state = instance.state.lock().await;
            state.last_activity_at = Utc::now();
        }
        ProviderEvent::PermissionRequested(request) => {
            let request_id = instance.permissions.register(instance.id, &request);
            let mut state = instance.state.lock().await;
            let mut request = request;
            request.id = request_id;
            state.pending_permissions.push(request);
            state.requires_attention = true;
            state.attention_reason = Some(AttentionReason::Permission);
            state.attention_timestamp = Some(Utc::now());
            state.updated_at = Utc::now();
        }
        ProviderEvent::PermissionResolved { request_id } => {
            instance.permissions.resolve(&request_id);
            let mut state = instance.state.lock().await;
            state.pending_permissions.retain(|p| p.id != request_id);
        }
        ProviderEvent::CapabilitiesChanged(capabilities) => {
            let mut state = instance.state.lock().await;
            state.capabilities = capabilities;
            state.updated_at = Utc::now();
        }
        ProviderEvent::ModesUpdated {
            current_mode_id,
            available_modes,
        } => {
            let mut state = instance.state.lock().await;
            state.current_mode_id = current_mode_id;
            state.available_modes = available_modes;
            state.updated_at = Utc::now();
        }
        ProviderEvent::Closed { error } => {
            let mut state = instance.state.lock().await;
            state.status = AgentStatus::Closed;
            if let Some(error) = error {
                state.last_error = Some(error);
            }
            state.updated_at = Utc::now();
        }
    }
}
