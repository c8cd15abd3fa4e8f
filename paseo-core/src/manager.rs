//! C3: the agent manager. Single source of truth for which agents exist,
//! routes every client-facing operation to the right `AgentInstance`, lazily
//! reinitializes agents restored from the registry, and owns the registry's
//! debounced persistence. Follows the `ConversationManager` shape, generalized
//! from one conversation type to the pluggable provider surface.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use paseo_protocol::agent::Agent;
use paseo_protocol::agent::AgentRecord;
use paseo_protocol::agent::AgentStatus;
use paseo_protocol::agent::PersistenceHandle;
use paseo_protocol::ids::AgentId;
use paseo_protocol::model_catalog::ModelInfo;
use paseo_protocol::permission::PermissionResolution;
use paseo_protocol::timeline::Projection;
use paseo_protocol::timeline::ProjectedEntry;
use paseo_protocol::timeline::Seq;
use paseo_protocol::timeline::TimelineRow;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use crate::agent::AgentInstance;
use crate::catalog::ModelCatalog;
use crate::config::Config;
use crate::curated;
use crate::error::DaemonError;
use crate::error::Result;
use crate::permissions::PermissionBroker;
use crate::registry::ProviderRegistry;
use crate::store::Store;

/// An agent the manager has loaded from the registry but has not yet wired
/// up a live `ProviderConversation` for (spec.md §4.6: "exposed as
/// not-yet-initialized").
struct Dormant {
    record: AgentRecord,
}

pub struct AgentManager {
    config: Config,
    store: Arc<Store>,
    providers: Arc<ProviderRegistry>,
    permissions: Arc<PermissionBroker>,
    catalog: ModelCatalog,
    live: RwLock<HashMap<AgentId, Arc<AgentInstance>>>,
    dormant: RwLock<HashMap<AgentId, Dormant>>,
    dirty_tx: mpsc::UnboundedSender<()>,
    // Serializes registry saves so two concurrent dirty-signals never
    // interleave their tmp-write + rename.
    save_lock: Mutex<()>,
    /// Every live agent's state mutations fan out here, so a session layer
    /// can learn about provider-driven transitions across all agents from a
    /// single subscription instead of one receiver per agent.
    state_tx: broadcast::Sender<Agent>,
    /// Fan-out of hard/soft-deleted agent ids, so every connected session
    /// can broadcast `agent_deleted` (spec.md §4.3) without polling.
    deleted_tx: broadcast::Sender<AgentId>,
}

/// Capacity of the manager-wide agent-state broadcast; a lagging subscriber
/// (e.g. a slow client session) drops the oldest snapshots rather than
/// blocking every agent's `drive()` loop.
const STATE_CHANNEL_CAPACITY: usize = 512;

impl AgentManager {
    pub async fn new(
        config: Config,
        providers: Arc<ProviderRegistry>,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(Store::new(config.paseo_home.clone()));
        let records = store.load_registry().await?;

        let (dirty_tx, mut dirty_rx) = mpsc::unbounded_channel::<()>();

        let dormant = records
            .into_iter()
            .map(|record| (record.id, Dormant { record }))
            .collect();

        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (deleted_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);

        let manager = Arc::new(Self {
            catalog: ModelCatalog::new(providers.clone()),
            config,
            store,
            providers,
            permissions: Arc::new(PermissionBroker::new()),
            live: RwLock::new(HashMap::new()),
            dormant: RwLock::new(dormant),
            dirty_tx,
            save_lock: Mutex::new(()),
            state_tx,
            deleted_tx,
        });

        let weak = Arc::downgrade(&manager);
        tokio::spawn(async move {
            while dirty_rx.recv().await.is_some() {
                // Coalesce a burst of signals into a single save.
                while dirty_rx.try_recv().is_ok() {}
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = manager.save_registry().await {
                    tracing::error!("failed to persist agent registry: {err}");
                }
            }
        });

        Ok(manager)
    }

    async fn save_registry(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let live = self.live.read().await;
        let dormant = self.dormant.read().await;
        let mut records: Vec<AgentRecord> = Vec::with_capacity(live.len() + dormant.len());
        for instance in live.values() {
            records.push(AgentRecord::from(&instance.snapshot().await));
        }
        for entry in dormant.values() {
            records.push(entry.record.clone());
        }
        records.sort_by_key(|r| r.created_at);
        self.store.save_registry(&records).await
    }

    pub async fn create_agent(
        &self,
        provider: &str,
        cwd: PathBuf,
        config: Option<serde_json::Value>,
    ) -> Result<Agent> {
        let client = self
            .providers
            .get(provider)
            .ok_or_else(|| DaemonError::ProviderUnavailable(provider.to_string()))?;

        let mut agent = Agent::new(AgentId::new(), provider.to_string(), cwd.clone());
        let conversation = client.create(&cwd, config).await?;
        agent.persistence = Some(conversation.persistence_handle());
        agent.status = AgentStatus::Idle;

        let timeline = self.store.timeline(agent.id).await?;
        let instance = AgentInstance::spawn(
            agent.clone(),
            conversation,
            timeline,
            self.permissions.clone(),
            self.state_tx.clone(),
            self.dirty_tx.clone(),
        );
        self.live.write().await.insert(agent.id, instance);
        let _ = self.dirty_tx.send(());
        Ok(agent)
    }

    /// Lazily bring a dormant (registry-only) agent up as a live instance,
    /// resuming via its persistence handle if one exists, or rooting a
    /// fresh session at its preserved `cwd` otherwise (spec.md §4.6).
    pub async fn initialize_agent(&self, agent_id: AgentId) -> Result<Agent> {
        if let Some(instance) = self.live.read().await.get(&agent_id) {
            return Ok(instance.snapshot().await);
        }

        let record = {
            let mut dormant = self.dormant.write().await;
            dormant.remove(&agent_id).ok_or(DaemonError::AgentNotFound(agent_id))?.record
        };

        let client = self
            .providers
            .get(&record.provider)
            .ok_or_else(|| DaemonError::ProviderUnavailable(record.provider.clone()))?;

        let conversation = match &record.persistence {
            Some(handle) => client.resume(handle).await?,
            None => client.create(&record.cwd, record.config.clone()).await?,
        };

        let mut agent = Agent::new(record.id, record.provider.clone(), record.cwd.clone());
        agent.created_at = record.created_at;
        agent.title = record.title.clone();
        agent.current_mode_id = record.last_mode_id.clone();
        agent.persistence = Some(conversation.persistence_handle());
        agent.status = AgentStatus::Idle;

        let timeline = self.store.timeline(agent.id).await?;
        let instance = AgentInstance::spawn(
            agent.clone(),
            conversation,
            timeline,
            self.permissions.clone(),
            self.state_tx.clone(),
            self.dirty_tx.clone(),
        );
        self.live.write().await.insert(agent_id, instance);
        let _ = self.dirty_tx.send(());
        Ok(agent)
    }

    /// The dormant-or-live agent as its current `Agent` view, without
    /// forcing initialization (used by `list_agents`/`get_agent`).
    pub async fn get_agent(&self, agent_id: AgentId) -> Result<Agent> {
        if let Some(instance) = self.live.read().await.get(&agent_id) {
            return Ok(instance.snapshot().await);
        }
        if let Some(entry) = self.dormant.read().await.get(&agent_id) {
            return Ok(dormant_to_agent(&entry.record));
        }
        Err(DaemonError::AgentNotFound(agent_id))
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let live = self.live.read().await;
        let mut out = Vec::with_capacity(live.len());
        for instance in live.values() {
            out.push(instance.snapshot().await);
        }
        drop(live);
        for entry in self.dormant.read().await.values() {
            out.push(dormant_to_agent(&entry.record));
        }
        out.sort_by_key(|a| a.created_at);
        out
    }

    async fn live_instance(&self, agent_id: AgentId) -> Result<Arc<AgentInstance>> {
        if let Some(instance) = self.live.read().await.get(&agent_id) {
            return Ok(instance.clone());
        }
        self.initialize_agent(agent_id).await?;
        self.live
            .read()
            .await
            .get(&agent_id)
            .cloned()
            .ok_or(DaemonError::AgentNotFound(agent_id))
    }

    pub async fn send_message(&self, agent_id: AgentId, text: &str, attachments: &[String]) -> Result<()> {
        self.live_instance(agent_id).await?.send_message(text, attachments).await
    }

    pub async fn cancel_agent(&self, agent_id: AgentId) -> Result<()> {
        self.live_instance(agent_id).await?.cancel().await
    }

    pub async fn set_agent_mode(&self, agent_id: AgentId, mode_id: &str) -> Result<()> {
        self.live_instance(agent_id).await?.set_mode(mode_id).await
    }

    pub async fn set_agent_model(&self, agent_id: AgentId, model_id: &str) -> Result<()> {
        self.live_instance(agent_id).await?.set_model(model_id).await
    }

    pub async fn set_agent_thinking(&self, agent_id: AgentId, thinking_option_id: &str) -> Result<()> {
        self.live_instance(agent_id)
            .await?
            .set_thinking(thinking_option_id)
            .await
    }

    pub async fn set_agent_variant(&self, agent_id: AgentId, variant_id: &str) -> Result<()> {
        self.live_instance(agent_id).await?.set_variant(variant_id).await
    }

    /// Stamp a label on a live agent, e.g. `parentAgentId` (spec.md §4.8:
    /// "annotate created agents with parent-child metadata").
    pub async fn set_agent_label(&self, agent_id: AgentId, key: &str, value: &str) -> Result<()> {
        self.live_instance(agent_id).await?.set_label(key, value).await;
        Ok(())
    }

    pub async fn resolve_permission(
        &self,
        agent_id: AgentId,
        request_id: &str,
        resolution: PermissionResolution,
    ) -> Result<()> {
        self.live_instance(agent_id)
            .await?
            .resolve_permission(request_id, resolution)
            .await
    }

    /// Delete an agent. `hard=false` closes the provider conversation but
    /// keeps the registry record (and timeline) for future resume; `hard`
    /// additionally drops it from the registry.
    pub async fn delete_agent(&self, agent_id: AgentId, hard: bool) -> Result<()> {
        if let Some(instance) = self.live.write().await.remove(&agent_id) {
            instance.close().await?;
            if hard {
                self.dormant.write().await.remove(&agent_id);
            } else {
                let agent = instance.snapshot().await;
                self.dormant.write().await.insert(
                    agent_id,
                    Dormant {
                        record: AgentRecord::from(&agent),
                    },
                );
            }
        } else if hard {
            self.dormant.write().await.remove(&agent_id);
        } else {
            // Already dormant and not a hard delete: nothing to do.
            if !self.dormant.read().await.contains_key(&agent_id) {
                return Err(DaemonError::AgentNotFound(agent_id));
            }
        }
        let _ = self.dirty_tx.send(());
        let _ = self.deleted_tx.send(agent_id);
        Ok(())
    }

    pub async fn resume_agent(&self, persistence: PersistenceHandle) -> Result<Agent> {
        let client = self
            .providers
            .get(&persistence.provider)
            .ok_or_else(|| DaemonError::ProviderUnavailable(persistence.provider.clone()))?;
        let conversation = client.resume(&persistence).await?;

        let mut agent = Agent::new(AgentId::new(), persistence.provider.clone(), PathBuf::new());
        agent.persistence = Some(conversation.persistence_handle());
        agent.status = AgentStatus::Idle;

        let timeline = self.store.timeline(agent.id).await?;
        let instance = AgentInstance::spawn(
            agent.clone(),
            conversation,
            timeline,
            self.permissions.clone(),
            self.state_tx.clone(),
            self.dirty_tx.clone(),
        );
        self.live.write().await.insert(agent.id, instance);
        let _ = self.dirty_tx.send(());
        Ok(agent)
    }

    pub async fn subscribe_stream(&self, agent_id: AgentId) -> Result<broadcast::Receiver<TimelineRow>> {
        Ok(self.live_instance(agent_id).await?.subscribe())
    }

    /// Manager-wide feed of `Agent` snapshots, one per state mutation across
    /// every live agent. Consumed by the session layer (C2) to learn about
    /// attention-worthy transitions and re-evaluate C9's notification policy
    /// without polling.
    pub fn subscribe_agent_states(&self) -> broadcast::Receiver<Agent> {
        self.state_tx.subscribe()
    }

    /// Manager-wide feed of deleted agent ids, one per `delete_agent` call
    /// (both soft and hard). Consumed by the session layer (C2) to
    /// broadcast `agent_deleted` to every connected client.
    pub fn subscribe_agent_deletions(&self) -> broadcast::Receiver<AgentId> {
        self.deleted_tx.subscribe()
    }

    /// Canonical rows in `[from, to]`, or the projected view over them,
    /// per `FetchAgentTimelineRequest` (spec.md §6).
    pub async fn fetch_timeline(
        &self,
        agent_id: AgentId,
        from: Seq,
        to: Seq,
        projection: Projection,
    ) -> Result<(Vec<TimelineRow>, Vec<ProjectedEntry>)> {
        let instance = self.live_instance(agent_id).await?;
        let rows = instance.read_range(from, to).await?;
        let projected = match projection {
            Projection::Canonical => Vec::new(),
            Projection::Projected => paseo_protocol::timeline::project(&rows),
        };
        Ok((rows, projected))
    }

    pub async fn curated_activity(&self, agent_id: AgentId, max_items: usize) -> Result<Vec<String>> {
        let instance = self.live_instance(agent_id).await?;
        let rows = instance.read_tail(max_items.max(1) * 4).await?;
        Ok(curated::render(&rows, max_items))
    }

    pub async fn list_provider_models(
        &self,
        provider: &str,
        cwd: Option<&std::path::Path>,
    ) -> Result<Vec<ModelInfo>> {
        self.catalog.list_models(provider, cwd).await
    }

    pub fn permissions(&self) -> &PermissionBroker {
        &self.permissions
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn dormant_to_agent(record: &AgentRecord) -> Agent {
    let mut agent = Agent::new(record.id, record.provider.clone(), record.cwd.clone());
    agent.created_at = record.created_at;
    agent.updated_at = record.updated_at;
    agent.last_activity_at = record.last_activity_at;
    agent.last_user_message_at = record.last_user_message_at;
    agent.title = record.title.clone();
    agent.status = record.last_status;
    agent.current_mode_id = record.last_mode_id.clone();
    agent.persistence = record.persistence.clone();
    agent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dormant_agent_carries_last_known_status_not_initializing() {
        let record = AgentRecord {
            id: AgentId::new(),
            provider: "codex".into(),
            cwd: PathBuf::from("/tmp"),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            last_activity_at: chrono::Utc::now(),
            last_user_message_at: None,
            title: None,
            last_status: AgentStatus::Running,
            last_mode_id: None,
            config: None,
            persistence: None,
        };
        let agent = dormant_to_agent(&record);
        assert_eq!(agent.status, AgentStatus::Running);
    }
}
