//! An in-process, scriptable `AgentClient` used by `paseo-core` and
//! `paseo-daemon` integration tests to exercise spec scenarios
//! deterministically, without spawning a real provider binary.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use paseo_core::DaemonError;
use paseo_core::Result;
use paseo_core::provider::AgentClient;
use paseo_core::provider::ProviderConversation;
use paseo_core::provider::ProviderEvent;
use paseo_protocol::agent::PersistenceHandle;
use paseo_protocol::model_catalog::ModelInfo;
use paseo_protocol::permission::PermissionResolution;
use tokio::sync::mpsc;

/// A command a test-driven client issued against a `MockConversation`,
/// recorded for later assertion.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    Send { text: String, attachments: Vec<String> },
    Cancel,
    SetMode(String),
    SetModel(String),
    SetThinking(String),
    SetVariant(String),
    ResolvePermission {
        request_id: String,
        resolution: PermissionResolution,
    },
    Close,
}

/// Scripts a provider: every `create`/`resume` call gets a fresh
/// conversation pre-seeded with `scripted_events`, plus a retained sender
/// handle (keyed by session id) so test code can push further events after
/// the fact — e.g. to simulate a permission request arriving mid-turn.
pub struct MockAgentClient {
    provider_id: String,
    scripted_events: Vec<ProviderEvent>,
    models: Vec<ModelInfo>,
    handles: Mutex<HashMap<String, mpsc::UnboundedSender<ProviderEvent>>>,
    commands: Arc<Mutex<Vec<(String, MockCommand)>>>,
}

impl MockAgentClient {
    pub fn new(provider_id: impl Into<String>, scripted_events: Vec<ProviderEvent>) -> Self {
        Self {
            provider_id: provider_id.into(),
            scripted_events,
            models: Vec::new(),
            handles: Mutex::new(HashMap::new()),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_models(mut self, models: Vec<ModelInfo>) -> Self {
        self.models = models;
        self
    }

    /// Push an additional event into the still-open conversation identified
    /// by `session_id` (test-only helper). Errors if no such conversation is
    /// live — a leftover handle from a closed conversation is dropped, so
    /// this also fails once the script has been exhausted and the
    /// conversation closed.
    pub fn push_event(&self, session_id: &str, event: ProviderEvent) -> Result<()> {
        let handles = self.handles.lock();
        let Some(tx) = handles.get(session_id) else {
            return Err(DaemonError::Internal(format!(
                "no live mock conversation for session {session_id}"
            )));
        };
        tx.send(event)
            .map_err(|_| DaemonError::Internal("mock conversation receiver dropped".to_string()))
    }

    /// All commands issued so far, across every conversation this client has
    /// created, in issue order.
    pub fn commands(&self) -> Vec<(String, MockCommand)> {
        self.commands.lock().clone()
    }

    fn spawn_conversation(&self, session_id: String) -> Box<dyn ProviderConversation> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in &self.scripted_events {
            let _ = tx.send(event.clone());
        }
        self.handles.lock().insert(session_id.clone(), tx);
        Box::new(MockConversation {
            provider_id: self.provider_id.clone(),
            session_id,
            events_rx: rx,
            commands: self.commands.clone(),
        })
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn create(
        &self,
        _cwd: &Path,
        _config: Option<serde_json::Value>,
    ) -> Result<Box<dyn ProviderConversation>> {
        Ok(self.spawn_conversation(uuid::Uuid::new_v4().to_string()))
    }

    async fn resume(&self, persistence: &PersistenceHandle) -> Result<Box<dyn ProviderConversation>> {
        Ok(self.spawn_conversation(persistence.session_id.clone()))
    }

    async fn list_models(&self, _cwd: Option<&Path>) -> Result<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }
}

struct MockConversation {
    provider_id: String,
    session_id: String,
    events_rx: mpsc::UnboundedReceiver<ProviderEvent>,
    commands: Arc<Mutex<Vec<(String, MockCommand)>>>,
}

impl MockConversation {
    fn record(&self, command: MockCommand) {
        self.commands.lock().push((self.session_id.clone(), command));
    }
}

#[async_trait]
impl ProviderConversation for MockConversation {
    async fn send(&mut self, text: &str, attachments: &[String]) -> Result<()> {
        self.record(MockCommand::Send {
            text: text.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.record(MockCommand::Cancel);
        Ok(())
    }

    async fn set_mode(&mut self, mode_id: &str) -> Result<()> {
        self.record(MockCommand::SetMode(mode_id.to_string()));
        Ok(())
    }

    async fn set_model(&mut self, model_id: &str) -> Result<()> {
        self.record(MockCommand::SetModel(model_id.to_string()));
        Ok(())
    }

    async fn set_thinking(&mut self, thinking_option_id: &str) -> Result<()> {
        self.record(MockCommand::SetThinking(thinking_option_id.to_string()));
        Ok(())
    }

    async fn set_variant(&mut self, variant_id: &str) -> Result<()> {
        self.record(MockCommand::SetVariant(variant_id.to_string()));
        Ok(())
    }

    async fn resolve_permission(
        &mut self,
        request_id: &str,
        decision: PermissionResolution,
    ) -> Result<()> {
        self.record(MockCommand::ResolvePermission {
            request_id: request_id.to_string(),
            resolution: decision,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.record(MockCommand::Close);
        self.events_rx.close();
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ProviderEvent> {
        self.events_rx.recv().await
    }

    fn persistence_handle(&self) -> PersistenceHandle {
        PersistenceHandle {
            provider: self.provider_id.clone(),
            session_id: self.session_id.clone(),
            native_handle: None,
            metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paseo_protocol::timeline::TimelineItem;

    #[tokio::test]
    async fn scripted_events_are_replayed_in_order() {
        let client = MockAgentClient::new(
            "mock",
            vec![
                ProviderEvent::TurnStarted,
                ProviderEvent::Timeline(TimelineItem::AssistantMessage {
                    text: "hi".into(),
                }),
                ProviderEvent::TurnCompleted { usage: None },
            ],
        );
        let mut conversation = client.create(Path::new("/tmp"), None).await.unwrap();
        assert!(matches!(
            conversation.next_event().await,
            Some(ProviderEvent::TurnStarted)
        ));
        assert!(matches!(
            conversation.next_event().await,
            Some(ProviderEvent::Timeline(TimelineItem::AssistantMessage { .. }))
        ));
        assert!(matches!(
            conversation.next_event().await,
            Some(ProviderEvent::TurnCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn records_issued_commands() {
        let client = MockAgentClient::new("mock", vec![]);
        let mut conversation = client.create(Path::new("/tmp"), None).await.unwrap();
        conversation.send("hello", &[]).await.unwrap();
        conversation.cancel().await.unwrap();
        let commands: Vec<_> = client.commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            commands,
            vec![
                MockCommand::Send {
                    text: "hello".into(),
                    attachments: vec![]
                },
                MockCommand::Cancel,
            ]
        );
    }
}
