//! Spawns a provider's CLI binary as a long-lived child process and speaks
//! newline-delimited JSON submission/event frames over its stdin/stdout.
//! Follows the `core::protocol` SQ/EQ (Submission/Event queue) shape used
//! by CLI coding agents that speak this idiom, generalized here to any
//! external binary that follows the same pattern.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use paseo_core::DaemonError;
use paseo_core::Result;
use paseo_core::provider::AgentClient;
use paseo_core::provider::ProviderConversation;
use paseo_core::provider::ProviderEvent;
use paseo_protocol::agent::Capabilities;
use paseo_protocol::agent::PersistenceHandle;
use paseo_protocol::agent::Usage;
use paseo_protocol::model_catalog::ModelInfo;
use paseo_protocol::permission::PermissionRequest;
use paseo_protocol::permission::PermissionResolution;
use paseo_protocol::timeline::TimelineItem;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::Command;
use tokio::sync::mpsc;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SubmissionFrame {
    Create {
        cwd: PathBuf,
        config: Option<serde_json::Value>,
        session_id: String,
    },
    Resume {
        session_id: String,
        native_handle: Option<String>,
        metadata: Option<serde_json::Value>,
    },
    Send {
        text: String,
        attachments: Vec<String>,
    },
    Cancel,
    SetMode {
        mode_id: String,
    },
    SetModel {
        model_id: String,
    },
    SetThinking {
        thinking_option_id: String,
    },
    SetVariant {
        variant_id: String,
    },
    ResolvePermission {
        request_id: String,
        resolution: PermissionResolution,
    },
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventFrame {
    TurnStarted,
    TurnCompleted {
        #[serde(default)]
        usage: Option<Usage>,
    },
    TurnFailed {
        error: String,
    },
    TurnCanceled,
    Timeline {
        item: TimelineItem,
    },
    PermissionRequested {
        request: PermissionRequest,
    },
    PermissionResolved {
        request_id: String,
    },
    CapabilitiesChanged {
        capabilities: Capabilities,
    },
    ModesUpdated {
        current_mode_id: Option<String>,
        #[serde(default)]
        available_modes: Vec<String>,
    },
    Closed {
        #[serde(default)]
        error: Option<String>,
    },
}

impl From<EventFrame> for ProviderEvent {
    fn from(frame: EventFrame) -> Self {
        match frame {
            EventFrame::TurnStarted => ProviderEvent::TurnStarted,
            EventFrame::TurnCompleted { usage } => ProviderEvent::TurnCompleted { usage },
            EventFrame::TurnFailed { error } => ProviderEvent::TurnFailed { error },
            EventFrame::TurnCanceled => ProviderEvent::TurnCanceled,
            EventFrame::Timeline { item } => ProviderEvent::Timeline(item),
            EventFrame::PermissionRequested { request } => {
                ProviderEvent::PermissionRequested(request)
            }
            EventFrame::PermissionResolved { request_id } => {
                ProviderEvent::PermissionResolved { request_id }
            }
            EventFrame::CapabilitiesChanged { capabilities } => {
                ProviderEvent::CapabilitiesChanged(capabilities)
            }
            EventFrame::ModesUpdated {
                current_mode_id,
                available_modes,
            } => ProviderEvent::ModesUpdated {
                current_mode_id,
                available_modes,
            },
            EventFrame::Closed { error } => ProviderEvent::Closed { error },
        }
    }
}

/// Adapts one configured provider (resolved via `which`) to `AgentClient` by
/// spawning its CLI binary per conversation.
pub struct SubprocessAgentClient {
    provider_id: String,
    binary: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl SubprocessAgentClient {
    /// Resolve `command` on `PATH` at construction time, so a missing
    /// provider binary is reported once at startup rather than on every
    /// `create_agent` call.
    pub fn new(
        provider_id: impl Into<String>,
        command: &str,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Result<Self> {
        let provider_id = provider_id.into();
        let binary = which::which(command)
            .map_err(|_| DaemonError::ProviderUnavailable(provider_id.clone()))?;
        Ok(Self {
            provider_id,
            binary,
            args,
            env,
        })
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn spawn_conversation(
        &self,
        initial: SubmissionFrame,
        session_id: String,
    ) -> Result<Box<dyn ProviderConversation>> {
        let mut child = self
            .base_command()
            .spawn()
            .map_err(|err| DaemonError::ProviderUnavailable(format!("{}: {err}", self.provider_id)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DaemonError::Internal("child process has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DaemonError::Internal("child process has no stdout".into()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_events(stdout, events_tx));

        let mut conversation = SubprocessConversation {
            provider_id: self.provider_id.clone(),
            session_id,
            child,
            stdin,
            events_rx,
        };
        conversation.write_frame(&initial).await?;
        Ok(Box::new(conversation))
    }
}

#[async_trait]
impl AgentClient for SubprocessAgentClient {
    async fn create(
        &self,
        cwd: &Path,
        config: Option<serde_json::Value>,
    ) -> Result<Box<dyn ProviderConversation>> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let frame = SubmissionFrame::Create {
            cwd: cwd.to_path_buf(),
            config,
            session_id: session_id.clone(),
        };
        self.spawn_conversation(frame, session_id).await
    }

    async fn resume(&self, persistence: &PersistenceHandle) -> Result<Box<dyn ProviderConversation>> {
        let frame = SubmissionFrame::Resume {
            session_id: persistence.session_id.clone(),
            native_handle: persistence.native_handle.clone(),
            metadata: persistence.metadata.clone(),
        };
        self.spawn_conversation(frame, persistence.session_id.clone()).await
    }

    async fn list_models(&self, cwd: Option<&Path>) -> Result<Vec<ModelInfo>> {
        let mut cmd = self.base_command();
        cmd.arg("--list-models");
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .await
            .map_err(|err| DaemonError::ProviderUnavailable(format!("{}: {err}", self.provider_id)))?;
        if !output.status.success() {
            return Err(DaemonError::ProviderUnavailable(format!(
                "{} exited with {} while listing models",
                self.provider_id, output.status
            )));
        }
        serde_json::from_slice(&output.stdout).map_err(Into::into)
    }
}

struct SubprocessConversation {
    provider_id: String,
    session_id: String,
    child: Child,
    stdin: ChildStdin,
    events_rx: mpsc::UnboundedReceiver<EventFrame>,
}

impl SubprocessConversation {
    async fn write_frame(&mut self, frame: &SubmissionFrame) -> Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ProviderConversation for SubprocessConversation {
    async fn send(&mut self, text: &str, attachments: &[String]) -> Result<()> {
        self.write_frame(&SubmissionFrame::Send {
            text: text.to_string(),
            attachments: attachments.to_vec(),
        })
        .await
    }

    async fn cancel(&mut self) -> Result<()> {
        self.write_frame(&SubmissionFrame::Cancel).await
    }

    async fn set_mode(&mut self, mode_id: &str) -> Result<()> {
        self.write_frame(&SubmissionFrame::SetMode {
            mode_id: mode_id.to_string(),
        })
        .await
    }

    async fn set_model(&mut self, model_id: &str) -> Result<()> {
        self.write_frame(&SubmissionFrame::SetModel {
            model_id: model_id.to_string(),
        })
        .await
    }

    async fn set_thinking(&mut self, thinking_option_id: &str) -> Result<()> {
        self.write_frame(&SubmissionFrame::SetThinking {
            thinking_option_id: thinking_option_id.to_string(),
        })
        .await
    }

    async fn set_variant(&mut self, variant_id: &str) -> Result<()> {
        self.write_frame(&SubmissionFrame::SetVariant {
            variant_id: variant_id.to_string(),
        })
        .await
    }

    async fn resolve_permission(
        &mut self,
        request_id: &str,
        decision: PermissionResolution,
    ) -> Result<()> {
        self.write_frame(&SubmissionFrame::ResolvePermission {
            request_id: request_id.to_string(),
            resolution: decision,
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.write_frame(&SubmissionFrame::Close).await;
        let _ = self.child.start_kill();
        result
    }

    async fn next_event(&mut self) -> Option<ProviderEvent> {
        self.events_rx.recv().await.map(ProviderEvent::from)
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

/// Reads newline-delimited `EventFrame`s from the child's stdout until EOF,
/// forwarding each to the conversation. A line that fails to parse is
/// logged and skipped rather than tearing down the conversation, since a
/// misbehaving provider writing one malformed line shouldn't take the whole
/// agent down.
async fn read_events(
    stdout: tokio::process::ChildStdout,
    tx: mpsc::UnboundedSender<EventFrame>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EventFrame>(&line) {
                    Ok(frame) => {
                        if tx.send(frame).is_err() {
                            return;
                        }
                    }
                    Err(err) => tracing::warn!("discarding malformed provider event: {err}"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::error!("error reading provider stdout: {err}");
                break;
            }
        }
    }
    let _ = tx.send(EventFrame::Closed { error: None });
}
