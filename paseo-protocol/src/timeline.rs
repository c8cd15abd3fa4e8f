//! The append-only per-agent timeline and its two read-views (canonical and
//! projected), per spec.md §3.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Strictly-monotonic-per-agent sequence number, starting at 1.
pub type Seq = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolCallStatus::Running)
    }

    /// A status transition is valid iff it stays `running` or moves from
    /// `running` to exactly one terminal status (spec.md §8 invariant).
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        matches!(self, ToolCallStatus::Running) || self == next
    }
}

/// The tagged `detail` describing what kind of tool call this is, used by
/// the curated-activity renderer (spec.md §4.4) to pick a one-line summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolCallDetail {
    Shell { command: String },
    Read { path: String },
    Edit { path: String },
    Write { path: String },
    Search { query: String },
    SubAgent { agent_id: Option<String> },
    PlainText { summary: String },
    Unknown { raw: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub completed: bool,
}

/// The tagged union of everything that can be appended to an agent's
/// timeline. The `unknown` forward-compat variant is intentionally absent
/// here: every member is reachable from the `AgentClient` event surface
/// (spec.md §4.5); unrecognized provider payloads fall back to
/// `ToolCallDetail::Unknown` at the leaf, not to a whole-row unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    UserMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },
    AssistantMessage {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        status: ToolCallStatus,
        detail: ToolCallDetail,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Todo {
        items: Vec<TodoItem>,
    },
    Error {
        message: String,
    },
    Compaction {
        status: String,
        trigger: String,
    },
}

impl TimelineItem {
    pub fn call_id(&self) -> Option<&str> {
        match self {
            TimelineItem::ToolCall { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn tool_status(&self) -> Option<ToolCallStatus> {
        match self {
            TimelineItem::ToolCall { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One row of the canonical, append-only timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineRow {
    pub seq: Seq,
    pub timestamp: DateTime<Utc>,
    pub item: TimelineItem,
}

/// Which read-view of the timeline a query wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    Canonical,
    Projected,
}

/// A single entry in a projected-view response: either a verbatim canonical
/// row or a merged/collapsed one, always carrying the canonical `seq` ranges
/// it was built from so clients can correlate back to `fetch_agent_timeline`
/// results at any other projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedEntry {
    pub item: TimelineItem,
    pub source_seq_ranges: Vec<(Seq, Seq)>,
}

/// Project a canonical window of rows per spec.md §3's merge/collapse rules:
/// consecutive `assistant_message` rows with no intervening non-assistant
/// row merge into one; `tool_call` rows sharing a `call_id` collapse into
/// one entry carrying the latest status.
pub fn project(rows: &[TimelineRow]) -> Vec<ProjectedEntry> {
    let mut out: Vec<ProjectedEntry> = Vec::new();
    // call_id -> index into `out` of its (possibly still-open) entry.
    let mut open_tool_calls: std::collections::HashMap<&str, usize> =
        std::collections::HashMap::new();

    for row in rows {
        match &row.item {
            TimelineItem::AssistantMessage { text } => {
                if let Some(ProjectedEntry {
                    item: TimelineItem::AssistantMessage { text: prev_text },
                    source_seq_ranges,
                }) = out.last_mut()
                {
                    prev_text.push_str(text);
                    if let Some(last_range) = source_seq_ranges.last_mut() {
                        last_range.1 = row.seq;
                    }
                    continue;
                }
                out.push(ProjectedEntry {
                    item: TimelineItem::AssistantMessage { text: text.clone() },
                    source_seq_ranges: vec![(row.seq, row.seq)],
                });
            }
            TimelineItem::ToolCall { call_id, .. } => {
                if let Some(&idx) = open_tool_calls.get(call_id.as_str()) {
                    out[idx].item = row.item.clone();
                    out[idx].source_seq_ranges.push((row.seq, row.seq));
                    if row.item.tool_status().is_some_and(ToolCallStatus::is_terminal) {
                        open_tool_calls.remove(call_id.as_str());
                    }
                } else {
                    out.push(ProjectedEntry {
                        item: row.item.clone(),
                        source_seq_ranges: vec![(row.seq, row.seq)],
                    });
                    if !row.item.tool_status().is_some_and(ToolCallStatus::is_terminal) {
                        open_tool_calls.insert(call_id.as_str(), out.len() - 1);
                    }
                }
            }
            other => {
                out.push(ProjectedEntry {
                    item: other.clone(),
                    source_seq_ranges: vec![(row.seq, row.seq)],
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(seq: Seq, item: TimelineItem) -> TimelineRow {
        TimelineRow {
            seq,
            timestamp: Utc::now(),
            item,
        }
    }

    /// Scenario 4 in spec.md §8: assistant chunks merge across the tail
    /// boundary, concatenating text and carrying the right source range.
    #[test]
    fn projects_tail_boundary_scenario() {
        let rows = vec![
            row(1, TimelineItem::AssistantMessage { text: "Hel".into() }),
            row(2, TimelineItem::AssistantMessage { text: "lo".into() }),
            row(
                3,
                TimelineItem::UserMessage {
                    text: "next".into(),
                    attachments: vec![],
                },
            ),
            row(4, TimelineItem::AssistantMessage { text: "Wor".into() }),
            row(5, TimelineItem::AssistantMessage { text: "ld".into() }),
        ];
        let projected = project(&rows);
        assert_eq!(projected.len(), 3);
        match &projected[2].item {
            TimelineItem::AssistantMessage { text } => assert_eq!(text, "World"),
            other => panic!("expected assistant_message, got {other:?}"),
        }
        assert_eq!(projected[2].source_seq_ranges, vec![(4, 5)]);
    }

    #[test]
    fn collapses_tool_call_lifecycle_to_latest_status() {
        let rows = vec![
            row(
                1,
                TimelineItem::ToolCall {
                    call_id: "c1".into(),
                    name: "shell".into(),
                    status: ToolCallStatus::Running,
                    detail: ToolCallDetail::Shell {
                        command: "npm test".into(),
                    },
                    input: None,
                    output: None,
                    error: None,
                    metadata: None,
                },
            ),
            row(
                2,
                TimelineItem::ToolCall {
                    call_id: "c1".into(),
                    name: "shell".into(),
                    status: ToolCallStatus::Completed,
                    detail: ToolCallDetail::Shell {
                        command: "npm test".into(),
                    },
                    input: None,
                    output: Some(serde_json::json!("ok")),
                    error: None,
                    metadata: None,
                },
            ),
        ];
        let projected = project(&rows);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].source_seq_ranges, vec![(1, 1), (2, 2)]);
        assert_eq!(
            projected[0].item.tool_status(),
            Some(ToolCallStatus::Completed)
        );
    }

    #[test]
    fn tool_call_status_transitions_are_checked() {
        assert!(ToolCallStatus::Running.can_transition_to(ToolCallStatus::Completed));
        assert!(!ToolCallStatus::Completed.can_transition_to(ToolCallStatus::Running));
        assert!(ToolCallStatus::Failed.can_transition_to(ToolCallStatus::Failed));
    }
}
