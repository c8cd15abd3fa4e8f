//! C4's curated-activity text view (spec.md §4.4): a terse, human-readable
//! rendering of a timeline window for the MCP tool surface's
//! `get_agent_activity`, where a model reads what its sub-agent is doing.

use std::collections::HashMap;

use paseo_protocol::timeline::TimelineItem;
use paseo_protocol::timeline::TimelineRow;
use paseo_protocol::timeline::ToolCallDetail;

/// Render `rows` as curated one-line-per-event text, collapsing repeated
/// updates of the same tool call `callId` to its latest rendering, and
/// truncating to the `max_items` most recent lines.
pub fn render(rows: &[TimelineRow], max_items: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    // call_id -> index into `lines` holding that call's current rendering.
    let mut tool_call_lines: HashMap<&str, usize> = HashMap::new();

    for row in rows {
        match &row.item {
            TimelineItem::UserMessage { text, .. } => lines.push(format!("[User] {text}")),
            TimelineItem::Reasoning { text } => lines.push(format!("[Thought] {text}")),
            TimelineItem::AssistantMessage { text } => lines.push(text.clone()),
            TimelineItem::ToolCall {
                call_id,
                name,
                detail,
                ..
            } => {
                let rendered = render_tool_call(name, detail);
                if let Some(&idx) = tool_call_lines.get(call_id.as_str()) {
                    lines[idx] = rendered;
                } else {
                    tool_call_lines.insert(call_id.as_str(), lines.len());
                    lines.push(rendered);
                }
            }
            TimelineItem::Todo { items } => {
                let mut block = String::from("[Tasks]");
                for item in items {
                    let mark = if item.completed { "x" } else { " " };
                    block.push_str(&format!("\n- [{mark}] {}", item.text));
                }
                lines.push(block);
            }
            TimelineItem::Error { message } => lines.push(format!("[Error] {message}")),
            TimelineItem::Compaction { .. } => {}
        }
    }

    if lines.len() > max_items {
        lines.split_off(lines.len() - max_items)
    } else {
        lines
    }
}

fn render_tool_call(name: &str, detail: &ToolCallDetail) -> String {
    match detail {
        ToolCallDetail::Shell { command } => format!("[Shell] {command}"),
        ToolCallDetail::Read { path } => format!("[Read] {path}"),
        ToolCallDetail::Edit { path } => format!("[Edit] {path}"),
        ToolCallDetail::Write { path } => format!("[Write] {path}"),
        ToolCallDetail::Search { query } => format!("[Search] {query}"),
        ToolCallDetail::SubAgent { agent_id } => {
            format!("[SubAgent] {}", agent_id.as_deref().unwrap_or("?"))
        }
        ToolCallDetail::PlainText { summary } => format!("[{name}] {summary}"),
        ToolCallDetail::Unknown { raw } => format!("[{name}] {raw}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use paseo_protocol::timeline::ToolCallStatus;

    fn row(seq: u64, item: TimelineItem) -> TimelineRow {
        TimelineRow {
            seq,
            timestamp: Utc::now(),
            item,
        }
    }

    #[test]
    fn collapses_tool_call_updates_to_latest_line() {
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
                TimelineItem::UserMessage {
                    text: "hi".into(),
                    attachments: vec![],
                },
            ),
            row(
                3,
                TimelineItem::ToolCall {
                    call_id: "c1".into(),
                    name: "shell".into(),
                    status: ToolCallStatus::Completed,
                    detail: ToolCallDetail::Shell {
                        command: "npm test".into(),
                    },
                    input: None,
                    output: None,
                    error: None,
                    metadata: None,
                },
            ),
        ];
        let lines = render(&rows, 10);
        assert_eq!(lines, vec!["[Shell] npm test", "[User] hi"]);
    }

    #[test]
    fn truncates_to_most_recent_max_items() {
        let rows = (1..=5)
            .map(|seq| {
                row(
                    seq,
                    TimelineItem::UserMessage {
                        text: format!("msg {seq}"),
                        attachments: vec![],
                    },
                )
            })
            .collect::<Vec<_>>();
        let lines = render(&rows, 2);
        assert_eq!(lines, vec!["[User] msg 4", "[User] msg 5"]);
    }

    #[test]
    fn renders_todo_as_checkbox_block() {
        let rows = vec![row(
            1,
            TimelineItem::Todo {
                items: vec![
                    paseo_protocol::timeline::TodoItem {
                        text: "write tests".into(),
                        completed: true,
                    },
                    paseo_protocol::timeline::TodoItem {
                        text: "ship it".into(),
                        completed: false,
                    },
                ],
            },
        )];
        let lines = render(&rows, 10);
        assert_eq!(lines, vec!["[Tasks]\n- [x] write tests\n- [ ] ship it"]);
    }
}
