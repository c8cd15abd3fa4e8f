//! Plain-text rendering for `paseo`'s table-ish output. No business logic:
//! everything here is a pure function of data the daemon already sent.

use paseo_protocol::agent::Agent;
use paseo_protocol::agent::AgentStatus;

pub fn status_label(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Initializing => "initializing",
        AgentStatus::Idle => "idle",
        AgentStatus::Running => "running",
        AgentStatus::Error => "error",
        AgentStatus::Closed => "closed",
    }
}

/// One line per agent for `paseo ls`, widest-first columns so it reads
/// reasonably in a plain terminal without a table-drawing dependency.
pub fn agent_line(agent: &Agent) -> String {
    let title = agent.title.as_deref().unwrap_or("-");
    let attention = if agent.requires_attention { "!" } else { " " };
    format!(
        "{a}{status:<12} {provider:<10} {id}  {cwd}  {title}",
        a = attention,
        status = status_label(agent.status),
        provider = agent.provider,
        id = agent.id,
        cwd = agent.cwd.display(),
    )
}

pub fn agent_table_header() -> &'static str {
    " STATUS       PROVIDER   ID                                    CWD  TITLE"
}
