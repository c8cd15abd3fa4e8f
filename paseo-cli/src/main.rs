//! `paseo`: thin CLI client of the daemon protocol (spec.md §6). Every
//! subcommand maps onto one `ClientRequest`, save for `ls`/`logs`, which
//! read the implicit agent-directory push every session gets on attach.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use paseo_cli::client::DaemonClient;
use paseo_cli::client::Frame;
use paseo_cli::render;
use paseo_core::config::Config;
use paseo_protocol::agent::Agent;
use paseo_protocol::ids::AgentId;
use paseo_protocol::message::ServerEvent;
use paseo_protocol::timeline::TimelineRow;
use serde_json::json;

#[derive(Debug, Parser)]
#[clap(author, version, about = "Thin client for the paseod agent daemon")]
struct Cli {
    /// Override the daemon's listen address (defaults to `paseo.toml`'s
    /// `listen_addr`, or `PASEO_LISTEN_ADDR`).
    #[arg(long, global = true)]
    listen: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every managed agent, live or dormant.
    Ls,
    /// Ask the daemon to stop (graceful shutdown, forwarded to a
    /// supervisor if one owns this daemon's lifecycle).
    Stop,
    /// Print agent activity across all (or one) agent, like `tail`.
    Logs(LogsArgs),
    /// Operate on a single agent.
    Agent {
        #[clap(subcommand)]
        action: AgentAction,
    },
}

#[derive(Debug, clap::Args)]
struct LogsArgs {
    /// Restrict to one agent. Defaults to every agent.
    #[arg(long)]
    agent: Option<AgentId>,
    /// Keep the connection open and print new activity as it happens.
    #[arg(long, short = 'f')]
    follow: bool,
    /// Number of most recent entries to print per agent before following.
    #[arg(long, default_value_t = 50)]
    tail: usize,
    /// Only print lines containing this substring.
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Debug, Subcommand)]
enum AgentAction {
    /// Start a new agent against a configured provider.
    Create {
        provider: String,
        cwd: PathBuf,
        /// Raw JSON passed through as the provider-specific `config`.
        #[arg(long)]
        config: Option<String>,
    },
    /// Send a user message to an agent's active turn.
    Send { agent_id: AgentId, text: String },
    /// Cancel an agent's running turn.
    Stop { agent_id: AgentId },
    /// Delete an agent's registry record (soft by default).
    Rm {
        agent_id: AgentId,
        #[arg(long)]
        hard: bool,
    },
    /// Tail one agent's activity. Equivalent to `paseo logs --agent <id>`.
    Logs {
        agent_id: AgentId,
        #[arg(long, short = 'f')]
        follow: bool,
        #[arg(long, default_value_t = 50)]
        tail: usize,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Switch an agent's mode/model/thinking-option/variant.
    Set {
        agent_id: AgentId,
        #[arg(value_enum)]
        selector: Selector,
        value: String,
    },
    /// Resolve a permission request an agent raised.
    Permission {
        agent_id: AgentId,
        request_id: String,
        #[arg(value_enum)]
        behavior: Behavior,
        #[arg(long)]
        option_id: Option<String>,
        #[arg(long)]
        message: Option<String>,
    },
    /// List the models a provider offers for a working directory.
    Models {
        provider: String,
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Selector {
    Mode,
    Model,
    ThinkingOption,
    Variant,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Behavior {
    Allow,
    Deny,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("error: failed to start tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(cli)) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let listen_addr = resolve_listen_addr(cli.listen)?;

    match cli.command {
        Command::Ls => cmd_ls(&listen_addr).await,
        Command::Stop => cmd_stop(&listen_addr).await,
        Command::Logs(args) => cmd_logs(&listen_addr, args.agent, args.follow, args.tail, args.filter).await,
        Command::Agent { action } => cmd_agent(&listen_addr, action).await,
    }
}

/// `--listen` wins; otherwise fall back to the same config/env resolution
/// the daemon itself uses, so `paseo` talks to `paseod` without the user
/// having to repeat `--listen` on both sides.
fn resolve_listen_addr(override_addr: Option<String>) -> Result<String> {
    if let Some(addr) = override_addr {
        return Ok(addr);
    }
    let config = Config::load().context("loading paseo.toml to find the daemon's listen address")?;
    Ok(config.listen_addr)
}

async fn cmd_ls(listen_addr: &str) -> Result<()> {
    let mut client = DaemonClient::connect(listen_addr).await?;
    let agents = collect_directory_snapshot(&mut client).await?;
    if agents.is_empty() {
        println!("no agents");
        return Ok(());
    }
    let mut agents: Vec<&Agent> = agents.values().collect();
    agents.sort_by_key(|agent| agent.created_at);
    println!("{}", render::agent_table_header());
    for agent in agents {
        println!("{}", render::agent_line(agent));
    }
    Ok(())
}

async fn cmd_stop(listen_addr: &str) -> Result<()> {
    let mut client = DaemonClient::connect(listen_addr).await?;
    client.request("shutdown", json!({})).await?;
    println!("daemon is stopping");
    Ok(())
}

async fn cmd_agent(listen_addr: &str, action: AgentAction) -> Result<()> {
    let mut client = DaemonClient::connect(listen_addr).await?;
    match action {
        AgentAction::Create { provider, cwd, config } => {
            let config_value = match config {
                Some(raw) => Some(serde_json::from_str::<serde_json::Value>(&raw).context("--config is not valid JSON")?),
                None => None,
            };
            let response = client
                .request(
                    "create_agent_request",
                    json!({ "provider": provider, "cwd": cwd, "config": config_value }),
                )
                .await?;
            let agent: Agent = serde_json::from_value(response["agent"].clone())?;
            println!("{}", agent.id);
        }
        AgentAction::Send { agent_id, text } => {
            client
                .request(
                    "send_agent_message",
                    json!({ "agent_id": agent_id, "text": text, "attachments": [] }),
                )
                .await?;
        }
        AgentAction::Stop { agent_id } => {
            client.request("cancel_agent_request", json!({ "agent_id": agent_id })).await?;
        }
        AgentAction::Rm { agent_id, hard } => {
            client
                .request("delete_agent_request", json!({ "agent_id": agent_id, "hard": hard }))
                .await?;
        }
        AgentAction::Logs { agent_id, follow, tail, filter } => {
            drop(client);
            return cmd_logs(listen_addr, Some(agent_id), follow, tail, filter).await;
        }
        AgentAction::Set { agent_id, selector, value } => {
            let kind = match selector {
                Selector::Mode => "set_agent_mode",
                Selector::Model => "set_agent_model",
                Selector::ThinkingOption => "set_agent_thinking_option",
                Selector::Variant => "set_agent_variant",
            };
            client.request(kind, json!({ "agent_id": agent_id, "value": value })).await?;
        }
        AgentAction::Permission {
            agent_id,
            request_id,
            behavior,
            option_id,
            message,
        } => {
            let behavior = match behavior {
                Behavior::Allow => "allow",
                Behavior::Deny => "deny",
            };
            client
                .request(
                    "agent_permission_response",
                    json!({
                        "agent_id": agent_id,
                        "request_id": request_id,
                        "resolution": { "behavior": behavior, "option_id": option_id, "message": message },
                    }),
                )
                .await?;
        }
        AgentAction::Models { provider, cwd } => {
            let response = client
                .request("list_provider_models_request", json!({ "provider": provider, "cwd": cwd }))
                .await?;
            if let Some(models) = response.get("models").and_then(|v| v.as_array()) {
                for model in models {
                    let id = model.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                    let name = model.get("display_name").and_then(|v| v.as_str()).unwrap_or(id);
                    println!("{id}\t{name}");
                }
            }
        }
    }
    Ok(())
}

async fn cmd_logs(
    listen_addr: &str,
    agent_filter: Option<AgentId>,
    follow: bool,
    tail: usize,
    filter: Option<String>,
) -> Result<()> {
    let mut client = DaemonClient::connect(listen_addr).await?;
    let directory = collect_directory_snapshot(&mut client).await?;

    let targets: Vec<AgentId> = match agent_filter {
        Some(id) => {
            if !directory.contains_key(&id) {
                anyhow::bail!("unknown agent {id}");
            }
            vec![id]
        }
        None => directory.keys().copied().collect(),
    };

    let mut last_seq: HashMap<AgentId, u64> = HashMap::new();
    for agent_id in &targets {
        let response = client
            .request(
                "fetch_agent_timeline_request",
                json!({
                    "agent_id": agent_id,
                    "direction": "tail",
                    "limit": tail,
                    "projection": "canonical",
                    "collapse_tool_lifecycle": true,
                }),
            )
            .await?;
        let entries = response
            .get("entries")
            .cloned()
            .unwrap_or(serde_json::Value::Array(vec![]));
        let rows: Vec<TimelineRow> = serde_json::from_value(entries).unwrap_or_default();
        if let Some(row) = rows.last() {
            last_seq.insert(*agent_id, row.seq);
        }
        for line in paseo_core::curated::render(&rows, tail) {
            print_line(*agent_id, &line, &filter);
        }
    }

    if !follow {
        return Ok(());
    }

    for agent_id in &targets {
        let from_seq = last_seq.get(agent_id).map(|seq| seq + 1);
        client
            .send(
                "subscribe_agent_stream_request",
                json!({ "agent_id": agent_id, "from_seq": from_seq }),
            )
            .await?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            frame = client.next_frame() => {
                let Some(frame) = frame? else { return Ok(()) };
                if let Frame::Event(event) = frame {
                    print_stream_event(event, &targets, &filter);
                }
            }
        }
    }
}

async fn collect_directory_snapshot(client: &mut DaemonClient) -> Result<HashMap<AgentId, Agent>> {
    let marker = client.send("ping", json!({})).await?;
    let mut agents = HashMap::new();
    loop {
        match client.next_frame().await?.context("daemon closed the connection")? {
            Frame::Event(ServerEvent::AgentState { agent }) => {
                agents.insert(agent.id, *agent);
            }
            Frame::Response { request_id, .. } if request_id == marker => break,
            Frame::Error(err) if err.request_id == marker => {
                anyhow::bail!("{}", err.message);
            }
            _ => {}
        }
    }
    Ok(agents)
}

fn print_stream_event(event: ServerEvent, targets: &[AgentId], filter: &Option<String>) {
    match event {
        ServerEvent::AgentStreamSnapshot { agent_id, events } if targets.contains(&agent_id) => {
            let rows: Vec<TimelineRow> = events
                .into_iter()
                .map(|e| TimelineRow { seq: e.seq, timestamp: chrono::Utc::now(), item: e.item })
                .collect();
            for line in paseo_core::curated::render(&rows, rows.len().max(1)) {
                print_line(agent_id, &line, filter);
            }
        }
        ServerEvent::AgentStream { agent_id, event } if targets.contains(&agent_id) => {
            let row = TimelineRow { seq: event.seq, timestamp: chrono::Utc::now(), item: event.item };
            for line in paseo_core::curated::render(&[row], 1) {
                print_line(agent_id, &line, filter);
            }
        }
        _ => {}
    }
}

fn print_line(agent_id: AgentId, line: &str, filter: &Option<String>) {
    if let Some(pattern) = filter
        && !line.contains(pattern.as_str())
    {
        return;
    }
    println!("[{agent_id}] {line}");
}
