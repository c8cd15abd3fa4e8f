use std::sync::Arc;

use clap::Parser;
use paseo_core::AgentManager;
use paseo_core::config::Config;
use paseo_core::registry::ProviderRegistry;
use paseo_daemon::DaemonOptions;
use paseo_providers::SubprocessAgentClient;

/// `paseod`: supervises coding-agent child processes and exposes them to
/// UI/CLI/MCP clients over the bidirectional protocol (spec.md §1).
#[derive(Debug, Parser)]
#[clap(author, version)]
struct Cli {
    /// Override `paseo.toml`'s `listen_addr` (and `PASEO_LISTEN_ADDR`).
    #[arg(long)]
    listen: Option<String>,

    /// Start the relay transport controller alongside the local listener.
    #[arg(long)]
    relay: bool,

    /// Base URL pairing offers are appended to as a URL fragment.
    #[arg(long, default_value = "https://app.paseo.dev")]
    app_base_url: String,

    /// Pid of an external process supervising this daemon's lifecycle; when
    /// set, `shutdown`/`restart` lifecycle intents are forwarded rather than
    /// acted on directly (spec.md §4.11).
    #[arg(long)]
    owner_pid: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let mut providers = ProviderRegistry::new();
    for (provider_id, provider_config) in &config.providers {
        match SubprocessAgentClient::new(
            provider_id,
            &provider_config.command,
            provider_config.args.clone(),
            provider_config.env.clone(),
        ) {
            Ok(client) => providers.register(provider_id.clone(), Arc::new(client)),
            Err(err) => tracing::warn!(provider = %provider_id, %err, "provider unavailable at startup"),
        }
    }

    let manager = AgentManager::new(config, Arc::new(providers)).await?;

    paseo_daemon::run_main(
        manager,
        DaemonOptions {
            app_base_url: cli.app_base_url,
            owner_pid: cli.owner_pid,
            relay: cli.relay,
        },
    )
    .await
}
