use std::sync::Arc;

use paseo_core::AgentManager;
use paseo_core::config::Config;
use paseo_core::registry::ProviderRegistry;
use paseo_providers::SubprocessAgentClient;

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::load()?;

    let mut providers = ProviderRegistry::new();
    for (provider_id, provider_config) in &config.providers {
        match SubprocessAgentClient::new(
            provider_id,
            &provider_config.command,
            provider_config.args.clone(),
            provider_config.env.clone(),
        ) {
            Ok(client) => providers.register(provider_id.clone(), Arc::new(client)),
            Err(err) => tracing::warn!("provider {provider_id} unavailable: {err}"),
        }
    }

    let manager = AgentManager::new(config, Arc::new(providers)).await?;
    paseo_mcp::run_main(manager).await?;
    Ok(())
}
