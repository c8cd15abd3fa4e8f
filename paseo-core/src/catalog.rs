//! The provider model catalog cache (spec.md §4.5): queryable independent
//! of any running agent, cached per `(provider, cwd)` with a short TTL.
//! Follows the `model_provider_info::built_in_model_providers` static-catalog
//! idiom, generalized to a per-provider dynamic fetch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use paseo_protocol::model_catalog::ModelInfo;
use tokio::sync::RwLock;

use crate::error::DaemonError;
use crate::error::Result;
use crate::registry::ProviderRegistry;

const CATALOG_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CacheEntry {
    models: Vec<ModelInfo>,
    fetched_at: Instant,
}

/// Caches `AgentClient::list_models` results per `(provider, cwd)` key so
/// repeated `list_provider_models_request` calls (e.g. while a client's
/// model picker is open) don't repeatedly shell out to the provider.
pub struct ModelCatalog {
    providers: Arc<ProviderRegistry>,
    cache: RwLock<HashMap<(String, Option<PathBuf>), CacheEntry>>,
}

impl ModelCatalog {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            providers,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn list_models(
        &self,
        provider: &str,
        cwd: Option<&std::path::Path>,
    ) -> Result<Vec<ModelInfo>> {
        let key = (provider.to_string(), cwd.map(|p| p.to_path_buf()));
        if let Some(entry) = self.cache.read().await.get(&key)
            && entry.fetched_at.elapsed() < CATALOG_TTL
        {
            return Ok(entry.models.clone());
        }

        let client = self
            .providers
            .get(provider)
            .ok_or_else(|| DaemonError::ProviderUnavailable(provider.to_string()))?;
        let models = client.list_models(cwd).await?;

        self.cache.write().await.insert(
            key,
            CacheEntry {
                models: models.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AgentClient;
    use crate::provider::ProviderConversation;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AgentClient for CountingClient {
        async fn create(
            &self,
            _cwd: &std::path::Path,
            _config: Option<serde_json::Value>,
        ) -> Result<Box<dyn ProviderConversation>> {
            unimplemented!("not exercised by this test")
        }

        async fn resume(
            &self,
            _persistence: &paseo_protocol::agent::PersistenceHandle,
        ) -> Result<Box<dyn ProviderConversation>> {
            unimplemented!("not exercised by this test")
        }

        async fn list_models(&self, _cwd: Option<&std::path::Path>) -> Result<Vec<ModelInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ModelInfo {
                id: "mock-1".into(),
                display_name: "Mock Model".into(),
                thinking_options: vec![],
                variant_options: vec![],
            }])
        }
    }

    #[tokio::test]
    async fn caches_until_ttl_expires() {
        let mut registry = ProviderRegistry::new();
        let client = Arc::new(CountingClient::default());
        registry.register("mock", client.clone());
        let catalog = ModelCatalog::new(Arc::new(registry));

        let first = catalog.list_models("mock", None).await.unwrap();
        let second = catalog.list_models("mock", None).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
