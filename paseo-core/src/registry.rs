//! A simple provider-id → `AgentClient` lookup. Populated by the daemon
//! binary at startup from configuration; looked up by name, never mutated
//! concurrently with lookups (configuration is fixed for the process
//! lifetime).

use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::AgentClient;

#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn AgentClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider_id: impl Into<String>, client: Arc<dyn AgentClient>) {
        self.clients.insert(provider_id.into(), client);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn AgentClient>> {
        self.clients.get(provider_id).cloned()
    }

    pub fn is_known(&self, provider_id: &str) -> bool {
        self.clients.contains_key(provider_id)
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}
