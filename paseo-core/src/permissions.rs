//! C7: correlates agent permission requests with client responses
//! (spec.md §4.7). A single in-memory map `requestId → {agentId,
//! fingerprint}`; the fingerprint collapses duplicate provider-side
//! requests within one agent onto a single pending entry.

use std::collections::HashMap;

use paseo_protocol::AgentId;
use paseo_protocol::PermissionRequest;
use parking_lot::Mutex;
use sha2::Digest;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

/// Derived from `(agentId, request.id | metadata.id | name | title |
/// kind+hash(input|metadata))`, per spec.md §4.7: the first of those keys
/// present on the request wins, so that the same logical question asked
/// twice by the provider collapses onto one pending entry.
pub fn fingerprint(agent_id: AgentId, request: &PermissionRequest) -> Fingerprint {
    if !request.id.is_empty() {
        return Fingerprint(format!("{agent_id}:{}", request.id));
    }
    if let Some(meta_id) = request
        .metadata
        .as_ref()
        .and_then(|m| m.get("id"))
        .and_then(|v| v.as_str())
    {
        return Fingerprint(format!("{agent_id}:{meta_id}"));
    }
    if !request.name.is_empty() {
        return Fingerprint(format!("{agent_id}:name:{}", request.name));
    }
    if let Some(title) = &request.title {
        return Fingerprint(format!("{agent_id}:title:{title}"));
    }
    let mut hasher = sha2::Sha256::new();
    if let Some(input) = &request.input {
        hasher.update(input.to_string());
    }
    if let Some(metadata) = &request.metadata {
        hasher.update(metadata.to_string());
    }
    let digest = hasher.finalize();
    Fingerprint(format!(
        "{agent_id}:{}:{:x}",
        request.kind,
        digest.iter().take(8).fold(0u64, |acc, b| (acc << 8) | *b as u64)
    ))
}

struct PendingEntry {
    agent_id: AgentId,
    fingerprint: Fingerprint,
}

/// The permission broker. Owned by the agent manager (C3) and shared by
/// reference with every agent instance (C4).
#[derive(Default)]
pub struct PermissionBroker {
    pending: Mutex<HashMap<String, PendingEntry>>,
    // fingerprint -> requestId, so a duplicate provider request can be
    // recognized and collapsed onto the existing pending requestId.
    by_fingerprint: Mutex<HashMap<Fingerprint, String>>,
}

impl PermissionBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request, or return the existing `requestId`
    /// if an equivalent request (by fingerprint) is already pending for
    /// this agent.
    pub fn register(&self, agent_id: AgentId, request: &PermissionRequest) -> String {
        let fp = fingerprint(agent_id, request);
        let mut by_fp = self.by_fingerprint.lock();
        if let Some(existing) = by_fp.get(&fp) {
            return existing.clone();
        }
        self.pending.lock().insert(
            request.id.clone(),
            PendingEntry {
                agent_id,
                fingerprint: fp.clone(),
            },
        );
        by_fp.insert(fp, request.id.clone());
        request.id.clone()
    }

    /// Remove a pending request by id. Returns its `agentId`, or `None` if
    /// the id is unknown (already resolved, or never registered) — the
    /// caller should treat a repeat resolution of the same id as a no-op,
    /// and an entirely unknown id as `UnknownPermission`.
    pub fn resolve(&self, request_id: &str) -> Option<AgentId> {
        let mut pending = self.pending.lock();
        let entry = pending.remove(request_id)?;
        self.by_fingerprint.lock().remove(&entry.fingerprint);
        Some(entry.agent_id)
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.lock().contains_key(request_id)
    }

    pub fn pending_count_for(&self, agent_id: AgentId) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|entry| entry.agent_id == agent_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> PermissionRequest {
        PermissionRequest {
            id: id.to_string(),
            kind: "exec".into(),
            name: "shell".into(),
            title: None,
            description: None,
            input: Some(serde_json::json!({"command": "rm -rf /"})),
            options: vec![],
            metadata: None,
        }
    }

    #[test]
    fn resolve_unknown_id_returns_none() {
        let broker = PermissionBroker::new();
        assert!(broker.resolve("nope").is_none());
    }

    #[test]
    fn duplicate_requests_collapse_onto_one_pending_id() {
        let broker = PermissionBroker::new();
        let agent = AgentId::new();
        let first = broker.register(agent, &request("req-1"));
        let second = broker.register(agent, &request("req-1"));
        assert_eq!(first, second);
        assert_eq!(broker.pending_count_for(agent), 1);
    }

    #[test]
    fn resolve_removes_pending_entry() {
        let broker = PermissionBroker::new();
        let agent = AgentId::new();
        let id = broker.register(agent, &request("req-2"));
        assert_eq!(broker.resolve(&id), Some(agent));
        // Resolving again is a no-op, per spec: duplicate decisions do
        // not error.
        assert!(broker.resolve(&id).is_none());
    }
}
