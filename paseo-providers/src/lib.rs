//! Concrete `AgentClient` adapters: a subprocess-based adapter that speaks
//! newline-delimited JSON with a provider CLI, and an in-process mock used
//! by integration tests.

pub mod mock;
pub mod subprocess;

pub use mock::MockAgentClient;
pub use subprocess::SubprocessAgentClient;
