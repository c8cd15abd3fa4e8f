//! Wire and data-model types shared by every crate in the workspace.
//!
//! This crate has no I/O: it defines the shapes that cross the daemon's
//! boundaries (agent state, the timeline item union, permission requests,
//! the client/server message envelope, and the pairing offer) so that
//! `paseo-core`, `paseo-daemon`, and `paseo-mcp` can agree on them without
//! depending on each other.

pub mod agent;
pub mod error;
pub mod ids;
pub mod keypair;
pub mod message;
pub mod model_catalog;
pub mod offer;
pub mod permission;
pub mod session;
pub mod timeline;

pub use agent::Agent;
pub use agent::AgentStatus;
pub use error::ErrorKind;
pub use ids::AgentId;
pub use ids::ServerId;
pub use permission::PermissionRequest;
pub use permission::PermissionResolution;
pub use timeline::TimelineItem;
pub use timeline::TimelineRow;
