//! Capability-indexed registry of live agents with TTL heartbeats, a
//! background expiry sweep, and single-file JSON persistence.

mod peer;
mod record;
mod service;

pub use peer::{PeerDiscovery, PresenceAnnouncement, PresenceSink};
pub use record::{AgentRecord, AgentStatus, ServiceQuery, DEFAULT_RECORD_TTL_S};
pub use service::{DiscoveryConfig, DiscoveryService, RegistryStats};
