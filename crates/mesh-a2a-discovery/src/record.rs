use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default record TTL in seconds.
pub const DEFAULT_RECORD_TTL_S: u64 = 300;

/// Lifecycle state advertised by a registered agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Active,
    Inactive,
    Suspended,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Suspended => "suspended",
        }
    }
}

/// A discovery registry entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_did: String,
    pub capabilities: Vec<String>,
    /// Endpoint URLs in preference order.
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: AgentStatus,
    /// Seconds since `last_seen` after which the record expires.
    pub ttl: u64,
}

impl AgentRecord {
    pub fn new(
        agent_id: &str,
        agent_did: &str,
        capabilities: Vec<String>,
        endpoints: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.to_string(),
            agent_did: agent_did.to_string(),
            capabilities,
            endpoints,
            metadata: Map::new(),
            registered_at: now,
            last_seen: now,
            status: AgentStatus::Active,
            ttl: DEFAULT_RECORD_TTL_S,
        }
    }

    /// Expired once strictly more than `ttl` seconds have passed since
    /// `last_seen`.
    pub fn is_expired(&self) -> bool {
        (Utc::now() - self.last_seen).num_seconds() > self.ttl as i64
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Filter for `discover_agents`. Capabilities must all be present on a
/// candidate; matching is exact, no wildcards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceQuery {
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "ServiceQuery::default_status")]
    pub status: Option<AgentStatus>,
    #[serde(default = "ServiceQuery::default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub include_metadata: bool,
}

impl ServiceQuery {
    fn default_status() -> Option<AgentStatus> {
        Some(AgentStatus::Active)
    }

    fn default_max_results() -> usize {
        50
    }

    pub fn by_agent_id(agent_id: &str) -> Self {
        Self {
            agent_id: Some(agent_id.to_string()),
            ..Self::default()
        }
    }

    pub fn by_capabilities(capabilities: Vec<String>) -> Self {
        Self {
            capabilities: Some(capabilities),
            ..Self::default()
        }
    }
}

impl Default for ServiceQuery {
    fn default() -> Self {
        Self {
            capabilities: None,
            agent_id: None,
            status: Self::default_status(),
            max_results: Self::default_max_results(),
            include_metadata: false,
        }
    }
}
