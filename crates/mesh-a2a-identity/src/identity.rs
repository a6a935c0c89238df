use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An agent's public identity document.
///
/// `did` is a deterministic function of `agent_id`; the identity is valid
/// while the current time is before `expires_at`. Never mutated after
/// creation except for capability updates propagated via discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub did: String,
    /// PEM-encoded SubjectPublicKeyInfo.
    pub public_key: String,
    /// Colon-namespaced capability tags, e.g. `banking:accounts`.
    pub capabilities: Vec<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AgentIdentity {
    /// The DID corresponding to an agent id.
    pub fn did_for(agent_id: &str) -> String {
        format!("did:a2a:{agent_id}")
    }

    /// An identity without an expiry never expires.
    pub fn is_valid(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() < expires_at,
            None => true,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
