use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An issued bearer credential with its embedded claims unpacked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthToken {
    /// Compact JWT string.
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub agent_id: String,
    pub permissions: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl AuthToken {
    /// Expired exactly at `expires_at`: a token at `exp - ε` is valid, at
    /// `exp` and beyond it is not.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}
