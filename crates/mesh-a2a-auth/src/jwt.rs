use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mesh_a2a_core::{A2aError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::AuthToken;

const ISSUER: &str = "a2a-auth";
const SECRET_FILE: &str = "auth_secret.key";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
    permissions: Vec<String>,
    metadata: Map<String, Value>,
}

/// Mints and validates compact HS256 JWTs over a process-scoped secret.
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Create a token for an agent with the given permissions and lifetime.
    pub fn create_token(
        &self,
        agent_id: &str,
        permissions: Vec<String>,
        lifetime_s: u64,
        metadata: Map<String, Value>,
    ) -> Result<AuthToken> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(lifetime_s as i64);
        let claims = Claims {
            iss: ISSUER.to_string(),
            sub: agent_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            permissions: permissions.clone(),
            metadata: metadata.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| A2aError::AuthFailure(format!("token encoding: {e}")))?;

        Ok(AuthToken {
            token,
            token_type: "JWT".to_string(),
            expires_at,
            agent_id: agent_id.to_string(),
            permissions,
            metadata,
        })
    }

    /// Validate a compact token string. Returns `None` if the signature,
    /// issuer, or expiry check fails.
    pub fn validate_token(&self, token: &str) -> Option<AuthToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).ok()?;
        let expires_at = DateTime::from_timestamp(data.claims.exp, 0)?;

        let auth_token = AuthToken {
            token: token.to_string(),
            token_type: "JWT".to_string(),
            expires_at,
            agent_id: data.claims.sub,
            permissions: data.claims.permissions,
            metadata: data.claims.metadata,
        };
        // jsonwebtoken accepts exp == now; the contract is now >= exp invalid.
        if auth_token.is_expired() {
            return None;
        }
        Some(auth_token)
    }
}

/// Load the process secret from identity storage, generating and persisting
/// 32 random bytes on first start.
pub fn load_or_create_secret(storage_dir: &Path) -> Result<Vec<u8>> {
    let path = storage_dir.join(SECRET_FILE);
    if path.exists() {
        let hex_secret = fs::read_to_string(&path)?;
        return hex::decode(hex_secret.trim())
            .map_err(|e| A2aError::IdentityCorrupt(format!("auth secret: {e}")));
    }

    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    fs::create_dir_all(storage_dir)?;
    fs::write(&path, hex::encode(secret))?;
    Ok(secret.to_vec())
}
