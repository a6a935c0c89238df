use std::sync::Arc;

use mesh_a2a_core::{A2aError, Result};
use mesh_a2a_identity::IdentityStore;
use serde_json::Map;
use tracing::warn;

use crate::jwt::{load_or_create_secret, JwtAuthenticator};
use crate::AuthToken;

/// Default lifetime of issued tokens, in seconds.
pub const DEFAULT_TOKEN_LIFETIME_S: u64 = 3600;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 secret; auto-generated and persisted in identity storage when
    /// absent.
    pub secret_key: Option<Vec<u8>>,
    pub token_lifetime_s: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            token_lifetime_s: DEFAULT_TOKEN_LIFETIME_S,
        }
    }
}

/// How an agent proves its identity when requesting a token.
pub enum AuthMethod {
    Jwt,
    /// Presented client certificate must match the one stored for the agent.
    Mtls { cert_pem: String },
    /// Client-credentials flow against an external IdP. Not supported in the
    /// core; always refused.
    OAuth2,
}

/// Central authentication manager: mints bearer tokens for known agents and
/// validates inbound tokens and permission sets.
pub struct AuthManager {
    identity_store: Arc<IdentityStore>,
    jwt: JwtAuthenticator,
    token_lifetime_s: u64,
}

impl AuthManager {
    pub fn new(identity_store: Arc<IdentityStore>, config: AuthConfig) -> Result<Self> {
        let secret = match config.secret_key {
            Some(secret) => secret,
            None => load_or_create_secret(identity_store.storage_dir())?,
        };
        Ok(Self {
            identity_store,
            jwt: JwtAuthenticator::new(&secret),
            token_lifetime_s: config.token_lifetime_s,
        })
    }

    /// Authenticate an agent and mint a bearer token.
    ///
    /// Requested permissions are restricted to the agent's capabilities;
    /// `a2a:`-namespaced permissions are implicitly grantable to every valid
    /// identity.
    pub fn authenticate_agent(
        &self,
        agent_id: &str,
        method: AuthMethod,
        permissions: Option<Vec<String>>,
    ) -> Result<AuthToken> {
        let identity = self
            .identity_store
            .get_identity(agent_id)?
            .ok_or_else(|| A2aError::AuthFailure(format!("unknown agent {agent_id}")))?;
        if !identity.is_valid() {
            return Err(A2aError::AuthFailure(format!(
                "identity for {agent_id} has expired"
            )));
        }

        match method {
            AuthMethod::Jwt => {}
            AuthMethod::Mtls { cert_pem } => {
                let stored = self.identity_store.certificate_pem(agent_id)?.ok_or_else(
                    || A2aError::AuthFailure(format!("no certificate stored for {agent_id}")),
                )?;
                if normalize_pem(&cert_pem) != normalize_pem(&stored) {
                    return Err(A2aError::AuthFailure(format!(
                        "certificate mismatch for {agent_id}"
                    )));
                }
            }
            AuthMethod::OAuth2 => {
                return Err(A2aError::AuthFailure(
                    "oauth2 client credentials not supported".to_string(),
                ));
            }
        }

        let requested =
            permissions.unwrap_or_else(|| vec!["a2a:messaging".to_string()]);
        let granted: Vec<String> = requested
            .into_iter()
            .filter(|p| p.starts_with("a2a:") || identity.has_capability(p))
            .collect();

        self.jwt
            .create_token(agent_id, granted, self.token_lifetime_s, Map::new())
    }

    /// Validate a compact token string and check every required permission.
    /// Returns the authenticated agent id.
    pub fn validate_authentication(
        &self,
        token: &str,
        required_permissions: &[&str],
    ) -> Result<String> {
        let auth_token = self
            .jwt
            .validate_token(token)
            .ok_or_else(|| A2aError::AuthFailure("invalid or expired token".to_string()))?;

        for permission in required_permissions {
            if !auth_token.has_permission(permission) {
                warn!(
                    agent_id = %auth_token.agent_id,
                    permission, "token missing required permission"
                );
                return Err(A2aError::AuthFailure(format!(
                    "missing permission: {permission}"
                )));
            }
        }
        Ok(auth_token.agent_id)
    }

    /// Re-issue a non-expired token with the same permissions.
    pub fn refresh_token(&self, token: &AuthToken, lifetime_s: Option<u64>) -> Result<AuthToken> {
        if token.is_expired() {
            return Err(A2aError::AuthFailure(
                "cannot refresh an expired token".to_string(),
            ));
        }
        self.jwt.create_token(
            &token.agent_id,
            token.permissions.clone(),
            lifetime_s.unwrap_or(self.token_lifetime_s),
            token.metadata.clone(),
        )
    }

    /// Map a coarse action onto the capability namespace it requires.
    pub fn authorize_action(&self, agent_id: &str, action: &str) -> bool {
        let required = match action {
            "send_message" | "receive_message" => "a2a:messaging",
            "discover_agents" => "a2a:discovery",
            "manage_identity" => "a2a:admin",
            _ => return false,
        };
        match self.identity_store.get_identity(agent_id) {
            Ok(Some(identity)) => identity.has_capability(required),
            _ => false,
        }
    }

    /// Sign a challenge string for an out-of-band handshake.
    pub fn sign_challenge(&self, agent_id: &str, challenge: &str) -> Result<String> {
        self.identity_store.sign_data(agent_id, challenge.as_bytes())
    }

    pub fn verify_challenge_response(
        &self,
        agent_id: &str,
        challenge: &str,
        signature: &str,
    ) -> bool {
        self.identity_store
            .verify_signature(agent_id, challenge.as_bytes(), signature)
    }
}

fn normalize_pem(pem: &str) -> String {
    pem.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, Arc<IdentityStore>, AuthManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IdentityStore::new(dir.path()).unwrap());
        let manager = AuthManager::new(store.clone(), AuthConfig::default()).unwrap();
        (dir, store, manager)
    }

    #[test]
    fn test_authenticate_known_agent() {
        let (_dir, store, manager) = manager();
        store
            .create_identity("agent-1", vec!["banking:accounts".into()], Map::new(), 1)
            .unwrap();

        let token = manager
            .authenticate_agent(
                "agent-1",
                AuthMethod::Jwt,
                Some(vec![
                    "a2a:messaging".into(),
                    "banking:accounts".into(),
                    "crypto:trading".into(),
                ]),
            )
            .unwrap();

        // a2a:* is implicitly grantable; domain permissions need the capability.
        assert!(token.has_permission("a2a:messaging"));
        assert!(token.has_permission("banking:accounts"));
        assert!(!token.has_permission("crypto:trading"));
    }

    #[test]
    fn test_authenticate_unknown_agent_fails() {
        let (_dir, _store, manager) = manager();
        assert!(matches!(
            manager.authenticate_agent("ghost", AuthMethod::Jwt, None),
            Err(A2aError::AuthFailure(_))
        ));
    }

    #[test]
    fn test_validate_and_permissions() {
        let (_dir, store, manager) = manager();
        store
            .create_identity("agent-2", vec![], Map::new(), 1)
            .unwrap();
        let token = manager
            .authenticate_agent(
                "agent-2",
                AuthMethod::Jwt,
                Some(vec!["a2a:messaging".into()]),
            )
            .unwrap();

        let agent_id = manager
            .validate_authentication(&token.token, &["a2a:messaging"])
            .unwrap();
        assert_eq!(agent_id, "agent-2");

        assert!(manager
            .validate_authentication(&token.token, &["a2a:discovery"])
            .is_err());
        assert!(manager.validate_authentication("garbage", &[]).is_err());
    }

    #[test]
    fn test_mtls_certificate_matching() {
        let (_dir, store, manager) = manager();
        store
            .create_identity("agent-3", vec![], Map::new(), 1)
            .unwrap();
        let cert = store.certificate_pem("agent-3").unwrap().unwrap();

        assert!(manager
            .authenticate_agent("agent-3", AuthMethod::Mtls { cert_pem: cert }, None)
            .is_ok());

        let wrong = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(manager
            .authenticate_agent(
                "agent-3",
                AuthMethod::Mtls {
                    cert_pem: wrong.to_string()
                },
                None
            )
            .is_err());
    }

    #[test]
    fn test_oauth2_not_supported() {
        let (_dir, store, manager) = manager();
        store
            .create_identity("agent-4", vec![], Map::new(), 1)
            .unwrap();
        assert!(manager
            .authenticate_agent("agent-4", AuthMethod::OAuth2, None)
            .is_err());
    }

    #[test]
    fn test_authorize_action_mapping() {
        let (_dir, store, manager) = manager();
        store
            .create_identity(
                "agent-5",
                vec!["a2a:messaging".into(), "a2a:discovery".into()],
                Map::new(),
                1,
            )
            .unwrap();

        assert!(manager.authorize_action("agent-5", "send_message"));
        assert!(manager.authorize_action("agent-5", "receive_message"));
        assert!(manager.authorize_action("agent-5", "discover_agents"));
        assert!(!manager.authorize_action("agent-5", "manage_identity"));
        assert!(!manager.authorize_action("agent-5", "reboot_the_world"));
        assert!(!manager.authorize_action("ghost", "send_message"));
    }

    #[test]
    fn test_challenge_roundtrip() {
        let (_dir, store, manager) = manager();
        store
            .create_identity("agent-6", vec![], Map::new(), 1)
            .unwrap();

        let signature = manager.sign_challenge("agent-6", "nonce-123").unwrap();
        assert!(manager.verify_challenge_response("agent-6", "nonce-123", &signature));
        assert!(!manager.verify_challenge_response("agent-6", "nonce-456", &signature));
    }

    #[test]
    fn test_refresh_token() {
        let (_dir, store, manager) = manager();
        store
            .create_identity("agent-7", vec![], Map::new(), 1)
            .unwrap();
        let token = manager
            .authenticate_agent("agent-7", AuthMethod::Jwt, None)
            .unwrap();

        let refreshed = manager.refresh_token(&token, Some(7200)).unwrap();
        assert_eq!(refreshed.agent_id, "agent-7");
        assert_eq!(refreshed.permissions, token.permissions);
        assert!(refreshed.expires_at >= token.expires_at);
    }

    #[test]
    fn test_shared_secret_across_managers() {
        let (_dir, store, manager) = manager();
        store
            .create_identity("agent-8", vec![], Map::new(), 1)
            .unwrap();
        let token = manager
            .authenticate_agent("agent-8", AuthMethod::Jwt, None)
            .unwrap();

        // A second manager over the same storage loads the same secret.
        let second = AuthManager::new(store, AuthConfig::default()).unwrap();
        assert!(second
            .validate_authentication(&token.token, &["a2a:messaging"])
            .is_ok());
    }
}
