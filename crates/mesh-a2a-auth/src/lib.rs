//! Authentication for A2A agents: short-lived HS256 bearer tokens bound to
//! an agent and a permission set, optional mTLS certificate matching, and
//! challenge/response signing.
//!
//! The HS256 secret is process-scoped: generated on first start, persisted in
//! identity storage, and never exposed on the wire.

mod jwt;
mod manager;
mod token;

pub use jwt::JwtAuthenticator;
pub use manager::{AuthConfig, AuthManager, AuthMethod};
pub use token::AuthToken;
