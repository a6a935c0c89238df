//! Cryptographic identity for A2A agents.
//!
//! Each agent owns a 2048-bit RSA keypair, a self-signed X.509 certificate,
//! and a DID of the form `did:a2a:<agent_id>`. The private key and
//! certificate are persisted alongside the identity document and never leave
//! the process.

mod identity;
mod store;

pub use identity::AgentIdentity;
pub use store::IdentityStore;
