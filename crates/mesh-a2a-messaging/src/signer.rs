use std::sync::Arc;

use mesh_a2a_core::{Message, Result};
use mesh_a2a_identity::IdentityStore;

/// Signs and verifies messages over their canonical serialized form.
pub struct MessageSigner {
    identity_store: Arc<IdentityStore>,
}

impl MessageSigner {
    pub fn new(identity_store: Arc<IdentityStore>) -> Self {
        Self { identity_store }
    }

    /// Hex signature over the message's canonical bytes, signed with the
    /// sender's private key.
    pub fn sign_message(&self, message: &Message) -> Result<String> {
        let canonical = message.canonical_bytes()?;
        self.identity_store.sign_data(&message.sender_id, &canonical)
    }

    /// Verify a detached signature against the sender's public key. An
    /// unknown sender verifies as false.
    pub fn verify_message_signature(&self, message: &Message, signature: &str) -> bool {
        let Ok(canonical) = message.canonical_bytes() else {
            return false;
        };
        self.identity_store
            .verify_signature(&message.sender_id, &canonical, signature)
    }
}
