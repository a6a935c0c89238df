use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only AEAD algorithm the envelope format carries.
pub const AES_256_GCM: &str = "AES-256-GCM";

/// Sealed envelope for an end-to-end encrypted message.
///
/// The ciphertext decrypts under the sender/receiver session key iff the
/// auth tag verifies; any tampering with the ciphertext, the IV, or the
/// addressing fields fails decryption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedMessage {
    /// Base64-encoded ciphertext (tag detached).
    pub encrypted_data: String,
    /// Base64-encoded 96-bit initialization vector.
    pub iv: String,
    /// Base64-encoded 128-bit authentication tag.
    pub auth_tag: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub timestamp: DateTime<Utc>,
    pub algorithm: String,
    /// Carries the detached signature of the inner message.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EncryptedMessage {
    /// The inner message's detached signature, if attached.
    pub fn signature(&self) -> Option<&str> {
        self.metadata
            .get(crate::message::SIGNATURE_KEY)
            .and_then(Value::as_str)
    }

    pub fn set_signature(&mut self, signature: String) {
        self.metadata.insert(
            crate::message::SIGNATURE_KEY.to_string(),
            Value::String(signature),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serde_roundtrip() {
        let mut envelope = EncryptedMessage {
            encrypted_data: "Y2lwaGVydGV4dA==".to_string(),
            iv: "bm9uY2Vub25jZQ==".to_string(),
            auth_tag: "dGFnIHRhZyB0YWcgdGFn".to_string(),
            sender_id: "agent-a".to_string(),
            receiver_id: "agent-b".to_string(),
            timestamp: Utc::now(),
            algorithm: AES_256_GCM.to_string(),
            metadata: Map::new(),
        };
        envelope.set_signature("abcd".to_string());

        let json = serde_json::to_string(&envelope).unwrap();
        let back: EncryptedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
        assert_eq!(back.signature(), Some("abcd"));
        assert_eq!(back.algorithm, AES_256_GCM);
    }
}
