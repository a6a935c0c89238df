use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Metadata key under which the detached signature travels.
pub const SIGNATURE_KEY: &str = "signature";

/// A typed unit of communication between two agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// Free-form type string: "request", "response", "event", "ping", ...
    pub message_type: String,
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// Id of the message this one responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Time to live in seconds; expired messages are dropped on dequeue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Message {
    /// Build a new message with a fresh UUID and the current timestamp.
    pub fn new(
        sender_id: &str,
        receiver_id: &str,
        message_type: &str,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            message_type: message_type.to_string(),
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            ttl: None,
            metadata: Map::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// True once more than `ttl` seconds have elapsed since the timestamp.
    /// Messages without a TTL never expire.
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => (Utc::now() - self.timestamp).num_seconds() > ttl as i64,
            None => false,
        }
    }

    /// Create a response message: sender and receiver swapped, correlation id
    /// set to this message's id, `response_to` recorded in metadata.
    pub fn create_response(&self, payload: Map<String, Value>) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            "response_to".to_string(),
            Value::String(self.message_id.clone()),
        );
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id: self.receiver_id.clone(),
            receiver_id: self.sender_id.clone(),
            message_type: "response".to_string(),
            payload,
            timestamp: Utc::now(),
            correlation_id: Some(self.message_id.clone()),
            ttl: None,
            metadata,
        }
    }

    /// Canonical serialized form: UTF-8 JSON with object keys sorted at every
    /// level and the detached signature excluded. Signing and verification
    /// both operate on these bytes, so the form must be reproducible
    /// byte-for-byte on both ends.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        // serde_json maps are BTreeMap-backed, so key order is sorted.
        let mut value = serde_json::to_value(self)?;
        if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove(SIGNATURE_KEY);
        }
        serde_json::to_vec(&value)
    }

    /// The detached signature carried in metadata, if present.
    pub fn signature(&self) -> Option<&str> {
        self.metadata.get(SIGNATURE_KEY).and_then(Value::as_str)
    }

    pub fn set_signature(&mut self, signature: String) {
        self.metadata
            .insert(SIGNATURE_KEY.to_string(), Value::String(signature));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::new("agent-a", "agent-b", "ping", payload(json!({"n": 1})));
        assert_eq!(msg.sender_id, "agent-a");
        assert_eq!(msg.receiver_id, "agent-b");
        assert_eq!(msg.message_type, "ping");
        assert!(!msg.message_id.is_empty());
        assert!(msg.correlation_id.is_none());
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_serde_roundtrip() {
        let msg = Message::new("a", "b", "request", payload(json!({"x": 1.5, "y": "z"})))
            .with_correlation_id("corr-1")
            .with_ttl(60);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_create_response_swaps_and_correlates() {
        let msg = Message::new("a", "b", "ping", Map::new());
        let resp = msg.create_response(payload(json!({"status": "pong"})));
        assert_eq!(resp.sender_id, "b");
        assert_eq!(resp.receiver_id, "a");
        assert_eq!(resp.message_type, "response");
        assert_eq!(resp.correlation_id.as_deref(), Some(msg.message_id.as_str()));
        assert_eq!(
            resp.metadata.get("response_to").and_then(Value::as_str),
            Some(msg.message_id.as_str())
        );
    }

    #[test]
    fn test_canonical_bytes_excludes_signature() {
        let mut msg = Message::new("a", "b", "event", payload(json!({"k": "v"})));
        let before = msg.canonical_bytes().unwrap();
        msg.set_signature("deadbeef".to_string());
        let after = msg.canonical_bytes().unwrap();
        assert_eq!(before, after);
        assert_eq!(msg.signature(), Some("deadbeef"));
    }

    #[test]
    fn test_canonical_bytes_stable_across_reparse() {
        let mut msg = Message::new("a", "b", "event", payload(json!({"z": 1, "a": 2})));
        msg.set_signature("00ff".to_string());
        let wire = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&wire).unwrap();
        assert_eq!(
            msg.canonical_bytes().unwrap(),
            back.canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_ttl_expiry_boundary() {
        let mut msg = Message::new("a", "b", "event", Map::new()).with_ttl(30);
        assert!(!msg.is_expired());
        msg.timestamp = Utc::now() - chrono::Duration::seconds(31);
        assert!(msg.is_expired());
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let mut msg = Message::new("a", "b", "event", Map::new());
        msg.timestamp = Utc::now() - chrono::Duration::days(365);
        assert!(!msg.is_expired());
    }
}
