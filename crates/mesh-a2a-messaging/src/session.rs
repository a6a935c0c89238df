//! Per-pair session key derivation.
//!
//! Keys are derived deterministically from the ordered (sender, receiver)
//! pair and a coarse time bucket, so both ends of a conversation arrive at
//! the same key without a handshake. Not forward-secret and not rotated
//! within a bucket; kept in one place so the derivation can later be swapped
//! for a proper KDF or handshake without touching callers.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Width of the derivation time bucket.
pub const SESSION_BUCKET_SECONDS: i64 = 3600;

/// 256-bit AEAD session key.
pub type SessionKey = [u8; 32];

/// The bucket a timestamp falls into.
pub fn bucket_for(timestamp: &DateTime<Utc>) -> i64 {
    timestamp.timestamp().div_euclid(SESSION_BUCKET_SECONDS)
}

/// SHA-256 of `"{sender}:{receiver}:{bucket}"`, truncated to 32 bytes.
pub fn derive_session_key(sender_id: &str, receiver_id: &str, bucket: i64) -> SessionKey {
    let material = format!("{sender_id}:{receiver_id}:{bucket}");
    let digest = Sha256::digest(material.as_bytes());
    digest.into()
}
