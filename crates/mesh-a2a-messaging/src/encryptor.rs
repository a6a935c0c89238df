use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use mesh_a2a_core::{A2aError, EncryptedMessage, Message, Result, AES_256_GCM};
use rand::RngCore;
use tracing::warn;

use crate::session::SessionKey;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM sealing and opening of messages.
///
/// Associated data binds the ciphertext to the sender/receiver pair, so a
/// re-addressed envelope fails authentication. An envelope is decryptable iff
/// the opener holds the same session key; failure yields `None`, never
/// partial plaintext.
pub struct MessageEncryptor;

impl MessageEncryptor {
    pub fn encrypt_message(
        &self,
        message: &Message,
        session_key: &SessionKey,
    ) -> Result<EncryptedMessage> {
        // Sorted-key serialization keeps the sealed form reproducible.
        let plaintext = serde_json::to_vec(&serde_json::to_value(message)?)?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(session_key));
        let aad = associated_data(&message.sender_id, &message.receiver_id);
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| A2aError::transport("aead seal failed"))?;

        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedMessage {
            encrypted_data: BASE64.encode(&sealed),
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(&tag),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            timestamp: Utc::now(),
            algorithm: AES_256_GCM.to_string(),
            metadata: serde_json::Map::new(),
        })
    }

    /// Open a sealed envelope. Tampering with the ciphertext, IV, tag, or
    /// addressing fails the tag check and returns `None`.
    pub fn decrypt_message(
        &self,
        envelope: &EncryptedMessage,
        session_key: &SessionKey,
    ) -> Option<Message> {
        let ciphertext = BASE64.decode(&envelope.encrypted_data).ok()?;
        let iv = BASE64.decode(&envelope.iv).ok()?;
        let tag = BASE64.decode(&envelope.auth_tag).ok()?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return None;
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(session_key));
        let aad = associated_data(&envelope.sender_id, &envelope.receiver_id);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| {
                warn!(
                    sender_id = %envelope.sender_id,
                    receiver_id = %envelope.receiver_id,
                    "decryption failed, dropping envelope"
                );
            })
            .ok()?;

        serde_json::from_slice(&plaintext).ok()
    }
}

fn associated_data(sender_id: &str, receiver_id: &str) -> String {
    format!("{sender_id}:{receiver_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> Message {
        let payload = json!({
            "account_number": "123456789",
            "balance": 10000.50,
            "secret_info": "confidential"
        });
        Message::new(
            "agent-a",
            "agent-b",
            "secure_data",
            payload.as_object().unwrap().clone(),
        )
    }

    fn key(fill: u8) -> SessionKey {
        [fill; 32]
    }

    #[test]
    fn test_roundtrip_preserves_payload() {
        let encryptor = MessageEncryptor;
        let msg = message();
        let envelope = encryptor.encrypt_message(&msg, &key(7)).unwrap();

        assert_eq!(envelope.algorithm, AES_256_GCM);
        assert_eq!(envelope.sender_id, "agent-a");
        assert_eq!(BASE64.decode(&envelope.iv).unwrap().len(), 12);
        assert_eq!(BASE64.decode(&envelope.auth_tag).unwrap().len(), 16);

        let opened = encryptor.decrypt_message(&envelope, &key(7)).unwrap();
        assert_eq!(opened, msg);
        assert_eq!(opened.payload["balance"], json!(10000.50));
    }

    #[test]
    fn test_wrong_key_fails() {
        let encryptor = MessageEncryptor;
        let envelope = encryptor.encrypt_message(&message(), &key(7)).unwrap();
        assert!(encryptor.decrypt_message(&envelope, &key(8)).is_none());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let encryptor = MessageEncryptor;
        let mut envelope = encryptor.encrypt_message(&message(), &key(7)).unwrap();
        let mut raw = BASE64.decode(&envelope.encrypted_data).unwrap();
        raw[0] ^= 0x01;
        envelope.encrypted_data = BASE64.encode(&raw);
        assert!(encryptor.decrypt_message(&envelope, &key(7)).is_none());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let encryptor = MessageEncryptor;
        let mut envelope = encryptor.encrypt_message(&message(), &key(7)).unwrap();
        let mut tag = BASE64.decode(&envelope.auth_tag).unwrap();
        tag[0] ^= 0xff;
        envelope.auth_tag = BASE64.encode(&tag);
        assert!(encryptor.decrypt_message(&envelope, &key(7)).is_none());
    }

    #[test]
    fn test_readdressed_envelope_fails() {
        let encryptor = MessageEncryptor;
        let mut envelope = encryptor.encrypt_message(&message(), &key(7)).unwrap();
        envelope.receiver_id = "agent-eve".to_string();
        assert!(encryptor.decrypt_message(&envelope, &key(7)).is_none());
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let encryptor = MessageEncryptor;
        let msg = message();
        let first = encryptor.encrypt_message(&msg, &key(7)).unwrap();
        let second = encryptor.encrypt_message(&msg, &key(7)).unwrap();
        assert_ne!(first.iv, second.iv);
    }
}
