use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use mesh_a2a_auth::{AuthManager, AuthToken};
use mesh_a2a_core::{A2aError, EncryptedMessage, Message, Result};
use mesh_a2a_identity::IdentityStore;
use tracing::warn;

use crate::encryptor::MessageEncryptor;
use crate::queue::MessageQueue;
use crate::router::MessageRouter;
use crate::session::{bucket_for, derive_session_key, SessionKey};
use crate::signer::MessageSigner;

/// Central messaging service: builds, signs, optionally seals, queues, and
/// verifies messages for the agents of one process.
pub struct MessagingService {
    auth: Arc<AuthManager>,
    encryptor: MessageEncryptor,
    signer: MessageSigner,
    router: MessageRouter,
    queue: MessageQueue,
    /// Keyed by the ordered (sender, receiver) pair; created lazily on the
    /// first encrypted send. Each entry remembers its derivation bucket so a
    /// rolled-over bucket refreshes the key instead of sealing with a stale
    /// one.
    sessions: Mutex<HashMap<(String, String), (i64, SessionKey)>>,
}

impl MessagingService {
    pub fn new(
        identity_store: Arc<IdentityStore>,
        auth: Arc<AuthManager>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            auth,
            encryptor: MessageEncryptor,
            signer: MessageSigner::new(identity_store),
            router: MessageRouter::new(),
            queue: MessageQueue::new(queue_capacity),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn signer(&self) -> &MessageSigner {
        &self.signer
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    /// Create the session key for an ordered agent pair in the current time
    /// bucket, refreshing any cached entry from an earlier bucket.
    pub fn create_session(&self, sender_id: &str, receiver_id: &str) -> SessionKey {
        self.session_key_for(sender_id, receiver_id, bucket_for(&Utc::now()))
    }

    /// The cached key for a pair, derived and stored when the cached bucket
    /// does not match `bucket`.
    fn session_key_for(&self, sender_id: &str, receiver_id: &str, bucket: i64) -> SessionKey {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .entry((sender_id.to_string(), receiver_id.to_string()))
            .or_insert_with(|| (bucket, derive_session_key(sender_id, receiver_id, bucket)));
        if entry.0 != bucket {
            *entry = (bucket, derive_session_key(sender_id, receiver_id, bucket));
        }
        entry.1
    }

    pub fn session_key(&self, sender_id: &str, receiver_id: &str) -> Option<SessionKey> {
        self.sessions
            .lock()
            .unwrap()
            .get(&(sender_id.to_string(), receiver_id.to_string()))
            .map(|(_, key)| *key)
    }

    /// Authenticate the caller, sign the message, and place it in the queue.
    /// Returns the message id.
    pub fn send_message(&self, mut message: Message, token: &AuthToken) -> Result<String> {
        let agent_id = self
            .auth
            .validate_authentication(&token.token, &["a2a:messaging"])?;
        if agent_id != message.sender_id {
            return Err(A2aError::AuthFailure(format!(
                "token for {agent_id} cannot send as {}",
                message.sender_id
            )));
        }

        let signature = self.signer.sign_message(&message)?;
        message.set_signature(signature);
        let message_id = message.message_id.clone();
        self.queue.enqueue(message)?;
        Ok(message_id)
    }

    /// Sign a message and seal it under the pair's session key for the
    /// current bucket. The envelope timestamp carries that bucket to the
    /// opener; the detached signature travels in the envelope metadata.
    pub fn seal_message(&self, message: &Message) -> Result<EncryptedMessage> {
        let now = Utc::now();
        let session_key =
            self.session_key_for(&message.sender_id, &message.receiver_id, bucket_for(&now));

        let signature = self.signer.sign_message(message)?;
        let mut envelope = self.encryptor.encrypt_message(message, &session_key)?;
        // The opener re-derives the key from this timestamp's bucket, so it
        // must be the one the key was derived for.
        envelope.timestamp = now;
        envelope.set_signature(signature);
        Ok(envelope)
    }

    /// Open a sealed envelope and verify the inner message's signature.
    /// Returns `None` (drop) on any decryption or verification failure.
    pub fn open_envelope(&self, envelope: &EncryptedMessage) -> Option<Message> {
        // Derivation is deterministic, so the envelope's own bucket always
        // names the right key; no handshake and no cache consultation.
        let session_key = derive_session_key(
            &envelope.sender_id,
            &envelope.receiver_id,
            bucket_for(&envelope.timestamp),
        );

        let mut message = self.encryptor.decrypt_message(envelope, &session_key)?;

        let Some(signature) = envelope.signature().map(str::to_string) else {
            warn!(sender_id = %envelope.sender_id, "sealed envelope without signature, dropping");
            return None;
        };
        if !self.signer.verify_message_signature(&message, &signature) {
            warn!(sender_id = %envelope.sender_id, "sealed envelope signature invalid, dropping");
            return None;
        }

        message.set_signature(signature);
        Some(message)
    }

    /// Place an already-verified inbound message into the local queue.
    pub fn enqueue_inbound(&self, message: Message) -> Result<()> {
        self.queue.enqueue(message)
    }

    /// Authenticate the caller and drain its mailbox, dropping messages whose
    /// signatures do not verify.
    pub fn receive_messages(&self, agent_id: &str, token: &AuthToken) -> Result<Vec<Message>> {
        let authenticated = self
            .auth
            .validate_authentication(&token.token, &["a2a:messaging"])?;
        if authenticated != agent_id {
            return Err(A2aError::AuthFailure(format!(
                "token for {authenticated} cannot receive as {agent_id}"
            )));
        }

        let messages = self.queue.dequeue_for_agent(agent_id);
        let mut verified = Vec::with_capacity(messages.len());
        for message in messages {
            match message.signature() {
                Some(signature) if self.signer.verify_message_signature(&message, signature) => {
                    verified.push(message);
                }
                _ => {
                    warn!(
                        message_id = %message.message_id,
                        sender_id = %message.sender_id,
                        "invalid signature, dropping message"
                    );
                }
            }
        }
        Ok(verified)
    }
}
