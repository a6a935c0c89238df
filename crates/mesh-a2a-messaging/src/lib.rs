//! Message construction, signing, end-to-end encryption, routing, and the
//! per-agent mailbox queue.
//!
//! The send path signs (and optionally seals) outbound messages; the receive
//! path verifies before a message becomes observable to handlers. A message
//! with a bad signature is as if it was never sent.

mod encryptor;
mod queue;
mod router;
mod service;
mod session;
mod signer;

pub use encryptor::MessageEncryptor;
pub use queue::{MessageQueue, DEFAULT_QUEUE_CAPACITY};
pub use router::MessageRouter;
pub use service::MessagingService;
pub use session::{bucket_for, derive_session_key, SessionKey, SESSION_BUCKET_SECONDS};
pub use signer::MessageSigner;
