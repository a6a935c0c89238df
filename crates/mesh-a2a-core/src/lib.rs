//! Shared data model for the A2A protocol: messages, sealed envelopes,
//! and the error taxonomy used across all subsystem crates.

mod envelope;
mod error;
mod message;

pub use envelope::{EncryptedMessage, AES_256_GCM};
pub use error::{A2aError, Result, WorkflowError};
pub use message::Message;
