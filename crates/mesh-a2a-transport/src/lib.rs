//! Authenticated delivery of messages between agent endpoints.
//!
//! Two interchangeable transports, selected per agent at start: request and
//! response over HTTP (`http2`) and a persistent framed stream (`stream`).
//! Both enforce the bearer token before touching the body and hand verified
//! traffic to the runtime through [`InboundHandler`].

use async_trait::async_trait;
use mesh_a2a_core::{A2aError, EncryptedMessage, Message};

mod config;
mod http2;
mod stream;
mod tls;

pub use config::{TransportConfig, TransportProtocol};
pub use http2::{start_http_server, Http2Server, Http2Transport};
pub use stream::{start_stream_server, StreamClient, StreamServer};

/// Server-side seam implemented by the agent runtime.
///
/// `authenticate` runs before the body is parsed; its failure surfaces as
/// `401`. Handler failures other than auth surface as `500`.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Validate a bearer token and return the authenticated agent id.
    async fn authenticate(&self, token: &str) -> Result<String, A2aError>;

    /// Consume an inbound plain message; returns the accepted message id.
    async fn on_message(&self, message: Message, agent_id: &str) -> Result<String, A2aError>;

    /// Consume an inbound sealed envelope; returns the accepted message id.
    async fn on_encrypted(
        &self,
        envelope: EncryptedMessage,
        agent_id: &str,
    ) -> Result<String, A2aError>;
}
