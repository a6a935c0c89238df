use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use mesh_a2a_core::{A2aError, EncryptedMessage, Message, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::{tls, InboundHandler};

/// HTTP client half: posts messages and sealed envelopes to agent endpoints.
pub struct Http2Transport {
    client: reqwest::Client,
}

impl Http2Transport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .pool_max_idle_per_host(config.max_connections);
        if config.ssl_enabled {
            // Peers present self-issued certificates; no CA chain to walk.
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(A2aError::transport)?;
        Ok(Self { client })
    }

    /// POST a message to `target_url`. Non-2xx responses and I/O failures
    /// surface as `Transport`; there is no automatic retry.
    pub async fn send_message(
        &self,
        message: &Message,
        target_url: &str,
        token: &str,
    ) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .post(target_url)
            .bearer_auth(token)
            .header("A2A-Message-Type", &message.message_type)
            .header("A2A-Sender", &message.sender_id)
            .header("A2A-Receiver", &message.receiver_id)
            .json(message);
        if let Some(correlation_id) = &message.correlation_id {
            request = request.header("A2A-Correlation-ID", correlation_id);
        }

        let response = request.send().await.map_err(A2aError::transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(A2aError::Transport(format!(
                "{target_url} responded {status}: {body}"
            )));
        }
        response.json().await.map_err(A2aError::transport)
    }

    /// POST a sealed envelope to `target_url`.
    pub async fn send_encrypted_message(
        &self,
        envelope: &EncryptedMessage,
        target_url: &str,
        token: &str,
    ) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(target_url)
            .bearer_auth(token)
            .header("A2A-Encrypted", "true")
            .header("A2A-Sender", &envelope.sender_id)
            .header("A2A-Receiver", &envelope.receiver_id)
            .json(envelope)
            .send()
            .await
            .map_err(A2aError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(A2aError::Transport(format!(
                "{target_url} responded {status}: {body}"
            )));
        }
        response.json().await.map_err(A2aError::transport)
    }
}

/// A running HTTP server bound to its listener.
pub struct Http2Server {
    local_addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl Http2Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once the serve task has exited, normally or not.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

/// Bind and serve `POST /a2a/message` and `POST /a2a/encrypted`.
///
/// Binding to port 0 picks an ephemeral port; read it back from
/// [`Http2Server::local_addr`].
pub async fn start_http_server(
    config: &TransportConfig,
    handler: Arc<dyn InboundHandler>,
) -> Result<Http2Server> {
    let app = build_router(handler);
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(A2aError::transport)?;
    let local_addr = listener.local_addr().map_err(A2aError::transport)?;

    let handle = if config.ssl_enabled {
        let tls_config = tls::server_config_from(config, &[b"h2", b"http/1.1"])?;
        tokio::spawn(serve_tls(listener, TlsAcceptor::from(tls_config), app))
    } else {
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "http server terminated");
            }
        })
    };

    info!(%local_addr, "http transport listening");
    Ok(Http2Server { local_addr, handle })
}

fn build_router(handler: Arc<dyn InboundHandler>) -> Router {
    Router::new()
        .route("/a2a/message", post(handle_plain))
        .route("/a2a/encrypted", post(handle_encrypted))
        .with_state(handler)
}

async fn handle_plain(
    State(handler): State<Arc<dyn InboundHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Authorization is checked before the body is parsed.
    let agent_id = match authenticate(handler.as_ref(), &headers).await {
        Ok(agent_id) => agent_id,
        Err(response) => return response,
    };

    let message: Message = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "malformed message body");
            return error_response(StatusCode::BAD_REQUEST, "malformed message body");
        }
    };

    match handler.on_message(message, &agent_id).await {
        Ok(message_id) => accepted(message_id),
        Err(e) => handler_failure(e),
    }
}

async fn handle_encrypted(
    State(handler): State<Arc<dyn InboundHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let agent_id = match authenticate(handler.as_ref(), &headers).await {
        Ok(agent_id) => agent_id,
        Err(response) => return response,
    };

    let envelope: EncryptedMessage = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "malformed envelope body");
            return error_response(StatusCode::BAD_REQUEST, "malformed envelope body");
        }
    };

    match handler.on_encrypted(envelope, &agent_id).await {
        Ok(message_id) => accepted(message_id),
        Err(e) => handler_failure(e),
    }
}

async fn authenticate(
    handler: &dyn InboundHandler,
    headers: &HeaderMap,
) -> std::result::Result<String, Response> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "missing bearer token",
        ));
    };
    handler.authenticate(token).await.map_err(|e| {
        warn!(error = %e, "request authentication failed");
        error_response(StatusCode::UNAUTHORIZED, "unauthorized")
    })
}

fn accepted(message_id: String) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "status": "accepted", "message_id": message_id })),
    )
        .into_response()
}

fn handler_failure(error: A2aError) -> Response {
    match error {
        A2aError::AuthFailure(_) => error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
        other => {
            error!(error = %other, "inbound handler failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "handler error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, app: Router) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "tls accept failed");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    debug!(%peer, error = %e, "tls handshake failed");
                    return;
                }
            };
            let service = hyper_util::service::TowerToHyperService::new(app);
            let io = hyper_util::rt::TokioIo::new(tls_stream);
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(
                hyper_util::rt::TokioExecutor::new(),
            )
            .serve_connection_with_upgrades(io, service)
            .await
            {
                debug!(%peer, error = %e, "tls connection ended with error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Mutex;

    struct MockHandler {
        received: Mutex<Vec<Message>>,
        envelopes: Mutex<Vec<EncryptedMessage>>,
    }

    impl MockHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                envelopes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InboundHandler for MockHandler {
        async fn authenticate(&self, token: &str) -> std::result::Result<String, A2aError> {
            if token == "good-token" {
                Ok("agent-test".to_string())
            } else {
                Err(A2aError::AuthFailure("bad token".to_string()))
            }
        }

        async fn on_message(
            &self,
            message: Message,
            _agent_id: &str,
        ) -> std::result::Result<String, A2aError> {
            let id = message.message_id.clone();
            self.received.lock().unwrap().push(message);
            Ok(id)
        }

        async fn on_encrypted(
            &self,
            envelope: EncryptedMessage,
            _agent_id: &str,
        ) -> std::result::Result<String, A2aError> {
            self.envelopes.lock().unwrap().push(envelope);
            Ok("sealed".to_string())
        }
    }

    fn test_config() -> TransportConfig {
        TransportConfig {
            port: 0,
            ..TransportConfig::default()
        }
    }

    fn message() -> Message {
        Message::new("agent-a", "agent-b", "ping", Map::new())
    }

    #[tokio::test]
    async fn test_roundtrip_accepted() {
        let handler = MockHandler::new();
        let server = start_http_server(&test_config(), handler.clone())
            .await
            .unwrap();
        let url = format!("http://{}/a2a/message", server.local_addr());

        let transport = Http2Transport::new(&test_config()).unwrap();
        let msg = message().with_correlation_id("corr-9");
        let reply = transport
            .send_message(&msg, &url, "good-token")
            .await
            .unwrap();

        assert_eq!(reply["status"], "accepted");
        assert_eq!(reply["message_id"], msg.message_id.as_str());
        assert_eq!(handler.received.lock().unwrap().len(), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_token_is_401() {
        let handler = MockHandler::new();
        let server = start_http_server(&test_config(), handler.clone())
            .await
            .unwrap();
        let url = format!("http://{}/a2a/message", server.local_addr());

        let transport = Http2Transport::new(&test_config()).unwrap();
        let err = transport
            .send_message(&message(), &url, "wrong-token")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(handler.received.lock().unwrap().is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let handler = MockHandler::new();
        let server = start_http_server(&test_config(), handler.clone())
            .await
            .unwrap();
        let url = format!("http://{}/a2a/message", server.local_addr());

        let response = reqwest::Client::new()
            .post(&url)
            .bearer_auth("good-token")
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let handler = MockHandler::new();
        let server = start_http_server(&test_config(), handler).await.unwrap();
        let url = format!("http://{}/a2a/unknown", server.local_addr());

        let response = reqwest::Client::new()
            .post(&url)
            .bearer_auth("good-token")
            .json(&message())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_encrypted_path() {
        let handler = MockHandler::new();
        let server = start_http_server(&test_config(), handler.clone())
            .await
            .unwrap();
        let url = format!("http://{}/a2a/encrypted", server.local_addr());

        let envelope = EncryptedMessage {
            encrypted_data: "AAAA".to_string(),
            iv: "AAAAAAAAAAAAAAAA".to_string(),
            auth_tag: "AAAAAAAAAAAAAAAAAAAAAA==".to_string(),
            sender_id: "agent-a".to_string(),
            receiver_id: "agent-b".to_string(),
            timestamp: chrono::Utc::now(),
            algorithm: mesh_a2a_core::AES_256_GCM.to_string(),
            metadata: Map::new(),
        };
        let transport = Http2Transport::new(&test_config()).unwrap();
        let reply = transport
            .send_encrypted_message(&envelope, &url, "good-token")
            .await
            .unwrap();

        assert_eq!(reply["status"], "accepted");
        assert_eq!(handler.envelopes.lock().unwrap().len(), 1);
        server.shutdown();
    }
}
