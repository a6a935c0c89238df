use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use mesh_a2a_core::{A2aError, Message, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::{tls, InboundHandler};

/// Frames exchanged on the persistent stream, JSON-encoded as text.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Auth {
        token: String,
    },
    AuthResponse {
        authenticated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    Message {
        data: Message,
    },
    Broadcast {
        data: Message,
        auth_token: String,
    },
    MessageResponse {
        status: String,
        message_id: String,
    },
}

type ConnectionMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<WsMessage>>>>;

/// A running stream server and its live connection table.
pub struct StreamServer {
    local_addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
    connections: ConnectionMap,
}

impl StreamServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// True once the accept loop has exited, normally or not.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
        self.connections.lock().unwrap().clear();
    }
}

/// Bind and serve the framed stream protocol.
///
/// The first client frame must be `{"type":"auth","token":…}`; everything
/// before a successful auth response is refused. Broadcast frames fan out to
/// every other live connection; peers whose pipe is gone are pruned.
pub async fn start_stream_server(
    config: &TransportConfig,
    handler: Arc<dyn InboundHandler>,
) -> Result<StreamServer> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(A2aError::transport)?;
    let local_addr = listener.local_addr().map_err(A2aError::transport)?;
    let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));

    let acceptor = if config.ssl_enabled {
        Some(TlsAcceptor::from(tls::server_config_from(
            config,
            &[b"http/1.1"],
        )?))
    } else {
        None
    };

    let accept_connections = connections.clone();
    let handle = tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "stream accept failed");
                    continue;
                }
            };
            let handler = handler.clone();
            let connections = accept_connections.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let result = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            handle_connection(tls_stream, handler, connections).await
                        }
                        Err(e) => {
                            debug!(%peer, error = %e, "tls handshake failed");
                            return;
                        }
                    },
                    None => handle_connection(stream, handler, connections).await,
                };
                if let Err(e) = result {
                    debug!(%peer, error = %e, "stream connection closed");
                }
            });
        }
    });

    info!(%local_addr, "stream transport listening");
    Ok(StreamServer {
        local_addr,
        handle,
        connections,
    })
}

async fn handle_connection<S>(
    stream: S,
    handler: Arc<dyn InboundHandler>,
    connections: ConnectionMap,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(A2aError::transport)?;
    let (mut sink, mut source) = ws.split();

    // Writer task: everything outbound funnels through one channel so the
    // broadcast path and the reply path cannot interleave partial frames.
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut authenticated: Option<String> = None;
    while let Some(frame) = source.next().await {
        let frame = frame.map_err(A2aError::transport)?;
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Frame>(text.as_str()) else {
            debug!("unparsable stream frame, ignoring");
            continue;
        };

        match frame {
            Frame::Auth { token } => match handler.authenticate(&token).await {
                Ok(agent_id) => {
                    connections
                        .lock()
                        .unwrap()
                        .insert(agent_id.clone(), tx.clone());
                    authenticated = Some(agent_id.clone());
                    send_frame(
                        &tx,
                        &Frame::AuthResponse {
                            authenticated: true,
                            agent_id: Some(agent_id),
                        },
                    );
                }
                Err(e) => {
                    warn!(error = %e, "stream authentication failed");
                    send_frame(
                        &tx,
                        &Frame::AuthResponse {
                            authenticated: false,
                            agent_id: None,
                        },
                    );
                    break;
                }
            },
            Frame::Message { data } => {
                let Some(agent_id) = &authenticated else {
                    break;
                };
                match handler.on_message(data, agent_id).await {
                    Ok(message_id) => send_frame(
                        &tx,
                        &Frame::MessageResponse {
                            status: "accepted".to_string(),
                            message_id,
                        },
                    ),
                    Err(e) => {
                        warn!(error = %e, "stream message rejected");
                        send_frame(
                            &tx,
                            &Frame::MessageResponse {
                                status: "rejected".to_string(),
                                message_id: String::new(),
                            },
                        );
                    }
                }
            }
            Frame::Broadcast { data, auth_token } => {
                if handler.authenticate(&auth_token).await.is_err() {
                    warn!("broadcast frame with invalid token, dropping");
                    continue;
                }
                let message_id = data.message_id.clone();
                fan_out(&connections, authenticated.as_deref(), &data);
                send_frame(
                    &tx,
                    &Frame::MessageResponse {
                        status: "accepted".to_string(),
                        message_id,
                    },
                );
            }
            Frame::AuthResponse { .. } | Frame::MessageResponse { .. } => {
                // Server-to-client frames; a client echoing them is ignored.
            }
        }
    }

    if let Some(agent_id) = authenticated {
        connections.lock().unwrap().remove(&agent_id);
    }
    writer.abort();
    Ok(())
}

/// Deliver a broadcast to every live connection except the sender, pruning
/// peers whose channel is gone.
fn fan_out(connections: &ConnectionMap, sender: Option<&str>, message: &Message) {
    let frame = Frame::Message {
        data: message.clone(),
    };
    let Ok(encoded) = serde_json::to_string(&frame) else {
        return;
    };
    let mut connections = connections.lock().unwrap();
    connections.retain(|agent_id, tx| {
        if Some(agent_id.as_str()) == sender {
            return true;
        }
        tx.send(WsMessage::Text(encoded.clone().into())).is_ok()
    });
}

fn send_frame(tx: &mpsc::UnboundedSender<WsMessage>, frame: &Frame) {
    if let Ok(encoded) = serde_json::to_string(frame) {
        let _ = tx.send(WsMessage::Text(encoded.into()));
    }
}

/// Client half of the stream transport. Reconnection is the caller's
/// responsibility.
pub struct StreamClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    agent_id: String,
}

impl StreamClient {
    /// Connect and authenticate. The URL is `ws://host:port`.
    pub async fn connect(url: &str, token: &str) -> Result<Self> {
        let (mut ws, _) = connect_async(url).await.map_err(A2aError::transport)?;

        let auth = Frame::Auth {
            token: token.to_string(),
        };
        ws.send(WsMessage::Text(
            serde_json::to_string(&auth)?.into(),
        ))
        .await
        .map_err(A2aError::transport)?;

        while let Some(frame) = ws.next().await {
            let frame = frame.map_err(A2aError::transport)?;
            let WsMessage::Text(text) = frame else {
                continue;
            };
            match serde_json::from_str::<Frame>(text.as_str()) {
                Ok(Frame::AuthResponse {
                    authenticated: true,
                    agent_id: Some(agent_id),
                }) => return Ok(Self { ws, agent_id }),
                Ok(Frame::AuthResponse { .. }) => {
                    return Err(A2aError::AuthFailure(
                        "stream authentication refused".to_string(),
                    ));
                }
                _ => continue,
            }
        }
        Err(A2aError::transport("connection closed during auth"))
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Send a message frame and await the server's response frame. Returns
    /// the accepted message id.
    pub async fn send_message(&mut self, message: &Message) -> Result<String> {
        let frame = Frame::Message {
            data: message.clone(),
        };
        self.ws
            .send(WsMessage::Text(serde_json::to_string(&frame)?.into()))
            .await
            .map_err(A2aError::transport)?;

        while let Some(frame) = self.ws.next().await {
            let frame = frame.map_err(A2aError::transport)?;
            let WsMessage::Text(text) = frame else {
                continue;
            };
            match serde_json::from_str::<Frame>(text.as_str()) {
                Ok(Frame::MessageResponse {
                    status,
                    message_id,
                }) => {
                    if status == "accepted" {
                        return Ok(message_id);
                    }
                    return Err(A2aError::transport("message rejected by server"));
                }
                _ => continue,
            }
        }
        Err(A2aError::transport("connection closed awaiting response"))
    }

    /// Send a broadcast frame; the server fans it out to all live peers.
    pub async fn broadcast(&mut self, message: &Message, token: &str) -> Result<String> {
        let frame = Frame::Broadcast {
            data: message.clone(),
            auth_token: token.to_string(),
        };
        self.ws
            .send(WsMessage::Text(serde_json::to_string(&frame)?.into()))
            .await
            .map_err(A2aError::transport)?;

        while let Some(frame) = self.ws.next().await {
            let frame = frame.map_err(A2aError::transport)?;
            let WsMessage::Text(text) = frame else {
                continue;
            };
            if let Ok(Frame::MessageResponse { message_id, .. }) =
                serde_json::from_str::<Frame>(text.as_str())
            {
                return Ok(message_id);
            }
        }
        Err(A2aError::transport("connection closed awaiting response"))
    }

    /// Await the next message frame pushed by the server (e.g. a broadcast).
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        while let Some(frame) = self.ws.next().await {
            let frame = frame.map_err(A2aError::transport)?;
            let WsMessage::Text(text) = frame else {
                continue;
            };
            if let Ok(Frame::Message { data }) = serde_json::from_str::<Frame>(text.as_str()) {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}
