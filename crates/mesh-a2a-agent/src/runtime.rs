use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mesh_a2a_auth::{AuthConfig, AuthManager, AuthMethod, AuthToken};
use mesh_a2a_core::{A2aError, EncryptedMessage, Message, Result};
use mesh_a2a_discovery::{
    AgentRecord, AgentStatus, DiscoveryConfig, DiscoveryService, RegistryStats, ServiceQuery,
};
use mesh_a2a_identity::{AgentIdentity, IdentityStore};
use mesh_a2a_messaging::MessagingService;
use mesh_a2a_transport::{
    start_http_server, start_stream_server, Http2Server, Http2Transport, InboundHandler,
    StreamClient, StreamServer, TransportProtocol,
};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::handlers::{DiscoveryRequestHandler, MessageHandler, PingHandler};

const POLL_QUANTUM: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

enum ServerHandle {
    Http(Http2Server),
    Stream(StreamServer),
}

impl ServerHandle {
    fn local_addr(&self) -> SocketAddr {
        match self {
            ServerHandle::Http(server) => server.local_addr(),
            ServerHandle::Stream(server) => server.local_addr(),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            ServerHandle::Http(server) => !server.is_finished(),
            ServerHandle::Stream(server) => !server.is_finished(),
        }
    }

    fn shutdown(&self) {
        match self {
            ServerHandle::Http(server) => server.shutdown(),
            ServerHandle::Stream(server) => server.shutdown(),
        }
    }
}

/// A runnable A2A agent: identity + auth + messaging + discovery + transport.
pub struct AgentRuntime {
    /// Back-reference for handler dispatch tasks and the transport bridge.
    self_ref: Weak<AgentRuntime>,
    config: AgentConfig,
    identity_store: Arc<IdentityStore>,
    auth: Arc<AuthManager>,
    messaging: Arc<MessagingService>,
    discovery: Arc<DiscoveryService>,
    http: Http2Transport,
    state: Mutex<RunState>,
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    identity: RwLock<Option<AgentIdentity>>,
    auth_token: RwLock<Option<AuthToken>>,
    server: Mutex<Option<ServerHandle>>,
    heartbeat_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AgentRuntime {
    /// Build a runtime with its own identity store, auth manager, and
    /// discovery service rooted at the configured identity directory.
    pub fn new(config: AgentConfig) -> Result<Arc<Self>> {
        let identity_store = Arc::new(IdentityStore::new(&config.identity_dir)?);

        let mut auth_config = AuthConfig::default();
        if let Some(lifetime) = std::env::var("A2A_TOKEN_LIFETIME_S")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            auth_config.token_lifetime_s = lifetime;
        }
        let auth = Arc::new(AuthManager::new(identity_store.clone(), auth_config)?);

        let mut discovery_config = DiscoveryConfig::default();
        if let Ok(path) = std::env::var("A2A_REGISTRY_FILE") {
            discovery_config.registry_file = Some(path.into());
        }
        let discovery = Arc::new(DiscoveryService::new(discovery_config));

        Self::with_services(config, identity_store, auth, discovery)
    }

    /// Build a runtime over shared services, so co-located agents see one
    /// registry and validate each other's tokens and signatures.
    pub fn with_services(
        config: AgentConfig,
        identity_store: Arc<IdentityStore>,
        auth: Arc<AuthManager>,
        discovery: Arc<DiscoveryService>,
    ) -> Result<Arc<Self>> {
        let messaging = Arc::new(MessagingService::new(
            identity_store.clone(),
            auth.clone(),
            config.queue_capacity,
        ));
        let http = Http2Transport::new(&config.transport)?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            identity_store,
            auth,
            messaging,
            discovery,
            http,
            state: Mutex::new(RunState::Uninitialized),
            handlers: RwLock::new(HashMap::new()),
            identity: RwLock::new(None),
            auth_token: RwLock::new(None),
            server: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
        }))
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    pub fn messaging(&self) -> &Arc<MessagingService> {
        &self.messaging
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == RunState::Running
    }

    /// Load or create the identity, mint the auth token, register with
    /// discovery as `initializing`, and install the default handlers.
    pub fn initialize(&self) -> Result<()> {
        let agent_id = &self.config.agent_id;

        let identity = match self.identity_store.get_identity(agent_id)? {
            Some(identity) => identity,
            None => {
                info!(agent_id, "creating new identity");
                let mut metadata = Map::new();
                metadata.insert("agent_type".to_string(), json!("a2a_agent"));
                metadata.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
                self.identity_store.create_identity(
                    agent_id,
                    self.config.capabilities.clone(),
                    metadata,
                    self.config.validity_days,
                )?
            }
        };

        let token = self.auth.authenticate_agent(
            agent_id,
            AuthMethod::Jwt,
            Some(vec!["a2a:messaging".to_string(), "a2a:discovery".to_string()]),
        )?;

        let mut record = AgentRecord::new(
            agent_id,
            &identity.did,
            self.config.capabilities.clone(),
            vec![self
                .config
                .transport
                .endpoint_url(self.config.transport.port)],
        );
        record.status = AgentStatus::Initializing;
        record.ttl = self.discovery.default_ttl_s();
        self.discovery.register_agent(record)?;

        *self.identity.write().unwrap() = Some(identity);
        *self.auth_token.write().unwrap() = Some(token);

        self.register_message_handler("ping", Arc::new(PingHandler));
        self.register_message_handler(
            "discovery_request",
            Arc::new(DiscoveryRequestHandler::new(self.discovery.clone())),
        );

        *self.state.lock().unwrap() = RunState::Initialized;
        info!(agent_id, "agent initialized");
        Ok(())
    }

    /// Start the transport server and the discovery sweeper, then go active.
    pub async fn start(&self) -> Result<()> {
        if *self.state.lock().unwrap() != RunState::Initialized {
            return Err(A2aError::AuthFailure(
                "agent must be initialized before start".to_string(),
            ));
        }

        let bridge: Arc<dyn InboundHandler> = Arc::new(InboundBridge {
            runtime: self.self_ref.clone(),
        });
        let server = match self.config.transport.protocol {
            TransportProtocol::Http2 => {
                ServerHandle::Http(start_http_server(&self.config.transport, bridge).await?)
            }
            TransportProtocol::Stream => {
                ServerHandle::Stream(start_stream_server(&self.config.transport, bridge).await?)
            }
        };
        let bound_port = server.local_addr().port();
        *self.server.lock().unwrap() = Some(server);

        // Re-register with the actually bound endpoint; the configured port
        // may have been 0.
        let identity = self
            .identity
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| A2aError::IdentityMissing(self.config.agent_id.clone()))?;
        let mut record = AgentRecord::new(
            &self.config.agent_id,
            &identity.did,
            identity.capabilities.clone(),
            vec![self.config.transport.endpoint_url(bound_port)],
        );
        record.ttl = self.discovery.default_ttl_s();
        self.discovery.register_agent(record)?;

        self.discovery.clone().start();

        // Periodic heartbeat keeps the record inside its TTL.
        let discovery = self.discovery.clone();
        let agent_id = self.config.agent_id.clone();
        let interval = Duration::from_secs(self.config.transport.heartbeat_interval_s);
        *self.heartbeat_task.lock().unwrap() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                discovery.heartbeat(&agent_id);
            }
        }));

        *self.state.lock().unwrap() = RunState::Running;
        info!(agent_id = %self.config.agent_id, port = bound_port, "agent started");
        Ok(())
    }

    /// Go inactive and shut down the transport and sweeper. The auth token is
    /// not revoked; it lapses at expiry. The mailbox is not drained.
    pub fn stop(&self) {
        self.discovery
            .update_agent_status(&self.config.agent_id, AgentStatus::Inactive);
        if let Some(server) = self.server.lock().unwrap().take() {
            server.shutdown();
        }
        if let Some(heartbeat) = self.heartbeat_task.lock().unwrap().take() {
            heartbeat.abort();
        }
        self.discovery.stop();
        *self.state.lock().unwrap() = RunState::Stopped;
        info!(agent_id = %self.config.agent_id, "agent stopped");
    }

    /// Send a typed message to another agent, discovered by id. Returns the
    /// message id, or `None` when the receiver is unknown or the transport
    /// fails; callers treat both uniformly.
    pub async fn send_message(
        &self,
        receiver_id: &str,
        message_type: &str,
        payload: Map<String, Value>,
        correlation_id: Option<&str>,
    ) -> Option<String> {
        if !self.is_running() {
            warn!("send_message on a runtime that is not running");
            return None;
        }
        let mut message = Message::new(
            &self.config.agent_id,
            receiver_id,
            message_type,
            payload,
        );
        if let Some(correlation_id) = correlation_id {
            message.correlation_id = Some(correlation_id.to_string());
        }
        self.transmit(message).await
    }

    /// Seal a message under the pair session key and send it to the
    /// receiver's encrypted endpoint.
    pub async fn send_encrypted_message(
        &self,
        receiver_id: &str,
        message_type: &str,
        payload: Map<String, Value>,
    ) -> Option<String> {
        if !self.is_running() {
            warn!("send_encrypted_message on a runtime that is not running");
            return None;
        }
        let token = self.auth_token.read().unwrap().clone()?;
        let message = Message::new(&self.config.agent_id, receiver_id, message_type, payload);

        let envelope = match self.messaging.seal_message(&message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "failed to seal message");
                return None;
            }
        };

        let endpoint = self.endpoint_for(receiver_id)?;
        if endpoint.starts_with("ws://") {
            warn!(receiver_id, "sealed envelopes require the http transport");
            return None;
        }
        match self
            .http
            .send_encrypted_message(&envelope, &format!("{endpoint}/encrypted"), &token.token)
            .await
        {
            Ok(_) => Some(message.message_id),
            Err(e) => {
                warn!(receiver_id, error = %e, "failed to send encrypted message");
                None
            }
        }
    }

    /// Drain this agent's mailbox. Not running means nothing to receive.
    pub fn receive_messages(&self) -> Result<Vec<Message>> {
        if !self.is_running() {
            return Ok(Vec::new());
        }
        let token = self
            .auth_token
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| A2aError::AuthFailure("agent has no auth token".to_string()))?;
        self.messaging
            .receive_messages(&self.config.agent_id, &token)
    }

    /// Poll the mailbox for a message of the given type (any type when
    /// `None`) until the deadline, on a 100 ms quantum. Messages of other
    /// types are put back.
    pub async fn wait_for_message(
        &self,
        message_type: Option<&str>,
        timeout: Duration,
    ) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let messages = self.receive_messages().unwrap_or_default();
            let mut found = None;
            for message in messages {
                let matches = message_type
                    .map(|wanted| message.message_type == wanted)
                    .unwrap_or(true);
                if found.is_none() && matches {
                    found = Some(message);
                } else if let Err(e) = self.messaging.enqueue_inbound(message) {
                    warn!(error = %e, "failed to requeue message while waiting");
                }
            }
            if found.is_some() {
                return found;
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(POLL_QUANTUM).await;
        }
    }

    /// Register a typed handler; responses it returns are transmitted back
    /// to the sender with the correlation id set.
    pub fn register_message_handler(&self, message_type: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .unwrap()
            .insert(message_type.to_string(), handler);
        self.messaging
            .router()
            .register_handler(message_type, &self.config.agent_id);
    }

    pub fn unregister_message_handler(&self, message_type: &str) {
        self.handlers.write().unwrap().remove(message_type);
        self.messaging
            .router()
            .unregister_handler(message_type, &self.config.agent_id);
    }

    pub fn discover_agents(
        &self,
        capabilities: Option<Vec<String>>,
        max_results: usize,
    ) -> Vec<AgentRecord> {
        let query = ServiceQuery {
            capabilities,
            max_results,
            ..ServiceQuery::default()
        };
        self.discovery.discover_agents(&query)
    }

    pub fn get_agent_info(&self, agent_id: &str) -> Option<AgentRecord> {
        self.discovery.get_agent_record(agent_id)
    }

    /// Update the identity's capability set and re-register with discovery.
    pub fn update_capabilities(&self, capabilities: Vec<String>) -> Result<()> {
        self.identity_store
            .update_capabilities(&self.config.agent_id, capabilities.clone())?;
        if let Some(identity) = self.identity.write().unwrap().as_mut() {
            identity.capabilities = capabilities.clone();
        }
        if let Some(mut record) = self.discovery.get_agent_record(&self.config.agent_id) {
            record.capabilities = capabilities;
            self.discovery.register_agent(record)?;
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> bool {
        self.discovery.heartbeat(&self.config.agent_id)
    }

    /// Fan a message out to every agent matching the capability filter,
    /// excluding this agent. Returns the ids of the messages sent.
    pub async fn broadcast_message(
        &self,
        message_type: &str,
        payload: Map<String, Value>,
        capabilities: Option<Vec<String>>,
    ) -> Vec<String> {
        let agents = self.discover_agents(capabilities, 50);
        let mut sent = Vec::new();
        for agent in agents {
            if agent.agent_id == self.config.agent_id {
                continue;
            }
            if let Some(message_id) = self
                .send_message(&agent.agent_id, message_type, payload.clone(), None)
                .await
            {
                sent.push(message_id);
            }
        }
        sent
    }

    /// Ping an agent and await the correlated pong.
    pub async fn ping(&self, agent_id: &str) -> bool {
        let mut payload = Map::new();
        payload.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        let Some(message_id) = self.send_message(agent_id, "ping", payload, None).await else {
            return false;
        };
        match self
            .wait_for_message(Some("response"), Duration::from_secs(10))
            .await
        {
            Some(response) => {
                response.correlation_id.as_deref() == Some(message_id.as_str())
                    && response.payload.get("status") == Some(&json!("pong"))
            }
            None => false,
        }
    }

    /// Health snapshot across the runtime's subsystems.
    pub fn health_check(&self) -> Value {
        let capabilities = self
            .identity
            .read()
            .unwrap()
            .as_ref()
            .map(|identity| identity.capabilities.clone())
            .unwrap_or_else(|| self.config.capabilities.clone());
        let stats: RegistryStats = self.discovery.get_registry_stats();
        let transport_healthy = self
            .server
            .lock()
            .unwrap()
            .as_ref()
            .map(ServerHandle::is_alive)
            .unwrap_or(false);

        json!({
            "agent_id": self.config.agent_id,
            "running": self.is_running(),
            "capabilities": capabilities,
            "timestamp": Utc::now(),
            "discovery_healthy": true,
            "discovery_stats": stats,
            "transport_healthy": transport_healthy,
            "messaging_healthy": true,
            "queue_size": self.messaging.queue_size(),
        })
    }

    /// Sign and deliver a prepared message to its receiver's endpoint.
    async fn transmit(&self, mut message: Message) -> Option<String> {
        let token = self.auth_token.read().unwrap().clone()?;
        let endpoint = self.endpoint_for(&message.receiver_id)?;

        match self.messaging.signer().sign_message(&message) {
            Ok(signature) => message.set_signature(signature),
            Err(e) => {
                warn!(error = %e, "failed to sign message");
                return None;
            }
        }
        if message.message_type != "response" {
            self.messaging.router().store_pending(message.clone());
        }
        let message_id = message.message_id.clone();

        let delivery = if endpoint.starts_with("ws://") {
            match StreamClient::connect(&endpoint, &token.token).await {
                Ok(mut client) => client.send_message(&message).await.map(|_| ()),
                Err(e) => Err(e),
            }
        } else {
            self.http
                .send_message(&message, &format!("{endpoint}/message"), &token.token)
                .await
                .map(|_| ())
        };

        match delivery {
            Ok(()) => {
                debug!(receiver_id = %message.receiver_id, message_id, "message sent");
                Some(message_id)
            }
            Err(e) => {
                warn!(receiver_id = %message.receiver_id, error = %e, "failed to send message");
                None
            }
        }
    }

    fn endpoint_for(&self, receiver_id: &str) -> Option<String> {
        let records = self
            .discovery
            .discover_agents(&ServiceQuery::by_agent_id(receiver_id));
        let Some(record) = records.into_iter().next() else {
            warn!(receiver_id, "receiver not found in discovery");
            return None;
        };
        record.endpoints.first().cloned()
    }

    /// Verify, correlate, enqueue, and dispatch an inbound plain message. A
    /// failed signature drops the message while still acknowledging the
    /// transport request, so senders cannot distinguish a drop.
    async fn handle_inbound_plain(&self, message: Message) -> Result<String> {
        let message_id = message.message_id.clone();
        let verified = message
            .signature()
            .map(|signature| {
                self.messaging
                    .signer()
                    .verify_message_signature(&message, signature)
            })
            .unwrap_or(false);
        if !verified {
            warn!(
                message_id,
                sender_id = %message.sender_id,
                "invalid signature, dropping message"
            );
            return Ok(message_id);
        }

        if let Some(correlation_id) = &message.correlation_id {
            self.messaging.router().take_pending(correlation_id);
        }
        self.messaging.enqueue_inbound(message.clone())?;
        self.dispatch(message);
        Ok(message_id)
    }

    /// Open a sealed envelope, then follow the plain inbound path. A failed
    /// decryption is dropped silently.
    async fn handle_inbound_sealed(&self, envelope: EncryptedMessage) -> Result<String> {
        let Some(message) = self.messaging.open_envelope(&envelope) else {
            return Ok(String::new());
        };
        let message_id = message.message_id.clone();
        if let Some(correlation_id) = &message.correlation_id {
            self.messaging.router().take_pending(correlation_id);
        }
        self.messaging.enqueue_inbound(message.clone())?;
        self.dispatch(message);
        Ok(message_id)
    }

    /// Invoke the registered handler for the message type, transmitting any
    /// response it returns.
    fn dispatch(&self, message: Message) {
        let handler = self
            .handlers
            .read()
            .unwrap()
            .get(&message.message_type)
            .cloned();
        let Some(handler) = handler else {
            debug!(message_type = %message.message_type, "no handler registered");
            return;
        };
        let Some(token) = self.auth_token.read().unwrap().clone() else {
            return;
        };
        let Some(runtime) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            match handler.handle(&message, &token).await {
                Ok(Some(payload)) => {
                    let response = message.create_response(payload);
                    if runtime.transmit(response).await.is_none() {
                        warn!(
                            correlation_id = %message.message_id,
                            "failed to transmit handler response"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        message_id = %message.message_id,
                        error = %e,
                        "message handler failed"
                    );
                }
            }
        });
    }
}

/// Adapter handing transport-inbound traffic to the runtime. Holds a weak
/// reference so a dropped runtime refuses traffic instead of leaking.
struct InboundBridge {
    runtime: Weak<AgentRuntime>,
}

impl InboundBridge {
    fn runtime(&self) -> std::result::Result<Arc<AgentRuntime>, A2aError> {
        self.runtime
            .upgrade()
            .ok_or_else(|| A2aError::AuthFailure("agent is shutting down".to_string()))
    }
}

#[async_trait]
impl InboundHandler for InboundBridge {
    async fn authenticate(&self, token: &str) -> std::result::Result<String, A2aError> {
        self.runtime()?
            .auth
            .validate_authentication(token, &["a2a:messaging"])
    }

    async fn on_message(
        &self,
        message: Message,
        _agent_id: &str,
    ) -> std::result::Result<String, A2aError> {
        self.runtime()?.handle_inbound_plain(message).await
    }

    async fn on_encrypted(
        &self,
        envelope: EncryptedMessage,
        _agent_id: &str,
    ) -> std::result::Result<String, A2aError> {
        self.runtime()?.handle_inbound_sealed(envelope).await
    }
}
