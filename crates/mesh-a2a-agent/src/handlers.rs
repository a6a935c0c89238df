use std::sync::Arc;

use async_trait::async_trait;
use mesh_a2a_auth::AuthToken;
use mesh_a2a_core::{Message, Result};
use mesh_a2a_discovery::{DiscoveryService, ServiceQuery};
use serde_json::{json, Map, Value};
use tracing::debug;

/// A typed message handler.
///
/// Returning a payload makes the runtime build a correlated response and
/// transmit it back to the sender on the same transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: &Message,
        token: &AuthToken,
    ) -> Result<Option<Map<String, Value>>>;
}

/// Default handler for `ping`: responds `{"status":"pong"}`.
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(
        &self,
        message: &Message,
        _token: &AuthToken,
    ) -> Result<Option<Map<String, Value>>> {
        debug!(sender_id = %message.sender_id, "received ping");
        let mut payload = Map::new();
        payload.insert("status".to_string(), Value::String("pong".to_string()));
        Ok(Some(payload))
    }
}

/// Default handler for `discovery_request`: runs the embedded query and
/// responds with the matching agent records.
pub struct DiscoveryRequestHandler {
    discovery: Arc<DiscoveryService>,
}

impl DiscoveryRequestHandler {
    pub fn new(discovery: Arc<DiscoveryService>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl MessageHandler for DiscoveryRequestHandler {
    async fn handle(
        &self,
        message: &Message,
        _token: &AuthToken,
    ) -> Result<Option<Map<String, Value>>> {
        let query = message
            .payload
            .get("query")
            .and_then(|raw| serde_json::from_value::<ServiceQuery>(raw.clone()).ok())
            .unwrap_or_default();
        let agents = self.discovery.discover_agents(&query);

        let mut payload = Map::new();
        payload.insert("agents".to_string(), json!(agents));
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mesh_a2a_discovery::{AgentRecord, DiscoveryConfig};

    fn token() -> AuthToken {
        AuthToken {
            token: "t".to_string(),
            token_type: "JWT".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            agent_id: "agent-a".to_string(),
            permissions: vec![],
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_ping_handler_pongs() {
        let message = Message::new("agent-a", "agent-b", "ping", Map::new());
        let payload = PingHandler
            .handle(&message, &token())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["status"], "pong");
    }

    #[tokio::test]
    async fn test_discovery_request_handler() {
        let discovery = Arc::new(DiscoveryService::new(DiscoveryConfig::default()));
        discovery
            .register_agent(AgentRecord::new(
                "bank",
                "did:a2a:bank",
                vec!["banking:accounts".to_string()],
                vec![],
            ))
            .unwrap();

        let mut payload = Map::new();
        payload.insert(
            "query".to_string(),
            json!({"capabilities": ["banking:accounts"]}),
        );
        let message = Message::new("agent-a", "agent-b", "discovery_request", payload);

        let handler = DiscoveryRequestHandler::new(discovery);
        let response = handler.handle(&message, &token()).await.unwrap().unwrap();
        let agents = response["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0]["agent_id"], "bank");
    }
}
