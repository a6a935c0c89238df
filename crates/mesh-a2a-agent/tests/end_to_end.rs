//! Integration tests: runtimes talking over real HTTP servers on ephemeral
//! ports, sharing identity storage and a discovery registry.

use std::sync::Arc;
use std::time::Duration;

use mesh_a2a_agent::{AgentConfig, AgentRuntime};
use mesh_a2a_auth::{AuthConfig, AuthManager};
use mesh_a2a_discovery::{AgentStatus, DiscoveryConfig, DiscoveryService, ServiceQuery};
use mesh_a2a_identity::IdentityStore;
use mesh_a2a_transport::{TransportConfig, TransportProtocol};
use serde_json::{json, Map, Value};

struct TestNet {
    dir: tempfile::TempDir,
    identity_store: Arc<IdentityStore>,
    auth: Arc<AuthManager>,
    discovery: Arc<DiscoveryService>,
}

impl TestNet {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let identity_store = Arc::new(IdentityStore::new(dir.path()).unwrap());
        let auth =
            Arc::new(AuthManager::new(identity_store.clone(), AuthConfig::default()).unwrap());
        let discovery = Arc::new(DiscoveryService::new(DiscoveryConfig::default()));
        Self {
            dir,
            identity_store,
            auth,
            discovery,
        }
    }

    async fn spawn_agent(&self, agent_id: &str, capabilities: &[&str]) -> Arc<AgentRuntime> {
        self.spawn_agent_on(agent_id, capabilities, TransportProtocol::Http2)
            .await
    }

    async fn spawn_agent_on(
        &self,
        agent_id: &str,
        capabilities: &[&str],
        protocol: TransportProtocol,
    ) -> Arc<AgentRuntime> {
        let config = AgentConfig::new(agent_id)
            .with_capabilities(capabilities.iter().map(|c| c.to_string()).collect())
            .with_identity_dir(self.dir.path())
            .with_transport(TransportConfig {
                protocol,
                port: 0,
                ..TransportConfig::default()
            });
        let runtime = AgentRuntime::with_services(
            config,
            self.identity_store.clone(),
            self.auth.clone(),
            self.discovery.clone(),
        )
        .unwrap();
        runtime.initialize().unwrap();
        runtime.start().await.unwrap();
        runtime
    }
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

#[tokio::test]
async fn test_ping_pong() {
    let net = TestNet::new();
    let a = net.spawn_agent("agent-a", &["a2a:messaging"]).await;
    let b = net.spawn_agent("agent-b", &["a2a:messaging"]).await;

    let ping_id = a
        .send_message(
            "agent-b",
            "ping",
            payload(json!({"timestamp": "2025-01-01T00:00:00Z"})),
            None,
        )
        .await
        .expect("ping should send");

    // The ping lands in B's mailbox; the default handler answers it.
    let ping = b
        .wait_for_message(Some("ping"), Duration::from_secs(10))
        .await
        .expect("B should receive the ping");
    assert_eq!(ping.sender_id, "agent-a");
    assert_eq!(ping.message_id, ping_id);

    let pong = a
        .wait_for_message(Some("response"), Duration::from_secs(10))
        .await
        .expect("A should receive the pong");
    assert_eq!(pong.payload["status"], "pong");
    assert_eq!(pong.correlation_id.as_deref(), Some(ping_id.as_str()));
    assert_eq!(pong.sender_id, "agent-b");

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_ping_pong_over_stream_transport() {
    let net = TestNet::new();
    let a = net
        .spawn_agent_on("agent-a", &["a2a:messaging"], TransportProtocol::Stream)
        .await;
    let b = net
        .spawn_agent_on("agent-b", &["a2a:messaging"], TransportProtocol::Stream)
        .await;

    let ping_id = a
        .send_message("agent-b", "ping", Map::new(), None)
        .await
        .expect("ping should send over the stream transport");

    let pong = a
        .wait_for_message(Some("response"), Duration::from_secs(10))
        .await
        .expect("pong should come back over the stream transport");
    assert_eq!(pong.payload["status"], "pong");
    assert_eq!(pong.correlation_id.as_deref(), Some(ping_id.as_str()));

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_ping_convenience() {
    let net = TestNet::new();
    let a = net.spawn_agent("agent-a", &["a2a:messaging"]).await;
    let b = net.spawn_agent("agent-b", &["a2a:messaging"]).await;

    assert!(a.ping("agent-b").await);
    assert!(!a.ping("agent-nobody").await);

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_encrypted_payload_integrity() {
    let net = TestNet::new();
    let a = net.spawn_agent("agent-a", &["a2a:messaging"]).await;
    let b = net.spawn_agent("agent-b", &["a2a:messaging"]).await;

    let secret = json!({
        "account_number": "123456789",
        "balance": 10000.50,
        "secret_info": "confidential"
    });
    a.send_encrypted_message("agent-b", "secure_data", payload(secret.clone()))
        .await
        .expect("encrypted send should succeed");

    let received = b
        .wait_for_message(Some("secure_data"), Duration::from_secs(10))
        .await
        .expect("B should receive the sealed message");
    // Payload survives verbatim, numeric types included.
    assert_eq!(Value::Object(received.payload.clone()), secret);
    assert_eq!(received.sender_id, "agent-a");
    assert_eq!(received.receiver_id, "agent-b");

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_capability_scoped_discovery() {
    let net = TestNet::new();
    let bank = net
        .spawn_agent("bank", &["banking:accounts", "banking:compliance"])
        .await;
    let crypto = net
        .spawn_agent("crypto", &["crypto:trading", "crypto:analysis"])
        .await;
    let orch = net.spawn_agent("orch", &["a2a:orchestration"]).await;

    let banking = orch.discover_agents(Some(vec!["banking:accounts".to_string()]), 50);
    assert_eq!(banking.len(), 1);
    assert_eq!(banking[0].agent_id, "bank");

    let trading = orch.discover_agents(Some(vec!["crypto:trading".to_string()]), 50);
    assert_eq!(trading.len(), 1);
    assert_eq!(trading[0].agent_id, "crypto");

    bank.stop();
    crypto.stop();
    orch.stop();
}

#[tokio::test]
async fn test_broadcast_and_health() {
    let net = TestNet::new();
    let mut agents = Vec::new();
    for i in 0..5 {
        agents.push(net.spawn_agent(&format!("p{i}"), &["perf:test"]).await);
    }

    let sent = agents[0]
        .broadcast_message(
            "broadcast_test",
            payload(json!({"test_data": "hi"})),
            Some(vec!["perf:test".to_string()]),
        )
        .await;
    assert_eq!(sent.len(), 4);

    for agent in &agents[1..] {
        let message = agent
            .wait_for_message(Some("broadcast_test"), Duration::from_secs(10))
            .await
            .expect("every peer should receive the broadcast");
        assert_eq!(message.payload["test_data"], "hi");
        assert_eq!(message.sender_id, "p0");
    }

    let all = agents[0].discover_agents(None, 50);
    assert!(all.len() >= 5);

    let health = agents[0].health_check();
    assert_eq!(health["discovery_healthy"], true);
    assert_eq!(health["transport_healthy"], true);
    assert_eq!(health["messaging_healthy"], true);
    assert!(health["queue_size"].is_u64());

    for agent in &agents {
        agent.stop();
    }
}

#[tokio::test]
async fn test_lifecycle_and_status() {
    let net = TestNet::new();
    let a = net.spawn_agent("agent-a", &["a2a:messaging"]).await;
    assert!(a.is_running());
    assert!(a.heartbeat());

    a.stop();
    assert!(!a.is_running());

    // Stopped agents are inactive in the registry and refuse to send.
    let query = ServiceQuery {
        agent_id: Some("agent-a".to_string()),
        status: Some(AgentStatus::Inactive),
        ..ServiceQuery::default()
    };
    assert_eq!(net.discovery.discover_agents(&query).len(), 1);
    assert!(a
        .send_message("agent-a", "ping", Map::new(), None)
        .await
        .is_none());
}

#[tokio::test]
async fn test_wait_for_message_timeout() {
    let net = TestNet::new();
    let a = net.spawn_agent("agent-a", &["a2a:messaging"]).await;

    let started = std::time::Instant::now();
    let nothing = a
        .wait_for_message(Some("never"), Duration::from_millis(300))
        .await;
    assert!(nothing.is_none());
    assert!(started.elapsed() >= Duration::from_millis(300));

    a.stop();
}

#[tokio::test]
async fn test_update_capabilities_reflected_in_discovery() {
    let net = TestNet::new();
    let a = net.spawn_agent("agent-a", &["a2a:messaging"]).await;

    a.update_capabilities(vec![
        "a2a:messaging".to_string(),
        "a2a:reporting".to_string(),
    ])
    .unwrap();

    let found = a.discover_agents(Some(vec!["a2a:reporting".to_string()]), 50);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].agent_id, "agent-a");

    a.stop();
}
