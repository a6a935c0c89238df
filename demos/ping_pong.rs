//! Two agents on localhost: A pings B, B's default handler answers, A prints
//! the correlated pong.
//!
//! ```bash
//! cargo run --example ping_pong
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mesh_a2a::{
    AgentConfig, AgentRuntime, AuthConfig, AuthManager, DiscoveryConfig, DiscoveryService,
    IdentityStore, TransportConfig,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let dir = std::env::temp_dir().join("mesh-a2a-ping-pong");
    let identity_store = Arc::new(IdentityStore::new(&dir)?);
    let auth = Arc::new(AuthManager::new(identity_store.clone(), AuthConfig::default())?);
    let discovery = Arc::new(DiscoveryService::new(DiscoveryConfig::default()));

    let mut agents = Vec::new();
    for id in ["agent-a", "agent-b"] {
        let config = AgentConfig::new(id)
            .with_identity_dir(&dir)
            .with_transport(TransportConfig {
                port: 0,
                ..TransportConfig::default()
            });
        let runtime = AgentRuntime::with_services(
            config,
            identity_store.clone(),
            auth.clone(),
            discovery.clone(),
        )?;
        runtime.initialize()?;
        runtime.start().await?;
        agents.push(runtime);
    }
    let (a, b) = (&agents[0], &agents[1]);

    let ping_id = a
        .send_message(
            "agent-b",
            "ping",
            json!({"timestamp": chrono_now()}).as_object().unwrap().clone(),
            None,
        )
        .await
        .expect("ping should send");
    println!("A -> B ping {ping_id}");

    let pong = a
        .wait_for_message(Some("response"), Duration::from_secs(10))
        .await
        .expect("pong should arrive");
    println!(
        "B -> A pong (correlates {}): {}",
        pong.correlation_id.as_deref().unwrap_or("?"),
        serde_json::to_string(&pong.payload)?
    );

    a.stop();
    b.stop();
    Ok(())
}

fn chrono_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{seconds}")
}
