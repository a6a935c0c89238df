//! An orchestrator delegates a two-step workflow to a worker agent and
//! prints the workflow status as it progresses.
//!
//! ```bash
//! cargo run --example orchestrate
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mesh_a2a::{
    AgentConfig, AgentRuntime, AuthConfig, AuthManager, AuthToken, DiscoveryConfig,
    DiscoveryService, IdentityStore, Message, MessageHandler, OrchestratorAgent,
    OrchestratorConfig, TransportConfig, ORCHESTRATOR_CAPABILITIES,
};
use serde_json::{json, Map, Value};

/// Completes every assigned task after a short pause.
struct Worker {
    runtime: Arc<AgentRuntime>,
}

#[async_trait::async_trait]
impl MessageHandler for Worker {
    async fn handle(
        &self,
        message: &Message,
        _token: &AuthToken,
    ) -> mesh_a2a::Result<Option<Map<String, Value>>> {
        let task_id = message.payload["task_id"].as_str().unwrap_or_default();
        let task_type = message.payload["task_type"].as_str().unwrap_or_default();
        println!("worker: executing {task_id} ({task_type})");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut response = Map::new();
        response.insert("task_id".to_string(), json!(task_id));
        response.insert("status".to_string(), json!("completed"));
        response.insert(
            "result".to_string(),
            json!({"task_type": task_type, "outcome": "ok"}),
        );
        self.runtime
            .send_message(&message.sender_id, "task_response", response, None)
            .await;
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let dir = std::env::temp_dir().join("mesh-a2a-orchestrate");
    let identity_store = Arc::new(IdentityStore::new(&dir)?);
    let auth = Arc::new(AuthManager::new(identity_store.clone(), AuthConfig::default())?);
    let discovery = Arc::new(DiscoveryService::new(DiscoveryConfig::default()));

    let spawn = |id: &str, caps: Vec<String>| {
        let config = AgentConfig::new(id)
            .with_capabilities(caps)
            .with_identity_dir(&dir)
            .with_transport(TransportConfig {
                port: 0,
                ..TransportConfig::default()
            });
        AgentRuntime::with_services(
            config,
            identity_store.clone(),
            auth.clone(),
            discovery.clone(),
        )
    };

    let orch_runtime = spawn(
        "orchestrator",
        ORCHESTRATOR_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
    )?;
    orch_runtime.initialize()?;
    orch_runtime.start().await?;

    let worker = spawn("worker-1", vec!["demo:compute".to_string()])?;
    worker.initialize()?;
    worker.start().await?;
    worker.register_message_handler(
        "task_assignment",
        Arc::new(Worker {
            runtime: worker.clone(),
        }),
    );

    let orchestrator = OrchestratorAgent::new(orch_runtime.clone(), OrchestratorConfig::default());
    let wid = orchestrator.create_workflow("demo", "two step pipeline", None);
    let t1 = orchestrator.add_task_to_workflow(
        &wid,
        "extract",
        "pull the numbers",
        vec!["demo:compute".to_string()],
        Map::new(),
        vec![],
    )?;
    orchestrator.add_task_to_workflow(
        &wid,
        "report",
        "summarize the numbers",
        vec!["demo:compute".to_string()],
        Map::new(),
        vec![t1],
    )?;

    orchestrator.start_workflow(&wid)?;
    loop {
        let status = orchestrator.get_workflow_status(&wid).unwrap();
        println!(
            "workflow {}: {} ({:.0}%)",
            wid, status["status"], status["completion_percentage"]
        );
        if status["status"] == "completed" {
            println!("context: {}", serde_json::to_string_pretty(&status["context"])?);
            break;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    worker.stop();
    orch_runtime.stop();
    Ok(())
}
