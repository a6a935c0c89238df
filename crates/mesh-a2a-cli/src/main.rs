use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mesh_a2a_agent::{AgentConfig, AgentRuntime};
use mesh_a2a_discovery::{DiscoveryConfig, DiscoveryService, ServiceQuery};
use mesh_a2a_transport::{TransportConfig, TransportProtocol};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mesh-a2a", about = "Secure agent-to-agent messaging and orchestration")]
struct Cli {
    /// Identity storage directory
    #[arg(long, default_value = "./identities", global = true)]
    identity_dir: PathBuf,

    /// Registry persistence file
    #[arg(long, default_value = "agent_registry.json", global = true)]
    registry: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Agent management
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Send a one-shot message to an agent
    Send {
        /// Sender agent id
        #[arg(long)]
        from: String,
        /// Recipient agent id
        #[arg(long)]
        to: String,
        /// Message type
        #[arg(long, default_value = "request")]
        message_type: String,
        /// JSON object payload
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Seal the message with the pair session key
        #[arg(long)]
        encrypted: bool,
    },
    /// Registry inspection
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Run an agent until interrupted
    Run {
        /// Agent id
        #[arg(long)]
        id: String,
        /// Comma-separated capabilities
        #[arg(long, default_value = "a2a:messaging")]
        capabilities: String,
        /// Bind host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Bind port (0 picks an ephemeral port)
        #[arg(long, default_value_t = 8443)]
        port: u16,
        /// Transport protocol: http2 or stream
        #[arg(long, default_value = "http2")]
        protocol: String,
    },
    /// List agents known to the registry
    Discover {
        /// Comma-separated required capabilities
        #[arg(long)]
        capabilities: Option<String>,
    },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Print registry statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Agent { action } => match action {
            AgentAction::Run {
                id,
                capabilities,
                host,
                port,
                protocol,
            } => run_agent(cli.identity_dir, id, capabilities, host, port, protocol).await,
            AgentAction::Discover { capabilities } => {
                discover(cli.registry, capabilities)
            }
        },
        Commands::Send {
            from,
            to,
            message_type,
            payload,
            encrypted,
        } => send(cli.identity_dir, from, to, message_type, payload, encrypted).await,
        Commands::Registry { action } => match action {
            RegistryAction::Stats => stats(cli.registry),
        },
    }
}

async fn run_agent(
    identity_dir: PathBuf,
    id: String,
    capabilities: String,
    host: String,
    port: u16,
    protocol: String,
) -> Result<()> {
    let protocol: TransportProtocol = protocol
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let transport = TransportConfig {
        protocol,
        host,
        port,
        ..TransportConfig::from_env()
    };
    let config = AgentConfig::new(&id)
        .with_capabilities(split_capabilities(&capabilities))
        .with_identity_dir(identity_dir)
        .with_transport(transport);

    let runtime = AgentRuntime::new(config).context("failed to build agent runtime")?;
    runtime.initialize().context("failed to initialize agent")?;
    runtime.start().await.context("failed to start agent")?;
    info!(agent_id = %id, "agent running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    runtime.stop();
    Ok(())
}

async fn send(
    identity_dir: PathBuf,
    from: String,
    to: String,
    message_type: String,
    payload: String,
    encrypted: bool,
) -> Result<()> {
    let payload: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&payload).context("payload must be a JSON object")?;

    let transport = TransportConfig {
        port: 0,
        ..TransportConfig::from_env()
    };
    let config = AgentConfig::new(&from)
        .with_identity_dir(identity_dir)
        .with_transport(transport);
    let runtime = AgentRuntime::new(config)?;
    runtime.initialize()?;
    runtime.start().await?;

    let message_id = if encrypted {
        runtime
            .send_encrypted_message(&to, &message_type, payload)
            .await
    } else {
        runtime.send_message(&to, &message_type, payload, None).await
    };

    match message_id {
        Some(message_id) => {
            println!("sent {message_id}");
            // Give the receiver a moment to answer, then show any response.
            if let Some(response) = runtime
                .wait_for_message(Some("response"), Duration::from_secs(5))
                .await
            {
                println!(
                    "response: {}",
                    serde_json::to_string_pretty(&response.payload)?
                );
            }
        }
        None => anyhow::bail!("send failed: receiver unknown or transport error"),
    }
    runtime.stop();
    Ok(())
}

fn discover(registry: PathBuf, capabilities: Option<String>) -> Result<()> {
    let discovery = DiscoveryService::new(DiscoveryConfig {
        registry_file: Some(registry),
        ..DiscoveryConfig::default()
    });
    let query = ServiceQuery {
        capabilities: capabilities.as_deref().map(split_capabilities),
        ..ServiceQuery::default()
    };
    for record in discovery.discover_agents(&query) {
        println!(
            "{}  {}  [{}]  {}",
            record.agent_id,
            record.status.as_str(),
            record.capabilities.join(", "),
            record.endpoints.join(" ")
        );
    }
    Ok(())
}

fn stats(registry: PathBuf) -> Result<()> {
    let discovery = DiscoveryService::new(DiscoveryConfig {
        registry_file: Some(registry),
        ..DiscoveryConfig::default()
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&discovery.get_registry_stats())?
    );
    Ok(())
}

fn split_capabilities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
