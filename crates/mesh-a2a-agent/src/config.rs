use std::path::PathBuf;

use mesh_a2a_messaging::DEFAULT_QUEUE_CAPACITY;
use mesh_a2a_transport::TransportConfig;

/// Configuration for one agent runtime.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Capabilities advertised in discovery; also seeds the identity.
    pub capabilities: Vec<String>,
    /// Directory for identity files and the process auth secret.
    pub identity_dir: PathBuf,
    /// Identity certificate validity in days.
    pub validity_days: u32,
    pub transport: TransportConfig,
    pub queue_capacity: usize,
}

impl AgentConfig {
    pub fn new(agent_id: &str) -> Self {
        let mut config = Self {
            agent_id: agent_id.to_string(),
            capabilities: vec!["a2a:messaging".to_string()],
            identity_dir: PathBuf::from("./identities"),
            validity_days: 365,
            transport: TransportConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        };
        if let Ok(dir) = std::env::var("A2A_IDENTITY_DIR") {
            config.identity_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_identity_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.identity_dir = dir.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}
