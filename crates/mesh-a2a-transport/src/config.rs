use std::path::PathBuf;
use std::str::FromStr;

/// Which transport an agent serves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Http2,
    Stream,
}

impl FromStr for TransportProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http2" => Ok(Self::Http2),
            "stream" => Ok(Self::Stream),
            other => Err(format!("unknown transport protocol: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub protocol: TransportProtocol,
    pub host: String,
    pub port: u16,
    /// TLS termination with `cert_file`/`key_file`; disabled for development.
    pub ssl_enabled: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub timeout_s: u64,
    pub max_connections: usize,
    pub heartbeat_interval_s: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol: TransportProtocol::Http2,
            host: "127.0.0.1".to_string(),
            port: 8443,
            ssl_enabled: false,
            cert_file: None,
            key_file: None,
            timeout_s: 30,
            max_connections: 100,
            heartbeat_interval_s: 30,
        }
    }
}

impl TransportConfig {
    /// Apply optional environment overrides. No variable is required.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("A2A_HOST") {
            config.host = host;
        }
        if let Some(port) = std::env::var("A2A_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            config.port = port;
        }
        if let Some(protocol) = std::env::var("A2A_PROTOCOL")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            config.protocol = protocol;
        }
        config
    }

    /// The endpoint URL this agent registers in discovery.
    pub fn endpoint_url(&self, port: u16) -> String {
        match self.protocol {
            TransportProtocol::Http2 => {
                let scheme = if self.ssl_enabled { "https" } else { "http" };
                format!("{scheme}://{}:{port}/a2a", self.host)
            }
            TransportProtocol::Stream => format!("ws://{}:{port}", self.host),
        }
    }
}
