pub use mesh_a2a_agent::{AgentConfig, AgentRuntime, MessageHandler};
pub use mesh_a2a_auth::{AuthConfig, AuthManager, AuthMethod, AuthToken};
pub use mesh_a2a_core::{A2aError, EncryptedMessage, Message, Result, WorkflowError};
pub use mesh_a2a_discovery::{
    AgentRecord, AgentStatus, DiscoveryConfig, DiscoveryService, PeerDiscovery, ServiceQuery,
};
pub use mesh_a2a_identity::{AgentIdentity, IdentityStore};
pub use mesh_a2a_messaging::{MessageQueue, MessageRouter, MessagingService};
pub use mesh_a2a_orchestrator::{
    OrchestratorAgent, OrchestratorConfig, Task, TaskStatus, Workflow, WorkflowStatus,
    ORCHESTRATOR_CAPABILITIES,
};
pub use mesh_a2a_transport::{TransportConfig, TransportProtocol};
