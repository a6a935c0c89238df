//! The agent runtime: packages identity, auth, messaging, discovery, and
//! transport into a runnable agent with typed message handlers.
//!
//! Lifecycle: `Uninitialized -> Initialized (identity + token present) ->
//! Running (transport + discovery started, status active) -> Stopped`.

mod config;
mod handlers;
mod runtime;

pub use config::AgentConfig;
pub use handlers::{DiscoveryRequestHandler, MessageHandler, PingHandler};
pub use runtime::AgentRuntime;
