use std::collections::HashMap;
use std::sync::Mutex;

use mesh_a2a_core::Message;

/// Maps message types to handler agents and tracks outstanding requests so
/// responses can be correlated back to them.
#[derive(Default)]
pub struct MessageRouter {
    inner: Mutex<RouterState>,
}

#[derive(Default)]
struct RouterState {
    /// message_type -> handler agent ids, in registration order.
    routes: HashMap<String, Vec<String>>,
    /// message_id -> request message awaiting a response.
    pending: HashMap<String, Message>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, message_type: &str, agent_id: &str) {
        let mut state = self.inner.lock().unwrap();
        let handlers = state.routes.entry(message_type.to_string()).or_default();
        if !handlers.iter().any(|id| id == agent_id) {
            handlers.push(agent_id.to_string());
        }
    }

    pub fn unregister_handler(&self, message_type: &str, agent_id: &str) {
        let mut state = self.inner.lock().unwrap();
        if let Some(handlers) = state.routes.get_mut(message_type) {
            handlers.retain(|id| id != agent_id);
            if handlers.is_empty() {
                state.routes.remove(message_type);
            }
        }
    }

    pub fn handlers_for(&self, message_type: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .routes
            .get(message_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Remember a request so an incoming message with a matching
    /// `correlation_id` can be paired with it.
    pub fn store_pending(&self, message: Message) {
        self.inner
            .lock()
            .unwrap()
            .pending
            .insert(message.message_id.clone(), message);
    }

    /// Take the original request for a response's correlation id, removing it
    /// from the pending table.
    pub fn take_pending(&self, correlation_id: &str) -> Option<Message> {
        self.inner.lock().unwrap().pending.remove(correlation_id)
    }
}
