use std::collections::VecDeque;
use std::sync::Mutex;

use mesh_a2a_core::{A2aError, Message, Result};
use tracing::debug;

/// Default mailbox capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Bounded in-memory FIFO shared by all local mailboxes.
///
/// Enqueue fails with `QueueOverflow` at capacity; callers retry or drop.
/// Expired messages are swept on every dequeue.
pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    max_size: usize,
}

impl MessageQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    pub fn enqueue(&self, message: Message) -> Result<()> {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.max_size {
            return Err(A2aError::QueueOverflow);
        }
        queue.push_back(message);
        Ok(())
    }

    /// Remove and return every message addressed to `agent_id`, preserving
    /// enqueue order. Expired messages (any addressee) are dropped.
    pub fn dequeue_for_agent(&self, agent_id: &str) -> Vec<Message> {
        let mut queue = self.inner.lock().unwrap();
        let mut delivered = Vec::new();
        let mut remaining = VecDeque::with_capacity(queue.len());

        for message in queue.drain(..) {
            if message.is_expired() {
                debug!(message_id = %message.message_id, "dropping expired message");
                continue;
            }
            if message.receiver_id == agent_id {
                delivered.push(message);
            } else {
                remaining.push_back(message);
            }
        }
        *queue = remaining;
        delivered
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
