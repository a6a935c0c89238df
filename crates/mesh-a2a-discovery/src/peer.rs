//! Optional peer-to-peer presence overlay.
//!
//! A node periodically announces itself to seed peers through a pluggable
//! sink. Query forwarding to peers is out of scope for the core registry;
//! the single-writer `DiscoveryService` remains authoritative.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_a2a_core::Result;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Presence payload broadcast to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceAnnouncement {
    #[serde(rename = "type")]
    pub kind: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
}

impl PresenceAnnouncement {
    pub fn new(agent_id: &str) -> Self {
        Self {
            kind: "agent_presence".to_string(),
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Where presence announcements go; the transport decides how.
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn broadcast(&self, announcement: &PresenceAnnouncement) -> Result<()>;
}

/// Broadcasts local presence on an interval and tracks known seed peers.
pub struct PeerDiscovery {
    local_agent_id: String,
    broadcast_interval: Duration,
    known_peers: Mutex<HashSet<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerDiscovery {
    pub fn new(local_agent_id: &str, broadcast_interval: Duration) -> Self {
        Self {
            local_agent_id: local_agent_id.to_string(),
            broadcast_interval,
            known_peers: Mutex::new(HashSet::new()),
            task: Mutex::new(None),
        }
    }

    pub fn add_known_peer(&self, peer_address: &str) {
        self.known_peers
            .lock()
            .unwrap()
            .insert(peer_address.to_string());
    }

    pub fn known_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.known_peers.lock().unwrap().iter().cloned().collect();
        peers.sort();
        peers
    }

    /// Start the broadcast loop. Announcements go through the sink; a failed
    /// broadcast is logged and retried on the next tick.
    pub fn start(&self, sink: Arc<dyn PresenceSink>) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let agent_id = self.local_agent_id.clone();
        let interval = self.broadcast_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let announcement = PresenceAnnouncement::new(&agent_id);
                debug!(agent_id, "broadcasting presence");
                if let Err(e) = sink.broadcast(&announcement).await {
                    warn!(error = %e, "presence broadcast failed");
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
