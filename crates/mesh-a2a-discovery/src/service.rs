use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mesh_a2a_core::Result;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::record::{AgentRecord, AgentStatus, ServiceQuery};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Registry persistence file; `None` keeps the registry memory-only.
    pub registry_file: Option<PathBuf>,
    pub default_ttl_s: u64,
    pub sweep_interval_s: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            registry_file: None,
            default_ttl_s: crate::record::DEFAULT_RECORD_TTL_S,
            sweep_interval_s: 60,
        }
    }
}

/// Registry statistics for health checks and operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub total_capabilities: usize,
    pub status_counts: HashMap<String, usize>,
}

#[derive(Default)]
struct Registry {
    agents: HashMap<String, AgentRecord>,
    /// capability -> agent ids; kept consistent with `capabilities` on every
    /// write.
    capability_index: HashMap<String, HashSet<String>>,
}

/// On-disk registry shape.
#[derive(Serialize, Deserialize)]
struct RegistryFile {
    agents: Vec<AgentRecord>,
    last_updated: DateTime<Utc>,
}

/// Single-writer directory of agents indexed by capability.
///
/// A background sweeper unregisters agents whose `last_seen` exceeds their
/// TTL. Every mutation rewrites the registry file via an atomic rename.
pub struct DiscoveryService {
    config: DiscoveryConfig,
    registry: Mutex<Registry>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Self {
        let service = Self {
            config,
            registry: Mutex::new(Registry::default()),
            sweeper: Mutex::new(None),
        };
        service.load_registry();
        service
    }

    pub fn default_ttl_s(&self) -> u64 {
        self.config.default_ttl_s
    }

    /// Spawn the background expiry sweeper. Call on a clone of the service
    /// handle; the sweeper keeps it alive until `stop`.
    pub fn start(self: Arc<Self>) {
        let mut sweeper = self.sweeper.lock().unwrap();
        if sweeper.is_some() {
            return;
        }
        let service = Arc::clone(&self);
        let interval = Duration::from_secs(self.config.sweep_interval_s);
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a freshly started
            // service does not sweep before anything registered.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.sweep_expired();
            }
        }));
        info!("discovery sweeper started");
    }

    /// Stop the sweeper and persist the registry.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        let registry = self.registry.lock().unwrap();
        self.save_registry(&registry);
        info!("discovery service stopped");
    }

    /// Upsert a record by agent id: overwrites endpoints, capabilities,
    /// metadata, status, and TTL; refreshes `last_seen`; rebuilds the
    /// capability index entry for the agent.
    pub fn register_agent(&self, record: AgentRecord) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        let agent_id = record.agent_id.clone();

        let record = match registry.agents.remove(&agent_id) {
            Some(mut existing) => {
                existing.endpoints = record.endpoints;
                existing.capabilities = record.capabilities;
                existing.metadata = record.metadata;
                existing.status = record.status;
                existing.ttl = record.ttl;
                existing.last_seen = Utc::now();
                existing
            }
            None => {
                let mut fresh = record;
                fresh.registered_at = Utc::now();
                fresh.last_seen = fresh.registered_at;
                fresh
            }
        };

        update_capability_index(
            &mut registry.capability_index,
            &agent_id,
            &record.capabilities,
        );
        registry.agents.insert(agent_id.clone(), record);
        self.save_registry(&registry);
        debug!(agent_id, "registered agent");
        Ok(())
    }

    /// Remove an agent from the registry and the capability index.
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let mut registry = self.registry.lock().unwrap();
        if registry.agents.remove(agent_id).is_none() {
            return false;
        }
        update_capability_index(&mut registry.capability_index, agent_id, &[]);
        self.save_registry(&registry);
        info!(agent_id, "unregistered agent");
        true
    }

    pub fn update_agent_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        let mut registry = self.registry.lock().unwrap();
        let Some(record) = registry.agents.get_mut(agent_id) else {
            return false;
        };
        record.status = status;
        record.touch();
        self.save_registry(&registry);
        true
    }

    /// Refresh `last_seen`, staving off TTL expiry. Idempotent on everything
    /// else.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        let mut registry = self.registry.lock().unwrap();
        match registry.agents.get_mut(agent_id) {
            Some(record) => {
                record.touch();
                true
            }
            None => false,
        }
    }

    /// Agents matching the query: all requested capabilities present, status
    /// matched (when given), expired records skipped, truncated to
    /// `max_results`, metadata stripped unless requested.
    pub fn discover_agents(&self, query: &ServiceQuery) -> Vec<AgentRecord> {
        let registry = self.registry.lock().unwrap();
        let mut results: Vec<AgentRecord> = registry
            .agents
            .values()
            .filter(|record| match &query.agent_id {
                Some(agent_id) => &record.agent_id == agent_id,
                None => true,
            })
            .filter(|record| match query.status {
                Some(status) => record.status == status,
                None => true,
            })
            .filter(|record| match &query.capabilities {
                Some(capabilities) => capabilities
                    .iter()
                    .all(|cap| record.has_capability(cap)),
                None => true,
            })
            .filter(|record| !record.is_expired())
            .cloned()
            .collect();

        // HashMap iteration order is arbitrary; keep output deterministic.
        results.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        results.truncate(query.max_results);

        if !query.include_metadata {
            for record in &mut results {
                record.metadata = serde_json::Map::new();
            }
        }
        results
    }

    pub fn get_agent_record(&self, agent_id: &str) -> Option<AgentRecord> {
        let registry = self.registry.lock().unwrap();
        registry
            .agents
            .get(agent_id)
            .filter(|record| !record.is_expired())
            .cloned()
    }

    /// O(k) lookup through the secondary index; only live, active agents.
    pub fn get_agents_by_capability(&self, capability: &str) -> Vec<AgentRecord> {
        let registry = self.registry.lock().unwrap();
        let Some(agent_ids) = registry.capability_index.get(capability) else {
            return Vec::new();
        };
        let mut results: Vec<AgentRecord> = agent_ids
            .iter()
            .filter_map(|id| registry.agents.get(id))
            .filter(|record| !record.is_expired() && record.status == AgentStatus::Active)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        results
    }

    pub fn get_all_capabilities(&self) -> Vec<String> {
        let registry = self.registry.lock().unwrap();
        let mut capabilities: Vec<String> =
            registry.capability_index.keys().cloned().collect();
        capabilities.sort();
        capabilities
    }

    pub fn get_registry_stats(&self) -> RegistryStats {
        let registry = self.registry.lock().unwrap();
        let mut status_counts: HashMap<String, usize> = HashMap::new();
        let mut active_agents = 0;
        for record in registry.agents.values() {
            if record.is_expired() {
                continue;
            }
            *status_counts
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
            if record.status == AgentStatus::Active {
                active_agents += 1;
            }
        }
        RegistryStats {
            total_agents: registry.agents.len(),
            active_agents,
            total_capabilities: registry.capability_index.len(),
            status_counts,
        }
    }

    fn sweep_expired(&self) {
        let expired: Vec<String> = {
            let registry = self.registry.lock().unwrap();
            registry
                .agents
                .values()
                .filter(|record| record.is_expired())
                .map(|record| record.agent_id.clone())
                .collect()
        };
        for agent_id in expired {
            info!(agent_id, "removing expired agent");
            self.unregister_agent(&agent_id);
        }
    }

    fn load_registry(&self) {
        let Some(path) = &self.config.registry_file else {
            return;
        };
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no existing registry file, starting fresh");
                return;
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read registry");
                return;
            }
        };
        let file: RegistryFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to parse registry");
                return;
            }
        };

        let mut registry = self.registry.lock().unwrap();
        for record in file.agents {
            if record.is_expired() {
                continue;
            }
            update_capability_index(
                &mut registry.capability_index,
                &record.agent_id,
                &record.capabilities,
            );
            registry.agents.insert(record.agent_id.clone(), record);
        }
        info!(agents = registry.agents.len(), "loaded registry");
    }

    fn save_registry(&self, registry: &Registry) {
        let Some(path) = &self.config.registry_file else {
            return;
        };
        let file = RegistryFile {
            agents: registry.agents.values().cloned().collect(),
            last_updated: Utc::now(),
        };
        let result = serde_json::to_vec_pretty(&file)
            .map_err(std::io::Error::other)
            .and_then(|bytes| {
                let tmp = path.with_extension("tmp");
                fs::write(&tmp, bytes)?;
                fs::rename(&tmp, path)
            });
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to save registry");
        }
    }
}

/// Drop the agent from every capability set, then re-add under its current
/// capabilities; empty sets are removed.
fn update_capability_index(
    index: &mut HashMap<String, HashSet<String>>,
    agent_id: &str,
    capabilities: &[String],
) {
    for agents in index.values_mut() {
        agents.remove(agent_id);
    }
    for capability in capabilities {
        index
            .entry(capability.clone())
            .or_default()
            .insert(agent_id.to_string());
    }
    index.retain(|_, agents| !agents.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(agent_id: &str, capabilities: &[&str]) -> AgentRecord {
        AgentRecord::new(
            agent_id,
            &format!("did:a2a:{agent_id}"),
            capabilities.iter().map(|c| c.to_string()).collect(),
            vec![format!("http://localhost:9000/{agent_id}")],
        )
    }

    #[test]
    fn test_register_and_discover_by_capability() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        service
            .register_agent(record("bank", &["banking:accounts", "banking:compliance"]))
            .unwrap();
        service
            .register_agent(record("crypto", &["crypto:trading", "crypto:analysis"]))
            .unwrap();
        service
            .register_agent(record("orch", &["a2a:orchestration"]))
            .unwrap();

        let query = ServiceQuery::by_capabilities(vec!["banking:accounts".into()]);
        let results = service.discover_agents(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent_id, "bank");

        let query = ServiceQuery::by_capabilities(vec!["crypto:trading".into()]);
        let results = service.discover_agents(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent_id, "crypto");
    }

    #[test]
    fn test_reregister_is_idempotent_upsert() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        let original = record("a", &["x:one"]);
        service.register_agent(original.clone()).unwrap();
        service.register_agent(original).unwrap();

        assert_eq!(service.discover_agents(&ServiceQuery::default()).len(), 1);
        assert_eq!(service.get_agents_by_capability("x:one").len(), 1);

        // Capability change removes the stale index entry.
        service.register_agent(record("a", &["x:two"])).unwrap();
        assert!(service.get_agents_by_capability("x:one").is_empty());
        assert_eq!(service.get_agents_by_capability("x:two").len(), 1);
    }

    #[test]
    fn test_unregister_cleans_index() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        service.register_agent(record("a", &["x:one"])).unwrap();
        assert!(service.unregister_agent("a"));
        assert!(!service.unregister_agent("a"));
        assert!(service.get_agents_by_capability("x:one").is_empty());
        assert!(service.get_all_capabilities().is_empty());
    }

    #[test]
    fn test_status_filter_and_update() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        service.register_agent(record("a", &[])).unwrap();
        assert!(service.update_agent_status("a", AgentStatus::Suspended));
        assert!(!service.update_agent_status("ghost", AgentStatus::Active));

        assert!(service.discover_agents(&ServiceQuery::default()).is_empty());
        let query = ServiceQuery {
            status: Some(AgentStatus::Suspended),
            ..ServiceQuery::default()
        };
        assert_eq!(service.discover_agents(&query).len(), 1);
    }

    #[test]
    fn test_heartbeat_touches_only_last_seen() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        service.register_agent(record("a", &["x:one"])).unwrap();
        let before = service.get_agent_record("a").unwrap();

        assert!(service.heartbeat("a"));
        let after = service.get_agent_record("a").unwrap();
        assert!(after.last_seen >= before.last_seen);
        assert_eq!(after.capabilities, before.capabilities);
        assert_eq!(after.status, before.status);
        assert_eq!(after.registered_at, before.registered_at);
        assert!(!service.heartbeat("ghost"));
    }

    #[test]
    fn test_expired_records_skipped() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        let mut stale = record("a", &["x:one"]);
        stale.ttl = 0;
        stale.last_seen = Utc::now() - chrono::Duration::seconds(2);
        // register refreshes last_seen, so write directly.
        {
            let mut registry = service.registry.lock().unwrap();
            update_capability_index(&mut registry.capability_index, "a", &stale.capabilities);
            registry.agents.insert("a".to_string(), stale);
        }

        assert!(service.discover_agents(&ServiceQuery::default()).is_empty());
        assert!(service.get_agent_record("a").is_none());
        assert!(service.get_agents_by_capability("x:one").is_empty());
    }

    #[test]
    fn test_metadata_stripped_unless_requested() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        let mut rec = record("a", &[]);
        rec.metadata
            .insert("secret".to_string(), serde_json::json!("value"));
        service.register_agent(rec).unwrap();

        let plain = service.discover_agents(&ServiceQuery::default());
        assert!(plain[0].metadata.is_empty());

        let query = ServiceQuery {
            include_metadata: true,
            ..ServiceQuery::default()
        };
        let full = service.discover_agents(&query);
        assert_eq!(full[0].metadata["secret"], serde_json::json!("value"));
    }

    #[test]
    fn test_max_results_truncation() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        for i in 0..5 {
            service
                .register_agent(record(&format!("agent-{i}"), &[]))
                .unwrap();
        }
        let query = ServiceQuery {
            max_results: 3,
            ..ServiceQuery::default()
        };
        assert_eq!(service.discover_agents(&query).len(), 3);
    }

    #[test]
    fn test_registry_stats() {
        let service = DiscoveryService::new(DiscoveryConfig::default());
        service.register_agent(record("a", &["x:one"])).unwrap();
        service.register_agent(record("b", &["x:one", "x:two"])).unwrap();
        service.update_agent_status("b", AgentStatus::Inactive);

        let stats = service.get_registry_stats();
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.active_agents, 1);
        assert_eq!(stats.total_capabilities, 2);
        assert_eq!(stats.status_counts["active"], 1);
        assert_eq!(stats.status_counts["inactive"], 1);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_registry.json");
        let config = DiscoveryConfig {
            registry_file: Some(path.clone()),
            ..DiscoveryConfig::default()
        };

        let service = DiscoveryService::new(config.clone());
        service.register_agent(record("a", &["x:one"])).unwrap();
        drop(service);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("last_updated"));

        let reloaded = DiscoveryService::new(config);
        let rec = reloaded.get_agent_record("a").unwrap();
        assert_eq!(rec.agent_id, "a");
        assert_eq!(reloaded.get_agents_by_capability("x:one").len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_unregisters_expired() {
        let config = DiscoveryConfig {
            sweep_interval_s: 1,
            ..DiscoveryConfig::default()
        };
        let service = Arc::new(DiscoveryService::new(config));
        let mut short_lived = record("a", &[]);
        short_lived.ttl = 0;
        service.register_agent(short_lived).unwrap();

        service.clone().start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(service.get_agent_record("a").is_none());
        assert_eq!(service.get_registry_stats().total_agents, 0);
        service.stop();
    }
}
