//! Persistence port (C10): the record/query surface the engine needs from
//! an external store. One in-memory implementation ships by default;
//! production deployments can implement the trait against a real database
//! without the engine noticing.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::blackboard::Snapshot;

/// One agent's recorded contribution for a cycle, whether or not the
/// arbiter accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub session_id: String,
    pub cycle: u64,
    pub role: String,
    pub model: String,
    pub output_json: String,
    pub accepted: bool,
    pub support_delta: f64,
}

/// A cost line item recorded for a cycle's agent dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub session_id: String,
    pub cycle: u64,
    pub role: String,
    pub model: String,
    pub cost_usd: f64,
}

/// The record/query operations the engine needs from a store. Required
/// writes should propagate errors to the caller; best-effort writes
/// (snapshots, contributions, costs) are still routed through this trait
/// but the runner treats their failure as non-fatal.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_blackboard_snapshot(&self, snapshot: &Snapshot) -> Result<(), String>;
    async fn record_contribution(&self, record: ContributionRecord) -> Result<(), String>;
    async fn record_cost(&self, record: CostRecord) -> Result<(), String>;
    async fn total_cost_usd(&self, session_id: &str) -> f64;
    async fn get_snapshots(&self, session_id: &str) -> Vec<Snapshot>;
    async fn get_contributions(&self, session_id: &str, cycle: u64) -> Vec<ContributionRecord>;
}

/// Default in-memory implementation; used by the CLI and by tests.
#[derive(Default)]
pub struct InMemoryStore {
    snapshots: DashMap<String, RwLock<Vec<Snapshot>>>,
    contributions: DashMap<String, RwLock<Vec<ContributionRecord>>>,
    costs: DashMap<String, RwLock<Vec<CostRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn save_blackboard_snapshot(&self, snapshot: &Snapshot) -> Result<(), String> {
        let log = self
            .snapshots
            .entry(snapshot.session_id.clone())
            .or_insert_with(|| RwLock::new(Vec::new()));
        log.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn record_contribution(&self, record: ContributionRecord) -> Result<(), String> {
        let log = self
            .contributions
            .entry(record.session_id.clone())
            .or_insert_with(|| RwLock::new(Vec::new()));
        log.write().await.push(record);
        Ok(())
    }

    async fn record_cost(&self, record: CostRecord) -> Result<(), String> {
        let log = self
            .costs
            .entry(record.session_id.clone())
            .or_insert_with(|| RwLock::new(Vec::new()));
        log.write().await.push(record);
        Ok(())
    }

    async fn total_cost_usd(&self, session_id: &str) -> f64 {
        match self.costs.get(session_id) {
            Some(log) => log.read().await.iter().map(|c| c.cost_usd).sum(),
            None => 0.0,
        }
    }

    async fn get_snapshots(&self, session_id: &str) -> Vec<Snapshot> {
        match self.snapshots.get(session_id) {
            Some(log) => log.read().await.clone(),
            None => Vec::new(),
        }
    }

    async fn get_contributions(&self, session_id: &str, cycle: u64) -> Vec<ContributionRecord> {
        match self.contributions.get(session_id) {
            Some(log) => log
                .read()
                .await
                .iter()
                .filter(|c| c.cycle == cycle)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
