//! Embedding cache and per-session trajectory store.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// A point in the trajectory: the state of one completed cycle, projected
/// into embedding space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub cycle_number: u64,
    pub embedding: Vec<f64>,
    pub claim_text: String,
    pub support_strength: f64,
}

/// Computes a deterministic embedding vector for a piece of text. Real
/// deployments wire in an actual embedding model; tests use a cheap
/// deterministic stand-in.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> EngineResult<Vec<f64>>;
}

/// Deterministic, dependency-free embedder: hashes fixed-width shingles of
/// the input into a small fixed-dimension vector. Good enough to exercise
/// the novelty/stagnation geometry without a real model.
pub struct HashEmbedder {
    pub dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dims: 16 }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_text(&self, text: &str) -> EngineResult<Vec<f64>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::EmptyText);
        }
        let mut vector = vec![0.0_f64; self.dims];
        for (i, word) in trimmed.split_whitespace().enumerate() {
            let mut hash: u64 = 1469598103934665603; // FNV offset basis
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash as usize + i) % self.dims;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

/// Process-wide embedding cache plus the per-session append-only
/// trajectory logs.
pub struct TrajectoryStore<E: Embedder> {
    embedder: E,
    cache: DashMap<String, Vec<f64>>,
    trajectories: DashMap<String, RwLock<Vec<TrajectoryPoint>>>,
}

impl<E: Embedder> TrajectoryStore<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            cache: DashMap::new(),
            trajectories: DashMap::new(),
        }
    }

    /// Compute-once-per-text embedding, cached for the lifetime of the
    /// store.
    pub async fn embed(&self, text: &str) -> EngineResult<Vec<f64>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached.clone());
        }
        let vector = self.embedder.embed_text(text).await?;
        self.cache.insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    pub async fn store_trajectory_point(
        &self,
        session_id: &str,
        cycle: u64,
        vector: Vec<f64>,
        claim: String,
        support: f64,
    ) {
        let log = self
            .trajectories
            .entry(session_id.to_string())
            .or_insert_with(|| RwLock::new(Vec::new()));
        log.write().await.push(TrajectoryPoint {
            cycle_number: cycle,
            embedding: vector,
            claim_text: claim,
            support_strength: support,
        });
    }

    /// Ordered by ascending `cycle_number` (trajectory points are always
    /// appended in cycle order, so this is just a clone of the log).
    pub async fn get_trajectory(&self, session_id: &str) -> Vec<TrajectoryPoint> {
        match self.trajectories.get(session_id) {
            Some(log) => log.read().await.clone(),
            None => Vec::new(),
        }
    }
}
