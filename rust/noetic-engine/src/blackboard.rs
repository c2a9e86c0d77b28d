//! The per-session blackboard: single-writer authoritative state, handed
//! out to readers only as immutable [`Snapshot`]s.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// Support strength at or below which a claim dies.
pub const DEATH_THRESHOLD: f64 = 0.2;
/// Support strength at or above which a claim graduates.
pub const GRADUATION_THRESHOLD: f64 = 0.85;
/// Support strength a freshly-resurrected claim starts at when a
/// sponsor-eligible frontier exists.
pub const RESURRECT_SUPPORT: f64 = 0.5;
/// Support strength used when resurrection falls back to the
/// highest-sponsored unactivated frontier (no eligible frontier existed).
pub const RESURRECT_FALLBACK_SUPPORT: f64 = 0.4;
/// Minimum sponsor count for a frontier idea to be "eligible".
pub const ELIGIBLE_SPONSOR_COUNT: u32 = 2;

/// Stable, content-addressed id for a nominated frontier idea: the same
/// (trimmed, case-folded) text always maps to the same `idea_id`, so
/// repeated nominations of the same idea sponsor one pool entry instead of
/// minting duplicates.
fn frontier_idea_id(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let mut hash: u64 = 1469598103934665603; // FNV offset basis
    for byte in normalized.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    format!("frontier_{hash:016x}")
}

/// A candidate replacement claim awaiting enough sponsorship to be
/// activated on resurrection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierIdea {
    pub idea_text: String,
    pub sponsor_count: u32,
    pub cycles_alive: u64,
    pub activated: bool,
}

/// An entry in the cemetery: a claim that died.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CemeteryEntry {
    pub claim: String,
    pub cause_of_death: String,
    pub final_support: f64,
    pub cycle_killed: u64,
}

/// An entry in the graduated-claims log: a claim that reached the
/// graduation threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraduatedClaim {
    pub claim: String,
    pub cycle_graduated: u64,
    pub final_support: f64,
}

/// Whether the blackboard's owning session should end, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Graduated,
    NoFrontiersAvailable,
}

/// An immutable, deep copy of the blackboard's state at a point in time.
/// Every dispatched agent sees the same snapshot for the duration of a
/// cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    pub current_claim: Option<String>,
    pub support_strength: f64,
    pub active_objection: Option<String>,
    pub analogy_of_record: Option<String>,
    pub cycle_count: u64,
    pub frontier_pool: BTreeMap<String, FrontierIdea>,
    pub cemetery: Vec<CemeteryEntry>,
    pub graduated_claims: Vec<GraduatedClaim>,
    pub translator_frameworks_used: Vec<String>,
    pub cost_limit_usd: Option<f64>,
    pub seed_claim: String,
}

struct BlackboardState {
    current_claim: Option<String>,
    support_strength: f64,
    active_objection: Option<String>,
    analogy_of_record: Option<String>,
    cycle_count: u64,
    frontier_pool: BTreeMap<String, FrontierIdea>,
    cemetery: Vec<CemeteryEntry>,
    graduated_claims: Vec<GraduatedClaim>,
    translator_frameworks_used: Vec<String>,
    cost_limit_usd: Option<f64>,
    seed_claim: String,
}

/// Single-writer actor owning one session's reasoning state. All mutation
/// happens through `&self` methods serialized by the inner lock; readers
/// call [`Blackboard::get_snapshot`] for a consistent point-in-time view.
pub struct Blackboard {
    session_id: String,
    state: RwLock<BlackboardState>,
}

impl Blackboard {
    pub fn new(session_id: String, seed_claim: String, cost_limit_usd: Option<f64>) -> Self {
        Self {
            session_id,
            state: RwLock::new(BlackboardState {
                current_claim: Some(seed_claim.clone()),
                support_strength: RESURRECT_SUPPORT,
                active_objection: None,
                analogy_of_record: None,
                cycle_count: 0,
                frontier_pool: BTreeMap::new(),
                cemetery: Vec::new(),
                graduated_claims: Vec::new(),
                translator_frameworks_used: Vec::new(),
                cost_limit_usd,
                seed_claim,
            }),
        }
    }

    pub async fn get_snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            session_id: self.session_id.clone(),
            current_claim: state.current_claim.clone(),
            support_strength: state.support_strength,
            active_objection: state.active_objection.clone(),
            analogy_of_record: state.analogy_of_record.clone(),
            cycle_count: state.cycle_count,
            frontier_pool: state.frontier_pool.clone(),
            cemetery: state.cemetery.clone(),
            graduated_claims: state.graduated_claims.clone(),
            translator_frameworks_used: state.translator_frameworks_used.clone(),
            cost_limit_usd: state.cost_limit_usd,
            seed_claim: state.seed_claim.clone(),
        }
    }

    pub async fn increment_cycle(&self) -> u64 {
        let mut state = self.state.write().await;
        state.cycle_count += 1;
        state.cycle_count
    }

    pub async fn cycle_count(&self) -> u64 {
        self.state.read().await.cycle_count
    }

    /// Replace `current_claim`. The caller is responsible for having
    /// handled death first if support is already at/below the threshold.
    pub async fn update_claim(&self, text: String) {
        self.state.write().await.current_claim = Some(text);
    }

    pub async fn set_active_objection(&self, text: Option<String>) {
        self.state.write().await.active_objection = text;
    }

    pub async fn set_analogy(&self, text: Option<String>) {
        self.state.write().await.analogy_of_record = text;
    }

    pub async fn add_translator_framework(&self, framework: String) {
        let mut state = self.state.write().await;
        if !state.translator_frameworks_used.contains(&framework) {
            state.translator_frameworks_used.push(framework);
        }
    }

    /// Add `delta` to `support_strength`, clamp to `[0, 1]`, and apply the
    /// death/graduation side effects.
    ///
    /// Returns `Some(reason)` if this mutation should end the session
    /// (graduation). Death does not end the session by itself — the next
    /// resurrection phase decides that.
    pub async fn update_support(
        &self,
        delta: f64,
        cause_if_death: &str,
    ) -> Option<TerminationReason> {
        let mut state = self.state.write().await;
        let new_support = (state.support_strength + delta).clamp(0.0, 1.0);
        state.support_strength = new_support;

        if new_support <= DEATH_THRESHOLD {
            if let Some(claim) = state.current_claim.take() {
                state.cemetery.push(CemeteryEntry {
                    claim,
                    cause_of_death: cause_if_death.to_string(),
                    final_support: new_support,
                    cycle_killed: state.cycle_count,
                });
            }
            return None;
        }

        if new_support >= GRADUATION_THRESHOLD {
            if let Some(claim) = state.current_claim.clone() {
                state.graduated_claims.push(GraduatedClaim {
                    claim,
                    cycle_graduated: state.cycle_count,
                    final_support: new_support,
                });
                return Some(TerminationReason::Graduated);
            }
        }

        None
    }

    /// Apply the decay phase's floor-clamped subtraction: never pushes an
    /// already-sub-floor value upward, never reduces below the floor.
    pub async fn apply_decay(&self, decay_rate: f64) -> Option<TerminationReason> {
        let mut state = self.state.write().await;
        let current = state.support_strength;
        let new_support = if current > DEATH_THRESHOLD {
            (current - decay_rate).max(DEATH_THRESHOLD)
        } else {
            current
        };
        state.support_strength = new_support;

        if new_support <= DEATH_THRESHOLD {
            if let Some(claim) = state.current_claim.take() {
                state.cemetery.push(CemeteryEntry {
                    claim,
                    cause_of_death: "decay".to_string(),
                    final_support: new_support,
                    cycle_killed: state.cycle_count,
                });
            }
        }
        None
    }

    pub async fn add_frontier(&self, idea_id: String, idea_text: String) {
        let mut state = self.state.write().await;
        state.frontier_pool.entry(idea_id).or_insert(FrontierIdea {
            idea_text,
            sponsor_count: 0,
            cycles_alive: 0,
            activated: false,
        });
    }

    /// Add-then-sponsor a frontier idea keyed by a stable hash of its
    /// normalized text, so independent agents (or the same agent across
    /// cycles) converging on the same replacement claim accumulate
    /// `sponsor_count` on one entry rather than each minting a fresh,
    /// permanently-unsponsored one. Used by the GraveKeeper and Perturber
    /// roles, the two whose payloads are explicitly about what should
    /// replace a dying or stagnating claim (see DESIGN.md).
    pub async fn nominate_frontier(&self, idea_text: String) {
        let idea_id = frontier_idea_id(&idea_text);
        let mut state = self.state.write().await;
        state
            .frontier_pool
            .entry(idea_id)
            .or_insert_with(|| FrontierIdea {
                idea_text,
                sponsor_count: 0,
                cycles_alive: 0,
                activated: false,
            })
            .sponsor_count += 1;
    }

    pub async fn sponsor(&self, idea_id: &str) -> EngineResult<()> {
        let mut state = self.state.write().await;
        let idea = state
            .frontier_pool
            .get_mut(idea_id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("unknown frontier {idea_id}")))?;
        idea.sponsor_count += 1;
        Ok(())
    }

    fn eligible_frontiers_locked(state: &BlackboardState) -> Vec<(String, FrontierIdea)> {
        state
            .frontier_pool
            .iter()
            .filter(|(_, idea)| !idea.activated && idea.sponsor_count >= ELIGIBLE_SPONSOR_COUNT)
            .map(|(id, idea)| (id.clone(), idea.clone()))
            .collect()
    }

    pub async fn eligible_frontiers(&self) -> Vec<(String, FrontierIdea)> {
        let state = self.state.read().await;
        Self::eligible_frontiers_locked(&state)
    }

    /// Weighted-random among eligible frontiers, else first eligible, else
    /// highest-sponsored unactivated (installed at the fallback support),
    /// else [`EngineError::NoFrontiersAvailable`].
    pub async fn resurrect(&self, rng: &mut impl Rng) -> EngineResult<String> {
        let mut state = self.state.write().await;

        let eligible = Self::eligible_frontiers_locked(&state);
        if !eligible.is_empty() {
            let total_weight: u32 = eligible.iter().map(|(_, idea)| idea.sponsor_count).sum();
            let mut pick = rng.gen_range(0..total_weight.max(1));
            let mut chosen = eligible[0].0.clone();
            for (id, idea) in &eligible {
                if pick < idea.sponsor_count {
                    chosen = id.clone();
                    break;
                }
                pick -= idea.sponsor_count;
            }
            let Some(idea) = state.frontier_pool.get_mut(&chosen) else {
                return Err(EngineError::InvariantViolation(format!(
                    "eligible frontier {chosen} vanished mid-resurrect"
                )));
            };
            idea.activated = true;
            let text = idea.idea_text.clone();
            state.current_claim = Some(text.clone());
            state.support_strength = RESURRECT_SUPPORT;
            return Ok(text);
        }

        let fallback = state
            .frontier_pool
            .iter()
            .filter(|(_, idea)| !idea.activated)
            .max_by_key(|(_, idea)| idea.sponsor_count)
            .map(|(id, _)| id.clone());

        match fallback {
            Some(id) => {
                let Some(idea) = state.frontier_pool.get_mut(&id) else {
                    return Err(EngineError::InvariantViolation(format!(
                        "fallback frontier {id} vanished mid-resurrect"
                    )));
                };
                idea.activated = true;
                let text = idea.idea_text.clone();
                state.current_claim = Some(text.clone());
                state.support_strength = RESURRECT_FALLBACK_SUPPORT;
                Ok(text)
            }
            None => Err(EngineError::NoFrontiersAvailable),
        }
    }

    pub async fn has_unactivated_frontier(&self) -> bool {
        self.state
            .read()
            .await
            .frontier_pool
            .values()
            .any(|idea| !idea.activated)
    }

    pub async fn is_claim_alive(&self) -> bool {
        self.state.read().await.current_claim.is_some()
    }

    pub async fn support_strength(&self) -> f64 {
        self.state.read().await.support_strength
    }

    pub async fn current_claim(&self) -> Option<String> {
        self.state.read().await.current_claim.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }

    #[tokio::test]
    async fn new_blackboard_starts_alive_with_seed_claim() {
        let bb = Blackboard::new("s1".into(), "Entropy increases".into(), None);
        let snap = bb.get_snapshot().await;
        assert_eq!(snap.current_claim.as_deref(), Some("Entropy increases"));
        assert_eq!(snap.support_strength, RESURRECT_SUPPORT);
        assert_eq!(snap.cycle_count, 0);
    }

    #[tokio::test]
    async fn decay_clamps_at_floor_not_below() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.update_support(0.21 - RESURRECT_SUPPORT, "test").await;
        assert!((bb.support_strength().await - 0.21).abs() < 1e-9);
        bb.apply_decay(0.02).await;
        assert!((bb.support_strength().await - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn graduation_appends_and_signals_termination() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.update_support(0.84 - RESURRECT_SUPPORT, "test").await;
        let reason = bb.update_support(0.02, "test").await;
        assert_eq!(reason, Some(TerminationReason::Graduated));
        let snap = bb.get_snapshot().await;
        assert_eq!(snap.graduated_claims.len(), 1);
        assert!((snap.graduated_claims[0].final_support - 0.86).abs() < 1e-9);
    }

    #[tokio::test]
    async fn death_moves_claim_to_cemetery_and_nulls_current_claim() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.update_support(DEATH_THRESHOLD - RESURRECT_SUPPORT, "objection").await;
        assert!(!bb.is_claim_alive().await);
        let snap = bb.get_snapshot().await;
        assert_eq!(snap.cemetery.len(), 1);
        assert_eq!(snap.cemetery[0].cause_of_death, "objection");
    }

    #[tokio::test]
    async fn activated_frontier_is_never_selected_again() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.add_frontier("a".into(), "idea a".into()).await;
        bb.sponsor("a").await.unwrap();
        bb.sponsor("a").await.unwrap();
        let mut r = rng();
        let chosen = bb.resurrect(&mut r).await.unwrap();
        assert_eq!(chosen, "idea a");
        let eligible = bb.eligible_frontiers().await;
        assert!(eligible.is_empty());
    }

    #[tokio::test]
    async fn resurrect_without_any_frontier_errors() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        let mut r = rng();
        let err = bb.resurrect(&mut r).await;
        assert!(matches!(err, Err(EngineError::NoFrontiersAvailable)));
    }

    #[tokio::test]
    async fn resurrect_falls_back_to_highest_sponsored_unactivated() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.add_frontier("a".into(), "idea a".into()).await;
        bb.add_frontier("b".into(), "idea b".into()).await;
        bb.sponsor("b").await.unwrap();
        let mut r = rng();
        let chosen = bb.resurrect(&mut r).await.unwrap();
        assert_eq!(chosen, "idea b");
        assert_eq!(bb.support_strength().await, RESURRECT_FALLBACK_SUPPORT);
    }

    #[tokio::test]
    async fn nominate_frontier_accumulates_sponsor_count_on_repeat_text() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.nominate_frontier("Consider a replacement framing".into()).await;
        bb.nominate_frontier("  consider a replacement framing  ".into()).await;
        bb.nominate_frontier("CONSIDER A REPLACEMENT FRAMING".into()).await;
        let snap = bb.get_snapshot().await;
        assert_eq!(snap.frontier_pool.len(), 1);
        let entry = snap.frontier_pool.values().next().unwrap();
        assert_eq!(entry.sponsor_count, 3);
        assert!(!entry.activated);
    }

    #[tokio::test]
    async fn nominate_frontier_keeps_distinct_texts_as_distinct_entries() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.nominate_frontier("first idea".into()).await;
        bb.nominate_frontier("second idea".into()).await;
        let snap = bb.get_snapshot().await;
        assert_eq!(snap.frontier_pool.len(), 2);
    }

    #[tokio::test]
    async fn nominated_frontier_is_eligible_once_sponsor_threshold_met() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.nominate_frontier("promising pivot".into()).await;
        bb.nominate_frontier("promising pivot".into()).await;
        let eligible = bb.eligible_frontiers().await;
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].1.idea_text, "promising pivot");
    }
}
