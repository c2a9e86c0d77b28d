//! Agent scheduler (C4): decides which roles run in a given cycle.

use std::collections::BTreeSet;

use rand::Rng;

use crate::agents::Role;
use crate::blackboard::Snapshot;
use crate::novelty::{self, StagnationReport};
use crate::trajectory::TrajectoryPoint;

/// Probability the Perturber is scheduled for a cycle. A second,
/// independent draw at this same rate decides in the runner's PERTURB
/// phase whether the scheduled Perturber's pivot actually activates — see
/// `PerturberPolicy` in `runner.rs` and the Open Question resolution in
/// DESIGN.md.
pub const PERTURBER_SCHEDULE_PROBABILITY: f64 = 0.2;

/// Support strength below which GraveKeeper is added to the schedule.
pub const GRAVEKEEPER_SUPPORT_THRESHOLD: f64 = 0.4;
/// Minimum cycle count before Cartographer can be scheduled.
pub const CARTOGRAPHER_MIN_CYCLE: u64 = 5;
/// Stagnation window (in trailing cycles) Cartographer's trigger checks.
pub const CARTOGRAPHER_STAGNATION_WINDOW: usize = 10;
/// Movement threshold used by Cartographer's stagnation check.
pub const CARTOGRAPHER_STAGNATION_THRESHOLD: f64 = 0.01;

/// Decide the set of roles to dispatch this cycle.
///
/// `cycle_count` must be `>= 1`; cycle numbering starts at 1, not 0.
pub fn schedule(
    cycle_count: u64,
    snapshot: &Snapshot,
    trajectory: &[TrajectoryPoint],
    rng: &mut impl Rng,
) -> BTreeSet<Role> {
    assert!(cycle_count >= 1, "cycle_count is 1-based; 0 is invalid");

    let mut roles = BTreeSet::new();

    // Base schedule: every independently-evaluated rule is additive.
    roles.insert(Role::Explorer);
    roles.insert(Role::Critic);

    if cycle_count % 3 == 0 {
        roles.insert(Role::Connector);
        roles.insert(Role::Steelman);
        roles.insert(Role::Operationalizer);
        roles.insert(Role::Quantifier);
    }

    if cycle_count % 5 == 0 {
        roles.insert(Role::Reducer);
        roles.insert(Role::BoundaryHunter);
        roles.insert(Role::Translator);
        roles.insert(Role::Historian);
    }

    // Conditional additions.
    if snapshot.support_strength < GRAVEKEEPER_SUPPORT_THRESHOLD {
        roles.insert(Role::GraveKeeper);
    }

    if cycle_count >= CARTOGRAPHER_MIN_CYCLE && !trajectory.is_empty() {
        let window_start = trajectory.len().saturating_sub(CARTOGRAPHER_STAGNATION_WINDOW);
        let slice = &trajectory[window_start..];
        let StagnationReport { is_stagnant, .. } =
            novelty::stagnation(slice, CARTOGRAPHER_STAGNATION_THRESHOLD);
        if is_stagnant {
            roles.insert(Role::Cartographer);
        }
    }

    if rng.gen_bool(PERTURBER_SCHEDULE_PROBABILITY) {
        roles.insert(Role::Perturber);
    }

    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[tokio::test]
    async fn explorer_and_critic_run_every_cycle() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        let snapshot = bb.get_snapshot().await;
        let mut r = rng();
        let roles = schedule(1, &snapshot, &[], &mut r);
        assert!(roles.contains(&Role::Explorer));
        assert!(roles.contains(&Role::Critic));
    }

    #[tokio::test]
    async fn cycle_multiple_of_three_adds_connector_group() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        let snapshot = bb.get_snapshot().await;
        let mut r = rng();
        let roles = schedule(3, &snapshot, &[], &mut r);
        assert!(roles.contains(&Role::Connector));
        assert!(roles.contains(&Role::Steelman));
        assert!(roles.contains(&Role::Operationalizer));
        assert!(roles.contains(&Role::Quantifier));
    }

    #[tokio::test]
    async fn low_support_adds_gravekeeper() {
        let bb = Blackboard::new("s1".into(), "claim".into(), None);
        bb.update_support(0.39 - 0.5, "test").await;
        let snapshot = bb.get_snapshot().await;
        let mut r = rng();
        let roles = schedule(1, &snapshot, &[], &mut r);
        assert!(roles.contains(&Role::GraveKeeper));
    }

    #[test]
    #[should_panic(expected = "1-based")]
    fn cycle_zero_is_rejected() {
        let snapshot = Snapshot {
            session_id: "s1".into(),
            current_claim: Some("c".into()),
            support_strength: 0.5,
            active_objection: None,
            analogy_of_record: None,
            cycle_count: 0,
            frontier_pool: Default::default(),
            cemetery: Vec::new(),
            graduated_claims: Vec::new(),
            translator_frameworks_used: Vec::new(),
            cost_limit_usd: None,
            seed_claim: "c".into(),
        };
        let mut r = rng();
        schedule(0, &snapshot, &[], &mut r);
    }
}
