//! Integration tests for the full session lifecycle: registry-driven
//! start/pause/resume/stop, and a multi-cycle run against an in-memory
//! persistence store and trajectory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use noetic_config::{CycleMode, SessionConfig};
use noetic_engine::agents::{AgentRunner, Proposal, ProposalOutput, Role};
use noetic_engine::blackboard::Snapshot;
use noetic_engine::error::EngineError;
use noetic_engine::events::EventBus;
use noetic_engine::persistence::InMemoryStore;
use noetic_engine::registry::SessionRegistry;
use noetic_engine::runner::RunnerState;
use noetic_engine::trajectory::{HashEmbedder, TrajectoryStore};

/// Always proposes a steady Explorer claim with a tiny sleep, so a cycle
/// takes long enough for `pause`/`stop` to land mid-run instead of racing
/// the whole session to completion.
struct SlowExplorerRunner {
    delay: Duration,
}

#[async_trait]
impl AgentRunner for SlowExplorerRunner {
    async fn run(&self, role: Role, snapshot: &Snapshot, model: &str) -> Result<Proposal, String> {
        tokio::time::sleep(self.delay).await;
        let output = match role {
            Role::Explorer => ProposalOutput::Explorer {
                new_claim: snapshot
                    .current_claim
                    .clone()
                    .unwrap_or_else(|| "fallback claim".to_string()),
            },
            Role::Critic => ProposalOutput::Critic {
                objection: "no objection".to_string(),
                target_premise: "unrelated premise".to_string(),
            },
            other => return Err(format!("SlowExplorerRunner has no rule for {other}")),
        };
        Ok(Proposal {
            role,
            model: model.to_string(),
            output,
            confidence_delta: 0.0,
        })
    }
}

fn registry(delay: Duration) -> SessionRegistry<HashEmbedder> {
    SessionRegistry::new(
        Arc::new(TrajectoryStore::new(HashEmbedder::default())),
        Arc::new(SlowExplorerRunner { delay }),
        Arc::new(InMemoryStore::new()),
        Arc::new(EventBus::new()),
    )
}

fn long_running_config() -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.seed_claim = "Entropy increases".to_string();
    cfg.max_cycles = 50;
    cfg.cycle_mode = CycleMode::EventDriven;
    cfg
}

/// Scenario 6 (SPEC_FULL §8): start -> running; pause -> paused; pause
/// again -> already_paused; resume -> running; stop -> stopped; resume ->
/// cannot_resume_stopped.
#[tokio::test]
async fn session_lifecycle_transitions_match_the_literal_scenario() {
    let reg = registry(Duration::from_millis(20));
    let session_id = reg.start_session(long_running_config()).await.unwrap();

    assert_eq!(reg.status(&session_id).await.unwrap(), RunnerState::Running);

    reg.pause(&session_id).await.unwrap();
    assert_eq!(reg.status(&session_id).await.unwrap(), RunnerState::Paused);

    let err = reg.pause(&session_id).await;
    assert!(matches!(err, Err(EngineError::AlreadyPaused(_))));

    reg.resume(&session_id).await.unwrap();
    assert_eq!(reg.status(&session_id).await.unwrap(), RunnerState::Running);

    reg.stop(&session_id).await.unwrap();
    assert_eq!(reg.status(&session_id).await.unwrap(), RunnerState::Stopped);

    let err = reg.resume(&session_id).await;
    assert!(matches!(err, Err(EngineError::CannotResumeStopped(_))));
}

#[tokio::test]
async fn pausing_an_idle_or_stopped_session_is_not_running() {
    let reg = registry(Duration::from_millis(5));
    let session_id = reg.start_session(long_running_config()).await.unwrap();
    reg.stop(&session_id).await.unwrap();

    let err = reg.pause(&session_id).await;
    assert!(matches!(err, Err(EngineError::CannotPauseStopped(_))));
}

/// A session run to completion produces exactly one trajectory point per
/// completed cycle (P1) and a monotonically increasing cycle count (P3).
#[tokio::test]
async fn short_session_runs_to_completion_with_one_trajectory_point_per_cycle() {
    let trajectory = Arc::new(TrajectoryStore::new(HashEmbedder::default()));
    let reg = SessionRegistry::new(
        trajectory.clone(),
        Arc::new(SlowExplorerRunner {
            delay: Duration::from_millis(1),
        }),
        Arc::new(InMemoryStore::new()),
        Arc::new(EventBus::new()),
    );

    let mut cfg = long_running_config();
    cfg.max_cycles = 4;
    let session_id = reg.start_session(cfg).await.unwrap();

    for _ in 0..200 {
        if reg.status(&session_id).await.unwrap() == RunnerState::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(reg.status(&session_id).await.unwrap(), RunnerState::Completed);
    let points = trajectory.get_trajectory(&session_id).await;
    assert_eq!(points.len(), 4);
    for (i, point) in points.iter().enumerate() {
        assert_eq!(point.cycle_number, i as u64 + 1);
    }
}

#[tokio::test]
async fn list_reports_multiple_sessions_sorted_by_ascending_id() {
    let reg = registry(Duration::from_millis(1));
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(reg.start_session(long_running_config()).await.unwrap());
    }
    let listed: Vec<String> = reg.list().await.into_iter().map(|(id, _)| id).collect();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(listed, expected);
}
