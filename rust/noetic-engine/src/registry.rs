//! Session registry (C8): the concurrent table of active reasoning
//! sessions, keyed by session id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::agents::AgentRunner;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::persistence::PersistenceStore;
use crate::runner::{CycleReport, CycleRunner, RunnerState};
use crate::trajectory::Embedder;
use noetic_config::SessionConfig;

/// How long a stopped session's entry stays queryable in the registry
/// before being evicted, so a client polling status right after `stop`
/// doesn't race a 404.
pub const STOP_GRACE_WINDOW: Duration = Duration::from_secs(25);

/// Point-in-time view of a session, returned by `get_info`/`list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub state: RunnerState,
    pub cycle_count: u64,
    pub max_cycles: u64,
    pub stats: CycleReport,
}

/// Concurrent table of sessions. Cheaply `Clone` (every field is an `Arc`),
/// so a background task (e.g. the stop grace-window eviction) can hold its
/// own handle without borrowing the registry.
pub struct SessionRegistry<E: Embedder> {
    sessions: Arc<DashMap<String, CycleRunner<E>>>,
    trajectory: Arc<crate::trajectory::TrajectoryStore<E>>,
    agent_runner: Arc<dyn AgentRunner>,
    persistence: Arc<dyn PersistenceStore>,
    events: Arc<EventBus>,
    next_id: Arc<AtomicU64>,
}

impl<E: Embedder> Clone for SessionRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            trajectory: self.trajectory.clone(),
            agent_runner: self.agent_runner.clone(),
            persistence: self.persistence.clone(),
            events: self.events.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<E: Embedder + 'static> SessionRegistry<E> {
    pub fn new(
        embedder_store: Arc<crate::trajectory::TrajectoryStore<E>>,
        agent_runner: Arc<dyn AgentRunner>,
        persistence: Arc<dyn PersistenceStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            trajectory: embedder_store,
            agent_runner,
            persistence,
            events,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Allocate the next `session_NNNNNN` id (zero-padded to 6 digits,
    /// monotonically increasing, 1-based). Zero-padding keeps ascending
    /// numeric order equal to ascending lexicographic order, which is what
    /// [`SessionRegistry::list`] sorts by.
    fn next_session_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("session_{n:06}")
    }

    /// Allocate a session id, create the session, and start it. This is the
    /// external Session API's `start(config) -> session_id` (SPEC_FULL
    /// §6.3); [`SessionRegistry::start`] is the lower-level primitive for
    /// callers (tests, recovery from a persisted id) that already have an
    /// id in hand.
    pub async fn start_session(&self, config: SessionConfig) -> EngineResult<String> {
        let session_id = self.next_session_id();
        self.start(session_id.clone(), config).await?;
        Ok(session_id)
    }

    /// Create and start a new session under `session_id`. Errors if
    /// `session_id` is already registered and not yet evicted from a prior
    /// run.
    pub async fn start(&self, session_id: String, config: SessionConfig) -> EngineResult<()> {
        if self.sessions.contains_key(&session_id) {
            return Err(EngineError::AlreadyInState {
                session_id,
                state: "registered",
            });
        }

        let runner = CycleRunner::new(
            session_id.clone(),
            config,
            self.trajectory.clone(),
            self.agent_runner.clone(),
            self.persistence.clone(),
            self.events.clone(),
        );
        self.sessions.insert(session_id.clone(), runner.clone());
        runner.start().await
    }

    pub async fn pause(&self, session_id: &str) -> EngineResult<()> {
        self.get(session_id)?.pause().await
    }

    pub async fn resume(&self, session_id: &str) -> EngineResult<()> {
        self.get(session_id)?.resume().await
    }

    /// Stop a session and schedule its eviction after [`STOP_GRACE_WINDOW`].
    pub async fn stop(&self, session_id: &str) -> EngineResult<()> {
        let runner = self.get(session_id)?;
        runner.stop().await?;

        let sessions = self.sessions.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE_WINDOW).await;
            sessions.remove(&id);
        });
        Ok(())
    }

    pub async fn status(&self, session_id: &str) -> EngineResult<RunnerState> {
        Ok(self.get(session_id)?.state().await)
    }

    pub async fn get_info(&self, session_id: &str) -> EngineResult<SessionInfo> {
        let runner = self.get(session_id)?;
        Ok(SessionInfo {
            session_id: session_id.to_string(),
            state: runner.state().await,
            cycle_count: runner.cycle_count().await,
            max_cycles: runner.config().max_cycles,
            stats: runner.stats().await,
        })
    }

    /// All registered sessions as `(session_id, state)`, sorted by id
    /// ascending.
    pub async fn list(&self) -> Vec<(String, RunnerState)> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(runner) = self.sessions.get(&id) {
                out.push((id, runner.state().await));
            }
        }
        out
    }

    /// The session id of the (at most one, by convention) currently
    /// `Running` session, if any.
    pub async fn get_active_session(&self) -> Option<String> {
        for entry in self.sessions.iter() {
            if entry.value().state().await == RunnerState::Running {
                return Some(entry.key().clone());
            }
        }
        None
    }

    fn get(&self, session_id: &str) -> EngineResult<CycleRunner<E>> {
        self.sessions
            .get(session_id)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Proposal, ProposalOutput, Role};
    use crate::blackboard::Snapshot;
    use crate::persistence::InMemoryStore;
    use crate::trajectory::{HashEmbedder, TrajectoryStore};
    use async_trait::async_trait;

    struct StubRunner;

    #[async_trait]
    impl AgentRunner for StubRunner {
        async fn run(&self, role: Role, _snapshot: &Snapshot, model: &str) -> Result<Proposal, String> {
            Ok(Proposal {
                role,
                model: model.to_string(),
                output: ProposalOutput::Explorer {
                    new_claim: "a claim".into(),
                },
                confidence_delta: 0.0,
            })
        }
    }

    fn registry() -> SessionRegistry<HashEmbedder> {
        SessionRegistry::new(
            Arc::new(TrajectoryStore::new(HashEmbedder::default())),
            Arc::new(StubRunner),
            Arc::new(InMemoryStore::new()),
            Arc::new(EventBus::new()),
        )
    }

    fn config() -> SessionConfig {
        let mut cfg = SessionConfig::default();
        cfg.seed_claim = "Entropy increases".into();
        cfg.max_cycles = 3;
        cfg
    }

    #[tokio::test]
    async fn starting_twice_with_the_same_id_errors() {
        let reg = registry();
        reg.start("s1".into(), config()).await.unwrap();
        let err = reg.start("s1".into(), config()).await;
        assert!(matches!(err, Err(EngineError::AlreadyInState { .. })));
    }

    #[tokio::test]
    async fn start_session_assigns_zero_padded_monotonic_ids() {
        let reg = registry();
        let first = reg.start_session(config()).await.unwrap();
        let second = reg.start_session(config()).await.unwrap();
        assert_eq!(first, "session_000001");
        assert_eq!(second, "session_000002");
    }

    #[tokio::test]
    async fn status_of_unknown_session_errors() {
        let reg = registry();
        let err = reg.status("nope").await;
        assert!(matches!(err, Err(EngineError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn list_reflects_registered_sessions_sorted_ascending() {
        let reg = registry();
        reg.start("s2".into(), config()).await.unwrap();
        reg.start("s1".into(), config()).await.unwrap();
        let ids: Vec<String> = reg.list().await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
    }
}
