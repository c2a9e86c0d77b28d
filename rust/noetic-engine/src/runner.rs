//! Cycle runner (C7): the per-session state machine that drives the
//! READ -> RESURRECT -> WRITE -> ARBITER -> NOVELTY -> DECAY -> RESURRECT
//! -> PERTURB -> RESET pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::agents::AgentRunner;
use crate::arbiter::{self, Accepted};
use crate::blackboard::{Blackboard, TerminationReason};
use crate::cancel_token::CancelToken;
use crate::collaborators::{ChangeDetector, NullChangeDetector, NullSummarizer, Summarizer};
use crate::dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventBus};
use crate::novelty;
use crate::persistence::{ContributionRecord, PersistenceStore};
use crate::scheduler;
use crate::trajectory::{Embedder, TrajectoryStore};
use noetic_config::{CycleMode, SessionConfig};

/// The runner's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerState {
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl RunnerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunnerState::Completed | RunnerState::Stopped | RunnerState::Failed)
    }
}

/// Why a runner reached a terminal state; carried in the final lifecycle
/// event for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    MaxCyclesReached,
    Graduated,
    NoFrontiersAvailable,
    StoppedByOperator,
    CycleFailed,
}

/// Governs the double independent `p=0.2` draws around the Perturber
/// (scheduling, then activation) — see DESIGN.md's Open Question
/// resolution. Exposed as its own type so the combination is
/// independently testable rather than inlined probability arithmetic.
pub struct PerturberPolicy {
    pub activation_probability: f64,
}

impl Default for PerturberPolicy {
    fn default() -> Self {
        Self {
            activation_probability: scheduler::PERTURBER_SCHEDULE_PROBABILITY,
        }
    }
}

impl PerturberPolicy {
    /// The PERTURB phase's independent draw, separate from the scheduler's
    /// draw of whether Perturber ran at all this cycle.
    pub fn draw_activation(&self, rng: &mut impl Rng) -> bool {
        rng.gen_bool(self.activation_probability)
    }
}

/// Aggregate counters for one session's cycle history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub total_cycles: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub empty_cycles: u64,
}

struct RunnerInner<E: Embedder> {
    session_id: String,
    config: SessionConfig,
    blackboard: Blackboard,
    trajectory: Arc<TrajectoryStore<E>>,
    agent_runner: Arc<dyn AgentRunner>,
    persistence: Arc<dyn PersistenceStore>,
    events: Arc<EventBus>,
    state: RwLock<RunnerState>,
    stats: RwLock<CycleReport>,
    rng: Mutex<StdRng>,
    perturber_policy: PerturberPolicy,
    cancel_token: CancelToken,
    cost_limit_exceeded: AtomicBool,
    summarizer: Arc<dyn Summarizer>,
    change_detector: Arc<dyn ChangeDetector>,
}

/// Owns one session's blackboard and drives its cycles.
pub struct CycleRunner<E: Embedder> {
    inner: Arc<RunnerInner<E>>,
}

impl<E: Embedder> Clone for CycleRunner<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Embedder + 'static> CycleRunner<E> {
    pub fn new(
        session_id: String,
        config: SessionConfig,
        trajectory: Arc<TrajectoryStore<E>>,
        agent_runner: Arc<dyn AgentRunner>,
        persistence: Arc<dyn PersistenceStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let blackboard = Blackboard::new(
            session_id.clone(),
            config.seed_claim.clone(),
            config.cost_limit_usd,
        );
        Self {
            inner: Arc::new(RunnerInner {
                session_id,
                config,
                blackboard,
                trajectory,
                agent_runner,
                persistence,
                events,
                state: RwLock::new(RunnerState::Idle),
                stats: RwLock::new(CycleReport::default()),
                rng: Mutex::new(StdRng::from_entropy()),
                perturber_policy: PerturberPolicy::default(),
                cancel_token: CancelToken::new(),
                cost_limit_exceeded: AtomicBool::new(false),
                summarizer: Arc::new(NullSummarizer),
                change_detector: Arc::new(NullChangeDetector),
            }),
        }
    }

    /// Wire in real summarizer/change-detector collaborators in place of
    /// the default no-ops. Call before [`CycleRunner::start`], while the
    /// runner is still uniquely owned; a no-op if the handle has already
    /// been shared (e.g. inserted into the registry).
    pub fn with_collaborators(
        self,
        summarizer: Arc<dyn Summarizer>,
        change_detector: Arc<dyn ChangeDetector>,
    ) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.summarizer = summarizer;
                inner.change_detector = change_detector;
                Self { inner: Arc::new(inner) }
            }
            Err(inner) => Self { inner },
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub async fn state(&self) -> RunnerState {
        *self.inner.state.read().await
    }

    pub async fn cycle_count(&self) -> u64 {
        self.inner.blackboard.cycle_count().await
    }

    pub async fn stats(&self) -> CycleReport {
        self.inner.stats.read().await.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Start the self-scheduling loop. Errors with
    /// [`EngineError::AlreadyInState`] unless currently `Idle`.
    pub async fn start(self) -> EngineResult<()> {
        {
            let mut state = self.inner.state.write().await;
            if *state != RunnerState::Idle {
                return Err(EngineError::AlreadyInState {
                    session_id: self.inner.session_id.clone(),
                    state: "not idle",
                });
            }
            *state = RunnerState::Running;
        }

        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::SessionStarted {
                session_id: self.inner.session_id.clone(),
                blackboard_id: self.inner.session_id.clone(),
            },
        );

        tokio::spawn(async move {
            self.run_loop().await;
        });

        Ok(())
    }

    pub async fn pause(&self) -> EngineResult<()> {
        let mut state = self.inner.state.write().await;
        match *state {
            RunnerState::Running => {}
            RunnerState::Paused => return Err(EngineError::AlreadyPaused(self.inner.session_id.clone())),
            RunnerState::Stopped => {
                return Err(EngineError::CannotPauseStopped(self.inner.session_id.clone()))
            }
            RunnerState::Completed => {
                return Err(EngineError::CannotPauseCompleted(self.inner.session_id.clone()))
            }
            RunnerState::Idle | RunnerState::Failed => {
                return Err(EngineError::NotRunning(self.inner.session_id.clone()))
            }
        }
        *state = RunnerState::Paused;
        drop(state);
        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::SessionPaused {
                session_id: self.inner.session_id.clone(),
            },
        );
        Ok(())
    }

    pub async fn resume(&self) -> EngineResult<()> {
        {
            let mut state = self.inner.state.write().await;
            match *state {
                RunnerState::Paused => {}
                RunnerState::Stopped => {
                    return Err(EngineError::CannotResumeStopped(self.inner.session_id.clone()))
                }
                RunnerState::Completed => {
                    return Err(EngineError::CannotResumeCompleted(self.inner.session_id.clone()))
                }
                RunnerState::Running | RunnerState::Idle | RunnerState::Failed => {
                    return Err(EngineError::NotPaused(self.inner.session_id.clone()))
                }
            }
            if self.cycle_count().await >= self.inner.config.max_cycles {
                *state = RunnerState::Completed;
                return Ok(());
            }
            *state = RunnerState::Running;
        }
        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::SessionResumed {
                session_id: self.inner.session_id.clone(),
            },
        );

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run_loop().await;
        });
        Ok(())
    }

    pub async fn stop(&self) -> EngineResult<()> {
        let mut state = self.inner.state.write().await;
        if state.is_terminal() {
            return Err(EngineError::AlreadyStopped(self.inner.session_id.clone()));
        }
        *state = RunnerState::Stopped;
        drop(state);
        self.inner.cancel_token.cancel();
        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::SessionStopped {
                session_id: self.inner.session_id.clone(),
            },
        );
        Ok(())
    }

    async fn run_loop(self) {
        loop {
            {
                let state = *self.inner.state.read().await;
                if state != RunnerState::Running {
                    break;
                }
            }

            if self.cycle_count().await >= self.inner.config.max_cycles {
                self.finish(RunnerState::Completed, ShutdownReason::MaxCyclesReached)
                    .await;
                break;
            }

            match self.run_cycle().await {
                Ok(Some(reason)) => {
                    let shutdown = match reason {
                        TerminationReason::Graduated => ShutdownReason::Graduated,
                        TerminationReason::NoFrontiersAvailable => {
                            ShutdownReason::NoFrontiersAvailable
                        }
                    };
                    self.finish(RunnerState::Completed, shutdown).await;
                    break;
                }
                Ok(None) => {
                    let delay_ms = match self.inner.config.cycle_mode {
                        CycleMode::TimeBased => self.inner.config.cycle_timeout_ms,
                        CycleMode::EventDriven => 0,
                    };
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                Err(err) => {
                    tracing::error!(session_id = %self.inner.session_id, error = %err, "cycle failed");
                    self.finish(RunnerState::Failed, ShutdownReason::CycleFailed)
                        .await;
                    break;
                }
            }
        }
    }

    async fn finish(&self, state: RunnerState, reason: ShutdownReason) {
        *self.inner.state.write().await = state;
        match reason {
            ShutdownReason::CycleFailed => {
                tracing::error!(session_id = %self.inner.session_id, ?reason, "session shutdown")
            }
            _ => tracing::info!(session_id = %self.inner.session_id, ?reason, "session shutdown"),
        }
        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::SessionCompleted {
                session_id: self.inner.session_id.clone(),
                reason: format!("{reason:?}"),
            },
        );
    }

    /// Run exactly one cycle of the pipeline. `Ok(Some(reason))` means the
    /// session should end; `Ok(None)` means keep going.
    #[tracing::instrument(skip(self), fields(session_id = %self.inner.session_id))]
    pub async fn run_cycle(&self) -> EngineResult<Option<TerminationReason>> {
        let cycle_number = self.cycle_count().await + 1;
        let cycle_start = std::time::Instant::now();

        // --- READ ---
        let mut snapshot = self.inner.blackboard.get_snapshot().await;

        // --- RESURRECT (pre-cycle) ---
        if snapshot.current_claim.is_none() {
            let mut rng = self.inner.rng.lock().await;
            match self.inner.blackboard.resurrect(&mut *rng).await {
                Ok(_) => {}
                Err(EngineError::NoFrontiersAvailable) => {
                    return Ok(Some(TerminationReason::NoFrontiersAvailable));
                }
                Err(other) => return Err(other),
            }
            drop(rng);
            snapshot = self.inner.blackboard.get_snapshot().await;
        }

        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::CycleStarted {
                session_id: self.inner.session_id.clone(),
                cycle: cycle_number,
                blackboard_id: self.inner.session_id.clone(),
            },
        );

        let previous_claim = snapshot.current_claim.clone();

        // --- WRITE ---
        let trajectory = self.inner.trajectory.get_trajectory(&self.inner.session_id).await;
        let roles = {
            let mut rng = self.inner.rng.lock().await;
            scheduler::schedule(cycle_number, &snapshot, &trajectory, &mut *rng)
        };

        let dispatch_skipped = self.inner.cost_limit_exceeded.load(Ordering::Relaxed);

        let results = if roles.is_empty() {
            match self.inner.config.cycle_mode {
                CycleMode::EventDriven => {
                    return Err(EngineError::NoAgentsSpawned(cycle_number));
                }
                CycleMode::TimeBased => Vec::new(),
            }
        } else if dispatch_skipped {
            Vec::new()
        } else {
            let deadline = match self.inner.config.cycle_mode {
                CycleMode::TimeBased => Duration::from_millis(self.inner.config.cycle_duration_ms),
                CycleMode::EventDriven => Duration::from_millis(self.inner.config.cycle_timeout_ms),
            };
            let summary = dispatcher::dispatch(
                &roles,
                Arc::new(snapshot.clone()),
                self.inner.agent_runner.clone(),
                &self.inner.config.model_pool,
                deadline,
                self.inner.cancel_token.child_token(),
            )
            .await;

            {
                let mut stats = self.inner.stats.write().await;
                stats.timeouts += summary.timeouts as u64;
                stats.errors += summary.errors as u64;
                if summary.results.is_empty()
                    || summary.timeouts + summary.errors == summary.results.len()
                {
                    stats.empty_cycles += 1;
                    tracing::warn!(session_id = %self.inner.session_id, cycle = cycle_number, "empty cycle: every agent timed out or errored");
                }
            }

            summary.results
        };

        // --- ARBITER ---
        let accepted = arbiter::arbitrate(&results);

        for result in &results {
            let (output_json, accepted_flag, support_delta) = match result {
                crate::agents::AgentResult::Ok(p) => {
                    let is_accepted = accepted.iter().any(|a| {
                        a.role == p.role && a.confidence_delta == p.confidence_delta
                    });
                    (
                        serde_json::to_string(&p.output).unwrap_or_default(),
                        is_accepted,
                        p.confidence_delta,
                    )
                }
                crate::agents::AgentResult::Err(_) => (String::new(), false, 0.0),
            };
            let _ = self
                .inner
                .persistence
                .record_contribution(ContributionRecord {
                    session_id: self.inner.session_id.clone(),
                    cycle: cycle_number,
                    role: result.role().to_string(),
                    model: match result {
                        crate::agents::AgentResult::Ok(p) => p.model.clone(),
                        crate::agents::AgentResult::Err(_) => String::new(),
                    },
                    output_json,
                    accepted: accepted_flag,
                    support_delta,
                })
                .await;
        }

        if let Some(reason) = self.apply_accepted(&accepted).await {
            return Ok(Some(reason));
        }

        // --- NOVELTY BONUS ---
        if self.inner.config.novelty_bonus_enabled {
            if let Some(claim) = self.inner.blackboard.current_claim().await {
                if let Ok(vector) = self.inner.trajectory.embed(&claim).await {
                    let trajectory = self.inner.trajectory.get_trajectory(&self.inner.session_id).await;
                    let score = novelty::novelty(&vector, &trajectory);
                    let bonus = novelty::apply_novelty_bonus(score, 0.0);
                    if bonus > 0.0 {
                        if let Some(reason) =
                            self.update_support_and_emit(bonus, "novelty").await
                        {
                            return Ok(Some(reason));
                        }
                    }
                }
            }
        }

        // --- DECAY ---
        self.apply_decay_and_emit(self.inner.config.decay_rate).await;

        // --- RESURRECT (post-decay) ---
        if !self.inner.blackboard.is_claim_alive().await {
            let mut rng = self.inner.rng.lock().await;
            match self.inner.blackboard.resurrect(&mut *rng).await {
                Ok(_) => {}
                Err(EngineError::NoFrontiersAvailable) => {
                    return Ok(Some(TerminationReason::NoFrontiersAvailable));
                }
                Err(other) => return Err(other),
            }
        }

        // --- PERTURB ---
        {
            let mut rng = self.inner.rng.lock().await;
            if self.inner.perturber_policy.draw_activation(&mut *rng)
                && self.inner.blackboard.has_unactivated_frontier().await
            {
                tracing::debug!(session_id = %self.inner.session_id, cycle = cycle_number, "perturber pivot noted");
            }
        }

        // --- cost limit check ---
        if let Some(limit) = self.inner.config.cost_limit_usd {
            let spent = self.inner.persistence.total_cost_usd(&self.inner.session_id).await;
            if spent >= limit {
                if !self.inner.cost_limit_exceeded.swap(true, Ordering::Relaxed) {
                    tracing::warn!(session_id = %self.inner.session_id, spent, limit, "cost limit reached; dispatch suspended from next cycle");
                }
            }
        }

        // --- RESET ---
        let final_snapshot = self.inner.blackboard.get_snapshot().await;
        let _ = self
            .inner
            .persistence
            .save_blackboard_snapshot(&final_snapshot)
            .await;

        if let Some(claim) = &final_snapshot.current_claim {
            if let Ok(vector) = self.inner.trajectory.embed(claim).await {
                self.inner
                    .trajectory
                    .store_trajectory_point(
                        &self.inner.session_id,
                        cycle_number,
                        vector,
                        claim.clone(),
                        final_snapshot.support_strength,
                    )
                    .await;
            }
        }

        let cycle_count = self.inner.blackboard.increment_cycle().await;
        self.inner.events.publish_blackboard_event(
            &self.inner.session_id,
            Event::CycleCountChanged {
                session_id: self.inner.session_id.clone(),
                cycle_count,
            },
        );
        {
            let mut stats = self.inner.stats.write().await;
            stats.total_cycles += 1;
        }

        // Best-effort external collaborators: their failure never affects
        // the cycle result.
        if let Ok(summary) = self.inner.summarizer.summarize(&final_snapshot).await {
            self.inner.events.publish_session_event(
                &self.inner.session_id,
                Event::SummaryUpdated {
                    session_id: self.inner.session_id.clone(),
                    summary,
                },
            );
        }
        if let Ok(Some(transition)) = self
            .inner
            .change_detector
            .describe_transition(previous_claim.as_deref(), final_snapshot.current_claim.as_deref())
            .await
        {
            self.inner.events.publish_session_event(
                &self.inner.session_id,
                Event::ClaimChanged {
                    session_id: self.inner.session_id.clone(),
                    transition,
                },
            );
        }

        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::cycle_complete(
                self.inner.session_id.clone(),
                cycle_number,
                cycle_start.elapsed().as_millis() as u64,
                final_snapshot.support_strength,
                final_snapshot.current_claim.clone(),
            ),
        );

        Ok(None)
    }

    /// Apply accepted contributions in deterministic order: Explorer (may
    /// change claim) first, then Critic (sets objection), then Connector
    /// (sets analogy), then all other roles' `confidence_delta` applied via
    /// `update_support`. Only the "others" bucket feeds `confidence_delta`
    /// into support — Explorer/Critic/Connector contribute their structural
    /// mutation only. Stops and returns early the moment a mutation signals
    /// the session should end (graduation).
    async fn apply_accepted(&self, accepted: &[Accepted]) -> Option<TerminationReason> {
        use crate::agents::{ProposalOutput, Role};

        for role in [Role::Explorer, Role::Critic, Role::Connector] {
            for entry in accepted.iter().filter(|a| a.role == role) {
                self.apply_structural(&entry.output).await;
            }
        }

        for role in Role::ALL {
            if matches!(role, Role::Explorer | Role::Critic | Role::Connector) {
                continue;
            }
            for entry in accepted.iter().filter(|a| a.role == role) {
                self.apply_structural(&entry.output).await;
                if entry.confidence_delta != 0.0 {
                    if let Some(reason) = self
                        .update_support_and_emit(entry.confidence_delta, "arbiter")
                        .await
                    {
                        return Some(reason);
                    }
                }
            }
        }
        None
    }

    /// `Blackboard::update_support`, plus the `support_updated` /
    /// `claim_died` / `claim_graduated` events its side effects imply.
    async fn update_support_and_emit(&self, delta: f64, cause: &str) -> Option<TerminationReason> {
        let claim_before = self.inner.blackboard.current_claim().await;
        let reason = self.inner.blackboard.update_support(delta, cause).await;
        let support = self.inner.blackboard.support_strength().await;
        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::SupportUpdated {
                session_id: self.inner.session_id.clone(),
                support,
            },
        );
        if let Some(claim) = claim_before {
            if matches!(reason, Some(TerminationReason::Graduated)) {
                self.inner.events.publish_session_event(
                    &self.inner.session_id,
                    Event::ClaimGraduated {
                        session_id: self.inner.session_id.clone(),
                        claim,
                    },
                );
            } else if !self.inner.blackboard.is_claim_alive().await {
                self.inner.events.publish_session_event(
                    &self.inner.session_id,
                    Event::ClaimDied {
                        session_id: self.inner.session_id.clone(),
                        claim,
                        cause: cause.to_string(),
                    },
                );
            }
        }
        reason
    }

    /// `Blackboard::apply_decay`, plus the `support_updated` / `claim_died`
    /// events its side effect implies.
    async fn apply_decay_and_emit(&self, decay_rate: f64) {
        let claim_before = self.inner.blackboard.current_claim().await;
        self.inner.blackboard.apply_decay(decay_rate).await;
        let support = self.inner.blackboard.support_strength().await;
        self.inner.events.publish_session_event(
            &self.inner.session_id,
            Event::SupportUpdated {
                session_id: self.inner.session_id.clone(),
                support,
            },
        );
        if let Some(claim) = claim_before {
            if !self.inner.blackboard.is_claim_alive().await {
                self.inner.events.publish_session_event(
                    &self.inner.session_id,
                    Event::ClaimDied {
                        session_id: self.inner.session_id.clone(),
                        claim,
                        cause: "decay".to_string(),
                    },
                );
            }
        }
    }

    /// The role-specific non-support mutation an accepted proposal carries,
    /// independent of whether its `confidence_delta` is applied. GraveKeeper
    /// and Perturber are the two roles whose payload is a candidate
    /// replacement claim, so their accepted output nominates a frontier
    /// idea rather than mutating the blackboard's live fields directly.
    async fn apply_structural(&self, output: &crate::agents::ProposalOutput) {
        use crate::agents::ProposalOutput;

        match output {
            ProposalOutput::Explorer { new_claim } => {
                let claim = crate::agents::strip_transitional_prefix(new_claim);
                self.inner.blackboard.update_claim(claim.clone()).await;
                self.inner.events.publish_session_event(
                    &self.inner.session_id,
                    Event::ClaimUpdated {
                        session_id: self.inner.session_id.clone(),
                        claim,
                    },
                );
            }
            ProposalOutput::Critic { objection, .. } => {
                self.inner
                    .blackboard
                    .set_active_objection(Some(objection.clone()))
                    .await;
            }
            ProposalOutput::Connector { analogy, .. } => {
                self.inner.blackboard.set_analogy(Some(analogy.clone())).await;
            }
            ProposalOutput::Translator { framework, .. } => {
                self.inner.blackboard.add_translator_framework(framework.clone()).await;
            }
            ProposalOutput::GraveKeeper { recommendation, .. } => {
                self.inner.blackboard.nominate_frontier(recommendation.clone()).await;
            }
            ProposalOutput::Perturber { pivot_suggestion, .. } => {
                self.inner.blackboard.nominate_frontier(pivot_suggestion.clone()).await;
            }
            _ => {}
        }
    }
}
