//! Error taxonomy for the reasoning session engine.

use thiserror::Error;

/// Result type used throughout `noetic-engine`.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors a blackboard mutation, cycle phase, or session-registry
/// operation can raise.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A blackboard invariant would be violated by the requested mutation.
    #[error("blackboard invariant violated: {0}")]
    InvariantViolation(String),

    /// `embed` was called with empty or whitespace-only text.
    #[error("cannot embed empty text")]
    EmptyText,

    /// No frontier idea is available to resurrect a dead claim.
    #[error("no frontiers available")]
    NoFrontiersAvailable,

    /// The scheduler produced no agents in event-driven mode.
    #[error("no agents spawned for cycle {0}")]
    NoAgentsSpawned(u64),

    /// The arbiter failed to process the dispatcher's results.
    #[error("arbiter failed: {0}")]
    ArbiterFailed(String),

    /// A session command was invoked against a session in the wrong state.
    #[error("session {session_id} already {state}")]
    AlreadyInState { session_id: String, state: &'static str },

    /// A session command requires a state the session isn't in.
    #[error("session {session_id} is not {state}")]
    NotInState { session_id: String, state: &'static str },

    /// No session exists with the given id.
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// `pause` on a session that isn't `Running` (`Idle` or `Failed`).
    #[error("session {0} is not running")]
    NotRunning(String),
    /// `pause` on an already-`Paused` session.
    #[error("session {0} is already paused")]
    AlreadyPaused(String),
    /// `pause` on a `Stopped` session.
    #[error("session {0} cannot be paused: already stopped")]
    CannotPauseStopped(String),
    /// `pause` on a `Completed` session.
    #[error("session {0} cannot be paused: already completed")]
    CannotPauseCompleted(String),
    /// `resume` on a session that isn't `Paused`.
    #[error("session {0} is not paused")]
    NotPaused(String),
    /// `resume` on a `Stopped` session.
    #[error("session {0} cannot be resumed: already stopped")]
    CannotResumeStopped(String),
    /// `resume` on a `Completed` session.
    #[error("session {0} cannot be resumed: already completed")]
    CannotResumeCompleted(String),
    /// `stop` on a session already in a terminal state.
    #[error("session {0} is already stopped")]
    AlreadyStopped(String),

    /// Config validation failed; carries every violation found.
    #[error("invalid configuration: {0:?}")]
    InvalidConfig(Vec<String>),

    /// The persistence layer failed a required (non-best-effort) write.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal error that should not occur in correct code.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<noetic_config::ConfigError> for EngineError {
    fn from(err: noetic_config::ConfigError) -> Self {
        match err {
            noetic_config::ConfigError::Validation(violations) => {
                EngineError::InvalidConfig(violations)
            }
            other => EngineError::Internal(other.to_string()),
        }
    }
}
