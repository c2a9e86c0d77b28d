//! External collaborators the RESET phase triggers best-effort: the
//! summarizer and the claim-diff/change-detector. Both are implemented
//! elsewhere; the core only needs their shape and the guarantee that their
//! failure never aborts a cycle.

use async_trait::async_trait;

use crate::blackboard::Snapshot;

/// Produces a running natural-language summary of a session's progress.
/// Failure is non-fatal: the runner logs it and continues.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, snapshot: &Snapshot) -> Result<String, String>;
}

/// Detects and describes the transition between a session's previous and
/// current claim (e.g. "refined", "reversed", "narrowed"). Failure is
/// non-fatal, matching `Summarizer`.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    async fn describe_transition(
        &self,
        previous_claim: Option<&str>,
        current_claim: Option<&str>,
    ) -> Result<Option<String>, String>;
}

/// Default no-op summarizer: always fails, so the runner's best-effort
/// call is a silent, cheap no-op when no real summarizer is wired in.
#[derive(Default)]
pub struct NullSummarizer;

#[async_trait]
impl Summarizer for NullSummarizer {
    async fn summarize(&self, _snapshot: &Snapshot) -> Result<String, String> {
        Err("no summarizer configured".to_string())
    }
}

/// Default no-op change detector: reports no transition.
#[derive(Default)]
pub struct NullChangeDetector;

#[async_trait]
impl ChangeDetector for NullChangeDetector {
    async fn describe_transition(
        &self,
        _previous_claim: Option<&str>,
        _current_claim: Option<&str>,
    ) -> Result<Option<String>, String> {
        Ok(None)
    }
}
