//! Agent dispatcher (C5): fans out the scheduled roles concurrently under
//! one cycle deadline, cancelling stragglers cooperatively.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{AgentError, AgentResult, AgentRunner, Role};
use crate::blackboard::Snapshot;
use crate::cancel_token::CancelToken;

/// Summary counters alongside the raw per-agent results, used for the
/// "empty cycle" warning and for session-level observability.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub results: Vec<AgentResult>,
    pub timeouts: usize,
    pub errors: usize,
}

/// Dispatch `roles` concurrently against `runner`, each reading the same
/// `snapshot`, picking a model from `model_pool` round-robin by role
/// ordinal. All tasks share one `deadline`; on expiry, still-running tasks
/// are cancelled via `cancel_token` and their slot resolves to
/// `AgentError::Timeout`.
pub async fn dispatch(
    roles: &BTreeSet<Role>,
    snapshot: Arc<Snapshot>,
    runner: Arc<dyn AgentRunner>,
    model_pool: &[String],
    deadline: Duration,
    cancel_token: CancelToken,
) -> DispatchSummary {
    let mut handles = Vec::with_capacity(roles.len());

    for (i, &role) in roles.iter().enumerate() {
        let snapshot = snapshot.clone();
        let runner = runner.clone();
        let model = model_pool
            .get(i % model_pool.len().max(1))
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let token = cancel_token.child_token();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => AgentResult::Err(AgentError::Timeout { role }),
                outcome = runner.run(role, &snapshot, &model) => match outcome {
                    Ok(proposal) => AgentResult::Ok(proposal),
                    Err(reason) => AgentResult::Err(AgentError::Crashed { role, reason }),
                },
            }
        });
        handles.push(handle);
    }

    let deadline_token = cancel_token.clone();
    let deadline_task = tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        deadline_token.cancel();
    });

    let mut summary = DispatchSummary::default();
    for handle in handles {
        let result = match handle.await {
            Ok(r) => r,
            Err(_join_err) => AgentResult::Err(AgentError::Crashed {
                role: Role::Explorer,
                reason: "agent task panicked".to_string(),
            }),
        };
        match &result {
            AgentResult::Err(AgentError::Timeout { .. }) => summary.timeouts += 1,
            AgentResult::Err(_) => summary.errors += 1,
            AgentResult::Ok(_) => {}
        }
        summary.results.push(result);
    }
    deadline_task.abort();

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Proposal, ProposalOutput};
    use async_trait::async_trait;
    use tokio::time::Duration as TokioDuration;

    struct EchoRunner;

    #[async_trait]
    impl AgentRunner for EchoRunner {
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

    struct HangingRunner;

    #[async_trait]
    impl AgentRunner for HangingRunner {
        async fn run(&self, _role: Role, _snapshot: &Snapshot, _model: &str) -> Result<Proposal, String> {
            tokio::time::sleep(TokioDuration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot {
            session_id: "s1".into(),
            current_claim: Some("c".into()),
            support_strength: 0.5,
            active_objection: None,
            analogy_of_record: None,
            cycle_count: 1,
            frontier_pool: Default::default(),
            cemetery: Vec::new(),
            graduated_claims: Vec::new(),
            translator_frameworks_used: Vec::new(),
            cost_limit_usd: None,
            seed_claim: "c".into(),
        })
    }

    #[tokio::test]
    async fn all_roles_complete_when_within_deadline() {
        let mut roles = BTreeSet::new();
        roles.insert(Role::Explorer);
        roles.insert(Role::Critic);
        let summary = dispatch(
            &roles,
            snapshot(),
            Arc::new(EchoRunner),
            &["test-model".to_string()],
            Duration::from_secs(5),
            CancelToken::new(),
        )
        .await;
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.timeouts, 0);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_produces_timeouts() {
        let mut roles = BTreeSet::new();
        roles.insert(Role::Explorer);
        let summary = dispatch(
            &roles,
            snapshot(),
            Arc::new(HangingRunner),
            &["test-model".to_string()],
            Duration::from_millis(10),
            CancelToken::new(),
        )
        .await;
        assert_eq!(summary.timeouts, 1);
        assert!(matches!(
            summary.results[0],
            AgentResult::Err(AgentError::Timeout { .. })
        ));
    }
}
