//! Arbiter (C6): pure function from dispatched agent results to the list
//! of accepted mutations.

use crate::agents::{is_conclusion_indicator, AgentResult, ProposalOutput, Role};

/// One accepted contribution, ready for the runner to apply.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub role: Role,
    pub output: ProposalOutput,
    pub confidence_delta: f64,
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Apply the six acceptance rules to one cycle's dispatched results. Pure:
/// never touches a blackboard.
pub fn arbitrate(results: &[AgentResult]) -> Vec<Accepted> {
    let explorer_new_claim: Option<String> = results.iter().find_map(|r| match r {
        AgentResult::Ok(p) => match &p.output {
            ProposalOutput::Explorer { new_claim } => Some(new_claim.clone()),
            _ => None,
        },
        AgentResult::Err(_) => None,
    });

    let mut accepted = Vec::new();

    for result in results {
        let proposal = match result {
            AgentResult::Ok(p) => p,
            AgentResult::Err(_) => continue, // rule 1: drop errors/timeouts/crashes
        };

        if !proposal.output.is_valid() {
            continue; // rule 2
        }

        match &proposal.output {
            ProposalOutput::Critic { target_premise, .. } => {
                // Rule 3: Explorer/Critic interlock.
                if let Some(new_claim) = &explorer_new_claim {
                    if normalize(target_premise) == normalize(new_claim) {
                        continue;
                    }
                }
                // Rule 4: drop Critics targeting a conclusion indicator.
                if is_conclusion_indicator(target_premise) {
                    continue;
                }
            }
            ProposalOutput::Connector {
                analogy,
                source_domain,
                mapping_explanation,
                ..
            } => {
                // Rule 5: all three fields must be non-empty.
                if analogy.trim().is_empty()
                    || source_domain.trim().is_empty()
                    || mapping_explanation.trim().is_empty()
                {
                    continue;
                }
            }
            _ => {}
        }

        accepted.push(Accepted {
            role: proposal.role,
            output: proposal.output.clone(),
            confidence_delta: proposal.confidence_delta,
        });
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Proposal;

    fn ok(role: Role, output: ProposalOutput, delta: f64) -> AgentResult {
        AgentResult::Ok(Proposal {
            role,
            model: "test-model".into(),
            output,
            confidence_delta: delta,
        })
    }

    #[test]
    fn explorer_interlock_drops_matching_critic() {
        let results = vec![
            ok(
                Role::Explorer,
                ProposalOutput::Explorer {
                    new_claim: "Therefore X happens".into(),
                },
                0.10,
            ),
            ok(
                Role::Critic,
                ProposalOutput::Critic {
                    objection: "no".into(),
                    target_premise: "Therefore X happens".into(),
                },
                -0.15,
            ),
        ];
        let accepted = arbitrate(&results);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].role, Role::Explorer);
    }

    #[test]
    fn critic_targeting_a_conclusion_indicator_is_dropped() {
        let results = vec![ok(
            Role::Critic,
            ProposalOutput::Critic {
                objection: "no".into(),
                target_premise: "Thus Y follows".into(),
            },
            -0.1,
        )];
        assert!(arbitrate(&results).is_empty());
    }

    #[test]
    fn connector_missing_any_field_is_dropped() {
        let results = vec![ok(
            Role::Connector,
            ProposalOutput::Connector {
                analogy: "".into(),
                source_domain: "biology".into(),
                mapping_explanation: "maps".into(),
                valid: true,
            },
            0.05,
        )];
        assert!(arbitrate(&results).is_empty());
    }

    #[test]
    fn invalid_flagged_output_is_dropped() {
        let results = vec![ok(
            Role::Steelman,
            ProposalOutput::Steelman {
                strengthened_claim: "x".into(),
                valid: false,
            },
            0.05,
        )];
        assert!(arbitrate(&results).is_empty());
    }

    #[test]
    fn agent_errors_never_produce_accepted_entries() {
        let results = vec![AgentResult::Err(crate::agents::AgentError::Timeout {
            role: Role::Historian,
        })];
        assert!(arbitrate(&results).is_empty());
    }
}
