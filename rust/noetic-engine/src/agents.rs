//! Agent roles and the proposal shapes they produce.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blackboard::Snapshot;

/// Transitional prefixes that mark a sentence as a restated conclusion
/// rather than a fresh declarative claim. Shared between the Explorer's
/// claim-normalization step and the Critic's conclusion-indicator check.
pub const TRANSITIONAL_PREFIXES: &[&str] =
    &["Therefore", "Thus", "Consequently", "Hence", "So"];

/// The character immediately after a matched prefix that counts as a word
/// boundary: a comma, whitespace, or end-of-string. Without this, `"So"`
/// would also match the start of `"Some"`/`"Social"`.
fn boundary_after(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => c == ',' || c.is_whitespace(),
    }
}

/// The leading transitional prefix in `text`, if one is present and
/// followed by a word boundary (comma, whitespace, or end-of-string).
fn matching_prefix<'a>(text: &'a str) -> Option<(&'static str, &'a str)> {
    TRANSITIONAL_PREFIXES.iter().find_map(|&prefix| {
        text.strip_prefix(prefix)
            .filter(|rest| boundary_after(rest))
            .map(|rest| (prefix, rest))
    })
}

/// Strip a leading transitional prefix (and following comma/whitespace)
/// from a claim, returning the trimmed declarative remainder. The prefix
/// must be followed by a word boundary, so `"So the claim holds"` is
/// stripped but `"Some entropy increases"` is left untouched.
pub fn strip_transitional_prefix(text: &str) -> String {
    let trimmed = text.trim();
    if let Some((_, rest)) = matching_prefix(trimmed) {
        let rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if !rest.is_empty() {
            return rest.to_string();
        }
    }
    trimmed.to_string()
}

/// True if `text` begins with one of [`TRANSITIONAL_PREFIXES`] followed by
/// a word boundary — i.e. it reads as a conclusion rather than a premise.
/// Requiring the boundary keeps `"Social structures cause X"` from being
/// conflated with the `"So"` prefix.
pub fn is_conclusion_indicator(text: &str) -> bool {
    matching_prefix(text.trim()).is_some()
}

/// The closed set of specialized agent roles the scheduler can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Explorer,
    Critic,
    Connector,
    Steelman,
    Operationalizer,
    Quantifier,
    Reducer,
    BoundaryHunter,
    Translator,
    Historian,
    GraveKeeper,
    Cartographer,
    Perturber,
}

impl Role {
    /// All roles, in the dispatcher-order used to break ties in the
    /// Arbiter's "others" bucket.
    pub const ALL: [Role; 13] = [
        Role::Explorer,
        Role::Critic,
        Role::Connector,
        Role::Steelman,
        Role::Operationalizer,
        Role::Quantifier,
        Role::Reducer,
        Role::BoundaryHunter,
        Role::Translator,
        Role::Historian,
        Role::GraveKeeper,
        Role::Cartographer,
        Role::Perturber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Explorer => "explorer",
            Role::Critic => "critic",
            Role::Connector => "connector",
            Role::Steelman => "steelman",
            Role::Operationalizer => "operationalizer",
            Role::Quantifier => "quantifier",
            Role::Reducer => "reducer",
            Role::BoundaryHunter => "boundary_hunter",
            Role::Translator => "translator",
            Role::Historian => "historian",
            Role::GraveKeeper => "grave_keeper",
            Role::Cartographer => "cartographer",
            Role::Perturber => "perturber",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The role-specific payload carried by a [`Proposal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ProposalOutput {
    Explorer { new_claim: String },
    Critic { objection: String, target_premise: String },
    Connector {
        analogy: String,
        source_domain: String,
        mapping_explanation: String,
        valid: bool,
    },
    Steelman { strengthened_claim: String, valid: bool },
    Operationalizer { operational_definition: String, valid: bool },
    Quantifier { quantified_claim: String, valid: bool },
    Reducer { reduced_claim: String, valid: bool },
    BoundaryHunter { boundary_condition: String, valid: bool },
    Translator { framework: String, translated_claim: String, valid: bool },
    Historian { precedent: String, valid: bool },
    GraveKeeper { recommendation: String, valid: bool },
    Cartographer { map_summary: String, valid: bool },
    Perturber { pivot_suggestion: String, valid: bool },
}

impl ProposalOutput {
    pub fn role(&self) -> Role {
        match self {
            ProposalOutput::Explorer { .. } => Role::Explorer,
            ProposalOutput::Critic { .. } => Role::Critic,
            ProposalOutput::Connector { .. } => Role::Connector,
            ProposalOutput::Steelman { .. } => Role::Steelman,
            ProposalOutput::Operationalizer { .. } => Role::Operationalizer,
            ProposalOutput::Quantifier { .. } => Role::Quantifier,
            ProposalOutput::Reducer { .. } => Role::Reducer,
            ProposalOutput::BoundaryHunter { .. } => Role::BoundaryHunter,
            ProposalOutput::Translator { .. } => Role::Translator,
            ProposalOutput::Historian { .. } => Role::Historian,
            ProposalOutput::GraveKeeper { .. } => Role::GraveKeeper,
            ProposalOutput::Cartographer { .. } => Role::Cartographer,
            ProposalOutput::Perturber { .. } => Role::Perturber,
        }
    }

    /// Whether the agent itself marked its output usable. Explorer/Critic
    /// carry no `valid` flag (they're always structurally valid; rules 3-4
    /// of the Arbiter filter them contextually instead).
    pub fn is_valid(&self) -> bool {
        match self {
            ProposalOutput::Explorer { .. } | ProposalOutput::Critic { .. } => true,
            ProposalOutput::Connector { valid, .. }
            | ProposalOutput::Steelman { valid, .. }
            | ProposalOutput::Operationalizer { valid, .. }
            | ProposalOutput::Quantifier { valid, .. }
            | ProposalOutput::Reducer { valid, .. }
            | ProposalOutput::BoundaryHunter { valid, .. }
            | ProposalOutput::Translator { valid, .. }
            | ProposalOutput::Historian { valid, .. }
            | ProposalOutput::GraveKeeper { valid, .. }
            | ProposalOutput::Cartographer { valid, .. }
            | ProposalOutput::Perturber { valid, .. } => *valid,
        }
    }
}

/// One agent's contribution to a cycle, as returned by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub role: Role,
    pub model: String,
    pub output: ProposalOutput,
    pub confidence_delta: f64,
}

/// The non-success outcomes a dispatched agent slot can resolve to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentError {
    Timeout { role: Role },
    Crashed { role: Role, reason: String },
    InvalidAgent { role: Role },
}

impl AgentError {
    pub fn role(&self) -> Role {
        match self {
            AgentError::Timeout { role }
            | AgentError::Crashed { role, .. }
            | AgentError::InvalidAgent { role } => *role,
        }
    }
}

/// One agent slot's outcome for a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentResult {
    Ok(Proposal),
    Err(AgentError),
}

impl AgentResult {
    pub fn role(&self) -> Role {
        match self {
            AgentResult::Ok(p) => p.role,
            AgentResult::Err(e) => e.role(),
        }
    }
}

/// The pluggable collaborator that actually talks to a language model.
/// Production wires in a real client; tests and the default CLI wire in
/// stubs (see `NullAgentRunner` in the root binary).
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, role: Role, snapshot: &Snapshot, model: &str) -> Result<Proposal, String>;
}
