//! Layered TOML + environment configuration for reasoning sessions.
//!
//! Loading hierarchy: env > file > defaults. Unlike the fail-fast validator
//! this is modeled on, `validate()` collects every violation instead of
//! returning on the first one, so a single `start` call can report the
//! whole list of problems at once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating a [`SessionConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    /// One entry per violation found by [`SessionConfig::validate`].
    #[error("configuration invalid: {0:?}")]
    Validation(Vec<String>),
}

/// How a cycle's agent-dispatch deadline is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    TimeBased,
    EventDriven,
}

impl Default for CycleMode {
    fn default() -> Self {
        CycleMode::EventDriven
    }
}

fn default_max_cycles() -> u64 {
    50
}

fn default_cycle_timeout_ms() -> u64 {
    300_000
}

fn default_cycle_duration_ms() -> u64 {
    300_000
}

fn default_model_pool() -> Vec<String> {
    [
        "gpt-4o",
        "gpt-4o-mini",
        "claude-3-5-sonnet",
        "claude-3-5-haiku",
        "gemini-1.5-pro",
        "gemini-1.5-flash",
        "llama-3.1-70b",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_decay_rate() -> f64 {
    0.02
}

fn default_true() -> bool {
    true
}

/// Per-agent parameter overrides; opaque to the engine, passed through to
/// the `AgentRunner`.
pub type AgentOverrides = BTreeMap<String, serde_json::Value>;

/// The full set of options recognized at session-creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Initial `current_claim`. Required, non-empty.
    pub seed_claim: String,

    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,

    #[serde(default)]
    pub cycle_mode: CycleMode,

    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,

    #[serde(default = "default_cycle_duration_ms")]
    pub cycle_duration_ms: u64,

    #[serde(default = "default_model_pool")]
    pub model_pool: Vec<String>,

    #[serde(default = "default_true")]
    pub novelty_bonus_enabled: bool,

    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,

    #[serde(default)]
    pub cost_limit_usd: Option<f64>,

    #[serde(default)]
    pub agent_overrides: Option<AgentOverrides>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seed_claim: String::new(),
            max_cycles: default_max_cycles(),
            cycle_mode: CycleMode::default(),
            cycle_timeout_ms: default_cycle_timeout_ms(),
            cycle_duration_ms: default_cycle_duration_ms(),
            model_pool: default_model_pool(),
            novelty_bonus_enabled: true,
            decay_rate: default_decay_rate(),
            cost_limit_usd: None,
            agent_overrides: None,
        }
    }
}

impl SessionConfig {
    /// Load a config from a TOML file, then apply `NOETIC_*` environment
    /// overrides, then validate. Returns the first validation failure as an
    /// error carrying the full violation list.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(ConfigError::Validation(violations));
        }
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override fields from `NOETIC_*` environment variables, mirroring the
    /// field names in upper snake case (e.g. `NOETIC_MAX_CYCLES`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NOETIC_SEED_CLAIM") {
            self.seed_claim = v;
        }
        if let Ok(v) = std::env::var("NOETIC_MAX_CYCLES") {
            if let Ok(n) = v.parse() {
                self.max_cycles = n;
            }
        }
        if let Ok(v) = std::env::var("NOETIC_CYCLE_MODE") {
            self.cycle_mode = match v.to_lowercase().as_str() {
                "time_based" => CycleMode::TimeBased,
                "event_driven" => CycleMode::EventDriven,
                _ => self.cycle_mode,
            };
        }
        if let Ok(v) = std::env::var("NOETIC_CYCLE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.cycle_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("NOETIC_CYCLE_DURATION_MS") {
            if let Ok(n) = v.parse() {
                self.cycle_duration_ms = n;
            }
        }
        if let Ok(v) = std::env::var("NOETIC_MODEL_POOL") {
            let pool: Vec<String> = v.split(',').map(|s| s.trim().to_string()).collect();
            if !pool.is_empty() {
                self.model_pool = pool;
            }
        }
        if let Ok(v) = std::env::var("NOETIC_NOVELTY_BONUS_ENABLED") {
            if let Ok(b) = v.parse() {
                self.novelty_bonus_enabled = b;
            }
        }
        if let Ok(v) = std::env::var("NOETIC_DECAY_RATE") {
            if let Ok(n) = v.parse() {
                self.decay_rate = n;
            }
        }
        if let Ok(v) = std::env::var("NOETIC_COST_LIMIT_USD") {
            if let Ok(n) = v.parse() {
                self.cost_limit_usd = Some(n);
            }
        }
    }

    /// Collect every validation violation (not just the first) as a
    /// human-readable string.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.seed_claim.trim().is_empty() {
            violations.push("seed_claim must not be empty".to_string());
        }
        if self.max_cycles == 0 {
            violations.push("max_cycles must be a positive integer".to_string());
        }
        if self.cycle_timeout_ms == 0 {
            violations.push("cycle_timeout_ms must be a positive integer".to_string());
        }
        if self.cycle_duration_ms == 0 {
            violations.push("cycle_duration_ms must be a positive integer".to_string());
        }
        if self.model_pool.is_empty() {
            violations.push("model_pool must contain at least one model".to_string());
        }
        if self.decay_rate <= 0.0 {
            violations.push("decay_rate must be a positive real number".to_string());
        }
        if let Some(limit) = self.cost_limit_usd {
            if limit <= 0.0 {
                violations.push("cost_limit_usd must be a positive real number if set".to_string());
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_with_seed_is_valid() {
        let mut cfg = SessionConfig::default();
        cfg.seed_claim = "Entropy increases".to_string();
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn empty_seed_claim_is_a_violation() {
        let cfg = SessionConfig::default();
        let violations = cfg.validate();
        assert!(violations.iter().any(|v| v.contains("seed_claim")));
    }

    #[test]
    fn validate_collects_all_violations_not_just_first() {
        let mut cfg = SessionConfig::default();
        cfg.seed_claim = String::new();
        cfg.max_cycles = 0;
        cfg.decay_rate = -1.0;
        let violations = cfg.validate();
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn load_from_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "seed_claim = \"Entropy increases\"\nmax_cycles = 10\n").unwrap();
        let cfg = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.seed_claim, "Entropy increases");
        assert_eq!(cfg.max_cycles, 10);
        assert_eq!(cfg.decay_rate, default_decay_rate());
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "seed_claim = \"Entropy increases\"\nmax_cycles = 10\n").unwrap();
        std::env::set_var("NOETIC_MAX_CYCLES", "99");
        let cfg = SessionConfig::load(&path).unwrap();
        std::env::remove_var("NOETIC_MAX_CYCLES");
        assert_eq!(cfg.max_cycles, 99);
    }
}
