//! Stage definition: the unit of work a factory document describes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::errors::FactoryError;
use regex::Regex;

static STAGE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").unwrap());

pub fn is_valid_stage_id(id: &str) -> bool {
    STAGE_ID_RE.is_match(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Prd,
    Plan,
    Build,
    Custom,
    Factory,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Prd => "prd",
            StageType::Plan => "plan",
            StageType::Build => "build",
            StageType::Custom => "custom",
            StageType::Factory => "factory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Any,
    #[default]
    All,
    First,
}

/// Structured per-stage options. `extra` carries type-specific keys the
/// parser does not interpret itself (e.g. a `model` override) so they
/// survive round-trips without a schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallel")]
    pub parallel: u32,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub worktree: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_iterations() -> u32 {
    5
}
fn default_parallel() -> u32 {
    1
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            parallel: default_parallel(),
            timeout_ms: 0,
            retries: 0,
            worktree: false,
            extra: HashMap::new(),
        }
    }
}

impl StageConfig {
    pub fn validate(&self, stage_id: &str) -> Result<(), FactoryError> {
        if self.iterations == 0 {
            return Err(FactoryError::InvalidConfig {
                stage: stage_id.to_string(),
                field: "iterations".into(),
                reason: "must be strictly positive".into(),
            });
        }
        if self.parallel == 0 {
            return Err(FactoryError::InvalidConfig {
                stage: stage_id.to_string(),
                field: "parallel".into(),
                reason: "must be strictly positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StageType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub input: HashMap<String, String>,
    #[serde(default)]
    pub config: StageConfig,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    #[serde(default)]
    pub loop_to: Option<String>,
    #[serde(default)]
    pub verify: Vec<crate::verifier::VerifierConfig>,
}

impl Stage {
    pub fn new(id: impl Into<String>, kind: StageType) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            condition: None,
            input: HashMap::new(),
            config: StageConfig::default(),
            command: None,
            factory: None,
            merge_strategy: MergeStrategy::default(),
            loop_to: None,
            verify: Vec::new(),
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_loop_to(mut self, target: impl Into<String>) -> Self {
        self.loop_to = Some(target.into());
        self
    }

    pub fn has_verification(&self) -> bool {
        !self.verify.is_empty()
    }

    pub fn max_retries(&self) -> u32 {
        self.config.retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_stage_ids() {
        assert!(is_valid_stage_id("A"));
        assert!(is_valid_stage_id("stage_1"));
        assert!(is_valid_stage_id("build-phase"));
        assert!(!is_valid_stage_id("1stage"));
        assert!(!is_valid_stage_id(""));
        assert!(!is_valid_stage_id("has space"));
    }

    #[test]
    fn stage_config_default_matches_spec() {
        let cfg = StageConfig::default();
        assert_eq!(cfg.iterations, 5);
        assert_eq!(cfg.parallel, 1);
        assert_eq!(cfg.timeout_ms, 0);
        assert_eq!(cfg.retries, 0);
        assert!(!cfg.worktree);
    }

    #[test]
    fn stage_config_rejects_zero_iterations() {
        let cfg = StageConfig {
            iterations: 0,
            ..Default::default()
        };
        assert!(cfg.validate("a").is_err());
    }

    #[test]
    fn stage_serde_round_trip() {
        let stage = Stage::new("build", StageType::Build).with_depends_on(vec!["plan".into()]);
        let json = serde_json::to_string(&stage).unwrap();
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "build");
        assert_eq!(back.depends_on, vec!["plan".to_string()]);
        assert!(matches!(back.kind, StageType::Build));
    }

    #[test]
    fn merge_strategy_defaults_to_all() {
        assert_eq!(MergeStrategy::default(), MergeStrategy::All);
    }
}
