//! Checkpoint data model. Persistence (atomic save/load/migrate) lives in
//! [`crate::checkpoint_store`]; this module defines the schema only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::fsm::{FactoryFsm, StageFsm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointVersion {
    #[serde(rename = "1.0")]
    Legacy,
    #[serde(rename = "2.0")]
    Fsm,
}

/// Serialized state-machine snapshot carried by FSM-aware (v2.0)
/// checkpoints. `None` on a migrated-from-legacy checkpoint, per spec §9's
/// open question: the legacy format has no FSM state to recover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmSnapshot {
    pub factory: FactoryFsm,
    pub stages: HashMap<String, StageFsm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: CheckpointVersion,
    pub factory_name: String,
    pub run_id: String,
    pub current_stage: Option<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub recursion_count: u32,
    pub context_hash: String,
    pub created_at: DateTime<Utc>,
    pub vcs_commit: Option<String>,
    pub fsm_state: Option<FsmSnapshot>,
}

impl Checkpoint {
    pub fn new_legacy(factory_name: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            version: CheckpointVersion::Legacy,
            factory_name: factory_name.into(),
            run_id: run_id.into(),
            current_stage: None,
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            recursion_count: 0,
            context_hash: String::new(),
            created_at: Utc::now(),
            vcs_commit: None,
            fsm_state: None,
        }
    }

    pub fn new_fsm(factory_name: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            version: CheckpointVersion::Fsm,
            ..Self::new_legacy(factory_name, run_id)
        }
    }

    pub fn is_done_with(&self, stage_id: &str) -> bool {
        self.completed.iter().any(|s| s == stage_id) || self.skipped.iter().any(|s| s == stage_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_checkpoint_has_no_fsm_state() {
        let checkpoint = Checkpoint::new_legacy("demo", "run-1");
        assert_eq!(checkpoint.version, CheckpointVersion::Legacy);
        assert!(checkpoint.fsm_state.is_none());
    }

    #[test]
    fn version_serializes_to_spec_strings() {
        assert_eq!(serde_json::to_string(&CheckpointVersion::Legacy).unwrap(), "\"1.0\"");
        assert_eq!(serde_json::to_string(&CheckpointVersion::Fsm).unwrap(), "\"2.0\"");
    }

    #[test]
    fn is_done_with_covers_completed_and_skipped() {
        let mut checkpoint = Checkpoint::new_fsm("demo", "run-1");
        checkpoint.completed.push("a".into());
        checkpoint.skipped.push("b".into());
        assert!(checkpoint.is_done_with("a"));
        assert!(checkpoint.is_done_with("b"));
        assert!(!checkpoint.is_done_with("c"));
    }
}
