//! Checkpoint persistence (spec §4.7): save/load/validate a run's resume
//! point at `<runDir>/checkpoint.json`, atomically. The checkpoint is a
//! projection of the run directory that wrote it, not of the factory or
//! project as a whole, so two runs of the same factory never share a file.
//!
//! Persistence shape follows [`crate::model::learning::LearningStore`]'s
//! temp-file-then-rename discipline rather than the teacher's
//! `audit/logger.rs`, which appends without that guarantee — a checkpoint
//! left half-written would make a resumed run silently redo or skip work.

use std::path::{Path, PathBuf};

use crate::errors::CheckpointError;
use crate::model::{Checkpoint, CheckpointVersion, Context, Factory};

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// `run_dir` is the same directory `ctx.run_dir` points at; the
    /// checkpoint always lands at `run_dir/checkpoint.json`.
    pub fn new(run_dir: &Path) -> Self {
        Self {
            path: run_dir.join("checkpoint.json"),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// **Save(checkpoint).** Temp-file + rename, matching the learning
    /// store and the PRD counter.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CheckpointError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(checkpoint).map_err(|e| CheckpointError::Write {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// **Load() → Checkpoint | error.** A legacy (1.0) checkpoint is
    /// migrated in place before being returned, never silently rewritten
    /// back to disk until the caller calls `save` again.
    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        if !self.exists() {
            return Err(CheckpointError::NotFound(self.path.clone()));
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            source: e.into(),
        })?;
        Ok(migrate_legacy(checkpoint))
    }

    /// **Clear().** A successful run has nothing left to resume.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        if self.exists() {
            std::fs::remove_file(&self.path).map_err(|source| CheckpointError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// **UpdateAfterStage(checkpoint, stage_id, result, ctx) → checkpoint.**
    /// Called after every terminal stage result so a crash mid-run loses at
    /// most the in-flight stage.
    pub fn update_after_stage(
        &self,
        mut checkpoint: Checkpoint,
        stage_id: &str,
        status: crate::model::StageRunStatus,
        ctx: &Context,
    ) -> Result<Checkpoint, CheckpointError> {
        use crate::model::StageRunStatus;
        match status {
            StageRunStatus::Completed => checkpoint.completed.push(stage_id.to_string()),
            StageRunStatus::Failed => checkpoint.failed.push(stage_id.to_string()),
            StageRunStatus::Skipped => checkpoint.skipped.push(stage_id.to_string()),
            StageRunStatus::Pending | StageRunStatus::Running => {}
        }
        checkpoint.current_stage = Some(stage_id.to_string());
        checkpoint.recursion_count = ctx.recursion_count;
        checkpoint.context_hash = ctx.hash();
        self.save(&checkpoint)?;
        Ok(checkpoint)
    }
}

/// **MigrateLegacy(checkpoint) → checkpoint.** A 1.0 checkpoint has no FSM
/// state to recover (spec §9 open question); it's promoted to 2.0 with
/// `fsm_state: None` so the orchestrator treats it as "resume from scratch
/// stage-wise, but skip what's already completed".
fn migrate_legacy(mut checkpoint: Checkpoint) -> Checkpoint {
    if checkpoint.version == CheckpointVersion::Legacy {
        checkpoint.version = CheckpointVersion::Fsm;
    }
    checkpoint
}

/// **Validate(checkpoint, factory) → Ok | error.** A checkpoint can only
/// resume the factory it was written for, and only stage ids the factory
/// still declares.
pub fn validate(checkpoint: &Checkpoint, factory: &Factory) -> Result<(), CheckpointError> {
    if checkpoint.factory_name != factory.name {
        return Err(CheckpointError::NameMismatch {
            expected: checkpoint.factory_name.clone(),
            actual: factory.name.clone(),
        });
    }
    for stage_id in checkpoint
        .completed
        .iter()
        .chain(checkpoint.failed.iter())
        .chain(checkpoint.skipped.iter())
    {
        if factory.get_stage(stage_id).is_none() {
            return Err(CheckpointError::Corrupt {
                path: PathBuf::new(),
                source: anyhow::anyhow!("checkpoint references unknown stage '{stage_id}'"),
            });
        }
    }
    Ok(())
}

/// **GetRemainingStages(checkpoint, order) → \[stageId\].** Stages not yet
/// terminal, in the order the scheduler would otherwise run them.
pub fn remaining_stages(checkpoint: &Checkpoint, order: &[String]) -> Vec<String> {
    order
        .iter()
        .filter(|id| !checkpoint.is_done_with(id))
        .cloned()
        .collect()
}
