//! Project-scoped learnings: a bounded ring of small records accumulated
//! across runs.
//!
//! Grounded on the teacher's `patterns/learning.rs` (learning is derived
//! from run artifacts and persisted under the project), generalized from a
//! phase-statistics record to the spec's opaque `(kind, stage, summary)`
//! record and given the explicit "most-recent 100" ring the teacher module
//! does not itself enforce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MAX_LEARNINGS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: Uuid,
    pub kind: String,
    pub stage_id: String,
    pub summary: String,
    pub metrics: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl Learning {
    pub fn new(kind: impl Into<String>, stage_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            stage_id: stage_id.into(),
            summary: summary.into(),
            metrics: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Append-only project store, bounded to the most recent 100 entries.
/// Rewritten under temp-file + rename on every append, matching the
/// checkpoint store's atomicity discipline (spec §5: "when updated, the
/// full file is rewritten under the same temp-file+rename discipline").
pub struct LearningStore {
    path: PathBuf,
}

impl LearningStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            path: project_root.join(".kiln").join("learnings.json"),
        }
    }

    pub fn load(&self) -> anyhow::Result<Vec<Learning>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn append(&self, learning: Learning) -> anyhow::Result<()> {
        let mut learnings = self.load()?;
        learnings.push(learning);
        if learnings.len() > MAX_LEARNINGS {
            let overflow = learnings.len() - MAX_LEARNINGS;
            learnings.drain(0..overflow);
        }
        self.write_all(&learnings)
    }

    fn write_all(&self, learnings: &[Learning]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(learnings)?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
