//! One execution of a factory.
//!
//! Shape grounded on the teacher's `dag/state.rs` (`DagState`, `PhaseResult`,
//! `DagSummary`, the `duration_serde` pattern), generalized from phase-only
//! results to the spec's stage-result contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::model::duration_millis;
use crate::verifier::VerificationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageRunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageRunStatus::Completed | StageRunStatus::Failed | StageRunStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub status: StageRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub verification: Option<VerificationResult>,
}

impl StageResult {
    pub fn pending(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageRunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            duration: Duration::ZERO,
            output: serde_json::Value::Null,
            error: None,
            verification: None,
        }
    }

    pub fn success(mut self, output: serde_json::Value, duration: Duration) -> Self {
        self.status = StageRunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output = output;
        self.duration = duration;
        self
    }

    pub fn failure(mut self, error: impl Into<String>, duration: Duration) -> Self {
        self.status = StageRunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        self.duration = duration;
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = StageRunStatus::Skipped;
        self.completed_at = Some(Utc::now());
        self.error = Some(reason.into());
        self
    }

    /// `completed` implies verification passed (or was absent) — spec §3.
    pub fn downgrade_on_verification_failure(&mut self, verification: VerificationResult) {
        if !verification.is_ok() {
            self.status = StageRunStatus::Failed;
            self.error = Some(format!("Verification failed: {}", verification.summary()));
        }
        self.verification = Some(verification);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub factory_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stage_results: HashMap<String, StageResult>,
    pub recursion_count: u32,
}

impl Run {
    pub fn new(factory_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: now.format("%Y%m%d%H%M%S%3f").to_string(),
            factory_name: factory_name.into(),
            status: RunStatus::Idle,
            started_at: now,
            ended_at: None,
            stage_results: HashMap::new(),
            recursion_count: 0,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    pub fn record(&mut self, result: StageResult) {
        self.stage_results.insert(result.stage_id.clone(), result);
    }

    pub fn completed_stage_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .stage_results
            .values()
            .filter(|r| r.status == StageRunStatus::Completed)
            .map(|r| r.stage_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn failed_stage_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .stage_results
            .values()
            .filter(|r| r.status == StageRunStatus::Failed)
            .map(|r| r.stage_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn all_terminal(&self, stage_ids: &[String]) -> bool {
        stage_ids.iter().all(|id| {
            self.stage_results
                .get(id)
                .map(|r| r.status.is_terminal())
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_result_success_marks_completed() {
        let result = StageResult::pending("a").success(serde_json::json!({"ok": true}), Duration::from_millis(5));
        assert_eq!(result.status, StageRunStatus::Completed);
        assert!(result.completed_at.is_some());
    }

    #[test]
    fn verification_failure_downgrades_completed_stage() {
        let mut result = StageResult::pending("a").success(serde_json::Value::Null, Duration::ZERO);
        let verification = VerificationResult::failed("git_commits", "no commits since run start");
        result.downgrade_on_verification_failure(verification);
        assert_eq!(result.status, StageRunStatus::Failed);
        assert!(result.error.unwrap().contains("Verification failed"));
    }

    #[test]
    fn verification_pass_does_not_alter_status() {
        let mut result = StageResult::pending("a").success(serde_json::Value::Null, Duration::ZERO);
        result.downgrade_on_verification_failure(VerificationResult::passed("file_exists"));
        assert_eq!(result.status, StageRunStatus::Completed);
    }

    #[test]
    fn run_tracks_completed_and_failed_ids_sorted() {
        let mut run = Run::new("demo");
        run.record(StageResult::pending("b").success(serde_json::Value::Null, Duration::ZERO));
        run.record(StageResult::pending("a").success(serde_json::Value::Null, Duration::ZERO));
        run.record(StageResult::pending("c").failure("boom", Duration::ZERO));
        assert_eq!(run.completed_stage_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(run.failed_stage_ids(), vec!["c".to_string()]);
    }

    #[test]
    fn run_status_terminal_states() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
