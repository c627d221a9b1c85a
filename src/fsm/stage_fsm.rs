//! Stage FSM: `PENDING -> READY -> EXECUTING -> (VERIFYING) -> COMPLETED`,
//! with `RETRYING`/`LOOPING` side paths.
//!
//! The composite `EXEC_SUCCESS`/`EXEC_FAILED` events are rewritten
//! internally to their verify-present/absent or retries-available/exhausted
//! variant based on context (spec §4.5), so callers send one logical event.

use serde::{Deserialize, Serialize};

use crate::errors::TransitionError;
use crate::fsm::history::HistoryRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Pending,
    Ready,
    Executing,
    Verifying,
    Retrying,
    Looping,
    Completed,
    Failed,
    Skipped,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Completed | StageState::Failed | StageState::Skipped)
    }

    fn label(&self) -> &'static str {
        match self {
            StageState::Pending => "PENDING",
            StageState::Ready => "READY",
            StageState::Executing => "EXECUTING",
            StageState::Verifying => "VERIFYING",
            StageState::Retrying => "RETRYING",
            StageState::Looping => "LOOPING",
            StageState::Completed => "COMPLETED",
            StageState::Failed => "FAILED",
            StageState::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    DepsMet,
    DepsFailed,
    ConditionFalse,
    Skip,
    Execute,
    ExecSuccess,
    ExecFailed,
    VerifyPass,
    VerifyFail,
    Retry,
    Loop,
}

impl StageEvent {
    fn label(&self) -> &'static str {
        match self {
            StageEvent::DepsMet => "DEPS_MET",
            StageEvent::DepsFailed => "DEPS_FAILED",
            StageEvent::ConditionFalse => "CONDITION_FALSE",
            StageEvent::Skip => "SKIP",
            StageEvent::Execute => "EXECUTE",
            StageEvent::ExecSuccess => "EXEC_SUCCESS",
            StageEvent::ExecFailed => "EXEC_FAILED",
            StageEvent::VerifyPass => "VERIFY_PASS",
            StageEvent::VerifyFail => "VERIFY_FAIL",
            StageEvent::Retry => "RETRY",
            StageEvent::Loop => "LOOP",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFsm {
    pub state: StageState,
    pub history: HistoryRing,
    pub has_verification: bool,
    pub retries_left: u32,
    pub retry_count: u32,
    pub loop_count: u32,
    pub max_loops: u32,
}

impl StageFsm {
    pub fn new(has_verification: bool, max_retries: u32, max_loops: u32) -> Self {
        Self {
            state: StageState::Pending,
            history: HistoryRing::default(),
            has_verification,
            retries_left: max_retries,
            retry_count: 0,
            loop_count: 0,
            max_loops,
        }
    }

    pub fn can(&self, event: StageEvent) -> bool {
        self.resolve(event).is_some()
    }

    /// Resolves the composite events against current context, returning
    /// the concrete target state without mutating the machine.
    fn resolve(&self, event: StageEvent) -> Option<StageState> {
        use StageEvent::*;
        use StageState::*;
        match (self.state, event) {
            (Pending, DepsMet) => Some(Ready),
            (Pending, DepsFailed | ConditionFalse | Skip) => Some(Skipped),
            (Ready, Execute) => Some(Executing),
            (Executing, ExecSuccess) => {
                Some(if self.has_verification { Verifying } else { Completed })
            }
            (Executing, ExecFailed) => {
                Some(if self.retries_left > 0 { Retrying } else { Failed })
            }
            (Verifying, VerifyPass) => Some(Completed),
            (Verifying, VerifyFail) => Some(Failed),
            (Retrying, Retry) => Some(Executing),
            (Retrying, ExecFailed) => Some(Failed),
            (Completed | Verifying, Loop) => Some(Looping),
            (Looping, Execute) => Some(Executing),
            _ => None,
        }
    }

    pub fn transition(&mut self, event: StageEvent, payload: serde_json::Value) -> Result<StageState, TransitionError> {
        let Some(target) = self.resolve(event) else {
            return Err(TransitionError {
                state: self.state.label().to_string(),
                event: event.label().to_string(),
            });
        };

        let from = self.state;
        self.state = target;
        self.history.push(from.label(), target.label(), event.label(), payload);

        match (from, target) {
            (StageState::Executing, StageState::Retrying) => {
                self.retries_left = self.retries_left.saturating_sub(1);
                self.retry_count += 1;
            }
            (_, StageState::Looping) => {
                self.loop_count += 1;
            }
            _ => {}
        }
        Ok(target)
    }

    pub fn loops_remaining(&self) -> bool {
        self.loop_count < self.max_loops
    }
}
