//! Factory FSM: `IDLE -> RUNNING -> {COMPLETED, FAILED, STOPPED}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TransitionError;
use crate::fsm::history::HistoryRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FactoryState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl FactoryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FactoryState::Completed | FactoryState::Failed | FactoryState::Stopped
        )
    }

    fn label(&self) -> &'static str {
        match self {
            FactoryState::Idle => "IDLE",
            FactoryState::Running => "RUNNING",
            FactoryState::Completed => "COMPLETED",
            FactoryState::Failed => "FAILED",
            FactoryState::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryEvent {
    Start,
    AllCompleted,
    AnyFailed,
    Stop,
    Reset,
    Resume,
}

impl FactoryEvent {
    fn label(&self) -> &'static str {
        match self {
            FactoryEvent::Start => "START",
            FactoryEvent::AllCompleted => "ALL_COMPLETED",
            FactoryEvent::AnyFailed => "ANY_FAILED",
            FactoryEvent::Stop => "STOP",
            FactoryEvent::Reset => "RESET",
            FactoryEvent::Resume => "RESUME",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryFsm {
    pub state: FactoryState,
    pub history: HistoryRing,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Default for FactoryFsm {
    fn default() -> Self {
        Self {
            state: FactoryState::Idle,
            history: HistoryRing::default(),
            started_at: None,
            completed_at: None,
            stopped_at: None,
        }
    }
}

impl FactoryFsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `event` is legal from the current state — spec §8's
    /// `can(event)` property.
    pub fn can(&self, event: FactoryEvent) -> bool {
        self.target_state(event).is_some()
    }

    fn target_state(&self, event: FactoryEvent) -> Option<FactoryState> {
        use FactoryEvent::*;
        use FactoryState::*;
        match (self.state, event) {
            (Idle, Start) => Some(Running),
            (Running, AllCompleted) => Some(Completed),
            (Running, AnyFailed) => Some(Failed),
            (Running, Stop) => Some(Stopped),
            (Completed, Reset) => Some(Idle),
            (Failed, Resume) => Some(Running),
            (Failed, Reset) => Some(Idle),
            (Stopped, Resume) => Some(Running),
            (Stopped, Reset) => Some(Idle),
            _ => None,
        }
    }

    /// `continueOnFailure` guards the `RUNNING -ANY_FAILED-> FAILED`
    /// transition (spec §4.5 table): when set, `ANY_FAILED` has no effect.
    pub fn transition(
        &mut self,
        event: FactoryEvent,
        continue_on_failure: bool,
    ) -> Result<FactoryState, TransitionError> {
        if event == FactoryEvent::AnyFailed && continue_on_failure && self.state == FactoryState::Running {
            return Err(TransitionError {
                state: self.state.label().to_string(),
                event: event.label().to_string(),
            });
        }
        let Some(target) = self.target_state(event) else {
            return Err(TransitionError {
                state: self.state.label().to_string(),
                event: event.label().to_string(),
            });
        };

        let from = self.state;
        self.state = target;
        self.history
            .push(from.label(), target.label(), event.label(), serde_json::Value::Null);

        let now = Utc::now();
        match target {
            FactoryState::Running => self.started_at = Some(now),
            FactoryState::Completed | FactoryState::Failed => self.completed_at = Some(now),
            FactoryState::Stopped => self.stopped_at = Some(now),
            FactoryState::Idle => {
                self.started_at = None;
                self.completed_at = None;
                self.stopped_at = None;
            }
        }
        Ok(target)
    }
}
