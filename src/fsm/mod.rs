//! Explicit state machines governing factory and per-stage lifecycles.
//!
//! Grounded on the teacher's `dag/scheduler.rs::PhaseStatus` (struct-like
//! status variants, `matches!`-based predicate helpers) and
//! `dag/state.rs::DagState`, generalized into two full event-driven FSMs
//! with guarded transitions and bounded transition history, per spec §4.5.

pub mod factory_fsm;
pub mod history;
pub mod stage_fsm;

pub use factory_fsm::{FactoryEvent, FactoryFsm, FactoryState};
pub use history::{HistoryRing, TransitionRecord};
pub use stage_fsm::{StageEvent, StageFsm, StageState};
