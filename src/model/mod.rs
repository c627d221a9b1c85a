//! Core data model: Factory, Stage, Run, Checkpoint, Learning, Context.
//!
//! Struct shapes are grounded on the teacher's `phase.rs` (serde derives,
//! accessor conventions) and `dag/state.rs` (`PhaseResult`/duration
//! serialization), generalized from a fixed Claude-specific phase shape to
//! the spec's typed, multi-kind stage shape.

pub mod checkpoint;
pub mod context;
pub mod factory;
pub mod learning;
pub mod run;
pub mod stage;

pub use checkpoint::{Checkpoint, CheckpointVersion, FsmSnapshot};
pub use context::Context;
pub use factory::{AgentRoles, Factory};
pub use learning::{Learning, LearningStore};
pub use run::{Run, RunStatus, StageResult, StageRunStatus};
pub use stage::{MergeStrategy, Stage, StageConfig, StageType};

/// Shared `serde` helper: serialize a `std::time::Duration` as whole
/// milliseconds, matching the teacher's `duration_serde` module in
/// `dag/state.rs`.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
