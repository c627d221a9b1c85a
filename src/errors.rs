//! Typed error hierarchy for the pipeline engine.
//!
//! One enum per subsystem:
//! - `FactoryError` — parser and dependency-graph failures
//! - `ExecutionError` — subprocess and verification failures
//! - `CheckpointError` — checkpoint store failures
//! - `TransitionError` — invalid FSM transitions

use std::path::PathBuf;
use thiserror::Error;

/// Parser and scheduler failures: malformed documents, schema violations,
/// and dependency-graph problems.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("document must be an object with a non-empty `stages` list")]
    EmptyStages,

    #[error("duplicate stage id '{0}'")]
    DuplicateStage(String),

    #[error("stage '{0}' has invalid id: must match [A-Za-z][A-Za-z0-9_-]*")]
    InvalidStageId(String),

    #[error("stage '{stage}' has unrecognized type '{kind}'")]
    UnknownStageType { stage: String, kind: String },

    #[error("stage '{0}' is type `custom` but carries no `command`")]
    MissingCommand(String),

    #[error("stage '{0}' is type `factory` but carries no `factory` name")]
    MissingFactoryName(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("stage '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("stage '{stage}' has loop_to '{target}' which is not an earlier stage")]
    InvalidLoopTarget { stage: String, target: String },

    #[error("stage '{stage}' has invalid config field '{field}': {reason}")]
    InvalidConfig {
        stage: String,
        field: String,
        reason: String,
    },

    #[error("stage '{stage}' has unrecognized merge_strategy '{value}'")]
    InvalidMergeStrategy { stage: String, value: String },

    #[error("cycle detected in stage dependencies; involved stages: {0:?}")]
    Cycle(Vec<String>),

    #[error("bad expression '{expr}': {reason}")]
    BadExpression { expr: String, reason: String },

    #[error("failed to read factory document at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode factory document at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Execution and verification failures: subprocess problems and verifier
/// gate rejections.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn subprocess for stage '{stage}': {source}")]
    SpawnFailed {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{stage}' subprocess exited with code {code}")]
    NonZeroExit { stage: String, code: i32 },

    #[error("stage '{stage}' timed out after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    #[error("no agent binary found for role '{0}'")]
    MissingBinary(String),

    #[error("io failure during execution of stage '{stage}': {source}")]
    Io {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("verification failed for stage '{stage}': {message}")]
    VerificationFailed { stage: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Checkpoint store failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found in {0}")]
    NotFound(PathBuf),

    #[error("checkpoint at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("checkpoint version '{0}' is not supported")]
    UnsupportedVersion(String),

    #[error("checkpoint is for factory '{expected}' but run requested '{actual}'")]
    NameMismatch { expected: String, actual: String },

    #[error("failed to persist checkpoint to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid FSM transition: no matching event in the current state. Treated
/// as a programming error and surfaced through the transition result rather
/// than aborting the process.
#[derive(Debug, Error)]
#[error("no transition for event {event} from state {state}")]
pub struct TransitionError {
    pub state: String,
    pub event: String,
}
