//! Execution event stream (spec §4.4): external observers subscribe via an
//! mpsc channel instead of polling. Grounded on the teacher's
//! `dag/executor.rs::PhaseEvent` tagged-enum shape.

use serde::{Deserialize, Serialize};

use crate::model::StageResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    StageStarted { stage: String },
    StageCompleted { stage: String, result: Box<StageResult> },
    StageFailed { stage: String, error: String },
    StageSkipped { stage: String, reason: String },
    Output { stage: String, output: serde_json::Value },
    VerificationStarted { stage: String },
    VerificationCompleted { stage: String, passed: bool },
    FactoryCompleted { success: bool },
}

pub type EventSender = tokio::sync::mpsc::Sender<ExecutorEvent>;

pub async fn emit(tx: &Option<EventSender>, event: ExecutorEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event).await;
    }
}
