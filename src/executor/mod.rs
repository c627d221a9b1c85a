//! Imperative executor (spec §4.4): runs stages against their inputs,
//! collecting results without driving the explicit state machines that
//! [`crate::orchestrator`] uses.

pub mod dispatch;
pub mod events;
pub mod imperative;

use std::time::Instant;

use crate::errors::ExecutionError;
use crate::model::{Context, Factory, Stage, StageRunStatus, StageResult, StageType};
use crate::parser::expr::evaluate_condition;
use events::{emit, EventSender, ExecutorEvent};

/// Success/failure policy (spec §4.4 step 3): an explicit `success` field
/// wins; then `passed`/`failed` booleans; then a non-zero `exit_code`.
/// Absent all three, the stage is treated as successful.
pub fn stage_succeeded(output: &serde_json::Value) -> bool {
    if let Some(success) = output.get("success").and_then(|v| v.as_bool()) {
        return success;
    }
    if let Some(passed) = output.get("passed").and_then(|v| v.as_bool()) {
        return passed;
    }
    if let Some(failed) = output.get("failed").and_then(|v| v.as_bool()) {
        return !failed;
    }
    if let Some(exit_code) = output.get("exit_code").and_then(|v| v.as_i64()) {
        return exit_code == 0;
    }
    true
}

pub(crate) async fn dispatch_stage(stage: &Stage, factory: &Factory, ctx: &mut Context) -> Result<serde_json::Value, ExecutionError> {
    match stage.kind {
        StageType::Prd => dispatch::dispatch_prd(stage, ctx).await,
        StageType::Plan => dispatch::dispatch_plan(stage, ctx).await,
        StageType::Build => dispatch::dispatch_build(stage, ctx).await,
        StageType::Custom => dispatch::dispatch_custom(stage, ctx).await,
        StageType::Factory => dispatch::dispatch_factory(stage, factory, ctx).await,
    }
}

/// Runs one stage to completion: condition check, dispatch, success
/// policy, and (if attached) verification. Returns the result plus the
/// stage's raw output payload, if it produced one, so the caller can
/// record it into the shared context.
pub async fn execute_one_stage(
    stage: &Stage,
    factory: &Factory,
    ctx: &mut Context,
    event_tx: &Option<EventSender>,
) -> (StageResult, Option<serde_json::Value>) {
    if let Some(condition) = &stage.condition
        && !evaluate_condition(condition, ctx)
    {
        emit(
            event_tx,
            ExecutorEvent::StageSkipped {
                stage: stage.id.clone(),
                reason: "condition not met".to_string(),
            },
        )
        .await;
        return (StageResult::pending(&stage.id).skipped("condition not met"), None);
    }

    emit(event_tx, ExecutorEvent::StageStarted { stage: stage.id.clone() }).await;
    let start = Instant::now();
    let dispatched = dispatch_stage(stage, factory, ctx).await;

    let (mut result, output) = match dispatched {
        Ok(payload) => {
            emit(
                event_tx,
                ExecutorEvent::Output {
                    stage: stage.id.clone(),
                    output: payload.clone(),
                },
            )
            .await;
            if stage_succeeded(&payload) {
                (
                    StageResult::pending(&stage.id).success(payload.clone(), start.elapsed()),
                    Some(payload),
                )
            } else {
                (
                    StageResult::pending(&stage.id).failure("stage reported failure", start.elapsed()),
                    Some(payload),
                )
            }
        }
        Err(err) => (
            StageResult::pending(&stage.id).failure(err.to_string(), start.elapsed()),
            None,
        ),
    };

    if result.status == StageRunStatus::Completed && stage.has_verification() {
        emit(event_tx, ExecutorEvent::VerificationStarted { stage: stage.id.clone() }).await;
        let verification = crate::verifier::run_all_verifications(&stage.verify, ctx).await;
        emit(
            event_tx,
            ExecutorEvent::VerificationCompleted {
                stage: stage.id.clone(),
                passed: verification.is_ok(),
            },
        )
        .await;
        result.downgrade_on_verification_failure(verification);
    }

    match result.status {
        StageRunStatus::Failed => {
            emit(
                event_tx,
                ExecutorEvent::StageFailed {
                    stage: stage.id.clone(),
                    error: result.error.clone().unwrap_or_default(),
                },
            )
            .await;
        }
        _ => {
            emit(
                event_tx,
                ExecutorEvent::StageCompleted {
                    stage: stage.id.clone(),
                    result: Box::new(result.clone()),
                },
            )
            .await;
        }
    }

    (result, output)
}
