//! FSM-driven run loop (spec §4.6): the alternative to
//! [`crate::executor::imperative`], selected when `RALPH_FACTORY_FSM` is
//! set. Drives the Factory and Stage state machines explicitly instead of
//! inferring status from a result struct, but dispatches the same
//! per-stage-type handlers and the same verification gate so both paths
//! produce identically shaped [`Run`]s.

use std::collections::HashMap;
use std::path::Path;

use crate::checkpoint_store::CheckpointStore;
use crate::executor::{dispatch_stage, events, stage_succeeded};
use crate::fsm::{FactoryEvent, FactoryFsm, FactoryState, StageEvent, StageFsm, StageState};
use crate::model::{Checkpoint, Context, Factory, Run, RunStatus, StageResult, StageRunStatus};
use crate::parser::expr::evaluate_condition;
use crate::scheduler::{build_graph, topological_order};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub continue_on_failure: bool,
    pub event_tx: Option<events::EventSender>,
}

/// Runs one stage through `READY -> EXECUTING -> (VERIFYING) -> COMPLETED`,
/// retrying through `RETRYING` on failure as long as the stage has retries
/// left. Returns the terminal [`StageResult`]; the caller is responsible
/// for feeding the matching `DepsMet`/`ConditionFalse`/`DepsFailed` event
/// into `fsm` beforehand so it is already in `READY`.
async fn run_ready_stage(
    stage: &crate::model::Stage,
    factory: &Factory,
    ctx: &mut Context,
    fsm: &mut StageFsm,
    event_tx: &Option<events::EventSender>,
) -> StageResult {
    fsm.transition(StageEvent::Execute, serde_json::Value::Null)
        .expect("READY always accepts EXECUTE");

    loop {
        events::emit(event_tx, events::ExecutorEvent::StageStarted { stage: stage.id.clone() }).await;
        let start = std::time::Instant::now();
        let dispatched = dispatch_stage(stage, factory, ctx).await;

        match dispatched {
            Ok(payload) => {
                events::emit(
                    event_tx,
                    events::ExecutorEvent::Output {
                        stage: stage.id.clone(),
                        output: payload.clone(),
                    },
                )
                .await;

                if stage_succeeded(&payload) {
                    let mut result = StageResult::pending(&stage.id).success(payload, start.elapsed());
                    let target = fsm
                        .transition(StageEvent::ExecSuccess, serde_json::Value::Null)
                        .expect("EXECUTING always accepts EXEC_SUCCESS");

                    if target == StageState::Verifying {
                        events::emit(event_tx, events::ExecutorEvent::VerificationStarted { stage: stage.id.clone() }).await;
                        let verification = crate::verifier::run_all_verifications(&stage.verify, ctx).await;
                        let passed = verification.is_ok();
                        events::emit(
                            event_tx,
                            events::ExecutorEvent::VerificationCompleted {
                                stage: stage.id.clone(),
                                passed,
                            },
                        )
                        .await;
                        result.downgrade_on_verification_failure(verification);
                        fsm.transition(
                            if passed { StageEvent::VerifyPass } else { StageEvent::VerifyFail },
                            serde_json::Value::Null,
                        )
                        .expect("VERIFYING accepts VERIFY_PASS/VERIFY_FAIL");
                    }
                    return result;
                }

                let target = fsm
                    .transition(StageEvent::ExecFailed, serde_json::Value::Null)
                    .expect("EXECUTING always accepts EXEC_FAILED");
                if target == StageState::Retrying {
                    fsm.transition(StageEvent::Retry, serde_json::Value::Null)
                        .expect("RETRYING always accepts RETRY");
                    continue;
                }
                return StageResult::pending(&stage.id).failure("stage reported failure", start.elapsed());
            }
            Err(err) => {
                let target = fsm
                    .transition(StageEvent::ExecFailed, serde_json::Value::Null)
                    .expect("EXECUTING always accepts EXEC_FAILED");
                if target == StageState::Retrying {
                    fsm.transition(StageEvent::Retry, serde_json::Value::Null)
                        .expect("RETRYING always accepts RETRY");
                    continue;
                }
                return StageResult::pending(&stage.id).failure(err.to_string(), start.elapsed());
            }
        }
    }
}

/// **RunFactory(factory, ctx, options) → Run.**
pub async fn run_factory(factory: &Factory, ctx: &mut Context, options: &OrchestratorOptions) -> Run {
    run_factory_inner(factory, ctx, options, None).await
}

async fn run_factory_inner(
    factory: &Factory,
    ctx: &mut Context,
    options: &OrchestratorOptions,
    resume_from: Option<Checkpoint>,
) -> Run {
    let order = match build_graph(&factory.stages).and_then(|g| topological_order(&g)) {
        Ok(order) => order,
        Err(err) => {
            let mut run = Run::new(factory.name.clone());
            run.start();
            run.finish(RunStatus::Failed);
            run.stage_results.insert(
                "__factory__".to_string(),
                StageResult::pending("__factory__").failure(err.to_string(), std::time::Duration::ZERO),
            );
            return run;
        }
    };

    let mut factory_fsm = FactoryFsm::new();
    let _ = factory_fsm.transition(FactoryEvent::Start, options.continue_on_failure);

    let mut run = Run::new(factory.name.clone());
    if let Some(checkpoint) = &resume_from {
        run.run_id = checkpoint.run_id.clone();
    }
    run.start();

    let store = CheckpointStore::new(&ctx.run_dir);
    let mut checkpoint = resume_from
        .clone()
        .unwrap_or_else(|| Checkpoint::new_fsm(factory.name.clone(), run.run_id.clone()));

    let mut stage_fsms: HashMap<String, StageFsm> = factory
        .stages
        .iter()
        .map(|s| {
            (
                s.id.clone(),
                StageFsm::new(s.has_verification(), s.max_retries(), ctx.max_recursion()),
            )
        })
        .collect();

    // Seed already-resolved stages from the checkpoint being resumed: their
    // FSMs jump straight to the terminal state they finished in, and their
    // prior results are carried forward so dependents see them as resolved.
    if let Some(checkpoint) = &resume_from {
        for stage_id in &checkpoint.completed {
            run.record(StageResult::pending(stage_id).success(serde_json::Value::Null, std::time::Duration::ZERO));
            if let Some(fsm) = stage_fsms.get_mut(stage_id) {
                fsm.state = StageState::Completed;
            }
        }
        for stage_id in &checkpoint.skipped {
            run.record(StageResult::pending(stage_id).skipped("resumed as already skipped"));
            if let Some(fsm) = stage_fsms.get_mut(stage_id) {
                fsm.state = StageState::Skipped;
            }
        }
        for stage_id in &checkpoint.failed {
            run.record(StageResult::pending(stage_id).failure("resumed as already failed", std::time::Duration::ZERO));
            if let Some(fsm) = stage_fsms.get_mut(stage_id) {
                fsm.state = StageState::Failed;
            }
        }
    }

    let mut index = resume_from
        .as_ref()
        .and_then(|checkpoint| order.iter().position(|id| !checkpoint.is_done_with(id)))
        .unwrap_or(0);
    let mut overall_failed = false;

    while index < order.len() {
        if ctx.stop.is_stopped() {
            break;
        }

        let stage_id = order[index].clone();
        let stage = factory.get_stage(&stage_id).expect("stage in order exists in factory");

        let resuming_loop = stage_fsms
            .get(&stage_id)
            .map(|f| f.state == StageState::Looping)
            .unwrap_or(false);

        // A stage with its own `condition` has opted out of the automatic
        // skip-on-upstream-failure rule — it already encodes whatever
        // dependency outcome it cares about (e.g. `stages.test.failed`), so
        // the condition alone decides whether it runs. Only a stage with no
        // condition at all inherits the blanket propagation.
        let deps_failed = !resuming_loop
            && stage.condition.is_none()
            && stage
                .depends_on
                .iter()
                .any(|d| run.stage_results.get(d).map(|r| r.status == StageRunStatus::Failed).unwrap_or(false));
        let condition_false = !resuming_loop
            && stage
                .condition
                .as_ref()
                .map(|c| !evaluate_condition(c, ctx))
                .unwrap_or(false);

        let fsm = stage_fsms.get_mut(&stage_id).expect("fsm registered for every stage");

        let result = if resuming_loop {
            run_ready_stage(stage, factory, ctx, fsm, &options.event_tx).await
        } else if deps_failed {
            fsm.transition(StageEvent::DepsFailed, serde_json::Value::Null).ok();
            events::emit(
                &options.event_tx,
                events::ExecutorEvent::StageSkipped {
                    stage: stage_id.clone(),
                    reason: "upstream dependency failed".to_string(),
                },
            )
            .await;
            StageResult::pending(&stage_id).skipped("upstream dependency failed")
        } else if condition_false {
            fsm.transition(StageEvent::ConditionFalse, serde_json::Value::Null).ok();
            events::emit(
                &options.event_tx,
                events::ExecutorEvent::StageSkipped {
                    stage: stage_id.clone(),
                    reason: "condition not met".to_string(),
                },
            )
            .await;
            StageResult::pending(&stage_id).skipped("condition not met")
        } else {
            fsm.transition(StageEvent::DepsMet, serde_json::Value::Null)
                .expect("PENDING always accepts DEPS_MET once deps resolve");
            run_ready_stage(stage, factory, ctx, fsm, &options.event_tx).await
        };

        if !result.output.is_null() {
            ctx.record_output(&stage_id, result.output.clone());
        }

        let status = result.status;
        match status {
            StageRunStatus::Failed => {
                events::emit(
                    &options.event_tx,
                    events::ExecutorEvent::StageFailed {
                        stage: stage_id.clone(),
                        error: result.error.clone().unwrap_or_default(),
                    },
                )
                .await;
            }
            _ => {
                events::emit(
                    &options.event_tx,
                    events::ExecutorEvent::StageCompleted {
                        stage: stage_id.clone(),
                        result: Box::new(result.clone()),
                    },
                )
                .await;
            }
        }

        run.record(result);
        checkpoint = store
            .update_after_stage(checkpoint.clone(), &stage_id, status, ctx)
            .unwrap_or(checkpoint);

        if status == StageRunStatus::Failed {
            overall_failed = true;
            if !options.continue_on_failure {
                break;
            }
        }

        let fsm = stage_fsms.get_mut(&stage_id).expect("fsm registered for every stage");
        if status == StageRunStatus::Completed
            && let Some(target) = &stage.loop_to
            && let Some(target_idx) = order.iter().position(|id| id == target)
            && fsm.loops_remaining()
        {
            fsm.transition(StageEvent::Loop, serde_json::Value::Null)
                .expect("COMPLETED/VERIFYING accept LOOP");
            run.recursion_count += 1;
            ctx.recursion_count = run.recursion_count;

            // Everything between the loop target and the looping stage
            // itself runs again; give each a fresh FSM. The looping stage
            // stays in LOOPING and is special-cased back into EXECUTING
            // once the rewound cursor reaches it again.
            for id in &order[target_idx..index] {
                let s = factory.get_stage(id).expect("loop range stage exists in factory");
                stage_fsms.insert(
                    id.clone(),
                    StageFsm::new(s.has_verification(), s.max_retries(), ctx.max_recursion()),
                );
            }

            index = target_idx;
            continue;
        }

        index += 1;
    }

    let final_status = if ctx.stop.is_stopped() {
        let _ = factory_fsm.transition(FactoryEvent::Stop, options.continue_on_failure);
        RunStatus::Stopped
    } else if overall_failed {
        let _ = factory_fsm.transition(FactoryEvent::AnyFailed, false);
        RunStatus::Failed
    } else {
        let _ = factory_fsm.transition(FactoryEvent::AllCompleted, options.continue_on_failure);
        RunStatus::Completed
    };
    run.finish(final_status);
    if final_status == RunStatus::Completed {
        let _ = store.clear();
    }
    events::emit(
        &options.event_tx,
        events::ExecutorEvent::FactoryCompleted {
            success: factory_fsm.state == FactoryState::Completed,
        },
    )
    .await;
    run
}

/// **ResumeFromCheckpoint(factory, ctx, options) → Run.** Loads the
/// checkpoint at `ctx.run_dir`, skips every stage it already marked
/// terminal, and hands off to the same loop `run_factory` uses.
pub async fn resume_from_checkpoint(
    factory: &Factory,
    ctx: &mut Context,
    options: &OrchestratorOptions,
) -> anyhow::Result<Run> {
    let store = CheckpointStore::new(&ctx.run_dir);
    let checkpoint = store.load()?;
    crate::checkpoint_store::validate(&checkpoint, factory)?;
    ctx.recursion_count = checkpoint.recursion_count;
    Ok(run_factory_inner(factory, ctx, options, Some(checkpoint)).await)
}

/// **RunNested(path, variables, projectRoot) → Run | error.** Called by
/// [`crate::executor::dispatch::dispatch_factory`] to drive a `factory`-type
/// stage's referenced document as its own full run, sharing the parent's
/// project root but starting with a fresh stage-output scope.
pub async fn run_nested(
    path: &Path,
    variables: HashMap<String, serde_json::Value>,
    project_root: &Path,
) -> anyhow::Result<Run> {
    let (factory, _warnings) = crate::parser::parse(path)?;
    let run_dir = project_root.join(".kiln/runs").join(&factory.name);
    let mut ctx = Context::new(project_root.to_path_buf(), run_dir, variables);
    let driver = crate::driver::select_driver();
    let run = driver.run(&factory, &mut ctx, &crate::driver::DriverOptions::default()).await;
    Ok(run)
}
