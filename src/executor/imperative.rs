//! `ExecuteFactory`/`ExecuteParallel` (spec §4.4): the non-FSM execution
//! path, toggled on by the absence of `RALPH_FACTORY_FSM`.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::executor::events::EventSender;
use crate::executor::execute_one_stage;
use crate::model::{Context, Factory, Run, RunStatus, StageRunStatus};
use crate::scheduler::{build_graph, parallel_groups, topological_order};

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub continue_on_failure: bool,
    pub event_tx: Option<EventSender>,
}

/// **ExecuteFactory(factory, order, ctx, runDir, root, options) → Run.**
/// Walks the topological order sequentially. A stage's `loop_to` rewinds
/// the cursor back to an earlier stage as long as `ctx.max_recursion()`
/// has not been exhausted; the loop target and everything between it and
/// the looping stage is free to run again with fresh context.
pub async fn execute_factory(factory: &Factory, ctx: &mut Context, options: &ExecuteOptions) -> Run {
    let order = match build_graph(&factory.stages).and_then(|g| topological_order(&g)) {
        Ok(order) => order,
        Err(err) => {
            let mut run = Run::new(factory.name.clone());
            run.start();
            run.finish(RunStatus::Failed);
            run.stage_results.insert(
                "__factory__".to_string(),
                crate::model::StageResult::pending("__factory__").failure(err.to_string(), std::time::Duration::ZERO),
            );
            return run;
        }
    };

    let mut run = Run::new(factory.name.clone());
    run.start();

    let max_recursion = ctx.max_recursion();
    let mut index = 0usize;
    let mut failed = false;

    while index < order.len() {
        if ctx.stop.is_stopped() {
            break;
        }

        let stage_id = &order[index];
        let stage = factory
            .get_stage(stage_id)
            .expect("stage in topological order exists in factory");

        let (result, output) = execute_one_stage(stage, factory, ctx, &options.event_tx).await;
        if let Some(output) = output {
            ctx.record_output(stage_id, output);
        }

        let stage_failed = result.status == StageRunStatus::Failed;
        run.record(result);

        if stage_failed {
            failed = true;
            if !options.continue_on_failure {
                break;
            }
        }

        if !stage_failed
            && let Some(target) = &stage.loop_to
            && let Some(target_idx) = order.iter().position(|id| id == target)
            && ctx.recursion_count < max_recursion
        {
            ctx.recursion_count += 1;
            run.recursion_count = ctx.recursion_count;
            index = target_idx;
            continue;
        }

        index += 1;
    }

    let final_status = if ctx.stop.is_stopped() {
        RunStatus::Stopped
    } else if failed {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    run.finish(final_status);
    crate::executor::events::emit(
        &options.event_tx,
        crate::executor::events::ExecutorEvent::FactoryCompleted {
            success: final_status == RunStatus::Completed,
        },
    )
    .await;
    run
}

/// **ExecuteParallel(factory, ctx, options) → Run.** Runs each
/// dependency-satisfied level concurrently, gated by a
/// [`tokio::sync::Semaphore`] sized to the level's tightest `config.parallel`
/// — a stage that declares a lower bound caps how many of its level-mates
/// may run alongside it. Stages within a level observe the same context
/// snapshot and may not see each other's outputs; the context is only
/// updated at level boundaries, once every stage in the level has finished.
pub async fn execute_parallel(factory: &Factory, ctx: &mut Context, options: &ExecuteOptions) -> Run {
    let graph = match build_graph(&factory.stages) {
        Ok(graph) => graph,
        Err(err) => {
            let mut run = Run::new(factory.name.clone());
            run.start();
            run.finish(RunStatus::Failed);
            run.stage_results.insert(
                "__factory__".to_string(),
                crate::model::StageResult::pending("__factory__").failure(err.to_string(), std::time::Duration::ZERO),
            );
            return run;
        }
    };

    let mut run = Run::new(factory.name.clone());
    run.start();
    let mut failed = false;

    'levels: for group in parallel_groups(&graph) {
        if ctx.stop.is_stopped() {
            break 'levels;
        }
        let snapshot = ctx.clone();
        let permits = group
            .iter()
            .filter_map(|id| factory.get_stage(id))
            .map(|s| s.config.parallel)
            .min()
            .unwrap_or(1)
            .max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(permits));

        let futures = group.iter().map(|stage_id| {
            let stage = factory.get_stage(stage_id).expect("group stage exists in factory").clone();
            let mut local_ctx = snapshot.clone();
            let event_tx = options.event_tx.clone();
            let factory = factory.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                let (result, output) = execute_one_stage(&stage, &factory, &mut local_ctx, &event_tx).await;
                (stage.id, result, output)
            }
        });

        let outcomes = futures::future::join_all(futures).await;
        for (stage_id, result, output) in outcomes {
            if let Some(output) = output {
                ctx.record_output(&stage_id, output);
            }
            let stage_failed = result.status == StageRunStatus::Failed;
            run.record(result);
            if stage_failed {
                failed = true;
                if !options.continue_on_failure {
                    break 'levels;
                }
            }
        }
    }

    let final_status = if ctx.stop.is_stopped() {
        RunStatus::Stopped
    } else if failed {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    run.finish(final_status);
    crate::executor::events::emit(
        &options.event_tx,
        crate::executor::events::ExecutorEvent::FactoryCompleted {
            success: final_status == RunStatus::Completed,
        },
    )
    .await;
    run
}
