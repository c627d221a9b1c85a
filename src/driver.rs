//! Shared abstraction over the two execution drivers (spec §4.6): the
//! imperative executor and the FSM orchestrator report identically shaped
//! [`Run`]s, so a caller can select either without depending on which one
//! ran. Grounded on the teacher's `TaskRunner` trait in
//! `factory/agent_executor.rs` (real implementation plus a swappable
//! alternative behind one `async_trait`).

use async_trait::async_trait;

use crate::executor::events::EventSender;
use crate::model::{Context, Factory, Run};

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    pub continue_on_failure: bool,
    pub event_tx: Option<EventSender>,
}

#[async_trait]
pub trait FactoryDriver: Send + Sync {
    async fn run(&self, factory: &Factory, ctx: &mut Context, options: &DriverOptions) -> Run;
}

/// The default path: `ExecuteFactory`, selected when `RALPH_FACTORY_FSM`
/// is unset.
pub struct ImperativeDriver;

#[async_trait]
impl FactoryDriver for ImperativeDriver {
    async fn run(&self, factory: &Factory, ctx: &mut Context, options: &DriverOptions) -> Run {
        crate::executor::imperative::execute_factory(
            factory,
            ctx,
            &crate::executor::imperative::ExecuteOptions {
                continue_on_failure: options.continue_on_failure,
                event_tx: options.event_tx.clone(),
            },
        )
        .await
    }
}

/// The explicit state-machine path, selected by `RALPH_FACTORY_FSM`.
pub struct FsmDriver;

#[async_trait]
impl FactoryDriver for FsmDriver {
    async fn run(&self, factory: &Factory, ctx: &mut Context, options: &DriverOptions) -> Run {
        crate::orchestrator::run_factory(
            factory,
            ctx,
            &crate::orchestrator::OrchestratorOptions {
                continue_on_failure: options.continue_on_failure,
                event_tx: options.event_tx.clone(),
            },
        )
        .await
    }
}

/// **SelectDriver().** Unset or `false` → imperative; any other value →
/// FSM-driven (spec §6).
pub fn select_driver() -> Box<dyn FactoryDriver> {
    match std::env::var("RALPH_FACTORY_FSM") {
        Ok(value) if value != "false" => Box::new(FsmDriver),
        _ => Box::new(ImperativeDriver),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunStatus, Stage, StageType};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn factory() -> Factory {
        Factory {
            version: "1".into(),
            name: "demo".into(),
            variables: HashMap::new(),
            agents: Default::default(),
            stages: vec![Stage::new("a", StageType::Custom).with_command("echo a")],
            source_path: None,
        }
    }

    #[tokio::test]
    async fn imperative_driver_runs_to_completion() {
        let dir = tempdir().unwrap();
        let mut ctx = Context::new(dir.path().to_path_buf(), dir.path().join(".kiln/run-1"), HashMap::new());
        let run = ImperativeDriver.run(&factory(), &mut ctx, &DriverOptions::default()).await;
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn fsm_driver_runs_to_completion() {
        let dir = tempdir().unwrap();
        let mut ctx = Context::new(dir.path().to_path_buf(), dir.path().join(".kiln/run-1"), HashMap::new());
        let run = FsmDriver.run(&factory(), &mut ctx, &DriverOptions::default()).await;
        assert_eq!(run.status, RunStatus::Completed);
    }
}
