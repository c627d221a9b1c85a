//! End-to-end tests driving the library surface directly: write a factory
//! document to a temp project, run it through the parser and a driver, and
//! assert on the resulting `Run`. No CLI binary exists in this crate, so
//! these exercise `kiln::{parser, driver, orchestrator, checkpoint_store}`
//! the way an embedding application would.

use kiln::driver::FactoryDriver;
use kiln::model::{Context, StageRunStatus};
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

fn project() -> TempDir {
    TempDir::new().unwrap()
}

fn write_factory(dir: &Path, yaml: &str) -> std::path::PathBuf {
    let path = dir.join("factory.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

fn context(dir: &Path) -> Context {
    Context::new(dir.to_path_buf(), dir.join(".kiln/runs/demo"), HashMap::new())
}

mod linear_pipeline {
    use super::*;

    #[tokio::test]
    async fn three_stages_run_in_dependency_order_and_complete() {
        let dir = project();
        let path = write_factory(
            dir.path(),
            r#"
name: release
stages:
  - id: a
    type: custom
    command: "echo one"
  - id: b
    type: custom
    depends_on: [a]
    command: "echo two"
  - id: c
    type: custom
    depends_on: [b]
    command: "echo three"
"#,
        );

        let (factory, warnings) = kiln::parser::parse(&path).unwrap();
        assert!(warnings.is_empty());

        let mut ctx = context(dir.path());
        let run = kiln::driver::ImperativeDriver
            .run(&factory, &mut ctx, &kiln::driver::DriverOptions::default())
            .await;

        assert_eq!(run.status, kiln::model::RunStatus::Completed);
        assert_eq!(run.completed_stage_ids(), vec!["a", "b", "c"]);
    }
}

mod conditional_skip {
    use super::*;

    #[tokio::test]
    async fn a_false_condition_skips_the_stage_without_running_it() {
        let dir = project();
        let path = write_factory(
            dir.path(),
            r#"
name: conditional
variables:
  should_run: false
stages:
  - id: gate
    type: custom
    command: "echo gate"
  - id: maybe
    type: custom
    depends_on: [gate]
    condition: "variables.should_run"
    command: "touch should-not-exist"
"#,
        );

        let (factory, _) = kiln::parser::parse(&path).unwrap();
        let mut ctx = context(dir.path());
        let driver = kiln::driver::select_driver();
        let run = driver.run(&factory, &mut ctx, &kiln::driver::DriverOptions::default()).await;

        assert_eq!(run.status, kiln::model::RunStatus::Completed);
        let maybe = &run.stage_results["maybe"];
        assert_eq!(maybe.status, StageRunStatus::Skipped);
        assert!(!dir.path().join("should-not-exist").exists());
    }
}

mod parallel_branch_with_merge {
    use super::*;

    #[tokio::test]
    async fn independent_branches_both_complete_before_their_dependent_runs() {
        let dir = project();
        let path = write_factory(
            dir.path(),
            r#"
name: fanout
stages:
  - id: setup
    type: custom
    command: "echo setup"
  - id: lint
    type: custom
    depends_on: [setup]
    command: "echo lint"
  - id: test
    type: custom
    depends_on: [setup]
    command: "echo test"
  - id: publish
    type: custom
    depends_on: [lint, test]
    merge_strategy: all
    command: "echo publish"
"#,
        );

        let (factory, _) = kiln::parser::parse(&path).unwrap();
        let mut ctx = context(dir.path());
        let run = kiln::driver::ImperativeDriver
            .run(&factory, &mut ctx, &kiln::driver::DriverOptions::default())
            .await;

        assert_eq!(run.status, kiln::model::RunStatus::Completed);
        for id in ["setup", "lint", "test", "publish"] {
            assert_eq!(run.stage_results[id].status, StageRunStatus::Completed, "{id}");
        }
    }
}

mod verification_overrides_claimed_success {
    use super::*;

    #[tokio::test]
    async fn a_stage_claiming_success_fails_the_run_when_verification_disagrees() {
        let dir = project();
        let path = write_factory(
            dir.path(),
            r#"
name: verified
stages:
  - id: build
    type: custom
    command: "echo '{\"success\": true}'"
    verify:
      - kind: file_exists
        paths: ["dist/bundle.js"]
"#,
        );

        let (factory, _) = kiln::parser::parse(&path).unwrap();
        let mut ctx = context(dir.path());
        let run = kiln::driver::ImperativeDriver
            .run(&factory, &mut ctx, &kiln::driver::DriverOptions::default())
            .await;

        assert_eq!(run.status, kiln::model::RunStatus::Failed);
        let build = &run.stage_results["build"];
        assert_eq!(build.status, StageRunStatus::Failed);
        assert!(build.error.as_deref().unwrap_or("").contains("Verification failed"));
    }
}

mod loop_with_bound {
    use super::*;

    #[tokio::test]
    async fn loop_to_rewinds_until_max_recursion_then_stops() {
        let dir = project();
        let path = write_factory(
            dir.path(),
            r#"
name: iterate
variables:
  max_recursion: 2
stages:
  - id: attempt
    type: custom
    command: "echo attempt"
  - id: review
    type: custom
    depends_on: [attempt]
    command: "echo review"
    loop_to: attempt
"#,
        );

        let (factory, _) = kiln::parser::parse(&path).unwrap();
        let mut ctx = context(dir.path());
        ctx.variables.insert("max_recursion".into(), serde_json::json!(2));

        let run = kiln::orchestrator::run_factory(&factory, &mut ctx, &kiln::orchestrator::OrchestratorOptions::default()).await;

        assert!(run.status.is_terminal());
        assert!(run.recursion_count <= 2, "recursion_count {} exceeded the bound", run.recursion_count);
    }
}

mod checkpoint_resume {
    use super::*;
    use kiln::checkpoint_store::CheckpointStore;
    use kiln::model::Checkpoint;

    #[tokio::test]
    async fn resuming_skips_stages_already_recorded_as_completed() {
        let dir = project();
        let path = write_factory(
            dir.path(),
            r#"
name: resumable
stages:
  - id: a
    type: custom
    command: "echo a"
  - id: b
    type: custom
    depends_on: [a]
    command: "touch resumed-marker"
"#,
        );

        let (factory, _) = kiln::parser::parse(&path).unwrap();

        let mut ctx = context(dir.path());
        let mut checkpoint = Checkpoint::new_fsm(&factory.name, "run-1");
        checkpoint.completed.push("a".to_string());
        let store = CheckpointStore::new(&ctx.run_dir);
        store.save(&checkpoint).unwrap();

        let run = kiln::orchestrator::resume_from_checkpoint(&factory, &mut ctx, &kiln::orchestrator::OrchestratorOptions::default())
            .await
            .unwrap();

        assert_eq!(run.status, kiln::model::RunStatus::Completed);
        assert!(run.completed_stage_ids().contains(&"a".to_string()));
        assert!(run.completed_stage_ids().contains(&"b".to_string()));
        assert!(dir.path().join("resumed-marker").exists());
    }
}
