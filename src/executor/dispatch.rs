//! Per-stage-type handlers (spec §4.4 step 2, §6 output payload shapes).

use std::path::{Path, PathBuf};

use crate::errors::ExecutionError;
use crate::model::{Context, Factory, Stage, StageType};
use crate::parser::template::resolve_template;
use crate::subprocess::run_command;

/// Resolves a stage-type role (`"prd"`, `"plan"`, `"build"`) to a runnable
/// command line, preferring a binary bundled inside the project, then one
/// installed in the project's local dependency tree, then falling back to
/// executing it by name through the shell. A local binary with a
/// recognizable extension is run through its interpreter explicitly,
/// rather than relying on a shebang line and `PATH`.
fn locate_agent_command(project_root: &Path, binary: &str) -> String {
    let bundled = project_root.join(".kiln/bin").join(binary);
    let vendored = project_root.join(".kiln/vendor/bin").join(binary);

    for candidate in [bundled, vendored] {
        if candidate.is_file() {
            return match candidate.extension().and_then(|e| e.to_str()) {
                Some("py") => format!("python3 {}", shell_quote(&candidate)),
                Some("js") => format!("node {}", shell_quote(&candidate)),
                Some("sh") => format!("sh {}", shell_quote(&candidate)),
                _ => shell_quote(&candidate),
            };
        }
    }
    binary.to_string()
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display())
}

fn next_prd_number(project_root: &Path) -> std::io::Result<u32> {
    let counter_path = project_root.join(".kiln/prd_counter");
    let current: u32 = std::fs::read_to_string(&counter_path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let next = current + 1;
    if let Some(parent) = counter_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = counter_path.with_extension("tmp");
    std::fs::write(&tmp, next.to_string())?;
    std::fs::rename(&tmp, &counter_path)?;
    Ok(next)
}

fn count_markers(text: &str, marker: &str) -> u32 {
    text.lines().filter(|line| line.trim_start().starts_with(marker)).count() as u32
}

fn input_value(stage: &Stage, key: &str, ctx: &Context) -> Option<serde_json::Value> {
    if let Some(raw) = stage.input.get(key) {
        let resolved = resolve_template(raw, ctx);
        return Some(serde_json::Value::String(resolved));
    }
    for dep in &stage.depends_on {
        if let Some(output) = ctx.stage_outputs.get(dep)
            && let Some(value) = output.get(key)
        {
            return Some(value.clone());
        }
    }
    None
}

pub async fn dispatch_prd(stage: &Stage, ctx: &mut Context) -> Result<serde_json::Value, ExecutionError> {
    let request = stage.input.get("request").cloned().unwrap_or_default();
    let request = resolve_template(&request, ctx);

    let prd_number =
        next_prd_number(&ctx.project_root).map_err(|source| ExecutionError::Io { stage: stage.id.clone(), source })?;

    let run_dir = ctx.run_dir.clone();
    std::fs::create_dir_all(&run_dir).map_err(|source| ExecutionError::Io {
        stage: stage.id.clone(),
        source,
    })?;
    let prd_path = run_dir.join(format!("{}-request.md", stage.id));
    std::fs::write(&prd_path, &request).map_err(|source| ExecutionError::Io {
        stage: stage.id.clone(),
        source,
    })?;

    let binary = locate_agent_command(&ctx.project_root, "prd");
    let command = format!("{binary} --non-interactive");
    let output = run_command(&command, &ctx.project_root, stage.config.timeout_ms, &ctx.stop)
        .await
        .map_err(|source| ExecutionError::SpawnFailed {
            stage: stage.id.clone(),
            source,
        })?;

    Ok(serde_json::json!({
        "prd_number": prd_number,
        "prd_path": prd_path,
        "request": request,
        "success": output.succeeded(),
        "stdout": output.stdout,
        "stderr": output.stderr,
    }))
}

pub async fn dispatch_plan(stage: &Stage, ctx: &mut Context) -> Result<serde_json::Value, ExecutionError> {
    let prd_number = input_value(stage, "prd_number", ctx).unwrap_or(serde_json::Value::Null);

    let binary = locate_agent_command(&ctx.project_root, "plan");
    let command = format!("{binary} --prd {prd_number}");
    let output = run_command(&command, &ctx.project_root, stage.config.timeout_ms, &ctx.stop)
        .await
        .map_err(|source| ExecutionError::SpawnFailed {
            stage: stage.id.clone(),
            source,
        })?;

    let plan_path: PathBuf = ctx.run_dir.join(format!("{}-plan.md", stage.id));
    std::fs::create_dir_all(&ctx.run_dir).map_err(|source| ExecutionError::Io {
        stage: stage.id.clone(),
        source,
    })?;
    std::fs::write(&plan_path, &output.stdout).map_err(|source| ExecutionError::Io {
        stage: stage.id.clone(),
        source,
    })?;
    let stories_count = count_markers(&output.stdout, "- [ ]");

    Ok(serde_json::json!({
        "prd_number": prd_number,
        "plan_path": plan_path,
        "stories_count": stories_count,
        "success": output.succeeded(),
        "stdout": output.stdout,
        "stderr": output.stderr,
    }))
}

pub async fn dispatch_build(stage: &Stage, ctx: &mut Context) -> Result<serde_json::Value, ExecutionError> {
    let prd_number = input_value(stage, "prd_number", ctx).unwrap_or(serde_json::Value::Null);
    let binary = locate_agent_command(&ctx.project_root, "build");

    let mut last_stdout = String::new();
    let mut last_success = true;
    for _ in 0..stage.config.iterations {
        let command = format!("{binary} --prd {prd_number}");
        let output = run_command(&command, &ctx.project_root, stage.config.timeout_ms, &ctx.stop)
            .await
            .map_err(|source| ExecutionError::SpawnFailed {
                stage: stage.id.clone(),
                source,
            })?;
        last_success = output.succeeded();
        last_stdout = output.stdout;
        if !last_success {
            break;
        }
    }

    let completed_stories = count_markers(&last_stdout, "- [x]");

    Ok(serde_json::json!({
        "prd_number": prd_number,
        "iterations": stage.config.iterations,
        "completed_stories": completed_stories,
        "success": last_success,
        "stdout": last_stdout,
        "stderr": "",
    }))
}

pub async fn dispatch_custom(stage: &Stage, ctx: &mut Context) -> Result<serde_json::Value, ExecutionError> {
    let raw_command = stage
        .command
        .as_ref()
        .ok_or_else(|| ExecutionError::MissingBinary(stage.id.clone()))?;
    let command = resolve_template(raw_command, ctx);

    let output = run_command(&command, &ctx.project_root, stage.config.timeout_ms, &ctx.stop)
        .await
        .map_err(|source| ExecutionError::SpawnFailed {
            stage: stage.id.clone(),
            source,
        })?;

    let mut payload = serde_json::json!({
        "command": command,
        "exit_code": output.exit_code,
        "stdout": output.stdout,
        "stderr": output.stderr,
        "passed": output.succeeded(),
        "failed": !output.succeeded(),
    });

    if command.to_lowercase().contains("test") {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if let Some(counts) = crate::verifier::parse_test_counts(&combined) {
            payload["test_results"] = serde_json::json!({"passing": counts.passing, "failing": counts.failing});
            if counts.failing > 0 {
                payload["error_summary"] = serde_json::json!(format!("{} tests failing", counts.failing));
            }
        }
    }

    Ok(payload)
}

pub async fn dispatch_factory(
    stage: &Stage,
    parent_factory: &Factory,
    ctx: &mut Context,
) -> Result<serde_json::Value, ExecutionError> {
    let nested_name = stage
        .factory
        .clone()
        .ok_or_else(|| ExecutionError::MissingBinary(stage.id.clone()))?;

    let nested_path = parent_factory
        .source_path
        .as_ref()
        .and_then(|p| p.parent())
        .map(|dir| dir.join(format!("{nested_name}.yaml")))
        .unwrap_or_else(|| PathBuf::from(format!("{nested_name}.yaml")));

    match crate::orchestrator::run_nested(&nested_path, ctx.variables.clone(), &ctx.project_root).await {
        Ok(summary) => Ok(serde_json::json!({
            "factory": nested_name,
            "run_id": summary.run_id,
            "success": summary.status == crate::model::RunStatus::Completed,
            "state": format!("{:?}", summary.status),
        })),
        Err(err) => Ok(serde_json::json!({
            "factory": nested_name,
            "run_id": serde_json::Value::Null,
            "success": false,
            "state": "Failed",
            "error": err.to_string(),
        })),
    }
}

pub fn stage_type_label(kind: StageType) -> &'static str {
    kind.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn locate_agent_command_falls_back_to_bare_name() {
        let dir = tempdir().unwrap();
        assert_eq!(locate_agent_command(dir.path(), "plan"), "plan");
    }

    #[test]
    fn locate_agent_command_prefers_bundled_binary() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".kiln/bin")).unwrap();
        std::fs::write(dir.path().join(".kiln/bin/plan.py"), "#!/usr/bin/env python3\n").unwrap();
        let command = locate_agent_command(dir.path(), "plan.py");
        assert!(command.starts_with("python3 "));
    }

    #[test]
    fn next_prd_number_increments_across_calls() {
        let dir = tempdir().unwrap();
        assert_eq!(next_prd_number(dir.path()).unwrap(), 1);
        assert_eq!(next_prd_number(dir.path()).unwrap(), 2);
        assert_eq!(next_prd_number(dir.path()).unwrap(), 3);
    }

    #[test]
    fn count_markers_counts_checked_and_unchecked() {
        let text = "- [ ] one\n- [x] two\n- [ ] three\n";
        assert_eq!(count_markers(text, "- [ ]"), 2);
        assert_eq!(count_markers(text, "- [x]"), 1);
    }

    #[tokio::test]
    async fn dispatch_custom_runs_templated_command() {
        let dir = tempdir().unwrap();
        let mut ctx = Context::new(dir.path().to_path_buf(), dir.path().join(".kiln/run-1"), HashMap::new());
        ctx.variables.insert("word".into(), serde_json::json!("hi"));
        let stage = Stage::new("echo", StageType::Custom).with_command("echo {{ variables.word }}");
        let payload = dispatch_custom(&stage, &mut ctx).await.unwrap();
        assert_eq!(payload["passed"], serde_json::json!(true));
        assert!(payload["stdout"].as_str().unwrap().contains("hi"));
    }
}
