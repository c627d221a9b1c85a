//! Subprocess-backed verifiers: `test_suite`, `test_coverage`,
//! `build_success`, `lint_pass`, `custom`.

use super::output_parse::{parse_coverage, parse_lint_counts, parse_test_counts};
use super::{resolve_path, VerificationResult};
use crate::model::Context;
use crate::subprocess::run_command;

pub async fn test_suite(ctx: &Context, command: &str, min_passing: u32, max_failing: u32) -> VerificationResult {
    let resolved = crate::parser::template::resolve_template(command, ctx);
    let output = match run_command(&resolved, &ctx.project_root, 0, &ctx.stop).await {
        Ok(output) => output,
        Err(err) => return VerificationResult::failed("test_suite", format!("failed to run command: {err}")),
    };

    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let counts = parse_test_counts(&combined).unwrap_or_default();

    if !output.succeeded() && max_failing == 0 {
        return VerificationResult::failed(
            "test_suite",
            format!("command exited {} with max_failing=0", output.exit_code),
        );
    }
    if counts.passing < min_passing {
        return VerificationResult::failed(
            "test_suite",
            format!("{} tests passed, need at least {min_passing}", counts.passing),
        );
    }
    if counts.failing > max_failing {
        return VerificationResult::failed(
            "test_suite",
            format!("{} tests failed, at most {max_failing} allowed", counts.failing),
        );
    }

    VerificationResult::passed("test_suite")
        .with_detail("passing", serde_json::json!(counts.passing))
        .with_detail("failing", serde_json::json!(counts.failing))
}

pub async fn test_coverage(ctx: &Context, command: &str, min_coverage: f64) -> VerificationResult {
    let resolved = crate::parser::template::resolve_template(command, ctx);
    let output = match run_command(&resolved, &ctx.project_root, 0, &ctx.stop).await {
        Ok(output) => output,
        Err(err) => return VerificationResult::failed("test_coverage", format!("failed to run command: {err}")),
    };

    let combined = format!("{}\n{}", output.stdout, output.stderr);
    match parse_coverage(&combined) {
        Some(pct) if pct >= min_coverage => {
            VerificationResult::passed("test_coverage").with_detail("coverage", serde_json::json!(pct))
        }
        Some(pct) => VerificationResult::failed(
            "test_coverage",
            format!("coverage {pct}% below required {min_coverage}%"),
        ),
        None => VerificationResult::failed("test_coverage", "could not parse coverage percentage from output"),
    }
}

pub async fn build_success(ctx: &Context, command: &str, artifacts: &[String]) -> VerificationResult {
    let resolved = crate::parser::template::resolve_template(command, ctx);
    let output = match run_command(&resolved, &ctx.project_root, 0, &ctx.stop).await {
        Ok(output) => output,
        Err(err) => return VerificationResult::failed("build_success", format!("failed to run command: {err}")),
    };

    if !output.succeeded() {
        return VerificationResult::failed("build_success", format!("build exited {}", output.exit_code));
    }

    let missing: Vec<String> = artifacts
        .iter()
        .filter(|a| !resolve_path(a, ctx).exists())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return VerificationResult::failed(
            "build_success",
            format!("missing build artifacts: {}", missing.join(", ")),
        );
    }

    VerificationResult::passed("build_success")
}

pub async fn lint_pass(ctx: &Context, command: &str, max_warnings: u32) -> VerificationResult {
    let resolved = crate::parser::template::resolve_template(command, ctx);
    let output = match run_command(&resolved, &ctx.project_root, 0, &ctx.stop).await {
        Ok(output) => output,
        Err(err) => return VerificationResult::failed("lint_pass", format!("failed to run command: {err}")),
    };

    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let counts = parse_lint_counts(&combined);

    if counts.errors > 0 {
        return VerificationResult::failed("lint_pass", format!("{} lint errors", counts.errors));
    }
    if counts.warnings > max_warnings {
        return VerificationResult::failed(
            "lint_pass",
            format!("{} lint warnings, at most {max_warnings} allowed", counts.warnings),
        );
    }

    VerificationResult::passed("lint_pass")
        .with_detail("errors", serde_json::json!(counts.errors))
        .with_detail("warnings", serde_json::json!(counts.warnings))
}

pub async fn custom(ctx: &Context, command: &str, expect_exit_code: i32) -> VerificationResult {
    let resolved = crate::parser::template::resolve_template(command, ctx);
    let output = match run_command(&resolved, &ctx.project_root, 0, &ctx.stop).await {
        Ok(output) => output,
        Err(err) => return VerificationResult::failed("custom", format!("failed to run command: {err}")),
    };

    if output.exit_code == expect_exit_code {
        VerificationResult::passed("custom")
    } else {
        VerificationResult::failed(
            "custom",
            format!("exit code {} did not match expected {expect_exit_code}", output.exit_code),
        )
    }
}
