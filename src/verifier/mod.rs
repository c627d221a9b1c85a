//! Independent verification gate (spec §4.3): after a stage claims success,
//! confirm work actually happened without trusting the stage's own report.

mod file;
mod output_parse;
mod process;
mod vcs;

pub use output_parse::parse_test_counts;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::model::{duration_millis, Context};

fn default_expect_exit_code() -> i32 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerifierConfig {
    FileExists {
        paths: Vec<String>,
    },
    FileChanged {
        paths: Vec<String>,
    },
    FileContains {
        path: String,
        patterns: Vec<String>,
    },
    GitCommits {
        #[serde(default)]
        min_commits: u32,
        #[serde(default)]
        author: Option<String>,
        #[serde(default)]
        message_pattern: Option<String>,
    },
    GitDiff {
        #[serde(default)]
        paths: Vec<String>,
        #[serde(default)]
        min_lines_changed: u32,
    },
    GitFilesChanged {
        paths: Vec<String>,
    },
    TestSuite {
        command: String,
        #[serde(default)]
        min_passing: u32,
        #[serde(default)]
        max_failing: u32,
    },
    TestCoverage {
        command: String,
        min_coverage: f64,
    },
    BuildSuccess {
        command: String,
        #[serde(default)]
        artifacts: Vec<String>,
    },
    LintPass {
        command: String,
        #[serde(default)]
        max_warnings: u32,
    },
    Custom {
        command: String,
        #[serde(default = "default_expect_exit_code")]
        expect_exit_code: i32,
    },
}

impl VerifierConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            VerifierConfig::FileExists { .. } => "file_exists",
            VerifierConfig::FileChanged { .. } => "file_changed",
            VerifierConfig::FileContains { .. } => "file_contains",
            VerifierConfig::GitCommits { .. } => "git_commits",
            VerifierConfig::GitDiff { .. } => "git_diff",
            VerifierConfig::GitFilesChanged { .. } => "git_files_changed",
            VerifierConfig::TestSuite { .. } => "test_suite",
            VerifierConfig::TestCoverage { .. } => "test_coverage",
            VerifierConfig::BuildSuccess { .. } => "build_success",
            VerifierConfig::LintPass { .. } => "lint_pass",
            VerifierConfig::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerifierStatus,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub details: HashMap<String, serde_json::Value>,
    pub message: Option<String>,
}

impl VerificationResult {
    pub fn passed(kind: &str) -> Self {
        Self {
            status: VerifierStatus::Passed,
            duration: Duration::ZERO,
            details: HashMap::from([("verifier".to_string(), serde_json::json!(kind))]),
            message: None,
        }
    }

    pub fn failed(kind: &str, message: impl Into<String>) -> Self {
        Self {
            status: VerifierStatus::Failed,
            duration: Duration::ZERO,
            details: HashMap::from([("verifier".to_string(), serde_json::json!(kind))]),
            message: Some(message.into()),
        }
    }

    pub fn skipped(kind: &str, reason: impl Into<String>) -> Self {
        Self {
            status: VerifierStatus::Skipped,
            duration: Duration::ZERO,
            details: HashMap::from([("verifier".to_string(), serde_json::json!(kind))]),
            message: Some(reason.into()),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == VerifierStatus::Passed
    }

    pub fn summary(&self) -> String {
        self.message.clone().unwrap_or_else(|| format!("{:?}", self.status))
    }
}

/// Resolves `{{ var }}` references in a path-like string against the
/// running context's variables, rooting relative paths at the project.
fn resolve_path(raw: &str, ctx: &Context) -> std::path::PathBuf {
    let resolved = crate::parser::template::resolve_template(raw, ctx);
    let path = std::path::PathBuf::from(resolved);
    if path.is_absolute() {
        path
    } else {
        ctx.project_root.join(path)
    }
}

async fn verify_one(config: &VerifierConfig, ctx: &Context) -> VerificationResult {
    let start = std::time::Instant::now();
    let result = match config {
        VerifierConfig::FileExists { paths } => file::file_exists(paths, ctx),
        VerifierConfig::FileChanged { paths } => vcs::file_changed(paths, ctx),
        VerifierConfig::FileContains { path, patterns } => file::file_contains(path, patterns, ctx),
        VerifierConfig::GitCommits {
            min_commits,
            author,
            message_pattern,
        } => vcs::git_commits(ctx, *min_commits, author.as_deref(), message_pattern.as_deref()),
        VerifierConfig::GitDiff { paths, min_lines_changed } => vcs::git_diff(ctx, paths, *min_lines_changed),
        VerifierConfig::GitFilesChanged { paths } => vcs::git_files_changed(ctx, paths),
        VerifierConfig::TestSuite {
            command,
            min_passing,
            max_failing,
        } => process::test_suite(ctx, command, *min_passing, *max_failing).await,
        VerifierConfig::TestCoverage { command, min_coverage } => {
            process::test_coverage(ctx, command, *min_coverage).await
        }
        VerifierConfig::BuildSuccess { command, artifacts } => {
            process::build_success(ctx, command, artifacts).await
        }
        VerifierConfig::LintPass { command, max_warnings } => process::lint_pass(ctx, command, *max_warnings).await,
        VerifierConfig::Custom {
            command,
            expect_exit_code,
        } => process::custom(ctx, command, *expect_exit_code).await,
    };
    result.with_duration(start.elapsed())
}

/// **RunAllVerifications(verifiers, ctx, root) → combined result.** All
/// verifiers must pass for the aggregate to pass; any failure is enumerated
/// by verifier kind in the combined message.
pub async fn run_all_verifications(verifiers: &[VerifierConfig], ctx: &Context) -> VerificationResult {
    if verifiers.is_empty() {
        return VerificationResult::passed("none");
    }

    let start = std::time::Instant::now();
    let mut failed_kinds = Vec::new();
    let mut details = HashMap::new();
    for config in verifiers {
        let result = verify_one(config, ctx).await;
        if result.status == VerifierStatus::Failed {
            failed_kinds.push(config.kind().to_string());
        }
        details.insert(config.kind().to_string(), serde_json::to_value(&result).unwrap_or_default());
    }

    let mut combined = if failed_kinds.is_empty() {
        VerificationResult::passed("all")
    } else {
        VerificationResult::failed(
            "aggregate",
            format!("verifiers failed: {}", failed_kinds.join(", ")),
        )
    };
    combined.details = details;
    combined.with_duration(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn ctx_at(root: &std::path::Path) -> Context {
        Context::new(root.to_path_buf(), root.join(".kiln/run-1"), Map::new())
    }

    #[tokio::test]
    async fn empty_verifier_list_passes_trivially() {
        let dir = tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        let result = run_all_verifications(&[], &ctx).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn file_exists_fails_on_missing_path() {
        let dir = tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        let verifiers = vec![VerifierConfig::FileExists {
            paths: vec!["missing.txt".to_string()],
        }];
        let result = run_all_verifications(&verifiers, &ctx).await;
        assert!(!result.is_ok());
        assert!(result.summary().contains("file_exists"));
    }

    #[tokio::test]
    async fn file_exists_passes_when_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let ctx = ctx_at(dir.path());
        let verifiers = vec![VerifierConfig::FileExists {
            paths: vec!["a.txt".to_string()],
        }];
        let result = run_all_verifications(&verifiers, &ctx).await;
        assert!(result.is_ok());
    }

    #[test]
    fn resolve_path_substitutes_template_and_roots_relative() {
        let mut ctx = ctx_at(&PathBuf::from("/proj"));
        ctx.variables.insert("name".into(), serde_json::json!("widget"));
        let resolved = resolve_path("out/{{ variables.name }}.json", &ctx);
        assert_eq!(resolved, PathBuf::from("/proj/out/widget.json"));
    }

    #[test]
    fn verifier_config_kind_labels() {
        assert_eq!(
            VerifierConfig::FileExists { paths: vec![] }.kind(),
            "file_exists"
        );
        assert_eq!(
            VerifierConfig::Custom {
                command: "x".into(),
                expect_exit_code: 0
            }
            .kind(),
            "custom"
        );
    }
}
