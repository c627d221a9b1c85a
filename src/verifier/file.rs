//! `file_exists` / `file_contains` verifiers.

use regex::Regex;

use super::{resolve_path, VerificationResult};
use crate::model::Context;

pub fn file_exists(paths: &[String], ctx: &Context) -> VerificationResult {
    let missing: Vec<String> = paths
        .iter()
        .filter(|p| !resolve_path(p, ctx).exists())
        .cloned()
        .collect();
    if missing.is_empty() {
        VerificationResult::passed("file_exists")
    } else {
        VerificationResult::failed("file_exists", format!("missing paths: {}", missing.join(", ")))
    }
}

pub fn file_contains(path: &str, patterns: &[String], ctx: &Context) -> VerificationResult {
    let resolved = resolve_path(path, ctx);
    let content = match std::fs::read_to_string(&resolved) {
        Ok(content) => content,
        Err(err) => {
            return VerificationResult::failed(
                "file_contains",
                format!("cannot read {}: {err}", resolved.display()),
            )
        }
    };

    let mut unmatched = Vec::new();
    for pattern in patterns {
        let compiled = match Regex::new(pattern) {
            Ok(re) => re,
            Err(err) => {
                return VerificationResult::failed(
                    "file_contains",
                    format!("invalid pattern '{pattern}': {err}"),
                )
            }
        };
        if !compiled.is_match(&content) {
            unmatched.push(pattern.clone());
        }
    }

    if unmatched.is_empty() {
        VerificationResult::passed("file_contains")
    } else {
        VerificationResult::failed(
            "file_contains",
            format!("patterns not found in {}: {}", resolved.display(), unmatched.join(", ")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn ctx_at(root: &std::path::Path) -> Context {
        Context::new(root.to_path_buf(), root.join(".kiln/run-1"), HashMap::new())
    }

    #[test]
    fn file_contains_matches_all_patterns() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "status: done\ncount: 3").unwrap();
        let ctx = ctx_at(dir.path());
        let result = file_contains("notes.md", &["status: \\w+".into(), "count: \\d+".into()], &ctx);
        assert!(result.is_ok());
    }

    #[test]
    fn file_contains_reports_unmatched_pattern() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "status: done").unwrap();
        let ctx = ctx_at(dir.path());
        let result = file_contains("notes.md", &["missing_token".into()], &ctx);
        assert!(!result.is_ok());
        assert!(result.summary().contains("missing_token"));
    }

    #[test]
    fn file_contains_fails_on_missing_file() {
        let dir = tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        let result = file_contains("ghost.md", &["x".into()], &ctx);
        assert!(!result.is_ok());
    }
}
