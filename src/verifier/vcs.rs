//! Version-control-backed verifiers: `file_changed`, `git_commits`,
//! `git_diff`, `git_files_changed`. Grounded on the teacher's
//! `tracker/git.rs` (`GitTracker`), generalized from phase snapshot/diff
//! bookkeeping to read-only verification queries.

use git2::Repository;
use regex::Regex;

use super::{resolve_path, VerificationResult};
use crate::model::Context;

fn open_repo(ctx: &Context) -> Option<Repository> {
    Repository::open(&ctx.project_root).ok()
}

pub fn file_changed(paths: &[String], ctx: &Context) -> VerificationResult {
    let repo = open_repo(ctx);
    let mut unchanged = Vec::new();

    for raw in paths {
        let resolved = resolve_path(raw, ctx);
        let changed = if let Some(repo) = &repo {
            let rel = match resolved.strip_prefix(&ctx.project_root) {
                Ok(rel) => rel,
                Err(_) => resolved.as_path(),
            };
            repo.status_file(rel)
                .map(|status| {
                    status.intersects(
                        git2::Status::WT_MODIFIED
                            | git2::Status::WT_NEW
                            | git2::Status::INDEX_MODIFIED
                            | git2::Status::INDEX_NEW,
                    )
                })
                .unwrap_or(false)
        } else {
            false
        };

        let changed = changed || mtime_since(&resolved, ctx);
        if !changed {
            unchanged.push(raw.clone());
        }
    }

    if unchanged.is_empty() {
        VerificationResult::passed("file_changed")
    } else {
        VerificationResult::failed("file_changed", format!("not modified since run start: {}", unchanged.join(", ")))
    }
}

fn mtime_since(path: &std::path::Path, ctx: &Context) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| {
            let modified: chrono::DateTime<chrono::Utc> = modified.into();
            modified >= ctx.started_at
        })
        .unwrap_or(false)
}

pub fn git_commits(ctx: &Context, min_commits: u32, author: Option<&str>, message_pattern: Option<&str>) -> VerificationResult {
    let Some(repo) = open_repo(ctx) else {
        return VerificationResult::failed("git_commits", "no git repository at project root");
    };

    let message_re = match message_pattern.map(Regex::new) {
        Some(Ok(re)) => Some(re),
        Some(Err(err)) => {
            return VerificationResult::failed("git_commits", format!("invalid message_pattern: {err}"))
        }
        None => None,
    };

    let mut revwalk = match repo.revwalk() {
        Ok(revwalk) => revwalk,
        Err(err) => return VerificationResult::failed("git_commits", format!("revwalk failed: {err}")),
    };
    if revwalk.push_head().is_err() {
        return VerificationResult::passed("git_commits").with_detail("count", serde_json::json!(0));
    }

    let mut count = 0u32;
    for oid in revwalk.flatten() {
        let Ok(commit) = repo.find_commit(oid) else { continue };
        let commit_time = chrono::DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or(ctx.started_at);
        if commit_time < ctx.started_at {
            break;
        }
        if let Some(expected) = author
            && commit.author().name() != Some(expected)
        {
            continue;
        }
        if let Some(re) = &message_re
            && !commit.message().is_some_and(|m| re.is_match(m))
        {
            continue;
        }
        count += 1;
    }

    if count >= min_commits {
        VerificationResult::passed("git_commits").with_detail("count", serde_json::json!(count))
    } else {
        VerificationResult::failed(
            "git_commits",
            format!("found {count} commits since run start, need at least {min_commits}"),
        )
    }
}

fn diff_stats(repo: &Repository, paths: &[String]) -> Result<(usize, usize, Vec<String>), git2::Error> {
    let head = repo.head()?.peel_to_commit()?;
    let head_tree = head.tree()?;
    let parent_tree = head.parent(0).ok().and_then(|p| p.tree().ok());

    let mut opts = git2::DiffOptions::new();
    for path in paths {
        opts.pathspec(path);
    }
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&head_tree), Some(&mut opts))?;
    let stats = diff.stats()?;

    let mut files = Vec::new();
    diff.foreach(
        &mut |delta, _| {
            if let Some(path) = delta.new_file().path() {
                files.push(path.to_string_lossy().to_string());
            }
            true
        },
        None,
        None,
        None,
    )?;

    Ok((stats.insertions(), stats.deletions(), files))
}

pub fn git_diff(ctx: &Context, paths: &[String], min_lines_changed: u32) -> VerificationResult {
    let Some(repo) = open_repo(ctx) else {
        return VerificationResult::failed("git_diff", "no git repository at project root");
    };
    match diff_stats(&repo, paths) {
        Ok((insertions, deletions, _)) => {
            let total = (insertions + deletions) as u32;
            if total >= min_lines_changed {
                VerificationResult::passed("git_diff").with_detail("lines_changed", serde_json::json!(total))
            } else {
                VerificationResult::failed(
                    "git_diff",
                    format!("diff changed {total} lines, need at least {min_lines_changed}"),
                )
            }
        }
        Err(err) => VerificationResult::failed("git_diff", format!("diff failed: {err}")),
    }
}

pub fn git_files_changed(ctx: &Context, required: &[String]) -> VerificationResult {
    let Some(repo) = open_repo(ctx) else {
        return VerificationResult::failed("git_files_changed", "no git repository at project root");
    };
    let (_, _, changed) = match diff_stats(&repo, &[]) {
        Ok(stats) => stats,
        Err(err) => return VerificationResult::failed("git_files_changed", format!("diff failed: {err}")),
    };

    let mut missing = Vec::new();
    for pattern in required {
        let matched = match glob::Pattern::new(pattern) {
            Ok(glob_pattern) => changed.iter().any(|f| glob_pattern.matches(f) || f == pattern),
            Err(_) => changed.iter().any(|f| f == pattern),
        };
        if !matched {
            missing.push(pattern.clone());
        }
    }

    if missing.is_empty() {
        VerificationResult::passed("git_files_changed")
    } else {
        VerificationResult::failed(
            "git_files_changed",
            format!("not found in recent diff: {}", missing.join(", ")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn init_repo(dir: &std::path::Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        repo
    }

    fn commit_all(repo: &Repository, message: &str) -> git2::Oid {
        let mut index = repo.index().unwrap();
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap()
    }

    #[test]
    fn git_commits_counts_commits_after_run_start() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();
        commit_all(&repo, "first");

        let mut ctx = Context::new(dir.path().to_path_buf(), dir.path().join(".kiln/run"), HashMap::new());
        ctx.started_at = chrono::Utc::now() + chrono::Duration::seconds(5);

        std::fs::write(dir.path().join("b.txt"), "2").unwrap();
        commit_all(&repo, "second");

        let result = git_commits(&ctx, 1, None, None);
        assert!(!result.is_ok(), "commit predates run start and should not count");
    }

    #[test]
    fn git_diff_requires_minimum_lines_changed() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        commit_all(&repo, "first");
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        commit_all(&repo, "second");

        let ctx = Context::new(dir.path().to_path_buf(), dir.path().join(".kiln/run"), HashMap::new());
        let result = git_diff(&ctx, &[], 2);
        assert!(result.is_ok());
        let result = git_diff(&ctx, &[], 100);
        assert!(!result.is_ok());
    }

    #[test]
    fn git_files_changed_matches_glob() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "1").unwrap();
        commit_all(&repo, "first");
        std::fs::write(dir.path().join("src/lib.rs"), "2").unwrap();
        commit_all(&repo, "second");

        let ctx = Context::new(dir.path().to_path_buf(), dir.path().join(".kiln/run"), HashMap::new());
        let result = git_files_changed(&ctx, &["src/*.rs".to_string()]);
        assert!(result.is_ok());
        let result = git_files_changed(&ctx, &["docs/*.md".to_string()]);
        assert!(!result.is_ok());
    }

    #[test]
    fn file_changed_without_repo_falls_back_to_mtime() {
        let dir = tempdir().unwrap();
        let ctx = Context::new(dir.path().to_path_buf(), dir.path().join(".kiln/run"), HashMap::new());
        std::fs::write(dir.path().join("a.txt"), "fresh").unwrap();
        let result = file_changed(&["a.txt".to_string()], &ctx);
        assert!(result.is_ok());
    }
}
