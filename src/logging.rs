//! Structured logging (spec §2.1, §6): one `tracing-subscriber` init at
//! process start, honoring `RUST_LOG`. Subprocess capture logs at `debug`,
//! stage transitions at `info`, verification failures at `warn`,
//! unrecoverable errors at `error` — call sites choose the level, this
//! module only wires up the subscriber.

use std::path::Path;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// **InitLogging().** stdout only; safe to call more than once per process
/// (tests spin up several runs) — later calls are no-ops rather than
/// panics.
pub fn init() {
    let _ = tracing_subscriber::fmt().with_env_filter(filter()).with_target(false).try_init();
}

/// **InitLoggingWithFileMirror(projectRoot).** Same as [`init`], plus a
/// non-blocking daily-rolling writer under `<projectRoot>/.kiln/logs` (spec
/// §4.4: subprocess capture is "optionally mirrored to a log file"). The
/// returned guard must be held for the process lifetime — dropping it
/// stops the background flush thread.
pub fn init_with_file_mirror(project_root: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = project_root.join(".kiln/logs");
    let appender = tracing_appender::rolling::daily(&log_dir, "kiln.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer().with_target(false).with_ansi(false).with_writer(writer);

    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }

    #[test]
    fn file_mirror_creates_the_log_directory() {
        let dir = tempdir().unwrap();
        let _guard = init_with_file_mirror(dir.path());
        tracing::info!("hello");
        assert!(dir.path().join(".kiln/logs").is_dir());
    }
}
