//! Shared subprocess invocation contract (spec §4.4, §5): null stdin,
//! captured output buffers, soft-terminate on timeout. Used by both the
//! verifier (test/build/lint commands) and the executor (stage commands).

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::stop::StopHandle;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub stopped: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.stopped && self.exit_code == 0
    }
}

#[cfg(target_os = "windows")]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd.kill_on_drop(true);
    cmd
}

#[cfg(not(target_os = "windows"))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd.kill_on_drop(true);
    cmd
}

/// Runs `line` under the platform shell with stdin attached to the null
/// device. `timeout_ms == 0` means unbounded. A timeout soft-terminates the
/// child and annotates the buffer rather than returning an error — callers
/// decide how a timed-out result maps onto stage/verifier failure.
///
/// The child is registered with `stop` for the duration of the call, so an
/// external [`StopHandle::stop`] kills it immediately instead of waiting for
/// `run_command` to notice on its own. A request that arrives before the
/// child spawns is honored by refusing to spawn at all.
pub async fn run_command(line: &str, cwd: &Path, timeout_ms: u64, stop: &StopHandle) -> std::io::Result<CommandOutput> {
    use tokio::io::AsyncReadExt;

    if stop.is_stopped() {
        return Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "stop requested"));
    }

    let mut cmd = shell_command(line);
    cmd.current_dir(cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let start = Instant::now();
    let mut spawned = cmd.spawn()?;
    let mut stdout_pipe = spawned.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = spawned.stderr.take().expect("stderr was piped");
    let child = Arc::new(Mutex::new(spawned));
    let registry_id = stop.register(child.clone()).await;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let (status, timed_out) = if timeout_ms == 0 {
        (child.lock().await.wait().await?, false)
    } else {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            child.lock().await.wait().await
        })
        .await
        {
            Ok(status) => (status?, false),
            Err(_) => {
                let _ = child.lock().await.start_kill();
                (child.lock().await.wait().await?, true)
            }
        }
    };
    stop.unregister(registry_id).await;

    let stdout_buf = stdout_task.await.unwrap_or_default();
    let stderr_buf = stderr_task.await.unwrap_or_default();
    let mut stderr = String::from_utf8_lossy(&stderr_buf).to_string();
    let stopped = stop.is_stopped();
    if timed_out {
        stderr.push_str("\n[timeout] subprocess soft-terminated after exceeding timeout");
    } else if stopped {
        stderr.push_str("\n[stopped] subprocess terminated by a stop request");
    }

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
        stderr,
        timed_out,
        stopped,
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = run_command("echo hello", &PathBuf::from("."), 0, &StopHandle::new()).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("hello"));
        assert!(out.succeeded());
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_success() {
        let out = run_command("exit 3", &PathBuf::from("."), 0, &StopHandle::new()).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.succeeded());
    }

    #[tokio::test]
    async fn timeout_is_annotated() {
        let out = run_command("sleep 2", &PathBuf::from("."), 50, &StopHandle::new()).await.unwrap();
        assert!(out.timed_out);
        assert!(out.stderr.contains("timeout"));
    }

    #[tokio::test]
    async fn a_stop_requested_before_spawn_refuses_to_run() {
        let stop = StopHandle::new();
        stop.stop().await;
        let err = run_command("echo hello", &PathBuf::from("."), 0, &stop).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn a_stop_requested_mid_run_kills_the_child_and_is_annotated() {
        let stop = StopHandle::new();
        let stop_clone = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop_clone.stop().await;
        });
        let out = run_command("sleep 5", &PathBuf::from("."), 0, &stop).await.unwrap();
        assert!(out.stopped);
        assert!(!out.succeeded());
    }
}
