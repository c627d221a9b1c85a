//! Cooperative stop signal and per-executor subprocess registry (spec §4.4,
//! §5). A [`StopHandle`] is cloned into every [`crate::model::Context`]; all
//! clones share one registry, so stopping through any of them reaches every
//! subprocess spawned through that context's lineage — the snapshot clones
//! `executor::imperative::execute_parallel` makes per level included.
//!
//! The kill mechanism itself mirrors the teacher's `dag/executor.rs`
//! fail-fast path (`for (_, handle) in active_tasks.drain() { handle.abort();
//! }`), generalized from aborting in-process `JoinHandle`s to killing the OS
//! subprocesses the executor spawns, since a stage's real work happens in a
//! child process rather than the task polling it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct StopHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    stopped: AtomicBool,
    next_id: AtomicU64,
    children: Mutex<HashMap<u64, Arc<Mutex<Child>>>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                children: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checked by the run loops between stages/groups, and by
    /// [`crate::subprocess::run_command`] before it spawns anything new.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// **Stop().** Flips the flag and kills every subprocess registered so
    /// far. Idempotent; a second call just finds nothing left to kill.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let children = self.inner.children.lock().await;
        for child in children.values() {
            let _ = child.lock().await.start_kill();
        }
    }

    pub(crate) async fn register(&self, child: Arc<Mutex<Child>>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.children.lock().await.insert(id, child);
        id
    }

    pub(crate) async fn unregister(&self, id: u64) {
        self.inner.children.lock().await.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_flips_the_flag() {
        let handle = StopHandle::new();
        assert!(!handle.is_stopped());
        handle.stop().await;
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn clones_share_the_same_flag() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        clone.stop().await;
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn stop_kills_a_registered_child() {
        let handle = StopHandle::new();
        let child = tokio::process::Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep");
        let child = Arc::new(Mutex::new(child));
        let id = handle.register(child.clone()).await;
        handle.stop().await;
        let status = child.lock().await.wait().await.unwrap();
        assert!(!status.success());
        handle.unregister(id).await;
    }
}
