//! Owned background task scope.
//!
//! Detached notifications, write verification, refresh pulses, and feed
//! pollers all run here so they can be drained in tests and cancelled when
//! the owning service shuts down or is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cloneable handle to a set of tracked background tasks.
#[derive(Debug, Clone)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

#[derive(Debug)]
struct ScopeInner {
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<TrackedTask>>,
}

#[derive(Debug)]
struct TrackedTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Receiver side of a scope's shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the scope is shut down or dropped.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScope {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner {
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.shutdown_tx.subscribe(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Spawns `task`; it is dropped mid-flight when the scope shuts down.
    ///
    /// Returns false without spawning once the scope has been shut down.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            tracing::debug!(task = name, "task scope closed; dropping task");
            return false;
        }

        let mut signal = self.signal();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task => {}
                _ = signal.cancelled() => {
                    tracing::debug!(task = name, "scoped task cancelled");
                }
            }
        });

        let mut tasks = self.lock_tasks();
        tasks.retain(|tracked| !tracked.handle.is_finished());
        tasks.push(TrackedTask { name, handle });
        true
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.lock_tasks()
            .iter()
            .filter(|tracked| !tracked.handle.is_finished())
            .count()
    }

    /// Waits for every tracked task, including ones spawned while draining.
    ///
    /// Never returns while a poller is running; use `shutdown` for those.
    pub async fn drain(&self) {
        loop {
            let pending = std::mem::take(&mut *self.lock_tasks());
            if pending.is_empty() {
                return;
            }
            join_all(pending).await;
        }
    }

    /// Signals cancellation and joins every tracked task.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let pending = std::mem::take(&mut *self.lock_tasks());
        tracing::debug!(tasks = pending.len(), "shutting down task scope");
        join_all(pending).await;
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<TrackedTask>> {
        lock_tasks(&self.inner.tasks)
    }
}

fn lock_tasks(tasks: &Mutex<Vec<TrackedTask>>) -> MutexGuard<'_, Vec<TrackedTask>> {
    tasks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn join_all(tasks: Vec<TrackedTask>) {
    for tracked in tasks {
        if let Err(error) = tracked.handle.await {
            if error.is_panic() {
                tracing::warn!(task = tracked.name, "scoped task panicked");
            }
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for tracked in lock_tasks(&self.tasks).drain(..) {
            tracked.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskScope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_for_spawned_tasks() {
        let scope = TaskScope::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            scope.spawn("increment", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scope.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(scope.active_tasks(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_long_running_tasks() {
        let scope = TaskScope::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&finished);
        scope.spawn("sleeper", async move {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            observed.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(5), scope.shutdown())
            .await
            .expect("shutdown completes promptly");
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(scope.is_shutdown());
        assert!(!scope.spawn("late", async {}));
    }

    #[tokio::test]
    async fn dropping_last_handle_cancels_signal() {
        let scope = TaskScope::new();
        let mut signal = scope.signal();
        drop(scope);
        tokio::time::timeout(Duration::from_secs(5), signal.cancelled())
            .await
            .expect("signal resolves after drop");
    }
}
