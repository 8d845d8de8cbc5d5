use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

struct TrackedTask {
    name: String,
    abort: AbortHandle,
    done: watch::Receiver<bool>,
}

type TaskTable = Arc<Mutex<HashMap<Uuid, TrackedTask>>>;

fn lock(table: &TaskTable) -> MutexGuard<'_, HashMap<Uuid, TrackedTask>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the task from the table and signals completion when the task
/// future is dropped, whether it finished, panicked or was aborted.
struct Deregister {
    id: Uuid,
    table: TaskTable,
    done: watch::Sender<bool>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.id);
        let _ = self.done.send(true);
    }
}

/// Registry of fire-and-forget hook tasks
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    table: TaskTable,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a tracked task and return its id
    pub fn spawn<F>(&self, name: impl Into<String>, task: F) -> Uuid
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (done_tx, done_rx) = watch::channel(false);
        let guard = Deregister {
            id,
            table: Arc::clone(&self.table),
            done: done_tx,
        };

        // The task waits for `start` so it cannot finish before it is tracked.
        // The table lock is never held across `tokio::spawn`: a runtime that is
        // shutting down drops the future inside `spawn`, running the guard.
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            if start_rx.await.is_ok() {
                task.await;
            }
        });

        {
            let mut table = lock(&self.table);
            let dropped = *done_rx.borrow();
            if dropped {
                debug!(task_id = %id, "Background hook dropped before it started");
            } else {
                table.insert(
                    id,
                    TrackedTask {
                        name: name.into(),
                        abort: handle.abort_handle(),
                        done: done_rx,
                    },
                );
            }
        }
        let _ = start_tx.send(());
        id
    }

    /// Wait until every task tracked right now has finished
    pub async fn wait_all(&self) {
        let pending: Vec<watch::Receiver<bool>> =
            lock(&self.table).values().map(|t| t.done.clone()).collect();
        debug!("Waiting for {} background hook(s)", pending.len());

        for mut done in pending {
            // A closed channel means the task is gone as well.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Abort every tracked task and clear the table; returns how many were aborted
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(Uuid, TrackedTask)> = lock(&self.table).drain().collect();
        for (id, task) in &drained {
            debug!(task_id = %id, hook = %task.name, "Cancelling background hook");
            task.abort.abort();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_finished_tasks_leave_the_table() {
        let tasks = BackgroundTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            tasks.spawn("count", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(tasks.len(), 5);

        tasks.wait_all().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_is_removed() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("boom", async {
            panic!("hook exploded");
        });

        tasks.wait_all().await;
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_spawn_on_stopped_runtime_returns() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let handle = rt.handle().clone();
        drop(rt);

        let tasks = BackgroundTasks::new();
        let worker = tasks.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _enter = handle.enter();
            worker.spawn("late", async {});
            let _ = tx.send(());
        });

        rx.recv_timeout(Duration::from_secs(3))
            .expect("spawn on a stopped runtime hung");
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_task_starts_after_it_is_tracked() {
        let tasks = BackgroundTasks::new();
        let seen = Arc::new(AtomicUsize::new(usize::MAX));

        let observer = tasks.clone();
        let recorded = Arc::clone(&seen);
        tasks.spawn("observe", async move {
            recorded.store(observer.len(), Ordering::SeqCst);
        });

        tasks.wait_all().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_clears_immediately() {
        let tasks = BackgroundTasks::new();
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let finished = Arc::clone(&finished);
            tasks.spawn("slow", async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(tasks.cancel_all(), 3);
        assert!(tasks.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        tasks.wait_all().await;
    }
}
