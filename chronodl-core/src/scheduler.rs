//! C13 — scheduler: a fixed-size worker pool with an additional
//! per-provider semaphore, so the global `max_parallel_downloads` cap and
//! each provider's own concurrency limit (§5's locking discipline table)
//! are both enforced on every submitted task.
//!
//! Grounded on the teacher's `download/engine.rs` (`Semaphore`-gated
//! `tokio::spawn` loop, `JoinHandle` collection, best-effort awaiting of
//! task panics) generalised with a second, per-provider semaphore layer,
//! a cooperative-cancellation flag, and the `{pending, completed,
//! succeeded, failed}` statistics §4.4 asks the scheduler to expose.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Point-in-time view of the scheduler's task counters (§4.4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Accepted tasks that have not yet finished running.
    pub pending: usize,
    /// Tasks that ran to completion, whether they succeeded or failed.
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Scheduler {
    global: Arc<Semaphore>,
    provider_semaphores: DashMap<String, Arc<Semaphore>>,
    provider_concurrency: HashMap<String, usize>,
    default_provider_concurrency: usize,
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    succeeded: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(max_parallel: usize, provider_concurrency: HashMap<String, usize>, default_provider_concurrency: usize) -> Self {
        Scheduler {
            global: Arc::new(Semaphore::new(max_parallel.max(1))),
            provider_semaphores: DashMap::new(),
            provider_concurrency,
            default_provider_concurrency: default_provider_concurrency.max(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
            pending: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            succeeded: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn provider_semaphore(&self, provider_key: &str) -> Arc<Semaphore> {
        if let Some(existing) = self.provider_semaphores.get(provider_key) {
            return Arc::clone(existing.value());
        }
        let capacity = self
            .provider_concurrency
            .get(provider_key)
            .copied()
            .unwrap_or(self.default_provider_concurrency);
        let created = Arc::new(Semaphore::new(capacity.max(1)));
        self.provider_semaphores.insert(provider_key.to_string(), Arc::clone(&created));
        created
    }

    /// Submits a task gated by both the global and the provider's own
    /// semaphore. Rejected outright (never spawned, `pending` untouched)
    /// if shutdown was already requested; a task accepted just before
    /// shutdown but not yet started skips running its body once it would
    /// otherwise acquire its permits. Returns whether the task was
    /// accepted.
    pub fn submit<F>(&self, provider_key: &str, task: F) -> bool
    where
        F: Future<Output = bool> + Send + 'static,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            debug!(provider = %provider_key, "shutdown requested, rejecting submission");
            return false;
        }

        let global = Arc::clone(&self.global);
        let provider = self.provider_semaphore(provider_key);
        let shutdown = Arc::clone(&self.shutdown);
        let pending = Arc::clone(&self.pending);
        let completed = Arc::clone(&self.completed);
        let succeeded = Arc::clone(&self.succeeded);
        let failed = Arc::clone(&self.failed);
        let provider_key = provider_key.to_string();

        pending.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let outcome = if shutdown.load(Ordering::SeqCst) {
                debug!(provider = %provider_key, "shutdown requested, skipping task before acquiring permits");
                None
            } else {
                let global_permit = global.acquire_owned().await.ok();
                let provider_permit = provider.acquire_owned().await.ok();
                if global_permit.is_none() || provider_permit.is_none() || shutdown.load(Ordering::SeqCst) {
                    debug!(provider = %provider_key, "shutdown requested, skipping task after acquiring permits");
                    None
                } else {
                    Some(task.await)
                }
            };

            pending.fetch_sub(1, Ordering::SeqCst);
            if let Some(task_succeeded) = outcome {
                completed.fetch_add(1, Ordering::SeqCst);
                if task_succeeded {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                } else {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        self.handles.lock().unwrap_or_else(|poison| poison.into_inner()).push(handle);
        true
    }

    /// Cooperative shutdown: in-flight tasks run to completion, but any
    /// task that has not yet acquired its permits exits without running.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Awaits every submitted task, tolerating panics (logged, not
    /// propagated) the way the teacher's `process_queue` does. With
    /// `timeout` set, stops waiting once it elapses and returns `false`;
    /// tasks still in flight at that point keep running detached. `None`
    /// waits until every task finishes.
    pub async fn wait_all(&self, timeout: Option<Duration>) -> bool {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|poison| poison.into_inner()));
        let join_all = async {
            for handle in handles {
                if let Err(error) = handle.await {
                    warn!(%error, "scheduled task panicked");
                }
            }
        };
        match timeout {
            Some(duration) => tokio::time::timeout(duration, join_all).await.is_ok(),
            None => {
                join_all.await;
                true
            }
        }
    }

    /// Requests shutdown and, if `wait` is true, waits for in-flight tasks
    /// to finish (bounded by `timeout`). Returns `true` if not waiting, or
    /// if waiting and every task finished before the timeout.
    pub async fn shutdown(&self, wait: bool, timeout: Option<Duration>) -> bool {
        self.request_shutdown();
        if wait {
            self.wait_all(timeout).await
        } else {
            true
        }
    }

    /// Current {pending, completed, succeeded, failed} counters (§4.4).
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pending: self.pending.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}
