//! C12 — background retry scheduler: periodically sweeps the deferred
//! queue (C11) for ready items and re-submits them (§4.5).
//!
//! Grounded on the teacher's `app/progress_manager.rs` spawn/stop-flag
//! pattern (`Arc<AtomicBool>` + `tokio::spawn` + `JoinHandle`), and on the
//! original Python `main/background_scheduler.py`'s sleep-in-small-chunks
//! loop so a stop request is noticed promptly even with a long
//! `check_interval`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::deferred::DeferredItem;
use crate::state::StateStore;

/// Upper bound on a single sleep chunk, so `stop()`/`pause()` are noticed
/// within this many seconds even when `check_interval` is much longer.
const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(10);

/// One sweep's outcome, handed to the caller-supplied callback so the
/// pipeline (C14) decides how to actually retry each item; this module
/// only owns the timing loop and the ready-set query.
pub type RetryCallback = Arc<dyn Fn(DeferredItem) + Send + Sync>;

pub struct RetrySchedulerHandle {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl RetrySchedulerHandle {
    /// Idempotent: calling `stop` more than once, or on an already-finished
    /// task, is a no-op.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.task.await;
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Spawns the background sweep loop. Returns immediately; does not sweep
/// until the first `check_interval` has elapsed.
pub fn spawn(
    store: Arc<StateStore>,
    check_interval: Duration,
    on_ready: RetryCallback,
) -> RetrySchedulerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let paused = Arc::new(AtomicBool::new(false));
    let stop_signal = Arc::clone(&stop);
    let paused_signal = Arc::clone(&paused);

    let task = tokio::spawn(async move {
        info!(interval_s = check_interval.as_secs_f64(), "retry scheduler started");
        while !stop_signal.load(Ordering::SeqCst) {
            if !sleep_in_chunks(check_interval, &stop_signal).await {
                break;
            }
            if paused_signal.load(Ordering::SeqCst) {
                debug!("retry scheduler paused, skipping sweep");
                continue;
            }
            let now = Utc::now();
            let ready: Vec<DeferredItem> = store
                .deferred_items()
                .into_iter()
                .filter(|item| !item.is_terminal())
                .filter(|item| item.reset_time.map(|reset| now >= reset).unwrap_or(true))
                .collect();
            debug!(ready = ready.len(), "retry scheduler sweep");
            for item in ready {
                on_ready(item);
            }
        }
        info!("retry scheduler stopped");
    });

    RetrySchedulerHandle { stop, paused, task }
}

/// Sleeps `total` in chunks of at most [`MAX_SLEEP_CHUNK`], returning
/// `false` as soon as a stop request arrives mid-sleep.
async fn sleep_in_chunks(total: Duration, stop: &Arc<AtomicBool>) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let chunk = remaining.min(MAX_SLEEP_CHUNK);
        tokio::time::sleep(chunk).await;
        remaining -= chunk;
    }
    !stop.load(Ordering::SeqCst)
}
