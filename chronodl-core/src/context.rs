//! C2 — context carrier: per-operation ambient values threaded explicitly
//! through the call chain, per the redesign note in spec.md §9 ("replace
//! [thread-local context] with an explicit immutable `WorkContext` struct
//! passed through the call chain"). The scheduler (C13) constructs one at
//! task entry and passes it by reference into the provider download call and
//! anything that names files or records bytes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ambient values for one work's execution: identity for logging/file
/// naming, plus a per-context file sequence counter used by providers that
/// write numbered page files (`page_0001.jpg`, `page_0002.jpg`, ...).
#[derive(Debug)]
pub struct WorkContext {
    pub work_id: String,
    pub entry_id: Option<String>,
    pub provider_key: String,
    pub work_stem: String,
    file_counter: AtomicU64,
}

impl WorkContext {
    pub fn new(
        work_id: impl Into<String>,
        entry_id: Option<String>,
        provider_key: impl Into<String>,
        work_stem: impl Into<String>,
    ) -> Self {
        WorkContext {
            work_id: work_id.into(),
            entry_id,
            provider_key: provider_key.into(),
            work_stem: work_stem.into(),
            file_counter: AtomicU64::new(0),
        }
    }

    /// Returns a context identical in identity but with the provider key
    /// swapped and the file counter reset — used when the scheduler retries
    /// a task against a fallback provider (§4.4 phase 2 step 4).
    pub fn with_provider(&self, provider_key: impl Into<String>) -> Self {
        WorkContext::new(
            self.work_id.clone(),
            self.entry_id.clone(),
            provider_key,
            self.work_stem.clone(),
        )
    }

    /// Returns the next sequence number for a numbered output file and
    /// advances the counter. Starts at 1.
    pub fn next_file_sequence(&self) -> u64 {
        self.file_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Resets the file counter to zero. Called by the scheduler on worker
    /// task entry (§4.4 step (b)) so sequence numbers never leak across
    /// works sharing the same worker thread.
    pub fn reset_file_counter(&self) {
        self.file_counter.store(0, Ordering::SeqCst);
    }
}
