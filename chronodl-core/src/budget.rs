//! C3 — budget accountant: global and per-work byte counters with enforced
//! ceilings and skip/stop policy (§3, §4.7, §5, §7, §8 property 5).
//!
//! Grounded on the teacher's `DownloadStats` (`download/engine.rs`): atomics
//! behind a single struct, with one mutex covering the per-content-class maps
//! (§5's locking discipline table: "Budget counters | C3 | Single mutex
//! covers all counter maps").

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::{ByteLimits, OnExceed};

/// The three content classes budgets are tracked against (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Images,
    Pdfs,
    Metadata,
}

#[derive(Debug, Default, Clone, Copy)]
struct ClassCounters {
    images: u64,
    pdfs: u64,
    metadata: u64,
}

impl ClassCounters {
    fn get(&self, class: ContentClass) -> u64 {
        match class {
            ContentClass::Images => self.images,
            ContentClass::Pdfs => self.pdfs,
            ContentClass::Metadata => self.metadata,
        }
    }

    fn add(&mut self, class: ContentClass, bytes: u64) {
        match class {
            ContentClass::Images => self.images += bytes,
            ContentClass::Pdfs => self.pdfs += bytes,
            ContentClass::Metadata => self.metadata += bytes,
        }
    }
}

fn gb_to_bytes(gb: f64) -> u64 {
    if gb <= 0.0 {
        u64::MAX
    } else {
        (gb * 1_073_741_824.0) as u64
    }
}

struct Inner {
    global: ClassCounters,
    per_work: HashMap<String, ClassCounters>,
}

/// Process-wide budget accountant. One instance is constructed at startup
/// and shared (via `Arc`) across the scheduler's workers.
pub struct BudgetAccountant {
    total_limits: ByteLimits,
    per_work_limits: ByteLimits,
    on_exceed: OnExceed,
    inner: Mutex<Inner>,
    exhausted: std::sync::atomic::AtomicBool,
}

impl BudgetAccountant {
    pub fn new(total_limits: ByteLimits, per_work_limits: ByteLimits, on_exceed: OnExceed) -> Self {
        BudgetAccountant {
            total_limits,
            per_work_limits,
            on_exceed,
            inner: Mutex::new(Inner {
                global: ClassCounters::default(),
                per_work: HashMap::new(),
            }),
            exhausted: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn limit_bytes(&self, class: ContentClass, limits: &ByteLimits) -> u64 {
        gb_to_bytes(match class {
            ContentClass::Images => limits.images_gb,
            ContentClass::Pdfs => limits.pdfs_gb,
            ContentClass::Metadata => limits.metadata_gb,
        })
    }

    /// Returns whether `bytes` more of `class` may be recorded for
    /// `work_id` without exceeding either the global or per-work ceiling.
    /// Does not mutate counters — callers check, then call `record`.
    pub fn allows(&self, work_id: &str, class: ContentClass, bytes: u64) -> bool {
        if self.exhausted.load(std::sync::atomic::Ordering::SeqCst) && self.on_exceed == OnExceed::Stop {
            return false;
        }
        let inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        let global_limit = self.limit_bytes(class, &self.total_limits);
        let work_limit = self.limit_bytes(class, &self.per_work_limits);
        let global_used = inner.global.get(class);
        let work_used = inner.per_work.get(work_id).map(|c| c.get(class)).unwrap_or(0);
        global_used + bytes <= global_limit && work_used + bytes <= work_limit
    }

    /// Records `bytes` of `class` against both the global and per-work
    /// counters. Sets the process-wide exhausted flag if either ceiling is
    /// now met or exceeded, honouring `on_exceed` per §7.
    pub fn record(&self, work_id: &str, class: ContentClass, bytes: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.global.add(class, bytes);
        inner
            .per_work
            .entry(work_id.to_string())
            .or_default()
            .add(class, bytes);

        let global_limit = self.limit_bytes(class, &self.total_limits);
        if inner.global.get(class) >= global_limit {
            self.exhausted.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// True once any content class has met or exceeded its global ceiling.
    /// Under `on_exceed=stop` the façade (C15) halts submission of further
    /// works; under `skip` the current work finishes and subsequent
    /// allocations simply return `false` from `allows`.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn on_exceed(&self) -> OnExceed {
        self.on_exceed
    }

    /// Sum of all per-work byte counters for `class`, for property-5
    /// assertions (sum of per-work counters equals the global counter).
    pub fn sum_per_work(&self, class: ContentClass) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.per_work.values().map(|c| c.get(class)).sum()
    }

    pub fn global(&self, class: ContentClass) -> u64 {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner()).global.get(class)
    }
}
