//! The `quota-status` subcommand (SPEC_FULL.md §E.3, §7 "Deferred downloads
//! are visible via a `--quota-status` CLI command summarising pending
//! counts and next reset times").
//!
//! Grounded on the original Python `main/quota_manager.py`'s
//! `get_quota_status`/`get_next_reset` dict shape, rendered as a plain
//! table the way the teacher's `output::print_completion_summary` reports
//! run statistics.

use chronodl_core::{DeferredQueue, QuotaTracker, StateStore};

/// Prints one line per tracked provider quota, plus a summary of pending
/// deferred items and the earliest upcoming reset.
pub fn print_quota_status(state: &StateStore) {
    let tracker = QuotaTracker::new(state);
    let mut quotas = tracker.snapshot();
    quotas.sort_by(|a, b| a.provider_key.cmp(&b.provider_key));

    if quotas.is_empty() {
        println!("No provider quotas recorded yet.");
    } else {
        println!("{:<20} {:>8} {:>8} {:>10}", "provider", "used", "limit", "exhausted");
        for quota in &quotas {
            println!(
                "{:<20} {:>8} {:>8} {:>10}",
                quota.provider_key,
                quota.downloads_used,
                quota.daily_limit,
                quota.exhausted_at.is_some(),
            );
        }
    }

    let deferred = DeferredQueue::new(state);
    let pending = deferred.all_pending();
    println!();
    println!("{} item(s) pending retry", pending.len());

    if let Some(next) = pending.iter().filter_map(|item| item.reset_time).min() {
        println!("next reset at {next}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_store(dir: &tempfile::TempDir) -> StateStore {
        StateStore::load(dir.path().join("state.json"), &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap()
    }

    #[test]
    fn prints_without_panicking_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        print_quota_status(&store);
    }

    #[test]
    fn prints_without_panicking_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let tracker = QuotaTracker::new(&store);
        let settings = chronodl_core::config::QuotaSettings {
            enabled: true,
            daily_limit: 10,
            reset_hours: 24.0,
        };
        tracker.record_download("internet_archive", &settings, chrono::Utc::now()).unwrap();
        print_quota_status(&store);
    }
}
