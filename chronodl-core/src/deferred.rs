//! C11 — deferred-item queue (§4.5, §3 "Deferred item").
//!
//! Grounded on the original Python `main/state_manager.py`'s
//! `add_deferred_item`/`get_pending_deferred_items`/`mark_deferred_completed`,
//! rebuilt on top of [`crate::state::StateStore`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::state::{DeferredItem, DeferredStatus, StateError, StateStore};

/// Maximum age a terminal (`completed`/`failed`) deferred item is kept
/// before the retry scheduler (C12) prunes it (§4.5).
pub const DEFERRED_RETENTION: chrono::Duration = chrono::Duration::days(7);

pub struct DeferredQueue<'a> {
    store: &'a StateStore,
}

impl<'a> DeferredQueue<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        DeferredQueue { store }
    }

    /// Adds a work to the deferred queue. §3's uniqueness invariant ("at
    /// most one non-terminal deferred item per (entry_id, provider_key)
    /// pair") means a pre-existing non-terminal item for the same key is
    /// updated in place rather than duplicated: its `reset_time` is
    /// refreshed to the new value (§4.5) and the item is returned as-is
    /// otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        title: String,
        creator: Option<String>,
        entry_id: Option<String>,
        provider_key: String,
        provider_display: String,
        source_id: Option<String>,
        work_dir_path: String,
        base_output_dir: String,
        item_url: Option<String>,
        reset_time: Option<DateTime<Utc>>,
        error_message: Option<String>,
        raw_provider_payload: Value,
        now: DateTime<Utc>,
    ) -> Result<DeferredItem, StateError> {
        if let Some(mut existing) = self.store.find_deferred(entry_id.as_deref(), &provider_key) {
            if reset_time.is_some() && existing.reset_time != reset_time {
                existing.reset_time = reset_time;
                self.store.upsert_deferred(existing.clone())?;
            }
            return Ok(existing);
        }
        let item = DeferredItem {
            id: Uuid::new_v4(),
            title,
            creator,
            entry_id,
            provider_key,
            provider_display,
            source_id,
            work_dir_path,
            base_output_dir,
            item_url,
            deferred_at: now,
            reset_time,
            retry_count: 0,
            last_retry_at: None,
            status: DeferredStatus::Pending,
            error_message,
            raw_provider_payload,
        };
        self.store.upsert_deferred(item.clone())?;
        Ok(item)
    }

    /// Items whose `reset_time` has passed (or is unset) and are not yet
    /// terminal — candidates for a retry sweep (§4.5 "ready" set).
    pub fn get_ready(&self, now: DateTime<Utc>) -> Vec<DeferredItem> {
        self.store
            .deferred_items()
            .into_iter()
            .filter(|item| !item.is_terminal())
            .filter(|item| item.reset_time.map(|reset| now >= reset).unwrap_or(true))
            .collect()
    }

    pub fn all_pending(&self) -> Vec<DeferredItem> {
        self.store
            .deferred_items()
            .into_iter()
            .filter(|item| !item.is_terminal())
            .collect()
    }

    pub fn mark_retrying(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StateError> {
        self.update(id, |item| {
            item.status = DeferredStatus::Retrying;
            item.retry_count += 1;
            item.last_retry_at = Some(now);
        })
    }

    pub fn mark_completed(&self, id: Uuid) -> Result<(), StateError> {
        self.update(id, |item| {
            item.status = DeferredStatus::Completed;
        })
    }

    pub fn mark_failed(&self, id: Uuid, error_message: Option<String>) -> Result<(), StateError> {
        self.update(id, |item| {
            item.status = DeferredStatus::Failed;
            item.error_message = error_message;
        })
    }

    /// Re-defers an item after another failed retry attempt, recording the
    /// new `reset_time` without changing its identity.
    pub fn reschedule(&self, id: Uuid, reset_time: Option<DateTime<Utc>>) -> Result<(), StateError> {
        self.update(id, |item| {
            item.status = DeferredStatus::Pending;
            item.reset_time = reset_time;
        })
    }

    fn update(&self, id: Uuid, mutate: impl FnOnce(&mut DeferredItem)) -> Result<(), StateError> {
        let mut items = self.store.deferred_items();
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            mutate(item);
            self.store.upsert_deferred(item.clone())?;
        }
        Ok(())
    }

    /// Drops terminal items older than [`DEFERRED_RETENTION`] (§4.5).
    pub fn prune_stale(&self) -> Result<usize, StateError> {
        self.store.prune_terminal_older_than(DEFERRED_RETENTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_store(dir: &tempfile::TempDir) -> StateStore {
        StateStore::load(dir.path().join("state.json"), &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    fn add(queue: &DeferredQueue, entry_id: &str, provider_key: &str, reset_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DeferredItem {
        queue
            .add(
                "The Art of Cooking".to_string(),
                None,
                Some(entry_id.to_string()),
                provider_key.to_string(),
                provider_key.to_string(),
                None,
                "/tmp/out/work".to_string(),
                "/tmp/out".to_string(),
                None,
                reset_time,
                None,
                json!({}),
                now,
            )
            .unwrap()
    }

    // ==== uniqueness ====

    #[test]
    fn add_is_idempotent_for_the_same_entry_and_provider() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        let first = add(&queue, "E0001", "annas_archive", None, now);
        let second = add(&queue, "E0001", "annas_archive", None, now);
        assert_eq!(first.id, second.id);
        assert_eq!(queue.all_pending().len(), 1);
    }

    #[test]
    fn add_on_duplicate_key_updates_reset_time_without_adding_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        let first = add(&queue, "E0001", "annas_archive", None, now);
        let new_reset = now + chrono::Duration::hours(24);
        let second = add(&queue, "E0001", "annas_archive", Some(new_reset), now);

        assert_eq!(first.id, second.id);
        assert_eq!(second.reset_time, Some(new_reset));
        assert_eq!(queue.all_pending().len(), 1);

        let stored = store.deferred_items().into_iter().find(|i| i.id == first.id).unwrap();
        assert_eq!(stored.reset_time, Some(new_reset));
    }

    #[test]
    fn add_allows_same_entry_across_different_providers() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        add(&queue, "E0001", "annas_archive", None, now);
        add(&queue, "E0001", "internet_archive", None, now);
        assert_eq!(queue.all_pending().len(), 2);
    }

    // ==== readiness ====

    #[test]
    fn get_ready_excludes_items_with_future_reset_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        add(&queue, "E0001", "annas_archive", Some(now + chrono::Duration::hours(1)), now);
        add(&queue, "E0002", "annas_archive", Some(now - chrono::Duration::hours(1)), now);

        let ready = queue.get_ready(now);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].entry_id.as_deref(), Some("E0002"));
    }

    // ==== status transitions ====

    #[test]
    fn mark_completed_removes_item_from_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        let item = add(&queue, "E0001", "annas_archive", None, now);
        queue.mark_completed(item.id).unwrap();
        assert!(queue.all_pending().is_empty());
    }

    #[test]
    fn mark_retrying_increments_retry_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        let item = add(&queue, "E0001", "annas_archive", None, now);
        queue.mark_retrying(item.id, now).unwrap();
        queue.mark_retrying(item.id, now).unwrap();

        let updated = store.deferred_items().into_iter().find(|i| i.id == item.id).unwrap();
        assert_eq!(updated.retry_count, 2);
    }

    #[test]
    fn reschedule_returns_item_to_pending_with_new_reset_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        let item = add(&queue, "E0001", "annas_archive", None, now);
        queue.mark_retrying(item.id, now).unwrap();
        let new_reset = now + chrono::Duration::hours(6);
        queue.reschedule(item.id, Some(new_reset)).unwrap();

        let updated = store.deferred_items().into_iter().find(|i| i.id == item.id).unwrap();
        assert_eq!(updated.status, DeferredStatus::Pending);
        assert_eq!(updated.reset_time, Some(new_reset));
    }

    // ==== pruning ====

    #[test]
    fn prune_stale_removes_old_terminal_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let queue = DeferredQueue::new(&store);
        let now = Utc::now();

        let item = add(&queue, "E0001", "annas_archive", None, now - chrono::Duration::days(10));
        queue.mark_failed(item.id, Some("exhausted retries".to_string())).unwrap();

        let pruned = queue.prune_stale().unwrap();
        assert_eq!(pruned, 1);
    }
}
