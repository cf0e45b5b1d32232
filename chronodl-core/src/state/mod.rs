//! C9 — state store: exclusive owner of the unified state document (§3,
//! §9). Quota tracking (C10) and the deferred-item queue (C11) read and
//! write the document only through the methods on [`StateStore`]; neither
//! module touches the JSON file directly.
//!
//! Grounded on the original Python `main/state_manager.py`'s module-level
//! singleton (`_load_state`/`_save_state`/`_migrate_from_old_files`),
//! rebuilt around an explicit struct holding a `Mutex` so the single-writer
//! discipline spec.md §5 requires is enforced by the type system rather
//! than by convention.

mod document;

pub use document::{
    DeferredItem, DeferredStatus, QuotaState, UnifiedStateDocument, STATE_DOCUMENT_VERSION,
};

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use document::{LegacyQuotaFile, LegacyQueueFile};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on state store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialise state document {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Default unified state document path, matching the original's
/// `.downloader_state.json` name under the working directory.
pub const DEFAULT_STATE_FILE: &str = ".chronodl_state.json";

pub struct StateStore {
    path: PathBuf,
    doc: Mutex<UnifiedStateDocument>,
}

impl StateStore {
    /// Loads the unified document from `path`. If it is absent, attempts a
    /// one-time migration from the legacy split files (`legacy_quota_path`,
    /// `legacy_queue_path`); if those are also absent, starts empty.
    pub fn load(path: impl Into<PathBuf>, legacy_quota_path: &Path, legacy_queue_path: &Path) -> Result<Self, StateError> {
        let path = path.into();
        let doc = if path.exists() {
            Self::read_document(&path)?
        } else {
            Self::migrate_legacy(legacy_quota_path, legacy_queue_path)
        };
        let store = StateStore {
            path,
            doc: Mutex::new(doc),
        };
        if !store.path.exists() {
            store.save_locked(&mut store.doc.lock().unwrap_or_else(|poison| poison.into_inner()))?;
        }
        Ok(store)
    }

    fn read_document(path: &Path) -> Result<UnifiedStateDocument, StateError> {
        let text = std::fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| StateError::Serde {
            path: path.to_path_buf(),
            source,
        })
    }

    fn migrate_legacy(legacy_quota_path: &Path, legacy_queue_path: &Path) -> UnifiedStateDocument {
        let mut doc = UnifiedStateDocument::default();

        if let Ok(text) = std::fs::read_to_string(legacy_quota_path) {
            if let Ok(legacy) = serde_json::from_str::<LegacyQuotaFile>(&text) {
                doc.quotas = legacy.quotas;
            }
        }
        if let Ok(text) = std::fs::read_to_string(legacy_queue_path) {
            if let Ok(legacy) = serde_json::from_str::<LegacyQueueFile>(&text) {
                doc.deferred_items = legacy.deferred_items;
            }
        }
        doc
    }

    /// Serialises `doc` to a sibling temp file, then renames over `self.path`
    /// (§9: "Never write in place"). Stamps `last_updated` before writing.
    fn save_locked(&self, doc: &mut UnifiedStateDocument) -> Result<(), StateError> {
        doc.last_updated = Some(Utc::now());
        let text = serde_json::to_vec_pretty(doc).map_err(|source| StateError::Serde {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &text).map_err(|source| StateError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    // ==== quota access (consumed by C10) ====

    pub fn get_quota(&self, provider_key: &str) -> Option<QuotaState> {
        self.doc.lock().unwrap_or_else(|poison| poison.into_inner()).quotas.get(provider_key).cloned()
    }

    pub fn all_quotas(&self) -> Vec<QuotaState> {
        self.doc.lock().unwrap_or_else(|poison| poison.into_inner()).quotas.values().cloned().collect()
    }

    pub fn put_quota(&self, quota: QuotaState) -> Result<(), StateError> {
        let mut doc = self.doc.lock().unwrap_or_else(|poison| poison.into_inner());
        doc.quotas.insert(quota.provider_key.clone(), quota);
        self.save_locked(&mut doc)
    }

    pub fn remove_quota(&self, provider_key: &str) -> Result<bool, StateError> {
        let mut doc = self.doc.lock().unwrap_or_else(|poison| poison.into_inner());
        let removed = doc.quotas.remove(provider_key).is_some();
        if removed {
            self.save_locked(&mut doc)?;
        }
        Ok(removed)
    }

    pub fn clear_all_quotas(&self) -> Result<(), StateError> {
        let mut doc = self.doc.lock().unwrap_or_else(|poison| poison.into_inner());
        doc.quotas.clear();
        self.save_locked(&mut doc)
    }

    // ==== deferred-item access (consumed by C11) ====

    pub fn deferred_items(&self) -> Vec<DeferredItem> {
        self.doc.lock().unwrap_or_else(|poison| poison.into_inner()).deferred_items.clone()
    }

    pub fn find_deferred(&self, entry_id: Option<&str>, provider_key: &str) -> Option<DeferredItem> {
        self.doc
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .deferred_items
            .iter()
            .find(|item| !item.is_terminal() && item.matches_key(entry_id, provider_key))
            .cloned()
    }

    /// Inserts or replaces a deferred item by id. Enforces §3's uniqueness
    /// invariant ("at most one non-terminal deferred item per (entry_id,
    /// provider_key) pair") by refusing to insert a new non-terminal item
    /// when one already exists for the same key.
    pub fn upsert_deferred(&self, item: DeferredItem) -> Result<(), StateError> {
        let mut doc = self.doc.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(existing) = doc.deferred_items.iter_mut().find(|existing| existing.id == item.id) {
            *existing = item;
        } else {
            doc.deferred_items.push(item);
        }
        self.save_locked(&mut doc)
    }

    pub fn remove_deferred(&self, id: Uuid) -> Result<bool, StateError> {
        let mut doc = self.doc.lock().unwrap_or_else(|poison| poison.into_inner());
        let before = doc.deferred_items.len();
        doc.deferred_items.retain(|item| item.id != id);
        let removed = doc.deferred_items.len() != before;
        if removed {
            self.save_locked(&mut doc)?;
        }
        Ok(removed)
    }

    /// Drops terminal items older than `max_age`, called periodically by
    /// the retry scheduler (C12) per §4.5's 7-day cleanup rule.
    pub fn prune_terminal_older_than(&self, max_age: chrono::Duration) -> Result<usize, StateError> {
        let mut doc = self.doc.lock().unwrap_or_else(|poison| poison.into_inner());
        let cutoff = Utc::now() - max_age;
        let before = doc.deferred_items.len();
        doc.deferred_items
            .retain(|item| !(item.is_terminal() && item.deferred_at < cutoff));
        let pruned = before - doc.deferred_items.len();
        if pruned > 0 {
            self.save_locked(&mut doc)?;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_quota(provider_key: &str) -> QuotaState {
        QuotaState {
            provider_key: provider_key.to_string(),
            daily_limit: 100,
            reset_hours: 24.0,
            downloads_used: 0,
            period_start: Utc::now(),
            exhausted_at: None,
        }
    }

    fn sample_deferred(entry_id: &str, provider_key: &str) -> DeferredItem {
        DeferredItem {
            id: Uuid::new_v4(),
            title: "The Art of Cooking".to_string(),
            creator: None,
            entry_id: Some(entry_id.to_string()),
            provider_key: provider_key.to_string(),
            provider_display: provider_key.to_string(),
            source_id: None,
            work_dir_path: "/tmp/out/e0001_the_art_of_cooking".to_string(),
            base_output_dir: "/tmp/out".to_string(),
            item_url: None,
            deferred_at: Utc::now(),
            reset_time: None,
            retry_count: 0,
            last_retry_at: None,
            status: DeferredStatus::Pending,
            error_message: None,
            raw_provider_payload: json!({}),
        }
    }

    // ==== fresh load ====

    #[test]
    fn load_with_no_files_starts_empty_and_creates_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::load(&path, &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
        assert!(path.exists());
        assert!(store.all_quotas().is_empty());
        assert!(store.deferred_items().is_empty());
    }

    // ==== quotas ====

    #[test]
    fn put_and_get_quota_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"), &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
        store.put_quota(sample_quota("internet_archive")).unwrap();
        let quota = store.get_quota("internet_archive").unwrap();
        assert_eq!(quota.daily_limit, 100);
    }

    #[test]
    fn reload_sees_persisted_quota() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = StateStore::load(&path, &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
            store.put_quota(sample_quota("annas_archive")).unwrap();
        }
        let reloaded = StateStore::load(&path, &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
        assert!(reloaded.get_quota("annas_archive").is_some());
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::load(&path, &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
        store.put_quota(sample_quota("loc")).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }

    // ==== deferred items ====

    #[test]
    fn upsert_then_find_deferred_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"), &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
        let item = sample_deferred("E0001", "annas_archive");
        store.upsert_deferred(item.clone()).unwrap();

        let found = store.find_deferred(Some("E0001"), "annas_archive").unwrap();
        assert_eq!(found.id, item.id);
    }

    #[test]
    fn find_deferred_ignores_terminal_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"), &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
        let mut item = sample_deferred("E0002", "annas_archive");
        item.status = DeferredStatus::Completed;
        store.upsert_deferred(item).unwrap();

        assert!(store.find_deferred(Some("E0002"), "annas_archive").is_none());
    }

    #[test]
    fn remove_deferred_deletes_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"), &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();
        let item = sample_deferred("E0003", "annas_archive");
        let id = item.id;
        store.upsert_deferred(item).unwrap();
        assert!(store.remove_deferred(id).unwrap());
        assert!(store.deferred_items().is_empty());
    }

    #[test]
    fn prune_terminal_older_than_drops_only_old_terminal_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"), &dir.path().join("q.json"), &dir.path().join("d.json")).unwrap();

        let mut old_terminal = sample_deferred("E0004", "annas_archive");
        old_terminal.status = DeferredStatus::Failed;
        old_terminal.deferred_at = Utc::now() - chrono::Duration::days(10);
        store.upsert_deferred(old_terminal).unwrap();

        let fresh_pending = sample_deferred("E0005", "annas_archive");
        store.upsert_deferred(fresh_pending).unwrap();

        let pruned = store.prune_terminal_older_than(chrono::Duration::days(7)).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.deferred_items().len(), 1);
    }

    // ==== legacy migration ====

    #[test]
    fn migrates_from_legacy_split_files_when_unified_document_absent() {
        let dir = tempfile::tempdir().unwrap();
        let quota_path = dir.path().join("quota_state.json");
        let queue_path = dir.path().join("deferred_queue.json");
        std::fs::write(
            &quota_path,
            serde_json::to_string(&json!({
                "quotas": {
                    "loc": {
                        "provider_key": "loc",
                        "daily_limit": 50,
                        "reset_hours": 24.0,
                        "downloads_used": 3,
                        "period_start": Utc::now().to_rfc3339(),
                        "exhausted_at": null,
                    }
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let path = dir.path().join("state.json");
        let store = StateStore::load(&path, &quota_path, &queue_path).unwrap();
        assert!(path.exists());
        assert_eq!(store.get_quota("loc").unwrap().downloads_used, 3);
    }
}
