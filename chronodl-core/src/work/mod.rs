//! C8 — work manager: computes stable work ids, work-directory paths,
//! writes/updates the per-work record, and evaluates resume policy (§4.6).

mod identity;
mod naming;
mod record;
mod resume;

pub use identity::{compute_work_dir_name, compute_work_id, DEFAULT_TITLE_SLUG_MAX_LEN};
pub use naming::{provider_abbrev, provider_slug};
pub use record::{DownloadRecord, SelectedRecord, WorkError, WorkInput, WorkRecord, WorkStatus};
pub use resume::{check_resume, ResumeDecision};

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use crate::config::ResumeMode;

/// Computes the canonical output layout for a work (§6):
/// `<base>/<work_dir_name>/{work.json, objects/, metadata/}`.
pub struct WorkManager {
    base_output_dir: PathBuf,
    title_slug_max_len: usize,
}

impl WorkManager {
    pub fn new(base_output_dir: impl Into<PathBuf>, title_slug_max_len: usize) -> Self {
        WorkManager {
            base_output_dir: base_output_dir.into(),
            title_slug_max_len: if title_slug_max_len == 0 {
                DEFAULT_TITLE_SLUG_MAX_LEN
            } else {
                title_slug_max_len
            },
        }
    }

    pub fn work_id(&self, title: &str, creator: Option<&str>) -> String {
        compute_work_id(title, creator)
    }

    pub fn work_dir(&self, entry_id: Option<&str>, title: &str) -> PathBuf {
        let name = compute_work_dir_name(entry_id, title, self.title_slug_max_len);
        self.base_output_dir.join(name)
    }

    pub fn work_json_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join("work.json")
    }

    pub fn objects_dir(&self, work_dir: &Path) -> PathBuf {
        work_dir.join("objects")
    }

    pub fn metadata_dir(&self, work_dir: &Path) -> PathBuf {
        work_dir.join("metadata")
    }

    pub fn check_resume(&self, work_dir: &Path, mode: ResumeMode) -> ResumeDecision {
        check_resume(work_dir, mode)
    }

    /// Creates the work directory tree and writes the initial
    /// `status=pending` record (§4.4 phase 1 step 4).
    pub fn create_pending(&self, work_dir: &Path, input: WorkInput, selection_config_snapshot: Value) -> Result<WorkRecord, WorkError> {
        std::fs::create_dir_all(self.objects_dir(work_dir)).map_err(|source| WorkError::Io {
            path: work_dir.to_path_buf(),
            source,
        })?;
        std::fs::create_dir_all(self.metadata_dir(work_dir)).map_err(|source| WorkError::Io {
            path: work_dir.to_path_buf(),
            source,
        })?;
        let record = WorkRecord::new_pending(input, selection_config_snapshot, Utc::now());
        record.write(&self.work_json_path(work_dir))?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== WorkManager ====

    #[test]
    fn work_dir_matches_naming_rules() {
        let manager = WorkManager::new("/tmp/output", 80);
        let dir = manager.work_dir(Some("E0001"), "The Art of Cooking");
        assert_eq!(dir, PathBuf::from("/tmp/output/e_0001_the_art_of_cooking"));
    }

    #[test]
    fn create_pending_writes_work_json_and_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkManager::new(tmp.path(), 80);
        let work_dir = manager.work_dir(Some("E0001"), "The Art of Cooking");
        let record = manager
            .create_pending(
                &work_dir,
                WorkInput {
                    title: "The Art of Cooking".to_string(),
                    creator: None,
                    entry_id: Some("E0001".to_string()),
                },
                serde_json::json!({}),
            )
            .unwrap();
        assert_eq!(record.status, WorkStatus::Pending);
        assert!(manager.objects_dir(&work_dir).exists());
        assert!(manager.metadata_dir(&work_dir).exists());
        assert!(manager.work_json_path(&work_dir).exists());
    }
}
