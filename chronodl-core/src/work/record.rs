//! Per-work record (§3: "Work record (on disk, one per work)") and its
//! status state machine (§4.6, §9 atomic-write rule).
//!
//! Grounded on the original Python `main/work_manager.py`'s
//! `create_work_json`/`update_work_status`, rewritten to the atomic
//! write-temp-then-rename discipline spec.md §9 mandates for every
//! persisted document (the Python original writes `work.json` in place;
//! spec.md is explicit here, so this supersedes that behaviour).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::provider::SearchResult;

#[derive(Debug, Error)]
pub enum WorkError {
    #[error("I/O error on work record {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialise work record {path}: {source}")]
    Serde {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid work status transition from {from:?} to {to:?}")]
    InvalidTransition { from: WorkStatus, to: WorkStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Completed,
    Partial,
    Failed,
    Deferred,
    NoMatch,
}

impl WorkStatus {
    /// §3: "transitions are strictly one-way except pending→{any} and
    /// deferred→{completed, failed}."
    pub fn can_transition_to(self, next: WorkStatus) -> bool {
        match self {
            WorkStatus::Pending => true,
            WorkStatus::Deferred => matches!(next, WorkStatus::Completed | WorkStatus::Failed),
            WorkStatus::Completed | WorkStatus::Partial | WorkStatus::Failed | WorkStatus::NoMatch => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkInput {
    pub title: String,
    pub creator: Option<String>,
    pub entry_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedRecord {
    pub provider_key: String,
    pub source_id: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub provider: String,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRecord {
    pub input: WorkInput,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: WorkStatus,
    pub selection_config_snapshot: Value,
    #[serde(default)]
    pub candidates: Vec<SearchResult>,
    pub selected: Option<SelectedRecord>,
    pub download: Option<DownloadRecord>,
}

impl WorkRecord {
    /// §4.4 phase 1 step 4: "write `work.json` with `status=pending`."
    pub fn new_pending(input: WorkInput, selection_config_snapshot: Value, created_at: DateTime<Utc>) -> Self {
        WorkRecord {
            input,
            created_at,
            updated_at: None,
            status: WorkStatus::Pending,
            selection_config_snapshot,
            candidates: Vec::new(),
            selected: None,
            download: None,
        }
    }

    /// Enforces the one-way transition rule, setting `updated_at` to `now`
    /// on success (§4.6: "rewrites `work.json` atomically, setting
    /// `updated_at`").
    pub fn transition(&mut self, new_status: WorkStatus, now: DateTime<Utc>) -> Result<(), WorkError> {
        if !self.status.can_transition_to(new_status) {
            return Err(WorkError::InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }
        self.status = new_status;
        self.updated_at = Some(now);
        Ok(())
    }

    pub fn set_candidates(&mut self, candidates: Vec<SearchResult>) {
        self.candidates = candidates;
    }

    pub fn set_selected(&mut self, selected: SelectedRecord) {
        self.selected = Some(selected);
    }

    pub fn set_download(&mut self, download: DownloadRecord) {
        self.download = Some(download);
    }

    /// Atomic write: serialise to a sibling temp file, then rename over the
    /// target (§9). Never writes in place.
    pub fn write(&self, path: &Path) -> Result<(), WorkError> {
        let text = serde_json::to_vec_pretty(self).map_err(|source| WorkError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WorkError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &text).map_err(|source| WorkError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| WorkError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<WorkRecord, WorkError> {
        let text = std::fs::read_to_string(path).map_err(|source| WorkError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| WorkError::Serde {
            path: path.to_path_buf(),
            source,
        })
    }
}
