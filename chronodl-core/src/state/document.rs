//! The unified state document's on-disk shape (§3, §6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const STATE_DOCUMENT_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaState {
    pub provider_key: String,
    pub daily_limit: u32,
    pub reset_hours: f64,
    pub downloads_used: u32,
    pub period_start: DateTime<Utc>,
    pub exhausted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredStatus {
    Pending,
    Retrying,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredItem {
    pub id: Uuid,
    pub title: String,
    pub creator: Option<String>,
    pub entry_id: Option<String>,
    pub provider_key: String,
    pub provider_display: String,
    pub source_id: Option<String>,
    pub work_dir_path: String,
    pub base_output_dir: String,
    pub item_url: Option<String>,
    pub deferred_at: DateTime<Utc>,
    pub reset_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub status: DeferredStatus,
    pub error_message: Option<String>,
    pub raw_provider_payload: Value,
}

impl DeferredItem {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DeferredStatus::Completed | DeferredStatus::Failed)
    }

    pub fn matches_key(&self, entry_id: Option<&str>, provider_key: &str) -> bool {
        self.entry_id.as_deref() == entry_id && self.provider_key == provider_key
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedStateDocument {
    pub version: String,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quotas: HashMap<String, QuotaState>,
    #[serde(default)]
    pub deferred_items: Vec<DeferredItem>,
}

impl Default for UnifiedStateDocument {
    fn default() -> Self {
        UnifiedStateDocument {
            version: STATE_DOCUMENT_VERSION.to_string(),
            last_updated: None,
            quotas: HashMap::new(),
            deferred_items: Vec::new(),
        }
    }
}

/// Legacy split quota file shape, read only during migration (§3: "On
/// load, if absent, legacy split files ... are read, merged").
#[derive(Debug, Deserialize)]
pub struct LegacyQuotaFile {
    #[serde(default)]
    pub quotas: HashMap<String, QuotaState>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyQueueFile {
    #[serde(default)]
    pub deferred_items: Vec<DeferredItem>,
}
