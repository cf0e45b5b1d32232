//! C6 — provider registry: maps a provider key to a uniform
//! `{search, download, display name}` triple across heterogeneous wire
//! protocols (§4.1, §9 "Dynamic provider-function dispatch by string key is
//! mapped to a registry of `Provider` trait/interface implementations").
//!
//! Grounded on the teacher's `resolver/mod.rs`: an `async_trait` object-safe
//! trait, a registry built once at startup that logs and skips adapters it
//! cannot construct (missing API key) rather than failing the whole run.

mod error;
pub mod providers;
mod registry;

pub use error::ProviderError;
pub use registry::{build_default_registry, ProviderRegistry};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ProviderSettings;
use crate::context::WorkContext;
use crate::net::HttpRequester;

/// A scored candidate result, attached during selection under a reserved
/// key on `raw` so scores survive serialisation into `work.json` (§4.3).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Scores {
    pub title_score: f64,
    pub creator_score: f64,
    pub combined: f64,
    pub boosts: f64,
    pub total: f64,
}

/// Key under which `Scores` is embedded into a result's `raw` payload.
pub const SCORES_KEY: &str = "_chronodl_scores";

/// Provider-neutral search result (§3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchResult {
    pub provider_display: String,
    pub provider_key: String,
    pub title: String,
    #[serde(default)]
    pub creators: Vec<String>,
    pub date_text: Option<String>,
    pub source_id: Option<String>,
    pub manifest_url: Option<String>,
    pub item_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Arbitrary provider payload, preserved verbatim for audit and reused
    /// to rebuild the result when retrying a deferred download (§9).
    pub raw: Value,
    pub scores: Option<Scores>,
}

impl SearchResult {
    /// A result is downloadable only if it carries one of `source_id` or
    /// `manifest_url` (§4.1: "Each returned result must populate at minimum
    /// `title` and `source_id` (or `manifest_url`)").
    pub fn is_downloadable(&self) -> bool {
        self.source_id.is_some() || self.manifest_url.is_some()
    }

    pub fn attach_scores(&mut self, scores: Scores) {
        self.scores = Some(scores);
        if let Value::Object(map) = &mut self.raw {
            map.insert(SCORES_KEY.to_string(), serde_json::json!({
                "title_score": scores.title_score,
                "creator_score": scores.creator_score,
                "combined": scores.combined,
                "boosts": scores.boosts,
                "total": scores.total,
            }));
        }
    }
}

/// Outcome of a successful download (§4.1: "Must download at least one
/// content file ... on success").
#[derive(Debug, Clone, Default)]
pub struct Downloaded {
    pub files_written: u32,
    pub bytes_images: u64,
    pub bytes_pdfs: u64,
    pub bytes_metadata: u64,
}

impl Downloaded {
    pub fn merge(&mut self, other: Downloaded) {
        self.files_written += other.files_written;
        self.bytes_images += other.bytes_images;
        self.bytes_pdfs += other.bytes_pdfs;
        self.bytes_metadata += other.bytes_metadata;
    }
}

/// Ambient collaborators every provider call needs: the shared requester
/// and this provider's resolved settings. Built once per call by the
/// pipeline/scheduler, not stored on the adapter itself.
pub struct ProviderCtx {
    pub requester: Arc<HttpRequester>,
    pub settings: ProviderSettings,
    pub api_key: Option<String>,
    /// Mirrors `download.download_manifest_renderings` / `prefer_pdf_over_images`
    /// (§6) so adapters don't need their own copy of the global download config.
    pub allow_manifest_renderings: bool,
    pub prefer_pdf_over_images: bool,
}

/// The uniform provider contract (§4.1). Implementations are thin
/// translators between this contract and one wire protocol.
#[async_trait]
pub trait Provider: Send + Sync {
    fn key(&self) -> &'static str;
    fn display_name(&self) -> &'static str;

    /// Required API key environment variable, if any (§6). Returning
    /// `Some` without that variable set causes the registry to omit this
    /// provider from the run.
    fn required_env_var(&self) -> Option<&'static str> {
        None
    }

    async fn search(
        &self,
        title: &str,
        creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError>;

    async fn download(
        &self,
        result: &SearchResult,
        output_folder: &Path,
        work_ctx: &WorkContext,
        ctx: &ProviderCtx,
    ) -> Result<Downloaded, ProviderError>;
}
