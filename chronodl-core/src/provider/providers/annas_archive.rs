//! Anna's Archive adapter (`annas_archive`). No API key, but the public
//! site enforces a soft daily download limit per IP — this is the provider
//! this spec's quota-deferral scenario (S2) targets. Besides the
//! self-imposed quota gate the pipeline checks before calling `download`
//! (C10), the adapter also recognises the provider's own "limit reached"
//! response as a second line of defence and raises `QuotaDeferred` itself.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::context::WorkContext;
use crate::net::{ContentKind, Expected, ResponseBody};
use crate::provider::providers::common::{download_object, object_file_name, write_metadata};
use crate::provider::{Downloaded, Provider, ProviderCtx, ProviderError, SearchResult};

#[allow(clippy::expect_used)]
static MD5_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"/md5/([0-9a-f]{32})"#).expect("annas-archive md5 regex is valid"));

pub struct AnnasArchive;

impl AnnasArchive {
    pub fn new() -> Self {
        AnnasArchive
    }
}

impl Default for AnnasArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AnnasArchive {
    fn key(&self) -> &'static str {
        "annas_archive"
    }

    fn display_name(&self) -> &'static str {
        "Anna's Archive"
    }

    async fn search(
        &self,
        title: &str,
        _creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let url = format!(
            "https://annas-archive.org/search?q={}",
            url::form_urlencoded::byte_serialize(title.as_bytes()).collect::<String>()
        );
        let body = ctx
            .requester
            .request(&url, Some(self.key()), &ctx.settings.network, Expected::Text)
            .await?;
        let html = match body {
            ResponseBody::Text(t) => t,
            _ => return Ok(Vec::new()),
        };

        let mut seen = std::collections::HashSet::new();
        let mut results = Vec::new();
        for capture in MD5_RE.captures_iter(&html) {
            let Some(md5_match) = capture.get(1) else {
                continue;
            };
            let md5 = md5_match.as_str().to_string();
            if !seen.insert(md5.clone()) {
                continue;
            }
            if results.len() >= max_results as usize {
                break;
            }
            results.push(SearchResult {
                provider_display: self.display_name().to_string(),
                provider_key: self.key().to_string(),
                title: title.to_string(),
                creators: Vec::new(),
                date_text: None,
                source_id: Some(md5.clone()),
                manifest_url: None,
                item_url: Some(format!("https://annas-archive.org/md5/{md5}")),
                thumbnail_url: None,
                raw: serde_json::json!({"md5": md5}),
                scores: None,
            });
        }
        Ok(results)
    }

    async fn download(
        &self,
        result: &SearchResult,
        output_folder: &Path,
        work_ctx: &WorkContext,
        ctx: &ProviderCtx,
    ) -> Result<Downloaded, ProviderError> {
        let Some(md5) = &result.source_id else {
            return Err(ProviderError::download_failed(self.key(), "missing md5 identifier"));
        };
        let download_url = format!("https://annas-archive.org/fast_download/{md5}/0/0");

        let probe = ctx
            .requester
            .request(&download_url, Some(self.key()), &ctx.settings.network, Expected::Text)
            .await?;
        if let ResponseBody::Text(text) = &probe {
            if text.to_lowercase().contains("daily download limit") {
                return Err(ProviderError::quota_deferred(
                    self.key(),
                    Some(Utc::now() + chrono::Duration::hours(24)),
                ));
            }
        }

        let dest_name = object_file_name(work_ctx, "pdf");
        let mut downloaded = download_object(
            &ctx.requester,
            self.key(),
            &download_url,
            &ctx.settings.network,
            output_folder,
            &dest_name,
            ContentKind::Pdf,
        )
        .await?;
        let meta_name = format!("{}_metadata.json", work_ctx.work_stem);
        downloaded.merge(write_metadata(output_folder, &meta_name, &result.raw).await?);
        Ok(downloaded)
    }
}
