//! Library of Congress adapter (`loc`) — the provider scenario S4's
//! circuit-breaker test targets, since its JSON search API is a plain GET
//! with no authentication required.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::context::WorkContext;
use crate::net::{ContentKind, Expected, ResponseBody};
use crate::provider::providers::common::{creators_from, download_object, field_str, object_file_name, write_metadata};
use crate::provider::{Downloaded, Provider, ProviderCtx, ProviderError, SearchResult};

pub struct Loc;

impl Loc {
    pub fn new() -> Self {
        Loc
    }
}

impl Default for Loc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for Loc {
    fn key(&self) -> &'static str {
        "loc"
    }

    fn display_name(&self) -> &'static str {
        "Library of Congress"
    }

    async fn search(
        &self,
        title: &str,
        _creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let url = format!(
            "https://www.loc.gov/search/?q={}&fo=json&c={}",
            url::form_urlencoded::byte_serialize(title.as_bytes()).collect::<String>(),
            max_results
        );
        let body = ctx
            .requester
            .request(&url, Some(self.key()), &ctx.settings.network, Expected::Json)
            .await?;
        let value = match body {
            ResponseBody::Json(v) => v,
            _ => return Ok(Vec::new()),
        };

        let items = value.get("results").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut results = Vec::new();
        for item in items {
            let Some(item_title) = field_str(&item, &["title"]) else {
                continue;
            };
            let id = field_str(&item, &["id", "number_lccn"]);
            let manifest_url = item
                .get("iiif")
                .or_else(|| item.get("manifest"))
                .and_then(Value::as_str)
                .map(str::to_string);
            results.push(SearchResult {
                provider_display: self.display_name().to_string(),
                provider_key: self.key().to_string(),
                title: item_title,
                creators: creators_from(&item, &["contributor_names", "creator"]),
                date_text: field_str(&item, &["date"]),
                source_id: id,
                manifest_url,
                item_url: field_str(&item, &["url", "id"]),
                thumbnail_url: field_str(&item, &["image_url"]),
                raw: item,
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
        let Some(manifest_url) = &result.manifest_url else {
            return Err(ProviderError::download_failed(self.key(), "no IIIF manifest available"));
        };

        let body = ctx
            .requester
            .request(manifest_url, Some(self.key()), &ctx.settings.network, Expected::Json)
            .await?;
        let manifest = match body {
            ResponseBody::Json(v) => v,
            _ => return Err(ProviderError::download_failed(self.key(), "manifest fetch failed")),
        };

        let rendering_url = manifest
            .get("rendering")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(|r| r.get("@id").or_else(|| r.get("id")))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut downloaded = Downloaded::default();
        if ctx.allow_manifest_renderings {
            if let Some(url) = rendering_url {
                let dest_name = object_file_name(work_ctx, "pdf");
                let written = download_object(
                    &ctx.requester,
                    self.key(),
                    &url,
                    &ctx.settings.network,
                    output_folder,
                    &dest_name,
                    ContentKind::Pdf,
                )
                .await?;
                downloaded.merge(written);
            } else {
                return Err(ProviderError::download_failed(self.key(), "manifest has no whole-item rendering"));
            }
        } else {
            return Err(ProviderError::download_failed(self.key(), "manifest renderings disabled and no direct URL"));
        }

        let meta_name = format!("{}_manifest.json", work_ctx.work_stem);
        let meta_written = write_metadata(output_folder, &meta_name, &manifest).await?;
        downloaded.merge(meta_written);
        Ok(downloaded)
    }
}
