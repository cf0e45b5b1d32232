//! Digital Public Library of America adapter (`dpla`). Requires
//! `DPLA_API_KEY` (§6).

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::context::WorkContext;
use crate::net::{ContentKind, Expected, ResponseBody};
use crate::provider::providers::common::{creators_from, download_object, field_str, object_file_name, write_metadata};
use crate::provider::{Downloaded, Provider, ProviderCtx, ProviderError, SearchResult};

pub struct Dpla;

impl Dpla {
    pub fn new() -> Self {
        Dpla
    }
}

impl Default for Dpla {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for Dpla {
    fn key(&self) -> &'static str {
        "dpla"
    }

    fn display_name(&self) -> &'static str {
        "Digital Public Library of America"
    }

    fn required_env_var(&self) -> Option<&'static str> {
        Some("DPLA_API_KEY")
    }

    async fn search(
        &self,
        title: &str,
        _creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let api_key = ctx.api_key.as_deref().ok_or_else(|| ProviderError::Misconfigured {
            provider_key: self.key().to_string(),
            detail: "DPLA_API_KEY not provided".to_string(),
        })?;
        let url = format!(
            "https://api.dp.la/v2/items?q={}&api_key={}&page_size={}",
            url::form_urlencoded::byte_serialize(title.as_bytes()).collect::<String>(),
            api_key,
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
        let docs = value.get("docs").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut results = Vec::new();
        for doc in docs {
            let source_resource = doc.get("sourceResource").cloned().unwrap_or(Value::Null);
            let Some(item_title) = field_str(&source_resource, &["title"]) else {
                continue;
            };
            results.push(SearchResult {
                provider_display: self.display_name().to_string(),
                provider_key: self.key().to_string(),
                title: item_title,
                creators: creators_from(&source_resource, &["creator"]),
                date_text: field_str(&source_resource, &["date"]),
                source_id: field_str(&doc, &["id"]),
                manifest_url: None,
                item_url: doc
                    .get("isShownAt")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                thumbnail_url: field_str(&doc, &["object"]),
                raw: doc,
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
        let Some(url) = result.item_url.clone() else {
            return Err(ProviderError::download_failed(self.key(), "no shown-at URL available"));
        };
        let dest_name = object_file_name(work_ctx, "pdf");
        let mut downloaded = download_object(
            &ctx.requester,
            self.key(),
            &url,
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
