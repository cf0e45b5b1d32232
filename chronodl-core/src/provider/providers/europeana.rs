//! Europeana adapter (`europeana`). Requires `EUROPEANA_API_KEY` (§6).

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::context::WorkContext;
use crate::net::{ContentKind, Expected, ResponseBody};
use crate::provider::providers::common::{creators_from, download_object, field_str, object_file_name, write_metadata};
use crate::provider::{Downloaded, Provider, ProviderCtx, ProviderError, SearchResult};

pub struct Europeana;

impl Europeana {
    pub fn new() -> Self {
        Europeana
    }
}

impl Default for Europeana {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for Europeana {
    fn key(&self) -> &'static str {
        "europeana"
    }

    fn display_name(&self) -> &'static str {
        "Europeana"
    }

    fn required_env_var(&self) -> Option<&'static str> {
        Some("EUROPEANA_API_KEY")
    }

    async fn search(
        &self,
        title: &str,
        creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let api_key = ctx
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Misconfigured {
                provider_key: self.key().to_string(),
                detail: "EUROPEANA_API_KEY not provided".to_string(),
            })?;

        let mut query = format!("title:\"{title}\"");
        if let Some(creator) = creator {
            query.push_str(&format!(" AND who:\"{creator}\""));
        }
        let url = format!(
            "https://api.europeana.eu/record/v2/search.json?wskey={}&query={}&rows={}",
            api_key,
            url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>(),
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

        let items = value.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut results = Vec::new();
        for item in items {
            let Some(item_title) = field_str(&item, &["title"]) else {
                continue;
            };
            results.push(SearchResult {
                provider_display: self.display_name().to_string(),
                provider_key: self.key().to_string(),
                title: item_title,
                creators: creators_from(&item, &["dcCreator"]),
                date_text: field_str(&item, &["year"]),
                source_id: field_str(&item, &["id"]),
                manifest_url: field_str(&item, &["edmIsShownBy"]),
                item_url: field_str(&item, &["guid"]),
                thumbnail_url: field_str(&item, &["edmPreview"]),
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
        let Some(url) = result.manifest_url.clone().or_else(|| result.item_url.clone()) else {
            return Err(ProviderError::download_failed(self.key(), "no content URL available"));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key_env_var() {
        assert_eq!(Europeana::new().required_env_var(), Some("EUROPEANA_API_KEY"));
    }
}
