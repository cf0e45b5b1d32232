//! Internet Archive adapter (provider key `internet_archive`).
//!
//! Search hits the advanced-search JSON API; download resolves the item's
//! file listing via the metadata API and fetches the first PDF, falling
//! back to an IIIF-manifest rendering if the item exposes one.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::context::WorkContext;
use crate::net::{ContentKind, Expected, ResponseBody};
use crate::provider::providers::common::{download_object, field_str, object_file_name, write_metadata};
use crate::provider::{Downloaded, Provider, ProviderCtx, ProviderError, SearchResult};

pub struct InternetArchive;

impl InternetArchive {
    pub fn new() -> Self {
        InternetArchive
    }
}

impl Default for InternetArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for InternetArchive {
    fn key(&self) -> &'static str {
        "internet_archive"
    }

    fn display_name(&self) -> &'static str {
        "Internet Archive"
    }

    async fn search(
        &self,
        title: &str,
        creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let mut query = format!("title:({title})");
        if let Some(creator) = creator {
            query.push_str(&format!(" AND creator:({creator})"));
        }
        let url = format!(
            "https://archive.org/advancedsearch.php?q={}&fl[]=identifier&fl[]=title&fl[]=creator&fl[]=date&rows={}&output=json",
            urlencode(&query),
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

        let docs = value
            .get("response")
            .and_then(|r| r.get("docs"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::new();
        for doc in docs {
            let Some(identifier) = field_str(&doc, &["identifier"]) else {
                continue;
            };
            let title = field_str(&doc, &["title"]).unwrap_or_default();
            let creators = crate::provider::providers::common::creators_from(&doc, &["creator"]);
            let date_text = field_str(&doc, &["date"]);
            results.push(SearchResult {
                provider_display: self.display_name().to_string(),
                provider_key: self.key().to_string(),
                title,
                creators,
                date_text,
                source_id: Some(identifier.clone()),
                manifest_url: Some(format!("https://iiif.archive.org/iiif/{identifier}/manifest.json")),
                item_url: Some(format!("https://archive.org/details/{identifier}")),
                thumbnail_url: Some(format!("https://archive.org/services/img/{identifier}")),
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
        let Some(identifier) = &result.source_id else {
            return Err(ProviderError::download_failed(self.key(), "missing identifier"));
        };

        let metadata_url = format!("https://archive.org/metadata/{identifier}");
        let body = ctx
            .requester
            .request(&metadata_url, Some(self.key()), &ctx.settings.network, Expected::Json)
            .await?;
        let metadata = match body {
            ResponseBody::Json(v) => v,
            _ => return Err(ProviderError::download_failed(self.key(), "metadata endpoint returned no body")),
        };

        let files = metadata.get("files").and_then(Value::as_array).cloned().unwrap_or_default();
        let pdf_name = files.iter().find_map(|f| {
            let name = f.get("name")?.as_str()?;
            name.to_lowercase().ends_with(".pdf").then(|| name.to_string())
        });

        let mut downloaded = Downloaded::default();

        if let Some(name) = pdf_name {
            let file_url = format!("https://archive.org/download/{identifier}/{name}");
            let dest_name = object_file_name(work_ctx, "pdf");
            let written = download_object(
                &ctx.requester,
                self.key(),
                &file_url,
                &ctx.settings.network,
                output_folder,
                &dest_name,
                ContentKind::Pdf,
            )
            .await?;
            downloaded.merge(written);
        } else {
            return Err(ProviderError::download_failed(self.key(), "no PDF file listed for this item"));
        }

        let meta_name = format!("{}_metadata.json", work_ctx.work_stem);
        let meta_written = write_metadata(output_folder, &meta_name, &metadata).await?;
        downloaded.merge(meta_written);

        Ok(downloaded)
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
