//! Google Books adapter (`google_books`). Requires `GOOGLE_BOOKS_API_KEY`
//! (§6). Google Books rarely exposes a direct full-text download; this
//! adapter downloads the public-domain PDF link when present and otherwise
//! fails, letting the selector's fallback chain move on (§4.4 step 4).

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::context::WorkContext;
use crate::net::{ContentKind, Expected, ResponseBody};
use crate::provider::providers::common::{creators_from, download_object, field_str, object_file_name, write_metadata};
use crate::provider::{Downloaded, Provider, ProviderCtx, ProviderError, SearchResult};

pub struct GoogleBooks;

impl GoogleBooks {
    pub fn new() -> Self {
        GoogleBooks
    }
}

impl Default for GoogleBooks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GoogleBooks {
    fn key(&self) -> &'static str {
        "google_books"
    }

    fn display_name(&self) -> &'static str {
        "Google Books"
    }

    fn required_env_var(&self) -> Option<&'static str> {
        Some("GOOGLE_BOOKS_API_KEY")
    }

    async fn search(
        &self,
        title: &str,
        creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let api_key = ctx.api_key.as_deref().ok_or_else(|| ProviderError::Misconfigured {
            provider_key: self.key().to_string(),
            detail: "GOOGLE_BOOKS_API_KEY not provided".to_string(),
        })?;
        let mut q = format!("intitle:{title}");
        if let Some(creator) = creator {
            q.push_str(&format!("+inauthor:{creator}"));
        }
        let url = format!(
            "https://www.googleapis.com/books/v1/volumes?q={}&key={}&maxResults={}",
            url::form_urlencoded::byte_serialize(q.as_bytes()).collect::<String>(),
            api_key,
            max_results.min(40)
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
            let volume_info = item.get("volumeInfo").cloned().unwrap_or(Value::Null);
            let Some(item_title) = field_str(&volume_info, &["title"]) else {
                continue;
            };
            let access_info = item.get("accessInfo").cloned().unwrap_or(Value::Null);
            let pdf_url = access_info
                .get("pdf")
                .and_then(|p| p.get("downloadLink"))
                .and_then(Value::as_str)
                .map(str::to_string);
            results.push(SearchResult {
                provider_display: self.display_name().to_string(),
                provider_key: self.key().to_string(),
                title: item_title,
                creators: creators_from(&volume_info, &["authors"]),
                date_text: field_str(&volume_info, &["publishedDate"]),
                source_id: field_str(&item, &["id"]),
                manifest_url: pdf_url,
                item_url: field_str(&volume_info, &["infoLink"]),
                thumbnail_url: volume_info
                    .get("imageLinks")
                    .and_then(|l| l.get("thumbnail"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
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
        let Some(url) = result.manifest_url.clone() else {
            return Err(ProviderError::download_failed(self.key(), "volume has no public-domain PDF download link"));
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
