//! Bibliothèque nationale de France / Gallica adapter (`bnf_gallica`).
//!
//! Gallica's public search surface is an SRU/XML endpoint; wire-format
//! parsing detail is explicitly out of scope (spec §1 non-goals name
//! "SRU/SPARQL query construction" beyond the uniform contract), so this
//! adapter extracts just the two fields the uniform contract needs (ark
//! identifier, title) via a small regex rather than a full XML parser.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::context::WorkContext;
use crate::net::{ContentKind, Expected, ResponseBody};
use crate::provider::providers::common::{download_object, object_file_name, write_metadata};
use crate::provider::{Downloaded, Provider, ProviderCtx, ProviderError, SearchResult};

#[allow(clippy::expect_used)]
static ARK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ark:/12148/(\w+)").expect("gallica ark regex is valid"));
#[allow(clippy::expect_used)]
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<dc:title>([^<]+)</dc:title>").expect("gallica title regex is valid"));

pub struct BnfGallica;

impl BnfGallica {
    pub fn new() -> Self {
        BnfGallica
    }
}

impl Default for BnfGallica {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for BnfGallica {
    fn key(&self) -> &'static str {
        "bnf_gallica"
    }

    fn display_name(&self) -> &'static str {
        "BnF Gallica"
    }

    async fn search(
        &self,
        title: &str,
        _creator: Option<&str>,
        max_results: u32,
        ctx: &ProviderCtx,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let query = format!("gallica all \"{title}\"");
        let url = format!(
            "https://gallica.bnf.fr/SRU?operation=searchRetrieve&version=1.2&query={}&maximumRecords={}",
            url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>(),
            max_results
        );

        let body = ctx
            .requester
            .request(&url, Some(self.key()), &ctx.settings.network, Expected::Text)
            .await?;
        let text = match body {
            ResponseBody::Text(t) => t,
            _ => return Ok(Vec::new()),
        };

        let arks: Vec<&str> = ARK_RE.captures_iter(&text).filter_map(|c| c.get(1)).map(|m| m.as_str()).collect();
        let titles: Vec<&str> = TITLE_RE.captures_iter(&text).filter_map(|c| c.get(1)).map(|m| m.as_str()).collect();

        let mut results = Vec::new();
        for (i, ark) in arks.iter().take(max_results as usize).enumerate() {
            let matched_title = titles.get(i).map(|s| s.to_string()).unwrap_or_else(|| title.to_string());
            results.push(SearchResult {
                provider_display: self.display_name().to_string(),
                provider_key: self.key().to_string(),
                title: matched_title,
                creators: Vec::new(),
                date_text: None,
                source_id: Some(ark.to_string()),
                manifest_url: Some(format!("https://gallica.bnf.fr/ark:/12148/{ark}/manifest.json")),
                item_url: Some(format!("https://gallica.bnf.fr/ark:/12148/{ark}")),
                thumbnail_url: None,
                raw: serde_json::json!({"ark": ark, "title": titles.get(i)}),
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
        let Some(ark) = &result.source_id else {
            return Err(ProviderError::download_failed(self.key(), "missing ark identifier"));
        };
        let pdf_url = format!("https://gallica.bnf.fr/ark:/12148/{ark}.texteBrut.pdf");
        let dest_name = object_file_name(work_ctx, "pdf");
        let mut downloaded = download_object(
            &ctx.requester,
            self.key(),
            &pdf_url,
            &ctx.settings.network,
            output_folder,
            &dest_name,
            ContentKind::Pdf,
        )
        .await?;

        let meta_name = format!("{}_metadata.json", work_ctx.work_stem);
        let meta_written = write_metadata(output_folder, &meta_name, &result.raw).await?;
        downloaded.merge(meta_written);
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_display_name() {
        let provider = BnfGallica::new();
        assert_eq!(provider.key(), "bnf_gallica");
        assert_eq!(provider.display_name(), "BnF Gallica");
    }
}
