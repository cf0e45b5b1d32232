//! C5 — the single shared HTTP requester wrapping C4, with retries,
//! backoff, content-type dispatch, and magic-byte validation on downloads
//! (§4.2).
//!
//! Grounded on the teacher's `download/engine.rs` (shared-client-plus-policy
//! shape) and `download/rate_limiter.rs`/`retry.rs` for the policy pieces
//! this module composes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::config::NetworkSettings;

use super::breaker::{Admission, CircuitBreaker};
use super::error::NetworkError;
use super::rate_limiter::{provider_for_host, RateLimiter};
use super::retry::{classify_error, classify_status, FailureKind, RetryDecision, RetryPolicy};

/// What shape the caller expects back, mirroring the `expected` hint in
/// §4.2's `request(url, params?, headers?, expected?)` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Json,
    Text,
    Bytes,
    /// Dispatch purely by response `Content-Type` (§4.2 step 6).
    Auto,
}

#[derive(Debug)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    /// The circuit breaker rejected the request, or all attempts failed on a
    /// permanent/exhausted basis and the caller asked for "nil on failure"
    /// semantics rather than propagation.
    Empty,
}

const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Process-wide HTTP requester (§5: "HTTP client and session | C5 |
/// Process-wide; library must be thread-safe"). Internally owns the rate
/// limiter and circuit breaker, both keyed per provider.
pub struct HttpRequester {
    client: reqwest::Client,
    /// Built once alongside `client`, with certificate validation disabled,
    /// for providers whose `network.verify_ssl` is `false`.
    insecure_client: reqwest::Client,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl HttpRequester {
    pub fn new() -> Self {
        HttpRequester {
            client: reqwest::Client::new(),
            insecure_client: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            rate_limiter: RateLimiter::new(Duration::from_millis(1000), Duration::from_millis(250)),
            breaker: CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_COOLDOWN),
        }
    }

    /// Picks the validating or the certificate-skipping client per
    /// `settings.verify_ssl` (§6 `network.verify_ssl`).
    fn client_for(&self, settings: &NetworkSettings) -> &reqwest::Client {
        if settings.verify_ssl {
            &self.client
        } else {
            &self.insecure_client
        }
    }

    fn effective_provider_key<'a>(&self, url: &str, explicit: Option<&'a str>) -> String {
        if let Some(key) = explicit {
            return key.to_string();
        }
        url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|h| h.to_string()))
            .and_then(|host| provider_for_host(&host).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// The uniform request entry point (§4.2). `provider_key` should be
    /// `Some` when the caller (a provider adapter) already knows its own
    /// key; pass `None` to let it derive from the URL's host (used for
    /// manifest/page fetches against hosts not tied to one provider key).
    #[tracing::instrument(skip(self, settings), fields(provider))]
    pub async fn request(
        &self,
        url: &str,
        provider_key: Option<&str>,
        settings: &NetworkSettings,
        expected: Expected,
    ) -> Result<ResponseBody, NetworkError> {
        let key = self.effective_provider_key(url, provider_key);
        tracing::Span::current().record("provider", &key.as_str());

        if settings.circuit_breaker_enabled && self.breaker.gate(&key) == Admission::Reject {
            tracing::debug!(provider = %key, "circuit breaker open, rejecting request");
            return Ok(ResponseBody::Empty);
        }

        let policy = RetryPolicy::from_settings(
            settings.max_attempts,
            settings.base_backoff_s,
            settings.backoff_multiplier,
            settings.max_backoff_s,
        );

        let mut attempt: u32 = 1;
        loop {
            self.rate_limiter
                .acquire(&key, Some(Duration::from_millis(settings.delay_ms)), Some(Duration::from_millis(settings.jitter_ms)))
                .await;

            let mut request = self.client_for(settings).get(url);
            for (name, value) in &settings.headers {
                request = request.header(name, value);
            }
            let timeout = Duration::from_secs_f64(settings.max_backoff_s.max(30.0));
            request = request.timeout(timeout);

            let outcome = request.send().await;
            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if settings.circuit_breaker_enabled {
                            self.breaker.record_success(&key);
                        }
                        return Ok(dispatch_body(response, expected).await?);
                    }

                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    let status_code = status.as_u16();
                    let err = NetworkError::http_status(url, status_code, retry_after.clone());

                    if settings.circuit_breaker_enabled {
                        self.breaker.record_failure(&key);
                    }

                    match classify_status(status_code) {
                        FailureKind::Permanent => return Ok(ResponseBody::Empty),
                        FailureKind::RateLimited => {
                            if let Some(ref ra) = retry_after {
                                if let Some(wait) = super::retry::parse_retry_after(ra) {
                                    self.rate_limiter.record_extra_delay(&key, wait);
                                    tokio::time::sleep(wait).await;
                                    attempt += 1;
                                    if attempt > policy.max_attempts {
                                        return Ok(ResponseBody::Empty);
                                    }
                                    continue;
                                }
                            }
                            match policy.should_retry(FailureKind::RateLimited, attempt) {
                                RetryDecision::Retry { delay, attempt: next } => {
                                    tokio::time::sleep(delay).await;
                                    attempt = next;
                                    continue;
                                }
                                RetryDecision::DoNotRetry { .. } => return Ok(ResponseBody::Empty),
                            }
                        }
                        FailureKind::Transient => match policy.should_retry(FailureKind::Transient, attempt) {
                            RetryDecision::Retry { delay, attempt: next } => {
                                tokio::time::sleep(delay).await;
                                attempt = next;
                                continue;
                            }
                            RetryDecision::DoNotRetry { .. } => {
                                let _ = err;
                                return Ok(ResponseBody::Empty);
                            }
                        },
                    }
                }
                Err(source) => {
                    let is_timeout = source.is_timeout();
                    let err = if is_timeout {
                        NetworkError::timeout(url)
                    } else {
                        NetworkError::transport(url, source)
                    };
                    if settings.circuit_breaker_enabled {
                        self.breaker.record_failure(&key);
                    }
                    match policy.should_retry(classify_error(&err), attempt) {
                        RetryDecision::Retry { delay, attempt: next } => {
                            tokio::time::sleep(delay).await;
                            attempt = next;
                            continue;
                        }
                        RetryDecision::DoNotRetry { .. } => return Ok(ResponseBody::Empty),
                    }
                }
            }
        }
    }

    /// Streams a download to `dest`, then validates the first bytes against
    /// the expected magic bytes for `expected_kind` (§4.2 "File download").
    /// Rejected content deletes the partial file and returns an error.
    #[tracing::instrument(skip(self, settings))]
    pub async fn download_file(
        &self,
        url: &str,
        provider_key: Option<&str>,
        settings: &NetworkSettings,
        dest: &Path,
        expected_kind: ContentKind,
    ) -> Result<u64, NetworkError> {
        let key = self.effective_provider_key(url, provider_key);

        if settings.circuit_breaker_enabled && self.breaker.gate(&key) == Admission::Reject {
            return Err(NetworkError::content_rejected(url, "circuit breaker open"));
        }

        self.rate_limiter
            .acquire(&key, Some(Duration::from_millis(settings.delay_ms)), Some(Duration::from_millis(settings.jitter_ms)))
            .await;

        let response = self
            .client_for(settings)
            .get(url)
            .send()
            .await
            .map_err(|source| NetworkError::transport(url, source))?;

        if !response.status().is_success() {
            if settings.circuit_breaker_enabled {
                self.breaker.record_failure(&key);
            }
            return Err(NetworkError::http_status(url, response.status().as_u16(), None));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if content_type.starts_with("text/html") && !url.to_lowercase().ends_with(".html") {
            if settings.circuit_breaker_enabled {
                self.breaker.record_failure(&key);
            }
            return Err(NetworkError::content_rejected(url, "content-type is text/html"));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| NetworkError::io(parent, source))?;
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| NetworkError::io(dest, source))?;

        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;
        let mut header = Vec::with_capacity(8);

        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| NetworkError::transport(url, source))?;
            if header.len() < 8 {
                header.extend(chunk.iter().take(8 - header.len()));
            }
            total += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|source| NetworkError::io(dest, source))?;
        }
        file.flush().await.map_err(|source| NetworkError::io(dest, source))?;
        drop(file);

        if !magic_bytes_match(expected_kind, &header) {
            let _ = tokio::fs::remove_file(dest).await;
            if settings.circuit_breaker_enabled {
                self.breaker.record_failure(&key);
            }
            return Err(NetworkError::content_rejected(url, "magic bytes did not match expected content kind"));
        }

        if settings.circuit_breaker_enabled {
            self.breaker.record_success(&key);
        }
        Ok(total)
    }
}

impl Default for HttpRequester {
    fn default() -> Self {
        Self::new()
    }
}

/// The whole-item file types the download path validates magic bytes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Epub,
    /// Page images: no whole-file magic-byte contract is enforced beyond
    /// "not HTML", already checked via content-type.
    Image,
}

fn magic_bytes_match(kind: ContentKind, header: &[u8]) -> bool {
    match kind {
        ContentKind::Pdf => header.starts_with(b"%PDF"),
        // EPUB is a ZIP container: "PK\x03\x04" local-file-header signature.
        ContentKind::Epub => header.starts_with(&[0x50, 0x4B, 0x03, 0x04]),
        ContentKind::Image => true,
    }
}

async fn dispatch_body(response: reqwest::Response, expected: Expected) -> Result<ResponseBody, NetworkError> {
    let url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    match expected {
        Expected::Json => {
            let value: Value = response.json().await.map_err(|source| NetworkError::transport(&url, source))?;
            Ok(ResponseBody::Json(value))
        }
        Expected::Text => {
            let text = response.text().await.map_err(|source| NetworkError::transport(&url, source))?;
            Ok(ResponseBody::Text(text))
        }
        Expected::Bytes => {
            let bytes = response.bytes().await.map_err(|source| NetworkError::transport(&url, source))?;
            Ok(ResponseBody::Bytes(bytes.to_vec()))
        }
        Expected::Auto => {
            if content_type.contains("json") {
                let value: Value = response.json().await.map_err(|source| NetworkError::transport(&url, source))?;
                Ok(ResponseBody::Json(value))
            } else if content_type.starts_with("text/") || content_type.contains("xml") {
                let text = response.text().await.map_err(|source| NetworkError::transport(&url, source))?;
                Ok(ResponseBody::Text(text))
            } else {
                let bytes = response.bytes().await.map_err(|source| NetworkError::transport(&url, source))?;
                Ok(ResponseBody::Bytes(bytes.to_vec()))
            }
        }
    }
}

/// Resolves a destination path's parent directories eagerly; small helper
/// kept separate so provider adapters building `objects/`/`metadata/` paths
/// share one implementation.
pub fn objects_path(work_dir: &Path, file_name: &str) -> PathBuf {
    work_dir.join("objects").join(file_name)
}

pub fn metadata_path(work_dir: &Path, file_name: &str) -> PathBuf {
    work_dir.join("metadata").join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== magic bytes ====

    #[test]
    fn pdf_header_matches() {
        assert!(magic_bytes_match(ContentKind::Pdf, b"%PDF-1.7 rest"));
    }

    #[test]
    fn html_is_not_pdf() {
        assert!(!magic_bytes_match(ContentKind::Pdf, b"<!DOCTYPE html>"));
    }

    #[test]
    fn epub_header_matches_zip_signature() {
        assert!(magic_bytes_match(ContentKind::Epub, &[0x50, 0x4B, 0x03, 0x04, 0, 0, 0, 0]));
    }

    // ==== effective_provider_key ====

    #[test]
    fn explicit_key_wins_over_host_lookup() {
        let requester = HttpRequester::new();
        assert_eq!(
            requester.effective_provider_key("https://archive.org/x", Some("custom")),
            "custom"
        );
    }

    #[test]
    fn falls_back_to_host_table() {
        let requester = HttpRequester::new();
        assert_eq!(
            requester.effective_provider_key("https://gallica.bnf.fr/ark:/x", None),
            "bnf_gallica"
        );
    }

    #[test]
    fn unknown_host_falls_back_to_unknown_key() {
        let requester = HttpRequester::new();
        assert_eq!(requester.effective_provider_key("https://example.com/x", None), "unknown");
    }
}
