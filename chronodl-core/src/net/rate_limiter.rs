//! C4 (pacing half) — per-provider request pacing (§4.2 step 3, §5's
//! locking-discipline table row "Per-provider rate limiter").
//!
//! Grounded directly on the teacher's `download/rate_limiter.rs`: a
//! `DashMap` of per-key state behind an `Arc`, cloned out of the map before
//! locking its inner mutex so no shard lock is held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;

/// Cumulative delay above which a provider's pacing is worth a warning log —
/// it usually means the configured `delay_ms` is miscalibrated for the
/// volume of requests being issued.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

struct ProviderPaceState {
    last_request: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl ProviderPaceState {
    fn new() -> Self {
        ProviderPaceState {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }
}

/// Paces requests per provider key: `sleep until last_request_time +
/// min_interval + random_jitter` (§4.2 step 3).
pub struct RateLimiter {
    default_interval: Duration,
    default_jitter: Duration,
    disabled: bool,
    providers: DashMap<String, Arc<ProviderPaceState>>,
}

impl RateLimiter {
    pub fn new(default_interval: Duration, default_jitter: Duration) -> Self {
        RateLimiter {
            default_interval,
            default_jitter,
            disabled: false,
            providers: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        RateLimiter {
            default_interval: Duration::ZERO,
            default_jitter: Duration::ZERO,
            disabled: true,
            providers: DashMap::new(),
        }
    }

    /// Blocks until it is this provider's turn, per its configured interval
    /// and jitter (falling back to the limiter's defaults when
    /// `interval`/`jitter` are `None`). Updates `last_request` to now on
    /// return so the *next* caller paces off this call, not off when it
    /// started waiting.
    pub async fn acquire(&self, provider_key: &str, interval: Option<Duration>, jitter: Option<Duration>) {
        if self.disabled {
            return;
        }
        let interval = interval.unwrap_or(self.default_interval);
        let jitter = jitter.unwrap_or(self.default_jitter);

        // Clone the Arc out of the shard before locking the inner mutex —
        // holding a DashMap shard guard across an .await can deadlock other
        // tasks touching the same shard.
        let state = self
            .providers
            .entry(provider_key.to_string())
            .or_insert_with(|| Arc::new(ProviderPaceState::new()))
            .clone();

        let jitter_ms = if jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter.as_millis() as u64)
        };
        let wait_for = interval + Duration::from_millis(jitter_ms);

        let mut guard = state.last_request.lock().await;
        let now = Instant::now();
        if let Some(last) = *guard {
            let elapsed = now.duration_since(last);
            if elapsed < wait_for {
                let remaining = wait_for - elapsed;
                let total = state.cumulative_delay_ms.fetch_add(remaining.as_millis() as u64, Ordering::Relaxed)
                    + remaining.as_millis() as u64;
                if Duration::from_millis(total) >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    tracing::warn!(
                        provider = provider_key,
                        cumulative_delay_ms = total,
                        "provider pacing has accumulated significant cumulative delay"
                    );
                }
                tokio::time::sleep(remaining).await;
            }
        }
        *guard = Some(Instant::now());
    }

    /// Records an externally observed delay (e.g. a `Retry-After` wait)
    /// against the provider's cumulative counter without otherwise touching
    /// `last_request`.
    pub fn record_extra_delay(&self, provider_key: &str, delay: Duration) {
        let state = self
            .providers
            .entry(provider_key.to_string())
            .or_insert_with(|| Arc::new(ProviderPaceState::new()))
            .clone();
        state
            .cumulative_delay_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Maps a URL's host to a provider key via substring match against a static
/// table (§4.2 step 1). Returns `None` for hosts with no known provider.
pub fn provider_for_host(host: &str) -> Option<&'static str> {
    const TABLE: &[(&str, &str)] = &[
        ("archive.org", "internet_archive"),
        ("gallica.bnf.fr", "bnf_gallica"),
        ("europeana.eu", "europeana"),
        ("dp.la", "dpla"),
        ("deutsche-digitale-bibliothek.de", "ddb"),
        ("bl.uk", "british_library"),
        ("digitale-sammlungen.de", "mdz"),
        ("polona.pl", "polona"),
        ("bne.es", "bne"),
        ("googleapis.com", "google_books"),
        ("books.google.com", "google_books"),
        ("hathitrust.org", "hathitrust"),
        ("wellcomecollection.org", "wellcome"),
        ("annas-archive.org", "annas_archive"),
        ("slub-dresden.de", "slub"),
        ("e-rara.ch", "e_rara"),
        ("staatsbibliothek-berlin.de", "sbb_digital"),
        ("loc.gov", "loc"),
    ];
    let host = host.to_lowercase();
    TABLE
        .iter()
        .find(|(suffix, _)| host == *suffix || host.ends_with(&format!(".{suffix}")))
        .map(|(_, key)| *key)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== provider_for_host ====

    #[test]
    fn matches_known_host() {
        assert_eq!(provider_for_host("www.archive.org"), Some("internet_archive"));
        assert_eq!(provider_for_host("gallica.bnf.fr"), Some("bnf_gallica"));
    }

    #[test]
    fn unmatched_host_is_none() {
        assert_eq!(provider_for_host("example.com"), None);
    }

    // ==== acquire ====

    #[tokio::test(start_paused = true)]
    async fn first_acquire_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(500), Duration::ZERO);
        let start = Instant::now();
        limiter.acquire("internet_archive", None, None).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquire_waits_out_the_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(500), Duration::ZERO);
        limiter.acquire("loc", None, None).await;
        let start = Instant::now();
        limiter.acquire("loc", None, None).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn different_providers_do_not_share_pacing() {
        let limiter = RateLimiter::new(Duration::from_millis(500), Duration::ZERO);
        limiter.acquire("loc", None, None).await;
        let start = Instant::now();
        limiter.acquire("bnf_gallica", None, None).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn disabled_limiter_never_waits() {
        let limiter = RateLimiter::disabled();
        limiter.acquire("loc", None, None).await;
        let start = Instant::now();
        limiter.acquire("loc", Some(Duration::from_secs(10)), None).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
