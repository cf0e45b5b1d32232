//! Retry/backoff policy for C5 (§4.2 step 4, §7 "Network transient" row).
//!
//! Grounded closely on the teacher's `download/retry.rs`: a `FailureKind`
//! classifier over HTTP status + transport error shape, a `RetryDecision`
//! the caller acts on, and an exponential-backoff-with-jitter delay formula.

use std::time::Duration;

use rand::Rng;

use super::error::NetworkError;

/// How a failed request should be treated for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network timeout, connection reset, 5xx, 408 — worth retrying.
    Transient,
    /// 4xx other than 429/408 — retrying would not help.
    Permanent,
    /// 429 — governed by `Retry-After` rather than the normal backoff curve.
    RateLimited,
}

#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry { delay: Duration, attempt: u32 },
    DoNotRetry { reason: &'static str },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

const MAX_JITTER_MS: u64 = 500;

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(max_attempts: u32, base_delay_s: f64, multiplier: f64, max_delay_s: f64) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs_f64(base_delay_s.max(0.0)),
            max_delay: Duration::from_secs_f64(max_delay_s.max(0.0)),
            backoff_multiplier: multiplier.max(1.0),
        }
    }

    /// `attempt` is 1-based: the attempt number that just failed.
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if kind == FailureKind::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure, retry would not help",
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: "max attempts exhausted",
            };
        }
        RetryDecision::Retry {
            delay: self.calculate_delay(attempt),
            attempt: attempt + 1,
        }
    }

    /// `base × multiplier^(attempt−1)`, capped at `max_delay`, plus jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi((attempt.saturating_sub(1)) as i32);
        let raw = self.base_delay.mul_f64(exp);
        let capped = raw.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER_MS);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Classifies an HTTP status code per the table in §4.2 step 4.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        429 => FailureKind::RateLimited,
        408 => FailureKind::Transient,
        500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

/// Classifies a `NetworkError` for retry purposes.
pub fn classify_error(err: &NetworkError) -> FailureKind {
    match err {
        NetworkError::Timeout { .. } => FailureKind::Transient,
        NetworkError::HttpStatus { status, .. } => classify_status(*status),
        NetworkError::Transport { source, .. } => {
            if source.is_timeout() || source.is_connect() {
                FailureKind::Transient
            } else {
                FailureKind::Permanent
            }
        }
        NetworkError::Io { .. } => FailureKind::Transient,
        NetworkError::InvalidUrl { .. } | NetworkError::ContentRejected { .. } => FailureKind::Permanent,
    }
}

/// Parses a `Retry-After` header value: either an integer seconds count or
/// an RFC 7231 HTTP-date. Caps at one hour to bound worst-case pauses.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER));
    }
    if let Ok(when) = httpdate::parse_http_date(value.trim()) {
        if let Ok(delta) = when.duration_since(std::time::SystemTime::now()) {
            return Some(delta.min(MAX_RETRY_AFTER));
        }
        return Some(Duration::ZERO);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== classify_status ====

    #[test]
    fn classifies_429_as_rate_limited() {
        assert_eq!(classify_status(429), FailureKind::RateLimited);
    }

    #[test]
    fn classifies_5xx_as_transient() {
        assert_eq!(classify_status(500), FailureKind::Transient);
        assert_eq!(classify_status(503), FailureKind::Transient);
    }

    #[test]
    fn classifies_408_as_transient() {
        assert_eq!(classify_status(408), FailureKind::Transient);
    }

    #[test]
    fn classifies_other_4xx_as_permanent() {
        assert_eq!(classify_status(404), FailureKind::Permanent);
        assert_eq!(classify_status(401), FailureKind::Permanent);
    }

    // ==== should_retry ====

    #[test]
    fn permanent_never_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureKind::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn max_attempts_one_means_no_retries() {
        let policy = RetryPolicy::from_settings(1, 1.0, 2.0, 32.0);
        let decision = policy.should_retry(FailureKind::Transient, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn transient_retries_until_max_attempts() {
        let policy = RetryPolicy::from_settings(3, 1.0, 2.0, 32.0);
        assert!(matches!(
            policy.should_retry(FailureKind::Transient, 1),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureKind::Transient, 2),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureKind::Transient, 3),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    // ==== calculate_delay ====

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy::from_settings(5, 1.0, 2.0, 4.0);
        let d1 = policy.calculate_delay(1).as_secs_f64();
        let d2 = policy.calculate_delay(2).as_secs_f64();
        assert!(d1 < 1.6, "first delay should be close to base: {d1}");
        assert!(d2 > d1, "delay should grow: {d1} -> {d2}");
        let d_big = policy.calculate_delay(10).as_secs_f64();
        assert!(d_big <= 4.6, "delay must respect max_delay + jitter bound: {d_big}");
    }

    // ==== parse_retry_after ====

    #[test]
    fn parses_integer_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn caps_huge_integer_seconds() {
        assert_eq!(parse_retry_after("999999"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_retry_after("not-a-date-or-number"), None);
    }
}
