//! C4 (rate limiter + circuit breaker) and C5 (HTTP requester): the shared
//! network policy layer every provider adapter goes through (§4.2).

mod breaker;
mod client;
mod error;
mod rate_limiter;
mod retry;

pub use breaker::{Admission, BreakerState, CircuitBreaker};
pub use client::{ContentKind, Expected, HttpRequester, ResponseBody};
pub use error::NetworkError;
pub use rate_limiter::{provider_for_host, RateLimiter};
pub use retry::{classify_error, classify_status, parse_retry_after, FailureKind, RetryDecision, RetryPolicy};
