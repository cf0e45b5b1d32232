//! C4 (breaker half) — per-provider circuit breaker (§4.2 steps 2 & 5, the
//! CLOSED→OPEN→HALF_OPEN state machine, §8 property 7).
//!
//! Grounded on the same `DashMap`-of-`Arc`-state shape as `rate_limiter.rs`;
//! the breaker is the teacher's equivalent load-shedding mechanism expressed
//! per-provider instead of per-domain.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct ProviderBreakerState {
    state: std::sync::Mutex<BreakerState>,
    failure_count: AtomicU32,
    opened_at_millis: AtomicU64,
}

impl ProviderBreakerState {
    fn new() -> Self {
        ProviderBreakerState {
            state: std::sync::Mutex::new(BreakerState::Closed),
            failure_count: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
        }
    }
}

/// Whether a gated request should be admitted, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject,
}

/// Provider-scoped circuit breaker: one instance shared across the process,
/// keyed by provider, so one flaky provider does not slow others (§4.2).
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    enabled: bool,
    providers: DashMap<String, Arc<ProviderBreakerState>>,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            threshold: threshold.max(1),
            cooldown,
            enabled: true,
            providers: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    pub fn disabled() -> Self {
        CircuitBreaker {
            threshold: u32::MAX,
            cooldown: Duration::ZERO,
            enabled: false,
            providers: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    fn state_for(&self, provider_key: &str) -> Arc<ProviderBreakerState> {
        self.providers
            .entry(provider_key.to_string())
            .or_insert_with(|| Arc::new(ProviderBreakerState::new()))
            .clone()
    }

    fn millis_since_epoch(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Gate step (§4.2 step 2): if OPEN and cooldown has not elapsed, reject
    /// with zero outbound connections (§8 property 7). If cooldown elapsed,
    /// transition to HALF_OPEN and admit exactly this one trial request.
    pub fn gate(&self, provider_key: &str) -> Admission {
        if !self.enabled {
            return Admission::Admit;
        }
        let provider_state = self.state_for(provider_key);
        let mut state = provider_state.state.lock().unwrap_or_else(|poison| poison.into_inner());
        match *state {
            BreakerState::Closed => Admission::Admit,
            BreakerState::HalfOpen => Admission::Admit,
            BreakerState::Open => {
                let opened_at = provider_state.opened_at_millis.load(Ordering::SeqCst);
                let now_millis = self.millis_since_epoch(Instant::now());
                if now_millis.saturating_sub(opened_at) >= self.cooldown.as_millis() as u64 {
                    *state = BreakerState::HalfOpen;
                    Admission::Admit
                } else {
                    Admission::Reject
                }
            }
        }
    }

    /// Record step (§4.2 step 5): success resets to CLOSED with
    /// `failure_count := 0`; failure increments the counter and opens the
    /// breaker once `failure_count >= threshold`.
    pub fn record_success(&self, provider_key: &str) {
        if !self.enabled {
            return;
        }
        let provider_state = self.state_for(provider_key);
        provider_state.failure_count.store(0, Ordering::SeqCst);
        let mut state = provider_state.state.lock().unwrap_or_else(|poison| poison.into_inner());
        *state = BreakerState::Closed;
    }

    pub fn record_failure(&self, provider_key: &str) {
        if !self.enabled {
            return;
        }
        let provider_state = self.state_for(provider_key);
        let mut state = provider_state.state.lock().unwrap_or_else(|poison| poison.into_inner());
        match *state {
            BreakerState::HalfOpen => {
                *state = BreakerState::Open;
                provider_state
                    .opened_at_millis
                    .store(self.millis_since_epoch(Instant::now()), Ordering::SeqCst);
            }
            BreakerState::Closed => {
                let count = provider_state.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.threshold {
                    *state = BreakerState::Open;
                    provider_state
                        .opened_at_millis
                        .store(self.millis_since_epoch(Instant::now()), Ordering::SeqCst);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn current_state(&self, provider_key: &str) -> BreakerState {
        *self.state_for(provider_key).state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
