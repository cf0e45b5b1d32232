//! C10 — per-provider quota tracking (§4.5, §3 "Provider quota state").
//!
//! Grounded on the original Python `main/quota_manager.py`'s
//! `QuotaManager.can_download`/`record_download`, rebuilt on top of
//! [`crate::state::StateStore`] as the sole persistence path.

use chrono::{DateTime, Utc};

use crate::config::QuotaSettings;
use crate::state::{QuotaState, StateError, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Exhausted,
}

/// Tracks and enforces the self-imposed per-provider daily download quota.
/// A disabled quota (`settings.enabled == false`) always allows.
pub struct QuotaTracker<'a> {
    store: &'a StateStore,
}

impl<'a> QuotaTracker<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        QuotaTracker { store }
    }

    /// §4.5: "a quota period that has elapsed resets transparently on next
    /// access." Reads the current state, rolling the period over if
    /// `reset_hours` has elapsed since `period_start`, without persisting
    /// the roll-over until a download is actually recorded.
    fn current_or_fresh(&self, provider_key: &str, settings: &QuotaSettings, now: DateTime<Utc>) -> QuotaState {
        match self.store.get_quota(provider_key) {
            Some(state) if !period_elapsed(&state, settings, now) => state,
            _ => QuotaState {
                provider_key: provider_key.to_string(),
                daily_limit: settings.daily_limit,
                reset_hours: settings.reset_hours,
                downloads_used: 0,
                period_start: now,
                exhausted_at: None,
            },
        }
    }

    /// §4.5: "Before each download attempt, check_download_allowed consults
    /// the provider's quota state." A `daily_limit` of 0 means unlimited.
    pub fn check(&self, provider_key: &str, settings: &QuotaSettings, now: DateTime<Utc>) -> QuotaDecision {
        if !settings.enabled || settings.daily_limit == 0 {
            return QuotaDecision::Allowed;
        }
        let state = self.current_or_fresh(provider_key, settings, now);
        if state.downloads_used >= state.daily_limit {
            QuotaDecision::Exhausted
        } else {
            QuotaDecision::Allowed
        }
    }

    /// Records a successful download against the provider's quota,
    /// persisting the (possibly just rolled-over) period.
    pub fn record_download(&self, provider_key: &str, settings: &QuotaSettings, now: DateTime<Utc>) -> Result<QuotaState, StateError> {
        let mut state = self.current_or_fresh(provider_key, settings, now);
        state.downloads_used += 1;
        if settings.enabled && settings.daily_limit > 0 && state.downloads_used >= state.daily_limit {
            state.exhausted_at = Some(now);
        }
        self.store.put_quota(state.clone())?;
        Ok(state)
    }

    /// Reports when the current quota period ends, for the `--quota-status`
    /// CLI command and for `ProviderError::QuotaDeferred`'s `reset_time`.
    pub fn reset_time(&self, provider_key: &str) -> Option<DateTime<Utc>> {
        let state = self.store.get_quota(provider_key)?;
        Some(state.period_start + period_duration(state.reset_hours))
    }

    /// Manually resets one provider's quota (the `reset-quota` subcommand).
    pub fn reset(&self, provider_key: &str) -> Result<bool, StateError> {
        self.store.remove_quota(provider_key)
    }

    /// Manually resets every tracked provider's quota (`reset-quota --all`).
    pub fn reset_all(&self) -> Result<(), StateError> {
        self.store.clear_all_quotas()
    }

    pub fn snapshot(&self) -> Vec<QuotaState> {
        self.store.all_quotas()
    }
}

fn period_duration(reset_hours: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((reset_hours.max(0.0) * 3_600_000.0) as i64)
}

fn period_elapsed(state: &QuotaState, settings: &QuotaSettings, now: DateTime<Utc>) -> bool {
    let reset_hours = if settings.reset_hours > 0.0 {
        settings.reset_hours
    } else {
        state.reset_hours
    };
    now >= state.period_start + period_duration(reset_hours)
}
