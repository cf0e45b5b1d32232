//! Error taxonomy for C6 providers. `QuotaDeferred` is the distinguished
//! variant spec.md §9 calls for: "a distinguished error variant of the
//! download return, not a thrown exception."

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::net::NetworkError;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider signalled quota exhaustion for this download (§4.1,
    /// §4.4 phase 2 step 3, §7). Caught only by the pipeline's phase 2.
    #[error("provider {provider_key} quota exhausted{}", reset_time.map(|t| format!(", resets at {t}")).unwrap_or_default())]
    QuotaDeferred {
        provider_key: String,
        reset_time: Option<DateTime<Utc>>,
    },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("provider {provider_key} is missing required configuration: {detail}")]
    Misconfigured { provider_key: String, detail: String },

    #[error("provider {provider_key} download failed: {detail}")]
    DownloadFailed { provider_key: String, detail: String },
}

impl ProviderError {
    pub fn quota_deferred(provider_key: impl Into<String>, reset_time: Option<DateTime<Utc>>) -> Self {
        ProviderError::QuotaDeferred {
            provider_key: provider_key.into(),
            reset_time,
        }
    }

    pub fn download_failed(provider_key: impl Into<String>, detail: impl Into<String>) -> Self {
        ProviderError::DownloadFailed {
            provider_key: provider_key.into(),
            detail: detail.into(),
        }
    }

    pub fn is_quota_deferred(&self) -> bool {
        matches!(self, ProviderError::QuotaDeferred { .. })
    }
}
