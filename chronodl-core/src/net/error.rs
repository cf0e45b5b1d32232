//! Error taxonomy for C4/C5 (§7's "Network transient" / "Network permanent"
//! / "Content validation failure" rows).
//!
//! Grounded on the teacher's `download/error.rs`: context fields required on
//! every variant, no blanket `From<reqwest::Error>` / `From<io::Error>` since
//! the URL or path context would otherwise be lost at the call site.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network error requesting {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: u16,
        retry_after: Option<String>,
    },

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("content at {url} failed validation: {reason}")]
    ContentRejected { url: String, reason: String },
}

impl NetworkError {
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        NetworkError::Transport { url: url.into(), source }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        NetworkError::Timeout { url: url.into() }
    }

    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        NetworkError::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        NetworkError::Io { path: path.into(), source }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        NetworkError::InvalidUrl { url: url.into() }
    }

    pub fn content_rejected(url: impl Into<String>, reason: impl Into<String>) -> Self {
        NetworkError::ContentRejected {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// The HTTP status this error carries, if any — used by `net::retry` to
    /// classify transient vs permanent failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
