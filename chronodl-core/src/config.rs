//! C1 — config store: a single cached read of the hierarchical configuration
//! document, with provider-scoped sub-views and defaults.
//!
//! Grounded on the teacher's `app_config.rs` / `app/config_manager.rs`:
//! one `serde`-deserialised struct read once at startup, cached behind an
//! `Arc`, config path resolved from an env var with a default fallback and
//! graceful degradation to defaults on any load failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the config document path (§6).
pub const CONFIG_PATH_ENV: &str = "CHRONO_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "./config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    SequentialFirstHit,
    CollectAndSelect,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::CollectAndSelect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStrategy {
    SelectedOnly,
    All,
}

impl Default for DownloadStrategy {
    fn default() -> Self {
        DownloadStrategy::SelectedOnly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    ReprocessAll,
    SkipCompleted,
    SkipIfHasObjects,
}

impl Default for ResumeMode {
    fn default() -> Self {
        ResumeMode::SkipCompleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExceed {
    Skip,
    Stop,
}

impl Default for OnExceed {
    fn default() -> Self {
        OnExceed::Skip
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub delay_ms: u64,
    pub jitter_ms: u64,
    pub max_attempts: u32,
    pub base_backoff_s: f64,
    pub backoff_multiplier: f64,
    pub max_backoff_s: f64,
    pub verify_ssl: bool,
    pub circuit_breaker_enabled: bool,
    pub headers: HashMap<String, String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            delay_ms: 1000,
            jitter_ms: 250,
            max_attempts: 3,
            base_backoff_s: 1.0,
            backoff_multiplier: 2.0,
            max_backoff_s: 32.0,
            verify_ssl: true,
            circuit_breaker_enabled: true,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    pub enabled: bool,
    pub daily_limit: u32,
    pub reset_hours: f64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        QuotaSettings {
            enabled: false,
            daily_limit: 0,
            reset_hours: 24.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub max_results: u32,
    /// 0 or absent means unlimited (see spec.md §9 open question on `max_pages`).
    pub max_pages: u32,
    pub min_title_score: f64,
    pub network: NetworkSettings,
    pub quota: QuotaSettings,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            max_results: 10,
            max_pages: 0,
            min_title_score: 70.0,
            network: NetworkSettings::default(),
            quota: QuotaSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub strategy: SelectionStrategy,
    pub provider_hierarchy: Vec<String>,
    pub min_title_score: f64,
    pub creator_weight: f64,
    pub max_candidates_per_provider: u32,
    pub download_strategy: DownloadStrategy,
    pub keep_non_selected_metadata: bool,
    pub max_parallel_searches: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            strategy: SelectionStrategy::default(),
            provider_hierarchy: Vec::new(),
            min_title_score: 70.0,
            creator_weight: 0.2,
            max_candidates_per_provider: 5,
            download_strategy: DownloadStrategy::default(),
            keep_non_selected_metadata: true,
            max_parallel_searches: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub prefer_pdf_over_images: bool,
    pub download_manifest_renderings: bool,
    pub max_renderings_per_manifest: u32,
    pub rendering_mime_whitelist: Vec<String>,
    pub overwrite_existing: bool,
    pub include_metadata: bool,
    pub resume_mode: ResumeMode,
    pub max_parallel_downloads: usize,
    pub provider_concurrency: HashMap<String, usize>,
    pub default_provider_concurrency: usize,
    pub worker_timeout_s: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            prefer_pdf_over_images: true,
            download_manifest_renderings: true,
            max_renderings_per_manifest: 1,
            rendering_mime_whitelist: vec!["application/pdf".to_string(), "application/epub+zip".to_string()],
            overwrite_existing: false,
            include_metadata: true,
            resume_mode: ResumeMode::default(),
            max_parallel_downloads: 4,
            provider_concurrency: HashMap::new(),
            default_provider_concurrency: 2,
            worker_timeout_s: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ByteLimits {
    pub images_gb: f64,
    pub pdfs_gb: f64,
    pub metadata_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadLimitsConfig {
    pub total: ByteLimits,
    pub per_work: ByteLimits,
    pub on_exceed: OnExceed,
}

impl Default for DownloadLimitsConfig {
    fn default() -> Self {
        DownloadLimitsConfig {
            total: ByteLimits::default(),
            per_work: ByteLimits::default(),
            on_exceed: OnExceed::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredConfig {
    pub state_file: String,
    pub background_enabled: bool,
    pub check_interval_minutes: f64,
    pub max_retries: u32,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        DeferredConfig {
            state_file: ".downloader_state.json".to_string(),
            background_enabled: true,
            check_interval_minutes: 15.0,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub interactive_mode: bool,
    pub default_output_dir: String,
    pub default_csv_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            interactive_mode: false,
            default_output_dir: "./output".to_string(),
            default_csv_path: "./input.csv".to_string(),
        }
    }
}

/// The full configuration document (§6). Every field defaults to an empty /
/// disabled state so a missing or malformed config file never blocks a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: HashMap<String, bool>,
    pub provider_settings: HashMap<String, ProviderSettings>,
    pub selection: SelectionConfig,
    pub download: DownloadConfig,
    pub download_limits: DownloadLimitsConfig,
    pub deferred: DeferredConfig,
    pub general: GeneralConfig,
}

impl Config {
    /// Resolves the config path per §6: `CHRONO_CONFIG_PATH` env var, else
    /// `./config.json`.
    pub fn resolve_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Loads the config document. A missing file or parse failure yields
    /// `Config::default()` rather than an error — per §7, "Config parse
    /// failure ⇒ empty config, execution continues."
    pub fn load() -> Config {
        let path = Self::resolve_path();
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "config load failed, using defaults");
                Config::default()
            }
        }
    }

    /// Reads and parses a config document from an explicit path, returning
    /// the underlying error instead of silently defaulting. Used by `load`
    /// and directly by tests that want to assert on failure modes.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether `provider_key` is enabled. Providers absent from the
    /// `providers` map are treated as disabled.
    pub fn is_provider_enabled(&self, provider_key: &str) -> bool {
        self.providers.get(provider_key).copied().unwrap_or(false)
    }

    /// Provider-scoped settings, falling back to defaults for providers with
    /// no explicit entry.
    pub fn provider_settings(&self, provider_key: &str) -> ProviderSettings {
        self.provider_settings
            .get(provider_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Providers enabled in the run, reordered so that entries named in
    /// `selection.provider_hierarchy` come first (in hierarchy order);
    /// unlisted enabled providers follow in unspecified (map iteration)
    /// order, matching the `+∞` priority rule of §3's candidate ranking key.
    pub fn ordered_enabled_providers(&self) -> Vec<String> {
        let mut ordered: Vec<String> = Vec::new();
        for key in &self.selection.provider_hierarchy {
            if self.is_provider_enabled(key) {
                ordered.push(key.clone());
            }
        }
        for (key, enabled) in &self.providers {
            if *enabled && !ordered.contains(key) {
                ordered.push(key.clone());
            }
        }
        ordered
    }

    /// The priority index of `provider_key` in the user-supplied hierarchy,
    /// or `usize::MAX` for unlisted providers (the "+∞" rule of §3).
    pub fn provider_priority(&self, provider_key: &str) -> usize {
        self.selection
            .provider_hierarchy
            .iter()
            .position(|k| k == provider_key)
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ==== path resolution ====

    #[test]
    fn resolve_path_defaults_without_env() {
        // SAFETY(tests are single-threaded in this module): isolate this test's
        // env mutation like the teacher's RestoreEnv pattern.
        struct RestoreEnv(Option<String>);
        impl Drop for RestoreEnv {
            fn drop(&mut self) {
                match &self.0 {
                    Some(v) => std::env::set_var(CONFIG_PATH_ENV, v),
                    None => std::env::remove_var(CONFIG_PATH_ENV),
                }
            }
        }
        let prior = std::env::var(CONFIG_PATH_ENV).ok();
        let _restore = RestoreEnv(prior);
        std::env::remove_var(CONFIG_PATH_ENV);
        assert_eq!(Config::resolve_path(), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    // ==== load ====

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/path/config.json")).unwrap();
        assert!(config.providers.is_empty());
        assert_eq!(config.selection.creator_weight, 0.2);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not valid json").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_falls_back_to_defaults_on_parse_failure() {
        std::env::set_var(CONFIG_PATH_ENV, "/nonexistent/path/config.json");
        let config = Config::load();
        assert!(config.providers.is_empty());
        std::env::remove_var(CONFIG_PATH_ENV);
    }

    #[test]
    fn parses_minimal_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"providers": {{"internet_archive": true}}, "selection": {{"provider_hierarchy": ["internet_archive"]}}}}"#
        )
        .unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert!(config.is_provider_enabled("internet_archive"));
        assert!(!config.is_provider_enabled("loc"));
        assert_eq!(config.provider_priority("internet_archive"), 0);
        assert_eq!(config.provider_priority("loc"), usize::MAX);
    }

    // ==== ordering ====

    #[test]
    fn ordered_enabled_providers_respects_hierarchy_then_unlisted() {
        let mut config = Config::default();
        config.providers.insert("bnf_gallica".to_string(), true);
        config.providers.insert("internet_archive".to_string(), true);
        config.providers.insert("loc".to_string(), false);
        config.selection.provider_hierarchy = vec!["internet_archive".to_string()];

        let ordered = config.ordered_enabled_providers();
        assert_eq!(ordered[0], "internet_archive");
        assert!(ordered.contains(&"bnf_gallica".to_string()));
        assert!(!ordered.contains(&"loc".to_string()));
    }
}
