//! Builds the provider registry at startup, skipping adapters whose
//! required API key is absent (§6) rather than failing the run.
//!
//! Grounded on the teacher's `resolver::build_default_resolver_registry`:
//! construct in priority order, `warn!` and continue on a construction
//! failure.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;

use super::providers::{
    annas_archive::AnnasArchive, bnf_gallica::BnfGallica, ddb::Ddb, dpla::Dpla, europeana::Europeana,
    google_books::GoogleBooks, internet_archive::InternetArchive, loc::Loc,
};
use super::Provider;

/// A read-only map from provider key to its implementation, built once at
/// startup and shared (via `Arc`) across the pipeline and scheduler.
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn get(&self, key: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(key).cloned()
    }

    pub fn display_name(&self, key: &str) -> Option<&'static str> {
        self.providers.get(key).map(|p| p.display_name())
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    fn insert(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.key(), provider);
    }

    /// Builds a registry directly from a fixed set of providers, bypassing
    /// config-driven enablement and API-key checks. Used by integration
    /// tests that exercise the pipeline against fake providers.
    pub fn from_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        let mut registry = ProviderRegistry {
            providers: HashMap::new(),
        };
        for provider in providers {
            registry.insert(provider);
        }
        registry
    }
}

/// Constructs every known provider adapter, omitting any whose
/// `required_env_var` is unset in the process environment — matching §6:
/// "provider omitted from the run if missing."
pub fn build_default_registry(config: &Config) -> ProviderRegistry {
    let mut registry = ProviderRegistry {
        providers: HashMap::new(),
    };

    let candidates: Vec<Arc<dyn Provider>> = vec![
        Arc::new(InternetArchive::new()),
        Arc::new(BnfGallica::new()),
        Arc::new(Loc::new()),
        Arc::new(Europeana::new()),
        Arc::new(Dpla::new()),
        Arc::new(Ddb::new()),
        Arc::new(GoogleBooks::new()),
        Arc::new(AnnasArchive::new()),
    ];

    for provider in candidates {
        if !config.is_provider_enabled(provider.key()) {
            continue;
        }
        if let Some(var) = provider.required_env_var() {
            if std::env::var(var).is_err() {
                tracing::warn!(provider = provider.key(), env_var = var, "required API key missing, omitting provider");
                continue;
            }
        }
        registry.insert(provider);
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== build_default_registry ====

    #[test]
    fn omits_disabled_providers() {
        let config = Config::default();
        let registry = build_default_registry(&config);
        assert!(registry.get("internet_archive").is_none());
    }

    #[test]
    fn includes_enabled_provider_without_key_requirement() {
        let mut config = Config::default();
        config.providers.insert("internet_archive".to_string(), true);
        let registry = build_default_registry(&config);
        assert!(registry.get("internet_archive").is_some());
    }

    #[test]
    fn omits_enabled_provider_missing_its_api_key() {
        std::env::remove_var("EUROPEANA_API_KEY");
        let mut config = Config::default();
        config.providers.insert("europeana".to_string(), true);
        let registry = build_default_registry(&config);
        assert!(registry.get("europeana").is_none());
    }
}
