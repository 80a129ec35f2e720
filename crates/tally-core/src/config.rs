//! Runtime configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for an override file (e.g. ~/.local/share/tally/config/tally.toml)
//! 2. Fall back to embedded defaults (compiled into the binary)
//!
//! Every key is optional in the override file; missing keys take the
//! embedded default.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level runtime configuration for the core.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub fx: FxConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classifier: ClassifierWeights,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl CoreConfig {
    /// Load the embedded defaults.
    pub fn load() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from an override file if it exists, else the embedded defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
        } else {
            Self::load()
        }
    }
}

/// Sync orchestrator timings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Debounce window for mutation-triggered auto-sync (milliseconds).
    pub debounce_ms: u64,
    /// Overall budget for one pull -> merge -> push cycle, across retries.
    pub budget_secs: u64,
    /// Backoff schedule for transient-error retries.
    pub retry_backoff_ms: Vec<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            budget_secs: 30,
            retry_backoff_ms: vec![500, 1000, 1500],
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    pub fn backoff(&self, attempt: usize) -> Option<Duration> {
        self.retry_backoff_ms
            .get(attempt)
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Attempts = initial try + one per backoff step.
    pub fn max_attempts(&self) -> usize {
        self.retry_backoff_ms.len() + 1
    }
}

/// FX provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    pub cache_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
    /// `{from}` is substituted with the base currency.
    pub endpoint: String,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 1800,
            fetch_timeout_secs: 5,
            endpoint: "https://api.exchangerate-api.com/v4/latest/{from}".to_string(),
        }
    }
}

impl FxConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Read-cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 120 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Classifier scoring weights. The defaults are normative; deployments may
/// tune them through the override file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierWeights {
    pub book_semantic_weight: f64,
    pub book_merchant_weight: f64,
    pub book_amount_weight: f64,
    pub book_recency_weight: f64,
    pub book_currency_weight: f64,
    pub category_semantic_weight: f64,
    pub category_name_weight: f64,
    /// Category score when a merchant mapping fires.
    pub merchant_override_score: f64,
    /// Category score when a learning-data pattern fires.
    pub learning_override_score: f64,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            book_semantic_weight: 30.0,
            book_merchant_weight: 30.0,
            book_amount_weight: 20.0,
            book_recency_weight: 15.0,
            book_currency_weight: 5.0,
            category_semantic_weight: 70.0,
            category_name_weight: 30.0,
            merchant_override_score: 90.0,
            learning_override_score: 85.0,
        }
    }
}

/// Optional LLM classification step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub host: String,
    pub model: String,
    /// Predictions below this confidence fall through to local scoring.
    pub min_confidence: f64,
    pub timeout_secs: u64,
    /// Recent approved entries included as few-shot examples.
    pub few_shot_entries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            min_confidence: 0.75,
            timeout_secs: 10,
            few_shot_entries: 5,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let config = CoreConfig::load().unwrap();
        assert_eq!(config.sync.debounce_ms, 2000);
        assert_eq!(config.sync.budget_secs, 30);
        assert_eq!(config.sync.retry_backoff_ms, vec![500, 1000, 1500]);
        assert_eq!(config.fx.cache_ttl_secs, 1800);
        assert_eq!(config.cache.ttl_secs, 120);
        assert!(!config.llm.enabled);
    }

    #[test]
    fn embedded_matches_code_defaults() {
        // The file and the serde defaults must agree, or an override file
        // that omits a section would silently change behavior.
        let from_file = CoreConfig::load().unwrap();
        let from_code = CoreConfig::default();
        assert_eq!(from_file.sync.debounce_ms, from_code.sync.debounce_ms);
        assert_eq!(
            from_file.classifier.book_semantic_weight,
            from_code.classifier.book_semantic_weight
        );
        assert_eq!(from_file.llm.min_confidence, from_code.llm.min_confidence);
    }

    #[test]
    fn partial_override_keeps_defaults() {
        let config: CoreConfig = toml::from_str(
            r#"
            [sync]
            debounce_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.debounce_ms, 500);
        // Untouched keys keep defaults
        assert_eq!(config.sync.budget_secs, 30);
        assert_eq!(config.cache.ttl_secs, 120);
    }

    #[test]
    fn backoff_schedule_exhausts() {
        let sync = SyncConfig::default();
        assert_eq!(sync.backoff(0), Some(Duration::from_millis(500)));
        assert_eq!(sync.backoff(2), Some(Duration::from_millis(1500)));
        assert_eq!(sync.backoff(3), None);
        assert_eq!(sync.max_attempts(), 4);
    }

    #[test]
    fn classifier_weights_sum_to_100() {
        let w = ClassifierWeights::default();
        let book_sum = w.book_semantic_weight
            + w.book_merchant_weight
            + w.book_amount_weight
            + w.book_recency_weight
            + w.book_currency_weight;
        assert_eq!(book_sum, 100.0);
        assert_eq!(w.category_semantic_weight + w.category_name_weight, 100.0);
    }
}
