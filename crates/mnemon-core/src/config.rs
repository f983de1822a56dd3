//! Engine configuration
//!
//! A single record recognised by the whole engine. Every field has a
//! serde default so a partial JSON file (or none at all) works, and two
//! environment variables override the file: `MNEMON_DB_PATH` for the
//! store location and `MNEMON_EMBED_URL` for the embedding oracle.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Environment override for the store path
pub const ENV_DB_PATH: &str = "MNEMON_DB_PATH";
/// Environment override for the embedding oracle base URL
pub const ENV_EMBED_URL: &str = "MNEMON_EMBED_URL";

// ============================================================================
// CONFIG RECORD
// ============================================================================

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MnemonConfig {
    /// Filesystem path to the store; platform data dir when unset
    pub db_path: Option<PathBuf>,
    /// Model identifier sent to the embedding oracle
    pub embed_model: String,
    /// Base URL of the embedding oracle
    #[serde(alias = "ollamaUrl")]
    pub embed_url: String,
    /// Vector dimension the oracle produces
    pub embed_dimensions: usize,
    /// Token budget for retrieval
    pub max_context_tokens: usize,
    /// Cap on selected entries
    pub max_entries: usize,
    /// Weight of cosine similarity in the combined score
    pub semantic_weight: f64,
    /// Weight of normalised activation in the combined score
    pub activation_weight: f64,
    /// Bonus applied when a domain hint matches
    pub domain_weight: f64,
    /// Decay settings
    pub decay: DecayConfig,
    /// TTL of the query-embedding cache in milliseconds
    pub embedding_cache_ttl_ms: u64,
}

/// Decay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecayConfig {
    /// Multiplicative factor per scheduled invocation
    pub daily_factor: f64,
    /// Advisory reporting threshold; the engine never deletes
    pub prune_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            daily_factor: 0.9995,
            prune_threshold: 0.05,
        }
    }
}

impl Default for MnemonConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            embed_model: "nomic-embed-text".to_string(),
            embed_url: "http://127.0.0.1:11434".to_string(),
            embed_dimensions: 768,
            max_context_tokens: 800,
            max_entries: 20,
            semantic_weight: 0.6,
            activation_weight: 0.3,
            domain_weight: 0.1,
            decay: DecayConfig::default(),
            embedding_cache_ttl_ms: 300_000,
        }
    }
}

impl MnemonConfig {
    /// Load configuration from an optional JSON file, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    MemoryError::ConfigInvalid(format!("cannot read {}: {}", p.display(), e))
                })?;
                serde_json::from_str::<MnemonConfig>(&raw).map_err(|e| {
                    MemoryError::ConfigInvalid(format!("cannot parse {}: {}", p.display(), e))
                })?
            }
            None => MnemonConfig::default(),
        };

        if let Ok(db) = std::env::var(ENV_DB_PATH) {
            if !db.is_empty() {
                config.db_path = Some(PathBuf::from(db));
            }
        }
        if let Ok(url) = std::env::var(ENV_EMBED_URL) {
            if !url.is_empty() {
                config.embed_url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if self.embed_dimensions == 0 {
            return Err(MemoryError::ConfigInvalid(
                "embedDimensions must be positive".to_string(),
            ));
        }
        if self.max_context_tokens == 0 {
            return Err(MemoryError::ConfigInvalid(
                "maxContextTokens must be positive".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(MemoryError::ConfigInvalid(
                "maxEntries must be positive".to_string(),
            ));
        }
        for (name, w) in [
            ("semanticWeight", self.semantic_weight),
            ("activationWeight", self.activation_weight),
            ("domainWeight", self.domain_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(MemoryError::ConfigInvalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, w
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.decay.daily_factor) {
            return Err(MemoryError::ConfigInvalid(format!(
                "decay.dailyFactor must be between 0 and 1, got {}",
                self.decay.daily_factor
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
