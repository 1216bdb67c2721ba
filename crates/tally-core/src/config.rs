//! Engine configuration
//!
//! Thresholds, cache lifetime, preload batch size and the word tables used by
//! the normalizer and pattern extraction.
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/tally/config/engine.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Keys missing from an override keep their default value.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

/// Stop words used when no config provides any
const BUILTIN_STOP_WORDS: &[&str] = &["tienda", "pago", "compra", "sucursal", "comercio"];

/// A canonical merchant name and the spellings that map to it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MerchantSynonym {
    pub canonical: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Minimum edit similarity for a FUZZY match
    pub fuzzy_min_similarity: f64,
    /// Suggestions below this confidence are reported as NONE
    pub acceptance_floor: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fuzzy_min_similarity: 0.6,
            acceptance_floor: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerConfig {
    pub stop_words: Vec<String>,
    /// Scanned in order; the first entry matching a span wins
    pub synonyms: Vec<MerchantSynonym>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            stop_words: BUILTIN_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
            synonyms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Tokens at least this long are learned as patterns on their own
    pub min_token_len: usize,
    pub merchant_prefixes: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_token_len: 4,
            merchant_prefixes: Vec::new(),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub cache_ttl: Duration,
    /// How many candidates the preloader keeps ready
    pub preload_batch_size: usize,
    pub normalizer: NormalizerConfig,
    pub extraction: ExtractionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            cache_ttl: Duration::from_secs(300),
            preload_batch_size: 10,
            normalizer: NormalizerConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from the override location, falling back to embedded defaults
    pub fn load() -> Result<Self> {
        load_config(None)
    }

    /// Load from an explicit override path
    pub fn from_path(path: &Path) -> Result<Self> {
        load_config(Some(path))
    }

    /// The embedded defaults, ignoring any override file
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG)
    }

    /// Check invariants the normalizer relies on
    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        if !(0.0..=1.0).contains(&c.fuzzy_min_similarity) {
            return Err(Error::Config(format!(
                "fuzzy_min_similarity must be within [0, 1], got {}",
                c.fuzzy_min_similarity
            )));
        }
        if !(0.0..=1.0).contains(&c.acceptance_floor) {
            return Err(Error::Config(format!(
                "acceptance_floor must be within [0, 1], got {}",
                c.acceptance_floor
            )));
        }
        if self.preload_batch_size == 0 {
            return Err(Error::Config("preload batch_size must be > 0".to_string()));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::Config("cache ttl_secs must be > 0".to_string()));
        }

        for word in &self.normalizer.stop_words {
            if !is_clean_token(word) {
                return Err(Error::Config(format!(
                    "stop word '{}' must be a single lowercase [a-z0-9] token",
                    word
                )));
            }
        }
        let stop_words: HashSet<&str> = self
            .normalizer
            .stop_words
            .iter()
            .map(|s| s.as_str())
            .collect();

        let all_variants: Vec<Vec<&str>> = self
            .normalizer
            .synonyms
            .iter()
            .flat_map(|s| s.variants.iter())
            .map(|v| v.split(' ').collect())
            .collect();

        for synonym in &self.normalizer.synonyms {
            if !is_clean_phrase(&synonym.canonical) {
                return Err(Error::Config(format!(
                    "canonical merchant '{}' is not normalized",
                    synonym.canonical
                )));
            }
            let canonical: Vec<&str> = synonym.canonical.split(' ').collect();
            if let Some(word) = canonical.iter().find(|t| stop_words.contains(*t)) {
                return Err(Error::Config(format!(
                    "canonical merchant '{}' contains stop word '{}'",
                    synonym.canonical, word
                )));
            }
            for variant in &synonym.variants {
                if !is_clean_phrase(variant) {
                    return Err(Error::Config(format!(
                        "variant '{}' of '{}' is not normalized",
                        variant, synonym.canonical
                    )));
                }
            }
            if let Some(variant) = all_variants
                .iter()
                .find(|v| contains_tokens(&canonical, v))
            {
                return Err(Error::Config(format!(
                    "canonical merchant '{}' contains variant '{}'",
                    synonym.canonical,
                    variant.join(" ")
                )));
            }
        }

        for prefix in &self.extraction.merchant_prefixes {
            if !is_clean_token(prefix) {
                return Err(Error::Config(format!(
                    "merchant prefix '{}' must be a single lowercase [a-z0-9] token",
                    prefix
                )));
            }
        }

        Ok(())
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("engine.toml"))
}

/// Load configuration (override first, then default)
fn load_config(override_path: Option<&Path>) -> Result<EngineConfig> {
    let path = match override_path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };

    let defaults = parse_config(DEFAULT_CONFIG)?;
    match path {
        Some(ref path) if path.exists() => {
            debug!("Loading engine config from {}", path.display());
            let content = fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
            parse_layer(defaults, &content)
        }
        _ => Ok(defaults),
    }
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    classifier: Option<RawClassifier>,
    cache: Option<RawCache>,
    preload: Option<RawPreload>,
    normalizer: Option<RawNormalizer>,
    extraction: Option<RawExtraction>,
}

#[derive(Debug, Deserialize)]
struct RawClassifier {
    fuzzy_min_similarity: Option<f64>,
    acceptance_floor: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCache {
    ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPreload {
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawNormalizer {
    stop_words: Option<Vec<String>>,
    synonyms: Option<Vec<MerchantSynonym>>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    min_token_len: Option<usize>,
    merchant_prefixes: Option<Vec<String>>,
}

/// Parse config from TOML content over built-in defaults and validate it
fn parse_config(content: &str) -> Result<EngineConfig> {
    parse_layer(EngineConfig::default(), content)
}

/// Apply the keys present in `content` on top of `base`
fn parse_layer(base: EngineConfig, content: &str) -> Result<EngineConfig> {
    let raw: RawConfig = toml::from_str(content)?;

    let mut config = base;

    if let Some(classifier) = raw.classifier {
        if let Some(min) = classifier.fuzzy_min_similarity {
            config.classifier.fuzzy_min_similarity = min;
        }
        if let Some(floor) = classifier.acceptance_floor {
            config.classifier.acceptance_floor = floor;
        }
    }

    if let Some(ttl) = raw.cache.and_then(|c| c.ttl_secs) {
        config.cache_ttl = Duration::from_secs(ttl);
    }

    if let Some(batch) = raw.preload.and_then(|p| p.batch_size) {
        config.preload_batch_size = batch;
    }

    if let Some(normalizer) = raw.normalizer {
        if let Some(words) = normalizer.stop_words {
            config.normalizer.stop_words = words;
        }
        if let Some(synonyms) = normalizer.synonyms {
            config.normalizer.synonyms = synonyms;
        }
    }

    if let Some(extraction) = raw.extraction {
        if let Some(len) = extraction.min_token_len {
            config.extraction.min_token_len = len;
        }
        if let Some(prefixes) = extraction.merchant_prefixes {
            config.extraction.merchant_prefixes = prefixes;
        }
    }

    config.validate()?;
    Ok(config)
}

fn is_clean_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn is_clean_phrase(s: &str) -> bool {
    !s.is_empty() && s.split(' ').all(is_clean_token)
}

/// Token-boundary containment of `needle` in `haystack`
fn contains_tokens(haystack: &[&str], needle: &[&str]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
