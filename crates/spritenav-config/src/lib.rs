#![deny(unsafe_code)]

//! Configuration loading and validation for SpriteNav.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure; every section falls back to defaults so
//! an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use spritenav_macros::Validate;

/// Strategy names the engine ships with.
pub const KNOWN_STRATEGIES: [&str; 4] = ["linear", "pattern", "similarity", "hybrid"];

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Spatial index configuration.
    #[serde(default)]
    pub index: IndexConfig,

    /// Multi-tier cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Pattern analysis and similarity tuning.
    #[serde(default)]
    pub intelligence: IntelligenceConfig,

    /// Strategy selection and weighting.
    #[serde(default)]
    pub strategies: StrategiesConfig,

    /// Navigator (query orchestration) configuration.
    #[serde(default)]
    pub navigator: NavigatorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Spatial index configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IndexConfig {
    /// Blob size assumed for sources opened without an explicit size.
    /// Zero means unknown (coverage ratio and density map stay empty).
    #[serde(default)]
    pub default_blob_size: u64,

    /// Bucket width of the density histogram in bytes.
    #[serde(default = "default_density_bucket")]
    #[validate(non_zero)]
    pub density_bucket: u64,

    /// Smallest free span between objects the sequential strategy treats
    /// as unexplored.
    #[serde(default = "default_gap_min_size")]
    #[validate(non_zero)]
    pub gap_min_size: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            default_blob_size: 0,
            density_bucket: default_density_bucket(),
            gap_min_size: default_gap_min_size(),
        }
    }
}

fn default_density_bucket() -> u64 {
    0x10000
}

fn default_gap_min_size() -> u64 {
    100
}

/// Multi-tier cache configuration.
///
/// ## TOML Example
///
/// ```toml
/// [cache]
/// memory_capacity = 500
/// disk_enabled = true
/// disk_capacity = 5000
/// cache_dir = ".spritenav/cache"
/// maintenance_interval_secs = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    /// Maximum entries held by the in-memory tier.
    #[serde(default = "default_memory_capacity")]
    #[validate(non_zero)]
    pub memory_capacity: usize,

    /// Whether the persistent (disk) tier is enabled.
    #[serde(default = "default_true")]
    pub disk_enabled: bool,

    /// Maximum entries held by the disk tier.
    #[serde(default = "default_disk_capacity")]
    #[validate(non_zero)]
    pub disk_capacity: usize,

    /// Directory for the disk tier's payload and index files.
    #[serde(default = "default_cache_dir")]
    #[validate(non_empty)]
    pub cache_dir: String,

    /// Interval between background maintenance passes.
    #[serde(default = "default_maintenance_interval")]
    #[validate(range(min = 1, max = 3600))]
    pub maintenance_interval_secs: u64,

    /// Upper bound on waiting for background tasks at shutdown.
    #[serde(default = "default_shutdown_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub shutdown_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            disk_enabled: true,
            disk_capacity: default_disk_capacity(),
            cache_dir: default_cache_dir(),
            maintenance_interval_secs: default_maintenance_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_memory_capacity() -> usize {
    500
}

fn default_disk_capacity() -> usize {
    5000
}

fn default_cache_dir() -> String {
    ".spritenav/cache".to_string()
}

fn default_maintenance_interval() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    5
}

/// Pattern analysis and similarity tuning.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IntelligenceConfig {
    /// Minimum similarity for two objects to count as alike.
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f64,

    /// Fraction of offsets that must share an alignment for it to be reported.
    #[serde(default = "default_alignment_min_fraction")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub alignment_min_fraction: f64,

    /// Bucket density above which a bucket is flagged high-density.
    #[serde(default = "default_high_density_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub high_density_threshold: f64,

    /// Bucket width used by region analysis.
    #[serde(default = "default_region_bucket")]
    #[validate(non_zero)]
    pub region_bucket: u64,
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            alignment_min_fraction: default_alignment_min_fraction(),
            high_density_threshold: default_high_density_threshold(),
            region_bucket: default_region_bucket(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_alignment_min_fraction() -> f64 {
    0.3
}

fn default_high_density_threshold() -> f64 {
    0.1
}

fn default_region_bucket() -> u64 {
    0x10000
}

/// Strategy selection and weighting.
///
/// ## TOML Example
///
/// ```toml
/// [strategies]
/// enabled = ["linear", "pattern", "hybrid"]
/// default = "hybrid"
/// linear_step = 64
///
/// [strategies.hybrid_weights]
/// linear = 0.3
/// pattern = 0.4
/// similarity = 0.3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StrategiesConfig {
    /// Strategy names enabled at startup.
    #[serde(default = "default_enabled_strategies")]
    #[validate(non_empty)]
    pub enabled: Vec<String>,

    /// Default strategy name.
    #[serde(default = "default_strategy")]
    #[validate(non_empty)]
    pub default: String,

    /// Base stride of the sequential strategy.
    #[serde(default = "default_linear_step")]
    #[validate(non_zero)]
    pub linear_step: u64,

    /// Initial blend weights of the hybrid strategy.
    #[serde(default)]
    pub hybrid_weights: HybridWeights,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_strategies(),
            default: default_strategy(),
            linear_step: default_linear_step(),
            hybrid_weights: HybridWeights::default(),
        }
    }
}

/// The three base strategies. `hybrid` wraps them, so enabling it next to
/// them runs each one twice per query.
fn default_enabled_strategies() -> Vec<String> {
    ["linear", "pattern", "similarity"].map(String::from).to_vec()
}

fn default_strategy() -> String {
    "linear".to_string()
}

fn default_linear_step() -> u64 {
    0x40
}

/// Initial blend weights of the hybrid strategy. Renormalized at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HybridWeights {
    #[serde(default = "default_linear_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub linear: f64,

    #[serde(default = "default_pattern_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub pattern: f64,

    #[serde(default = "default_similarity_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            linear: default_linear_weight(),
            pattern: default_pattern_weight(),
            similarity: default_similarity_weight(),
        }
    }
}

fn default_linear_weight() -> f64 {
    0.3
}

fn default_pattern_weight() -> f64 {
    0.4
}

fn default_similarity_weight() -> f64 {
    0.3
}

/// Navigator (query orchestration) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NavigatorConfig {
    /// Default number of predictions returned per query.
    #[serde(default = "default_max_hints")]
    #[validate(range(min = 1, max = 100))]
    pub max_hints: usize,

    /// Predictions below this confidence are filtered out.
    #[serde(default = "default_min_confidence")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_confidence: f64,

    /// Distance beyond which predictions receive a distance penalty.
    #[serde(default = "default_max_search_distance")]
    #[validate(non_zero)]
    pub max_search_distance: u64,

    /// Interval between background snapshot saves.
    #[serde(default = "default_persist_interval")]
    #[validate(range(min = 1, max = 86400))]
    pub persist_interval_secs: u64,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_hints: default_max_hints(),
            min_confidence: default_min_confidence(),
            max_search_distance: default_max_search_distance(),
            persist_interval_secs: default_persist_interval(),
        }
    }
}

fn default_max_hints() -> usize {
    10
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_max_search_distance() -> u64 {
    0x100000
}

fn default_persist_interval() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Fold derive-generated field errors into a single [`ConfigError`].
fn section_result(section: &str, result: Result<(), Vec<String>>) -> Result<(), ConfigError> {
    result.map_err(|errors| {
        let joined = errors
            .iter()
            .map(|e| format!("{section}.{e}"))
            .collect::<Vec<_>>()
            .join("; ");
        ConfigError::Validation(joined)
    })
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        section_result("index", self.index.validate())?;
        section_result("cache", self.cache.validate())?;
        section_result("intelligence", self.intelligence.validate())?;
        section_result("strategies", self.strategies.validate())?;
        section_result(
            "strategies.hybrid_weights",
            self.strategies.hybrid_weights.validate(),
        )?;
        section_result("navigator", self.navigator.validate())?;

        for (i, name) in self.strategies.enabled.iter().enumerate() {
            if !KNOWN_STRATEGIES.contains(&name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "strategies.enabled[{i}] must be one of {:?}, got {:?}",
                    KNOWN_STRATEGIES, name
                )));
            }
        }

        if !self.strategies.enabled.contains(&self.strategies.default) {
            return Err(ConfigError::Validation(format!(
                "strategies.default {:?} must be listed in strategies.enabled",
                self.strategies.default
            )));
        }

        let weights = &self.strategies.hybrid_weights;
        if weights.linear + weights.pattern + weights.similarity <= 0.0 {
            return Err(ConfigError::Validation(
                "strategies.hybrid_weights must not all be zero".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
