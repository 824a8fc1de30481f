//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use spritenav_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from the defaults with the disk tier off and no confidence floor,
/// so every generated hint is visible.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .strategies(&["linear", "pattern"])
///     .max_hints(5)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.cache.disk_enabled = false;
        config.navigator.min_confidence = 0.0;
        Self { config }
    }

    pub fn disk_cache(mut self, dir: &str) -> Self {
        self.config.cache.disk_enabled = true;
        self.config.cache.cache_dir = dir.to_string();
        self
    }

    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.config.cache.memory_capacity = capacity;
        self
    }

    /// Enable exactly `names`; the first becomes the default.
    pub fn strategies(mut self, names: &[&str]) -> Self {
        self.config.strategies.enabled = names.iter().map(|n| n.to_string()).collect();
        if let Some(first) = names.first() {
            self.config.strategies.default = first.to_string();
        }
        self
    }

    pub fn max_hints(mut self, max: usize) -> Self {
        self.config.navigator.max_hints = max;
        self
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.config.navigator.min_confidence = min;
        self
    }

    pub fn blob_size(mut self, size: u64) -> Self {
        self.config.index.default_blob_size = size;
        self
    }

    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.config.intelligence.similarity_threshold = threshold;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
