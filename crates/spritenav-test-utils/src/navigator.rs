//! Navigator test helpers.
//!
//! Helpers for constructing [`Navigator`] instances in tests with a disk
//! cache rooted in a temporary directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use spritenav_config::AppConfig;
use spritenav_core::Navigator;
use tempfile::TempDir;

use crate::config::TestConfigBuilder;

/// A test-scoped navigator with an owned temp directory for its disk cache.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestNavigator {
    pub navigator: Arc<Navigator>,
    pub cache_dir: PathBuf,
    temp_dir: TempDir,
}

impl TestNavigator {
    /// Navigator built from `builder` with the disk tier under a fresh temp
    /// directory.
    pub fn with_builder(builder: TestConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let cache_dir = temp_dir.path().join("cache");
        let config = builder.disk_cache(&cache_dir.to_string_lossy()).build();
        let navigator = Navigator::new(config).expect("test config is valid");
        Self {
            navigator: Arc::new(navigator),
            cache_dir,
            temp_dir,
        }
    }

    pub fn new() -> Self {
        Self::with_builder(TestConfigBuilder::new())
    }

    /// A second navigator sharing this one's cache directory, as a later
    /// run of the same process would.
    pub fn reopen(&self) -> Arc<Navigator> {
        let config = TestConfigBuilder::new()
            .disk_cache(&self.cache_dir.to_string_lossy())
            .build();
        Arc::new(Navigator::new(config).expect("test config is valid"))
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write `toml_content` to a config file in the temp directory and
    /// load it.
    pub async fn load_config(&self, toml_content: &str) -> AppConfig {
        let path = self.temp_dir.path().join("spritenav.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");
        AppConfig::load(&path).await.expect("failed to parse test config")
    }
}

impl Default for TestNavigator {
    fn default() -> Self {
        Self::new()
    }
}
