//! Plugin manager for strategies, format adapters, and scoring functions
//! supplied from outside the core.
//!
//! Plugins are registered explicitly: the host passes a [`PluginFactory`]
//! (usually one from [`builtin_plugins`]) to [`PluginManager::load`]. A
//! plugin that fails or panics during construction or `initialize` is
//! logged and left unregistered.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::decode::BlobDecoder;
use crate::index::SpatialIndex;
use crate::strategy::{StatsCounter, Strategy, StrategyError, StrategyStats};
use crate::types::{DiscoveredObject, Prediction, SessionContext, StrategyKind};

/// Extra ranking function: maps a prediction to a score in [0, 1].
pub type ScoreFn = fn(&Prediction, &SessionContext) -> f64;

/// Builds a fresh plugin instance. Kept by the manager so a plugin can be
/// reloaded.
pub type PluginFactory = fn() -> Box<dyn Plugin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Strategy,
    FormatAdapter,
    Scorer,
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin '{name}' failed to initialize: {reason}")]
    Init { name: String, reason: String },

    #[error("plugin '{0}' panicked while loading")]
    Panicked(String),

    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("plugin '{0}' is not loaded")]
    NotLoaded(String),
}

/// Descriptive information about a loaded plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub kind: PluginKind,
    pub enabled: bool,
    pub description: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// An extension loaded into a [`PluginManager`].
///
/// Providers override the accessor matching their [`PluginKind`]; the
/// others stay empty.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn kind(&self) -> PluginKind;

    fn description(&self) -> &str {
        ""
    }

    /// Acquire resources. Called once, before the plugin is registered.
    fn initialize(&mut self) -> Result<(), PluginError>;

    /// Release resources. Called on unload.
    fn cleanup(&mut self) {}

    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn strategies(&self) -> Vec<Arc<dyn Strategy>> {
        Vec::new()
    }

    fn format_adapters(&self) -> Vec<(String, Arc<dyn BlobDecoder>)> {
        Vec::new()
    }

    fn scorers(&self) -> Vec<(String, ScoreFn)> {
        Vec::new()
    }
}

struct LoadedPlugin {
    plugin: Box<dyn Plugin>,
    factory: PluginFactory,
    enabled: bool,
}

/// Loaded plugins by name. Accessors only report enabled plugins.
#[derive(Default)]
pub struct PluginManager {
    loaded: BTreeMap<String, LoadedPlugin>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct, initialize, and register a plugin. Returns the plugin
    /// name.
    pub fn try_load(&mut self, factory: PluginFactory) -> Result<String, PluginError> {
        let mut plugin = catch_unwind(factory).map_err(|_| PluginError::Panicked("<factory>".to_string()))?;
        let name = plugin.name().to_string();
        if self.loaded.contains_key(&name) {
            return Err(PluginError::AlreadyLoaded(name));
        }

        catch_unwind(AssertUnwindSafe(|| plugin.initialize()))
            .map_err(|_| PluginError::Panicked(name.clone()))??;

        info!(plugin = %name, version = plugin.version(), kind = ?plugin.kind(), "loaded plugin");
        self.loaded.insert(
            name.clone(),
            LoadedPlugin {
                plugin,
                factory,
                enabled: true,
            },
        );
        Ok(name)
    }

    /// [`try_load`](Self::try_load), logging any failure.
    pub fn load(&mut self, factory: PluginFactory) -> bool {
        match self.try_load(factory) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "plugin load failed");
                false
            }
        }
    }

    /// Run `cleanup` and drop the plugin.
    pub fn unload(&mut self, name: &str) -> bool {
        let Some(mut entry) = self.loaded.remove(name) else {
            warn!(plugin = name, "plugin not loaded");
            return false;
        };
        if catch_unwind(AssertUnwindSafe(|| entry.plugin.cleanup())).is_err() {
            warn!(plugin = name, "plugin panicked during cleanup");
        }
        info!(plugin = name, "unloaded plugin");
        true
    }

    /// Unload and load again from the original factory.
    pub fn reload(&mut self, name: &str) -> bool {
        let Some(factory) = self.loaded.get(name).map(|e| e.factory) else {
            warn!(plugin = name, "cannot reload a plugin that is not loaded");
            return false;
        };
        self.unload(name) && self.load(factory)
    }

    pub fn enable(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.loaded.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                debug!(plugin = name, enabled, "plugin toggled");
                true
            }
            None => false,
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.loaded.get(name).is_some_and(|e| e.enabled)
    }

    pub fn names(&self) -> Vec<String> {
        self.loaded.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Unload everything.
    pub fn shutdown_all(&mut self) {
        for name in self.names() {
            self.unload(&name);
        }
        info!("all plugins shut down");
    }

    fn enabled_plugins(&self) -> impl Iterator<Item = &Box<dyn Plugin>> {
        self.loaded.values().filter(|e| e.enabled).map(|e| &e.plugin)
    }

    /// Strategies provided by one loaded plugin, enabled or not.
    pub fn strategies_of(&self, name: &str) -> Vec<Arc<dyn Strategy>> {
        self.loaded.get(name).map(|e| e.plugin.strategies()).unwrap_or_default()
    }

    pub fn strategies(&self) -> Vec<Arc<dyn Strategy>> {
        self.enabled_plugins().flat_map(|p| p.strategies()).collect()
    }

    pub fn format_adapters(&self) -> BTreeMap<String, Arc<dyn BlobDecoder>> {
        self.enabled_plugins().flat_map(|p| p.format_adapters()).collect()
    }

    pub fn scorers(&self) -> BTreeMap<String, ScoreFn> {
        self.enabled_plugins().flat_map(|p| p.scorers()).collect()
    }

    pub fn metadata(&self) -> Vec<PluginMetadata> {
        self.loaded
            .values()
            .map(|e| PluginMetadata {
                name: e.plugin.name().to_string(),
                version: e.plugin.version().to_string(),
                kind: e.plugin.kind(),
                enabled: e.enabled,
                description: e.plugin.description().to_string(),
                extra: e.plugin.metadata(),
            })
            .collect()
    }
}

/// Plugins shipped with the crate, in load order.
pub fn builtin_plugins() -> Vec<PluginFactory> {
    vec![StridePlugin::factory, ProximityScorerPlugin::factory]
}

/// Projects the mean spacing of the objects nearest the current offset.
pub struct StrideStrategy {
    stats: StatsCounter,
}

impl StrideStrategy {
    pub const NAME: &'static str = "stride";

    pub fn new() -> Self {
        Self {
            stats: StatsCounter::default(),
        }
    }
}

impl Default for StrideStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for StrideStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Custom
    }

    fn predict(
        &self,
        context: &SessionContext,
        index: &SpatialIndex,
        _raw: Option<&[u8]>,
    ) -> Result<Vec<Prediction>, StrategyError> {
        let nearby = index.nearest(context.current_offset, 3, None);
        if nearby.len() < 2 {
            return Ok(Vec::new());
        }
        let spacing = nearby
            .windows(2)
            .map(|w| w[0].0.offset().abs_diff(w[1].0.offset()))
            .sum::<u64>()
            / (nearby.len() as u64 - 1);
        let Some(target) = context.current_offset.checked_add(spacing).filter(|_| spacing > 0) else {
            return Ok(Vec::new());
        };
        Ok(vec![
            Prediction::new(target, 0.7, StrategyKind::Custom)
                .with_reasoning(format!("stride: mean spacing {spacing:#X} of nearest objects")),
        ])
    }

    fn learn(&self, _prediction: &Prediction, found: Option<&DiscoveredObject>) {
        self.stats.record(found.is_some());
    }

    fn confidence_estimate(&self, _context: &SessionContext, _index: &SpatialIndex) -> f64 {
        0.6
    }

    fn stats(&self) -> StrategyStats {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// Strategy plugin providing [`StrideStrategy`].
#[derive(Default)]
pub struct StridePlugin {
    strategy: Option<Arc<StrideStrategy>>,
}

impl StridePlugin {
    pub fn factory() -> Box<dyn Plugin> {
        Box::new(Self::default())
    }
}

impl Plugin for StridePlugin {
    fn name(&self) -> &str {
        "stride"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Strategy
    }

    fn description(&self) -> &str {
        "constant-stride strategy from nearest-neighbor spacing"
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        self.strategy = Some(Arc::new(StrideStrategy::new()));
        Ok(())
    }

    fn cleanup(&mut self) {
        self.strategy = None;
    }

    fn strategies(&self) -> Vec<Arc<dyn Strategy>> {
        self.strategy
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn Strategy>)
            .collect()
    }
}

/// Favors predictions close to the current offset.
pub fn proximity_score(prediction: &Prediction, context: &SessionContext) -> f64 {
    let reach = context.max_search_distance.max(1) as f64;
    let distance = prediction.target_offset().abs_diff(context.current_offset) as f64;
    prediction.confidence() * (1.0 - distance / reach).max(0.0)
}

/// Scorer plugin providing [`proximity_score`] as `"proximity"`.
#[derive(Default)]
pub struct ProximityScorerPlugin;

impl ProximityScorerPlugin {
    pub fn factory() -> Box<dyn Plugin> {
        Box::new(Self)
    }
}

impl Plugin for ProximityScorerPlugin {
    fn name(&self) -> &str {
        "proximity"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Scorer
    }

    fn description(&self) -> &str {
        "confidence scaled down with distance from the current offset"
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn scorers(&self) -> Vec<(String, ScoreFn)> {
        vec![("proximity".to_string(), proximity_score as ScoreFn)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeError;
    use pretty_assertions::assert_eq;

    struct FailingPlugin;

    impl Plugin for FailingPlugin {
        fn name(&self) -> &str {
            "failing"
        }

        fn kind(&self) -> PluginKind {
            PluginKind::Strategy
        }

        fn initialize(&mut self) -> Result<(), PluginError> {
            Err(PluginError::Init {
                name: "failing".to_string(),
                reason: "missing resource".to_string(),
            })
        }
    }

    struct PanickingPlugin;

    impl Plugin for PanickingPlugin {
        fn name(&self) -> &str {
            "panicking"
        }

        fn kind(&self) -> PluginKind {
            PluginKind::Scorer
        }

        fn initialize(&mut self) -> Result<(), PluginError> {
            panic!("initialize exploded");
        }
    }

    struct RawCopy;

    impl BlobDecoder for RawCopy {
        fn name(&self) -> &str {
            "raw"
        }

        fn decode_at(&self, raw: &[u8], offset: u64, size_hint: Option<u32>) -> Result<Vec<u8>, DecodeError> {
            let start = offset as usize;
            let len = size_hint.unwrap_or(16) as usize;
            raw.get(start..start + len)
                .map(<[u8]>::to_vec)
                .ok_or(DecodeError::OutOfBounds { offset, len: raw.len() })
        }
    }

    struct AdapterPlugin;

    impl Plugin for AdapterPlugin {
        fn name(&self) -> &str {
            "raw-adapter"
        }

        fn version(&self) -> &str {
            "0.2.0"
        }

        fn kind(&self) -> PluginKind {
            PluginKind::FormatAdapter
        }

        fn initialize(&mut self) -> Result<(), PluginError> {
            Ok(())
        }

        fn metadata(&self) -> BTreeMap<String, String> {
            BTreeMap::from([("author".to_string(), "tests".to_string())])
        }

        fn format_adapters(&self) -> Vec<(String, Arc<dyn BlobDecoder>)> {
            vec![("raw".to_string(), Arc::new(RawCopy) as Arc<dyn BlobDecoder>)]
        }
    }

    #[test]
    fn test_load_builtins() {
        let mut manager = PluginManager::new();
        for factory in builtin_plugins() {
            assert!(manager.load(factory));
        }
        assert_eq!(manager.names(), vec!["proximity", "stride"]);

        let strategies = manager.strategies();
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].name(), "stride");
        assert!(manager.scorers().contains_key("proximity"));
        assert!(manager.format_adapters().is_empty());
    }

    #[test]
    fn test_failed_initialize_is_not_registered() {
        let mut manager = PluginManager::new();
        assert!(!manager.load(|| -> Box<dyn Plugin> { Box::new(FailingPlugin) }));
        assert!(!manager.is_loaded("failing"));
        assert!(matches!(
            manager.try_load(|| -> Box<dyn Plugin> { Box::new(FailingPlugin) }),
            Err(PluginError::Init { .. })
        ));
    }

    #[test]
    fn test_panicking_initialize_is_isolated() {
        let mut manager = PluginManager::new();
        assert!(matches!(
            manager.try_load(|| -> Box<dyn Plugin> { Box::new(PanickingPlugin) }),
            Err(PluginError::Panicked(name)) if name == "panicking"
        ));
        assert!(manager.is_empty());
        // The manager still works afterwards.
        assert!(manager.load(StridePlugin::factory));
    }

    #[test]
    fn test_duplicate_load_rejected() {
        let mut manager = PluginManager::new();
        assert!(manager.load(StridePlugin::factory));
        assert!(matches!(
            manager.try_load(StridePlugin::factory),
            Err(PluginError::AlreadyLoaded(_))
        ));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_disable_hides_contributions() {
        let mut manager = PluginManager::new();
        manager.load(StridePlugin::factory);
        manager.load(|| -> Box<dyn Plugin> { Box::new(AdapterPlugin) });

        assert!(manager.disable("stride"));
        assert!(manager.strategies().is_empty());
        assert_eq!(manager.strategies_of("stride").len(), 1);
        assert!(!manager.is_enabled("stride"));

        assert!(manager.enable("stride"));
        assert_eq!(manager.strategies().len(), 1);
        assert!(!manager.enable("missing"));

        let adapters = manager.format_adapters();
        let raw = adapters.get("raw").unwrap();
        assert_eq!(raw.decode_at(&[1, 2, 3, 4], 1, Some(2)).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_unload_reload_and_shutdown() {
        let mut manager = PluginManager::new();
        manager.load(StridePlugin::factory);
        let before = manager.strategies_of("stride");

        assert!(manager.reload("stride"));
        let after = manager.strategies_of("stride");
        assert!(!Arc::ptr_eq(&before[0], &after[0]));

        assert!(manager.unload("stride"));
        assert!(!manager.unload("stride"));
        assert!(!manager.reload("stride"));

        manager.load(StridePlugin::factory);
        manager.load(ProximityScorerPlugin::factory);
        manager.shutdown_all();
        assert!(manager.is_empty());
    }

    #[test]
    fn test_metadata() {
        let mut manager = PluginManager::new();
        manager.load(|| -> Box<dyn Plugin> { Box::new(AdapterPlugin) });
        manager.disable("raw-adapter");

        let metadata = manager.metadata();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].version, "0.2.0");
        assert_eq!(metadata[0].kind, PluginKind::FormatAdapter);
        assert!(!metadata[0].enabled);
        assert_eq!(metadata[0].extra.get("author").map(String::as_str), Some("tests"));
    }

    #[test]
    fn test_stride_strategy_projects_mean_spacing() {
        let index = SpatialIndex::new(0x10000);
        for offset in [0x1000, 0x1100, 0x1200] {
            index.insert(DiscoveredObject::new(offset, 0x10, 0x20, 0.9).unwrap());
        }
        let strategy = StrideStrategy::new();
        let predictions = strategy.predict(&SessionContext::new(0x1200), &index, None).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].target_offset(), 0x1300);
        assert_eq!(predictions[0].confidence(), 0.7);

        let empty = SpatialIndex::new(0);
        assert!(strategy.predict(&SessionContext::new(0), &empty, None).unwrap().is_empty());
    }

    #[test]
    fn test_proximity_score() {
        let mut context = SessionContext::new(0x1000);
        context.max_search_distance = 0x1000;
        let near = Prediction::new(0x1000, 0.8, StrategyKind::Linear);
        let half = Prediction::new(0x1800, 0.8, StrategyKind::Linear);
        let far = Prediction::new(0x3000, 0.8, StrategyKind::Linear);
        assert_eq!(proximity_score(&near, &context), 0.8);
        assert!((proximity_score(&half, &context) - 0.4).abs() < 1e-9);
        assert_eq!(proximity_score(&far, &context), 0.0);
    }
}
