//! Ranking strategies and the registry that selects among them.
//!
//! Every strategy implements [`Strategy`]: given the session context and
//! the spatial index it returns ranked [`Prediction`]s, and it learns from
//! reported outcomes. Learned state lives behind interior mutability so a
//! strategy can be shared as `Arc<dyn Strategy>`.

pub mod hybrid;
pub mod sequential;
pub mod similarity;
pub mod statistical;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::index::SpatialIndex;
use crate::types::{DiscoveredObject, InvariantError, Prediction, SessionContext, StrategyKind};

pub use hybrid::{HybridStrategy, HybridWeights};
pub use sequential::SequentialStrategy;
pub use similarity::SimilarityStrategy;
pub use statistical::StatisticalStrategy;

/// A ranking algorithm.
pub trait Strategy: Send + Sync {
    /// Registry name, unique per registry.
    fn name(&self) -> &str;

    fn kind(&self) -> StrategyKind;

    /// Rank candidate offsets. `raw` is the blob, when the caller has it.
    fn predict(
        &self,
        context: &SessionContext,
        index: &SpatialIndex,
        raw: Option<&[u8]>,
    ) -> Result<Vec<Prediction>, StrategyError>;

    /// Feedback for a prediction this strategy made. `found` is the object
    /// confirmed at the target, or `None` if nothing was there.
    fn learn(&self, prediction: &Prediction, found: Option<&DiscoveredObject>);

    /// How useful this strategy expects to be right now, in [0, 1].
    fn confidence_estimate(&self, context: &SessionContext, index: &SpatialIndex) -> f64;

    fn stats(&self) -> StrategyStats;

    fn reset_stats(&self);
}

/// Outcome counters for one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    /// Predictions whose outcome has been reported.
    pub hints_generated: u64,
    pub successful_predictions: u64,
    pub accuracy: f64,
}

/// Thread-safe backing store for [`StrategyStats`].
#[derive(Debug, Default)]
pub struct StatsCounter {
    evaluated: AtomicU64,
    successful: AtomicU64,
}

impl StatsCounter {
    pub fn record(&self, success: bool) {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StrategyStats {
        let hints_generated = self.evaluated.load(Ordering::Relaxed);
        let successful_predictions = self.successful.load(Ordering::Relaxed);
        let accuracy = if hints_generated == 0 {
            0.0
        } else {
            successful_predictions as f64 / hints_generated as f64
        };
        StrategyStats {
            hints_generated,
            successful_predictions,
            accuracy,
        }
    }

    pub fn reset(&self) {
        self.evaluated.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
    }
}

/// Errors a strategy can report from `predict`.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("strategy '{name}' failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("strategy '{0}' panicked")]
    Panicked(String),

    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

/// Errors from [`StrategyRegistry`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("strategy '{0}' is not registered")]
    NotRegistered(String),
}

struct RegistryEntry {
    strategy: Arc<dyn Strategy>,
    enabled: bool,
}

/// Named strategies in registration order, with per-strategy enable flags
/// and a default.
pub struct StrategyRegistry {
    entries: Vec<RegistryEntry>,
    default: Option<String>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            default: None,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.strategy.name() == name)
    }

    /// Register a strategy, enabled. Re-registering a name replaces the
    /// previous instance in place. The first registration becomes the
    /// default.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        let name = strategy.name().to_string();
        match self.position(&name) {
            Some(i) => {
                warn!(strategy = %name, "overriding existing strategy");
                self.entries[i].strategy = strategy;
            }
            None => {
                self.entries.push(RegistryEntry {
                    strategy,
                    enabled: true,
                });
                info!(strategy = %name, "registered strategy");
            }
        }
        if self.default.is_none() {
            self.default = Some(name);
        }
    }

    /// Remove a strategy. If it was the default, the first remaining
    /// strategy becomes the default.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Strategy>> {
        let Some(i) = self.position(name) else {
            warn!(strategy = name, "strategy not found for unregistration");
            return None;
        };
        let entry = self.entries.remove(i);
        info!(strategy = name, "unregistered strategy");
        if self.default.as_deref() == Some(name) {
            self.default = self.entries.first().map(|e| e.strategy.name().to_string());
        }
        Some(entry.strategy)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.position(name).map(|i| Arc::clone(&self.entries[i].strategy))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// All names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.strategy.name().to_string()).collect()
    }

    /// Enabled strategies in registration order.
    pub fn enabled(&self) -> Vec<Arc<dyn Strategy>> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| Arc::clone(&e.strategy))
            .collect()
    }

    pub fn enabled_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.strategy.name().to_string())
            .collect()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.position(name).is_some_and(|i| self.entries[i].enabled)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let i = self
            .position(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        self.entries[i].enabled = enabled;
        debug!(strategy = name, enabled, "strategy toggled");
        Ok(())
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.contains(name) {
            return Err(RegistryError::NotRegistered(name.to_string()));
        }
        self.default = Some(name.to_string());
        info!(strategy = name, "default strategy set");
        Ok(())
    }

    pub fn default_strategy(&self) -> Option<Arc<dyn Strategy>> {
        self.default.as_deref().and_then(|name| self.get(name))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.default = None;
        info!("cleared all strategies");
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the best prediction per offset, rank, and cap at `max`.
pub(crate) fn rank(predictions: Vec<Prediction>, max: usize) -> Vec<Prediction> {
    let mut ranked = crate::intelligence::predictor::dedupe(predictions);
    ranked.truncate(max);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixed {
        name: &'static str,
        stats: StatsCounter,
    }

    impl Fixed {
        fn arc(name: &'static str) -> Arc<dyn Strategy> {
            Arc::new(Self {
                name,
                stats: StatsCounter::default(),
            })
        }
    }

    impl Strategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> StrategyKind {
            StrategyKind::Custom
        }

        fn predict(
            &self,
            context: &SessionContext,
            _index: &SpatialIndex,
            _raw: Option<&[u8]>,
        ) -> Result<Vec<Prediction>, StrategyError> {
            Ok(vec![Prediction::new(context.current_offset + 1, 0.5, self.kind())])
        }

        fn learn(&self, _prediction: &Prediction, found: Option<&DiscoveredObject>) {
            self.stats.record(found.is_some());
        }

        fn confidence_estimate(&self, _context: &SessionContext, _index: &SpatialIndex) -> f64 {
            0.5
        }

        fn stats(&self) -> StrategyStats {
            self.stats.snapshot()
        }

        fn reset_stats(&self) {
            self.stats.reset();
        }
    }

    #[test]
    fn test_register_sets_first_default() {
        let mut registry = StrategyRegistry::new();
        registry.register(Fixed::arc("alpha"));
        registry.register(Fixed::arc("beta"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.default_name(), Some("alpha"));
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_reregister_overrides_in_place() {
        let mut registry = StrategyRegistry::new();
        registry.register(Fixed::arc("alpha"));
        registry.register(Fixed::arc("beta"));
        registry.register(Fixed::arc("alpha"));
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_unregister_reassigns_default_in_order() {
        let mut registry = StrategyRegistry::new();
        registry.register(Fixed::arc("alpha"));
        registry.register(Fixed::arc("beta"));
        registry.register(Fixed::arc("gamma"));

        assert!(registry.unregister("alpha").is_some());
        assert_eq!(registry.default_name(), Some("beta"));
        assert!(registry.unregister("missing").is_none());

        registry.unregister("beta");
        registry.unregister("gamma");
        assert_eq!(registry.default_name(), None);
        assert!(registry.default_strategy().is_none());
    }

    #[test]
    fn test_enable_disable() {
        let mut registry = StrategyRegistry::new();
        registry.register(Fixed::arc("alpha"));
        registry.register(Fixed::arc("beta"));

        registry.set_enabled("alpha", false).unwrap();
        assert!(!registry.is_enabled("alpha"));
        assert_eq!(registry.enabled_names(), vec!["beta"]);
        assert_eq!(registry.enabled().len(), 1);
        assert!(matches!(
            registry.set_enabled("missing", true),
            Err(RegistryError::NotRegistered(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_set_default_and_clear() {
        let mut registry = StrategyRegistry::new();
        registry.register(Fixed::arc("alpha"));
        registry.register(Fixed::arc("beta"));

        registry.set_default("beta").unwrap();
        assert_eq!(registry.default_strategy().unwrap().name(), "beta");
        assert!(registry.set_default("missing").is_err());

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.default_name(), None);
    }

    #[test]
    fn test_stats_counter() {
        let counter = StatsCounter::default();
        counter.record(true);
        counter.record(false);
        counter.record(true);
        counter.record(true);
        let stats = counter.snapshot();
        assert_eq!(stats.hints_generated, 4);
        assert_eq!(stats.successful_predictions, 3);
        assert_eq!(stats.accuracy, 0.75);

        counter.reset();
        assert_eq!(counter.snapshot(), StrategyStats::default());
    }

    #[test]
    fn test_rank_caps_and_orders() {
        let ranked = rank(
            vec![
                Prediction::new(3, 0.1, StrategyKind::Linear),
                Prediction::new(1, 0.9, StrategyKind::Linear),
                Prediction::new(2, 0.5, StrategyKind::Linear),
            ],
            2,
        );
        let offsets: Vec<u64> = ranked.iter().map(|p| p.target_offset()).collect();
        assert_eq!(offsets, vec![1, 2]);
    }
}
