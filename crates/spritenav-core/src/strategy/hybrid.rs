//! Weighted blend of the other strategies.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    SequentialStrategy, SimilarityStrategy, StatisticalStrategy, StatsCounter, Strategy, StrategyError,
    StrategyStats, rank,
};
use crate::index::SpatialIndex;
use crate::types::{DiscoveredObject, Prediction, SessionContext, StrategyKind};

pub use spritenav_config::HybridWeights;

/// Predictions closer than this are treated as the same location.
pub const MERGE_TOLERANCE: u64 = 0x20;

const WEIGHT_NUDGE: f64 = 0.05;
const MAX_WEIGHT: f64 = 0.8;
const MERGED_CONFIDENCE_CAP: f64 = 0.95;
const COMBINED_PREFIX: &str = "combined: ";

struct Component {
    strategy: Arc<dyn Strategy>,
    weight: f64,
}

/// Runs each component strategy, scales its confidences by the component
/// weight, and merges predictions that land within [`MERGE_TOLERANCE`] of
/// each other.
///
/// Every emitted prediction's reasoning starts with the originating
/// component name (`"linear: ..."`) or lists them (`"combined: linear,
/// pattern"`), which is how [`Strategy::learn`] routes feedback back.
pub struct HybridStrategy {
    components: Mutex<Vec<Component>>,
    stats: StatsCounter,
}

impl HybridStrategy {
    /// Blend `components` with the given initial weights, normalized to
    /// sum to one.
    pub fn new(components: Vec<(Arc<dyn Strategy>, f64)>) -> Self {
        let mut components: Vec<Component> = components
            .into_iter()
            .map(|(strategy, weight)| Component {
                strategy,
                weight: weight.max(0.0),
            })
            .collect();
        normalize(&mut components);
        Self {
            components: Mutex::new(components),
            stats: StatsCounter::default(),
        }
    }

    /// Blend the three given strategies using `weights`.
    pub fn with_components(
        linear: Arc<dyn Strategy>,
        pattern: Arc<dyn Strategy>,
        similarity: Arc<dyn Strategy>,
        weights: &HybridWeights,
    ) -> Self {
        Self::new(vec![
            (linear, weights.linear),
            (pattern, weights.pattern),
            (similarity, weights.similarity),
        ])
    }

    /// Blend fresh default instances of the built-in strategies.
    pub fn standalone(weights: &HybridWeights) -> Self {
        Self::with_components(
            Arc::new(SequentialStrategy::default()),
            Arc::new(StatisticalStrategy::default()),
            Arc::new(SimilarityStrategy::default()),
            weights,
        )
    }

    /// Current `(component name, weight)` pairs.
    pub fn weights(&self) -> Vec<(String, f64)> {
        self.components
            .lock()
            .iter()
            .map(|c| (c.strategy.name().to_string(), c.weight))
            .collect()
    }

    pub fn weight_of(&self, name: &str) -> Option<f64> {
        self.components
            .lock()
            .iter()
            .find(|c| c.strategy.name() == name)
            .map(|c| c.weight)
    }

    fn snapshot(&self) -> Vec<(Arc<dyn Strategy>, f64)> {
        self.components
            .lock()
            .iter()
            .map(|c| (Arc::clone(&c.strategy), c.weight))
            .collect()
    }
}

impl Default for HybridStrategy {
    fn default() -> Self {
        Self::standalone(&HybridWeights::default())
    }
}

fn normalize(components: &mut [Component]) {
    let total: f64 = components.iter().map(|c| c.weight).sum();
    if total > 0.0 {
        for component in components {
            component.weight /= total;
        }
    }
}

/// Component names a hybrid prediction came from.
fn origins(reasoning: &str) -> Vec<&str> {
    if let Some(names) = reasoning.strip_prefix(COMBINED_PREFIX) {
        return names.split(", ").map(str::trim).filter(|n| !n.is_empty()).collect();
    }
    match reasoning.split_once(':') {
        Some((name, _)) if !name.is_empty() => vec![name.trim()],
        _ => Vec::new(),
    }
}

/// Group predictions within [`MERGE_TOLERANCE`] of a group's first member,
/// in arrival order, and fold each group into one prediction.
fn combine(predictions: Vec<Prediction>) -> Vec<Prediction> {
    let mut groups: Vec<(u64, Vec<Prediction>)> = Vec::new();
    for prediction in predictions {
        let offset = prediction.target_offset();
        match groups
            .iter_mut()
            .find(|(anchor, _)| anchor.abs_diff(offset) <= MERGE_TOLERANCE)
        {
            Some((_, members)) => members.push(prediction),
            None => groups.push((offset, vec![prediction])),
        }
    }
    groups.into_iter().filter_map(|(_, members)| merge(members)).collect()
}

fn merge(mut members: Vec<Prediction>) -> Option<Prediction> {
    if members.len() <= 1 {
        return members.pop();
    }
    let n = members.len();
    let mean_offset = (members.iter().map(|p| p.target_offset() as u128).sum::<u128>() / n as u128) as u64;
    let mean_confidence = members.iter().map(|p| p.confidence()).sum::<f64>() / n as f64;
    let confidence = (mean_confidence + 0.1 * n as f64).min(MERGED_CONFIDENCE_CAP);
    let best = members
        .iter()
        .max_by(|a, b| a.confidence().total_cmp(&b.confidence()))?;

    let mut names: Vec<&str> = Vec::new();
    for member in &members {
        for name in origins(member.reasoning()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    Some(
        Prediction::new(mean_offset, confidence, StrategyKind::Hybrid)
            .with_reasoning(format!("{COMBINED_PREFIX}{}", names.join(", ")))
            .with_region(best.expected_region())
            .with_priority(0.8),
    )
}

impl Strategy for HybridStrategy {
    fn name(&self) -> &str {
        "hybrid"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    fn predict(
        &self,
        context: &SessionContext,
        index: &SpatialIndex,
        raw: Option<&[u8]>,
    ) -> Result<Vec<Prediction>, StrategyError> {
        let mut weighted = Vec::new();
        for (strategy, weight) in self.snapshot() {
            let name = strategy.name().to_string();
            let predictions = match strategy.predict(context, index, raw) {
                Ok(predictions) => predictions,
                Err(e) => {
                    warn!(strategy = %name, error = %e, "component strategy failed, skipping");
                    continue;
                }
            };
            for mut prediction in predictions {
                prediction.set_confidence(prediction.confidence() * weight);
                prediction.set_reasoning(format!("{name}: {}", prediction.reasoning()));
                prediction.set_strategy(StrategyKind::Hybrid);
                weighted.push(prediction);
            }
        }

        let combined = combine(weighted);
        debug!(count = combined.len(), "hybrid predictions combined");
        Ok(rank(combined, context.max_hints()))
    }

    fn learn(&self, prediction: &Prediction, found: Option<&DiscoveredObject>) {
        self.stats.record(found.is_some());
        let names = origins(prediction.reasoning());

        for (strategy, _) in self.snapshot() {
            if names.contains(&strategy.name()) {
                strategy.learn(prediction, found);
            }
        }

        if found.is_some()
            && let [name] = names.as_slice()
        {
            let mut components = self.components.lock();
            if let Some(component) = components.iter_mut().find(|c| c.strategy.name() == *name) {
                component.weight = (component.weight + WEIGHT_NUDGE).min(MAX_WEIGHT);
                normalize(&mut components);
                debug!(strategy = %name, "hybrid weight nudged");
            }
        }
    }

    fn confidence_estimate(&self, context: &SessionContext, index: &SpatialIndex) -> f64 {
        self.snapshot()
            .iter()
            .map(|(strategy, weight)| strategy.confidence_estimate(context, index) * weight)
            .sum()
    }

    fn stats(&self) -> StrategyStats {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Emits a fixed list of `(offset, confidence)` predictions.
    struct Canned {
        name: &'static str,
        hints: Vec<(u64, f64)>,
        fail: bool,
        stats: StatsCounter,
    }

    impl Canned {
        fn arc(name: &'static str, hints: &[(u64, f64)]) -> Arc<Canned> {
            Arc::new(Self {
                name,
                hints: hints.to_vec(),
                fail: false,
                stats: StatsCounter::default(),
            })
        }

        fn failing(name: &'static str) -> Arc<Canned> {
            Arc::new(Self {
                name,
                hints: Vec::new(),
                fail: true,
                stats: StatsCounter::default(),
            })
        }
    }

    impl Strategy for Canned {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> StrategyKind {
            StrategyKind::Custom
        }

        fn predict(
            &self,
            _context: &SessionContext,
            _index: &SpatialIndex,
            _raw: Option<&[u8]>,
        ) -> Result<Vec<Prediction>, StrategyError> {
            if self.fail {
                return Err(StrategyError::Failed {
                    name: self.name.to_string(),
                    reason: "boom".to_string(),
                });
            }
            Ok(self
                .hints
                .iter()
                .map(|&(offset, confidence)| {
                    Prediction::new(offset, confidence, StrategyKind::Custom).with_reasoning("canned")
                })
                .collect())
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

    fn hybrid(a: Arc<Canned>, b: Arc<Canned>) -> HybridStrategy {
        HybridStrategy::new(vec![(a as Arc<dyn Strategy>, 0.5), (b as Arc<dyn Strategy>, 0.5)])
    }

    #[test]
    fn test_weights_are_normalized() {
        let strategy = HybridStrategy::new(vec![
            (Canned::arc("a", &[]) as Arc<dyn Strategy>, 2.0),
            (Canned::arc("b", &[]) as Arc<dyn Strategy>, 2.0),
        ]);
        assert_eq!(strategy.weight_of("a"), Some(0.5));

        let defaults = HybridStrategy::default();
        let names: Vec<String> = defaults.weights().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["linear", "pattern", "similarity"]);
        assert!((defaults.weight_of("pattern").unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_single_hints_are_weighted_and_tagged() {
        let strategy = hybrid(Canned::arc("a", &[(0x100, 0.8)]), Canned::arc("b", &[(0x900, 0.6)]));
        let predictions = strategy
            .predict(&SessionContext::new(0), &SpatialIndex::new(0), None)
            .unwrap();

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].target_offset(), 0x100);
        assert!((predictions[0].confidence() - 0.4).abs() < 1e-9);
        assert_eq!(predictions[0].reasoning(), "a: canned");
        assert_eq!(predictions[0].strategy(), StrategyKind::Hybrid);
        assert!((predictions[1].confidence() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_nearby_hints_merge() {
        let strategy = hybrid(Canned::arc("a", &[(0x100, 0.8)]), Canned::arc("b", &[(0x110, 0.6)]));
        let predictions = strategy
            .predict(&SessionContext::new(0), &SpatialIndex::new(0), None)
            .unwrap();

        assert_eq!(predictions.len(), 1);
        let merged = &predictions[0];
        assert_eq!(merged.target_offset(), 0x108);
        // mean(0.4, 0.3) + 0.1 * 2
        assert!((merged.confidence() - 0.55).abs() < 1e-9);
        assert_eq!(merged.priority(), 0.8);
        assert_eq!(merged.reasoning(), "combined: a, b");
    }

    #[test]
    fn test_merged_confidence_caps() {
        let hints = [(0x100, 1.0), (0x104, 1.0), (0x108, 1.0), (0x10C, 1.0), (0x110, 1.0), (0x114, 1.0)];
        let strategy = hybrid(Canned::arc("a", &hints), Canned::arc("b", &[]));
        let predictions = strategy
            .predict(&SessionContext::new(0), &SpatialIndex::new(0), None)
            .unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].confidence(), MERGED_CONFIDENCE_CAP);
        assert_eq!(predictions[0].reasoning(), "combined: a");
    }

    #[test]
    fn test_failing_component_is_skipped() {
        let strategy = hybrid(Canned::failing("bad"), Canned::arc("good", &[(0x40, 0.6)]));
        let predictions = strategy
            .predict(&SessionContext::new(0), &SpatialIndex::new(0), None)
            .unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].reasoning(), "good: canned");
    }

    #[test]
    fn test_learn_routes_and_nudges() {
        let a = Canned::arc("a", &[]);
        let b = Canned::arc("b", &[]);
        let strategy = hybrid(Arc::clone(&a), Arc::clone(&b));
        let found = DiscoveredObject::new(0x100, 0x10, 0x20, 0.9).unwrap();

        let single = Prediction::new(0x100, 0.4, StrategyKind::Hybrid).with_reasoning("a: canned");
        strategy.learn(&single, Some(&found));
        assert_eq!(a.stats().hints_generated, 1);
        assert_eq!(b.stats().hints_generated, 0);
        // 0.55 / 1.05 and 0.5 / 1.05
        assert!((strategy.weight_of("a").unwrap() - 0.55 / 1.05).abs() < 1e-9);
        let total: f64 = strategy.weights().iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let merged = Prediction::new(0x100, 0.6, StrategyKind::Hybrid).with_reasoning("combined: a, b");
        let before = strategy.weights();
        strategy.learn(&merged, Some(&found));
        assert_eq!(a.stats().hints_generated, 2);
        assert_eq!(b.stats().hints_generated, 1);
        assert_eq!(strategy.weights(), before);
        assert_eq!(strategy.stats().hints_generated, 2);
    }

    #[test]
    fn test_confidence_estimate_is_weighted_sum() {
        let strategy = hybrid(Canned::arc("a", &[]), Canned::arc("b", &[]));
        let estimate = strategy.confidence_estimate(&SessionContext::default(), &SpatialIndex::new(0));
        assert!((estimate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_origin_parsing() {
        assert_eq!(origins("linear: step 0x40"), vec!["linear"]);
        assert_eq!(origins("combined: linear, pattern"), vec!["linear", "pattern"]);
        assert!(origins("no prefix").is_empty());
    }
}
