//! Predictions from objects that resemble recently confirmed ones.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;

use super::{StatsCounter, Strategy, StrategyError, StrategyStats, rank};
use crate::index::SpatialIndex;
use crate::intelligence::SimilarityEngine;
use crate::types::{DiscoveredObject, InvariantError, Prediction, SessionContext, StrategyKind};

pub const DEFAULT_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MAX_COMPARISONS: usize = 100;

const MAX_REFERENCES: usize = 10;
const MAX_VISITED_REFERENCES: usize = 5;

/// Finds objects similar to a set of reference objects and projects their
/// average spacing forward from the current offset.
///
/// References are objects confirmed through [`Strategy::learn`] plus the
/// most recently visited offsets that are already in the index.
pub struct SimilarityStrategy {
    engine: Mutex<SimilarityEngine>,
    max_comparisons: Mutex<usize>,
    references: Mutex<VecDeque<DiscoveredObject>>,
    stats: StatsCounter,
}

impl Default for SimilarityStrategy {
    fn default() -> Self {
        Self {
            engine: Mutex::new(SimilarityEngine::new(DEFAULT_THRESHOLD)),
            max_comparisons: Mutex::new(DEFAULT_MAX_COMPARISONS),
            references: Mutex::new(VecDeque::new()),
            stats: StatsCounter::default(),
        }
    }
}

impl SimilarityStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(&self) -> f64 {
        self.engine.lock().threshold()
    }

    pub fn set_threshold(&self, threshold: f64) -> Result<(), InvariantError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(InvariantError::ThresholdOutOfRange(threshold));
        }
        *self.engine.lock() = SimilarityEngine::new(threshold);
        Ok(())
    }

    pub fn max_comparisons(&self) -> usize {
        *self.max_comparisons.lock()
    }

    pub fn set_max_comparisons(&self, max: usize) -> Result<(), InvariantError> {
        if max == 0 {
            return Err(InvariantError::ZeroComparisons);
        }
        *self.max_comparisons.lock() = max;
        Ok(())
    }

    /// Add a confirmed object to the reference list, dropping the oldest
    /// past capacity.
    pub fn add_reference(&self, object: DiscoveredObject) {
        let mut references = self.references.lock();
        references.retain(|r| r.offset() != object.offset());
        references.push_back(object);
        while references.len() > MAX_REFERENCES {
            references.pop_front();
        }
    }

    pub fn reference_count(&self) -> usize {
        self.references.lock().len()
    }

    pub fn clear_references(&self) {
        self.references.lock().clear();
    }

    /// Learned references followed by recently visited indexed objects,
    /// unique by offset.
    fn collect_references(&self, context: &SessionContext, index: &SpatialIndex) -> Vec<DiscoveredObject> {
        let mut out: Vec<DiscoveredObject> = self.references.lock().iter().cloned().collect();
        let visited = context
            .recently_visited()
            .filter_map(|offset| index.get(offset))
            .take(MAX_VISITED_REFERENCES);
        for object in visited {
            if !out.iter().any(|r| r.offset() == object.offset()) {
                out.push(object);
            }
        }
        out.truncate(MAX_REFERENCES);
        out
    }
}

/// Floor of the mean distance between consecutive offsets after sorting.
fn average_spacing(offsets: &mut [u64]) -> u64 {
    if offsets.len() < 2 {
        return 0;
    }
    offsets.sort_unstable();
    let total: u64 = offsets.windows(2).map(|w| w[1] - w[0]).sum();
    total / (offsets.len() as u64 - 1)
}

impl Strategy for SimilarityStrategy {
    fn name(&self) -> &str {
        "similarity"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Similarity
    }

    fn predict(
        &self,
        context: &SessionContext,
        index: &SpatialIndex,
        _raw: Option<&[u8]>,
    ) -> Result<Vec<Prediction>, StrategyError> {
        if index.len() < 2 {
            return Ok(Vec::new());
        }
        let engine = self.engine.lock().clone();
        let max_comparisons = self.max_comparisons();
        let mut out = Vec::new();

        for reference in self.collect_references(context, index) {
            let nearby = index.nearest(reference.offset(), max_comparisons, None);
            let similar = engine.find_similar(&reference, nearby.iter().map(|(o, _)| o), engine.threshold());
            if similar.len() < 2 {
                continue;
            }

            let mut offsets: Vec<u64> = similar.iter().map(|(o, _)| o.offset()).collect();
            let spacing = average_spacing(&mut offsets);
            let Some(target) = (spacing > 0)
                .then(|| context.current_offset.checked_add(spacing))
                .flatten()
            else {
                continue;
            };
            let mean_similarity = similar.iter().map(|(_, s)| s).sum::<f64>() / similar.len() as f64;
            debug!(
                reference = %format!("{:#08X}", reference.offset()),
                similar = similar.len(),
                spacing,
                "similarity projection"
            );
            out.push(
                Prediction::new(target, mean_similarity * 0.7, StrategyKind::Similarity)
                    .with_reasoning(format!(
                        "similar to object at {:#X} ({} matches, spacing {spacing:#X})",
                        reference.offset(),
                        similar.len()
                    ))
                    .with_region(reference.region())
                    .with_similarity(mean_similarity)
                    .with_priority(0.6),
            );
        }

        Ok(rank(out, context.max_hints()))
    }

    fn learn(&self, _prediction: &Prediction, found: Option<&DiscoveredObject>) {
        self.stats.record(found.is_some());
        if let Some(object) = found {
            self.add_reference(object.clone());
        }
    }

    fn confidence_estimate(&self, _context: &SessionContext, _index: &SpatialIndex) -> f64 {
        let n = self.reference_count();
        if n == 0 {
            0.3
        } else {
            0.4 + (n as f64 / MAX_REFERENCES as f64).min(1.0) * 0.4
        }
    }

    fn stats(&self) -> StrategyStats {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}
