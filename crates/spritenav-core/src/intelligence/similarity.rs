//! Structural similarity between discovered objects.

use crate::index::SpatialIndex;
use crate::types::DiscoveredObject;

const SIZE_WEIGHT: f64 = 0.3;
const FINGERPRINT_WEIGHT: f64 = 0.5;
const METADATA_WEIGHT: f64 = 0.2;

/// Scores pairs of objects in [0, 1] from their sizes, fingerprints, and
/// metadata.
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    threshold: f64,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self { threshold: 0.7 }
    }
}

impl SimilarityEngine {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn similarity(&self, a: &DiscoveredObject, b: &DiscoveredObject) -> f64 {
        let total = size_similarity(a, b) * SIZE_WEIGHT
            + fingerprint_similarity(a, b) * FINGERPRINT_WEIGHT
            + metadata_similarity(a, b) * METADATA_WEIGHT;
        total.min(1.0)
    }

    /// Objects in `candidates` scoring at least `min_similarity` against
    /// `target`, best first. The target's own offset is skipped.
    pub fn find_similar<'a>(
        &self,
        target: &DiscoveredObject,
        candidates: impl IntoIterator<Item = &'a DiscoveredObject>,
        min_similarity: f64,
    ) -> Vec<(DiscoveredObject, f64)> {
        let mut scored: Vec<(DiscoveredObject, f64)> = candidates
            .into_iter()
            .filter(|c| c.offset() != target.offset())
            .filter_map(|c| {
                let score = self.similarity(target, c);
                (score >= min_similarity).then(|| (c.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.offset().cmp(&b.0.offset())));
        scored
    }

    /// [`find_similar`](Self::find_similar) over every object in `index`,
    /// using the engine threshold.
    pub fn find_similar_in(&self, target: &DiscoveredObject, index: &SpatialIndex) -> Vec<(DiscoveredObject, f64)> {
        index.with_objects(|objects| self.find_similar(target, objects, self.threshold))
    }
}

fn size_similarity(a: &DiscoveredObject, b: &DiscoveredObject) -> f64 {
    let max_units = a.unit_count().max(b.unit_count());
    let units = if max_units == 0 {
        0.0
    } else {
        1.0 - a.unit_count().abs_diff(b.unit_count()) as f64 / max_units as f64
    };
    let ratio = (1.0 - (a.density_ratio() - b.density_ratio()).abs()).max(0.0);
    (units + ratio) / 2.0
}

fn fingerprint_similarity(a: &DiscoveredObject, b: &DiscoveredObject) -> f64 {
    a.fingerprint().byte_similarity(b.fingerprint()).unwrap_or(0.5)
}

fn metadata_similarity(a: &DiscoveredObject, b: &DiscoveredObject) -> f64 {
    let region = if a.region() == b.region() { 1.0 } else { 0.3 };
    let complexity = (1.0 - (a.complexity() - b.complexity()).abs()).max(0.0);
    let strategy = if a.strategy() == b.strategy() { 1.0 } else { 0.5 };
    (region + complexity + strategy) / 3.0
}
