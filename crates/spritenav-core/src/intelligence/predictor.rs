//! Turns a [`PatternAnalysis`] into ranked offset predictions.

use std::collections::BTreeMap;

use super::analyzer::PatternAnalysis;
use crate::index::SpatialIndex;
use crate::types::{DiscoveredObject, Prediction, RegionKind, StrategyKind};

/// Gaps narrower than this are not worth a region prediction.
const MIN_REGION_GAP: u64 = 100;
/// Buckets further than this from the current one are ignored.
const MAX_BUCKET_DISTANCE: u64 = 3;
/// Size-gap predictions look this far either side of the current offset.
const SIZE_SEARCH_RANGE: u64 = 0x10000;
/// A gap must be this many times a common size to fit it.
const SIZE_FIT_MARGIN: f64 = 1.2;

/// Relative weight of each prediction source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorWeights {
    pub spacing: f64,
    pub size: f64,
    pub region: f64,
    pub alignment: f64,
    pub similarity: f64,
}

impl Default for PredictorWeights {
    fn default() -> Self {
        Self {
            spacing: 0.30,
            size: 0.20,
            region: 0.25,
            alignment: 0.15,
            similarity: 0.10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OffsetPredictor {
    weights: PredictorWeights,
    max_predictions: usize,
}

impl Default for OffsetPredictor {
    fn default() -> Self {
        Self {
            weights: PredictorWeights::default(),
            max_predictions: 10,
        }
    }
}

impl OffsetPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_predictions(mut self, max: usize) -> Self {
        self.max_predictions = max.max(1);
        self
    }

    pub fn weights(&self) -> PredictorWeights {
        self.weights
    }

    /// Predict likely object starts near `current`.
    ///
    /// Combines spacing, region, alignment, and size-gap sources, keeps the
    /// most confident prediction per offset, and returns at most
    /// `max_predictions` ordered by confidence (ties by offset).
    pub fn predict(&self, current: u64, index: &SpatialIndex, analysis: &PatternAnalysis) -> Vec<Prediction> {
        let mut all = self.by_spacing(current, analysis);
        all.extend(self.by_region(current, index, analysis));
        all.extend(self.by_alignment(current, analysis));
        all.extend(self.by_size_gaps(current, index, analysis));

        let mut ranked = dedupe(all);
        ranked.truncate(self.max_predictions);
        ranked
    }

    pub(crate) fn by_spacing(&self, current: u64, analysis: &PatternAnalysis) -> Vec<Prediction> {
        let spacing = &analysis.spacing;
        let total: usize = spacing.common_strides.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return Vec::new();
        }
        let estimated = round_size(analysis.sizes.mean_encoded);

        spacing
            .common_strides
            .iter()
            .take(5)
            .filter_map(|&(stride, frequency)| {
                let target = current.checked_add(stride)?;
                let strength = frequency as f64 / total as f64;
                let confidence = spacing.confidence * strength * self.weights.spacing;
                Some(
                    Prediction::new(target, confidence, StrategyKind::Predictive)
                        .with_reasoning(format!("spacing pattern: {stride:#X} bytes (seen {frequency}x)"))
                        .with_estimated_size(estimated)
                        .with_pattern_strength(strength),
                )
            })
            .collect()
    }

    pub(crate) fn by_region(&self, current: u64, index: &SpatialIndex, analysis: &PatternAnalysis) -> Vec<Prediction> {
        let regions = &analysis.regions;
        let bucket_size = regions.bucket_size.max(1);
        let current_bucket = current / bucket_size;
        let mut out = Vec::new();

        for &id in &regions.high_density {
            let distance = id.abs_diff(current_bucket);
            if distance == 0 || distance > MAX_BUCKET_DISTANCE {
                continue;
            }
            let Some(bucket) = regions.bucket(id) else {
                continue;
            };

            let members = index.range(bucket.start, bucket.end);
            for (gap_start, gap_end) in gaps_between(&members) {
                if gap_end - gap_start < MIN_REGION_GAP {
                    continue;
                }
                let target = gap_start + (gap_end - gap_start) / 2;
                let distance_factor = (1.0 - distance as f64 * 0.2).max(0.1);
                let confidence = regions.confidence * distance_factor * bucket.density * self.weights.region;
                out.push(
                    Prediction::new(target, confidence, StrategyKind::Predictive)
                        .with_reasoning(format!(
                            "gap in high-density bucket {id} (density {:.3})",
                            bucket.density
                        ))
                        .with_region(RegionKind::HighDensity)
                        .with_estimated_size(round_size(bucket.mean_size)),
                );
            }
        }
        out
    }

    pub(crate) fn by_alignment(&self, current: u64, analysis: &PatternAnalysis) -> Vec<Prediction> {
        analysis
            .spacing
            .alignments
            .iter()
            .filter_map(|pattern| {
                let next = (current / pattern.alignment).checked_add(1)?.checked_mul(pattern.alignment)?;
                Some(
                    Prediction::new(next, pattern.fraction * self.weights.alignment, StrategyKind::Predictive)
                        .with_reasoning(format!(
                            "alignment {:#X} ({:.1}% of objects aligned)",
                            pattern.alignment,
                            pattern.fraction * 100.0
                        ))
                        .with_pattern_strength(pattern.fraction),
                )
            })
            .collect()
    }

    pub(crate) fn by_size_gaps(&self, current: u64, index: &SpatialIndex, analysis: &PatternAnalysis) -> Vec<Prediction> {
        let common = &analysis.sizes.common_sizes;
        let total: usize = common.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return Vec::new();
        }

        let nearby = index.range(
            current.saturating_sub(SIZE_SEARCH_RANGE),
            current.saturating_add(SIZE_SEARCH_RANGE),
        );
        let mut out = Vec::new();
        for (gap_start, gap_end) in gaps_between(&nearby) {
            let gap = (gap_end - gap_start) as f64;
            let fit = common
                .iter()
                .take(3)
                .find(|&&(size, _)| gap >= size as f64 * SIZE_FIT_MARGIN);
            if let Some(&(size, frequency)) = fit {
                let share = frequency as f64 / total as f64;
                let fit_weight = (gap / (size as f64 * 2.0)).min(1.0);
                out.push(
                    Prediction::new(gap_start, share * fit_weight * self.weights.size, StrategyKind::Predictive)
                        .with_reasoning(format!("gap fits common size {size} bytes (seen {frequency}x)"))
                        .with_estimated_size(Some(size)),
                );
            }
        }
        out
    }
}

/// Free ranges between consecutive objects, as `(end of one, start of next)`.
fn gaps_between(objects: &[DiscoveredObject]) -> Vec<(u64, u64)> {
    objects
        .windows(2)
        .filter(|pair| pair[1].offset() > pair[0].end_offset())
        .map(|pair| (pair[0].end_offset(), pair[1].offset()))
        .collect()
}

fn round_size(mean: f64) -> Option<u32> {
    (mean >= 1.0 && mean <= u32::MAX as f64).then(|| mean.round() as u32)
}

/// Keep the most confident prediction per offset, then sort by confidence
/// descending with ties broken by offset ascending.
pub(crate) fn dedupe(predictions: Vec<Prediction>) -> Vec<Prediction> {
    let mut best: BTreeMap<u64, Prediction> = BTreeMap::new();
    for prediction in predictions {
        match best.get(&prediction.target_offset()) {
            Some(existing) if existing.confidence() >= prediction.confidence() => {}
            _ => {
                best.insert(prediction.target_offset(), prediction);
            }
        }
    }
    let mut ranked: Vec<Prediction> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.confidence()
            .total_cmp(&a.confidence())
            .then(a.target_offset().cmp(&b.target_offset()))
    });
    ranked
}
