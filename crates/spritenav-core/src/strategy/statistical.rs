//! Predictions driven by the pattern analysis of the whole index.

use parking_lot::Mutex;
use tracing::debug;

use super::{StatsCounter, Strategy, StrategyError, StrategyStats, rank};
use crate::index::SpatialIndex;
use crate::intelligence::{OffsetPredictor, PatternAnalysis, PatternAnalyzer, RegionClassifier};
use crate::types::{DiscoveredObject, Prediction, RegionKind, SessionContext, StrategyKind};

/// Below this many objects the analysis is too thin to use.
pub const MIN_OBJECTS: usize = 5;

/// Uses spacing, region, alignment, and size statistics.
///
/// The analysis is recomputed only when the index version changes.
pub struct StatisticalStrategy {
    analyzer: PatternAnalyzer,
    predictor: OffsetPredictor,
    classifier: RegionClassifier,
    patterns: Mutex<Option<PatternAnalysis>>,
    learning: Mutex<bool>,
    stats: StatsCounter,
}

impl Default for StatisticalStrategy {
    fn default() -> Self {
        Self::new(PatternAnalyzer::default())
    }
}

impl StatisticalStrategy {
    pub fn new(analyzer: PatternAnalyzer) -> Self {
        Self {
            analyzer,
            predictor: OffsetPredictor::default(),
            classifier: RegionClassifier::new(),
            patterns: Mutex::new(None),
            learning: Mutex::new(true),
            stats: StatsCounter::default(),
        }
    }

    /// Analysis for the current index version, computing it if stale.
    pub fn analysis(&self, index: &SpatialIndex) -> PatternAnalysis {
        let version = index.version();
        let mut patterns = self.patterns.lock();
        if let Some(analysis) = patterns.as_ref()
            && analysis.index_version == version
        {
            return analysis.clone();
        }
        let analysis = self.analyzer.analyze(index);
        self.classifier.clear();
        debug!(
            version,
            objects = analysis.object_count,
            confidence = analysis.overall_confidence,
            "recomputed pattern analysis"
        );
        *patterns = Some(analysis.clone());
        analysis
    }

    /// Last analysis computed, if any.
    pub fn patterns(&self) -> Option<PatternAnalysis> {
        self.patterns.lock().clone()
    }

    pub fn clear_patterns(&self) {
        *self.patterns.lock() = None;
        self.classifier.clear();
    }

    pub fn set_learning_enabled(&self, enabled: bool) {
        *self.learning.lock() = enabled;
    }

    pub fn learning_enabled(&self) -> bool {
        *self.learning.lock()
    }

    fn spacing_predictions(
        &self,
        context: &SessionContext,
        index: &SpatialIndex,
        analysis: &PatternAnalysis,
    ) -> Vec<Prediction> {
        let spacing = &analysis.spacing;
        let total: usize = spacing.common_strides.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return Vec::new();
        }
        let bucket = analysis.regions.bucket_size.max(1);

        spacing
            .common_strides
            .iter()
            .take(3)
            .filter_map(|&(stride, frequency)| {
                let target = context.current_offset.checked_add(stride)?;
                let strength = frequency as f64 / total as f64;
                let start = target / bucket * bucket;
                let region = self.classifier.classify(start, start.saturating_add(bucket), index);
                Some(
                    Prediction::new(target, spacing.confidence * strength * 0.8, StrategyKind::PatternBased)
                        .with_reasoning(format!("spacing pattern: {stride:#X} bytes (seen {frequency}x)"))
                        .with_region(region)
                        .with_pattern_strength(strength)
                        .with_priority(0.7),
                )
            })
            .collect()
    }

    fn region_predictions(&self, context: &SessionContext, analysis: &PatternAnalysis) -> Vec<Prediction> {
        let regions = &analysis.regions;
        let current_bucket = context.current_offset / regions.bucket_size.max(1);
        regions
            .high_density
            .iter()
            .filter(|&&id| id != current_bucket)
            .filter_map(|&id| regions.bucket(id))
            .map(|bucket| {
                let target = bucket.start + (bucket.end - bucket.start) / 2;
                Prediction::new(target, regions.confidence * bucket.density, StrategyKind::PatternBased)
                    .with_reasoning(format!(
                        "high-density bucket {} (density {:.3})",
                        bucket.bucket, bucket.density
                    ))
                    .with_region(RegionKind::HighDensity)
                    .with_priority(0.8)
            })
            .collect()
    }
}

impl Strategy for StatisticalStrategy {
    fn name(&self) -> &str {
        "pattern"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::PatternBased
    }

    fn predict(
        &self,
        context: &SessionContext,
        index: &SpatialIndex,
        _raw: Option<&[u8]>,
    ) -> Result<Vec<Prediction>, StrategyError> {
        if index.len() < MIN_OBJECTS {
            return Ok(Vec::new());
        }
        let analysis = self.analysis(index);

        let mut all = self.spacing_predictions(context, index, &analysis);
        all.extend(self.region_predictions(context, &analysis));
        all.extend(
            self.predictor
                .clone()
                .with_max_predictions(context.max_hints())
                .predict(context.current_offset, index, &analysis),
        );
        Ok(rank(all, context.max_hints()))
    }

    fn learn(&self, prediction: &Prediction, found: Option<&DiscoveredObject>) {
        self.stats.record(found.is_some());
        if found.is_some() && self.learning_enabled() {
            debug!(reasoning = prediction.reasoning(), "pattern prediction confirmed");
        }
    }

    fn confidence_estimate(&self, _context: &SessionContext, _index: &SpatialIndex) -> f64 {
        match self.patterns.lock().as_ref() {
            None => 0.2,
            Some(analysis) => 0.5_f64
                .max(analysis.spacing.confidence)
                .max(analysis.sizes.confidence)
                .min(0.9),
        }
    }

    fn stats(&self) -> StrategyStats {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}
