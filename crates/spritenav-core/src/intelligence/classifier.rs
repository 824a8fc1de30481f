//! Heuristic labeling of blob ranges.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::index::SpatialIndex;
use crate::types::{DiscoveredObject, RegionKind};

/// How to scan a region of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanRecommendation {
    pub scan_step: u64,
    pub confidence_threshold: f64,
    pub priority: f64,
}

/// Classifies `[start, end)` ranges from the objects already found in them.
/// Results are memoized per range until [`RegionClassifier::clear`].
#[derive(Debug, Default)]
pub struct RegionClassifier {
    memo: Mutex<HashMap<String, RegionKind>>,
}

impl RegionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, start: u64, end: u64, index: &SpatialIndex) -> RegionKind {
        let key = format!("{start:08X}_{end:08X}");
        if let Some(kind) = self.memo.lock().get(&key) {
            return *kind;
        }
        let kind = if end <= start {
            RegionKind::Unknown
        } else {
            classify_objects(end - start, &index.range(start, end))
        };
        self.memo.lock().insert(key, kind);
        kind
    }

    pub fn clear(&self) {
        self.memo.lock().clear();
    }

    pub fn memoized(&self) -> usize {
        self.memo.lock().len()
    }

    pub fn recommendations(kind: RegionKind) -> ScanRecommendation {
        let (scan_step, confidence_threshold, priority) = match kind {
            RegionKind::HighDensity => (0x10, 0.7, 0.9),
            RegionKind::Sparse => (0x100, 0.5, 0.3),
            RegionKind::Compressed => (0x20, 0.6, 0.8),
            RegionKind::PaletteData => (0x20, 0.4, 0.5),
            RegionKind::Uncompressed | RegionKind::Unknown => (0x40, 0.6, 0.5),
        };
        ScanRecommendation {
            scan_step,
            confidence_threshold,
            priority,
        }
    }
}

fn classify_objects(span: u64, objects: &[DiscoveredObject]) -> RegionKind {
    if objects.is_empty() {
        return RegionKind::Unknown;
    }
    let n = objects.len() as f64;
    let density = objects.iter().map(|o| o.encoded_size() as f64).sum::<f64>() / span as f64;
    let mean_ratio = objects.iter().map(|o| o.density_ratio()).sum::<f64>() / n;
    let mean_units = objects.iter().map(|o| o.unit_count() as f64).sum::<f64>() / n;

    if density > 0.3 {
        RegionKind::HighDensity
    } else if density < 0.05 {
        RegionKind::Sparse
    } else if mean_ratio > 5.0 {
        RegionKind::Compressed
    } else if mean_ratio < 1.5 {
        RegionKind::Uncompressed
    } else if mean_units < 32.0 {
        RegionKind::PaletteData
    } else {
        RegionKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn object(offset: u64, encoded: u32, decoded: u32) -> DiscoveredObject {
        DiscoveredObject::new(offset, encoded, decoded, 0.9).unwrap()
    }

    #[test]
    fn test_classification_thresholds() {
        let span = 0x1000;
        assert_eq!(classify_objects(span, &[object(0, 0x800, 0x1000)]), RegionKind::HighDensity);
        assert_eq!(classify_objects(span, &[object(0, 0x10, 0x20)]), RegionKind::Sparse);
        assert_eq!(classify_objects(span, &[object(0, 0x100, 0x800)]), RegionKind::Compressed);
        assert_eq!(classify_objects(span, &[object(0, 0x100, 0x120)]), RegionKind::Uncompressed);
        // Ratio 2, 0x200 / 32 = 16 units.
        assert_eq!(classify_objects(span, &[object(0, 0x100, 0x200)]), RegionKind::PaletteData);
        // Ratio 4, 0x1000 / 32 = 128 units.
        assert_eq!(classify_objects(span, &[object(0, 0x400, 0x1000)]), RegionKind::Unknown);
        assert_eq!(classify_objects(span, &[]), RegionKind::Unknown);
    }

    #[test]
    fn test_classify_memoizes_by_range() {
        let index = SpatialIndex::new(0x10000);
        index.insert(object(0x100, 0x800, 0x1000));
        let classifier = RegionClassifier::new();

        assert_eq!(classifier.classify(0, 0x1000, &index), RegionKind::HighDensity);
        // The memo is not aware of index changes.
        index.clear();
        assert_eq!(classifier.classify(0, 0x1000, &index), RegionKind::HighDensity);
        assert_eq!(classifier.memoized(), 1);

        classifier.clear();
        assert_eq!(classifier.classify(0, 0x1000, &index), RegionKind::Unknown);
    }

    #[test]
    fn test_empty_range_is_unknown() {
        let index = SpatialIndex::new(0x10000);
        let classifier = RegionClassifier::new();
        assert_eq!(classifier.classify(0x200, 0x200, &index), RegionKind::Unknown);
        assert_eq!(classifier.classify(0x300, 0x200, &index), RegionKind::Unknown);
    }

    #[test]
    fn test_recommendation_table() {
        let dense = RegionClassifier::recommendations(RegionKind::HighDensity);
        assert_eq!(dense.scan_step, 0x10);
        assert_eq!(dense.priority, 0.9);
        assert_eq!(RegionClassifier::recommendations(RegionKind::Sparse).scan_step, 0x100);
        assert_eq!(
            RegionClassifier::recommendations(RegionKind::Unknown),
            ScanRecommendation {
                scan_step: 0x40,
                confidence_threshold: 0.6,
                priority: 0.5
            }
        );
    }
}
