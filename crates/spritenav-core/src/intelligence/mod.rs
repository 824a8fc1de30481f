//! Pattern intelligence: statistics over confirmed objects, offset
//! prediction, structural similarity, and region classification.

pub mod analyzer;
pub mod classifier;
pub mod predictor;
pub mod similarity;

pub use analyzer::{
    AlignmentPattern, BucketStats, PatternAnalysis, PatternAnalyzer, RegionAnalysis,
    SizeAnalysis, SizeCategories, SpacingAnalysis,
};
pub use classifier::{RegionClassifier, ScanRecommendation};
pub use predictor::{OffsetPredictor, PredictorWeights};
pub use similarity::SimilarityEngine;

/// Small descriptive-statistics helpers shared by the analyzers.
pub(crate) mod stats {
    use std::collections::HashMap;
    use std::hash::Hash;

    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    pub fn median(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    /// Sample standard deviation (n - 1 denominator); 0 below two samples.
    pub fn stdev(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let m = mean(values);
        let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        var.sqrt()
    }

    /// First and third quartile using the exclusive method (interpolating
    /// over n + 1 positions). Needs at least four samples.
    pub fn quartiles(values: &[f64]) -> (f64, f64) {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let m = sorted.len() + 1;
        let cut = |i: usize| {
            let j = i * m / 4;
            let delta = (i * m - j * 4) as f64;
            (sorted[j - 1] * (4.0 - delta) + sorted[j] * delta) / 4.0
        };
        (cut(1), cut(3))
    }

    /// Values ordered by frequency (descending), ties by value ascending.
    pub fn most_common<T: Copy + Ord + Hash>(values: impl IntoIterator<Item = T>, limit: usize) -> Vec<(T, usize)> {
        let mut counts: HashMap<T, usize> = HashMap::new();
        for value in values {
            *counts.entry(value).or_default() += 1;
        }
        let mut ranked: Vec<(T, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// `max(0, 1 - stdev/mean)`, or 0 when the mean is not positive.
    pub fn consistency(values: &[f64]) -> f64 {
        let m = mean(values);
        if m <= 0.0 {
            return 0.0;
        }
        (1.0 - stdev(values) / m).clamp(0.0, 1.0)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_median_even_and_odd() {
            assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
            assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
            assert_eq!(median(&[]), 0.0);
        }

        #[test]
        fn test_sample_stdev() {
            let s = stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
            assert!((s - 2.138_089_935).abs() < 1e-6);
            assert_eq!(stdev(&[1.0]), 0.0);
        }

        #[test]
        fn test_exclusive_quartiles() {
            // Matches the usual exclusive-method results for 1..=8.
            let (q1, q3) = quartiles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
            assert!((q1 - 2.25).abs() < 1e-9);
            assert!((q3 - 6.75).abs() < 1e-9);

            let (q1, q3) = quartiles(&[100.0, 200.0, 300.0, 400.0]);
            assert!((q1 - 125.0).abs() < 1e-9);
            assert!((q3 - 375.0).abs() < 1e-9);
        }

        #[test]
        fn test_most_common_ties_by_value() {
            let ranked = most_common([5u64, 3, 5, 3, 9], 10);
            assert_eq!(ranked, vec![(3, 2), (5, 2), (9, 1)]);
            assert_eq!(most_common([1u64, 2, 3], 2).len(), 2);
        }

        #[test]
        fn test_consistency_bounds() {
            assert_eq!(consistency(&[]), 0.0);
            assert_eq!(consistency(&[5.0, 5.0, 5.0]), 1.0);
            assert_eq!(consistency(&[0.0, 0.0]), 0.0);
        }
    }
}
