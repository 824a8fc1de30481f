//! Statistical views over confirmed objects: spacing, sizes, and regions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spritenav_config::IntelligenceConfig;

use super::stats;
use crate::index::SpatialIndex;
use crate::types::{DiscoveredObject, RegionKind};

/// Candidate alignments checked against object offsets.
pub const ALIGNMENT_CANDIDATES: [u64; 9] = [0x10, 0x20, 0x40, 0x80, 0x100, 0x200, 0x400, 0x800, 0x1000];

const TOP_COMMON: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPattern {
    pub alignment: u64,
    pub aligned_count: usize,
    /// Share of offsets on the boundary, in [0, 1].
    pub fraction: f64,
}

/// Distances between consecutive object starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpacingAnalysis {
    /// `(stride, occurrences)`, most common first.
    pub common_strides: Vec<(u64, usize)>,
    pub mean_stride: f64,
    pub median_stride: f64,
    pub stdev_stride: f64,
    /// Mean free space between one object's end and the next one's start.
    pub mean_clearance: f64,
    pub alignments: Vec<AlignmentPattern>,
    pub total_gaps: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeCategories {
    pub small_count: usize,
    pub small_threshold: f64,
    pub medium_count: usize,
    pub large_count: usize,
    pub large_threshold: f64,
}

/// Encoded/decoded size distributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeAnalysis {
    /// `(encoded size, occurrences)`, most common first.
    pub common_sizes: Vec<(u32, usize)>,
    pub mean_encoded: f64,
    pub mean_decoded: f64,
    pub mean_unit_count: f64,
    pub ratio_mean: f64,
    pub ratio_median: f64,
    pub ratio_stdev: f64,
    pub categories: SizeCategories,
    pub total_objects: usize,
    pub confidence: f64,
}

/// One occupied bucket of the blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub bucket: u64,
    pub start: u64,
    pub end: u64,
    pub object_count: usize,
    /// Encoded bytes of objects in the bucket over the bucket size.
    pub density: f64,
    pub mean_size: f64,
    pub regions: BTreeMap<RegionKind, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionAnalysis {
    pub bucket_size: u64,
    /// Buckets holding at least two objects, ascending.
    pub buckets: Vec<BucketStats>,
    pub high_density: Vec<u64>,
    pub confidence: f64,
}

impl Default for RegionAnalysis {
    fn default() -> Self {
        Self {
            bucket_size: crate::index::DEFAULT_DENSITY_BUCKET,
            buckets: Vec::new(),
            high_density: Vec::new(),
            confidence: 0.0,
        }
    }
}

impl RegionAnalysis {
    pub fn bucket(&self, id: u64) -> Option<&BucketStats> {
        self.buckets
            .binary_search_by_key(&id, |b| b.bucket)
            .ok()
            .map(|i| &self.buckets[i])
    }
}

/// All three views plus their mean confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub spacing: SpacingAnalysis,
    pub sizes: SizeAnalysis,
    pub regions: RegionAnalysis,
    pub overall_confidence: f64,
    pub object_count: usize,
    /// Index version the analysis was computed from.
    pub index_version: u64,
}

/// Computes [`PatternAnalysis`] from a set of objects.
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    region_bucket: u64,
    alignment_min_fraction: f64,
    high_density_threshold: f64,
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self {
            region_bucket: crate::index::DEFAULT_DENSITY_BUCKET,
            alignment_min_fraction: 0.3,
            high_density_threshold: 0.1,
        }
    }
}

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &IntelligenceConfig) -> Self {
        Self {
            region_bucket: config.region_bucket.max(1),
            alignment_min_fraction: config.alignment_min_fraction,
            high_density_threshold: config.high_density_threshold,
        }
    }

    pub fn region_bucket(&self) -> u64 {
        self.region_bucket
    }

    /// Analyze everything currently in `index`.
    pub fn analyze(&self, index: &SpatialIndex) -> PatternAnalysis {
        let version = index.version();
        index.with_objects(|objects| self.analyze_objects(objects, version))
    }

    /// Analyze `objects`, which must be sorted by offset.
    pub fn analyze_objects(&self, objects: &[DiscoveredObject], index_version: u64) -> PatternAnalysis {
        let spacing = self.analyze_spacing(objects);
        let sizes = self.analyze_sizes(objects);
        let regions = self.analyze_regions(objects);
        let overall_confidence = (spacing.confidence + sizes.confidence + regions.confidence) / 3.0;
        PatternAnalysis {
            spacing,
            sizes,
            regions,
            overall_confidence,
            object_count: objects.len(),
            index_version,
        }
    }

    pub fn analyze_spacing(&self, objects: &[DiscoveredObject]) -> SpacingAnalysis {
        if objects.len() < 2 {
            return SpacingAnalysis::default();
        }

        let strides: Vec<u64> = objects
            .windows(2)
            .map(|pair| pair[1].offset() - pair[0].offset())
            .collect();
        let clearances: Vec<f64> = objects
            .windows(2)
            .map(|pair| pair[1].offset().saturating_sub(pair[0].end_offset()) as f64)
            .collect();
        let values: Vec<f64> = strides.iter().map(|&s| s as f64).collect();

        let confidence = if values.len() >= 3 {
            stats::consistency(&values)
        } else {
            0.0
        };

        SpacingAnalysis {
            common_strides: stats::most_common(strides.iter().copied(), TOP_COMMON),
            mean_stride: stats::mean(&values),
            median_stride: stats::median(&values),
            stdev_stride: stats::stdev(&values),
            mean_clearance: stats::mean(&clearances),
            alignments: self.detect_alignments(objects),
            total_gaps: strides.len(),
            confidence,
        }
    }

    fn detect_alignments(&self, objects: &[DiscoveredObject]) -> Vec<AlignmentPattern> {
        let total = objects.len();
        ALIGNMENT_CANDIDATES
            .iter()
            .filter_map(|&alignment| {
                let aligned_count = objects.iter().filter(|o| o.offset() % alignment == 0).count();
                let fraction = aligned_count as f64 / total as f64;
                (fraction > self.alignment_min_fraction).then_some(AlignmentPattern {
                    alignment,
                    aligned_count,
                    fraction,
                })
            })
            .collect()
    }

    pub fn analyze_sizes(&self, objects: &[DiscoveredObject]) -> SizeAnalysis {
        if objects.is_empty() {
            return SizeAnalysis::default();
        }

        let encoded: Vec<f64> = objects.iter().map(|o| o.encoded_size() as f64).collect();
        let decoded: Vec<f64> = objects.iter().map(|o| o.decoded_size() as f64).collect();
        let units: Vec<f64> = objects.iter().map(|o| o.unit_count() as f64).collect();
        let ratios: Vec<f64> = objects.iter().map(|o| o.density_ratio()).collect();
        let common_sizes = stats::most_common(objects.iter().map(|o| o.encoded_size()), TOP_COMMON);

        let confidence = match common_sizes.first() {
            Some(&(_, top)) if objects.len() >= 3 => top as f64 / objects.len() as f64,
            _ => 0.0,
        };

        SizeAnalysis {
            mean_encoded: stats::mean(&encoded),
            mean_decoded: stats::mean(&decoded),
            mean_unit_count: stats::mean(&units),
            ratio_mean: stats::mean(&ratios),
            ratio_median: stats::median(&ratios),
            ratio_stdev: stats::stdev(&ratios),
            categories: categorize(&encoded),
            total_objects: objects.len(),
            common_sizes,
            confidence,
        }
    }

    pub fn analyze_regions(&self, objects: &[DiscoveredObject]) -> RegionAnalysis {
        let bucket_size = self.region_bucket;
        let mut groups: BTreeMap<u64, Vec<&DiscoveredObject>> = BTreeMap::new();
        for object in objects {
            groups.entry(object.offset() / bucket_size).or_default().push(object);
        }

        let buckets: Vec<BucketStats> = groups
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .map(|(bucket, members)| {
                let total: u64 = members.iter().map(|o| o.encoded_size() as u64).sum();
                let mut regions = BTreeMap::new();
                for object in &members {
                    *regions.entry(object.region()).or_insert(0) += 1;
                }
                let start = bucket * bucket_size;
                BucketStats {
                    bucket,
                    start,
                    end: start.saturating_add(bucket_size),
                    object_count: members.len(),
                    density: total as f64 / bucket_size as f64,
                    mean_size: total as f64 / members.len() as f64,
                    regions,
                }
            })
            .collect();

        let high_density = buckets
            .iter()
            .filter(|b| b.density > self.high_density_threshold)
            .map(|b| b.bucket)
            .collect();

        let confidence = match buckets.len() {
            0 => 0.0,
            1 => 0.5,
            _ => {
                let densities: Vec<f64> = buckets.iter().map(|b| b.density).collect();
                stats::consistency(&densities)
            }
        };

        RegionAnalysis {
            bucket_size,
            buckets,
            high_density,
            confidence,
        }
    }
}

fn categorize(sizes: &[f64]) -> SizeCategories {
    if sizes.is_empty() {
        return SizeCategories::default();
    }
    let (q1, q3) = if sizes.len() > 3 {
        stats::quartiles(sizes)
    } else {
        let min = sizes.iter().copied().fold(f64::INFINITY, f64::min);
        let max = sizes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (min, max)
    };

    let mut categories = SizeCategories {
        small_threshold: q1,
        large_threshold: q3,
        ..SizeCategories::default()
    };
    for &size in sizes {
        if size <= q1 {
            categories.small_count += 1;
        } else if size <= q3 {
            categories.medium_count += 1;
        } else {
            categories.large_count += 1;
        }
    }
    categories
}
