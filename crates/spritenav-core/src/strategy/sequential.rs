//! Fixed-stride stepping forward from the current offset.

use std::collections::HashMap;

use tracing::debug;

use super::{StatsCounter, Strategy, StrategyError, StrategyStats};
use crate::index::SpatialIndex;
use crate::types::{DiscoveredObject, Prediction, RegionKind, SessionContext, StrategyKind};

pub const DEFAULT_STEP: u64 = 0x40;
/// Smallest free span between objects that counts as unexplored.
pub const DEFAULT_GAP_MIN_SIZE: u64 = 100;

const MAX_CANDIDATES: usize = 20;
const MIN_SURFACED_CONFIDENCE: f64 = 0.3;
const NEIGHBORHOOD: u64 = 0x1000;
const PROXIMITY: u64 = 0x20;

/// Steps forward by a stride chosen from local object spacing.
///
/// Dense neighborhoods (nearest objects closer than 0x20 on average) step by
/// 0x10, medium ones by 0x40, sparse ones by 0x80. With fewer than two
/// neighbors within 0x1000 the configured default step is used.
pub struct SequentialStrategy {
    default_step: u64,
    gap_min_size: u64,
    adaptive: bool,
    stats: StatsCounter,
}

impl Default for SequentialStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_STEP)
    }
}

impl SequentialStrategy {
    pub fn new(default_step: u64) -> Self {
        Self {
            default_step: default_step.max(1),
            gap_min_size: DEFAULT_GAP_MIN_SIZE,
            adaptive: true,
            stats: StatsCounter::default(),
        }
    }

    pub fn with_gap_min_size(mut self, gap_min_size: u64) -> Self {
        self.gap_min_size = gap_min_size.max(1);
        self
    }

    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn step_for(&self, offset: u64, index: &SpatialIndex) -> u64 {
        if !self.adaptive {
            return self.default_step;
        }
        let nearby = index.nearest(offset, 5, Some(NEIGHBORHOOD));
        if nearby.len() < 2 {
            return self.default_step;
        }
        let mean = nearby.iter().map(|(_, d)| *d as f64).sum::<f64>() / nearby.len() as f64;
        if mean < 0x20 as f64 {
            0x10
        } else if mean < 0x100 as f64 {
            0x40
        } else {
            0x80
        }
    }

    fn confidence_at(&self, target: u64, context: &SessionContext, gaps: &[(u64, u64)]) -> f64 {
        let mut confidence: f64 = 0.5;
        if gaps.iter().any(|&(start, end)| start <= target && target <= end) {
            confidence += 0.2;
        }
        if target.abs_diff(context.current_offset) < PROXIMITY {
            confidence -= 0.3;
        }
        if context.is_favorite(target) {
            confidence += 0.1;
        }
        confidence.clamp(0.0, 1.0)
    }
}

/// Most common region among the three objects nearest to `offset`.
fn majority_region(offset: u64, index: &SpatialIndex) -> RegionKind {
    let nearby = index.nearest(offset, 3, Some(NEIGHBORHOOD));
    let mut counts: HashMap<RegionKind, usize> = HashMap::new();
    for (object, _) in &nearby {
        *counts.entry(object.region()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map_or(RegionKind::Unknown, |(kind, _)| kind)
}

impl Strategy for SequentialStrategy {
    fn name(&self) -> &str {
        "linear"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Linear
    }

    fn predict(
        &self,
        context: &SessionContext,
        index: &SpatialIndex,
        _raw: Option<&[u8]>,
    ) -> Result<Vec<Prediction>, StrategyError> {
        // Nothing to calibrate against until the first object is reported.
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let step = self.step_for(context.current_offset, index);
        let gaps = index.gaps(self.gap_min_size);
        let limit = (context.max_hints() + 1).min(MAX_CANDIDATES);
        let mut out = Vec::new();

        for i in 1..limit as u64 {
            let Some(target) = step
                .checked_mul(i)
                .and_then(|delta| context.current_offset.checked_add(delta))
            else {
                break;
            };
            if context.recently_visited().any(|o| o == target) {
                continue;
            }
            let confidence = self.confidence_at(target, context, &gaps);
            if confidence < MIN_SURFACED_CONFIDENCE {
                continue;
            }
            out.push(
                Prediction::new(target, confidence, StrategyKind::Linear)
                    .with_reasoning(format!("linear scan: step {step:#X}"))
                    .with_region(majority_region(target, index))
                    .with_priority(0.4),
            );
        }

        out.truncate(context.max_hints());
        Ok(out)
    }

    fn learn(&self, prediction: &Prediction, found: Option<&DiscoveredObject>) {
        self.stats.record(found.is_some());
        if found.is_some() {
            debug!(offset = %format!("{:#08X}", prediction.target_offset()), "linear prediction confirmed");
        }
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
