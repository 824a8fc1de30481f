//! Value types shared by every layer of the engine.
//!
//! [`DiscoveredObject`] is the immutable record of a confirmed find,
//! [`Prediction`] is a ranked guess produced by a strategy, and
//! [`SessionContext`] carries one caller's exploration state.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Maximum number of offsets kept in the recency list.
pub const MAX_RECENT_VISITS: usize = 100;
/// Maximum number of favorite ranges kept per session.
pub const MAX_FAVORITE_RANGES: usize = 20;
/// Upper bound on predictions returned by a single query.
pub const MAX_HINTS_LIMIT: usize = 100;
/// Bytes per 8x8 tile at 4 bits per pixel.
pub const BYTES_PER_UNIT: u32 = 32;
/// Length of a computed [`Fingerprint`].
pub const FINGERPRINT_LEN: usize = 16;

/// Rejected input at value-construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantError {
    #[error("encoded_size must be greater than zero")]
    ZeroEncodedSize,

    #[error("decoded_size must be greater than zero")]
    ZeroDecodedSize,

    #[error("confidence must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("priority must be within [0, 1], got {0}")]
    PriorityOutOfRange(f64),

    #[error("complexity must be finite, got {0}")]
    NonFiniteComplexity(f64),

    #[error("object at {offset:#x} with size {size} extends past the addressable range")]
    OffsetOverflow { offset: u64, size: u32 },

    #[error("max_hints must be within 1..={MAX_HINTS_LIMIT}, got {0}")]
    MaxHintsOutOfRange(usize),

    #[error("similarity threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("max_comparisons must be at least 1")]
    ZeroComparisons,

    #[error("learning_rate must be within (0, 1], got {0}")]
    LearningRateOutOfRange(f64),

    #[error("range start {start:#x} must be below end {end:#x}")]
    EmptyRange { start: u64, end: u64 },

    #[error("invalid fingerprint encoding: {0}")]
    Fingerprint(String),
}

/// Clamp to [0, 1], mapping NaN to 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn check_unit(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

/// Heuristic label for a byte range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    HighDensity,
    Sparse,
    Compressed,
    Uncompressed,
    PaletteData,
    #[default]
    Unknown,
}

impl RegionKind {
    pub const ALL: [RegionKind; 6] = [
        RegionKind::HighDensity,
        RegionKind::Sparse,
        RegionKind::Compressed,
        RegionKind::Uncompressed,
        RegionKind::PaletteData,
        RegionKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKind::HighDensity => "high_density",
            RegionKind::Sparse => "sparse",
            RegionKind::Compressed => "compressed",
            RegionKind::Uncompressed => "uncompressed",
            RegionKind::PaletteData => "palette_data",
            RegionKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which family of algorithm produced a find or a prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Linear,
    PatternBased,
    Predictive,
    Similarity,
    Hybrid,
    Custom,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Linear => "linear",
            StrategyKind::PatternBased => "pattern_based",
            StrategyKind::Predictive => "predictive",
            StrategyKind::Similarity => "similarity",
            StrategyKind::Hybrid => "hybrid",
            StrategyKind::Custom => "custom",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short byte summary of an object's content used for approximate comparison.
///
/// An empty fingerprint means "not available". Serialized as a hex string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    /// Derive a fingerprint from decoded content, encoded size and complexity.
    ///
    /// Layout: 8 bytes of SHA-256(content), encoded size as u32 LE, complexity
    /// as f32 LE.
    pub fn compute(content: &[u8], encoded_size: u32, complexity: f64) -> Self {
        let digest = Sha256::digest(content);
        let mut bytes = Vec::with_capacity(FINGERPRINT_LEN);
        bytes.extend_from_slice(&digest[..8]);
        bytes.extend_from_slice(&encoded_size.to_le_bytes());
        bytes.extend_from_slice(&(complexity as f32).to_le_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(text: &str) -> Result<Self, InvariantError> {
        hex::decode(text)
            .map(Self)
            .map_err(|e| InvariantError::Fingerprint(e.to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fraction of equal bytes, or `None` when either side is absent or the
    /// lengths differ.
    pub fn byte_similarity(&self, other: &Fingerprint) -> Option<f64> {
        if self.is_empty() || other.is_empty() || self.len() != other.len() {
            return None;
        }
        let differences = self
            .0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a != b)
            .count();
        Some(1.0 - differences as f64 / self.len() as f64)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// A confirmed object at a known offset. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredObject {
    offset: u64,
    encoded_size: u32,
    decoded_size: u32,
    confidence: f64,
    region: RegionKind,
    unit_count: u32,
    complexity: f64,
    fingerprint: Fingerprint,
    strategy: StrategyKind,
    metadata: BTreeMap<String, serde_json::Value>,
    discovered_at: DateTime<Utc>,
}

impl DiscoveredObject {
    /// Start building an object. Sizes and confidence are checked by
    /// [`DiscoveredObjectBuilder::build`].
    pub fn builder(offset: u64, encoded_size: u32, decoded_size: u32) -> DiscoveredObjectBuilder {
        DiscoveredObjectBuilder {
            offset,
            encoded_size,
            decoded_size,
            confidence: 1.0,
            region: RegionKind::Unknown,
            unit_count: None,
            complexity: 0.0,
            fingerprint: Fingerprint::default(),
            strategy: StrategyKind::Linear,
            metadata: BTreeMap::new(),
            discovered_at: None,
        }
    }

    /// Shorthand for an object with default attributes.
    pub fn new(
        offset: u64,
        encoded_size: u32,
        decoded_size: u32,
        confidence: f64,
    ) -> Result<Self, InvariantError> {
        Self::builder(offset, encoded_size, decoded_size)
            .confidence(confidence)
            .build()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn encoded_size(&self) -> u32 {
        self.encoded_size
    }

    pub fn decoded_size(&self) -> u32 {
        self.decoded_size
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn region(&self) -> RegionKind {
        self.region
    }

    pub fn unit_count(&self) -> u32 {
        self.unit_count
    }

    pub fn complexity(&self) -> f64 {
        self.complexity
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// First byte past the encoded object.
    pub fn end_offset(&self) -> u64 {
        self.offset + u64::from(self.encoded_size)
    }

    /// Decoded bytes per encoded byte.
    pub fn density_ratio(&self) -> f64 {
        f64::from(self.decoded_size) / f64::from(self.encoded_size)
    }

    /// Whether the two `[offset, end_offset)` ranges intersect.
    pub fn overlaps(&self, other: &DiscoveredObject) -> bool {
        self.offset < other.end_offset() && other.offset < self.end_offset()
    }

    /// Zero when overlapping, otherwise the gap between the nearest edges.
    pub fn distance_to(&self, other: &DiscoveredObject) -> u64 {
        if self.overlaps(other) {
            0
        } else if self.end_offset() <= other.offset {
            other.offset - self.end_offset()
        } else {
            self.offset - other.end_offset()
        }
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        (self.offset..self.end_offset()).contains(&offset)
    }
}

/// Builder for [`DiscoveredObject`].
#[derive(Debug, Clone)]
pub struct DiscoveredObjectBuilder {
    offset: u64,
    encoded_size: u32,
    decoded_size: u32,
    confidence: f64,
    region: RegionKind,
    unit_count: Option<u32>,
    complexity: f64,
    fingerprint: Fingerprint,
    strategy: StrategyKind,
    metadata: BTreeMap<String, serde_json::Value>,
    discovered_at: Option<DateTime<Utc>>,
}

impl DiscoveredObjectBuilder {
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn region(mut self, region: RegionKind) -> Self {
        self.region = region;
        self
    }

    /// Tile count. Defaults to the decoded size in 32-byte units.
    pub fn unit_count(mut self, units: u32) -> Self {
        self.unit_count = Some(units);
        self
    }

    pub fn complexity(mut self, complexity: f64) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Compute the fingerprint from decoded content using the sizes and
    /// complexity already set on the builder.
    pub fn fingerprint_from_content(mut self, content: &[u8]) -> Self {
        self.fingerprint = Fingerprint::compute(content, self.encoded_size, self.complexity);
        self
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn discovered_at(mut self, at: DateTime<Utc>) -> Self {
        self.discovered_at = Some(at);
        self
    }

    pub fn build(self) -> Result<DiscoveredObject, InvariantError> {
        if self.encoded_size == 0 {
            return Err(InvariantError::ZeroEncodedSize);
        }
        if self.decoded_size == 0 {
            return Err(InvariantError::ZeroDecodedSize);
        }
        if !check_unit(self.confidence) {
            return Err(InvariantError::ConfidenceOutOfRange(self.confidence));
        }
        if !self.complexity.is_finite() {
            return Err(InvariantError::NonFiniteComplexity(self.complexity));
        }
        if self
            .offset
            .checked_add(u64::from(self.encoded_size))
            .is_none()
        {
            return Err(InvariantError::OffsetOverflow {
                offset: self.offset,
                size: self.encoded_size,
            });
        }

        Ok(DiscoveredObject {
            offset: self.offset,
            encoded_size: self.encoded_size,
            decoded_size: self.decoded_size,
            confidence: self.confidence,
            region: self.region,
            unit_count: self
                .unit_count
                .unwrap_or_else(|| (self.decoded_size / BYTES_PER_UNIT).max(1)),
            complexity: self.complexity,
            fingerprint: self.fingerprint,
            strategy: self.strategy,
            metadata: self.metadata,
            discovered_at: self.discovered_at.unwrap_or_else(Utc::now),
        })
    }
}

/// A ranked guess of where the next undiscovered object lies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    target_offset: u64,
    confidence: f64,
    reasoning: String,
    strategy: StrategyKind,
    expected_region: RegionKind,
    estimated_size: Option<u32>,
    similarity_score: Option<f64>,
    pattern_strength: Option<f64>,
    priority: f64,
    distance_penalty: f64,
}

impl Prediction {
    /// Create a prediction. Confidence is clamped into [0, 1]; priority
    /// starts at 0.5.
    pub fn new(target_offset: u64, confidence: f64, strategy: StrategyKind) -> Self {
        Self {
            target_offset,
            confidence: clamp_unit(confidence),
            reasoning: String::new(),
            strategy,
            expected_region: RegionKind::Unknown,
            estimated_size: None,
            similarity_score: None,
            pattern_strength: None,
            priority: 0.5,
            distance_penalty: 0.0,
        }
    }

    /// Create a prediction from caller-supplied values, rejecting anything
    /// out of range instead of clamping.
    pub fn validated(
        target_offset: u64,
        confidence: f64,
        priority: f64,
        strategy: StrategyKind,
    ) -> Result<Self, InvariantError> {
        if !check_unit(confidence) {
            return Err(InvariantError::ConfidenceOutOfRange(confidence));
        }
        if !check_unit(priority) {
            return Err(InvariantError::PriorityOutOfRange(priority));
        }
        Ok(Self::new(target_offset, confidence, strategy).with_priority(priority))
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_region(mut self, region: RegionKind) -> Self {
        self.expected_region = region;
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = clamp_unit(priority);
        self
    }

    pub fn with_estimated_size(mut self, size: Option<u32>) -> Self {
        self.estimated_size = size;
        self
    }

    pub fn with_similarity(mut self, score: f64) -> Self {
        self.similarity_score = Some(clamp_unit(score));
        self
    }

    pub fn with_pattern_strength(mut self, strength: f64) -> Self {
        self.pattern_strength = Some(clamp_unit(strength));
        self
    }

    pub fn target_offset(&self) -> u64 {
        self.target_offset
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn expected_region(&self) -> RegionKind {
        self.expected_region
    }

    pub fn estimated_size(&self) -> Option<u32> {
        self.estimated_size
    }

    pub fn similarity_score(&self) -> Option<f64> {
        self.similarity_score
    }

    pub fn pattern_strength(&self) -> Option<f64> {
        self.pattern_strength
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn distance_penalty(&self) -> f64 {
        self.distance_penalty
    }

    pub fn set_target_offset(&mut self, offset: u64) {
        self.target_offset = offset;
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = clamp_unit(confidence);
    }

    pub fn set_priority(&mut self, priority: f64) {
        self.priority = clamp_unit(priority);
    }

    pub fn set_reasoning(&mut self, reasoning: impl Into<String>) {
        self.reasoning = reasoning.into();
    }

    pub fn set_strategy(&mut self, strategy: StrategyKind) {
        self.strategy = strategy;
    }

    /// Negative or NaN penalties are stored as zero.
    pub fn set_distance_penalty(&mut self, penalty: f64) {
        self.distance_penalty = if penalty.is_nan() { 0.0 } else { penalty.max(0.0) };
    }

    /// `confidence * priority - distance_penalty`, floored at zero.
    pub fn score(&self) -> f64 {
        (self.confidence * self.priority - self.distance_penalty).max(0.0)
    }
}

/// Per-caller exploration state, mutated in place as offsets are visited,
/// rejected, or marked as favorites.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Offset the caller is currently looking at.
    pub current_offset: u64,
    /// Strategies the caller prefers, in order.
    pub preferred_strategies: Vec<StrategyKind>,
    /// Predictions farther than this from the current offset are penalized.
    pub max_search_distance: u64,
    /// Whether outcomes should feed back into strategies.
    pub learning_enabled: bool,
    recently_visited: VecDeque<u64>,
    favorite_ranges: VecDeque<(u64, u64)>,
    rejected_offsets: HashSet<u64>,
    min_confidence: f64,
    max_hints: usize,
    learning_rate: f64,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SessionContext {
    pub fn new(current_offset: u64) -> Self {
        Self {
            current_offset,
            preferred_strategies: Vec::new(),
            max_search_distance: 0x100000,
            learning_enabled: true,
            recently_visited: VecDeque::new(),
            favorite_ranges: VecDeque::new(),
            rejected_offsets: HashSet::new(),
            min_confidence: 0.3,
            max_hints: 10,
            learning_rate: 0.1,
        }
    }

    /// Record a visit; the offset moves to the front of the recency list.
    pub fn visit(&mut self, offset: u64) {
        self.recently_visited.retain(|&o| o != offset);
        self.recently_visited.push_front(offset);
        self.recently_visited.truncate(MAX_RECENT_VISITS);
        self.current_offset = offset;
    }

    pub fn reject(&mut self, offset: u64) {
        self.rejected_offsets.insert(offset);
    }

    pub fn is_rejected(&self, offset: u64) -> bool {
        self.rejected_offsets.contains(&offset)
    }

    /// Add a favorite half-open range; the oldest favorite is dropped at capacity.
    pub fn add_favorite(&mut self, start: u64, end: u64) -> Result<(), InvariantError> {
        if start >= end {
            return Err(InvariantError::EmptyRange { start, end });
        }
        if self.favorite_ranges.len() == MAX_FAVORITE_RANGES {
            self.favorite_ranges.pop_front();
        }
        self.favorite_ranges.push_back((start, end));
        Ok(())
    }

    pub fn is_favorite(&self, offset: u64) -> bool {
        self.favorite_ranges
            .iter()
            .any(|&(start, end)| (start..end).contains(&offset))
    }

    /// Most-recent-first.
    pub fn recently_visited(&self) -> impl Iterator<Item = u64> + '_ {
        self.recently_visited.iter().copied()
    }

    pub fn was_recently_visited(&self, offset: u64, within: usize) -> bool {
        self.recently_visited.iter().take(within).any(|&o| o == offset)
    }

    pub fn favorite_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.favorite_ranges.iter().copied()
    }

    pub fn rejected_offsets(&self) -> &HashSet<u64> {
        &self.rejected_offsets
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn set_min_confidence(&mut self, value: f64) -> Result<(), InvariantError> {
        if !check_unit(value) {
            return Err(InvariantError::ConfidenceOutOfRange(value));
        }
        self.min_confidence = value;
        Ok(())
    }

    pub fn max_hints(&self) -> usize {
        self.max_hints
    }

    pub fn set_max_hints(&mut self, value: usize) -> Result<(), InvariantError> {
        if value == 0 || value > MAX_HINTS_LIMIT {
            return Err(InvariantError::MaxHintsOutOfRange(value));
        }
        self.max_hints = value;
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, value: f64) -> Result<(), InvariantError> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(InvariantError::LearningRateOutOfRange(value));
        }
        self.learning_rate = value;
        Ok(())
    }

    /// Stable digest of everything that affects query results, used in
    /// cache keys.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.current_offset.to_le_bytes());
        for kind in &self.preferred_strategies {
            hasher.update(kind.as_str().as_bytes());
        }
        for offset in self.recently_visited.iter().take(10) {
            hasher.update(offset.to_le_bytes());
        }
        let mut rejected: Vec<_> = self.rejected_offsets.iter().copied().collect();
        rejected.sort_unstable();
        for offset in rejected {
            hasher.update(offset.to_le_bytes());
        }
        for (start, end) in &self.favorite_ranges {
            hasher.update(start.to_le_bytes());
            hasher.update(end.to_le_bytes());
        }
        hasher.update(self.max_search_distance.to_le_bytes());
        hasher.update(self.min_confidence.to_le_bytes());
        hasher.update((self.max_hints as u64).to_le_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}
