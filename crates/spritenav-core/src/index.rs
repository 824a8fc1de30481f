//! Offset-sorted spatial index over discovered objects.
//!
//! One [`SpatialIndex`] exists per source blob. Every operation takes the
//! index's single mutex, so mutations are serialized and each read sees a
//! consistent sorted view at call time.
//!
//! The index also owns the persisted form of a source: [`IndexSnapshot`], a
//! JSON document of every object plus aggregate statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{DiscoveredObject, Fingerprint, InvariantError, RegionKind, StrategyKind};

/// Default bucket width of the density histogram.
pub const DEFAULT_DENSITY_BUCKET: u64 = 0x10000;

/// Aggregate view of an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub total_objects: usize,
    /// Sum of encoded sizes divided by blob size; zero when the blob size is unknown.
    pub coverage_ratio: f64,
    /// Bucket start offset → object count.
    pub density_map: BTreeMap<u64, usize>,
    pub region_distribution: BTreeMap<RegionKind, usize>,
}

/// One object as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub offset: u64,
    pub offset_hex: String,
    pub encoded_size: u32,
    pub decoded_size: u32,
    pub confidence: f64,
    pub region: RegionKind,
    pub unit_count: u32,
    pub complexity: f64,
    pub density_ratio: f64,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Fingerprint::is_empty")]
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
}

impl From<&DiscoveredObject> for ObjectRecord {
    fn from(obj: &DiscoveredObject) -> Self {
        Self {
            offset: obj.offset(),
            offset_hex: format!("0x{:06X}", obj.offset()),
            encoded_size: obj.encoded_size(),
            decoded_size: obj.decoded_size(),
            confidence: obj.confidence(),
            region: obj.region(),
            unit_count: obj.unit_count(),
            complexity: obj.complexity(),
            density_ratio: obj.density_ratio(),
            strategy: obj.strategy(),
            metadata: obj.metadata().clone(),
            fingerprint: obj.fingerprint().clone(),
            discovered_at: Some(obj.discovered_at()),
        }
    }
}

impl TryFrom<ObjectRecord> for DiscoveredObject {
    type Error = InvariantError;

    fn try_from(record: ObjectRecord) -> Result<Self, Self::Error> {
        let mut builder = DiscoveredObject::builder(
            record.offset,
            record.encoded_size,
            record.decoded_size,
        )
        .confidence(record.confidence)
        .region(record.region)
        .unit_count(record.unit_count)
        .complexity(record.complexity)
        .strategy(record.strategy)
        .fingerprint(record.fingerprint);
        for (key, value) in record.metadata {
            builder = builder.metadata(key, value);
        }
        if let Some(at) = record.discovered_at {
            builder = builder.discovered_at(at);
        }
        builder.build()
    }
}

/// Persisted form of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u64,
    pub blob_size: u64,
    pub objects: Vec<ObjectRecord>,
    #[serde(default)]
    pub statistics: IndexStatistics,
}

impl IndexSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug)]
struct IndexState {
    objects: Vec<DiscoveredObject>,
    blob_size: u64,
    density_bucket: u64,
    version: u64,
    /// `None` when dirty.
    statistics: Option<IndexStatistics>,
}

impl IndexState {
    fn position(&self, offset: u64) -> Result<usize, usize> {
        self.objects.binary_search_by_key(&offset, |o| o.offset())
    }

    fn lower_bound(&self, offset: u64) -> usize {
        self.objects.partition_point(|o| o.offset() < offset)
    }

    fn touch(&mut self) {
        self.version += 1;
        self.statistics = None;
    }

    fn density_map(&self, bucket: u64) -> BTreeMap<u64, usize> {
        let mut map = BTreeMap::new();
        if self.blob_size == 0 || bucket == 0 {
            return map;
        }
        for obj in &self.objects {
            *map.entry((obj.offset() / bucket) * bucket).or_insert(0) += 1;
        }
        map
    }

    fn compute_statistics(&self) -> IndexStatistics {
        let covered: u64 = self
            .objects
            .iter()
            .map(|o| u64::from(o.encoded_size()))
            .sum();
        let coverage_ratio = if self.blob_size > 0 {
            covered as f64 / self.blob_size as f64
        } else {
            0.0
        };

        let mut region_distribution = BTreeMap::new();
        for obj in &self.objects {
            *region_distribution.entry(obj.region()).or_insert(0) += 1;
        }

        IndexStatistics {
            total_objects: self.objects.len(),
            coverage_ratio,
            density_map: self.density_map(self.density_bucket),
            region_distribution,
        }
    }
}

/// Sorted, mutex-guarded collection of the objects found in one source blob.
#[derive(Debug)]
pub struct SpatialIndex {
    state: Mutex<IndexState>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SpatialIndex {
    /// Create an empty index for a blob of `blob_size` bytes (0 = unknown).
    pub fn new(blob_size: u64) -> Self {
        Self::with_density_bucket(blob_size, DEFAULT_DENSITY_BUCKET)
    }

    pub fn with_density_bucket(blob_size: u64, density_bucket: u64) -> Self {
        Self {
            state: Mutex::new(IndexState {
                objects: Vec::new(),
                blob_size,
                density_bucket: density_bucket.max(1),
                version: 0,
                statistics: None,
            }),
        }
    }

    /// Rebuild an index from a snapshot. The snapshot's version is restored.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self, InvariantError> {
        let index = Self::new(snapshot.blob_size);
        for record in snapshot.objects {
            index.insert(DiscoveredObject::try_from(record)?);
        }
        index.state.lock().version = snapshot.version;
        Ok(index)
    }

    /// Insert an object, keeping the higher-confidence one on an offset clash.
    ///
    /// Returns `false` when an object with equal or higher confidence already
    /// sits at the same offset; the index is left unchanged in that case.
    pub fn insert(&self, object: DiscoveredObject) -> bool {
        let mut state = self.state.lock();
        let offset = object.offset();
        let confidence = object.confidence();

        match state.position(offset) {
            Ok(pos) => {
                if state.objects[pos].confidence() >= confidence {
                    return false;
                }
                state.objects[pos] = object;
            }
            Err(pos) => state.objects.insert(pos, object),
        }
        state.touch();

        debug!(offset = %format!("{offset:#08X}"), confidence, "Indexed object");
        true
    }

    /// Remove the object at exactly `offset`.
    pub fn remove(&self, offset: u64) -> bool {
        let mut state = self.state.lock();
        match state.position(offset) {
            Ok(pos) => {
                state.objects.remove(pos);
                state.touch();
                debug!(offset = %format!("{offset:#08X}"), "Removed object");
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, offset: u64) -> Option<DiscoveredObject> {
        let state = self.state.lock();
        state
            .position(offset)
            .ok()
            .map(|pos| state.objects[pos].clone())
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.state.lock().position(offset).is_ok()
    }

    /// Objects with `start <= offset < end`, in offset order.
    pub fn range(&self, start: u64, end: u64) -> Vec<DiscoveredObject> {
        let state = self.state.lock();
        if start >= end {
            return Vec::new();
        }
        let lo = state.lower_bound(start);
        let hi = state.lower_bound(end);
        state.objects[lo..hi].to_vec()
    }

    pub fn by_region(&self, region: RegionKind) -> Vec<DiscoveredObject> {
        self.state
            .lock()
            .objects
            .iter()
            .filter(|o| o.region() == region)
            .cloned()
            .collect()
    }

    /// Up to `count` objects closest to `offset`, as `(object, |offset delta|)`
    /// sorted by distance (ties broken by offset).
    ///
    /// Each direction is walked outward from the insertion point and stops
    /// once `max_distance` is exceeded or `count` candidates were collected on
    /// that side.
    pub fn nearest(
        &self,
        offset: u64,
        count: usize,
        max_distance: Option<u64>,
    ) -> Vec<(DiscoveredObject, u64)> {
        let state = self.state.lock();
        if count == 0 || state.objects.is_empty() {
            return Vec::new();
        }
        let within = |d: u64| max_distance.is_none_or(|max| d <= max);
        let split = state.lower_bound(offset);
        let mut candidates = Vec::with_capacity(count * 2);

        for obj in state.objects[..split].iter().rev().take(count) {
            let distance = offset - obj.offset();
            if !within(distance) {
                break;
            }
            candidates.push((obj.clone(), distance));
        }
        for obj in state.objects[split..].iter().take(count) {
            let distance = obj.offset() - offset;
            if !within(distance) {
                break;
            }
            candidates.push((obj.clone(), distance));
        }

        candidates.sort_by_key(|(obj, distance)| (*distance, obj.offset()));
        candidates.truncate(count);
        candidates
    }

    /// Unoccupied `(start, end)` ranges of at least `min_size` bytes between
    /// consecutive objects.
    pub fn gaps(&self, min_size: u64) -> Vec<(u64, u64)> {
        let state = self.state.lock();
        state
            .objects
            .windows(2)
            .filter_map(|pair| {
                let start = pair[0].end_offset();
                let end = pair[1].offset();
                (end > start && end - start >= min_size).then_some((start, end))
            })
            .collect()
    }

    /// Aggregate statistics, recomputed only after a mutation.
    pub fn statistics(&self) -> IndexStatistics {
        let mut state = self.state.lock();
        if let Some(stats) = &state.statistics {
            return stats.clone();
        }
        let stats = state.compute_statistics();
        state.statistics = Some(stats.clone());
        stats
    }

    /// Object count per `bucket`-sized slice of the blob.
    pub fn density_map(&self, bucket: u64) -> BTreeMap<u64, usize> {
        self.state.lock().density_map(bucket)
    }

    /// Run `f` against the sorted objects while holding the lock.
    ///
    /// `f` must not call back into this index.
    pub fn with_objects<R>(&self, f: impl FnOnce(&[DiscoveredObject]) -> R) -> R {
        let state = self.state.lock();
        f(&state.objects)
    }

    /// Sorted copy of every object.
    pub fn objects(&self) -> Vec<DiscoveredObject> {
        self.state.lock().objects.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.objects.clear();
        state.touch();
        info!("Cleared spatial index");
    }

    /// Monotonic counter bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn blob_size(&self) -> u64 {
        self.state.lock().blob_size
    }

    pub fn set_blob_size(&self, blob_size: u64) {
        let mut state = self.state.lock();
        if state.blob_size != blob_size {
            state.blob_size = blob_size;
            state.statistics = None;
        }
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let mut state = self.state.lock();
        let statistics = match &state.statistics {
            Some(stats) => stats.clone(),
            None => {
                let stats = state.compute_statistics();
                state.statistics = Some(stats.clone());
                stats
            }
        };
        IndexSnapshot {
            version: state.version,
            blob_size: state.blob_size,
            objects: state.objects.iter().map(ObjectRecord::from).collect(),
            statistics,
        }
    }
}
