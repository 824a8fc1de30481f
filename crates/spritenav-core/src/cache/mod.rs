//! Multi-tier cache for snapshots, prediction lists, and pattern analyses.
//!
//! Tiers are ordered fast to slow. A lookup probes them in order and, on a
//! hit in a slower tier, copies the value into every faster tier. Writes go
//! to all tiers. Work that is expensive to compute can be queued with
//! [`TieredCache::schedule_precompute`] and is drained by the background
//! maintenance loop.

pub mod disk;
pub mod memory;

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::background::PeriodicTask;
use crate::index::IndexSnapshot;
use crate::intelligence::PatternAnalysis;
use crate::types::Prediction;

pub use disk::{CacheError, DEFAULT_DISK_CAPACITY, DiskTier};
pub use memory::{DEFAULT_MEMORY_CAPACITY, MemoryTier};

/// Default interval between maintenance passes.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on how long shutdown waits for the maintenance task.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything the cache can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CachedValue {
    Snapshot(IndexSnapshot),
    Predictions(Vec<Prediction>),
    Analysis(PatternAnalysis),
}

/// Counters reported by a single tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// One level of the cache.
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<Arc<CachedValue>>;

    fn put(&self, key: &str, value: Arc<CachedValue>);

    /// Returns true if the key was present.
    fn remove(&self, key: &str) -> bool;

    fn clear(&self);

    fn keys(&self) -> Vec<String>;

    fn stats(&self) -> TierStats;

    /// Periodic housekeeping, called from the maintenance loop.
    fn maintain(&self) {}
}

/// A queued computation whose result is stored under its key.
pub type PrecomputeFn = Box<dyn FnOnce() -> Result<CachedValue, String> + Send>;

struct PrecomputeJob {
    key: String,
    compute: PrecomputeFn,
}

/// Aggregate view over every tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub tiers: Vec<TierStats>,
    pub pending_precompute: usize,
}

impl CacheStatistics {
    /// Hit rate counting a lookup as a hit if any tier served it.
    pub fn overall_hit_rate(&self) -> f64 {
        let Some(fastest) = self.tiers.first() else {
            return 0.0;
        };
        let lookups = fastest.hits + fastest.misses;
        if lookups == 0 {
            return 0.0;
        }
        let served: u64 = self.tiers.iter().map(|t| t.hits).sum();
        (served as f64 / lookups as f64).min(1.0)
    }
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub jobs_run: usize,
    pub jobs_failed: usize,
}

/// Ordered stack of tiers, fast to slow.
pub struct TieredCache {
    memory: Arc<MemoryTier>,
    tiers: Vec<Arc<dyn CacheTier>>,
    precompute: Mutex<VecDeque<PrecomputeJob>>,
    maintenance: Mutex<Option<PeriodicTask>>,
}

/// Key under which an index snapshot for `source` is cached.
pub fn snapshot_key(source: &str) -> String {
    format!("snapshot_{source}")
}

/// Key for a prediction list. `context` is a session fingerprint; only its
/// first 8 characters are used.
pub fn predictions_key(source: &str, offset: u64, context: &str) -> String {
    let ctx: String = context.chars().take(8).collect();
    format!("predictions_{source}_{offset:08X}_{ctx}")
}

/// Key under which the pattern analysis for `source` is cached.
pub fn analysis_key(source: &str) -> String {
    format!("analysis_{source}")
}

impl TieredCache {
    /// Memory tier only.
    pub fn in_memory(memory_capacity: usize) -> Self {
        Self::with_tiers(Arc::new(MemoryTier::new(memory_capacity)), Vec::new())
    }

    /// Memory tier in front of a disk tier rooted at `dir`.
    ///
    /// If the directory cannot be prepared the cache falls back to memory
    /// only and logs a warning.
    pub fn with_disk(memory_capacity: usize, dir: impl Into<PathBuf>, disk_capacity: usize) -> Self {
        let dir = dir.into();
        let memory = Arc::new(MemoryTier::new(memory_capacity));
        match DiskTier::open(&dir, disk_capacity) {
            Ok(disk) => Self::with_tiers(memory, vec![Arc::new(disk) as Arc<dyn CacheTier>]),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "disk cache unavailable, using memory only");
                Self::with_tiers(memory, Vec::new())
            }
        }
    }

    /// Build from a memory tier plus any number of slower tiers, in order.
    pub fn with_tiers(memory: Arc<MemoryTier>, slower: Vec<Arc<dyn CacheTier>>) -> Self {
        let mut tiers: Vec<Arc<dyn CacheTier>> = Vec::with_capacity(slower.len() + 1);
        tiers.push(Arc::clone(&memory) as Arc<dyn CacheTier>);
        tiers.extend(slower);
        Self {
            memory,
            tiers,
            precompute: Mutex::new(VecDeque::new()),
            maintenance: Mutex::new(None),
        }
    }

    pub fn tier_names(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedValue>> {
        for (depth, tier) in self.tiers.iter().enumerate() {
            if let Some(value) = tier.get(key) {
                for faster in &self.tiers[..depth] {
                    faster.put(key, Arc::clone(&value));
                }
                if depth > 0 {
                    debug!(key, tier = tier.name(), "promoted cache entry");
                }
                return Some(value);
            }
        }
        None
    }

    pub fn put(&self, key: &str, value: CachedValue) {
        let value = Arc::new(value);
        for tier in &self.tiers {
            tier.put(key, Arc::clone(&value));
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.tiers
            .iter()
            .fold(false, |removed, tier| tier.remove(key) | removed)
    }

    /// Drop the fast tier's copy of `key` if no caller still holds it.
    pub fn release(&self, key: &str) -> bool {
        self.memory.release(key)
    }

    /// Remove every key mentioning `source` from every tier.
    pub fn invalidate(&self, source: &str) -> usize {
        let mut removed = 0;
        for tier in &self.tiers {
            for key in tier.keys() {
                if key.contains(source) && tier.remove(&key) {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(source, removed, "invalidated cache entries");
        }
        removed
    }

    /// Remove cached predictions and analysis for `source`, keeping its
    /// snapshot.
    pub fn invalidate_derived(&self, source: &str) -> usize {
        let analysis = analysis_key(source);
        let predictions = format!("predictions_{source}_");
        let mut removed = 0;
        for tier in &self.tiers {
            for key in tier.keys() {
                if (key == analysis || key.starts_with(&predictions)) && tier.remove(&key) {
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn get_snapshot(&self, source: &str) -> Option<IndexSnapshot> {
        match self.get(&snapshot_key(source))?.as_ref() {
            CachedValue::Snapshot(snapshot) => Some(snapshot.clone()),
            other => {
                warn!(source, found = variant_name(other), "unexpected value under snapshot key");
                None
            }
        }
    }

    pub fn put_snapshot(&self, source: &str, snapshot: IndexSnapshot) {
        self.put(&snapshot_key(source), CachedValue::Snapshot(snapshot));
    }

    pub fn get_predictions(&self, source: &str, offset: u64, context: &str) -> Option<Vec<Prediction>> {
        match self.get(&predictions_key(source, offset, context))?.as_ref() {
            CachedValue::Predictions(list) => Some(list.clone()),
            other => {
                warn!(source, found = variant_name(other), "unexpected value under predictions key");
                None
            }
        }
    }

    pub fn put_predictions(&self, source: &str, offset: u64, context: &str, predictions: Vec<Prediction>) {
        self.put(
            &predictions_key(source, offset, context),
            CachedValue::Predictions(predictions),
        );
    }

    pub fn get_analysis(&self, source: &str) -> Option<PatternAnalysis> {
        match self.get(&analysis_key(source))?.as_ref() {
            CachedValue::Analysis(analysis) => Some(analysis.clone()),
            other => {
                warn!(source, found = variant_name(other), "unexpected value under analysis key");
                None
            }
        }
    }

    pub fn put_analysis(&self, source: &str, analysis: PatternAnalysis) {
        self.put(&analysis_key(source), CachedValue::Analysis(analysis));
    }

    /// Queue a computation to run on the next maintenance pass.
    pub fn schedule_precompute(&self, key: impl Into<String>, compute: PrecomputeFn) {
        let key = key.into();
        debug!(key = %key, "scheduled precompute job");
        self.precompute.lock().push_back(PrecomputeJob { key, compute });
    }

    pub fn pending_precompute(&self) -> usize {
        self.precompute.lock().len()
    }

    /// Drain the precompute queue, then run housekeeping on every tier.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let jobs: Vec<PrecomputeJob> = self.precompute.lock().drain(..).collect();
        let mut report = MaintenanceReport::default();

        for job in jobs {
            let PrecomputeJob { key, compute } = job;
            match catch_unwind(AssertUnwindSafe(compute)) {
                Ok(Ok(value)) => {
                    self.put(&key, value);
                    report.jobs_run += 1;
                }
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "precompute job failed");
                    report.jobs_failed += 1;
                }
                Err(_) => {
                    warn!(key = %key, "precompute job panicked");
                    report.jobs_failed += 1;
                }
            }
        }

        for tier in &self.tiers {
            tier.maintain();
        }
        report
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            tiers: self.tiers.iter().map(|t| t.stats()).collect(),
            pending_precompute: self.pending_precompute(),
        }
    }

    pub fn clear_all(&self) {
        for tier in &self.tiers {
            tier.clear();
        }
        self.precompute.lock().clear();
        info!("cleared all cache tiers");
    }

    /// Start the background maintenance loop. Calling it again while a loop
    /// is running does nothing.
    pub fn start_maintenance(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(PeriodicTask::spawn("cache-maintenance", interval, move || {
            let Some(cache) = weak.upgrade() else {
                return ControlFlow::Break(());
            };
            let report = cache.run_maintenance();
            if report.jobs_run + report.jobs_failed > 0 {
                debug!(
                    jobs_run = report.jobs_run,
                    jobs_failed = report.jobs_failed,
                    "cache maintenance pass"
                );
            }
            ControlFlow::Continue(())
        }));
    }

    pub fn maintenance_running(&self) -> bool {
        self.maintenance.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the maintenance loop, waiting at most `timeout`, then flush tiers.
    pub async fn shutdown(&self, timeout: Duration) {
        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            task.stop(timeout).await;
        }
        for tier in &self.tiers {
            tier.maintain();
        }
    }
}

fn variant_name(value: &CachedValue) -> &'static str {
    match value {
        CachedValue::Snapshot(_) => "snapshot",
        CachedValue::Predictions(_) => "predictions",
        CachedValue::Analysis(_) => "analysis",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SpatialIndex;
    use crate::types::StrategyKind;
    use pretty_assertions::assert_eq;

    fn sample_predictions() -> Vec<Prediction> {
        vec![Prediction::new(0x200, 0.6, StrategyKind::PatternBased)]
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(snapshot_key("rom"), "snapshot_rom");
        assert_eq!(
            predictions_key("rom", 0x1A2B, "0123456789abcdef"),
            "predictions_rom_00001A2B_01234567"
        );
        assert_eq!(analysis_key("rom"), "analysis_rom");
    }

    #[test]
    fn test_typed_helpers_round_trip() {
        let cache = TieredCache::in_memory(16);
        cache.put_predictions("rom", 0x100, "ctx", sample_predictions());
        assert_eq!(cache.get_predictions("rom", 0x100, "ctx"), Some(sample_predictions()));
        assert_eq!(cache.get_predictions("rom", 0x101, "ctx"), None);

        let snapshot = SpatialIndex::new(0x1000).snapshot();
        cache.put_snapshot("rom", snapshot.clone());
        assert_eq!(cache.get_snapshot("rom"), Some(snapshot));
    }

    #[test]
    fn test_wrong_variant_is_a_miss() {
        let cache = TieredCache::in_memory(16);
        cache.put(&snapshot_key("rom"), CachedValue::Predictions(Vec::new()));
        assert!(cache.get_snapshot("rom").is_none());
    }

    #[test]
    fn test_promotion_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::with_disk(16, dir.path(), 16);
        cache.put_predictions("rom", 0x10, "ctx", sample_predictions());

        // Evict from memory only; the disk copy must be promoted back.
        let key = predictions_key("rom", 0x10, "ctx");
        assert!(cache.release(&key));
        assert_eq!(cache.statistics().tiers[0].size, 0);

        assert_eq!(cache.get_predictions("rom", 0x10, "ctx"), Some(sample_predictions()));
        let stats = cache.statistics();
        assert_eq!(stats.tiers[0].size, 1);
        assert_eq!(stats.tiers[1].hits, 1);
    }

    #[test]
    fn test_invalidate_removes_all_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::with_disk(16, dir.path(), 16);
        cache.put_predictions("alpha", 0x10, "ctx", sample_predictions());
        cache.put_predictions("beta", 0x10, "ctx", sample_predictions());
        cache.put_snapshot("alpha", SpatialIndex::new(0).snapshot());

        assert_eq!(cache.invalidate("alpha"), 4);
        assert!(cache.get_predictions("alpha", 0x10, "ctx").is_none());
        assert!(cache.get_snapshot("alpha").is_none());
        assert!(cache.get_predictions("beta", 0x10, "ctx").is_some());
    }

    #[test]
    fn test_invalidate_derived_keeps_snapshot() {
        let cache = TieredCache::in_memory(16);
        cache.put_predictions("rom", 0x10, "ctx", sample_predictions());
        cache.put_snapshot("rom", SpatialIndex::new(0).snapshot());

        assert_eq!(cache.invalidate_derived("rom"), 1);
        assert!(cache.get_snapshot("rom").is_some());
        assert!(cache.get_predictions("rom", 0x10, "ctx").is_none());
    }

    #[test]
    fn test_precompute_runs_and_isolates_failures() {
        let cache = TieredCache::in_memory(16);
        cache.schedule_precompute("good", Box::new(|| Ok(CachedValue::Predictions(Vec::new()))));
        cache.schedule_precompute("bad", Box::new(|| Err("boom".to_string())));
        cache.schedule_precompute("panics", Box::new(|| -> Result<CachedValue, String> { panic!("job exploded") }));
        assert_eq!(cache.pending_precompute(), 3);

        let report = cache.run_maintenance();
        assert_eq!(report, MaintenanceReport { jobs_run: 1, jobs_failed: 2 });
        assert!(cache.get("good").is_some());
        assert!(cache.get("bad").is_none());
        assert_eq!(cache.pending_precompute(), 0);
    }

    #[test]
    fn test_overall_hit_rate() {
        let cache = TieredCache::in_memory(16);
        cache.put("a", CachedValue::Predictions(Vec::new()));
        let _ = cache.get("a");
        let _ = cache.get("missing");
        assert!((cache.statistics().overall_hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_clear_all() {
        let cache = TieredCache::in_memory(16);
        cache.put("a", CachedValue::Predictions(Vec::new()));
        cache.schedule_precompute("b", Box::new(|| Ok(CachedValue::Predictions(Vec::new()))));
        cache.clear_all();
        assert!(cache.get("a").is_none());
        assert_eq!(cache.pending_precompute(), 0);
    }

    #[tokio::test]
    async fn test_background_maintenance_drains_queue() {
        let cache = Arc::new(TieredCache::in_memory(16));
        cache.schedule_precompute("warm", Box::new(|| Ok(CachedValue::Predictions(Vec::new()))));
        cache.start_maintenance(Duration::from_millis(10));
        assert!(cache.maintenance_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.shutdown(Duration::from_secs(2)).await;

        assert!(!cache.maintenance_running());
        assert_eq!(cache.pending_precompute(), 0);
        assert!(cache.get("warm").is_some());
    }
}
