//! LRU and promotion behaviour of the tiered cache.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use spritenav_core::cache::{CacheTier, CachedValue, DiskTier, MemoryTier, TieredCache};
use spritenav_core::{IndexSnapshot, SpatialIndex};
use tempfile::TempDir;

fn value(n: u64) -> CachedValue {
    CachedValue::Snapshot(SpatialIndex::new(n).snapshot())
}

fn snapshot_blob_size(value: &CachedValue) -> Option<u64> {
    match value {
        CachedValue::Snapshot(IndexSnapshot { blob_size, .. }) => Some(*blob_size),
        _ => None,
    }
}

#[test]
fn test_memory_tier_evicts_least_recently_used() {
    let tier = MemoryTier::new(3);
    for n in 0..5u64 {
        tier.put(&format!("k{n}"), Arc::new(value(n)));
    }
    let mut keys = tier.keys();
    keys.sort();
    assert_eq!(keys, vec!["k2", "k3", "k4"]);
    assert_eq!(tier.stats().evictions, 2);
}

#[test]
fn test_access_refreshes_recency() {
    let tier = MemoryTier::new(2);
    tier.put("a", Arc::new(value(1)));
    tier.put("b", Arc::new(value(2)));
    assert!(tier.get("a").is_some());
    tier.put("c", Arc::new(value(3)));

    assert!(tier.get("a").is_some());
    assert!(tier.get("b").is_none());
}

#[test]
fn test_disk_hit_promotes_to_memory() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(MemoryTier::new(8));
    let disk = Arc::new(DiskTier::open(dir.path(), 8).unwrap());
    disk.put("snapshot_rom", Arc::new(value(0x400)));

    let cache = TieredCache::with_tiers(Arc::clone(&memory), vec![Arc::clone(&disk) as Arc<dyn CacheTier>]);
    let first = cache.get("snapshot_rom").unwrap();
    assert_eq!(snapshot_blob_size(&first), Some(0x400));
    let disk_hits = disk.stats().hits;

    let second = cache.get("snapshot_rom").unwrap();
    assert_eq!(snapshot_blob_size(&second), Some(0x400));
    assert_eq!(disk.stats().hits, disk_hits);
    assert_eq!(disk.stats().misses, 0);
    assert_eq!(memory.stats().hits, 1);
}

#[test]
fn test_disk_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let cache = TieredCache::with_disk(4, dir.path(), 16);
        cache.put_snapshot("rom", SpatialIndex::new(0x800).snapshot());
    }
    let cache = TieredCache::with_disk(4, dir.path(), 16);
    assert_eq!(cache.get_snapshot("rom").map(|s| s.blob_size), Some(0x800));
    assert!(cache.get_snapshot("other").is_none());
}
