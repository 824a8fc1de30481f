//! Persistent tier: gzip-compressed JSON files plus a shared `index.json`.
//!
//! Every failure here degrades to a cache miss. Errors are logged and the
//! offending entry is purged, nothing is surfaced to callers. Index changes
//! are held in memory until [`CacheTier::maintain`], [`DiskTier::flush`], or
//! drop writes them out.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{CacheTier, CachedValue, TierStats};

/// Default number of files the disk tier keeps.
pub const DEFAULT_DISK_CAPACITY: usize = 5000;

const INDEX_FILE: &str = "index.json";
const ENTRY_EXTENSION: &str = "json.gz";
const MAX_STEM_LEN: usize = 80;

/// Errors raised inside the disk tier.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    created: DateTime<Utc>,
    last_access: DateTime<Utc>,
    size: u64,
}

#[derive(Default)]
struct DiskState {
    index: BTreeMap<String, DiskEntry>,
    index_dirty: bool,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Slow tier backed by a directory of compressed entries.
pub struct DiskTier {
    dir: PathBuf,
    capacity: usize,
    state: Mutex<DiskState>,
}

impl DiskTier {
    /// Open (creating if needed) a disk tier rooted at `dir`.
    ///
    /// An unreadable or corrupt `index.json` starts the tier empty.
    pub fn open(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let index = match load_index(&dir.join(INDEX_FILE)) {
            Ok(index) => index,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "disk cache index unreadable, starting empty");
                BTreeMap::new()
            }
        };
        info!(dir = %dir.display(), entries = index.len(), "disk cache opened");

        Ok(Self {
            dir,
            capacity: capacity.max(1),
            state: Mutex::new(DiskState {
                index,
                ..DiskState::default()
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file that stores `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(entry_file_name(key))
    }

    /// Write the index to disk if it changed since the last flush.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        if state.index_dirty {
            self.save_index(&mut state);
        }
    }

    fn save_index(&self, state: &mut DiskState) {
        let path = self.dir.join(INDEX_FILE);
        let result = serde_json::to_vec_pretty(&state.index)
            .map_err(CacheError::from)
            .and_then(|json| atomic_write(&path, &json));
        match result {
            Ok(()) => state.index_dirty = false,
            Err(e) => warn!(error = %e, "failed to save disk cache index"),
        }
    }

    fn read_entry(&self, key: &str) -> Result<CachedValue, CacheError> {
        let path = self.entry_path(key);
        let file = std::fs::File::open(&path).map_err(|e| CacheError::io(&path, e))?;
        let mut json = Vec::new();
        GzDecoder::new(file)
            .read_to_end(&mut json)
            .map_err(|e| CacheError::io(&path, e))?;
        Ok(serde_json::from_slice(&json)?)
    }

    fn write_entry(&self, key: &str, value: &CachedValue) -> Result<u64, CacheError> {
        let path = self.entry_path(key);
        let json = serde_json::to_vec(value)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| CacheError::io(&path, e))?;
        let compressed = encoder.finish().map_err(|e| CacheError::io(&path, e))?;
        atomic_write(&path, &compressed)?;
        Ok(compressed.len() as u64)
    }

    fn delete_file(&self, key: &str) {
        let path = self.entry_path(key);
        if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "failed to delete cache file");
        }
    }

    fn evict_oldest(&self, state: &mut DiskState) {
        let oldest = state
            .index
            .iter()
            .min_by(|a, b| a.1.last_access.cmp(&b.1.last_access).then_with(|| a.0.cmp(b.0)))
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            state.index.remove(&key);
            self.delete_file(&key);
            state.evictions += 1;
            debug!(key = %key, "evicted oldest disk entry");
        }
    }
}

impl CacheTier for DiskTier {
    fn name(&self) -> &str {
        "disk"
    }

    fn get(&self, key: &str) -> Option<Arc<CachedValue>> {
        let mut state = self.state.lock();
        if !state.index.contains_key(key) {
            state.misses += 1;
            return None;
        }

        match self.read_entry(key) {
            Ok(value) => {
                if let Some(entry) = state.index.get_mut(key) {
                    entry.last_access = Utc::now();
                }
                state.index_dirty = true;
                state.hits += 1;
                Some(Arc::new(value))
            }
            Err(e) => {
                warn!(key, error = %e, "disk cache entry unreadable, purging");
                state.index.remove(key);
                self.delete_file(key);
                state.index_dirty = true;
                state.misses += 1;
                None
            }
        }
    }

    fn put(&self, key: &str, value: Arc<CachedValue>) {
        let size = match self.write_entry(key, &value) {
            Ok(size) => size,
            Err(e) => {
                warn!(key, error = %e, "failed to write disk cache entry");
                return;
            }
        };

        let mut state = self.state.lock();
        let now = Utc::now();
        let created = state.index.get(key).map_or(now, |entry| entry.created);
        state.index.insert(
            key.to_string(),
            DiskEntry {
                created,
                last_access: now,
                size,
            },
        );
        while state.index.len() > self.capacity {
            self.evict_oldest(&mut state);
        }
        state.index_dirty = true;
    }

    fn remove(&self, key: &str) -> bool {
        let existed = {
            let mut state = self.state.lock();
            let existed = state.index.remove(key).is_some();
            state.index_dirty |= existed;
            existed
        };
        self.delete_file(key);
        existed
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let is_entry = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(ENTRY_EXTENSION));
                    if is_entry && let Err(e) = std::fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "failed to delete cache file");
                    }
                }
            }
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "failed to list disk cache"),
        }
        state.index.clear();
        self.save_index(&mut state);
    }

    fn keys(&self) -> Vec<String> {
        self.state.lock().index.keys().cloned().collect()
    }

    fn stats(&self) -> TierStats {
        let state = self.state.lock();
        TierStats {
            name: self.name().to_string(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.index.len(),
            capacity: self.capacity,
        }
    }

    fn maintain(&self) {
        let mut state = self.state.lock();
        let missing: Vec<String> = state
            .index
            .keys()
            .filter(|key| !self.entry_path(key).exists())
            .cloned()
            .collect();
        for key in &missing {
            state.index.remove(key);
        }
        if !missing.is_empty() {
            debug!(purged = missing.len(), "dropped index entries with no file");
            state.index_dirty = true;
        }
        if state.index_dirty {
            self.save_index(&mut state);
        }
    }
}

impl Drop for DiskTier {
    fn drop(&mut self) {
        self.flush();
    }
}

/// File name for a cache key: sanitized key plus a short hash of the raw key.
fn entry_file_name(key: &str) -> String {
    let stem: String = key
        .chars()
        .take(MAX_STEM_LEN)
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let digest = Sha256::digest(key.as_bytes());
    format!("{stem}-{}.{ENTRY_EXTENSION}", hex::encode(&digest[..4]))
}

fn load_index(path: &Path) -> Result<BTreeMap<String, DiskEntry>, CacheError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Write via a temp file then rename, so readers never see a partial file.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents).map_err(|e| CacheError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| CacheError::io(path, e))?;
    Ok(())
}
