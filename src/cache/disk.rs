//! File-backed persistence for cache entries.
//!
//! ```text
//! <cache.directory>/
//!   <md5(key)>.json
//! ```
//!
//! Each file holds the value plus metadata. Expired files are removed the
//! next time they are read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Cache metadata stored with each cached item
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    /// When the item was cached (Unix timestamp)
    cached_at: u64,

    /// When the item expires (Unix timestamp)
    expires_at: u64,

    /// Full cache key, kept for debugging
    key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedValue<V> {
    metadata: CacheMetadata,
    value: V,
}

/// Result of a disk lookup
#[derive(Debug, PartialEq)]
pub enum CacheResult<T> {
    /// Item was found and is valid
    Hit { value: T, remaining: Duration },

    /// Item was not found or unreadable
    Miss,

    /// Item was found but has expired
    Expired,
}

/// Directory of JSON cache files
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl DiskStore {
    /// Open (and create) a cache directory
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!("Disk cache at: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    /// Read an entry, evicting it if expired
    pub fn read<V: DeserializeOwned>(&self, key: &str) -> CacheResult<V> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return CacheResult::Miss,
        };

        let cached: CachedValue<V> = match serde_json::from_str(&content) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::debug!("Discarding unreadable cache file {}: {}", path.display(), e);
                let _ = fs::remove_file(&path);
                return CacheResult::Miss;
            }
        };

        let now = now_secs();
        if now >= cached.metadata.expires_at {
            tracing::debug!("Cache expired on disk: {}", key);
            let _ = fs::remove_file(&path);
            return CacheResult::Expired;
        }

        CacheResult::Hit {
            value: cached.value,
            remaining: Duration::from_secs(cached.metadata.expires_at - now),
        }
    }

    /// Serialize and write an entry
    pub fn write<V: Serialize>(&self, key: &str, value: &V, ttl: Duration) -> std::io::Result<()> {
        let now = now_secs();
        let cached = CachedValue {
            metadata: CacheMetadata {
                cached_at: now,
                expires_at: now + ttl.as_secs().max(1),
                key: key.to_string(),
            },
            value,
        };
        let content = serde_json::to_string_pretty(&cached)?;

        // Write then rename so a reader never sees a partial file
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)
    }

    /// Remove an entry; missing files are not an error
    pub fn remove(&self, key: &str) {
        let _ = fs::remove_file(self.path_for(key));
    }
}
