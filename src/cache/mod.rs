//! In-process TTL cache with single-flight computation.
//!
//! Concurrent [`Cache::get_or_compute`] calls for the same key share one
//! computation: each key maps to a `tokio::sync::OnceCell`, and only the
//! first caller's future runs. A computation that fails, or whose future is
//! dropped, leaves the cell empty, so no partial entry is ever visible.
//!
//! Expired entries are treated as absent on read and replaced lazily; there
//! is no background sweeper.
//!
//! Keys follow `{operation}:{normalized-identifier}`, see [`cache_key`].

mod disk;

pub use disk::{CacheResult, DiskStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Build a cache key from an operation name and a normalized identifier
pub fn cache_key(operation: &str, normalized: &str) -> String {
    format!("{}:{}", operation, normalized)
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

type Slot<V> = Arc<OnceCell<Entry<V>>>;

/// A keyed TTL cache
#[derive(Debug)]
pub struct Cache<V> {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot<V>>>,
    disk: Option<DiskStore>,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Create an in-memory cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            disk: None,
        }
    }

    /// Also persist entries to disk
    pub fn with_disk(mut self, disk: DiskStore) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<V>>> {
        // Every mutation is a single insert or remove, so a poisoned map is still whole
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current slot for `key`, replacing an expired one
    fn slot(&self, key: &str) -> Slot<V> {
        let mut slots = self.slots();
        match slots.get(key) {
            Some(slot) if slot.get().map_or(true, Entry::is_live) => slot.clone(),
            _ => {
                let slot: Slot<V> = Arc::new(OnceCell::new());
                slots.insert(key.to_string(), slot.clone());
                slot
            }
        }
    }

    /// Drop an empty slot nobody else is waiting on
    fn release(&self, key: &str, slot: &Slot<V>) {
        let mut slots = self.slots();
        if let Some(current) = slots.get(key) {
            if Arc::ptr_eq(current, slot) && current.get().is_none() && Arc::strong_count(slot) <= 2 {
                slots.remove(key);
            }
        }
    }

    fn from_disk(&self, key: &str) -> Option<Entry<V>> {
        match self.disk.as_ref()?.read::<V>(key) {
            CacheResult::Hit { value, remaining } => {
                tracing::debug!("Cache HIT on disk: {}", key);
                Some(Entry {
                    value,
                    expires_at: Instant::now() + remaining.min(self.ttl),
                })
            }
            CacheResult::Miss | CacheResult::Expired => None,
        }
    }

    fn to_disk(&self, key: &str, value: &V) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.write(key, value, self.ttl) {
                tracing::warn!("Failed to persist cache entry {}: {}", key, e);
            }
        }
    }

    /// Look up a live entry
    pub fn get(&self, key: &str) -> Option<V> {
        let memory = {
            let slots = self.slots();
            slots
                .get(key)
                .and_then(|slot| slot.get())
                .filter(|entry| entry.is_live())
                .map(|entry| entry.value.clone())
        };

        if memory.is_some() {
            tracing::debug!("Cache HIT: {}", key);
            return memory;
        }

        let entry = self.from_disk(key)?;
        let value = entry.value.clone();
        let slot = self.slot(key);
        let _ = slot.set(entry);
        Some(value)
    }

    /// Store a value, replacing any existing entry
    pub fn insert(&self, key: &str, value: V) {
        let entry = Entry {
            value: value.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        let slot = Arc::new(OnceCell::new_with(Some(entry)));
        self.slots().insert(key.to_string(), slot);
        self.to_disk(key, &value);
    }

    /// Return the cached value for `key`, or run `compute` once to produce it.
    ///
    /// Callers arriving while a computation is in flight wait for it instead
    /// of starting their own. If the computation fails, the error is returned
    /// to the caller that ran it, nothing is stored, and a waiting caller
    /// runs its own `compute`.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);

        let result = slot
            .get_or_try_init(|| async move {
                if let Some(entry) = self.from_disk(key) {
                    return Ok(entry);
                }

                tracing::debug!("Cache MISS: {}", key);
                let value = compute().await?;
                self.to_disk(key, &value);
                Ok(Entry {
                    value,
                    expires_at: Instant::now() + self.ttl,
                })
            })
            .await
            .map(|entry| entry.value.clone());

        if result.is_err() {
            self.release(key, &slot);
        }
        result
    }

    /// Remove an entry. Returns true if a live entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.slots().remove(key);
        if let Some(disk) = &self.disk {
            disk.remove(key);
        }
        removed
            .as_ref()
            .and_then(|slot| slot.get())
            .is_some_and(Entry::is_live)
    }

    /// Number of live entries held in memory
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.get().is_some_and(Entry::is_live))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
