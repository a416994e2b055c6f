//! Bounded LRU cache of decoded structures.
//!
//! All mutable state (entries, recency order, in-flight loads) lives behind a
//! single mutex that is never held across an await point. Counters are atomics
//! so `stats()` only locks long enough to copy the entry sizes.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::schematic::{DecodeError, StructureModel};

/// Where a cached structure came from (diagnostics only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleSource {
    File(PathBuf),
    ConfigEntry,
}

/// A decoded structure as stored in the cache.
///
/// Handed out as `Arc<StructureHandle>`: eviction drops the cache's reference
/// only, so a paste that already holds the handle keeps reading valid data.
#[derive(Debug)]
pub struct StructureHandle {
    name: String,
    source: HandleSource,
    loaded_at: DateTime<Utc>,
    model: Arc<StructureModel>,
}

impl StructureHandle {
    pub fn new(name: impl Into<String>, source: HandleSource, model: StructureModel) -> Self {
        Self {
            name: name.into(),
            source,
            loaded_at: Utc::now(),
            model: Arc::new(model),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &HandleSource {
        &self.source
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn loaded_at_epoch_millis(&self) -> i64 {
        self.loaded_at.timestamp_millis()
    }

    pub fn model(&self) -> &Arc<StructureModel> {
        &self.model
    }

    /// Approximate heap footprint of the decoded model.
    ///
    /// Counts the dense cell array and the palette; allocator overhead and
    /// spare capacity are ignored, so treat this as an estimate only.
    pub fn estimated_memory_bytes(&self) -> u64 {
        let cells = self.model.cell_count() * std::mem::size_of::<u32>();
        let palette = std::mem::size_of_val(self.model.palette());
        (cells + palette + std::mem::size_of::<StructureModel>()) as u64
    }
}

/// Failure of a cache load
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The decode task was aborted or panicked before producing a model
    #[error("load of '{0}' did not complete")]
    Cancelled(String),
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStatistics {
    pub size: usize,
    pub max_size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub load_count: u64,
    /// Sum of per-handle estimates, see [`StructureHandle::estimated_memory_bytes`]
    pub estimated_memory_bytes: u64,
}

impl CacheStatistics {
    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

type LoadOutcome = Result<Arc<StructureHandle>, LoadError>;
type Flight = Arc<OnceCell<LoadOutcome>>;

struct Entry {
    handle: Arc<StructureHandle>,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Access tick -> key; the first entry is the least recently used
    recency: BTreeMap<u64, String>,
    in_flight: HashMap<String, Flight>,
    clock: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Mark an entry as most recently used and return it
    fn touch(&mut self, name: &str) -> Option<Arc<StructureHandle>> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(name)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, name.to_string());
        Some(entry.handle.clone())
    }

    /// Insert as most recently used, evicting until within `max_size`.
    /// Returns the evicted keys.
    fn insert(&mut self, handle: Arc<StructureHandle>, max_size: usize) -> Vec<String> {
        let tick = self.next_tick();
        let name = handle.name().to_string();
        if let Some(previous) = self.entries.insert(name.clone(), Entry { handle, tick }) {
            self.recency.remove(&previous.tick);
        }
        self.recency.insert(tick, name);

        let mut evicted = Vec::new();
        while self.entries.len() > max_size {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    fn remove(&mut self, name: &str) -> bool {
        self.in_flight.remove(name);
        match self.entries.remove(name) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                true
            }
            None => false,
        }
    }
}

/// Bounded name -> structure store with strict LRU eviction.
///
/// Capacity counts entries, not bytes. A capacity of zero disables caching:
/// every `load` decodes afresh and nothing is retained.
pub struct StructureCache {
    max_size: usize,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
}

impl StructureCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(Inner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_enabled(&self) -> bool {
        self.max_size > 0
    }

    /// Look up a cached handle without loading.
    ///
    /// A hit counts toward `hit_count` and refreshes recency. A miss is not
    /// counted here; `load` records it.
    pub fn get(&self, name: &str) -> Option<Arc<StructureHandle>> {
        let handle = self.inner.lock().touch(name)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(handle)
    }

    /// Return the cached handle or decode it with `loader`.
    ///
    /// At most one decode per key runs at a time: concurrent callers for the
    /// same key wait for and share the first caller's outcome, including its
    /// error. The loader runs on the blocking pool.
    pub async fn load<F>(&self, name: &str, source: HandleSource, loader: F) -> LoadOutcome
    where
        F: FnOnce() -> Result<StructureModel, DecodeError> + Send + 'static,
    {
        if !self.is_enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.loads.fetch_add(1, Ordering::Relaxed);
            return run_loader(name, source, loader).await;
        }

        let flight = {
            let mut inner = self.inner.lock();
            if let Some(handle) = inner.touch(name) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Loaded structure '{}' from cache", name);
                return Ok(handle);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            inner
                .in_flight
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = flight
            .get_or_init(|| async move {
                self.loads.fetch_add(1, Ordering::Relaxed);
                run_loader(name, source, loader).await
            })
            .await
            .clone();

        // Whoever gets here first publishes the result; a flight that was
        // cleared or invalidated meanwhile is discarded
        let mut inner = self.inner.lock();
        let current = inner
            .in_flight
            .get(name)
            .is_some_and(|f| Arc::ptr_eq(f, &flight));
        if current {
            inner.in_flight.remove(name);
            if let Ok(handle) = &outcome {
                for evicted in inner.insert(handle.clone(), self.max_size) {
                    debug!("Evicted structure '{}' from cache (LRU)", evicted);
                }
            }
        }
        outcome
    }

    /// Drop one entry; no-op when absent. A load in progress for the key is
    /// forgotten, so its result will not be stored.
    pub fn invalidate(&self, name: &str) {
        if self.inner.lock().remove(name) {
            debug!("Cleared structure '{}' from cache", name);
        }
    }

    /// Drop every entry and forget in-progress loads
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.in_flight.clear();
        debug!("Structure cache cleared");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys from least to most recently used
    pub fn names(&self) -> Vec<String> {
        self.inner.lock().recency.values().cloned().collect()
    }

    pub fn stats(&self) -> CacheStatistics {
        let (size, estimated_memory_bytes) = {
            let inner = self.inner.lock();
            let memory = inner
                .entries
                .values()
                .map(|e| e.handle.estimated_memory_bytes())
                .sum();
            (inner.entries.len(), memory)
        };

        CacheStatistics {
            size,
            max_size: self.max_size,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            load_count: self.loads.load(Ordering::Relaxed),
            estimated_memory_bytes,
        }
    }
}

async fn run_loader<F>(name: &str, source: HandleSource, loader: F) -> LoadOutcome
where
    F: FnOnce() -> Result<StructureModel, DecodeError> + Send + 'static,
{
    match tokio::task::spawn_blocking(loader).await {
        Ok(Ok(model)) => Ok(Arc::new(StructureHandle::new(name, source, model))),
        Ok(Err(err)) => Err(err.into()),
        Err(err) => {
            warn!("Decode task for '{}' did not complete: {}", name, err);
            Err(LoadError::Cancelled(name.to_string()))
        }
    }
}
