//! Named, size-bounded LRU caches with memory-pressure trimming.
//!
//! Every cache in the engine is created through [`CacheManager`], which keeps
//! a registry of type-erased handles so one pressure event can trim all of
//! them. Lookup-heavy caches (vocabulary mirror, dictionary verdicts,
//! suggestion lists) are trimmed less aggressively than per-session scratch
//! caches.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use lru::LruCache;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Learned-vocabulary mirror for the active language.
pub const VOCABULARY_CACHE: &str = "userdict.words";
/// Dictionary membership verdicts.
pub const WORD_CACHE: &str = "dictionary.words";
/// Ranked suggestion lists keyed by normalized prefix.
pub const SUGGESTION_CACHE: &str = "dictionary.suggestions";
/// Per-word processing results keyed by normalized buffer.
pub const RESULT_CACHE: &str = "processor.results";

/// Caches that keep the interactive path fast. Trimmed last, kept largest.
const CRITICAL_SET: [&str; 3] = [VOCABULARY_CACHE, WORD_CACHE, SUGGESTION_CACHE];

/// Retained fraction for UI-hidden/background signals, applied uniformly.
const BACKGROUND_RETAIN: f64 = 0.80;

/// How much pressure the system is under, derived from available memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    Normal,
    Moderate,
    Critical,
}

/// Host lifecycle and platform memory signals translated into trim actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySignal {
    /// Keyboard UI went off-screen.
    UiHidden,
    /// Host process moved to the background.
    Background,
    /// Platform reported moderate memory pressure.
    Moderate,
    /// Platform reported critical memory pressure.
    Critical,
}

impl MemorySignal {
    /// The pressure tier a signal maps to, if any. Lifecycle signals
    /// (`UiHidden`, `Background`) get a light uniform trim instead.
    pub fn pressure(self) -> Option<PressureLevel> {
        match self {
            MemorySignal::Moderate => Some(PressureLevel::Moderate),
            MemorySignal::Critical => Some(PressureLevel::Critical),
            MemorySignal::UiHidden | MemorySignal::Background => None,
        }
    }
}

/// A point-in-time memory reading from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStatus {
    pub available_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryStatus {
    /// Fraction of total memory still available, in `0.0..=1.0`.
    pub fn fraction_available(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.available_bytes as f64 / self.total_bytes as f64
    }
}

/// Where the manager reads memory numbers from. Hosts plug in whatever the
/// platform exposes; `None` means no reading was possible this round.
pub trait MemoryStatusSource: Send + Sync {
    fn status(&self) -> Option<MemoryStatus>;
}

/// Invoked once for every entry displaced from a cache (LRU eviction,
/// replacement by insert, trim, or full invalidation).
pub type EvictCallback<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Invoked after a pressure tier has been applied to all caches.
pub type PressureListener = Arc<dyn Fn(PressureLevel) + Send + Sync>;

/// Counters for one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub name: String,
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hits over total lookups; 0.0 when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Type-erased view the manager keeps of each cache.
trait TrimTarget: Send + Sync {
    fn name(&self) -> &str;
    fn len(&self) -> usize;
    fn trim_to(&self, target: usize) -> usize;
    fn invalidate_all(&self) -> usize;
    fn stats(&self) -> CacheStats;
}

struct CacheCore<K: Hash + Eq, V> {
    name: String,
    entries: Mutex<LruCache<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    on_evict: Option<EvictCallback<K, V>>,
}

impl<K: Hash + Eq, V> CacheCore<K, V> {
    fn lock_entries(&self) -> MutexGuard<'_, LruCache<K, V>> {
        // A poisoned cache mutex only means a panic elsewhere mid-operation;
        // the LRU structure itself stays consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify_evicted(&self, dropped: &[(K, V)]) {
        if let Some(cb) = &self.on_evict {
            for (k, v) in dropped {
                cb(k, v);
            }
        }
    }

    fn drain_to(&self, target: usize) -> Vec<(K, V)> {
        let mut dropped = Vec::new();
        let mut entries = self.lock_entries();
        while entries.len() > target {
            match entries.pop_lru() {
                Some(pair) => dropped.push(pair),
                None => break,
            }
        }
        dropped
    }
}

impl<K, V> TrimTarget for CacheCore<K, V>
where
    K: Hash + Eq + Send + 'static,
    V: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.lock_entries().len()
    }

    fn trim_to(&self, target: usize) -> usize {
        let dropped = self.drain_to(target);
        self.notify_evicted(&dropped);
        dropped.len()
    }

    fn invalidate_all(&self) -> usize {
        self.trim_to(0)
    }

    fn stats(&self) -> CacheStats {
        let (len, capacity) = {
            let entries = self.lock_entries();
            (entries.len(), entries.cap().get())
        };
        CacheStats {
            name: self.name.clone(),
            len,
            capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Typed handle to one managed cache. Cheap to clone; all clones share the
/// same entries and counters.
pub struct CacheHandle<K: Hash + Eq, V> {
    core: Arc<CacheCore<K, V>>,
}

impl<K: Hash + Eq, V> Clone for CacheHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K: Hash + Eq, V> CacheHandle<K, V> {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Look up a value, refreshing its recency. Counts a hit or a miss.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut entries = self.core.lock_entries();
        match entries.get(key) {
            Some(value) => {
                self.core.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.core.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value, displacing the LRU entry when at capacity. The
    /// eviction callback fires for the displaced entry, including an old
    /// value replaced under the same key.
    pub fn insert(&self, key: K, value: V) {
        let displaced = {
            let mut entries = self.core.lock_entries();
            entries.push(key, value)
        };
        if let Some(pair) = displaced {
            self.core.notify_evicted(std::slice::from_ref(&pair));
        }
    }

    /// Remove an entry, handing ownership back to the caller. The eviction
    /// callback does not fire.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.core.lock_entries().pop(key)
    }

    /// Membership check without touching recency or counters.
    pub fn contains(&self, key: &K) -> bool {
        self.core.lock_entries().contains(key)
    }

    pub fn len(&self) -> usize {
        self.core.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.lock_entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.core.lock_entries().cap().get()
    }

    /// Drop every entry, firing the eviction callback for each. Returns the
    /// number of entries dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.core.drain_to(0);
        self.core.notify_evicted(&dropped);
        dropped.len()
    }

    pub fn stats(&self) -> CacheStats
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        TrimTarget::stats(&*self.core)
    }
}

struct ManagerInner {
    caches: Mutex<AHashMap<String, Arc<dyn TrimTarget>>>,
    listeners: Mutex<Vec<PressureListener>>,
    poll_interval: Duration,
    low_fraction: f64,
    critical_fraction: f64,
}

/// Registry of every cache in the engine plus the trim policy applied to
/// them under memory pressure.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

impl CacheManager {
    pub fn new(config: &crate::Config) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                caches: Mutex::new(AHashMap::new()),
                listeners: Mutex::new(Vec::new()),
                poll_interval: config.memory_poll_interval(),
                low_fraction: config.low_memory_fraction,
                critical_fraction: config.critical_memory_fraction,
            }),
        }
    }

    /// Create and register a cache. Names must be unique and the capacity
    /// non-zero.
    pub fn create_cache<K, V>(
        &self,
        name: &str,
        capacity: usize,
        on_evict: Option<EvictCallback<K, V>>,
    ) -> Result<CacheHandle<K, V>>
    where
        K: Hash + Eq + Send + 'static,
        V: Send + 'static,
    {
        let capacity = match NonZeroUsize::new(capacity) {
            Some(c) => c,
            None => {
                return Err(Error::InvalidCacheCapacity {
                    name: name.to_string(),
                })
            }
        };

        let core = Arc::new(CacheCore {
            name: name.to_string(),
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            on_evict,
        });

        let mut caches = self.lock_caches();
        if caches.contains_key(name) {
            return Err(Error::DuplicateCache {
                name: name.to_string(),
            });
        }
        caches.insert(name.to_string(), core.clone() as Arc<dyn TrimTarget>);
        debug!(name, capacity = capacity.get(), "registered cache");

        Ok(CacheHandle { core })
    }

    /// Apply one pressure tier to every registered cache, then notify
    /// listeners. `Normal` is a no-op.
    pub fn handle_pressure(&self, level: PressureLevel) {
        if level == PressureLevel::Normal {
            return;
        }
        let mut evicted = 0usize;
        for cache in self.snapshot() {
            let ratio = retain_ratio(is_critical(cache.name()), level);
            let target = (cache.len() as f64 * ratio).floor() as usize;
            evicted += cache.trim_to(target);
        }
        debug!(?level, evicted, "trimmed caches under memory pressure");
        self.notify_listeners(level);
    }

    /// React to a host signal. Lifecycle signals apply a light uniform trim;
    /// platform pressure signals map onto [`handle_pressure`].
    ///
    /// [`handle_pressure`]: CacheManager::handle_pressure
    pub fn handle_signal(&self, signal: MemorySignal) {
        match signal.pressure() {
            Some(level) => self.handle_pressure(level),
            None => {
                let mut evicted = 0usize;
                for cache in self.snapshot() {
                    let target = (cache.len() as f64 * BACKGROUND_RETAIN).floor() as usize;
                    evicted += cache.trim_to(target);
                }
                debug!(?signal, evicted, "trimmed caches on lifecycle signal");
            }
        }
    }

    /// Drop every entry from every cache. Eviction callbacks fire per entry.
    pub fn force_cleanup(&self) {
        let mut evicted = 0usize;
        for cache in self.snapshot() {
            evicted += cache.invalidate_all();
        }
        info!(evicted, "forced cache cleanup");
    }

    /// Register a callback invoked after each applied pressure tier, so
    /// components can shed state the caches do not own.
    pub fn register_pressure_listener(&self, listener: PressureListener) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Counters for every registered cache, sorted by name.
    pub fn stats(&self) -> Vec<CacheStats> {
        let mut stats: Vec<CacheStats> = self.snapshot().iter().map(|c| c.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Poll a memory source on an interval and apply the derived pressure
    /// tier. Must be called within a Tokio runtime; abort the returned
    /// handle to stop the monitor.
    pub fn spawn_monitor(
        &self,
        source: Arc<dyn MemoryStatusSource>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.inner.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(status) = source.status() {
                    let level = manager.classify(status.fraction_available());
                    if level != PressureLevel::Normal {
                        manager.handle_pressure(level);
                    }
                }
            }
        })
    }

    fn classify(&self, fraction_available: f64) -> PressureLevel {
        if fraction_available < self.inner.critical_fraction {
            PressureLevel::Critical
        } else if fraction_available < self.inner.low_fraction {
            PressureLevel::Moderate
        } else {
            PressureLevel::Normal
        }
    }

    fn lock_caches(&self) -> MutexGuard<'_, AHashMap<String, Arc<dyn TrimTarget>>> {
        self.inner.caches.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> Vec<Arc<dyn TrimTarget>> {
        self.lock_caches().values().cloned().collect()
    }

    fn notify_listeners(&self, level: PressureLevel) {
        let listeners: Vec<PressureListener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(level);
        }
    }
}

fn is_critical(name: &str) -> bool {
    CRITICAL_SET.contains(&name)
}

/// Fraction of current entries a cache keeps at a given tier.
fn retain_ratio(critical_member: bool, level: PressureLevel) -> f64 {
    match level {
        PressureLevel::Normal => 1.0,
        PressureLevel::Moderate => {
            if critical_member {
                0.70
            } else {
                0.50
            }
        }
        PressureLevel::Critical => 0.25,
    }
}
