//! Opt-in memoization for lookup functions.
//!
//! Wrapping is explicit: code exposing a cacheable lookup wraps it once
//! through [`CacheRegistry::wrap`] and callers go through the wrapper. A
//! call is memoized only when both the registry switch and the wrapper's
//! own switch are on; the registry switch starts **off**, so nothing is
//! cached until the application opts in.
//!
//! Entries are bounded per wrapper (the least-recently-accessed entry is
//! evicted once `max_size` is exceeded) and can expire on a TTL measured
//! from last access. Hits, misses and expired hits are counted separately;
//! an expired hit never counts as a miss.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use callsheet::{CacheRegistry, Client};
//! # async fn demo(client: Arc<Client>) -> callsheet::Result<()> {
//! let registry = CacheRegistry::new();
//! let fetch_project = registry.wrap("fetch_project", {
//!     let client = Arc::clone(&client);
//!     move |name: String| {
//!         let client = Arc::clone(&client);
//!         async move {
//!             client
//!                 .fetch_first("projects", Some(&[("name", name.as_str())]))
//!                 .await
//!         }
//!     }
//! });
//!
//! registry.enable();
//! let first = fetch_project.call("Cosmos".to_string()).await?; // dispatches
//! let again = fetch_project.call("Cosmos".to_string()).await?; // served from cache
//! # assert_eq!(first, again);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;

use crate::telemetry;
use crate::Result;

const DEFAULT_MAX_SIZE: usize = 300;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ===== registry =====

/// Shared switch and roster for every wrapped function.
///
/// Clones share the same state, so one registry can be handed to each
/// module that wraps a lookup. Disabled by default.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    shared: Arc<RegistryShared>,
}

#[derive(Default)]
struct RegistryShared {
    enabled: AtomicBool,
    members: Mutex<Vec<Weak<dyn CacheMember + Send + Sync>>>,
}

trait CacheMember {
    fn reset(&self);
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let wrapped functions with their own switch on start memoizing.
    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::Relaxed);
    }

    /// Make every wrapped function call through again. Entries stay in
    /// place for a later re-enable.
    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }

    /// Clear every wrapped function's entries and counters. Wrappers that
    /// were dropped since are pruned from the roster.
    pub fn clear_all(&self) {
        let mut members = lock(&self.shared.members);
        members.retain(|member| match member.upgrade() {
            Some(state) => {
                state.reset();
                true
            }
            None => false,
        });
    }

    /// Wrap the async lookup `inner` under `name`.
    ///
    /// `inner` takes one serializable argument (use a tuple for several) and
    /// the argument's JSON serialization keys the entry mapping, so equal
    /// argument values share one entry. The wrapper's own switch starts on;
    /// memoization still waits for the registry switch.
    pub fn wrap<F, T>(&self, name: impl Into<String>, inner: F) -> Cacheable<F, T>
    where
        T: Send + 'static,
    {
        let state = Arc::new(CacheState {
            name: name.into(),
            enabled: AtomicBool::new(true),
            store: Mutex::new(CacheStore::new()),
        });
        // The unsizing needs its own binding; an annotation on the
        // `downgrade` call would pin its type parameter to the trait object.
        let weak = Arc::downgrade(&state);
        let member: Weak<dyn CacheMember + Send + Sync> = weak;
        lock(&self.shared.members).push(member);
        Cacheable {
            inner,
            state,
            registry: Arc::clone(&self.shared),
        }
    }
}

// ===== per-wrapper state =====

struct CacheEntry<T> {
    value: T,
    last_access: Instant,
    seq: u64,
}

struct CacheStore<T> {
    entries: HashMap<String, CacheEntry<T>>,
    // Monotonic access counter; the entry with the smallest seq is the
    // least recently accessed one, with no timestamp-resolution ties.
    seq: u64,
    hits: u64,
    misses: u64,
    expired_hits: u64,
    max_size: usize,
    ttl: Option<Duration>,
}

impl<T> CacheStore<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            seq: 0,
            hits: 0,
            misses: 0,
            expired_hits: 0,
            max_size: DEFAULT_MAX_SIZE,
            ttl: None,
        }
    }

    fn enforce_max_size(&mut self) {
        while self.entries.len() > self.max_size {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

struct CacheState<T> {
    name: String,
    enabled: AtomicBool,
    store: Mutex<CacheStore<T>>,
}

enum Probe<T> {
    Hit(T),
    Expired,
    Miss,
}

fn is_expired<T>(entry: &CacheEntry<T>, ttl: Option<Duration>) -> bool {
    ttl.is_some_and(|ttl| !ttl.is_zero() && entry.last_access.elapsed() > ttl)
}

impl<T> CacheState<T> {
    fn probe(&self, key: &str) -> Probe<T>
    where
        T: Clone,
    {
        let mut guard = lock(&self.store);
        let store = &mut *guard;
        store.seq += 1;
        let seq = store.seq;
        let Some(entry) = store.entries.get_mut(key) else {
            store.misses += 1;
            return Probe::Miss;
        };
        if is_expired(entry, store.ttl) {
            store.expired_hits += 1;
            return Probe::Expired;
        }
        entry.seq = seq;
        entry.last_access = Instant::now();
        store.hits += 1;
        Probe::Hit(entry.value.clone())
    }

    fn store_value(&self, key: String, value: T) {
        let mut guard = lock(&self.store);
        let store = &mut *guard;
        store.seq += 1;
        let entry = CacheEntry {
            value,
            last_access: Instant::now(),
            seq: store.seq,
        };
        store.entries.insert(key, entry);
        store.enforce_max_size();
    }
}

impl<T> CacheMember for CacheState<T> {
    fn reset(&self) {
        let mut store = lock(&self.store);
        store.entries.clear();
        store.hits = 0;
        store.misses = 0;
        store.expired_hits = 0;
    }
}

// ===== wrapper =====

/// Counter snapshot for one wrapped function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired_hits: u64,
    pub entries: usize,
}

/// A lookup function wrapped with memoization.
///
/// Obtained from [`CacheRegistry::wrap`]; call the lookup through
/// [`Cacheable::call`]. All configuration here is per wrapper and leaves
/// other wrapped functions alone.
pub struct Cacheable<F, T> {
    inner: F,
    state: Arc<CacheState<T>>,
    registry: Arc<RegistryShared>,
}

impl<F, T> Cacheable<F, T> {
    /// The name given at wrap time, used in telemetry labels.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    fn is_active(&self) -> bool {
        self.registry.enabled.load(Ordering::Relaxed)
            && self.state.enabled.load(Ordering::Relaxed)
    }

    /// Call the wrapped lookup, serving from the cache when possible.
    ///
    /// When caching is inactive the lookup is called through without
    /// touching entries or counters. A live entry is a hit and refreshes
    /// its own recency (and therefore its TTL window). An entry older than
    /// the TTL counts as an expired hit and is recomputed. A missing entry
    /// counts as a miss; after the lookup completes the result is stored
    /// and the least-recently-accessed entries are evicted down to
    /// `max_size`. A failed lookup stores nothing.
    ///
    /// The lookup future runs outside the entry lock, so two concurrent
    /// calls missing on the same key may both dispatch; the later result
    /// wins the slot.
    pub async fn call<A, Fut>(&self, args: A) -> Result<T>
    where
        A: Serialize,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Clone,
    {
        if !self.is_active() {
            return (self.inner)(args).await;
        }
        let key = serde_json::to_string(&args)?;
        let function = self.state.name.clone();
        match self.state.probe(&key) {
            Probe::Hit(value) => {
                counter!(telemetry::CACHE_HITS_TOTAL, "function" => function).increment(1);
                return Ok(value);
            }
            Probe::Expired => {
                counter!(telemetry::CACHE_EXPIRED_HITS_TOTAL, "function" => function).increment(1);
            }
            Probe::Miss => {
                counter!(telemetry::CACHE_MISSES_TOTAL, "function" => function).increment(1);
            }
        }
        let value = (self.inner)(args).await?;
        self.state.store_value(key, value.clone());
        Ok(value)
    }

    /// Turn this wrapper's own switch on (the default).
    pub fn enable(&self) {
        self.state.enabled.store(true, Ordering::Relaxed);
    }

    /// Turn this wrapper's own switch off. Entries stay in place and the
    /// registry switch is untouched.
    pub fn disable(&self) {
        self.state.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Relaxed)
    }

    /// Drop all entries and zero the counters.
    pub fn clear(&self) {
        self.state.reset();
    }

    /// Change the entry bound. Shrinking below the current entry count
    /// evicts the least-recently-accessed entries immediately.
    pub fn set_max_size(&self, max_size: usize) {
        let mut store = lock(&self.state.store);
        store.max_size = max_size;
        store.enforce_max_size();
    }

    /// Change the expiry window. `None` (the default) and a zero duration
    /// both mean entries never expire.
    pub fn set_ttl(&self, ttl: Option<Duration>) {
        lock(&self.state.store).ttl = ttl;
    }

    /// Snapshot of the counters and the current entry count.
    pub fn stats(&self) -> CacheStats {
        let store = lock(&self.state.store);
        CacheStats {
            hits: store.hits,
            misses: store.misses,
            expired_hits: store.expired_hits,
            entries: store.entries.len(),
        }
    }
}
