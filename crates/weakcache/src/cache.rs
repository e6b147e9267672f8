//! WeakCache: keyed table of weak references with finalizer-driven eviction

use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::{debug, error, trace};

use crate::builder::WeakCacheBuilder;
use crate::error::{Error, Result};
use crate::reaper::Reaper;
use crate::referent::Referent;
use crate::registry::{Registry, Subscription};
use crate::stats::CacheStats;

/// Callback invoked with the key of an entry evicted by finalization
pub(crate) type EvictionListener<K> = Arc<dyn Fn(K) + Send + Sync + 'static>;

type Table<K, V> = HashMap<K, Entry<V>, RandomState>;

/// Watch count at which writes start sweeping for reclaimed values
const SWEEP_FLOOR: usize = 64;

/// A cached value and the watch that reports its reclamation
struct Entry<V: ?Sized> {
    value: Weak<V>,
    subscription: Subscription,
}

/// State shared between the cache handle and its reaper thread
pub(crate) struct Shared<K, V: ?Sized> {
    table: RwLock<Table<K, V>>,
    registry: Box<dyn Registry<K, V>>,
    on_evict: Option<EvictionListener<K>>,
    stats: CacheStats,
    /// Watch count that triggers the next write-driven sweep
    sweep_at: AtomicUsize,
}

impl<K, V> Shared<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new(
        capacity: usize,
        registry: Box<dyn Registry<K, V>>,
        on_evict: Option<EvictionListener<K>>,
    ) -> Self {
        Self {
            table: RwLock::new(HashMap::with_capacity_and_hasher(capacity, RandomState::new())),
            registry,
            on_evict,
            stats: CacheStats::new(),
            sweep_at: AtomicUsize::new(SWEEP_FLOOR),
        }
    }

    /// Look at the entry for `key` under a read lock.
    ///
    /// `f` maps a live entry to a result; a dead one is reclaimed before
    /// returning `None`.
    fn probe<Q, T>(&self, key: &Q, f: impl FnOnce(&Weak<V>) -> Option<T>) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let dead = {
            let table = self.table.read();
            let entry = table.get(key)?;
            match f(&entry.value) {
                Some(found) => return Some(found),
                None => entry.subscription,
            }
        };

        self.reclaim(key, dead);
        None
    }

    /// Drop a dead entry unless it was replaced or removed since it was seen
    fn reclaim<Q>(&self, key: &Q, subscription: Subscription)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut table = self.table.write();
        if table.get(key).is_some_and(|entry| entry.subscription == subscription) {
            table.remove(key);
            self.registry.unregister(subscription);
            self.stats.record_reclaim();
            trace!(subscription = subscription.id(), "reclaimed dead entry");
        }
    }

    /// Point `key` at `value`, cancelling the watch of whatever it replaces
    fn store(&self, table: &mut Table<K, V>, key: K, value: &Arc<V>) {
        if let Some(previous) = table.get(&key) {
            self.registry.unregister(previous.subscription);
        }

        let subscription = self.registry.register(value, key.clone());
        table.insert(
            key,
            Entry {
                value: Arc::downgrade(value),
                subscription,
            },
        );
        self.stats.record_insert();
        trace!(subscription = subscription.id(), "stored entry");
    }

    pub(crate) fn run_finalizers(&self) -> usize {
        let collected = self.registry.collect();
        if collected.is_empty() {
            return 0;
        }

        let delivered = collected.len();
        let mut evicted = Vec::with_capacity(delivered);
        {
            let mut table = self.table.write();
            for (subscription, key) in collected {
                // Stale watches belong to values that were replaced or deleted
                if table.get(&key).is_some_and(|entry| entry.subscription == subscription) {
                    table.remove(&key);
                    evicted.push(key);
                }
            }
        }

        let count = evicted.len();
        debug!(delivered, evicted = count, "ran finalizers");

        for key in evicted {
            self.stats.record_eviction();
            self.notify(key);
        }
        count
    }

    /// Run finalizers once the registry has doubled since the last sweep.
    ///
    /// Called after every write with no lock held, so dead entries are
    /// bounded by twice the live ones (plus [`SWEEP_FLOOR`]) even when nobody
    /// drives finalizers explicitly.
    fn housekeep(&self) {
        let due = self.sweep_at.load(Ordering::Acquire);
        if self.registry.len() < due {
            return;
        }

        // One writer sweeps; a listener writing back sees usize::MAX
        if self
            .sweep_at
            .compare_exchange(due, usize::MAX, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let evicted = self.run_finalizers();
        let next = self.registry.len().saturating_mul(2).max(SWEEP_FLOOR);
        self.sweep_at.store(next, Ordering::Release);
        trace!(evicted, next, "housekeeping sweep");
    }

    /// Hand `key` to the eviction listener, containing any panic it raises
    fn notify(&self, key: K) {
        let Some(listener) = &self.on_evict else {
            return;
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(key))) {
            error!(
                message = panic_message(payload.as_ref()),
                "eviction listener panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Cache mapping keys to values it does not keep alive.
///
/// Values are held through [`Weak`] references. Once every `Arc` outside the
/// cache is dropped, the entry is dead: lookups stop returning it and drop it
/// on sight, and the next finalizer run removes it and calls the `on_evict`
/// listener with its key.
///
/// Finalizers run when [`run_finalizers`](Self::run_finalizers) is called,
/// periodically if the cache was built with
/// [`reap_interval`](WeakCacheBuilder::reap_interval), and as part of writes
/// whenever the number of watched values has doubled since the last sweep.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use weakcache::WeakCache;
///
/// let cache: WeakCache<&str, Vec<u8>> = WeakCache::new();
/// let blob = Arc::new(vec![1, 2, 3]);
///
/// cache.set("blob", &blob).unwrap();
/// assert!(Arc::ptr_eq(&cache.get("blob").unwrap(), &blob));
///
/// drop(blob);
/// assert!(cache.get("blob").is_none());
/// assert_eq!(cache.len(), 0);
/// ```
pub struct WeakCache<K, V: ?Sized> {
    shared: Arc<Shared<K, V>>,
    reaper: Option<Reaper>,
}

impl<K, V> WeakCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    /// Create an empty cache with no eviction listener and no reaper
    pub fn new() -> Self {
        WeakCacheBuilder::new().build()
    }

    /// Start configuring a cache
    pub fn builder() -> WeakCacheBuilder<K, V> {
        WeakCacheBuilder::new()
    }

    pub(crate) fn from_parts(shared: Arc<Shared<K, V>>, reaper: Option<Reaper>) -> Self {
        Self { shared, reaper }
    }

    /// Get the value cached under `key`, if it is still alive
    ///
    /// Finding a dead entry removes it. The eviction listener is not called
    /// for entries removed this way.
    ///
    /// # Returns
    /// * `Option<Arc<V>>` - The same allocation that was passed to `set`
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.shared.probe(key, Weak::upgrade) {
            Some(value) => {
                self.shared.stats.record_hit();
                Some(value)
            }
            None => {
                self.shared.stats.record_miss();
                None
            }
        }
    }

    /// Check if `key` maps to a live value
    ///
    /// Removes a dead entry just like [`get`](Self::get).
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared
            .probe(key, |value| (value.strong_count() > 0).then_some(()))
            .is_some()
    }

    /// Cache `value` under `key`, replacing any previous entry
    ///
    /// The cache keeps only a weak reference: `value` must be kept alive
    /// elsewhere for the entry to stay useful. A replaced entry never
    /// triggers the eviction listener.
    ///
    /// # Arguments
    /// * `key` - Key to store under
    /// * `value` - An `Arc`, a live `Weak`, or `Some` of either
    ///
    /// # Returns
    /// * `Result<()>` - `Error::InvalidValueType` if `value` has no live target
    pub fn set<R>(&self, key: K, value: R) -> Result<()>
    where
        R: Referent<V>,
    {
        let value = value.into_strong().map_err(Error::InvalidValueType)?;

        {
            let mut table = self.shared.table.write();
            self.shared.store(&mut table, key, &value);
        }
        self.shared.housekeep();
        Ok(())
    }

    /// Get the live value for `key`, or cache the one produced by `f`
    ///
    /// `f` runs without any lock held. If another caller caches a live value
    /// for `key` in the meantime, that value is returned and `f`'s result is
    /// dropped.
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> Arc<V>
    where
        F: FnOnce() -> Arc<V>,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }

        let created = f();

        let mut table = self.shared.table.write();
        if let Some(existing) = table.get(&key).and_then(|entry| entry.value.upgrade()) {
            return existing;
        }
        self.shared.store(&mut table, key, &created);
        drop(table);
        self.shared.housekeep();

        created
    }

    /// Remove the entry for `key`
    ///
    /// The entry's pending finalization is cancelled, so the eviction
    /// listener never fires for a deleted entry.
    ///
    /// # Returns
    /// * `bool` - `true` if an entry was present
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut table = self.shared.table.write();
        match table.remove(key) {
            Some(entry) => {
                self.shared.registry.unregister(entry.subscription);
                self.shared.stats.record_removal();
                trace!(subscription = entry.subscription.id(), "deleted entry");
                true
            }
            None => false,
        }
    }

    /// Number of entries in the table
    ///
    /// This may include entries whose values are already dead but have not
    /// been looked up, purged or finalized yet. It never undercounts live
    /// entries, and writes keep the dead share bounded.
    pub fn len(&self) -> usize {
        self.shared.table.read().len()
    }

    /// Check if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.shared.table.read().is_empty()
    }

    /// Deliver pending finalizations
    ///
    /// Every entry whose value has been reclaimed, and which has not been
    /// replaced or removed since, is dropped and reported to the eviction
    /// listener. The listener runs with no lock held.
    ///
    /// # Returns
    /// * `usize` - Number of entries evicted
    pub fn run_finalizers(&self) -> usize {
        self.shared.run_finalizers()
    }

    /// Drop every dead entry now, without notifying the listener
    ///
    /// Scans the whole table; afterwards `len()` is exact until the next value
    /// dies.
    ///
    /// # Returns
    /// * `usize` - Number of entries removed
    pub fn purge(&self) -> usize {
        let mut table = self.shared.table.write();
        let before = table.len();

        table.retain(|_, entry| {
            let alive = entry.value.strong_count() > 0;
            if !alive {
                self.shared.registry.unregister(entry.subscription);
                self.shared.stats.record_reclaim();
            }
            alive
        });

        let purged = before - table.len();
        debug!(purged, "purged dead entries");
        purged
    }

    /// Remove all entries without notifying the listener
    pub fn clear(&self) {
        let mut table = self.shared.table.write();
        for (_, entry) in table.drain() {
            self.shared.registry.unregister(entry.subscription);
        }
    }

    /// Number of values the registry is still watching
    pub fn subscriptions(&self) -> usize {
        self.shared.registry.len()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }
}

impl<K, V> Default for WeakCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: ?Sized> fmt::Debug for WeakCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCache")
            .field("len", &self.shared.table.read().len())
            .field("subscriptions", &self.shared.registry.len())
            .field("reaping", &self.reaper.as_ref().is_some_and(Reaper::is_running))
            .finish_non_exhaustive()
    }
}
