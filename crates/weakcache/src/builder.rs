//! WeakCache builder

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{EvictionListener, Shared, WeakCache};
use crate::reaper::Reaper;
use crate::registry::{Registry, SweepRegistry};

/// Builder for configuring a WeakCache.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use weakcache::WeakCache;
///
/// let cache: WeakCache<u64, String> = WeakCache::builder()
///     .capacity(1024)
///     .on_evict(|id| println!("session {id} dropped"))
///     .reap_interval(Duration::from_millis(250))
///     .build();
/// assert!(cache.is_empty());
/// ```
pub struct WeakCacheBuilder<K, V: ?Sized> {
    capacity: usize,
    on_evict: Option<EvictionListener<K>>,
    registry: Option<Box<dyn Registry<K, V>>>,
    reap_interval: Option<Duration>,
}

impl<K, V> WeakCacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    /// Create a builder with default settings: no listener, no reaper,
    /// sweep-based registry.
    pub fn new() -> Self {
        Self {
            capacity: 0,
            on_evict: None,
            registry: None,
            reap_interval: None,
        }
    }

    /// Pre-allocate room for `capacity` entries.
    ///
    /// This is not a bound; the table grows as needed.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the listener called with the key of every entry removed because
    /// its value was reclaimed.
    ///
    /// It is not called for `delete`, overwrites, `clear`, or dead entries
    /// dropped by lookups and `purge`. A panic inside the listener is caught
    /// and logged.
    pub fn on_evict<F>(mut self, listener: F) -> Self
    where
        F: Fn(K) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(listener));
        self
    }

    /// Replace the default [`SweepRegistry`].
    pub fn registry<R>(mut self, registry: R) -> Self
    where
        R: Registry<K, V> + 'static,
    {
        self.registry = Some(Box::new(registry));
        self
    }

    /// Run finalizers on a background thread every `interval`.
    ///
    /// The thread stops once the cache is dropped.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "reap_interval must be non-zero");
        self.reap_interval = Some(interval);
        self
    }

    /// Build the cache with the configured settings.
    pub fn build(self) -> WeakCache<K, V> {
        let registry: Box<dyn Registry<K, V>> = match self.registry {
            Some(registry) => registry,
            None => Box::new(SweepRegistry::new()),
        };
        let shared = Arc::new(Shared::new(self.capacity, registry, self.on_evict));

        let reaper = self
            .reap_interval
            .and_then(|interval| Reaper::spawn(Arc::downgrade(&shared), interval));

        WeakCache::from_parts(shared, reaper)
    }
}

impl<K, V> Default for WeakCacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
