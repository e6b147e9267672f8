//! Finalization registry
//!
//! A registry watches cached values and reports, on request, which of them
//! have been reclaimed. The cache never learns about a reclaimed value any
//! other way, so swapping the registry changes when (and whether) eviction
//! notifications happen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ahash::RandomState;
use parking_lot::Mutex;

/// Token identifying one watch. Never reused by the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(u64);

impl Subscription {
    /// Raw token value
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Source of finalization events for a [`WeakCache`](crate::WeakCache).
///
/// `held` is handed back from [`collect`](Registry::collect) once the watched
/// target has been reclaimed. A watch is reported at most once and never after
/// it has been unregistered.
pub trait Registry<K, V: ?Sized>: Send + Sync {
    /// Start watching `target`, returning the token that cancels the watch
    fn register(&self, target: &Arc<V>, held: K) -> Subscription;

    /// Cancel a watch. Returns `true` if it was still outstanding.
    fn unregister(&self, subscription: Subscription) -> bool;

    /// Remove and return every watch whose target is gone
    fn collect(&self) -> Vec<(Subscription, K)>;

    /// Number of outstanding watches
    fn len(&self) -> usize;

    /// Check if nothing is being watched
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single outstanding watch
struct Watch<K, V: ?Sized> {
    target: Weak<V>,
    held: K,
}

/// Default registry: keeps a weak handle per watch and sweeps on `collect`.
///
/// Reference counting reclaims a value the moment its last `Arc` drops, but
/// the sweep only notices at the next `collect`, so delivery is deferred to
/// whoever drives the registry: an explicit
/// [`run_finalizers`](crate::WeakCache::run_finalizers) call, a sweep on the
/// write path, or the reaper thread.
pub struct SweepRegistry<K, V: ?Sized> {
    watches: Mutex<HashMap<Subscription, Watch<K, V>, RandomState>>,
    next_id: AtomicU64,
}

impl<K, V: ?Sized> SweepRegistry<K, V> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            watches: Mutex::new(HashMap::with_hasher(RandomState::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V: ?Sized> Default for SweepRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Registry<K, V> for SweepRegistry<K, V>
where
    K: Send,
    V: ?Sized + Send + Sync,
{
    fn register(&self, target: &Arc<V>, held: K) -> Subscription {
        let subscription = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        let watch = Watch {
            target: Arc::downgrade(target),
            held,
        };
        self.watches.lock().insert(subscription, watch);
        subscription
    }

    fn unregister(&self, subscription: Subscription) -> bool {
        self.watches.lock().remove(&subscription).is_some()
    }

    fn collect(&self) -> Vec<(Subscription, K)> {
        let mut watches = self.watches.lock();

        let reclaimed: Vec<Subscription> = watches
            .iter()
            .filter(|(_, watch)| watch.target.strong_count() == 0)
            .map(|(subscription, _)| *subscription)
            .collect();

        let mut collected: Vec<(Subscription, K)> = reclaimed
            .into_iter()
            .filter_map(|subscription| {
                watches
                    .remove(&subscription)
                    .map(|watch| (subscription, watch.held))
            })
            .collect();

        // Deliver in registration order
        collected.sort_unstable_by_key(|(subscription, _)| *subscription);
        collected
    }

    fn len(&self) -> usize {
        self.watches.lock().len()
    }
}
