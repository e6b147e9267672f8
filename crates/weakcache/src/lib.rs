//! # weakcache
//!
//! Keyed cache that never keeps its values alive.
//!
//! ## Architecture
//! - **Table**: AHash map from key to `Weak<V>` plus the entry's subscription
//! - **Registry**: watches cached values and reports the reclaimed ones
//! - **Finalizers**: drop entries whose values died and notify `on_evict`;
//!   writes run them whenever the watched set has doubled since the last sweep
//! - **Reaper**: optional thread running finalizers on an interval
//!
//! An entry leaves the cache in exactly one of three ways, whichever happens
//! first: an explicit `delete`, a lookup that finds the value dead, or a
//! finalizer run after the value was reclaimed. Only the last one calls the
//! eviction listener.
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use weakcache::WeakCache;
//!
//! let evicted = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&evicted);
//!
//! let cache: WeakCache<String, [u8]> = WeakCache::builder()
//!     .on_evict(move |key: String| sink.lock().push(key))
//!     .build();
//!
//! let page: Arc<[u8]> = Arc::from(vec![0u8; 4096]);
//! cache.set("page:1".to_string(), &page)?;
//! assert!(cache.has("page:1"));
//!
//! drop(page);
//! assert_eq!(cache.run_finalizers(), 1);
//! assert_eq!(*evicted.lock(), vec!["page:1".to_string()]);
//! # Ok::<(), weakcache::Error>(())
//! ```

#![warn(missing_docs)]

mod builder;
mod cache;
mod error;
mod reaper;
mod referent;
mod registry;
mod stats;

pub use builder::WeakCacheBuilder;
pub use cache::WeakCache;
pub use error::{Error, Rejected, Result};
pub use referent::Referent;
pub use registry::{Registry, Subscription, SweepRegistry};
pub use stats::CacheStats;
