use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use weakcache::{Error, Rejected, WeakCache};

#[derive(Debug, PartialEq)]
struct Record {
    v: u32,
}

fn record(v: u32) -> Arc<Record> {
    Arc::new(Record { v })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_set_delete_scenario() {
    let cache: WeakCache<&str, Record> = WeakCache::new();
    let value = record(1);

    cache.set("a", &value).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.delete("a"));
    assert!(cache.get("a").is_none());
    assert_eq!(cache.len(), 0);
}

#[test]
fn test_overwrite_scenario() {
    let cache: WeakCache<&str, Record> = WeakCache::new();
    let obj1 = record(1);
    let obj2 = record(2);

    cache.set("k", &obj1).unwrap();
    cache.set("k", &obj2).unwrap();

    assert!(Arc::ptr_eq(&cache.get("k").unwrap(), &obj2));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_multiple_keys_scenario() {
    let cache: WeakCache<&str, Record> = WeakCache::new();
    let a = record(1);
    let b = record(2);

    cache.set("a", &a).unwrap();
    cache.set("b", &b).unwrap();

    assert_eq!(cache.len(), 2);
    assert!(Arc::ptr_eq(&cache.get("a").unwrap(), &a));
    assert!(Arc::ptr_eq(&cache.get("b").unwrap(), &b));
}

#[test]
fn test_number_keys() {
    let cache: WeakCache<i64, Record> = WeakCache::new();
    let value = record(9);

    cache.set(1, &value).unwrap();
    assert!(Arc::ptr_eq(&cache.get(&1).unwrap(), &value));
    assert!(cache.has(&1));
    assert!(!cache.has(&2));
}

#[test]
fn test_callable_values() {
    type Callback = dyn Fn(u32) -> u32 + Send + Sync;

    let cache: WeakCache<&str, Callback> = WeakCache::new();
    let double: Arc<Callback> = Arc::new(|x: u32| x * 2);

    cache.set("double", &double).unwrap();

    let found = cache.get("double").unwrap();
    assert!(Arc::ptr_eq(&found, &double));
    assert_eq!(found(21), 42);
}

#[test]
fn test_slice_values() {
    let cache: WeakCache<&str, [u32]> = WeakCache::new();
    let items: Arc<[u32]> = Arc::from(vec![1, 2, 3]);

    cache.set("items", &items).unwrap();
    assert_eq!(&*cache.get("items").unwrap(), &[1, 2, 3]);
}

#[test]
fn test_rejected_values() {
    let cache: WeakCache<&str, Record> = WeakCache::new();

    assert_eq!(
        cache.set("none", None::<Arc<Record>>),
        Err(Error::InvalidValueType(Rejected::Absent))
    );
    assert_eq!(
        cache.set("empty", Weak::<Record>::new()),
        Err(Error::InvalidValueType(Rejected::Dangling))
    );

    let dead = Arc::downgrade(&record(0));
    assert_eq!(
        cache.set("dead", &dead),
        Err(Error::InvalidValueType(Rejected::Dangling))
    );

    assert!(cache.is_empty());
}

#[test]
fn test_eviction_fires_once_per_collected_entry() {
    init_tracing();

    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&evicted);
    let cache: WeakCache<u32, Record> = WeakCache::builder()
        .on_evict(move |key: u32| sink.lock().push(key))
        .build();

    let kept: Vec<Arc<Record>> = (0..10).map(record).collect();
    for (i, value) in kept.iter().enumerate() {
        cache.set(i as u32, value).unwrap();
    }

    // Drop the odd ones
    let kept: Vec<Arc<Record>> = kept.into_iter().filter(|r| r.v % 2 == 0).collect();

    assert_eq!(cache.len(), 10);
    assert_eq!(cache.run_finalizers(), 5);
    assert_eq!(cache.len(), 5);

    let mut keys = evicted.lock().clone();
    keys.sort_unstable();
    assert_eq!(keys, vec![1, 3, 5, 7, 9]);

    for value in &kept {
        assert!(cache.has(&value.v));
    }
    assert_eq!(cache.stats().evictions(), 5);
}

#[test]
fn test_eviction_without_listener() {
    let cache: WeakCache<u32, Record> = WeakCache::new();
    cache.set(1, record(1)).unwrap();

    assert_eq!(cache.run_finalizers(), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_reaper_evicts_eventually() {
    init_tracing();

    let evictions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evictions);
    let cache: WeakCache<String, Record> = WeakCache::builder()
        .on_evict(move |_key: String| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .reap_interval(Duration::from_millis(5))
        .build();

    let value = record(1);
    cache.set("temp".to_string(), &value).unwrap();
    drop(value);

    let deadline = Instant::now() + Duration::from_secs(5);
    while evictions.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(evictions.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_dropped_values_are_evicted_without_manual_finalizers() {
    init_tracing();

    let evictions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evictions);
    let cache: WeakCache<u32, [u8]> = WeakCache::builder()
        .on_evict(move |_key: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    for key in 0..512u32 {
        let page: Arc<[u8]> = Arc::from(vec![0u8; 64 * 1024]);
        cache.set(key, &page).unwrap();
        drop(page);

        assert!(cache.len() < 128, "dead entries piled up: {}", cache.len());
    }

    let fired = evictions.load(Ordering::SeqCst);
    assert!(fired > 0);
    assert_eq!(fired + cache.len(), 512);
    assert_eq!(cache.subscriptions(), cache.len());
}

#[test]
fn test_concurrent_access() {
    let cache: Arc<WeakCache<u64, Record>> = Arc::new(WeakCache::new());
    let mut handles = vec![];

    for t in 0..4u64 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            let mut held = Vec::new();
            for i in 0..100u64 {
                let key = t * 100 + i;
                let value = record(i as u32);
                cache.set(key, &value).unwrap();

                let found = cache.get(&key).unwrap();
                assert!(Arc::ptr_eq(&found, &value));

                // Keep every other value alive
                if i % 2 == 0 {
                    held.push(value);
                }
            }
            held
        }));
    }

    let held: Vec<Arc<Record>> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    // Writes may already have swept some of the dead entries
    assert!(cache.len() >= held.len());
    cache.run_finalizers();

    assert_eq!(cache.len(), held.len());
    assert_eq!(cache.stats().evictions(), 200);
}

#[test]
fn test_concurrent_finalizers_deliver_once() {
    let evictions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evictions);
    let cache: Arc<WeakCache<u64, Record>> = Arc::new(
        WeakCache::builder()
            .on_evict(move |_key: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build(),
    );

    let values: Vec<Arc<Record>> = (0..500).map(record).collect();
    for (key, value) in values.iter().enumerate() {
        cache.set(key as u64, value).unwrap();
    }
    assert_eq!(evictions.load(Ordering::SeqCst), 0);
    drop(values);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let mut evicted = 0;
                for key in 0..500u64 {
                    // Lookups race the finalizers for the same dead entries
                    cache.has(&key);
                    evicted += cache.run_finalizers();
                }
                evicted
            })
        })
        .collect();

    let evicted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(evicted, evictions.load(Ordering::SeqCst));
    assert!(cache.is_empty());
    assert_eq!(cache.subscriptions(), 0);
}
