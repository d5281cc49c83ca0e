//! Integration tests for the dependency-aware cache.

use std::thread;
use std::time::Duration;

use elementorm_core::cache::{CacheKey, CacheManager, EvictionPolicy};
use elementorm_core::config::CacheConfig;
use elementorm_core::model::ElementId;

fn key(name: &str) -> CacheKey {
    CacheKey::for_query("Wall", name)
}

fn no_deps() -> Vec<String> {
    Vec::new()
}

#[test]
fn test_set_get_and_ttl_expiry() {
    let cache: CacheManager<Vec<i32>> = CacheManager::new(CacheConfig::default());
    let k = key("q1");
    assert!(cache.set(&k, vec![1, 2, 3], Some(Duration::from_millis(50)), no_deps()));
    assert_eq!(cache.get(&k), Some(vec![1, 2, 3]));

    thread::sleep(Duration::from_millis(80));
    assert_eq!(cache.get(&k), None);
    assert_eq!(cache.stats().expirations(), 1);
}

#[test]
fn test_invalidate_by_dependency() {
    let cache: CacheManager<Vec<i32>> = CacheManager::new(CacheConfig::default());
    let (k1, k2, k3) = (key("a"), key("b"), key("c"));
    cache.set(&k1, vec![1, 2, 3], Some(Duration::from_secs(60)), ["t1"]);
    cache.set(&k2, vec![4], None, ["t1", "t2"]);
    cache.set(&k3, vec![5], None, ["t2"]);

    assert_eq!(cache.invalidate_by_dependency("t1"), 2);
    assert_eq!(cache.get(&k1), None);
    assert_eq!(cache.get(&k2), None);
    assert_eq!(cache.get(&k3), Some(vec![5]));
    assert_eq!(cache.invalidate_by_dependency("t1"), 0);
}

#[test]
fn test_lru_evicts_least_recently_accessed() {
    let cache: CacheManager<String> =
        CacheManager::new(CacheConfig::new(3).with_eviction_policy(EvictionPolicy::Lru));
    for name in ["a", "b", "c"] {
        cache.set(&key(name), name.to_uppercase(), None, no_deps());
    }
    assert_eq!(cache.get(&key("a")), Some("A".to_string()));

    cache.set(&key("d"), "D".to_string(), None, no_deps());
    assert_eq!(cache.len(), 3);
    assert!(!cache.contains(&key("b")));
    assert_eq!(cache.get(&key("a")), Some("A".to_string()));
    assert_eq!(cache.get(&key("c")), Some("C".to_string()));
    assert_eq!(cache.stats().evictions(), 1);
}

#[test]
fn test_relationship_keys_and_entity_dependencies() {
    let cache: CacheManager<Vec<i64>> = CacheManager::new(CacheConfig::default());
    let doors = CacheKey::for_relationship("Wall", ElementId(7), "doors");
    let windows = CacheKey::for_relationship("Wall", ElementId(7), "windows");
    let dep = CacheKey::entity_dependency("Wall", ElementId(7));
    cache.set(&doors, vec![1, 2], None, [dep.clone()]);
    cache.set(&windows, vec![3], None, [dep.clone()]);

    assert_eq!(cache.invalidate_by_pattern("|rel=doors"), 1);
    assert_eq!(cache.invalidate_by_dependency(&dep), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_concurrent_access() {
    let cache: std::sync::Arc<CacheManager<usize>> =
        std::sync::Arc::new(CacheManager::new(CacheConfig::new(64)));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = std::sync::Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..100 {
                    let k = key(&format!("{}-{}", t, i % 16));
                    cache.set(&k, i, None, [format!("thread:{}", t)]);
                    cache.get(&k);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(cache.len() <= 64);
    let removed = cache.invalidate_by_dependency("thread:0");
    assert!(removed <= 16);
}
