//! Integration tests for the lookup response cache
//!
//! Exercises the public API with a manual clock against in-memory and
//! on-disk stores.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tagcache::cache::{
    CacheConfiguration, FileStore, Freshness, KeyValueStore, LookupResponseCache, ManualClock,
    MemoryStore,
};
use tagcache::data::{TagGroups, TagGroupsLookupResponse};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

fn requested() -> TagGroups {
    [("device", "vip")].into_iter().collect()
}

fn response() -> TagGroupsLookupResponse {
    TagGroupsLookupResponse::ok(requested())
}

fn open(store: Arc<dyn KeyValueStore>, clock: &ManualClock) -> LookupResponseCache {
    LookupResponseCache::with_store_and_clock(store, Arc::new(clock.clone()))
}

#[test]
fn test_fresh_then_stale_servable_then_unusable() {
    let clock = ManualClock::new(t0());
    let cache = open(Arc::new(MemoryStore::new()), &clock);
    cache.set_max_age(Duration::from_secs(10)).unwrap();
    cache.set_stale_read_allowance(Duration::from_secs(5)).unwrap();
    cache.set_response(requested(), response());

    clock.set(at(9));
    assert!(!cache.needs_refresh());
    assert!(!cache.is_stale());

    clock.set(at(12));
    assert!(cache.needs_refresh());
    assert!(!cache.is_stale());

    clock.set(at(16));
    assert!(cache.needs_refresh());
    assert!(cache.is_stale());
}

#[test]
fn test_zero_policy_needs_refresh_immediately() {
    let clock = ManualClock::new(t0());
    let cache = open(Arc::new(MemoryStore::new()), &clock);
    cache.set_configuration(CacheConfiguration::new(Duration::ZERO, Duration::ZERO).unwrap());

    cache.set_response(requested(), response());

    assert!(cache.needs_refresh());
}

#[test]
fn test_new_cache_without_state_is_unusable() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(t0());
    let cache = open(Arc::new(FileStore::with_dir(temp_dir.path())), &clock);

    assert!(cache.needs_refresh());
    assert!(cache.is_stale());
    assert_eq!(cache.evaluate(), Freshness::Unusable);
}

#[test]
fn test_age_is_measured_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(t0());

    {
        let cache = open(Arc::new(FileStore::with_dir(temp_dir.path())), &clock);
        cache.set_configuration(
            CacheConfiguration::new(Duration::from_secs(60), Duration::from_secs(60)).unwrap(),
        );
        cache.set_response(requested(), response());
    }

    clock.set(at(90));
    let cache = open(Arc::new(FileStore::with_dir(temp_dir.path())), &clock);

    assert_eq!(cache.response(), Some(response()));
    assert_eq!(cache.requested_tag_groups(), Some(requested()));
    assert_eq!(cache.age(), Some(Duration::from_secs(90)));
    assert_eq!(cache.evaluate(), Freshness::StaleServable);
}

#[test]
fn test_truncated_file_is_treated_as_empty() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("tag_groups_lookup_response.json"),
        b"{\"requested_tag_groups\":",
    )
    .unwrap();

    let clock = ManualClock::new(t0());
    let cache = open(Arc::new(FileStore::with_dir(temp_dir.path())), &clock);

    assert!(cache.response().is_none());
    assert!(cache.needs_refresh());
}

#[test]
fn test_concurrent_writers_and_readers_see_whole_records() {
    let clock = ManualClock::new(t0());
    let cache = Arc::new(open(Arc::new(MemoryStore::new()), &clock));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for n in 0..50 {
                    let tag = format!("t{}_{}", i, n);
                    let groups: TagGroups = [("device", tag.as_str())].into_iter().collect();
                    cache.set_response(groups.clone(), TagGroupsLookupResponse::ok(groups));

                    let cached = cache.cached().expect("a response was just stored");
                    assert_eq!(cached.requested_tag_groups(), &cached.payload().tag_groups);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.evaluate(), Freshness::Fresh);
}
