//! Cache module for tag group lookup responses
//!
//! This module provides a single-slot cache that persists the most recent
//! lookup response through a pluggable key/value store, along with the
//! policy deciding whether that response is fresh, servable while a refresh
//! runs, or unusable.

mod clock;
mod lookup_cache;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lookup_cache::{
    CacheConfiguration, CacheError, CacheLookup, CacheSnapshot, CachedLookupResponse, Freshness,
    LookupResponseCache, CONFIG_KEY, DEFAULT_MAX_AGE, DEFAULT_STALE_READ_ALLOWANCE, RESPONSE_KEY,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
