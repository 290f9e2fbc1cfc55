//! Single-slot validity cache for tag group lookup responses
//!
//! The cache holds at most one response together with the tag groups that
//! were requested to produce it and the instant it was stored. Two policy
//! durations decide how that response may be used:
//!
//! - younger than `max_age`: fresh, serve it as is
//! - younger than `max_age + stale_read_allowance`: serve it, but refresh
//! - anything older, or no response at all: unusable, refresh before serving
//!
//! State is loaded from the injected store on first access and written back
//! on every mutation. Store faults never surface to callers; they are logged
//! and the cache behaves as if it were empty.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::store::KeyValueStore;
use crate::data::{TagGroups, TagGroupsLookupResponse};

/// Store key holding the cached response record
pub const RESPONSE_KEY: &str = "tag_groups_lookup_response";

/// Store key holding the cache policy
pub const CONFIG_KEY: &str = "tag_groups_lookup_config";

/// Default time before a cached response should be refreshed (10 minutes)
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// Default extra time a cached response may still be served (1 hour)
pub const DEFAULT_STALE_READ_ALLOWANCE: Duration = Duration::from_secs(3600);

/// Errors raised when configuring the cache
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The policy durations cannot be combined into a usable window
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),
}

/// Cache policy durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfiguration {
    max_age: Duration,
    stale_read_allowance: Duration,
}

impl CacheConfiguration {
    /// Creates a configuration, rejecting windows that overflow
    ///
    /// The stale-read allowance is added on top of `max_age`, so their sum
    /// must be representable.
    pub fn new(max_age: Duration, stale_read_allowance: Duration) -> Result<Self, CacheError> {
        if max_age.checked_add(stale_read_allowance).is_none() {
            return Err(CacheError::InvalidConfiguration(format!(
                "max age {:?} plus stale read allowance {:?} overflows",
                max_age, stale_read_allowance
            )));
        }
        Ok(Self {
            max_age,
            stale_read_allowance,
        })
    }

    /// Age at which a response should be refreshed
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Extra time past `max_age` during which a response may still be served
    pub fn stale_read_allowance(&self) -> Duration {
        self.stale_read_allowance
    }

    /// Age at which a response can no longer be served
    fn stale_after(&self) -> Duration {
        self.max_age.saturating_add(self.stale_read_allowance)
    }

    /// Classifies a response of the given age
    pub fn classify(&self, age: Duration) -> Freshness {
        if age < self.max_age {
            Freshness::Fresh
        } else if age < self.stale_after() {
            Freshness::StaleServable
        } else {
            Freshness::Unusable
        }
    }
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            stale_read_allowance: DEFAULT_STALE_READ_ALLOWANCE,
        }
    }
}

/// How a cached response may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than `max_age`; serve without refreshing
    Fresh,
    /// Past `max_age` but inside the stale-read allowance; serve and refresh
    StaleServable,
    /// Too old, or nothing cached; refresh before answering
    Unusable,
}

impl Freshness {
    /// Whether new data should be fetched
    pub fn needs_refresh(self) -> bool {
        !matches!(self, Freshness::Fresh)
    }

    /// Whether the cached payload must not be shown
    pub fn is_stale(self) -> bool {
        matches!(self, Freshness::Unusable)
    }
}

/// A stored response with the request that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLookupResponse<P> {
    requested_tag_groups: TagGroups,
    payload: P,
    created_at: DateTime<Utc>,
}

impl<P> CachedLookupResponse<P> {
    pub fn requested_tag_groups(&self) -> &TagGroups {
        &self.requested_tag_groups
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Elapsed time since creation, clamped to zero if the clock went backwards
    fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Result of consulting the cache, carrying the payload when it may be served
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<P> {
    /// Payload may be served as is
    Fresh(P),
    /// Payload may be served, but should be refreshed
    StaleServable(P),
    /// Nothing servable is cached
    Unusable,
}

/// Cached record, its age and its freshness, all read at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<P> {
    /// The cached record, if any
    pub cached: Option<CachedLookupResponse<P>>,
    /// Age of the record, clamped to zero
    pub age: Option<Duration>,
    /// Classification of the record at that instant
    pub freshness: Freshness,
}

impl<P> CacheLookup<P> {
    pub fn freshness(&self) -> Freshness {
        match self {
            CacheLookup::Fresh(_) => Freshness::Fresh,
            CacheLookup::StaleServable(_) => Freshness::StaleServable,
            CacheLookup::Unusable => Freshness::Unusable,
        }
    }
}

#[derive(Debug)]
struct State<P> {
    response: Option<CachedLookupResponse<P>>,
    config: CacheConfiguration,
}

/// Persistent single-slot cache for lookup responses
///
/// Response, creation time and policy are guarded by one mutex, so readers
/// never observe a payload paired with another payload's timestamp.
pub struct LookupResponseCache<P = TagGroupsLookupResponse> {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// `None` until the persisted state has been loaded
    state: Mutex<Option<State<P>>>,
}

impl<P> LookupResponseCache<P>
where
    P: Clone + Serialize + DeserializeOwned,
{
    /// Creates a cache backed by `store`, using wall-clock time
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_store_and_clock(store, Arc::new(SystemClock))
    }

    /// Creates a cache backed by `store` that reads time from `clock`
    pub fn with_store_and_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            state: Mutex::new(None),
        }
    }

    /// Returns a copy of the cached payload, if any
    pub fn response(&self) -> Option<P> {
        self.with_state(|state| state.response.as_ref().map(|r| r.payload.clone()))
    }

    /// Returns a copy of the whole cached record, if any
    pub fn cached(&self) -> Option<CachedLookupResponse<P>> {
        self.with_state(|state| state.response.clone())
    }

    /// Tag groups that were requested to produce the cached payload
    pub fn requested_tag_groups(&self) -> Option<TagGroups> {
        self.with_state(|state| {
            state
                .response
                .as_ref()
                .map(|r| r.requested_tag_groups.clone())
        })
    }

    /// When the cached payload was stored
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.with_state(|state| state.response.as_ref().map(|r| r.created_at))
    }

    /// Age of the cached payload, clamped to zero
    pub fn age(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.with_state(|state| state.response.as_ref().map(|r| r.age_at(now)))
    }

    /// Reads the record, its age and its freshness under a single lock
    pub fn snapshot(&self) -> CacheSnapshot<P> {
        let now = self.clock.now();
        self.with_state(|state| CacheSnapshot {
            cached: state.response.clone(),
            age: state.response.as_ref().map(|r| r.age_at(now)),
            freshness: Self::classify(state, now),
        })
    }

    /// Replaces the cached response and stamps it with the current time
    pub fn set_response(&self, requested_tag_groups: TagGroups, payload: P) {
        let created_at = self.clock.now();
        self.with_state(|state| {
            state.response = Some(CachedLookupResponse {
                requested_tag_groups,
                payload,
                created_at,
            });
            debug!(%created_at, "Cached lookup response");
            self.persist(RESPONSE_KEY, &state.response);
        });
    }

    /// Drops the cached response
    pub fn clear_response(&self) {
        self.with_state(|state| {
            state.response = None;
            debug!("Cleared lookup response");
            self.persist(RESPONSE_KEY, &state.response);
        });
    }

    pub fn configuration(&self) -> CacheConfiguration {
        self.with_state(|state| state.config)
    }

    pub fn set_configuration(&self, config: CacheConfiguration) {
        self.with_state(|state| {
            state.config = config;
            self.persist(CONFIG_KEY, &state.config);
        });
    }

    pub fn max_age(&self) -> Duration {
        self.configuration().max_age()
    }

    /// Sets `max_age`, keeping the current stale-read allowance
    pub fn set_max_age(&self, max_age: Duration) -> Result<(), CacheError> {
        self.update_configuration(|config| {
            CacheConfiguration::new(max_age, config.stale_read_allowance)
        })
    }

    pub fn stale_read_allowance(&self) -> Duration {
        self.configuration().stale_read_allowance()
    }

    /// Sets the stale-read allowance, keeping the current `max_age`
    pub fn set_stale_read_allowance(&self, allowance: Duration) -> Result<(), CacheError> {
        self.update_configuration(|config| CacheConfiguration::new(config.max_age, allowance))
    }

    /// Classifies the cached response at the current instant
    pub fn evaluate(&self) -> Freshness {
        let now = self.clock.now();
        self.with_state(|state| Self::classify(state, now))
    }

    /// Classifies the cached response and hands back the payload if servable
    pub fn lookup(&self) -> CacheLookup<P> {
        let now = self.clock.now();
        self.with_state(|state| match (Self::classify(state, now), &state.response) {
            (Freshness::Fresh, Some(r)) => CacheLookup::Fresh(r.payload.clone()),
            (Freshness::StaleServable, Some(r)) => CacheLookup::StaleServable(r.payload.clone()),
            _ => CacheLookup::Unusable,
        })
    }

    /// True once the cached response reaches `max_age`, or if there is none
    pub fn needs_refresh(&self) -> bool {
        self.evaluate().needs_refresh()
    }

    /// True once the cached response is past the stale-read allowance, or if there is none
    pub fn is_stale(&self) -> bool {
        self.evaluate().is_stale()
    }

    fn classify(state: &State<P>, now: DateTime<Utc>) -> Freshness {
        match &state.response {
            Some(response) => state.config.classify(response.age_at(now)),
            None => Freshness::Unusable,
        }
    }

    fn update_configuration<F>(&self, build: F) -> Result<(), CacheError>
    where
        F: FnOnce(&CacheConfiguration) -> Result<CacheConfiguration, CacheError>,
    {
        self.with_state(|state| {
            state.config = build(&state.config)?;
            self.persist(CONFIG_KEY, &state.config);
            Ok(())
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State<P>) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = guard.get_or_insert_with(|| self.load_state());
        f(state)
    }

    fn load_state(&self) -> State<P> {
        let response = self
            .load::<Option<CachedLookupResponse<P>>>(RESPONSE_KEY)
            .flatten();

        let config = self
            .load::<CacheConfiguration>(CONFIG_KEY)
            .and_then(|stored| {
                // Re-validate: the store may hold values written by another version
                CacheConfiguration::new(stored.max_age, stored.stale_read_allowance)
                    .map_err(|e| warn!(error = %e, "Ignoring persisted cache configuration"))
                    .ok()
            })
            .unwrap_or_default();

        debug!(
            has_response = response.is_some(),
            max_age_secs = config.max_age.as_secs_f64(),
            stale_read_secs = config.stale_read_allowance.as_secs_f64(),
            "Loaded lookup response cache"
        );

        State { response, config }
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.load(key) {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(key, error = %e, "Failed to load cache state");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache state");
                None
            }
        }
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache state");
                return;
            }
        };

        if let Err(e) = self.store.save(key, &bytes) {
            warn!(key, error = %e, "Failed to persist cache state");
        }
    }
}
