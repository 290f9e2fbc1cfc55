//! Tag group lookups backed by the response cache
//!
//! `LookupManager` decides, for each request, whether the cached response
//! can answer it directly, can answer it while a background refresh runs on
//! tokio, or must be replaced by a synchronous fetch first. Background
//! refresh progress is reported over an optional channel.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{CacheLookup, LookupResponseCache};
use crate::data::{TagGroups, TagGroupsLookupResponse};

/// Errors reported by a lookup fetcher
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be completed
    #[error("Lookup request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status
    #[error("Lookup returned status {0}")]
    Status(u16),
}

/// Errors returned from `LookupManager::lookup`
#[derive(Debug, Error)]
pub enum LookupError {
    /// Nothing servable was cached and the synchronous fetch failed
    #[error("No usable cached response: {0}")]
    Fetch(#[from] FetchError),
}

/// Performs the actual tag group lookup against a remote service
#[async_trait]
pub trait LookupFetcher: Send + Sync {
    async fn fetch(&self, requested: &TagGroups) -> Result<TagGroupsLookupResponse, FetchError>;
}

/// Messages sent from a background refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshMessage {
    /// Refresh started
    RefreshStarted,
    /// Refresh completed and the cache holds the new response
    RefreshCompleted,
    /// An error occurred during refresh; the old response stays cached
    RefreshError(String),
}

/// Where a lookup result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// Served from a fresh cached response
    Cache,
    /// Served from a stale-but-servable cached response while refreshing
    CacheRefreshing,
    /// Fetched synchronously before answering
    Fetched,
}

/// Answer to a tag group lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// Tag groups from the response, restricted to what was requested
    pub tag_groups: TagGroups,
    /// Whether the answer came from the cache or a fetch
    pub source: LookupSource,
}

/// Serves tag group lookups from a `LookupResponseCache`
pub struct LookupManager<F> {
    cache: Arc<LookupResponseCache>,
    fetcher: Arc<F>,
    /// Set while a background refresh is in flight
    refreshing: Arc<AtomicBool>,
    events: Option<mpsc::Sender<RefreshMessage>>,
}

impl<F> LookupManager<F>
where
    F: LookupFetcher + 'static,
{
    pub fn new(cache: Arc<LookupResponseCache>, fetcher: Arc<F>) -> Self {
        Self {
            cache,
            fetcher,
            refreshing: Arc::new(AtomicBool::new(false)),
            events: None,
        }
    }

    /// Reports background refresh progress on `sender`
    pub fn with_refresh_events(mut self, sender: mpsc::Sender<RefreshMessage>) -> Self {
        self.events = Some(sender);
        self
    }

    /// The cache backing this manager
    pub fn cache(&self) -> &Arc<LookupResponseCache> {
        &self.cache
    }

    /// Whether a background refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Looks up `requested`, consulting the cache first
    ///
    /// # Behavior
    /// - If the cached response was produced by a request that does not
    ///   cover `requested`, fetches synchronously
    /// - If the cached response is fresh, serves it
    /// - If it is stale but servable, serves it and refreshes in the background
    /// - Otherwise fetches synchronously and serves the new response
    pub async fn lookup(&self, requested: &TagGroups) -> Result<LookupResult, LookupError> {
        let covered = self
            .cache
            .requested_tag_groups()
            .is_some_and(|cached| cached.contains_all(requested));

        if !covered {
            debug!("Cached response does not cover request, fetching");
            return self.fetch_and_serve(requested).await;
        }

        match self.cache.lookup() {
            CacheLookup::Fresh(response) => Ok(serve(&response, requested, LookupSource::Cache)),
            CacheLookup::StaleServable(response) => {
                debug!("Serving stale lookup response, refreshing in background");
                // Refresh everything the cache covered, not just this request
                let target = self
                    .cache
                    .requested_tag_groups()
                    .map_or_else(|| requested.clone(), |cached| cached.merge(requested));
                self.spawn_refresh(target);
                Ok(serve(&response, requested, LookupSource::CacheRefreshing))
            }
            CacheLookup::Unusable => {
                debug!("Cached lookup response unusable, fetching");
                self.fetch_and_serve(requested).await
            }
        }
    }

    async fn fetch_and_serve(&self, requested: &TagGroups) -> Result<LookupResult, LookupError> {
        let response = fetch_checked(self.fetcher.as_ref(), requested).await?;
        self.cache.set_response(requested.clone(), response.clone());
        Ok(serve(&response, requested, LookupSource::Fetched))
    }

    fn spawn_refresh(&self, requested: TagGroups) {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Background refresh already running");
            return;
        }

        let cache = Arc::clone(&self.cache);
        let fetcher = Arc::clone(&self.fetcher);
        let guard = RefreshGuard(Arc::clone(&self.refreshing));
        let events = self.events.clone();

        tokio::spawn(async move {
            notify(&events, RefreshMessage::RefreshStarted).await;

            match fetch_checked(fetcher.as_ref(), &requested).await {
                Ok(response) => {
                    cache.set_response(requested, response);
                    drop(guard);
                    notify(&events, RefreshMessage::RefreshCompleted).await;
                }
                Err(e) => {
                    warn!(error = %e, "Background lookup refresh failed");
                    drop(guard);
                    notify(&events, RefreshMessage::RefreshError(e.to_string())).await;
                }
            }
        });
    }
}

/// Clears the in-flight flag when the refresh task ends, including on panic
struct RefreshGuard(Arc<AtomicBool>);

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn fetch_checked<F: LookupFetcher + ?Sized>(
    fetcher: &F,
    requested: &TagGroups,
) -> Result<TagGroupsLookupResponse, FetchError> {
    let response = fetcher.fetch(requested).await?;
    if !response.is_success() {
        return Err(FetchError::Status(response.status));
    }
    Ok(response)
}

fn serve(
    response: &TagGroupsLookupResponse,
    requested: &TagGroups,
    source: LookupSource,
) -> LookupResult {
    LookupResult {
        tag_groups: response.tag_groups.intersect(requested),
        source,
    }
}

async fn notify(events: &Option<mpsc::Sender<RefreshMessage>>, message: RefreshMessage) {
    if let Some(tx) = events {
        let _ = tx.send(message).await;
    }
}
