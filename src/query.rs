//! Cache-first lookup of trending listings.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::cache::TrendingCache;
use crate::error::TrendingError;
use crate::trending::{QueryKey, TrendingRecord, TrendingSource};

/// Records plus whether they came from the cache.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub records: Vec<TrendingRecord>,
    pub cached: bool,
}

type SharedFill = Shared<BoxFuture<'static, Result<QueryOutcome, TrendingError>>>;

pub struct QueryService {
    source: Arc<dyn TrendingSource>,
    cache: Option<TrendingCache>,
    fetch_timeout: Duration,
    /// At most one fill per key; concurrent misses await the same one and
    /// share its result, success or failure.
    in_flight: Arc<DashMap<String, SharedFill>>,
}

impl QueryService {
    pub fn new(
        source: Arc<dyn TrendingSource>,
        cache: Option<TrendingCache>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            fetch_timeout,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub async fn get(&self, key: &QueryKey) -> Result<QueryOutcome, TrendingError> {
        let Some(cache) = &self.cache else {
            let records = fetch(self.source.as_ref(), self.fetch_timeout, key).await?;
            return Ok(QueryOutcome { records, cached: false });
        };

        if let Some(records) = cache.get(key).await {
            debug!(key = %key, "Cache hit");
            return Ok(QueryOutcome { records, cached: true });
        }

        let (fill, joined) = self.join_or_start_fill(cache, key);
        if joined {
            debug!(key = %key, "Awaiting in-flight fetch");
        }
        let outcome = fill.await?;
        Ok(QueryOutcome {
            cached: outcome.cached || joined,
            ..outcome
        })
    }

    /// Returns the key's pending fill and whether it was already running.
    ///
    /// A new fill is driven by its own task, so the fetch, the cache write and
    /// the removal of the in-flight entry complete even if every caller is
    /// dropped.
    fn join_or_start_fill(&self, cache: &TrendingCache, key: &QueryKey) -> (SharedFill, bool) {
        let fill = match self.in_flight.entry(key.cache_key()) {
            Entry::Occupied(pending) => return (pending.get().clone(), true),
            Entry::Vacant(slot) => {
                let fill = run_fill(
                    self.source.clone(),
                    cache.clone(),
                    self.fetch_timeout,
                    key.clone(),
                    self.in_flight.clone(),
                )
                .boxed()
                .shared();
                slot.insert(fill.clone());
                fill
            }
        };
        tokio::spawn(fill.clone());
        (fill, false)
    }
}

async fn run_fill(
    source: Arc<dyn TrendingSource>,
    cache: TrendingCache,
    fetch_timeout: Duration,
    key: QueryKey,
    in_flight: Arc<DashMap<String, SharedFill>>,
) -> Result<QueryOutcome, TrendingError> {
    let result = fill_entry(source.as_ref(), &cache, fetch_timeout, &key).await;
    in_flight.remove(&key.cache_key());
    result
}

async fn fill_entry(
    source: &dyn TrendingSource,
    cache: &TrendingCache,
    fetch_timeout: Duration,
    key: &QueryKey,
) -> Result<QueryOutcome, TrendingError> {
    // An earlier fill may have finished between our miss and this one starting.
    if let Some(records) = cache.get(key).await {
        debug!(key = %key, "Cache filled by concurrent request");
        return Ok(QueryOutcome { records, cached: true });
    }

    debug!(key = %key, "Cache miss");
    let records = fetch(source, fetch_timeout, key).await?;

    if let Err(e) = cache.put(key, &records).await {
        warn!(key = %key, error = %e, "Cache write failed");
    }
    Ok(QueryOutcome { records, cached: false })
}

async fn fetch(
    source: &dyn TrendingSource,
    fetch_timeout: Duration,
    key: &QueryKey,
) -> Result<Vec<TrendingRecord>, TrendingError> {
    match tokio::time::timeout(fetch_timeout, source.fetch(key)).await {
        Ok(Ok(records)) => Ok(records),
        Ok(Err(e)) if e.is_timeout() => Err(TrendingError::Timeout(fetch_timeout)),
        Ok(Err(e)) => Err(TrendingError::UpstreamUnavailable(e)),
        Err(_) => Err(TrendingError::Timeout(fetch_timeout)),
    }
}
