//! TTL-bounded result cache with in-flight deduplication.
//!
//! Successful results are memoized per `(video, artifact)` key. While a
//! fallback chain for a key is running, later callers join it instead of
//! starting their own; the cache keeps only a weak handle to the running
//! chain, so when every caller has gone away the chain is dropped.

use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ExtractionFailure;
use crate::models::{ArtifactType, ExtractionRequest, ExtractionResult, VideoId};

/// Outcome of one fallback chain, shared by every caller that joined it
pub type ChainResult = Result<ExtractionResult, ExtractionFailure>;

/// Future of a running chain that any number of callers can await
pub type SharedChain = Shared<BoxFuture<'static, ChainResult>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub video_id: VideoId,
    pub artifact_type: ArtifactType,
}

impl CacheKey {
    pub fn new(video_id: VideoId, artifact_type: ArtifactType) -> Self {
        Self {
            video_id,
            artifact_type,
        }
    }

    pub fn for_request(request: &ExtractionRequest) -> Self {
        Self::new(request.video_id.clone(), request.artifact_type)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ExtractionResult,
    stored_at: Instant,
}

struct InFlight {
    generation: u64,
    chain: WeakShared<BoxFuture<'static, ChainResult>>,
}

/// What a lookup produced
pub enum Lookup {
    /// A live cached result
    Hit(ExtractionResult),
    /// A chain to await; `joined` is true when another caller started it
    Chain { chain: SharedChain, joined: bool },
}

pub struct ResultCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    generation: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live entry for `key`; expired entries are dropped on the way
    pub fn get(&self, key: &CacheKey) -> Option<ExtractionResult> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `result`, evicting the oldest entry when full
    pub fn insert(&self, key: CacheKey, result: ExtractionResult) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                tracing::debug!("Evicting cached {} for {}", oldest.artifact_type, oldest.video_id);
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of stored entries, live or not yet purged
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chains currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .values()
            .filter(|flight| flight.chain.upgrade().is_some())
            .count()
    }

    /// Return a live result, join the running chain for `key`, or start one.
    ///
    /// With `bypass_cache` a stored result is ignored, but a chain already
    /// running for the key is still joined. The started chain stores its
    /// success and clears its own in-flight slot when it completes.
    pub fn lookup_or_start<F>(self: &Arc<Self>, key: CacheKey, bypass_cache: bool, start: F) -> Lookup
    where
        F: FnOnce() -> BoxFuture<'static, ChainResult>,
    {
        let mut in_flight = self.in_flight.lock();

        // Re-checked under the in-flight lock so a chain finishing right now
        // is seen either in the cache or in the in-flight map
        if !bypass_cache {
            if let Some(result) = self.get(&key) {
                return Lookup::Hit(result);
            }
        }

        if let Some(chain) = in_flight.get(&key).and_then(|flight| flight.chain.upgrade()) {
            return Lookup::Chain { chain, joined: true };
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cache = Arc::clone(self);
        let chain_key = key.clone();
        let work = start();

        let chain = async move {
            let result = work.await;
            if let Ok(value) = &result {
                cache.insert(chain_key.clone(), value.clone());
            }
            cache.finish(&chain_key, generation);
            result
        }
        .boxed()
        .shared();

        match chain.downgrade() {
            Some(weak) => {
                in_flight.insert(
                    key,
                    InFlight {
                        generation,
                        chain: weak,
                    },
                );
            }
            None => {
                in_flight.remove(&key);
            }
        }

        Lookup::Chain {
            chain,
            joined: false,
        }
    }

    /// Clear the in-flight slot if it still belongs to `generation`
    fn finish(&self, key: &CacheKey, generation: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(key)
            .map_or(false, |flight| flight.generation == generation)
        {
            in_flight.remove(key);
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VideoMetadata;
    use std::sync::atomic::AtomicUsize;

    fn key(id: &str) -> CacheKey {
        CacheKey::new(VideoId::parse(id).unwrap(), ArtifactType::Metadata)
    }

    fn metadata(title: &str) -> ExtractionResult {
        ExtractionResult::Metadata(VideoMetadata {
            title: title.to_string(),
            channel_name: "channel".to_string(),
            duration_seconds: Some(212),
            upload_date: None,
            thumbnail_url: None,
            source: "direct-api".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache.insert(key("dQw4w9WgXcQ"), metadata("a"));
        assert!(cache.get(&key("dQw4w9WgXcQ")).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key("dQw4w9WgXcQ")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_invalidate() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache.insert(key("aaaaaaaaaaa"), metadata("a"));
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.insert(key("bbbbbbbbbbb"), metadata("b"));
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&key("bbbbbbbbbbb")));
        assert!(!cache.invalidate(&key("bbbbbbbbbbb")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = ResultCache::new(Duration::from_secs(600), 2);
        cache.insert(key("aaaaaaaaaaa"), metadata("a"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(key("bbbbbbbbbbb"), metadata("b"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(key("ccccccccccc"), metadata("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("aaaaaaaaaaa")).is_none());
        assert!(cache.get(&key("ccccccccccc")).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_chain() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 10));
        let started = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let counter = started.clone();
        let first = cache.lookup_or_start(key("dQw4w9WgXcQ"), false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = rx.await;
                Ok(metadata("shared"))
            }
            .boxed()
        });
        let counter = started.clone();
        let second = cache.lookup_or_start(key("dQw4w9WgXcQ"), false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(metadata("duplicate")) }.boxed()
        });

        let (Lookup::Chain { chain: a, joined: false }, Lookup::Chain { chain: b, joined: true }) =
            (first, second)
        else {
            panic!("expected one started and one joined chain");
        };
        assert_eq!(cache.in_flight(), 1);

        tx.send(()).unwrap();
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, b);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);

        match cache.lookup_or_start(key("dQw4w9WgXcQ"), false, || unreachable!()) {
            Lookup::Hit(result) => assert_eq!(result, metadata("shared")),
            Lookup::Chain { .. } => panic!("expected cache hit"),
        }
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 10));
        let lookup = cache.lookup_or_start(key("dQw4w9WgXcQ"), false, || {
            async { Err(ExtractionFailure::exhausted(Vec::new())) }.boxed()
        });
        let Lookup::Chain { chain, .. } = lookup else {
            panic!("expected chain");
        };
        assert!(chain.await.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_chain_is_not_joined() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 10));
        let lookup = cache.lookup_or_start(key("dQw4w9WgXcQ"), false, || {
            futures_util::future::pending().boxed()
        });
        drop(lookup);
        assert_eq!(cache.in_flight(), 0);

        let again = cache.lookup_or_start(key("dQw4w9WgXcQ"), false, || {
            async { Ok(metadata("fresh")) }.boxed()
        });
        assert!(matches!(again, Lookup::Chain { joined: false, .. }));
    }
}
