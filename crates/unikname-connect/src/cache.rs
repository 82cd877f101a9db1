//! Cache-or-compute service with per-entry expiry.
//!
//! The engine caches discovery documents through [`CacheService`] so hosts can
//! plug in their own cache. [`MokaCacheService`] is the default: concurrent
//! callers that miss the same key share one producer run, and failed runs are
//! not cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use moka::Expiry;
use moka::future::Cache;

/// Generic cache-or-compute service.
#[async_trait]
pub trait CacheService<V, E>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Returns the cached value for `key`, or runs `producer` and caches its
    /// successful result for `ttl`.
    async fn fetch(
        &self,
        key: &str,
        ttl: Duration,
        producer: BoxFuture<'static, Result<V, E>>,
    ) -> Result<V, E>;

    /// Drops the cached value for `key`.
    async fn invalidate(&self, key: &str);
}

#[derive(Clone)]
struct TtlEntry<V> {
    value: V,
    ttl: Duration,
}

/// Expires each entry after the TTL it was inserted with.
struct EntryTtl;

impl<V> Expiry<String, TtlEntry<V>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TtlEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`CacheService`] backed by moka.
pub struct MokaCacheService<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<String, TtlEntry<V>>,
}

impl<V> MokaCacheService<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `max_capacity` entries.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(EntryTtl)
                .build(),
        }
    }
}

#[async_trait]
impl<V, E> CacheService<V, E> for MokaCacheService<V>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn fetch(
        &self,
        key: &str,
        ttl: Duration,
        producer: BoxFuture<'static, Result<V, E>>,
    ) -> Result<V, E> {
        self.cache
            .try_get_with(key.to_string(), async move {
                producer.await.map(|value| TtlEntry { value, ttl })
            })
            .await
            .map(|entry| entry.value)
            .map_err(|e: Arc<E>| E::clone(&e))
    }

    async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }
}
