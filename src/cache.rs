//! Short-TTL cache from a request fingerprint to already-serialized response
//! bytes — deliberately byte caching, not object caching, so a hit collapses
//! to a memory copy (§9, "Response-byte caching vs. object caching").
//!
//! Grounded on the teacher's `bin/web_server.rs` `moka::future::Cache`
//! (cache-before-query shape) adapted to cache bytes instead of `Candle`
//! vectors, keyed per §4.5's fingerprint format.

use crate::timeframe::Timeframe;
use moka::future::Cache as MokaCache;
use std::time::{Duration, Instant};

const DEFAULT_MAX_ITEMS: u64 = 10_000;

/// `k:{symbol}:{timeframe}:{end_or_empty}:{limit}:{only_final}:{start_or_0}`.
/// Deliberately omits non-deterministic request fields.
pub fn cache_key(symbol: &str, timeframe: Timeframe, start_ms: Option<i64>, end_ms: Option<i64>, limit: i64, only_final: bool) -> String {
    format!(
        "k:{symbol}:{tf}:{end}:{limit}:{only_final}:{start}",
        tf = timeframe.as_str(),
        end = end_ms.map(|v| v.to_string()).unwrap_or_default(),
        only_final = if only_final { 1 } else { 0 },
        start = start_ms.unwrap_or(0),
    )
}

#[derive(Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Two concrete backings: an in-process LRU with absolute per-entry expiry,
/// or a Redis-backed cache using the store's native TTL.
pub enum ResponseCache {
    InMemory(MokaCache<String, Entry>),
    Redis(redis::Client),
}

impl ResponseCache {
    pub fn in_memory() -> Self {
        Self::in_memory_with_capacity(DEFAULT_MAX_ITEMS)
    }

    pub fn in_memory_with_capacity(max_items: u64) -> Self {
        ResponseCache::InMemory(MokaCache::builder().max_capacity(max_items).build())
    }

    pub fn redis(url: &str) -> Result<Self, redis::RedisError> {
        Ok(ResponseCache::Redis(redis::Client::open(url)?))
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self {
            ResponseCache::InMemory(cache) => {
                let entry = cache.get(key).await?;
                if entry.expires_at <= Instant::now() {
                    cache.invalidate(key).await;
                    return None;
                }
                Some(entry.bytes)
            }
            ResponseCache::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await.ok()?;
                let reply: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await.ok().flatten();
                reply
            }
        }
    }

    /// Inserts `bytes` under `key`, expiring after `max(1, ttl_seconds)`.
    pub async fn set(&self, key: &str, bytes: Vec<u8>, ttl_seconds: u64) {
        let ttl = Duration::from_secs(ttl_seconds.max(1));
        match self {
            ResponseCache::InMemory(cache) => {
                cache.insert(key.to_string(), Entry { bytes, expires_at: Instant::now() + ttl }).await;
            }
            ResponseCache::Redis(client) => {
                if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                    let _: redis::RedisResult<()> = redis::cmd("SET").arg(key).arg(bytes).arg("EX").arg(ttl.as_secs()).query_async(&mut conn).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_omits_nondeterministic_fields_and_matches_the_format() {
        let key = cache_key("BTCUSDT", Timeframe::M1, Some(10), None, 500, true);
        assert_eq!(key, "k:BTCUSDT:1m::500:1:10");
    }

    #[tokio::test]
    async fn a_fresh_entry_is_returned_verbatim() {
        let cache = ResponseCache::in_memory();
        cache.set("k", b"hello".to_vec(), 10).await;
        assert_eq!(cache.get("k").await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn an_expired_entry_reads_as_absent() {
        let cache = ResponseCache::in_memory();
        cache.set("k", b"hello".to_vec(), 1).await;
        if let ResponseCache::InMemory(inner) = &cache {
            let mut entry = inner.get("k").await.unwrap();
            entry.expires_at = Instant::now() - Duration::from_secs(1);
            inner.insert("k".to_string(), entry).await;
        }
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn a_missing_key_is_absent() {
        let cache = ResponseCache::in_memory();
        assert_eq!(cache.get("nope").await, None);
    }
}
