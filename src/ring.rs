//! Per-`(symbol, timeframe)` bounded tail of the most recently aggregated
//! buckets. Purely an observability aid — losing it on restart is fine.
//!
//! Grounded on the Python `infra/agg/ring_buffer.py` (capacity-bounded deque
//! map) for the in-process variant and `infra/agg/redis_ring_buffer.py`
//! (capped list via `LPUSH`+`LTRIM`) for the distributed one; the teacher has
//! no counterpart.

use crate::model::Bar;
use crate::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSummary {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl From<&Bar> for BucketSummary {
    fn from(bar: &Bar) -> Self {
        BucketSummary { open_time: bar.open_time, close_time: bar.close_time, open: bar.open, high: bar.high, low: bar.low, close: bar.close }
    }
}

/// Two concrete backings behind one capability: an in-process map for a
/// single node, or a Redis-backed list so the ring survives process restarts
/// and is shared across a fleet.
pub enum RecentBucketRing {
    InMemory { capacity: usize, buckets: Mutex<HashMap<(String, Timeframe), VecDeque<BucketSummary>>> },
    Redis { capacity: usize, client: redis::Client },
}

impl RecentBucketRing {
    pub fn in_memory() -> Self {
        Self::in_memory_with_capacity(DEFAULT_CAPACITY)
    }

    pub fn in_memory_with_capacity(capacity: usize) -> Self {
        RecentBucketRing::InMemory { capacity, buckets: Mutex::new(HashMap::new()) }
    }

    pub fn redis(url: &str) -> Result<Self, redis::RedisError> {
        Ok(RecentBucketRing::Redis { capacity: DEFAULT_CAPACITY, client: redis::Client::open(url)? })
    }

    pub fn capacity(&self) -> usize {
        match self {
            RecentBucketRing::InMemory { capacity, .. } => *capacity,
            RecentBucketRing::Redis { capacity, .. } => *capacity,
        }
    }

    /// Appends `summary`, evicting the oldest entry once the ring is at
    /// capacity.
    pub async fn put(&self, symbol: &str, timeframe: Timeframe, summary: BucketSummary) {
        match self {
            RecentBucketRing::InMemory { capacity, buckets } => {
                let mut guard = buckets.lock().expect("ring mutex poisoned");
                let deque = guard.entry((symbol.to_string(), timeframe)).or_default();
                if deque.len() >= *capacity {
                    deque.pop_front();
                }
                deque.push_back(summary);
            }
            RecentBucketRing::Redis { capacity, client } => {
                if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                    let key = redis_key(symbol, timeframe);
                    let payload = serde_json::to_string(&summary).unwrap_or_default();
                    let _: redis::RedisResult<()> = redis::pipe()
                        .rpush(&key, payload)
                        .ltrim(&key, -(*capacity as isize), -1)
                        .query_async(&mut conn)
                        .await;
                }
            }
        }
    }

    /// A snapshot of the ring for `(symbol, timeframe)` in insertion order,
    /// oldest first.
    pub async fn get_all(&self, symbol: &str, timeframe: Timeframe) -> Vec<BucketSummary> {
        match self {
            RecentBucketRing::InMemory { buckets, .. } => {
                let guard = buckets.lock().expect("ring mutex poisoned");
                guard.get(&(symbol.to_string(), timeframe)).map(|d| d.iter().cloned().collect()).unwrap_or_default()
            }
            RecentBucketRing::Redis { client, .. } => {
                let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
                    return Vec::new();
                };
                let key = redis_key(symbol, timeframe);
                let raw: Vec<String> = redis::cmd("LRANGE").arg(&key).arg(0).arg(-1).query_async(&mut conn).await.unwrap_or_default();
                raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect()
            }
        }
    }
}

fn redis_key(symbol: &str, timeframe: Timeframe) -> String {
    format!("ring:{symbol}:{}", timeframe.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(open_time: i64) -> BucketSummary {
        BucketSummary { open_time, close_time: open_time + 1, open: 1.0, high: 1.0, low: 1.0, close: 1.0 }
    }

    #[tokio::test]
    async fn evicts_oldest_past_capacity() {
        let ring = RecentBucketRing::in_memory_with_capacity(3);
        for i in 0..5 {
            ring.put("BTCUSDT", Timeframe::M5, summary(i)).await;
        }
        let snapshot = ring.get_all("BTCUSDT", Timeframe::M5).await;
        let open_times: Vec<i64> = snapshot.iter().map(|b| b.open_time).collect();
        assert_eq!(open_times, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn different_timeframes_do_not_share_a_slot() {
        let ring = RecentBucketRing::in_memory();
        ring.put("BTCUSDT", Timeframe::M5, summary(0)).await;
        ring.put("BTCUSDT", Timeframe::M15, summary(1)).await;
        assert_eq!(ring.get_all("BTCUSDT", Timeframe::M5).await.len(), 1);
        assert_eq!(ring.get_all("BTCUSDT", Timeframe::M15).await.len(), 1);
    }
}
