//! `GetKlines` and the health snapshot — the two read-path orchestrations
//! the HTTP binary calls into.
//!
//! Grounded on the Python `domain/usecases.py` directly (cache-key format,
//! lag computation).

use crate::cache::{ResponseCache, cache_key};
use crate::error::NodeError;
use crate::serializer::serialize_bars;
use crate::store::{BarStore, QueryParams};
use crate::timeframe::Timeframe;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct GetKlinesParams {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: i64,
    pub include_current: bool,
}

pub struct GetKlines {
    store: Arc<dyn BarStore>,
    cache: Arc<ResponseCache>,
    cache_ttl_seconds: u64,
}

impl GetKlines {
    pub fn new(store: Arc<dyn BarStore>, cache: Arc<ResponseCache>, cache_ttl_seconds: u64) -> Self {
        GetKlines { store, cache, cache_ttl_seconds }
    }

    /// Cache hit returns cached bytes verbatim; a miss queries the store,
    /// serializes, inserts into the cache, and returns the fresh bytes.
    pub async fn handle(&self, params: GetKlinesParams) -> Result<Vec<u8>, NodeError> {
        let only_final = !params.include_current;
        let key = cache_key(&params.symbol, params.timeframe, params.start_ms, params.end_ms, params.limit, only_final);

        if let Some(bytes) = self.cache.get(&key).await {
            return Ok(bytes);
        }

        let store = Arc::clone(&self.store);
        let symbol = params.symbol.clone();
        let query_params = QueryParams { start_ms: params.start_ms, end_ms: params.end_ms, limit: params.limit, only_final };
        let bars = tokio::task::spawn_blocking(move || store.query(&symbol, params.timeframe, &query_params))
            .await
            .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??;

        let bytes = serialize_bars(&bars);
        self.cache.set(&key, bytes.clone(), self.cache_ttl_seconds.max(1)).await;
        Ok(bytes)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub now: i64,
    pub lag_sec_1m: Option<i64>,
    pub lag_sec_agg: BTreeMap<String, Option<i64>>,
    pub version: String,
}

impl HealthSnapshot {
    /// `lag_sec_X = max(0, (now - max_open_time(X)) / 1000)`, or absent when
    /// the table is empty.
    pub async fn handle(store: Arc<dyn BarStore>, version: String) -> Result<HealthSnapshot, NodeError> {
        let now = chrono::Utc::now().timestamp_millis();
        let store_for_1m = Arc::clone(&store);
        let lag_sec_1m = tokio::task::spawn_blocking(move || store_for_1m.max_open_time(Timeframe::M1, None))
            .await
            .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??
            .map(|t| lag_seconds(now, t));

        let mut lag_sec_agg = BTreeMap::new();
        for tf in Timeframe::AGGREGATE_TARGETS {
            let store = Arc::clone(&store);
            let max_t = tokio::task::spawn_blocking(move || store.max_open_time(tf, None))
                .await
                .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??;
            lag_sec_agg.insert(tf.as_str().to_string(), max_t.map(|t| lag_seconds(now, t)));
        }

        Ok(HealthSnapshot { status: "ok", now, lag_sec_1m, lag_sec_agg, version })
    }
}

fn lag_seconds(now: i64, open_time: i64) -> i64 {
    ((now - open_time) / 1000).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_seconds_never_goes_negative() {
        assert_eq!(lag_seconds(1000, 5000), 0);
        assert_eq!(lag_seconds(121_000, 1_000), 120);
    }
}
