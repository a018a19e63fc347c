//! Derivation of higher timeframes from stored 1m bars.
//!
//! No teacher counterpart exists — the teacher fetches every timeframe
//! directly from Binance. Grounded on the windowed/chunked algorithm of
//! §4.4: walk forward from the last aggregated bucket in 3-day windows,
//! fold each bucket's 1m bars into one OHLCV bar, flush in batches of at
//! least 5000 and tail the flushed batch into the recent-bucket ring.

use crate::error::NodeError;
use crate::model::Bar;
use crate::ring::{BucketSummary, RecentBucketRing};
use crate::store::{BarStore, QueryParams};
use crate::timeframe::Timeframe;
use std::collections::BTreeMap;
use std::sync::Arc;

const WINDOW_MS: i64 = 3 * 24 * 60 * 60 * 1000;
const FLUSH_THRESHOLD: usize = 5000;
const AGGREGATION_QUERY_LIMIT: i64 = 500_000;

pub struct Aggregator {
    store: Arc<dyn BarStore>,
    ring: Arc<RecentBucketRing>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn BarStore>, ring: Arc<RecentBucketRing>) -> Self {
        Aggregator { store, ring }
    }

    /// Runs every higher timeframe in the fixed order 3m, 5m, 15m, 1h, 4h, 1d.
    pub async fn aggregate_all(&self, symbol: &str) -> Result<(), NodeError> {
        for target in Timeframe::AGGREGATE_TARGETS {
            self.aggregate_symbol(symbol, target).await?;
        }
        Ok(())
    }

    /// Incrementally derives `target`'s bars for `symbol` from stored 1m
    /// bars, resuming from the bucket after the last one already written.
    /// A no-op when the last written bucket is already the last closed one.
    pub async fn aggregate_symbol(&self, symbol: &str, target: Timeframe) -> Result<(), NodeError> {
        let store = Arc::clone(&self.store);
        let sym = symbol.to_string();
        let (last_t, min_1m) = tokio::task::spawn_blocking({
            let store = Arc::clone(&store);
            let sym = sym.clone();
            move || -> Result<(Option<i64>, Option<i64>), crate::error::StoreError> {
                let last_t = store.max_open_time(target, Some(&sym))?;
                let min_1m = store.min_open_time(Timeframe::M1, Some(&sym))?;
                Ok((last_t, min_1m))
            }
        })
        .await
        .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??;

        let Some(min_1m) = min_1m else {
            return Ok(());
        };

        let duration = target.duration_ms();
        let start = match last_t {
            Some(t) => target.bucket_start(t + duration),
            None => target.bucket_start(min_1m),
        };

        let now = chrono::Utc::now().timestamp_millis();
        let end_bucket = target.bucket_start(now - 1);
        if start > end_bucket {
            return Ok(());
        }

        let mut cur = start;
        let mut pending: Vec<Bar> = Vec::new();
        while cur <= end_bucket {
            let window_end = (end_bucket + duration - 1).min(cur + WINDOW_MS - 1);

            let store = Arc::clone(&self.store);
            let sym2 = sym.clone();
            let window_bars = tokio::task::spawn_blocking(move || {
                store.query(
                    &sym2,
                    Timeframe::M1,
                    &QueryParams { start_ms: Some(cur), end_ms: Some(window_end), limit: AGGREGATION_QUERY_LIMIT, only_final: true },
                )
            })
            .await
            .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??;

            let buckets = fold_into_buckets(symbol, target, &window_bars);
            pending.extend(buckets);

            if pending.len() >= FLUSH_THRESHOLD {
                self.flush(symbol, target, &mut pending).await?;
            }

            cur += WINDOW_MS;
        }
        self.flush(symbol, target, &mut pending).await?;
        Ok(())
    }

    async fn flush(&self, symbol: &str, timeframe: Timeframe, pending: &mut Vec<Bar>) -> Result<(), NodeError> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(pending);
        let tail: Vec<BucketSummary> = batch.iter().rev().take(self.ring.capacity()).rev().map(BucketSummary::from).collect();

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.upsert(&batch))
            .await
            .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??;

        for summary in tail {
            self.ring.put(symbol, timeframe, summary).await;
        }
        Ok(())
    }
}

/// Folds 1m bars into buckets on `target`'s duration grid, emitting one
/// aggregate `Bar` per bucket that has at least one constituent 1m bar.
/// Buckets are emitted in ascending `open_time`.
fn fold_into_buckets(symbol: &str, target: Timeframe, bars: &[Bar]) -> Vec<Bar> {
    let duration = target.duration_ms();
    let mut grouped: BTreeMap<i64, Vec<&Bar>> = BTreeMap::new();
    for bar in bars {
        grouped.entry(target.bucket_start(bar.open_time)).or_default().push(bar);
    }

    grouped
        .into_iter()
        .map(|(bucket_start, mut members)| {
            members.sort_by_key(|b| b.open_time);
            let open = members.first().unwrap().open;
            let close = members.last().unwrap().close;
            let high = members.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let low = members.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            let volume = members.iter().map(|b| b.volume).sum();
            let quote_volume = members.iter().map(|b| b.quote_volume).sum();
            let trades = members.iter().map(|b| b.trades).sum();
            let taker_buy_base = members.iter().map(|b| b.taker_buy_base).sum();
            let taker_buy_quote = members.iter().map(|b| b.taker_buy_quote).sum();

            Bar::closed(symbol, target, bucket_start, open, high, low, close, volume, quote_volume, trades, taker_buy_base, taker_buy_quote)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m1(symbol: &str, open_time: i64, price: f64) -> Bar {
        Bar::closed(symbol, Timeframe::M1, open_time, price, price, price, price, 1.0, 1.0, 1, 0.5, 0.5)
    }

    #[test]
    fn folds_ten_1m_bars_into_two_5m_buckets() {
        let t0 = 1_700_000_000_000i64 / 60_000 * 60_000;
        let bars: Vec<Bar> = (0..10).map(|i| m1("BTCUSDT", t0 + i * 60_000, 1.0)).collect();
        let buckets = fold_into_buckets("BTCUSDT", Timeframe::M5, &bars);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].open_time, Timeframe::M5.bucket_start(t0));
        assert_eq!(buckets[0].volume, 5.0);
        assert_eq!(buckets[0].open, 1.0);
        assert_eq!(buckets[0].close, 1.0);
        assert_eq!(buckets[1].open_time, buckets[0].open_time + 300_000);
    }

    #[test]
    fn aggregation_law_open_close_high_low() {
        let t0 = 0i64;
        let bars = vec![
            Bar::closed("X", Timeframe::M1, t0, 10.0, 12.0, 9.0, 11.0, 2.0, 2.0, 1, 0.1, 0.1),
            Bar::closed("X", Timeframe::M1, t0 + 60_000, 11.0, 15.0, 10.0, 14.0, 3.0, 3.0, 2, 0.2, 0.2),
            Bar::closed("X", Timeframe::M1, t0 + 120_000, 14.0, 14.5, 8.0, 13.0, 1.0, 1.0, 1, 0.1, 0.1),
        ];
        let buckets = fold_into_buckets("X", Timeframe::M3, &bars);
        assert_eq!(buckets.len(), 1);
        let b = &buckets[0];
        assert_eq!(b.open, 10.0);
        assert_eq!(b.close, 13.0);
        assert_eq!(b.high, 15.0);
        assert_eq!(b.low, 8.0);
        assert_eq!(b.volume, 6.0);
        assert_eq!(b.trades, 4);
    }

    #[test]
    fn an_empty_slice_produces_no_buckets() {
        assert!(fold_into_buckets("X", Timeframe::M5, &[]).is_empty());
    }

    #[tokio::test]
    async fn aggregating_twice_with_no_new_source_data_is_a_no_op() {
        use crate::store::sqlite::SqliteStore;

        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn BarStore> = Arc::new(SqliteStore::connect(dir.path().join("t.db").to_str().unwrap(), 2).unwrap());
        let now = chrono::Utc::now().timestamp_millis();
        let t0 = (now / 60_000 * 60_000) - 20 * 60_000;
        let bars: Vec<Bar> = (0..20).map(|i| m1("BTCUSDT", t0 + i * 60_000, 1.0)).collect();
        store.upsert(&bars).unwrap();

        let aggregator = Aggregator::new(Arc::clone(&store), Arc::new(RecentBucketRing::in_memory()));
        aggregator.aggregate_symbol("BTCUSDT", Timeframe::M5).await.unwrap();
        let first_pass = store.query("BTCUSDT", Timeframe::M5, &QueryParams { limit: 1000, ..Default::default() }).unwrap();

        aggregator.aggregate_symbol("BTCUSDT", Timeframe::M5).await.unwrap();
        let second_pass = store.query("BTCUSDT", Timeframe::M5, &QueryParams { limit: 1000, ..Default::default() }).unwrap();

        assert_eq!(first_pass, second_pass);
    }
}
