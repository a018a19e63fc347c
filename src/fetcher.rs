//! Backfill and incremental polling of 1m (and optionally 4h) bars from the
//! Upstream Client into the Bar Store.
//!
//! Grounded on the teacher's `CandleRetriever`/`run_backfill` pair (one-batch
//! fetch + transactional insert, `spawn_blocking`-per-unit-of-work fan-out)
//! generalized from a single forward-only historical crawl to the spec's
//! bidirectional-pagination coverage algorithm.

use crate::error::{NodeError, ProtocolError};
use crate::model::Bar;
use crate::store::{BarStore, QueryParams};
use crate::timeframe::Timeframe;
use crate::upstream::{UpstreamClient, UpstreamRow};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

const PAGE_SIZE: u32 = 1500;

#[derive(Clone)]
pub struct Fetcher {
    store: Arc<dyn BarStore>,
    client: Arc<UpstreamClient>,
    fetch_concurrency: usize,
    backfill_days: u32,
    pull_4h: bool,
    init_pull_1m: Option<i64>,
    init_pull_4h: Option<i64>,
}

impl Fetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn BarStore>,
        client: Arc<UpstreamClient>,
        fetch_concurrency: usize,
        backfill_days: u32,
        pull_4h: bool,
        init_pull_1m: Option<i64>,
        init_pull_4h: Option<i64>,
    ) -> Self {
        Fetcher { store, client, fetch_concurrency, backfill_days, pull_4h, init_pull_1m, init_pull_4h }
    }

    /// Ensures `symbol`'s 1m history (and, if `pull_4h` is set, its 4h
    /// history) covers at least `backfill_days` back from now. The day-based
    /// count and the legacy `INIT_PULL_1M`/`INIT_PULL_4H` explicit counts are
    /// mutually exclusive: when `backfill_days > 0` it always wins and the
    /// legacy counts are ignored; only when `backfill_days == 0` do the
    /// legacy counts (where set) drive coverage instead.
    pub async fn initial_fetch(&self, symbol: &str) -> Result<(), NodeError> {
        if self.backfill_days > 0 {
            let bars_1m = self.backfill_days as i64 * 1440;
            self.ensure_coverage(symbol, Timeframe::M1, bars_1m).await?;
            if self.pull_4h {
                let bars_4h = self.backfill_days as i64 * 6;
                self.ensure_coverage(symbol, Timeframe::H4, bars_4h).await?;
            }
        } else {
            if let Some(bars_1m) = self.init_pull_1m {
                self.ensure_coverage(symbol, Timeframe::M1, bars_1m).await?;
            }
            if let Some(bars_4h) = self.init_pull_4h {
                self.ensure_coverage(symbol, Timeframe::H4, bars_4h).await?;
            }
        }
        Ok(())
    }

    /// Like `initial_fetch` but with an explicit bar count and timeframe,
    /// bypassing both the day-based default and the `INIT_PULL_*` overrides.
    pub async fn initial_fetch_explicit(&self, symbol: &str, timeframe: Timeframe, bar_count: i64) -> Result<(), NodeError> {
        self.ensure_coverage(symbol, timeframe, bar_count).await
    }

    /// Fetches the latest 2 upstream bars (the forming bar and the just-closed
    /// one) and upserts both; the store overwrites any earlier version on the
    /// next poll.
    pub async fn incremental_fetch(&self, symbol: &str) -> Result<(), NodeError> {
        let rows = self.client.klines(symbol, Timeframe::M1, 2, None, None).await?;
        let bars = parse_rows(symbol, Timeframe::M1, &rows)?;
        self.upsert(bars).await
    }

    pub async fn initial_fetch_all(&self, symbols: &[String]) -> Vec<(String, Result<(), NodeError>)> {
        self.fan_out(symbols, |f, s| async move { f.initial_fetch(&s).await }).await
    }

    pub async fn incremental_fetch_all(&self, symbols: &[String]) -> Vec<(String, Result<(), NodeError>)> {
        self.fan_out(symbols, |f, s| async move { f.incremental_fetch(&s).await }).await
    }

    async fn fan_out<F, Fut>(&self, symbols: &[String], op: F) -> Vec<(String, Result<(), NodeError>)>
    where
        F: Fn(Fetcher, String) -> Fut + Copy,
        Fut: std::future::Future<Output = Result<(), NodeError>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency.max(1)));
        let tasks = symbols.iter().cloned().map(|symbol| {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = self.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                let result = op(fetcher, symbol.clone()).await;
                (symbol, result)
            }
        });
        futures_util::future::join_all(tasks).await
    }

    /// §4.3's coverage algorithm: forward-only if the store is empty for
    /// `(symbol, timeframe)`, otherwise a backward pass to close any gap
    /// below the retention horizon followed by a forward pass to now.
    async fn ensure_coverage(&self, symbol: &str, timeframe: Timeframe, n_bars: i64) -> Result<(), NodeError> {
        let duration = timeframe.duration_ms();
        let now = now_ms();
        let target_start = now - n_bars * duration;

        let store = Arc::clone(&self.store);
        let sym = symbol.to_string();
        let max_t = tokio::task::spawn_blocking(move || store.max_open_time(timeframe, Some(sym.as_str())))
            .await
            .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??;

        match max_t {
            None => self.page_forward(symbol, timeframe, target_start, now).await,
            Some(max_t) => {
                if max_t > target_start {
                    self.page_backward(symbol, timeframe, max_t, target_start).await?;
                }
                self.page_forward(symbol, timeframe, max_t + duration, now).await
            }
        }
    }

    /// Repeatedly requests up to `PAGE_SIZE` rows with `startTime = cursor`,
    /// upserting each page, until an empty page or the cursor would overshoot
    /// `until`.
    async fn page_forward(&self, symbol: &str, timeframe: Timeframe, start: i64, until: i64) -> Result<(), NodeError> {
        let duration = timeframe.duration_ms();
        let mut cursor = start;
        loop {
            if cursor > until {
                return Ok(());
            }
            let rows = self.client.klines(symbol, timeframe, PAGE_SIZE, Some(cursor), None).await?;
            if rows.is_empty() {
                return Ok(());
            }
            let bars = parse_rows(symbol, timeframe, &rows)?;
            let last_open_time = bars.last().map(|b| b.open_time).unwrap_or(cursor);
            let short_page = bars.len() < PAGE_SIZE as usize;
            self.upsert(bars).await?;
            cursor = last_open_time + duration;
            if short_page && cursor > until {
                return Ok(());
            }
        }
    }

    /// Repeatedly requests up to `PAGE_SIZE` rows with `endTime = cursor`,
    /// walking backward until an empty page or the oldest row in a page has
    /// reached `until`.
    async fn page_backward(&self, symbol: &str, timeframe: Timeframe, end: i64, until: i64) -> Result<(), NodeError> {
        let mut cursor = end;
        loop {
            let rows = self.client.klines(symbol, timeframe, PAGE_SIZE, None, Some(cursor)).await?;
            if rows.is_empty() {
                return Ok(());
            }
            let bars = parse_rows(symbol, timeframe, &rows)?;
            let first_open_time = bars.first().map(|b| b.open_time).unwrap_or(cursor);
            self.upsert(bars).await?;
            if first_open_time <= until {
                return Ok(());
            }
            cursor = first_open_time - 1;
        }
    }

    async fn upsert(&self, bars: Vec<Bar>) -> Result<(), NodeError> {
        if bars.is_empty() {
            return Ok(());
        }
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.upsert(&bars))
            .await
            .map_err(|e| NodeError::Store(crate::error::StoreError::TaskJoin(e.to_string())))??;
        Ok(())
    }
}

/// Parses the upstream's untyped 12-element rows into `Bar`s, used by
/// `Fetcher` alone — the Upstream Client itself never interprets a row.
fn parse_rows(symbol: &str, timeframe: Timeframe, rows: &[UpstreamRow]) -> Result<Vec<Bar>, ProtocolError> {
    rows.iter().map(|row| parse_row(symbol, timeframe, row)).collect()
}

fn parse_row(symbol: &str, timeframe: Timeframe, row: &UpstreamRow) -> Result<Bar, ProtocolError> {
    let arr = row.as_array().ok_or_else(|| ProtocolError::Malformed("kline row is not an array".into()))?;
    if arr.len() < 11 {
        return Err(ProtocolError::Malformed(format!("kline row has {} fields, expected 12", arr.len())));
    }
    let open_time = as_i64(&arr[0])?;
    let open = as_f64(&arr[1])?;
    let high = as_f64(&arr[2])?;
    let low = as_f64(&arr[3])?;
    let close = as_f64(&arr[4])?;
    let volume = as_f64(&arr[5])?;
    let quote_volume = as_f64(&arr[7])?;
    let trades = as_i64(&arr[8])?;
    let taker_buy_base = as_f64(&arr[9])?;
    let taker_buy_quote = as_f64(&arr[10])?;

    Ok(Bar::closed(symbol, timeframe, open_time, open, high, low, close, volume, quote_volume, trades, taker_buy_base, taker_buy_quote))
}

fn as_i64(v: &Value) -> Result<i64, ProtocolError> {
    v.as_i64().ok_or_else(|| ProtocolError::Malformed(format!("expected integer, got {v}")))
}

fn as_f64(v: &Value) -> Result<f64, ProtocolError> {
    if let Some(s) = v.as_str() {
        return s.parse().map_err(|_| ProtocolError::Malformed(format!("expected numeric string, got {v}")));
    }
    v.as_f64().ok_or_else(|| ProtocolError::Malformed(format!("expected number, got {v}")))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_well_formed_binance_row() {
        let row = json!([1700000000000i64, "1.0", "2.0", "0.5", "1.5", "10.0", 1700000059999i64, "15.0", 3, "4.0", "6.0", "0"]);
        let bar = parse_row("BTCUSDT", Timeframe::M1, &row).unwrap();
        assert_eq!(bar.open_time, 1700000000000);
        assert_eq!(bar.close_time, 1700000059999);
        assert_eq!(bar.high, 2.0);
        assert_eq!(bar.trades, 3);
        assert!(bar.is_final);
    }

    #[test]
    fn rejects_a_short_row() {
        let row = json!([1, 2, 3]);
        assert!(parse_row("BTCUSDT", Timeframe::M1, &row).is_err());
    }
}
