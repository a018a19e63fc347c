//! The durable `(symbol, timeframe, open_time) -> Bar` mapping.
//!
//! `BarStore` is a capability trait with two backends (`sqlite`, `postgres`)
//! chosen at startup from `Settings::db_url`. Every method is a blocking
//! call against a pooled connection; callers that run on the async runtime
//! hop through `tokio::task::spawn_blocking` the way the teacher's
//! `web::block` wraps its own rusqlite calls.

pub mod postgres;
pub mod sqlite;

use crate::error::StoreError;
use crate::model::Bar;
use crate::timeframe::Timeframe;
use std::sync::Arc;

/// Query parameters shared by every `BarStore::query` call.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: i64,
    pub only_final: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        QueryParams {
            start_ms: None,
            end_ms: None,
            limit: 500,
            only_final: true,
        }
    }
}

pub trait BarStore: Send + Sync {
    /// Inserts or replaces every bar in `bars`. All bars must share one
    /// timeframe; the call is atomic (all rows land in one transaction).
    /// An empty slice is a no-op.
    fn upsert(&self, bars: &[Bar]) -> Result<(), StoreError>;

    /// The most recent `params.limit` bars for `symbol` whose `open_time`
    /// falls in `[start_ms, end_ms]` (either side unbounded if absent),
    /// sorted ascending by `open_time`.
    fn query(&self, symbol: &str, timeframe: Timeframe, params: &QueryParams) -> Result<Vec<Bar>, StoreError>;

    /// The latest `open_time` stored for `timeframe`. `symbol = None` scans
    /// every symbol in the table (the health endpoint's use); `Some(sym)`
    /// scopes to one symbol, which is what the Fetcher's and Aggregator's
    /// per-symbol coverage/bucket cursors need.
    fn max_open_time(&self, timeframe: Timeframe, symbol: Option<&str>) -> Result<Option<i64>, StoreError>;

    /// The earliest `open_time` stored for `timeframe`, with the same
    /// `symbol` scoping as `max_open_time`.
    fn min_open_time(&self, timeframe: Timeframe, symbol: Option<&str>) -> Result<Option<i64>, StoreError>;

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Builds the backend named by `db_url`'s scheme: `sqlite://` or
/// `postgres://`/`postgresql://`.
pub fn connect(db_url: &str, pool_size: u32) -> Result<Arc<dyn BarStore>, StoreError> {
    if let Some(path) = db_url.strip_prefix("sqlite://") {
        Ok(Arc::new(sqlite::SqliteStore::connect(path, pool_size)?))
    } else if db_url.starts_with("postgres://") || db_url.starts_with("postgresql://") {
        Ok(Arc::new(postgres::PostgresStore::connect(db_url, pool_size)?))
    } else {
        Err(StoreError::PoolUnavailable)
    }
}

/// Validates that every bar shares one timeframe and returns it, or `None`
/// for an empty batch. Shared by both backends' `upsert`.
pub(crate) fn single_timeframe(bars: &[Bar]) -> Option<Timeframe> {
    let first = bars.first()?.interval;
    debug_assert!(bars.iter().all(|b| b.interval == first));
    Some(first)
}

/// The column list shared by all seven per-timeframe tables, in DDL/insert
/// order.
pub(crate) const COLUMNS: &str = "symbol, open_time, open, high, low, close, volume, \
     close_time, quote_volume, trades, taker_buy_base, taker_buy_quote, is_final";
