//! Networked backend: pooled PostgreSQL connections, same seven-table shape
//! as the SQLite backend, relying on the engine's default MVCC isolation
//! instead of WAL mode for reader/writer concurrency.
//!
//! Grounded on `other_examples/.../mqk-db-src-lib.rs.rs`'s pooled-access-layer
//! shape, run through `r2d2_postgres` rather than an async driver so it shares
//! the teacher's blocking-call-wrapped-in-a-task idiom with the SQLite backend.

use super::{BarStore, QueryParams, COLUMNS, single_timeframe};
use crate::error::StoreError;
use crate::model::Bar;
use crate::timeframe::Timeframe;
use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;

pub struct PostgresStore {
    pool: r2d2::Pool<PostgresConnectionManager<NoTls>>,
}

impl PostgresStore {
    pub fn connect(db_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let config: postgres::Config = db_url.parse()?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = r2d2::Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        let mut conn = pool.get()?;
        for tf in Timeframe::ALL {
            conn.execute(&ddl(tf), &[])?;
        }
        Ok(PostgresStore { pool })
    }
}

fn ddl(tf: Timeframe) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            symbol TEXT NOT NULL,
            open_time BIGINT NOT NULL,
            open DOUBLE PRECISION NOT NULL,
            high DOUBLE PRECISION NOT NULL,
            low DOUBLE PRECISION NOT NULL,
            close DOUBLE PRECISION NOT NULL,
            volume DOUBLE PRECISION NOT NULL,
            close_time BIGINT NOT NULL,
            quote_volume DOUBLE PRECISION NOT NULL,
            trades BIGINT NOT NULL,
            taker_buy_base DOUBLE PRECISION NOT NULL,
            taker_buy_quote DOUBLE PRECISION NOT NULL,
            is_final BOOLEAN NOT NULL,
            PRIMARY KEY (symbol, open_time)
        )",
        table = tf.table_name()
    )
}

impl BarStore for PostgresStore {
    fn upsert(&self, bars: &[Bar]) -> Result<(), StoreError> {
        let Some(tf) = single_timeframe(bars) else {
            return Ok(());
        };
        let table = tf.table_name();
        let mut conn = self.pool.get()?;
        let mut tx = conn.transaction()?;
        {
            let sql = format!(
                "INSERT INTO {table} ({COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
                 ON CONFLICT (symbol, open_time) DO UPDATE SET
                   open=excluded.open, high=excluded.high, low=excluded.low, close=excluded.close,
                   volume=excluded.volume, close_time=excluded.close_time,
                   quote_volume=excluded.quote_volume, trades=excluded.trades,
                   taker_buy_base=excluded.taker_buy_base, taker_buy_quote=excluded.taker_buy_quote,
                   is_final=excluded.is_final"
            );
            let stmt = tx.prepare(&sql)?;
            for b in bars {
                tx.execute(
                    &stmt,
                    &[
                        &b.symbol,
                        &b.open_time,
                        &b.open,
                        &b.high,
                        &b.low,
                        &b.close,
                        &b.volume,
                        &b.close_time,
                        &b.quote_volume,
                        &b.trades,
                        &b.taker_buy_base,
                        &b.taker_buy_quote,
                        &b.is_final,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query(&self, symbol: &str, timeframe: Timeframe, params: &QueryParams) -> Result<Vec<Bar>, StoreError> {
        let table = timeframe.table_name();
        let start = params.start_ms.unwrap_or(i64::MIN);
        let end = params.end_ms.unwrap_or(i64::MAX);
        if start > end {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {table}
             WHERE symbol = $1 AND open_time BETWEEN $2 AND $3 {final_clause}
             ORDER BY open_time DESC LIMIT $4",
            final_clause = if params.only_final { "AND is_final = true" } else { "" }
        );
        let rows = conn.query(&sql, &[&symbol, &start, &end, &params.limit])?;
        let mut out: Vec<Bar> = rows
            .iter()
            .map(|row| Bar {
                symbol: row.get(0),
                open_time: row.get(1),
                open: row.get(2),
                high: row.get(3),
                low: row.get(4),
                close: row.get(5),
                volume: row.get(6),
                close_time: row.get(7),
                quote_volume: row.get(8),
                trades: row.get(9),
                taker_buy_base: row.get(10),
                taker_buy_quote: row.get(11),
                is_final: row.get(12),
                interval: timeframe,
            })
            .collect();
        out.reverse();
        Ok(out)
    }

    fn max_open_time(&self, timeframe: Timeframe, symbol: Option<&str>) -> Result<Option<i64>, StoreError> {
        boundary(&self.pool, timeframe, "MAX", symbol)
    }

    fn min_open_time(&self, timeframe: Timeframe, symbol: Option<&str>) -> Result<Option<i64>, StoreError> {
        boundary(&self.pool, timeframe, "MIN", symbol)
    }
}

fn boundary(
    pool: &r2d2::Pool<PostgresConnectionManager<NoTls>>,
    timeframe: Timeframe,
    agg: &str,
    symbol: Option<&str>,
) -> Result<Option<i64>, StoreError> {
    let mut conn = pool.get()?;
    match symbol {
        Some(sym) => {
            let sql = format!("SELECT {agg}(open_time) FROM {} WHERE symbol = $1", timeframe.table_name());
            let row = conn.query_one(&sql, &[&sym])?;
            Ok(row.get(0))
        }
        None => {
            let sql = format!("SELECT {agg}(open_time) FROM {}", timeframe.table_name());
            let row = conn.query_one(&sql, &[])?;
            Ok(row.get(0))
        }
    }
}
