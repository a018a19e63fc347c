//! The candlestick record shared by the store, aggregator and serializer.

use crate::timeframe::Timeframe;
use serde::{Deserialize, Serialize};

/// One OHLCV candlestick for a `(symbol, interval, open_time)` bucket.
///
/// `close_time` is always `open_time + interval.duration_ms() - 1` and
/// `is_final` is always `true` — this node has no notion of an in-progress,
/// still-filling bar in the stored model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub interval: Timeframe,
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub close_time: i64,
    pub trades: i64,
    pub taker_buy_base: f64,
    pub taker_buy_quote: f64,
    pub is_final: bool,
}

impl Bar {
    /// Builds a bar for a closed bucket, deriving `close_time` from
    /// `open_time` and the timeframe's duration.
    pub fn closed(
        symbol: impl Into<String>,
        interval: Timeframe,
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        quote_volume: f64,
        trades: i64,
        taker_buy_base: f64,
        taker_buy_quote: f64,
    ) -> Self {
        Bar {
            symbol: symbol.into(),
            interval,
            open_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume,
            close_time: open_time + interval.duration_ms() - 1,
            trades,
            taker_buy_base,
            taker_buy_quote,
            is_final: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_derives_close_time_from_the_duration() {
        let b = Bar::closed("BTCUSDT", Timeframe::M1, 60_000, 1.0, 2.0, 0.5, 1.5, 10.0, 15.0, 3, 1.0, 1.5);
        assert_eq!(b.close_time, 119_999);
        assert!(b.is_final);
    }
}
