//! The fixed set of candlestick timeframes this node understands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the seven timeframes this node stores. `M1` is fetched from the
/// upstream exchange directly; the rest are aggregated from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Every supported timeframe, base first.
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// All aggregated (non-base) timeframes, in the fixed order `aggregate_all`
    /// processes them.
    pub const AGGREGATE_TARGETS: [Timeframe; 6] = [
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Whether this timeframe is fetched directly from upstream rather than
    /// derived by aggregation. Only `M1` is unconditionally direct; `H4` can
    /// optionally be pulled directly too (see `Settings::backfill_pull_4h`).
    pub const fn is_base(self) -> bool {
        matches!(self, Timeframe::M1)
    }

    /// Bucket width in milliseconds.
    pub const fn duration_ms(self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M3 => 180_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
            Timeframe::D1 => 86_400_000,
        }
    }

    /// The wire string used both for the upstream request's `interval`
    /// parameter and this node's own read API.
    pub const fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// The SQL table name a `BarStore` backend uses for this timeframe.
    pub const fn table_name(self) -> &'static str {
        match self {
            Timeframe::M1 => "kline_1m",
            Timeframe::M3 => "kline_3m",
            Timeframe::M5 => "kline_5m",
            Timeframe::M15 => "kline_15m",
            Timeframe::H1 => "kline_1h",
            Timeframe::H4 => "kline_4h",
            Timeframe::D1 => "kline_1d",
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        Some(match s {
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "1h" => Timeframe::H1,
            "4h" => Timeframe::H4,
            "1d" => Timeframe::D1,
            _ => return None,
        })
    }

    /// `(ts_ms / duration_ms) * duration_ms` — the start of the bucket `ts_ms`
    /// falls into. Deterministic and pure.
    pub const fn bucket_start(self, ts_ms: i64) -> i64 {
        let d = self.duration_ms();
        (ts_ms / d) * d
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_wire_string() {
        for tf in [
            Timeframe::M1,
            Timeframe::M3,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ] {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
    }

    #[test]
    fn rejects_unknown_intervals() {
        assert_eq!(Timeframe::parse("2h"), None);
        assert_eq!(Timeframe::parse(""), None);
    }

    #[test]
    fn bucket_start_aligns_to_the_duration_grid() {
        assert_eq!(Timeframe::M1.bucket_start(61_000), 60_000);
        assert_eq!(Timeframe::H1.bucket_start(3_600_000 + 1), 3_600_000);
        assert_eq!(Timeframe::D1.bucket_start(0), 0);
    }
}
