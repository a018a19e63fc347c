//! The node's configuration surface (§6).
//!
//! How these values get into the environment (a `.env` file, a secrets
//! manager, plain shell exports) is not this module's concern — it only
//! defines what the surface is and what the defaults are. Grounded on the
//! Python `app/settings.py` field names/defaults, minus the out-of-scope
//! symbol-discovery knobs (`auto_sync_symbols`, `symbol_sync_interval_sec`)
//! and the legacy millisecond-TTL alias §9 says to drop in favor of the
//! canonical seconds key.

use crate::error::ConfigError;
use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub symbols: Vec<String>,
    /// Timeframes this node's read API accepts requests for. Informational —
    /// the seven-value `Timeframe` enum is itself the authority on what's
    /// valid; this lets an operator narrow which ones a given deployment
    /// advertises/documents without changing the code.
    pub intervals: Vec<String>,
    pub quote_assets: Vec<String>,

    pub db_url: String,
    pub db_pool_size: u32,

    pub cache_url: Option<String>,
    pub cache_ttl_sec_klines: u64,

    pub binance_base: String,

    pub enable_fetcher: bool,
    pub enable_aggregator: bool,
    pub fetch_concurrency: usize,

    /// `N = init_backfill_days * 1440` 1m bars of coverage `initial_fetch`
    /// ensures. Zero means the fetcher does no historical backfill at all,
    /// only incremental polling.
    pub init_backfill_days: u32,
    /// Also ensure direct 4h coverage during backfill (`N = days * 6`).
    pub backfill_pull_4h: bool,
    /// Legacy explicit bar counts, overriding the day-based count when set.
    pub init_pull_1m: Option<i64>,
    pub init_pull_4h: Option<i64>,

    pub request_timeout_sec: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            intervals: vec!["1m", "3m", "5m", "15m", "1h", "4h", "1d"].into_iter().map(String::from).collect(),
            quote_assets: vec!["USDT".to_string()],
            db_url: "sqlite://data/klines.db".to_string(),
            db_pool_size: 10,
            cache_url: None,
            cache_ttl_sec_klines: 10,
            binance_base: "https://fapi.binance.com".to_string(),
            enable_fetcher: true,
            enable_aggregator: true,
            fetch_concurrency: 8,
            init_backfill_days: 0,
            backfill_pull_4h: false,
            init_pull_1m: None,
            init_pull_4h: None,
            request_timeout_sec: 10,
            log_level: "INFO".to_string(),
        }
    }
}

impl Settings {
    /// Reads the configuration surface from the process environment,
    /// falling back to the defaults in [`Settings::default`] for anything
    /// unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut s = Settings::default();

        if let Ok(v) = env::var("SYMBOLS") {
            s.symbols = split_csv(&v);
        }
        if let Ok(v) = env::var("INTERVALS") {
            s.intervals = split_csv(&v);
        }
        if let Ok(v) = env::var("QUOTE_ASSETS") {
            s.quote_assets = split_csv(&v);
        }
        if let Ok(v) = env::var("DB_URL") {
            s.db_url = v;
        }
        if let Ok(v) = env::var("DB_POOL_SIZE") {
            s.db_pool_size = parse_env("DB_POOL_SIZE", &v)?;
        }
        if let Ok(v) = env::var("CACHE_URL") {
            s.cache_url = Some(v);
        }
        if let Ok(v) = env::var("CACHE_TTL_SEC_KLINES") {
            s.cache_ttl_sec_klines = parse_env("CACHE_TTL_SEC_KLINES", &v)?;
        }
        if let Ok(v) = env::var("BINANCE_BASE") {
            s.binance_base = v;
        }
        if let Ok(v) = env::var("ENABLE_FETCHER") {
            s.enable_fetcher = parse_env("ENABLE_FETCHER", &v)?;
        }
        if let Ok(v) = env::var("ENABLE_AGGREGATOR") {
            s.enable_aggregator = parse_env("ENABLE_AGGREGATOR", &v)?;
        }
        if let Ok(v) = env::var("FETCH_CONCURRENCY") {
            s.fetch_concurrency = parse_env("FETCH_CONCURRENCY", &v)?;
        }
        if let Ok(v) = env::var("INIT_BACKFILL_DAYS") {
            s.init_backfill_days = parse_env("INIT_BACKFILL_DAYS", &v)?;
        }
        if let Ok(v) = env::var("BACKFILL_PULL_4H") {
            s.backfill_pull_4h = parse_env("BACKFILL_PULL_4H", &v)?;
        }
        if let Ok(v) = env::var("INIT_PULL_1M") {
            s.init_pull_1m = Some(parse_env("INIT_PULL_1M", &v)?);
        }
        if let Ok(v) = env::var("INIT_PULL_4H") {
            s.init_pull_4h = Some(parse_env("INIT_PULL_4H", &v)?);
        }
        if let Ok(v) = env::var("REQUEST_TIMEOUT_SEC") {
            s.request_timeout_sec = parse_env("REQUEST_TIMEOUT_SEC", &v)?;
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            s.log_level = v;
        }

        Ok(s)
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid { key: key.to_string(), value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let s = Settings::default();
        assert_eq!(s.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(s.init_backfill_days, 0);
        assert_eq!(s.cache_ttl_sec_klines, 10);
        assert!(s.enable_fetcher);
        assert!(s.enable_aggregator);
        assert!(!s.backfill_pull_4h);
    }

    #[test]
    fn split_csv_trims_and_drops_empties() {
        assert_eq!(split_csv("BTCUSDT, ETHUSDT,"), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn invalid_numeric_value_is_a_config_error() {
        // SAFETY: test-only, no other threads read env concurrently here.
        unsafe { env::set_var("DB_POOL_SIZE", "not-a-number") };
        let err = Settings::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        unsafe { env::remove_var("DB_POOL_SIZE") };
    }
}
