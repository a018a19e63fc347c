//! HTTP client for the upstream `/fapi/v1/klines` endpoint.
//!
//! One `reqwest::Client` is kept alive for the process lifetime for
//! connection reuse; a semaphore caps in-flight requests at
//! `fetch_concurrency`. Retry/backoff is the only retry policy in the whole
//! node — callers (the Fetcher) never retry on top of this.

use crate::error::UpstreamError;
use crate::timeframe::Timeframe;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(6);

pub struct UpstreamClient {
    http: reqwest::Client,
    base: String,
    semaphore: Arc<Semaphore>,
}

/// One raw upstream row, untouched — the client does not interpret fields;
/// `Fetcher` is the one place that parses them into a `Bar`.
pub type UpstreamRow = Value;

impl UpstreamClient {
    pub fn new(base: impl Into<String>, concurrency: usize, timeout_sec: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .expect("reqwest client builder with static config cannot fail");
        UpstreamClient {
            http,
            base: base.into(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// `GET /fapi/v1/klines`. Retries transient failures (5xx, 429, timeout,
    /// connect error) up to `MAX_ATTEMPTS` times with exponential backoff;
    /// anything else is returned immediately.
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<UpstreamRow>, UpstreamError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.one_request(symbol, timeframe, limit, start_ms, end_ms).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt < MAX_ATTEMPTS && e.is_retryable() => {
                    let backoff = (BASE_BACKOFF * 2u32.pow(attempt - 1)).min(MAX_BACKOFF);
                    let jitter_ms = rand::thread_rng().gen_range(0..100);
                    tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(UpstreamError::RetriesExhausted { attempts: attempt, source: Box::new(e) });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn one_request(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<UpstreamRow>, UpstreamError> {
        let mut req = self
            .http
            .get(format!("{}/fapi/v1/klines", self.base))
            .query(&[("symbol", symbol), ("interval", timeframe.as_str())])
            .query(&[("limit", limit)]);
        if let Some(s) = start_ms {
            req = req.query(&[("startTime", s)]);
        }
        if let Some(e) = end_ms {
            req = req.query(&[("endTime", e)]);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status: status.as_u16(), body });
        }
        let rows: Vec<UpstreamRow> = resp.json().await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_classify_retryable_correctly() {
        let rate_limited = UpstreamError::Status { status: 429, body: String::new() };
        let server_error = UpstreamError::Status { status: 503, body: String::new() };
        let bad_request = UpstreamError::Status { status: 400, body: String::new() };
        assert!(rate_limited.is_retryable());
        assert!(server_error.is_retryable());
        assert!(!bad_request.is_retryable());
    }
}
