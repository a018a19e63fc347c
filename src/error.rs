//! The node's closed error taxonomy.
//!
//! `NotFound` is reserved for a request against an unconfigured symbol; an
//! empty result set from a valid query is a successful empty response, not
//! a `NotFound`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("sqlite pool error: {0}")]
    SqlitePool(#[from] r2d2::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("connection pool exhausted or unavailable")]
    PoolUnavailable,
    #[error("blocking task panicked: {0}")]
    TaskJoin(String),
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<UpstreamError>,
    },
}

impl UpstreamError {
    /// Whether this failure is transient and worth retrying: 5xx, 429, or a
    /// transport-level timeout/connection error. Any other 4xx is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport(e) => e.is_timeout() || e.is_connect(),
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::RetriesExhausted { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
}
