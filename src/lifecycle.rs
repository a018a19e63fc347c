//! Composition root and the two supervised periodic loops: ~55s incremental
//! fetch, ~60s aggregation.
//!
//! Grounded on the Python `app/lifecycle.py` (`loop_fetch`/`loop_agg`
//! retry-counter/backoff, `start_loop` restart-after-crash wrapper) and
//! `app/bootstrap.py`'s `AppState` composition root. The teacher has no
//! long-running supervised loop of its own — its backfill loop lives in a
//! synchronous CLI flow — so the supervisor shape is new, built from the
//! same `tokio::spawn`/`tokio::select!` primitives the teacher already
//! depends on.

use crate::aggregator::Aggregator;
use crate::cache::ResponseCache;
use crate::config::Settings;
use crate::fetcher::Fetcher;
use crate::ring::RecentBucketRing;
use crate::store::{self, BarStore};
use crate::upstream::UpstreamClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const FETCH_PERIOD: Duration = Duration::from_secs(55);
const AGGREGATE_PERIOD: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SEC: u64 = 60;
const MAX_CONSECUTIVE_FAILURES: u32 = 6;
const RESTART_DELAY: Duration = Duration::from_secs(5);
const SYMBOL_CONCURRENCY: usize = 5;

/// Cooperative cancellation signal shared by every spawned loop. A thin,
/// `Clone`-able stand-in for a single-purpose cancellation token — the
/// teacher's dependency stack has no such primitive of its own.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Shutdown { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called; resolves immediately if it
    /// already has been.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the HTTP binary and the ingestion binary both need, built once
/// at startup and threaded through as a plain value — no process-wide
/// singletons, per §9.
pub struct AppState {
    pub store: Arc<dyn BarStore>,
    pub cache: Arc<ResponseCache>,
    pub ring: Arc<RecentBucketRing>,
    pub settings: Settings,
}

impl AppState {
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        let store = store::connect(&settings.db_url, settings.db_pool_size)?;
        let cache = match &settings.cache_url {
            Some(url) => Arc::new(ResponseCache::redis(url)?),
            None => Arc::new(ResponseCache::in_memory()),
        };
        let ring = Arc::new(RecentBucketRing::in_memory());
        Ok(AppState { store, cache, ring, settings })
    }

    fn fetcher(&self) -> Fetcher {
        let client = Arc::new(UpstreamClient::new(self.settings.binance_base.clone(), self.settings.fetch_concurrency, self.settings.request_timeout_sec));
        Fetcher::new(
            Arc::clone(&self.store),
            client,
            self.settings.fetch_concurrency,
            self.settings.init_backfill_days,
            self.settings.backfill_pull_4h,
            self.settings.init_pull_1m,
            self.settings.init_pull_4h,
        )
    }

    fn aggregator(&self) -> Aggregator {
        Aggregator::new(Arc::clone(&self.store), Arc::clone(&self.ring))
    }
}

/// Runs `initial_fetch_all` (if enabled) then `aggregate_all` for every
/// symbol under a bounded symbol-level concurrency, to completion.
pub async fn startup(state: &AppState) -> anyhow::Result<()> {
    if state.settings.enable_fetcher {
        let fetcher = state.fetcher();
        let results = fetcher.initial_fetch_all(&state.settings.symbols).await;
        for (symbol, result) in results {
            if let Err(e) = result {
                tracing::error!(symbol, error = %e, "initial fetch failed");
            }
        }
    }

    if state.settings.enable_aggregator {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(SYMBOL_CONCURRENCY));
        let aggregator = Arc::new(state.aggregator());
        let tasks = state.settings.symbols.iter().cloned().map(|symbol| {
            let semaphore = Arc::clone(&semaphore);
            let aggregator = Arc::clone(&aggregator);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                if let Err(e) = aggregator.aggregate_all(&symbol).await {
                    tracing::error!(symbol, error = %e, "startup aggregation failed");
                }
            }
        });
        futures_util::future::join_all(tasks).await;
    }

    Ok(())
}

/// Launches the fetch and aggregate loops, each under its own supervisor,
/// returning their join handles so the caller can await cooperative shutdown.
pub fn spawn_loops(state: Arc<AppState>, shutdown: Shutdown) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if state.settings.enable_fetcher {
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(supervise("fetch", shutdown, move || {
            let state = Arc::clone(&state);
            async move {
                let fetcher = state.fetcher();
                let results = fetcher.incremental_fetch_all(&state.settings.symbols).await;
                for (symbol, result) in results {
                    result.map_err(|e| anyhow::anyhow!("{symbol}: {e}"))?;
                }
                Ok(())
            }
        })));
    }

    if state.settings.enable_aggregator {
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(supervise("aggregate", shutdown, move || {
            let state = Arc::clone(&state);
            async move {
                let aggregator = state.aggregator();
                for symbol in &state.settings.symbols {
                    aggregator.aggregate_all(symbol).await.map_err(|e| anyhow::anyhow!("{symbol}: {e}"))?;
                }
                Ok(())
            }
        })));
    }

    handles
}

/// Wraps one periodic loop body: run it, sleep the period, and on error
/// back off exponentially (capped at 60s) escalating after 6 consecutive
/// failures, at which point the supervisor waits 5s and restarts the loop
/// from scratch.
async fn supervise<F, Fut>(name: &'static str, shutdown: Shutdown, body: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        match run_loop(name, &shutdown, &body).await {
            LoopExit::Shutdown => return,
            LoopExit::Escalated => {
                tracing::error!(loop_name = name, "loop escalated after repeated failures, restarting in {RESTART_DELAY:?}");
                tokio::select! {
                    _ = tokio::time::sleep(RESTART_DELAY) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
}

enum LoopExit {
    Shutdown,
    Escalated,
}

async fn run_loop<F, Fut>(name: &'static str, shutdown: &Shutdown, body: &F) -> LoopExit
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let period = if name == "fetch" { FETCH_PERIOD } else { AGGREGATE_PERIOD };
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return LoopExit::Shutdown,
            result = body() => {
                match result {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        tracing::warn!(loop_name = name, error = %e, consecutive_failures, "loop iteration failed");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            return LoopExit::Escalated;
                        }
                        let backoff = Duration::from_secs(2u64.saturating_pow(consecutive_failures).min(MAX_BACKOFF_SEC));
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown.cancelled() => return LoopExit::Shutdown,
                        }
                        continue;
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.cancelled() => return LoopExit::Shutdown,
        }
    }
}
