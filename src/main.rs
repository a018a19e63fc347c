//! Ingestion node: runs the startup backfill/aggregate pass, then the
//! supervised fetch and aggregate loops until shutdown.
//!
//! Grounded on the teacher's `main.rs` CLI entry point, replacing its
//! one-shot synchronous backfill flow with the supervised long-lived loops
//! `app/lifecycle.py` describes; `clap` stays the teacher's CLI surface for
//! the one flag this binary needs beyond its environment configuration.

use clap::Parser;
use mtf_kline_node::config::Settings;
use mtf_kline_node::lifecycle::{self, AppState, Shutdown};
use std::sync::Arc;

/// Multi-timeframe candlestick ingestion node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run the startup backfill/aggregate pass and exit without launching
    /// the periodic loops.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let settings = Settings::from_env()?;
    let state = Arc::new(AppState::build(settings)?);

    tracing::info!(symbols = ?state.settings.symbols, "starting ingestion node");
    lifecycle::startup(&state).await?;

    if args.once {
        tracing::info!("startup pass complete, exiting (--once)");
        return Ok(());
    }

    let shutdown = Shutdown::new();
    let handles = lifecycle::spawn_loops(Arc::clone(&state), shutdown.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, cancelling loops");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    state.store.close()?;
    tracing::info!("shutdown complete");
    Ok(())
}
