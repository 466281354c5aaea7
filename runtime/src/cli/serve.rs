//! Run the HTTP API and the scheduler in the foreground until Ctrl-C.

use crate::cli::output::{self, Styled};
use crate::config::Config;
use crate::live::Scheduler;
use crate::server::{self, AppState};
use crate::storage::TickerRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// How long an in-flight ticker may take to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub async fn run(config: &Config, no_scheduler: bool) -> Result<()> {
    let s = Styled::new();

    let store = super::open_store(config)?;
    let registry = super::open_registry(config)?;
    seed_registry(config, &registry)?;

    if config.api.auth_token.is_empty() {
        warn!("no api.auth_token configured (set CAGR_API_TOKEN); protected routes will reject every request");
    }

    let runner = super::build_runner(config, Arc::clone(&store));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        let _ = signal_tx.send(true);
    });

    let scheduler = if config.scraping.enabled && !no_scheduler {
        let scheduler =
            Scheduler::from_config(&config.scraping, Arc::clone(&runner), Arc::clone(&registry));
        Some(tokio::spawn(scheduler.run(shutdown_rx.clone())))
    } else {
        info!("scheduler disabled");
        None
    };

    let addr = tokio::net::lookup_host((config.api.host.as_str(), config.api.port))
        .await
        .with_context(|| format!("cannot resolve {}:{}", config.api.host, config.api.port))?
        .next()
        .with_context(|| format!("no address for {}", config.api.host))?;

    if !output::is_quiet() {
        eprintln!(
            "  {} CAGR Watch v{} serving on http://{addr}",
            s.ok_sym(),
            env!("CARGO_PKG_VERSION")
        );
    }

    let state = AppState {
        store,
        registry,
        runner: Arc::clone(&runner),
        auth_token: Arc::from(config.api.auth_token.as_str()),
        default_row: config.scraping.row_type,
    };
    let result = server::serve(addr, state, shutdown_rx).await;

    // The server may have stopped on its own; make sure the scheduler and any run follow.
    let _ = shutdown_tx.send(true);
    runner.shutdown(SHUTDOWN_GRACE).await;
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }

    if !output::is_quiet() {
        eprintln!("  {} CAGR Watch stopped.", s.ok_sym());
    }
    result
}

/// Populate an empty registry from `storage.tickers_csv`, if configured.
fn seed_registry(config: &Config, registry: &TickerRegistry) -> Result<()> {
    let Some(csv) = &config.storage.tickers_csv else {
        return Ok(());
    };
    if !registry.all()?.is_empty() {
        return Ok(());
    }
    if !csv.exists() {
        warn!("tickers file {} not found; registry stays empty", csv.display());
        return Ok(());
    }
    let imported = registry.import_csv(csv)?;
    info!(imported, path = %csv.display(), "seeded ticker registry");
    Ok(())
}
