//! Periodic scrape of every scheduled ticker.

use crate::config::ScrapingConfig;
use crate::domain::{MetricRow, RunKind};
use crate::live::runner::{BatchRunner, BatchSummary, RunError};
use crate::storage::TickerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub struct Scheduler {
    runner: Arc<BatchRunner>,
    registry: Arc<TickerRegistry>,
    every: Duration,
    row: MetricRow,
    run_on_startup: bool,
}

impl Scheduler {
    pub fn new(
        runner: Arc<BatchRunner>,
        registry: Arc<TickerRegistry>,
        every: Duration,
        row: MetricRow,
    ) -> Self {
        Self {
            runner,
            registry,
            // tokio's interval rejects a zero period.
            every: every.max(Duration::from_millis(1)),
            row,
            run_on_startup: false,
        }
    }

    pub fn from_config(
        config: &ScrapingConfig,
        runner: Arc<BatchRunner>,
        registry: Arc<TickerRegistry>,
    ) -> Self {
        Self::new(runner, registry, config.frequency(), config.row_type)
            .run_on_startup(config.run_on_startup)
    }

    pub fn run_on_startup(mut self, yes: bool) -> Self {
        self.run_on_startup = yes;
        self
    }

    /// Tick every `every` until `shutdown` flips to `true`. A tick that finds
    /// a run already in progress is skipped, not queued.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            every_hours = self.every.as_secs_f64() / 3600.0,
            row = %self.row,
            "scheduler started"
        );
        let mut interval = tokio::time::interval(self.every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_on_startup {
            // The first tick completes immediately.
            interval.tick().await;
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("scheduler stopped");
    }

    /// One scheduled pass over the registry's scheduled tickers.
    pub async fn tick(&self) -> Option<BatchSummary> {
        let tickers = match self.registry.scheduled() {
            Ok(tickers) => tickers,
            Err(e) => {
                warn!("could not load scheduled tickers: {e:#}");
                return None;
            }
        };
        if tickers.is_empty() {
            info!("no scheduled tickers; nothing to do");
            return None;
        }

        match self
            .runner
            .run(tickers, self.row, RunKind::Scheduled, true)
            .await
        {
            Ok(summary) => Some(summary),
            Err(RunError::Busy) => {
                info!("a scrape is already running; skipping this scheduled run");
                None
            }
            Err(e) => {
                error!("scheduled run failed: {e}");
                None
            }
        }
    }
}
