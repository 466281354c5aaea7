//! Batch runner: owns the single [`SessionController`] and turns a ticker list
//! into a recorded scrape run.
//!
//! At most one run is active at a time. Each run executes on its own task, so
//! a caller that stops waiting does not stop the run; [`BatchRunner::shutdown`]
//! is the only way to end one early besides cancellation. Each successful
//! result is persisted as soon as its ticker resolves, and the controller is
//! closed after every run, whatever the outcome.

use crate::domain::{ExtractionResult, MetricRow, RunKind, RunStatus, TickerSymbol};
use crate::error::ScrapeError;
use crate::live::session::{CancelToken, SessionController};
use crate::storage::CagrStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const INTERRUPTED: &str = "run interrupted before completion";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a scrape run is already in progress")]
    Busy,
    #[error("run interrupted before completion")]
    Interrupted,
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
}

/// Live counters of the active run.
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub run_id: String,
    pub kind: RunKind,
    pub row: MetricRow,
    pub requested: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: String,
    pub kind: RunKind,
    pub status: RunStatus,
    pub requested: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub saved: usize,
    pub results: Vec<ExtractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatus {
    pub running: bool,
    pub active: Option<RunProgress>,
    pub last: Option<BatchSummary>,
}

#[derive(Default)]
struct RunnerState {
    active: Option<RunProgress>,
    last: Option<BatchSummary>,
    task: Option<JoinHandle<()>>,
}

type Reply = oneshot::Sender<Result<BatchSummary, RunError>>;

/// Single-flight front end to the session controller.
pub struct BatchRunner {
    controller: Arc<AsyncMutex<SessionController>>,
    store: Arc<CagrStore>,
    cancel: CancelToken,
    state: Mutex<RunnerState>,
}

impl BatchRunner {
    pub fn new(controller: SessionController, store: Arc<CagrStore>) -> Self {
        Self {
            controller: Arc::new(AsyncMutex::new(controller)),
            store,
            cancel: CancelToken::new(),
            state: Mutex::new(RunnerState::default()),
        }
    }

    pub fn store(&self) -> &Arc<CagrStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().active.is_some()
    }

    pub fn status(&self) -> RunnerStatus {
        let state = self.lock_state();
        RunnerStatus {
            running: state.active.is_some(),
            active: state.active.clone(),
            last: state.last.clone(),
        }
    }

    /// Ask the active run to stop after its in-flight ticker. `false` when idle.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        info!("cancellation requested");
        self.cancel.cancel();
        true
    }

    /// Run a batch and wait for its summary.
    pub async fn run(
        self: &Arc<Self>,
        tickers: Vec<TickerSymbol>,
        row: MetricRow,
        kind: RunKind,
        save: bool,
    ) -> Result<BatchSummary, RunError> {
        self.run_observed(tickers, row, kind, save, |_, _| {}).await
    }

    /// Like [`BatchRunner::run`], also reporting each result to `observer`.
    /// Dropping the returned future leaves the run going in the background.
    pub async fn run_observed<F>(
        self: &Arc<Self>,
        tickers: Vec<TickerSymbol>,
        row: MetricRow,
        kind: RunKind,
        save: bool,
        observer: F,
    ) -> Result<BatchSummary, RunError>
    where
        F: FnMut(usize, &ExtractionResult) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.launch(tickers, row, kind, save, observer, Some(tx))?;
        rx.await.unwrap_or(Err(RunError::Interrupted))
    }

    /// Start a batch in the background and return its run id immediately.
    /// The run is already active (and cancellable) when this returns.
    pub fn start(
        self: &Arc<Self>,
        tickers: Vec<TickerSymbol>,
        row: MetricRow,
        kind: RunKind,
    ) -> Result<String, RunError> {
        self.launch(tickers, row, kind, true, |_, _| {}, None)
    }

    /// Stop the active run, if any: cancel it, give it `grace` to finish its
    /// in-flight ticker, then abort it. The session is closed either way.
    pub async fn shutdown(&self, grace: Duration) {
        let Some(mut task) = self.lock_state().task.take() else {
            return;
        };
        self.cancel();
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "scrape run did not stop in time; aborting");
            task.abort();
            let _ = task.await;
        }
        // An aborted run never reached its own close.
        self.controller.lock().await.close().await;
    }

    fn launch<F>(
        self: &Arc<Self>,
        tickers: Vec<TickerSymbol>,
        row: MetricRow,
        kind: RunKind,
        save: bool,
        observer: F,
        reply: Option<Reply>,
    ) -> Result<String, RunError>
    where
        F: FnMut(usize, &ExtractionResult) + Send + 'static,
    {
        let controller = self.acquire()?;
        let run_id = uuid::Uuid::new_v4().to_string();
        self.begin(&run_id, kind, row, tickers.len());

        let guard = RunGuard {
            runner: Arc::clone(self),
            run_id: run_id.clone(),
            done: false,
        };
        let runner = Arc::clone(self);
        let id = run_id.clone();
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let outcome = runner
                .execute(controller, id, tickers, row, kind, save, observer)
                .await;
            guard.done = true;
            match reply {
                Some(reply) => {
                    let _ = reply.send(outcome);
                }
                None => {
                    if let Err(e) = outcome {
                        error!("background scrape run failed: {e}");
                    }
                }
            }
        });
        self.lock_state().task = Some(task);
        Ok(run_id)
    }

    fn acquire(&self) -> Result<OwnedMutexGuard<SessionController>, RunError> {
        Arc::clone(&self.controller)
            .try_lock_owned()
            .map_err(|_| RunError::Busy)
    }

    /// Hold the controller so every run attempt reports `Busy`.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> OwnedMutexGuard<SessionController> {
        self.acquire().expect("runner is idle")
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, run_id: &str, kind: RunKind, row: MetricRow, requested: usize) {
        self.cancel.reset();
        if let Err(e) = self.store.begin_run(run_id, kind, requested) {
            warn!(run_id = %run_id, "could not record run start: {e:#}");
        }
        self.lock_state().active = Some(RunProgress {
            run_id: run_id.to_string(),
            kind,
            row,
            requested,
            completed: 0,
            succeeded: 0,
            failed: 0,
            started_at: Utc::now(),
        });
        info!(run_id = %run_id, %kind, %row, tickers = requested, "scrape run started");
    }

    /// Bookkeeping for a run whose task ended without finishing.
    fn abandon(&self, run_id: &str) {
        let progress = {
            let mut state = self.lock_state();
            match &state.active {
                Some(p) if p.run_id == run_id => state.active.take(),
                _ => None,
            }
        };
        let (succeeded, failed) = progress.map(|p| (p.succeeded, p.failed)).unwrap_or_default();
        warn!(run_id = %run_id, succeeded, failed, "scrape run interrupted before completion");
        if let Err(e) =
            self.store
                .finish_run(run_id, succeeded, failed, RunStatus::Cancelled, Some(INTERRUPTED))
        {
            warn!(run_id = %run_id, "could not record run end: {e:#}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute<F>(
        &self,
        mut controller: OwnedMutexGuard<SessionController>,
        run_id: String,
        tickers: Vec<TickerSymbol>,
        row: MetricRow,
        kind: RunKind,
        save: bool,
        mut observer: F,
    ) -> Result<BatchSummary, RunError>
    where
        F: FnMut(usize, &ExtractionResult) + Send,
    {
        let store = &self.store;
        let mut saved = 0;
        let outcome = controller
            .run_batch_with(&tickers, row, &self.cancel, |i, result| {
                if save {
                    match store.save(result) {
                        Ok(true) => saved += 1,
                        Ok(false) => {}
                        Err(e) => warn!(ticker = %result.ticker(), "failed to save: {e:#}"),
                    }
                }
                if let Some(progress) = self.lock_state().active.as_mut() {
                    progress.completed += 1;
                    if result.succeeded() {
                        progress.succeeded += 1;
                    } else {
                        progress.failed += 1;
                    }
                }
                observer(i, result);
            })
            .await;
        controller.close().await;

        let (status, results, error) = match outcome {
            Ok(results) if results.len() < tickers.len() => (RunStatus::Cancelled, results, None),
            Ok(results) => (RunStatus::Completed, results, None),
            Err(e) => (RunStatus::Failed, Vec::new(), Some(e)),
        };

        let progress = self.lock_state().active.take();
        let (successful_count, failed_count) = match &error {
            None => {
                let ok = results.iter().filter(|r| r.succeeded()).count();
                (ok, results.len() - ok)
            }
            Some(_) => progress.map(|p| (p.succeeded, p.failed)).unwrap_or_default(),
        };
        let message = error.as_ref().map(ToString::to_string);
        if let Err(e) = self.store.finish_run(
            &run_id,
            successful_count,
            failed_count,
            status,
            message.as_deref(),
        ) {
            warn!(run_id = %run_id, "could not record run end: {e:#}");
        }

        let summary = BatchSummary {
            run_id,
            kind,
            status,
            requested: tickers.len(),
            successful_count,
            failed_count,
            saved,
            results,
            error: message,
        };
        info!(
            run_id = %summary.run_id,
            status = status.as_str(),
            succeeded = successful_count,
            failed = failed_count,
            "scrape run finished"
        );
        self.lock_state().last = Some(summary.clone());

        match error {
            Some(e) => Err(e.into()),
            None => Ok(summary),
        }
    }
}

/// Records an interrupted run when its task is dropped before `execute` returns.
struct RunGuard {
    runner: Arc<BatchRunner>,
    run_id: String,
    done: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.done {
            self.runner.abandon(&self.run_id);
        }
    }
}
