//! Session controller: drives one long-lived browser session through a batch
//! of tickers.
//!
//! Per ticker: navigate, scroll to trigger lazy content, wait for the view
//! toggle, click it, wait for the year headers, then hand the page to the
//! [`Extractor`]. Transient step failures are retried in place on the same
//! session. A session-level failure replaces the session and replays the
//! ticker's steps from navigation, since a fresh session has no page state.
//! Both kinds of failure draw on one per-ticker budget of
//! `retry.max_attempts` tries.

use crate::config::{Config, SiteConfig};
use crate::domain::{ExtractionResult, MetricRow, TickerSymbol, YearValues};
use crate::error::ScrapeError;
use crate::extraction::extractor::{finish, map_cells};
use crate::extraction::{Extractor, PageCells};
use crate::live::retry::RetryPolicy;
use crate::pool::pacer::Pacer;
use crate::pool::resource_governor::ResourceGovernor;
use crate::renderer::{wait_for_element, RenderContext, Renderer};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the current ticker attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Navigating,
    AwaitingContent,
    TogglingView,
    Extracting,
    Done,
    Failed,
}

/// Cooperative stop request, checked between tickers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Timing and markup knobs for the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub site: SiteConfig,
    pub retry: RetryPolicy,
    pub scroll_pixels: i64,
    pub element_timeout: Duration,
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
    pub inter_ticker_delay: Duration,
    pub reclaim_every: usize,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.scraping;
        Self {
            site: config.site.clone(),
            retry: s.retry_policy(),
            scroll_pixels: s.scroll_pixels,
            element_timeout: s.element_timeout(),
            navigation_timeout: s.navigation_timeout(),
            settle_delay: s.settle_delay(),
            inter_ticker_delay: s.inter_ticker_delay(),
            reclaim_every: s.reclaim_every,
        }
    }
}

/// Sequential scraper over a single reusable browser session.
pub struct SessionController {
    renderer: Arc<dyn Renderer>,
    context: Option<Box<dyn RenderContext>>,
    settings: ControllerSettings,
    extractor: Extractor,
    pacer: Pacer,
    governor: ResourceGovernor,
    state: AttemptState,
    sessions_started: u64,
    /// Failed tries charged to the current ticker.
    failures: u32,
}

impl SessionController {
    pub fn new(renderer: Arc<dyn Renderer>, settings: ControllerSettings) -> Self {
        Self {
            renderer,
            context: None,
            extractor: Extractor::new(&settings.site),
            pacer: Pacer::new(settings.inter_ticker_delay),
            governor: ResourceGovernor::new(settings.reclaim_every),
            settings,
            state: AttemptState::Idle,
            sessions_started: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Whether a browser session is currently open.
    pub fn is_live(&self) -> bool {
        self.context.is_some()
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Scrape `tickers` in order. See [`SessionController::run_batch_with`].
    pub async fn run_batch(
        &mut self,
        tickers: &[TickerSymbol],
        row: MetricRow,
    ) -> Result<Vec<ExtractionResult>, ScrapeError> {
        self.run_batch_with(tickers, row, &CancelToken::new(), |_, _| {})
            .await
    }

    /// Scrape `tickers` strictly in input order on one session, calling
    /// `on_result` as soon as each ticker is resolved.
    ///
    /// Per-ticker failures become failed results and never stop the batch.
    /// Only [`ScrapeError::BrowserUnavailable`] aborts; the controller stays
    /// usable for the next call. A cancelled batch returns the results
    /// gathered so far.
    pub async fn run_batch_with<F>(
        &mut self,
        tickers: &[TickerSymbol],
        row: MetricRow,
        cancel: &CancelToken,
        mut on_result: F,
    ) -> Result<Vec<ExtractionResult>, ScrapeError>
    where
        F: FnMut(usize, &ExtractionResult) + Send,
    {
        self.pacer.reset();
        let mut results = Vec::with_capacity(tickers.len());

        for (i, ticker) in tickers.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("batch cancelled after {i} of {} tickers", tickers.len());
                break;
            }
            self.pacer.wait_turn().await;
            info!(%ticker, "scraping {}/{}", i + 1, tickers.len());

            let result = self.scrape_ticker(ticker, row).await?;
            on_result(i, &result);
            results.push(result);

            if self.governor.record_processed() {
                self.reclaim().await;
            }
        }

        let ok = results.iter().filter(|r| r.succeeded()).count();
        info!(
            succeeded = ok,
            failed = results.len() - ok,
            "batch finished"
        );
        Ok(results)
    }

    /// Scrape one ticker. `Err` only when no browser session can be started.
    pub async fn scrape_ticker(
        &mut self,
        ticker: &TickerSymbol,
        row: MetricRow,
    ) -> Result<ExtractionResult, ScrapeError> {
        let started = Instant::now();
        self.state = AttemptState::Idle;

        match self.attempt_ticker(ticker, row).await {
            Ok(values) => {
                self.state = AttemptState::Done;
                Ok(finish(ticker, Ok(values), started))
            }
            Err(e @ ScrapeError::BrowserUnavailable { .. }) => {
                self.state = AttemptState::Failed;
                Err(e)
            }
            Err(e) => {
                self.state = AttemptState::Failed;
                if e.is_session_level() {
                    self.discard_session().await;
                }
                Ok(finish(ticker, Err(e), started))
            }
        }
    }

    /// Tear down the browser session if one is open. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = context.close().await {
                warn!("error closing browser session: {e}");
            }
        }
        self.state = AttemptState::Idle;
    }

    async fn attempt_ticker(
        &mut self,
        ticker: &TickerSymbol,
        row: MetricRow,
    ) -> Result<YearValues, ScrapeError> {
        let url = self.settings.site.page_url(ticker);
        self.failures = 0;

        loop {
            match self.drive_page(ticker, &url).await {
                // Mapping failures mean the layout changed; re-reading won't help.
                Ok(cells) => return map_cells(&cells, row),
                Err(e) if e.is_session_level() => {
                    let Some(delay) = self.spend_attempt() else {
                        debug!(%ticker, "giving up after {} attempts", self.failures);
                        return Err(e);
                    };
                    warn!(
                        %ticker,
                        attempt = self.failures,
                        "session failed: {e}; recreating in {delay:?}"
                    );
                    self.discard_session().await;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Navigate → await content → toggle view → read cells.
    async fn drive_page(
        &mut self,
        ticker: &TickerSymbol,
        url: &str,
    ) -> Result<PageCells, ScrapeError> {
        let settings = self.settings.clone();
        let wait = settings.element_timeout;

        self.state = AttemptState::Navigating;
        let target = url.to_string();
        let nav_timeout = settings.navigation_timeout;
        self.retrying("navigate", ticker, move |ctx| {
            let target = target.clone();
            Box::pin(async move { ctx.navigate(&target, nav_timeout).await })
        })
        .await?;

        self.state = AttemptState::AwaitingContent;
        let toggle = settings.site.toggle_selector.clone();
        let scroll = settings.scroll_pixels;
        self.retrying("await content", ticker, move |ctx| {
            let toggle = toggle.clone();
            Box::pin(async move {
                ctx.scroll_by(scroll).await?;
                wait_for_element(ctx, &toggle, wait).await.map(|_| ())
            })
        })
        .await?;

        self.state = AttemptState::TogglingView;
        let toggle = settings.site.toggle_selector.clone();
        let years = settings.site.year_header_selector.clone();
        let settle = settings.settle_delay;
        self.retrying("toggle view", ticker, move |ctx| {
            let toggle = toggle.clone();
            let years = years.clone();
            Box::pin(async move {
                let button = wait_for_element(ctx, &toggle, wait).await?;
                ctx.click(button).await?;
                tokio::time::sleep(settle).await;
                wait_for_element(ctx, &years, wait).await.map(|_| ())
            })
        })
        .await?;

        // Page reads retry here; the pure mapping half of the extractor runs
        // once the cells are in hand.
        self.state = AttemptState::Extracting;
        let extractor = self.extractor.clone();
        self.retrying("read values", ticker, move |ctx| {
            let extractor = extractor.clone();
            Box::pin(async move { extractor.read_cells(ctx).await })
        })
        .await
    }

    /// Run `op` on the live session, retrying transient failures with backoff
    /// while the ticker's attempt budget lasts. Session-level failures are
    /// returned immediately.
    async fn retrying<T, F>(
        &mut self,
        step: &'static str,
        ticker: &TickerSymbol,
        op: F,
    ) -> Result<T, ScrapeError>
    where
        F: for<'c> Fn(&'c mut dyn RenderContext) -> BoxFuture<'c, Result<T, ScrapeError>>,
    {
        loop {
            let context = self.live_context().await?;
            match op(context).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_session_level() => return Err(e),
                Err(e) => {
                    let Some(delay) = self.spend_attempt() else {
                        debug!(%ticker, step, "giving up after {} attempts", self.failures);
                        return Err(e);
                    };
                    let attempt = self.failures;
                    warn!(%ticker, step, attempt, "step failed: {e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Charge one failed try to the current ticker. Returns the backoff before
    /// the next try, or `None` once the budget is spent.
    fn spend_attempt(&mut self) -> Option<Duration> {
        let policy = self.settings.retry;
        self.failures += 1;
        (self.failures < policy.max_attempts).then(|| policy.delay_for_attempt(self.failures - 1))
    }

    async fn live_context(&mut self) -> Result<&mut (dyn RenderContext + 'static), ScrapeError> {
        if self.context.is_none() {
            let context = self.start_session().await?;
            self.context = Some(context);
        }
        self.context
            .as_deref_mut()
            .ok_or_else(|| ScrapeError::SessionUnusable("no browser session".into()))
    }

    async fn start_session(&mut self) -> Result<Box<dyn RenderContext>, ScrapeError> {
        let policy = self.settings.retry;
        let mut reason = String::new();
        for attempt in 0..policy.max_attempts {
            match self.renderer.new_context().await {
                Ok(context) => {
                    self.sessions_started += 1;
                    debug!(session = self.sessions_started, "browser session ready");
                    return Ok(context);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, "failed to start browser session: {e}");
                    reason = e.to_string();
                    if attempt + 1 < policy.max_attempts {
                        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }
        Err(ScrapeError::BrowserUnavailable {
            attempts: policy.max_attempts,
            reason,
        })
    }

    async fn discard_session(&mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = context.close().await {
                debug!("closing broken session: {e}");
            }
        }
    }

    async fn reclaim(&mut self) {
        let Some(context) = self.context.as_deref_mut() else {
            return;
        };
        info!(
            processed = self.governor.processed(),
            "running memory reclamation pass"
        );
        if let Err(e) = context.reclaim().await {
            warn!("reclamation failed: {e}");
            if e.is_session_level() {
                self.discard_session().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::{Op, PageScript, ScriptedRenderer};

    const NINE: [&str; 9] = ["1%", "2%", "3%", "4%", "5%", "6%", "7%", "8%", "9%"];

    fn settings() -> ControllerSettings {
        ControllerSettings {
            site: PageScript::site(),
            retry: RetryPolicy::new(3, Duration::ZERO).without_jitter(),
            scroll_pixels: 500,
            element_timeout: Duration::from_millis(20),
            navigation_timeout: Duration::from_secs(1),
            settle_delay: Duration::ZERO,
            inter_ticker_delay: Duration::ZERO,
            reclaim_every: 50,
        }
    }

    fn tickers(symbols: &[&str]) -> Vec<TickerSymbol> {
        symbols
            .iter()
            .map(|s| TickerSymbol::parse(s).unwrap())
            .collect()
    }

    fn renderer_with(symbols: &[&str]) -> ScriptedRenderer {
        let renderer = ScriptedRenderer::new();
        for s in symbols {
            renderer.set_page(
                &format!("https://x/{s}"),
                PageScript::cagr(&["2021", "2022", "2023"], &NINE),
            );
        }
        renderer
    }

    fn controller(renderer: &ScriptedRenderer, settings: ControllerSettings) -> SessionController {
        SessionController::new(Arc::new(renderer.clone()), settings)
    }

    #[tokio::test]
    async fn test_single_ticker_avg_row() {
        let renderer = renderer_with(&["MELI"]);
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["MELI"]), MetricRow::Avg).await.unwrap();
        ctl.close().await;

        assert_eq!(results.len(), 1);
        assert!(results[0].succeeded());
        let values: Vec<&str> = results[0].values().values().map(String::as_str).collect();
        assert_eq!(values, vec!["4%", "5%", "6%"]);
        assert_eq!(ctl.state(), AttemptState::Idle);
    }

    #[tokio::test]
    async fn test_order_preserved_when_middle_ticker_fails() {
        let renderer = renderer_with(&["A", "C"]);
        renderer.set_page(
            "https://x/B",
            PageScript::cagr(&["2021"], &["1%"]).without_toggle(),
        );
        let mut ctl = controller(&renderer, settings());

        let results = ctl
            .run_batch(&tickers(&["A", "B", "C"]), MetricRow::Avg)
            .await
            .unwrap();

        let order: Vec<&str> = results.iter().map(|r| r.ticker().as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        let ok: Vec<bool> = results.iter().map(|r| r.succeeded()).collect();
        assert_eq!(ok, vec![true, false, true]);
        assert!(results[1].values().is_empty());
        assert!(results[1].error().unwrap().contains("button[value='cagr']"));
    }

    #[tokio::test]
    async fn test_one_session_for_whole_batch() {
        let renderer = renderer_with(&["A", "B", "C"]);
        let mut ctl = controller(&renderer, settings());

        ctl.run_batch(&tickers(&["A", "B", "C"]), MetricRow::Low)
            .await
            .unwrap();

        assert_eq!(renderer.contexts_created(), 1);
        assert_eq!(renderer.navigations().len(), 3);
        assert!(ctl.is_live());
        ctl.close().await;
        assert_eq!(renderer.contexts_closed(), 1);
    }

    #[tokio::test]
    async fn test_session_failure_recreates_session() {
        let renderer = renderer_with(&["MELI"]);
        renderer.fail_next(Op::Navigate, ScrapeError::SessionUnusable("crashed".into()));
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["MELI"]), MetricRow::Avg).await.unwrap();

        assert!(results[0].succeeded());
        assert_eq!(renderer.contexts_created(), 2);
        assert_eq!(renderer.contexts_closed(), 1);
        assert_eq!(ctl.sessions_started(), 2);
    }

    #[tokio::test]
    async fn test_session_failure_mid_ticker_replays_from_navigation() {
        let renderer = renderer_with(&["MELI"]);
        renderer.fail_next(Op::Click, ScrapeError::SessionUnusable("disconnected".into()));
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["MELI"]), MetricRow::High).await.unwrap();

        assert!(results[0].succeeded());
        assert_eq!(renderer.contexts_created(), 2);
        assert_eq!(renderer.navigations(), vec!["https://x/MELI", "https://x/MELI"]);
        let values: Vec<&str> = results[0].values().values().map(String::as_str).collect();
        assert_eq!(values, vec!["7%", "8%", "9%"]);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_on_same_session() {
        let renderer = renderer_with(&["MELI"]);
        renderer.fail_next(Op::Click, ScrapeError::Interaction("intercepted".into()));
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["MELI"]), MetricRow::Avg).await.unwrap();

        assert!(results[0].succeeded());
        assert_eq!(renderer.contexts_created(), 1);
        assert_eq!(renderer.navigations().len(), 1);
    }

    #[tokio::test]
    async fn test_session_and_step_failures_share_attempt_budget() {
        let renderer = renderer_with(&["MELI"]);
        renderer.fail_next(Op::Navigate, ScrapeError::SessionUnusable("crashed".into()));
        renderer.fail_next(Op::Click, ScrapeError::Interaction("intercepted".into()));
        renderer.fail_next(Op::Click, ScrapeError::Interaction("intercepted".into()));
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["MELI"]), MetricRow::Avg).await.unwrap();

        // One replay plus two rejected clicks spend all three tries.
        assert!(!results[0].succeeded());
        assert!(results[0].error().unwrap().contains("intercepted"));
        assert_eq!(renderer.contexts_created(), 2);
        assert_eq!(renderer.navigations().len(), 1);
    }

    #[tokio::test]
    async fn test_mixed_failures_within_budget_succeed() {
        let renderer = renderer_with(&["MELI", "NVDA"]);
        renderer.fail_next(Op::Navigate, ScrapeError::SessionUnusable("crashed".into()));
        renderer.fail_next(Op::Click, ScrapeError::Interaction("intercepted".into()));
        let mut ctl = controller(&renderer, settings());

        let results = ctl
            .run_batch(&tickers(&["MELI", "NVDA"]), MetricRow::Avg)
            .await
            .unwrap();

        assert!(results[0].succeeded());
        // The budget starts over for the next ticker.
        assert!(results[1].succeeded());
    }

    #[tokio::test]
    async fn test_controller_agrees_with_one_shot_extract() {
        let renderer = ScriptedRenderer::new();
        let page = PageScript::cagr(
            &["2024", "2025", "2024", "2025"],
            &["10%", "11%", "12%", "13%", "14%", "15%", "90%", "91%"],
        );
        renderer.set_page("https://x/MELI", page.clone().ungated());
        let mut ctl = controller(&renderer, settings());
        let ticker = TickerSymbol::parse("MELI").unwrap();

        let driven = ctl.scrape_ticker(&ticker, MetricRow::High).await.unwrap();
        ctl.close().await;

        let mut ctx = renderer.new_context().await.unwrap();
        ctx.navigate("https://x/MELI", Duration::from_secs(1)).await.unwrap();
        let direct = Extractor::new(&PageScript::site())
            .extract(ctx.as_mut(), &ticker, MetricRow::High)
            .await;

        assert!(driven.succeeded() && direct.succeeded());
        assert_eq!(driven.values(), direct.values());
        assert!(driven.values().values().all(|v| v == "14%" || v == "15%"));
    }

    #[tokio::test]
    async fn test_exhausted_session_failures_fail_only_that_ticker() {
        let renderer = renderer_with(&["A", "B"]);
        for _ in 0..3 {
            renderer.fail_next(Op::Navigate, ScrapeError::SessionUnusable("gone".into()));
        }
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["A", "B"]), MetricRow::Avg).await.unwrap();

        assert!(!results[0].succeeded());
        assert!(results[1].succeeded());
        assert_eq!(renderer.contexts_created(), 4);
    }

    #[tokio::test]
    async fn test_browser_unavailable_aborts_but_controller_is_reusable() {
        let renderer = renderer_with(&["A"]);
        for _ in 0..3 {
            renderer.fail_next(Op::Launch, ScrapeError::SessionUnusable("no chrome".into()));
        }
        let mut ctl = controller(&renderer, settings());

        let err = ctl.run_batch(&tickers(&["A"]), MetricRow::Avg).await.unwrap_err();
        assert!(matches!(err, ScrapeError::BrowserUnavailable { attempts: 3, .. }));
        assert!(!ctl.is_live());

        let results = ctl.run_batch(&tickers(&["A"]), MetricRow::Avg).await.unwrap();
        assert!(results[0].succeeded());
    }

    #[tokio::test]
    async fn test_cancellation_between_tickers() {
        let renderer = renderer_with(&["A", "B", "C"]);
        let mut ctl = controller(&renderer, settings());
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        let results = ctl
            .run_batch_with(&tickers(&["A", "B", "C"]), MetricRow::Avg, &cancel, move |_, _| {
                trigger.cancel()
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ticker().as_str(), "A");
    }

    #[tokio::test]
    async fn test_callback_sees_results_in_order() {
        let renderer = renderer_with(&["A", "B", "C"]);
        let mut ctl = controller(&renderer, settings());
        let mut seen = Vec::new();

        ctl.run_batch_with(
            &tickers(&["C", "A", "B"]),
            MetricRow::Avg,
            &CancelToken::new(),
            |i, r| seen.push((i, r.ticker().to_string())),
        )
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![(0, "C".to_string()), (1, "A".to_string()), (2, "B".to_string())]
        );
    }

    #[tokio::test]
    async fn test_reclamation_every_n_tickers() {
        let symbols = ["A", "B", "C", "D", "E"];
        let renderer = renderer_with(&symbols);
        let mut ctl = controller(
            &renderer,
            ControllerSettings {
                reclaim_every: 2,
                ..settings()
            },
        );

        let results = ctl.run_batch(&tickers(&symbols), MetricRow::Avg).await.unwrap();

        assert!(results.iter().all(|r| r.succeeded()));
        assert_eq!(renderer.reclaims(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let renderer = renderer_with(&["A"]);
        let mut ctl = controller(&renderer, settings());
        ctl.close().await;
        ctl.run_batch(&tickers(&["A"]), MetricRow::Avg).await.unwrap();
        ctl.close().await;
        ctl.close().await;
        assert_eq!(renderer.contexts_closed(), 1);
        assert!(!ctl.is_live());
    }

    #[tokio::test]
    async fn test_missing_values_map_to_not_available() {
        let renderer = ScriptedRenderer::new();
        renderer.set_page("https://x/MELI", PageScript::cagr(&["2021", "2022"], &["1%", "2%"]));
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["MELI"]), MetricRow::Avg).await.unwrap();

        assert!(results[0].succeeded());
        assert!(results[0].values().values().all(|v| v == "N/A"));
    }

    #[tokio::test]
    async fn test_layout_change_degrades_to_failed_result() {
        let renderer = ScriptedRenderer::new();
        renderer.set_page("https://x/MELI", PageScript::cagr(&["FY"], &["1%"]));
        let mut ctl = controller(&renderer, settings());

        let results = ctl.run_batch(&tickers(&["MELI"]), MetricRow::Avg).await.unwrap();

        assert!(!results[0].succeeded());
        assert_eq!(ctl.state(), AttemptState::Failed);
    }
}
