//! One-off scrape of the given tickers from the terminal.

use crate::cli::output::{self, Styled};
use crate::config::Config;
use crate::domain::{ExtractionResult, MetricRow, RunKind};
use crate::live::BatchSummary;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Returns whether every ticker succeeded.
pub async fn run(
    config: &Config,
    raw_tickers: &[String],
    row: Option<MetricRow>,
    save: bool,
) -> Result<bool> {
    let tickers = super::parse_tickers(raw_tickers)?;
    let row = row.unwrap_or(config.scraping.row_type);
    let store = super::open_store(config)?;
    let runner = super::build_runner(config, store);

    let bar = progress_bar(tickers.len() as u64);
    let canceller = Arc::clone(&runner);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let observer_bar = bar.clone();
    let summary = runner
        .run_observed(tickers, row, RunKind::Manual, save, move |_, result| {
            observer_bar.set_message(result.ticker().to_string());
            observer_bar.inc(1);
        })
        .await;
    ctrl_c.abort();
    bar.finish_and_clear();
    let summary = summary?;

    if output::is_json() {
        output::print_json(&serde_json::to_value(&summary)?);
    } else {
        print_summary(&summary, row, save);
    }
    Ok(summary.failed_count == 0 && summary.results.len() == summary.requested)
}

fn progress_bar(len: u64) -> ProgressBar {
    if output::is_quiet() || output::is_json() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} [{bar:30}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_summary(summary: &BatchSummary, row: MetricRow, save: bool) {
    let s = Styled::new();
    output::print_section(&s, &format!("{row} CAGR estimates"));
    for result in &summary.results {
        print_result(&s, result);
    }
    let skipped = summary.requested.saturating_sub(summary.results.len());
    let mut msg = format!(
        "{} succeeded, {} failed",
        summary.successful_count, summary.failed_count
    );
    if skipped > 0 {
        msg.push_str(&format!(", {skipped} not attempted"));
    }
    if save {
        msg.push_str(&format!(", {} saved", summary.saved));
    }
    output::print_status(&s, summary.status.as_str(), &msg);
}

fn print_result(s: &Styled, result: &ExtractionResult) {
    let label = format!("{}:", result.ticker());
    if result.succeeded() {
        output::print_check(s.ok_sym(), &label, &output::format_values(result.values()));
    } else {
        let reason = result.error().unwrap_or("no values");
        output::print_check(s.fail_sym(), &label, &s.red(reason));
    }
    if output::is_verbose() {
        output::print_detail(&s.dim(&format!("{}ms", result.elapsed().as_millis())));
    }
}
