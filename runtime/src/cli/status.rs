//! Summarise what is in the database: freshness, counts and the last run.

use crate::cli::output::{self, Styled};
use crate::config::Config;
use crate::storage::{Freshness, RunRecord, StoreStatistics};
use anyhow::Result;
use chrono::Utc;

pub fn run(config: &Config) -> Result<()> {
    let store = super::open_store(config)?;
    let registry = super::open_registry(config)?;

    let freshness = store.freshness()?;
    let stats = store.statistics()?;
    let last_run = store.latest_run()?;
    let tickers = registry.all()?;
    let scheduled = tickers.iter().filter(|t| t.is_scheduled).count();

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "database": config.storage.database_path().display().to_string(),
            "freshness": freshness,
            "statistics": stats,
            "last_run": last_run,
            "registry": {
                "total_tickers": tickers.len(),
                "scheduled_tickers": scheduled,
            },
        }));
        return Ok(());
    }

    let s = Styled::new();
    output::print_header(&s);

    output::print_section(&s, "Data");
    print_freshness(&s, &freshness, &stats);
    eprintln!();

    output::print_section(&s, "Registry");
    output::print_check(
        s.ok_sym(),
        "Tickers:",
        &format!("{} registered, {scheduled} scheduled", tickers.len()),
    );
    eprintln!();

    output::print_section(&s, "Last run");
    print_last_run(&s, last_run.as_ref());

    let (status, msg) = if !freshness.has_data {
        ("EMPTY", "nothing scraped yet")
    } else if freshness.is_fresh {
        ("FRESH", "data updated recently")
    } else {
        ("STALE", "data is older than the freshness window")
    };
    output::print_status(&s, status, msg);
    Ok(())
}

fn print_freshness(s: &Styled, freshness: &Freshness, stats: &StoreStatistics) {
    if !freshness.has_data {
        output::print_check(s.warn_sym(), "Stored:", "no data");
        return;
    }
    output::print_check(
        s.ok_sym(),
        "Stored:",
        &format!(
            "{} tickers, {} years, {} values",
            stats.unique_tickers, stats.unique_years, stats.total_records
        ),
    );
    let age = freshness
        .hours_since_update
        .map(|h| output::format_duration((h * 3600.0) as u64))
        .unwrap_or_else(|| "unknown".to_string());
    let sym = if freshness.is_fresh {
        s.ok_sym()
    } else {
        s.warn_sym()
    };
    output::print_check(sym, "Last update:", &format!("{age} ago"));
}

fn print_last_run(s: &Styled, run: Option<&RunRecord>) {
    let Some(run) = run else {
        output::print_check(s.warn_sym(), "Run:", "none recorded");
        return;
    };
    let age = (Utc::now() - run.started_at).num_seconds().max(0) as u64;
    let sym = if run.failed == 0 && run.error.is_none() {
        s.ok_sym()
    } else {
        s.warn_sym()
    };
    output::print_check(
        sym,
        "Run:",
        &format!(
            "{} {} {} ago, {}/{} succeeded",
            run.kind,
            run.status.as_str(),
            output::format_duration(age),
            run.succeeded,
            run.requested
        ),
    );
    if let Some(err) = &run.error {
        output::print_detail(&s.red(err));
    }
}
