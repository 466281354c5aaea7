//! Manage the ticker registry.

use crate::cli::output::{self, Styled};
use crate::config::Config;
use crate::domain::TickerSymbol;
use crate::storage::ticker_registry::DEFAULT_GROUP;
use crate::storage::{TickerEntry, TickerRegistry};
use anyhow::{bail, Result};
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum TickersAction {
    /// List registered tickers
    List {
        /// Only tickers in this group
        #[arg(long)]
        group: Option<String>,
        /// Only tickers included in scheduled runs
        #[arg(long)]
        scheduled: bool,
    },
    /// Register one or more tickers
    Add {
        #[arg(required = true)]
        tickers: Vec<String>,
        /// Register without adding to scheduled runs
        #[arg(long)]
        unscheduled: bool,
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,
    },
    /// Remove a ticker and its group memberships
    Remove { ticker: String },
    /// Include a ticker in scheduled runs (or exclude it with --off)
    Schedule {
        ticker: String,
        #[arg(long)]
        off: bool,
    },
    /// Import tickers from a CSV file with a `ticker` column
    Import { path: PathBuf },
}

pub fn run(config: &Config, action: TickersAction) -> Result<()> {
    let registry = super::open_registry(config)?;
    execute(&registry, action)
}

fn execute(registry: &TickerRegistry, action: TickersAction) -> Result<()> {
    let s = Styled::new();
    match action {
        TickersAction::List { group, scheduled } => {
            let mut entries = registry.all()?;
            if let Some(group) = &group {
                entries.retain(|e| e.groups.contains(group));
            }
            if scheduled {
                entries.retain(|e| e.is_scheduled);
            }
            if output::is_json() {
                output::print_json(&serde_json::json!({
                    "count": entries.len(),
                    "tickers": entries,
                }));
            } else {
                print_entries(&s, &entries);
            }
        }
        TickersAction::Add {
            tickers,
            unscheduled,
            group,
        } => {
            let symbols = super::parse_tickers(&tickers)?;
            for ticker in &symbols {
                let created = registry.add(ticker, !unscheduled, Some(&group))?;
                let verb = if created { "added" } else { "updated" };
                report(&s, &format!("{ticker} {verb} (group {group})"));
            }
        }
        TickersAction::Remove { ticker } => {
            let ticker = TickerSymbol::parse(&ticker)?;
            if !registry.remove(&ticker)? {
                bail!("ticker {ticker} is not registered");
            }
            report(&s, &format!("{ticker} removed"));
        }
        TickersAction::Schedule { ticker, off } => {
            let ticker = TickerSymbol::parse(&ticker)?;
            if !registry.set_scheduled(&ticker, !off)? {
                bail!("ticker {ticker} is not registered");
            }
            let state = if off { "unscheduled" } else { "scheduled" };
            report(&s, &format!("{ticker} {state}"));
        }
        TickersAction::Import { path } => {
            let imported = registry.import_csv(&path)?;
            report(
                &s,
                &format!("imported {imported} tickers from {}", path.display()),
            );
        }
    }
    Ok(())
}

fn report(s: &Styled, msg: &str) {
    if output::is_json() {
        output::print_json(&serde_json::json!({ "success": true, "message": msg }));
    } else if !output::is_quiet() {
        eprintln!("  {} {msg}", s.ok_sym());
    }
}

fn print_entries(s: &Styled, entries: &[TickerEntry]) {
    if entries.is_empty() {
        eprintln!("  No tickers registered. Add some with 'cagr tickers add AAPL'.");
        return;
    }
    output::print_section(s, &format!("Tickers ({})", entries.len()));
    for entry in entries {
        let sym = if entry.is_scheduled {
            s.ok_sym()
        } else {
            s.warn_sym()
        };
        let groups = entry.groups.iter().cloned().collect::<Vec<_>>().join(", ");
        output::print_check(sym, entry.ticker.as_str(), &s.dim(&groups));
    }
}
