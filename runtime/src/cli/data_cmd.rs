//! Read stored estimates: `cagr data` and `cagr export`.

use crate::cli::output::{self, Styled};
use crate::config::Config;
use crate::domain::TickerSymbol;
use crate::storage::StoredRecord;
use anyhow::{bail, Result};
use chrono::Utc;
use std::path::Path;

pub fn run(config: &Config, ticker: Option<&str>, search: Option<&str>) -> Result<()> {
    let store = super::open_store(config)?;
    let records = match (ticker, search) {
        (Some(raw), _) => {
            let ticker = TickerSymbol::parse(raw)?;
            match store.get(&ticker)? {
                Some(record) => vec![record],
                None => bail!("no data stored for {ticker}"),
            }
        }
        (None, Some(query)) => store.search(query)?,
        (None, None) => store.get_all()?,
    };

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "total_tickers": records.len(),
            "data": records,
        }));
    } else {
        print_records(&records);
    }
    Ok(())
}

pub fn export(config: &Config, path: &Path) -> Result<()> {
    let store = super::open_store(config)?;
    let rows = store.export_csv(path)?;
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "tickers": rows,
        }));
    } else if !output::is_quiet() {
        let s = Styled::new();
        eprintln!(
            "  {} exported {rows} tickers to {}",
            s.ok_sym(),
            path.display()
        );
    }
    Ok(())
}

fn print_records(records: &[StoredRecord]) {
    let s = Styled::new();
    if records.is_empty() {
        eprintln!("  No data stored yet. Run 'cagr scrape <TICKER>' or start 'cagr serve'.");
        return;
    }
    output::print_section(&s, &format!("Stored estimates ({})", records.len()));
    let now = Utc::now();
    for record in records {
        let age = (now - record.last_updated).num_seconds().max(0) as u64;
        output::print_check(
            s.ok_sym(),
            &format!("{}:", record.ticker),
            &output::format_values(&record.values),
        );
        if output::is_verbose() {
            output::print_detail(&s.dim(&format!(
                "updated {} ago",
                output::format_duration(age)
            )));
        }
    }
}
