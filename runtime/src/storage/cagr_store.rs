//! SQLite persistence for extracted CAGR values and scrape-run bookkeeping.
//!
//! One row per `(ticker, year)`. A successful extraction replaces every row of
//! its ticker in one transaction; failed extractions are never written.

use crate::domain::{
    ExtractionResult, RunKind, RunStatus, TickerSymbol, YearLabel, YearValues,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Data younger than this counts as fresh.
pub const FRESH_WITHIN_HOURS: f64 = 12.0;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cagr_data (
        ticker TEXT NOT NULL,
        year TEXT NOT NULL,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (ticker, year)
    );
    CREATE INDEX IF NOT EXISTS idx_cagr_data_updated ON cagr_data(updated_at);
    CREATE TABLE IF NOT EXISTS scrape_runs (
        run_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        requested INTEGER NOT NULL,
        succeeded INTEGER NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error TEXT
    );";

/// Persisted projection of a successful [`ExtractionResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub ticker: TickerSymbol,
    pub values: YearValues,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Freshness {
    pub has_data: bool,
    pub latest_update: Option<DateTime<Utc>>,
    pub ticker_count: usize,
    pub hours_since_update: Option<f64>,
    pub is_fresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatistics {
    pub total_records: usize,
    pub unique_tickers: usize,
    pub unique_years: usize,
    pub earliest_update: Option<DateTime<Utc>>,
    pub latest_update: Option<DateTime<Utc>>,
}

/// One row of `scrape_runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// CAGR value store backed by SQLite.
pub struct CagrStore {
    db: Mutex<Connection>,
}

impl CagrStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let db = Connection::open(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        Self::init(db)
    }

    /// Private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.busy_timeout(Duration::from_secs(5))?;
        db.execute_batch(SCHEMA)
            .context("failed to create cagr tables")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace all stored years for the result's ticker. Returns `false`
    /// without touching the database when the result is unsuccessful or empty.
    pub fn save(&self, result: &ExtractionResult) -> Result<bool> {
        if !result.succeeded() || result.values().is_empty() {
            debug!(ticker = %result.ticker(), "not persisting failed extraction");
            return Ok(false);
        }
        let ticker = result.ticker().as_str();
        let updated_at = timestamp(result.scraped_at());

        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM cagr_data WHERE ticker = ?1", params![ticker])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO cagr_data (ticker, year, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (year, value) in result.values() {
                insert.execute(params![ticker, year.as_str(), value, updated_at])?;
            }
        }
        tx.commit()
            .with_context(|| format!("failed to save CAGR data for {ticker}"))?;
        Ok(true)
    }

    pub fn get(&self, ticker: &TickerSymbol) -> Result<Option<StoredRecord>> {
        let rows = self.query_rows(
            "SELECT ticker, year, value, updated_at FROM cagr_data WHERE ticker = ?1",
            &[ticker.as_str()],
        )?;
        Ok(group_records(rows).into_iter().next())
    }

    /// All records, ordered by ticker.
    pub fn get_all(&self) -> Result<Vec<StoredRecord>> {
        let rows = self.query_rows(
            "SELECT ticker, year, value, updated_at FROM cagr_data ORDER BY ticker, year",
            &[],
        )?;
        Ok(group_records(rows))
    }

    /// Records whose ticker contains `query` (case-insensitive).
    pub fn search(&self, query: &str) -> Result<Vec<StoredRecord>> {
        let pattern = format!("%{}%", query.trim().to_ascii_uppercase());
        let rows = self.query_rows(
            "SELECT ticker, year, value, updated_at FROM cagr_data
             WHERE ticker LIKE ?1 ORDER BY ticker, year",
            &[pattern.as_str()],
        )?;
        Ok(group_records(rows))
    }

    /// Distinct tickers with stored data, sorted.
    pub fn tickers(&self) -> Result<Vec<String>> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT DISTINCT ticker FROM cagr_data ORDER BY ticker")?;
        let tickers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tickers)
    }

    pub fn freshness(&self) -> Result<Freshness> {
        self.freshness_at(Utc::now())
    }

    pub fn freshness_at(&self, now: DateTime<Utc>) -> Result<Freshness> {
        let (count, latest): (usize, Option<String>) = self.conn().query_row(
            "SELECT COUNT(DISTINCT ticker), MAX(updated_at) FROM cagr_data",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let latest_update = latest.as_deref().and_then(parse_timestamp);
        let hours_since_update =
            latest_update.map(|t| (now - t).num_seconds() as f64 / 3600.0);

        Ok(Freshness {
            has_data: count > 0,
            latest_update,
            ticker_count: count,
            hours_since_update,
            is_fresh: hours_since_update.is_some_and(|h| h < FRESH_WITHIN_HOURS),
        })
    }

    /// Delete rows last updated more than `days` days ago. Returns rows removed.
    pub fn delete_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = timestamp(Utc::now() - ChronoDuration::days(i64::from(days)));
        let removed = self
            .conn()
            .execute("DELETE FROM cagr_data WHERE updated_at < ?1", params![cutoff])?;
        Ok(removed)
    }

    pub fn statistics(&self) -> Result<StoreStatistics> {
        let db = self.conn();
        let (total, tickers, years, earliest, latest): (
            usize,
            usize,
            usize,
            Option<String>,
            Option<String>,
        ) = db.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT ticker), COUNT(DISTINCT year),
                    MIN(updated_at), MAX(updated_at)
             FROM cagr_data",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;
        Ok(StoreStatistics {
            total_records: total,
            unique_tickers: tickers,
            unique_years: years,
            earliest_update: earliest.as_deref().and_then(parse_timestamp),
            latest_update: latest.as_deref().and_then(parse_timestamp),
        })
    }

    pub fn begin_run(&self, run_id: &str, kind: RunKind, requested: usize) -> Result<()> {
        self.conn().execute(
            "INSERT INTO scrape_runs (run_id, kind, started_at, requested, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                kind.as_str(),
                timestamp(Utc::now()),
                requested,
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        succeeded: usize,
        failed: usize,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE scrape_runs
             SET finished_at = ?2, succeeded = ?3, failed = ?4, status = ?5, error = ?6
             WHERE run_id = ?1",
            params![
                run_id,
                timestamp(Utc::now()),
                succeeded,
                failed,
                status.as_str(),
                error
            ],
        )?;
        if rows == 0 {
            warn!(run_id, "finish_run for unknown run");
        }
        Ok(())
    }

    pub fn latest_run(&self) -> Result<Option<RunRecord>> {
        let db = self.conn();
        let row = db
            .query_row(
                "SELECT run_id, kind, started_at, finished_at, requested, succeeded, failed,
                        status, error
                 FROM scrape_runs ORDER BY started_at DESC, rowid DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, usize>(4)?,
                        row.get::<_, usize>(5)?,
                        row.get::<_, usize>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(
            |(run_id, kind, started, finished, requested, succeeded, failed, status, error)| {
                RunRecord {
                    run_id,
                    kind,
                    started_at: parse_timestamp(&started).unwrap_or_default(),
                    finished_at: finished.as_deref().and_then(parse_timestamp),
                    requested,
                    succeeded,
                    failed,
                    status: RunStatus::from_stored(&status),
                    error,
                }
            },
        ))
    }

    /// Write one row per ticker: `ticker`, then every stored year ascending.
    /// Returns the number of tickers written.
    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        let records = self.get_all()?;
        let years: BTreeSet<&YearLabel> =
            records.iter().flat_map(|r| r.values.keys()).collect();

        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut header = vec!["ticker".to_string()];
        header.extend(years.iter().map(|y| y.to_string()));
        writer.write_record(&header)?;

        for record in &records {
            let mut line = vec![record.ticker.to_string()];
            line.extend(
                years
                    .iter()
                    .map(|y| record.values.get(*y).cloned().unwrap_or_default()),
            );
            writer.write_record(&line)?;
        }
        writer.flush()?;
        Ok(records.len())
    }

    fn query_rows(&self, sql: &str, args: &[&str]) -> Result<Vec<RawRow>> {
        let db = self.conn();
        let mut stmt = db.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(RawRow {
                    ticker: row.get(0)?,
                    year: row.get(1)?,
                    value: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

struct RawRow {
    ticker: String,
    year: String,
    value: String,
    updated_at: String,
}

/// Fold rows ordered by ticker into records. Rows that no longer parse are
/// skipped with a warning.
fn group_records(rows: Vec<RawRow>) -> Vec<StoredRecord> {
    let mut records: Vec<StoredRecord> = Vec::new();
    for row in rows {
        let (Ok(ticker), Some(year)) = (TickerSymbol::parse(&row.ticker), YearLabel::parse(&row.year))
        else {
            warn!(ticker = %row.ticker, year = %row.year, "skipping malformed stored row");
            continue;
        };
        let updated = parse_timestamp(&row.updated_at).unwrap_or_default();

        match records.last_mut() {
            Some(last) if last.ticker == ticker => {
                last.values.insert(year, row.value);
                last.last_updated = last.last_updated.max(updated);
            }
            _ => {
                let mut values = YearValues::new();
                values.insert(year, row.value);
                records.push(StoredRecord {
                    ticker,
                    values,
                    last_updated: updated,
                });
            }
        }
    }
    records
}

/// Fixed-width UTC timestamps so text comparison in SQL matches time order.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;

    fn result(ticker: &str, pairs: &[(&str, &str)]) -> ExtractionResult {
        let values = pairs
            .iter()
            .map(|(y, v)| (YearLabel::parse(y).unwrap(), v.to_string()))
            .collect();
        ExtractionResult::success(
            TickerSymbol::parse(ticker).unwrap(),
            values,
            Duration::from_millis(5),
        )
    }

    fn store() -> (tempfile::TempDir, CagrStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CagrStore::open(&dir.path().join("cagr.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_and_get() {
        let (_dir, store) = store();
        assert!(store
            .save(&result("MELI", &[("2024", "12%"), ("2025", "N/A")]))
            .unwrap());

        let record = store
            .get(&TickerSymbol::parse("meli").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.values.len(), 2);
        assert_eq!(record.values[&YearLabel::parse("2025").unwrap()], "N/A");
    }

    #[test]
    fn test_rescrape_replaces_not_merges() {
        let (_dir, store) = store();
        store
            .save(&result("MELI", &[("2023", "1%"), ("2024", "2%")]))
            .unwrap();
        store
            .save(&result("MELI", &[("2025", "3%"), ("2026", "4%")]))
            .unwrap();

        let record = store
            .get(&TickerSymbol::parse("MELI").unwrap())
            .unwrap()
            .unwrap();
        let years: Vec<&str> = record.values.keys().map(|y| y.as_str()).collect();
        assert_eq!(years, vec!["2025", "2026"]);
    }

    #[test]
    fn test_failed_result_is_not_saved() {
        let (_dir, store) = store();
        store.save(&result("MELI", &[("2024", "12%")])).unwrap();

        let failed = ExtractionResult::failure(
            TickerSymbol::parse("MELI").unwrap(),
            Duration::ZERO,
            &ScrapeError::EmptyExtraction("value cells"),
        );
        assert!(!store.save(&failed).unwrap());

        let record = store
            .get(&TickerSymbol::parse("MELI").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.values.len(), 1);
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, store) = store();
        assert!(store
            .get(&TickerSymbol::parse("NOPE").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_get_all_and_search() {
        let (_dir, store) = store();
        store.save(&result("MSFT", &[("2024", "9%")])).unwrap();
        store.save(&result("AAPL", &[("2024", "7%")])).unwrap();
        store.save(&result("MELI", &[("2024", "20%")])).unwrap();

        let all: Vec<String> = store
            .get_all()
            .unwrap()
            .into_iter()
            .map(|r| r.ticker.to_string())
            .collect();
        assert_eq!(all, vec!["AAPL", "MELI", "MSFT"]);

        let hits = store.search("m").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(store.tickers().unwrap(), vec!["AAPL", "MELI", "MSFT"]);
    }

    #[test]
    fn test_freshness() {
        let (_dir, store) = store();
        let empty = store.freshness().unwrap();
        assert!(!empty.has_data);
        assert!(!empty.is_fresh);
        assert_eq!(empty.ticker_count, 0);

        store.save(&result("MELI", &[("2024", "12%")])).unwrap();
        let now = store.freshness().unwrap();
        assert!(now.has_data && now.is_fresh);
        assert_eq!(now.ticker_count, 1);

        let later = store
            .freshness_at(Utc::now() + ChronoDuration::hours(13))
            .unwrap();
        assert!(later.has_data);
        assert!(!later.is_fresh);
        assert!(later.hours_since_update.unwrap() > 12.0);
    }

    #[test]
    fn test_statistics() {
        let (_dir, store) = store();
        store
            .save(&result("MELI", &[("2024", "1%"), ("2025", "2%")]))
            .unwrap();
        store.save(&result("AAPL", &[("2025", "3%")])).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.unique_tickers, 2);
        assert_eq!(stats.unique_years, 2);
        assert!(stats.earliest_update <= stats.latest_update);
    }

    #[test]
    fn test_delete_older_than_keeps_recent() {
        let (_dir, store) = store();
        store.save(&result("MELI", &[("2024", "1%")])).unwrap();
        assert_eq!(store.delete_older_than(30).unwrap(), 0);
        assert_eq!(store.tickers().unwrap().len(), 1);
    }

    #[test]
    fn test_run_bookkeeping() {
        let (_dir, store) = store();
        assert!(store.latest_run().unwrap().is_none());

        store.begin_run("run-1", RunKind::Manual, 3).unwrap();
        let running = store.latest_run().unwrap().unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(running.finished_at.is_none());

        store
            .finish_run("run-1", 2, 1, RunStatus::Completed, None)
            .unwrap();
        let done = store.latest_run().unwrap().unwrap();
        assert_eq!(done.run_id, "run-1");
        assert_eq!(done.kind, "manual");
        assert_eq!((done.requested, done.succeeded, done.failed), (3, 2, 1));
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn test_export_csv_years_ascending() {
        let (dir, store) = store();
        store
            .save(&result("MELI", &[("2025", "2%"), ("2024", "1%")]))
            .unwrap();
        store.save(&result("AAPL", &[("2026", "3%")])).unwrap();

        let path = dir.path().join("out.csv");
        assert_eq!(store.export_csv(&path).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ticker,2024,2025,2026");
        assert_eq!(lines[1], "AAPL,,,3%");
        assert_eq!(lines[2], "MELI,1%,2%,");
    }
}
