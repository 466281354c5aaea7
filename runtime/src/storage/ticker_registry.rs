//! Which tickers exist, which take part in the periodic run, and how they are
//! grouped. Lives in the same SQLite file as the CAGR values but has its own
//! lifecycle.

use crate::domain::TickerSymbol;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// Group assigned when none is given.
pub const DEFAULT_GROUP: &str = "default";
/// Group assigned to tickers loaded from a CSV file.
pub const CSV_IMPORT_GROUP: &str = "csv_import";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tickers (
        ticker TEXT PRIMARY KEY,
        is_scheduled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ticker_groups (
        ticker TEXT NOT NULL,
        group_name TEXT NOT NULL,
        PRIMARY KEY (ticker, group_name)
    );";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerEntry {
    pub ticker: TickerSymbol,
    pub is_scheduled: bool,
    pub groups: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct TickerRegistry {
    db: Mutex<Connection>,
}

impl TickerRegistry {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.busy_timeout(Duration::from_secs(5))?;
        db.execute_batch(SCHEMA)
            .context("failed to create ticker tables")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or update a ticker and add it to `group` (default group when
    /// `None`). Returns `true` when the ticker was not registered before.
    pub fn add(&self, ticker: &TickerSymbol, scheduled: bool, group: Option<&str>) -> Result<bool> {
        let group = group.map(str::trim).filter(|g| !g.is_empty()).unwrap_or(DEFAULT_GROUP);
        let now = Utc::now().to_rfc3339();

        let mut db = self.conn();
        let tx = db.transaction()?;
        let existed = tx
            .query_row(
                "SELECT 1 FROM tickers WHERE ticker = ?1",
                params![ticker.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        tx.execute(
            "INSERT INTO tickers (ticker, is_scheduled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(ticker) DO UPDATE SET is_scheduled = ?2, updated_at = ?3",
            params![ticker.as_str(), scheduled, now],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO ticker_groups (ticker, group_name) VALUES (?1, ?2)",
            params![ticker.as_str(), group],
        )?;
        tx.commit()?;
        Ok(!existed)
    }

    /// Remove a ticker and its group memberships. `false` if it was unknown.
    pub fn remove(&self, ticker: &TickerSymbol) -> Result<bool> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM ticker_groups WHERE ticker = ?1",
            params![ticker.as_str()],
        )?;
        let rows = tx.execute("DELETE FROM tickers WHERE ticker = ?1", params![ticker.as_str()])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    /// `false` if the ticker is unknown.
    pub fn set_scheduled(&self, ticker: &TickerSymbol, scheduled: bool) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE tickers SET is_scheduled = ?2, updated_at = ?3 WHERE ticker = ?1",
            params![ticker.as_str(), scheduled, Utc::now().to_rfc3339()],
        )?;
        Ok(rows > 0)
    }

    pub fn get(&self, ticker: &TickerSymbol) -> Result<Option<TickerEntry>> {
        Ok(self
            .entries(Some(ticker.as_str()))?
            .into_iter()
            .next())
    }

    /// Every registered ticker, sorted.
    pub fn all(&self) -> Result<Vec<TickerEntry>> {
        self.entries(None)
    }

    /// Tickers that take part in the periodic run, sorted.
    pub fn scheduled(&self) -> Result<Vec<TickerSymbol>> {
        self.symbols(
            "SELECT ticker FROM tickers WHERE is_scheduled = 1 ORDER BY ticker",
            params![],
        )
    }

    pub fn by_group(&self, group: &str) -> Result<Vec<TickerSymbol>> {
        self.symbols(
            "SELECT ticker FROM ticker_groups WHERE group_name = ?1 ORDER BY ticker",
            params![group],
        )
    }

    /// Load tickers from a CSV with a `ticker` (or `Ticker`) column. Every row
    /// is registered as scheduled in the `csv_import` group. Returns how many
    /// rows were accepted.
    pub fn import_csv(&self, path: &Path) -> Result<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let Some(column) = headers.iter().position(|h| h == "ticker" || h == "Ticker") else {
            bail!("{} has no `ticker` column", path.display());
        };

        let mut imported = 0;
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("bad CSV row {}", line + 2))?;
            let Some(raw) = record.get(column).filter(|s| !s.is_empty()) else {
                continue;
            };
            match TickerSymbol::parse(raw) {
                Ok(ticker) => {
                    self.add(&ticker, true, Some(CSV_IMPORT_GROUP))?;
                    imported += 1;
                }
                Err(e) => warn!("skipping CSV row {}: {e}", line + 2),
            }
        }
        info!("imported {imported} tickers from {}", path.display());
        Ok(imported)
    }

    fn symbols(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<TickerSymbol>> {
        let db = self.conn();
        let mut stmt = db.prepare(sql)?;
        let raw = stmt
            .query_map(args, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(raw
            .into_iter()
            .filter_map(|t| TickerSymbol::parse(&t).ok())
            .collect())
    }

    fn entries(&self, only: Option<&str>) -> Result<Vec<TickerEntry>> {
        let db = self.conn();

        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        {
            let mut stmt = db.prepare(
                "SELECT ticker, group_name FROM ticker_groups
                 WHERE ?1 IS NULL OR ticker = ?1",
            )?;
            let rows = stmt.query_map(params![only], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (ticker, group) = row?;
                groups.entry(ticker).or_default().insert(group);
            }
        }

        let mut stmt = db.prepare(
            "SELECT ticker, is_scheduled, created_at, updated_at FROM tickers
             WHERE ?1 IS NULL OR ticker = ?1 ORDER BY ticker",
        )?;
        let rows = stmt
            .query_map(params![only], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(raw, is_scheduled, created, updated)| {
                let ticker = TickerSymbol::parse(&raw).ok()?;
                Some(TickerEntry {
                    groups: groups.remove(&raw).unwrap_or_default(),
                    ticker,
                    is_scheduled,
                    created_at: parse_time(&created),
                    updated_at: parse_time(&updated),
                })
            })
            .collect())
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> TickerSymbol {
        TickerSymbol::parse(s).unwrap()
    }

    fn registry() -> (tempfile::TempDir, TickerRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = TickerRegistry::open(&dir.path().join("cagr.db")).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_add_and_get() {
        let (_dir, reg) = registry();
        assert!(reg.add(&sym("MELI"), true, None).unwrap());
        assert!(!reg.add(&sym("MELI"), true, Some("latam")).unwrap());

        let entry = reg.get(&sym("MELI")).unwrap().unwrap();
        assert!(entry.is_scheduled);
        let groups: Vec<&str> = entry.groups.iter().map(String::as_str).collect();
        assert_eq!(groups, vec!["default", "latam"]);
    }

    #[test]
    fn test_scheduled_excludes_unscheduled() {
        let (_dir, reg) = registry();
        reg.add(&sym("MSFT"), true, None).unwrap();
        reg.add(&sym("AAPL"), true, None).unwrap();
        reg.add(&sym("GME"), false, None).unwrap();

        assert_eq!(reg.scheduled().unwrap(), vec![sym("AAPL"), sym("MSFT")]);
        assert_eq!(reg.all().unwrap().len(), 3);

        assert!(reg.set_scheduled(&sym("GME"), true).unwrap());
        assert_eq!(reg.scheduled().unwrap().len(), 3);
        assert!(!reg.set_scheduled(&sym("NOPE"), true).unwrap());
    }

    #[test]
    fn test_remove_drops_groups() {
        let (_dir, reg) = registry();
        reg.add(&sym("MELI"), true, Some("latam")).unwrap();
        assert!(reg.remove(&sym("MELI")).unwrap());
        assert!(!reg.remove(&sym("MELI")).unwrap());
        assert!(reg.get(&sym("MELI")).unwrap().is_none());
        assert!(reg.by_group("latam").unwrap().is_empty());
    }

    #[test]
    fn test_import_csv() {
        let (dir, reg) = registry();
        let path = dir.path().join("tickers.csv");
        std::fs::write(&path, "Ticker,Name\nmeli,MercadoLibre\n,\nAAPL,Apple\nnot a ticker!,x\n")
            .unwrap();

        assert_eq!(reg.import_csv(&path).unwrap(), 2);
        assert_eq!(reg.by_group(CSV_IMPORT_GROUP).unwrap(), vec![sym("AAPL"), sym("MELI")]);
        assert_eq!(reg.scheduled().unwrap().len(), 2);
    }

    #[test]
    fn test_import_csv_requires_ticker_column() {
        let (dir, reg) = registry();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "symbol\nMELI\n").unwrap();
        assert!(reg.import_csv(&path).is_err());
    }
}
