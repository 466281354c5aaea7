//! Core value types: tickers, year labels, metric rows, extraction results.

use crate::error::ScrapeError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Placeholder for a year whose value cell was missing on the page.
pub const NOT_AVAILABLE: &str = "N/A";

fn ticker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9.\-]{0,9}$").expect("static regex"))
}

/// An uppercase exchange symbol such as `MELI` or `BRK.B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TickerSymbol(String);

impl TickerSymbol {
    /// Normalise (trim, uppercase) and validate a raw symbol.
    pub fn parse(raw: &str) -> Result<Self, ScrapeError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if ticker_pattern().is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(ScrapeError::InvalidTicker(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TickerSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TickerSymbol {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TickerSymbol {
    type Error = ScrapeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TickerSymbol> for String {
    fn from(value: TickerSymbol) -> Self {
        value.0
    }
}

/// A four-digit fiscal year column header.
///
/// Stored as text; all labels have exactly four ASCII digits, so lexical order
/// is numeric order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearLabel(String);

impl YearLabel {
    /// Accepts only a trimmed, positive, exactly-four-digit integer.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == 4
            && trimmed.bytes().all(|b| b.is_ascii_digit())
            && trimmed.parse::<u16>().is_ok_and(|y| y > 0)
        {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn year(&self) -> u16 {
        self.0.parse().unwrap_or_default()
    }
}

impl fmt::Display for YearLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for YearLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a four-digit year: {value}"))
    }
}

impl From<YearLabel> for String {
    fn from(value: YearLabel) -> Self {
        value.0
    }
}

/// Which of the three analyst-estimate rows to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetricRow {
    Low,
    #[default]
    Avg,
    High,
}

impl MetricRow {
    /// Position of the row inside one table's row-major value run.
    pub fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Avg => 1,
            Self::High => 2,
        }
    }

    /// Per-call lookup that never fails: unknown names fall back to `Avg`.
    pub fn from_name_lossy(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Avg => "Avg",
            Self::High => "High",
        }
    }
}

impl fmt::Display for MetricRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricRow {
    type Err = ScrapeError;

    /// Strict parse used at the configuration boundary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "avg" | "average" => Ok(Self::Avg),
            "high" => Ok(Self::High),
            other => Err(ScrapeError::ConfigInvalid(format!(
                "unsupported row type `{other}` (expected Low, Avg or High)"
            ))),
        }
    }
}

/// Year to displayed value (a percentage string or [`NOT_AVAILABLE`]).
pub type YearValues = BTreeMap<YearLabel, String>;

/// Outcome of one extraction attempt for one ticker.
///
/// Built once through [`ExtractionResult::success`] or [`ExtractionResult::failure`]
/// and read through accessors afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    ticker: TickerSymbol,
    values: YearValues,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    elapsed: Duration,
    succeeded: bool,
    scraped_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExtractionResult {
    pub fn success(ticker: TickerSymbol, values: YearValues, elapsed: Duration) -> Self {
        Self {
            ticker,
            values,
            elapsed,
            succeeded: true,
            scraped_at: Utc::now(),
            error: None,
        }
    }

    /// A terminal failed outcome: empty mapping, `succeeded == false`.
    pub fn failure(ticker: TickerSymbol, elapsed: Duration, error: &ScrapeError) -> Self {
        Self {
            ticker,
            values: YearValues::new(),
            elapsed,
            succeeded: false,
            scraped_at: Utc::now(),
            error: Some(error.to_string()),
        }
    }

    pub fn ticker(&self) -> &TickerSymbol {
        &self.ticker
    }

    pub fn values(&self) -> &YearValues {
        &self.values
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn scraped_at(&self) -> DateTime<Utc> {
        self.scraped_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// What started a scrape run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Scheduled,
    Manual,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Scheduled => "scheduled",
            RunKind::Manual => "manual",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a recorded scrape run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    /// Lenient parse of a stored status; unknown text reads as `Failed`.
    pub fn from_stored(raw: &str) -> Self {
        match raw {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_normalisation() {
        assert_eq!(TickerSymbol::parse(" meli ").unwrap().as_str(), "MELI");
        assert_eq!(TickerSymbol::parse("brk.b").unwrap().as_str(), "BRK.B");
        assert!(TickerSymbol::parse("").is_err());
        assert!(TickerSymbol::parse("TOO-LONG-SYMBOL").is_err());
        assert!(TickerSymbol::parse("A B").is_err());
    }

    #[test]
    fn test_year_label_parse() {
        assert_eq!(YearLabel::parse(" 2024 ").unwrap().as_str(), "2024");
        assert!(YearLabel::parse("Year").is_none());
        assert!(YearLabel::parse("202").is_none());
        assert!(YearLabel::parse("20245").is_none());
        assert!(YearLabel::parse("0000").is_none());
        assert!(YearLabel::parse("-202").is_none());
    }

    #[test]
    fn test_year_labels_sort_numerically() {
        let mut years: Vec<YearLabel> = ["2030", "2021", "2025"]
            .iter()
            .filter_map(|y| YearLabel::parse(y))
            .collect();
        years.sort();
        let ordered: Vec<u16> = years.iter().map(YearLabel::year).collect();
        assert_eq!(ordered, vec![2021, 2025, 2030]);
    }

    #[test]
    fn test_metric_row_strict_and_lossy() {
        assert_eq!("low".parse::<MetricRow>().unwrap(), MetricRow::Low);
        assert_eq!("High".parse::<MetricRow>().unwrap(), MetricRow::High);
        assert!(matches!(
            "median".parse::<MetricRow>(),
            Err(ScrapeError::ConfigInvalid(_))
        ));
        assert_eq!(MetricRow::from_name_lossy("median"), MetricRow::Avg);
        assert_eq!(MetricRow::from_name_lossy("LOW"), MetricRow::Low);
    }

    #[test]
    fn test_failure_result_is_empty() {
        let ticker = TickerSymbol::parse("AAPL").unwrap();
        let result = ExtractionResult::failure(
            ticker,
            Duration::from_millis(5),
            &ScrapeError::EmptyExtraction("year headers"),
        );
        assert!(!result.succeeded());
        assert!(result.values().is_empty());
        assert_eq!(result.error(), Some("no year headers found on page"));
    }

    #[test]
    fn test_result_serialises_years_ascending() {
        let ticker = TickerSymbol::parse("AAPL").unwrap();
        let mut values = YearValues::new();
        values.insert(YearLabel::parse("2026").unwrap(), "7%".into());
        values.insert(YearLabel::parse("2024").unwrap(), "5%".into());
        let result = ExtractionResult::success(ticker, values, Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["ticker"], "AAPL");
        let keys: Vec<&String> = json["values"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["2024", "2026"]);
    }
}
