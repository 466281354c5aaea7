//! Typed configuration loaded from a JSON file plus environment overrides.
//!
//! Loading fails fast: anything malformed becomes [`ScrapeError::ConfigInvalid`].

use crate::domain::{MetricRow, TickerSymbol};
use crate::error::ScrapeError;
use crate::live::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Placeholder in [`SiteConfig::url_template`] replaced by the ticker symbol.
pub const TICKER_PLACEHOLDER: &str = "{ticker}";

/// Longest accepted retry delay or step timeout.
const MAX_STEP_SECONDS: Duration = Duration::from_secs(3600);
const MIN_FREQUENCY: Duration = Duration::from_secs(60);
const MAX_FREQUENCY: Duration = Duration::from_secs(365 * 24 * 3600);

/// Seconds as a [`Duration`]; negative, NaN and out-of-range values are invalid.
fn checked_seconds(name: &str, value: f64) -> Result<Duration, ScrapeError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ScrapeError::ConfigInvalid(format!("{name} is out of range: {value}")))
}

/// Lenient conversion for values that may not have been validated.
fn saturating_seconds(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(d) => d,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

/// Directory for the database and other state (`CAGR_HOME` or `~/.cagr`).
pub fn cagr_home() -> PathBuf {
    if let Ok(p) = std::env::var("CAGR_HOME") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".cagr")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scraping: ScrapingConfig,
    pub browser: BrowserConfig,
    pub site: SiteConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrapingConfig {
    pub row_type: MetricRow,
    pub retry_attempts: u32,
    pub retry_delay_seconds: f64,
    pub scroll_pixels: i64,
    pub inter_ticker_delay_ms: u64,
    pub reclaim_every: usize,
    pub element_timeout_seconds: f64,
    pub navigation_timeout_seconds: f64,
    pub settle_delay_ms: u64,
    pub frequency_hours: f64,
    pub enabled: bool,
    pub run_on_startup: bool,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            row_type: MetricRow::Avg,
            retry_attempts: 3,
            retry_delay_seconds: 2.0,
            scroll_pixels: 500,
            inter_ticker_delay_ms: 800,
            reclaim_every: 50,
            element_timeout_seconds: 8.0,
            navigation_timeout_seconds: 30.0,
            settle_delay_ms: 1000,
            frequency_hours: 6.0,
            enabled: true,
            run_on_startup: false,
        }
    }
}

impl ScrapingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            saturating_seconds(self.retry_delay_seconds),
        )
    }

    pub fn element_timeout(&self) -> Duration {
        saturating_seconds(self.element_timeout_seconds)
    }

    pub fn navigation_timeout(&self) -> Duration {
        saturating_seconds(self.navigation_timeout_seconds)
    }

    pub fn inter_ticker_delay(&self) -> Duration {
        Duration::from_millis(self.inter_ticker_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn frequency(&self) -> Duration {
        saturating_seconds(self.frequency_hours * 3600.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Explicit browser binary; falls back to `CAGR_CHROME_PATH`, then discovery.
    pub executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    pub no_sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            window_width: 1920,
            window_height: 1080,
            no_sandbox: false,
        }
    }
}

impl BrowserConfig {
    pub fn resolved_executable(&self) -> Option<PathBuf> {
        self.executable
            .clone()
            .or_else(|| std::env::var_os("CAGR_CHROME_PATH").map(PathBuf::from))
    }
}

/// Markup contract of the target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub url_template: String,
    pub toggle_selector: String,
    pub year_header_selector: String,
    pub value_cell_selector: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            url_template: "https://stockunlock.com/stockDetails/{ticker}/analyst".to_string(),
            toggle_selector: "button.MuiButtonBase-root.MuiToggleButtonGroup-grouped.MuiToggleButtonGroup-lastButton[value='cagr']".to_string(),
            year_header_selector: "th.MuiTableCell-root.MuiTableCell-head.MuiTableCell-alignLeft span.MuiTypography-root.MuiTypography-body1".to_string(),
            value_cell_selector: "span.MuiTypography-root.MuiTypography-body1.css-1r92pvx".to_string(),
        }
    }
}

impl SiteConfig {
    pub fn page_url(&self, ticker: &TickerSymbol) -> String {
        self.url_template.replace(TICKER_PLACEHOLDER, ticker.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            auth_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite file; defaults to `$CAGR_HOME/cagr_data.db`.
    pub database_path: Option<PathBuf>,
    /// CSV of tickers imported into the registry at server start.
    pub tickers_csv: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| cagr_home().join("cagr_data.db"))
    }
}

impl Config {
    /// Load from `path`. A missing file yields defaults; anything unreadable or
    /// invalid is fatal.
    pub fn load(path: &Path) -> Result<Self, ScrapeError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                ScrapeError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
            })?;
            Self::from_json(&raw)?
        } else {
            tracing::warn!("config file {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ScrapeError> {
        serde_json::from_str(raw).map_err(|e| ScrapeError::ConfigInvalid(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("CAGR_API_TOKEN") {
            self.api.auth_token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        let invalid = |msg: &str| Err(ScrapeError::ConfigInvalid(msg.to_string()));
        let s = &self.scraping;

        if s.retry_attempts == 0 {
            return invalid("scraping.retry_attempts must be at least 1");
        }
        for (name, value) in [
            ("scraping.retry_delay_seconds", s.retry_delay_seconds),
            ("scraping.element_timeout_seconds", s.element_timeout_seconds),
            ("scraping.navigation_timeout_seconds", s.navigation_timeout_seconds),
        ] {
            let delay = checked_seconds(name, value)?;
            if delay > MAX_STEP_SECONDS {
                return Err(ScrapeError::ConfigInvalid(format!(
                    "{name} must be at most {} seconds",
                    MAX_STEP_SECONDS.as_secs()
                )));
            }
        }
        if s.element_timeout_seconds == 0.0 || s.navigation_timeout_seconds == 0.0 {
            return invalid("timeouts must be greater than zero");
        }
        let frequency = checked_seconds("scraping.frequency_hours", s.frequency_hours * 3600.0)?;
        if frequency < MIN_FREQUENCY || frequency > MAX_FREQUENCY {
            return invalid("scraping.frequency_hours must be between one minute and one year");
        }

        if !self.site.url_template.contains(TICKER_PLACEHOLDER) {
            return invalid("site.url_template must contain {ticker}");
        }
        url::Url::parse(&self.site.url_template.replace(TICKER_PLACEHOLDER, "AAPL"))
            .map_err(|e| ScrapeError::ConfigInvalid(format!("site.url_template: {e}")))?;
        for (name, selector) in [
            ("site.toggle_selector", &self.site.toggle_selector),
            ("site.year_header_selector", &self.site.year_header_selector),
            ("site.value_cell_selector", &self.site.value_cell_selector),
        ] {
            if selector.trim().is_empty() {
                return Err(ScrapeError::ConfigInvalid(format!("{name} is empty")));
            }
        }
        Ok(())
    }
}
