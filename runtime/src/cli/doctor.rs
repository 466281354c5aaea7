//! Environment readiness check.
//!
//! Looks for a usable Chromium, validates the configuration and opens the
//! database. Every failure carries a one-line fix.

use crate::cli::output::{self, Styled};
use crate::config::{cagr_home, BrowserConfig, Config};
use crate::storage::{CagrStore, TickerRegistry};
use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Level {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
struct Check {
    section: &'static str,
    name: &'static str,
    level: Level,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fix: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct Report {
    checks: Vec<Check>,
}

impl Report {
    fn push(&mut self, section: &'static str, name: &'static str, level: Level, detail: String) {
        self.checks.push(Check {
            section,
            name,
            level,
            detail,
            fix: None,
        });
    }

    fn fail(&mut self, section: &'static str, name: &'static str, detail: String, fix: &str) {
        self.checks.push(Check {
            section,
            name,
            level: Level::Fail,
            detail,
            fix: Some(fix.to_string()),
        });
    }

    fn ready(&self) -> bool {
        self.checks.iter().all(|c| c.level != Level::Fail)
    }

    fn has_warning(&self) -> bool {
        self.checks.iter().any(|c| c.level == Level::Warn)
    }
}

/// Run every check. Returns whether the environment is ready.
pub fn run(config_path: &Path) -> Result<bool> {
    let mut report = Report::default();

    report.push(
        "System",
        "OS:",
        Level::Ok,
        format!("{} ({})", format_os(), std::env::consts::ARCH),
    );

    let config = check_config(&mut report, config_path);
    let browser = config
        .as_ref()
        .map(|c| c.browser.clone())
        .unwrap_or_default();
    check_browser(&mut report, &browser);
    if let Some(config) = &config {
        check_storage(&mut report, config);
        check_api(&mut report, config);
    }

    let ready = report.ready();
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "ready": ready,
            "checks": report.checks,
        }));
    } else {
        print_report(&report);
    }
    Ok(ready)
}

fn check_config(report: &mut Report, path: &Path) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => {
            let source = if path.exists() {
                path.display().to_string()
            } else {
                format!("{} not found, using defaults", path.display())
            };
            let level = if path.exists() { Level::Ok } else { Level::Warn };
            report.push("Configuration", "Config:", level, source);
            report.push(
                "Configuration",
                "Row:",
                Level::Ok,
                format!(
                    "{} every {}h, {} attempts",
                    config.scraping.row_type,
                    config.scraping.frequency_hours,
                    config.scraping.retry_attempts
                ),
            );
            Some(config)
        }
        Err(e) => {
            report.fail(
                "Configuration",
                "Config:",
                e.to_string(),
                &format!("Fix the file at {}", path.display()),
            );
            None
        }
    }
}

fn check_browser(report: &mut Report, browser: &BrowserConfig) {
    let Some(path) = find_chromium(browser) else {
        report.fail(
            "Browser",
            "Chromium:",
            "NOT FOUND".to_string(),
            "Install Chrome/Chromium or set CAGR_CHROME_PATH=/path/to/chrome",
        );
        return;
    };

    let version = chromium_version(&path).unwrap_or_else(|| "unknown version".to_string());
    report.push(
        "Browser",
        "Chromium:",
        Level::Ok,
        format!("{version} at {}", path.display()),
    );

    match test_headless_launch(&path, browser.no_sandbox || is_docker()) {
        Ok(ms) => report.push(
            "Browser",
            "Headless test:",
            Level::Ok,
            format!("launched and closed in {ms}ms"),
        ),
        Err(e) => {
            let fix = if is_docker() && !browser.no_sandbox {
                "Running in a container? Set browser.no_sandbox = true"
            } else {
                "Check the browser's shared libraries and sandbox permissions"
            };
            report.fail("Browser", "Headless test:", format!("FAILED ({e})"), fix);
        }
    }
}

fn check_storage(report: &mut Report, config: &Config) {
    let home = cagr_home();
    let level = if home.exists() { Level::Ok } else { Level::Warn };
    let detail = if home.exists() {
        home.display().to_string()
    } else {
        format!("{} (created on first use)", home.display())
    };
    report.push("Storage", "Data dir:", level, detail);

    let db_path = config.storage.database_path();
    match CagrStore::open(&db_path) {
        Ok(store) => {
            let tickers = store.tickers().map(|t| t.len()).unwrap_or(0);
            report.push(
                "Storage",
                "Database:",
                Level::Ok,
                format!("{} ({tickers} tickers with data)", db_path.display()),
            );
        }
        Err(e) => report.fail(
            "Storage",
            "Database:",
            format!("{e:#}"),
            "Point storage.database_path at a writable location",
        ),
    }

    match TickerRegistry::open(&db_path).and_then(|r| r.all()) {
        Ok(entries) if entries.is_empty() => report.push(
            "Storage",
            "Registry:",
            Level::Warn,
            "no tickers registered (cagr tickers add ...)".to_string(),
        ),
        Ok(entries) => {
            let scheduled = entries.iter().filter(|e| e.is_scheduled).count();
            report.push(
                "Storage",
                "Registry:",
                Level::Ok,
                format!("{} tickers, {scheduled} scheduled", entries.len()),
            );
        }
        Err(e) => report.fail(
            "Storage",
            "Registry:",
            format!("{e:#}"),
            "Point storage.database_path at a writable location",
        ),
    }

    if let Some(csv) = &config.storage.tickers_csv {
        if csv.exists() {
            report.push("Storage", "Tickers CSV:", Level::Ok, csv.display().to_string());
        } else {
            report.push(
                "Storage",
                "Tickers CSV:",
                Level::Warn,
                format!("{} does not exist", csv.display()),
            );
        }
    }
}

fn check_api(report: &mut Report, config: &Config) {
    report.push(
        "API",
        "Listen:",
        Level::Ok,
        format!("{}:{}", config.api.host, config.api.port),
    );
    if config.api.auth_token.is_empty() {
        report.push(
            "API",
            "Auth token:",
            Level::Warn,
            "not set; protected routes will reject every request (set CAGR_API_TOKEN)"
                .to_string(),
        );
    } else {
        report.push("API", "Auth token:", Level::Ok, "configured".to_string());
    }
}

fn print_report(report: &Report) {
    let s = Styled::new();
    output::print_header(&s);

    let mut section = "";
    for check in &report.checks {
        if check.section != section {
            if !section.is_empty() {
                eprintln!();
            }
            section = check.section;
            output::print_section(&s, section);
        }
        let sym = match check.level {
            Level::Ok => s.ok_sym(),
            Level::Warn => s.warn_sym(),
            Level::Fail => s.fail_sym(),
        };
        output::print_check(sym, check.name, &check.detail);
        if let Some(fix) = &check.fix {
            output::print_detail(&format!("Fix: {fix}"));
        }
    }

    if !report.ready() {
        output::print_status(&s, &s.red("NOT READY"), "fix issues above");
    } else if report.has_warning() {
        output::print_status(&s, &s.yellow("READY"), "some warnings above");
    } else {
        output::print_status(&s, &s.green("READY"), "start with 'cagr serve'");
    }
}

fn format_os() -> String {
    match std::env::consts::OS {
        "macos" => Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .filter(|out| out.status.success())
            .map(|out| format!("macOS {}", String::from_utf8_lossy(&out.stdout).trim()))
            .unwrap_or_else(|| "macOS".to_string()),
        "linux" => std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|contents| {
                contents.lines().find_map(|line| {
                    line.strip_prefix("PRETTY_NAME=")
                        .map(|name| name.trim_matches('"').to_string())
                })
            })
            .unwrap_or_else(|| "Linux".to_string()),
        other => other.to_string(),
    }
}

/// Configured executable, then `CAGR_CHROME_PATH`, then `PATH`.
pub fn find_chromium(browser: &BrowserConfig) -> Option<PathBuf> {
    if let Some(path) = browser.resolved_executable() {
        return path.exists().then_some(path);
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }
    None
}

fn chromium_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Some(raw.replace("Google Chrome ", "").replace("Chromium ", ""))
}

fn test_headless_launch(path: &Path, no_sandbox: bool) -> Result<u64> {
    let start = Instant::now();
    let mut cmd = Command::new(path);
    cmd.args(["--headless", "--disable-gpu", "--dump-dom", "about:blank"]);
    if no_sandbox {
        cmd.arg("--no-sandbox");
    }

    let output = cmd
        .output()
        .map_err(|e| anyhow::anyhow!("failed to launch: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{}", stderr.lines().next().unwrap_or("unknown error"));
    }
    Ok(start.elapsed().as_millis() as u64)
}

fn is_docker() -> bool {
    Path::new("/.dockerenv").exists()
        || std::fs::read_to_string("/proc/1/cgroup")
            .map(|s| s.contains("docker") || s.contains("containerd"))
            .unwrap_or(false)
}
