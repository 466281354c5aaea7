//! Probe a running server's `/health` endpoint.

use crate::cli::output::{self, Styled};
use crate::config::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Base URL of the local server described by `config`.
pub fn default_url(config: &Config) -> String {
    let host = match config.api.host.as_str() {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        other => other,
    };
    format!("http://{host}:{}", config.api.port)
}

/// Returns whether the server reported itself healthy.
pub async fn run(config: &Config, url: Option<&str>) -> Result<bool> {
    let base = url
        .map(str::to_string)
        .unwrap_or_else(|| default_url(config));
    let endpoint = format!("{}/health", base.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let response = match client.get(&endpoint).send().await {
        Ok(r) => r,
        Err(e) => {
            if output::is_json() {
                output::print_json(&serde_json::json!({
                    "reachable": false,
                    "url": endpoint,
                    "error": e.to_string(),
                }));
            } else {
                let s = Styled::new();
                output::print_check(s.fail_sym(), "Server:", &format!("unreachable at {endpoint}"));
                output::print_detail("Start it with 'cagr serve'.");
            }
            return Ok(false);
        }
    };

    let healthy = response.status().is_success();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("invalid JSON from {endpoint}"))?;

    if output::is_json() {
        output::print_json(&body);
        return Ok(healthy);
    }

    let s = Styled::new();
    let status = body.get("status").and_then(Value::as_str).unwrap_or("?");
    let sym = if healthy { s.ok_sym() } else { s.fail_sym() };
    output::print_check(sym, "Server:", &format!("{status} at {base}"));

    if let Some(data) = body.get("data") {
        let tickers = data.get("total_tickers").and_then(Value::as_u64).unwrap_or(0);
        let fresh = data.get("is_fresh").and_then(Value::as_bool).unwrap_or(false);
        let sym = if fresh { s.ok_sym() } else { s.warn_sym() };
        let label = if fresh { "fresh" } else { "stale" };
        output::print_check(sym, "Data:", &format!("{tickers} tickers, {label}"));
    }
    if body.get("scrape_running").and_then(Value::as_bool) == Some(true) {
        output::print_check(s.warn_sym(), "Scrape:", "a run is in progress");
    }
    if let Some(err) = body.get("error").and_then(Value::as_str) {
        output::print_detail(&s.red(err));
    }
    Ok(healthy)
}
