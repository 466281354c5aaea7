//! CLI subcommand implementations for the `cagr` binary.

pub mod data_cmd;
pub mod doctor;
pub mod health_cmd;
pub mod output;
pub mod scrape_cmd;
pub mod serve;
pub mod status;
pub mod tickers_cmd;

use crate::config::Config;
use crate::domain::TickerSymbol;
use crate::live::{BatchRunner, ControllerSettings, SessionController};
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;
use crate::storage::{CagrStore, TickerRegistry};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(log_json: bool, verbose: bool, quiet: bool) {
    let default = if verbose {
        "cagr_runtime=debug,cagr=debug,tower_http=debug"
    } else if quiet {
        "cagr_runtime=warn,cagr=warn"
    } else {
        "cagr_runtime=info,cagr=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("invalid configuration in {}", path.display()))
}

pub fn open_store(config: &Config) -> Result<Arc<CagrStore>> {
    let path = config.storage.database_path();
    let store = CagrStore::open(&path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

pub fn open_registry(config: &Config) -> Result<Arc<TickerRegistry>> {
    let path = config.storage.database_path();
    let registry = TickerRegistry::open(&path)
        .with_context(|| format!("failed to open ticker registry {}", path.display()))?;
    Ok(Arc::new(registry))
}

/// A runner backed by a real Chromium session controller.
pub fn build_runner(config: &Config, store: Arc<CagrStore>) -> Arc<BatchRunner> {
    let renderer: Arc<dyn Renderer> = Arc::new(ChromiumRenderer::new(config.browser.clone()));
    let controller = SessionController::new(renderer, ControllerSettings::from_config(config));
    Arc::new(BatchRunner::new(controller, store))
}

/// Validate every symbol up front; one bad symbol rejects the whole list.
pub fn parse_tickers(raw: &[String]) -> Result<Vec<TickerSymbol>> {
    let tickers = raw
        .iter()
        .map(|t| TickerSymbol::parse(t))
        .collect::<Result<Vec<_>, _>>()?;
    if tickers.is_empty() {
        anyhow::bail!("no tickers given");
    }
    Ok(tickers)
}
