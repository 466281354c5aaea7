use cagr_runtime::cli;
use cagr_runtime::cli::tickers_cmd::TickersAction;
use cagr_runtime::config::DEFAULT_CONFIG_FILE;
use cagr_runtime::domain::MetricRow;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cagr", version, about = "Analyst CAGR estimates, scraped on a schedule and served over HTTP")]
struct Cli {
    /// Machine-readable output on stdout
    #[arg(long, global = true)]
    json: bool,
    /// Only print errors
    #[arg(long, short, global = true)]
    quiet: bool,
    /// Extra detail, debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Configuration file (falls back to CAGR_CONFIG, then ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the scheduler until Ctrl-C
    Serve {
        /// Serve the API without periodic scraping
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Scrape tickers now and print the values
    Scrape {
        #[arg(required = true)]
        tickers: Vec<String>,
        /// Row to read: Low, Avg or High (defaults to scraping.row_type)
        #[arg(long)]
        row: Option<MetricRow>,
        /// Print only; do not write to the database
        #[arg(long)]
        no_save: bool,
    },
    /// Manage the ticker registry
    Tickers {
        #[command(subcommand)]
        action: TickersAction,
    },
    /// Show stored estimates
    Data {
        ticker: Option<String>,
        /// Tickers containing this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Write every stored estimate to a CSV file
    Export { path: PathBuf },
    /// Data freshness, counts and the last run
    Status,
    /// Probe a running server
    Health {
        /// Base URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,
    },
    /// Check the environment is ready to scrape
    Doctor,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if args.json {
        std::env::set_var("CAGR_JSON", "1");
        std::env::set_var("CAGR_NO_COLOR", "1");
    }
    if args.quiet {
        std::env::set_var("CAGR_QUIET", "1");
    }
    if args.verbose {
        std::env::set_var("CAGR_VERBOSE", "1");
    }
    cli::init_tracing(args.log_json, args.verbose, args.quiet);

    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var_os("CAGR_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("  error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(args.command, config_path)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if cli::output::is_json() {
                cli::output::print_json(&serde_json::json!({ "error": format!("{e:#}") }));
            } else {
                eprintln!("  error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command, config_path: PathBuf) -> anyhow::Result<bool> {
    let config = || cli::load_config(&config_path);

    match command {
        Command::Doctor => return cli::doctor::run(&config_path),
        Command::Serve { no_scheduler } => cli::serve::run(&config()?, no_scheduler).await?,
        Command::Scrape {
            tickers,
            row,
            no_save,
        } => return cli::scrape_cmd::run(&config()?, &tickers, row, !no_save).await,
        Command::Tickers { action } => cli::tickers_cmd::run(&config()?, action)?,
        Command::Data { ticker, search } => {
            cli::data_cmd::run(&config()?, ticker.as_deref(), search.as_deref())?
        }
        Command::Export { path } => cli::data_cmd::export(&config()?, &path)?,
        Command::Status => cli::status::run(&config()?)?,
        Command::Health { url } => return cli::health_cmd::run(&config()?, url.as_deref()).await,
    }
    Ok(true)
}
