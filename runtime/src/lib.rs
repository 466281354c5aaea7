//! Scheduled extraction of analyst CAGR estimates from a rendered stock page.
//!
//! A [`live::SessionController`] drives one browser session through a batch of
//! tickers, recovering from a dead session by starting a new one. The
//! [`extraction::Extractor`] turns the page's flattened year headers and value
//! cells into a `{year -> value}` map for the configured row. Results land in
//! SQLite ([`storage`]) and are republished by the HTTP API ([`server`]).

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod extraction;
pub mod live;
pub mod pool;
pub mod renderer;
pub mod server;
pub mod storage;
