//! SQLite-backed persistence: CAGR values, scrape runs and the ticker registry.

pub mod cagr_store;
pub mod ticker_registry;

pub use cagr_store::{CagrStore, Freshness, RunRecord, StoreStatistics, StoredRecord};
pub use ticker_registry::{TickerEntry, TickerRegistry};
