//! CAGR table extraction from a rendered analyst page.

pub mod extractor;

pub use extractor::{Extractor, PageCells};
