//! Pacing and resource hygiene for long sequential batches.

pub mod pacer;
pub mod resource_governor;

pub use pacer::Pacer;
pub use resource_governor::ResourceGovernor;
