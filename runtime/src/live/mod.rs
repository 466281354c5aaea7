//! Scraping runtime: the session controller, the single-flight batch runner
//! and the periodic scheduler.

pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod session;

pub use runner::{BatchRunner, BatchSummary, RunError, RunnerStatus};
pub use scheduler::Scheduler;
pub use session::{CancelToken, ControllerSettings, SessionController};
