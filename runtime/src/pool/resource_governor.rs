//! Resource governor: schedules periodic reclamation during long batches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts processed tickers and says when a reclamation pass is due.
#[derive(Clone)]
pub struct ResourceGovernor {
    /// Tickers processed since the governor was created.
    processed: Arc<AtomicU64>,
    /// Reclamation passes requested so far.
    reclaimed: Arc<AtomicU64>,
    /// Reclaim after this many tickers; 0 disables reclamation.
    reclaim_every: u64,
}

impl ResourceGovernor {
    pub fn new(reclaim_every: usize) -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            reclaimed: Arc::new(AtomicU64::new(0)),
            reclaim_every: reclaim_every as u64,
        }
    }

    /// Record one processed ticker. Returns `true` when a reclamation pass
    /// should run now.
    pub fn record_processed(&self) -> bool {
        let count = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let due = self.reclaim_every > 0 && count % self.reclaim_every == 0;
        if due {
            self.reclaimed.fetch_add(1, Ordering::SeqCst);
        }
        due
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn reclaim_passes(&self) -> u64 {
        self.reclaimed.load(Ordering::SeqCst)
    }

    pub fn reclaim_every(&self) -> u64 {
        self.reclaim_every
    }
}
