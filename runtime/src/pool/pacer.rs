//! Minimum spacing between consecutive page loads against the target site.

use std::time::Duration;
use tokio::time::Instant;

/// Enforces a fixed minimum delay between requests.
pub struct Pacer {
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl Pacer {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: None,
        }
    }

    /// Wait until at least `min_delay` has passed since the previous call.
    /// The first call never waits.
    pub async fn wait_turn(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// Forget the previous request, e.g. at the start of a new batch.
    pub fn reset(&mut self) {
        self.last_request = None;
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_turn_is_immediate() {
        let mut pacer = Pacer::new(Duration::from_secs(5));
        let started = Instant::now();
        pacer.wait_turn().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_second_turn_waits() {
        let mut pacer = Pacer::new(Duration::from_millis(40));
        pacer.wait_turn().await;
        let started = Instant::now();
        pacer.wait_turn().await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_reset_skips_wait() {
        let mut pacer = Pacer::new(Duration::from_secs(5));
        pacer.wait_turn().await;
        pacer.reset();
        let started = Instant::now();
        pacer.wait_turn().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
