//! Browser capability used by the extractor and the session controller.
//!
//! A [`Renderer`] creates live sessions; a [`RenderContext`] is one session and
//! exposes only the handful of primitives the scraping flow needs. Element
//! handles are opaque [`ElementRef`]s that stay valid until the next
//! navigation or reclamation on the same context.

pub mod chromium;
#[cfg(test)]
pub mod scripted;

use crate::error::ScrapeError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between presence checks while waiting for a selector.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Opaque handle to an element found on the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub(crate) usize);

/// Creates browser sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Launch (or attach to) a fresh browser session.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, ScrapeError>;
}

/// One live browser session.
#[async_trait]
pub trait RenderContext: Send {
    /// Load `url` and wait for the document to be ready, bounded by `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ScrapeError>;

    /// All elements matching a CSS selector, in document order.
    async fn find_all(&mut self, selector: &str) -> Result<Vec<ElementRef>, ScrapeError>;

    /// Displayed text of an element (untrimmed).
    async fn read_text(&mut self, element: ElementRef) -> Result<String, ScrapeError>;

    /// Click an element through the page's script engine.
    async fn click(&mut self, element: ElementRef) -> Result<(), ScrapeError>;

    /// Scroll the window down by `pixels` to trigger lazy content.
    async fn scroll_by(&mut self, pixels: i64) -> Result<(), ScrapeError>;

    /// Best-effort release of memory held by the page. Not correctness-affecting.
    async fn reclaim(&mut self) -> Result<(), ScrapeError>;

    /// Tear down the session.
    async fn close(self: Box<Self>) -> Result<(), ScrapeError>;
}

/// Poll until `selector` matches at least one element, or fail with
/// [`ScrapeError::ElementNotFound`] once `timeout` elapses.
///
/// Session-level errors abort the wait immediately; transient lookup errors
/// are retried until the deadline.
pub async fn wait_for_element(
    context: &mut dyn RenderContext,
    selector: &str,
    timeout: Duration,
) -> Result<ElementRef, ScrapeError> {
    let deadline = Instant::now() + timeout;
    loop {
        match context.find_all(selector).await {
            Ok(found) => {
                if let Some(first) = found.into_iter().next() {
                    return Ok(first);
                }
            }
            Err(e) if e.is_session_level() => return Err(e),
            Err(e) => tracing::debug!("lookup of `{selector}` failed while waiting: {e}"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ScrapeError::ElementNotFound {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::{PageScript, ScriptedRenderer};
    use super::*;

    #[tokio::test]
    async fn test_wait_for_element_present() {
        let renderer = ScriptedRenderer::new();
        renderer.set_page("https://x/AAPL", PageScript::cagr(&["2024"], &["1%"]));
        let mut ctx = renderer.new_context().await.unwrap();
        ctx.navigate("https://x/AAPL", Duration::from_secs(1))
            .await
            .unwrap();

        let found = wait_for_element(ctx.as_mut(), PageScript::TOGGLE, Duration::from_millis(10)).await;
        assert!(found.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_element_times_out() {
        let renderer = ScriptedRenderer::new();
        renderer.set_page("https://x/AAPL", PageScript::cagr(&["2024"], &["1%"]).without_toggle());
        let mut ctx = renderer.new_context().await.unwrap();
        ctx.navigate("https://x/AAPL", Duration::from_secs(1))
            .await
            .unwrap();

        let err = wait_for_element(ctx.as_mut(), PageScript::TOGGLE, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ElementNotFound { timeout_ms: 30, .. }));
    }
}
