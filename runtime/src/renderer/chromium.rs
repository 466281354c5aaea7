//! Chromium-backed renderer using the DevTools protocol via `chromiumoxide`.

use super::{ElementRef, RenderContext, Renderer};
use crate::config::BrowserConfig as BrowserSettings;
use crate::error::ScrapeError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maximum time for the browser process to come up.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Launches one headless (or headed) Chromium per session.
pub struct ChromiumRenderer {
    settings: BrowserSettings,
}

impl ChromiumRenderer {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self) -> Result<BrowserConfig, ScrapeError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.settings.window_width, self.settings.window_height)
            .launch_timeout(LAUNCH_TIMEOUT)
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-notifications")
            .arg("--disable-extensions");

        if !self.settings.headless {
            builder = builder.with_head();
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = self.settings.resolved_executable() {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(ScrapeError::SessionUnusable)
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, ScrapeError> {
        let config = self.browser_config()?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(classify)?;

        // The handler must be polled for the connection to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler stopped: {e}");
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(classify)?;
        info!(headless = self.settings.headless, "browser session started");

        Ok(Box::new(ChromiumContext {
            browser,
            page,
            handler_task,
            arena: Vec::new(),
        }))
    }
}

struct ChromiumContext {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    /// Elements handed out since the last navigation.
    arena: Vec<Element>,
}

impl ChromiumContext {
    fn element(&self, element: ElementRef) -> Result<&Element, ScrapeError> {
        self.arena
            .get(element.0)
            .ok_or_else(|| ScrapeError::Interaction("stale element reference".into()))
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ScrapeError> {
        self.arena.clear();
        let page = &self.page;
        let load = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            page.find_element("body").await?;
            Ok::<(), CdpError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(ScrapeError::Interaction(format!(
                "navigation to {url} exceeded {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn find_all(&mut self, selector: &str) -> Result<Vec<ElementRef>, ScrapeError> {
        let found = match self.page.find_elements(selector).await {
            Ok(found) => found,
            // No match is reported as an error by CDP; treat it as an empty result.
            Err(CdpError::NotFound) => Vec::new(),
            Err(e) => return Err(classify(e)),
        };
        let mut refs = Vec::with_capacity(found.len());
        for element in found {
            refs.push(ElementRef(self.arena.len()));
            self.arena.push(element);
        }
        Ok(refs)
    }

    async fn read_text(&mut self, element: ElementRef) -> Result<String, ScrapeError> {
        let text = self
            .element(element)?
            .inner_text()
            .await
            .map_err(classify)?;
        Ok(text.unwrap_or_default())
    }

    async fn click(&mut self, element: ElementRef) -> Result<(), ScrapeError> {
        // Script click: the toggle is often covered by sticky headers.
        self.element(element)?
            .call_js_fn("function() { this.click(); }", false)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn scroll_by(&mut self, pixels: i64) -> Result<(), ScrapeError> {
        self.page
            .evaluate(format!("window.scrollBy(0, {pixels});"))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn reclaim(&mut self) -> Result<(), ScrapeError> {
        self.arena.clear();
        let fresh = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(classify)?;
        let old = std::mem::replace(&mut self.page, fresh);
        if let Err(e) = old.close().await {
            warn!("failed to close recycled tab: {e}");
        }
        debug!("recycled browser tab");
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), ScrapeError> {
        self.arena.clear();
        let closed = self.browser.close().await.map(|_| ()).map_err(classify);
        if let Err(e) = self.browser.wait().await {
            warn!("browser process did not exit cleanly: {e}");
        }
        self.handler_task.abort();
        info!("browser session closed");
        closed
    }
}

/// Transport failures mean the session is gone; anything else is worth
/// retrying on the same session.
fn classify(err: CdpError) -> ScrapeError {
    match &err {
        CdpError::Ws(_)
        | CdpError::Io(_)
        | CdpError::ChannelSendError(_)
        | CdpError::NoResponse
        | CdpError::LaunchExit(..)
        | CdpError::LaunchTimeout(..)
        | CdpError::LaunchIo(..) => ScrapeError::SessionUnusable(err.to_string()),
        _ => ScrapeError::Interaction(err.to_string()),
    }
}
