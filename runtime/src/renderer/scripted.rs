//! Scripted in-memory browser for tests.
//!
//! Pages are registered per URL with the texts each selector should return.
//! Failures can be queued per operation; a queued session-level failure also
//! kills the context it fires on, the way a crashed browser would.

use super::{ElementRef, RenderContext, Renderer};
use crate::config::SiteConfig;
use crate::error::ScrapeError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Launch,
    Navigate,
    FindAll,
    ReadText,
    Click,
    Scroll,
}

/// Content of one page, keyed by selector.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    elements: HashMap<String, Vec<String>>,
    /// Year and value cells only render after the toggle is clicked.
    gated: bool,
}

impl PageScript {
    pub const TOGGLE: &'static str = "button[value='cagr']";
    pub const YEARS: &'static str = "th span.year";
    pub const VALUES: &'static str = "td span.value";

    /// A page with a CAGR toggle; years and values appear once it is clicked.
    pub fn cagr(years: &[&str], values: &[&str]) -> Self {
        let mut elements = HashMap::new();
        elements.insert(Self::TOGGLE.to_string(), vec!["CAGR".to_string()]);
        elements.insert(
            Self::YEARS.to_string(),
            years.iter().map(|s| s.to_string()).collect(),
        );
        elements.insert(
            Self::VALUES.to_string(),
            values.iter().map(|s| s.to_string()).collect(),
        );
        Self {
            elements,
            gated: true,
        }
    }

    /// Same content, already visible without clicking.
    pub fn ungated(mut self) -> Self {
        self.gated = false;
        self
    }

    pub fn without_toggle(mut self) -> Self {
        self.elements.remove(Self::TOGGLE);
        self
    }

    /// Site selectors matching this script's element keys.
    pub fn site() -> SiteConfig {
        SiteConfig {
            url_template: "https://x/{ticker}".to_string(),
            toggle_selector: Self::TOGGLE.to_string(),
            year_header_selector: Self::YEARS.to_string(),
            value_cell_selector: Self::VALUES.to_string(),
        }
    }
}

#[derive(Default)]
struct ScriptState {
    pages: HashMap<String, PageScript>,
    failures: Vec<(Op, ScrapeError)>,
    created: usize,
    closed: usize,
    reclaims: usize,
    navigations: Vec<String>,
}

impl ScriptState {
    fn take_failure(&mut self, op: Op) -> Option<ScrapeError> {
        let pos = self.failures.iter().position(|(o, _)| *o == op)?;
        Some(self.failures.remove(pos).1)
    }
}

/// Renderer whose sessions serve registered [`PageScript`]s.
#[derive(Clone, Default)]
pub struct ScriptedRenderer {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page(&self, url: &str, page: PageScript) {
        self.state.lock().unwrap().pages.insert(url.to_string(), page);
    }

    /// Queue a failure for the next call of `op` (any context).
    pub fn fail_next(&self, op: Op, error: ScrapeError) {
        self.state.lock().unwrap().failures.push((op, error));
    }

    pub fn contexts_created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn contexts_closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn reclaims(&self) -> usize {
        self.state.lock().unwrap().reclaims
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, ScrapeError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure(Op::Launch) {
            return Err(err);
        }
        state.created += 1;
        Ok(Box::new(ScriptedContext {
            state: Arc::clone(&self.state),
            page: None,
            toggled: false,
            arena: Vec::new(),
            dead: false,
        }))
    }
}

struct ScriptedContext {
    state: Arc<Mutex<ScriptState>>,
    page: Option<PageScript>,
    toggled: bool,
    /// (selector, text) for every handed-out ElementRef.
    arena: Vec<(String, String)>,
    dead: bool,
}

impl ScriptedContext {
    fn check(&mut self, op: Op) -> Result<(), ScrapeError> {
        if self.dead {
            return Err(ScrapeError::SessionUnusable("session is gone".into()));
        }
        if let Some(err) = self.state.lock().unwrap().take_failure(op) {
            if err.is_session_level() {
                self.dead = true;
            }
            return Err(err);
        }
        Ok(())
    }

    fn element(&self, element: ElementRef) -> Result<&(String, String), ScrapeError> {
        self.arena
            .get(element.0)
            .ok_or_else(|| ScrapeError::Interaction("stale element reference".into()))
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), ScrapeError> {
        self.check(Op::Navigate)?;
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        self.page = Some(state.pages.get(url).cloned().unwrap_or_default());
        self.toggled = false;
        self.arena.clear();
        Ok(())
    }

    async fn find_all(&mut self, selector: &str) -> Result<Vec<ElementRef>, ScrapeError> {
        self.check(Op::FindAll)?;
        let Some(page) = &self.page else {
            return Ok(Vec::new());
        };
        let hidden = page.gated && !self.toggled && selector != PageScript::TOGGLE;
        let texts = match page.elements.get(selector) {
            Some(texts) if !hidden => texts.clone(),
            _ => Vec::new(),
        };
        let mut refs = Vec::with_capacity(texts.len());
        for text in texts {
            refs.push(ElementRef(self.arena.len()));
            self.arena.push((selector.to_string(), text));
        }
        Ok(refs)
    }

    async fn read_text(&mut self, element: ElementRef) -> Result<String, ScrapeError> {
        self.check(Op::ReadText)?;
        Ok(self.element(element)?.1.clone())
    }

    async fn click(&mut self, element: ElementRef) -> Result<(), ScrapeError> {
        self.check(Op::Click)?;
        if self.element(element)?.0 == PageScript::TOGGLE {
            self.toggled = true;
        }
        Ok(())
    }

    async fn scroll_by(&mut self, _pixels: i64) -> Result<(), ScrapeError> {
        self.check(Op::Scroll)
    }

    async fn reclaim(&mut self) -> Result<(), ScrapeError> {
        self.state.lock().unwrap().reclaims += 1;
        self.arena.clear();
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ScrapeError> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}
