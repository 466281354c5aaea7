//! Error taxonomy for page interaction, extraction, and configuration.

use thiserror::Error;

/// Everything that can go wrong between the browser and a stored result.
///
/// Only [`ScrapeError::ConfigInvalid`] and [`ScrapeError::BrowserUnavailable`] are
/// allowed to escape a batch; the rest are absorbed into a failed
/// [`crate::domain::ExtractionResult`] for the ticker being processed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScrapeError {
    /// A selector matched nothing within its wait budget.
    #[error("no element matched `{selector}` within {timeout_ms}ms")]
    ElementNotFound { selector: String, timeout_ms: u64 },

    /// The browser session itself crashed or disconnected.
    #[error("browser session unusable: {0}")]
    SessionUnusable(String),

    /// A transient page-level failure (navigation timeout, click rejected, script error).
    #[error("page interaction failed: {0}")]
    Interaction(String),

    /// The page rendered but yielded no year headers or no value cells.
    #[error("no {0} found on page")]
    EmptyExtraction(&'static str),

    /// Operator error in the configuration file or environment.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A browser session could not be created even after retrying.
    #[error("could not start a browser session after {attempts} attempts: {reason}")]
    BrowserUnavailable { attempts: u32, reason: String },

    #[error("invalid ticker symbol `{0}`")]
    InvalidTicker(String),
}

impl ScrapeError {
    /// Whether recovering from this error requires replacing the browser session.
    pub fn is_session_level(&self) -> bool {
        matches!(self, Self::SessionUnusable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_session_failures_are_session_level() {
        assert!(ScrapeError::SessionUnusable("ws closed".into()).is_session_level());
        assert!(!ScrapeError::Interaction("click".into()).is_session_level());
        assert!(!ScrapeError::ElementNotFound {
            selector: "button".into(),
            timeout_ms: 10
        }
        .is_session_level());
        assert!(!ScrapeError::EmptyExtraction("year headers").is_session_level());
    }

    #[test]
    fn test_error_messages() {
        let err = ScrapeError::ElementNotFound {
            selector: "button[value='cagr']".into(),
            timeout_ms: 8000,
        };
        assert_eq!(
            err.to_string(),
            "no element matched `button[value='cagr']` within 8000ms"
        );
        assert_eq!(
            ScrapeError::EmptyExtraction("value cells").to_string(),
            "no value cells found on page"
        );
    }
}
