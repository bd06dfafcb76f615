//! Browser-level error types

use std::time::Duration;
use thiserror::Error;

use crate::dom::DomError;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("No element matches {0}")]
    ElementNotFound(String),

    #[error("Clicking {0} did not trigger a download")]
    NoDownload(String),

    #[error("Page has no document loaded")]
    NoDocument,

    #[error("Page or browser already closed")]
    Closed,

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl BrowserError {
    pub fn is_timeout(&self) -> bool {
        match self {
            BrowserError::Timeout { .. } => true,
            BrowserError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}
