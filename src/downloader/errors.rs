//! Downloader error types

use std::path::PathBuf;
use thiserror::Error;

use crate::browser::BrowserError;
use crate::dom::DomError;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("No PDF transcript URLs found in the section")]
    NoTranscriptLinks,

    #[error("Could not extract company identifier from URL '{0}'")]
    InvalidCompanyUrl(String),

    #[error("Could not create download directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not save {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: BrowserError,
    },
}
