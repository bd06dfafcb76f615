use std::path::{Path, PathBuf};
use url::Url;

use crate::downloader::DownloaderError;

/// A company profile page and the identifier its files are stored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRef {
    pub url: Url,
    pub id: String,
}

impl CompanyRef {
    pub fn parse(company_url: &str) -> Result<Self, DownloaderError> {
        let url = Url::parse(company_url)
            .map_err(|_| DownloaderError::InvalidCompanyUrl(company_url.to_string()))?;
        Self::from_url(url)
    }

    pub fn from_url(url: Url) -> Result<Self, DownloaderError> {
        let id = company_id(&url)
            .ok_or_else(|| DownloaderError::InvalidCompanyUrl(url.to_string()))?;
        Ok(Self { url, id })
    }

    /// `<root>/<id>`
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.id)
    }
}

/// Last non-empty path segment of `url`
pub fn company_id(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// A transcript anchor's href as it appears in the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLink {
    pub href: String,
}

impl TranscriptLink {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }

    /// Filename used when the download carries no suggestion
    pub fn fallback_filename(&self) -> String {
        filename_from_href(&self.href)
    }
}

/// Last path segment of `href` without query or fragment, with a `.pdf` extension
pub fn filename_from_href(href: &str) -> String {
    let without_query = href.split(['?', '#']).next().unwrap_or_default();
    let stem = without_query.rsplit('/').next().unwrap_or_default();
    if stem.is_empty() {
        return "transcript.pdf".to_string();
    }
    if stem.to_ascii_lowercase().ends_with(".pdf") {
        stem.to_string()
    } else {
        format!("{}.pdf", stem)
    }
}

/// Reduce a browser-suggested filename to a bare file name
pub fn sanitize_filename(suggested: &str) -> Option<String> {
    let name = suggested
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// `filename`, or `stem-2.ext`, `stem-3.ext`, ... when that name is already in `taken`
pub fn deduplicate_filename(filename: &str, taken: &[String]) -> String {
    if !taken.iter().any(|name| name == filename) {
        return filename.to_string();
    }
    let (stem, extension) = match filename.rfind('.') {
        Some(dot) if dot > 0 => filename.split_at(dot),
        _ => (filename, ""),
    };
    (2..)
        .map(|n| format!("{}-{}{}", stem, n, extension))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| filename.to_string())
}

/// What happened to one company's transcripts
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub company: CompanyRef,
    pub links_found: usize,
    pub saved: Vec<PathBuf>,
    pub failed: Vec<TranscriptLink>,
}

impl DownloadReport {
    pub fn new(company: CompanyRef, links_found: usize) -> Self {
        Self {
            company,
            links_found,
            saved: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn downloaded_any(&self) -> bool {
        !self.saved.is_empty()
    }
}
