//! Site-specific selector set
//!
//! Everything tied to Screener's current markup lives here so a different
//! site variant can be described in a JSON file instead of code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

/// How an element's text must relate to a locator's expected text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    /// Trimmed text equals the value
    Exact(String),
    /// Text contains the value
    Contains(String),
}

impl TextMatch {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            TextMatch::Exact(expected) => text.trim() == expected,
            TextMatch::Contains(needle) => text.contains(needle.as_str()),
        }
    }
}

/// A CSS selector optionally narrowed by element text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub css: String,
    #[serde(default)]
    pub text: Option<TextMatch>,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: None,
        }
    }

    pub fn with_text(css: impl Into<String>, text: TextMatch) -> Self {
        Self {
            css: css.into(),
            text: Some(text),
        }
    }

    /// Locator for an anchor of `link_css` whose href is exactly `href`
    pub fn link_with_href(link_css: &str, href: &str) -> Self {
        let escaped = href.replace('\\', "\\\\").replace('"', "\\\"");
        Self::css(format!("{}[href=\"{}\"]", link_css, escaped))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            None => write!(f, "{}", self.css),
            Some(TextMatch::Exact(text)) => write!(f, "{}:text(\"{}\")", self.css, text),
            Some(TextMatch::Contains(text)) => write!(f, "{}:has-text(\"{}\")", self.css, text),
        }
    }
}

/// Which hrefs inside the Concalls container count as transcripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkFilter {
    /// Require a `.pdf` suffix (case-insensitive)
    pub pdf_only: bool,
    /// Require the href's host to end with this domain
    pub allowed_host: Option<String>,
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self {
            pdf_only: true,
            allowed_host: None,
        }
    }
}

impl LinkFilter {
    pub fn accepts(&self, href: &str) -> bool {
        if self.pdf_only && !href.to_ascii_lowercase().ends_with(".pdf") {
            return false;
        }
        match &self.allowed_host {
            None => true,
            Some(domain) => url::Url::parse(href)
                .ok()
                .and_then(|url| url.host_str().map(|host| host.ends_with(domain.as_str())))
                .unwrap_or(false),
        }
    }
}

/// Selector set for the listing page and the company profile page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markup {
    /// Heading that titles the transcripts section
    pub section_heading: Locator,
    /// Nearest ancestor of the heading that holds the links
    pub section_container: String,
    /// Transcript anchors inside the container
    pub transcript_link: String,
    pub link_filter: LinkFilter,
    /// Rows of the listing results table
    pub result_row: Locator,
    /// Company profile anchors within the rows
    pub company_link: Locator,
    /// Pagination candidates, most specific first
    pub next_controls: Vec<Locator>,
}

impl Default for Markup {
    fn default() -> Self {
        Self {
            section_heading: Locator::with_text("h3", TextMatch::Exact("Concalls".to_string())),
            section_container: "div.documents.concalls.flex-column".to_string(),
            transcript_link: "a.concall-link".to_string(),
            link_filter: LinkFilter::default(),
            result_row: Locator::css("div.data-table > table > tbody > tr"),
            company_link: Locator::css(
                "div.data-table > table > tbody > tr > td:first-of-type > a[href^=\"/company/\"]",
            ),
            next_controls: vec![
                Locator::css("a[rel~=\"next\"]:not(.disabled)"),
                Locator::with_text(
                    "button:not([disabled])",
                    TextMatch::Contains("Next".to_string()),
                ),
                Locator::with_text("a:not(.disabled)", TextMatch::Contains("Next".to_string())),
            ],
        }
    }
}

impl Markup {
    /// Load a selector set from JSON; omitted fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read markup file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid markup file: {}", path.display()))
    }

    /// Locator for the concrete transcript anchor `href`
    pub fn transcript_locator(&self, href: &str) -> Locator {
        Locator::link_with_href(&self.transcript_link, href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_link_filter_pdf_suffix_is_case_insensitive() {
        let filter = LinkFilter::default();
        assert!(filter.accepts("https://example.com/a/Q1-call.PDF"));
        assert!(filter.accepts("/docs/q2.pdf"));
        assert!(!filter.accepts("https://example.com/a/q1.pdf?download=1"));
        assert!(!filter.accepts("https://example.com/a/recording.mp3"));
    }

    #[test]
    fn test_link_filter_allowed_host() {
        let filter = LinkFilter {
            pdf_only: true,
            allowed_host: Some("bseindia.com".to_string()),
        };
        assert!(filter.accepts("https://www.bseindia.com/xml-data/corpfiling/x.pdf"));
        assert!(!filter.accepts("https://www.nseindia.com/x.pdf"));
        assert!(!filter.accepts("/relative/x.pdf"));
    }

    #[test]
    fn test_href_locator_escapes_quotes() {
        let locator = Locator::link_with_href("a.concall-link", r#"/x"y.pdf"#);
        assert_eq!(locator.css, r#"a.concall-link[href="/x\"y.pdf"]"#);
    }

    #[test]
    fn test_partial_markup_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"section_heading": {{"css": "h2", "text": {{"exact": "Concalls"}}}},
                "link_filter": {{"allowed_host": "bseindia.com"}}}}"#
        )
        .unwrap();

        let markup = Markup::from_file(file.path()).unwrap();
        assert_eq!(markup.section_heading.css, "h2");
        assert_eq!(markup.link_filter.allowed_host.as_deref(), Some("bseindia.com"));
        assert!(markup.link_filter.pdf_only);
        assert_eq!(markup.transcript_link, "a.concall-link");
        assert_eq!(markup.next_controls.len(), 3);
    }
}
