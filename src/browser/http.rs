//! Browser capability backed by plain HTTP requests
//!
//! Pages are fetched with `reqwest` and queried with `scraper`. No script
//! runs, so the document is complete once the response body has arrived: a
//! selector wait succeeds or times out immediately, a click on an anchor
//! becomes a pending navigation, and a download is the anchor's response
//! when the server serves it as a file.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Client;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Browser, BrowserEngine, BrowserError, Download, Driver, Page};
use crate::config::HttpConfig;
use crate::dom;
use crate::markup::Locator;

/// Content types accepted as a download even without an attachment header
const DOWNLOAD_CONTENT_TYPES: &[&str] = &["application/pdf", "application/octet-stream"];

#[derive(Debug, Clone)]
pub struct HttpEngine {
    config: HttpConfig,
}

impl HttpEngine {
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserEngine for HttpEngine {
    async fn start(&self) -> Result<Box<dyn Driver>, BrowserError> {
        Ok(Box::new(HttpDriver {
            config: self.config.clone(),
            stopped: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct HttpDriver {
    config: HttpConfig,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Driver for HttpDriver {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let client = Client::builder()
            .user_agent(&self.config.user_agent)
            .cookie_store(true)
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        debug!("Launched HTTP browser with user agent {}", self.config.user_agent);

        Ok(Box::new(HttpBrowser {
            client,
            closed: Arc::new(AtomicBool::new(false)),
            driver_stopped: self.stopped.clone(),
        }))
    }

    async fn shutdown(&self) -> Result<(), BrowserError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct HttpBrowser {
    client: Client,
    closed: Arc<AtomicBool>,
    driver_stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        if self.closed.load(Ordering::SeqCst) || self.driver_stopped.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            browser_closed: self.closed.clone(),
            document: None,
            pending: None,
            closed: false,
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct LoadedDocument {
    url: Url,
    html: String,
}

struct HttpPage {
    client: Client,
    browser_closed: Arc<AtomicBool>,
    document: Option<LoadedDocument>,
    /// Target of a clicked anchor, loaded by `wait_for_dom_content_loaded`
    pending: Option<Url>,
    closed: bool,
}

impl HttpPage {
    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed || self.browser_closed.load(Ordering::SeqCst) {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    fn document(&self) -> Result<&LoadedDocument, BrowserError> {
        self.ensure_open()?;
        self.document.as_ref().ok_or(BrowserError::NoDocument)
    }

    /// Absolute navigation target of the first anchor or form submit control matching `locator`
    fn resolve_navigation(&self, locator: &Locator) -> Result<Url, BrowserError> {
        let document = self.document()?;
        let target = dom::navigation_target(&document.html, locator)?
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
        Ok(document.url.join(&target)?)
    }

    /// Absolute target of the first anchor matching `locator`
    fn resolve_anchor(&self, locator: &Locator) -> Result<Url, BrowserError> {
        let document = self.document()?;
        let href = dom::first_href(&document.html, locator)?
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
        Ok(document.url.join(&href)?)
    }

    async fn load(&mut self, url: Url, timeout: Duration) -> Result<(), BrowserError> {
        debug!("GET {} (timeout {:?})", url, timeout);
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| navigation_error(&url, timeout, e))?;

        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| navigation_error(&url, timeout, e))?;

        self.document = Some(LoadedDocument { url: final_url, html });
        Ok(())
    }
}

fn navigation_error(url: &Url, timeout: Duration, e: reqwest::Error) -> BrowserError {
    if e.is_timeout() {
        BrowserError::Timeout {
            what: format!("navigation to {}", url),
            after: timeout,
        }
    } else {
        BrowserError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.pending = None;
        self.load(url.clone(), timeout).await
    }

    fn url(&self) -> Option<&Url> {
        self.document.as_ref().map(|document| &document.url)
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.document()?.html.clone())
    }

    async fn wait_for_selector(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let document = self.document()?;
        if dom::count(&document.html, locator)? > 0 {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: format!("selector {}", locator),
                after: timeout,
            })
        }
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError> {
        let target = self.resolve_navigation(locator)?;
        debug!("Clicked {} -> {}", locator, target);
        self.pending = Some(target);
        Ok(())
    }

    async fn wait_for_dom_content_loaded(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        match self.pending.take() {
            Some(target) => self.load(target, timeout).await,
            None => Ok(()),
        }
    }

    async fn expect_download(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Box<dyn Download>, BrowserError> {
        let target = self.resolve_anchor(locator)?;
        debug!("Expecting download from {}", target);

        let response = self
            .client
            .get(target.clone())
            .timeout(timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| download_error(&target, timeout, e))?;

        if !is_download(response.headers()) {
            return Err(BrowserError::NoDownload(locator.to_string()));
        }

        let suggested_filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename);
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| download_error(&target, timeout, e))?
            .to_vec();

        Ok(Box::new(HttpDownload {
            url,
            suggested_filename,
            body,
        }))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.closed = true;
        self.document = None;
        self.pending = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || self.browser_closed.load(Ordering::SeqCst)
    }
}

fn download_error(url: &Url, timeout: Duration, e: reqwest::Error) -> BrowserError {
    if e.is_timeout() {
        BrowserError::Timeout {
            what: format!("download from {}", url),
            after: timeout,
        }
    } else {
        BrowserError::Http(e)
    }
}

fn is_download(headers: &HeaderMap) -> bool {
    let attachment = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().to_ascii_lowercase().starts_with("attachment"))
        .unwrap_or(false);
    let file_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let mime = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
            DOWNLOAD_CONTENT_TYPES.contains(&mime.as_str())
        })
        .unwrap_or(false);
    attachment || file_type
}

/// `filename` parameter of a Content-Disposition header
pub fn content_disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

struct HttpDownload {
    url: String,
    suggested_filename: Option<String>,
    body: Vec<u8>,
}

#[async_trait]
impl Download for HttpDownload {
    fn url(&self) -> &str {
        &self.url
    }

    fn suggested_filename(&self) -> Option<&str> {
        self.suggested_filename.as_deref()
    }

    async fn save_as(&self, path: &Path) -> Result<(), BrowserError> {
        tokio::fs::write(path, &self.body).await?;
        Ok(())
    }
}
