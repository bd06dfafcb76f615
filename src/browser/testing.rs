//! Scripted in-memory browser for downloader and crawler tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use super::{Browser, BrowserEngine, BrowserError, Download, Driver, Page};
use crate::dom;
use crate::markup::Locator;

#[derive(Debug, Clone)]
pub(crate) enum FakeDownload {
    File {
        suggested: Option<String>,
        body: Vec<u8>,
        savable: bool,
    },
    Timeout,
}

/// Pages keyed by absolute URL, download outcomes keyed by href as written in the page
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeSite {
    pages: HashMap<String, String>,
    downloads: HashMap<String, FakeDownload>,
}

impl FakeSite {
    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }

    pub fn file(mut self, href: &str, suggested: Option<&str>, body: &[u8]) -> Self {
        self.downloads.insert(
            href.to_string(),
            FakeDownload::File {
                suggested: suggested.map(str::to_string),
                body: body.to_vec(),
                savable: true,
            },
        );
        self
    }

    /// A download that starts but cannot be written to disk
    pub fn unsavable(mut self, href: &str, suggested: Option<&str>) -> Self {
        self.downloads.insert(
            href.to_string(),
            FakeDownload::File {
                suggested: suggested.map(str::to_string),
                body: Vec::new(),
                savable: false,
            },
        );
        self
    }

    pub fn timeout(mut self, href: &str) -> Self {
        self.downloads.insert(href.to_string(), FakeDownload::Timeout);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeStats {
    pub drivers_started: usize,
    pub launches: usize,
    pub shutdowns: usize,
    pub browsers_closed: usize,
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub navigations: Vec<String>,
    pub download_attempts: Vec<String>,
}

pub(crate) struct FakeEngine {
    site: Arc<FakeSite>,
    stats: Arc<Mutex<FakeStats>>,
    fail_launch: bool,
    fail_browser_close: bool,
}

impl FakeEngine {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            stats: Arc::new(Mutex::new(FakeStats::default())),
            fail_launch: false,
            fail_browser_close: false,
        }
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn failing_browser_close(mut self) -> Self {
        self.fail_browser_close = true;
        self
    }

    pub fn stats(&self) -> FakeStats {
        self.stats.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserEngine for FakeEngine {
    async fn start(&self) -> Result<Box<dyn Driver>, BrowserError> {
        self.stats.lock().unwrap().drivers_started += 1;
        Ok(Box::new(FakeDriver {
            site: self.site.clone(),
            stats: self.stats.clone(),
            stopped: Arc::new(AtomicBool::new(false)),
            fail_launch: self.fail_launch,
            fail_browser_close: self.fail_browser_close,
        }))
    }
}

struct FakeDriver {
    site: Arc<FakeSite>,
    stats: Arc<Mutex<FakeStats>>,
    stopped: Arc<AtomicBool>,
    fail_launch: bool,
    fail_browser_close: bool,
}

#[async_trait]
impl Driver for FakeDriver {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        if self.fail_launch {
            return Err(BrowserError::Launch("no browser binary".to_string()));
        }
        self.stats.lock().unwrap().launches += 1;
        Ok(Box::new(FakeBrowser {
            site: self.site.clone(),
            stats: self.stats.clone(),
            driver_stopped: self.stopped.clone(),
            fail_close: self.fail_browser_close,
        }))
    }

    async fn shutdown(&self) -> Result<(), BrowserError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.stats.lock().unwrap().shutdowns += 1;
        Ok(())
    }
}

struct FakeBrowser {
    site: Arc<FakeSite>,
    stats: Arc<Mutex<FakeStats>>,
    driver_stopped: Arc<AtomicBool>,
    fail_close: bool,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        if self.driver_stopped.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        self.stats.lock().unwrap().pages_opened += 1;
        Ok(Box::new(FakePage {
            site: self.site.clone(),
            stats: self.stats.clone(),
            driver_stopped: self.driver_stopped.clone(),
            current: None,
            pending: None,
            closed: false,
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.fail_close {
            return Err(BrowserError::Launch("browser process vanished".to_string()));
        }
        self.stats.lock().unwrap().browsers_closed += 1;
        Ok(())
    }
}

struct FakePage {
    site: Arc<FakeSite>,
    stats: Arc<Mutex<FakeStats>>,
    driver_stopped: Arc<AtomicBool>,
    current: Option<(Url, String)>,
    pending: Option<Url>,
    closed: bool,
}

impl FakePage {
    fn loaded(&self) -> Result<&(Url, String), BrowserError> {
        if self.closed || self.driver_stopped.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        self.current.as_ref().ok_or(BrowserError::NoDocument)
    }

    fn first_href(&self, locator: &Locator) -> Result<(Url, String), BrowserError> {
        let (url, html) = self.loaded()?;
        let href = dom::first_href(html, locator)?
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
        Ok((url.join(&href)?, href))
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&mut self, url: &Url, _timeout: Duration) -> Result<(), BrowserError> {
        self.stats.lock().unwrap().navigations.push(url.to_string());
        let html = self.site.pages.get(url.as_str()).ok_or_else(|| BrowserError::Navigation {
            url: url.to_string(),
            reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        })?;
        self.current = Some((url.clone(), html.clone()));
        Ok(())
    }

    fn url(&self) -> Option<&Url> {
        self.current.as_ref().map(|(url, _)| url)
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.loaded()?.1.clone())
    }

    async fn wait_for_selector(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let (_, html) = self.loaded()?;
        if dom::count(html, locator)? > 0 {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: locator.to_string(),
                after: timeout,
            })
        }
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError> {
        let (url, html) = self.loaded()?;
        let href = dom::navigation_target(html, locator)?
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
        let target = url.join(&href)?;
        self.pending = Some(target);
        Ok(())
    }

    async fn wait_for_dom_content_loaded(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        let Some(target) = self.pending.take() else {
            return Ok(());
        };
        self.stats.lock().unwrap().navigations.push(target.to_string());
        match self.site.pages.get(target.as_str()) {
            Some(html) => {
                self.current = Some((target, html.clone()));
                Ok(())
            }
            None => Err(BrowserError::Timeout {
                what: format!("navigation to {}", target),
                after: timeout,
            }),
        }
    }

    async fn expect_download(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Box<dyn Download>, BrowserError> {
        let (target, href) = self.first_href(locator)?;
        self.stats.lock().unwrap().download_attempts.push(href.clone());
        match self.site.downloads.get(&href) {
            Some(FakeDownload::File {
                suggested,
                body,
                savable,
            }) => Ok(Box::new(FakeFile {
                url: target.to_string(),
                suggested: suggested.clone(),
                body: body.clone(),
                savable: *savable,
            })),
            Some(FakeDownload::Timeout) => Err(BrowserError::Timeout {
                what: format!("download from {}", target),
                after: timeout,
            }),
            None => Err(BrowserError::NoDownload(locator.to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if !self.closed {
            self.closed = true;
            self.stats.lock().unwrap().pages_closed += 1;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || self.driver_stopped.load(Ordering::SeqCst)
    }
}

struct FakeFile {
    url: String,
    suggested: Option<String>,
    body: Vec<u8>,
    savable: bool,
}

#[async_trait]
impl Download for FakeFile {
    fn url(&self) -> &str {
        &self.url
    }

    fn suggested_filename(&self) -> Option<&str> {
        self.suggested.as_deref()
    }

    async fn save_as(&self, path: &Path) -> Result<(), BrowserError> {
        if !self.savable {
            return Err(BrowserError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        tokio::fs::write(path, &self.body).await?;
        Ok(())
    }
}
