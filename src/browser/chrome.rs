//! Browser capability backed by Chrome over the DevTools protocol
//!
//! Every driver launches its own Chrome process. Clicks are real mouse
//! clicks on the live element, so buttons and form submits behave as they do
//! for a user. Downloads are left to Chrome: before each click the browser
//! is told to save files into a fresh staging directory, and the download is
//! complete once a finished file appears there.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser as CdpBrowser, BrowserConfig, Page as CdpPage};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::{Browser, BrowserEngine, BrowserError, Download, Driver, Page};
use crate::config::ChromeConfig;
use crate::dom;
use crate::markup::Locator;

/// Upper bound for a single DevTools command
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Suffix Chrome gives a file while it is still being written
const PARTIAL_SUFFIX: &str = ".crdownload";

/// Set on the current document right before a click; a new document lacks it
const MARK_DOCUMENT: &str = "window.__concallsNavigationMark = true";
const NEW_DOCUMENT_READY: &str =
    "window.__concallsNavigationMark !== true && document.readyState !== 'loading'";

fn protocol(e: CdpError) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

#[derive(Debug, Clone)]
pub struct ChromeEngine {
    config: ChromeConfig,
}

impl ChromeEngine {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn start(&self) -> Result<Box<dyn Driver>, BrowserError> {
        let launch_config = browser_config(&self.config)?;
        Ok(Box::new(ChromeDriver {
            launch_config: Mutex::new(Some(launch_config)),
            config: self.config.clone(),
            stopped: AtomicBool::new(false),
            processes: Mutex::new(Vec::new()),
        }))
    }
}

fn browser_config(config: &ChromeConfig) -> Result<BrowserConfig, BrowserError> {
    let mut builder = BrowserConfig::builder()
        .request_timeout(REQUEST_TIMEOUT)
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage");
    if !config.headless {
        builder = builder.with_head();
    }
    if config.no_sandbox {
        builder = builder.no_sandbox();
    }
    if let Some(path) = &config.executable {
        builder = builder.chrome_executable(path);
    }
    if let Some(user_agent) = &config.user_agent {
        builder = builder.arg(format!("--user-agent={}", user_agent));
    }
    builder.build().map_err(BrowserError::Launch)
}

struct ChromeDriver {
    /// Prepared by `start` so a bad configuration fails before any launch
    launch_config: Mutex<Option<BrowserConfig>>,
    config: ChromeConfig,
    stopped: AtomicBool,
    processes: Mutex<Vec<Arc<ChromeProcess>>>,
}

impl ChromeDriver {
    fn take_launch_config(&self) -> Result<BrowserConfig, BrowserError> {
        let prepared = self
            .launch_config
            .lock()
            .map_err(|_| BrowserError::Launch("driver state poisoned".to_string()))?
            .take();
        match prepared {
            Some(config) => Ok(config),
            None => browser_config(&self.config),
        }
    }
}

#[async_trait]
impl Driver for ChromeDriver {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let launch_config = self.take_launch_config()?;
        let (browser, mut handler) = CdpBrowser::launch(launch_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("DevTools handler error: {}", e);
                }
            }
        });
        debug!("Launched Chrome");

        let process = Arc::new(ChromeProcess {
            browser: tokio::sync::Mutex::new(Some(browser)),
            events: Mutex::new(Some(events)),
            closed: AtomicBool::new(false),
        });
        if let Ok(mut processes) = self.processes.lock() {
            processes.push(process.clone());
        }
        Ok(Box::new(ChromeBrowser { process }))
    }

    /// Close whatever browser is still running, then refuse further launches
    async fn shutdown(&self) -> Result<(), BrowserError> {
        self.stopped.store(true, Ordering::SeqCst);
        let running: Vec<Arc<ChromeProcess>> = match self.processes.lock() {
            Ok(mut processes) => processes.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let mut first_error = None;
        for process in running {
            if let Err(e) = process.close().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A launched Chrome and the task pumping its DevTools events
struct ChromeProcess {
    browser: tokio::sync::Mutex<Option<CdpBrowser>>,
    events: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ChromeProcess {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<CdpPage, BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        browser.new_page("about:blank").await.map_err(protocol)
    }

    /// Send every download of this browser into `dir`
    async fn allow_downloads(&self, dir: &Path) -> Result<(), BrowserError> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().into_owned())
            .build()
            .map_err(BrowserError::Protocol)?;
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        browser.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        let taken = self.browser.lock().await.take();
        let result = match taken {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ()).map_err(protocol);
                if let Err(e) = browser.wait().await {
                    debug!("Waiting for Chrome to exit failed: {}", e);
                }
                closed
            }
            None => Ok(()),
        };
        if let Some(events) = self.events.lock().ok().and_then(|mut events| events.take()) {
            events.abort();
        }
        result
    }
}

struct ChromeBrowser {
    process: Arc<ChromeProcess>,
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        if self.process.is_closed() {
            return Err(BrowserError::Closed);
        }
        let page = self.process.new_page().await?;
        Ok(Box::new(ChromePage {
            process: self.process.clone(),
            page: Some(page),
            current: None,
            awaiting_navigation: false,
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.process.close().await
    }
}

struct ChromePage {
    process: Arc<ChromeProcess>,
    page: Option<CdpPage>,
    /// URL of the document last loaded through this page
    current: Option<Url>,
    /// A click was issued and the resulting navigation has not been awaited
    awaiting_navigation: bool,
}

impl ChromePage {
    fn live(&self) -> Result<CdpPage, BrowserError> {
        if self.process.is_closed() {
            return Err(BrowserError::Closed);
        }
        self.page.clone().ok_or(BrowserError::Closed)
    }

    async fn refresh_url(&mut self, page: &CdpPage) {
        if let Ok(Some(url)) = page.url().await {
            if let Ok(url) = Url::parse(&url) {
                self.current = Some(url);
            }
        }
    }
}

/// The live element that `locator` picks out in the snapshot `html`
async fn locate(page: &CdpPage, html: &str, locator: &Locator) -> Result<Element, BrowserError> {
    let index = dom::match_index(html, locator)?
        .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
    let mut elements = page
        .find_elements(locator.css.as_str())
        .await
        .map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
    if index < elements.len() {
        Ok(elements.swap_remove(index))
    } else {
        Err(BrowserError::ElementNotFound(locator.to_string()))
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError> {
        let page = self.live()?;
        self.awaiting_navigation = false;
        debug!("Navigating Chrome to {} (timeout {:?})", url, timeout);
        match tokio::time::timeout(timeout, page.goto(url.as_str())).await {
            Err(_) => {
                return Err(BrowserError::Timeout {
                    what: format!("navigation to {}", url),
                    after: timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(_)) => {}
        }
        self.current = Some(url.clone());
        self.refresh_url(&page).await;
        Ok(())
    }

    fn url(&self) -> Option<&Url> {
        self.current.as_ref()
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.live()?.content().await.map_err(protocol)
    }

    async fn wait_for_selector(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let page = self.live()?;
        let deadline = Instant::now() + timeout;
        loop {
            let html = page.content().await.map_err(protocol)?;
            if dom::count(&html, locator)? > 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: format!("selector {}", locator),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError> {
        let page = self.live()?;
        let html = page.content().await.map_err(protocol)?;
        let element = locate(&page, &html, locator).await?;
        page.evaluate(MARK_DOCUMENT).await.map_err(protocol)?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Protocol(format!("click on {} failed: {}", locator, e)))?;
        debug!("Clicked {}", locator);
        self.awaiting_navigation = true;
        Ok(())
    }

    /// Wait until the document the last click navigated to has fired DOMContentLoaded
    async fn wait_for_dom_content_loaded(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        if !std::mem::take(&mut self.awaiting_navigation) {
            return Ok(());
        }
        let page = self.live()?;
        let deadline = Instant::now() + timeout;
        loop {
            // Evaluation fails while the old document is being torn down.
            let ready = tokio::time::timeout_at(deadline, page.evaluate(NEW_DOCUMENT_READY))
                .await
                .ok()
                .and_then(|result| result.ok())
                .and_then(|result| result.into_value::<bool>().ok())
                .unwrap_or(false);
            if ready {
                break;
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: "DOMContentLoaded after click".to_string(),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        self.refresh_url(&page).await;
        Ok(())
    }

    async fn expect_download(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Box<dyn Download>, BrowserError> {
        let page = self.live()?;
        let html = page.content().await.map_err(protocol)?;
        let element = locate(&page, &html, locator).await?;
        let url = match (dom::first_href(&html, locator)?, &self.current) {
            (Some(href), Some(base)) => base.join(&href).map(String::from).unwrap_or(href),
            (Some(href), None) => href,
            (None, _) => String::new(),
        };

        let staging = tempfile::Builder::new().prefix("concalls-download-").tempdir()?;
        self.process.allow_downloads(staging.path()).await?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::Protocol(format!("click on {} failed: {}", locator, e)))?;
        let staged = wait_for_download(staging.path(), timeout).await.map_err(|e| match e {
            BrowserError::Timeout { after, .. } => BrowserError::Timeout {
                what: format!("download from {}", url),
                after,
            },
            other => other,
        })?;
        let suggested = staged
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        debug!("Chrome finished downloading {} as {:?}", url, suggested);

        Ok(Box::new(ChromeDownload {
            url,
            suggested,
            staged,
            _staging: staging,
        }))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.awaiting_navigation = false;
        match self.page.take() {
            Some(page) if !self.process.is_closed() => page.close().await.map_err(protocol),
            _ => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.page.is_none() || self.process.is_closed()
    }
}

/// First finished file to appear in `dir`
async fn wait_for_download(dir: &Path, timeout: Duration) -> Result<PathBuf, BrowserError> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(PARTIAL_SUFFIX) && !name.starts_with('.') {
                return Ok(entry.path());
            }
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Timeout {
                what: format!("a download in {}", dir.display()),
                after: timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// A finished download waiting in its staging directory
struct ChromeDownload {
    url: String,
    suggested: Option<String>,
    staged: PathBuf,
    /// Removed with the download
    _staging: TempDir,
}

#[async_trait]
impl Download for ChromeDownload {
    fn url(&self) -> &str {
        &self.url
    }

    fn suggested_filename(&self) -> Option<&str> {
        self.suggested.as_deref()
    }

    async fn save_as(&self, path: &Path) -> Result<(), BrowserError> {
        if let Err(e) = tokio::fs::copy(&self.staged, path).await {
            warn!("Could not move download {} to {}: {}", self.url, path.display(), e);
            return Err(e.into());
        }
        Ok(())
    }
}
