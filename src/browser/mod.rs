//! Browser automation capability
//!
//! The downloader and crawler only talk to these traits. [`chrome::ChromeEngine`]
//! drives a real Chrome, [`http::HttpEngine`] is a script-less fallback, and
//! tests drive a scripted fake.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::logging::Log;
use crate::markup::Locator;

pub mod chrome;
pub mod errors;
pub mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use chrome::ChromeEngine;
pub use errors::BrowserError;
pub use http::HttpEngine;

/// Starts automation drivers. Every [`Session`] starts and stops its own.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn start(&self) -> Result<Box<dyn Driver>, BrowserError>;
}

/// One running automation driver
#[async_trait]
pub trait Driver: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError>;

    /// Stop the driver once its browsers are closed
    async fn shutdown(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError>;

    /// URL of the loaded document
    fn url(&self) -> Option<&Url>;

    /// HTML of the loaded document
    async fn content(&self) -> Result<String, BrowserError>;

    async fn wait_for_selector(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// Click the first element matching `locator`
    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError>;

    /// Wait until the navigation started by the last click has loaded its DOM
    async fn wait_for_dom_content_loaded(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    /// Click `locator` and wait for the download it triggers
    async fn expect_download(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Box<dyn Download>, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait Download: Send + Sync {
    fn url(&self) -> &str;

    fn suggested_filename(&self) -> Option<&str>;

    async fn save_as(&self, path: &Path) -> Result<(), BrowserError>;
}

/// A driver and the browser it launched, released on every exit path through [`Session::release`]
pub struct Session {
    driver: Box<dyn Driver>,
    browser: Box<dyn Browser>,
    log: Arc<dyn Log>,
}

impl Session {
    /// Start a driver and launch a browser; the driver is stopped again if launching fails
    pub async fn open(engine: &dyn BrowserEngine, log: Arc<dyn Log>) -> Result<Self, BrowserError> {
        let driver = engine.start().await?;
        match driver.launch().await {
            Ok(browser) => Ok(Self {
                driver,
                browser,
                log,
            }),
            Err(e) => {
                if let Err(stop_err) = driver.shutdown().await {
                    log.error(&format!("Error stopping browser driver: {}", stop_err));
                }
                Err(e)
            }
        }
    }

    pub async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        self.browser.new_page().await
    }

    /// Close the browser, then stop the driver; each failure is logged on its own
    pub async fn release(self) {
        match self.browser.close().await {
            Ok(()) => self.log.debug("Browser closed."),
            Err(e) => self.log.error(&format!("Error closing browser: {}", e)),
        }
        match self.driver.shutdown().await {
            Ok(()) => self.log.debug("Browser driver stopped."),
            Err(e) => self.log.error(&format!("Error stopping browser driver: {}", e)),
        }
    }
}

/// Close `page` unless it already is, logging a failed close as a warning
pub async fn close_page(page: &mut dyn Page, log: &dyn Log, context: &str) {
    if page.is_closed() {
        return;
    }
    match page.close().await {
        Ok(()) => log.debug(&format!("Closed page for {}", context)),
        Err(e) => log.warn(&format!("Could not close page for {}. Error: {}", context, e)),
    }
}
