//! Listing crawler
//!
//! Walks the result pages of a screen, hands every company on a page to a
//! [`CompanyHandler`] and follows the "Next" control until there is none.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::browser::{close_page, BrowserEngine, BrowserError, Page, Session};
use crate::config::{Config, Timeouts};
use crate::dom;
use crate::downloader::CompanyHandler;
use crate::logging::Log;
use crate::markup::Markup;

/// Why pagination ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No result row appeared within the table timeout
    RowWaitTimeout,
    NoCompanyLinks { rows_present: bool },
    NoNextControl,
    NextPageTimeout,
    NextClickFailed(String),
    /// Setup or an unexpected browser error ended the run early
    Aborted(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::RowWaitTimeout => write!(f, "timed out waiting for the company table"),
            StopReason::NoCompanyLinks { rows_present: true } => {
                write!(f, "no company links in the table")
            }
            StopReason::NoCompanyLinks { rows_present: false } => write!(f, "no table rows"),
            StopReason::NoNextControl => write!(f, "no 'Next' control"),
            StopReason::NextPageTimeout => write!(f, "timed out loading the next page"),
            StopReason::NextClickFailed(e) => write!(f, "clicking 'Next' failed: {}", e),
            StopReason::Aborted(e) => write!(f, "aborted: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: usize,
    pub companies: usize,
    pub companies_with_downloads: usize,
    pub stop: StopReason,
}

impl CrawlSummary {
    fn new() -> Self {
        Self {
            pages: 0,
            companies: 0,
            companies_with_downloads: 0,
            stop: StopReason::Aborted("not started".to_string()),
        }
    }
}

pub struct Crawler {
    engine: Arc<dyn BrowserEngine>,
    listing_url: Url,
    base_url: Url,
    download_root: PathBuf,
    markup: Markup,
    timeouts: Timeouts,
    log: Arc<dyn Log>,
}

impl Crawler {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: &Config, log: Arc<dyn Log>) -> Self {
        Self {
            engine,
            listing_url: config.listing_url.clone(),
            base_url: config.base_url.clone(),
            download_root: config.download_dir.clone(),
            markup: config.markup.clone(),
            timeouts: config.timeouts.clone(),
            log,
        }
    }

    /// Crawl every result page, invoking `handler` once per company link
    pub async fn run(&self, handler: &dyn CompanyHandler) -> CrawlSummary {
        self.log.info("Starting main scraper.");
        let mut summary = CrawlSummary::new();

        if let Err(e) = tokio::fs::create_dir_all(&self.download_root).await {
            self.log.error(&format!(
                "Could not create download directory {}: {}",
                self.download_root.display(),
                e
            ));
            summary.stop = StopReason::Aborted(e.to_string());
            return summary;
        }
        self.log.info(&format!(
            "Ensured download directory exists: {}",
            self.download_root.display()
        ));

        self.log.info("Initializing browser session...");
        let session = match Session::open(self.engine.as_ref(), self.log.clone()).await {
            Ok(session) => session,
            Err(e) => {
                self.log.error(&format!("Failed to initialize browser session: {}", e));
                summary.stop = StopReason::Aborted(e.to_string());
                return summary;
            }
        };
        self.log.info("Browser session initialized successfully.");

        let stop = match self.crawl(&session, handler, &mut summary).await {
            Ok(stop) => stop,
            Err(e) if e.is_timeout() => {
                self.log.error(&format!("Browser operation timed out: {}", e));
                StopReason::Aborted(e.to_string())
            }
            Err(e) => {
                self.log
                    .error(&format!("An unexpected error occurred in main scraper: {}", e));
                StopReason::Aborted(e.to_string())
            }
        };
        summary.stop = stop;

        self.log.info("Cleaning up browser resources...");
        session.release().await;
        self.log.info(&format!(
            "Main scraper finished: {} pages, {} companies, {} with downloads ({}).",
            summary.pages, summary.companies, summary.companies_with_downloads, summary.stop
        ));
        summary
    }

    async fn crawl(
        &self,
        session: &Session,
        handler: &dyn CompanyHandler,
        summary: &mut CrawlSummary,
    ) -> Result<StopReason, BrowserError> {
        let mut page = session.new_page().await?;
        let result = self.paginate(page.as_mut(), handler, summary).await;
        close_page(page.as_mut(), self.log.as_ref(), self.listing_url.as_str()).await;
        result
    }

    async fn paginate(
        &self,
        page: &mut dyn Page,
        handler: &dyn CompanyHandler,
        summary: &mut CrawlSummary,
    ) -> Result<StopReason, BrowserError> {
        self.log
            .info(&format!("Navigating to listing page: {}", self.listing_url));
        page.goto(&self.listing_url, self.timeouts.listing_navigation())
            .await?;
        self.log.info("Successfully navigated to listing page.");

        let mut page_num = 1;
        loop {
            self.log.info(&format!("Processing page: {}", page_num));
            summary.pages = page_num;

            match page
                .wait_for_selector(&self.markup.result_row, self.timeouts.table_wait())
                .await
            {
                Ok(()) => self.log.info("Company table loaded."),
                Err(e) if e.is_timeout() => {
                    self.log.warn(&format!(
                        "Timeout waiting for company table on page {}. \
                         Assuming no more data or page structure changed.",
                        page_num
                    ));
                    return Ok(StopReason::RowWaitTimeout);
                }
                Err(e) => return Err(e),
            }

            let html = page.content().await?;
            let scan = dom::scan_listing(&html, &self.markup)?;
            if scan.company_hrefs.is_empty() {
                self.log.info(&format!(
                    "No company links found on page {}. This might be the end or an issue.",
                    page_num
                ));
                if scan.rows == 0 {
                    self.log.info(&format!(
                        "No table rows found on page {}. Definitely the end of data.",
                        page_num
                    ));
                }
                return Ok(StopReason::NoCompanyLinks {
                    rows_present: scan.rows > 0,
                });
            }

            let company_urls = self.resolve_companies(&scan.company_hrefs);
            self.log.info(&format!(
                "Found {} company links on page {}.",
                company_urls.len(),
                page_num
            ));

            for company_url in &company_urls {
                self.process_company(handler, company_url, summary).await;
            }

            let next = dom::find_next_control(&html, &self.markup.next_controls)?;
            let Some(next) = next else {
                self.log.info("No 'Next' button found or it's disabled. End of pages.");
                return Ok(StopReason::NoNextControl);
            };

            self.log.info("Found 'Next' button. Navigating to next page...");
            if let Err(e) = page.click(&next).await {
                self.log.error(&format!(
                    "Error clicking 'Next' button: {}. Stopping pagination.",
                    e
                ));
                return Ok(StopReason::NextClickFailed(e.to_string()));
            }
            match page.wait_for_dom_content_loaded(self.timeouts.page_load()).await {
                Ok(()) => page_num += 1,
                Err(e) if e.is_timeout() => {
                    self.log.warn(
                        "Timeout waiting for next page to load. Assuming end of pagination.",
                    );
                    return Ok(StopReason::NextPageTimeout);
                }
                Err(e) => {
                    self.log.error(&format!(
                        "Error clicking 'Next' button: {}. Stopping pagination.",
                        e
                    ));
                    return Ok(StopReason::NextClickFailed(e.to_string()));
                }
            }
        }
    }

    fn resolve_companies(&self, hrefs: &[String]) -> Vec<Url> {
        hrefs
            .iter()
            .filter_map(|href| match self.base_url.join(href) {
                Ok(url) => Some(url),
                Err(e) => {
                    self.log
                        .warn(&format!("Skipping unresolvable company link {}: {}", href, e));
                    None
                }
            })
            .collect()
    }

    async fn process_company(
        &self,
        handler: &dyn CompanyHandler,
        company_url: &Url,
        summary: &mut CrawlSummary,
    ) {
        self.log.info(&format!("Processing company: {}", company_url));
        summary.companies += 1;
        match handler.handle(company_url, &self.download_root).await {
            Ok(true) => {
                summary.companies_with_downloads += 1;
                self.log
                    .info(&format!("Successfully downloaded concalls for {}", company_url));
            }
            Ok(false) => self.log.info(&format!(
                "No concalls downloaded for {} (or none found).",
                company_url
            )),
            Err(e) => self.log.error(&format!(
                "Error downloading concalls for {}: {}",
                company_url, e
            )),
        }
    }
}
