//! Company transcript downloader
//!
//! Opens a company profile page, collects the PDF links in its Concalls
//! section and downloads each one by clicking it on a fresh page.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use super::{CompanyHandler, DownloaderError};
use crate::browser::{close_page, BrowserEngine, BrowserError, Page, Session};
use crate::config::{Config, Timeouts};
use crate::dom::{self, DomError};
use crate::logging::Log;
use crate::markup::Markup;
use crate::models::{
    deduplicate_filename, sanitize_filename, CompanyRef, DownloadReport, TranscriptLink,
};

pub struct ConcallDownloader {
    engine: Arc<dyn BrowserEngine>,
    markup: Markup,
    timeouts: Timeouts,
    log: Arc<dyn Log>,
}

impl ConcallDownloader {
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        markup: Markup,
        timeouts: Timeouts,
        log: Arc<dyn Log>,
    ) -> Self {
        Self {
            engine,
            markup,
            timeouts,
            log,
        }
    }

    pub fn from_config(engine: Arc<dyn BrowserEngine>, config: &Config, log: Arc<dyn Log>) -> Self {
        Self::new(engine, config.markup.clone(), config.timeouts.clone(), log)
    }

    /// Download every transcript of `company_url` into `<download_root>/<company_id>/`.
    ///
    /// Returns `true` iff at least one file was saved. Failures are logged,
    /// never returned.
    pub async fn download(&self, company_url: &str, download_root: &Path) -> bool {
        match self.download_report(company_url, download_root).await {
            Ok(report) => report.downloaded_any(),
            Err(_) => false,
        }
    }

    /// Like [`download`](Self::download) but with the per-link outcome.
    ///
    /// Errors are the fatal-to-call cases; they have already been logged.
    pub async fn download_report(
        &self,
        company_url: &str,
        download_root: &Path,
    ) -> Result<DownloadReport, DownloaderError> {
        let tag = format!("[{}]", company_url);

        self.log.info(&format!("{} Starting browser session...", tag));
        let session = match Session::open(self.engine.as_ref(), self.log.clone()).await {
            Ok(session) => session,
            Err(e) => {
                self.log
                    .error(&format!("{} Failed to initialize browser session: {}", tag, e));
                return Err(e.into());
            }
        };
        self.log.info(&format!("{} Browser session started.", tag));

        let result = self.run(&session, &tag, company_url, download_root).await;
        if let Err(e) = &result {
            self.log_fatal(&tag, e);
        }

        session.release().await;
        self.log.info(&format!(
            "{} Browser closed. Finished processing this company.",
            tag
        ));
        result
    }

    fn log_fatal(&self, tag: &str, error: &DownloaderError) {
        match error {
            DownloaderError::Dom(DomError::SectionNotFound(_)) => {
                self.log.warn(&format!("{} 'Concalls' section heading not found.", tag))
            }
            DownloaderError::Dom(DomError::ContainerNotFound(_)) => self.log.warn(&format!(
                "{} Could not find the parent element for 'Concalls' section.",
                tag
            )),
            DownloaderError::NoTranscriptLinks => self.log.info(&format!(
                "{} No PDF transcript URLs found in 'Concalls' section.",
                tag
            )),
            other => self.log.error(&format!("{} {}", tag, other)),
        }
    }

    async fn run(
        &self,
        session: &Session,
        tag: &str,
        company_url: &str,
        download_root: &Path,
    ) -> Result<DownloadReport, DownloaderError> {
        let url = Url::parse(company_url).map_err(|e| BrowserError::Navigation {
            url: company_url.to_string(),
            reason: e.to_string(),
        })?;

        let mut page = session.new_page().await?;
        let links = self.collect_links(page.as_mut(), tag, &url).await;
        close_page(page.as_mut(), self.log.as_ref(), company_url).await;
        let links = links?;

        let company = CompanyRef::from_url(url)?;
        let company_dir = company.output_dir(download_root);
        self.log.info(&format!(
            "{} Starting transcript downloads to {} (if any PDFs are downloaded)...",
            tag,
            company_dir.display()
        ));

        let mut report = DownloadReport::new(company, links.len());
        for link in links {
            let mut page = match session.new_page().await {
                Ok(page) => page,
                Err(e) => {
                    self.log.error(&format!(
                        "{} Failed to download {}. Error: {}",
                        tag, link.href, e
                    ));
                    report.failed.push(link);
                    continue;
                }
            };

            self.log.info(&format!("{} Attempting to download: {}", tag, link.href));
            let created_dir = !report.downloaded_any() && !company_dir.exists();
            let outcome = self
                .fetch_transcript(page.as_mut(), tag, &report, &link, &company_dir)
                .await;
            close_page(page.as_mut(), self.log.as_ref(), &link.href).await;

            match outcome {
                Ok(path) => {
                    self.log.info(&format!(
                        "{} Successfully downloaded and saved: {}",
                        tag,
                        path.display()
                    ));
                    report.saved.push(path);
                }
                Err(e) => {
                    self.log.error(&format!(
                        "{} Failed to download {}. Error: {}",
                        tag, link.href, e
                    ));
                    if created_dir && !report.downloaded_any() && company_dir.exists() {
                        self.remove_empty_dir(tag, &company_dir).await;
                    }
                    report.failed.push(link);
                }
            }
        }

        if report.downloaded_any() {
            self.log.info(&format!(
                "{} Finished transcript downloads for {}. {} links processed, {} saved.",
                tag,
                company_url,
                report.links_found,
                report.saved.len()
            ));
        } else {
            self.log.info(&format!(
                "{} No PDFs were downloaded for {}.",
                tag, company_url
            ));
        }
        Ok(report)
    }

    /// Drop a directory this call created for a save that then failed
    async fn remove_empty_dir(&self, tag: &str, dir: &Path) {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => self.log.debug(&format!(
                "{} Removed empty download directory: {}",
                tag,
                dir.display()
            )),
            Err(e) => self.log.warn(&format!(
                "{} Could not remove empty download directory {}: {}",
                tag,
                dir.display(),
                e
            )),
        }
    }

    async fn collect_links(
        &self,
        page: &mut dyn Page,
        tag: &str,
        url: &Url,
    ) -> Result<Vec<TranscriptLink>, DownloaderError> {
        self.log.info(&format!("{} Navigating to company page: {}", tag, url));
        page.goto(url, self.timeouts.navigation()).await?;
        self.log.info(&format!("{} Successfully navigated to company page.", tag));

        self.log.info(&format!(
            "{} Attempting to find 'Concalls' section and extract links...",
            tag
        ));
        let html = page.content().await?;
        let hrefs = dom::transcript_links(&html, &self.markup)?;
        if hrefs.is_empty() {
            return Err(DownloaderError::NoTranscriptLinks);
        }

        self.log.info(&format!(
            "{} Successfully extracted {} PDF transcript URLs.",
            tag,
            hrefs.len()
        ));
        Ok(hrefs.into_iter().map(TranscriptLink::new).collect())
    }

    /// Reload the company page on `page`, click `link` and save what it downloads
    async fn fetch_transcript(
        &self,
        page: &mut dyn Page,
        tag: &str,
        report: &DownloadReport,
        link: &TranscriptLink,
        company_dir: &Path,
    ) -> Result<PathBuf, DownloaderError> {
        page.goto(&report.company.url, self.timeouts.navigation()).await?;
        page.wait_for_selector(&self.markup.section_heading, self.timeouts.element_wait())
            .await?;

        let locator = self.markup.transcript_locator(&link.href);
        page.wait_for_selector(&locator, self.timeouts.element_wait()).await?;

        let download = page.expect_download(&locator, self.timeouts.download()).await?;
        self.log.debug(&format!(
            "{} Download event triggered for {}, suggested filename: {:?}",
            tag,
            link.href,
            download.suggested_filename()
        ));

        let filename = match download.suggested_filename().and_then(sanitize_filename) {
            Some(name) => name,
            None => {
                self.log.warn(&format!(
                    "{} No suggested filename for {}. Deriving from URL.",
                    tag, link.href
                ));
                link.fallback_filename()
            }
        };

        if !company_dir.exists() {
            tokio::fs::create_dir_all(company_dir)
                .await
                .map_err(|source| DownloaderError::CreateDir {
                    path: company_dir.to_path_buf(),
                    source,
                })?;
            self.log.info(&format!(
                "{} Created download directory: {}",
                tag,
                company_dir.display()
            ));
        }

        // Two links of one company may suggest the same name.
        let saved_names: Vec<String> = report
            .saved
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        let save_path = company_dir.join(deduplicate_filename(&filename, &saved_names));
        download
            .save_as(&save_path)
            .await
            .map_err(|source| DownloaderError::Save {
                path: save_path.clone(),
                source,
            })?;
        Ok(save_path)
    }
}

#[async_trait]
impl CompanyHandler for ConcallDownloader {
    async fn handle(
        &self,
        company_url: &Url,
        download_root: &Path,
    ) -> Result<bool, DownloaderError> {
        Ok(self.download(company_url.as_str(), download_root).await)
    }
}
