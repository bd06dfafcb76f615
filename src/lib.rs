//! Crawl a Screener screen and download the earnings-call transcripts linked
//! from each listed company's "Concalls" section.

pub mod browser;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod dom;
pub mod downloader;
pub mod logging;
pub mod markup;
pub mod models;

pub use browser::{BrowserEngine, BrowserError, Session};
pub use config::Config;
pub use crawler::{CrawlSummary, Crawler, StopReason};
pub use downloader::{CompanyHandler, ConcallDownloader, DownloaderError};
pub use logging::{Log, MemoryLog, TracingLog};
