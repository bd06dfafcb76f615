use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use screener_concalls::browser::{ChromeEngine, HttpEngine};
use screener_concalls::cli::{Cli, Commands};
use screener_concalls::config::EngineKind;
use screener_concalls::{logging, BrowserEngine, Config, ConcallDownloader, Crawler, TracingLog};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command();

    let mut config = Config::from_env()?;
    command.apply_overrides(&mut config);
    config.validate()?;

    logging::init(&config.logging.download_log, &config.logging.crawl_log)?;

    let engine: Arc<dyn BrowserEngine> = match config.engine {
        EngineKind::Chrome => Arc::new(ChromeEngine::new(config.chrome.clone())),
        EngineKind::Http => Arc::new(HttpEngine::new(config.http.clone())),
    };
    info!("Using the {} browser engine", config.engine);
    let downloader =
        ConcallDownloader::from_config(engine.clone(), &config, Arc::new(TracingLog::downloader()));

    match &command {
        Commands::Crawl { .. } => {
            info!("Crawling {} into {}", config.listing_url, config.download_dir.display());
            let crawler = Crawler::new(engine, &config, Arc::new(TracingLog::crawler()));
            let summary = crawler.run(&downloader).await;
            info!(
                "Processed {} companies across {} pages, {} with new transcripts",
                summary.companies, summary.pages, summary.companies_with_downloads
            );
        }

        Commands::Company { url, .. } => {
            match downloader.download_report(url.as_str(), &config.download_dir).await {
                Ok(report) => info!(
                    "Saved {} of {} transcripts for {}",
                    report.saved.len(),
                    report.links_found,
                    report.company.id
                ),
                Err(e) => error!("Download failed for {}: {}", url, e),
            }
        }
    }

    Ok(())
}
