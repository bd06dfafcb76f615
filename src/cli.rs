use clap::{Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "concalls")]
#[command(about = "Download earnings-call transcripts for every company on a Screener screen")]
#[command(version)]
pub struct Cli {
    /// Runs `crawl` with the configured defaults when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Crawl a screen's result pages and download each company's transcripts
    Crawl {
        /// Screen listing URL (defaults to CONCALLS_LISTING_URL or the built-in screen)
        #[arg(short, long)]
        listing_url: Option<Url>,

        /// Root download directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download the transcripts of a single company
    Company {
        /// Company profile URL, e.g. https://www.screener.in/company/INFY/
        url: Url,

        /// Root download directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Crawl {
            listing_url: None,
            output: None,
        })
    }
}

impl Commands {
    /// Fold command-line overrides into the environment-derived config
    pub fn apply_overrides(&self, config: &mut Config) {
        match self {
            Commands::Crawl { listing_url, output } => {
                if let Some(url) = listing_url {
                    config.listing_url = url.clone();
                }
                if let Some(dir) = output {
                    config.download_dir = dir.clone();
                }
            }
            Commands::Company { output, .. } => {
                if let Some(dir) = output {
                    config.download_dir = dir.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_default_crawl() {
        let cli = Cli::try_parse_from(["concalls"]).unwrap();
        assert_eq!(
            cli.command(),
            Commands::Crawl {
                listing_url: None,
                output: None
            }
        );
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::try_parse_from([
            "concalls",
            "crawl",
            "--listing-url",
            "https://www.screener.in/screens/42/other/",
            "--output",
            "/tmp/calls",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.command().apply_overrides(&mut config);
        assert_eq!(config.listing_url.as_str(), "https://www.screener.in/screens/42/other/");
        assert_eq!(config.download_dir, PathBuf::from("/tmp/calls"));
    }

    #[test]
    fn test_company_requires_valid_url() {
        assert!(Cli::try_parse_from(["concalls", "company", "not a url"]).is_err());

        let cli = Cli::try_parse_from([
            "concalls",
            "company",
            "https://www.screener.in/company/INFY/",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.command().apply_overrides(&mut config);
        assert_eq!(config.download_dir, PathBuf::from("downloaded_concalls"));
    }
}
