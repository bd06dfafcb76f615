//! Centralized configuration management for screener-concalls

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::markup::Markup;

pub const DEFAULT_LISTING_URL: &str =
    "https://www.screener.in/screens/2804103/quality-prmoter-holding-increase/";
pub const DEFAULT_BASE_URL: &str = "https://www.screener.in";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloaded_concalls";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Screen whose result pages are crawled
    pub listing_url: Url,
    /// Base that relative company hrefs are resolved against
    pub base_url: Url,
    /// Root directory for per-company transcript folders
    pub download_dir: PathBuf,
    pub timeouts: Timeouts,
    /// Engine driving the browser sessions
    pub engine: EngineKind,
    pub chrome: ChromeConfig,
    pub http: HttpConfig,
    pub logging: LogConfig,
    pub markup: Markup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Headless Chrome over the DevTools protocol
    Chrome,
    /// Plain HTTP requests, no script execution
    Http,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(EngineKind::Chrome),
            "http" => Ok(EngineKind::Http),
            other => Err(format!("Unknown browser engine '{}' (expected chrome or http)", other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Chrome => write!(f, "chrome"),
            EngineKind::Http => write!(f, "http"),
        }
    }
}

/// Chrome launch options
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    /// Browser binary, detected from the usual install locations when unset
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Pass `--no-sandbox`, needed when running as root in containers
    pub no_sandbox: bool,
    /// Overrides Chrome's own user agent when set
    pub user_agent: Option<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            no_sandbox: false,
            user_agent: None,
        }
    }
}

/// Bounds for every wait, in seconds
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Company profile navigation
    pub navigation_secs: u64,
    /// Listing page navigation
    pub listing_navigation_secs: u64,
    /// Element waits on the company page
    pub element_wait_secs: u64,
    /// Result table wait on each listing page
    pub table_wait_secs: u64,
    /// Loading the next listing page after a click
    pub page_load_secs: u64,
    /// Download completion
    pub download_secs: u64,
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// User agent string
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub download_log: PathBuf,
    pub crawl_log: PathBuf,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_secs: 60,
            listing_navigation_secs: 90,
            element_wait_secs: 10,
            table_wait_secs: 30,
            page_load_secs: 30,
            download_secs: 120,
        }
    }
}

impl Timeouts {
    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }

    pub fn listing_navigation(&self) -> Duration {
        Duration::from_secs(self.listing_navigation_secs)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn table_wait(&self) -> Duration {
        Duration::from_secs(self.table_wait_secs)
    }

    pub fn page_load(&self) -> Duration {
        Duration::from_secs(self.page_load_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            download_log: PathBuf::from("download_log.txt"),
            crawl_log: PathBuf::from("main_scraper_log.txt"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listing_url: Url::parse(DEFAULT_LISTING_URL).expect("default listing URL is valid"),
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            timeouts: Timeouts::default(),
            engine: EngineKind::Chrome,
            chrome: ChromeConfig::default(),
            http: HttpConfig::default(),
            logging: LogConfig::default(),
            markup: Markup::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let listing_url = parse_url_var("CONCALLS_LISTING_URL")?.unwrap_or(defaults.listing_url);
        let base_url = parse_url_var("CONCALLS_BASE_URL")?.unwrap_or(defaults.base_url);

        let download_dir = std::env::var("CONCALLS_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.download_dir);

        let d = defaults.timeouts;
        let timeouts = Timeouts {
            navigation_secs: parse_env_var("CONCALLS_NAVIGATION_TIMEOUT_SECS")?
                .unwrap_or(d.navigation_secs),
            listing_navigation_secs: parse_env_var("CONCALLS_LISTING_TIMEOUT_SECS")?
                .unwrap_or(d.listing_navigation_secs),
            element_wait_secs: parse_env_var("CONCALLS_ELEMENT_TIMEOUT_SECS")?
                .unwrap_or(d.element_wait_secs),
            table_wait_secs: parse_env_var("CONCALLS_TABLE_TIMEOUT_SECS")?
                .unwrap_or(d.table_wait_secs),
            page_load_secs: parse_env_var("CONCALLS_PAGE_LOAD_TIMEOUT_SECS")?
                .unwrap_or(d.page_load_secs),
            download_secs: parse_env_var("CONCALLS_DOWNLOAD_TIMEOUT_SECS")?
                .unwrap_or(d.download_secs),
        };

        let engine = match std::env::var("CONCALLS_BROWSER") {
            Ok(value) => value
                .parse::<EngineKind>()
                .map_err(|e| {
                    anyhow!("Failed to parse environment variable CONCALLS_BROWSER: {}", e)
                })?,
            Err(_) => defaults.engine,
        };

        let user_agent = std::env::var("CONCALLS_USER_AGENT").ok();
        let chrome = ChromeConfig {
            executable: std::env::var("CONCALLS_CHROME_PATH").ok().map(PathBuf::from),
            headless: parse_env_var("CONCALLS_HEADLESS")?.unwrap_or(defaults.chrome.headless),
            no_sandbox: parse_env_var("CONCALLS_CHROME_NO_SANDBOX")?
                .unwrap_or(defaults.chrome.no_sandbox),
            user_agent: user_agent.clone(),
        };
        let http = HttpConfig {
            user_agent: user_agent.unwrap_or(defaults.http.user_agent),
        };

        let logging = LogConfig {
            download_log: std::env::var("CONCALLS_DOWNLOAD_LOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.logging.download_log),
            crawl_log: std::env::var("CONCALLS_CRAWL_LOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.logging.crawl_log),
        };

        let markup = match std::env::var("CONCALLS_MARKUP_FILE") {
            Ok(path) => Markup::from_file(&PathBuf::from(path))?,
            Err(_) => defaults.markup,
        };

        Ok(Config {
            listing_url,
            base_url,
            download_dir,
            timeouts,
            engine,
            chrome,
            http,
            logging,
            markup,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("listing URL", &self.listing_url), ("base URL", &self.base_url)] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(anyhow!("The {} must be http(s): {}", name, url));
            }
        }

        let t = &self.timeouts;
        let all_timeouts = [
            t.navigation_secs,
            t.listing_navigation_secs,
            t.element_wait_secs,
            t.table_wait_secs,
            t.page_load_secs,
            t.download_secs,
        ];
        if all_timeouts.contains(&0) {
            return Err(anyhow!("Timeouts must be at least one second: {:?}", t));
        }

        if let Some(path) = &self.chrome.executable {
            if self.engine == EngineKind::Chrome && !path.exists() {
                return Err(anyhow!("Chrome executable not found: {}", path.display()));
            }
        }

        if self.markup.next_controls.is_empty() {
            return Err(anyhow!("At least one pagination selector is required"));
        }

        Ok(())
    }
}

/// Helper function to parse environment variable as a specific type
fn parse_env_var<T>(var_name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + std::error::Error + 'static,
{
    match std::env::var(var_name) {
        Ok(val) => val.parse().map(Some).with_context(|| {
            format!("Failed to parse environment variable {} = '{}'", var_name, val)
        }),
        Err(_) => Ok(None),
    }
}

fn parse_url_var(var_name: &str) -> Result<Option<Url>> {
    parse_env_var::<Url>(var_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.listing_url.as_str(), DEFAULT_LISTING_URL);
        assert_eq!(config.download_dir, PathBuf::from("downloaded_concalls"));
        assert_eq!(config.timeouts.navigation(), Duration::from_secs(60));
        assert_eq!(config.timeouts.download(), Duration::from_secs(120));
        assert!(config.timeouts.download() > config.timeouts.navigation());
        assert_eq!(config.logging.download_log, PathBuf::from("download_log.txt"));
        assert_eq!(config.logging.crawl_log, PathBuf::from("main_scraper_log.txt"));
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        config.validate().unwrap();

        let mut zero = Config::default();
        zero.timeouts.element_wait_secs = 0;
        assert!(zero.validate().is_err());

        let mut ftp = Config::default();
        ftp.listing_url = Url::parse("ftp://example.com/screen").unwrap();
        assert!(ftp.validate().is_err());
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("chrome".parse::<EngineKind>(), Ok(EngineKind::Chrome));
        assert_eq!(" HTTP ".parse::<EngineKind>(), Ok(EngineKind::Http));
        assert!("firefox".parse::<EngineKind>().is_err());
        assert_eq!(Config::default().engine, EngineKind::Chrome);
        assert!(Config::default().chrome.headless);
    }

    #[test]
    fn test_missing_chrome_binary_is_rejected() {
        let mut config = Config::default();
        config.chrome.executable = Some(PathBuf::from("/nonexistent/chrome"));
        assert!(config.validate().is_err());

        config.engine = EngineKind::Http;
        config.validate().unwrap();
    }

    #[test]
    fn test_relative_company_href_resolution() {
        let config = Config::default();
        let url = config.base_url.join("/company/INFY/").unwrap();
        assert_eq!(url.as_str(), "https://www.screener.in/company/INFY/");
    }
}
