use async_trait::async_trait;
use std::path::Path;
use url::Url;

pub mod concalls;
pub mod errors;

pub use concalls::ConcallDownloader;
pub use errors::DownloaderError;

/// Work the crawler performs for each company on a listing page
#[async_trait]
pub trait CompanyHandler: Send + Sync {
    /// Returns whether anything was saved for the company
    async fn handle(
        &self,
        company_url: &Url,
        download_root: &Path,
    ) -> Result<bool, DownloaderError>;
}
