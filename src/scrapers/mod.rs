//! Site-aware chapter-page fetching.
//!
//! The scraper detects the hosting site from the URL host, delegates to a
//! declarative [`SiteAdapter`] for selectors and filters, fetches the page
//! over plain HTTP or a real browser (for JS-challenge sites), and downloads
//! the discovered images in parallel with the chapter URL as Referer.

pub mod adapters;
mod browser;
mod http_client;

pub use adapters::{adapter_for_url, FetchStrategy, SiteAdapter};
pub use browser::BrowserFetcher;
pub use http_client::HttpClient;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ScraperSettings;
use crate::error::{Result, ScanlateError};

/// Below this success ratio a chapter fetch counts as partial and fails.
const MIN_FETCH_RATIO: f64 = 0.5;

/// Summary of a chapter URL without downloading page bytes.
#[derive(Debug, Clone)]
pub struct ChapterInfo {
    pub title: String,
    pub page_count: usize,
}

/// Fetches ordered page bytes for a chapter URL.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Fetch all pages of a chapter, in reading order.
    async fn fetch(&mut self, chapter_url: &str) -> Result<Vec<Vec<u8>>>;

    /// Inspect a chapter without downloading its pages.
    async fn analyze(&mut self, chapter_url: &str) -> Result<ChapterInfo>;

    /// Release held resources (browser, connections). Must be called on
    /// both success and failure paths.
    async fn close(&mut self);
}

/// Default scraper: adapter table + HTTP client + lazily-launched browser.
pub struct SiteScraper {
    http: HttpClient,
    browser: BrowserFetcher,
}

impl SiteScraper {
    pub fn new(settings: ScraperSettings) -> Result<Self> {
        let http = HttpClient::new(&settings)?;
        let browser = BrowserFetcher::new(settings);
        Ok(Self { http, browser })
    }

    /// Fetch the chapter page HTML using the adapter's strategy.
    async fn fetch_page_html(&mut self, adapter: &SiteAdapter, url: &str) -> Result<String> {
        match adapter.strategy {
            FetchStrategy::Http => self.http.get_html(url).await,
            FetchStrategy::Browser => self.browser.fetch_html(url).await,
        }
    }

    /// Discover image URLs for a chapter.
    async fn discover_image_urls(&mut self, chapter_url: &str) -> Result<Vec<String>> {
        let adapter = adapter_for_url(chapter_url);
        info!("fetching chapter via {} adapter: {chapter_url}", adapter.name);

        let html = self.fetch_page_html(adapter, chapter_url).await?;
        adapter
            .extract_image_urls(&html, chapter_url)
            .ok_or_else(|| {
                ScanlateError::NotFound(format!(
                    "reader container not found on {chapter_url} \
                     (tried primary and fallback selectors)"
                ))
            })
    }
}

#[async_trait]
impl Scraper for SiteScraper {
    async fn fetch(&mut self, chapter_url: &str) -> Result<Vec<Vec<u8>>> {
        let urls = self.discover_image_urls(chapter_url).await?;
        if urls.is_empty() {
            return Err(ScanlateError::NotFound(format!(
                "no chapter images on {chapter_url}"
            )));
        }

        let downloads = self.http.download_images(&urls, chapter_url).await;
        let fetched = downloads.iter().filter(|d| d.is_some()).count();
        let ratio = fetched as f64 / urls.len() as f64;
        if ratio < MIN_FETCH_RATIO {
            return Err(ScanlateError::Upstream(format!(
                "partial fetch: only {fetched}/{} images downloaded from {chapter_url}",
                urls.len()
            )));
        }
        if fetched < urls.len() {
            warn!(
                "dropped {} failed pages from {chapter_url}",
                urls.len() - fetched
            );
        }

        Ok(downloads.into_iter().flatten().collect())
    }

    async fn analyze(&mut self, chapter_url: &str) -> Result<ChapterInfo> {
        let urls = self.discover_image_urls(chapter_url).await?;
        Ok(ChapterInfo {
            title: title_from_url(chapter_url),
            page_count: urls.len(),
        })
    }

    async fn close(&mut self) {
        self.browser.close().await;
    }
}

/// Readable chapter title derived from the URL's last path segment.
pub fn title_from_url(url: &str) -> String {
    let segment = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("chapter");
    let cleaned = segment.split(['?', '#']).next().unwrap_or(segment);
    cleaned.replace(['_', '-'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_url() {
        assert_eq!(title_from_url("https://x.com/series/chapter-12"), "chapter 12");
        assert_eq!(title_from_url("https://x.com/series/episode_3/"), "episode 3");
        assert_eq!(
            title_from_url("https://x.com/viewer?episode_no=4"),
            "viewer"
        );
    }
}
