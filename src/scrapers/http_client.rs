//! HTTP client for chapter pages and image downloads.
//!
//! Thin wrapper over reqwest: browser-like user agent, per-request Referer
//! (image CDNs check it against the chapter URL), bounded retries with a
//! small backoff, and parallel image fetching that preserves order.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::config::ScraperSettings;
use crate::error::{Result, ScanlateError};

/// HTTP client with retry support.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(settings: &ScraperSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()
            .map_err(|e| ScanlateError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_retries: settings.max_retries,
        })
    }

    /// Fetch a chapter page as HTML.
    pub async fn get_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScanlateError::Upstream(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScanlateError::Upstream(format!("GET {url}: HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| ScanlateError::Upstream(format!("read body of {url}: {e}")))
    }

    /// Download one image with retries and the chapter URL as Referer.
    pub async fn download_image(&self, img_url: &str, referer: &str) -> Result<Vec<u8>> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Small linear backoff between attempts
                tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                debug!("retrying image {img_url} (attempt {attempt})");
            }
            match self.try_download(img_url, referer).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("image download failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| ScanlateError::Upstream(format!("download failed: {img_url}"))))
    }

    async fn try_download(&self, img_url: &str, referer: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(img_url)
            .header(reqwest::header::REFERER, referer)
            .send()
            .await
            .map_err(|e| ScanlateError::Upstream(format!("GET {img_url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScanlateError::Upstream(format!(
                "GET {img_url}: HTTP {status}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScanlateError::Upstream(format!("read {img_url}: {e}")))?;
        if bytes.is_empty() {
            return Err(ScanlateError::Upstream(format!("empty body from {img_url}")));
        }
        Ok(bytes.to_vec())
    }

    /// Download many images concurrently, preserving input order. Failed
    /// slots come back as `None`; callers decide how many is too many.
    pub async fn download_images(
        &self,
        urls: &[String],
        referer: &str,
    ) -> Vec<Option<Vec<u8>>> {
        let futures = urls.iter().map(|url| {
            let client = self.clone();
            let url = url.clone();
            let referer = referer.to_string();
            async move { client.download_image(&url, &referer).await.ok() }
        });
        futures::future::join_all(futures).await
    }
}
