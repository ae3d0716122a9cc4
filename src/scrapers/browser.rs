//! Browser-based page fetcher for sites behind JS challenges.
//!
//! Drives Chromium over CDP, waits a bounded time for the challenge to
//! clear, then snapshots the DOM. One fetcher per scraper instance; the
//! browser is launched lazily and must be torn down via [`BrowserFetcher::close`]
//! on every exit path.

#[cfg(feature = "browser")]
use std::sync::Arc;
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use anyhow::Context;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tracing::{debug, info};

use crate::config::ScraperSettings;
use crate::error::{Result, ScanlateError};

#[cfg(feature = "browser")]
use super::adapters::looks_like_challenge;

/// Browser-driven fetcher with lazy launch.
#[cfg(feature = "browser")]
pub struct BrowserFetcher {
    settings: ScraperSettings,
    browser: Option<Arc<Mutex<Browser>>>,
}

#[cfg(feature = "browser")]
impl BrowserFetcher {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(settings: ScraperSettings) -> Self {
        Self {
            settings,
            browser: None,
        }
    }

    fn find_chrome() -> anyhow::Result<std::path::PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("found Chrome at {path}");
                return Ok(p.to_path_buf());
            }
        }
        for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }
        Err(anyhow::anyhow!(
            "Chrome/Chromium not found; install it or use a site without bot protection"
        ))
    }

    /// Launch the browser if not already running.
    async fn ensure_browser(&mut self) -> anyhow::Result<()> {
        if self.browser.is_some() {
            return Ok(());
        }

        info!("launching browser (headless={})", self.settings.headless);
        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !self.settings.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.settings.user_agent));

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(Arc::new(Mutex::new(browser)));
        Ok(())
    }

    /// Navigate to the chapter URL, wait out the challenge, and return the
    /// DOM snapshot. Fails with `Blocked` when challenge markers are still
    /// present after the wait budget.
    pub async fn fetch_html(&mut self, url: &str) -> Result<String> {
        self.ensure_browser()
            .await
            .map_err(|e| ScanlateError::Upstream(e.to_string()))?;

        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ScanlateError::Upstream("browser not initialized".to_string()))?
            .clone();
        let browser = browser.lock().await;

        let page = browser
            .new_page(url)
            .await
            .map_err(|e| ScanlateError::Upstream(format!("navigation to {url} failed: {e}")))?;

        // Poll the DOM until the challenge clears or the budget runs out
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.settings.challenge_timeout_secs);
        let mut content;
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            content = page
                .content()
                .await
                .map_err(|e| ScanlateError::Upstream(format!("snapshot of {url} failed: {e}")))?;
            if !looks_like_challenge(&content) {
                debug!("challenge cleared for {url}");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
        }

        let _ = page.close().await;

        if looks_like_challenge(&content) {
            return Err(ScanlateError::Blocked(format!(
                "challenge not solved within {}s for {url}",
                self.settings.challenge_timeout_secs
            )));
        }
        Ok(content)
    }

    /// Tear the browser down. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(browser) = self.browser.take() {
            let mut browser = browser.lock().await;
            let _ = browser.close().await;
            info!("browser closed");
        }
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher {
    #[allow(dead_code)]
    settings: ScraperSettings,
}

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub fn new(settings: ScraperSettings) -> Self {
        Self { settings }
    }

    pub async fn fetch_html(&mut self, _url: &str) -> Result<String> {
        Err(ScanlateError::Upstream(
            "browser support not compiled; rebuild with: cargo build --features browser"
                .to_string(),
        ))
    }

    pub async fn close(&mut self) {}
}
