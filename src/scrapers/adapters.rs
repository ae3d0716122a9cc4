//! Site adapters: selector maps, attribute priorities and filename filters
//! for the hosting sites we know, plus a permissive default for everything
//! else.

use scraper::{Html, Selector};
use tracing::{debug, warn};

/// How the adapter obtains the fully rendered chapter page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Plain HTTP GET is enough.
    Http,
    /// The site sits behind a JS challenge; drive a real browser and
    /// snapshot the DOM once the challenge clears.
    Browser,
}

/// Declarative description of how to read a chapter page on one site.
#[derive(Debug, Clone)]
pub struct SiteAdapter {
    /// Identifier used in logs.
    pub name: &'static str,
    /// Host substrings this adapter claims.
    pub hosts: &'static [&'static str],
    /// CSS selectors for the reader container, in priority order.
    pub container_selectors: &'static [&'static str],
    /// Fallback selectors tried when no container matched.
    pub fallback_selectors: &'static [&'static str],
    /// Image URL attributes, lazy-load attributes before `src`.
    pub image_attrs: &'static [&'static str],
    /// URL substrings that mark logos/ads/banners, not chapter pages.
    pub skip_url_markers: &'static [&'static str],
    pub strategy: FetchStrategy,
}

/// Extensions that count as chapter page images.
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif"];

/// Markers that show a challenge page was served instead of the chapter.
pub const CHALLENGE_MARKERS: &[&str] = &[
    "Checking your browser",
    "Just a moment",
    "cf-challenge",
    "challenge-platform",
    "Verifying you are human",
];

static WEBTOONS: SiteAdapter = SiteAdapter {
    name: "webtoons",
    hosts: &["webtoons.com", "webtoon.com"],
    container_selectors: &["#_imageList", "#viewer"],
    fallback_selectors: &["div.viewer_img", "div[class*=viewer]"],
    image_attrs: &["data-url", "data-src", "src"],
    skip_url_markers: &["logo", "banner", "thumbnail", "ico_"],
    strategy: FetchStrategy::Http,
};

static ASURA: SiteAdapter = SiteAdapter {
    name: "asura",
    hosts: &["asurascans.com.tr", "asuracomic.net", "asuracomic.com"],
    container_selectors: &["div.reading-content"],
    fallback_selectors: &[
        "div[class*=reader]",
        "div[class*=chapter]",
        "div[class*=wp-manga]",
    ],
    image_attrs: &["data-src", "data-lazy-src", "src", "data-url", "data-original"],
    skip_url_markers: &[
        "placeholder",
        "loading",
        "spinner",
        "blank",
        "logo",
        "banner",
    ],
    strategy: FetchStrategy::Browser,
};

/// Default for unknown hosts: generous container guesses over plain HTTP.
static GENERIC: SiteAdapter = SiteAdapter {
    name: "generic",
    hosts: &[],
    container_selectors: &[
        "div.reading-content",
        "div[class*=reader]",
        "div[class*=chapter]",
        "#viewer",
    ],
    fallback_selectors: &["body"],
    image_attrs: &["data-src", "data-lazy-src", "data-url", "src"],
    skip_url_markers: &["logo", "banner", "avatar", "icon", "/ads/", "sprite"],
    strategy: FetchStrategy::Http,
};

/// Pick the adapter for a URL by host substring; unknown hosts get the
/// generic adapter.
pub fn adapter_for_url(url: &str) -> &'static SiteAdapter {
    let url_lower = url.to_lowercase();
    for adapter in [&WEBTOONS, &ASURA] {
        if adapter.hosts.iter().any(|h| url_lower.contains(h)) {
            return adapter;
        }
    }
    debug!("no adapter for {url}, using generic");
    &GENERIC
}

impl SiteAdapter {
    /// Extract ordered, deduplicated image URLs from a chapter page's HTML.
    /// Returns `None` when no reader container matched at all (distinct
    /// from a matched-but-empty container).
    pub fn extract_image_urls(&self, html: &str, page_url: &str) -> Option<Vec<String>> {
        let document = Html::parse_document(html);
        let base = base_url(page_url);

        for (selectors, is_fallback) in [
            (self.container_selectors, false),
            (self.fallback_selectors, true),
        ] {
            for raw_selector in selectors {
                let Ok(selector) = Selector::parse(raw_selector) else {
                    warn!("invalid selector {raw_selector}");
                    continue;
                };
                let Some(container) = document.select(&selector).next() else {
                    continue;
                };

                let img_selector = Selector::parse("img").expect("static selector");
                let mut urls = Vec::new();
                for img in container.select(&img_selector) {
                    let Some(candidate) = self
                        .image_attrs
                        .iter()
                        .find_map(|attr| img.value().attr(attr))
                    else {
                        continue;
                    };
                    if let Some(url) = self.normalize_image_url(candidate, &base) {
                        if !urls.contains(&url) {
                            urls.push(url);
                        }
                    }
                }

                if !urls.is_empty() {
                    debug!(
                        "adapter {} found {} images via {raw_selector}{}",
                        self.name,
                        urls.len(),
                        if is_fallback { " (fallback)" } else { "" }
                    );
                    return Some(urls);
                }
            }
        }
        None
    }

    /// Resolve relative forms and apply the skip filters.
    fn normalize_image_url(&self, raw: &str, base: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let url = if raw.starts_with("//") {
            format!("https:{raw}")
        } else if raw.starts_with('/') {
            format!("{base}{raw}")
        } else if raw.starts_with("http") {
            raw.to_string()
        } else {
            format!("{base}/{raw}")
        };

        let url_lower = url.to_lowercase();
        if self.skip_url_markers.iter().any(|m| url_lower.contains(m)) {
            return None;
        }
        // Strip a query string before checking the extension
        let path = url_lower.split('?').next().unwrap_or(&url_lower);
        if !IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return None;
        }
        Some(url)
    }
}

/// scheme://host portion of a URL, for resolving site-relative paths.
fn base_url(page_url: &str) -> String {
    url::Url::parse(page_url)
        .ok()
        .and_then(|u| {
            u.host_str()
                .map(|host| format!("{}://{host}", u.scheme()))
        })
        .unwrap_or_else(|| page_url.trim_end_matches('/').to_string())
}

/// Whether a DOM snapshot still shows an unsolved challenge page.
pub fn looks_like_challenge(html: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|m| html.contains(m))
}
