//! Chapter URL templating.
//!
//! Given one sample chapter URL, recognizes the numeric segment
//! (`episode-N`, `chapter-N`, `bolum-N`, `ep-N`, `ch-N`, `episode_no=N`,
//! `chapter_no=N`, `/N/`) and substitutes other chapter numbers into it.
//! The same patterns are used in reverse to extract a chapter number from a
//! URL when publishing.

use std::sync::LazyLock;

use regex::Regex;

/// Numeric-segment patterns, most specific first.
static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)episode_no=(\d+)",
        r"(?i)chapter_no=(\d+)",
        r"(?i)episode[_-]?(\d+)",
        r"(?i)chapter[_-]?(\d+)",
        r"(?i)bolum[_-]?(\d+)",
        r"(?i)\bep[_-]?(\d+)",
        r"(?i)\bch[_-]?(\d+)",
        r"/(\d+)/",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("URL pattern should compile"))
    .collect()
});

/// Produce one URL per chapter number by substituting the sample URL's
/// numeric segment. When no template matches, `/chapter-N` is appended.
pub fn generate_chapter_urls(sample_url: &str, chapter_numbers: &[u32]) -> Vec<String> {
    let template = URL_PATTERNS.iter().find(|re| re.is_match(sample_url));

    chapter_numbers
        .iter()
        .map(|number| match template {
            Some(re) => re
                .replace(sample_url, |caps: &regex::Captures<'_>| {
                    caps[0].replace(&caps[1], &number.to_string())
                })
                .into_owned(),
            None => {
                let base = sample_url.trim_end_matches('/');
                format!("{base}/chapter-{number}")
            }
        })
        .collect()
}

/// Extract the chapter number from a URL via the same templates.
pub fn extract_chapter_number(url: &str) -> Option<u32> {
    URL_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_template() {
        let urls = generate_chapter_urls("https://site.com/series/episode-7/viewer", &[1, 2]);
        assert_eq!(
            urls,
            vec![
                "https://site.com/series/episode-1/viewer",
                "https://site.com/series/episode-2/viewer",
            ]
        );
    }

    #[test]
    fn test_query_parameter_template() {
        let urls = generate_chapter_urls(
            "https://www.webtoons.com/en/x/viewer?title_no=9&episode_no=364",
            &[10],
        );
        assert_eq!(
            urls,
            vec!["https://www.webtoons.com/en/x/viewer?title_no=9&episode_no=10"]
        );
    }

    #[test]
    fn test_bolum_template() {
        let urls = generate_chapter_urls("https://asurascans.com.tr/seri-bolum-12", &[3]);
        assert_eq!(urls, vec!["https://asurascans.com.tr/seri-bolum-3"]);
    }

    #[test]
    fn test_plain_number_segment() {
        let urls = generate_chapter_urls("https://site.com/series/42/", &[5]);
        assert_eq!(urls, vec!["https://site.com/series/5/"]);
    }

    #[test]
    fn test_no_template_appends_chapter() {
        let urls = generate_chapter_urls("https://site.com/series/", &[9]);
        assert_eq!(urls, vec!["https://site.com/series/chapter-9"]);
    }

    #[test]
    fn test_extract_chapter_number() {
        assert_eq!(
            extract_chapter_number("https://site.com/series/chapter-20"),
            Some(20)
        );
        assert_eq!(
            extract_chapter_number("https://site.com/viewer?episode_no=364"),
            Some(364)
        );
        assert_eq!(extract_chapter_number("https://site.com/seri-bolum-5"), Some(5));
        assert_eq!(extract_chapter_number("https://site.com/ch-3"), Some(3));
        assert_eq!(extract_chapter_number("https://site.com/about"), None);
    }
}
