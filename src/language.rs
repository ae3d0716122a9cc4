//! Language codes: the supported set, normalization, pair validation and
//! URL-based detection.

use crate::error::{Result, ScanlateError};

/// ISO 639-1 codes the pipeline accepts, with display names.
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("tr", "Turkish"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("zh", "Chinese"),
    ("ar", "Arabic"),
    ("hi", "Hindi"),
    ("pl", "Polish"),
    ("nl", "Dutch"),
    ("sv", "Swedish"),
    ("no", "Norwegian"),
    ("da", "Danish"),
    ("fi", "Finnish"),
    ("cs", "Czech"),
    ("hu", "Hungarian"),
    ("ro", "Romanian"),
    ("bg", "Bulgarian"),
    ("el", "Greek"),
    ("he", "Hebrew"),
    ("th", "Thai"),
    ("vi", "Vietnamese"),
    ("id", "Indonesian"),
    ("ms", "Malay"),
    ("uk", "Ukrainian"),
];

pub fn is_supported(code: &str) -> bool {
    let code = code.to_lowercase();
    SUPPORTED_LANGUAGES.iter().any(|(c, _)| *c == code)
}

/// Display name for a code ("tr" -> "Turkish").
pub fn language_name(code: &str) -> Option<&'static str> {
    let code = code.to_lowercase();
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Both sides supported and distinct.
pub fn validate_pair(source: &str, target: &str) -> Result<()> {
    if !is_supported(source) {
        return Err(ScanlateError::Invariant(format!(
            "unsupported source language: {source}"
        )));
    }
    if !is_supported(target) {
        return Err(ScanlateError::Invariant(format!(
            "unsupported target language: {target}"
        )));
    }
    if source.eq_ignore_ascii_case(target) {
        return Err(ScanlateError::Invariant(
            "source and target languages cannot be the same".to_string(),
        ));
    }
    Ok(())
}

/// Normalize a code or English language name to a supported 2-letter code;
/// unknown inputs default to "en".
pub fn normalize(code: &str) -> String {
    let lowered = code.trim().to_lowercase();
    if lowered.is_empty() {
        return "en".to_string();
    }
    if is_supported(&lowered) {
        return lowered;
    }
    // English names and common 3-letter forms
    let mapped = match lowered.as_str() {
        "english" | "eng" => "en",
        "turkish" | "tur" => "tr",
        "spanish" | "spa" => "es",
        "french" | "fra" => "fr",
        "german" | "deu" => "de",
        "italian" | "ita" => "it",
        "portuguese" | "por" => "pt",
        "russian" | "rus" => "ru",
        "japanese" | "jpn" => "ja",
        "korean" | "kor" => "ko",
        "chinese" | "zho" => "zh",
        _ => "en",
    };
    mapped.to_string()
}

/// Infer the source language from a chapter URL: path segments like `/en/`
/// first, then host hints (`.com.tr` implies Turkish). Defaults to "en".
pub fn detect_from_url(url: &str) -> String {
    let url_lower = url.to_lowercase();

    for (code, _) in SUPPORTED_LANGUAGES {
        if url_lower.contains(&format!("/{code}/")) {
            return (*code).to_string();
        }
    }

    if url_lower.contains(".com.tr") || url_lower.contains("turkish") {
        return "tr".to_string();
    }

    "en".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("tr"), Some("Turkish"));
        assert_eq!(language_name("EN"), Some("English"));
        assert_eq!(language_name("xx"), None);
    }

    #[test]
    fn test_validate_pair() {
        assert!(validate_pair("en", "tr").is_ok());
        assert!(validate_pair("en", "en").is_err());
        assert!(validate_pair("xx", "tr").is_err());
        assert!(validate_pair("en", "yy").is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("TR"), "tr");
        assert_eq!(normalize("turkish"), "tr");
        assert_eq!(normalize("jpn"), "ja");
        assert_eq!(normalize("klingon"), "en");
        assert_eq!(normalize(""), "en");
    }

    #[test]
    fn test_detect_from_url() {
        assert_eq!(detect_from_url("https://www.webtoons.com/en/fantasy/x"), "en");
        assert_eq!(detect_from_url("https://www.webtoons.com/tr/fantezi/x"), "tr");
        assert_eq!(detect_from_url("https://asurascans.com.tr/bolum-5"), "tr");
        assert_eq!(detect_from_url("https://unknown.site/chapter-1"), "en");
    }
}
