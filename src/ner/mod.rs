//! Proper-noun detection for glossary seeding.
//!
//! Provides a `NerBackend` trait for pluggable extraction backends and a
//! built-in `HeuristicNerBackend` that scores capitalization patterns.
//! A linguistic-model backend for a specific source language can be swapped
//! in behind the same trait.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches below this confidence are discarded.
pub const MIN_CONFIDENCE: f32 = 0.3;

/// A detected proper-noun span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
}

/// Trait for pluggable NER backends.
pub trait NerBackend: Send + Sync {
    /// Human-readable backend identifier (e.g. "heuristic").
    fn backend_id(&self) -> &str;

    /// Detect proper-noun spans in one text.
    fn detect(&self, text: &str) -> Vec<NameMatch>;

    /// Unique names across a list of texts, in first-seen order.
    fn extract_all(&self, texts: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for text in texts {
            for m in self.detect(text) {
                if seen.insert(m.name.to_lowercase()) {
                    names.push(m.name);
                }
            }
        }
        names
    }
}

static CAPITALIZED_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").expect("name pattern should compile")
});

static ALL_CAPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,}\b").expect("caps pattern should compile"));

// Words that look like names but aren't.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "be", "been", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "must", "can", "this",
        "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "what", "which",
        "who", "where", "when", "why", "how", "all", "each", "every", "some", "any", "no", "not",
        "yes", "ok", "okay", "oh", "ah", "hey", "well", "so", "then", "now", "here", "there",
        "wait", "stop", "look", "let", "go",
    ]
    .into_iter()
    .collect()
});

// Honorifics kept as part of the following name.
static TITLES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ["mr", "mrs", "ms", "miss", "dr", "prof", "sir", "madam", "lord", "lady"]
        .into_iter()
        .collect()
});

/// Capitalization-heuristic backend with stopword and title filtering.
pub struct HeuristicNerBackend {
    min_length: usize,
    max_length: usize,
}

impl HeuristicNerBackend {
    pub fn new() -> Self {
        Self {
            min_length: 2,
            max_length: 50,
        }
    }

    fn score(name: &str, text: &str, start: usize, end: usize) -> f32 {
        let mut confidence: f32 = 0.5;

        let words: Vec<&str> = name.split_whitespace().collect();
        if words.len() > 1 {
            confidence += 0.2;
        } else if name
            .chars()
            .next()
            .is_some_and(|c| c.is_uppercase())
            && name.chars().skip(1).all(|c| c.is_lowercase())
        {
            confidence += 0.1;
        }

        // Sentence-initial capitals are weaker evidence
        let sentence_start = start == 0
            || text[..start]
                .chars()
                .rev()
                .find(|c| !c.is_whitespace())
                .is_some_and(|c| matches!(c, '.' | '!' | '?'));
        if sentence_start && words.len() == 1 {
            confidence -= 0.2;
        }

        // A preceding honorific is strong evidence
        let preceding_word = text[..start]
            .split_whitespace()
            .next_back()
            .map(|w| w.trim_end_matches('.').to_lowercase());
        if preceding_word.is_some_and(|w| TITLES.contains(w.as_str())) {
            confidence += 0.2;
        }

        if text[end..]
            .chars()
            .next()
            .is_some_and(|c| matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
        {
            confidence += 0.1;
        }

        if (3..=20).contains(&name.len()) {
            confidence += 0.1;
        }

        confidence.clamp(0.0, 1.0)
    }

    /// Drop overlapping matches, keeping the higher-confidence span.
    fn remove_overlaps(mut matches: Vec<NameMatch>) -> Vec<NameMatch> {
        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut kept: Vec<NameMatch> = Vec::new();
        for candidate in matches {
            let overlaps = kept
                .iter()
                .any(|k| candidate.start < k.end && k.start < candidate.end);
            if !overlaps {
                kept.push(candidate);
            }
        }
        kept.sort_by_key(|m| m.start);
        kept
    }
}

impl Default for HeuristicNerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NerBackend for HeuristicNerBackend {
    fn backend_id(&self) -> &str {
        "heuristic"
    }

    fn detect(&self, text: &str) -> Vec<NameMatch> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut matches = Vec::new();
        let mut seen = HashSet::new();

        for pattern in [&*CAPITALIZED_SEQUENCE, &*ALL_CAPS] {
            for m in pattern.find_iter(text) {
                let name = m.as_str();
                if name.len() < self.min_length || name.len() > self.max_length {
                    continue;
                }
                if !seen.insert((m.start(), m.end())) {
                    continue;
                }
                if STOPWORDS.contains(name.to_lowercase().as_str()) {
                    continue;
                }

                let confidence = Self::score(name, text, m.start(), m.end());
                if confidence >= MIN_CONFIDENCE {
                    matches.push(NameMatch {
                        name: name.to_string(),
                        start: m.start(),
                        end: m.end(),
                        confidence,
                    });
                }
            }
        }

        Self::remove_overlaps(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HeuristicNerBackend {
        HeuristicNerBackend::new()
    }

    #[test]
    fn test_detects_mid_sentence_names() {
        let matches = backend().detect("I saw Jin at the market with Mary Jane.");
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"Jin"));
        assert!(names.contains(&"Mary Jane"));
    }

    #[test]
    fn test_stopwords_filtered() {
        let matches = backend().detect("Okay then, This is fine.");
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert!(!names.contains(&"Okay"));
        assert!(!names.contains(&"This"));
    }

    #[test]
    fn test_multiword_beats_contained_single() {
        let matches = backend().detect("Have you met Jin Woo today?");
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"Jin Woo"));
        // The contained single-word span must not also be reported
        assert!(!names.contains(&"Jin"));
        assert!(!names.contains(&"Woo"));
    }

    #[test]
    fn test_all_caps_detected() {
        let matches = backend().detect("The GUILD is recruiting.");
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"GUILD"));
    }

    #[test]
    fn test_confidence_threshold_and_empty_input() {
        assert!(backend().detect("").is_empty());
        assert!(backend().detect("   ").is_empty());
        for m in backend().detect("Jin said hello to Mina.") {
            assert!(m.confidence >= MIN_CONFIDENCE);
        }
    }

    #[test]
    fn test_extract_all_unique_first_seen_order() {
        let texts = vec![
            "Jin met Mina.".to_string(),
            "Then jin left.".to_string(),
            "Mina waved at Jin.".to_string(),
        ];
        let names = backend().extract_all(&texts);
        // Case-insensitive dedup keeps the first-seen casing
        assert_eq!(
            names.iter().filter(|n| n.to_lowercase() == "jin").count(),
            1
        );
        assert!(names.contains(&"Jin".to_string()));
        assert!(names.contains(&"Mina".to_string()));
    }
}
