//! Context-aware batch translation.
//!
//! Two backends behind one interface: a high-quality LLM backend that sends
//! the chapter's flat text list as a structured request, and a free MT
//! cascade. Both guarantee `len(output) == len(input)`: a mismatched reply
//! is padded with empty strings or truncated, with a warning, and total
//! failure falls back to the original texts rather than blocking the job.

mod chunker;
mod free;
mod llm;
mod parse;
mod prompt;

pub use free::{FreeTranslator, HttpMt, MtProvider, PhraseTableMt};
pub use llm::{ChatBackend, LlmTranslator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which translator produced a build. The numeric values participate in
/// cache and lock fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TranslationBackend {
    /// High-quality LLM translation.
    Llm = 1,
    /// Free machine translation.
    Mt = 2,
}

impl TranslationBackend {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TranslationBackend::Llm),
            2 => Some(TranslationBackend::Mt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationBackend::Llm => "llm",
            TranslationBackend::Mt => "mt",
        }
    }
}

/// Glossary terms handed to a translator, ordered longest-original first.
pub type GlossaryPairs = [(String, String)];

/// Batch translator contract. Implementations never fail the batch: they
/// degrade per item (or per chunk) to the original text.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `texts` preserving order and length. `glossary` terms must
    /// be honored where the backend supports them.
    async fn translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        glossary: Option<&GlossaryPairs>,
    ) -> Vec<String>;
}

/// Force `len(out) == expected` by padding with empty strings or truncating,
/// logging when the invariant had to be repaired.
pub fn enforce_length(mut out: Vec<String>, expected: usize) -> Vec<String> {
    if out.len() != expected {
        warn!(
            "translation count mismatch: expected {expected}, got {}",
            out.len()
        );
        if out.len() < expected {
            out.resize(expected, String::new());
        } else {
            out.truncate(expected);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_codes() {
        assert_eq!(TranslationBackend::Llm as u8, 1);
        assert_eq!(TranslationBackend::Mt as u8, 2);
        assert_eq!(TranslationBackend::from_code(1), Some(TranslationBackend::Llm));
        assert_eq!(TranslationBackend::from_code(2), Some(TranslationBackend::Mt));
        assert_eq!(TranslationBackend::from_code(3), None);
    }

    #[test]
    fn test_enforce_length() {
        let padded = enforce_length(vec!["a".into()], 3);
        assert_eq!(padded, vec!["a", "", ""]);
        let truncated = enforce_length(vec!["a".into(), "b".into(), "c".into()], 2);
        assert_eq!(truncated, vec!["a", "b"]);
        let exact = enforce_length(vec!["a".into()], 1);
        assert_eq!(exact, vec!["a"]);
    }
}
