//! Free machine-translation cascade.
//!
//! Providers implement [`MtProvider`] and are tried in preference order per
//! item; when every provider fails for a text, the original text is kept.
//! Shipped providers: an offline phrase-table (when a lexicon file is
//! configured) and a LibreTranslate-compatible network client. An in-process
//! neural model can slot in behind the same trait.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::MtSettings;
use crate::error::{Result, ScanlateError};
use crate::language::normalize;

use super::{GlossaryPairs, Translator};

/// One member of the cascade.
#[async_trait]
pub trait MtProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Whether this provider can serve requests at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Translate a single string; errors make the cascade fall through.
    async fn translate_single(&self, text: &str, source_lang: &str, target_lang: &str)
        -> Result<String>;
}

/// Offline phrase-based provider backed by a TSV lexicon
/// (`source<TAB>target` per line). Declines texts it barely covers so the
/// cascade can try a real MT service.
pub struct PhraseTableMt {
    table: HashMap<String, String>,
}

impl PhraseTableMt {
    /// Load a lexicon file; missing or empty files yield an unavailable
    /// provider rather than an error.
    pub fn load(path: &Path) -> Self {
        let table = std::fs::read_to_string(path)
            .map(|raw| {
                raw.lines()
                    .filter_map(|line| {
                        let (src, tgt) = line.split_once('\t')?;
                        let src = src.trim();
                        let tgt = tgt.trim();
                        (!src.is_empty() && !tgt.is_empty())
                            .then(|| (src.to_lowercase(), tgt.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { table }
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            table: pairs
                .iter()
                .map(|(s, t)| (s.to_lowercase(), t.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl MtProvider for PhraseTableMt {
    fn provider_id(&self) -> &str {
        "phrase-table"
    }

    fn is_available(&self) -> bool {
        !self.table.is_empty()
    }

    async fn translate_single(
        &self,
        text: &str,
        _source_lang: &str,
        _target_lang: &str,
    ) -> Result<String> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(String::new());
        }

        let mut covered = 0usize;
        let translated: Vec<String> = tokens
            .iter()
            .map(|token| {
                let stripped = token.trim_matches(|c: char| !c.is_alphanumeric());
                match self.table.get(&stripped.to_lowercase()) {
                    Some(target) if !stripped.is_empty() => {
                        covered += 1;
                        token.replace(stripped, target)
                    }
                    _ => (*token).to_string(),
                }
            })
            .collect();

        // Under half the tokens known: decline and let the cascade move on
        if covered * 2 < tokens.len() {
            return Err(ScanlateError::NotFound(format!(
                "phrase table covers {covered}/{} tokens",
                tokens.len()
            )));
        }
        Ok(translated.join(" "))
    }
}

#[derive(Debug, Deserialize)]
struct LibreTranslateReply {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Network MT client (LibreTranslate-compatible `/translate`).
pub struct HttpMt {
    settings: MtSettings,
    client: Client,
}

impl HttpMt {
    pub fn new(settings: MtSettings) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .expect("failed to create HTTP client");
        Self { settings, client }
    }
}

#[async_trait]
impl MtProvider for HttpMt {
    fn provider_id(&self) -> &str {
        "http-mt"
    }

    fn is_available(&self) -> bool {
        !self.settings.endpoint.is_empty()
    }

    async fn translate_single(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String> {
        let url = format!("{}/translate", self.settings.endpoint.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "q": text,
            "source": normalize(source_lang),
            "target": normalize(target_lang),
            "format": "text",
        });
        if let Some(ref key) = self.settings.api_key {
            body["api_key"] = serde_json::json!(key);
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScanlateError::Upstream(format!("MT request: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScanlateError::Upstream(format!("MT HTTP {status}")));
        }
        let reply: LibreTranslateReply = response
            .json()
            .await
            .map_err(|e| ScanlateError::Upstream(format!("MT reply parse: {e}")))?;
        Ok(reply.translated_text)
    }
}

/// The cascade itself.
pub struct FreeTranslator {
    providers: Vec<Box<dyn MtProvider>>,
}

impl FreeTranslator {
    /// Build the default cascade from settings: phrase table first (when a
    /// lexicon is configured), then the network client.
    pub fn new(settings: MtSettings) -> Self {
        let mut providers: Vec<Box<dyn MtProvider>> = Vec::new();
        if let Some(ref path) = settings.lexicon_path {
            let provider = PhraseTableMt::load(path);
            if provider.is_available() {
                info!("offline phrase table loaded from {}", path.display());
                providers.push(Box::new(provider));
            }
        }
        providers.push(Box::new(HttpMt::new(settings)));
        Self { providers }
    }

    /// Cascade with explicit providers (tests, embedders).
    pub fn with_providers(providers: Vec<Box<dyn MtProvider>>) -> Self {
        Self { providers }
    }

    /// Translate one text through the cascade; `None` when every provider
    /// failed.
    async fn cascade_single(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Option<String> {
        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }
            match provider.translate_single(text, source_lang, target_lang).await {
                Ok(result) => {
                    debug!("{} translated item", provider.provider_id());
                    return Some(result);
                }
                Err(e) => {
                    debug!("{} declined: {e}", provider.provider_id());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Translator for FreeTranslator {
    async fn translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        _glossary: Option<&GlossaryPairs>,
    ) -> Vec<String> {
        // Glossary terms are applied to the inputs before MT translation,
        // so the pairs are not needed here.
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            if text.trim().is_empty() {
                out.push(String::new());
                continue;
            }
            match self.cascade_single(text, source_lang, target_lang).await {
                Some(translated) => out.push(translated),
                None => {
                    warn!("all MT providers failed for one item, keeping original");
                    out.push(text.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingMt;

    #[async_trait]
    impl MtProvider for FailingMt {
        fn provider_id(&self) -> &str {
            "failing"
        }
        async fn translate_single(&self, _: &str, _: &str, _: &str) -> Result<String> {
            Err(ScanlateError::Upstream("down".to_string()))
        }
    }

    struct UppercaseMt;

    #[async_trait]
    impl MtProvider for UppercaseMt {
        fn provider_id(&self) -> &str {
            "upper"
        }
        async fn translate_single(&self, text: &str, _: &str, _: &str) -> Result<String> {
            Ok(text.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_phrase_table_translates_covered_text() {
        let provider = PhraseTableMt::from_pairs(&[("hello", "merhaba"), ("world", "dunya")]);
        let result = provider
            .translate_single("Hello world!", "en", "tr")
            .await
            .unwrap();
        assert_eq!(result, "merhaba dunya!");
    }

    #[tokio::test]
    async fn test_phrase_table_declines_low_coverage() {
        let provider = PhraseTableMt::from_pairs(&[("hello", "merhaba")]);
        let err = provider
            .translate_single("hello there mysterious stranger", "en", "tr")
            .await
            .unwrap_err();
        assert!(matches!(err, ScanlateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cascade_falls_through_to_next_provider() {
        let cascade = FreeTranslator::with_providers(vec![
            Box::new(FailingMt),
            Box::new(UppercaseMt),
        ]);
        let out = cascade
            .translate(&["abc".to_string()], "en", "tr", None)
            .await;
        assert_eq!(out, vec!["ABC"]);
    }

    #[tokio::test]
    async fn test_cascade_keeps_original_when_all_fail() {
        let cascade = FreeTranslator::with_providers(vec![Box::new(FailingMt)]);
        let texts = vec!["unchanged".to_string(), "  ".to_string()];
        let out = cascade.translate(&texts, "en", "tr", None).await;
        assert_eq!(out, vec!["unchanged", ""]);
    }

    #[tokio::test]
    async fn test_length_invariant() {
        let cascade = FreeTranslator::with_providers(vec![Box::new(UppercaseMt)]);
        let texts: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        let out = cascade.translate(&texts, "en", "tr", None).await;
        assert_eq!(out.len(), texts.len());
    }
}
