//! LLM translation backend.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint. The whole flat
//! text list goes out as one structured request at low temperature; chapters
//! past the token ceiling are split into sequential chunks with carry-over
//! context. A failed chunk degrades to its original texts so the pipeline
//! never blocks on the model.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LlmSettings;

use super::chunker::{carry_over, estimate_tokens, split_into_chunks};
use super::parse::parse_reply;
use super::prompt::{build_system_prompt, build_user_prompt, ChunkPosition};
use super::{enforce_length, GlossaryPairs, Translator};

/// Errors from the chat endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    /// Provider cache hint for the (large, repeated) system message.
    /// Optional; correctness never depends on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// One (system, user) round trip to a chat model. The HTTP client is the
/// production implementation; tests script replies.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat-completions client.
struct HttpChatBackend {
    settings: LlmSettings,
    client: Client,
}

impl HttpChatBackend {
    fn new(settings: LlmSettings) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .expect("failed to create HTTP client");
        Self { settings, client }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            temperature: self.settings.temperature,
            cache_control: self
                .settings
                .cache_hint
                .then(|| serde_json::json!({"type": "ephemeral"})),
        };

        let url = format!(
            "{}/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("empty choices in reply".to_string()))
    }
}

/// Context-aware LLM translator.
pub struct LlmTranslator {
    settings: LlmSettings,
    chat: Box<dyn ChatBackend>,
}

impl LlmTranslator {
    pub fn new(settings: LlmSettings) -> Self {
        let chat = Box::new(HttpChatBackend::new(settings.clone()));
        Self { settings, chat }
    }

    /// Translator over a custom chat backend (tests, embedders).
    pub fn with_chat(settings: LlmSettings, chat: Box<dyn ChatBackend>) -> Self {
        Self { settings, chat }
    }

    /// Translate one chunk; `Err` means the caller substitutes originals.
    async fn translate_chunk(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        glossary: Option<&GlossaryPairs>,
        position: Option<ChunkPosition>,
        previous_context: Option<&[String]>,
    ) -> Result<Vec<String>, LlmError> {
        let system = build_system_prompt(glossary);
        let user = build_user_prompt(texts, source_lang, target_lang, position, previous_context);
        let reply = self.chat.complete(&system, &user).await?;
        let translations = parse_reply(&reply);
        Ok(enforce_length(translations, texts.len()))
    }

    /// Chunked path for chapters past the token ceiling.
    async fn translate_chunked(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        glossary: Option<&GlossaryPairs>,
    ) -> Vec<String> {
        let chunks = split_into_chunks(texts, self.settings.chunk_tokens);
        info!(
            "chunking {} texts into {} requests",
            texts.len(),
            chunks.len()
        );

        let total = chunks.len();
        let mut all_translations: Vec<String> = Vec::with_capacity(texts.len());
        let mut previous: Vec<String> = Vec::new();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let context = (!previous.is_empty()).then(|| carry_over(&previous).to_vec());
            let result = self
                .translate_chunk(
                    &chunk,
                    source_lang,
                    target_lang,
                    glossary,
                    Some(ChunkPosition { index, total }),
                    context.as_deref(),
                )
                .await;

            let translations = match result {
                Ok(t) => t,
                Err(e) => {
                    // Never block the pipeline on one bad chunk
                    warn!("chunk {}/{total} failed ({e}), using originals", index + 1);
                    chunk.clone()
                }
            };
            previous = translations.clone();
            all_translations.extend(translations);
        }

        enforce_length(all_translations, texts.len())
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        glossary: Option<&GlossaryPairs>,
    ) -> Vec<String> {
        if texts.is_empty() {
            return Vec::new();
        }

        let estimated = estimate_tokens(texts);
        if estimated > self.settings.max_safe_tokens {
            info!("estimated {estimated} tokens exceeds ceiling, using chunked translation");
            return self
                .translate_chunked(texts, source_lang, target_lang, glossary)
                .await;
        }

        debug!("translating {} texts in one request", texts.len());
        match self
            .translate_chunk(texts, source_lang, target_lang, glossary, None, None)
            .await
        {
            Ok(translations) => translations,
            Err(e) => {
                warn!("LLM translation failed ({e}), returning originals");
                texts.to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted chat backend: records prompts, replies with a JSON array of
    /// `{prefix}{original}` for every input list item it can find.
    struct ScriptedChat {
        calls: Mutex<Vec<(String, String)>>,
        fail_on_call: Option<usize>,
    }

    impl ScriptedChat {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on_call: None,
            }
        }

        fn failing_on(call: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on_call: Some(call),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call(&self, index: usize) -> (String, String) {
            self.calls.lock().unwrap()[index].clone()
        }

        /// Pull the input list back out of the user prompt.
        fn inputs_of(user: &str) -> Vec<String> {
            let start = user.find("Input List:").expect("input list header");
            let json = &user[start + "Input List:".len()..];
            serde_json::from_str(json.trim()).expect("input list should be JSON")
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedChat {
        async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((system.to_string(), user.to_string()));
                calls.len() - 1
            };
            if self.fail_on_call == Some(index) {
                return Err(LlmError::Api("scripted failure".to_string()));
            }
            let inputs = Self::inputs_of(user);
            let outputs: Vec<String> = inputs.iter().map(|t| format!("T:{t}")).collect();
            Ok(serde_json::to_string(&outputs).unwrap())
        }
    }

    fn small_chunk_settings() -> LlmSettings {
        LlmSettings {
            // ~4 chars/token: 10-token ceiling, 5-token chunks
            max_safe_tokens: 10,
            chunk_tokens: 5,
            ..Default::default()
        }
    }

    fn translator_with(chat: ScriptedChat) -> (LlmTranslator, std::sync::Arc<ScriptedChat>) {
        // Keep a second handle for assertions
        let shared = std::sync::Arc::new(chat);
        struct Fwd(std::sync::Arc<ScriptedChat>);
        #[async_trait]
        impl ChatBackend for Fwd {
            async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
                self.0.complete(system, user).await
            }
        }
        (
            LlmTranslator::with_chat(small_chunk_settings(), Box::new(Fwd(shared.clone()))),
            shared,
        )
    }

    fn texts(n: usize, len: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:0width$}", width = len)).collect()
    }

    #[tokio::test]
    async fn test_small_batch_is_single_request() {
        let (translator, chat) = translator_with(ScriptedChat::new());
        let input = vec!["Hi".to_string()];
        let out = translator.translate(&input, "en", "tr", None).await;
        assert_eq!(out, vec!["T:Hi"]);
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn test_large_batch_chunks_in_order_with_carry_over() {
        let (translator, chat) = translator_with(ScriptedChat::new());
        // 8 texts x 10 chars = 20 estimated tokens > 10-token ceiling;
        // 5-token chunks hold 2 texts each -> 4 requests
        let input = texts(8, 10);
        let out = translator.translate(&input, "en", "tr", None).await;

        assert_eq!(out.len(), input.len());
        assert!(chat.call_count() >= 2);
        assert_eq!(chat.call_count(), 4);

        // Chunks arrive in order and reassemble to the full list
        let mut seen = Vec::new();
        for i in 0..chat.call_count() {
            seen.extend(ScriptedChat::inputs_of(&chat.call(i).1));
        }
        assert_eq!(seen, input);

        // The second request carries translations from the first as context
        let (_, second_user) = chat.call(1);
        assert!(second_user.contains("PREVIOUS CONTEXT"));
        assert!(second_user.contains("T:"));
        // And the first request has no context block
        assert!(!chat.call(0).1.contains("PREVIOUS CONTEXT"));
    }

    #[tokio::test]
    async fn test_glossary_block_present_in_every_chunk() {
        let (translator, chat) = translator_with(ScriptedChat::new());
        let glossary = vec![("Jin".to_string(), "Cin".to_string())];
        let input = texts(4, 10);
        translator.translate(&input, "en", "tr", Some(&glossary)).await;
        for i in 0..chat.call_count() {
            let (system, _) = chat.call(i);
            assert!(system.contains("\"Jin\" -> \"Cin\""));
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_substitutes_originals() {
        let (translator, chat) = translator_with(ScriptedChat::failing_on(1));
        // 4 texts x 20 chars = 20 estimated tokens; one text per 5-token chunk
        let input = texts(4, 20);
        let out = translator.translate(&input, "en", "tr", None).await;
        assert_eq!(out.len(), input.len());
        assert_eq!(chat.call_count(), 4);
        // Second chunk fell back to its originals, the rest translated
        assert_eq!(out[0], format!("T:{}", input[0]));
        assert_eq!(out[1], input[1]);
        assert_eq!(out[2], format!("T:{}", input[2]));
        assert_eq!(out[3], format!("T:{}", input[3]));
    }

    #[tokio::test]
    async fn test_total_failure_returns_originals() {
        let (translator, _) = translator_with(ScriptedChat::failing_on(0));
        let input = vec!["keep me".to_string()];
        let out = translator.translate(&input, "en", "tr", None).await;
        assert_eq!(out, input);
    }
}
