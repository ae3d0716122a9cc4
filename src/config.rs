//! Configuration management for Scanlate.
//!
//! Settings load from `scanlate.toml` (path overridable on the CLI) with
//! serde defaults for every field, so a missing file yields a working local
//! configuration. Secrets come from the environment (`SCANLATE_LLM_API_KEY`,
//! `SCANLATE_REDIS_URL`), typically via a `.env` file loaded at startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default config file name, discovered in the working directory.
pub const CONFIG_FILE: &str = "scanlate.toml";

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scraper: ScraperSettings,
    pub ocr: OcrSettings,
    pub translator: TranslatorSettings,
    pub glossary: GlossarySettings,
    pub imaging: ImagingSettings,
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub batch: BatchSettings,
}

/// Scraper behavior: timeouts, retries, and the browser challenge budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    /// Per-request timeout for image downloads in seconds.
    pub request_timeout_secs: u64,
    /// How long to wait for a JS challenge to clear before giving up.
    pub challenge_timeout_secs: u64,
    /// Retries per image before counting it as failed.
    pub max_retries: u32,
    /// User agent sent with plain HTTP fetches.
    pub user_agent: String,
    /// Run the browser headless (disable to debug challenge pages).
    pub headless: bool,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            challenge_timeout_secs: 10,
            max_retries: 3,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            headless: true,
        }
    }
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Languages the reader is initialized with.
    pub languages: Vec<String>,
    /// Use GPU acceleration when the engine supports it.
    pub gpu: bool,
    /// Optional model directory override.
    pub model_path: Option<PathBuf>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            gpu: false,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorSettings {
    pub llm: LlmSettings,
    pub mt: MtSettings,
}

/// High-quality LLM backend (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Low temperature keeps per-chapter terminology stable.
    pub temperature: f32,
    /// Ceiling before the flat list is split into sequential chunks.
    pub max_safe_tokens: usize,
    /// Approximate token budget per chunk.
    pub chunk_tokens: usize,
    /// Send a provider cache hint for the system message (optional).
    pub cache_hint: bool,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_safe_tokens: 100_000,
            chunk_tokens: 20_000,
            cache_hint: true,
            request_timeout_secs: 300,
        }
    }
}

/// Free machine-translation cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtSettings {
    /// Network MT endpoint (LibreTranslate-compatible `/translate`).
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Optional offline phrase-table (TSV: source<TAB>target per line).
    pub lexicon_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for MtSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://libretranslate.com".to_string(),
            api_key: None,
            lexicon_path: None,
            request_timeout_secs: 30,
        }
    }
}

/// Per-series glossary capacity controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossarySettings {
    /// Maximum entries per dictionary before cleanup runs.
    pub max_entries: usize,
    /// Entries at or above this usage count survive cleanup.
    pub min_keep_usage: i64,
}

impl Default for GlossarySettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            min_keep_usage: 2,
        }
    }
}

/// Inpainting and typesetting controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingSettings {
    pub min_font_size: u32,
    pub max_font_size: u32,
    /// Output quality for WebP/JPEG encoding.
    pub quality: u8,
    /// Prefer WebP output; falls back to JPEG when encoding fails.
    pub use_webp: bool,
    /// Bounded executor width for CPU-heavy page work.
    pub workers: usize,
    /// Font file for rendering; a bundled fallback is used when unset.
    pub font_path: Option<PathBuf>,
}

impl Default for ImagingSettings {
    fn default() -> Self {
        Self {
            min_font_size: 10,
            max_font_size: 40,
            quality: 85,
            use_webp: true,
            workers: 4,
            font_path: None,
        }
    }
}

/// Result cache and build lock store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub redis_url: String,
    /// Finished chapter results live this long (default 30 days).
    pub result_ttl_secs: u64,
    /// Build lock TTL; a crashed worker's lock expires after this.
    pub lock_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            result_ttl_secs: 86_400 * 30,
            lock_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory for published chapter files.
    pub root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite database for catalog, glossaries and job records.
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scanlate.db"),
        }
    }
}

/// Batch orchestrator pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Hard per-chapter timeout in seconds (default 20 minutes).
    pub chapter_timeout_secs: u64,
    /// Poll interval while waiting on a chapter task.
    pub poll_interval_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chapter_timeout_secs: 1_200,
            poll_interval_ms: 1_000,
        }
    }
}

impl Settings {
    /// Load settings from the given path, or from `scanlate.toml` in the
    /// working directory, falling back to defaults when no file exists.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Settings::default()
                }
            }
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        Ok(settings)
    }

    /// Secrets and connection strings come from the environment when set.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SCANLATE_LLM_API_KEY") {
            self.translator.llm.api_key = key;
        }
        if let Ok(url) = std::env::var("SCANLATE_REDIS_URL") {
            self.cache.redis_url = url;
        }
        if let Ok(root) = std::env::var("SCANLATE_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Ok(db) = std::env::var("SCANLATE_DB_PATH") {
            self.database.path = PathBuf::from(db);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.glossary.max_entries, 1000);
        assert_eq!(settings.glossary.min_keep_usage, 2);
        assert_eq!(settings.imaging.min_font_size, 10);
        assert_eq!(settings.imaging.max_font_size, 40);
        assert_eq!(settings.cache.result_ttl_secs, 86_400 * 30);
        assert_eq!(settings.cache.lock_ttl_secs, 3_600);
        assert_eq!(settings.batch.chapter_timeout_secs, 1_200);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let raw = r#"
            [translator.llm]
            model = "gpt-4o"

            [imaging]
            quality = 70
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.translator.llm.model, "gpt-4o");
        assert_eq!(settings.imaging.quality, 70);
        // Untouched sections keep their defaults
        assert_eq!(settings.imaging.min_font_size, 10);
        assert_eq!(settings.scraper.challenge_timeout_secs, 10);
    }

    #[test]
    fn test_roundtrip() {
        let settings = Settings::default();
        let raw = toml::to_string(&settings).unwrap();
        let back: Settings = toml::from_str(&raw).unwrap();
        assert_eq!(back.translator.llm.temperature, settings.translator.llm.temperature);
    }
}
