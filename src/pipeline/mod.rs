//! The chapter pipeline: fetch -> OCR -> translate -> inpaint -> render.
//!
//! One invocation handles one chapter. The cache is consulted before any
//! work; on a miss the build lock is taken (fail-open when already held),
//! and it is released on success and failure alike, together with the
//! scraper's browser. Job status/progress is observable through the job
//! store at fixed milestones.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::cache::{BuildLock, Fingerprint, ResultCache};
use crate::catalog::CatalogRepository;
use crate::error::{Result, ScanlateError};
use crate::glossary::{GlossaryStore, ProperNounKind};
use crate::imaging::PageProcessor;
use crate::jobs::{JobStatus, JobStore};
use crate::language;
use crate::ner::NerBackend;
use crate::ocr::{ChapterOcr, OcrBackend, TextBlock};
use crate::publisher::{PublishContext, Publisher};
use crate::scrapers::Scraper;
use crate::translator::{enforce_length, TranslationBackend, Translator};

/// Output treatment for a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Inpaint the source text away and render the translation.
    Clean,
    /// Leave pages untouched; translations ship in metadata only.
    Overlay,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Clean => "clean",
            Mode::Overlay => "overlay",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "clean" => Some(Mode::Clean),
            "overlay" => Some(Mode::Overlay),
            _ => None,
        }
    }
}

mod page_bytes {
    //! Pages serialize as base64 strings so cached results stay compact.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(pages: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = pages.iter().map(|p| STANDARD.encode(p)).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|p| STANDARD.decode(p).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// A finished chapter build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterResult {
    /// Final pages, ready to publish.
    #[serde(with = "page_bytes")]
    pub pages: Vec<Vec<u8>>,
    /// Inpainted-but-unlettered pages; empty slots in overlay mode.
    #[serde(with = "page_bytes")]
    pub cleaned_pages: Vec<Vec<u8>>,
    pub total: usize,
    /// Flat text list, page-major.
    pub original_texts: Vec<String>,
    /// Aligned 1:1 with `original_texts`.
    pub translated_texts: Vec<String>,
    /// Per-page blocks in detection order.
    pub blocks: Vec<Vec<TextBlock>>,
    pub message: Option<String>,
}

/// Parameters of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub chapter_url: String,
    /// Inferred from the URL when absent.
    pub source_lang: Option<String>,
    pub target_lang: String,
    pub mode: Mode,
    pub backend: TranslationBackend,
    /// Publishing happens only when a series identity is supplied.
    pub series_name: Option<String>,
    pub task_id: String,
    pub user_id: Option<i64>,
    pub use_cache: bool,
}

/// Creates one scraper per pipeline run; the browser inside is never shared
/// across tasks.
pub trait ScraperFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Scraper>>;
}

/// Everything a pipeline run needs, shared across tasks.
pub struct PipelineContext {
    pub scrapers: Arc<dyn ScraperFactory>,
    pub ocr: Arc<dyn OcrBackend>,
    pub llm: Arc<dyn Translator>,
    pub free: Arc<dyn Translator>,
    pub ner: Arc<dyn NerBackend>,
    pub glossary: GlossaryStore,
    pub catalog: CatalogRepository,
    pub processor: Arc<dyn PageProcessor>,
    pub cache: ResultCache,
    pub lock: BuildLock,
    pub jobs: Arc<dyn JobStore>,
    pub publisher: Publisher,
    /// Bounded executor for CPU-heavy page work.
    pub imaging_workers: Arc<Semaphore>,
}

/// The pipeline itself; cheap to clone and safe to run concurrently.
#[derive(Clone)]
pub struct ChapterPipeline {
    ctx: Arc<PipelineContext>,
}

impl ChapterPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Run the pipeline for one chapter. Always releases the lock and closes
    /// the scraper; failures are mirrored into the job store.
    pub async fn run(&self, request: PipelineRequest) -> Result<ChapterResult> {
        let fingerprint = Fingerprint::new(
            &request.chapter_url,
            &request.target_lang,
            request.backend,
            request.mode.as_str(),
        );

        // Cache first: a hit means no scraping, no lock, no work
        if request.use_cache {
            if let Some(cached) = self.ctx.cache.get::<ChapterResult>(&fingerprint).await {
                self.ctx
                    .jobs
                    .update(&request.task_id, JobStatus::Completed, Some(100), None)
                    .await
                    .ok();
                return Ok(cached);
            }
        }

        // Fail-open: losing the lock is logged but does not stop this job;
        // callers that want coalescing poll the cache instead
        self.ctx.lock.acquire(&fingerprint).await;

        let mut scraper = self.ctx.scrapers.create()?;
        let outcome = self.run_inner(&request, scraper.as_mut()).await;

        // Teardown runs on every path
        scraper.close().await;
        self.ctx.lock.release(&fingerprint).await;

        match outcome {
            Ok(result) => {
                self.ctx
                    .jobs
                    .update(&request.task_id, JobStatus::Completed, Some(100), None)
                    .await
                    .ok();
                Ok(result)
            }
            Err(e) => {
                self.ctx
                    .jobs
                    .update(
                        &request.task_id,
                        JobStatus::Failed,
                        None,
                        Some(&e.to_string()),
                    )
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        request: &PipelineRequest,
        scraper: &mut dyn Scraper,
    ) -> Result<ChapterResult> {
        let ctx = &self.ctx;

        // Fetch
        self.progress(request, 10).await;
        info!("fetching chapter {}", request.chapter_url);
        let pages = scraper.fetch(&request.chapter_url).await?;
        if pages.is_empty() {
            return Err(ScanlateError::NotFound("no images".to_string()));
        }
        info!("fetched {} pages", pages.len());

        // OCR
        self.progress(request, 30).await;
        let mut blocks_by_page: Vec<Vec<TextBlock>> = Vec::with_capacity(pages.len());
        for (idx, page) in pages.iter().enumerate() {
            // An OCR failure downgrades the page to "no text", it does not
            // fail the chapter
            let blocks = match ctx.ocr.detect(page).await {
                Ok(blocks) => blocks,
                Err(e) => {
                    warn!("OCR failed on page {idx}: {e}");
                    Vec::new()
                }
            };
            tracing::debug!("page {idx}: {} blocks", blocks.len());
            blocks_by_page.push(blocks);
        }
        let ocr = ChapterOcr::new(blocks_by_page);
        let flat_texts = ocr.flat_texts();

        // Nothing to translate: pages pass through unchanged
        if ocr.is_empty() {
            warn!("no text found in {}", request.chapter_url);
            let total = pages.len();
            let result = ChapterResult {
                cleaned_pages: vec![Vec::new(); total],
                pages,
                total,
                original_texts: Vec::new(),
                translated_texts: Vec::new(),
                blocks: ocr.pages,
                message: Some("no text found in images".to_string()),
            };
            self.finish(request, &result).await;
            return Ok(result);
        }

        // Translate
        let source_lang = match &request.source_lang {
            Some(lang) => language::normalize(lang),
            None => language::detect_from_url(&request.chapter_url),
        };
        self.progress(request, 50).await;
        info!(
            "translating {} texts {}->{} via {}",
            flat_texts.len(),
            source_lang,
            request.target_lang,
            request.backend.as_str()
        );

        let dictionary = self
            .dictionary_for(request, &source_lang)
            .await;

        let translated = match request.backend {
            TranslationBackend::Llm => {
                self.translate_llm(request, &flat_texts, &source_lang, dictionary)
                    .await
            }
            TranslationBackend::Mt => {
                self.translate_free(request, &flat_texts, &source_lang, dictionary)
                    .await
            }
        };
        let translated = enforce_length(translated, flat_texts.len());

        // Imaging
        self.progress(request, 70).await;
        let (final_pages, cleaned_pages) = self
            .process_pages(request, &pages, &ocr.pages, &translated)
            .await?;

        let result = ChapterResult {
            pages: final_pages,
            cleaned_pages,
            total: pages.len(),
            original_texts: flat_texts,
            translated_texts: translated,
            blocks: ocr.pages,
            message: None,
        };

        self.finish(request, &result).await;
        Ok(result)
    }

    /// Cache write and auto-publish; neither may fail the job.
    async fn finish(&self, request: &PipelineRequest, result: &ChapterResult) {
        let fingerprint = Fingerprint::new(
            &request.chapter_url,
            &request.target_lang,
            request.backend,
            request.mode.as_str(),
        );
        self.ctx.cache.put(&fingerprint, result).await;

        if let Some(ref series_name) = request.series_name {
            let source_lang = match &request.source_lang {
                Some(lang) => language::normalize(lang),
                None => language::detect_from_url(&request.chapter_url),
            };
            let publish_ctx = PublishContext {
                chapter_url: request.chapter_url.clone(),
                source_lang,
                target_lang: request.target_lang.clone(),
                series_name: series_name.clone(),
                series_description: None,
                replace_existing: true,
                task_id: Some(request.task_id.clone()),
                user_id: request.user_id,
            };
            if let Err(e) = self.ctx.publisher.publish(result, &publish_ctx).await {
                warn!("auto-publish failed (translation remains cached): {e}");
            }
        }
    }

    async fn progress(&self, request: &PipelineRequest, progress: u8) {
        self.ctx
            .jobs
            .update(&request.task_id, JobStatus::Processing, Some(progress), None)
            .await
            .ok();
    }

    /// The glossary dictionary for this job, when the series is known.
    async fn dictionary_for(
        &self,
        request: &PipelineRequest,
        source_lang: &str,
    ) -> Option<i64> {
        let series_name = request.series_name.as_deref()?;
        let series_id = match self.ctx.catalog.series_id_by_title(series_name).await {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                warn!("dictionary lookup failed: {e}");
                return None;
            }
        };
        match self
            .ctx
            .glossary
            .get_or_create(series_id, source_lang, &request.target_lang)
            .await
        {
            Ok(dict) => Some(dict.id),
            Err(e) => {
                warn!("dictionary initialization failed: {e}");
                None
            }
        }
    }

    /// LLM path: glossary goes into the prompt; afterwards NER refreshes the
    /// dictionary with names the chapter used.
    async fn translate_llm(
        &self,
        request: &PipelineRequest,
        flat_texts: &[String],
        source_lang: &str,
        dictionary: Option<i64>,
    ) -> Vec<String> {
        let ctx = &self.ctx;

        let glossary_pairs = match dictionary {
            Some(dict_id) => match ctx.glossary.entries(dict_id).await {
                Ok(entries) => entries
                    .into_iter()
                    .map(|e| (e.original, e.translation))
                    .collect::<Vec<_>>(),
                Err(e) => {
                    warn!("failed to load glossary: {e}");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        if !glossary_pairs.is_empty() {
            info!("using glossary with {} entries", glossary_pairs.len());
        }

        let translated = ctx
            .llm
            .translate(
                flat_texts,
                source_lang,
                &request.target_lang,
                (!glossary_pairs.is_empty()).then_some(glossary_pairs.as_slice()),
            )
            .await;

        // Seed the dictionary with recurring names; the LLM keeps them
        // consistent from the glossary block on future chapters
        if let Some(dict_id) = dictionary {
            if let Err(e) = self
                .refresh_dictionary_llm(dict_id, flat_texts)
                .await
            {
                warn!("dictionary refresh failed: {e}");
            }
        }

        translated
    }

    async fn refresh_dictionary_llm(&self, dict_id: i64, flat_texts: &[String]) -> Result<()> {
        let ctx = &self.ctx;
        let names = ctx.ner.extract_all(flat_texts);
        for name in names {
            if ctx.glossary.lookup(dict_id, &name).await?.is_some() {
                ctx.glossary.record_usage(dict_id, &name).await?;
                continue;
            }
            let occurrences = flat_texts
                .iter()
                .filter(|t| t.to_lowercase().contains(&name.to_lowercase()))
                .count();
            if occurrences >= 2 {
                ctx.glossary
                    .upsert(dict_id, &name, &name, ProperNounKind::Auto)
                    .await?;
                info!("added recurring name to dictionary: {name}");
            }
        }
        ctx.glossary.cleanup(dict_id).await?;
        Ok(())
    }

    /// Free-MT path: the glossary is applied to the inputs up front, then
    /// newly seen names are translated once and stored.
    async fn translate_free(
        &self,
        request: &PipelineRequest,
        flat_texts: &[String],
        source_lang: &str,
        dictionary: Option<i64>,
    ) -> Vec<String> {
        let ctx = &self.ctx;

        let inputs = match dictionary {
            Some(dict_id) => match ctx.glossary.apply(dict_id, flat_texts).await {
                Ok((rewritten, replacements)) => {
                    if !replacements.is_empty() {
                        info!("applied {} glossary entries", replacements.len());
                    }
                    rewritten
                }
                Err(e) => {
                    warn!("glossary application failed: {e}");
                    flat_texts.to_vec()
                }
            },
            None => flat_texts.to_vec(),
        };

        let translated = ctx
            .free
            .translate(&inputs, source_lang, &request.target_lang, None)
            .await;

        if let Some(dict_id) = dictionary {
            if let Err(e) = self
                .refresh_dictionary_free(dict_id, flat_texts, source_lang, &request.target_lang)
                .await
            {
                warn!("dictionary refresh failed: {e}");
            }
        }

        translated
    }

    async fn refresh_dictionary_free(
        &self,
        dict_id: i64,
        flat_texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let names = ctx.ner.extract_all(flat_texts);
        let mut new_names = Vec::new();
        for name in names {
            if ctx.glossary.lookup(dict_id, &name).await?.is_some() {
                ctx.glossary.record_usage(dict_id, &name).await?;
            } else {
                new_names.push(name);
            }
        }

        if !new_names.is_empty() {
            let translated_names = ctx
                .free
                .translate(&new_names, source_lang, target_lang, None)
                .await;
            for (name, translated) in new_names.iter().zip(translated_names.iter()) {
                ctx.glossary
                    .upsert(dict_id, name, translated, ProperNounKind::Auto)
                    .await?;
                info!("added name to dictionary: {name} -> {translated}");
            }
        }

        ctx.glossary.cleanup(dict_id).await?;
        Ok(())
    }

    /// Per-page clean/render on the bounded executor. Pages without blocks
    /// pass through byte-identical.
    async fn process_pages(
        &self,
        request: &PipelineRequest,
        pages: &[Vec<u8>],
        blocks_by_page: &[Vec<TextBlock>],
        translated: &[String],
    ) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>)> {
        let ctx = &self.ctx;
        let total = pages.len();
        let mut final_pages = Vec::with_capacity(total);
        let mut cleaned_pages = Vec::with_capacity(total);
        let mut cursor = 0usize;

        for (idx, (page, blocks)) in pages.iter().zip(blocks_by_page.iter()).enumerate() {
            let page_translations: Vec<String> =
                translated[cursor..cursor + blocks.len()].to_vec();
            cursor += blocks.len();

            if request.mode == Mode::Overlay {
                final_pages.push(page.clone());
                cleaned_pages.push(Vec::new());
            } else if blocks.is_empty() {
                // No text: the source page is the final page
                final_pages.push(page.clone());
                cleaned_pages.push(Vec::new());
            } else {
                let permit = ctx
                    .imaging_workers
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| {
                        ScanlateError::Invariant("imaging executor closed".to_string())
                    })?;
                let processor = ctx.processor.clone();
                let page = page.clone();
                let blocks = blocks.clone();
                let (cleaned, rendered) = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    let cleaned = processor.clean(&page, &blocks)?;
                    let rendered = if page_translations.iter().any(|t| !t.trim().is_empty()) {
                        processor.render(&cleaned, &blocks, &page_translations)?
                    } else {
                        cleaned.clone()
                    };
                    Ok::<_, ScanlateError>((cleaned, rendered))
                })
                .await??;
                cleaned_pages.push(cleaned);
                final_pages.push(rendered);
            }

            // 70..90 split across pages
            let progress = 70 + (((idx + 1) * 20) / total) as u8;
            self.progress(request, progress).await;
        }

        Ok((final_pages, cleaned_pages))
    }
}
