//! Assembly of the pipeline context from settings.

use std::sync::Arc;

#[cfg(not(feature = "ocr-ocrs"))]
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::cache::{BuildLock, KvStore, MemoryStore, RedisStore, ResultCache};
use crate::catalog::CatalogRepository;
use crate::config::Settings;
use crate::db;
use crate::error::Result;
use crate::glossary::GlossaryStore;
use crate::imaging::ImageProcessor;
use crate::jobs::SqliteJobStore;
use crate::ocr::OcrBackend;
use crate::pipeline::{PipelineContext, ScraperFactory};
use crate::publisher::{LogNotifier, Publisher};
use crate::scrapers::{Scraper, SiteScraper};
use crate::storage::FileManager;
use crate::translator::{FreeTranslator, LlmTranslator};

/// Scraper factory over the configured settings; every pipeline run gets
/// its own instance (the browser is never shared across tasks).
struct SettingsScraperFactory {
    settings: crate::config::ScraperSettings,
}

impl ScraperFactory for SettingsScraperFactory {
    fn create(&self) -> Result<Box<dyn Scraper>> {
        Ok(Box::new(SiteScraper::new(self.settings.clone())?))
    }
}

#[cfg(not(feature = "ocr-ocrs"))]
struct MissingOcrBackend;

#[cfg(not(feature = "ocr-ocrs"))]
#[async_trait]
impl OcrBackend for MissingOcrBackend {
    async fn detect(&self, _page: &[u8]) -> Result<Vec<crate::ocr::TextBlock>> {
        Err(crate::error::ScanlateError::Upstream(
            "no OCR engine compiled; rebuild with: cargo build --features ocr-ocrs".to_string(),
        ))
    }
}

/// Build the full pipeline context from settings. Falls back to an
/// in-memory cache store when Redis is unreachable, so local runs work
/// without any services.
pub async fn build_pipeline_context(settings: &Settings) -> anyhow::Result<Arc<PipelineContext>> {
    let store: Arc<dyn KvStore> = match RedisStore::connect(&settings.cache.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("redis unavailable ({e}), using in-process cache store");
            Arc::new(MemoryStore::new())
        }
    };
    let cache = ResultCache::new(store.clone(), settings.cache.result_ttl_secs);
    let lock = BuildLock::new(store, settings.cache.lock_ttl_secs);

    let pool = db::open(&settings.database.path)?;
    let catalog = CatalogRepository::new(pool.clone())?;
    let glossary = GlossaryStore::new(
        pool.clone(),
        settings.glossary.max_entries,
        settings.glossary.min_keep_usage,
    )?;
    let jobs = Arc::new(SqliteJobStore::new(pool)?);

    let files = FileManager::new(settings.storage.root.clone());
    let publisher = Publisher::new(
        catalog.clone(),
        files,
        cache.clone(),
        Arc::new(LogNotifier),
    );

    #[cfg(feature = "ocr-ocrs")]
    let ocr: Arc<dyn OcrBackend> = Arc::new(crate::ocr::OcrsBackend::new(settings.ocr.clone()));
    #[cfg(not(feature = "ocr-ocrs"))]
    let ocr: Arc<dyn OcrBackend> = Arc::new(MissingOcrBackend);

    Ok(Arc::new(PipelineContext {
        scrapers: Arc::new(SettingsScraperFactory {
            settings: settings.scraper.clone(),
        }),
        ocr,
        llm: Arc::new(LlmTranslator::new(settings.translator.llm.clone())),
        free: Arc::new(FreeTranslator::new(settings.translator.mt.clone())),
        ner: Arc::new(crate::ner::HeuristicNerBackend::new()),
        glossary,
        catalog,
        processor: Arc::new(ImageProcessor::new(settings.imaging.clone())),
        cache,
        lock,
        jobs,
        publisher,
        imaging_workers: Arc::new(Semaphore::new(settings.imaging.workers.max(1))),
    }))
}
