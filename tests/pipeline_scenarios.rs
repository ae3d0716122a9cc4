//! End-to-end pipeline scenarios over mock collaborators.
//!
//! The scraper, OCR engine, translators and page processor are scripted;
//! the cache/lock run on the in-memory store and the catalog, glossary and
//! job store on in-memory SQLite, so every scenario is hermetic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use scanlate::cache::{BuildLock, Fingerprint, KvResult, KvStore, MemoryStore, ResultCache};
use scanlate::catalog::CatalogRepository;
use scanlate::config::BatchSettings;
use scanlate::db;
use scanlate::error::{Result, ScanlateError};
use scanlate::glossary::{GlossaryStore, ProperNounKind};
use scanlate::imaging::PageProcessor;
use scanlate::jobs::{JobStatus, JobStore, MemoryJobStore};
use scanlate::ner::HeuristicNerBackend;
use scanlate::ocr::{BoundingBox, OcrBackend, TextBlock};
use scanlate::orchestrator::{BatchOrchestrator, BatchRequest};
use scanlate::pipeline::{
    ChapterPipeline, ChapterResult, Mode, PipelineContext, PipelineRequest, ScraperFactory,
};
use scanlate::publisher::{LogNotifier, Publisher};
use scanlate::scrapers::{ChapterInfo, Scraper};
use scanlate::storage::FileManager;
use scanlate::translator::{GlossaryPairs, TranslationBackend, Translator};

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// Pages served per chapter URL; URLs marked failing error out.
struct MockScraper {
    pages_by_url: HashMap<String, Vec<Vec<u8>>>,
    failing_urls: Vec<String>,
    fetch_count: Arc<AtomicUsize>,
}

#[async_trait]
impl Scraper for MockScraper {
    async fn fetch(&mut self, chapter_url: &str) -> Result<Vec<Vec<u8>>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.failing_urls.iter().any(|u| chapter_url.contains(u)) {
            return Err(ScanlateError::NotFound(format!(
                "reader container not found on {chapter_url}"
            )));
        }
        self.pages_by_url
            .get(chapter_url)
            .cloned()
            .ok_or_else(|| ScanlateError::NotFound(format!("no images on {chapter_url}")))
    }

    async fn analyze(&mut self, chapter_url: &str) -> Result<ChapterInfo> {
        Ok(ChapterInfo {
            title: "mock".to_string(),
            page_count: self.pages_by_url.get(chapter_url).map_or(0, |p| p.len()),
        })
    }

    async fn close(&mut self) {}
}

struct MockScraperFactory {
    pages_by_url: HashMap<String, Vec<Vec<u8>>>,
    failing_urls: Vec<String>,
    fetch_count: Arc<AtomicUsize>,
}

impl ScraperFactory for MockScraperFactory {
    fn create(&self) -> Result<Box<dyn Scraper>> {
        Ok(Box::new(MockScraper {
            pages_by_url: self.pages_by_url.clone(),
            failing_urls: self.failing_urls.clone(),
            fetch_count: self.fetch_count.clone(),
        }))
    }
}

/// Blocks are keyed by a marker byte each fake page carries at offset 0.
struct MockOcr {
    blocks_by_marker: HashMap<u8, Vec<String>>,
    detect_count: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrBackend for MockOcr {
    async fn detect(&self, page: &[u8]) -> Result<Vec<TextBlock>> {
        self.detect_count.fetch_add(1, Ordering::SeqCst);
        let marker = page.first().copied().unwrap_or(0);
        let texts = self.blocks_by_marker.get(&marker).cloned().unwrap_or_default();
        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| TextBlock {
                text,
                bbox: BoundingBox::new(10, 10 + (i as i32) * 40, 80, 30),
                confidence: 0.9,
            })
            .collect())
    }
}

/// Scripted translator: looks texts up in a map, falls back to `X:{input}`.
struct MockTranslator {
    replies: HashMap<String, String>,
    call_count: Arc<AtomicUsize>,
    seen_inputs: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        texts: &[String],
        _source_lang: &str,
        _target_lang: &str,
        _glossary: Option<&GlossaryPairs>,
    ) -> Vec<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen_inputs.lock().unwrap().push(texts.to_vec());
        texts
            .iter()
            .map(|t| {
                self.replies
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| format!("X:{t}"))
            })
            .collect()
    }
}

/// Page processor that tags bytes instead of rasterizing: cleaning prefixes
/// `C`, rendering prefixes `R`. Keeps scenarios independent of fonts and
/// codecs.
struct TaggingProcessor;

impl PageProcessor for TaggingProcessor {
    fn clean(&self, page: &[u8], _blocks: &[TextBlock]) -> Result<Vec<u8>> {
        let mut out = b"C".to_vec();
        out.extend_from_slice(page);
        Ok(out)
    }

    fn render(
        &self,
        background: &[u8],
        _blocks: &[TextBlock],
        _translations: &[String],
    ) -> Result<Vec<u8>> {
        let mut out = b"R".to_vec();
        out.extend_from_slice(background);
        Ok(out)
    }
}

/// KvStore wrapper counting lock acquisitions.
struct SpyStore {
    inner: MemoryStore,
    set_nx_count: AtomicUsize,
}

#[async_trait]
impl KvStore for SpyStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<()> {
        self.inner.set_ex(key, value, ttl_secs).await
    }
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<bool> {
        self.set_nx_count.fetch_add(1, Ordering::SeqCst);
        self.inner.set_nx_ex(key, value, ttl_secs).await
    }
    async fn del(&self, key: &str) -> KvResult<()> {
        self.inner.del(key).await
    }
    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        self.inner.keys(pattern).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    pipeline: ChapterPipeline,
    jobs: Arc<MemoryJobStore>,
    catalog: CatalogRepository,
    glossary: GlossaryStore,
    cache: ResultCache,
    fetch_count: Arc<AtomicUsize>,
    detect_count: Arc<AtomicUsize>,
    translate_count: Arc<AtomicUsize>,
    seen_inputs: Arc<Mutex<Vec<Vec<String>>>>,
    lock_acquires: Arc<SpyStore>,
    storage_root: TempDir,
}

/// Fake page bytes: a marker byte followed by filler.
fn page(marker: u8) -> Vec<u8> {
    let mut bytes = vec![marker];
    bytes.extend_from_slice(b"-fake-page-bytes");
    bytes
}

fn build_harness(
    pages_by_url: HashMap<String, Vec<Vec<u8>>>,
    failing_urls: Vec<String>,
    blocks_by_marker: HashMap<u8, Vec<String>>,
    mt_replies: HashMap<String, String>,
) -> Harness {
    let fetch_count = Arc::new(AtomicUsize::new(0));
    let detect_count = Arc::new(AtomicUsize::new(0));
    let translate_count = Arc::new(AtomicUsize::new(0));
    let seen_inputs = Arc::new(Mutex::new(Vec::new()));

    let store = Arc::new(SpyStore {
        inner: MemoryStore::new(),
        set_nx_count: AtomicUsize::new(0),
    });
    let cache = ResultCache::new(store.clone(), 3600);
    let lock = BuildLock::new(store.clone(), 3600);

    let pool = db::open_in_memory().unwrap();
    let catalog = CatalogRepository::new(pool.clone()).unwrap();
    let glossary = GlossaryStore::new(pool, 1000, 2).unwrap();
    let jobs = Arc::new(MemoryJobStore::new());

    let storage_root = TempDir::new().unwrap();
    let publisher = Publisher::new(
        catalog.clone(),
        FileManager::new(storage_root.path()),
        cache.clone(),
        Arc::new(LogNotifier),
    );

    let translator = Arc::new(MockTranslator {
        replies: mt_replies,
        call_count: translate_count.clone(),
        seen_inputs: seen_inputs.clone(),
    });

    let ctx = Arc::new(PipelineContext {
        scrapers: Arc::new(MockScraperFactory {
            pages_by_url,
            failing_urls,
            fetch_count: fetch_count.clone(),
        }),
        ocr: Arc::new(MockOcr {
            blocks_by_marker,
            detect_count: detect_count.clone(),
        }),
        llm: translator.clone(),
        free: translator,
        ner: Arc::new(HeuristicNerBackend::new()),
        glossary: glossary.clone(),
        catalog: catalog.clone(),
        processor: Arc::new(TaggingProcessor),
        cache: cache.clone(),
        lock,
        jobs: jobs.clone(),
        publisher,
        imaging_workers: Arc::new(Semaphore::new(4)),
    });

    Harness {
        pipeline: ChapterPipeline::new(ctx),
        jobs,
        catalog,
        glossary,
        cache,
        fetch_count,
        detect_count,
        translate_count,
        seen_inputs,
        lock_acquires: store,
        storage_root,
    }
}

fn request(url: &str, backend: TranslationBackend) -> PipelineRequest {
    PipelineRequest {
        chapter_url: url.to_string(),
        source_lang: Some("en".to_string()),
        target_lang: "tr".to_string(),
        mode: Mode::Clean,
        backend,
        series_name: None,
        task_id: format!("task-{url}"),
        user_id: None,
        use_cache: true,
    }
}

async fn create_job(harness: &Harness, req: &PipelineRequest) {
    harness
        .jobs
        .create(&req.task_id, None, &req.chapter_url, &req.target_lang, req.mode.as_str())
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Scenario 1: a preloaded cache entry short-circuits everything - no
/// scraping, no OCR, no translation, and the lock is never taken.
#[tokio::test]
async fn cache_hit_skips_all_work() {
    let harness = build_harness(HashMap::new(), Vec::new(), HashMap::new(), HashMap::new());
    let url = "https://example.com/series/chapter-1";

    let preloaded = ChapterResult {
        pages: vec![b"cached-page".to_vec()],
        cleaned_pages: vec![Vec::new()],
        total: 1,
        original_texts: vec!["A".to_string()],
        translated_texts: vec!["A'".to_string()],
        blocks: vec![Vec::new()],
        message: None,
    };
    let fingerprint = Fingerprint::new(url, "tr", TranslationBackend::Mt, "clean");
    harness.cache.put(&fingerprint, &preloaded).await;

    let req = request(url, TranslationBackend::Mt);
    create_job(&harness, &req).await;
    let result = harness.pipeline.run(req.clone()).await.unwrap();

    assert_eq!(result.pages, preloaded.pages);
    assert_eq!(result.translated_texts, preloaded.translated_texts);
    assert_eq!(harness.fetch_count.load(Ordering::SeqCst), 0);
    assert_eq!(harness.detect_count.load(Ordering::SeqCst), 0);
    assert_eq!(harness.translate_count.load(Ordering::SeqCst), 0);
    assert_eq!(harness.lock_acquires.set_nx_count.load(Ordering::SeqCst), 0);

    let job = harness.jobs.get(&req.task_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
}

/// Scenario 2: clean chapter through the MT backend. Three pages, blocks
/// [[A,B],[C],[]], scripted translations; the textless page passes through
/// byte-identical.
#[tokio::test]
async fn clean_single_chapter_mt_backend() {
    let url = "https://example.com/series/chapter-2";
    let pages = vec![page(1), page(2), page(3)];
    let harness = build_harness(
        HashMap::from([(url.to_string(), pages.clone())]),
        Vec::new(),
        HashMap::from([
            (1, vec!["A".to_string(), "B".to_string()]),
            (2, vec!["C".to_string()]),
            (3, vec![]),
        ]),
        HashMap::from([
            ("A".to_string(), "a'".to_string()),
            ("B".to_string(), "b'".to_string()),
            ("C".to_string(), "c'".to_string()),
        ]),
    );

    let req = request(url, TranslationBackend::Mt);
    create_job(&harness, &req).await;
    let result = harness.pipeline.run(req).await.unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.original_texts, vec!["A", "B", "C"]);
    assert_eq!(result.translated_texts, vec!["a'", "b'", "c'"]);
    assert_eq!(result.blocks.len(), 3);
    assert_eq!(result.blocks[0].len(), 2);
    assert_eq!(result.blocks[2].len(), 0);

    // Pages with text were cleaned then rendered; the textless page is the
    // untouched source bytes
    assert_eq!(result.pages[0], [b"RC".as_slice(), &page(1)].concat());
    assert_eq!(result.pages[1], [b"RC".as_slice(), &page(2)].concat());
    assert_eq!(result.pages[2], pages[2]);
    assert_eq!(result.cleaned_pages[0], [b"C".as_slice(), &page(1)].concat());
    assert!(result.cleaned_pages[2].is_empty());

    // Exactly one translator call for the whole chapter
    assert_eq!(harness.translate_count.load(Ordering::SeqCst), 1);
}

/// Empty OCR across the whole chapter: source pages come back unchanged and
/// the translator is never called.
#[tokio::test]
async fn empty_ocr_returns_sources_untouched() {
    let url = "https://example.com/series/chapter-3";
    let pages = vec![page(7), page(8)];
    let harness = build_harness(
        HashMap::from([(url.to_string(), pages.clone())]),
        Vec::new(),
        HashMap::new(),
        HashMap::new(),
    );

    let req = request(url, TranslationBackend::Mt);
    create_job(&harness, &req).await;
    let result = harness.pipeline.run(req).await.unwrap();

    assert_eq!(result.total, 2);
    assert_eq!(result.pages, pages);
    assert!(result.original_texts.is_empty());
    assert!(result.translated_texts.is_empty());
    assert!(result.message.is_some());
    assert_eq!(harness.translate_count.load(Ordering::SeqCst), 0);
}

/// Scenario 3: glossary terms rewrite the translator's inputs, whole-token
/// and case-insensitive.
#[tokio::test]
async fn glossary_rewrites_mt_inputs() {
    let url = "https://example.com/series/chapter-4";
    let series = "Glossary Series";
    let harness = build_harness(
        HashMap::from([(url.to_string(), vec![page(1)])]),
        Vec::new(),
        HashMap::from([(1, vec!["Hello Jin!".to_string(), "Where is jin?".to_string()])]),
        HashMap::new(),
    );

    // The series must exist for a dictionary to attach to; publish once to
    // create it, then seed the glossary
    let seed = ChapterResult {
        pages: vec![b"seed".to_vec()],
        cleaned_pages: vec![Vec::new()],
        total: 1,
        original_texts: Vec::new(),
        translated_texts: Vec::new(),
        blocks: vec![Vec::new()],
        message: None,
    };
    let publish_ctx = scanlate::publisher::PublishContext {
        chapter_url: "https://example.com/series/chapter-0".to_string(),
        source_lang: "en".to_string(),
        target_lang: "tr".to_string(),
        series_name: series.to_string(),
        series_description: None,
        replace_existing: true,
        task_id: None,
        user_id: None,
    };
    let publisher = Publisher::new(
        harness.catalog.clone(),
        FileManager::new(harness.storage_root.path()),
        harness.cache.clone(),
        Arc::new(LogNotifier),
    );
    publisher.publish(&seed, &publish_ctx).await.unwrap();

    let series_id = harness
        .catalog
        .series_id_by_title(series)
        .await
        .unwrap()
        .unwrap();
    let dict = harness
        .glossary
        .get_or_create(series_id, "en", "tr")
        .await
        .unwrap();
    harness
        .glossary
        .upsert(dict.id, "Jin", "Cin", ProperNounKind::ConfirmedYes)
        .await
        .unwrap();

    let mut req = request(url, TranslationBackend::Mt);
    req.series_name = Some(series.to_string());
    create_job(&harness, &req).await;
    let result = harness.pipeline.run(req).await.unwrap();

    // The translator saw the rewritten inputs
    let inputs = harness.seen_inputs.lock().unwrap();
    let chapter_inputs = &inputs[0];
    assert_eq!(chapter_inputs, &vec!["Hello Cin!", "Where is Cin?"]);
    drop(inputs);

    // And the scripted identity translation preserved the locked tokens
    assert_eq!(result.translated_texts[0], "X:Hello Cin!");
    assert_eq!(result.translated_texts[1], "X:Where is Cin?");
}

/// Scenario 5: a batch continues past one failing chapter and accounts for
/// every chapter.
#[tokio::test]
async fn batch_with_one_failing_chapter() {
    let base = "https://example.com/series/chapter-10";
    let urls: Vec<String> = (10..=12)
        .map(|n| format!("https://example.com/series/chapter-{n}"))
        .collect();
    let mut pages_by_url = HashMap::new();
    pages_by_url.insert(urls[0].clone(), vec![page(1)]);
    // chapter-11 is the failing one; no pages registered for it
    pages_by_url.insert(urls[2].clone(), vec![page(1)]);

    let harness = build_harness(
        pages_by_url,
        vec!["chapter-11".to_string()],
        HashMap::from([(1, vec!["Hi".to_string()])]),
        HashMap::new(),
    );

    let orchestrator = BatchOrchestrator::new(
        harness.pipeline.clone(),
        BatchSettings {
            chapter_timeout_secs: 30,
            poll_interval_ms: 50,
        },
    );

    let result = orchestrator
        .run(BatchRequest {
            sample_url: base.to_string(),
            chapters: vec![10, 11, 12],
            source_lang: "en".to_string(),
            target_lang: "tr".to_string(),
            mode: Mode::Clean,
            backend: TranslationBackend::Mt,
            series_name: Some("Batch Series".to_string()),
            user_id: None,
        })
        .await
        .unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.completed, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(
        result.results[&11].status,
        scanlate::orchestrator::ChapterStatus::Failed
    );
    assert!(result.results[&11].error.is_some());

    // The two successful chapters were published
    let series = harness
        .catalog
        .resolve_series("Batch Series")
        .await
        .unwrap()
        .expect("series created by publish");
    let chapters = harness.catalog.chapters_of(series.id).await.unwrap();
    let numbers: Vec<u32> = chapters.iter().map(|c| c.chapter_number).collect();
    assert_eq!(numbers, vec![10, 12]);
}

/// Invariant 6: two sequential runs of the same fingerprint yield identical
/// results, the second straight from the cache.
#[tokio::test]
async fn repeat_run_hits_cache_with_identical_result() {
    let url = "https://example.com/series/chapter-6";
    let harness = build_harness(
        HashMap::from([(url.to_string(), vec![page(1)])]),
        Vec::new(),
        HashMap::from([(1, vec!["Hello".to_string()])]),
        HashMap::new(),
    );

    let req1 = request(url, TranslationBackend::Mt);
    create_job(&harness, &req1).await;
    let first = harness.pipeline.run(req1).await.unwrap();

    let mut req2 = request(url, TranslationBackend::Mt);
    req2.task_id = "task-second".to_string();
    create_job(&harness, &req2).await;
    let second = harness.pipeline.run(req2).await.unwrap();

    assert_eq!(first.pages, second.pages);
    assert_eq!(first.translated_texts, second.translated_texts);
    // One real build: the scraper ran once
    assert_eq!(harness.fetch_count.load(Ordering::SeqCst), 1);
}

/// The lock is released after both success and failure.
#[tokio::test]
async fn lock_released_on_both_paths() {
    let ok_url = "https://example.com/series/chapter-7";
    let bad_url = "https://example.com/series/chapter-8";
    let harness = build_harness(
        HashMap::from([(ok_url.to_string(), vec![page(1)])]),
        vec!["chapter-8".to_string()],
        HashMap::from([(1, vec!["Hi".to_string()])]),
        HashMap::new(),
    );

    let req = request(ok_url, TranslationBackend::Mt);
    create_job(&harness, &req).await;
    harness.pipeline.run(req).await.unwrap();

    let bad_req = request(bad_url, TranslationBackend::Mt);
    create_job(&harness, &bad_req).await;
    let err = harness.pipeline.run(bad_req.clone()).await.unwrap_err();
    assert!(matches!(err, ScanlateError::NotFound(_)));

    // Both locks were taken and both were released
    assert_eq!(harness.lock_acquires.set_nx_count.load(Ordering::SeqCst), 2);
    let lock = BuildLock::new(harness.lock_acquires.clone(), 3600);
    for (url, backend) in [(ok_url, TranslationBackend::Mt), (bad_url, TranslationBackend::Mt)] {
        let fp = Fingerprint::new(url, "tr", backend, "clean");
        assert!(!lock.is_held(&fp).await, "lock still held for {url}");
    }

    // The failed job carries the error message
    let job = harness.jobs.get(&bad_req.task_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("reader container"));
}

/// Failure leaves nothing in the cache.
#[tokio::test]
async fn failure_writes_no_cache_entry() {
    let bad_url = "https://example.com/series/chapter-9";
    let harness = build_harness(
        HashMap::new(),
        vec!["chapter-9".to_string()],
        HashMap::new(),
        HashMap::new(),
    );

    let req = request(bad_url, TranslationBackend::Mt);
    create_job(&harness, &req).await;
    harness.pipeline.run(req).await.unwrap_err();

    let fp = Fingerprint::new(bad_url, "tr", TranslationBackend::Mt, "clean");
    let cached: Option<ChapterResult> = harness.cache.get(&fp).await;
    assert!(cached.is_none());
}
