//! Batch translation across a chapter range.
//!
//! Expands a range expression into chapter numbers, templates one URL per
//! chapter, and spawns one pipeline task each. Tasks run under the shared
//! worker pool, so the orchestrator never blocks on a join: it polls each
//! chapter's result slot at a bounded interval with a hard per-chapter
//! timeout, and the batch continues past failures.

mod range;
mod urlgen;

pub use range::parse_chapter_range;
pub use urlgen::{extract_chapter_number, generate_chapter_urls};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BatchSettings;
use crate::error::Result;
use crate::language;
use crate::pipeline::{ChapterPipeline, ChapterResult, Mode, PipelineRequest};
use crate::translator::TranslationBackend;

/// Parameters for one batch run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Sample chapter URL whose numeric segment is templated.
    pub sample_url: String,
    pub chapters: Vec<u32>,
    pub source_lang: String,
    pub target_lang: String,
    pub mode: Mode,
    pub backend: TranslationBackend,
    pub series_name: Option<String>,
    pub user_id: Option<i64>,
}

/// Terminal state of one chapter in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Completed,
    Failed,
}

/// Per-chapter accounting entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterOutcome {
    pub status: ChapterStatus,
    pub task_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a batch run, keyed by chapter number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: BTreeMap<u32, ChapterOutcome>,
    pub series_name: Option<String>,
}

/// Slot a spawned pipeline task writes its outcome into; the orchestrator
/// polls it instead of joining the task.
type ResultSlot = Arc<Mutex<Option<std::result::Result<ChapterResult, String>>>>;

/// Fans chapter builds out across pipeline tasks.
pub struct BatchOrchestrator {
    pipeline: ChapterPipeline,
    settings: BatchSettings,
}

impl BatchOrchestrator {
    pub fn new(pipeline: ChapterPipeline, settings: BatchSettings) -> Self {
        Self { pipeline, settings }
    }

    /// Run a whole batch. Individual chapter failures (including timeouts)
    /// are recorded and the batch keeps going.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchResult> {
        language::validate_pair(&request.source_lang, &request.target_lang)?;

        let urls = generate_chapter_urls(&request.sample_url, &request.chapters);
        let total = urls.len();
        info!("batch of {total} chapters from {}", request.sample_url);

        // Fan out: one pipeline task per chapter, each with a result slot
        let mut slots: Vec<(u32, String, String, ResultSlot)> = Vec::with_capacity(total);
        for (number, url) in request.chapters.iter().zip(urls.into_iter()) {
            let task_id = Uuid::new_v4().to_string();
            let slot: ResultSlot = Arc::new(Mutex::new(None));
            let pipeline = self.pipeline.clone();
            let pipeline_request = PipelineRequest {
                chapter_url: url.clone(),
                source_lang: Some(request.source_lang.clone()),
                target_lang: request.target_lang.clone(),
                mode: request.mode,
                backend: request.backend,
                series_name: request.series_name.clone(),
                task_id: task_id.clone(),
                user_id: request.user_id,
                use_cache: true,
            };
            let slot_clone = slot.clone();
            tokio::spawn(async move {
                let outcome = pipeline
                    .run(pipeline_request)
                    .await
                    .map_err(|e| e.to_string());
                *slot_clone.lock().expect("result slot poisoned") = Some(outcome);
            });
            slots.push((*number, url, task_id, slot));
        }

        // Account for each chapter, polling its slot at a bounded interval
        let mut results = BTreeMap::new();
        let mut completed = 0usize;
        let mut failed = 0usize;

        for (number, url, task_id, slot) in slots {
            match self.wait_for_chapter(number, &slot).await {
                Ok(()) => {
                    completed += 1;
                    results.insert(
                        number,
                        ChapterOutcome {
                            status: ChapterStatus::Completed,
                            task_id,
                            url,
                            error: None,
                        },
                    );
                }
                Err(message) => {
                    error!("chapter {number} failed: {message}");
                    failed += 1;
                    results.insert(
                        number,
                        ChapterOutcome {
                            status: ChapterStatus::Failed,
                            task_id,
                            url,
                            error: Some(message),
                        },
                    );
                }
            }
        }

        Ok(BatchResult {
            total,
            completed,
            failed,
            results,
            series_name: request.series_name,
        })
    }

    /// Poll one chapter's slot until it resolves or the hard timeout lapses.
    async fn wait_for_chapter(&self, number: u32, slot: &ResultSlot) -> std::result::Result<(), String> {
        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms.max(100));
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.settings.chapter_timeout_secs);
        let mut waited = Duration::ZERO;
        let mut last_log = Duration::ZERO;

        loop {
            if let Some(outcome) = slot.lock().expect("result slot poisoned").take() {
                return outcome.map(|_| ());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "chapter {number} timed out after {}s",
                    self.settings.chapter_timeout_secs
                );
                return Err(format!(
                    "timed out after {}s",
                    self.settings.chapter_timeout_secs
                ));
            }

            tokio::time::sleep(poll_interval).await;
            waited += poll_interval;
            if waited - last_log >= Duration::from_secs(60) {
                info!("chapter {number} still processing ({}s)", waited.as_secs());
                last_log = waited;
            }
        }
    }
}

/// Batch progress as a completed/total percentage.
pub fn batch_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed * 100) / total) as u8
}
