//! Transactional commit of a finished translation into the catalog.
//!
//! Blob first, then one catalog transaction for the series/chapter/
//! translation upserts. Any post-blob failure removes the blob directory
//! again; a replaced translation's old directory is cleaned up after the
//! commit. Publish failures never fail the job that produced the
//! translation - the result is already cached.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::catalog::{CatalogRepository, CommitArgs, CommitOutcome};
use crate::error::{Result, ScanlateError};
use crate::orchestrator::extract_chapter_number;
use crate::pipeline::ChapterResult;
use crate::storage::{ChapterMetadata, FileManager};

/// Completion notification hand-off. Delivery is an external concern; the
/// default sink only logs.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn translation_completed(
        &self,
        user_id: i64,
        series_title: &str,
        chapter_number: u32,
        target_lang: &str,
    );
}

/// Default sink: log and move on.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn translation_completed(
        &self,
        user_id: i64,
        series_title: &str,
        chapter_number: u32,
        target_lang: &str,
    ) {
        info!(
            "notify user {user_id}: chapter {chapter_number} of {series_title} \
             is available in {target_lang}"
        );
    }
}

/// What the publisher needs to know about the job behind a result.
#[derive(Debug, Clone)]
pub struct PublishContext {
    pub chapter_url: String,
    pub source_lang: String,
    pub target_lang: String,
    pub series_name: String,
    pub series_description: Option<String>,
    pub replace_existing: bool,
    pub task_id: Option<String>,
    pub user_id: Option<i64>,
}

/// Publishes finished chapters into the catalog.
#[derive(Clone)]
pub struct Publisher {
    catalog: CatalogRepository,
    files: FileManager,
    cache: ResultCache,
    notifier: Arc<dyn NotificationSink>,
}

impl Publisher {
    pub fn new(
        catalog: CatalogRepository,
        files: FileManager,
        cache: ResultCache,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            catalog,
            files,
            cache,
            notifier,
        }
    }

    /// Commit `result` to the catalog. Returns the commit outcome; on any
    /// post-blob failure the new blob directory is removed before the error
    /// surfaces.
    pub async fn publish(
        &self,
        result: &ChapterResult,
        ctx: &PublishContext,
    ) -> Result<CommitOutcome> {
        let series_name = ctx.series_name.trim();
        if series_name.is_empty() {
            return Err(ScanlateError::Invariant(
                "series name required for publishing".to_string(),
            ));
        }
        if result.pages.is_empty() {
            return Err(ScanlateError::Invariant(
                "no pages in translation result".to_string(),
            ));
        }

        let chapter_number = extract_chapter_number(&ctx.chapter_url).unwrap_or(1);

        // Reuse the stored title when the series already exists so the blob
        // lands in the series' canonical directory
        let resolved = self.catalog.resolve_series(series_name).await?;
        let storage_title = resolved
            .as_ref()
            .map(|s| s.title.clone())
            .unwrap_or_else(|| series_name.to_string());

        // Blob write first. The directory layout is deterministic, so an
        // earlier translation of the same chapter lives at the same path;
        // drop it before writing to avoid stale trailing pages.
        let target_dir = self.files.chapter_dir(
            &storage_title,
            chapter_number,
            &ctx.source_lang,
            &ctx.target_lang,
        );
        if ctx.replace_existing {
            self.files.remove_chapter_dir(&target_dir)?;
        }

        let metadata = ChapterMetadata {
            original_texts: result.original_texts.clone(),
            translated_texts: result.translated_texts.clone(),
            blocks: result.blocks.clone(),
            chapter_url: ctx.chapter_url.clone(),
            source_lang: ctx.source_lang.clone(),
            target_lang: ctx.target_lang.clone(),
            task_id: ctx.task_id.clone(),
        };
        let storage_path = self.files.save_chapter(
            &storage_title,
            chapter_number,
            &result.pages,
            &metadata,
            &ctx.source_lang,
            &ctx.target_lang,
            Some(&result.cleaned_pages),
        )?;

        // One transaction across the catalog triple
        let args = CommitArgs {
            series_title: storage_title.clone(),
            series_description: ctx
                .series_description
                .clone()
                .or_else(|| Some(format!("Translated series: {series_name}"))),
            series_source_url: Some(ctx.chapter_url.clone()),
            series_source_site: site_of(&ctx.chapter_url),
            chapter_number,
            chapter_title: Some(format!("Chapter {chapter_number}")),
            chapter_source_url: Some(ctx.chapter_url.clone()),
            page_count: result.total as u32,
            source_lang: ctx.source_lang.clone(),
            target_lang: ctx.target_lang.clone(),
            storage_path: storage_path.to_string_lossy().into_owned(),
            job_id: ctx.task_id.clone(),
            replace_existing: ctx.replace_existing,
        };

        let outcome = match self.catalog.commit_translation(args).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Compensate: the catalog knows nothing of this blob
                if let Err(cleanup) = self.files.remove_chapter_dir(&storage_path) {
                    warn!("blob cleanup after failed commit also failed: {cleanup}");
                }
                return Err(ScanlateError::Storage(format!(
                    "catalog commit failed: {e}"
                )));
            }
        };

        if outcome.kept_existing {
            info!(
                "existing translation kept for chapter {chapter_number}; \
                 new blob at {} is eligible for cleanup",
                storage_path.display()
            );
        }

        // A replaced row may point at an older directory (series renamed);
        // it is unreferenced now
        if let Some(ref old_path) = outcome.replaced_storage_path {
            if let Err(e) = self.files.remove_chapter_dir(Path::new(old_path)) {
                warn!("failed to remove replaced blob {old_path}: {e}");
            }
        }

        self.cache
            .invalidate_variants(&ctx.chapter_url, &ctx.target_lang)
            .await;

        if let Some(user_id) = ctx.user_id {
            self.notifier
                .translation_completed(
                    user_id,
                    &outcome.series.title,
                    chapter_number,
                    &ctx.target_lang,
                )
                .await;
        }

        Ok(outcome)
    }
}

/// Host portion of the chapter URL, stored as the series' source site.
fn site_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
