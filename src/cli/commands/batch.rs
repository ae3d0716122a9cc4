//! `scanlate batch` - translate a range of chapters.

use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::orchestrator::{
    batch_progress, parse_chapter_range, BatchOrchestrator, BatchRequest, ChapterStatus,
};
use crate::pipeline::{ChapterPipeline, Mode};
use crate::translator::TranslationBackend;

use super::context::build_pipeline_context;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    settings: &Settings,
    url: String,
    range: String,
    target: String,
    source: String,
    backend: TranslationBackend,
    mode: Mode,
    series: Option<String>,
) -> anyhow::Result<()> {
    let chapters = parse_chapter_range(&range)?;
    println!(
        "Translating {} chapters ({range}) from {url}",
        chapters.len()
    );

    let ctx = build_pipeline_context(settings).await?;
    let pipeline = ChapterPipeline::new(ctx);
    let orchestrator = BatchOrchestrator::new(pipeline, settings.batch.clone());

    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .expect("static progress template"),
    );
    spinner.set_message(format!("processing {} chapters", chapters.len()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let result = orchestrator
        .run(BatchRequest {
            sample_url: url,
            chapters,
            source_lang: source,
            target_lang: target,
            mode,
            backend,
            series_name: series,
            user_id: None,
        })
        .await?;

    spinner.finish_and_clear();

    println!(
        "Batch finished: {}/{} completed ({}%), {} failed",
        result.completed,
        result.total,
        batch_progress(result.completed, result.total),
        result.failed
    );
    for (number, outcome) in &result.results {
        match outcome.status {
            ChapterStatus::Completed => println!("  chapter {number}: ok"),
            ChapterStatus::Failed => println!(
                "  chapter {number}: FAILED ({})",
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    Ok(())
}
