//! `scanlate translate` - run the pipeline for one chapter.

use std::path::PathBuf;

use tracing::info;
use uuid::Uuid;

use crate::config::Settings;
use crate::imaging::PageFormat;
use crate::pipeline::{ChapterPipeline, Mode, PipelineRequest};
use crate::translator::TranslationBackend;

use super::context::build_pipeline_context;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    settings: &Settings,
    url: String,
    target: String,
    source: Option<String>,
    backend: TranslationBackend,
    mode: Mode,
    series: Option<String>,
    use_cache: bool,
    out: PathBuf,
) -> anyhow::Result<()> {
    let ctx = build_pipeline_context(settings).await?;
    let task_id = Uuid::new_v4().to_string();

    ctx.jobs
        .create(&task_id, None, &url, &target, mode.as_str())
        .await?;

    let pipeline = ChapterPipeline::new(ctx);
    let request = PipelineRequest {
        chapter_url: url.clone(),
        source_lang: source,
        target_lang: target.clone(),
        mode,
        backend,
        series_name: series.clone(),
        task_id: task_id.clone(),
        user_id: None,
        use_cache,
    };

    println!("Translating {url} (job {task_id})");
    let result = pipeline.run(request).await?;

    if let Some(message) = &result.message {
        println!("{message}");
    }
    println!(
        "Done: {} pages, {} text blocks translated",
        result.total,
        result.translated_texts.len()
    );

    if series.is_some() {
        println!("Published to the catalog (series: {})", series.unwrap_or_default());
    } else {
        // Not published: drop the finished pages into the output directory
        std::fs::create_dir_all(&out)?;
        for (idx, page) in result.pages.iter().enumerate() {
            let ext = PageFormat::detect(page).extension();
            let path = out.join(format!("page_{:03}.{ext}", idx + 1));
            std::fs::write(&path, page)?;
        }
        info!("wrote {} pages to {}", result.total, out.display());
        println!("Pages written to {}", out.display());
    }

    Ok(())
}
