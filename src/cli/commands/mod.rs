//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific
//! modules.

mod batch;
mod context;
mod glossary_cmd;
mod status;
mod translate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::pipeline::Mode;
use crate::translator::TranslationBackend;

/// Check argv for the verbose flag before clap runs, so logging can be
/// initialized first.
pub fn is_verbose() -> bool {
    std::env::args().any(|a| a == "-v" || a == "--verbose")
}

/// Translator backend choice on the CLI surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendArg {
    /// High-quality LLM translation (backend 1)
    #[default]
    Llm,
    /// Free machine translation (backend 2)
    Free,
}

impl From<BackendArg> for TranslationBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Llm => TranslationBackend::Llm,
            BackendArg::Free => TranslationBackend::Mt,
        }
    }
}

/// Output mode choice on the CLI surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    /// Inpaint source text away and render the translation
    #[default]
    Clean,
    /// Keep pages untouched; translations ship in metadata only
    Overlay,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Clean => Mode::Clean,
            ModeArg::Overlay => Mode::Overlay,
        }
    }
}

#[derive(Parser)]
#[command(name = "scanlate")]
#[command(about = "Webtoon and manga chapter translation pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to scanlate.toml in the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a single chapter
    Translate {
        /// Chapter URL
        url: String,

        /// Target language code
        #[arg(short, long, default_value = "tr")]
        target: String,

        /// Source language code (inferred from the URL when omitted)
        #[arg(short, long)]
        source: Option<String>,

        /// Translation backend
        #[arg(short, long, value_enum, default_value_t = BackendArg::Llm)]
        backend: BackendArg,

        /// Output mode
        #[arg(short, long, value_enum, default_value_t = ModeArg::Clean)]
        mode: ModeArg,

        /// Series name; enables glossary use and auto-publish
        #[arg(long)]
        series: Option<String>,

        /// Skip the result cache
        #[arg(long)]
        no_cache: bool,

        /// Directory for the finished pages when not publishing
        #[arg(short, long, default_value = "output")]
        out: PathBuf,
    },

    /// Translate a range of chapters
    Batch {
        /// Sample chapter URL; its numeric segment is templated
        url: String,

        /// Chapter range expression, e.g. "1-10" or "1-5,10-15"
        range: String,

        /// Target language code
        #[arg(short, long, default_value = "tr")]
        target: String,

        /// Source language code
        #[arg(short, long, default_value = "en")]
        source: String,

        /// Translation backend
        #[arg(short, long, value_enum, default_value_t = BackendArg::Llm)]
        backend: BackendArg,

        /// Output mode
        #[arg(short, long, value_enum, default_value_t = ModeArg::Clean)]
        mode: ModeArg,

        /// Series name; enables glossary use and auto-publish
        #[arg(long)]
        series: Option<String>,
    },

    /// Preview a chapter: discovered title and page count, no downloads
    Analyze {
        /// Chapter URL
        url: String,
    },

    /// Inspect or edit a series' glossary
    Glossary {
        #[command(subcommand)]
        action: glossary_cmd::GlossaryAction,
    },

    /// Show the status of a translation job
    Status {
        /// Job task id
        task_id: String,
    },
}

/// Parse argv and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Translate {
            url,
            target,
            source,
            backend,
            mode,
            series,
            no_cache,
            out,
        } => {
            translate::run(
                &settings, url, target, source, backend.into(), mode.into(), series, !no_cache,
                out,
            )
            .await
        }
        Commands::Batch {
            url,
            range,
            target,
            source,
            backend,
            mode,
            series,
        } => {
            batch::run(
                &settings, url, range, target, source, backend.into(), mode.into(), series,
            )
            .await
        }
        Commands::Analyze { url } => analyze(&settings, &url).await,
        Commands::Glossary { action } => glossary_cmd::run(&settings, action).await,
        Commands::Status { task_id } => status::run(&settings, &task_id).await,
    }
}

async fn analyze(settings: &Settings, url: &str) -> anyhow::Result<()> {
    use crate::scrapers::{Scraper, SiteScraper};

    let mut scraper = SiteScraper::new(settings.scraper.clone())?;
    let info = scraper.analyze(url).await;
    scraper.close().await;
    let info = info?;

    println!("Chapter: {}", info.title);
    println!("Pages:   {}", info.page_count);
    Ok(())
}
