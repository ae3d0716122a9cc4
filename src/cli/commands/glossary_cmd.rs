//! `scanlate glossary` - inspect or edit a series' glossary.

use clap::Subcommand;

use crate::catalog::CatalogRepository;
use crate::config::Settings;
use crate::db;
use crate::glossary::GlossaryStore;

#[derive(Subcommand)]
pub enum GlossaryAction {
    /// List the glossary entries of a series
    List {
        /// Series title
        series: String,
        #[arg(short, long, default_value = "en")]
        source: String,
        #[arg(short, long, default_value = "tr")]
        target: String,
    },
    /// Show a single term
    Inspect {
        /// Series title
        series: String,
        /// Source term
        original: String,
        #[arg(short, long, default_value = "en")]
        source: String,
        #[arg(short, long, default_value = "tr")]
        target: String,
    },
    /// Add or update a term
    Set {
        series: String,
        /// Source term
        original: String,
        /// Locked translation
        translation: String,
        #[arg(short, long, default_value = "en")]
        source: String,
        #[arg(short, long, default_value = "tr")]
        target: String,
    },
    /// Remove a term
    Remove {
        series: String,
        /// Source term
        original: String,
        #[arg(short, long, default_value = "en")]
        source: String,
        #[arg(short, long, default_value = "tr")]
        target: String,
    },
}

pub async fn run(settings: &Settings, action: GlossaryAction) -> anyhow::Result<()> {
    let pool = db::open(&settings.database.path)?;
    let catalog = CatalogRepository::new(pool.clone())?;
    let glossary = GlossaryStore::new(
        pool,
        settings.glossary.max_entries,
        settings.glossary.min_keep_usage,
    )?;

    let (series, source, target) = match &action {
        GlossaryAction::List { series, source, target }
        | GlossaryAction::Inspect { series, source, target, .. }
        | GlossaryAction::Set { series, source, target, .. }
        | GlossaryAction::Remove { series, source, target, .. } => {
            (series.clone(), source.clone(), target.clone())
        }
    };

    let Some(series_id) = catalog.series_id_by_title(&series).await? else {
        anyhow::bail!("series not found: {series}");
    };
    let dict = glossary.get_or_create(series_id, &source, &target).await?;

    match action {
        GlossaryAction::List { .. } => {
            let entries = glossary.entries(dict.id).await?;
            if entries.is_empty() {
                println!("No glossary entries for {series} ({source}->{target})");
                return Ok(());
            }
            println!("Glossary for {series} ({source}->{target}):");
            for entry in entries {
                println!(
                    "  {} -> {}  (used {}x, {:?})",
                    entry.original, entry.translation, entry.usage_count, entry.kind
                );
            }
        }
        GlossaryAction::Inspect { original, .. } => {
            match glossary.lookup(dict.id, &original).await? {
                Some(entry) => {
                    println!("{} -> {}", entry.original, entry.translation);
                    println!("  used:      {}x", entry.usage_count);
                    println!("  kind:      {:?}", entry.kind);
                    println!("  last used: {}", entry.last_used_at.to_rfc3339());
                }
                None => println!("No such term: {original}"),
            }
        }
        GlossaryAction::Set {
            original,
            translation,
            ..
        } => {
            let entry = glossary
                .upsert(
                    dict.id,
                    &original,
                    &translation,
                    crate::glossary::ProperNounKind::ConfirmedYes,
                )
                .await?;
            println!("Set {} -> {}", entry.original, entry.translation);
        }
        GlossaryAction::Remove { original, .. } => {
            if glossary.remove(dict.id, &original).await? {
                println!("Removed {original}");
            } else {
                println!("No such term: {original}");
            }
        }
    }

    Ok(())
}
