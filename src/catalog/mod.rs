//! The catalog triple: series, chapters, translations.
//!
//! Series are matched by normalized title (lowercase, punctuation stripped,
//! whitespace collapsed) with a fuzzy contains fallback. Chapters are unique
//! per (series, number), translations per (chapter, language pair). Rows are
//! only ever written by the publisher, in one transaction per commit.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::DbPool;
use crate::error::Result;

/// Minimum normalized-title similarity for a fuzzy series match.
const FUZZY_MATCH_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub source_site: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub series_id: i64,
    pub chapter_number: u32,
    pub title: Option<String>,
    pub source_url: Option<String>,
    pub page_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub id: i64,
    pub chapter_id: i64,
    pub source_lang: String,
    pub target_lang: String,
    pub storage_path: String,
    pub page_count: u32,
    pub job_id: Option<String>,
}

/// Everything the publisher commits in one transaction.
#[derive(Debug, Clone)]
pub struct CommitArgs {
    pub series_title: String,
    pub series_description: Option<String>,
    pub series_source_url: Option<String>,
    pub series_source_site: Option<String>,
    pub chapter_number: u32,
    pub chapter_title: Option<String>,
    pub chapter_source_url: Option<String>,
    pub page_count: u32,
    pub source_lang: String,
    pub target_lang: String,
    pub storage_path: String,
    pub job_id: Option<String>,
    pub replace_existing: bool,
}

/// Result of a commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub series: Series,
    pub chapter: Chapter,
    pub translation: Translation,
    pub created_series: bool,
    pub created_chapter: bool,
    /// Storage path of a replaced translation row, when one was overwritten.
    pub replaced_storage_path: Option<String>,
    /// True when an existing translation was kept (replace_existing=false).
    pub kept_existing: bool,
}

/// Catalog repository over SQLite.
#[derive(Clone)]
pub struct CatalogRepository {
    pool: DbPool,
}

impl CatalogRepository {
    pub fn new(pool: DbPool) -> Result<Self> {
        let repo = Self { pool };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS series (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                title            TEXT NOT NULL,
                title_normalized TEXT NOT NULL,
                description      TEXT,
                source_url       TEXT,
                source_site      TEXT,
                author           TEXT,
                created_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_series_normalized
                ON series(title_normalized);
            CREATE TABLE IF NOT EXISTS chapters (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                series_id      INTEGER NOT NULL REFERENCES series(id) ON DELETE CASCADE,
                chapter_number INTEGER NOT NULL,
                title          TEXT,
                source_url     TEXT,
                page_count     INTEGER NOT NULL DEFAULT 0,
                created_at     TEXT NOT NULL,
                UNIQUE(series_id, chapter_number)
            );
            CREATE TABLE IF NOT EXISTS translations (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                chapter_id   INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
                source_lang  TEXT NOT NULL,
                target_lang  TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                page_count   INTEGER NOT NULL DEFAULT 0,
                job_id       TEXT,
                created_at   TEXT NOT NULL,
                UNIQUE(chapter_id, source_lang, target_lang)
            );",
        )?;
        Ok(())
    }

    /// Find a series by title: exact normalized match first, then fuzzy
    /// (contains / is-contained with similarity over normalized forms).
    pub async fn resolve_series(&self, title: &str) -> Result<Option<Series>> {
        let pool = self.pool.clone();
        let title = title.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Series>> {
            let conn = pool.get()?;
            Ok(resolve_series_sync(&conn, &title)?)
        })
        .await?
    }

    /// Series id for a title, used to key glossary dictionaries.
    pub async fn series_id_by_title(&self, title: &str) -> Result<Option<i64>> {
        Ok(self.resolve_series(title).await?.map(|s| s.id))
    }

    /// Commit series + chapter + translation atomically. The blob must be
    /// written before calling this; the caller cleans it up if this fails.
    pub async fn commit_translation(&self, args: CommitArgs) -> Result<CommitOutcome> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<CommitOutcome> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let outcome = commit_in_tx(&tx, &args)?;
            tx.commit()?;
            info!(
                "published chapter {} of series {} ({}->{})",
                args.chapter_number, outcome.series.id, args.source_lang, args.target_lang
            );
            Ok(outcome)
        })
        .await?
    }

    /// Translation row for a chapter/language pair, if present.
    pub async fn get_translation(
        &self,
        chapter_id: i64,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Option<Translation>> {
        let pool = self.pool.clone();
        let (source_lang, target_lang) = (source_lang.to_string(), target_lang.to_string());
        tokio::task::spawn_blocking(move || -> Result<Option<Translation>> {
            let conn = pool.get()?;
            let row = conn
                .query_row(
                    "SELECT id, chapter_id, source_lang, target_lang, storage_path,
                            page_count, job_id
                     FROM translations
                     WHERE chapter_id = ?1 AND source_lang = ?2 AND target_lang = ?3",
                    params![chapter_id, source_lang, target_lang],
                    row_to_translation,
                )
                .optional()?;
            Ok(row)
        })
        .await?
    }

    /// Chapters of a series, ordered by number.
    pub async fn chapters_of(&self, series_id: i64) -> Result<Vec<Chapter>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Chapter>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT id, series_id, chapter_number, title, source_url, page_count
                 FROM chapters WHERE series_id = ?1 ORDER BY chapter_number",
            )?;
            let chapters = stmt
                .query_map(params![series_id], row_to_chapter)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(chapters)
        })
        .await?
    }
}

/// Normalize a title for comparison: lowercase, strip non-word characters,
/// collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_series_sync(conn: &Connection, title: &str) -> rusqlite::Result<Option<Series>> {
    let normalized = normalize_title(title);

    // Exact match on normalized titles
    if let Some(series) = conn
        .query_row(
            "SELECT id, title, description, source_url, source_site, author
             FROM series WHERE title_normalized = ?1",
            params![normalized],
            row_to_series,
        )
        .optional()?
    {
        return Ok(Some(series));
    }

    // Fuzzy: contains / is-contained over normalized forms, best ratio wins
    let mut stmt = conn.prepare(
        "SELECT id, title, description, source_url, source_site, author, title_normalized
         FROM series",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row_to_series(row)?, row.get::<_, String>(6)?))
    })?;

    let mut best: Option<(Series, f64)> = None;
    for row in rows {
        let (series, candidate) = row?;
        if candidate.is_empty() || normalized.is_empty() {
            continue;
        }
        if candidate.contains(&normalized) || normalized.contains(&candidate) {
            let score = candidate.len().min(normalized.len()) as f64
                / candidate.len().max(normalized.len()) as f64;
            if score > best.as_ref().map_or(0.0, |(_, s)| *s) {
                best = Some((series, score));
            }
        }
    }

    Ok(best
        .filter(|(_, score)| *score >= FUZZY_MATCH_THRESHOLD)
        .map(|(series, _)| series))
}

fn commit_in_tx(tx: &Transaction<'_>, args: &CommitArgs) -> Result<CommitOutcome> {
    let now = Utc::now().to_rfc3339();

    // Series: match or create; existing rows only gain missing metadata
    let existing = resolve_series_sync(tx, &args.series_title)?;
    let (series, created_series) = match existing {
        Some(series) => {
            tx.execute(
                "UPDATE series SET
                     description = COALESCE(description, ?2),
                     source_url = COALESCE(source_url, ?3),
                     source_site = COALESCE(source_site, ?4)
                 WHERE id = ?1",
                params![
                    series.id,
                    args.series_description,
                    args.series_source_url,
                    args.series_source_site
                ],
            )?;
            let refreshed = tx.query_row(
                "SELECT id, title, description, source_url, source_site, author
                 FROM series WHERE id = ?1",
                params![series.id],
                row_to_series,
            )?;
            (refreshed, false)
        }
        None => {
            tx.execute(
                "INSERT INTO series
                     (title, title_normalized, description, source_url, source_site, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    args.series_title.trim(),
                    normalize_title(&args.series_title),
                    args.series_description,
                    args.series_source_url,
                    args.series_source_site,
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            (
                Series {
                    id,
                    title: args.series_title.trim().to_string(),
                    description: args.series_description.clone(),
                    source_url: args.series_source_url.clone(),
                    source_site: args.series_source_site.clone(),
                    author: None,
                },
                true,
            )
        }
    };

    // Chapter: update in place or create, per the replace policy
    let existing_chapter = tx
        .query_row(
            "SELECT id, series_id, chapter_number, title, source_url, page_count
             FROM chapters WHERE series_id = ?1 AND chapter_number = ?2",
            params![series.id, args.chapter_number],
            row_to_chapter,
        )
        .optional()?;

    let (chapter, created_chapter) = match existing_chapter {
        Some(chapter) => {
            if args.replace_existing {
                tx.execute(
                    "UPDATE chapters SET
                         title = COALESCE(?2, title),
                         source_url = COALESCE(?3, source_url),
                         page_count = ?4
                     WHERE id = ?1",
                    params![
                        chapter.id,
                        args.chapter_title,
                        args.chapter_source_url,
                        args.page_count
                    ],
                )?;
            }
            let refreshed = tx.query_row(
                "SELECT id, series_id, chapter_number, title, source_url, page_count
                 FROM chapters WHERE id = ?1",
                params![chapter.id],
                row_to_chapter,
            )?;
            (refreshed, false)
        }
        None => {
            tx.execute(
                "INSERT INTO chapters
                     (series_id, chapter_number, title, source_url, page_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    series.id,
                    args.chapter_number,
                    args.chapter_title,
                    args.chapter_source_url,
                    args.page_count,
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            (
                Chapter {
                    id,
                    series_id: series.id,
                    chapter_number: args.chapter_number,
                    title: args.chapter_title.clone(),
                    source_url: args.chapter_source_url.clone(),
                    page_count: args.page_count,
                },
                true,
            )
        }
    };

    // Translation: overwrite, keep, or insert
    let existing_translation = tx
        .query_row(
            "SELECT id, chapter_id, source_lang, target_lang, storage_path, page_count, job_id
             FROM translations
             WHERE chapter_id = ?1 AND source_lang = ?2 AND target_lang = ?3",
            params![chapter.id, args.source_lang, args.target_lang],
            row_to_translation,
        )
        .optional()?;

    let (translation, replaced_storage_path, kept_existing) = match existing_translation {
        Some(existing) if args.replace_existing => {
            tx.execute(
                "UPDATE translations SET storage_path = ?2, page_count = ?3, job_id = ?4
                 WHERE id = ?1",
                params![existing.id, args.storage_path, args.page_count, args.job_id],
            )?;
            let replaced = (existing.storage_path != args.storage_path)
                .then(|| existing.storage_path.clone());
            (
                Translation {
                    storage_path: args.storage_path.clone(),
                    page_count: args.page_count,
                    job_id: args.job_id.clone(),
                    ..existing
                },
                replaced,
                false,
            )
        }
        Some(existing) => {
            // Keep the committed row untouched; the new blob is orphaned and
            // eligible for cleanup by the caller
            (existing, None, true)
        }
        None => {
            tx.execute(
                "INSERT INTO translations
                     (chapter_id, source_lang, target_lang, storage_path, page_count,
                      job_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chapter.id,
                    args.source_lang,
                    args.target_lang,
                    args.storage_path,
                    args.page_count,
                    args.job_id,
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            (
                Translation {
                    id,
                    chapter_id: chapter.id,
                    source_lang: args.source_lang.clone(),
                    target_lang: args.target_lang.clone(),
                    storage_path: args.storage_path.clone(),
                    page_count: args.page_count,
                    job_id: args.job_id.clone(),
                },
                None,
                false,
            )
        }
    };

    Ok(CommitOutcome {
        series,
        chapter,
        translation,
        created_series,
        created_chapter,
        replaced_storage_path,
        kept_existing,
    })
}

fn row_to_series(row: &rusqlite::Row<'_>) -> rusqlite::Result<Series> {
    Ok(Series {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        source_url: row.get(3)?,
        source_site: row.get(4)?,
        author: row.get(5)?,
    })
}

fn row_to_chapter(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chapter> {
    Ok(Chapter {
        id: row.get(0)?,
        series_id: row.get(1)?,
        chapter_number: row.get::<_, i64>(2)? as u32,
        title: row.get(3)?,
        source_url: row.get(4)?,
        page_count: row.get::<_, i64>(5)? as u32,
    })
}

fn row_to_translation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Translation> {
    Ok(Translation {
        id: row.get(0)?,
        chapter_id: row.get(1)?,
        source_lang: row.get(2)?,
        target_lang: row.get(3)?,
        storage_path: row.get(4)?,
        page_count: row.get::<_, i64>(5)? as u32,
        job_id: row.get(6)?,
    })
}
