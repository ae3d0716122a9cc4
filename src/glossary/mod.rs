//! Per-series translation glossaries.
//!
//! A dictionary is keyed by (series, source language, target language) and
//! maps source terms to locked translations so names stay consistent across
//! chapters and jobs. Lookups are case-insensitive; capacity is bounded with
//! usage-based eviction that never removes a term that has proven itself.

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::db::DbPool;
use crate::error::Result;

/// Whether a glossary term was confirmed as a proper noun by a human, or
/// only guessed by the NER pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProperNounKind {
    Auto,
    ConfirmedYes,
    ConfirmedNo,
}

impl ProperNounKind {
    fn as_str(&self) -> &'static str {
        match self {
            ProperNounKind::Auto => "auto",
            ProperNounKind::ConfirmedYes => "yes",
            ProperNounKind::ConfirmedNo => "no",
        }
    }

    fn parse(s: &str) -> ProperNounKind {
        match s {
            "yes" => ProperNounKind::ConfirmedYes,
            "no" => ProperNounKind::ConfirmedNo,
            _ => ProperNounKind::Auto,
        }
    }
}

/// A dictionary for one (series, language pair).
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub id: i64,
    pub series_id: i64,
    pub source_lang: String,
    pub target_lang: String,
}

/// One glossary term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub id: i64,
    pub original: String,
    pub translation: String,
    pub usage_count: i64,
    pub kind: ProperNounKind,
    pub last_used_at: DateTime<Utc>,
}

/// SQLite-backed glossary store.
#[derive(Clone)]
pub struct GlossaryStore {
    pool: DbPool,
    max_entries: usize,
    min_keep_usage: i64,
}

impl GlossaryStore {
    pub fn new(pool: DbPool, max_entries: usize, min_keep_usage: i64) -> Result<Self> {
        let store = Self {
            pool,
            max_entries,
            min_keep_usage,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dictionaries (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                series_id   INTEGER NOT NULL,
                source_lang TEXT NOT NULL,
                target_lang TEXT NOT NULL,
                UNIQUE(series_id, source_lang, target_lang)
            );
            CREATE TABLE IF NOT EXISTS dictionary_entries (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                dictionary_id  INTEGER NOT NULL REFERENCES dictionaries(id) ON DELETE CASCADE,
                original       TEXT NOT NULL,
                original_folded TEXT NOT NULL,
                translation    TEXT NOT NULL,
                usage_count    INTEGER NOT NULL DEFAULT 1,
                is_proper_noun TEXT NOT NULL DEFAULT 'auto',
                last_used_at   TEXT NOT NULL,
                UNIQUE(dictionary_id, original_folded)
            );
            CREATE INDEX IF NOT EXISTS idx_entries_dictionary
                ON dictionary_entries(dictionary_id, original_folded);",
        )?;
        Ok(())
    }

    /// Fetch or create the dictionary for a series/language pair.
    pub async fn get_or_create(
        &self,
        series_id: i64,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Dictionary> {
        let pool = self.pool.clone();
        let (source_lang, target_lang) = (source_lang.to_string(), target_lang.to_string());
        tokio::task::spawn_blocking(move || -> Result<Dictionary> {
            let conn = pool.get()?;
            let existing = conn
                .query_row(
                    "SELECT id FROM dictionaries
                     WHERE series_id = ?1 AND source_lang = ?2 AND target_lang = ?3",
                    params![series_id, source_lang, target_lang],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            let id = match existing {
                Some(id) => id,
                None => {
                    conn.execute(
                        "INSERT INTO dictionaries (series_id, source_lang, target_lang)
                         VALUES (?1, ?2, ?3)",
                        params![series_id, source_lang, target_lang],
                    )?;
                    info!(
                        "created dictionary for series {series_id} ({source_lang}->{target_lang})"
                    );
                    conn.last_insert_rowid()
                }
            };
            Ok(Dictionary {
                id,
                series_id,
                source_lang,
                target_lang,
            })
        })
        .await?
    }

    /// Case-insensitive term lookup.
    pub async fn lookup(&self, dictionary_id: i64, original: &str) -> Result<Option<GlossaryEntry>> {
        let pool = self.pool.clone();
        let folded = fold(original);
        tokio::task::spawn_blocking(move || -> Result<Option<GlossaryEntry>> {
            let conn = pool.get()?;
            let entry = conn
                .query_row(
                    "SELECT id, original, translation, usage_count, is_proper_noun, last_used_at
                     FROM dictionary_entries
                     WHERE dictionary_id = ?1 AND original_folded = ?2",
                    params![dictionary_id, folded],
                    row_to_entry,
                )
                .optional()?;
            Ok(entry)
        })
        .await?
    }

    /// Insert a term or update an existing one. Updating overwrites the
    /// translation, bumps usage, refreshes `last_used_at`, and overrides the
    /// proper-noun flag only when the caller's kind is not `Auto`.
    pub async fn upsert(
        &self,
        dictionary_id: i64,
        original: &str,
        translation: &str,
        kind: ProperNounKind,
    ) -> Result<GlossaryEntry> {
        let pool = self.pool.clone();
        let (original, translation) = (original.to_string(), translation.to_string());
        let folded = fold(&original);
        tokio::task::spawn_blocking(move || -> Result<GlossaryEntry> {
            let conn = pool.get()?;
            let now = Utc::now().to_rfc3339();
            let existing = conn
                .query_row(
                    "SELECT id FROM dictionary_entries
                     WHERE dictionary_id = ?1 AND original_folded = ?2",
                    params![dictionary_id, folded],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;

            let id = match existing {
                Some(id) => {
                    if kind == ProperNounKind::Auto {
                        conn.execute(
                            "UPDATE dictionary_entries
                             SET translation = ?2, usage_count = usage_count + 1,
                                 last_used_at = ?3
                             WHERE id = ?1",
                            params![id, translation, now],
                        )?;
                    } else {
                        conn.execute(
                            "UPDATE dictionary_entries
                             SET translation = ?2, usage_count = usage_count + 1,
                                 last_used_at = ?3, is_proper_noun = ?4
                             WHERE id = ?1",
                            params![id, translation, now, kind.as_str()],
                        )?;
                    }
                    id
                }
                None => {
                    conn.execute(
                        "INSERT INTO dictionary_entries
                         (dictionary_id, original, original_folded, translation,
                          usage_count, is_proper_noun, last_used_at)
                         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
                        params![dictionary_id, original, folded, translation, kind.as_str(), now],
                    )?;
                    conn.last_insert_rowid()
                }
            };

            let entry = conn.query_row(
                "SELECT id, original, translation, usage_count, is_proper_noun, last_used_at
                 FROM dictionary_entries WHERE id = ?1",
                params![id],
                row_to_entry,
            )?;
            Ok(entry)
        })
        .await?
    }

    /// Bump usage for an already-known term without touching its translation.
    pub async fn record_usage(&self, dictionary_id: i64, original: &str) -> Result<()> {
        let pool = self.pool.clone();
        let folded = fold(original);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            conn.execute(
                "UPDATE dictionary_entries
                 SET usage_count = usage_count + 1, last_used_at = ?3
                 WHERE dictionary_id = ?1 AND original_folded = ?2",
                params![dictionary_id, folded, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await?
    }

    /// All entries of a dictionary, longest original first (so callers can
    /// apply multi-word terms before their prefixes).
    pub async fn entries(&self, dictionary_id: i64) -> Result<Vec<GlossaryEntry>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<GlossaryEntry>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT id, original, translation, usage_count, is_proper_noun, last_used_at
                 FROM dictionary_entries
                 WHERE dictionary_id = ?1
                 ORDER BY LENGTH(original) DESC, original ASC",
            )?;
            let entries = stmt
                .query_map(params![dictionary_id], row_to_entry)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await?
    }

    /// Delete an entry by its original term. Returns whether a row existed.
    pub async fn remove(&self, dictionary_id: i64, original: &str) -> Result<bool> {
        let pool = self.pool.clone();
        let folded = fold(original);
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = pool.get()?;
            let changed = conn.execute(
                "DELETE FROM dictionary_entries
                 WHERE dictionary_id = ?1 AND original_folded = ?2",
                params![dictionary_id, folded],
            )?;
            Ok(changed > 0)
        })
        .await?
    }

    /// Rewrite texts with every known term, longest first, using
    /// case-insensitive whole-token matching. Returns the rewritten texts
    /// and the map of replacements that actually fired.
    pub async fn apply(
        &self,
        dictionary_id: i64,
        texts: &[String],
    ) -> Result<(Vec<String>, HashMap<String, String>)> {
        let entries = self.entries(dictionary_id).await?;
        Ok(apply_entries(&entries, texts))
    }

    /// Evict low-usage entries once the dictionary exceeds capacity. Terms
    /// with `usage_count >= min_keep_usage` are never removed, so the
    /// dictionary may legitimately stay above capacity.
    pub async fn cleanup(&self, dictionary_id: i64) -> Result<usize> {
        let pool = self.pool.clone();
        let max_entries = self.max_entries as i64;
        let min_keep = self.min_keep_usage;
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let conn = pool.get()?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM dictionary_entries WHERE dictionary_id = ?1",
                params![dictionary_id],
                |row| row.get(0),
            )?;
            if count <= max_entries {
                return Ok(0);
            }

            let removed = conn.execute(
                "DELETE FROM dictionary_entries
                 WHERE id IN (
                     SELECT id FROM dictionary_entries
                     WHERE dictionary_id = ?1 AND usage_count < ?2
                     ORDER BY usage_count ASC, last_used_at ASC
                     LIMIT ?3
                 )",
                params![dictionary_id, min_keep, count - max_entries],
            )?;
            if removed > 0 {
                info!("evicted {removed} entries from dictionary {dictionary_id}");
            }
            Ok(removed)
        })
        .await?
    }
}

/// Case-folded form used for uniqueness and lookups.
fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<GlossaryEntry> {
    let last_used_raw: String = row.get(5)?;
    Ok(GlossaryEntry {
        id: row.get(0)?,
        original: row.get(1)?,
        translation: row.get(2)?,
        usage_count: row.get(3)?,
        kind: ProperNounKind::parse(&row.get::<_, String>(4)?),
        last_used_at: DateTime::parse_from_rfc3339(&last_used_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Pure replacement pass over a dictionary snapshot; deterministic for a
/// given entry list. Longest originals win over their prefixes.
pub fn apply_entries(
    entries: &[GlossaryEntry],
    texts: &[String],
) -> (Vec<String>, HashMap<String, String>) {
    // Entries arrive longest-first from the store; re-sort to be safe for
    // callers holding their own snapshots.
    let mut sorted: Vec<&GlossaryEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        b.original
            .len()
            .cmp(&a.original.len())
            .then_with(|| a.original.cmp(&b.original))
    });

    let patterns: Vec<(regex::Regex, &GlossaryEntry)> = sorted
        .iter()
        .filter_map(|entry| {
            RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&entry.original)))
                .case_insensitive(true)
                .build()
                .ok()
                .map(|re| (re, *entry))
        })
        .collect();

    let mut replacements = HashMap::new();
    let rewritten = texts
        .iter()
        .map(|text| {
            let mut current = text.clone();
            for (re, entry) in &patterns {
                if re.is_match(&current) {
                    current = re
                        .replace_all(&current, entry.translation.as_str())
                        .into_owned();
                    replacements
                        .insert(entry.original.clone(), entry.translation.clone());
                }
            }
            current
        })
        .collect();

    debug!("glossary applied {} replacements", replacements.len());
    (rewritten, replacements)
}
