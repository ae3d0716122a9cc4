//! SQLite connection pooling shared by the catalog, glossary and job store.

use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;

use crate::error::{Result, ScanlateError};

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

/// Open (creating if needed) the database at `path`.
pub fn open(path: &Path) -> Result<DbPool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        // journal_mode returns a row, so pragma_update rather than a batch
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
    });
    r2d2::Pool::new(manager).map_err(|e| ScanlateError::Storage(e.to_string()))
}

/// In-memory database for tests. Pooled at size 1 so every checkout sees
/// the same database.
pub fn open_in_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.pragma_update(None, "foreign_keys", "ON"));
    r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| ScanlateError::Storage(e.to_string()))
}
