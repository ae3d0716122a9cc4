//! On-disk storage for published chapter files.
//!
//! Layout:
//! ```text
//! <root>/<sanitized_series>/<src>_to_<tgt>/chapter_<NNNN>/
//!   page_001.{webp|jpg|png}
//!   ...
//!   cleaned/page_001.{...}      # optional
//!   metadata.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ScanlateError};
use crate::ocr::TextBlock;

/// Metadata persisted next to a chapter's pages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterMetadata {
    pub original_texts: Vec<String>,
    pub translated_texts: Vec<String>,
    pub blocks: Vec<Vec<TextBlock>>,
    pub chapter_url: String,
    pub source_lang: String,
    pub target_lang: String,
    pub task_id: Option<String>,
}

/// Organizes translated chapter files under a storage root.
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Save a chapter's pages (and optionally the cleaned intermediates)
    /// plus metadata. Returns the chapter directory.
    pub fn save_chapter(
        &self,
        series_name: &str,
        chapter_number: u32,
        pages: &[Vec<u8>],
        metadata: &ChapterMetadata,
        source_lang: &str,
        target_lang: &str,
        cleaned_pages: Option<&[Vec<u8>]>,
    ) -> Result<PathBuf> {
        if pages.is_empty() {
            return Err(ScanlateError::Storage("no pages to save".to_string()));
        }

        let chapter_dir = self.chapter_dir(series_name, chapter_number, source_lang, target_lang);
        fs::create_dir_all(&chapter_dir)?;

        for (idx, page) in pages.iter().enumerate() {
            let ext = detect_extension(page);
            let page_path = chapter_dir.join(format!("page_{:03}.{ext}", idx + 1));
            fs::write(&page_path, page)?;
        }

        if let Some(cleaned) = cleaned_pages {
            let cleaned_dir = chapter_dir.join("cleaned");
            fs::create_dir_all(&cleaned_dir)?;
            for (idx, page) in cleaned.iter().enumerate() {
                // Overlay-mode slots are empty; skip them
                if page.is_empty() {
                    continue;
                }
                let ext = detect_extension(page);
                let page_path = cleaned_dir.join(format!("page_{:03}.{ext}", idx + 1));
                fs::write(&page_path, page)?;
            }
        }

        let metadata_json = serde_json::to_string_pretty(metadata)
            .map_err(|e| ScanlateError::Storage(format!("metadata serialization: {e}")))?;
        fs::write(chapter_dir.join("metadata.json"), metadata_json)?;

        info!(
            "saved chapter {chapter_number} of {series_name} to {}",
            chapter_dir.display()
        );
        Ok(chapter_dir)
    }

    /// Path a chapter would be stored at.
    pub fn chapter_dir(
        &self,
        series_name: &str,
        chapter_number: u32,
        source_lang: &str,
        target_lang: &str,
    ) -> PathBuf {
        self.root
            .join(sanitize_filename(series_name))
            .join(format!("{source_lang}_to_{target_lang}"))
            .join(format!("chapter_{chapter_number:04}"))
    }

    /// List chapter numbers present for a series/language pair.
    pub fn list_chapters(
        &self,
        series_name: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Vec<u32> {
        let dir = self
            .root
            .join(sanitize_filename(series_name))
            .join(format!("{source_lang}_to_{target_lang}"));
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut chapters: Vec<u32> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix("chapter_")?
                    .parse()
                    .ok()
            })
            .collect();
        chapters.sort_unstable();
        chapters
    }

    /// Remove a previously stored chapter directory, ignoring absence.
    pub fn remove_chapter_dir(&self, path: &Path) -> Result<()> {
        if path.exists() && path.is_dir() {
            fs::remove_dir_all(path)?;
            info!("removed chapter directory {}", path.display());
        }
        Ok(())
    }
}

/// Sniff the image extension from the leading bytes; unknown data gets a
/// conservative `jpg`.
pub fn detect_extension(data: &[u8]) -> &'static str {
    match infer::get(data).map(|kind| kind.extension()) {
        Some("webp") => "webp",
        Some("png") => "png",
        Some("jpg") => "jpg",
        _ => "jpg",
    }
}

/// Replace characters that are unsafe in filenames, trim dots/spaces and
/// truncate to a portable length.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    sanitized = sanitized.trim_matches(['.', ' ']).to_string();
    if sanitized.len() > 200 {
        let mut end = 200;
        while end > 0 && !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n0000";
    const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff\xe00000";

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Series: Part 2"), "My Series_ Part 2");
        assert_eq!(sanitize_filename("a/b\\c?d"), "a_b_c_d");
        assert_eq!(sanitize_filename("  trimmed.  "), "trimmed");
        let long = "x".repeat(400);
        assert_eq!(sanitize_filename(&long).len(), 200);
    }

    #[test]
    fn test_detect_extension() {
        assert_eq!(detect_extension(PNG_MAGIC), "png");
        assert_eq!(detect_extension(JPEG_MAGIC), "jpg");
        assert_eq!(detect_extension(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "webp");
        assert_eq!(detect_extension(b"garbage"), "jpg");
    }

    #[test]
    fn test_save_chapter_layout() {
        let dir = tempdir().unwrap();
        let manager = FileManager::new(dir.path());

        let pages = vec![PNG_MAGIC.to_vec(), JPEG_MAGIC.to_vec()];
        let cleaned = vec![PNG_MAGIC.to_vec(), Vec::new()];
        let metadata = ChapterMetadata {
            original_texts: vec!["Hi".into()],
            translated_texts: vec!["Merhaba".into()],
            chapter_url: "https://example.com/chapter-3".into(),
            source_lang: "en".into(),
            target_lang: "tr".into(),
            ..Default::default()
        };

        let path = manager
            .save_chapter("My Series!", 3, &pages, &metadata, "en", "tr", Some(&cleaned))
            .unwrap();

        assert!(path.ends_with("My Series!/en_to_tr/chapter_0003"));
        assert!(path.join("page_001.png").exists());
        assert!(path.join("page_002.jpg").exists());
        assert!(path.join("cleaned/page_001.png").exists());
        // Empty cleaned slot produces no file
        assert!(!path.join("cleaned/page_002.png").exists());
        assert!(!path.join("cleaned/page_002.jpg").exists());
        assert!(path.join("metadata.json").exists());

        assert_eq!(manager.list_chapters("My Series!", "en", "tr"), vec![3]);
        assert!(manager.list_chapters("Other", "en", "tr").is_empty());
    }

    #[test]
    fn test_save_chapter_empty_pages_rejected() {
        let dir = tempdir().unwrap();
        let manager = FileManager::new(dir.path());
        let err = manager
            .save_chapter("S", 1, &[], &ChapterMetadata::default(), "en", "tr", None)
            .unwrap_err();
        assert!(matches!(err, ScanlateError::Storage(_)));
    }

    #[test]
    fn test_remove_chapter_dir_idempotent() {
        let dir = tempdir().unwrap();
        let manager = FileManager::new(dir.path());
        let pages = vec![PNG_MAGIC.to_vec()];
        let path = manager
            .save_chapter("S", 1, &pages, &ChapterMetadata::default(), "en", "tr", None)
            .unwrap();
        manager.remove_chapter_dir(&path).unwrap();
        assert!(!path.exists());
        // Second removal is a no-op
        manager.remove_chapter_dir(&path).unwrap();
    }
}
