//! Text-region detection for chapter pages.
//!
//! Engines implement [`OcrBackend`] and return raw detections (polygon,
//! text, confidence); this module normalizes polygons to axis-aligned
//! boxes and drops low-confidence blocks. Per-page block order is whatever
//! the engine returned and stays stable for the life of a job.

#[cfg(feature = "ocr-ocrs")]
mod ocrs_backend;

#[cfg(feature = "ocr-ocrs")]
pub use ocrs_backend::OcrsBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Blocks below this confidence are discarded at detection time.
pub const MIN_CONFIDENCE: f32 = 0.5;

/// Axis-aligned bounding box `(x, y, w, h)` in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Normalize an arbitrary polygon to its axis-aligned bounding box.
    pub fn from_polygon(points: &[(f32, f32)]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        Some(Self {
            x: min_x.floor() as i32,
            y: min_y.floor() as i32,
            w: (max_x - min_x).ceil() as i32,
            h: (max_y - min_y).ceil() as i32,
        })
    }
}

/// A single detected text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Raw detection as engines report it, before normalization.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub polygon: Vec<(f32, f32)>,
    pub text: String,
    pub confidence: f32,
}

/// Pluggable OCR engine. Implementations are expected to be expensive to
/// initialize and cheap per call; process-wide singletons are the norm.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Detect text regions on one page. Returns an empty list for pages
    /// without text; the pipeline passes such pages through unchanged.
    async fn detect(&self, page: &[u8]) -> Result<Vec<TextBlock>>;
}

/// Normalize raw detections: drop empty text and low-confidence blocks,
/// convert polygons to bounding boxes. Detection order is preserved.
pub fn normalize_detections(raw: Vec<RawDetection>) -> Vec<TextBlock> {
    raw.into_iter()
        .filter(|d| d.confidence >= MIN_CONFIDENCE)
        .filter_map(|d| {
            let text = d.text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            BoundingBox::from_polygon(&d.polygon).map(|bbox| TextBlock {
                text,
                bbox,
                confidence: d.confidence,
            })
        })
        .collect()
}

/// OCR output for a whole chapter: per-page blocks in page order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterOcr {
    pub pages: Vec<Vec<TextBlock>>,
}

impl ChapterOcr {
    pub fn new(pages: Vec<Vec<TextBlock>>) -> Self {
        Self { pages }
    }

    /// Concatenation of all block texts in page-major order; the unit the
    /// translator consumes and returns aligned to.
    pub fn flat_texts(&self) -> Vec<String> {
        self.pages
            .iter()
            .flat_map(|blocks| blocks.iter().map(|b| b.text.clone()))
            .collect()
    }

    /// Total number of blocks across all pages.
    pub fn block_count(&self) -> usize {
        self.pages.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.block_count() == 0
    }
}
