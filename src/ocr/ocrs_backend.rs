//! OCRS OCR backend implementation.
//!
//! Uses the ocrs crate for pure-Rust OCR without external dependencies.
//! The engine is expensive to initialize, so a single instance is cached
//! process-wide; OcrEngine is Send+Sync and its methods take &self.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams, TextItem};

use crate::config::OcrSettings;
use crate::error::{Result, ScanlateError};

use super::{normalize_detections, OcrBackend, RawDetection, TextBlock};

/// Global cached engine instance (initialized once, reused for all calls).
static OCR_ENGINE: OnceLock<OcrEngine> = OnceLock::new();

const DETECTION_MODEL: &str = "text-detection.rten";
const RECOGNITION_MODEL: &str = "text-recognition.rten";

/// Pure-Rust OCR backend built on ocrs + rten.
pub struct OcrsBackend {
    config: OcrSettings,
}

impl OcrsBackend {
    pub fn new(config: OcrSettings) -> Self {
        Self { config }
    }

    /// Find the model directory, checking the configured path and standard
    /// locations.
    fn find_model_dir(&self) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(ref path) = self.config.model_path {
            candidates.push(path.clone());
        }
        candidates.push(PathBuf::from("models/ocrs"));
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(Path::new(&home).join(".cache/scanlate/ocrs"));
        }

        candidates.into_iter().find(|dir| {
            dir.join(DETECTION_MODEL).exists() && dir.join(RECOGNITION_MODEL).exists()
        })
    }

    /// Get or initialize the cached OCR engine.
    fn get_or_init_engine(&self) -> Result<&'static OcrEngine> {
        if let Some(engine) = OCR_ENGINE.get() {
            return Ok(engine);
        }

        let model_dir = self.find_model_dir().ok_or_else(|| {
            ScanlateError::NotFound(
                "OCRS models not found; place text-detection.rten and \
                 text-recognition.rten under models/ocrs or set ocr.model_path"
                    .to_string(),
            )
        })?;

        let detection_model = rten::Model::load_file(model_dir.join(DETECTION_MODEL))
            .map_err(|e| ScanlateError::Upstream(format!("failed to load detection model: {e}")))?;
        let recognition_model = rten::Model::load_file(model_dir.join(RECOGNITION_MODEL))
            .map_err(|e| {
                ScanlateError::Upstream(format!("failed to load recognition model: {e}"))
            })?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|e| ScanlateError::Upstream(format!("failed to create OCR engine: {e}")))?;

        // If another thread beat us, that's fine; use whichever won the race
        let _ = OCR_ENGINE.set(engine);
        OCR_ENGINE
            .get()
            .ok_or_else(|| ScanlateError::Invariant("failed to cache OCR engine".to_string()))
    }

    /// Run detection and recognition on one page.
    fn run_ocr(&self, page: &[u8]) -> Result<Vec<TextBlock>> {
        let engine = self.get_or_init_engine()?;

        let img = image::load_from_memory(page)
            .map_err(|e| ScanlateError::Upstream(format!("failed to decode page: {e}")))?;
        let rgb_img = img.to_rgb8();
        let (width, height) = rgb_img.dimensions();

        let img_source = ImageSource::from_bytes(rgb_img.as_raw(), (width, height))
            .map_err(|e| ScanlateError::Upstream(format!("failed to convert image: {e}")))?;

        let input = engine
            .prepare_input(img_source)
            .map_err(|e| ScanlateError::Upstream(format!("failed to prepare input: {e}")))?;

        let word_rects = engine
            .detect_words(&input)
            .map_err(|e| ScanlateError::Upstream(format!("word detection failed: {e}")))?;
        let line_rects = engine.find_text_lines(&input, &word_rects);
        let lines = engine
            .recognize_text(&input, &line_rects)
            .map_err(|e| ScanlateError::Upstream(format!("text recognition failed: {e}")))?;

        let raw: Vec<RawDetection> = lines
            .into_iter()
            .flatten()
            .map(|line| {
                let polygon: Vec<(f32, f32)> = line
                    .rotated_rect()
                    .corners()
                    .iter()
                    .map(|p| (p.x, p.y))
                    .collect();
                RawDetection {
                    polygon,
                    text: line.to_string(),
                    // The engine already prunes low-score lines internally
                    confidence: 1.0,
                }
            })
            .collect();

        Ok(normalize_detections(raw))
    }
}

#[async_trait]
impl OcrBackend for OcrsBackend {
    async fn detect(&self, page: &[u8]) -> Result<Vec<TextBlock>> {
        let config = self.config.clone();
        let page = page.to_vec();
        tokio::task::spawn_blocking(move || OcrsBackend::new(config).run_ocr(&page)).await?
    }
}
