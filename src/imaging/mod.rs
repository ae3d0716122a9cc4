//! Page image processing: inpainting source text away and typesetting the
//! translation back in.
//!
//! `clean` removes text via mask-based inpainting, `render` draws fitted,
//! wrapped, centered lines with a white outline under black fill, and
//! `process` composes the two. All work here is pure per-page CPU; callers
//! run pages in parallel on a bounded executor.

mod inpaint;
mod text_layout;

pub use inpaint::{build_mask, inpaint, INPAINT_RADIUS, MASK_PADDING};
pub use text_layout::{
    fit_font_size, place_lines, wrap_text, FontMeasure, PlacedLine, TextMeasure, LINE_SPACING,
};

use std::io::Cursor;
use std::path::PathBuf;

use ab_glyph::{FontArc, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use imageproc::drawing::draw_text_mut;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ImagingSettings;
use crate::error::{Result, ScanlateError};
use crate::ocr::TextBlock;

/// Detected encoding of a page, recorded so downstream code reads the right
/// extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    Jpeg,
    Png,
    Webp,
}

impl PageFormat {
    pub fn detect(bytes: &[u8]) -> PageFormat {
        match infer::get(bytes).map(|k| k.extension()) {
            Some("png") => PageFormat::Png,
            Some("webp") => PageFormat::Webp,
            _ => PageFormat::Jpeg,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PageFormat::Jpeg => "jpg",
            PageFormat::Png => "png",
            PageFormat::Webp => "webp",
        }
    }
}

/// Per-page image treatment as the pipeline consumes it. `ImageProcessor`
/// is the production implementation; tests substitute lightweight fakes.
pub trait PageProcessor: Send + Sync {
    /// Remove the source text from a page.
    fn clean(&self, page: &[u8], blocks: &[TextBlock]) -> Result<Vec<u8>>;

    /// Draw translations onto a background (cleaned or original page).
    fn render(
        &self,
        background: &[u8],
        blocks: &[TextBlock],
        translations: &[String],
    ) -> Result<Vec<u8>>;

    /// Full treatment: clean, then render.
    fn process(
        &self,
        page: &[u8],
        blocks: &[TextBlock],
        translations: &[String],
    ) -> Result<Vec<u8>> {
        let cleaned = self.clean(page, blocks)?;
        self.render(&cleaned, blocks, translations)
    }
}

/// Font files probed when `imaging.font_path` is not set.
const FONT_CANDIDATES: &[&str] = &[
    "fonts/default.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
];

/// Per-page image processor.
pub struct ImageProcessor {
    settings: ImagingSettings,
    font: Option<FontArc>,
}

impl ImageProcessor {
    /// Build a processor, loading the rendering font if one can be found.
    /// A missing font only fails jobs that reach the render step.
    pub fn new(settings: ImagingSettings) -> Self {
        let font = Self::load_font(&settings);
        if font.is_none() {
            warn!("no usable font found; rendering will fail until imaging.font_path is set");
        }
        Self { settings, font }
    }

    fn load_font(settings: &ImagingSettings) -> Option<FontArc> {
        let candidates: Vec<PathBuf> = settings
            .font_path
            .iter()
            .cloned()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from))
            .collect();
        for path in candidates {
            if let Ok(bytes) = std::fs::read(&path) {
                match FontArc::try_from_vec(bytes) {
                    Ok(font) => {
                        debug!("loaded render font from {}", path.display());
                        return Some(font);
                    }
                    Err(e) => warn!("unusable font {}: {e}", path.display()),
                }
            }
        }
        None
    }

    fn decode(bytes: &[u8]) -> Result<RgbImage> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgb8())
            .map_err(|e| ScanlateError::Upstream(format!("could not decode page image: {e}")))
    }

    /// Encode a raster: WebP at the configured quality when enabled,
    /// falling back to JPEG.
    pub fn encode(&self, img: &RgbImage) -> Result<Vec<u8>> {
        if self.settings.use_webp {
            let encoder = webp::Encoder::from_rgb(img.as_raw(), img.width(), img.height());
            let encoded = encoder.encode(self.settings.quality as f32);
            if !encoded.is_empty() {
                return Ok(encoded.to_vec());
            }
            warn!("WebP encode produced no output, falling back to JPEG");
        }
        self.encode_jpeg(img)
    }

    fn encode_jpeg(&self, img: &RgbImage) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.settings.quality);
        encoder
            .encode(
                img.as_raw(),
                img.width(),
                img.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| ScanlateError::Storage(format!("JPEG encode failed: {e}")))?;
        Ok(buf.into_inner())
    }

    /// Deterministic lossless encode, used where byte-identical output
    /// matters (tests preloading caches, fixtures).
    pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| ScanlateError::Storage(format!("PNG encode failed: {e}")))?;
        Ok(buf.into_inner())
    }
}

impl PageProcessor for ImageProcessor {
    /// Build the padded mask over every block and inpaint it away.
    fn clean(&self, page: &[u8], blocks: &[TextBlock]) -> Result<Vec<u8>> {
        let mut img = Self::decode(page)?;
        let mask = build_mask(img.width(), img.height(), blocks);
        inpaint(&mut img, &mask);
        self.encode(&img)
    }

    /// Draw translated text into each block on the given background (the
    /// cleaned page, or the original for overlay output).
    fn render(
        &self,
        background: &[u8],
        blocks: &[TextBlock],
        translations: &[String],
    ) -> Result<Vec<u8>> {
        let mut img = Self::decode(background)?;
        let font = self.font.clone().ok_or_else(|| {
            ScanlateError::Storage(
                "no render font available; set imaging.font_path".to_string(),
            )
        })?;
        let measure = FontMeasure::new(font.clone());

        for (block, text) in blocks.iter().zip(translations.iter()) {
            if text.trim().is_empty() {
                continue;
            }

            let (size, lines) = fit_font_size(
                text,
                block.bbox.w as f32,
                block.bbox.h as f32,
                self.settings.min_font_size,
                self.settings.max_font_size,
                &measure,
            );
            let placed = place_lines(
                lines,
                block.bbox.x,
                block.bbox.y,
                block.bbox.w,
                block.bbox.h,
                size as f32,
                &measure,
            );

            let scale = PxScale::from(size as f32);
            for line in &placed {
                // White outline on the four diagonals, then black fill
                for (dx, dy) in [(-1, -1), (-1, 1), (1, -1), (1, 1)] {
                    draw_text_mut(
                        &mut img,
                        image::Rgb([255u8, 255, 255]),
                        line.x + dx,
                        line.y + dy,
                        scale,
                        &font,
                        &line.text,
                    );
                }
                draw_text_mut(
                    &mut img,
                    image::Rgb([0u8, 0, 0]),
                    line.x,
                    line.y,
                    scale,
                    &font,
                    &line.text,
                );
            }
        }

        self.encode(&img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::BoundingBox;

    fn settings() -> ImagingSettings {
        ImagingSettings {
            use_webp: false,
            ..Default::default()
        }
    }

    fn block(x: i32, y: i32, w: i32, h: i32) -> TextBlock {
        TextBlock {
            text: "src".to_string(),
            bbox: BoundingBox::new(x, y, w, h),
            confidence: 1.0,
        }
    }

    fn png_page(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, image::Rgb([120, 130, 140]));
        ImageProcessor::encode_png(&img).unwrap()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(PageFormat::detect(&png_page(4, 4)), PageFormat::Png);
        assert_eq!(PageFormat::detect(b"\xff\xd8\xff\xe0xxxx"), PageFormat::Jpeg);
        assert_eq!(PageFormat::Png.extension(), "png");
        assert_eq!(PageFormat::Webp.extension(), "webp");
    }

    #[test]
    fn test_clean_produces_decodable_image_of_same_size() {
        let processor = ImageProcessor::new(settings());
        let page = png_page(60, 60);
        let cleaned = processor.clean(&page, &[block(10, 10, 20, 20)]).unwrap();
        let decoded = image::load_from_memory(&cleaned).unwrap();
        assert_eq!(decoded.width(), 60);
        assert_eq!(decoded.height(), 60);
    }

    #[test]
    fn test_clean_with_no_blocks_is_passthrough_content() {
        let processor = ImageProcessor::new(settings());
        let page = png_page(20, 20);
        let cleaned = processor.clean(&page, &[]).unwrap();
        let decoded = image::load_from_memory(&cleaned).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(5, 5).0, [120, 130, 140]);
    }

    #[test]
    fn test_render_without_font_fails_cleanly() {
        let mut processor = ImageProcessor::new(settings());
        processor.font = None;
        let page = png_page(40, 40);
        let err = processor
            .render(&page, &[block(5, 5, 30, 20)], &["Hi".to_string()])
            .unwrap_err();
        assert!(matches!(err, ScanlateError::Storage(_)));
    }

    #[test]
    fn test_render_resolves_font_up_front() {
        // Even an all-empty translation list needs the font resolved; pages
        // with no text at all take the clean/passthrough path instead.
        let mut processor = ImageProcessor::new(settings());
        processor.font = None;
        let page = png_page(40, 40);
        let out = processor
            .render(&page, &[block(5, 5, 30, 20)], &[String::new()])
            .unwrap_err();
        assert!(matches!(out, ScanlateError::Storage(_)));
    }

    #[test]
    fn test_webp_encode_roundtrip() {
        let processor = ImageProcessor::new(ImagingSettings::default());
        let img = RgbImage::from_pixel(16, 16, image::Rgb([10, 200, 30]));
        let encoded = processor.encode(&img).unwrap();
        assert_eq!(PageFormat::detect(&encoded), PageFormat::Webp);
    }

    #[test]
    fn test_render_draws_text_when_font_available() {
        let processor = ImageProcessor::new(settings());
        if processor.font.is_none() {
            // No system font in this environment; nothing to draw with
            return;
        }
        let page = png_page(100, 60);
        let rendered = processor
            .render(&page, &[block(10, 10, 80, 40)], &["Hi!".to_string()])
            .unwrap();
        let decoded = image::load_from_memory(&rendered).unwrap().to_rgb8();
        // Some pixel inside the block should now be (near) black
        let mut darkened = false;
        for y in 10..50 {
            for x in 10..90 {
                if decoded.get_pixel(x, y).0.iter().all(|&c| c < 60) {
                    darkened = true;
                }
            }
        }
        assert!(darkened, "no text pixels drawn");
    }
}
