//! Text removal by mask-based inpainting.
//!
//! A binary mask covers every text block plus padding; masked pixels are
//! then reconstructed boundary-inward, each one from the known pixels in a
//! small neighborhood, in the spirit of Telea's fast-marching method.

use std::collections::VecDeque;

use image::RgbImage;

use crate::ocr::TextBlock;

/// Padding added around each block rectangle when building the mask.
pub const MASK_PADDING: i32 = 5;

/// Neighborhood radius used when reconstructing a pixel.
pub const INPAINT_RADIUS: i32 = 3;

/// Row-major binary mask: `true` marks pixels to reconstruct.
pub fn build_mask(width: u32, height: u32, blocks: &[TextBlock]) -> Vec<bool> {
    let (width, height) = (width as i32, height as i32);
    let mut mask = vec![false; (width * height) as usize];
    for block in blocks {
        let x1 = (block.bbox.x - MASK_PADDING).max(0);
        let y1 = (block.bbox.y - MASK_PADDING).max(0);
        let x2 = (block.bbox.x + block.bbox.w + MASK_PADDING).min(width);
        let y2 = (block.bbox.y + block.bbox.h + MASK_PADDING).min(height);
        for y in y1..y2 {
            for x in x1..x2 {
                mask[(y * width + x) as usize] = true;
            }
        }
    }
    mask
}

/// Reconstruct every masked pixel in place. Pixels are processed in BFS
/// order from the mask boundary inward; each takes the average of already
/// known pixels within [`INPAINT_RADIUS`].
pub fn inpaint(img: &mut RgbImage, mask: &[bool]) {
    let width = img.width() as i32;
    let height = img.height() as i32;
    debug_assert_eq!(mask.len(), (width * height) as usize);

    let mut known: Vec<bool> = mask.iter().map(|m| !m).collect();
    let mut queued = vec![false; known.len()];
    let mut queue: VecDeque<(i32, i32)> = VecDeque::new();

    let idx = |x: i32, y: i32| (y * width + x) as usize;

    // Seed with masked pixels that touch a known pixel
    for y in 0..height {
        for x in 0..width {
            if known[idx(x, y)] {
                continue;
            }
            let touches_known = neighbors4(x, y, width, height)
                .into_iter()
                .flatten()
                .any(|(nx, ny)| known[idx(nx, ny)]);
            if touches_known {
                queue.push_back((x, y));
                queued[idx(x, y)] = true;
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let mut sum = [0u64; 3];
        let mut count = 0u64;
        for dy in -INPAINT_RADIUS..=INPAINT_RADIUS {
            for dx in -INPAINT_RADIUS..=INPAINT_RADIUS {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= width || ny >= height {
                    continue;
                }
                if !known[idx(nx, ny)] {
                    continue;
                }
                let pixel = img.get_pixel(nx as u32, ny as u32);
                for (acc, channel) in sum.iter_mut().zip(pixel.0.iter()) {
                    *acc += *channel as u64;
                }
                count += 1;
            }
        }

        if count > 0 {
            let filled = image::Rgb([
                (sum[0] / count) as u8,
                (sum[1] / count) as u8,
                (sum[2] / count) as u8,
            ]);
            img.put_pixel(x as u32, y as u32, filled);
        }
        known[idx(x, y)] = true;

        for (nx, ny) in neighbors4(x, y, width, height).into_iter().flatten() {
            let i = idx(nx, ny);
            if !known[i] && !queued[i] {
                queue.push_back((nx, ny));
                queued[i] = true;
            }
        }
    }
}

fn neighbors4(x: i32, y: i32, width: i32, height: i32) -> [Option<(i32, i32)>; 4] {
    let mut out = [None; 4];
    let candidates = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)];
    for (slot, (nx, ny)) in out.iter_mut().zip(candidates) {
        if nx >= 0 && ny >= 0 && nx < width && ny < height {
            *slot = Some((nx, ny));
        }
    }
    out
}
