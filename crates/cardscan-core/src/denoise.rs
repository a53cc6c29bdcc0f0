//! Non-local-means denoising for scanned grayscale pages.
//!
//! Each pixel is replaced by a weighted average of pixels with similar
//! neighbourhoods inside a search window. Patch distances are computed with
//! one integral image of squared differences per window offset, which keeps
//! the inner loop free of per-pixel patch scans.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// Non-local-means configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DenoiseParams {
    /// Filter strength; larger values smooth more aggressively.
    pub strength: f32,
    /// Side length of the (odd) comparison patch.
    pub patch_size: u32,
    /// Side length of the (odd) search window.
    pub search_window: u32,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        Self {
            strength: 10.0,
            patch_size: 7,
            search_window: 21,
        }
    }
}

#[inline]
fn at(data: &[f32], w: i32, h: i32, x: i32, y: i32) -> f32 {
    let cx = x.clamp(0, w - 1);
    let cy = y.clamp(0, h - 1);
    data[(cy * w + cx) as usize]
}

/// Denoise a grayscale image with non-local means.
pub fn nl_means_denoise(src: &GrayImage, params: &DenoiseParams) -> GrayImage {
    let w = src.width() as i32;
    let h = src.height() as i32;
    if w == 0 || h == 0 {
        return src.clone();
    }

    let pr = (params.patch_size / 2) as i32;
    let sr = (params.search_window / 2) as i32;
    let h2 = (params.strength * params.strength).max(1e-6);

    let pixels: Vec<f32> = src.as_raw().iter().map(|&v| v as f32).collect();

    let n = (w * h) as usize;
    let mut value_acc = vec![0f64; n];
    let mut weight_acc = vec![0f64; n];

    // Integral image of per-offset squared differences; one row of padding on
    // each leading edge so window sums need no boundary branches.
    let iw = (w + 1) as usize;
    let mut integral = vec![0f64; iw * (h + 1) as usize];

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for y in 0..h {
                let row = (y + 1) as usize * iw;
                let prev = y as usize * iw;
                let mut run = 0f64;
                for x in 0..w {
                    let a = pixels[(y * w + x) as usize];
                    let b = at(&pixels, w, h, x + dx, y + dy);
                    let d = (a - b) as f64;
                    run += d * d;
                    integral[row + (x + 1) as usize] = integral[prev + (x + 1) as usize] + run;
                }
            }

            for y in 0..h {
                let y0 = (y - pr).max(0);
                let y1 = (y + pr).min(h - 1);
                for x in 0..w {
                    let x0 = (x - pr).max(0);
                    let x1 = (x + pr).min(w - 1);

                    let sum = integral[(y1 + 1) as usize * iw + (x1 + 1) as usize]
                        - integral[y0 as usize * iw + (x1 + 1) as usize]
                        - integral[(y1 + 1) as usize * iw + x0 as usize]
                        + integral[y0 as usize * iw + x0 as usize];
                    let area = ((y1 - y0 + 1) * (x1 - x0 + 1)) as f64;
                    let dist = sum / area;

                    let weight = (-dist / h2 as f64).exp();
                    let idx = (y * w + x) as usize;
                    value_acc[idx] += weight * at(&pixels, w, h, x + dx, y + dy) as f64;
                    weight_acc[idx] += weight;
                }
            }
        }
    }

    let mut out = GrayImage::new(src.width(), src.height());
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            let v = (value_acc[idx] / weight_acc[idx]).clamp(0.0, 255.0);
            out.put_pixel(x as u32, y as u32, Luma([v.round() as u8]));
        }
    }
    out
}
