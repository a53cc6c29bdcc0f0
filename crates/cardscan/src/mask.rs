//! Form-furniture suppression.
//!
//! The manual mask marks handwriting areas to keep (white) against printed
//! form elements to hide (black). The engine cleans the mask with a
//! close/open pair, keeps original pixels under the mask foreground, paints
//! everything else white, and optionally runs a non-local-means pass over
//! the composite before handing an RGB image back to downstream consumers.

use std::sync::Arc;

use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use serde::{Deserialize, Serialize};

use cardscan_core::{nl_means_denoise, DenoiseParams, DiagnosticsSink, NoopSink};

use crate::config::RegionRect;

/// Reduce a grayscale image to pure binary {0, 255} at `threshold`.
pub(crate) fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, &Luma([v])) in img.enumerate_pixels() {
        out.put_pixel(x, y, Luma([if v > threshold { 255 } else { 0 }]));
    }
    out
}

/// Expand a single channel back to three for downstream consumers.
pub(crate) fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(gray.width(), gray.height());
    for (x, y, &Luma([v])) in gray.enumerate_pixels() {
        out.put_pixel(x, y, Rgb([v, v, v]));
    }
    out
}

/// Masking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskParams {
    /// Run the denoising pass over the composited result.
    pub denoise: bool,
    pub denoise_params: DenoiseParams,
    /// Regions whose ink statistics are reported after masking. Purely
    /// observational; never affects the output.
    pub stat_regions: Vec<String>,
    /// Pixels darker than this count as ink in the reported statistics.
    pub stat_ink_threshold: u8,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            denoise: true,
            denoise_params: DenoiseParams::default(),
            stat_regions: vec!["patient_name".to_owned()],
            stat_ink_threshold: 250,
        }
    }
}

/// Hides printed form elements on an aligned scan.
pub struct MaskEngine {
    mask: GrayImage,
    params: MaskParams,
    stat_rects: Vec<(String, RegionRect)>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl MaskEngine {
    pub fn new(manual_mask: GrayImage, params: MaskParams) -> Self {
        Self {
            mask: binarize(&manual_mask, 127),
            params,
            stat_rects: Vec::new(),
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_stat_rects(mut self, rects: Vec<(String, RegionRect)>) -> Self {
        self.stat_rects = rects;
        self
    }

    /// Apply the manual mask to an aligned image.
    ///
    /// The output has the same dimensions as the input. The stored mask is
    /// never mutated; a resized copy is made when dimensions differ.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let gray = image::imageops::grayscale(image);

        let mask = if self.mask.dimensions() != gray.dimensions() {
            log::debug!(
                "resizing manual mask {:?} -> {:?}",
                self.mask.dimensions(),
                gray.dimensions()
            );
            image::imageops::resize(&self.mask, gray.width(), gray.height(), FilterType::Nearest)
        } else {
            self.mask.clone()
        };

        // Close fills small gaps inside keep areas, open removes specks.
        let cleaned = open(&close(&mask, Norm::LInf, 1), Norm::LInf, 1);

        let mut composed = GrayImage::new(gray.width(), gray.height());
        for (x, y, &Luma([m])) in cleaned.enumerate_pixels() {
            let v = if m > 0 { gray.get_pixel(x, y).0[0] } else { 255 };
            composed.put_pixel(x, y, Luma([v]));
        }

        let result = if self.params.denoise {
            nl_means_denoise(&composed, &self.params.denoise_params)
        } else {
            composed
        };

        self.sink.put_gray("original_gray", &gray);
        self.sink.put_gray("cleaned_mask", &cleaned);
        self.sink.put_gray("masked_result", &result);
        self.report_stats(&result);

        gray_to_rgb(&result)
    }

    fn report_stats(&self, result: &GrayImage) {
        for (name, rect) in &self.stat_rects {
            let x0 = rect.x.max(0) as u32;
            let y0 = rect.y.max(0) as u32;
            let x1 = (rect.x.max(0) as u32 + rect.width).min(result.width());
            let y1 = (rect.y.max(0) as u32 + rect.height).min(result.height());
            if x1 <= x0 || y1 <= y0 {
                continue;
            }

            let mut ink = 0usize;
            for y in y0..y1 {
                for x in x0..x1 {
                    if result.get_pixel(x, y).0[0] < self.params.stat_ink_threshold {
                        ink += 1;
                    }
                }
            }
            let total = ((x1 - x0) * (y1 - y0)) as f64;
            let ratio = ink as f64 / total;
            log::info!("masked region {name}: ink ratio {ratio:.4} ({ink} px)");
            self.sink.put_stat(name, "ink_ratio", ratio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_denoise_params() -> MaskParams {
        MaskParams {
            denoise: false,
            stat_regions: Vec::new(),
            ..MaskParams::default()
        }
    }

    fn gradient_rgb(w: u32, h: u32) -> RgbImage {
        let mut img = RgbImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let v = ((x * 5 + y * 3) % 200) as u8;
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        img
    }

    #[test]
    fn keeps_foreground_and_whitens_background() {
        let input = gradient_rgb(60, 40);
        // Left half keeps ink, right half is form furniture.
        let mut mask = GrayImage::from_pixel(60, 40, Luma([0u8]));
        for y in 0..40 {
            for x in 0..30 {
                mask.put_pixel(x, y, Luma([255u8]));
            }
        }

        let engine = MaskEngine::new(mask, no_denoise_params());
        let out = engine.apply(&input);
        assert_eq!(out.dimensions(), input.dimensions());

        let gray = image::imageops::grayscale(&input);
        // Stay clear of the mask boundary and image border, where the
        // close/open pair is allowed to move the edge by a pixel.
        for y in 4..36 {
            for x in 4..26 {
                assert_eq!(out.get_pixel(x, y).0[0], gray.get_pixel(x, y).0[0]);
            }
        }
        for y in 4..36 {
            for x in 34..56 {
                assert_eq!(out.get_pixel(x, y).0[0], 255);
            }
        }
    }

    #[test]
    fn mismatched_mask_is_resized_per_call() {
        let input = gradient_rgb(64, 48);
        let mask = GrayImage::from_pixel(32, 24, Luma([255u8]));
        let engine = MaskEngine::new(mask, no_denoise_params());
        let out = engine.apply(&input);
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn specks_in_the_mask_are_removed() {
        let input = gradient_rgb(40, 40);
        // All-background mask with a single stray foreground pixel.
        let mut mask = GrayImage::from_pixel(40, 40, Luma([0u8]));
        mask.put_pixel(20, 20, Luma([255u8]));

        let engine = MaskEngine::new(mask, no_denoise_params());
        let out = engine.apply(&input);
        // The speck must not survive the open: everything is whitened.
        assert_eq!(out.get_pixel(20, 20).0[0], 255);
    }

    #[test]
    fn stats_reporting_handles_out_of_range_rects() {
        let input = gradient_rgb(40, 30);
        let mask = GrayImage::from_pixel(40, 30, Luma([255u8]));
        let engine = MaskEngine::new(mask, no_denoise_params()).with_stat_rects(vec![
            (
                "inside".to_owned(),
                RegionRect {
                    x: 5,
                    y: 5,
                    width: 10,
                    height: 10,
                },
            ),
            (
                "outside".to_owned(),
                RegionRect {
                    x: 90,
                    y: 90,
                    width: 10,
                    height: 10,
                },
            ),
        ]);
        // Must not panic on the out-of-range rect.
        let _ = engine.apply(&input);
    }
}
