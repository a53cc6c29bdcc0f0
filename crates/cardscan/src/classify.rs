//! Field classification.
//!
//! Two independent decisions over an extracted region: whether it holds any
//! ink at all, and, for phenotype cells, how strong the reaction mark is.
//! Every threshold here is a calibration value tied to a scanner/paper
//! profile and is carried in [`ClassifierParams`] rather than in code.

use std::sync::Arc;

use image::{GrayImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use cardscan_core::{DiagnosticsSink, NoopSink};

use crate::mask::gray_to_rgb;

/// Ordinal strength of a phenotype reaction mark, by increasing ink density.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkStrength {
    /// Faint mark, negative reaction.
    #[serde(rename = "0")]
    Zero,
    /// Moderate mark.
    #[serde(rename = "+")]
    Plus,
    /// Strong, dark mark.
    #[serde(rename = "Pos")]
    Pos,
}

impl MarkStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkStrength::Zero => "0",
            MarkStrength::Plus => "+",
            MarkStrength::Pos => "Pos",
        }
    }
}

impl std::fmt::Display for MarkStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    /// Pixels darker than this count as ink.
    pub ink_threshold: u8,
    /// A field is empty below this ink fraction.
    pub min_ink_ratio: f64,
    /// Ink threshold for noise-tolerant fields.
    pub noisy_ink_threshold: u8,
    /// Empty cutoff for noise-tolerant fields.
    pub noisy_min_ink_ratio: f64,
    /// A region whose lower-cased name contains one of these markers gets
    /// the noise-tolerant thresholds (scan artifacts are common there).
    pub noise_tolerant_markers: Vec<String>,
    /// Center-region mean above this is a faint "0" mark.
    pub faint_mean: f64,
    /// Center-region mean above this (and at most `faint_mean`) is a "+".
    pub moderate_mean: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            ink_threshold: 240,
            min_ink_ratio: 0.01,
            noisy_ink_threshold: 230,
            noisy_min_ink_ratio: 0.03,
            noise_tolerant_markers: vec!["tech".to_owned(), "diagnosis".to_owned()],
            faint_mean: 220.0,
            moderate_mean: 180.0,
        }
    }
}

fn ink_ratio(region: &GrayImage, threshold: u8) -> f64 {
    let total = region.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let ink = region.as_raw().iter().filter(|&&v| v < threshold).count();
    ink as f64 / total as f64
}

/// Decides emptiness and phenotype mark strength for extracted regions.
pub struct FieldClassifier {
    params: ClassifierParams,
    sink: Arc<dyn DiagnosticsSink>,
}

impl FieldClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self {
            params,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    fn is_noise_tolerant(&self, region_name: &str) -> bool {
        let lower = region_name.to_lowercase();
        self.params
            .noise_tolerant_markers
            .iter()
            .any(|m| lower.contains(m.as_str()))
    }

    /// Whether a region holds no ink worth recognizing.
    pub fn is_empty(&self, region: &GrayImage, region_name: &str) -> bool {
        let (threshold, cutoff) = if self.is_noise_tolerant(region_name) {
            (
                self.params.noisy_ink_threshold,
                self.params.noisy_min_ink_ratio,
            )
        } else {
            (self.params.ink_threshold, self.params.min_ink_ratio)
        };

        let ratio = ink_ratio(region, threshold);
        log::debug!("empty check for {region_name}: ink ratio {ratio:.4} (cutoff {cutoff})");
        ratio < cutoff
    }

    /// Classify the mark in a phenotype cell, `None` for an unmarked cell.
    ///
    /// The mean intensity is taken over the central 50%-by-50% sub-rectangle
    /// so border noise from the cell outline does not bias the bands.
    pub fn classify_mark(&self, region: &GrayImage, region_name: &str) -> Option<MarkStrength> {
        // Emptiness for cells always uses the base thresholds.
        if ink_ratio(region, self.params.ink_threshold) < self.params.min_ink_ratio {
            log::debug!("cell {region_name} is unmarked");
            return None;
        }

        let w = region.width();
        let h = region.height();
        let half_w = (w / 2).max(1);
        let half_h = (h / 2).max(1);
        let x0 = w / 2 - half_w / 2;
        let y0 = h / 2 - half_h / 2;
        let x1 = (x0 + half_w).min(w);
        let y1 = (y0 + half_h).min(h);

        let mut sum = 0f64;
        for y in y0..y1 {
            for x in x0..x1 {
                sum += region.get_pixel(x, y).0[0] as f64;
            }
        }
        let mean = sum / ((x1 - x0) * (y1 - y0)) as f64;
        log::debug!("cell {region_name}: center mean {mean:.2}");

        if self.sink.wants_images() {
            let mut overlay = gray_to_rgb(region);
            draw_hollow_rect_mut(
                &mut overlay,
                Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0, y1 - y0),
                Rgb([0, 255, 0]),
            );
            self.sink.put_rgb(&format!("{region_name}_analysis"), &overlay);
        }

        Some(if mean > self.params.faint_mean {
            MarkStrength::Zero
        } else if mean > self.params.moderate_mean {
            MarkStrength::Plus
        } else {
            MarkStrength::Pos
        })
    }
}
