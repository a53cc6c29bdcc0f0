//! Template registration.
//!
//! A scan is registered onto the template by matching binary features
//! between the alignment mask and the grayscale input, estimating a robust
//! homography from the surviving correspondences and warping the scan into
//! template pixel space. Registration never fails hard: every degenerate
//! case passes the input through unchanged under the identity transform,
//! and the caller reads that as a quality signal.

use std::sync::Arc;

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use cardscan_core::{
    detect_and_describe, estimate_homography_ransac, match_descriptors, warp_perspective_rgb,
    DescriptorMatch, DiagnosticsSink, Feature, FeatureParams, Homography, NoopSink, RansacParams,
};

/// Registration configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentParams {
    pub features: FeatureParams,
    /// Lowe ratio-test threshold for descriptor matching.
    pub match_ratio: f32,
    /// Below this many accepted matches the geometry is underdetermined.
    pub min_matches: usize,
    pub ransac: RansacParams,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            features: FeatureParams::default(),
            match_ratio: 0.75,
            min_matches: 4,
            ransac: RansacParams::default(),
        }
    }
}

/// Why registration degraded to the identity transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    /// The alignment mask or the input produced no descriptors.
    NoDescriptors,
    /// Fewer than `min_matches` correspondences survived the ratio test.
    TooFewMatches { found: usize },
    /// No homography consensus, or the estimate was not invertible.
    EstimationFailed,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::NoDescriptors => f.write_str("no descriptors"),
            FallbackReason::TooFewMatches { found } => {
                write!(f, "only {found} ratio-test matches")
            }
            FallbackReason::EstimationFailed => f.write_str("homography estimation failed"),
        }
    }
}

/// Result of registering one scan.
pub struct Alignment {
    /// The scan warped into template pixel space, or the unchanged input
    /// when registration fell back.
    pub image: RgbImage,
    /// Maps input pixel coordinates onto template coordinates.
    pub homography: Homography,
    /// Present when the transform is the identity fallback.
    pub fallback: Option<FallbackReason>,
}

/// Registers scans onto the template using the alignment mask's features.
pub struct AlignmentEngine {
    mask_image: GrayImage,
    mask_features: Vec<Feature>,
    template_size: (u32, u32),
    params: AlignmentParams,
    sink: Arc<dyn DiagnosticsSink>,
}

impl AlignmentEngine {
    /// Build an engine over a binarized alignment mask. Mask features are
    /// extracted once here; the mask is immutable for the engine's lifetime.
    pub fn new(alignment_mask: GrayImage, template_size: (u32, u32), params: AlignmentParams) -> Self {
        let mask_features = detect_and_describe(&alignment_mask, &params.features);
        if mask_features.is_empty() {
            log::warn!("alignment mask yields no descriptors; scans will pass through unregistered");
        }
        Self {
            mask_image: alignment_mask,
            mask_features,
            template_size,
            params,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register one scan onto the template.
    pub fn align(&self, image: &RgbImage) -> Alignment {
        if self.mask_features.is_empty() {
            return self.pass_through(image, FallbackReason::NoDescriptors);
        }

        let gray = image::imageops::grayscale(image);
        let input_features = detect_and_describe(&gray, &self.params.features);
        if input_features.is_empty() {
            return self.pass_through(image, FallbackReason::NoDescriptors);
        }

        let matches =
            match_descriptors(&self.mask_features, &input_features, self.params.match_ratio);
        if matches.len() < self.params.min_matches {
            return self.pass_through(image, FallbackReason::TooFewMatches { found: matches.len() });
        }

        // Correspondences run input -> template, so the estimate registers
        // the scan onto the template.
        let template_pts: Vec<Point2<f64>> = matches
            .iter()
            .map(|m| {
                let k = self.mask_features[m.query].keypoint;
                Point2::new(k.x as f64, k.y as f64)
            })
            .collect();
        let input_pts: Vec<Point2<f64>> = matches
            .iter()
            .map(|m| {
                let k = input_features[m.train].keypoint;
                Point2::new(k.x as f64, k.y as f64)
            })
            .collect();

        let Some(estimate) =
            estimate_homography_ransac(&input_pts, &template_pts, &self.params.ransac)
        else {
            return self.pass_through(image, FallbackReason::EstimationFailed);
        };
        let Some(inverse) = estimate.homography.inverse() else {
            return self.pass_through(image, FallbackReason::EstimationFailed);
        };

        log::debug!(
            "registration accepted: {} matches, {} inliers",
            matches.len(),
            estimate.inliers.len()
        );

        let (w, h) = self.template_size;
        let aligned = warp_perspective_rgb(image, &inverse, w, h, 255);

        self.sink.put_rgb("aligned", &aligned);
        if self.sink.wants_images() {
            self.emit_match_overlay(&gray, &input_features, &matches);
        }

        Alignment {
            image: aligned,
            homography: estimate.homography,
            fallback: None,
        }
    }

    fn pass_through(&self, image: &RgbImage, reason: FallbackReason) -> Alignment {
        log::warn!("registration degraded to identity transform: {reason}");
        Alignment {
            image: image.clone(),
            homography: Homography::identity(),
            fallback: Some(reason),
        }
    }

    // Side-by-side mask/input canvas with a line per accepted match.
    fn emit_match_overlay(
        &self,
        input: &GrayImage,
        input_features: &[Feature],
        matches: &[DescriptorMatch],
    ) {
        let mw = self.mask_image.width();
        let w = mw + input.width();
        let h = self.mask_image.height().max(input.height());
        let mut canvas = RgbImage::from_pixel(w, h, Rgb([255u8; 3]));

        let blit = |canvas: &mut RgbImage, src: &GrayImage, x_off: u32| {
            for (x, y, &Luma([v])) in src.enumerate_pixels() {
                canvas.put_pixel(x + x_off, y, Rgb([v, v, v]));
            }
        };
        blit(&mut canvas, &self.mask_image, 0);
        blit(&mut canvas, input, mw);

        for m in matches {
            let q = self.mask_features[m.query].keypoint;
            let t = input_features[m.train].keypoint;
            draw_line_segment_mut(
                &mut canvas,
                (q.x, q.y),
                (t.x + mw as f32, t.y),
                Rgb([0, 200, 0]),
            );
        }
        self.sink.put_rgb("alignment_matches", &canvas);
    }
}
