//! Geometric and image primitives for caution-card form registration.
//!
//! This crate is intentionally free of pipeline knowledge. It provides the
//! homography estimation and warping machinery, binary feature detection and
//! matching, a non-local-means denoiser, and the diagnostics-sink seam used
//! by the `cardscan` pipeline crate.

mod denoise;
mod diag;
mod features;
mod homography;
mod rng;

pub use denoise::{nl_means_denoise, DenoiseParams};
pub use diag::{DiagnosticsSink, DirectorySink, NoopSink};
pub use features::{
    detect_and_describe, match_descriptors, Descriptor, DescriptorMatch, Feature, FeatureParams,
    Keypoint,
};
pub use homography::{
    estimate_homography, estimate_homography_ransac, homography_from_4pt, warp_perspective_gray,
    warp_perspective_rgb, Homography, RansacHomography, RansacParams,
};
