//! Binary image features for template registration.
//!
//! FAST-9 corners on a Gaussian-smoothed copy of the image, described with an
//! oriented 256-bit BRIEF descriptor and matched by brute-force Hamming
//! search with a ratio test. Brute force is fine at the scale this pipeline
//! runs at (a few hundred keypoints per side) and keeps memory small.

use std::sync::OnceLock;

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

use crate::rng::XorShift64;

const DESCRIPTOR_BITS: usize = 256;
const DESCRIPTOR_WORDS: usize = DESCRIPTOR_BITS / 64;
const PATCH_RADIUS: i32 = 15;
const PATTERN_SPREAD: i32 = 13;
const PATTERN_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Detector and descriptor configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeatureParams {
    /// FAST-9 intensity threshold.
    pub fast_threshold: u8,
    /// Keep at most this many keypoints, strongest first.
    pub max_keypoints: usize,
    /// Smoothing applied before detection and description.
    pub blur_sigma: f32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 1500,
            blur_sigma: 2.0,
        }
    }
}

/// A detected corner in pixel coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

/// 256-bit binary descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    bits: [u64; DESCRIPTOR_WORDS],
}

impl Descriptor {
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A keypoint together with its descriptor.
#[derive(Clone, Copy, Debug)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Descriptor,
}

/// An accepted correspondence between two feature sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

// Fixed BRIEF test pattern: point pairs drawn once from a seeded generator so
// descriptors are comparable across images and across runs.
fn test_pattern() -> &'static [[f32; 4]; DESCRIPTOR_BITS] {
    static PATTERN: OnceLock<[[f32; 4]; DESCRIPTOR_BITS]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = XorShift64::new(PATTERN_SEED);
        let mut pattern = [[0f32; 4]; DESCRIPTOR_BITS];
        for pair in pattern.iter_mut() {
            *pair = [
                rng.next_in(-PATTERN_SPREAD, PATTERN_SPREAD) as f32,
                rng.next_in(-PATTERN_SPREAD, PATTERN_SPREAD) as f32,
                rng.next_in(-PATTERN_SPREAD, PATTERN_SPREAD) as f32,
                rng.next_in(-PATTERN_SPREAD, PATTERN_SPREAD) as f32,
            ];
        }
        pattern
    })
}

#[inline]
fn px_clamped(img: &GrayImage, x: i32, y: i32) -> f32 {
    let cx = x.clamp(0, img.width() as i32 - 1) as u32;
    let cy = y.clamp(0, img.height() as i32 - 1) as u32;
    img.get_pixel(cx, cy).0[0] as f32
}

// Intensity-centroid orientation over a circular patch.
fn patch_orientation(img: &GrayImage, cx: i32, cy: i32) -> f32 {
    let r = PATCH_RADIUS;
    let r2 = (r * r) as i32;
    let mut m10 = 0f32;
    let mut m01 = 0f32;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = px_clamped(img, cx + dx, cy + dy);
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

fn describe(img: &GrayImage, kp: &Keypoint) -> Descriptor {
    let cx = kp.x.round() as i32;
    let cy = kp.y.round() as i32;
    let theta = patch_orientation(img, cx, cy);
    let (sin_t, cos_t) = theta.sin_cos();

    let mut bits = [0u64; DESCRIPTOR_WORDS];
    for (i, [ax, ay, bx, by]) in test_pattern().iter().enumerate() {
        let rax = (cos_t * ax - sin_t * ay).round() as i32;
        let ray = (sin_t * ax + cos_t * ay).round() as i32;
        let rbx = (cos_t * bx - sin_t * by).round() as i32;
        let rby = (sin_t * bx + cos_t * by).round() as i32;

        let va = px_clamped(img, cx + rax, cy + ray);
        let vb = px_clamped(img, cx + rbx, cy + rby);
        if va < vb {
            bits[i / 64] |= 1u64 << (i % 64);
        }
    }
    Descriptor { bits }
}

/// Detect keypoints and compute descriptors on a grayscale image.
///
/// Returns an empty set for images too small to host a descriptor patch;
/// callers treat that as a registration quality signal, not an error.
pub fn detect_and_describe(img: &GrayImage, params: &FeatureParams) -> Vec<Feature> {
    let margin = PATCH_RADIUS + 1;
    if img.width() as i32 <= 2 * margin || img.height() as i32 <= 2 * margin {
        return Vec::new();
    }

    let blurred = gaussian_blur_f32(img, params.blur_sigma);
    let mut corners = corners_fast9(&blurred, params.fast_threshold);
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));
    corners.truncate(params.max_keypoints);

    corners
        .iter()
        .filter(|c| {
            let x = c.x as i32;
            let y = c.y as i32;
            x >= margin
                && y >= margin
                && x < img.width() as i32 - margin
                && y < img.height() as i32 - margin
        })
        .map(|c| {
            let keypoint = Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                score: c.score,
            };
            let descriptor = describe(&blurred, &keypoint);
            Feature {
                keypoint,
                descriptor,
            }
        })
        .collect()
}

/// Brute-force 2-nearest-neighbour matching with Lowe's ratio test.
///
/// A query feature is matched to its nearest train feature only when the
/// best Hamming distance is below `ratio` times the second best, rejecting
/// ambiguous correspondences. With fewer than two train features no ratio
/// can be formed and nothing matches.
pub fn match_descriptors(
    query: &[Feature],
    train: &[Feature],
    ratio: f32,
) -> Vec<DescriptorMatch> {
    if train.len() < 2 {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for (qi, q) in query.iter().enumerate() {
        let mut best = (usize::MAX, u32::MAX);
        let mut second = u32::MAX;
        for (ti, t) in train.iter().enumerate() {
            let d = q.descriptor.hamming(&t.descriptor);
            if d < best.1 {
                second = best.1;
                best = (ti, d);
            } else if d < second {
                second = d;
            }
        }
        if (best.1 as f32) < ratio * (second as f32) {
            matches.push(DescriptorMatch {
                query: qi,
                train: best.0,
                distance: best.1,
            });
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    // White page scattered with dark dots of varying size and intensity.
    fn dotted_image(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255u8]));
        let mut rng = XorShift64::new(seed);
        for _ in 0..60 {
            let cx = rng.next_in(24, w as i32 - 25);
            let cy = rng.next_in(24, h as i32 - 25);
            let r = rng.next_in(2, 5);
            let shade = rng.next_in(0, 90) as u8;
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx * dx + dy * dy <= r * r {
                        img.put_pixel((cx + dx) as u32, (cy + dy) as u32, Luma([shade]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn equal_descriptors_have_zero_distance() {
        let img = dotted_image(200, 160, 3);
        let feats = detect_and_describe(&img, &FeatureParams::default());
        assert!(!feats.is_empty(), "expected corners on a dotted image");
        for f in &feats {
            assert_eq!(f.descriptor.hamming(&f.descriptor), 0);
        }
    }

    #[test]
    fn blank_image_yields_no_features() {
        let img = GrayImage::from_pixel(120, 90, Luma([255u8]));
        assert!(detect_and_describe(&img, &FeatureParams::default()).is_empty());
    }

    #[test]
    fn tiny_image_yields_no_features() {
        let img = GrayImage::from_pixel(20, 20, Luma([0u8]));
        assert!(detect_and_describe(&img, &FeatureParams::default()).is_empty());
    }

    #[test]
    fn self_matching_maps_features_onto_themselves() {
        let img = dotted_image(260, 200, 11);
        let feats = detect_and_describe(&img, &FeatureParams::default());
        assert!(feats.len() >= 8);

        let matches = match_descriptors(&feats, &feats, 0.75);
        assert!(
            matches.len() * 2 >= feats.len(),
            "expected most features to survive the ratio test, got {}/{}",
            matches.len(),
            feats.len()
        );
        for m in &matches {
            assert_eq!(m.query, m.train);
            assert_eq!(m.distance, 0);
        }
    }

    #[test]
    fn ratio_test_rejects_ambiguous_matches() {
        let img = dotted_image(200, 160, 3);
        let feats = detect_and_describe(&img, &FeatureParams::default());
        let f = feats[0];
        // Two identical train descriptors: best == second best, no winner.
        let matches = match_descriptors(&[f], &[f, f], 0.75);
        assert!(matches.is_empty());
    }

    #[test]
    fn fewer_than_two_train_features_never_match() {
        let img = dotted_image(200, 160, 3);
        let feats = detect_and_describe(&img, &FeatureParams::default());
        assert!(match_descriptors(&feats, &feats[..1], 0.75).is_empty());
        assert!(match_descriptors(&feats, &[], 0.75).is_empty());
    }
}
