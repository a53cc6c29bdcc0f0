//! Planar homography estimation and perspective warping.
//!
//! Estimation runs in normalized coordinates (Hartley) for numerical
//! stability: an exact 8x8 solve for four correspondences, an SVD-based DLT
//! for the overdetermined case, and a seeded RANSAC wrapper for noisy
//! correspondence sets.

use image::{GrayImage, Rgb, RgbImage};
use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::rng::XorShift64;

/// Projective transform between two planar pixel spaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self {
            h: Matrix3::identity(),
        }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// True when the transform deviates from the identity by less than `tol`
    /// in every (h33-normalized) matrix entry.
    pub fn is_identity(&self, tol: f64) -> bool {
        let s = self.h[(2, 2)];
        if s.abs() < 1e-12 {
            return false;
        }
        let n = self.h / s;
        let i = Matrix3::<f64>::identity();
        (0..3).all(|r| (0..3).all(|c| (n[(r, c)] - i[(r, c)]).abs() < tol))
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

// Translate to the centroid and scale so the mean distance is sqrt(2).
fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in pts {
        cx += p.x;
        cy += p.y;
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0;
    for p in pts {
        let dx = p.x - cx;
        let dy = p.y - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;

    let t = hartley_normalization(cx, cy, mean_dist);

    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    Some(h / s)
}

fn denormalize_homography(
    hn: Matrix3<f64>,
    t_src: Matrix3<f64>,
    t_dst: Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    let t_dst_inv = t_dst.try_inverse()?;
    Some(t_dst_inv * hn * t_src)
}

/// Compute H such that `dst ~ H * src` from exactly four correspondences.
///
/// Correspondence order must be consistent between `src` and `dst`.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1.
    // For each correspondence (x,y)->(u,v):
    //   h11 x + h12 y + h13 - u h31 x - u h32 y = u
    //   h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let x = src_n[k].x;
        let y = src_n[k].y;
        let u = dst_n[k].x;
        let v = dst_n[k].y;

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;

    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    let h = denormalize_homography(hn, t_src, t_dst)?;
    let h = normalize_homography(h)?;

    Some(Homography::new(h))
}

/// Estimate H such that `dst ~ H * src` from four or more correspondences.
///
/// With exactly four points this delegates to the exact solve; otherwise the
/// least-squares DLT solution is the right singular vector of the 2Nx9
/// design matrix with the smallest singular value.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    if src.len() == 4 {
        let s: &[Point2<f64>; 4] = src.try_into().ok()?;
        let d: &[Point2<f64>; 4] = dst.try_into().ok()?;
        return homography_from_4pt(s, d);
    }

    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);

    for k in 0..n {
        let x = s[k].x;
        let y = s[k].y;
        let u = d[k].x;
        let v = d[k].y;

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // Ah = 0 -> h is the right singular vector with the smallest singular value.
    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let last = vt.nrows().checked_sub(1)?;
    let h = vt.row(last);

    let hn =
        Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    let h = denormalize_homography(hn, ts, td)?;
    let h = normalize_homography(h)?;

    Some(Homography::new(h))
}

/// RANSAC configuration for robust homography estimation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RansacParams {
    /// Number of 4-point hypotheses to evaluate.
    pub max_iterations: usize,
    /// Reprojection error (pixels) below which a correspondence is an inlier.
    pub inlier_threshold: f64,
    /// Seed for the hypothesis sampler. Fixed by default so that repeated
    /// runs over the same input produce the same transform.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            inlier_threshold: 5.0,
            seed: 0x0c5c_a32d_9e1b_74f1,
        }
    }
}

/// A robustly estimated homography together with its consensus set.
#[derive(Clone, Debug)]
pub struct RansacHomography {
    pub homography: Homography,
    /// Indices into the input correspondence arrays.
    pub inliers: Vec<usize>,
}

fn reprojection_error(h: &Homography, src: Point2<f64>, dst: Point2<f64>) -> f64 {
    let p = h.apply(src);
    let dx = p.x - dst.x;
    let dy = p.y - dst.y;
    (dx * dx + dy * dy).sqrt()
}

fn consensus_set(
    h: &Homography,
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    threshold: f64,
) -> Vec<usize> {
    (0..src.len())
        .filter(|&i| reprojection_error(h, src[i], dst[i]) < threshold)
        .collect()
}

/// Estimate H such that `dst ~ H * src`, tolerating outlier correspondences.
///
/// Returns `None` when fewer than four correspondences are given or no
/// hypothesis gathers a four-point consensus. The winning consensus set is
/// refit with the least-squares DLT before being returned.
pub fn estimate_homography_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    params: &RansacParams,
) -> Option<RansacHomography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let n = src.len();
    let mut rng = XorShift64::new(params.seed);
    let mut best: Option<(Homography, Vec<usize>)> = None;

    for _ in 0..params.max_iterations {
        let mut idx = [0usize; 4];
        let mut picked = 0;
        while picked < 4 {
            let cand = rng.next_index(n);
            if !idx[..picked].contains(&cand) {
                idx[picked] = cand;
                picked += 1;
            }
        }

        let s = [src[idx[0]], src[idx[1]], src[idx[2]], src[idx[3]]];
        let d = [dst[idx[0]], dst[idx[1]], dst[idx[2]], dst[idx[3]]];
        let Some(h) = homography_from_4pt(&s, &d) else {
            continue;
        };

        let inliers = consensus_set(&h, src, dst, params.inlier_threshold);
        if inliers.len() < 4 {
            continue;
        }
        let better = match &best {
            None => true,
            Some((_, prev)) => inliers.len() > prev.len(),
        };
        if better {
            // Every correspondence is an inlier; no later hypothesis can win.
            let saturated = inliers.len() == n;
            best = Some((h, inliers));
            if saturated {
                break;
            }
        }
    }

    let (_, inliers) = best?;

    let in_src: Vec<Point2<f64>> = inliers.iter().map(|&i| src[i]).collect();
    let in_dst: Vec<Point2<f64>> = inliers.iter().map(|&i| dst[i]).collect();
    let refit = estimate_homography(&in_src, &in_dst)?;
    let inliers = consensus_set(&refit, src, dst, params.inlier_threshold);

    Some(RansacHomography {
        homography: refit,
        inliers,
    })
}

#[inline]
fn gray_at(img: &GrayImage, x: i64, y: i64, fill: u8) -> f64 {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return fill as f64;
    }
    img.get_pixel(x as u32, y as u32).0[0] as f64
}

#[inline]
fn rgb_at(img: &RgbImage, x: i64, y: i64, fill: u8) -> [f64; 3] {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return [fill as f64; 3];
    }
    let p = img.get_pixel(x as u32, y as u32).0;
    [p[0] as f64, p[1] as f64, p[2] as f64]
}

/// Warp a grayscale image: each output pixel samples the source through
/// `h_src_from_out`, which maps output coordinates onto source coordinates.
/// Pixels falling outside the source are filled with `fill`.
pub fn warp_perspective_gray(
    src: &GrayImage,
    h_src_from_out: &Homography,
    out_w: u32,
    out_h: u32,
    fill: u8,
) -> GrayImage {
    let mut out = GrayImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            // Integer-grid sampling: an identity transform reproduces the
            // source exactly.
            let p = h_src_from_out.apply(Point2::new(x as f64, y as f64));
            let x0 = p.x.floor();
            let y0 = p.y.floor();
            let fx = p.x - x0;
            let fy = p.y - y0;
            let (xi, yi) = (x0 as i64, y0 as i64);

            let p00 = gray_at(src, xi, yi, fill);
            let p10 = gray_at(src, xi + 1, yi, fill);
            let p01 = gray_at(src, xi, yi + 1, fill);
            let p11 = gray_at(src, xi + 1, yi + 1, fill);

            let a = p00 + fx * (p10 - p00);
            let b = p01 + fx * (p11 - p01);
            let v = (a + fy * (b - a)).clamp(0.0, 255.0);
            out.put_pixel(x, y, image::Luma([v as u8]));
        }
    }
    out
}

/// RGB counterpart of [`warp_perspective_gray`].
pub fn warp_perspective_rgb(
    src: &RgbImage,
    h_src_from_out: &Homography,
    out_w: u32,
    out_h: u32,
    fill: u8,
) -> RgbImage {
    let mut out = RgbImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let p = h_src_from_out.apply(Point2::new(x as f64, y as f64));
            let x0 = p.x.floor();
            let y0 = p.y.floor();
            let fx = p.x - x0;
            let fy = p.y - y0;
            let (xi, yi) = (x0 as i64, y0 as i64);

            let p00 = rgb_at(src, xi, yi, fill);
            let p10 = rgb_at(src, xi + 1, yi, fill);
            let p01 = rgb_at(src, xi, yi + 1, fill);
            let p11 = rgb_at(src, xi + 1, yi + 1, fill);

            let mut px = [0u8; 3];
            for c in 0..3 {
                let a = p00[c] + fx * (p10[c] - p00[c]);
                let b = p01[c] + fx * (p11[c] - p01[c]);
                px[c] = (a + fy * (b - a)).clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, y, Rgb(px));
        }
    }
    out
}
