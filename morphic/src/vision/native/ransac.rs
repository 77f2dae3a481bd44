//! RANSAC homography estimation with a normalized DLT model.

use glam::DVec2;
use nalgebra::{DMatrix, SVD};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::math::Homography;
use crate::vision::HomographyFit;

/// Correspondences needed for a homography.
const MIN_SAMPLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RansacParams {
    pub max_iterations: usize,
    pub confidence: f64,
    pub seed: u64,
}

/// Compute adaptive iteration count for early termination.
pub(crate) fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }

    // N = log(1 - confidence) / log(1 - w^n)
    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_outlier = (1.0 - w_n).ln();
    if log_outlier >= 0.0 {
        return usize::MAX;
    }
    ((1.0 - confidence).ln() / log_outlier).ceil().max(1.0) as usize
}

pub(crate) fn fit_homography_ransac(
    src: &[DVec2],
    dst: &[DVec2],
    threshold: f64,
    params: &RansacParams,
) -> Option<HomographyFit> {
    let n = src.len();
    if n < MIN_SAMPLES || dst.len() != n {
        return None;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let threshold_sq = threshold * threshold;

    let mut best: Option<(Homography, usize)> = None;
    let mut sample = Vec::with_capacity(MIN_SAMPLES);
    let mut sample_src = Vec::with_capacity(MIN_SAMPLES);
    let mut sample_dst = Vec::with_capacity(MIN_SAMPLES);
    let mut max_iterations = params.max_iterations;
    let mut iteration = 0;

    while iteration < max_iterations {
        iteration += 1;

        sample.clear();
        sample.extend(rand::seq::index::sample(&mut rng, n, MIN_SAMPLES).into_iter());
        sample_src.clear();
        sample_dst.clear();
        for &i in &sample {
            sample_src.push(src[i]);
            sample_dst.push(dst[i]);
        }

        let Some(model) = estimate_homography(&sample_src, &sample_dst) else {
            continue;
        };

        let count = count_inliers(&model, src, dst, threshold_sq);
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((model, count));
            let needed =
                adaptive_iterations(count as f64 / n as f64, MIN_SAMPLES, params.confidence);
            max_iterations = max_iterations.min(needed);
        }
    }

    let (model, count) = best?;
    if count < MIN_SAMPLES {
        return None;
    }

    // Least-squares refit on the consensus set
    let mask = inlier_mask(&model, src, dst, threshold_sq);
    let (inlier_src, inlier_dst): (Vec<DVec2>, Vec<DVec2>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|&(_, &inlier)| inlier)
        .map(|((s, d), _)| (*s, *d))
        .unzip();

    let homography = match estimate_homography(&inlier_src, &inlier_dst) {
        Some(refit) if count_inliers(&refit, src, dst, threshold_sq) >= count => refit,
        _ => model,
    };
    let inlier_mask = inlier_mask(&homography, src, dst, threshold_sq);

    Some(HomographyFit {
        homography,
        inlier_mask,
    })
}

fn residual_sq(h: &Homography, s: DVec2, d: DVec2) -> f64 {
    h.project(s).map_or(f64::INFINITY, |p| p.distance_squared(d))
}

fn count_inliers(h: &Homography, src: &[DVec2], dst: &[DVec2], threshold_sq: f64) -> usize {
    src.iter()
        .zip(dst)
        .filter(|&(s, d)| residual_sq(h, *s, *d) < threshold_sq)
        .count()
}

fn inlier_mask(h: &Homography, src: &[DVec2], dst: &[DVec2], threshold_sq: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| residual_sq(h, *s, *d) < threshold_sq)
        .collect()
}

/// Direct linear transform on Hartley-normalized points.
pub(crate) fn estimate_homography(src: &[DVec2], dst: &[DVec2]) -> Option<Homography> {
    if src.len() < MIN_SAMPLES || src.len() != dst.len() {
        return None;
    }

    let (src_n, src_t) = normalize_points(src);
    let (dst_n, dst_t) = normalize_points(dst);

    let n = src.len();
    let mut a_data = vec![0.0; 2 * n * 9];
    for (i, (r, t)) in src_n.iter().zip(&dst_n).enumerate() {
        let base = i * 18;
        a_data[base..base + 9].copy_from_slice(&[
            -r.x,
            -r.y,
            -1.0,
            0.0,
            0.0,
            0.0,
            r.x * t.x,
            r.y * t.x,
            t.x,
        ]);
        a_data[base + 9..base + 18].copy_from_slice(&[
            0.0,
            0.0,
            0.0,
            -r.x,
            -r.y,
            -1.0,
            r.x * t.y,
            r.y * t.y,
            t.y,
        ]);
    }
    let a = DMatrix::from_row_slice(2 * n, 9, &a_data);
    let h_norm = solve_homogeneous_svd(a)?;

    // H = T_dst^-1 * H_norm * T_src
    let h = dst_t.inverse()?.mul_mat(&h_norm).mul_mat(&src_t);
    let h = h.normalized()?;
    h.is_finite().then_some(h)
}

/// Translate to the centroid and scale to a mean distance of sqrt(2).
pub(crate) fn normalize_points(points: &[DVec2]) -> (Vec<DVec2>, Homography) {
    if points.is_empty() {
        return (Vec::new(), Homography::identity());
    }

    let c = centroid(points);
    let avg_dist = points.iter().map(|p| (*p - c).length()).sum::<f64>() / points.len() as f64;
    if avg_dist < 1e-10 {
        return (points.to_vec(), Homography::identity());
    }

    let scale = std::f64::consts::SQRT_2 / avg_dist;
    let normalized = points.iter().map(|p| (*p - c) * scale).collect();
    let t = Homography::from_array([
        scale,
        0.0,
        -c.x * scale,
        0.0,
        scale,
        -c.y * scale,
        0.0,
        0.0,
        1.0,
    ]);
    (normalized, t)
}

/// Right singular vector of the smallest singular value.
fn solve_homogeneous_svd(a: DMatrix<f64>) -> Option<Homography> {
    let ncols = a.ncols();

    // Thin SVD drops the null-space row when m < 9; zero rows restore it.
    let a = if a.nrows() < ncols {
        let mut padded = DMatrix::zeros(ncols, ncols);
        padded.view_mut((0, 0), (a.nrows(), ncols)).copy_from(&a);
        padded
    } else {
        a
    };

    let svd = SVD::new(a, false, true);
    let v_t = svd.v_t?;
    let last_row = v_t.row(ncols - 1);

    let mut data = [0.0f64; 9];
    for (i, &val) in last_row.iter().enumerate() {
        data[i] = val;
    }
    Some(Homography::from_array(data))
}

pub(crate) fn centroid(points: &[DVec2]) -> DVec2 {
    if points.is_empty() {
        return DVec2::ZERO;
    }
    points.iter().copied().sum::<DVec2>() / points.len() as f64
}
