//! Scalar similarity metrics computed from analysis-space data.

use glam::DVec2;
use image::RgbaImage;

use crate::math::Homography;
use crate::plane::Plane;

/// Match density on a `size x size` grid over a `width x height` image,
/// normalized by the fullest cell, plus the fraction of non-empty cells.
pub fn coverage_heatmap(
    points: &[DVec2],
    width: usize,
    height: usize,
    size: usize,
) -> (Vec<f32>, f64) {
    let mut counts = vec![0u32; size * size];
    if width == 0 || height == 0 || size == 0 {
        return (vec![0.0; size * size], 0.0);
    }

    for p in points {
        if !(p.x >= 0.0 && p.y >= 0.0) {
            continue;
        }
        let cx = ((p.x / width as f64) * size as f64) as usize;
        let cy = ((p.y / height as f64) * size as f64) as usize;
        counts[cy.min(size - 1) * size + cx.min(size - 1)] += 1;
    }

    let max = counts.iter().copied().max().unwrap_or(0);
    let filled = counts.iter().filter(|&&c| c > 0).count();
    let heatmap = if max == 0 {
        vec![0.0; size * size]
    } else {
        counts.iter().map(|&c| c as f32 / max as f32).collect()
    };
    (heatmap, filled as f64 / (size * size) as f64)
}

/// Mean distance between `H * src` and `dst`. Points projected to infinity
/// are skipped; returns 0 when nothing is left.
pub fn average_reprojection_error(h: &Homography, src: &[DVec2], dst: &[DVec2]) -> f64 {
    let (sum, count) = src
        .iter()
        .zip(dst)
        .filter_map(|(s, d)| h.project(*s).map(|p| p.distance(*d)))
        .fold((0.0, 0usize), |(sum, count), e| (sum + e, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Normalized cross-correlation of two gradient fields, clamped to [0, 1].
///
/// Both fields are scaled to a maximum of 1 first; `b` is resampled to the
/// size of `a` when they differ. A constant field correlates with nothing.
pub fn edge_overlap(a: &Plane, b: &Plane) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut a = a.clone();
    let mut b = b.resampled(a.width(), a.height());
    a.normalize_max();
    b.normalize_max();

    let n = a.len() as f64;
    let mean_a = a.pixels().iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.pixels().iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&va, &vb) in a.pixels().iter().zip(b.pixels()) {
        let da = va as f64 - mean_a;
        let db = vb as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    (cov / denom).clamp(0.0, 1.0)
}

/// Per-channel RGB histograms normalized by pixel count.
pub fn color_histograms(image: &RgbaImage, bins: usize) -> [Vec<f64>; 3] {
    let mut histograms = [vec![0.0; bins], vec![0.0; bins], vec![0.0; bins]];
    let pixel_count = image.width() as usize * image.height() as usize;
    if pixel_count == 0 || bins == 0 {
        return histograms;
    }

    for pixel in image.pixels() {
        for (channel, histogram) in histograms.iter_mut().enumerate() {
            let bin = pixel.0[channel] as usize * bins / 256;
            histogram[bin] += 1.0;
        }
    }
    let inv = 1.0 / pixel_count as f64;
    for histogram in &mut histograms {
        histogram.iter_mut().for_each(|v| *v *= inv);
    }
    histograms
}

/// Color histogram distance: the summed absolute difference over every bin
/// of the R, G and B histograms, divided by the total bin count.
///
/// Zero for identical histograms. Each channel contributes at most 2, so
/// fully disjoint colors score `2 / bins`.
pub fn histogram_distance(a: &RgbaImage, b: &RgbaImage, bins: usize) -> f64 {
    if bins == 0 {
        return 0.0;
    }
    let ha = color_histograms(a, bins);
    let hb = color_histograms(b, bins);
    let total: f64 = ha
        .iter()
        .flatten()
        .zip(hb.iter().flatten())
        .map(|(x, y)| (x - y).abs())
        .sum();
    (total / (3 * bins) as f64).clamp(0.0, 1.0)
}
