//! Harris corners with BRIEF descriptors and cross-checked Hamming matching.

use glam::DVec2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::gradient::{box_blur, sobel};
use crate::plane::Plane;
use crate::vision::FeatureMatch;

/// Number of intensity comparisons per descriptor.
const DESCRIPTOR_BITS: usize = 256;
const DESCRIPTOR_WORDS: usize = DESCRIPTOR_BITS / 64;

pub(crate) type Descriptor = [u64; DESCRIPTOR_WORDS];

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Keypoint {
    pub x: usize,
    pub y: usize,
    pub response: f32,
}

/// Random pairs of offsets compared by the descriptor.
#[derive(Debug, Clone)]
pub(crate) struct BriefPattern {
    pairs: Vec<[(isize, isize); 2]>,
    radius: usize,
}

impl BriefPattern {
    pub fn new(radius: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let r = radius as i64;
        let pairs = (0..DESCRIPTOR_BITS)
            .map(|_| {
                [
                    (
                        rng.random_range(-r..=r) as isize,
                        rng.random_range(-r..=r) as isize,
                    ),
                    (
                        rng.random_range(-r..=r) as isize,
                        rng.random_range(-r..=r) as isize,
                    ),
                ]
            })
            .collect();
        Self { pairs, radius }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    fn describe(&self, smoothed: &Plane, kp: &Keypoint) -> Descriptor {
        let mut descriptor = [0u64; DESCRIPTOR_WORDS];
        let (cx, cy) = (kp.x as isize, kp.y as isize);
        for (bit, [a, b]) in self.pairs.iter().enumerate() {
            let va = smoothed.get_clamped(cx + a.0, cy + a.1);
            let vb = smoothed.get_clamped(cx + b.0, cy + b.1);
            if va < vb {
                descriptor[bit / 64] |= 1 << (bit % 64);
            }
        }
        descriptor
    }
}

#[inline]
pub(crate) fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Harris corners, strongest first, kept at least `margin` pixels from the
/// border.
pub(crate) fn detect_corners(
    image: &Plane,
    max_features: usize,
    harris_k: f32,
    margin: usize,
) -> Vec<Keypoint> {
    let width = image.width();
    let height = image.height();
    if width <= 2 * margin + 2 || height <= 2 * margin + 2 || max_features == 0 {
        return Vec::new();
    }

    let (gx, gy) = sobel(image);
    let mut ixx = Plane::new_filled(width, height, 0.0);
    let mut iyy = Plane::new_filled(width, height, 0.0);
    let mut ixy = Plane::new_filled(width, height, 0.0);
    for (i, (x, y)) in gx.pixels().iter().zip(gy.pixels()).enumerate() {
        ixx.pixels_mut()[i] = x * x;
        iyy.pixels_mut()[i] = y * y;
        ixy.pixels_mut()[i] = x * y;
    }
    let ixx = box_blur(&ixx, 1);
    let iyy = box_blur(&iyy, 1);
    let ixy = box_blur(&ixy, 1);

    let response: Vec<f32> = (0..width * height)
        .map(|i| {
            let a = ixx.pixels()[i];
            let b = iyy.pixels()[i];
            let c = ixy.pixels()[i];
            let trace = a + b;
            a * b - c * c - harris_k * trace * trace
        })
        .collect();
    let response = Plane::new(width, height, response);

    let peak = response.max_value();
    if peak <= 0.0 {
        return Vec::new();
    }
    let threshold = peak * 1e-3;

    let mut corners = Vec::new();
    for y in margin.max(1)..height - margin.max(1) {
        for x in margin.max(1)..width - margin.max(1) {
            let r = response.get(x, y);
            if r <= threshold {
                continue;
            }
            // Ties go to the first pixel in raster order
            let is_peak = (-1isize..=1).all(|dy| {
                (-1isize..=1).all(|dx| {
                    if dx == 0 && dy == 0 {
                        return true;
                    }
                    let n = response.get((x as isize + dx) as usize, (y as isize + dy) as usize);
                    let later = dy > 0 || (dy == 0 && dx > 0);
                    if later { n <= r } else { n < r }
                })
            });
            if is_peak {
                corners.push(Keypoint { x, y, response: r });
            }
        }
    }

    corners.sort_by(|a, b| b.response.total_cmp(&a.response));
    corners.truncate(max_features);
    corners
}

pub(crate) fn describe_all(
    image: &Plane,
    keypoints: &[Keypoint],
    pattern: &BriefPattern,
) -> Vec<Descriptor> {
    let smoothed = box_blur(image, 2);
    keypoints
        .par_iter()
        .map(|kp| pattern.describe(&smoothed, kp))
        .collect()
}

/// Brute-force nearest neighbour in both directions; only mutual best matches
/// are kept.
pub(crate) fn match_cross_checked(
    keypoints_a: &[Keypoint],
    descriptors_a: &[Descriptor],
    keypoints_b: &[Keypoint],
    descriptors_b: &[Descriptor],
) -> Vec<FeatureMatch> {
    if descriptors_a.is_empty() || descriptors_b.is_empty() {
        return Vec::new();
    }

    let nearest = |query: &Descriptor, train: &[Descriptor]| -> (usize, u32) {
        train
            .iter()
            .enumerate()
            .map(|(j, d)| (j, hamming(query, d)))
            .min_by_key(|&(j, dist)| (dist, j))
            .unwrap_or((0, u32::MAX))
    };

    let forward: Vec<(usize, u32)> = descriptors_a
        .par_iter()
        .map(|d| nearest(d, descriptors_b))
        .collect();
    let backward: Vec<usize> = descriptors_b
        .par_iter()
        .map(|d| nearest(d, descriptors_a).0)
        .collect();

    forward
        .iter()
        .enumerate()
        .filter(|&(i, &(j, _))| backward[j] == i)
        .map(|(i, &(j, distance))| FeatureMatch {
            src: DVec2::new(keypoints_a[i].x as f64, keypoints_a[i].y as f64),
            dst: DVec2::new(keypoints_b[j].x as f64, keypoints_b[j].y as f64),
            distance: distance as f32,
        })
        .collect()
}
