//! Testing utilities for morphic.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{DVec2, Vec2};
use image::{Rgba, RgbaImage};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::error::VisionError;
use crate::math::Homography;
use crate::plane::Plane;
use crate::vision::{FeatureMatch, FlowField, FlowParams, HomographyFit, VisionPrimitives};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(rgba))
}

/// Overlapping random rectangles on a mid-gray background. Plenty of
/// corners, no two of them alike.
pub fn textured_image(width: u32, height: u32, seed: u64) -> RgbaImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut image = solid_image(width, height, [128, 128, 128, 255]);
    let count = (width * height / 400).max(8);
    for _ in 0..count {
        let w = rng.random_range(4..=width / 6 + 4);
        let h = rng.random_range(4..=height / 6 + 4);
        let x0 = rng.random_range(0..width);
        let y0 = rng.random_range(0..height);
        let color = [
            rng.random_range(0..=255u8),
            rng.random_range(0..=255u8),
            rng.random_range(0..=255u8),
            255,
        ];
        for y in y0..(y0 + h).min(height) {
            for x in x0..(x0 + w).min(width) {
                image.put_pixel(x, y, Rgba(color));
            }
        }
    }
    image
}

/// Translate by whole pixels; uncovered pixels repeat the nearest edge.
pub fn shifted_image(image: &RgbaImage, dx: i64, dy: i64) -> RgbaImage {
    let (width, height) = image.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        let sx = (x as i64 - dx).clamp(0, width as i64 - 1) as u32;
        let sy = (y as i64 - dy).clamp(0, height as i64 - 1) as u32;
        *image.get_pixel(sx, sy)
    })
}

/// Matches of a pure translation laid out on a grid.
pub fn grid_matches(
    count_x: usize,
    count_y: usize,
    spacing: f64,
    shift: DVec2,
) -> Vec<FeatureMatch> {
    (0..count_y)
        .flat_map(|j| {
            (0..count_x).map(move |i| {
                let src = DVec2::new((i as f64 + 1.0) * spacing, (j as f64 + 1.0) * spacing);
                FeatureMatch {
                    src,
                    dst: src + shift,
                    distance: (i + j) as f32,
                }
            })
        })
        .collect()
}

/// Scripted [`VisionPrimitives`].
///
/// Returns fixed matches, reports the first `inliers` correspondences as
/// inliers of an identity homography, uses the input as its own gradient and
/// returns a constant flow.
#[derive(Debug, Default)]
pub struct FakeVision {
    pub matches: Vec<FeatureMatch>,
    pub inliers: Option<usize>,
    pub homography: Option<Homography>,
    pub flow: Vec2,
    pub unavailable: bool,
    pub flow_fails: bool,
    pub detect_calls: AtomicUsize,
    pub flow_calls: AtomicUsize,
}

impl FakeVision {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn flow_calls(&self) -> usize {
        self.flow_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), VisionError> {
        if self.unavailable {
            Err(VisionError::Unavailable("fake backend disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl VisionPrimitives for FakeVision {
    fn detect_and_match(
        &self,
        _a: &Plane,
        _b: &Plane,
        _max_features: usize,
    ) -> Result<Vec<FeatureMatch>, VisionError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.matches.clone())
    }

    fn fit_homography(
        &self,
        src: &[DVec2],
        _dst: &[DVec2],
        _threshold: f64,
    ) -> Result<Option<HomographyFit>, VisionError> {
        self.check_available()?;
        Ok(self.inliers.map(|inliers| HomographyFit {
            homography: self.homography.unwrap_or_default(),
            inlier_mask: (0..src.len()).map(|i| i < inliers).collect(),
        }))
    }

    fn gradient_magnitude(&self, image: &Plane) -> Result<Plane, VisionError> {
        self.check_available()?;
        Ok(image.clone())
    }

    fn dense_optical_flow(
        &self,
        a: &Plane,
        _b: &Plane,
        _params: &FlowParams,
    ) -> Result<FlowField, VisionError> {
        self.flow_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.flow_fails {
            return Err(VisionError::Failed {
                primitive: "dense_optical_flow",
                message: "scripted failure".to_string(),
            });
        }
        let mut flow = FlowField::zeros(a.width(), a.height());
        for y in 0..a.height() {
            for x in 0..a.width() {
                flow.set_vector(x, y, self.flow);
            }
        }
        Ok(flow)
    }
}
