//! Confidence-weighted dense flow baking.
//!
//! The raw flow comes from [`VisionPrimitives::dense_optical_flow`] on
//! downscaled grayscale copies of both images. This module adds a per-pixel
//! confidence that distrusts statistical outliers and near-zero or extreme
//! motion, and optionally smooths the field.


use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use rayon::prelude::*;

use crate::bake::check_dimensions;
use crate::config::FlowBakeConfig;
use crate::error::BakeError;
use crate::math::median_and_mad_f32;
use crate::plane::prepare_gray;
use crate::vision::{self, FlowParams, VisionPrimitives};

/// Keeps the outlier score finite when every magnitude is identical.
const MAD_EPSILON: f32 = 1e-6;
/// Normalized magnitude the confidence model prefers.
const PREFERRED_MAGNITUDE: f32 = 0.3;
/// No pixel is trusted less than this.
pub const MIN_CONFIDENCE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowBakeOptions {
    /// Long-edge resolution the flow is computed at.
    pub target_res: u32,
    pub smoothing: bool,
}

impl From<&FlowBakeConfig> for FlowBakeOptions {
    fn from(config: &FlowBakeConfig) -> Self {
        Self {
            target_res: config.target_res,
            smoothing: config.smoothing,
        }
    }
}

/// Flow from image A to image B at analysis resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowData {
    /// Interleaved `[dx, dy]` per pixel, row-major, in flow-grid pixels.
    flow_field: Vec<f32>,
    /// Per-pixel trust in `[MIN_CONFIDENCE, 1]`.
    confidence: Vec<f32>,
    width: usize,
    height: usize,
    /// Flow-grid pixels per full-resolution pixel of image A.
    scale: f64,
}

impl FlowData {
    pub fn flow_field(&self) -> &[f32] {
        &self.flow_field
    }

    pub fn confidence(&self) -> &[f32] {
        &self.confidence
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[inline]
    pub fn vector(&self, x: usize, y: usize) -> [f32; 2] {
        let i = 2 * (y * self.width + x);
        [self.flow_field[i], self.flow_field[i + 1]]
    }

    #[inline]
    pub fn confidence_at(&self, x: usize, y: usize) -> f32 {
        self.confidence[y * self.width + x]
    }
}

pub struct FlowBaker {
    config: FlowBakeConfig,
    vision: Arc<dyn VisionPrimitives>,
}

impl FlowBaker {
    pub fn new(config: FlowBakeConfig, vision: Arc<dyn VisionPrimitives>) -> Self {
        config.validate();
        Self { config, vision }
    }

    pub fn config(&self) -> &FlowBakeConfig {
        &self.config
    }

    pub fn bake(
        &self,
        a: &RgbaImage,
        b: &RgbaImage,
        options: &FlowBakeOptions,
    ) -> Result<FlowData, BakeError> {
        check_dimensions(a.width(), a.height())?;
        check_dimensions(b.width(), b.height())?;
        if options.target_res == 0 {
            return Err(BakeError::InvalidDimensions {
                width: 0,
                height: 0,
            });
        }
        let start = Instant::now();

        let (gray_a, scale) = prepare_gray(a, options.target_res);
        let (mut gray_b, _) = prepare_gray(b, options.target_res);
        let (width, height) = (gray_a.width(), gray_a.height());
        if gray_b.width() != width || gray_b.height() != height {
            gray_b = gray_b.resampled(width, height);
        }

        let params = FlowParams {
            window_radius: self.config.window_radius,
        };
        let flow = self
            .vision
            .dense_optical_flow(&gray_a, &gray_b, &params)
            .map_err(BakeError::Flow)?;
        vision::check_flow(&flow, width, height).map_err(BakeError::Flow)?;

        let mut flow_field = flow.into_data();
        let confidence = flow_confidence(&flow_field);
        if options.smoothing {
            smooth_flow(
                &mut flow_field,
                width,
                height,
                self.config.smoothing_iterations,
                self.config.smoothing_blend,
            );
        }

        tracing::debug!(
            width,
            height,
            smoothing = options.smoothing,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "flow baked"
        );

        Ok(FlowData {
            flow_field,
            confidence,
            width,
            height,
            scale,
        })
    }
}

/// Per-pixel confidence for an interleaved flow field.
///
/// `exp(-|m - median| / (MAD + eps))` penalizes statistical outliers and
/// `1 - |m / max - 0.3|` prefers moderate motion. The product is clamped to
/// `[MIN_CONFIDENCE, 1]`.
pub(crate) fn flow_confidence(flow: &[f32]) -> Vec<f32> {
    let magnitudes: Vec<f32> = flow
        .par_chunks_exact(2)
        .map(|v| (v[0] * v[0] + v[1] * v[1]).sqrt())
        .collect();
    let (median, mad) = median_and_mad_f32(&magnitudes);
    let max = magnitudes.iter().copied().fold(0.0f32, f32::max);

    magnitudes
        .par_iter()
        .map(|&m| {
            let outlier = (m - median).abs() / (mad + MAD_EPSILON);
            let base = (-outlier).exp();
            let normalized = if max > 0.0 { m / max } else { 0.0 };
            let magnitude_score = 1.0 - (normalized - PREFERRED_MAGNITUDE).abs();
            (base * magnitude_score.max(MIN_CONFIDENCE)).clamp(MIN_CONFIDENCE, 1.0)
        })
        .collect()
}

/// 4-neighbor Laplacian smoothing of interior pixels.
///
/// Each iteration reads the previous iteration's values; border pixels are
/// never written.
pub(crate) fn smooth_flow(
    flow: &mut [f32],
    width: usize,
    height: usize,
    iterations: usize,
    blend: f32,
) {
    if width < 3 || height < 3 {
        return;
    }
    let stride = 2 * width;
    let mut previous = vec![0.0; flow.len()];
    for _ in 0..iterations {
        previous.copy_from_slice(flow);
        flow.par_chunks_mut(stride)
            .enumerate()
            .skip(1)
            .take(height - 2)
            .for_each(|(y, row)| {
                for x in 1..width - 1 {
                    for c in 0..2 {
                        let at = |xx: usize, yy: usize| previous[yy * stride + 2 * xx + c];
                        let mean =
                            0.25 * (at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1));
                        let current = at(x, y);
                        row[2 * x + c] = current + blend * (mean - current);
                    }
                }
            });
    }
}
