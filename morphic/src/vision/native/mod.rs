//! Pure-Rust implementation of the vision primitives.
//!
//! - Features: Harris corners, 256-bit BRIEF descriptors and mutual
//!   nearest-neighbour Hamming matching
//! - Homography: seeded RANSAC over a normalized DLT, refit on inliers
//! - Gradients: Sobel magnitude
//! - Flow: dense pyramidal Lucas-Kanade
//!
//! Everything is deterministic for a given configuration.

mod features;
mod flow;
mod gradient;
mod ransac;

use glam::DVec2;

use crate::error::VisionError;
use crate::plane::Plane;
use crate::vision::{FeatureMatch, FlowField, FlowParams, HomographyFit, VisionPrimitives};

use features::BriefPattern;
use flow::DenseLkParams;
use ransac::RansacParams;

/// Tuning for [`NativeVision`].
#[derive(Debug, Clone, PartialEq)]
pub struct NativeVisionConfig {
    /// Harris sensitivity `k` in `det - k * trace^2`.
    pub harris_k: f32,
    /// Half-size of the BRIEF sampling patch. Corners closer than this to
    /// the border are not described.
    pub descriptor_radius: usize,
    /// Seed for the BRIEF pattern and RANSAC sampling.
    pub seed: u64,
    pub ransac_max_iterations: usize,
    /// Target confidence for RANSAC early termination.
    pub ransac_confidence: f64,
    pub flow_pyramid_levels: usize,
    /// Lucas-Kanade iterations per pyramid level.
    pub flow_iterations: usize,
}

impl Default for NativeVisionConfig {
    fn default() -> Self {
        Self {
            harris_k: 0.04,
            descriptor_radius: 12,
            seed: 0x5eed,
            ransac_max_iterations: 1000,
            ransac_confidence: 0.999,
            flow_pyramid_levels: 3,
            flow_iterations: 3,
        }
    }
}

impl NativeVisionConfig {
    pub fn validate(&self) {
        assert!(
            self.harris_k > 0.0 && self.harris_k < 0.25,
            "harris_k must be in (0, 0.25), got {}",
            self.harris_k
        );
        assert!(self.descriptor_radius > 0, "descriptor_radius must be positive");
        assert!(
            self.ransac_max_iterations > 0,
            "ransac_max_iterations must be positive"
        );
        assert!(
            self.ransac_confidence > 0.0 && self.ransac_confidence < 1.0,
            "ransac_confidence must be in (0, 1), got {}",
            self.ransac_confidence
        );
        assert!(self.flow_pyramid_levels > 0, "flow_pyramid_levels must be positive");
    }
}

/// Default [`VisionPrimitives`] backed by this crate's own implementations.
#[derive(Debug, Clone)]
pub struct NativeVision {
    config: NativeVisionConfig,
    pattern: BriefPattern,
}

impl NativeVision {
    pub fn new(config: NativeVisionConfig) -> Self {
        config.validate();
        let pattern = BriefPattern::new(config.descriptor_radius, config.seed);
        Self { config, pattern }
    }

    pub fn config(&self) -> &NativeVisionConfig {
        &self.config
    }
}

impl Default for NativeVision {
    fn default() -> Self {
        Self::new(NativeVisionConfig::default())
    }
}

impl VisionPrimitives for NativeVision {
    fn detect_and_match(
        &self,
        a: &Plane,
        b: &Plane,
        max_features: usize,
    ) -> Result<Vec<FeatureMatch>, VisionError> {
        if a.is_empty() || b.is_empty() {
            return Err(VisionError::InvalidInput("empty image".to_string()));
        }

        let margin = self.pattern.radius();
        let (corners_a, corners_b) = rayon::join(
            || features::detect_corners(a, max_features, self.config.harris_k, margin),
            || features::detect_corners(b, max_features, self.config.harris_k, margin),
        );
        let descriptors_a = features::describe_all(a, &corners_a, &self.pattern);
        let descriptors_b = features::describe_all(b, &corners_b, &self.pattern);

        let matches =
            features::match_cross_checked(&corners_a, &descriptors_a, &corners_b, &descriptors_b);
        tracing::trace!(
            corners_a = corners_a.len(),
            corners_b = corners_b.len(),
            matches = matches.len(),
            "native feature matching"
        );
        Ok(matches)
    }

    fn fit_homography(
        &self,
        src: &[DVec2],
        dst: &[DVec2],
        threshold: f64,
    ) -> Result<Option<HomographyFit>, VisionError> {
        if src.len() != dst.len() {
            return Err(VisionError::InvalidInput(format!(
                "{} source points but {} target points",
                src.len(),
                dst.len()
            )));
        }
        let params = RansacParams {
            max_iterations: self.config.ransac_max_iterations,
            confidence: self.config.ransac_confidence,
            seed: self.config.seed,
        };
        Ok(ransac::fit_homography_ransac(src, dst, threshold, &params))
    }

    fn gradient_magnitude(&self, image: &Plane) -> Result<Plane, VisionError> {
        Ok(gradient::gradient_magnitude(image))
    }

    fn dense_optical_flow(
        &self,
        a: &Plane,
        b: &Plane,
        params: &FlowParams,
    ) -> Result<FlowField, VisionError> {
        if (a.width(), a.height()) != (b.width(), b.height()) {
            return Err(VisionError::Failed {
                primitive: "dense_optical_flow",
                message: format!(
                    "size mismatch: {}x{} vs {}x{}",
                    a.width(),
                    a.height(),
                    b.width(),
                    b.height()
                ),
            });
        }
        if a.is_empty() {
            return Err(VisionError::InvalidInput("empty image".to_string()));
        }
        let lk = DenseLkParams {
            window_radius: params.window_radius,
            max_levels: self.config.flow_pyramid_levels,
            iterations: self.config.flow_iterations,
        };
        Ok(flow::dense_lucas_kanade(a, b, &lk))
    }
}

#[cfg(test)]
mod tests;
