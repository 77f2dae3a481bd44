//! Boundary between the morph core and computer-vision / geometry primitives.
//!
//! The core only ever sees the narrow data types defined here. Implementations
//! may wrap any vision library; every call may fail, and callers degrade
//! instead of propagating the failure.

mod delaunay;
pub mod native;

use glam::{DVec2, Vec2};

use crate::error::VisionError;
use crate::math::Homography;
use crate::plane::Plane;

pub use delaunay::BowyerWatson;
pub use native::{NativeVision, NativeVisionConfig};

/// One matched feature pair between image A (`src`) and image B (`dst`), in
/// the pixel space of the planes handed to the matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub src: DVec2,
    pub dst: DVec2,
    /// Descriptor distance; lower is better.
    pub distance: f32,
}

/// Result of a robust homography fit.
#[derive(Debug, Clone, PartialEq)]
pub struct HomographyFit {
    pub homography: Homography,
    /// One flag per input correspondence.
    pub inlier_mask: Vec<bool>,
}

impl HomographyFit {
    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|&&inlier| inlier).count()
    }
}

/// Parameters for the dense optical-flow solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowParams {
    /// Half-size of the integration window.
    pub window_radius: usize,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self { window_radius: 3 }
    }
}

/// Dense per-pixel displacement from image A to image B, stored interleaved
/// as `[dx0, dy0, dx1, dy1, ...]` in row-major pixel order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl FlowField {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            2 * width * height,
            "flow data must hold two values per pixel"
        );
        Self {
            data,
            width,
            height,
        }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self::new(width, height, vec![0.0; 2 * width * height])
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn vector(&self, x: usize, y: usize) -> Vec2 {
        let i = 2 * (y * self.width + x);
        Vec2::new(self.data[i], self.data[i + 1])
    }

    #[inline]
    pub fn set_vector(&mut self, x: usize, y: usize, v: Vec2) {
        let i = 2 * (y * self.width + x);
        self.data[i] = v.x;
        self.data[i + 1] = v.y;
    }
}

/// Feature matching, robust model fitting, edge and flow estimation.
pub trait VisionPrimitives: Send + Sync {
    /// Detect up to `max_features` features per image and match them.
    fn detect_and_match(
        &self,
        a: &Plane,
        b: &Plane,
        max_features: usize,
    ) -> Result<Vec<FeatureMatch>, VisionError>;

    /// Fit a homography mapping `src` onto `dst` with RANSAC.
    ///
    /// `Ok(None)` means no model was found; that is insufficient signal, not
    /// a failure.
    fn fit_homography(
        &self,
        src: &[DVec2],
        dst: &[DVec2],
        threshold: f64,
    ) -> Result<Option<HomographyFit>, VisionError>;

    /// Per-pixel gradient magnitude.
    fn gradient_magnitude(&self, image: &Plane) -> Result<Plane, VisionError>;

    /// Dense flow from `a` to `b`; both planes have the same dimensions.
    fn dense_optical_flow(
        &self,
        a: &Plane,
        b: &Plane,
        params: &FlowParams,
    ) -> Result<FlowField, VisionError>;
}

/// Triangulation of a 2D point set.
pub trait Triangulator: Send + Sync {
    /// Triangles as index triples into `points`.
    fn triangulate(&self, points: &[DVec2]) -> Result<Vec<[usize; 3]>, VisionError>;
}

/// Reject primitive output that would poison downstream math.
pub(crate) fn check_matches(matches: &[FeatureMatch]) -> Result<(), VisionError> {
    match matches
        .iter()
        .position(|m| !(m.src.is_finite() && m.dst.is_finite() && m.distance.is_finite()))
    {
        Some(index) => Err(VisionError::InvalidInput(format!(
            "match {index} has non-finite coordinates"
        ))),
        None => Ok(()),
    }
}

pub(crate) fn check_flow(flow: &FlowField, width: usize, height: usize) -> Result<(), VisionError> {
    if flow.width() != width || flow.height() != height {
        return Err(VisionError::InvalidInput(format!(
            "flow field is {}x{}, expected {width}x{height}",
            flow.width(),
            flow.height()
        )));
    }
    if flow.data().iter().any(|v| !v.is_finite()) {
        return Err(VisionError::InvalidInput(
            "flow field has non-finite values".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_field_vector_access() {
        let mut flow = FlowField::zeros(3, 2);
        flow.set_vector(2, 1, Vec2::new(1.5, -0.5));
        assert_eq!(flow.vector(2, 1), Vec2::new(1.5, -0.5));
        assert_eq!(flow.data()[10], 1.5);
        assert_eq!(flow.data()[11], -0.5);
    }

    #[test]
    fn test_check_flow_rejects_wrong_size() {
        let flow = FlowField::zeros(4, 4);
        assert!(check_flow(&flow, 4, 4).is_ok());
        assert!(matches!(
            check_flow(&flow, 4, 5),
            Err(VisionError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_check_matches_rejects_nan() {
        let good = FeatureMatch {
            src: DVec2::new(1.0, 2.0),
            dst: DVec2::new(3.0, 4.0),
            distance: 10.0,
        };
        let bad = FeatureMatch {
            src: DVec2::new(f64::NAN, 2.0),
            ..good
        };
        assert!(check_matches(&[good]).is_ok());
        assert!(check_matches(&[good, bad]).is_err());
    }

    #[test]
    fn test_inlier_count() {
        let fit = HomographyFit {
            homography: Homography::identity(),
            inlier_mask: vec![true, false, true, true],
        };
        assert_eq!(fit.inlier_count(), 3);
    }
}
