//! Warp-data bakers.
//!
//! Each baker turns control points or images into the data one morph mode
//! samples per frame:
//! - [`mesh`]: triangulated control mesh with per-triangle affine pairs
//! - [`tps`]: thin-plate spline with a lazily materialized displacement grid
//! - [`flow`]: confidence-weighted dense optical flow
//!
//! Bakers are pure functions of their inputs and fail fast on unusable
//! input; the session turns every failure into a crossfade.

pub mod flow;
pub mod mesh;
pub mod tps;

use glam::DVec2;

use crate::error::BakeError;

/// Fewest control-point pairs the mesh and TPS bakers accept.
pub const MIN_CONTROL_POINTS: usize = 3;

pub(crate) fn check_control_points(a: &[DVec2], b: &[DVec2]) -> Result<(), BakeError> {
    if a.len() != b.len() {
        return Err(BakeError::MismatchedControlPoints {
            a: a.len(),
            b: b.len(),
        });
    }
    if a.len() < MIN_CONTROL_POINTS {
        return Err(BakeError::InsufficientControlPoints {
            found: a.len(),
            required: MIN_CONTROL_POINTS,
        });
    }
    Ok(())
}

pub(crate) fn check_dimensions(width: u32, height: u32) -> Result<(), BakeError> {
    if width == 0 || height == 0 {
        return Err(BakeError::InvalidDimensions { width, height });
    }
    Ok(())
}
