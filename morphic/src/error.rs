//! Error types for analysis, baking and configuration.

use thiserror::Error;

/// Failure reported by a vision or geometry primitive.
///
/// The analyzer and session never propagate these to callers; they degrade to
/// a neutral report or a crossfade instead.
#[derive(Debug, Clone, Error)]
pub enum VisionError {
    #[error("vision primitives are unavailable: {0}")]
    Unavailable(String),

    #[error("{primitive} failed: {message}")]
    Failed {
        primitive: &'static str,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors that can occur while baking warp data.
#[derive(Debug, Clone, Error)]
pub enum BakeError {
    #[error("insufficient control points: found {found}, need at least {required}")]
    InsufficientControlPoints { found: usize, required: usize },

    #[error("control point count mismatch: image A has {a}, image B has {b}")]
    MismatchedControlPoints { a: usize, b: usize },

    #[error("invalid bake dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("triangulation failed: {0}")]
    Triangulation(#[source] VisionError),

    #[error("triangulation produced no triangles")]
    EmptyTriangulation,

    #[error("optical flow failed: {0}")]
    Flow(#[source] VisionError),

    #[error("bake cancelled")]
    Cancelled,

    #[error("bake job panicked: {0}")]
    Panicked(String),
}

/// Errors raised while loading configuration text.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[source] anyhow::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_control_points_message() {
        let err = BakeError::InsufficientControlPoints {
            found: 2,
            required: 3,
        };
        assert_eq!(
            err.to_string(),
            "insufficient control points: found 2, need at least 3"
        );
    }

    #[test]
    fn test_flow_error_keeps_source() {
        let err = BakeError::Flow(VisionError::Failed {
            primitive: "dense_optical_flow",
            message: "size mismatch".to_string(),
        });
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("dense_optical_flow failed: size mismatch")
        );
    }
}
