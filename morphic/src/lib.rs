//! Morphic - feature-driven morph planning and warp baking.
//!
//! Given two still images this library:
//! - measures how similar and how well aligned they are ([`ImageAnalyzer`])
//! - chooses a staged morph strategy ([`MorphPlanner`])
//! - bakes the warp data each stage samples (mesh affines, thin-plate
//!   spline displacements, confidence-weighted optical flow)
//!
//! [`MorphSession`] ties these together for a render loop: it analyzes and
//! bakes once per image pair, caches the result and tells the renderer what to
//! draw for a given progress value. Crossfade is always available as the
//! fallback.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use morphic::{BowyerWatson, ImagePair, MorphConfig, MorphSession, NativeVision};
//!
//! let mut session = MorphSession::new(
//!     MorphConfig::default(),
//!     Arc::new(NativeVision::default()),
//!     Arc::new(BowyerWatson),
//! );
//! let directive = session.tick(&pair, 0.25);
//! ```

pub mod analyzer;
pub mod bake;
pub mod config;
pub mod error;
pub(crate) mod math;
pub mod plane;
pub mod planner;
pub mod session;
pub mod vision;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{
    AffineFit, AnalyzerConfig, Dispatch, FlowBakeConfig, InlierRatioBasis, MeshBakeConfig,
    MorphConfig, PlannerConfig, SessionConfig, TpsBakeConfig,
};
pub use error::{BakeError, ConfigError, VisionError};

// ============================================================================
// Core data types
// ============================================================================

pub use math::Homography;
pub use plane::Plane;

// ============================================================================
// Vision boundary
// ============================================================================

pub use vision::{
    BowyerWatson, FeatureMatch, FlowField, FlowParams, HomographyFit, NativeVision,
    NativeVisionConfig, Triangulator, VisionPrimitives,
};

// ============================================================================
// Analysis and planning
// ============================================================================

pub use analyzer::{Correspondence, ImageAnalyzer, SimilarityReport};
pub use planner::{
    ActiveStages, FlowStageParams, MeshParams, MorphMode, MorphPlan, MorphPlanner, MorphStage,
    Regime, StageParams, TpsParams,
};

// ============================================================================
// Baking
// ============================================================================

pub use bake::flow::{FlowBakeOptions, FlowBaker, FlowData};
pub use bake::mesh::{MeshBakeOptions, MeshBaker, MeshData, MeshTriangle};
pub use bake::tps::{TpsBakeOptions, TpsBaker, TpsData};

// ============================================================================
// Orchestration
// ============================================================================

pub use session::{
    BakedPair, CancelToken, FrameDirective, ImageId, ImagePair, MorphSession, PairCache, PairKey,
    StageData, StageDirective,
};
