//! Configuration types for analysis, planning, baking and the session.
//!
//! All configuration structs and related enums are consolidated here. Every
//! struct deserializes with `#[serde(default)]`, so a settings document only
//! needs to name the values it overrides.

use common::SerdeFormat;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(ConfigError::Invalid(format!($($arg)+)));
        }
    };
}

// =============================================================================
// Analyzer configuration
// =============================================================================

/// Denominator used for the inlier ratio.
///
/// With [`InlierRatioBasis::AllMatches`] the ratio can never exceed
/// `good_match_fraction`, which with the defaults keeps it below the aligned
/// and moderate planner thresholds. [`InlierRatioBasis::GoodMatches`] measures
/// alignment among the matches actually fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InlierRatioBasis {
    /// Inliers over every match the matcher returned.
    #[default]
    AllMatches,
    /// Inliers over the good matches handed to the homography fit.
    GoodMatches,
}

/// Image analyzer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Long-edge resolution both images are downscaled to before analysis.
    pub target_res: u32,
    /// Maximum features detected per image.
    pub max_features: usize,
    /// Fraction of distance-sorted matches kept as good matches.
    pub good_match_fraction: f64,
    /// Upper bound on good matches.
    pub max_good_matches: usize,
    /// Minimum good matches before a homography is attempted.
    pub min_homography_matches: usize,
    /// RANSAC inlier threshold in analysis-space pixels.
    pub ransac_threshold: f64,
    /// Side length of the square coverage heatmap.
    pub heatmap_size: usize,
    /// Histogram bins per color channel.
    pub histogram_bins: usize,
    pub inlier_ratio_basis: InlierRatioBasis,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            target_res: 256,
            max_features: 500,
            good_match_fraction: 0.15,
            max_good_matches: 50,
            min_homography_matches: 4,
            ransac_threshold: 3.0,
            heatmap_size: 8,
            histogram_bins: 16,
            inlier_ratio_basis: InlierRatioBasis::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn check(&self) -> Result<(), ConfigError> {
        ensure!(self.target_res > 0, "analyzer target_res must be positive");
        ensure!(self.max_features > 0, "analyzer max_features must be positive");
        ensure!(
            self.good_match_fraction > 0.0 && self.good_match_fraction <= 1.0,
            "analyzer good_match_fraction must be in (0, 1], got {}",
            self.good_match_fraction
        );
        ensure!(
            self.min_homography_matches >= 4,
            "a homography needs at least 4 matches, got {}",
            self.min_homography_matches
        );
        ensure!(
            self.ransac_threshold > 0.0,
            "analyzer ransac_threshold must be positive, got {}",
            self.ransac_threshold
        );
        ensure!(self.heatmap_size > 0, "analyzer heatmap_size must be positive");
        ensure!(
            (1..=256).contains(&self.histogram_bins),
            "analyzer histogram_bins must be in [1, 256], got {}",
            self.histogram_bins
        );
        Ok(())
    }

    /// Panicking variant of [`Self::check`].
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }
}

// =============================================================================
// Planner configuration
// =============================================================================

/// Decision-tree thresholds for the morph planner.
///
/// The values are empirical; they are exposed so they can be tuned without
/// touching the decision procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Inlier ratio above which the pair counts as geometrically aligned.
    pub aligned_inlier_ratio: f64,
    /// Minimum inliers for the aligned regime.
    pub aligned_min_inliers: usize,
    /// Coverage score above which match coverage is considered good.
    pub good_coverage: f64,
    /// Lower bound (exclusive) of the moderate-alignment regime.
    pub moderate_inlier_ratio: f64,
    /// Edge overlap above which edges are considered strong.
    pub strong_edge_overlap: f64,
    /// Histogram distance below which colors are considered similar.
    pub similar_histogram_distance: f64,
    /// Inlier ratio above which weak alignment is still usable.
    pub weak_inlier_ratio: f64,
    /// Minimum inliers for the weak-alignment regime.
    pub weak_min_inliers: usize,
    /// Trailing fraction of a stage over which it blends into the next.
    pub blend_window: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            aligned_inlier_ratio: 0.6,
            aligned_min_inliers: 10,
            good_coverage: 0.5,
            moderate_inlier_ratio: 0.3,
            strong_edge_overlap: 0.4,
            similar_histogram_distance: 0.3,
            weak_inlier_ratio: 0.15,
            weak_min_inliers: 5,
            blend_window: 0.2,
        }
    }
}

impl PlannerConfig {
    pub fn check(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("aligned_inlier_ratio", self.aligned_inlier_ratio),
            ("good_coverage", self.good_coverage),
            ("moderate_inlier_ratio", self.moderate_inlier_ratio),
            ("strong_edge_overlap", self.strong_edge_overlap),
            ("similar_histogram_distance", self.similar_histogram_distance),
            ("weak_inlier_ratio", self.weak_inlier_ratio),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "planner {name} must be in [0, 1], got {value}"
            );
        }
        ensure!(
            self.moderate_inlier_ratio <= self.aligned_inlier_ratio,
            "planner moderate_inlier_ratio ({}) must not exceed aligned_inlier_ratio ({})",
            self.moderate_inlier_ratio,
            self.aligned_inlier_ratio
        );
        ensure!(
            self.blend_window > 0.0 && self.blend_window <= 1.0,
            "planner blend_window must be in (0, 1], got {}",
            self.blend_window
        );
        Ok(())
    }

    /// Panicking variant of [`Self::check`].
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }
}

// =============================================================================
// Bake configuration
// =============================================================================

/// How the mesh baker derives each triangle's affine pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffineFit {
    /// Translation from the triangle centroid to the nearest control point.
    #[default]
    Translation,
    /// Exact affine from the triangle's three vertex correspondences.
    ThreePoint,
}

/// Mesh baker settings. The triangle budget comes from the plan stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshBakeConfig {
    /// Append perimeter points so the triangulation reaches the image edges.
    pub add_border_points: bool,
    /// Perimeter points per side, excluding corners.
    pub border_points_per_side: usize,
    pub affine_fit: AffineFit,
}

impl Default for MeshBakeConfig {
    fn default() -> Self {
        Self {
            add_border_points: true,
            border_points_per_side: 16,
            affine_fit: AffineFit::default(),
        }
    }
}

/// Thin-plate spline baker settings. Regularization comes from the plan stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpsBakeConfig {
    /// Side length of the lazily materialized displacement grid.
    pub map_resolution: usize,
}

impl Default for TpsBakeConfig {
    fn default() -> Self {
        Self {
            map_resolution: 256,
        }
    }
}

/// Flow baker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowBakeConfig {
    /// Long-edge resolution the flow is computed at.
    pub target_res: u32,
    /// Apply Laplacian smoothing to the flow field.
    pub smoothing: bool,
    pub smoothing_iterations: usize,
    /// Blend toward the 4-neighbor mean per iteration.
    pub smoothing_blend: f32,
    /// Window radius handed to the optical-flow solver.
    pub window_radius: usize,
}

impl Default for FlowBakeConfig {
    fn default() -> Self {
        Self {
            target_res: 128,
            smoothing: true,
            smoothing_iterations: 3,
            smoothing_blend: 0.5,
            window_radius: 3,
        }
    }
}

impl FlowBakeConfig {
    pub fn check(&self) -> Result<(), ConfigError> {
        ensure!(self.target_res > 0, "flow target_res must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.smoothing_blend),
            "flow smoothing_blend must be in [0, 1], got {}",
            self.smoothing_blend
        );
        ensure!(self.window_radius > 0, "flow window_radius must be positive");
        Ok(())
    }

    /// Panicking variant of [`Self::check`].
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }
}

// =============================================================================
// Session configuration
// =============================================================================

/// Where bake jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// On the calling thread, inside `tick`.
    Inline,
    /// On the rayon pool; results are picked up on a later tick.
    #[default]
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dispatch: Dispatch,
    /// Number of image pairs kept in the bake cache.
    pub cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dispatch: Dispatch::default(),
            cache_capacity: 4,
        }
    }
}

// =============================================================================
// Top-level configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphConfig {
    pub analyzer: AnalyzerConfig,
    pub planner: PlannerConfig,
    pub mesh: MeshBakeConfig,
    pub tps: TpsBakeConfig,
    pub flow: FlowBakeConfig,
    pub session: SessionConfig,
}

impl MorphConfig {
    /// Parse a settings document and check it.
    pub fn from_text(text: &str, format: SerdeFormat) -> Result<Self, ConfigError> {
        let config: MorphConfig =
            common::serde_format::deserialize(text, format).map_err(ConfigError::Parse)?;
        config.check()?;
        Ok(config)
    }

    /// Render the effective settings, e.g. to log them or seed a settings file.
    pub fn to_text(&self, format: SerdeFormat) -> Result<String, ConfigError> {
        common::serde_format::serialize(self, format).map_err(ConfigError::Serialize)
    }

    /// Check every section, returning the first violation.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.analyzer.check()?;
        self.planner.check()?;
        self.flow.check()?;
        ensure!(
            self.tps.map_resolution >= 2,
            "tps map_resolution must be at least 2, got {}",
            self.tps.map_resolution
        );
        ensure!(
            self.session.cache_capacity > 0,
            "session cache_capacity must be positive"
        );
        Ok(())
    }

    /// Validate all sections, panicking on invalid values.
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }
}
