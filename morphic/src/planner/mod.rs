//! Morph strategy planning.
//!
//! [`MorphPlanner::plan`] maps a [`SimilarityReport`] onto one of six
//! regimes, each with a fixed stage template. Stages partition the [0, 1]
//! progress range; [`MorphPlanner::active_stages`] resolves which stage (and
//! which following stage, during the trailing blend window) a progress value
//! falls into.


use serde::{Deserialize, Serialize};

use crate::analyzer::SimilarityReport;
use crate::config::PlannerConfig;

/// Warping strategy of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphMode {
    Mesh,
    Tps,
    Flow,
    Crossfade,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshParams {
    /// Requested triangle budget for the control mesh.
    pub tri_count: usize,
    /// Width of the soft edge blended between neighbouring triangles, as a
    /// fraction of triangle size.
    pub feather: f32,
    pub amplitude: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpsParams {
    /// Regularization added to the kernel diagonal; 0 interpolates exactly.
    pub lambda: f64,
    pub amplitude: f32,
    /// Oscillations of the displacement over the stage.
    pub frequency: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowStageParams {
    /// How far the renderer follows the flow field, scaled by confidence.
    pub trust: f32,
    pub amplitude: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StageParams {
    Mesh(MeshParams),
    Tps(TpsParams),
    Flow(FlowStageParams),
    Crossfade,
}

impl StageParams {
    pub fn mode(&self) -> MorphMode {
        match self {
            StageParams::Mesh(_) => MorphMode::Mesh,
            StageParams::Tps(_) => MorphMode::Tps,
            StageParams::Flow(_) => MorphMode::Flow,
            StageParams::Crossfade => MorphMode::Crossfade,
        }
    }
}

/// A time window of the morph with a single warping mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphStage {
    pub t_start: f64,
    pub t_end: f64,
    pub params: StageParams,
}

impl MorphStage {
    pub fn new(t_start: f64, t_end: f64, params: StageParams) -> Self {
        Self {
            t_start,
            t_end,
            params,
        }
    }

    pub fn crossfade(t_start: f64, t_end: f64) -> Self {
        Self::new(t_start, t_end, StageParams::Crossfade)
    }

    #[inline]
    pub fn mode(&self) -> MorphMode {
        self.params.mode()
    }

    #[inline]
    pub fn span(&self) -> f64 {
        self.t_end - self.t_start
    }

    #[inline]
    pub fn contains(&self, t: f64) -> bool {
        t >= self.t_start && t <= self.t_end
    }
}

/// Which decision-tree branch produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// High inlier ratio with good coverage.
    Aligned,
    /// Moderate inlier ratio with good coverage.
    ModeratelyAligned,
    /// Strong edge correlation, poor coverage.
    StrongEdges,
    /// Similar colors without geometric alignment.
    SimilarColor,
    /// Weak but present alignment.
    WeaklyAligned,
    /// Nothing to work with: crossfade only.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphPlan {
    pub stages: Vec<MorphStage>,
    /// Human-readable explanation, for logs only.
    pub reasoning: String,
    pub confidence: f64,
    pub regime: Regime,
}

impl MorphPlan {
    pub fn uses(&self, mode: MorphMode) -> bool {
        self.stages.iter().any(|s| s.mode() == mode)
    }

    /// First stage of the given mode.
    pub fn stage_of(&self, mode: MorphMode) -> Option<&MorphStage> {
        self.stages.iter().find(|s| s.mode() == mode)
    }

    pub fn modes(&self) -> Vec<MorphMode> {
        self.stages.iter().map(MorphStage::mode).collect()
    }
}

/// Stage(s) in effect at one progress value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveStages {
    pub current: MorphStage,
    /// Following stage while inside the trailing blend window.
    pub next: Option<MorphStage>,
    /// 0 at the start of the blend window, 1 at the end of `current`.
    pub blend_factor: f64,
}

// Stage templates. These are fixed design constants, independent of the
// report that selected them.
const MESH_TRI_COUNT: usize = 200;
const MESH_FEATHER: f32 = 0.15;
const MESH_HEAVY_TRI_COUNT: usize = 120;
const MESH_HEAVY_FEATHER: f32 = 0.35;
const MESH_AMPLITUDE: f32 = 1.0;
const TPS_ALIGNED_LAMBDA: f64 = 0.01;
const TPS_COLOR_LAMBDA: f64 = 0.1;
const TPS_AMPLITUDE: f32 = 1.0;
const TPS_COLOR_AMPLITUDE: f32 = 0.6;
const TPS_FREQUENCY: f32 = 1.0;
const FLOW_MODERATE_TRUST: f32 = 0.8;
const FLOW_WEAK_TRUST: f32 = 0.5;
const FLOW_AMPLITUDE: f32 = 1.0;
const FLOW_WEAK_AMPLITUDE: f32 = 0.7;

/// Chooses and normalizes morph plans.
#[derive(Debug, Clone, Default)]
pub struct MorphPlanner {
    config: PlannerConfig,
}

impl MorphPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        config.validate();
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Pick a regime for `report` and return its validated stage template.
    pub fn plan(&self, report: &SimilarityReport) -> MorphPlan {
        let c = &self.config;
        let ratio = report.inlier_ratio;
        let inliers = report.inlier_count();
        let coverage = report.coverage_score;
        let good_coverage = coverage > c.good_coverage;

        let plan = if ratio > c.aligned_inlier_ratio
            && inliers >= c.aligned_min_inliers
            && good_coverage
        {
            MorphPlan {
                stages: vec![
                    MorphStage::new(0.0, 0.4, mesh(MESH_TRI_COUNT, MESH_FEATHER)),
                    MorphStage::new(0.4, 0.7, tps(TPS_ALIGNED_LAMBDA, TPS_AMPLITUDE)),
                    MorphStage::crossfade(0.7, 1.0),
                ],
                reasoning: format!(
                    "inlier ratio {ratio:.2} with {inliers} inliers and coverage {coverage:.2}: \
                     aligned geometry, mesh then thin-plate spline"
                ),
                confidence: 0.9,
                regime: Regime::Aligned,
            }
        } else if ratio > c.moderate_inlier_ratio
            && ratio <= c.aligned_inlier_ratio
            && good_coverage
        {
            MorphPlan {
                stages: vec![
                    MorphStage::new(0.0, 0.6, flow(FLOW_MODERATE_TRUST, FLOW_AMPLITUDE)),
                    MorphStage::crossfade(0.6, 1.0),
                ],
                reasoning: format!(
                    "inlier ratio {ratio:.2} with coverage {coverage:.2}: \
                     moderate alignment, dense flow"
                ),
                confidence: 0.75,
                regime: Regime::ModeratelyAligned,
            }
        } else if report.edge_overlap > c.strong_edge_overlap && !good_coverage {
            MorphPlan {
                stages: vec![
                    MorphStage::new(0.0, 0.5, mesh(MESH_HEAVY_TRI_COUNT, MESH_HEAVY_FEATHER)),
                    MorphStage::crossfade(0.5, 1.0),
                ],
                reasoning: format!(
                    "edge overlap {:.2} with coverage {coverage:.2}: \
                     strong edges, feathered mesh",
                    report.edge_overlap
                ),
                confidence: 0.65,
                regime: Regime::StrongEdges,
            }
        } else if report.histogram_distance < c.similar_histogram_distance {
            MorphPlan {
                stages: vec![
                    MorphStage::new(0.0, 0.7, tps(TPS_COLOR_LAMBDA, TPS_COLOR_AMPLITUDE)),
                    MorphStage::crossfade(0.7, 1.0),
                ],
                reasoning: format!(
                    "histogram distance {:.2}: similar colors, smooth thin-plate spline",
                    report.histogram_distance
                ),
                confidence: 0.7,
                regime: Regime::SimilarColor,
            }
        } else if ratio > c.weak_inlier_ratio && inliers >= c.weak_min_inliers {
            MorphPlan {
                stages: vec![MorphStage::new(
                    0.0,
                    1.0,
                    flow(FLOW_WEAK_TRUST, FLOW_WEAK_AMPLITUDE),
                )],
                reasoning: format!(
                    "inlier ratio {ratio:.2} with {inliers} inliers: weak alignment, dense flow"
                ),
                confidence: 0.5,
                regime: Regime::WeaklyAligned,
            }
        } else {
            MorphPlan {
                stages: vec![MorphStage::crossfade(0.0, 1.0)],
                reasoning: "insufficient signal: crossfade".to_string(),
                confidence: 0.9,
                regime: Regime::Fallback,
            }
        };

        tracing::debug!(
            regime = ?plan.regime,
            confidence = plan.confidence,
            modes = ?plan.modes(),
            reasoning = %plan.reasoning,
            "morph plan chosen"
        );
        self.validate_plan(plan)
    }

    /// Sort stages and make them tile [0, 1] without gaps or overlaps.
    ///
    /// Each stage ends where the next one starts; the first starts at 0 and
    /// the last ends at 1. An empty plan becomes a single crossfade.
    pub fn validate_plan(&self, mut plan: MorphPlan) -> MorphPlan {
        if plan.stages.is_empty() {
            plan.stages.push(MorphStage::crossfade(0.0, 1.0));
            return plan;
        }

        for stage in &mut plan.stages {
            stage.t_start = clamp_unit(stage.t_start);
        }
        plan.stages.sort_by(|a, b| a.t_start.total_cmp(&b.t_start));

        plan.stages[0].t_start = 0.0;
        for i in 0..plan.stages.len() - 1 {
            plan.stages[i].t_end = plan.stages[i + 1].t_start;
        }
        if let Some(last) = plan.stages.last_mut() {
            last.t_end = 1.0;
        }
        plan
    }

    /// Stage in effect at progress `t`, clamped to [0, 1].
    pub fn active_stages(&self, plan: &MorphPlan, t: f64) -> ActiveStages {
        let stages = &plan.stages;
        let Some(last) = stages.last() else {
            return ActiveStages {
                current: MorphStage::crossfade(0.0, 1.0),
                next: None,
                blend_factor: 0.0,
            };
        };

        let t = clamp_unit(t);
        let index = if t <= 0.0 {
            0
        } else if t >= 1.0 {
            stages.len() - 1
        } else {
            stages
                .iter()
                .position(|s| s.contains(t))
                .unwrap_or(stages.len() - 1)
        };
        let current = stages.get(index).copied().unwrap_or(*last);

        let window = current.span() * self.config.blend_window;
        let window_start = current.t_end - window;
        match stages.get(index + 1) {
            Some(&next) if window > 0.0 && t >= window_start => ActiveStages {
                current,
                next: Some(next),
                blend_factor: ((t - window_start) / window).clamp(0.0, 1.0),
            },
            _ => ActiveStages {
                current,
                next: None,
                blend_factor: 0.0,
            },
        }
    }
}

fn clamp_unit(t: f64) -> f64 {
    if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) }
}

fn mesh(tri_count: usize, feather: f32) -> StageParams {
    StageParams::Mesh(MeshParams {
        tri_count,
        feather,
        amplitude: MESH_AMPLITUDE,
    })
}

fn tps(lambda: f64, amplitude: f32) -> StageParams {
    StageParams::Tps(TpsParams {
        lambda,
        amplitude,
        frequency: TPS_FREQUENCY,
    })
}

fn flow(trust: f32, amplitude: f32) -> StageParams {
    StageParams::Flow(FlowStageParams { trust, amplitude })
}
