use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::cache::BakedPair;
use super::{ImagePair, PairKey};
use crate::analyzer::{ImageAnalyzer, SimilarityReport};
use crate::bake::flow::{FlowBakeOptions, FlowBaker};
use crate::bake::mesh::{MeshBakeOptions, MeshBaker};
use crate::bake::tps::{TpsBakeOptions, TpsBaker};
use crate::config::MorphConfig;
use crate::error::BakeError;
use crate::planner::{MorphMode, MorphPlanner, StageParams};
use crate::vision::{Triangulator, VisionPrimitives};

/// Cooperative cancellation flag shared between a session and its jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), BakeError> {
        if self.is_cancelled() {
            Err(BakeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Analyzer, planner and bakers shared by every job of a session.
pub(crate) struct Pipeline {
    pub analyzer: ImageAnalyzer,
    pub planner: MorphPlanner,
    pub mesh: MeshBaker,
    pub tps: TpsBaker,
    pub flow: FlowBaker,
    flow_options: FlowBakeOptions,
}

impl Pipeline {
    pub fn new(
        config: &MorphConfig,
        vision: Arc<dyn VisionPrimitives>,
        triangulator: Arc<dyn Triangulator>,
    ) -> Self {
        Self {
            analyzer: ImageAnalyzer::new(config.analyzer.clone(), vision.clone()),
            planner: MorphPlanner::new(config.planner.clone()),
            mesh: MeshBaker::new(config.mesh.clone(), triangulator),
            tps: TpsBaker::new(config.tps.clone()),
            flow_options: FlowBakeOptions::from(&config.flow),
            flow: FlowBaker::new(config.flow.clone(), vision),
        }
    }

    /// Crossfade-only result for a pair whose job failed outright.
    pub fn fallback_pair(&self) -> BakedPair {
        let report = SimilarityReport::neutral(self.analyzer.config().heatmap_size);
        let plan = self.planner.plan(&report);
        BakedPair {
            report,
            plan,
            mesh: None,
            tps: None,
            flow: None,
        }
    }
}

/// Result of a job, tagged so the session can recognize stale arrivals.
#[derive(Debug)]
pub(crate) struct JobOutcome {
    pub id: u64,
    pub key: PairKey,
    pub result: Result<BakedPair, BakeError>,
}

/// Analyze, plan and bake one image pair.
pub(crate) struct BakeJob {
    pub id: u64,
    pub pair: ImagePair,
    pub token: CancelToken,
    pub pipeline: Arc<Pipeline>,
}

impl BakeJob {
    /// Run to completion. Panics inside the pipeline become
    /// [`BakeError::Panicked`].
    pub fn run(self) -> JobOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|payload| Err(BakeError::Panicked(panic_message(payload.as_ref()))));
        JobOutcome {
            id: self.id,
            key: self.pair.key,
            result,
        }
    }

    fn execute(&self) -> Result<BakedPair, BakeError> {
        let start = Instant::now();
        let pipeline = &self.pipeline;
        let (a, b) = (self.pair.a.as_ref(), self.pair.b.as_ref());

        self.token.check()?;
        let report = pipeline.analyzer.analyze(a, b);
        self.token.check()?;
        let plan = pipeline.planner.plan(&report);
        let (points_a, points_b) = report.control_points();

        let mut baked = BakedPair {
            report,
            plan,
            mesh: None,
            tps: None,
            flow: None,
        };

        if let Some(StageParams::Mesh(params)) = stage_params(&baked, MorphMode::Mesh) {
            self.token.check()?;
            let options = MeshBakeOptions {
                tri_count: params.tri_count,
                width: a.width(),
                height: a.height(),
            };
            baked.mesh = usable(
                MorphMode::Mesh,
                pipeline.mesh.bake(&points_a, &points_b, &options),
            )
            .map(Arc::new);
        }

        if let Some(StageParams::Tps(params)) = stage_params(&baked, MorphMode::Tps) {
            self.token.check()?;
            let options = TpsBakeOptions {
                lambda: params.lambda,
                width: a.width(),
                height: a.height(),
            };
            baked.tps = usable(
                MorphMode::Tps,
                pipeline.tps.bake(&points_a, &points_b, &options),
            )
            .map(Arc::new);
        }

        if stage_params(&baked, MorphMode::Flow).is_some() {
            self.token.check()?;
            baked.flow = usable(
                MorphMode::Flow,
                pipeline.flow.bake(a, b, &pipeline.flow_options),
            )
            .map(Arc::new);
        }

        self.token.check()?;
        tracing::debug!(
            key = ?self.pair.key,
            job = self.id,
            regime = ?baked.plan.regime,
            baked = ?baked.baked_modes(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "pair baked"
        );
        Ok(baked)
    }
}

fn stage_params(baked: &BakedPair, mode: MorphMode) -> Option<StageParams> {
    baked.plan.stage_of(mode).map(|stage| stage.params)
}

fn usable<T>(mode: MorphMode, result: Result<T, BakeError>) -> Option<T> {
    match result {
        Ok(data) => Some(data),
        Err(err) => {
            tracing::warn!(?mode, error = %err, "bake failed, stage falls back to crossfade");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
