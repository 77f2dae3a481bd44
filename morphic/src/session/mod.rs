//! Per-display-session orchestration of analysis, planning and baking.
//!
//! A [`MorphSession`] is owned by the render loop. Each [`MorphSession::tick`]
//! names the image pair on screen and the morph progress, and gets back a
//! [`FrameDirective`] telling the renderer which stage(s) to draw and which
//! baked data to sample. The first tick of a new pair starts a bake job; until
//! its result is cached the pair renders as a crossfade.
//!
//! With [`Dispatch::Background`] jobs run on the rayon pool and report back
//! over a channel drained at the start of every tick, so a tick never waits on
//! analysis or baking. At most one job per pair is in flight; when the pair
//! changes, jobs for other pairs are cancelled and anything they still deliver
//! is discarded.

mod cache;
mod job;


use std::sync::Arc;

use hashbrown::HashMap;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::bake::flow::FlowData;
use crate::bake::mesh::MeshData;
use crate::bake::tps::TpsData;
use crate::config::{Dispatch, MorphConfig};
use crate::error::BakeError;
use crate::planner::{MorphMode, MorphPlan, MorphStage};
use crate::vision::{Triangulator, VisionPrimitives};

pub use cache::{BakedPair, PairCache};
pub use job::CancelToken;

use job::{BakeJob, JobOutcome, Pipeline};

/// Caller-assigned identity of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub u64);

/// Ordered identity of an image pair: morphing A into B is a different pair
/// from B into A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub a: ImageId,
    pub b: ImageId,
}

/// The two images of a transition together with their identity.
#[derive(Debug, Clone)]
pub struct ImagePair {
    pub key: PairKey,
    pub a: Arc<RgbaImage>,
    pub b: Arc<RgbaImage>,
}

impl ImagePair {
    pub fn new(id_a: ImageId, a: Arc<RgbaImage>, id_b: ImageId, b: Arc<RgbaImage>) -> Self {
        Self {
            key: PairKey { a: id_a, b: id_b },
            a,
            b,
        }
    }
}

/// Baked data a stage samples.
#[derive(Debug, Clone)]
pub enum StageData {
    Mesh(Arc<MeshData>),
    Tps(Arc<TpsData>),
    Flow(Arc<FlowData>),
    Crossfade,
}

impl StageData {
    /// The mode the renderer actually draws.
    pub fn mode(&self) -> MorphMode {
        match self {
            StageData::Mesh(_) => MorphMode::Mesh,
            StageData::Tps(_) => MorphMode::Tps,
            StageData::Flow(_) => MorphMode::Flow,
            StageData::Crossfade => MorphMode::Crossfade,
        }
    }

    pub fn is_crossfade(&self) -> bool {
        matches!(self, StageData::Crossfade)
    }
}

/// A planned stage and the data to draw it with.
#[derive(Debug, Clone)]
pub struct StageDirective {
    pub stage: MorphStage,
    pub data: StageData,
}

/// What to draw for one frame.
#[derive(Debug, Clone)]
pub struct FrameDirective {
    pub current: StageDirective,
    /// Following stage inside the trailing blend window.
    pub next: Option<StageDirective>,
    pub blend_factor: f64,
}

impl FrameDirective {
    /// Full-range crossfade, used while a pair has no baked result.
    pub fn crossfade() -> Self {
        Self {
            current: StageDirective {
                stage: MorphStage::crossfade(0.0, 1.0),
                data: StageData::Crossfade,
            },
            next: None,
            blend_factor: 0.0,
        }
    }

    pub fn is_crossfade(&self) -> bool {
        self.current.data.is_crossfade() && self.next.is_none()
    }
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    token: CancelToken,
}

pub struct MorphSession {
    dispatch: Dispatch,
    pipeline: Arc<Pipeline>,
    cache: PairCache,
    current: Option<PairKey>,
    in_flight: HashMap<PairKey, InFlight>,
    next_job_id: u64,
    tx: UnboundedSender<JobOutcome>,
    rx: UnboundedReceiver<JobOutcome>,
}

impl MorphSession {
    /// # Panics
    /// Panics if `config` fails [`MorphConfig::check`].
    pub fn new(
        config: MorphConfig,
        vision: Arc<dyn VisionPrimitives>,
        triangulator: Arc<dyn Triangulator>,
    ) -> Self {
        config.validate();
        let (tx, rx) = unbounded_channel::<JobOutcome>();
        Self {
            dispatch: config.session.dispatch,
            pipeline: Arc::new(Pipeline::new(&config, vision, triangulator)),
            cache: PairCache::new(config.session.cache_capacity),
            current: None,
            in_flight: HashMap::new(),
            next_job_id: 0,
            tx,
            rx,
        }
    }

    /// Advance one frame: collect finished bakes, react to a pair change and
    /// resolve the stages at `progress`.
    pub fn tick(&mut self, pair: &ImagePair, progress: f64) -> FrameDirective {
        self.poll();

        if self.current != Some(pair.key) {
            self.switch_pair(pair.key);
        }

        if !self.cache.contains(&pair.key) {
            self.request_bake(pair);
        }

        match self.cache.get(&pair.key) {
            Some(baked) => self.directive(&baked, progress),
            None => FrameDirective::crossfade(),
        }
    }

    /// Collect finished background jobs. Returns how many were cached.
    pub fn poll(&mut self) -> usize {
        let mut cached = 0;
        loop {
            match self.rx.try_recv() {
                Ok(outcome) => {
                    if self.accept(outcome) {
                        cached += 1;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        cached
    }

    /// Drop every cached pair and cancel in-flight work.
    pub fn end(&mut self) {
        self.cancel_all();
        self.cache.clear();
        self.current = None;
        while self.rx.try_recv().is_ok() {}
        tracing::debug!("morph session ended");
    }

    pub fn current_pair(&self) -> Option<PairKey> {
        self.current
    }

    pub fn cached(&self, key: &PairKey) -> Option<Arc<BakedPair>> {
        self.cache.get(key)
    }

    pub fn plan(&self, key: &PairKey) -> Option<MorphPlan> {
        self.cache.get(key).map(|baked| baked.plan.clone())
    }

    pub fn is_baking(&self, key: &PairKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn cache(&self) -> &PairCache {
        &self.cache
    }

    fn switch_pair(&mut self, key: PairKey) {
        self.in_flight.retain(|pending, job| {
            if *pending == key {
                return true;
            }
            job.token.cancel();
            tracing::debug!(key = ?pending, job = job.id, "pair changed, cancelling bake");
            false
        });
        self.current = Some(key);
    }

    fn request_bake(&mut self, pair: &ImagePair) {
        if self.in_flight.contains_key(&pair.key) {
            tracing::trace!(key = ?pair.key, "bake already in flight, request coalesced");
            return;
        }

        let id = self.next_job_id;
        self.next_job_id += 1;
        let token = CancelToken::new();
        self.in_flight.insert(
            pair.key,
            InFlight {
                id,
                token: token.clone(),
            },
        );
        let job = BakeJob {
            id,
            pair: pair.clone(),
            token,
            pipeline: self.pipeline.clone(),
        };
        tracing::debug!(key = ?pair.key, job = id, dispatch = ?self.dispatch, "bake requested");

        match self.dispatch {
            Dispatch::Inline => {
                let outcome = job.run();
                self.accept(outcome);
            }
            Dispatch::Background => {
                let tx = self.tx.clone();
                rayon::spawn(move || {
                    // The session may be gone; its result is moot then.
                    let _ = tx.send(job.run());
                });
            }
        }
    }

    /// Cache a job result if it belongs to the job currently in flight for
    /// the current pair.
    fn accept(&mut self, outcome: JobOutcome) -> bool {
        let JobOutcome { id, key, result } = outcome;
        let expected = self.in_flight.get(&key).is_some_and(|job| job.id == id);
        if !expected || self.current != Some(key) {
            tracing::debug!(?key, job = id, "stale bake result discarded");
            return false;
        }
        self.in_flight.remove(&key);

        let baked = match result {
            Ok(baked) => baked,
            Err(BakeError::Cancelled) => {
                tracing::debug!(?key, job = id, "bake cancelled");
                return false;
            }
            Err(err) => {
                tracing::warn!(
                    ?key,
                    job = id,
                    error = %err,
                    "bake job failed, pair falls back to crossfade"
                );
                self.pipeline.fallback_pair()
            }
        };
        self.cache.insert(key, Arc::new(baked))
    }

    fn directive(&self, baked: &BakedPair, progress: f64) -> FrameDirective {
        let active = self.pipeline.planner.active_stages(&baked.plan, progress);
        FrameDirective {
            current: baked.directive(active.current),
            next: active.next.map(|stage| baked.directive(stage)),
            blend_factor: active.blend_factor,
        }
    }

    fn cancel_all(&mut self) {
        for (_, job) in self.in_flight.drain() {
            job.token.cancel();
        }
    }
}

impl Drop for MorphSession {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
