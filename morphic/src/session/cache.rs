use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;

use super::{PairKey, StageData, StageDirective};
use crate::analyzer::SimilarityReport;
use crate::bake::flow::FlowData;
use crate::bake::mesh::MeshData;
use crate::bake::tps::TpsData;
use crate::planner::{MorphMode, MorphPlan, MorphStage};

/// Everything analyzed and baked for one image pair.
///
/// A mode the plan does not use, or whose bake failed, has no data and is
/// rendered as a crossfade.
#[derive(Debug)]
pub struct BakedPair {
    pub report: SimilarityReport,
    pub plan: MorphPlan,
    pub mesh: Option<Arc<MeshData>>,
    pub tps: Option<Arc<TpsData>>,
    pub flow: Option<Arc<FlowData>>,
}

impl BakedPair {
    /// Baked data for `mode`, or [`StageData::Crossfade`] when there is none.
    pub fn data_for(&self, mode: MorphMode) -> StageData {
        let data = match mode {
            MorphMode::Mesh => self.mesh.clone().map(StageData::Mesh),
            MorphMode::Tps => self.tps.clone().map(StageData::Tps),
            MorphMode::Flow => self.flow.clone().map(StageData::Flow),
            MorphMode::Crossfade => None,
        };
        data.unwrap_or(StageData::Crossfade)
    }

    pub fn directive(&self, stage: MorphStage) -> StageDirective {
        StageDirective {
            stage,
            data: self.data_for(stage.mode()),
        }
    }

    /// Modes that ended up with baked data.
    pub fn baked_modes(&self) -> Vec<MorphMode> {
        let mut modes = Vec::new();
        if self.mesh.is_some() {
            modes.push(MorphMode::Mesh);
        }
        if self.tps.is_some() {
            modes.push(MorphMode::Tps);
        }
        if self.flow.is_some() {
            modes.push(MorphMode::Flow);
        }
        modes
    }
}

/// Bounded, write-once cache of baked pairs, oldest evicted first.
#[derive(Debug)]
pub struct PairCache {
    capacity: usize,
    entries: HashMap<PairKey, Arc<BakedPair>>,
    order: VecDeque<PairKey>,
}

impl PairCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pair cache capacity must be positive");
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &PairKey) -> Option<Arc<BakedPair>> {
        self.entries.get(key).cloned()
    }

    /// Store `baked` under `key`. Existing entries are never replaced;
    /// returns false if `key` was already present.
    pub fn insert(&mut self, key: PairKey, baked: Arc<BakedPair>) -> bool {
        if self.entries.contains_key(&key) {
            tracing::debug!(?key, "pair already cached, keeping first result");
            return false;
        }
        self.entries.insert(key, baked);
        self.order.push_back(key);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                tracing::debug!(key = ?oldest, "evicted baked pair");
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
