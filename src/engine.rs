// 🧮 Network Feature Engine - One snapshot in, one feature set out
//
// Bundles the per-snapshot algorithms (centrality, components, indirect
// control, kinship communities) into a single pure computation. Identical
// snapshot + identical config = identical output, which is what makes
// per-period work safe to fan out across threads.

use crate::centrality::{compute_centrality, weakly_connected_components, CentralityMetrics};
use crate::community::detect_communities;
use crate::config::PipelineConfig;
use crate::control::indirect_control_counts;
use crate::snapshot::Snapshot;
use crate::windows::Window;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw (unlagged) network measurements for one entity in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    pub centrality: CentralityMetrics,

    /// Weakly-connected-component id (per snapshot).
    pub wcc: u64,

    /// Entities reachable through ownership within the configured hop cap.
    pub control_reach: u64,

    /// Kinship community label (per snapshot; no cross-period identity).
    pub community: u64,
}

/// Everything the engine derived from one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFeatures {
    pub window: Window,
    pub features: BTreeMap<String, RawFeatures>,
}

pub struct NetworkFeatureEngine<'a> {
    config: &'a PipelineConfig,
}

impl<'a> NetworkFeatureEngine<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        NetworkFeatureEngine { config }
    }

    pub fn compute(&self, snapshot: &Snapshot) -> SnapshotFeatures {
        let centrality = compute_centrality(snapshot, self.config);
        let wcc = weakly_connected_components(snapshot);
        let control = indirect_control_counts(snapshot, self.config.control_depth_cap);
        let communities = detect_communities(snapshot, self.config);

        let features = snapshot
            .nodes
            .keys()
            .map(|id| {
                (
                    id.clone(),
                    RawFeatures {
                        centrality: centrality[id],
                        wcc: wcc[id],
                        control_reach: control[id],
                        community: communities[id],
                    },
                )
            })
            .collect();

        SnapshotFeatures {
            window: snapshot.window.clone(),
            features,
        }
    }
}
