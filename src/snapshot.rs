// 📸 Snapshot Projector - Window-scoped immutable graph views
//
// A snapshot is the induced subgraph of everything valid in one window, plus
// one synthetic self-loop per entity that is alive but unconnected. The
// self-loops keep the vertex set stable across algorithms: every node alive
// in the window is guaranteed to appear, edges or not.
//
// Snapshots are values. They are recomputed per period from a read-only
// store and never written back.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::graph::{NodeRecord, RelationType};
use crate::store::{GraphStore, ProjectionQuery};
use crate::windows::Window;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

// ============================================================================
// SNAPSHOT EDGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotEdgeKind {
    /// A relationship read from the store. `imputed` survives projection so
    /// downstream audits can distinguish inferred from observed ties.
    Relation {
        relation_type: RelationType,
        imputed: bool,
    },

    /// Synthetic self-reference injected for an entity with no active
    /// relationship in the window.
    IsolateLoop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub source_id: String,
    pub target_id: String,
    pub weight: f64,
    pub kind: SnapshotEdgeKind,
}

impl SnapshotEdge {
    pub fn is_isolate_loop(&self) -> bool {
        matches!(self.kind, SnapshotEdgeKind::IsolateLoop)
    }

    pub fn relation_type(&self) -> Option<RelationType> {
        match self.kind {
            SnapshotEdgeKind::Relation { relation_type, .. } => Some(relation_type),
            SnapshotEdgeKind::IsolateLoop => None,
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Immutable view of the graph during one window.
///
/// Nodes are keyed by id in a BTreeMap: iteration order is the canonical
/// node ordering every downstream algorithm relies on for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub window: Window,
    pub nodes: BTreeMap<String, NodeRecord>,
    pub edges: Vec<SnapshotEdge>,
}

impl Snapshot {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Observed relationships only (isolate loops excluded).
    pub fn relation_count(&self) -> usize {
        self.edges.iter().filter(|e| !e.is_isolate_loop()).count()
    }

    pub fn isolate_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_isolate_loop()).count()
    }

    /// No entity was alive in the window. The period is skipped, not failed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of entities whose only edge is their own isolate loop.
    pub fn isolate_ids(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().filter(|e| e.is_isolate_loop()).map(|e| e.source_id.as_str())
    }
}

// ============================================================================
// PROJECTOR
// ============================================================================

pub struct SnapshotProjector<'a> {
    store: &'a dyn GraphStore,
    config: &'a PipelineConfig,
}

impl<'a> SnapshotProjector<'a> {
    pub fn new(store: &'a dyn GraphStore, config: &'a PipelineConfig) -> Self {
        SnapshotProjector { store, config }
    }

    /// Materialize the snapshot for one window.
    ///
    /// Integrity is checked here, after the store query: an inverted validity
    /// interval can slip through the interval-intersection predicate, so every
    /// returned record is re-validated and the first violation aborts the
    /// snapshot with the offending id.
    pub fn project(&self, window: &Window) -> Result<Snapshot> {
        let query = ProjectionQuery {
            node_types: self.config.node_types.clone(),
            relation_types: self.config.rel_types.clone(),
            window_start: window.start_ms,
            window_end: window.end_ms,
            include_imputed: self.config.include_imputed,
            read_concurrency: self.config.read_concurrency,
        };
        let result = self.store.project(&query)?;

        let mut nodes = BTreeMap::new();
        for node in result.nodes {
            node.check_integrity()?;
            nodes.insert(node.id.clone(), node);
        }

        // Keep only edges whose endpoints are both alive in the window; the
        // snapshot's node set must be exactly "entities alive in the window",
        // never grown by dangling references.
        let mut edges = Vec::new();
        let mut connected: HashSet<String> = HashSet::new();
        let mut dropped_dangling = 0usize;
        for edge in result.edges {
            edge.check_integrity()?;
            if !nodes.contains_key(&edge.source_id) || !nodes.contains_key(&edge.target_id) {
                dropped_dangling += 1;
                continue;
            }
            connected.insert(edge.source_id.clone());
            connected.insert(edge.target_id.clone());
            edges.push(SnapshotEdge {
                source_id: edge.source_id,
                target_id: edge.target_id,
                weight: edge.weight,
                kind: SnapshotEdgeKind::Relation {
                    relation_type: edge.relation_type,
                    imputed: edge.imputed,
                },
            });
        }

        // Isolate injection: one self-loop per unconnected alive entity.
        for id in nodes.keys() {
            if !connected.contains(id) {
                edges.push(SnapshotEdge {
                    source_id: id.clone(),
                    target_id: id.clone(),
                    weight: 0.0,
                    kind: SnapshotEdgeKind::IsolateLoop,
                });
            }
        }

        if dropped_dangling > 0 {
            debug!(
                window = %window.label,
                dropped = dropped_dangling,
                "dropped edges with endpoints outside the window's alive set"
            );
        }
        debug!(
            window = %window.label,
            nodes = nodes.len(),
            relations = edges.iter().filter(|e| !e.is_isolate_loop()).count(),
            isolates = edges.iter().filter(|e| e.is_isolate_loop()).count(),
            "projected snapshot"
        );

        Ok(Snapshot {
            window: window.clone(),
            nodes,
            edges,
        })
    }
}
