// 📊 Centrality - Weighted directed measures over the control view
//
// The directed view is OWNERSHIP ∪ MANAGEMENT, weighted by edge weight.
// Degrees are weighted sums; PageRank is the damped power iteration with the
// per-node (1 - d) base term. Everything iterates nodes in sorted-id order,
// so identical snapshot + identical config = bit-identical output.
//
// Isolated entities (only their injected self-loop) score zero on every
// measure.

use crate::config::PipelineConfig;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CentralityMetrics {
    /// Weighted sum of outgoing control edges.
    pub out_degree: f64,

    /// Weighted sum of incoming control edges.
    pub in_degree: f64,

    /// out_degree + in_degree.
    pub degree: f64,

    pub page_rank: f64,
}

/// Sorted node ids with a reverse index. The shared canonical ordering for
/// every per-snapshot algorithm.
pub(crate) fn node_index(snapshot: &Snapshot) -> (Vec<&str>, BTreeMap<&str, usize>) {
    let ids: Vec<&str> = snapshot.nodes.keys().map(|s| s.as_str()).collect();
    let index: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    (ids, index)
}

/// Directed control edges as (source index, target index, weight).
fn directed_edges(snapshot: &Snapshot, index: &BTreeMap<&str, usize>) -> Vec<(usize, usize, f64)> {
    snapshot
        .edges
        .iter()
        .filter(|e| e.relation_type().map(|t| t.is_directed()).unwrap_or(false))
        .map(|e| (index[e.source_id.as_str()], index[e.target_id.as_str()], e.weight))
        .collect()
}

/// Compute all centrality measures for one snapshot.
pub fn compute_centrality(
    snapshot: &Snapshot,
    config: &PipelineConfig,
) -> BTreeMap<String, CentralityMetrics> {
    let (ids, index) = node_index(snapshot);
    let n = ids.len();
    let edges = directed_edges(snapshot, &index);

    let mut out_degree = vec![0.0f64; n];
    let mut in_degree = vec![0.0f64; n];
    for &(src, dst, weight) in &edges {
        out_degree[src] += weight;
        in_degree[dst] += weight;
    }

    let page_rank = page_rank_scores(n, &edges, &out_degree, config);

    let mut metrics: BTreeMap<String, CentralityMetrics> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            (
                id.to_string(),
                CentralityMetrics {
                    out_degree: out_degree[i],
                    in_degree: in_degree[i],
                    degree: out_degree[i] + in_degree[i],
                    page_rank: page_rank[i],
                },
            )
        })
        .collect();

    // Entities with no active relationship score zero everywhere, including
    // the PageRank base term they would otherwise keep.
    for id in snapshot.isolate_ids() {
        if let Some(m) = metrics.get_mut(id) {
            *m = CentralityMetrics::default();
        }
    }

    metrics
}

/// Damped power iteration: score[v] = (1 - d) + d * Σ score[u] * w(u,v) / out(u).
/// Runs until the max per-node delta drops below tolerance or the iteration
/// cap is hit. Nodes without outgoing weight contribute nothing.
fn page_rank_scores(
    n: usize,
    edges: &[(usize, usize, f64)],
    out_degree: &[f64],
    config: &PipelineConfig,
) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }

    let damping = config.page_rank_damping;
    let mut scores = vec![1.0f64; n];
    let mut next = vec![0.0f64; n];

    for _ in 0..config.page_rank_max_iterations {
        for v in next.iter_mut() {
            *v = 1.0 - damping;
        }
        for &(src, dst, weight) in edges {
            if out_degree[src] > 0.0 {
                next[dst] += damping * scores[src] * weight / out_degree[src];
            }
        }

        let max_delta = scores
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, f64::max);

        std::mem::swap(&mut scores, &mut next);

        if max_delta < config.page_rank_tolerance {
            break;
        }
    }

    scores
}

/// Weakly connected components over every observed relationship, direction
/// ignored. Component ids are dense and assigned in order of each
/// component's smallest node id.
pub fn weakly_connected_components(snapshot: &Snapshot) -> BTreeMap<String, u64> {
    let (ids, index) = node_index(snapshot);
    let n = ids.len();

    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for edge in snapshot.edges.iter().filter(|e| !e.is_isolate_loop()) {
        let a = find(&mut parent, index[edge.source_id.as_str()]);
        let b = find(&mut parent, index[edge.target_id.as_str()]);
        if a != b {
            // Smaller root wins so the representative is the smallest member.
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            parent[hi] = lo;
        }
    }

    let mut component_ids: BTreeMap<usize, u64> = BTreeMap::new();
    let mut result = BTreeMap::new();
    for (i, id) in ids.iter().enumerate() {
        let root = find(&mut parent, i);
        let next_id = component_ids.len() as u64;
        let cid = *component_ids.entry(root).or_insert(next_id);
        result.insert(id.to_string(), cid);
    }
    result
}
