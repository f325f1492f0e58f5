// 👪 Community Detection - Modularity communities over the kinship view
//
// Greedy Louvain-style optimization on the undirected FAMILY subgraph:
// repeated local moves in a seed-derived processing order, then community
// aggregation, until modularity stops improving. The undirected view makes
// orientation irrelevant: (a,b) and (b,a) produce the same partition.
//
// Labels are dense integers assigned in order of each community's smallest
// member id, so identical snapshot + identical seed = identical labels.
// Labels carry NO identity across snapshots: community 3 in Q1 and
// community 3 in Q2 are unrelated partitions.
//
// Entities without kinship ties (including all isolates) get singleton
// labels appended after the detected communities.

use crate::config::PipelineConfig;
use crate::graph::RelationType;
use crate::snapshot::Snapshot;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Undirected weighted multigraph in index space, rebuilt per aggregation
/// level. `adj[i]` holds (neighbor, weight) pairs; self-ties accumulate in
/// `self_weight`.
struct WorkGraph {
    adj: Vec<Vec<(usize, f64)>>,
    self_weight: Vec<f64>,
    /// Sum of all edge weights, each undirected edge counted once.
    total_weight: f64,
}

impl WorkGraph {
    fn len(&self) -> usize {
        self.adj.len()
    }

    /// Weighted degree: adjacent weights plus twice the self weight.
    fn weighted_degree(&self, i: usize) -> f64 {
        self.adj[i].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self.self_weight[i]
    }
}

/// Assign a community label to every node of the snapshot.
pub fn detect_communities(snapshot: &Snapshot, config: &PipelineConfig) -> BTreeMap<String, u64> {
    // Family subgraph in canonical (sorted-id) index space.
    let family_ids: Vec<&str> = {
        let mut ids: Vec<&str> = snapshot
            .edges
            .iter()
            .filter(|e| e.relation_type() == Some(RelationType::Family))
            .flat_map(|e| [e.source_id.as_str(), e.target_id.as_str()])
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let family_index: BTreeMap<&str, usize> =
        family_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); family_ids.len()];
    let mut self_weight = vec![0.0f64; family_ids.len()];
    let mut total_weight = 0.0f64;
    for edge in &snapshot.edges {
        if edge.relation_type() != Some(RelationType::Family) {
            continue;
        }
        let a = family_index[edge.source_id.as_str()];
        let b = family_index[edge.target_id.as_str()];
        total_weight += edge.weight;
        if a == b {
            self_weight[a] += edge.weight;
        } else {
            *adj[a].entry(b).or_insert(0.0) += edge.weight;
            *adj[b].entry(a).or_insert(0.0) += edge.weight;
        }
    }

    let graph = WorkGraph {
        adj: adj.into_iter().map(|m| m.into_iter().collect()).collect(),
        self_weight,
        total_weight,
    };

    let memberships = if graph.total_weight > 0.0 {
        louvain(graph, config)
    } else {
        (0..family_ids.len()).collect()
    };

    // Dense final labels ordered by smallest member id, family nodes first.
    let mut label_of_community: BTreeMap<usize, u64> = BTreeMap::new();
    let mut labels: BTreeMap<String, u64> = BTreeMap::new();
    for (i, id) in family_ids.iter().enumerate() {
        let next = label_of_community.len() as u64;
        let label = *label_of_community.entry(memberships[i]).or_insert(next);
        labels.insert(id.to_string(), label);
    }

    // Singleton labels for everything outside the kinship view.
    let mut next_label = label_of_community.len() as u64;
    for id in snapshot.nodes.keys() {
        if !labels.contains_key(id) {
            labels.insert(id.clone(), next_label);
            next_label += 1;
        }
    }

    labels
}

/// Multi-level greedy modularity optimization. Returns the final community
/// membership for each node of the input graph.
fn louvain(mut graph: WorkGraph, config: &PipelineConfig) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(config.random_seed);
    let resolution = config.community_resolution;

    // membership[level 0 node] -> current community, carried through levels
    let mut membership: Vec<usize> = (0..graph.len()).collect();

    loop {
        let community = local_moves(&graph, resolution, &mut rng);

        // Densify community ids in order of smallest member index.
        let mut dense: BTreeMap<usize, usize> = BTreeMap::new();
        for &c in &community {
            let next = dense.len();
            dense.entry(c).or_insert(next);
        }
        let community: Vec<usize> = community.iter().map(|c| dense[c]).collect();
        let community_count = dense.len();

        for m in membership.iter_mut() {
            *m = community[*m];
        }

        if community_count == graph.len() {
            // No node changed community: modularity is locally optimal.
            return membership;
        }

        graph = aggregate(&graph, &community, community_count);
    }
}

/// One level of greedy local moves. Processing order is the canonical order
/// shuffled by the seeded RNG; ties between equally good communities break
/// toward the smaller id.
fn local_moves(graph: &WorkGraph, resolution: f64, rng: &mut StdRng) -> Vec<usize> {
    let n = graph.len();
    let two_m = 2.0 * graph.total_weight;

    let degree: Vec<f64> = (0..n).map(|i| graph.weighted_degree(i)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut community_total: Vec<f64> = degree.clone();

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut improved = true;
    while improved {
        improved = false;
        for &i in &order {
            let current = community[i];
            community_total[current] -= degree[i];

            // Weight from i into each neighboring community.
            let mut weight_to: BTreeMap<usize, f64> = BTreeMap::new();
            weight_to.insert(current, 0.0);
            for &(j, w) in &graph.adj[i] {
                *weight_to.entry(community[j]).or_insert(0.0) += w;
            }

            let gain = |c: usize, k_i_in: f64| -> f64 {
                k_i_in - resolution * community_total[c] * degree[i] / two_m
            };

            let mut best = current;
            let mut best_gain = gain(current, weight_to[&current]);
            for (&c, &k_i_in) in &weight_to {
                let g = gain(c, k_i_in);
                // BTreeMap iterates ascending, so on exact ties the smaller
                // community id wins.
                if g > best_gain + 1e-12 {
                    best = c;
                    best_gain = g;
                }
            }

            community_total[best] += degree[i];
            if best != current {
                community[i] = best;
                improved = true;
            }
        }
    }

    community
}

/// Collapse communities into super-nodes: inter-community weights sum into
/// edges, intra-community weights into self loops.
fn aggregate(graph: &WorkGraph, community: &[usize], community_count: usize) -> WorkGraph {
    let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); community_count];
    let mut self_weight = vec![0.0f64; community_count];

    for i in 0..graph.len() {
        let ci = community[i];
        self_weight[ci] += graph.self_weight[i];
        for &(j, w) in &graph.adj[i] {
            // Each undirected edge appears twice in adjacency; halve at i<j
            // by only taking i <= j once.
            if i > j {
                continue;
            }
            let cj = community[j];
            if ci == cj {
                self_weight[ci] += w;
            } else {
                *adj[ci].entry(cj).or_insert(0.0) += w;
                *adj[cj].entry(ci).or_insert(0.0) += w;
            }
        }
    }

    WorkGraph {
        adj: adj.into_iter().map(|m| m.into_iter().collect()).collect(),
        self_weight,
        total_weight: graph.total_weight,
    }
}
