// 🔗 Indirect Control - Bounded-depth reach over ownership chains
//
// Counts how many distinct entities a node reaches through directed
// OWNERSHIP edges within a configurable hop cap. Ownership graphs contain
// cycles (mutual and circular shareholding), so the walk is a plain BFS with
// a visited set; it terminates on any input. The hop cap is a heuristic
// truncation carried over from the source data pipeline and stays
// configuration, never a constant.

use crate::graph::RelationType;
use crate::snapshot::Snapshot;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Entities reachable through ownership within `depth_cap` hops, per node.
/// The node itself is not counted.
pub fn indirect_control_counts(snapshot: &Snapshot, depth_cap: usize) -> BTreeMap<String, u64> {
    // Ownership adjacency in index space over the canonical node order.
    let ids: Vec<&str> = snapshot.nodes.keys().map(|s| s.as_str()).collect();
    let index: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    for edge in &snapshot.edges {
        if edge.relation_type() == Some(RelationType::Ownership) {
            let src = index[edge.source_id.as_str()];
            let dst = index[edge.target_id.as_str()];
            if src != dst {
                adj[src].push(dst);
            }
        }
    }

    let mut counts = BTreeMap::new();
    for (start, id) in ids.iter().enumerate() {
        counts.insert(id.to_string(), bfs_reach(&adj, start, depth_cap));
    }
    counts
}

fn bfs_reach(adj: &[Vec<usize>], start: usize, depth_cap: usize) -> u64 {
    let mut visited: HashSet<usize> = HashSet::new();
    visited.insert(start);

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    queue.push_back((start, 0));

    let mut reached = 0u64;
    while let Some((node, depth)) = queue.pop_front() {
        if depth == depth_cap {
            continue;
        }
        for &next in &adj[node] {
            if visited.insert(next) {
                reached += 1;
                queue.push_back((next, depth + 1));
            }
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::graph::{EdgeRecord, EntityType, NodeRecord};
    use crate::snapshot::SnapshotProjector;
    use crate::store::MemoryGraphStore;
    use crate::windows::generate_windows;

    fn project(nodes: Vec<NodeRecord>, edges: Vec<EdgeRecord>) -> Snapshot {
        let config = PipelineConfig {
            start_year: 2010,
            end_year: 2010,
            ..PipelineConfig::default()
        };
        let windows = generate_windows(&config).unwrap();
        let store = MemoryGraphStore::new(nodes, edges);
        SnapshotProjector::new(&store, &config).project(&windows[0]).unwrap()
    }

    fn bank(id: &str) -> NodeRecord {
        NodeRecord::new(id, EntityType::Bank)
    }

    fn owns(a: &str, b: &str) -> EdgeRecord {
        EdgeRecord::new(a, b, RelationType::Ownership)
    }

    #[test]
    fn test_chain_respects_depth_cap() {
        // a -> b -> c -> d -> e
        let snap = project(
            vec![bank("a"), bank("b"), bank("c"), bank("d"), bank("e")],
            vec![owns("a", "b"), owns("b", "c"), owns("c", "d"), owns("d", "e")],
        );
        let at_2 = indirect_control_counts(&snap, 2);
        assert_eq!(at_2["a"], 2);
        let at_4 = indirect_control_counts(&snap, 4);
        assert_eq!(at_4["a"], 4);
        assert_eq!(at_4["e"], 0);
    }

    #[test]
    fn test_cycle_terminates_and_counts_once() {
        // Circular shareholding: a -> b -> c -> a
        let snap = project(
            vec![bank("a"), bank("b"), bank("c")],
            vec![owns("a", "b"), owns("b", "c"), owns("c", "a")],
        );
        let counts = indirect_control_counts(&snap, 10);
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 2);
        assert_eq!(counts["c"], 2);
    }

    #[test]
    fn test_mutual_ownership() {
        let snap = project(vec![bank("a"), bank("b")], vec![owns("a", "b"), owns("b", "a")]);
        let counts = indirect_control_counts(&snap, 4);
        assert_eq!(counts["a"], 1);
        assert_eq!(counts["b"], 1);
    }

    #[test]
    fn test_management_edges_do_not_count_as_control() {
        let snap = project(
            vec![bank("a"), bank("b")],
            vec![EdgeRecord::new("a", "b", RelationType::Management)],
        );
        let counts = indirect_control_counts(&snap, 4);
        assert_eq!(counts["a"], 0);
    }
}
