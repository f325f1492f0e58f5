// 🪣 Community Stabilizer - Collapse degenerate communities per period
//
// Stratified estimation downstream cannot use strata with a handful of
// members, so any community smaller than the configured minimum collapses
// into one reserved "other" bucket per period. The bucket's composition
// varies period to period, same as the labels themselves: neither carries
// identity across snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved label for the catch-all bucket.
pub const OTHER_LABEL: &str = "other";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunityBucket {
    /// A community that met the size floor; keeps its per-period label.
    Community(u64),

    /// The reserved catch-all for collapsed small communities.
    Other,
}

impl CommunityBucket {
    pub fn as_label(&self) -> String {
        match self {
            CommunityBucket::Community(id) => id.to_string(),
            CommunityBucket::Other => OTHER_LABEL.to_string(),
        }
    }
}

impl fmt::Display for CommunityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommunityBucket::Community(id) => write!(f, "{}", id),
            CommunityBucket::Other => f.write_str(OTHER_LABEL),
        }
    }
}

/// Remap every label with membership below `min_size` to the "other" bucket.
/// After this, no kept label has membership in (0, min_size).
pub fn stabilize_communities(
    assignments: &BTreeMap<String, u64>,
    min_size: usize,
) -> BTreeMap<String, CommunityBucket> {
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for label in assignments.values() {
        *counts.entry(*label).or_insert(0) += 1;
    }

    assignments
        .iter()
        .map(|(id, label)| {
            let bucket = if counts[label] < min_size {
                CommunityBucket::Other
            } else {
                CommunityBucket::Community(*label)
            };
            (id.clone(), bucket)
        })
        .collect()
}
