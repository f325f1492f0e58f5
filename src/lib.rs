// Network Panel - Core Library
// Temporal graph snapshots, lagged network features, survival-analysis panel

pub mod accounting;
pub mod centrality;
pub mod community;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lag;
pub mod panel;
pub mod pipeline;
pub mod snapshot;
pub mod stabilize;
pub mod store;
pub mod windows;

// Re-export commonly used types
pub use accounting::{derive_survival_labels, load_accounting_csv, AccountingRow, SurvivalLabel};
pub use centrality::{compute_centrality, weakly_connected_components, CentralityMetrics};
pub use community::detect_communities;
pub use config::PipelineConfig;
pub use control::indirect_control_counts;
pub use engine::{NetworkFeatureEngine, RawFeatures, SnapshotFeatures};
pub use error::{PipelineError, Result};
pub use graph::{EdgeRecord, EntityType, NodeRecord, RelationType};
pub use lag::{FeatureRow, LagAligner, LagCoverage, PeriodFeatures};
pub use panel::{Panel, PanelAssembler, PanelRow};
pub use pipeline::{Pipeline, RunDiagnostics};
pub use snapshot::{Snapshot, SnapshotEdge, SnapshotEdgeKind, SnapshotProjector};
pub use stabilize::{stabilize_communities, CommunityBucket, OTHER_LABEL};
pub use store::{
    load_edges_csv, load_nodes_csv, GraphStore, MemoryGraphStore, ProjectionQuery,
    ProjectionResult, SqliteGraphStore,
};
pub use windows::{generate_windows, period_of, Window};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
