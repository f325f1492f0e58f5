// 🚰 Pipeline Runner - Parallel period map, sequential reduction
//
// Period computations are independent of each other, so they fan out across
// a rayon thread pool while the store serves read-only queries. Everything
// order-dependent (stabilization, lagging, assembly, the single panel write)
// runs after the parallel phase completes; collect() is the barrier.
//
// Failure policy per period:
// - transient store errors retry with doubling backoff up to the budget,
//   then the period is marked failed and excluded (the run continues)
// - an empty window is skipped, not failed
// - a data-integrity violation aborts the entire run with the offending id

use crate::accounting::AccountingRow;
use crate::config::PipelineConfig;
use crate::engine::{NetworkFeatureEngine, SnapshotFeatures};
use crate::error::Result;
use crate::lag::{LagAligner, PeriodFeatures};
use crate::panel::{Panel, PanelAssembler};
use crate::snapshot::{Snapshot, SnapshotProjector};
use crate::stabilize::stabilize_communities;
use crate::store::GraphStore;
use crate::windows::{generate_windows, Window};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

// ============================================================================
// PERIOD REPORTS
// ============================================================================

#[derive(Debug, Clone)]
enum PeriodStatus {
    Computed {
        features: SnapshotFeatures,
        dead_ids: Vec<String>,
        node_count: usize,
        relation_count: usize,
        isolate_count: usize,
    },
    Empty,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone)]
struct PeriodReport {
    window: Window,
    status: PeriodStatus,
    retries_used: u32,
}

impl PeriodReport {
    fn status_name(&self) -> &'static str {
        match self.status {
            PeriodStatus::Computed { .. } => "computed",
            PeriodStatus::Empty => "empty",
            PeriodStatus::Failed { .. } => "failed",
        }
    }
}

/// One manifest line per period, written next to the panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestRow {
    window_label: String,
    window_start_ms: i64,
    window_end_ms: i64,
    status: String,
    node_count: usize,
    relation_count: usize,
    isolate_count: usize,
    retries: u32,
    error: Option<String>,
    run_id: String,
    params_hash: String,
}

// ============================================================================
// RUN DIAGNOSTICS
// ============================================================================

/// Aggregated per-run counters. Recoverable conditions end up here instead
/// of surfacing as individual errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub run_id: String,
    pub params_hash: String,
    pub periods_total: usize,
    pub periods_computed: usize,
    pub periods_empty: usize,
    pub periods_failed: usize,
    pub retries_consumed: u32,
    pub lag_coverage_rate: f64,
    pub join_mismatches: usize,
    pub accounting_out_of_range: usize,
    pub unmatched_feature_rows: usize,
    pub rows_written: usize,
}

impl RunDiagnostics {
    pub fn summary(&self) -> String {
        format!(
            "run {}: {} periods ({} computed, {} empty, {} failed), {} retries, \
             lag coverage {:.1}%, {} join mismatches, {} panel rows",
            &self.run_id[..8],
            self.periods_total,
            self.periods_computed,
            self.periods_empty,
            self.periods_failed,
            self.retries_consumed,
            self.lag_coverage_rate * 100.0,
            self.join_mismatches,
            self.rows_written,
        )
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<'a> {
    store: &'a dyn GraphStore,
    config: &'a PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn GraphStore, config: &'a PipelineConfig) -> Self {
        Pipeline { store, config }
    }

    /// Execute the full run: parallel per-period snapshots and features,
    /// then stabilize, lag, assemble, and write the panel plus manifest.
    /// Returns the run diagnostics, or the first integrity error.
    pub fn run(&self, accounting: &[AccountingRow]) -> Result<RunDiagnostics> {
        self.config.validate()?;
        let windows = generate_windows(self.config)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let params_hash = self.config.params_hash();

        std::fs::create_dir_all(&self.config.output_dir)?;
        if self.config.export_edges {
            std::fs::create_dir_all(self.config.output_dir.join("edges"))?;
        }

        info!(
            run_id = %run_id,
            params_hash = %params_hash,
            windows = windows.len(),
            lag = self.config.lag_periods,
            "starting pipeline run"
        );

        // Parallel phase: each period is independent; the store only reads.
        let reports: Vec<Result<PeriodReport>> = windows
            .par_iter()
            .map(|window| self.compute_period(window))
            .collect();

        // Integrity violations abort the run before anything is written.
        let mut completed = Vec::with_capacity(reports.len());
        for report in reports {
            match report {
                Ok(r) => completed.push(r),
                Err(e) => {
                    error!(error = %e, "aborting run");
                    return Err(e);
                }
            }
        }

        // Sequential reduction.
        let mut periods: BTreeMap<usize, PeriodFeatures> = BTreeMap::new();
        let mut dead_ids: HashSet<String> = HashSet::new();
        let mut periods_computed = 0usize;
        let mut periods_empty = 0usize;
        let mut periods_failed = 0usize;
        let mut retries_consumed = 0u32;

        for report in &completed {
            retries_consumed += report.retries_used;
            match &report.status {
                PeriodStatus::Computed { features, dead_ids: dead, .. } => {
                    periods_computed += 1;
                    dead_ids.extend(dead.iter().cloned());
                    let raw_communities = features
                        .features
                        .iter()
                        .map(|(id, f)| (id.clone(), f.community))
                        .collect();
                    periods.insert(
                        report.window.index,
                        PeriodFeatures {
                            period: report.window.index,
                            window_label: report.window.label.clone(),
                            features: features.features.clone(),
                            communities: stabilize_communities(
                                &raw_communities,
                                self.config.community_min_size,
                            ),
                        },
                    );
                }
                PeriodStatus::Empty => {
                    periods_empty += 1;
                    info!(window = %report.window.label, "window had no live entities; skipped");
                }
                PeriodStatus::Failed { message } => {
                    periods_failed += 1;
                    warn!(window = %report.window.label, error = %message, "period excluded after retry budget");
                }
            }
        }

        let aligner = LagAligner::new(self.config.lag_periods);
        let (feature_rows, coverage) = aligner.align(&periods);

        let assembler = PanelAssembler::new(&windows);
        let panel = assembler.assemble(&feature_rows, accounting, &dead_ids);

        let panel_path = self.config.output_dir.join("panel.csv");
        panel.write_csv(&panel_path)?;
        self.write_manifest(&completed, &run_id, &params_hash)?;

        let diagnostics = RunDiagnostics {
            run_id,
            params_hash,
            periods_total: windows.len(),
            periods_computed,
            periods_empty,
            periods_failed,
            retries_consumed,
            lag_coverage_rate: coverage.rate(),
            join_mismatches: panel.join_mismatches,
            accounting_out_of_range: panel.out_of_range,
            unmatched_feature_rows: panel.unmatched_feature_rows,
            rows_written: panel.rows.len(),
        };
        info!("{}", diagnostics.summary());
        Ok(diagnostics)
    }

    /// Snapshot + features for one window, with the retry loop around the
    /// store round-trip. Returns Err only for run-aborting failures.
    fn compute_period(&self, window: &Window) -> Result<PeriodReport> {
        let projector = SnapshotProjector::new(self.store, self.config);
        let engine = NetworkFeatureEngine::new(self.config);

        let mut attempt: u32 = 0;
        let snapshot: Snapshot = loop {
            match projector.project(window) {
                Ok(snapshot) => break snapshot,
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let backoff = Duration::from_millis(
                        self.config.retry_backoff_ms.saturating_mul(1 << attempt),
                    );
                    warn!(
                        window = %window.label,
                        attempt = attempt + 1,
                        budget = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient store failure; retrying"
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Ok(PeriodReport {
                        window: window.clone(),
                        status: PeriodStatus::Failed { message: e.to_string() },
                        retries_used: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        };

        if snapshot.is_empty() {
            return Ok(PeriodReport {
                window: window.clone(),
                status: PeriodStatus::Empty,
                retries_used: attempt,
            });
        }

        if self.config.export_edges {
            self.export_window_edges(&snapshot)?;
        }

        let dead_ids = snapshot
            .nodes
            .values()
            .filter(|n| n.is_dead)
            .map(|n| n.id.clone())
            .collect();
        let node_count = snapshot.node_count();
        let relation_count = snapshot.relation_count();
        let isolate_count = snapshot.isolate_count();
        let features = engine.compute(&snapshot);

        Ok(PeriodReport {
            window: window.clone(),
            status: PeriodStatus::Computed {
                features,
                dead_ids,
                node_count,
                relation_count,
                isolate_count,
            },
            retries_used: attempt,
        })
    }

    /// One edge-list CSV per window; file name carries the window label so
    /// parallel workers never share a writer.
    fn export_window_edges(&self, snapshot: &Snapshot) -> Result<()> {
        #[derive(Serialize)]
        struct EdgeExportRow<'a> {
            source_id: &'a str,
            target_id: &'a str,
            relation_type: &'a str,
            weight: f64,
            imputed: bool,
        }

        let path = self.edge_export_path(&snapshot.window);
        let mut writer = csv::Writer::from_path(&path)?;
        for edge in &snapshot.edges {
            if let crate::snapshot::SnapshotEdgeKind::Relation { relation_type, imputed } =
                &edge.kind
            {
                writer.serialize(EdgeExportRow {
                    source_id: &edge.source_id,
                    target_id: &edge.target_id,
                    relation_type: relation_type.as_str(),
                    weight: edge.weight,
                    imputed: *imputed,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn edge_export_path(&self, window: &Window) -> PathBuf {
        self.config
            .output_dir
            .join("edges")
            .join(format!("edge_list_{}.csv", window.label))
    }

    fn write_manifest(
        &self,
        reports: &[PeriodReport],
        run_id: &str,
        params_hash: &str,
    ) -> Result<()> {
        let path = self
            .config
            .output_dir
            .join(format!("manifest_{}.csv", &params_hash[..12]));
        let mut writer = csv::Writer::from_path(&path)?;
        for report in reports {
            let (node_count, relation_count, isolate_count, error) = match &report.status {
                PeriodStatus::Computed { node_count, relation_count, isolate_count, .. } => {
                    (*node_count, *relation_count, *isolate_count, None)
                }
                PeriodStatus::Empty => (0, 0, 0, None),
                PeriodStatus::Failed { message } => (0, 0, 0, Some(message.clone())),
            };
            writer.serialize(ManifestRow {
                window_label: report.window.label.clone(),
                window_start_ms: report.window.start_ms,
                window_end_ms: report.window.end_ms,
                status: report.status_name().to_string(),
                node_count,
                relation_count,
                isolate_count,
                retries: report.retries_used,
                error,
                run_id: run_id.to_string(),
                params_hash: params_hash.to_string(),
            })?;
        }
        writer.flush()?;
        info!(path = %path.display(), windows = reports.len(), "wrote manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::graph::{EdgeRecord, EntityType, NodeRecord, RelationType};
    use crate::store::MemoryGraphStore;
    use chrono::NaiveDate;
    use std::path::Path;

    fn config(output_dir: &Path) -> PipelineConfig {
        PipelineConfig {
            start_year: 2010,
            end_year: 2010,
            window_months: 6,
            lag_periods: 1,
            retry_backoff_ms: 1,
            output_dir: output_dir.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    /// A owns B (weight 10) in the first half-year only; C isolated.
    fn scenario_store(config: &PipelineConfig) -> MemoryGraphStore {
        let windows = generate_windows(config).unwrap();
        let h1 = &windows[0];
        MemoryGraphStore::new(
            vec![
                NodeRecord::new("a", EntityType::Bank),
                NodeRecord::new("b", EntityType::Bank).dead(),
                NodeRecord::new("c", EntityType::Bank),
            ],
            vec![EdgeRecord::new("a", "b", RelationType::Ownership)
                .with_weight(10.0)
                .with_validity(h1.start_ms, h1.end_ms)],
        )
    }

    fn accounting_rows() -> Vec<AccountingRow> {
        let mut rows = Vec::new();
        for entity in ["a", "b", "c"] {
            for (month, day) in [(3, 31), (9, 30)] {
                rows.push(AccountingRow {
                    entity_id: entity.to_string(),
                    date: NaiveDate::from_ymd_opt(2010, month, day).unwrap(),
                    total_assets: Some(1000.0),
                    total_equity: Some(100.0),
                    roa: Some(0.01),
                    npl_ratio: Some(0.02),
                });
            }
        }
        rows
    }

    fn read_panel(path: &Path) -> Vec<crate::panel::PanelRow> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader.deserialize().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = scenario_store(&config);

        let diagnostics = Pipeline::new(&store, &config).run(&accounting_rows()).unwrap();
        assert_eq!(diagnostics.periods_total, 2);
        assert_eq!(diagnostics.periods_computed, 2);
        assert_eq!(diagnostics.periods_failed, 0);
        assert_eq!(diagnostics.rows_written, 6);
        // Period 0 rows have no history: coverage is exactly one half.
        assert!((diagnostics.lag_coverage_rate - 0.5).abs() < 1e-12);

        let rows = read_panel(&config.output_dir.join("panel.csv"));
        assert_eq!(rows.len(), 6);

        // Second period carries first-period out-degree for A.
        let a_p1 = rows.iter().find(|r| r.entity_id == "a" && r.period == 1).unwrap();
        assert_eq!(a_p1.lag_out_degree, Some(10.0));
        assert_eq!(a_p1.out_degree, Some(0.0));
        assert!(a_p1.coverage_flag);

        // First period has no prior history.
        let a_p0 = rows.iter().find(|r| r.entity_id == "a" && r.period == 0).unwrap();
        assert_eq!(a_p0.lag_out_degree, None);
        assert_eq!(a_p0.out_degree, Some(10.0));
        assert!(!a_p0.coverage_flag);

        // B is dead: event fires on its final observation only.
        let b_p0 = rows.iter().find(|r| r.entity_id == "b" && r.period == 0).unwrap();
        let b_p1 = rows.iter().find(|r| r.entity_id == "b" && r.period == 1).unwrap();
        assert!(!b_p0.event);
        assert!(b_p1.event);

        // Manifest written alongside the panel.
        let manifest = config
            .output_dir
            .join(format!("manifest_{}.csv", &config.params_hash()[..12]));
        assert!(manifest.exists());
    }

    #[test]
    fn test_run_is_deterministic() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        let config1 = config(dir1.path());
        let config2 = config(dir2.path());
        let store1 = scenario_store(&config1);
        let store2 = scenario_store(&config2);

        Pipeline::new(&store1, &config1).run(&accounting_rows()).unwrap();
        Pipeline::new(&store2, &config2).run(&accounting_rows()).unwrap();

        let rows1 = read_panel(&config1.output_dir.join("panel.csv"));
        let rows2 = read_panel(&config2.output_dir.join("panel.csv"));
        assert_eq!(rows1, rows2);
    }

    #[test]
    fn test_transient_failure_retried() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = scenario_store(&config).fail_next(2);

        let diagnostics = Pipeline::new(&store, &config).run(&accounting_rows()).unwrap();
        assert_eq!(diagnostics.periods_computed, 2);
        assert_eq!(diagnostics.periods_failed, 0);
        assert_eq!(diagnostics.retries_consumed, 2);
    }

    #[test]
    fn test_exhausted_retries_exclude_period_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.window_months = 12; // single period
        config.max_retries = 1;
        let store = scenario_store(&config).fail_next(10);

        let diagnostics = Pipeline::new(&store, &config).run(&accounting_rows()).unwrap();
        assert_eq!(diagnostics.periods_failed, 1);
        assert_eq!(diagnostics.periods_computed, 0);
        // Accounting rows survive with nulled network columns.
        assert_eq!(diagnostics.rows_written, 3);
        assert_eq!(diagnostics.join_mismatches, 3);
    }

    #[test]
    fn test_integrity_violation_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let windows = generate_windows(&config).unwrap();
        let w = &windows[0];
        let store = MemoryGraphStore::new(
            vec![NodeRecord::new("broken", EntityType::Bank)
                .with_validity(w.start_ms + 10, w.start_ms + 5)],
            vec![],
        );

        let err = Pipeline::new(&store, &config).run(&accounting_rows()).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity { .. }));
        assert!(!config.output_dir.join("panel.csv").exists());
    }

    #[test]
    fn test_empty_periods_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = MemoryGraphStore::new(vec![], vec![]);
        let diagnostics = Pipeline::new(&store, &config).run(&[]).unwrap();
        assert_eq!(diagnostics.periods_empty, 2);
        assert_eq!(diagnostics.periods_failed, 0);
        assert_eq!(diagnostics.rows_written, 0);
    }

    #[test]
    fn test_edge_export_writes_per_window_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.export_edges = true;
        let store = scenario_store(&config);

        Pipeline::new(&store, &config).run(&accounting_rows()).unwrap();
        let edges_dir = config.output_dir.join("edges");
        let files: Vec<_> = std::fs::read_dir(&edges_dir).unwrap().collect();
        assert_eq!(files.len(), 2);

        let first = std::fs::read_to_string(edges_dir.join("edge_list_W2010_01.csv")).unwrap();
        assert!(first.contains("OWNERSHIP"));
    }
}
