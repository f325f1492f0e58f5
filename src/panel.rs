// 🧾 Panel Assembler - The terminal entity-period table
//
// Left-outer join keyed by (entity_id, period). Accounting rows are
// authoritative for row existence; network features are optional and
// null-filled when absent. An entity present in accounting but missing from
// the network side keeps its row with nulled network columns and bumps the
// join-mismatch counter; nothing is dropped silently.
//
// The panel is written exactly once, by one writer, after the reduction.

use crate::accounting::{derive_survival_labels, AccountingRow};
use crate::error::Result;
use crate::lag::FeatureRow;
use crate::windows::{period_of, Window};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// One row of the terminal panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRow {
    pub entity_id: String,
    pub period: usize,
    pub window_label: String,

    // Accounting attributes (authoritative side of the join).
    pub total_assets: Option<f64>,
    pub total_equity: Option<f64>,
    pub roa: Option<f64>,
    pub npl_ratio: Option<f64>,
    pub tier1_capital_ratio: Option<f64>,

    // Survival labels.
    pub duration: u32,
    pub event: bool,

    // Raw network features of the period itself.
    pub out_degree: Option<f64>,
    pub in_degree: Option<f64>,
    pub degree: Option<f64>,
    pub page_rank: Option<f64>,
    pub wcc: Option<u64>,
    pub control_reach: Option<u64>,
    pub community: Option<String>,

    // Lagged network features.
    pub lag_out_degree: Option<f64>,
    pub lag_in_degree: Option<f64>,
    pub lag_page_rank: Option<f64>,
    pub lag_community: Option<String>,
    pub coverage_flag: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Panel {
    pub rows: Vec<PanelRow>,

    /// Accounting observations with no matching network features.
    pub join_mismatches: usize,

    /// Accounting observations dated outside the window horizon (skipped).
    pub out_of_range: usize,

    /// Network feature rows that never matched an accounting observation.
    pub unmatched_feature_rows: usize,
}

impl Panel {
    pub fn network_match_rate(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        (self.rows.len() - self.join_mismatches) as f64 / self.rows.len() as f64
    }

    /// Write the panel CSV. Called exactly once per run.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!(rows = self.rows.len(), path = %path.display(), "wrote panel");
        Ok(())
    }
}

pub struct PanelAssembler<'a> {
    windows: &'a [Window],
}

impl<'a> PanelAssembler<'a> {
    pub fn new(windows: &'a [Window]) -> Self {
        PanelAssembler { windows }
    }

    pub fn assemble(
        &self,
        feature_rows: &[FeatureRow],
        accounting: &[AccountingRow],
        dead_ids: &HashSet<String>,
    ) -> Panel {
        let features: BTreeMap<(&str, usize), &FeatureRow> = feature_rows
            .iter()
            .map(|r| ((r.entity_id.as_str(), r.period), r))
            .collect();

        // Last record per (entity, period) wins when a period holds several
        // reporting dates.
        let mut by_key: BTreeMap<(String, usize), &AccountingRow> = BTreeMap::new();
        let mut out_of_range = 0usize;
        let mut sorted: Vec<&AccountingRow> = accounting.iter().collect();
        sorted.sort_by(|a, b| (&a.entity_id, a.date).cmp(&(&b.entity_id, b.date)));
        for row in sorted {
            match period_of(self.windows, row.date_ms()) {
                Some(period) => {
                    by_key.insert((row.entity_id.clone(), period), row);
                }
                None => {
                    debug!(entity = %row.entity_id, date = %row.date, "accounting row outside window horizon");
                    out_of_range += 1;
                }
            }
        }

        let observations: Vec<(String, usize)> =
            by_key.keys().map(|(e, p)| (e.clone(), *p)).collect();
        let labels = derive_survival_labels(&observations, dead_ids);

        let mut rows = Vec::with_capacity(by_key.len());
        let mut join_mismatches = 0usize;
        let mut matched_feature_keys: HashSet<(&str, usize)> = HashSet::new();

        for ((entity_id, period), record) in &by_key {
            let label = labels[&(entity_id.clone(), *period)];
            let feature = features.get(&(entity_id.as_str(), *period));
            if feature.is_some() {
                matched_feature_keys.insert((entity_id.as_str(), *period));
            } else {
                join_mismatches += 1;
            }

            let window_label = feature
                .map(|f| f.window_label.clone())
                .unwrap_or_else(|| self.windows[*period].label.clone());

            rows.push(PanelRow {
                entity_id: entity_id.clone(),
                period: *period,
                window_label,
                total_assets: record.total_assets,
                total_equity: record.total_equity,
                roa: record.roa,
                npl_ratio: record.npl_ratio,
                tier1_capital_ratio: record.tier1_capital_ratio(),
                duration: label.duration,
                event: label.event,
                out_degree: feature.map(|f| f.out_degree),
                in_degree: feature.map(|f| f.in_degree),
                degree: feature.map(|f| f.degree),
                page_rank: feature.map(|f| f.page_rank),
                wcc: feature.map(|f| f.wcc),
                control_reach: feature.map(|f| f.control_reach),
                community: feature.map(|f| f.community.clone()),
                lag_out_degree: feature.and_then(|f| f.lag_out_degree),
                lag_in_degree: feature.and_then(|f| f.lag_in_degree),
                lag_page_rank: feature.and_then(|f| f.lag_page_rank),
                lag_community: feature.and_then(|f| f.lag_community.clone()),
                coverage_flag: feature.map(|f| f.coverage_flag).unwrap_or(false),
            });
        }

        let unmatched_feature_rows = feature_rows
            .iter()
            .filter(|r| !matched_feature_keys.contains(&(r.entity_id.as_str(), r.period)))
            .count();

        Panel {
            rows,
            join_mismatches,
            out_of_range,
            unmatched_feature_rows,
        }
    }
}
