// 💰 Accounting Data - Entity-period financials and survival labels
//
// Accounting rows are the panel's backbone: a (entity, period) pair exists
// in the terminal panel iff an accounting record exists for it. The columns
// kept here are the ratios the survival models actually consume; everything
// else in the source forms stays upstream.
//
// The event indicator follows the source convention: event = 1 only on the
// LAST observation of an entity marked dead; every earlier observation is a
// censored period.

use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingRow {
    pub entity_id: String,

    /// Reporting date of the record.
    pub date: NaiveDate,

    pub total_assets: Option<f64>,
    pub total_equity: Option<f64>,
    pub roa: Option<f64>,
    pub npl_ratio: Option<f64>,
}

impl AccountingRow {
    /// Equity over assets, the capital-ratio proxy used downstream.
    pub fn tier1_capital_ratio(&self) -> Option<f64> {
        match (self.total_equity, self.total_assets) {
            (Some(equity), Some(assets)) if assets != 0.0 => Some(equity / assets),
            _ => None,
        }
    }

    pub fn date_ms(&self) -> i64 {
        self.date
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc()
            .timestamp_millis()
    }
}

/// Load accounting rows from a CSV file with headers
/// `entity_id,date,total_assets,total_equity,roa,npl_ratio`.
pub fn load_accounting_csv(path: &Path) -> Result<Vec<AccountingRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: AccountingRow = row?;
        rows.push(row);
    }
    info!(count = rows.len(), path = %path.display(), "loaded accounting CSV");
    Ok(rows)
}

// ============================================================================
// SURVIVAL LABELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalLabel {
    /// Periods since the entity's first observation, inclusive.
    pub duration: u32,

    /// True only on the final observation of a dead entity.
    pub event: bool,
}

/// Derive (duration, event) per observed (entity, period).
///
/// `observations` are the accounting-backed entity-period pairs;
/// `dead_ids` the entities whose node record carries `is_dead`.
pub fn derive_survival_labels(
    observations: &[(String, usize)],
    dead_ids: &HashSet<String>,
) -> BTreeMap<(String, usize), SurvivalLabel> {
    let mut periods_by_entity: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (entity, period) in observations {
        periods_by_entity.entry(entity.as_str()).or_default().push(*period);
    }

    let mut labels = BTreeMap::new();
    for (entity, mut periods) in periods_by_entity {
        periods.sort_unstable();
        periods.dedup();
        let last = *periods.last().expect("entity has at least one observation");
        let is_dead = dead_ids.contains(entity);

        for (idx, period) in periods.iter().enumerate() {
            labels.insert(
                (entity.to_string(), *period),
                SurvivalLabel {
                    duration: (idx + 1) as u32,
                    event: is_dead && *period == last,
                },
            );
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(entries: &[(&str, usize)]) -> Vec<(String, usize)> {
        entries.iter().map(|(e, p)| (e.to_string(), *p)).collect()
    }

    #[test]
    fn test_event_only_on_last_observation_of_dead_entity() {
        let dead: HashSet<String> = ["failed-bank".to_string()].into_iter().collect();
        let labels = derive_survival_labels(
            &obs(&[
                ("failed-bank", 0),
                ("failed-bank", 1),
                ("failed-bank", 2),
                ("survivor", 0),
                ("survivor", 1),
            ]),
            &dead,
        );

        assert!(!labels[&("failed-bank".to_string(), 0)].event);
        assert!(!labels[&("failed-bank".to_string(), 1)].event);
        assert!(labels[&("failed-bank".to_string(), 2)].event);
        assert!(!labels[&("survivor".to_string(), 1)].event);
    }

    #[test]
    fn test_duration_counts_from_first_observation() {
        let labels = derive_survival_labels(
            &obs(&[("bank", 3), ("bank", 4), ("bank", 6)]),
            &HashSet::new(),
        );
        assert_eq!(labels[&("bank".to_string(), 3)].duration, 1);
        assert_eq!(labels[&("bank".to_string(), 4)].duration, 2);
        // Gaps in observation do not inflate duration.
        assert_eq!(labels[&("bank".to_string(), 6)].duration, 3);
    }

    #[test]
    fn test_duplicate_observations_collapse() {
        let dead: HashSet<String> = ["b".to_string()].into_iter().collect();
        let labels = derive_survival_labels(&obs(&[("b", 1), ("b", 1), ("b", 2)]), &dead);
        assert_eq!(labels.len(), 2);
        assert!(labels[&("b".to_string(), 2)].event);
    }

    #[test]
    fn test_tier1_ratio_guards_division() {
        let mut row = AccountingRow {
            entity_id: "bank".to_string(),
            date: NaiveDate::from_ymd_opt(2010, 3, 31).unwrap(),
            total_assets: Some(200.0),
            total_equity: Some(30.0),
            roa: None,
            npl_ratio: None,
        };
        assert_eq!(row.tier1_capital_ratio(), Some(0.15));
        row.total_assets = Some(0.0);
        assert_eq!(row.tier1_capital_ratio(), None);
        row.total_assets = None;
        assert_eq!(row.tier1_capital_ratio(), None);
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounting.csv");
        std::fs::write(
            &path,
            "entity_id,date,total_assets,total_equity,roa,npl_ratio\n\
             bank-a,2010-03-31,1000.0,150.0,0.012,0.04\n\
             bank-b,2010-03-31,,,,\n",
        )
        .unwrap();
        let rows = load_accounting_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].total_assets, Some(1000.0));
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2010, 3, 31).unwrap());
        assert_eq!(rows[1].total_assets, None);
    }
}
