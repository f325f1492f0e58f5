// ⏮️ Lag Aligner - Attach period t-L measurements to period t
//
// The whole point of the pipeline: a feature explaining survival at period t
// must predate t. The aligner shifts each entity's measurements forward by
// the configured number of whole periods; where no history exists (entity
// not yet alive, snapshot failed or skipped) the lagged columns are null and
// the coverage flag is false. It never looks forward.
//
// Lag 0 is allowed for diagnostics but logged loudly: same-period features
// defeat the no-leakage design.

use crate::engine::RawFeatures;
use crate::stabilize::CommunityBucket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// All per-entity measurements of one completed period, communities already
/// stabilized. The ordered collection of these is the aligner's input.
#[derive(Debug, Clone)]
pub struct PeriodFeatures {
    pub period: usize,
    pub window_label: String,
    pub features: BTreeMap<String, RawFeatures>,
    pub communities: BTreeMap<String, CommunityBucket>,
}

/// One entity-period observation: raw measurements of the period itself plus
/// the lagged measurements attached from `period - lag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub entity_id: String,
    pub period: usize,
    pub window_label: String,

    pub out_degree: f64,
    pub in_degree: f64,
    pub degree: f64,
    pub page_rank: f64,
    pub wcc: u64,
    pub control_reach: u64,
    pub community: String,

    pub lag_out_degree: Option<f64>,
    pub lag_in_degree: Option<f64>,
    pub lag_page_rank: Option<f64>,
    pub lag_community: Option<String>,

    /// True iff the lagged columns were populated from real history.
    pub coverage_flag: bool,
}

/// Fraction of rows whose lagged columns were populated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LagCoverage {
    pub rows: usize,
    pub covered: usize,
}

impl LagCoverage {
    pub fn rate(&self) -> f64 {
        if self.rows == 0 {
            return 0.0;
        }
        self.covered as f64 / self.rows as f64
    }
}

pub struct LagAligner {
    lag_periods: usize,
}

impl LagAligner {
    pub fn new(lag_periods: usize) -> Self {
        if lag_periods == 0 {
            warn!("lag_periods = 0: features are attached to their own period, which leaks same-period information into the panel");
        }
        LagAligner { lag_periods }
    }

    /// Produce one row per (entity, period) present in the computed periods.
    ///
    /// The lagged values are exact copies of the raw values computed at
    /// `period - lag_periods`; nothing dated at or after the target period is
    /// ever read.
    pub fn align(&self, periods: &BTreeMap<usize, PeriodFeatures>) -> (Vec<FeatureRow>, LagCoverage) {
        let mut rows = Vec::new();
        let mut coverage = LagCoverage::default();

        for (&period, current) in periods {
            let prior = period
                .checked_sub(self.lag_periods)
                .and_then(|p| periods.get(&p));

            for (entity_id, raw) in &current.features {
                let lagged = prior.and_then(|p| {
                    p.features.get(entity_id).map(|f| (f, p.communities.get(entity_id)))
                });

                let row = match lagged {
                    Some((prior_raw, prior_bucket)) => {
                        coverage.covered += 1;
                        FeatureRow {
                            lag_out_degree: Some(prior_raw.centrality.out_degree),
                            lag_in_degree: Some(prior_raw.centrality.in_degree),
                            lag_page_rank: Some(prior_raw.centrality.page_rank),
                            lag_community: prior_bucket.map(|b| b.as_label()),
                            coverage_flag: true,
                            ..self.base_row(entity_id, current, raw)
                        }
                    }
                    None => self.base_row(entity_id, current, raw),
                };
                coverage.rows += 1;
                rows.push(row);
            }
        }

        (rows, coverage)
    }

    fn base_row(&self, entity_id: &str, current: &PeriodFeatures, raw: &RawFeatures) -> FeatureRow {
        FeatureRow {
            entity_id: entity_id.to_string(),
            period: current.period,
            window_label: current.window_label.clone(),
            out_degree: raw.centrality.out_degree,
            in_degree: raw.centrality.in_degree,
            degree: raw.centrality.degree,
            page_rank: raw.centrality.page_rank,
            wcc: raw.wcc,
            control_reach: raw.control_reach,
            community: current
                .communities
                .get(entity_id)
                .map(|b| b.as_label())
                .unwrap_or_else(|| CommunityBucket::Other.as_label()),
            lag_out_degree: None,
            lag_in_degree: None,
            lag_page_rank: None,
            lag_community: None,
            coverage_flag: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::centrality::CentralityMetrics;

    fn raw(out_degree: f64, page_rank: f64) -> RawFeatures {
        RawFeatures {
            centrality: CentralityMetrics {
                out_degree,
                in_degree: 0.0,
                degree: out_degree,
                page_rank,
            },
            wcc: 0,
            control_reach: 0,
            community: 0,
        }
    }

    fn period(index: usize, label: &str, entities: &[(&str, f64, f64)]) -> PeriodFeatures {
        PeriodFeatures {
            period: index,
            window_label: label.to_string(),
            features: entities
                .iter()
                .map(|&(id, od, pr)| (id.to_string(), raw(od, pr)))
                .collect(),
            communities: entities
                .iter()
                .map(|&(id, _, _)| (id.to_string(), CommunityBucket::Community(0)))
                .collect(),
        }
    }

    fn by_period(periods: Vec<PeriodFeatures>) -> BTreeMap<usize, PeriodFeatures> {
        periods.into_iter().map(|p| (p.period, p)).collect()
    }

    #[test]
    fn test_lag_one_attaches_prior_quarter() {
        // A owns B (weight 10) in Q1 only; C isolated throughout.
        let periods = by_period(vec![
            period(0, "Q1_2010", &[("a", 10.0, 0.15), ("b", 0.0, 0.2775), ("c", 0.0, 0.0)]),
            period(1, "Q2_2010", &[("a", 0.0, 0.0), ("b", 0.0, 0.0), ("c", 0.0, 0.0)]),
        ]);

        let (rows, coverage) = LagAligner::new(1).align(&periods);
        assert_eq!(rows.len(), 6);

        let a_q2 = rows.iter().find(|r| r.entity_id == "a" && r.period == 1).unwrap();
        assert_eq!(a_q2.lag_out_degree, Some(10.0));
        assert!(a_q2.coverage_flag);

        // Q1 has no prior period: nulls and coverage_flag = false.
        let a_q1 = rows.iter().find(|r| r.entity_id == "a" && r.period == 0).unwrap();
        assert_eq!(a_q1.lag_out_degree, None);
        assert_eq!(a_q1.lag_community, None);
        assert!(!a_q1.coverage_flag);

        assert_eq!(coverage.rows, 6);
        assert_eq!(coverage.covered, 3);
        assert!((coverage.rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_lagged_values_are_bitwise_copies() {
        let pr = 0.1234567890123456_f64;
        let periods = by_period(vec![
            period(0, "Q1_2010", &[("a", 3.25, pr)]),
            period(1, "Q2_2010", &[("a", 0.0, 0.0)]),
        ]);
        let (rows, _) = LagAligner::new(1).align(&periods);
        let lagged = rows.iter().find(|r| r.period == 1).unwrap();
        assert_eq!(lagged.lag_page_rank.unwrap().to_bits(), pr.to_bits());
        assert_eq!(lagged.lag_out_degree.unwrap().to_bits(), 3.25_f64.to_bits());
    }

    #[test]
    fn test_missing_period_in_history_yields_null() {
        // Period 1 failed upstream: entity has no metrics at t - 1 for t = 2.
        let periods = by_period(vec![
            period(0, "Q1_2010", &[("a", 1.0, 0.15)]),
            period(2, "Q3_2010", &[("a", 2.0, 0.15)]),
        ]);
        let (rows, coverage) = LagAligner::new(1).align(&periods);
        assert!(rows.iter().all(|r| !r.coverage_flag));
        assert_eq!(coverage.covered, 0);
    }

    #[test]
    fn test_entity_appearing_late_has_no_history() {
        let periods = by_period(vec![
            period(0, "Q1_2010", &[("a", 1.0, 0.15)]),
            period(1, "Q2_2010", &[("a", 1.0, 0.15), ("newcomer", 5.0, 0.15)]),
        ]);
        let (rows, _) = LagAligner::new(1).align(&periods);
        let newcomer = rows.iter().find(|r| r.entity_id == "newcomer").unwrap();
        assert!(!newcomer.coverage_flag);
        let a = rows.iter().find(|r| r.entity_id == "a" && r.period == 1).unwrap();
        assert!(a.coverage_flag);
    }

    #[test]
    fn test_lag_zero_is_identity() {
        let periods = by_period(vec![period(0, "Q1_2010", &[("a", 4.0, 0.15)])]);
        let (rows, coverage) = LagAligner::new(0).align(&periods);
        assert_eq!(rows[0].lag_out_degree, Some(4.0));
        assert_eq!(coverage.covered, 1);
    }

    #[test]
    fn test_never_reads_future_periods() {
        // Later periods exist with different values; lag must only look back.
        let periods = by_period(vec![
            period(0, "Q1_2010", &[("a", 1.0, 0.1)]),
            period(1, "Q2_2010", &[("a", 2.0, 0.2)]),
            period(2, "Q3_2010", &[("a", 99.0, 0.9)]),
        ]);
        let (rows, _) = LagAligner::new(1).align(&periods);
        let q2 = rows.iter().find(|r| r.period == 1).unwrap();
        assert_eq!(q2.lag_out_degree, Some(1.0));
        let q3 = rows.iter().find(|r| r.period == 2).unwrap();
        assert_eq!(q3.lag_out_degree, Some(2.0));
    }
}
