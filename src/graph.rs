// 🕸️ Graph Model - Typed entities and temporally-bounded relationships
//
// The store holds three entity types (Bank, Company, Person) connected by
// three relation types (OWNERSHIP, MANAGEMENT, FAMILY). Every node and edge
// carries a validity interval in epoch milliseconds; unset bounds default to
// the -inf/+inf sentinels so an entity with unknown dates is always valid.
//
// OWNERSHIP and MANAGEMENT are directed control relationships.
// FAMILY is symmetric: (a,b) implies (b,a) for every algorithm.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel for an unknown lower validity bound (always valid since forever).
pub const VALID_FROM_MIN: i64 = i64::MIN;

/// Sentinel for an unknown upper validity bound (valid until forever).
pub const VALID_TO_MAX: i64 = i64::MAX;

// ============================================================================
// ENTITY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Bank,
    Company,
    Person,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Bank, EntityType::Company, EntityType::Person];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Bank => "Bank",
            EntityType::Company => "Company",
            EntityType::Person => "Person",
        }
    }
}

impl FromStr for EntityType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Bank" => Ok(EntityType::Bank),
            "Company" => Ok(EntityType::Company),
            "Person" => Ok(EntityType::Person),
            other => Err(PipelineError::integrity(
                "node",
                other,
                format!("unrecognized entity type '{}'", other),
            )),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RELATION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    /// Directed: source holds an equity share in target. Weight = share size.
    Ownership,

    /// Directed: source holds a management position at target.
    Management,

    /// Symmetric kinship tie between two persons.
    Family,
}

impl RelationType {
    pub const ALL: [RelationType; 3] = [
        RelationType::Ownership,
        RelationType::Management,
        RelationType::Family,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Ownership => "OWNERSHIP",
            RelationType::Management => "MANAGEMENT",
            RelationType::Family => "FAMILY",
        }
    }

    /// FAMILY is the only symmetric relation; control relations are directed.
    pub fn is_directed(&self) -> bool {
        !matches!(self, RelationType::Family)
    }
}

impl FromStr for RelationType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OWNERSHIP" => Ok(RelationType::Ownership),
            "MANAGEMENT" => Ok(RelationType::Management),
            "FAMILY" => Ok(RelationType::Family),
            other => Err(PipelineError::integrity(
                "edge",
                other,
                format!("unrecognized relation type '{}'", other),
            )),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// NODE RECORD
// ============================================================================

/// A typed entity with a validity interval.
///
/// `is_dead` marks entities that ceased to exist inside the observed horizon;
/// it feeds the survival event indicator downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,

    pub entity_type: EntityType,

    /// Epoch milliseconds; defaults to the -inf sentinel when unknown.
    #[serde(default = "default_valid_from")]
    pub valid_from: i64,

    /// Epoch milliseconds; defaults to the +inf sentinel when unknown.
    #[serde(default = "default_valid_to")]
    pub valid_to: i64,

    #[serde(default)]
    pub is_dead: bool,
}

fn default_valid_from() -> i64 {
    VALID_FROM_MIN
}

fn default_valid_to() -> i64 {
    VALID_TO_MAX
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        NodeRecord {
            id: id.into(),
            entity_type,
            valid_from: VALID_FROM_MIN,
            valid_to: VALID_TO_MAX,
            is_dead: false,
        }
    }

    pub fn with_validity(mut self, valid_from: i64, valid_to: i64) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    pub fn dead(mut self) -> Self {
        self.is_dead = true;
        self
    }

    /// The entity existed at some point during `[start_ms, end_ms)`.
    pub fn is_alive_in(&self, start_ms: i64, end_ms: i64) -> bool {
        intersects_window(self.valid_from, self.valid_to, start_ms, end_ms)
    }

    /// Reject inverted validity intervals. Never reorders them silently.
    pub fn check_integrity(&self) -> Result<()> {
        check_interval("node", &self.id, self.valid_from, self.valid_to)
    }
}

// ============================================================================
// EDGE RECORD
// ============================================================================

/// A typed, weighted, temporally-bounded relationship.
///
/// `imputed` marks relationships inferred by heuristic matching (e.g. kinship
/// from name similarity) rather than observed in source records. Imputed
/// edges run through every algorithm exactly like observed ones; the flag is
/// preserved for downstream auditability only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source_id: String,

    pub target_id: String,

    pub relation_type: RelationType,

    /// Non-negative relationship strength (e.g. ownership share). A missing
    /// weight is read as 1.0, matching the source data convention.
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default = "default_valid_from")]
    pub valid_from: i64,

    #[serde(default = "default_valid_to")]
    pub valid_to: i64,

    #[serde(default)]
    pub imputed: bool,
}

fn default_weight() -> f64 {
    1.0
}

impl EdgeRecord {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        EdgeRecord {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            weight: 1.0,
            valid_from: VALID_FROM_MIN,
            valid_to: VALID_TO_MAX,
            imputed: false,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_validity(mut self, valid_from: i64, valid_to: i64) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    pub fn imputed(mut self) -> Self {
        self.imputed = true;
        self
    }

    /// Stable "source->target" identifier for diagnostics.
    pub fn describe(&self) -> String {
        format!("{}-[{}]->{}", self.source_id, self.relation_type, self.target_id)
    }

    /// The relationship was active at some point during `[start_ms, end_ms)`.
    pub fn is_active_in(&self, start_ms: i64, end_ms: i64) -> bool {
        intersects_window(self.valid_from, self.valid_to, start_ms, end_ms)
    }

    /// Reject inverted intervals and negative weights.
    pub fn check_integrity(&self) -> Result<()> {
        check_interval("edge", &self.describe(), self.valid_from, self.valid_to)?;
        if self.weight < 0.0 || !self.weight.is_finite() {
            return Err(PipelineError::integrity(
                "edge",
                self.describe(),
                format!("weight must be finite and >= 0, got {}", self.weight),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// VALIDITY INTERVALS
// ============================================================================

/// Half-open interval intersection: active during `[start, end)` iff
/// `valid_from < end && valid_to > start`.
pub fn intersects_window(valid_from: i64, valid_to: i64, start_ms: i64, end_ms: i64) -> bool {
    valid_from < end_ms && valid_to > start_ms
}

fn check_interval(kind: &'static str, id: &str, valid_from: i64, valid_to: i64) -> Result<()> {
    if valid_from > valid_to {
        return Err(PipelineError::integrity(
            kind,
            id,
            format!("valid_from ({}) after valid_to ({})", valid_from, valid_to),
        ));
    }
    Ok(())
}
