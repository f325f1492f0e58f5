// 🗄️ Graph Store - Read-only projection over SQLite + CSV ingestion
//
// The store is the pipeline's sole upstream dependency. It answers exactly
// one declarative query: "give me the nodes and edges of these types active
// in this window". The pipeline never writes computed properties back;
// snapshots and features are pure values derived from an immutable read.
//
// Two implementations:
// - SqliteGraphStore: embedded database (WAL mode), one short-lived
//   connection per query so parallel period workers never share state
// - MemoryGraphStore: in-process vectors, used by tests and embedders

use crate::error::{classify_sqlite, PipelineError, Result};
use crate::graph::{EdgeRecord, EntityType, NodeRecord, RelationType, VALID_FROM_MIN, VALID_TO_MAX};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

// ============================================================================
// PROJECTION QUERY
// ============================================================================

/// The declarative projection request. One per (window, run).
#[derive(Debug, Clone)]
pub struct ProjectionQuery {
    pub node_types: Vec<EntityType>,
    pub relation_types: Vec<RelationType>,
    pub window_start: i64,
    pub window_end: i64,
    /// Whether imputed relationships are returned at all.
    pub include_imputed: bool,
    /// Concurrency hint forwarded to the store; the core does not act on it.
    pub read_concurrency: usize,
}

/// Raw query result: candidate records, not yet integrity-checked.
#[derive(Debug, Clone, Default)]
pub struct ProjectionResult {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

/// Read-only access to the entity/relationship graph.
pub trait GraphStore: Sync {
    /// Return every node of an included type alive in the window, and every
    /// edge of an included type active in the window.
    fn project(&self, query: &ProjectionQuery) -> Result<ProjectionResult>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteGraphStore {
    path: PathBuf,
}

impl SqliteGraphStore {
    /// Create (or reuse) a store file and ensure the schema exists.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(classify_sqlite)?;
        setup_store(&conn)?;
        Ok(SqliteGraphStore { path: path.to_path_buf() })
    }

    /// Open an existing store for reading.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::store(format!(
                "store file not found: {}",
                path.display()
            )));
        }
        Ok(SqliteGraphStore { path: path.to_path_buf() })
    }

    // WAL lets any number of these read while an ingest writes; each worker
    // opens its own short-lived connection, so nothing is shared across
    // threads.
    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(classify_sqlite)
    }

    /// Insert nodes in a single transaction. Re-ingesting an id replaces it.
    pub fn ingest_nodes(&self, nodes: &[NodeRecord]) -> Result<usize> {
        let mut conn = Connection::open(&self.path).map_err(classify_sqlite)?;
        let tx = conn.transaction().map_err(classify_sqlite)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO nodes (id, entity_type, valid_from, valid_to, is_dead)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(classify_sqlite)?;
            for node in nodes {
                stmt.execute(params![
                    node.id,
                    node.entity_type.as_str(),
                    node.valid_from,
                    node.valid_to,
                    node.is_dead as i64,
                ])
                .map_err(classify_sqlite)?;
            }
        }
        tx.commit().map_err(classify_sqlite)?;
        info!(count = nodes.len(), "ingested nodes");
        Ok(nodes.len())
    }

    /// Insert edges in a single transaction.
    pub fn ingest_edges(&self, edges: &[EdgeRecord]) -> Result<usize> {
        let mut conn = Connection::open(&self.path).map_err(classify_sqlite)?;
        let tx = conn.transaction().map_err(classify_sqlite)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO edges
                     (source_id, target_id, relation_type, weight, valid_from, valid_to, imputed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(classify_sqlite)?;
            for edge in edges {
                stmt.execute(params![
                    edge.source_id,
                    edge.target_id,
                    edge.relation_type.as_str(),
                    edge.weight,
                    edge.valid_from,
                    edge.valid_to,
                    edge.imputed as i64,
                ])
                .map_err(classify_sqlite)?;
            }
        }
        tx.commit().map_err(classify_sqlite)?;
        info!(count = edges.len(), "ingested edges");
        Ok(edges.len())
    }

    pub fn node_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
            .map_err(classify_sqlite)
    }

    pub fn edge_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))
            .map_err(classify_sqlite)
    }
}

/// Quoted SQL IN-list over closed enum names. Safe: values come from the
/// enums' as_str, never from user input.
fn sql_in_list<I: IntoIterator<Item = &'static str>>(names: I) -> String {
    names
        .into_iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ")
}

impl GraphStore for SqliteGraphStore {
    fn project(&self, query: &ProjectionQuery) -> Result<ProjectionResult> {
        debug!(
            window_start = query.window_start,
            window_end = query.window_end,
            read_concurrency = query.read_concurrency,
            "running projection query"
        );
        let conn = self.connect()?;

        let node_sql = format!(
            "SELECT id, entity_type, valid_from, valid_to, is_dead FROM nodes
             WHERE entity_type IN ({})
               AND valid_from < ?1 AND valid_to > ?2
             ORDER BY id",
            sql_in_list(query.node_types.iter().map(|t| t.as_str()))
        );
        let mut stmt = conn.prepare(&node_sql).map_err(classify_sqlite)?;
        let nodes = stmt
            .query_map(params![query.window_end, query.window_start], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(classify_sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(classify_sqlite)?;

        let nodes = nodes
            .into_iter()
            .map(|(id, entity_type, valid_from, valid_to, is_dead)| {
                Ok(NodeRecord {
                    id,
                    entity_type: EntityType::from_str(&entity_type)?,
                    valid_from,
                    valid_to,
                    is_dead: is_dead != 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let edge_sql = format!(
            "SELECT source_id, target_id, relation_type, weight, valid_from, valid_to, imputed
             FROM edges
             WHERE relation_type IN ({})
               AND valid_from < ?1 AND valid_to > ?2
               AND (imputed = 0 OR ?3)
             ORDER BY source_id, target_id, relation_type",
            sql_in_list(query.relation_types.iter().map(|t| t.as_str()))
        );
        let mut stmt = conn.prepare(&edge_sql).map_err(classify_sqlite)?;
        let edges = stmt
            .query_map(
                params![query.window_end, query.window_start, query.include_imputed],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .map_err(classify_sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(classify_sqlite)?;

        let edges = edges
            .into_iter()
            .map(|(source_id, target_id, relation_type, weight, valid_from, valid_to, imputed)| {
                Ok(EdgeRecord {
                    source_id,
                    target_id,
                    relation_type: RelationType::from_str(&relation_type)?,
                    weight,
                    valid_from,
                    valid_to,
                    imputed: imputed != 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ProjectionResult { nodes, edges })
    }
}

/// Create tables, indexes, and WAL mode.
pub fn setup_store(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(classify_sqlite)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS nodes (
            id          TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            valid_from  INTEGER NOT NULL,
            valid_to    INTEGER NOT NULL,
            is_dead     INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS edges (
            source_id     TEXT NOT NULL,
            target_id     TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            weight        REAL NOT NULL DEFAULT 1.0,
            valid_from    INTEGER NOT NULL,
            valid_to      INTEGER NOT NULL,
            imputed       INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_validity ON nodes (valid_from, valid_to);
        CREATE INDEX IF NOT EXISTS idx_edges_validity ON edges (valid_from, valid_to);
        CREATE INDEX IF NOT EXISTS idx_edges_type ON edges (relation_type);",
    )
    .map_err(classify_sqlite)?;

    Ok(())
}

// ============================================================================
// CSV INGESTION
// ============================================================================

// Raw CSV rows: dates arrive as YYYY-MM-DD strings, bounds may be blank
// (blank = unknown = always valid on that side).

#[derive(Debug, Deserialize)]
struct RawNodeRow {
    id: String,
    entity_type: String,
    #[serde(default)]
    valid_from: Option<String>,
    #[serde(default)]
    valid_to: Option<String>,
    #[serde(default)]
    is_dead: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawEdgeRow {
    source_id: String,
    target_id: String,
    relation_type: String,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    valid_from: Option<String>,
    #[serde(default)]
    valid_to: Option<String>,
    #[serde(default)]
    imputed: Option<u8>,
}

fn parse_bound(raw: &Option<String>, sentinel: i64, kind: &'static str, id: &str) -> Result<i64> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(sentinel),
        Some(text) => {
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
                PipelineError::integrity(kind, id, format!("unparseable date '{}'", text))
            })?;
            let dt = date.and_hms_opt(0, 0, 0).expect("midnight exists");
            Ok(dt.and_utc().timestamp_millis())
        }
    }
}

/// Load node records from a CSV file with headers
/// `id,entity_type,valid_from,valid_to,is_dead`.
pub fn load_nodes_csv(path: &Path) -> Result<Vec<NodeRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut nodes = Vec::new();
    for row in reader.deserialize() {
        let raw: RawNodeRow = row?;
        let valid_from = parse_bound(&raw.valid_from, VALID_FROM_MIN, "node", &raw.id)?;
        let valid_to = parse_bound(&raw.valid_to, VALID_TO_MAX, "node", &raw.id)?;
        nodes.push(NodeRecord {
            entity_type: EntityType::from_str(&raw.entity_type)?,
            id: raw.id,
            valid_from,
            valid_to,
            is_dead: raw.is_dead.unwrap_or(0) != 0,
        });
    }
    info!(count = nodes.len(), path = %path.display(), "loaded node CSV");
    Ok(nodes)
}

/// Load edge records from a CSV file with headers
/// `source_id,target_id,relation_type,weight,valid_from,valid_to,imputed`.
pub fn load_edges_csv(path: &Path) -> Result<Vec<EdgeRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut edges = Vec::new();
    for row in reader.deserialize() {
        let raw: RawEdgeRow = row?;
        let describe = format!("{}->{}", raw.source_id, raw.target_id);
        let valid_from = parse_bound(&raw.valid_from, VALID_FROM_MIN, "edge", &describe)?;
        let valid_to = parse_bound(&raw.valid_to, VALID_TO_MAX, "edge", &describe)?;
        edges.push(EdgeRecord {
            source_id: raw.source_id,
            target_id: raw.target_id,
            relation_type: RelationType::from_str(&raw.relation_type)?,
            weight: raw.weight.unwrap_or(1.0),
            valid_from,
            valid_to,
            imputed: raw.imputed.unwrap_or(0) != 0,
        });
    }
    info!(count = edges.len(), path = %path.display(), "loaded edge CSV");
    Ok(edges)
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-process store with the same projection semantics as the SQLite store.
/// `transient_failures` makes the first N queries fail retryably, which is
/// how the retry/backoff path gets exercised without a real flaky database.
#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
    transient_failures: AtomicU32,
}

impl MemoryGraphStore {
    pub fn new(nodes: Vec<NodeRecord>, edges: Vec<EdgeRecord>) -> Self {
        MemoryGraphStore {
            nodes,
            edges,
            transient_failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` projection calls with a transient error.
    pub fn fail_next(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }
}

impl GraphStore for MemoryGraphStore {
    fn project(&self, query: &ProjectionQuery) -> Result<ProjectionResult> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .transient_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(PipelineError::transient("injected store failure"));
        }

        let mut nodes: Vec<NodeRecord> = self
            .nodes
            .iter()
            .filter(|n| query.node_types.contains(&n.entity_type))
            .filter(|n| n.is_alive_in(query.window_start, query.window_end))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<EdgeRecord> = self
            .edges
            .iter()
            .filter(|e| query.relation_types.contains(&e.relation_type))
            .filter(|e| e.is_active_in(query.window_start, query.window_end))
            .filter(|e| query.include_imputed || !e.imputed)
            .cloned()
            .collect();
        edges.sort_by(|a, b| {
            (&a.source_id, &a.target_id, a.relation_type)
                .cmp(&(&b.source_id, &b.target_id, b.relation_type))
        });

        Ok(ProjectionResult { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeRecord, NodeRecord};

    fn query(start: i64, end: i64) -> ProjectionQuery {
        ProjectionQuery {
            node_types: EntityType::ALL.to_vec(),
            relation_types: RelationType::ALL.to_vec(),
            window_start: start,
            window_end: end,
            include_imputed: true,
            read_concurrency: 1,
        }
    }

    fn sample_store() -> MemoryGraphStore {
        MemoryGraphStore::new(
            vec![
                NodeRecord::new("bank-a", EntityType::Bank).with_validity(0, 1000),
                NodeRecord::new("bank-b", EntityType::Bank).with_validity(0, 500),
                NodeRecord::new("person-p", EntityType::Person),
            ],
            vec![
                EdgeRecord::new("bank-a", "bank-b", RelationType::Ownership)
                    .with_weight(10.0)
                    .with_validity(0, 500),
                EdgeRecord::new("person-p", "person-p2", RelationType::Family).imputed(),
            ],
        )
    }

    #[test]
    fn test_memory_projection_filters_window() {
        let store = sample_store();
        let result = store.project(&query(600, 900)).unwrap();
        // bank-b expired at 500; the ownership edge with it too.
        assert_eq!(
            result.nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            vec!["bank-a", "person-p"]
        );
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].relation_type, RelationType::Family);
    }

    #[test]
    fn test_memory_projection_imputed_filter() {
        let store = sample_store();
        let mut q = query(0, 100);
        q.include_imputed = false;
        let result = store.project(&q).unwrap();
        assert!(result.edges.iter().all(|e| !e.imputed));
    }

    #[test]
    fn test_memory_projection_type_filter() {
        let store = sample_store();
        let mut q = query(0, 100);
        q.node_types = vec![EntityType::Person];
        q.relation_types = vec![RelationType::Family];
        let result = store.project(&q).unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].id, "person-p");
        assert_eq!(result.edges.len(), 1);
    }

    #[test]
    fn test_injected_failures_then_recover() {
        let store = sample_store().fail_next(2);
        assert!(store.project(&query(0, 100)).unwrap_err().is_transient());
        assert!(store.project(&query(0, 100)).unwrap_err().is_transient());
        assert!(store.project(&query(0, 100)).is_ok());
    }

    #[test]
    fn test_sqlite_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store = SqliteGraphStore::create(&path).unwrap();

        store
            .ingest_nodes(&[
                NodeRecord::new("bank-a", EntityType::Bank).with_validity(0, 1000),
                NodeRecord::new("bank-b", EntityType::Bank).with_validity(0, 500).dead(),
            ])
            .unwrap();
        store
            .ingest_edges(&[EdgeRecord::new("bank-a", "bank-b", RelationType::Ownership)
                .with_weight(10.0)
                .with_validity(0, 500)])
            .unwrap();

        assert_eq!(store.node_count().unwrap(), 2);
        assert_eq!(store.edge_count().unwrap(), 1);

        let result = store.project(&query(0, 400)).unwrap();
        assert_eq!(result.nodes.len(), 2);
        assert!(result.nodes.iter().any(|n| n.id == "bank-b" && n.is_dead));
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].weight, 10.0);

        // Past bank-b's validity the edge disappears with it.
        let later = store.project(&query(600, 900)).unwrap();
        assert_eq!(later.nodes.len(), 1);
        assert_eq!(later.edges.len(), 0);
    }

    #[test]
    fn test_csv_ingestion() {
        let dir = tempfile::tempdir().unwrap();
        let nodes_path = dir.path().join("nodes.csv");
        std::fs::write(
            &nodes_path,
            "id,entity_type,valid_from,valid_to,is_dead\n\
             bank-a,Bank,2010-01-01,2015-06-30,1\n\
             person-p,Person,,,0\n",
        )
        .unwrap();

        let nodes = load_nodes_csv(&nodes_path).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].is_dead);
        assert!(nodes[0].valid_from > 0);
        assert_eq!(nodes[1].valid_from, VALID_FROM_MIN);
        assert_eq!(nodes[1].valid_to, VALID_TO_MAX);

        let edges_path = dir.path().join("edges.csv");
        std::fs::write(
            &edges_path,
            "source_id,target_id,relation_type,weight,valid_from,valid_to,imputed\n\
             bank-a,company-c,OWNERSHIP,25.5,2010-01-01,2012-12-31,0\n\
             person-p,person-q,FAMILY,,,,1\n",
        )
        .unwrap();

        let edges = load_edges_csv(&edges_path).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].weight, 25.5);
        assert_eq!(edges[1].weight, 1.0);
        assert!(edges[1].imputed);
    }

    #[test]
    fn test_csv_rejects_unknown_relation_type() {
        let dir = tempfile::tempdir().unwrap();
        let edges_path = dir.path().join("edges.csv");
        std::fs::write(
            &edges_path,
            "source_id,target_id,relation_type,weight,valid_from,valid_to,imputed\n\
             a,b,FRIENDSHIP,1.0,,,0\n",
        )
        .unwrap();
        let err = load_edges_csv(&edges_path).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity { .. }));
    }
}
