//! SQLite property-graph store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use kgrag_core::graph::Properties;
use kgrag_core::{GraphEdge, GraphNode, GraphView, Neighbor, RagError, Result};

/// Nodes and edges persisted in SQLite.
///
/// Edge ids are assigned by the store. Edges are treated as undirected for
/// lookups but keep the direction they were first inserted with.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create a graph database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| RagError::Storage(e.to_string()))?;
        debug!(path = %path.display(), "opened graph store");
        Self::with_connection(conn)
    }

    /// Create an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| RagError::Storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                labels TEXT NOT NULL DEFAULT '[]',
                properties TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                edge_type TEXT NOT NULL,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                UNIQUE (source, target)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
            ",
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RagError::Storage("graph store connection poisoned".to_string()))
    }

    /// Insert or replace a node.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the write fails.
    pub fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        let labels = serde_json::to_string(&node.labels)?;
        let properties = serde_json::to_string(&node.properties)?;
        self.conn()?
            .execute(
                "INSERT INTO nodes (id, labels, properties) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    labels = excluded.labels,
                    properties = excluded.properties",
                params![node.id, labels, properties],
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Connect two existing nodes and return the edge id.
    ///
    /// If the pair is already connected in either direction the new
    /// properties are merged into the existing edge, whose id is returned.
    /// Returns `None` when either endpoint is missing.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the write fails.
    pub fn upsert_edge(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
        properties: &Properties,
    ) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RagError::Storage(e.to_string()))?;

        let present: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE id IN (?1, ?2)",
                params![source, target],
                |row| row.get(0),
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;
        let needed = if source == target { 1 } else { 2 };
        if present < needed {
            return Ok(None);
        }

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, properties FROM edges
                 WHERE (source = ?1 AND target = ?2) OR (source = ?2 AND target = ?1)
                 ORDER BY id LIMIT 1",
                params![source, target],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| RagError::Storage(e.to_string()))?;

        let id = match existing {
            Some((id, stored)) => {
                let mut merged: Properties = serde_json::from_str(&stored)?;
                merged.extend(properties.clone());
                tx.execute(
                    "UPDATE edges SET properties = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&merged)?, id],
                )
                .map_err(|e| RagError::Storage(e.to_string()))?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO edges (edge_type, source, target, properties)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![edge_type, source, target, serde_json::to_string(properties)?],
                )
                .map_err(|e| RagError::Storage(e.to_string()))?;
                tx.last_insert_rowid()
            }
        };

        tx.commit().map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(Some(id.to_string()))
    }

    /// Delete a node and every edge touching it. Returns whether the node
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the delete fails.
    pub fn remove_node(&self, node_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        tx.execute(
            "DELETE FROM edges WHERE source = ?1 OR target = ?1",
            params![node_id],
        )
        .map_err(|e| RagError::Storage(e.to_string()))?;
        let removed = tx
            .execute("DELETE FROM nodes WHERE id = ?1", params![node_id])
            .map_err(|e| RagError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(removed > 0)
    }

    /// Delete the edge between two nodes, whichever way it points.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the delete fails.
    pub fn remove_edge(&self, source: &str, target: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM edges
                 WHERE (source = ?1 AND target = ?2) OR (source = ?2 AND target = ?1)",
                params![source, target],
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(removed > 0)
    }

    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the query fails.
    pub fn node_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM nodes")
    }

    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the query fails.
    pub fn edge_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM edges")
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row(sql, [], |row| row.get(0))
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(count as u64)
    }
}

/// Raw JSON columns of a node row.
struct NodeRow {
    id: String,
    labels: String,
    properties: String,
}

impl NodeRow {
    fn into_node(self) -> Result<GraphNode> {
        Ok(GraphNode {
            id: self.id,
            labels: serde_json::from_str(&self.labels)?,
            properties: serde_json::from_str(&self.properties)?,
        })
    }
}

#[async_trait]
impl GraphView for SqliteGraphStore {
    async fn has_node(&self, node_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM nodes WHERE id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn has_edge(&self, source_id: &str, target_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM edges
                 WHERE (source = ?1 AND target = ?2) OR (source = ?2 AND target = ?1)
                 LIMIT 1",
                params![source_id, target_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn node_degree(&self, node_id: &str) -> Result<usize> {
        let degree: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM edges WHERE source = ?1 OR target = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(degree as usize)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, labels, properties FROM nodes WHERE id = ?1",
                params![node_id],
                |row| {
                    Ok(NodeRow {
                        id: row.get(0)?,
                        labels: row.get(1)?,
                        properties: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        row.map(NodeRow::into_node).transpose()
    }

    async fn get_edge(&self, source_id: &str, target_id: &str) -> Result<Option<GraphEdge>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, edge_type, source, target, properties FROM edges
                 WHERE (source = ?1 AND target = ?2) OR (source = ?2 AND target = ?1)
                 ORDER BY id LIMIT 1",
                params![source_id, target_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| RagError::Storage(e.to_string()))?;

        row.map(|(id, edge_type, source, target, properties)| -> Result<GraphEdge> {
            Ok(GraphEdge {
                id: id.to_string(),
                edge_type,
                source,
                target,
                properties: serde_json::from_str(&properties)?,
            })
        })
        .transpose()
    }

    async fn get_node_neighbors(&self, node_id: &str) -> Result<Vec<Neighbor>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.edge_type, e.source, e.target, e.properties,
                        n.id, n.labels, n.properties
                 FROM edges e
                 JOIN nodes n
                   ON n.id = CASE WHEN e.source = ?1 THEN e.target ELSE e.source END
                 WHERE e.source = ?1 OR e.target = ?1
                 ORDER BY e.id",
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![node_id], |row| {
                let edge_id: i64 = row.get(0)?;
                Ok((
                    edge_id,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    NodeRow {
                        id: row.get(5)?,
                        labels: row.get(6)?,
                        properties: row.get(7)?,
                    },
                ))
            })
            .map_err(|e| RagError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RagError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|(id, edge_type, source, target, properties, node)| -> Result<Neighbor> {
                Ok(Neighbor {
                    edge: GraphEdge {
                        id: id.to_string(),
                        edge_type,
                        source,
                        target,
                        properties: serde_json::from_str(&properties)?,
                    },
                    node: node.into_node()?,
                })
            })
            .collect()
    }

    async fn get_all_labels(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM nodes ORDER BY id")
            .map_err(|e| RagError::Storage(e.to_string()))?;
        let labels = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| RagError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(labels)
    }
}
