//! SQLite-backed hypergraph store.
//!
//! Consistency model: one writer at a time per store (the connection mutex),
//! atomic in-SQL access-count increments, and reads that never observe a
//! partially written node. Guarded updates enforce the node invariants: ids
//! are stable, tier transitions are monotone, confidence is clamped, the
//! access counter never decreases, and session summaries are read-only.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::schema::{initialize_schema, is_initialized};
use crate::memory::types::*;

/// SQLite-backed hypergraph memory store.
pub struct HypergraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl HypergraphStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::MemoryStorage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing and ephemeral sessions).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::MemoryStorage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))
    }

    // ==================== Node Operations ====================

    /// Create a node. Confidence is clamped on the way in.
    pub fn create_node(&self, node: &Node) -> Result<()> {
        let confidence = node.confidence.clamp(0.0, 1.0);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO nodes (
                    id, node_type, subtype, content, tier, confidence, access_count,
                    created_at, updated_at, last_accessed, metadata, embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    node.id.as_str(),
                    node.node_type.to_string(),
                    node.subtype,
                    node.content,
                    node.tier as i32,
                    confidence,
                    node.access_count as i64,
                    node.created_at.to_rfc3339(),
                    node.updated_at.to_rfc3339(),
                    node.last_accessed.to_rfc3339(),
                    metadata_json(&node.metadata),
                    embedding_blob(&node.embedding),
                ],
            )?;
            Ok(())
        })
    }

    /// Get a node by id.
    pub fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS),
                params![id.as_str()],
                |row| row_to_node(row),
            )
            .optional()
        })
    }

    /// Update a node under the store's invariants.
    ///
    /// Rejected: unknown ids, tier downgrades, and any update to a session
    /// summary. Confidence is clamped and the access counter can only grow.
    pub fn update_node(&self, node: &Node) -> Result<()> {
        let existing = self
            .get_node(&node.id)?
            .ok_or_else(|| Error::NotFound(format!("node {}", node.id)))?;

        if existing.is_session_summary() {
            return Err(Error::PermissionDenied(format!(
                "session summary {} is read-only",
                node.id
            )));
        }
        if node.tier < existing.tier {
            return Err(Error::InvalidArgument(format!(
                "tier transition {} -> {} is not monotone",
                existing.tier, node.tier
            )));
        }

        let confidence = node.confidence.clamp(0.0, 1.0);
        let access_count = node.access_count.max(existing.access_count);
        let updated_at = Utc::now();

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE nodes SET
                    subtype = ?2, content = ?3, tier = ?4, confidence = ?5,
                    access_count = ?6, updated_at = ?7, last_accessed = ?8,
                    metadata = ?9, embedding = ?10
                 WHERE id = ?1",
                params![
                    node.id.as_str(),
                    node.subtype,
                    node.content,
                    node.tier as i32,
                    confidence,
                    access_count as i64,
                    updated_at.to_rfc3339(),
                    node.last_accessed.to_rfc3339(),
                    metadata_json(&node.metadata),
                    embedding_blob(&node.embedding),
                ],
            )?;
            Ok(())
        })
    }

    /// Delete a node; memberships cascade. Returns whether a row was removed.
    pub fn delete_node(&self, id: &NodeId) -> Result<bool> {
        let removed = self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM nodes WHERE id = ?1", params![id.as_str()])?;
            Ok(rows > 0)
        })?;
        if removed {
            self.prune_orphan_edges()?;
        }
        Ok(removed)
    }

    /// List nodes matching a filter, most recently accessed first.
    pub fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {} FROM nodes WHERE 1=1", NODE_COLUMNS);
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref types) = filter.types {
                let placeholders: Vec<String> = types.iter().map(|_| "?".to_string()).collect();
                sql.push_str(&format!(" AND node_type IN ({})", placeholders.join(",")));
                for t in types {
                    params_vec.push(Box::new(t.to_string()));
                }
            }

            if let Some(ref subtypes) = filter.subtypes {
                let placeholders: Vec<String> = subtypes.iter().map(|_| "?".to_string()).collect();
                sql.push_str(&format!(" AND subtype IN ({})", placeholders.join(",")));
                for s in subtypes {
                    params_vec.push(Box::new(s.clone()));
                }
            }

            if let Some(ref tiers) = filter.tiers {
                let placeholders: Vec<String> = tiers.iter().map(|_| "?".to_string()).collect();
                sql.push_str(&format!(" AND tier IN ({})", placeholders.join(",")));
                for t in tiers {
                    params_vec.push(Box::new(*t as i32));
                }
            }

            if let Some(min_conf) = filter.min_confidence {
                sql.push_str(" AND confidence >= ?");
                params_vec.push(Box::new(min_conf));
            }

            sql.push_str(" ORDER BY COALESCE(last_accessed, updated_at) DESC");

            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let nodes = stmt
                .query_map(params_refs.as_slice(), |row| row_to_node(row))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(nodes)
        })
    }

    /// Case-insensitive substring search over content.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<Node>> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {} FROM nodes WHERE LOWER(content) LIKE ?",
                NODE_COLUMNS
            );
            let pattern = format!("%{}%", query.to_lowercase());
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(pattern)];

            if let Some(ref types) = options.types {
                let placeholders: Vec<String> = types.iter().map(|_| "?".to_string()).collect();
                sql.push_str(&format!(" AND node_type IN ({})", placeholders.join(",")));
                for t in types {
                    params_vec.push(Box::new(t.to_string()));
                }
            }

            if let Some(ref tiers) = options.tiers {
                let placeholders: Vec<String> = tiers.iter().map(|_| "?".to_string()).collect();
                sql.push_str(&format!(" AND tier IN ({})", placeholders.join(",")));
                for t in tiers {
                    params_vec.push(Box::new(*t as i32));
                }
            }

            sql.push_str(" ORDER BY COALESCE(last_accessed, updated_at) DESC");
            sql.push_str(&format!(" LIMIT {}", options.limit.unwrap_or(50)));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let nodes = stmt
                .query_map(params_refs.as_slice(), |row| row_to_node(row))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(nodes)
        })
    }

    /// Full-text search over content via the FTS5 index.
    ///
    /// Callers may prefer this over [`search`](Self::search) for multi-word
    /// queries; plain LIKE remains the default contract.
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<Node>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM nodes n
                 JOIN nodes_fts fts ON n.rowid = fts.rowid
                 WHERE nodes_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                NODE_COLUMNS_QUALIFIED
            ))?;

            let nodes = stmt
                .query_map(params![query, limit as i64], |row| row_to_node(row))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(nodes)
        })
    }

    /// Nodes ordered by effective access timestamp descending.
    pub fn recent_nodes(&self, limit: usize, tiers: Option<&[Tier]>) -> Result<Vec<Node>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {} FROM nodes WHERE 1=1", NODE_COLUMNS);
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(tiers) = tiers {
                let placeholders: Vec<String> = tiers.iter().map(|_| "?".to_string()).collect();
                sql.push_str(&format!(" AND tier IN ({})", placeholders.join(",")));
                for t in tiers {
                    params_vec.push(Box::new(*t as i32));
                }
            }

            sql.push_str(" ORDER BY COALESCE(last_accessed, updated_at) DESC");
            sql.push_str(&format!(" LIMIT {}", limit));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let nodes = stmt
                .query_map(params_refs.as_slice(), |row| row_to_node(row))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(nodes)
        })
    }

    /// Atomically bump a node's access counter and access timestamp.
    ///
    /// A single SQL UPDATE keeps concurrent increments commutative; frames
    /// racing on the same node both land.
    pub fn increment_access(&self, id: &NodeId) -> Result<()> {
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE nodes
                 SET access_count = access_count + 1, last_accessed = ?2
                 WHERE id = ?1",
                params![id.as_str(), Utc::now().to_rfc3339()],
            )
        })?;
        if updated == 0 {
            return Err(Error::NotFound(format!("node {}", id)));
        }
        Ok(())
    }

    // ==================== Edge Operations ====================

    /// Create a hyperedge with its memberships. Arity must be >= 1 and every
    /// member node must exist.
    pub fn create_hyperedge(&self, edge: &Hyperedge) -> Result<()> {
        if edge.members.is_empty() {
            return Err(Error::InvalidArgument(
                "hyperedge must have at least one member".into(),
            ));
        }
        for member in &edge.members {
            if self.get_node(&member.node_id)?.is_none() {
                return Err(Error::NotFound(format!(
                    "member node {} for edge {}",
                    member.node_id, edge.id
                )));
            }
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO hyperedges (id, edge_type, created_at, updated_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    edge.id.as_str(),
                    edge.edge_type,
                    edge.created_at.to_rfc3339(),
                    edge.updated_at.to_rfc3339(),
                    metadata_json(&edge.metadata),
                ],
            )?;

            for member in &edge.members {
                conn.execute(
                    "INSERT INTO membership (hyperedge_id, node_id, role, position)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        edge.id.as_str(),
                        member.node_id.as_str(),
                        member.role,
                        member.position,
                    ],
                )?;
            }

            Ok(())
        })
    }

    /// Get a hyperedge with its memberships.
    pub fn get_hyperedge(&self, id: &EdgeId) -> Result<Option<Hyperedge>> {
        self.with_conn(|conn| get_edge_internal(conn, id.as_str()))
    }

    /// Edges that include the given node.
    pub fn edges_for_node(&self, node_id: &NodeId) -> Result<Vec<Hyperedge>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT hyperedge_id FROM membership WHERE node_id = ?1",
            )?;
            let edge_ids: Vec<String> = stmt
                .query_map(params![node_id.as_str()], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();

            let mut edges = Vec::new();
            for edge_id in edge_ids {
                if let Some(edge) = get_edge_internal(conn, &edge_id)? {
                    edges.push(edge);
                }
            }
            Ok(edges)
        })
    }

    /// Delete a hyperedge. Returns whether a row was removed.
    pub fn delete_hyperedge(&self, id: &EdgeId) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM hyperedges WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok(rows > 0)
        })
    }

    /// Batched subgraph extraction: one round-trip per entity class.
    ///
    /// Fetches the requested nodes, every membership touching them, and the
    /// complete member lists of the edges involved, avoiding per-id queries.
    pub fn get_subgraph(&self, ids: &[NodeId]) -> Result<Subgraph> {
        if ids.is_empty() {
            return Ok(Subgraph::default());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = ids.iter().map(|_| "?".to_string()).collect();
            let id_strings: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
            let params_refs: Vec<&dyn rusqlite::ToSql> = id_strings
                .iter()
                .map(|s| s as &dyn rusqlite::ToSql)
                .collect();

            // Nodes in one IN (...) query
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM nodes WHERE id IN ({})",
                NODE_COLUMNS,
                placeholders.join(",")
            ))?;
            let nodes: Vec<Node> = stmt
                .query_map(params_refs.as_slice(), |row| row_to_node(row))?
                .filter_map(|r| r.ok())
                .collect();

            // Edge ids touching any requested node, one IN (...) query
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT hyperedge_id FROM membership WHERE node_id IN ({})",
                placeholders.join(",")
            ))?;
            let edge_ids: Vec<String> = stmt
                .query_map(params_refs.as_slice(), |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();

            if edge_ids.is_empty() {
                return Ok(Subgraph {
                    nodes,
                    edges: Vec::new(),
                });
            }

            // Edges and all their memberships, one IN (...) query each
            let edge_placeholders: Vec<String> =
                edge_ids.iter().map(|_| "?".to_string()).collect();
            let edge_params: Vec<&dyn rusqlite::ToSql> = edge_ids
                .iter()
                .map(|s| s as &dyn rusqlite::ToSql)
                .collect();

            let mut stmt = conn.prepare(&format!(
                "SELECT id, edge_type, created_at, updated_at, metadata
                 FROM hyperedges WHERE id IN ({})",
                edge_placeholders.join(",")
            ))?;
            let mut edges_by_id: HashMap<String, Hyperedge> = stmt
                .query_map(edge_params.as_slice(), |row| row_to_edge(row))?
                .filter_map(|r| r.ok())
                .map(|e| (e.id.as_str().to_string(), e))
                .collect();

            let mut stmt = conn.prepare(&format!(
                "SELECT hyperedge_id, node_id, role, position
                 FROM membership WHERE hyperedge_id IN ({})
                 ORDER BY hyperedge_id, position",
                edge_placeholders.join(",")
            ))?;
            let memberships = stmt.query_map(edge_params.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                ))
            })?;

            for row in memberships.filter_map(|r| r.ok()) {
                let (edge_id, node_id, role, position) = row;
                if let Some(edge) = edges_by_id.get_mut(&edge_id) {
                    edge.members.push(Membership {
                        node_id: NodeId::parse_sql(&node_id),
                        role,
                        position,
                    });
                }
            }

            let mut edges: Vec<Hyperedge> = edges_by_id.into_values().collect();
            edges.sort_by(|a, b| a.created_at.cmp(&b.created_at));

            Ok(Subgraph { nodes, edges })
        })
    }

    /// Bounded breadth-first neighborhood expansion from a start node.
    ///
    /// Hyperedges may form cycles; the visited set bounds the walk and
    /// revisits are skipped, so the traversal always terminates.
    pub fn neighborhood(&self, start: &NodeId, max_nodes: usize) -> Result<Vec<Node>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut result = Vec::new();

        queue.push_back(start.clone());
        visited.insert(start.as_str().to_string());

        while let Some(current) = queue.pop_front() {
            if result.len() >= max_nodes {
                break;
            }
            let Some(node) = self.get_node(&current)? else {
                continue;
            };
            result.push(node);

            for edge in self.edges_for_node(&current)? {
                for member in &edge.members {
                    if visited.len() >= max_nodes * 4 {
                        // Visited-set bound for dense cyclic graphs.
                        warn!(start = %start, "neighborhood visited-set bound hit");
                        return Ok(result);
                    }
                    if visited.insert(member.node_id.as_str().to_string()) {
                        queue.push_back(member.node_id.clone());
                    }
                }
            }
        }

        Ok(result)
    }

    /// Remove hyperedges that lost all memberships (cascade leftovers).
    pub fn prune_orphan_edges(&self) -> Result<usize> {
        let pruned = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM hyperedges
                 WHERE id NOT IN (SELECT DISTINCT hyperedge_id FROM membership)",
                [],
            )
        })?;
        if pruned > 0 {
            debug!(pruned, "removed orphan hyperedges");
        }
        Ok(pruned)
    }

    // ==================== Stats ====================

    /// Counts by type and tier, plus total hyperedges.
    pub fn stats(&self) -> Result<MemoryStats> {
        self.with_conn(|conn| {
            let total_nodes: i64 =
                conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;

            let nodes_by_type: HashMap<String, u64> = {
                let mut stmt =
                    conn.prepare("SELECT node_type, COUNT(*) FROM nodes GROUP BY node_type")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?;
                rows.filter_map(|r| r.ok()).collect()
            };

            let nodes_by_tier: HashMap<String, u64> = {
                let mut stmt = conn.prepare("SELECT tier, COUNT(*) FROM nodes GROUP BY tier")?;
                let rows = stmt.query_map([], |row| {
                    let tier = Tier::from_i32(row.get::<_, i32>(0)?);
                    Ok((tier.to_string(), row.get::<_, i64>(1)? as u64))
                })?;
                rows.filter_map(|r| r.ok()).collect()
            };

            let total_hyperedges: i64 =
                conn.query_row("SELECT COUNT(*) FROM hyperedges", [], |row| row.get(0))?;

            Ok(MemoryStats {
                total_nodes: total_nodes as u64,
                nodes_by_type,
                nodes_by_tier,
                total_hyperedges: total_hyperedges as u64,
            })
        })
    }
}

const NODE_COLUMNS: &str = "id, node_type, subtype, content, tier, confidence, access_count,
     created_at, updated_at, last_accessed, metadata, embedding";

const NODE_COLUMNS_QUALIFIED: &str =
    "n.id, n.node_type, n.subtype, n.content, n.tier, n.confidence, n.access_count,
     n.created_at, n.updated_at, n.last_accessed, n.metadata, n.embedding";

fn metadata_json(metadata: &Option<HashMap<String, Value>>) -> Option<String> {
    metadata
        .as_ref()
        .map(|m| serde_json::to_string(m).unwrap_or_default())
}

fn embedding_blob(embedding: &Option<Vec<f32>>) -> Option<Vec<u8>> {
    embedding
        .as_ref()
        .map(|e| e.iter().flat_map(|f| f.to_le_bytes()).collect())
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let embedding: Option<Vec<f32>> = row.get::<_, Option<Vec<u8>>>(11)?.map(|bytes| {
        bytes
            .chunks(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
                f32::from_le_bytes(arr)
            })
            .collect()
    });

    let metadata: Option<HashMap<String, Value>> = row
        .get::<_, Option<String>>(10)?
        .and_then(|s| serde_json::from_str(&s).ok());

    Ok(Node {
        id: NodeId::parse_sql(&row.get::<_, String>(0)?),
        node_type: NodeType::parse_lossy(&row.get::<_, String>(1)?),
        subtype: row.get(2)?,
        content: row.get(3)?,
        tier: Tier::from_i32(row.get(4)?),
        confidence: row.get(5)?,
        access_count: row.get::<_, i64>(6)? as u64,
        created_at: parse_datetime(row.get::<_, String>(7)?),
        updated_at: parse_datetime(row.get::<_, String>(8)?),
        last_accessed: parse_datetime(row.get::<_, Option<String>>(9)?.unwrap_or_default()),
        metadata,
        embedding,
    })
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Hyperedge> {
    let metadata: Option<HashMap<String, Value>> = row
        .get::<_, Option<String>>(4)?
        .and_then(|s| serde_json::from_str(&s).ok());

    Ok(Hyperedge {
        id: EdgeId::parse_sql(&row.get::<_, String>(0)?),
        edge_type: row.get(1)?,
        members: Vec::new(),
        created_at: parse_datetime(row.get::<_, String>(2)?),
        updated_at: parse_datetime(row.get::<_, String>(3)?),
        metadata,
    })
}

fn get_edge_internal(conn: &Connection, edge_id: &str) -> rusqlite::Result<Option<Hyperedge>> {
    let edge_opt = conn
        .query_row(
            "SELECT id, edge_type, created_at, updated_at, metadata
             FROM hyperedges WHERE id = ?1",
            params![edge_id],
            |row| row_to_edge(row),
        )
        .optional()?;

    let Some(mut edge) = edge_opt else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT node_id, role, position FROM membership
         WHERE hyperedge_id = ?1 ORDER BY position",
    )?;
    edge.members = stmt
        .query_map(params![edge_id], |row| {
            Ok(Membership {
                node_id: NodeId::parse_sql(&row.get::<_, String>(0)?),
                role: row.get(1)?,
                position: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Some(edge))
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_and_get_node_round_trip() {
        let store = HypergraphStore::in_memory().unwrap();
        let node = Node::new(NodeType::Fact, "Users authenticate via JWT")
            .with_confidence(0.9)
            .with_metadata("source", "auth.rs")
            .with_embedding(vec![0.5, -1.25, 3.0]);

        store.create_node(&node).unwrap();
        let retrieved = store.get_node(&node.id).unwrap().unwrap();

        assert_eq!(retrieved.id, node.id);
        assert_eq!(retrieved.content, node.content);
        assert_eq!(retrieved.node_type, NodeType::Fact);
        assert_eq!(retrieved.confidence, 0.9);
        assert_eq!(retrieved.embedding, Some(vec![0.5, -1.25, 3.0]));
        assert_eq!(
            retrieved.metadata.unwrap().get("source"),
            Some(&serde_json::json!("auth.rs"))
        );
    }

    #[test]
    fn test_confidence_clamped_on_create() {
        let store = HypergraphStore::in_memory().unwrap();
        let mut node = Node::new(NodeType::Fact, "f");
        node.confidence = 3.5;
        store.create_node(&node).unwrap();
        assert_eq!(store.get_node(&node.id).unwrap().unwrap().confidence, 1.0);
    }

    #[test]
    fn test_update_rejects_tier_downgrade() {
        let store = HypergraphStore::in_memory().unwrap();
        let node = Node::new(NodeType::Fact, "f").with_tier(Tier::Session);
        store.create_node(&node).unwrap();

        let downgraded = node.clone().with_tier(Tier::Task);
        assert!(store.update_node(&downgraded).is_err());

        let upgraded = node.clone().with_tier(Tier::LongTerm);
        store.update_node(&upgraded).unwrap();
        assert_eq!(store.get_node(&node.id).unwrap().unwrap().tier, Tier::LongTerm);
    }

    #[test]
    fn test_update_rejects_session_summary() {
        let store = HypergraphStore::in_memory().unwrap();
        let node = Node::new(NodeType::Experience, "summary")
            .with_subtype(SUBTYPE_SESSION_SUMMARY)
            .with_tier(Tier::LongTerm);
        store.create_node(&node).unwrap();

        let mut changed = node.clone();
        changed.content = "rewritten".into();
        let err = store.update_node(&changed).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_update_keeps_access_count_monotone() {
        let store = HypergraphStore::in_memory().unwrap();
        let node = Node::new(NodeType::Fact, "f");
        store.create_node(&node).unwrap();
        store.increment_access(&node.id).unwrap();
        store.increment_access(&node.id).unwrap();

        // Stale in-memory copy with access_count 0 must not roll back.
        store.update_node(&node).unwrap();
        assert_eq!(store.get_node(&node.id).unwrap().unwrap().access_count, 2);
    }

    #[test]
    fn test_increment_access_by_k() {
        let store = HypergraphStore::in_memory().unwrap();
        let node = Node::new(NodeType::Fact, "f");
        store.create_node(&node).unwrap();

        for _ in 0..5 {
            store.increment_access(&node.id).unwrap();
        }
        assert_eq!(store.get_node(&node.id).unwrap().unwrap().access_count, 5);
    }

    #[test]
    fn test_increment_access_unknown_node() {
        let store = HypergraphStore::in_memory().unwrap();
        assert!(store.increment_access(&NodeId::new()).is_err());
    }

    #[test]
    fn test_list_nodes_filters() {
        let store = HypergraphStore::in_memory().unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "f1").with_confidence(0.9))
            .unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "f2").with_confidence(0.2))
            .unwrap();
        store
            .create_node(&Node::new(NodeType::Entity, "e1").with_tier(Tier::Session))
            .unwrap();

        let facts = store
            .list_nodes(&NodeFilter::new().types(vec![NodeType::Fact]))
            .unwrap();
        assert_eq!(facts.len(), 2);

        let confident = store
            .list_nodes(&NodeFilter::new().min_confidence(0.5))
            .unwrap();
        assert_eq!(confident.len(), 2);

        let session = store
            .list_nodes(&NodeFilter::new().tiers(vec![Tier::Session]))
            .unwrap();
        assert_eq!(session.len(), 1);
        assert_eq!(session[0].content, "e1");

        let limited = store.list_nodes(&NodeFilter::new().limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_search_case_insensitive_substring() {
        let store = HypergraphStore::in_memory().unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "The auth system uses JWT"))
            .unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "Database is PostgreSQL"))
            .unwrap();

        let hits = store.search("AUTH", &SearchOptions::new()).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("auth"));
    }

    #[test]
    fn test_search_respects_type_and_tier_filters() {
        let store = HypergraphStore::in_memory().unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "auth fact"))
            .unwrap();
        store
            .create_node(&Node::new(NodeType::Snippet, "auth snippet").with_tier(Tier::Session))
            .unwrap();

        let hits = store
            .search(
                "auth",
                &SearchOptions::new().types(vec![NodeType::Snippet]),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_type, NodeType::Snippet);

        let hits = store
            .search("auth", &SearchOptions::new().tiers(vec![Tier::Task]))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_type, NodeType::Fact);
    }

    #[test]
    fn test_fts_search() {
        let store = HypergraphStore::in_memory().unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "authentication uses tokens"))
            .unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "storage uses sqlite"))
            .unwrap();

        let hits = store.search_fts("authentication", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_recent_nodes_ordering() {
        let store = HypergraphStore::in_memory().unwrap();
        let old = Node::new(NodeType::Fact, "old");
        let fresh = Node::new(NodeType::Fact, "fresh");
        store.create_node(&old).unwrap();
        store.create_node(&fresh).unwrap();

        store.increment_access(&old.id).unwrap();
        let recent = store.recent_nodes(10, None).unwrap();
        assert_eq!(recent[0].content, "old");

        store.increment_access(&fresh.id).unwrap();
        let recent = store.recent_nodes(10, None).unwrap();
        assert_eq!(recent[0].content, "fresh");
    }

    #[test]
    fn test_hyperedge_round_trip() {
        let store = HypergraphStore::in_memory().unwrap();
        let a = Node::new(NodeType::Entity, "User");
        let b = Node::new(NodeType::Entity, "Session");
        store.create_node(&a).unwrap();
        store.create_node(&b).unwrap();

        let edge = Hyperedge::binary("has", a.id.clone(), "owner", b.id.clone(), "owned");
        store.create_hyperedge(&edge).unwrap();

        let loaded = store.get_hyperedge(&edge.id).unwrap().unwrap();
        assert_eq!(loaded.edge_type, "has");
        assert_eq!(loaded.members.len(), 2);
        assert_eq!(loaded.members[0].role, "owner");

        let edges = store.edges_for_node(&a.id).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_hyperedge_requires_members() {
        let store = HypergraphStore::in_memory().unwrap();
        let edge = Hyperedge::new("empty", vec![]);
        assert!(store.create_hyperedge(&edge).is_err());
    }

    #[test]
    fn test_hyperedge_requires_existing_nodes() {
        let store = HypergraphStore::in_memory().unwrap();
        let edge = Hyperedge::new("rel", vec![(NodeId::new(), "ghost".to_string())]);
        assert!(matches!(
            store.create_hyperedge(&edge).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_delete_node_cascades_and_prunes_edges() {
        let store = HypergraphStore::in_memory().unwrap();
        let a = Node::new(NodeType::Entity, "A");
        let b = Node::new(NodeType::Entity, "B");
        store.create_node(&a).unwrap();
        store.create_node(&b).unwrap();

        let edge = Hyperedge::binary("rel", a.id.clone(), "x", b.id.clone(), "y");
        store.create_hyperedge(&edge).unwrap();

        store.delete_node(&a.id).unwrap();
        store.delete_node(&b.id).unwrap();

        // With every membership gone the edge is garbage and was pruned.
        assert!(store.get_hyperedge(&edge.id).unwrap().is_none());
    }

    #[test]
    fn test_subgraph_batch_fetch() {
        let store = HypergraphStore::in_memory().unwrap();
        let nodes: Vec<Node> = (0..4)
            .map(|i| Node::new(NodeType::Entity, format!("n{}", i)))
            .collect();
        for n in &nodes {
            store.create_node(n).unwrap();
        }

        let e1 = Hyperedge::binary("rel", nodes[0].id.clone(), "a", nodes[1].id.clone(), "b");
        let e2 = Hyperedge::new(
            "tri",
            vec![
                (nodes[1].id.clone(), "x".to_string()),
                (nodes[2].id.clone(), "y".to_string()),
                (nodes[3].id.clone(), "z".to_string()),
            ],
        );
        store.create_hyperedge(&e1).unwrap();
        store.create_hyperedge(&e2).unwrap();

        let subgraph = store
            .get_subgraph(&[nodes[0].id.clone(), nodes[1].id.clone()])
            .unwrap();
        assert_eq!(subgraph.nodes.len(), 2);
        assert_eq!(subgraph.edges.len(), 2);
        // The triangle edge's full member list came along.
        let tri = subgraph.edges.iter().find(|e| e.edge_type == "tri").unwrap();
        assert_eq!(tri.members.len(), 3);
    }

    #[test]
    fn test_neighborhood_bounded_on_cycle() {
        let store = HypergraphStore::in_memory().unwrap();
        let a = Node::new(NodeType::Entity, "A");
        let b = Node::new(NodeType::Entity, "B");
        let c = Node::new(NodeType::Entity, "C");
        for n in [&a, &b, &c] {
            store.create_node(n).unwrap();
        }
        // a -> b -> c -> a forms a cycle.
        store
            .create_hyperedge(&Hyperedge::binary(
                "next",
                a.id.clone(),
                "from",
                b.id.clone(),
                "to",
            ))
            .unwrap();
        store
            .create_hyperedge(&Hyperedge::binary(
                "next",
                b.id.clone(),
                "from",
                c.id.clone(),
                "to",
            ))
            .unwrap();
        store
            .create_hyperedge(&Hyperedge::binary(
                "next",
                c.id.clone(),
                "from",
                a.id.clone(),
                "to",
            ))
            .unwrap();

        let walked = store.neighborhood(&a.id, 10).unwrap();
        assert_eq!(walked.len(), 3);
    }

    #[test]
    fn test_stats() {
        let store = HypergraphStore::in_memory().unwrap();
        store.create_node(&Node::new(NodeType::Fact, "f1")).unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "f2").with_tier(Tier::Session))
            .unwrap();
        store.create_node(&Node::new(NodeType::Entity, "e1")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.nodes_by_type.get("fact"), Some(&2));
        assert_eq!(stats.nodes_by_tier.get("session"), Some(&1));
        assert_eq!(stats.total_hyperedges, 0);
    }

    #[test]
    fn test_on_disk_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let node = Node::new(NodeType::Fact, "persisted");

        {
            let store = HypergraphStore::open(&path).unwrap();
            store.create_node(&node).unwrap();
        }

        let store = HypergraphStore::open(&path).unwrap();
        let loaded = store.get_node(&node.id).unwrap().unwrap();
        assert_eq!(loaded.content, "persisted");
    }
}
