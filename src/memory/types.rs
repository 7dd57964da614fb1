//! Hypergraph memory value types: nodes, hyperedges, memberships, filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Reserved subtype for session summaries (read-only after creation).
pub const SUBTYPE_SESSION_SUMMARY: &str = "session_summary";
/// Reserved subtype for schema-evolution proposals.
pub const SUBTYPE_SCHEMA_PROPOSAL: &str = "schema_proposal";
/// Reserved subtype for orchestrator execution records.
pub const SUBTYPE_RLM_EXECUTION: &str = "rlm_execution";

/// Unique node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an id from its string form.
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        if s.is_empty() {
            return Err(crate::error::Error::InvalidArgument(
                "empty node id".into(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// The raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrate an id read back from storage.
    pub(crate) fn parse_sql(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique hyperedge identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(String);

impl EdgeId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an id from its string form.
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        if s.is_empty() {
            return Err(crate::error::Error::InvalidArgument(
                "empty edge id".into(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// The raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrate an id read back from storage.
    pub(crate) fn parse_sql(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of a memory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Fact,
    Entity,
    Snippet,
    Decision,
    Experience,
}

impl NodeType {
    /// All node types, for stats iteration.
    pub fn all() -> [NodeType; 5] {
        [
            Self::Fact,
            Self::Entity,
            Self::Snippet,
            Self::Decision,
            Self::Experience,
        ]
    }

    /// Parse from the stored string form; unknown strings become Fact.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "entity" => Self::Entity,
            "snippet" => Self::Snippet,
            "decision" => Self::Decision,
            "experience" => Self::Experience,
            _ => Self::Fact,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fact => "fact",
            Self::Entity => "entity",
            Self::Snippet => "snippet",
            Self::Decision => "decision",
            Self::Experience => "experience",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle tier of a node. Transitions are monotone:
/// task -> session -> longterm -> archived; archived is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Task = 0,
    Session = 1,
    LongTerm = 2,
    Archived = 3,
}

impl Tier {
    /// The next tier up, or None at the terminal tier.
    pub fn next(&self) -> Option<Tier> {
        match self {
            Self::Task => Some(Self::Session),
            Self::Session => Some(Self::LongTerm),
            Self::LongTerm => Some(Self::Archived),
            Self::Archived => None,
        }
    }

    /// Tiers consulted by default during retrieval.
    pub fn active() -> [Tier; 3] {
        [Self::Task, Self::Session, Self::LongTerm]
    }

    /// All tiers, for stats iteration.
    pub fn all() -> [Tier; 4] {
        [Self::Task, Self::Session, Self::LongTerm, Self::Archived]
    }

    /// Parse from the stored integer form.
    pub fn from_i32(i: i32) -> Self {
        match i {
            1 => Self::Session,
            2 => Self::LongTerm,
            3 => Self::Archived,
            _ => Self::Task,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Session => "session",
            Self::LongTerm => "longterm",
            Self::Archived => "archived",
        };
        write!(f, "{}", s)
    }
}

/// A content-addressed memory node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier; never changed by updates
    pub id: NodeId,
    /// Node type
    pub node_type: NodeType,
    /// Free-form refinement of the type; empty when unused
    #[serde(default)]
    pub subtype: String,
    /// UTF-8 content
    pub content: String,
    /// Lifecycle tier
    pub tier: Tier,
    /// Confidence in [0,1]; clamped on every write
    pub confidence: f64,
    /// Monotone access counter
    pub access_count: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Last access timestamp
    pub last_accessed: DateTime<Utc>,
    /// Opaque metadata blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// Optional fixed-dimension embedding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Node {
    /// Create a node with defaults: task tier, confidence 1.0.
    pub fn new(node_type: NodeType, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            node_type,
            subtype: String::new(),
            content: content.into(),
            tier: Tier::Task,
            confidence: 1.0,
            access_count: 0,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            metadata: None,
            embedding: None,
        }
    }

    /// Set the subtype.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = subtype.into();
        self
    }

    /// Set the tier.
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the confidence, clamped to [0,1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Attach an embedding vector.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Whether this node is a read-only session summary.
    pub fn is_session_summary(&self) -> bool {
        self.subtype == SUBTYPE_SESSION_SUMMARY
    }
}

/// Membership of a node in a hyperedge, carrying a role label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// The member node
    pub node_id: NodeId,
    /// Role this node plays in the edge
    pub role: String,
    /// Position within the edge's ordered member set
    pub position: u32,
}

impl Membership {
    pub fn new(node_id: NodeId, role: impl Into<String>, position: u32) -> Self {
        Self {
            node_id,
            role: role.into(),
            position,
        }
    }
}

/// A typed hyperedge over one or more nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperedge {
    /// Unique identifier
    pub id: EdgeId,
    /// Type tag
    pub edge_type: String,
    /// Ordered memberships; arity >= 1
    pub members: Vec<Membership>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Opaque metadata blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Hyperedge {
    /// Create an edge over ordered `(node, role)` pairs.
    pub fn new(edge_type: impl Into<String>, members: Vec<(NodeId, String)>) -> Self {
        let now = Utc::now();
        Self {
            id: EdgeId::new(),
            edge_type: edge_type.into(),
            members: members
                .into_iter()
                .enumerate()
                .map(|(i, (node_id, role))| Membership::new(node_id, role, i as u32))
                .collect(),
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Convenience constructor for a two-node edge.
    pub fn binary(
        edge_type: impl Into<String>,
        from: NodeId,
        from_role: impl Into<String>,
        to: NodeId,
        to_role: impl Into<String>,
    ) -> Self {
        Self::new(
            edge_type,
            vec![(from, from_role.into()), (to, to_role.into())],
        )
    }

    /// Member node ids in position order.
    pub fn member_ids(&self) -> Vec<&NodeId> {
        self.members.iter().map(|m| &m.node_id).collect()
    }
}

/// Filter for listing nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeFilter {
    /// Restrict to these types
    pub types: Option<Vec<NodeType>>,
    /// Restrict to these subtypes
    pub subtypes: Option<Vec<String>>,
    /// Restrict to these tiers
    pub tiers: Option<Vec<Tier>>,
    /// Minimum confidence
    pub min_confidence: Option<f64>,
    /// Maximum number of nodes returned
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn types(mut self, types: Vec<NodeType>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn subtypes(mut self, subtypes: Vec<String>) -> Self {
        self.subtypes = Some(subtypes);
        self
    }

    pub fn tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options for text search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of nodes returned
    pub limit: Option<usize>,
    /// Restrict to these tiers
    pub tiers: Option<Vec<Tier>>,
    /// Restrict to these types
    pub types: Option<Vec<NodeType>>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn types(mut self, types: Vec<NodeType>) -> Self {
        self.types = Some(types);
        self
    }
}

/// A batched extraction of nodes plus the edges among them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    /// Nodes keyed by request order
    pub nodes: Vec<Node>,
    /// Edges with at least one member among the requested nodes
    pub edges: Vec<Hyperedge>,
}

/// Statistics about the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total node count
    pub total_nodes: u64,
    /// Node counts keyed by type name
    pub nodes_by_type: HashMap<String, u64>,
    /// Node counts keyed by tier name
    pub nodes_by_tier: HashMap<String, u64>,
    /// Total hyperedge count
    pub total_hyperedges: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tier_transitions_are_monotone() {
        assert_eq!(Tier::Task.next(), Some(Tier::Session));
        assert_eq!(Tier::Session.next(), Some(Tier::LongTerm));
        assert_eq!(Tier::LongTerm.next(), Some(Tier::Archived));
        assert_eq!(Tier::Archived.next(), None);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Task < Tier::Session);
        assert!(Tier::Session < Tier::LongTerm);
        assert!(Tier::LongTerm < Tier::Archived);
    }

    #[test]
    fn test_node_confidence_clamped() {
        let node = Node::new(NodeType::Fact, "f").with_confidence(1.7);
        assert_eq!(node.confidence, 1.0);
        let node = Node::new(NodeType::Fact, "f").with_confidence(-0.3);
        assert_eq!(node.confidence, 0.0);
    }

    #[test]
    fn test_node_builder() {
        let node = Node::new(NodeType::Decision, "chose decompose")
            .with_subtype(SUBTYPE_RLM_EXECUTION)
            .with_tier(Tier::Session)
            .with_metadata("tokens", 42);

        assert_eq!(node.node_type, NodeType::Decision);
        assert_eq!(node.subtype, "rlm_execution");
        assert_eq!(node.tier, Tier::Session);
        assert_eq!(
            node.metadata.as_ref().unwrap().get("tokens"),
            Some(&serde_json::json!(42))
        );
    }

    #[test]
    fn test_hyperedge_positions_follow_order() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let edge = Hyperedge::new(
            "derived_from",
            vec![
                (a.clone(), "conclusion".to_string()),
                (b.clone(), "premise".to_string()),
                (c.clone(), "premise".to_string()),
            ],
        );

        assert_eq!(edge.members.len(), 3);
        assert_eq!(edge.members[0].position, 0);
        assert_eq!(edge.members[2].position, 2);
        assert_eq!(edge.member_ids(), vec![&a, &b, &c]);
    }

    #[test]
    fn test_node_type_parse_lossy() {
        assert_eq!(NodeType::parse_lossy("experience"), NodeType::Experience);
        assert_eq!(NodeType::parse_lossy("unknown"), NodeType::Fact);
    }

    #[test]
    fn test_id_parse_rejects_empty() {
        assert!(NodeId::parse("").is_err());
        assert!(EdgeId::parse("").is_err());
        assert!(NodeId::parse("abc").is_ok());
    }

    #[test]
    fn test_session_summary_detection() {
        let node = Node::new(NodeType::Experience, "summary")
            .with_subtype(SUBTYPE_SESSION_SUMMARY);
        assert!(node.is_session_summary());
    }
}
