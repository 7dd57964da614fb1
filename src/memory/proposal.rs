//! Schema-evolution proposals.
//!
//! A proposal is a suggested change to the memory schema (a new subtype, a
//! rename, a retrieval or decay tuning) backed by evidence from observed
//! nodes. Proposals are persisted as ordinary nodes under the reserved
//! subtype `schema_proposal`, so they ride the same store, tiers, and decay
//! machinery as everything else.
//!
//! Reversible proposals are applied copy-then-swap: the prior state of every
//! affected node is snapshotted into the proposal before mutation, so a
//! revert can restore it. Irreversible proposals require `force`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::store::HypergraphStore;
use crate::memory::types::{
    Node, NodeFilter, NodeId, NodeType, Tier, SUBTYPE_SCHEMA_PROPOSAL,
};

/// Kind of schema change being proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    NewSubtype,
    RenameType,
    MergeTypes,
    SplitType,
    RetrievalConfig,
    DecayAdjust,
}

/// Lifecycle status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Deferred,
    Applied,
}

impl ProposalStatus {
    /// Legal transitions: pending fans out, approved may be applied,
    /// everything else is terminal.
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Deferred)
                | (Deferred, Approved)
                | (Deferred, Rejected)
                | (Approved, Applied)
        )
    }
}

/// One piece of supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Node the evidence points at
    pub node_id: NodeId,
    /// Metric values supporting the proposal
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

/// Expected impact of applying a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalImpact {
    /// Nodes that would be mutated
    pub nodes_affected: Vec<NodeId>,
    /// Whether the change can be cleanly reverted
    pub reversible: bool,
}

/// A schema-evolution proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier
    pub id: String,
    /// Kind of change
    pub proposal_type: ProposalType,
    /// Short title
    pub title: String,
    /// Why the change is warranted
    pub rationale: String,
    /// Supporting evidence
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Expected impact
    pub impact: ProposalImpact,
    /// Confidence in [0,1]
    pub confidence: f64,
    /// Current status
    pub status: ProposalStatus,
    /// Proposal-type-specific parameters (e.g. from/to subtype names)
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Pre-application snapshot for revert (subtype per affected node)
    #[serde(default)]
    pub snapshot: HashMap<String, String>,
}

impl Proposal {
    /// Create a pending proposal.
    pub fn new(
        proposal_type: ProposalType,
        title: impl Into<String>,
        rationale: impl Into<String>,
        impact: ProposalImpact,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            proposal_type,
            title: title.into(),
            rationale: rationale.into(),
            evidence: Vec::new(),
            impact,
            confidence: 0.5,
            status: ProposalStatus::Pending,
            params: HashMap::new(),
            snapshot: HashMap::new(),
        }
    }

    /// Attach evidence.
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    /// Set confidence, clamped to [0,1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set a type-specific parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Persistence and application of proposals over a store.
pub struct ProposalEngine {
    store: Arc<HypergraphStore>,
}

impl ProposalEngine {
    pub fn new(store: Arc<HypergraphStore>) -> Self {
        Self { store }
    }

    /// Persist a proposal as a `schema_proposal` node. Returns the node id.
    pub fn submit(&self, proposal: &Proposal) -> Result<NodeId> {
        let node = Node::new(NodeType::Decision, serde_json::to_string(proposal)?)
            .with_subtype(SUBTYPE_SCHEMA_PROPOSAL)
            .with_tier(Tier::Session)
            .with_confidence(proposal.confidence)
            .with_metadata("proposal_id", proposal.id.clone())
            .with_metadata("status", status_str(proposal.status));
        self.store.create_node(&node)?;
        Ok(node.id)
    }

    /// Load a proposal by its proposal id.
    pub fn get(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        Ok(self
            .load_all()?
            .into_iter()
            .map(|(_, p)| p)
            .find(|p| p.id == proposal_id))
    }

    /// List proposals, optionally filtered by status.
    pub fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>> {
        Ok(self
            .load_all()?
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect())
    }

    /// Transition a proposal's status.
    pub fn set_status(&self, proposal_id: &str, next: ProposalStatus) -> Result<Proposal> {
        let (node_id, mut proposal) = self
            .find(proposal_id)?
            .ok_or_else(|| Error::NotFound(format!("proposal {}", proposal_id)))?;

        if !proposal.status.can_transition_to(next) {
            return Err(Error::InvalidArgument(format!(
                "proposal {} cannot move {:?} -> {:?}",
                proposal_id, proposal.status, next
            )));
        }
        proposal.status = next;
        self.rewrite(&node_id, &proposal)?;
        Ok(proposal)
    }

    /// Apply an approved proposal.
    ///
    /// Reversible proposals snapshot each affected node's subtype before
    /// mutating it. Irreversible proposals are refused unless `force`.
    pub fn apply(&self, proposal_id: &str, force: bool) -> Result<Proposal> {
        let (node_id, mut proposal) = self
            .find(proposal_id)?
            .ok_or_else(|| Error::NotFound(format!("proposal {}", proposal_id)))?;

        if proposal.status != ProposalStatus::Approved {
            return Err(Error::InvalidArgument(format!(
                "proposal {} is {:?}, only approved proposals apply",
                proposal_id, proposal.status
            )));
        }
        if !proposal.impact.reversible && !force {
            return Err(Error::PermissionDenied(format!(
                "proposal {} is irreversible; pass force to apply",
                proposal_id
            )));
        }

        match proposal.proposal_type {
            ProposalType::RenameType | ProposalType::MergeTypes => {
                let target = proposal
                    .params
                    .get("to_subtype")
                    .cloned()
                    .ok_or_else(|| {
                        Error::InvalidArgument("proposal missing to_subtype param".into())
                    })?;

                for affected in proposal.impact.nodes_affected.clone() {
                    let Some(mut node) = self.store.get_node(&affected)? else {
                        continue;
                    };
                    proposal
                        .snapshot
                        .insert(affected.as_str().to_string(), node.subtype.clone());
                    node.subtype = target.clone();
                    self.store.update_node(&node)?;
                }
            }
            // These adjust configuration elsewhere; persisting the applied
            // status is the whole effect here.
            ProposalType::NewSubtype
            | ProposalType::SplitType
            | ProposalType::RetrievalConfig
            | ProposalType::DecayAdjust => {}
        }

        proposal.status = ProposalStatus::Applied;
        self.rewrite(&node_id, &proposal)?;
        info!(proposal = %proposal.id, "proposal applied");
        Ok(proposal)
    }

    /// Revert an applied reversible proposal from its snapshot.
    pub fn revert(&self, proposal_id: &str) -> Result<Proposal> {
        let (node_id, mut proposal) = self
            .find(proposal_id)?
            .ok_or_else(|| Error::NotFound(format!("proposal {}", proposal_id)))?;

        if proposal.status != ProposalStatus::Applied {
            return Err(Error::InvalidArgument(format!(
                "proposal {} is {:?}, only applied proposals revert",
                proposal_id, proposal.status
            )));
        }
        if !proposal.impact.reversible {
            return Err(Error::PermissionDenied(format!(
                "proposal {} was irreversible",
                proposal_id
            )));
        }

        for (raw_id, old_subtype) in proposal.snapshot.clone() {
            let id = NodeId::parse(&raw_id)?;
            if let Some(mut node) = self.store.get_node(&id)? {
                node.subtype = old_subtype;
                self.store.update_node(&node)?;
            }
        }

        proposal.status = ProposalStatus::Approved;
        proposal.snapshot.clear();
        self.rewrite(&node_id, &proposal)?;
        Ok(proposal)
    }

    fn load_all(&self) -> Result<Vec<(NodeId, Proposal)>> {
        let nodes = self.store.list_nodes(
            &NodeFilter::new().subtypes(vec![SUBTYPE_SCHEMA_PROPOSAL.to_string()]),
        )?;
        Ok(nodes
            .into_iter()
            .filter_map(|n| {
                serde_json::from_str::<Proposal>(&n.content)
                    .ok()
                    .map(|p| (n.id, p))
            })
            .collect())
    }

    fn find(&self, proposal_id: &str) -> Result<Option<(NodeId, Proposal)>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|(_, p)| p.id == proposal_id))
    }

    fn rewrite(&self, node_id: &NodeId, proposal: &Proposal) -> Result<()> {
        let mut node = self
            .store
            .get_node(node_id)?
            .ok_or_else(|| Error::NotFound(format!("proposal node {}", node_id)))?;
        node.content = serde_json::to_string(proposal)?;
        node.metadata = Some(HashMap::from([
            (
                "proposal_id".to_string(),
                serde_json::json!(proposal.id.clone()),
            ),
            (
                "status".to_string(),
                serde_json::json!(status_str(proposal.status)),
            ),
        ]));
        self.store.update_node(&node)
    }
}

fn status_str(status: ProposalStatus) -> &'static str {
    match status {
        ProposalStatus::Pending => "pending",
        ProposalStatus::Approved => "approved",
        ProposalStatus::Rejected => "rejected",
        ProposalStatus::Deferred => "deferred",
        ProposalStatus::Applied => "applied",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::NodeType;

    fn engine_with_nodes(n: usize) -> (ProposalEngine, Vec<NodeId>) {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        let ids: Vec<NodeId> = (0..n)
            .map(|i| {
                let node = Node::new(NodeType::Fact, format!("fact {}", i))
                    .with_subtype("old_name");
                store.create_node(&node).unwrap();
                node.id
            })
            .collect();
        (ProposalEngine::new(store), ids)
    }

    fn rename_proposal(affected: Vec<NodeId>) -> Proposal {
        Proposal::new(
            ProposalType::RenameType,
            "rename old_name",
            "old_name is misleading",
            ProposalImpact {
                nodes_affected: affected,
                reversible: true,
            },
        )
        .with_param("to_subtype", "new_name")
        .with_confidence(0.8)
    }

    #[test]
    fn test_submit_and_list() {
        let (engine, ids) = engine_with_nodes(2);
        engine.submit(&rename_proposal(ids)).unwrap();

        let pending = engine.list(Some(ProposalStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "rename old_name");
        assert!(engine.list(Some(ProposalStatus::Applied)).unwrap().is_empty());
    }

    #[test]
    fn test_status_transitions() {
        let (engine, ids) = engine_with_nodes(1);
        let proposal = rename_proposal(ids);
        engine.submit(&proposal).unwrap();

        engine
            .set_status(&proposal.id, ProposalStatus::Approved)
            .unwrap();
        // Approved -> pending is not a legal move.
        assert!(engine
            .set_status(&proposal.id, ProposalStatus::Pending)
            .is_err());
    }

    #[test]
    fn test_apply_rewrites_subtypes_and_snapshots() {
        let (engine, ids) = engine_with_nodes(3);
        let proposal = rename_proposal(ids.clone());
        engine.submit(&proposal).unwrap();
        engine
            .set_status(&proposal.id, ProposalStatus::Approved)
            .unwrap();

        let applied = engine.apply(&proposal.id, false).unwrap();
        assert_eq!(applied.status, ProposalStatus::Applied);
        assert_eq!(applied.snapshot.len(), 3);

        for id in &ids {
            let node = engine.store.get_node(id).unwrap().unwrap();
            assert_eq!(node.subtype, "new_name");
        }
    }

    #[test]
    fn test_revert_restores_snapshot() {
        let (engine, ids) = engine_with_nodes(2);
        let proposal = rename_proposal(ids.clone());
        engine.submit(&proposal).unwrap();
        engine
            .set_status(&proposal.id, ProposalStatus::Approved)
            .unwrap();
        engine.apply(&proposal.id, false).unwrap();

        let reverted = engine.revert(&proposal.id).unwrap();
        assert_eq!(reverted.status, ProposalStatus::Approved);
        for id in &ids {
            let node = engine.store.get_node(id).unwrap().unwrap();
            assert_eq!(node.subtype, "old_name");
        }
    }

    #[test]
    fn test_irreversible_requires_force() {
        let (engine, ids) = engine_with_nodes(1);
        let mut proposal = rename_proposal(ids);
        proposal.impact.reversible = false;
        engine.submit(&proposal).unwrap();
        engine
            .set_status(&proposal.id, ProposalStatus::Approved)
            .unwrap();

        assert!(engine.apply(&proposal.id, false).is_err());
        let applied = engine.apply(&proposal.id, true).unwrap();
        assert_eq!(applied.status, ProposalStatus::Applied);
    }

    #[test]
    fn test_apply_requires_approval() {
        let (engine, ids) = engine_with_nodes(1);
        let proposal = rename_proposal(ids);
        engine.submit(&proposal).unwrap();
        assert!(engine.apply(&proposal.id, false).is_err());
    }
}
