//! Background lifecycle pass: confidence decay, archival, pruning.
//!
//! Confidence decays exponentially with age since last access; frequent
//! access stretches the effective half-life, so well-used knowledge
//! survives longer. Nodes crossing `archive_threshold` move to the archived
//! tier; archived nodes below `prune_threshold` are deleted, guarded by the
//! dry-run flag.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::memory::store::HypergraphStore;
use crate::memory::types::{NodeFilter, NodeId, Tier};

/// Configuration for the decay pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Half-life of an untouched node's confidence, in hours.
    ///
    /// The exact value is deliberately a config knob; 168 (one week) is the
    /// default, not a law.
    pub half_life_hours: f64,
    /// Confidence below which a node is archived
    pub archive_threshold: f64,
    /// Confidence below which an archived node is pruned
    pub prune_threshold: f64,
    /// Nodes processed per batch
    pub batch_size: usize,
    /// When set, report what would happen without mutating anything
    pub dry_run: bool,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_hours: 168.0,
            archive_threshold: 0.2,
            prune_threshold: 0.05,
            batch_size: 100,
            dry_run: false,
        }
    }
}

/// Outcome of one decay pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecayReport {
    /// Nodes examined
    pub examined: usize,
    /// Nodes whose confidence was lowered
    pub decayed: usize,
    /// Nodes moved to the archived tier
    pub archived: Vec<NodeId>,
    /// Nodes deleted
    pub pruned: Vec<NodeId>,
    /// Whether this was a dry run
    pub dry_run: bool,
}

/// The decay pass itself.
pub struct DecayPass {
    store: Arc<HypergraphStore>,
    config: DecayConfig,
}

impl DecayPass {
    /// Create a pass over a store.
    pub fn new(store: Arc<HypergraphStore>, config: DecayConfig) -> Self {
        Self { store, config }
    }

    /// Run one full pass in bounded batches.
    pub fn run(&self) -> Result<DecayReport> {
        let mut report = DecayReport {
            dry_run: self.config.dry_run,
            ..DecayReport::default()
        };

        let candidates = self.store.list_nodes(&NodeFilter::new())?;
        let now = Utc::now();

        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            for node in batch {
                report.examined += 1;

                let age_hours =
                    (now - node.last_accessed).num_seconds().max(0) as f64 / 3600.0;
                let new_confidence = node.confidence * decay_factor(
                    age_hours,
                    self.config.half_life_hours,
                    node.access_count,
                );

                if node.tier == Tier::Archived {
                    if new_confidence < self.config.prune_threshold {
                        report.pruned.push(node.id.clone());
                        if !self.config.dry_run {
                            self.store.delete_node(&node.id)?;
                        }
                        continue;
                    }
                } else if new_confidence < self.config.archive_threshold {
                    report.archived.push(node.id.clone());
                    if !self.config.dry_run {
                        let mut archived = node.clone();
                        archived.tier = Tier::Archived;
                        archived.confidence = new_confidence.max(0.0);
                        self.store.update_node(&archived)?;
                    }
                    report.decayed += 1;
                    continue;
                }

                if new_confidence < node.confidence {
                    report.decayed += 1;
                    if !self.config.dry_run {
                        let mut decayed = node.clone();
                        decayed.confidence = new_confidence.max(0.0);
                        self.store.update_node(&decayed)?;
                    }
                }
            }
            debug!(batch = batch.len(), "decay batch processed");
        }

        info!(
            examined = report.examined,
            decayed = report.decayed,
            archived = report.archived.len(),
            pruned = report.pruned.len(),
            dry_run = report.dry_run,
            "decay pass finished"
        );
        Ok(report)
    }
}

/// Multiplicative decay factor for a node.
///
/// `exp(-age / half_life)` stretched by access frequency: each unit of
/// `ln(1 + access_count)` extends the effective half-life, so a node read
/// often decays much slower than one never touched.
pub fn decay_factor(age_hours: f64, half_life_hours: f64, access_count: u64) -> f64 {
    if half_life_hours <= 0.0 {
        return 1.0;
    }
    let stretch = 1.0 + (1.0 + access_count as f64).ln();
    (-age_hours / (half_life_hours * stretch)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{Node, NodeType};
    use chrono::Duration;

    fn aged_node(content: &str, hours_old: i64, confidence: f64) -> Node {
        let mut node = Node::new(NodeType::Fact, content).with_confidence(confidence);
        node.last_accessed = Utc::now() - Duration::hours(hours_old);
        node
    }

    #[test]
    fn test_decay_factor_shape() {
        // Fresh nodes keep their confidence.
        assert!((decay_factor(0.0, 168.0, 0) - 1.0).abs() < 1e-9);
        // Older is weaker.
        assert!(decay_factor(100.0, 168.0, 0) > decay_factor(500.0, 168.0, 0));
        // Access stretches the half-life.
        assert!(decay_factor(500.0, 168.0, 50) > decay_factor(500.0, 168.0, 0));
        // Always in (0, 1].
        let f = decay_factor(10_000.0, 168.0, 0);
        assert!(f > 0.0 && f <= 1.0);
    }

    #[test]
    fn test_old_untouched_nodes_decay() {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        let node = aged_node("stale", 24 * 30, 0.9);
        store.create_node(&node).unwrap();

        let pass = DecayPass::new(Arc::clone(&store), DecayConfig::default());
        let report = pass.run().unwrap();

        assert_eq!(report.examined, 1);
        assert!(report.decayed >= 1);
        let updated = store.get_node(&node.id).unwrap().unwrap();
        assert!(updated.confidence < 0.9);
    }

    #[test]
    fn test_archive_below_threshold() {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        // A year untouched at low confidence: far past the threshold.
        let node = aged_node("forgotten", 24 * 365, 0.25);
        store.create_node(&node).unwrap();

        let pass = DecayPass::new(Arc::clone(&store), DecayConfig::default());
        let report = pass.run().unwrap();

        assert_eq!(report.archived.len(), 1);
        let updated = store.get_node(&node.id).unwrap().unwrap();
        assert_eq!(updated.tier, Tier::Archived);
    }

    #[test]
    fn test_prune_archived_below_threshold() {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        let mut node = aged_node("dust", 24 * 365 * 2, 0.04);
        node.tier = Tier::Archived;
        store.create_node(&node).unwrap();

        let pass = DecayPass::new(Arc::clone(&store), DecayConfig::default());
        let report = pass.run().unwrap();

        assert_eq!(report.pruned.len(), 1);
        assert!(store.get_node(&node.id).unwrap().is_none());
    }

    #[test]
    fn test_dry_run_mutates_nothing() {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        let stale = aged_node("stale", 24 * 30, 0.9);
        let mut dust = aged_node("dust", 24 * 365, 0.04);
        dust.tier = Tier::Archived;
        store.create_node(&stale).unwrap();
        store.create_node(&dust).unwrap();

        let config = DecayConfig {
            dry_run: true,
            ..DecayConfig::default()
        };
        let report = DecayPass::new(Arc::clone(&store), config).run().unwrap();

        assert!(report.dry_run);
        assert_eq!(report.pruned.len(), 1);
        // Still there, still at full confidence.
        assert!(store.get_node(&dust.id).unwrap().is_some());
        assert_eq!(store.get_node(&stale.id).unwrap().unwrap().confidence, 0.9);
    }

    #[test]
    fn test_fresh_accessed_nodes_untouched() {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        let node = Node::new(NodeType::Fact, "hot").with_confidence(0.8);
        store.create_node(&node).unwrap();

        let report = DecayPass::new(Arc::clone(&store), DecayConfig::default())
            .run()
            .unwrap();

        assert_eq!(report.archived.len() + report.pruned.len(), 0);
        let after = store.get_node(&node.id).unwrap().unwrap();
        assert!((after.confidence - 0.8).abs() < 1e-6);
    }
}
