//! Learned routing preferences.
//!
//! The learner keeps a bounded adjustment per `(query category, model id)`
//! pair, updated from observed outcomes by an exponential moving average.
//! Adjustments are clamped to [0,1] so a well-scored strength tag (worth 10)
//! always dominates learned preference; learning only breaks near-ties.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use super::router::QueryCategory;

/// Snapshot of one learned preference cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceCell {
    /// Current adjustment in [0,1]
    pub adjustment: f64,
    /// Number of outcomes folded in
    pub observations: u64,
}

/// Configuration for preference updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// EMA smoothing factor in (0,1]; higher reacts faster
    pub alpha: f64,
    /// Observations required before an adjustment is reported
    pub min_observations: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            min_observations: 3,
        }
    }
}

/// Cost- and quality-feedback accumulator for the router.
pub struct RouterLearner {
    config: LearnerConfig,
    cells: RwLock<HashMap<(QueryCategory, String), PreferenceCell>>,
}

impl RouterLearner {
    /// Create a learner with default configuration.
    pub fn new() -> Self {
        Self::with_config(LearnerConfig::default())
    }

    /// Create a learner with explicit configuration.
    pub fn with_config(config: LearnerConfig) -> Self {
        Self {
            config,
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Record an outcome for a routed call. `reward` is clamped to [0,1];
    /// use 1.0 for a clearly good outcome, 0.0 for a clearly bad one.
    pub fn record_outcome(&self, category: QueryCategory, model_id: &str, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());
        let cell = cells
            .entry((category, model_id.to_string()))
            .or_insert(PreferenceCell {
                adjustment: reward,
                observations: 0,
            });

        cell.adjustment =
            (cell.adjustment * (1.0 - self.config.alpha) + reward * self.config.alpha).clamp(0.0, 1.0);
        cell.observations += 1;
    }

    /// The bounded routing adjustment for a pair; 0 until enough evidence.
    pub fn adjustment(&self, category: QueryCategory, model_id: &str) -> f64 {
        let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
        match cells.get(&(category, model_id.to_string())) {
            Some(cell) if cell.observations >= self.config.min_observations => {
                cell.adjustment.clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    /// Snapshot all cells, for persistence or inspection.
    pub fn snapshot(&self) -> Vec<(QueryCategory, String, PreferenceCell)> {
        let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
        cells
            .iter()
            .map(|((cat, id), cell)| (*cat, id.clone(), cell.clone()))
            .collect()
    }

    /// Restore a cell, e.g. from the retrieval-outcomes aggregate.
    pub fn restore(&self, category: QueryCategory, model_id: &str, cell: PreferenceCell) {
        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());
        cells.insert((category, model_id.to_string()), cell);
    }
}

impl Default for RouterLearner {
    fn default() -> Self {
        Self::new()
    }
}
