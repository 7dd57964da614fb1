//! Retrieval-outcome recording.
//!
//! Every memory retrieval can report back whether its results were actually
//! used. The rows feed meta-evolution (pattern detection over subtypes) and
//! the router learner's reward signal.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::Result;
use crate::memory::store::HypergraphStore;

/// One recorded retrieval outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// When the retrieval happened
    pub timestamp: DateTime<Utc>,
    /// Stable hash of the query text
    pub query_hash: String,
    /// Category of the query (free-form, usually a `QueryCategory` name)
    pub query_type: String,
    /// Type of the retrieved node
    pub node_type: String,
    /// Subtype of the retrieved node
    pub node_subtype: String,
    /// Scored relevance in [0,1]
    pub relevance_score: f64,
    /// Whether the result made it into the final answer path
    pub was_used: bool,
    /// Context tokens the result consumed
    pub context_tokens: u64,
    /// Retrieval latency
    pub latency_ms: u64,
}

impl RetrievalOutcome {
    /// Create an outcome for a query/node pair.
    pub fn new(query: &str, query_type: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            query_hash: hash_query(query),
            query_type: query_type.into(),
            node_type: node_type.into(),
            node_subtype: String::new(),
            relevance_score: 0.0,
            was_used: false,
            context_tokens: 0,
            latency_ms: 0,
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.node_subtype = subtype.into();
        self
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = score.clamp(0.0, 1.0);
        self
    }

    pub fn used(mut self, was_used: bool) -> Self {
        self.was_used = was_used;
        self
    }

    pub fn with_context_tokens(mut self, tokens: u64) -> Self {
        self.context_tokens = tokens;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Aggregate usage for one `(query_type, node_subtype)` cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeAggregate {
    /// Rows observed
    pub observations: u64,
    /// Fraction of retrievals that were used
    pub usage_rate: f64,
    /// Mean relevance score
    pub mean_relevance: f64,
}

/// Records and aggregates retrieval outcomes in the store's database.
pub struct OutcomeRecorder {
    store: Arc<HypergraphStore>,
}

impl OutcomeRecorder {
    pub fn new(store: Arc<HypergraphStore>) -> Self {
        Self { store }
    }

    /// Append one outcome row.
    pub fn record(&self, outcome: &RetrievalOutcome) -> Result<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO retrieval_outcomes (
                    timestamp, query_hash, query_type, node_type, node_subtype,
                    relevance_score, was_used, context_tokens, latency_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    outcome.timestamp.to_rfc3339(),
                    outcome.query_hash,
                    outcome.query_type,
                    outcome.node_type,
                    outcome.node_subtype,
                    outcome.relevance_score,
                    outcome.was_used as i32,
                    outcome.context_tokens as i64,
                    outcome.latency_ms as i64,
                ],
            )?;
            Ok(())
        })
    }

    /// Aggregate usage for a query type, grouped by node subtype.
    pub fn aggregate_by_subtype(
        &self,
        query_type: &str,
    ) -> Result<Vec<(String, OutcomeAggregate)>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT node_subtype,
                        COUNT(*),
                        AVG(CAST(was_used AS REAL)),
                        AVG(relevance_score)
                 FROM retrieval_outcomes
                 WHERE query_type = ?1
                 GROUP BY node_subtype
                 ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map(params![query_type], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    OutcomeAggregate {
                        observations: row.get::<_, i64>(1)? as u64,
                        usage_rate: row.get::<_, f64>(2)?,
                        mean_relevance: row.get::<_, f64>(3)?,
                    },
                ))
            })?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Total rows recorded.
    pub fn count(&self) -> Result<u64> {
        self.store.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM retrieval_outcomes", [], |row| {
                row.get::<_, i64>(0).map(|c| c as u64)
            })
        })
    }
}

/// Stable hash of a query text.
pub fn hash_query(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}
