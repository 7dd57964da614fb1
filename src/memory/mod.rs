//! Hypergraph memory with tiered lifecycle.
//!
//! Knowledge lives in typed nodes connected by typed hyperedges, persisted
//! in SQLite. Nodes move monotonically through tiers as they prove useful:
//!
//! - **Task tier**: working memory for the current task
//! - **Session tier**: knowledge accumulated during a session
//! - **LongTerm tier**: persistent knowledge across sessions
//! - **Archived tier**: decayed but preserved knowledge (terminal)
//!
//! ## Example
//!
//! ```rust,ignore
//! use rlm_runtime::memory::{HypergraphStore, Node, NodeType, SearchOptions};
//!
//! let store = HypergraphStore::in_memory()?;
//!
//! let fact = Node::new(NodeType::Fact, "The API uses JWT for auth")
//!     .with_confidence(0.95);
//! store.create_node(&fact)?;
//!
//! let results = store.search("auth", &SearchOptions::new().limit(10))?;
//! store.increment_access(&results[0].id)?;
//! ```

mod decay;
mod outcomes;
mod proposal;
mod schema;
mod store;
mod types;

pub use decay::{decay_factor, DecayConfig, DecayPass, DecayReport};
pub use outcomes::{hash_query, OutcomeAggregate, OutcomeRecorder, RetrievalOutcome};
pub use proposal::{
    Evidence, Proposal, ProposalEngine, ProposalImpact, ProposalStatus, ProposalType,
};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::HypergraphStore;
pub use types::{
    EdgeId, Hyperedge, Membership, MemoryStats, Node, NodeFilter, NodeId, NodeType,
    SearchOptions, Subgraph, Tier, SUBTYPE_RLM_EXECUTION, SUBTYPE_SCHEMA_PROPOSAL,
    SUBTYPE_SESSION_SUMMARY,
};
