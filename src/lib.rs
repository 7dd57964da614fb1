//! # rlm-runtime
//!
//! A Recursive Language Model (RLM) orchestration runtime: given a task and
//! a pool of model endpoints, the core decides at each step whether to
//! answer directly, decompose, query persistent memory, recurse on a
//! focused snippet, synthesize partials, or execute code externally — all
//! under a token budget and a recursion-depth bound.
//!
//! ## Core Components
//!
//! - **Controller**: produces a structured [`state::Decision`] from a
//!   [`state::TaskState`] by consulting a model client
//! - **Executor**: parallel, speculative, and dependency-aware execution
//!   with budget-bounded admission and cancellation
//! - **Memory**: tiered hypergraph store over SQLite with decay, proposals,
//!   and retrieval-outcome tracking
//! - **Router**: cost- and quality-aware model selection with cascading
//!   escalation
//! - **Orchestrator**: the recursive loop tying it all together
//!
//! ## Example
//!
//! ```rust,ignore
//! use rlm_runtime::{HypergraphStore, Orchestrator};
//! use std::sync::Arc;
//!
//! let store = Arc::new(HypergraphStore::open("memory.db")?);
//! let orchestrator = Orchestrator::builder(client)
//!     .store(store)
//!     .max_depth(3)
//!     .total_budget(100_000)
//!     .build();
//!
//! let outcome = orchestrator.execute("Summarize the auth flow").await;
//! println!("{} ({} tokens)", outcome.response, outcome.total_tokens);
//! ```

pub mod checkpoint;
pub mod controller;
pub mod embed;
pub mod error;
pub mod executor;
pub mod interpreter;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod trace;

// Re-exports for convenience
pub use checkpoint::{CheckpointDriver, Checkpointer, MemoryCheckpointer};
pub use controller::{parse_decision, ControllerConfig, MetaController};
pub use embed::EmbeddingProvider;
pub use error::{Error, ErrorClass, InterpreterErrorKind, Result};
pub use executor::{
    AsyncExecutor, CancelToken, ExecutionPlan, ExecutionResult, ExecutorConfig, ExecutorStats,
    FailurePolicy, OpOutput, Operation, OperationResult, SpeculativeResult,
};
pub use interpreter::{classify_exec_error, CodeInterpreter, ExecOutcome};
pub use llm::{
    apply_cache_markers, CacheKey, CacheStats, CacheStrategy, CascadeConfig, CascadeOutcome,
    CascadeResult, Completion, CostTracker, LearnerConfig, ModelClient, ModelRouter, ModelSpec,
    ModelTier, PromptBlock, PromptCache, QueryCategory, RouterLearner, RoutingDecision,
    StructuredPrompt, TokenUsage,
};
pub use memory::{
    DecayConfig, DecayPass, DecayReport, Hyperedge, HypergraphStore, Membership, MemoryStats,
    Node, NodeFilter, NodeId, NodeType, OutcomeRecorder, Proposal, ProposalEngine,
    ProposalStatus, ProposalType, RetrievalOutcome, SearchOptions, Subgraph, Tier,
};
pub use orchestrator::{
    Chunk, Decomposer, DecomposerConfig, ExecutionOutcome, ModelPool, Orchestrator,
    OrchestratorBuilder, OrchestratorConfig, RecoveryConfig, SubResult, Synthesis,
    SynthesisConfig, SynthesisStrategy, Synthesizer,
};
pub use session::{resume_session, ResumeContext, SessionSummary, SessionTracker};
pub use state::{Action, Decision, DecomposeStrategy, TaskState};
pub use trace::{TraceEvent, TraceEventDraft, TraceEventType, TraceRecorder, TraceStatus};
