//! Model client contract, routing, and prompt-cache awareness.
//!
//! The runtime consumes model endpoints through the [`ModelClient`] trait;
//! concrete transports live outside the crate. Routing picks a catalog model
//! per call from budget, recursion depth, and learned preferences, and the
//! cascade walks tiers cheapest-first until confidence clears a threshold.

mod cache;
mod client;
mod learner;
mod router;
mod types;

pub use cache::{
    apply_cache_markers, CacheEntry, CacheKey, CacheStats, CacheStrategy, PromptCache,
};
pub use client::ModelClient;
#[cfg(test)]
pub(crate) use client::testing;
pub use learner::{LearnerConfig, PreferenceCell, RouterLearner};
pub use router::{
    CascadeConfig, CascadeOutcome, CascadeResult, ModelRouter, QueryCategory, RoutingDecision,
};
pub use types::{
    CacheControl, Completion, CostTracker, ModelCosts, ModelSpec, ModelTier, PromptBlock,
    StructuredPrompt, TokenUsage,
};
