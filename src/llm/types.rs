//! Model client value types: usage counters, completions, structured
//! prompts, model catalog entries, and cost tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Token usage statistics for a single model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens written to the provider-side prompt cache
    #[serde(default)]
    pub cache_creation_tokens: u64,
    /// Tokens read from the provider-side prompt cache
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// Create usage from input/output counts.
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
        }
    }

    /// Total tokens (input + output).
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

/// A completed model call: generated text plus token accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Token usage for the call
    pub usage: TokenUsage,
    /// Model that produced the completion, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// When the completion arrived
    pub timestamp: DateTime<Utc>,
}

impl Completion {
    /// Create a completion with explicit usage.
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
            model: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the producing model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Cache control directive on a prompt block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControl {
    Ephemeral,
}

/// One block of a structured prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBlock {
    /// Block text
    pub content: String,
    /// Cache marker assigned by the cache strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl PromptBlock {
    /// Create an unmarked block.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            cache_control: None,
        }
    }

    /// Mark this block for caching.
    pub fn with_cache(mut self) -> Self {
        self.cache_control = Some(CacheControl::Ephemeral);
        self
    }
}

/// A prompt partitioned for provider-side caching.
///
/// System blocks and shared context are stable across related calls and are
/// the candidates for cache markers; the query content varies per call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredPrompt {
    /// Stable system instruction blocks
    pub system: Vec<PromptBlock>,
    /// Shared context blocks reused across sibling calls
    pub shared_context: Vec<PromptBlock>,
    /// The per-call query content
    pub query: String,
}

impl StructuredPrompt {
    /// Create a structured prompt with only query content.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            system: Vec::new(),
            shared_context: Vec::new(),
            query: query.into(),
        }
    }

    /// Append a system block.
    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.system.push(PromptBlock::new(content));
        self
    }

    /// Append a shared-context block.
    pub fn with_shared_context(mut self, content: impl Into<String>) -> Self {
        self.shared_context.push(PromptBlock::new(content));
        self
    }

    /// Flatten to a single prompt string, in system / context / query order.
    pub fn flatten(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for block in &self.system {
            parts.push(&block.content);
        }
        for block in &self.shared_context {
            parts.push(&block.content);
        }
        if !self.query.is_empty() {
            parts.push(&self.query);
        }
        parts.join("\n\n")
    }

    /// Approximate token count across all blocks.
    pub fn approx_tokens(&self) -> u64 {
        crate::state::approx_tokens(&self.flatten())
    }
}

/// Capability tier of a model in the routing catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Cheapest and quickest
    Fast = 0,
    /// Default middle ground
    Balanced = 1,
    /// Most capable general-purpose
    Powerful = 2,
    /// Extended-reasoning specialists
    Reasoning = 3,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Balanced => write!(f, "balanced"),
            Self::Powerful => write!(f, "powerful"),
            Self::Reasoning => write!(f, "reasoning"),
        }
    }
}

/// Catalog entry for a routable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier
    pub id: String,
    /// Tier classification
    pub tier: ModelTier,
    /// Input cost per million tokens (USD)
    pub input_cost: f64,
    /// Output cost per million tokens (USD)
    pub output_cost: f64,
    /// Maximum context window (tokens)
    pub context_size: u64,
    /// Strength tags matched against task text during scoring
    pub strengths: Vec<String>,
}

impl ModelSpec {
    /// Create a catalog entry.
    pub fn new(id: impl Into<String>, tier: ModelTier) -> Self {
        Self {
            id: id.into(),
            tier,
            input_cost: 0.0,
            output_cost: 0.0,
            context_size: 128_000,
            strengths: Vec::new(),
        }
    }

    /// Set per-million-token costs.
    pub fn with_costs(mut self, input: f64, output: f64) -> Self {
        self.input_cost = input;
        self.output_cost = output;
        self
    }

    /// Set the context window.
    pub fn with_context_size(mut self, tokens: u64) -> Self {
        self.context_size = tokens;
        self
    }

    /// Add a strength tag.
    pub fn with_strength(mut self, tag: impl Into<String>) -> Self {
        self.strengths.push(tag.into());
        self
    }

    /// Calculate cost in USD for given token usage.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = (input_tokens as f64 / 1_000_000.0) * self.input_cost;
        let output = (output_tokens as f64 / 1_000_000.0) * self.output_cost;
        input + output
    }
}

/// Costs for a specific model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub request_count: u64,
}

/// Cost tracking across a session or component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    /// Total input tokens
    pub total_input_tokens: u64,
    /// Total output tokens
    pub total_output_tokens: u64,
    /// Total cache read tokens
    pub total_cache_read_tokens: u64,
    /// Total cache creation tokens
    pub total_cache_creation_tokens: u64,
    /// Total cost in USD
    pub total_cost: f64,
    /// Number of requests
    pub request_count: u64,
    /// Per-model breakdown
    pub by_model: HashMap<String, ModelCosts>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from one completed call.
    pub fn record(&mut self, model: &str, usage: &TokenUsage, cost: Option<f64>) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.total_cache_read_tokens += usage.cache_read_tokens;
        self.total_cache_creation_tokens += usage.cache_creation_tokens;
        self.request_count += 1;

        if let Some(c) = cost {
            self.total_cost += c;
        }

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.request_count += 1;
        if let Some(c) = cost {
            entry.cost += c;
        }
    }

    /// Merge another tracker into this one.
    pub fn merge(&mut self, other: &CostTracker) {
        self.total_input_tokens += other.total_input_tokens;
        self.total_output_tokens += other.total_output_tokens;
        self.total_cache_read_tokens += other.total_cache_read_tokens;
        self.total_cache_creation_tokens += other.total_cache_creation_tokens;
        self.total_cost += other.total_cost;
        self.request_count += other.request_count;

        for (model, costs) in &other.by_model {
            let entry = self.by_model.entry(model.clone()).or_default();
            entry.input_tokens += costs.input_tokens;
            entry.output_tokens += costs.output_tokens;
            entry.cost += costs.cost;
            entry.request_count += costs.request_count;
        }
    }

    /// Total tokens across all requests.
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}
