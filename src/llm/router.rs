//! Cost- and quality-aware model selection with cascading escalation.
//!
//! Routing happens in two layers:
//! - [`ModelRouter::select_model`] picks one model for a task given budget
//!   and recursion depth, using a fixed tier-precedence table, strength-tag
//!   scoring, and an optional learned adjustment.
//! - [`ModelRouter::cascade`] walks tiers cheapest-first, executing at each
//!   tier and escalating only while the returned confidence stays below the
//!   configured threshold.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

use super::learner::RouterLearner;
use super::types::{ModelSpec, ModelTier, TokenUsage};

/// Query category used as the learner's key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// Proofs, math, logic
    Reasoning,
    /// Architecture, refactoring, design
    Analysis,
    /// Errors, failures, diagnosis
    Debugging,
    /// Summaries, listings, lookups
    Extraction,
    /// Everything else
    General,
}

impl QueryCategory {
    /// Classify a task by keyword patterns.
    pub fn classify(task: &str) -> Self {
        static PATTERNS: OnceLock<CategoryPatterns> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(CategoryPatterns::new);
        let lower = task.to_lowercase();

        if patterns.reasoning.is_match(&lower) {
            Self::Reasoning
        } else if patterns.analysis.is_match(&lower) {
            Self::Analysis
        } else if patterns.debugging.is_match(&lower) {
            Self::Debugging
        } else if patterns.extraction.is_match(&lower) {
            Self::Extraction
        } else {
            Self::General
        }
    }
}

struct CategoryPatterns {
    reasoning: Regex,
    analysis: Regex,
    debugging: Regex,
    extraction: Regex,
}

impl CategoryPatterns {
    fn new() -> Self {
        Self {
            reasoning: Regex::new(r"prove|theorem|logic|math|calculate|reason").unwrap(),
            analysis: Regex::new(r"analyze|refactor|design|architect|complex").unwrap(),
            debugging: Regex::new(
                r"debug|error|bug|crash|fail|exception|stack\s+trace|diagnose",
            )
            .unwrap(),
            extraction: Regex::new(r"extract|summarize|list|what\s+is|describe|count").unwrap(),
        }
    }
}

/// Routing decision output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Selected model
    pub model: ModelSpec,
    /// Required tier computed from the precedence table
    pub tier: ModelTier,
    /// Query classification
    pub category: QueryCategory,
    /// Reasoning for selection
    pub reason: String,
}

/// Configuration for cascading escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Tier walk order, cheapest first
    pub tier_order: Vec<ModelTier>,
    /// Stop escalating once an attempt reports at least this confidence
    pub confidence_threshold: f64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            tier_order: vec![
                ModelTier::Fast,
                ModelTier::Balanced,
                ModelTier::Powerful,
                ModelTier::Reasoning,
            ],
            confidence_threshold: 0.7,
        }
    }
}

/// One tier attempt's outcome, produced by the caller's execute closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeOutcome {
    /// Generated text
    pub text: String,
    /// Self-reported confidence in [0,1]
    pub confidence: f64,
    /// Token usage for the attempt
    pub usage: TokenUsage,
}

/// Final result of a cascade walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeResult {
    /// Winning (or last-attempt) text
    pub text: String,
    /// Model that produced it
    pub model_id: String,
    /// Tier it ran at
    pub tier: ModelTier,
    /// Confidence of the accepted attempt
    pub confidence: f64,
    /// Number of attempts made
    pub attempts: u32,
    /// Whether more than one tier was tried
    pub escalated: bool,
    /// Cost accumulated across all attempts (USD)
    pub total_cost: f64,
    /// Latency accumulated across all attempts
    pub total_latency_ms: u64,
}

/// Model selector with learned preferences and cascade support.
pub struct ModelRouter {
    catalog: Vec<ModelSpec>,
    cascade_config: CascadeConfig,
    learner: Option<Arc<RouterLearner>>,
}

impl ModelRouter {
    /// Create a router over a catalog.
    pub fn new(catalog: Vec<ModelSpec>) -> Self {
        Self {
            catalog,
            cascade_config: CascadeConfig::default(),
            learner: None,
        }
    }

    /// Create a router with a small default catalog, one model per tier.
    pub fn with_default_catalog() -> Self {
        Self::new(vec![
            ModelSpec::new("swift-mini", ModelTier::Fast)
                .with_costs(0.25, 1.25)
                .with_strength("extraction")
                .with_strength("summarize"),
            ModelSpec::new("steady-core", ModelTier::Balanced)
                .with_costs(3.0, 15.0)
                .with_strength("code")
                .with_strength("debugging"),
            ModelSpec::new("granite-max", ModelTier::Powerful)
                .with_costs(15.0, 75.0)
                .with_strength("architecture")
                .with_strength("design"),
            ModelSpec::new("prover-one", ModelTier::Reasoning)
                .with_costs(10.0, 40.0)
                .with_strength("math")
                .with_strength("logic"),
        ])
    }

    /// Wire in a learner for bounded routing adjustments.
    pub fn with_learner(mut self, learner: Arc<RouterLearner>) -> Self {
        self.learner = Some(learner);
        self
    }

    /// Override the cascade configuration.
    pub fn with_cascade_config(mut self, config: CascadeConfig) -> Self {
        self.cascade_config = config;
        self
    }

    /// Access the catalog.
    pub fn catalog(&self) -> &[ModelSpec] {
        &self.catalog
    }

    /// Add a model to the catalog.
    pub fn add_model(&mut self, model: ModelSpec) {
        self.catalog.push(model);
    }

    /// Determine the required tier for a task.
    ///
    /// Precedence, earlier wins: deep recursion pins fast; reasoning
    /// keywords pin reasoning; analysis keywords with headroom pin powerful;
    /// a starved budget pins fast; everything else lands on balanced.
    pub fn required_tier(&self, task: &str, budget: u64, depth: u32) -> ModelTier {
        if depth >= 3 {
            return ModelTier::Fast;
        }
        let lower = task.to_lowercase();
        if contains_any(&lower, &["prove", "theorem", "logic", "math", "calculate", "reason"]) {
            return ModelTier::Reasoning;
        }
        if contains_any(&lower, &["analyze", "refactor", "design", "architect", "complex"])
            && budget > 5_000
        {
            return ModelTier::Powerful;
        }
        if budget < 1_000 {
            return ModelTier::Fast;
        }
        ModelTier::Balanced
    }

    /// Select a model for a task given budget and recursion depth.
    pub fn select_model(&self, task: &str, budget: u64, depth: u32) -> Result<RoutingDecision> {
        let tier = self.required_tier(task, budget, depth);
        let category = QueryCategory::classify(task);
        let model = self
            .best_in_tier(task, category, tier)
            .ok_or_else(|| Error::Config(format!("no model available in tier {}", tier)))?;

        debug!(model = %model.id, %tier, depth, budget, "selected model");

        Ok(RoutingDecision {
            reason: format!(
                "tier {} required at depth {} with budget {}",
                tier, depth, budget
            ),
            model,
            tier,
            category,
        })
    }

    /// Best-scoring model within a tier: strength-tag matches are worth 10
    /// points each, the learner contributes at most 1, and cheaper input
    /// cost breaks ties.
    fn best_in_tier(
        &self,
        task: &str,
        category: QueryCategory,
        tier: ModelTier,
    ) -> Option<ModelSpec> {
        let lower = task.to_lowercase();
        let mut candidates: Vec<(f64, &ModelSpec)> = self
            .catalog
            .iter()
            .filter(|m| m.tier == tier)
            .map(|m| {
                let tag_score = m
                    .strengths
                    .iter()
                    .filter(|tag| lower.contains(tag.to_lowercase().as_str()))
                    .count() as f64
                    * 10.0;
                let learned = self
                    .learner
                    .as_ref()
                    .map(|l| l.adjustment(category, &m.id))
                    .unwrap_or(0.0);
                (tag_score + learned, m)
            })
            .collect();

        candidates.sort_by(|(sa, ma), (sb, mb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    ma.input_cost
                        .partial_cmp(&mb.input_cost)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        candidates.first().map(|(_, m)| (*m).clone())
    }

    /// Walk tiers cheapest-first until an attempt clears the confidence
    /// threshold. All attempted cost and latency is accumulated; when every
    /// tier falls short, the last attempt's result is returned.
    pub async fn cascade<F, Fut>(&self, query: &str, mut execute: F) -> Result<CascadeResult>
    where
        F: FnMut(ModelSpec) -> Fut,
        Fut: Future<Output = Result<CascadeOutcome>>,
    {
        let category = QueryCategory::classify(query);
        let mut attempts = 0u32;
        let mut total_cost = 0.0f64;
        let mut total_latency_ms = 0u64;
        let mut last: Option<CascadeResult> = None;
        let mut last_err: Option<Error> = None;

        for &tier in &self.cascade_config.tier_order {
            let Some(model) = self.best_in_tier(query, category, tier) else {
                continue;
            };

            attempts += 1;
            let started = Instant::now();
            let outcome = execute(model.clone()).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            total_latency_ms += latency_ms;

            match outcome {
                Ok(outcome) => {
                    total_cost +=
                        model.calculate_cost(outcome.usage.input_tokens, outcome.usage.output_tokens);

                    let result = CascadeResult {
                        text: outcome.text,
                        model_id: model.id.clone(),
                        tier,
                        confidence: outcome.confidence,
                        attempts,
                        escalated: attempts > 1,
                        total_cost,
                        total_latency_ms,
                    };

                    if outcome.confidence >= self.cascade_config.confidence_threshold {
                        return Ok(result);
                    }
                    debug!(
                        model = %result.model_id,
                        confidence = outcome.confidence,
                        threshold = self.cascade_config.confidence_threshold,
                        "cascade escalating"
                    );
                    last = Some(result);
                }
                Err(e) => {
                    debug!(model = %model.id, error = %e, "cascade attempt failed");
                    last_err = Some(e);
                }
            }
        }

        match last {
            Some(mut result) => {
                // Nothing met the threshold; hand back the best we have.
                result.escalated = result.attempts > 1;
                result.total_latency_ms = total_latency_ms;
                result.total_cost = total_cost;
                Ok(result)
            }
            None => Err(last_err
                .unwrap_or_else(|| Error::Config("cascade had no candidate models".into()))),
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
