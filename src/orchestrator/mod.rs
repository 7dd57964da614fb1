//! The recursive orchestration loop.
//!
//! One frame = one [`TaskState`]: the frame asks the meta-controller for a
//! decision, dispatches it to the matching handler under a recovery
//! wrapper, and returns text plus token accounting. DECOMPOSE and SUBCALL
//! recurse into child frames; the async executor fans decomposed children
//! out in parallel when enabled. Memory hints are attached before deciding
//! and an execution record is appended after a successful run.

mod decompose;
mod recovery;
mod synthesize;

pub use decompose::{Chunk, Decomposer, DecomposerConfig};
pub use recovery::{plan as recovery_plan, recovery_prompt, RecoveryConfig, RecoveryPlan};
pub use synthesize::{
    normalize_weights, score_part, SubResult, Synthesis, SynthesisConfig, SynthesisStrategy,
    Synthesizer,
};

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::controller::MetaController;
use crate::error::{Error, ErrorClass, Result};
use crate::executor::{AsyncExecutor, ExecutorConfig, OpOutput, Operation};
use crate::interpreter::{classify_exec_error, CodeInterpreter};
use crate::llm::{ModelClient, ModelRouter, QueryCategory, RoutingDecision};
use crate::memory::{
    HypergraphStore, Node, NodeFilter, NodeType, OutcomeRecorder, RetrievalOutcome, Tier,
    SUBTYPE_RLM_EXECUTION,
};
use crate::state::{approx_tokens, Action, TaskState};
use crate::trace::{TraceEventDraft, TraceEventType, TraceRecorder, TraceStatus};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum recursion depth
    pub max_depth: u32,
    /// Token budget for one `execute` call
    pub total_budget: u64,
    /// Fan decomposed children out through the async executor
    pub enable_executor: bool,
    /// Memory hints attached per frame
    pub memory_hint_limit: usize,
    /// Candidate nodes consulted by MEMORY_QUERY
    pub memory_query_limit: usize,
    /// Hints are truncated to this many characters
    pub hint_truncate_chars: usize,
    /// Ceiling of the direct handler's output cap
    pub direct_output_cap: u64,
    /// Recovery wrapper settings
    pub recovery: RecoveryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            total_budget: 100_000,
            enable_executor: true,
            memory_hint_limit: 5,
            memory_query_limit: 20,
            hint_truncate_chars: 200,
            direct_output_cap: 16_384,
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Final outcome of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Final response text; empty on fatal failure
    pub response: String,
    /// Tokens consumed across the whole run
    pub total_tokens: u64,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Fatal error, when the run could not produce an answer
    pub error: Option<String>,
    /// The answer came from a degraded direct fallback
    pub degraded: bool,
    /// Human-readable degradation reason
    pub degraded_reason: Option<String>,
}

impl ExecutionOutcome {
    /// Whether the run produced an answer.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one orchestration frame.
#[derive(Debug, Clone)]
struct FrameResult {
    text: String,
    tokens: u64,
    degraded: bool,
    degraded_reason: Option<String>,
}

/// Routes model calls to registered clients by catalog id.
///
/// The router picks a [`crate::llm::ModelSpec`]; the pool resolves it to a
/// concrete client, falling back to the default endpoint for ids without a
/// dedicated registration.
pub struct ModelPool {
    router: ModelRouter,
    clients: HashMap<String, Arc<dyn ModelClient>>,
    default_client: Arc<dyn ModelClient>,
}

impl ModelPool {
    /// Pool with one endpoint serving every catalog entry.
    pub fn single(client: Arc<dyn ModelClient>) -> Self {
        Self {
            router: ModelRouter::with_default_catalog(),
            clients: HashMap::new(),
            default_client: client,
        }
    }

    /// Override the router.
    pub fn with_router(mut self, router: ModelRouter) -> Self {
        self.router = router;
        self
    }

    /// Register a dedicated client for one model id.
    pub fn register(mut self, model_id: impl Into<String>, client: Arc<dyn ModelClient>) -> Self {
        self.clients.insert(model_id.into(), client);
        self
    }

    /// The router in use.
    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Select a client for a task at the given budget and depth.
    pub fn select(
        &self,
        task: &str,
        budget: u64,
        depth: u32,
    ) -> (Arc<dyn ModelClient>, Option<RoutingDecision>) {
        match self.router.select_model(task, budget, depth) {
            Ok(decision) => {
                let client = self
                    .clients
                    .get(&decision.model.id)
                    .cloned()
                    .unwrap_or_else(|| Arc::clone(&self.default_client));
                (client, Some(decision))
            }
            Err(e) => {
                warn!(error = %e, "router had no candidate, using default client");
                (Arc::clone(&self.default_client), None)
            }
        }
    }
}

/// The orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: ModelPool,
    controller: MetaController,
    executor: AsyncExecutor,
    decomposer: Decomposer,
    synthesizer: Synthesizer,
    store: Option<Arc<HypergraphStore>>,
    interpreter: Option<Arc<dyn CodeInterpreter>>,
    trace: Arc<TraceRecorder>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    executor_config: ExecutorConfig,
    decomposer_config: DecomposerConfig,
    synthesis_config: SynthesisConfig,
    main_client: Arc<dyn ModelClient>,
    decision_client: Option<Arc<dyn ModelClient>>,
    router: Option<ModelRouter>,
    store: Option<Arc<HypergraphStore>>,
    interpreter: Option<Arc<dyn CodeInterpreter>>,
    trace_capacity: usize,
}

impl OrchestratorBuilder {
    /// Start a builder around the main model client.
    pub fn new(main_client: Arc<dyn ModelClient>) -> Self {
        Self {
            config: OrchestratorConfig::default(),
            executor_config: ExecutorConfig::default(),
            decomposer_config: DecomposerConfig::default(),
            synthesis_config: SynthesisConfig::default(),
            main_client,
            decision_client: None,
            router: None,
            store: None,
            interpreter: None,
            trace_capacity: TraceRecorder::DEFAULT_CAPACITY,
        }
    }

    /// Set the maximum recursion depth.
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Set the per-execute token budget.
    pub fn total_budget(mut self, budget: u64) -> Self {
        self.config.total_budget = budget;
        self
    }

    /// Enable or disable the async executor for decomposition.
    pub fn enable_executor(mut self, enable: bool) -> Self {
        self.config.enable_executor = enable;
        self
    }

    /// Replace the orchestrator configuration wholesale.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a dedicated client for meta-controller decisions.
    pub fn decision_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.decision_client = Some(client);
        self
    }

    /// Set the model router.
    pub fn router(mut self, router: ModelRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Attach the hypergraph store.
    pub fn store(mut self, store: Arc<HypergraphStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the code interpreter.
    pub fn interpreter(mut self, interpreter: Arc<dyn CodeInterpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Configure the executor.
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Configure the decomposer.
    pub fn decomposer_config(mut self, config: DecomposerConfig) -> Self {
        self.decomposer_config = config;
        self
    }

    /// Configure synthesis.
    pub fn synthesis_config(mut self, config: SynthesisConfig) -> Self {
        self.synthesis_config = config;
        self
    }

    /// Configure the recovery wrapper.
    pub fn recovery_config(mut self, config: RecoveryConfig) -> Self {
        self.config.recovery = config;
        self
    }

    /// Set the trace ring capacity.
    pub fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Orchestrator {
        let decision_client = self
            .decision_client
            .unwrap_or_else(|| Arc::clone(&self.main_client));
        let mut pool = ModelPool::single(Arc::clone(&self.main_client));
        if let Some(router) = self.router {
            pool = pool.with_router(router);
        }

        let synthesizer =
            Synthesizer::new(self.synthesis_config).with_client(Arc::clone(&self.main_client));

        Orchestrator {
            config: self.config,
            pool,
            controller: MetaController::new(decision_client),
            executor: AsyncExecutor::new(self.executor_config),
            decomposer: Decomposer::new(self.decomposer_config),
            synthesizer,
            store: self.store,
            interpreter: self.interpreter,
            trace: Arc::new(TraceRecorder::with_capacity(self.trace_capacity)),
        }
    }
}

impl Orchestrator {
    /// Start building an orchestrator.
    pub fn builder(main_client: Arc<dyn ModelClient>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(main_client)
    }

    /// The trace recorder.
    pub fn trace(&self) -> &Arc<TraceRecorder> {
        &self.trace
    }

    /// The attached store, if any.
    pub fn store(&self) -> Option<&Arc<HypergraphStore>> {
        self.store.as_ref()
    }

    /// Run a task to completion.
    ///
    /// Always returns an outcome: degraded runs carry a reason, fatal runs
    /// carry the error with an empty response.
    pub async fn execute(&self, task: &str) -> ExecutionOutcome {
        let started = Instant::now();
        let state = TaskState::new(task, self.config.total_budget, self.config.max_depth);

        match self.orchestrate(state, None).await {
            Ok(frame) => {
                self.record_execution(task, &frame.text, frame.tokens);
                self.trace.record(
                    TraceEventDraft::new(TraceEventType::Final, "DIRECT", 0)
                        .with_tokens(frame.tokens)
                        .with_duration_ms(started.elapsed().as_millis() as u64)
                        .with_status(if frame.degraded {
                            TraceStatus::Degraded
                        } else {
                            TraceStatus::Completed
                        }),
                );
                ExecutionOutcome {
                    response: frame.text,
                    total_tokens: frame.tokens,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: None,
                    degraded: frame.degraded,
                    degraded_reason: frame.degraded_reason,
                }
            }
            Err(e) => ExecutionOutcome {
                response: String::new(),
                total_tokens: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
                degraded: false,
                degraded_reason: None,
            },
        }
    }

    /// One recursive orchestration frame.
    fn orchestrate(
        &self,
        state: TaskState,
        parent_id: Option<String>,
    ) -> BoxFuture<'_, Result<FrameResult>> {
        Box::pin(async move {
            let frame_id = format!("frame-{}", &Uuid::new_v4().to_string()[..8]);
            let started = Instant::now();

            let mut state = state;
            if state.memory_hints.is_empty() {
                state.memory_hints = self.scan_memory_hints(&state.task);
            }

            self.trace.record({
                let mut draft = TraceEventDraft::new(
                    TraceEventType::DecisionRunning,
                    "PENDING",
                    state.recursion_depth,
                );
                if let Some(parent) = &parent_id {
                    draft = draft.with_parent(parent.clone());
                }
                draft
            });

            let (decision, decide_tokens) = self.controller.decide(&state).await;
            debug!(
                frame = %frame_id,
                action = decision.action.name(),
                reasoning = %decision.reasoning,
                "frame decided"
            );
            state.budget_remain = state.budget_remain.saturating_sub(decide_tokens);

            let action = decision.action;
            let action_name = action.name().to_string();
            let mut attempt = 0u32;
            let mut state = state;

            loop {
                match self.dispatch(&action, &state, &frame_id).await {
                    Ok((text, tokens)) => {
                        self.trace.record(
                            TraceEventDraft::new(
                                TraceEventType::DecisionCompleted,
                                action_name.clone(),
                                state.recursion_depth,
                            )
                            .with_tokens(decide_tokens + tokens)
                            .with_duration_ms(started.elapsed().as_millis() as u64)
                            .with_parent(frame_id.clone())
                            .with_status(TraceStatus::Completed),
                        );
                        return Ok(FrameResult {
                            text,
                            tokens: decide_tokens + tokens,
                            degraded: false,
                            degraded_reason: None,
                        });
                    }
                    Err(e) => {
                        let class = e.classify();
                        if matches!(class, ErrorClass::Retryable | ErrorClass::Timeout) {
                            self.trace.record(
                                TraceEventDraft::new(
                                    TraceEventType::Recovery,
                                    action_name.clone(),
                                    state.recursion_depth,
                                )
                                .with_parent(frame_id.clone())
                                .with_status(TraceStatus::Failed),
                            );
                        }

                        match recovery_plan(&e, attempt, &self.config.recovery) {
                            RecoveryPlan::Retry { delay } => {
                                debug!(frame = %frame_id, error = %e, "retrying after failure");
                                tokio::time::sleep(delay).await;
                                state.task = recovery_prompt(&state.task, &e);
                                attempt += 1;
                            }
                            RecoveryPlan::Degrade { reason, warning } => {
                                self.trace.record(
                                    TraceEventDraft::new(
                                        TraceEventType::Degradation,
                                        action_name.clone(),
                                        state.recursion_depth,
                                    )
                                    .with_parent(frame_id.clone())
                                    .with_status(TraceStatus::Degraded),
                                );
                                warn!(frame = %frame_id, reason = %reason, "degrading to DIRECT");

                                let (text, tokens) = self.handle_direct(&state).await?;
                                let text = match warning {
                                    Some(w) => format!("{}\n\n{}", text, w),
                                    None => text,
                                };
                                return Ok(FrameResult {
                                    text,
                                    tokens: decide_tokens + tokens,
                                    degraded: true,
                                    degraded_reason: Some(reason),
                                });
                            }
                            RecoveryPlan::Surface => {
                                self.trace.record(
                                    TraceEventDraft::new(
                                        TraceEventType::DecisionFailed,
                                        action_name.clone(),
                                        state.recursion_depth,
                                    )
                                    .with_duration_ms(started.elapsed().as_millis() as u64)
                                    .with_parent(frame_id.clone())
                                    .with_status(TraceStatus::Failed),
                                );
                                return Err(e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Exhaustive dispatch over the decision's action.
    async fn dispatch(
        &self,
        action: &Action,
        state: &TaskState,
        frame_id: &str,
    ) -> Result<(String, u64)> {
        match action {
            Action::Direct => self.handle_direct(state).await,
            Action::Decompose { strategy, chunks } => {
                self.handle_decompose(*strategy, chunks, state, frame_id).await
            }
            Action::MemoryQuery { query } => self.handle_memory_query(query, state).await,
            Action::Subcall {
                prompt,
                snippet,
                token_budget,
            } => {
                self.handle_subcall(prompt, snippet, *token_budget, state, frame_id)
                    .await
            }
            Action::Synthesize => self.handle_synthesize(state).await,
            Action::Execute { code } => self.handle_execute(code, state).await,
        }
    }

    /// DIRECT: answer with the main model, hints appended.
    async fn handle_direct(&self, state: &TaskState) -> Result<(String, u64)> {
        let mut prompt = state.task.clone();
        if !state.memory_hints.is_empty() {
            prompt.push_str("\n\nRelevant memory:\n");
            for hint in &state.memory_hints {
                prompt.push_str(&format!("- {}\n", hint));
            }
        }

        let input_tokens = approx_tokens(&prompt).max(1);
        let cap = (3 * input_tokens).min(self.config.direct_output_cap);

        let (client, _decision) =
            self.pool
                .select(&state.task, state.budget_remain, state.recursion_depth);
        let completion = client.complete(&prompt, cap).await?;
        Ok((completion.text, completion.usage.total()))
    }

    /// DECOMPOSE: chunk, recurse per chunk, reassemble in index order,
    /// synthesize.
    async fn handle_decompose(
        &self,
        strategy: crate::state::DecomposeStrategy,
        chunks: &[String],
        state: &TaskState,
        frame_id: &str,
    ) -> Result<(String, u64)> {
        let chunks = self.decomposer.decompose(strategy, &state.task, chunks)?;
        let n = chunks.len();
        let mut sub_results: Vec<SubResult> = Vec::with_capacity(n);
        let mut child_tokens = 0u64;

        if self.config.enable_executor && n > 1 {
            let ops: Vec<Operation> = chunks
                .iter()
                .map(|chunk| {
                    Operation::new(
                        format!("chunk-{}", chunk.index),
                        chunk.label.clone(),
                        state.child_split(chunk.content.clone(), n),
                    )
                    .with_parent(frame_id)
                    // Earlier chunks admit first under contention.
                    .with_priority(-(chunk.index as i32))
                })
                .collect();

            let batch = self
                .executor
                .execute_parallel(ops, state.budget_remain, |op, _token| {
                    let child_state = op.state.clone();
                    let parent = op.parent_id.clone();
                    async move {
                        let frame = self.orchestrate(child_state, parent).await?;
                        Ok(OpOutput::new(frame.text, frame.tokens))
                    }
                })
                .await?;

            child_tokens = batch.total_tokens;
            // Reassemble in original chunk order regardless of completion.
            for chunk in &chunks {
                let id = format!("chunk-{}", chunk.index);
                match batch.results.get(&id) {
                    Some(result) if result.is_success() => {
                        sub_results.push(SubResult::ok(
                            chunk.label.clone(),
                            result.output.clone(),
                            result.tokens,
                        ));
                    }
                    Some(result) => {
                        sub_results.push(SubResult::failed(
                            chunk.label.clone(),
                            result.error.clone().unwrap_or_else(|| "failed".into()),
                        ));
                    }
                    None => {
                        sub_results
                            .push(SubResult::failed(chunk.label.clone(), "missing result"));
                    }
                }
            }
        } else {
            for chunk in &chunks {
                let child = state.child_split(chunk.content.clone(), n);
                match self.orchestrate(child, Some(frame_id.to_string())).await {
                    Ok(frame) => {
                        child_tokens += frame.tokens;
                        sub_results.push(SubResult::ok(
                            chunk.label.clone(),
                            frame.text,
                            frame.tokens,
                        ));
                    }
                    Err(e) => {
                        sub_results.push(SubResult::failed(chunk.label.clone(), e.to_string()))
                    }
                }
            }
        }

        self.trace.record(
            TraceEventDraft::new(
                TraceEventType::Synthesize,
                "DECOMPOSE",
                state.recursion_depth,
            )
            .with_parent(frame_id)
            .with_status(TraceStatus::Running),
        );
        let synthesis = self.synthesizer.synthesize(&state.task, &sub_results).await?;
        Ok((synthesis.response, child_tokens + synthesis.tokens))
    }

    /// MEMORY_QUERY: substring recall over fact and experience nodes.
    async fn handle_memory_query(&self, query: &str, state: &TaskState) -> Result<(String, u64)> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Internal("no memory store configured".into()))?;

        let started = Instant::now();
        let needle = if query.trim().is_empty() {
            state.task.to_lowercase()
        } else {
            query.to_lowercase()
        };

        let candidates = store.list_nodes(
            &NodeFilter::new()
                .types(vec![NodeType::Fact, NodeType::Experience])
                .tiers(Tier::active().to_vec())
                .limit(self.config.memory_query_limit),
        )?;

        let matches: Vec<&Node> = candidates
            .iter()
            .filter(|n| n.content.to_lowercase().contains(&needle))
            .collect();

        let recorder = OutcomeRecorder::new(Arc::clone(store));
        let category = format!("{:?}", QueryCategory::classify(&needle)).to_lowercase();
        for node in &matches {
            store.increment_access(&node.id)?;
            let outcome = RetrievalOutcome::new(&needle, category.clone(), node.node_type.to_string())
                .with_subtype(node.subtype.clone())
                .with_relevance(node.confidence)
                .used(true)
                .with_context_tokens(approx_tokens(&node.content))
                .with_latency_ms(started.elapsed().as_millis() as u64);
            if let Err(e) = recorder.record(&outcome) {
                warn!(error = %e, "failed to record retrieval outcome");
            }
        }

        self.trace.record(
            TraceEventDraft::new(TraceEventType::Memory, "MEMORY_QUERY", state.recursion_depth)
                .with_status(TraceStatus::Completed),
        );

        if matches.is_empty() {
            return Ok(("No matching memories found.".to_string(), 0));
        }
        let text = matches
            .iter()
            .map(|n| format!("- {}", n.content))
            .collect::<Vec<_>>()
            .join("\n");
        Ok((text, 0))
    }

    /// SUBCALL: recurse on a focused prompt + snippet.
    async fn handle_subcall(
        &self,
        prompt: &str,
        snippet: &str,
        token_budget: Option<u64>,
        state: &TaskState,
        frame_id: &str,
    ) -> Result<(String, u64)> {
        let task = if snippet.trim().is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", prompt, snippet)
        };
        let budget = token_budget.unwrap_or(state.budget_remain / 2);
        let child = state.child(task, budget);
        let frame = self.orchestrate(child, Some(frame_id.to_string())).await?;
        Ok((frame.text, frame.tokens))
    }

    /// SYNTHESIZE: combine accumulated partial results.
    async fn handle_synthesize(&self, state: &TaskState) -> Result<(String, u64)> {
        if state.partial_results.is_empty() {
            return Err(Error::Synthesis("no partial results to synthesize".into()));
        }
        let sub_results: Vec<SubResult> = state
            .partial_results
            .iter()
            .enumerate()
            .map(|(i, content)| SubResult::ok(format!("part {}", i + 1), content.clone(), 0))
            .collect();

        let synthesis = self.synthesizer.synthesize(&state.task, &sub_results).await?;
        Ok((synthesis.response, synthesis.tokens))
    }

    /// EXECUTE: hand code to the interpreter collaborator.
    async fn handle_execute(&self, code: &str, _state: &TaskState) -> Result<(String, u64)> {
        let interpreter = self
            .interpreter
            .as_ref()
            .ok_or_else(|| Error::Internal("no code interpreter configured".into()))?;
        if code.trim().is_empty() {
            return Err(Error::Internal("EXECUTE decision carried no code".into()));
        }

        let outcome = interpreter.execute(code).await?;
        if let Some(message) = &outcome.error {
            return Err(classify_exec_error(message));
        }
        Ok((outcome.as_text(), 0))
    }

    /// Keyword scan for memory hints; increments access per hinted node.
    fn scan_memory_hints(&self, task: &str) -> Vec<String> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        let keywords = keyword_tokens(task);
        if keywords.is_empty() {
            return Vec::new();
        }

        let candidates = match store.list_nodes(
            &NodeFilter::new()
                .types(vec![NodeType::Fact])
                .tiers(Tier::active().to_vec())
                .limit(100),
        ) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "memory hint scan failed");
                return Vec::new();
            }
        };

        let mut hints = Vec::new();
        for node in candidates {
            let lower = node.content.to_lowercase();
            if keywords.iter().any(|k| lower.contains(k.as_str())) {
                if let Err(e) = store.increment_access(&node.id) {
                    warn!(error = %e, "hint access bump failed");
                }
                hints.push(truncate_chars(&node.content, self.config.hint_truncate_chars));
                if hints.len() >= self.config.memory_hint_limit {
                    break;
                }
            }
        }
        hints
    }

    /// Append an execution record after a successful run.
    fn record_execution(&self, task: &str, response: &str, tokens: u64) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let node = Node::new(NodeType::Decision, task)
            .with_subtype(SUBTYPE_RLM_EXECUTION)
            .with_tier(Tier::Session)
            .with_metadata("response", truncate_chars(response, 500))
            .with_metadata("tokens", tokens);
        if let Err(e) = store.create_node(&node) {
            warn!(error = %e, "failed to record execution node");
        }
    }
}

/// Tokenize a task for the hint scan: lowercase words of length >= 4 with
/// stop-words removed.
fn keyword_tokens(task: &str) -> Vec<String> {
    const STOP_WORDS: [&str; 37] = [
        "this", "that", "with", "from", "have", "what", "when", "where", "which", "will",
        "would", "could", "should", "about", "into", "over", "your", "there", "their", "then",
        "than", "been", "were", "does", "just", "like", "make", "more", "most", "some", "such",
        "only", "other", "also", "very", "each", "please",
    ];

    let lower = task.to_lowercase();
    let mut tokens = Vec::new();
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if word.len() >= 4 && !STOP_WORDS.iter().any(|s| *s == word) {
            tokens.push(word.to_string());
        }
    }
    tokens
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::interpreter::testing::ScriptedInterpreter;
    use crate::interpreter::ExecOutcome;
    use crate::llm::testing::ScriptedClient;
    use pretty_assertions::assert_eq;

    fn direct_json() -> String {
        r#"{"action":"DIRECT","params":null,"reasoning":"simple"}"#.to_string()
    }

    #[tokio::test]
    async fn test_direct_flow() {
        let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("4")))
            .decision_client(Arc::new(ScriptedClient::always(direct_json())))
            .total_budget(1_000)
            .build();

        let outcome = orchestrator.execute("What is 2+2?").await;
        assert!(outcome.is_success());
        assert!(outcome.response.contains('4'));
        assert!(!outcome.degraded);
        assert!(outcome.total_tokens > 0);

        // One decision was made.
        let running = orchestrator
            .trace()
            .by_type(TraceEventType::DecisionRunning);
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].depth, 0);
    }

    #[tokio::test]
    async fn test_decompose_parallel_reassembles_in_order() {
        let decision_client = ScriptedClient::new(vec![
            Ok(r#"{"action":"DECOMPOSE","params":{"strategy":"custom","chunks":["a","b","c"]},"reasoning":"split"}"#.to_string()),
            Ok(direct_json()),
        ])
        .with_tokens_per_call(0);

        let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("R")))
            .decision_client(Arc::new(decision_client))
            .total_budget(10_000)
            .build();

        let outcome = orchestrator.execute("analyze all three parts").await;
        assert!(outcome.is_success());
        // Three children, each answered "R", concatenated.
        assert_eq!(outcome.response, "R\n\nR\n\nR");
        assert!(outcome.total_tokens >= 300);
    }

    #[tokio::test]
    async fn test_memory_hint_increments_access_once() {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        let fact = Node::new(NodeType::Fact, "Users authenticate via JWT");
        store.create_node(&fact).unwrap();

        let orchestrator =
            Orchestrator::builder(Arc::new(ScriptedClient::always("Use JWT tokens.")))
                .decision_client(Arc::new(ScriptedClient::always(direct_json())))
                .store(Arc::clone(&store))
                .build();

        let outcome = orchestrator.execute("How do we auth? Explain authenticate flow").await;
        assert!(outcome.is_success());

        let updated = store.get_node(&fact.id).unwrap().unwrap();
        assert_eq!(updated.access_count, 1);
    }

    #[tokio::test]
    async fn test_memory_query_handler_formats_bullets() {
        let store = Arc::new(HypergraphStore::in_memory().unwrap());
        store
            .create_node(&Node::new(NodeType::Fact, "Sessions expire after 30 minutes"))
            .unwrap();

        let decision_client = ScriptedClient::new(vec![
            Ok(r#"{"action":"MEMORY_QUERY","params":{"query":"sessions expire"},"reasoning":"recall"}"#.to_string()),
        ]);

        let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("unused")))
            .decision_client(Arc::new(decision_client))
            .store(Arc::clone(&store))
            .build();

        let outcome = orchestrator.execute("What is our session policy?").await;
        assert!(outcome.is_success());
        assert!(outcome.response.starts_with("- Sessions expire"));
    }

    #[tokio::test]
    async fn test_execute_retries_then_degrades() {
        let syntax_error = || {
            Ok(ExecOutcome {
                error: Some("SyntaxError: invalid syntax".into()),
                ..ExecOutcome::default()
            })
        };
        let interpreter = ScriptedInterpreter::new(vec![syntax_error(), syntax_error()]);

        let decision_client = ScriptedClient::new(vec![Ok(
            r#"{"action":"EXECUTE","params":{"code":"print(x"},"reasoning":"run it"}"#.to_string(),
        )]);

        let orchestrator =
            Orchestrator::builder(Arc::new(ScriptedClient::always("fallback answer")))
                .decision_client(Arc::new(decision_client))
                .interpreter(Arc::new(interpreter))
                .recovery_config(RecoveryConfig {
                    max_retries: 1,
                    retry_delay: std::time::Duration::from_millis(1),
                    jitter: 0.0,
                })
                .build();

        let outcome = orchestrator.execute("run the snippet").await;
        assert!(outcome.is_success());
        assert!(outcome.degraded);
        assert!(outcome.response.contains("fallback answer"));

        let trace = orchestrator.trace();
        assert_eq!(trace.by_type(TraceEventType::Recovery).len(), 2);
        assert_eq!(trace.by_type(TraceEventType::Degradation).len(), 1);
    }

    #[tokio::test]
    async fn test_subcall_recurses_with_halved_budget() {
        let decision_client = ScriptedClient::new(vec![
            Ok(r#"{"action":"SUBCALL","params":{"prompt":"inspect the snippet","snippet":"fn f() {}"},"reasoning":"focus"}"#.to_string()),
            Ok(direct_json()),
        ]);

        let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("looks fine")))
            .decision_client(Arc::new(decision_client))
            .total_budget(8_000)
            .build();

        let outcome = orchestrator.execute("review this code").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.response, "looks fine");

        // Child frame ran one level deeper.
        let running = orchestrator
            .trace()
            .by_type(TraceEventType::DecisionRunning);
        assert_eq!(running.len(), 2);
        assert!(running.iter().any(|e| e.depth == 1));
    }

    #[tokio::test]
    async fn test_terminal_error_surfaces_as_fatal() {
        let main = ScriptedClient::new(vec![Err(Error::model_client(
            "provider",
            "unauthorized: bad api key",
        ))]);
        let orchestrator = Orchestrator::builder(Arc::new(main))
            .decision_client(Arc::new(ScriptedClient::always(direct_json())))
            .build();

        let outcome = orchestrator.execute("anything").await;
        assert!(!outcome.is_success());
        assert!(outcome.response.is_empty());
        assert!(outcome.error.unwrap().contains("unauthorized"));
    }

    #[tokio::test]
    async fn test_decompose_serial_when_executor_disabled() {
        let decision_client = ScriptedClient::new(vec![
            Ok(r#"{"action":"DECOMPOSE","params":{"strategy":"custom","chunks":["x","y"]},"reasoning":"split"}"#.to_string()),
            Ok(direct_json()),
        ]);

        let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("S")))
            .decision_client(Arc::new(decision_client))
            .enable_executor(false)
            .build();

        let outcome = orchestrator.execute("two part job").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.response, "S\n\nS");
    }

    #[tokio::test]
    async fn test_depth_zero_max_forces_direct() {
        let decision_client = ScriptedClient::always(
            r#"{"action":"DECOMPOSE","params":{"strategy":"custom","chunks":["a"]}}"#,
        );
        let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("direct")))
            .decision_client(Arc::new(decision_client))
            .max_depth(0)
            .build();

        let outcome = orchestrator.execute("deep task").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.response, "direct");
    }

    #[test]
    fn test_keyword_tokens_filtering() {
        let tokens = keyword_tokens("How do we authenticate users with JWT?");
        assert!(tokens.contains(&"authenticate".to_string()));
        assert!(tokens.contains(&"users".to_string()));
        // Short words and stop-words dropped.
        assert!(!tokens.iter().any(|t| t == "how" || t == "with"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello");
    }
}
