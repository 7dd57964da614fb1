//! Parallel, speculative, and dependency-aware execution of operations.
//!
//! The executor owns no work of its own: callers hand it operations plus an
//! async work function, and it handles admission control, timeouts,
//! cancellation, and partial-failure policy. Concurrency is bounded by both
//! a configured ceiling and the remaining token budget, so parallelism
//! degrades to serial execution under budget pressure instead of
//! overspending.

mod types;

pub use types::{
    ExecutionPlan, ExecutionResult, ExecutorConfig, ExecutorStats, FailurePolicy, OpOutput,
    Operation, OperationResult, SpeculativeResult,
};

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Cancellation handle observed by in-flight operations.
///
/// Cancellation is best-effort: an operation notices at its next suspension
/// point, either through [`CancelToken::cancelled`] in a select or by
/// polling [`CancelToken::is_cancelled`].
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; treat as never-cancels.
                futures::future::pending::<()>().await;
            }
        }
    }

    /// A token that never cancels, for callers outside any batch.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }
}

/// Cancellation source scoped to one executor call.
struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (
            Self { tx },
            CancelToken {
                rx,
                _keepalive: None,
            },
        )
    }

    fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The async executor.
pub struct AsyncExecutor {
    config: ExecutorConfig,
    stats: Arc<ExecutorStats>,
}

impl AsyncExecutor {
    /// Create an executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            stats: Arc::new(ExecutorStats::default()),
        }
    }

    /// The executor's shared counters.
    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Effective parallelism for a batch:
    /// `min(max_parallel, budget_limit, len)` with a floor of one, where
    /// `budget_limit = remaining_budget / estimated_cost_per_op`.
    pub fn effective_parallelism(&self, remaining_budget: u64, len: usize) -> usize {
        let budget_limit =
            (remaining_budget / self.config.estimated_cost_per_op).max(1) as usize;
        self.config
            .max_parallel
            .min(budget_limit)
            .min(len.max(1))
            .max(1)
    }

    /// Run independent operations concurrently under bounded admission.
    ///
    /// Results come back keyed by op id; completion order is unspecified.
    /// Higher-priority operations are admitted first among ties.
    pub async fn execute_parallel<F, Fut>(
        &self,
        mut ops: Vec<Operation>,
        remaining_budget: u64,
        run: F,
    ) -> Result<ExecutionResult>
    where
        F: Fn(Operation, CancelToken) -> Fut + Sync,
        Fut: Future<Output = Result<OpOutput>>,
    {
        if ops.is_empty() {
            return Ok(ExecutionResult::default());
        }

        let parallelism = self.effective_parallelism(remaining_budget, ops.len());
        debug!(
            ops = ops.len(),
            parallelism, remaining_budget, "parallel batch starting"
        );

        // Admission order: priority descending, stable among ties.
        ops.sort_by_key(|op| std::cmp::Reverse(op.priority));

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let (source, token) = CancelSource::new();
        let source = Arc::new(source);
        let started = Instant::now();
        let policy = self.config.failure_policy;

        let futures: Vec<_> = ops
            .into_iter()
            .map(|op| {
                let semaphore = Arc::clone(&semaphore);
                let source = Arc::clone(&source);
                let token = token.clone();
                let run = &run;

                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return OperationResult::failure(
                                op.id.clone(),
                                &Error::cancelled("semaphore closed"),
                                0,
                            )
                        }
                    };
                    if token.is_cancelled() {
                        return OperationResult::failure(
                            op.id.clone(),
                            &Error::cancelled("batch cancelled"),
                            0,
                        );
                    }

                    let result = self.run_one(op, token.clone(), run).await;
                    if policy == FailurePolicy::FailFast
                        && !result.is_success()
                        && !result.cancelled
                    {
                        source.cancel();
                    }
                    result
                }
            })
            .collect();

        let results = join_all(futures).await;
        let mut execution =
            ExecutionResult::from_results(results, started.elapsed().as_millis() as u64);

        if policy == FailurePolicy::FailFast {
            execution.error = execution
                .failure_ids
                .iter()
                .filter_map(|id| execution.results.get(id))
                .find(|r| !r.cancelled)
                .and_then(|r| r.error.clone());
        }

        Ok(execution)
    }

    /// Race alternatives; the first success wins and the rest are cancelled.
    ///
    /// Tokens consumed by every alternative, including losers, are summed
    /// into the result. With no successful alternative the race fails.
    pub async fn execute_speculative<F, Fut>(
        &self,
        alts: Vec<Operation>,
        run: F,
    ) -> Result<SpeculativeResult>
    where
        F: Fn(Operation, CancelToken) -> Fut + Sync,
        Fut: Future<Output = Result<OpOutput>>,
    {
        if alts.is_empty() {
            return Err(Error::InvalidArgument(
                "speculative execution needs at least one alternative".into(),
            ));
        }

        let all_ids: Vec<String> = alts.iter().map(|a| a.id.clone()).collect();
        let (source, token) = CancelSource::new();
        let started = Instant::now();

        let mut in_flight: FuturesUnordered<_> = alts
            .into_iter()
            .map(|op| {
                let token = token.clone();
                let run = &run;
                async move { self.run_one(op, token, run).await }
            })
            .collect();

        let mut winner: Option<OperationResult> = None;
        let mut total_tokens = 0u64;
        let mut last_error: Option<String> = None;

        while let Some(result) = in_flight.next().await {
            total_tokens += result.tokens;
            if result.is_success() && winner.is_none() {
                debug!(winner = %result.op_id, "speculative winner claimed");
                winner = Some(result);
                // Winner claimed: losers observe this at their next
                // suspension point.
                source.cancel();
            } else if !result.is_success() {
                last_error = result.error.clone().or(last_error);
            }
        }

        match winner {
            Some(result) => {
                let cancelled = all_ids
                    .iter()
                    .filter(|id| **id != result.op_id)
                    .cloned()
                    .collect();
                Ok(SpeculativeResult {
                    winner: result.op_id.clone(),
                    result,
                    cancelled,
                    total_tokens,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            None => Err(Error::Internal(format!(
                "all speculative alternatives failed: {}",
                last_error.unwrap_or_else(|| "no error recorded".into())
            ))),
        }
    }

    /// Execute a dependency DAG.
    ///
    /// Repeatedly computes the ready set (operations whose dependencies all
    /// completed), runs it as a parallel batch, and merges results; every
    /// completed id is visible to later ready-set computations. An empty
    /// ready set with work remaining means the graph has a cycle.
    pub async fn execute_plan<F, Fut>(
        &self,
        plan: ExecutionPlan,
        remaining_budget: u64,
        run: F,
    ) -> Result<ExecutionResult>
    where
        F: Fn(Operation, CancelToken) -> Fut + Sync,
        Fut: Future<Output = Result<OpOutput>>,
    {
        plan.validate()?;
        if plan.is_empty() {
            return Ok(ExecutionResult::default());
        }

        let started = Instant::now();
        let mut pending = plan.operations;
        let mut all_results: Vec<OperationResult> = Vec::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut budget = remaining_budget;
        let mut batch_error: Option<String> = None;

        while !pending.is_empty() {
            if self.config.failure_policy == FailurePolicy::FailDependents {
                // Fail transitive dependents of failed ops before admission.
                loop {
                    let mut progressed = false;
                    let mut still_pending = Vec::with_capacity(pending.len());
                    for op in pending {
                        if let Some(dep) =
                            op.depends_on.iter().find(|d| failed.contains(d.as_str()))
                        {
                            let err = Error::DependencyFailed {
                                op_id: op.id.clone(),
                                dependency: dep.clone(),
                            };
                            warn!(op = %op.id, dependency = %dep, "failing dependent");
                            completed.insert(op.id.clone());
                            failed.insert(op.id.clone());
                            all_results.push(OperationResult::failure(op.id, &err, 0));
                            progressed = true;
                        } else {
                            still_pending.push(op);
                        }
                    }
                    pending = still_pending;
                    if !progressed {
                        break;
                    }
                }
                if pending.is_empty() {
                    break;
                }
            }

            let (ready, rest): (Vec<Operation>, Vec<Operation>) = pending
                .into_iter()
                .partition(|op| op.depends_on.iter().all(|d| completed.contains(d.as_str())));
            pending = rest;

            if ready.is_empty() {
                let stuck: Vec<String> = pending.iter().map(|op| op.id.clone()).collect();
                return Err(Error::CircularDependency(stuck.join(", ")));
            }

            let batch = self.execute_parallel(ready, budget, &run).await?;
            budget = budget.saturating_sub(batch.total_tokens);

            for id in &batch.success_ids {
                completed.insert(id.clone());
            }
            for id in &batch.failure_ids {
                completed.insert(id.clone());
                failed.insert(id.clone());
            }
            if batch.error.is_some() {
                batch_error = batch.error.clone();
            }
            all_results.extend(batch.results.into_values());

            if self.config.failure_policy == FailurePolicy::FailFast && batch_error.is_some() {
                // Cancel the remainder of the plan.
                for op in pending.drain(..) {
                    all_results.push(OperationResult::failure(
                        op.id,
                        &Error::cancelled("plan cancelled after failure"),
                        0,
                    ));
                }
                break;
            }
        }

        let mut execution =
            ExecutionResult::from_results(all_results, started.elapsed().as_millis() as u64);
        execution.error = batch_error;
        Ok(execution)
    }

    /// Run one operation under timeout and cancellation.
    async fn run_one<F, Fut>(
        &self,
        op: Operation,
        token: CancelToken,
        run: &F,
    ) -> OperationResult
    where
        F: Fn(Operation, CancelToken) -> Fut + Sync,
        Fut: Future<Output = Result<OpOutput>>,
    {
        self.stats.enter();
        let op_id = op.id.clone();
        let timeout = op.timeout.unwrap_or(self.config.default_timeout);
        let started = Instant::now();

        let result = tokio::select! {
            outcome = tokio::time::timeout(timeout, run(op, token.clone())) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                match outcome {
                    Ok(Ok(output)) => OperationResult::success(op_id, output, duration_ms),
                    Ok(Err(e)) => OperationResult::failure(op_id, &e, duration_ms),
                    Err(_) => OperationResult::failure(
                        op_id,
                        &Error::timeout(timeout.as_millis() as u64),
                        duration_ms,
                    ),
                }
            }
            _ = token.cancelled() => {
                OperationResult::failure(
                    op_id,
                    &Error::cancelled("cancelled in flight"),
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        self.stats.exit(&result);
        result
    }
}

impl Default for AsyncExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}
