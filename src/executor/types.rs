//! Executor value types: operations, plans, results, failure policies.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::state::TaskState;

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique id within a batch or plan
    pub id: String,
    /// Task text
    pub task: String,
    /// Nested orchestration state for the operation
    pub state: TaskState,
    /// Higher runs first among ties
    #[serde(default)]
    pub priority: i32,
    /// Per-op timeout; None inherits the executor default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Parent operation or frame id, for tracing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Ids of operations that must complete first (plans only)
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Operation {
    /// Create an operation.
    pub fn new(id: impl Into<String>, task: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            state,
            priority: 0,
            timeout: None,
            parent_id: None,
            depends_on: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a per-op timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the parent id for tracing.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Add a dependency.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// A dependency-aware set of operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Operations in submission order
    pub operations: Vec<Operation>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation.
    pub fn add(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Validate id uniqueness and dependency references.
    pub fn validate(&self) -> crate::error::Result<()> {
        let mut ids = HashSet::new();
        for op in &self.operations {
            if !ids.insert(op.id.as_str()) {
                return Err(crate::error::Error::InvalidArgument(format!(
                    "duplicate operation id {}",
                    op.id
                )));
            }
        }
        for op in &self.operations {
            for dep in &op.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(crate::error::Error::InvalidArgument(format!(
                        "operation {} depends on unknown id {}",
                        op.id, dep
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// Output of one operation's work function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpOutput {
    /// Result text
    pub text: String,
    /// Tokens consumed
    pub tokens: u64,
}

impl OpOutput {
    pub fn new(text: impl Into<String>, tokens: u64) -> Self {
        Self {
            text: text.into(),
            tokens,
        }
    }
}

/// Result of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Operation id
    pub op_id: String,
    /// Output text (empty on failure)
    pub output: String,
    /// Tokens consumed
    pub tokens: u64,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Error message, when the operation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failure was a deadline overrun
    #[serde(default)]
    pub timed_out: bool,
    /// The operation was cancelled before completing
    #[serde(default)]
    pub cancelled: bool,
}

impl OperationResult {
    /// Successful result.
    pub fn success(op_id: impl Into<String>, output: OpOutput, duration_ms: u64) -> Self {
        Self {
            op_id: op_id.into(),
            output: output.text,
            tokens: output.tokens,
            duration_ms,
            error: None,
            timed_out: false,
            cancelled: false,
        }
    }

    /// Failed result from an error.
    pub fn failure(op_id: impl Into<String>, error: &crate::error::Error, duration_ms: u64) -> Self {
        Self {
            op_id: op_id.into(),
            output: String::new(),
            tokens: 0,
            duration_ms,
            error: Some(error.to_string()),
            timed_out: matches!(error, crate::error::Error::Timeout { .. }),
            cancelled: error.is_cancelled(),
        }
    }

    /// Whether the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a batch or plan execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Per-operation results keyed by op id
    pub results: HashMap<String, OperationResult>,
    /// Ids that succeeded
    pub success_ids: Vec<String>,
    /// Ids that failed (including cancellations)
    pub failure_ids: Vec<String>,
    /// Total tokens across all operations
    pub total_tokens: u64,
    /// Wall-clock duration of the whole batch
    pub duration_ms: u64,
    /// Batch-level error under fail-fast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Build from per-op results, computing the partition and totals.
    pub fn from_results(results: Vec<OperationResult>, duration_ms: u64) -> Self {
        let mut map = HashMap::with_capacity(results.len());
        let mut success_ids = Vec::new();
        let mut failure_ids = Vec::new();
        let mut total_tokens = 0;

        for result in results {
            total_tokens += result.tokens;
            if result.is_success() {
                success_ids.push(result.op_id.clone());
            } else {
                failure_ids.push(result.op_id.clone());
            }
            map.insert(result.op_id.clone(), result);
        }

        Self {
            results: map,
            success_ids,
            failure_ids,
            total_tokens,
            duration_ms,
            error: None,
        }
    }

    /// Outputs for the given ids in order, skipping failures.
    pub fn ordered_outputs(&self, ids: &[String]) -> Vec<&OperationResult> {
        ids.iter()
            .filter_map(|id| self.results.get(id))
            .filter(|r| r.is_success())
            .collect()
    }

    /// Whether every operation succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failure_ids.is_empty()
    }
}

/// Result of a speculative race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeculativeResult {
    /// Id of the winning operation
    pub winner: String,
    /// The winner's result
    pub result: OperationResult,
    /// Every non-winner op id
    pub cancelled: Vec<String>,
    /// Tokens summed across all alternatives, winners and losers alike
    pub total_tokens: u64,
    /// Wall-clock duration of the race
    pub duration_ms: u64,
}

/// Policy for handling partial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// First error cancels the batch; the error surfaces with partial results
    FailFast,
    /// A failing op fails its transitive dependents; siblings continue
    FailDependents,
    /// Everything runs; failures are recorded per-op
    ContinueOnError,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Hard ceiling on concurrent operations
    pub max_parallel: usize,
    /// Default per-op timeout
    pub default_timeout: Duration,
    /// Estimated tokens one operation will consume, for budget admission
    pub estimated_cost_per_op: u64,
    /// Partial-failure policy
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            default_timeout: Duration::from_secs(120),
            estimated_cost_per_op: 2_000,
            failure_policy: FailurePolicy::ContinueOnError,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_estimated_cost_per_op(mut self, tokens: u64) -> Self {
        self.estimated_cost_per_op = tokens.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Shared executor counters. Plain atomics; incrementing never takes a lock.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Operations started
    pub started: AtomicU64,
    /// Operations completed successfully
    pub completed: AtomicU64,
    /// Operations failed
    pub failed: AtomicU64,
    /// Operations cancelled
    pub cancelled: AtomicU64,
    /// Currently in flight
    pub in_flight: AtomicU64,
    /// High-water mark of in-flight operations
    pub max_in_flight: AtomicU64,
}

impl ExecutorStats {
    /// Mark an operation entering flight, updating the high-water mark.
    pub fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    /// Mark an operation leaving flight.
    pub fn exit(&self, result: &OperationResult) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if result.cancelled {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        } else if result.is_success() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> TaskState {
        TaskState::new("t", 1_000, 3)
    }

    #[test]
    fn test_plan_validation_catches_duplicates() {
        let plan = ExecutionPlan::new()
            .add(Operation::new("a", "t", state()))
            .add(Operation::new("a", "t", state()));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_plan_validation_catches_unknown_deps() {
        let plan = ExecutionPlan::new().add(Operation::new("a", "t", state()).depends_on("ghost"));
        assert!(plan.validate().is_err());

        let plan = ExecutionPlan::new()
            .add(Operation::new("a", "t", state()))
            .add(Operation::new("b", "t", state()).depends_on("a"));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_execution_result_partition_and_totals() {
        let results = vec![
            OperationResult::success("a", OpOutput::new("ra", 100), 5),
            OperationResult::failure("b", &crate::error::Error::timeout(10), 10),
            OperationResult::success("c", OpOutput::new("rc", 50), 7),
        ];
        let exec = ExecutionResult::from_results(results, 12);

        let mut all: Vec<String> = exec
            .success_ids
            .iter()
            .chain(exec.failure_ids.iter())
            .cloned()
            .collect();
        all.sort();
        assert_eq!(all, vec!["a", "b", "c"]);
        assert_eq!(exec.total_tokens, 150);
        assert!(exec.results.get("b").unwrap().timed_out);
    }

    #[test]
    fn test_ordered_outputs_preserve_request_order() {
        let results = vec![
            OperationResult::success("c", OpOutput::new("rc", 1), 0),
            OperationResult::success("a", OpOutput::new("ra", 1), 0),
            OperationResult::failure("b", &crate::error::Error::Model("x".into()), 0),
        ];
        let exec = ExecutionResult::from_results(results, 0);
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let ordered = exec.ordered_outputs(&ids);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].op_id, "a");
        assert_eq!(ordered[1].op_id, "c");
    }

    #[test]
    fn test_failure_result_flags() {
        let cancelled =
            OperationResult::failure("x", &crate::error::Error::cancelled("race lost"), 1);
        assert!(cancelled.cancelled);
        assert!(!cancelled.timed_out);

        let timed = OperationResult::failure("y", &crate::error::Error::timeout(5), 5);
        assert!(timed.timed_out);
        assert!(!timed.cancelled);
    }

    #[test]
    fn test_stats_high_water_mark() {
        let stats = ExecutorStats::default();
        stats.enter();
        stats.enter();
        stats.enter();
        assert_eq!(stats.max_in_flight.load(Ordering::SeqCst), 3);

        stats.exit(&OperationResult::success("a", OpOutput::new("", 0), 0));
        stats.enter();
        // High-water mark stays at 3.
        assert_eq!(stats.max_in_flight.load(Ordering::SeqCst), 3);
        assert_eq!(stats.in_flight.load(Ordering::SeqCst), 3);
    }
}
