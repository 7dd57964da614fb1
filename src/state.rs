//! Orchestration state and the meta-controller's decision types.
//!
//! A [`TaskState`] is the transient view of one orchestration frame: the task
//! text, its remaining token budget, recursion bounds, and whatever memory
//! hints and partial results earlier steps produced. The meta-controller
//! consumes a state and produces a [`Decision`], a tagged action value that
//! the orchestration loop dispatches exhaustively.

use serde::{Deserialize, Serialize};

/// Transient state for one orchestration frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// The task text for this frame
    pub task: String,
    /// Approximate token size of the context attached to the task
    pub context_tokens: u64,
    /// Remaining token budget for this frame and its children
    pub budget_remain: u64,
    /// Current recursion depth (0 = top level)
    pub recursion_depth: u32,
    /// Maximum recursion depth
    pub max_depth: u32,
    /// Short memory hints retrieved before deciding
    pub memory_hints: Vec<String>,
    /// Ordered partial results from earlier sub-operations
    pub partial_results: Vec<String>,
    /// Whether the frame's context has been externalized to the interpreter
    pub externalized_context: bool,
}

impl TaskState {
    /// Create a fresh top-level state.
    pub fn new(task: impl Into<String>, budget: u64, max_depth: u32) -> Self {
        let task = task.into();
        let context_tokens = approx_tokens(&task);
        Self {
            task,
            context_tokens,
            budget_remain: budget,
            recursion_depth: 0,
            max_depth,
            memory_hints: Vec::new(),
            partial_results: Vec::new(),
            externalized_context: false,
        }
    }

    /// Derive a child state one level deeper with an explicit budget.
    ///
    /// The child inherits `max_depth` and starts with empty hints and
    /// partials; `depth ≤ max_depth` is preserved by saturating.
    pub fn child(&self, task: impl Into<String>, budget: u64) -> Self {
        let task = task.into();
        let context_tokens = approx_tokens(&task);
        Self {
            task,
            context_tokens,
            budget_remain: budget,
            recursion_depth: (self.recursion_depth + 1).min(self.max_depth),
            max_depth: self.max_depth,
            memory_hints: Vec::new(),
            partial_results: Vec::new(),
            externalized_context: self.externalized_context,
        }
    }

    /// Derive a child state splitting the remaining budget across `n` peers.
    pub fn child_split(&self, task: impl Into<String>, n: usize) -> Self {
        let share = self.budget_remain / (n.max(1) as u64);
        self.child(task, share)
    }

    /// Whether this frame has hit the recursion ceiling.
    pub fn at_max_depth(&self) -> bool {
        self.recursion_depth >= self.max_depth
    }

    /// Whether this frame has any budget left.
    pub fn budget_exhausted(&self) -> bool {
        self.budget_remain == 0
    }

    /// Attach memory hints.
    pub fn with_memory_hints(mut self, hints: Vec<String>) -> Self {
        self.memory_hints = hints;
        self
    }

    /// Append a partial result.
    pub fn push_partial(&mut self, result: impl Into<String>) {
        self.partial_results.push(result.into());
    }

    /// Override the context token estimate.
    pub fn with_context_tokens(mut self, tokens: u64) -> Self {
        self.context_tokens = tokens;
        self
    }
}

/// Rough token estimate: ~4 chars per token for English text.
pub fn approx_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// Decomposition strategy for the DECOMPOSE action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecomposeStrategy {
    /// Split by file paths / glob patterns
    File,
    /// Split by function-shaped units
    Function,
    /// Split into overlapping token windows
    Concept,
    /// Heuristic splitting for anything else
    Custom,
}

impl std::fmt::Display for DecomposeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Function => write!(f, "function"),
            Self::Concept => write!(f, "concept"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// The action chosen by the meta-controller, with per-variant parameters.
///
/// This is a sealed tagged sum: dispatch is exhaustive and unknown tags are
/// rejected at parse time rather than silently accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Answer directly with the main model
    Direct,
    /// Split the task into chunks and run them as children
    Decompose {
        strategy: DecomposeStrategy,
        #[serde(default)]
        chunks: Vec<String>,
    },
    /// Query the hypergraph memory
    MemoryQuery {
        #[serde(default)]
        query: String,
    },
    /// Recurse on a focused prompt + snippet
    Subcall {
        prompt: String,
        #[serde(default)]
        snippet: String,
        #[serde(default)]
        token_budget: Option<u64>,
    },
    /// Combine accumulated partial results
    Synthesize,
    /// Run code in the external interpreter
    Execute {
        #[serde(default)]
        code: String,
    },
}

impl Action {
    /// Short name used in trace events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "DIRECT",
            Self::Decompose { .. } => "DECOMPOSE",
            Self::MemoryQuery { .. } => "MEMORY_QUERY",
            Self::Subcall { .. } => "SUBCALL",
            Self::Synthesize => "SYNTHESIZE",
            Self::Execute { .. } => "EXECUTE",
        }
    }
}

/// A decision produced by the meta-controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The chosen action with its parameters
    pub action: Action,
    /// Why this action was chosen, for observability
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// Create a decision.
    pub fn new(action: Action, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            reasoning: reasoning.into(),
        }
    }

    /// The DIRECT fallback used whenever deciding is impossible or unwise.
    pub fn direct(reasoning: impl Into<String>) -> Self {
        Self::new(Action::Direct, reasoning)
    }

    /// Build a decision from a model reply's JSON object.
    ///
    /// The object carries `action`, `params`, and `reasoning` side by side;
    /// only `action`/`params` feed the enum so stray keys in the reply
    /// cannot break validation. Unknown action tags return None.
    pub fn from_model_json(value: &serde_json::Value) -> Option<Self> {
        let mut trimmed = serde_json::Map::new();
        trimmed.insert("action".to_string(), value.get("action")?.clone());
        if let Some(params) = value.get("params") {
            trimmed.insert("params".to_string(), params.clone());
        }
        let action: Action = serde_json::from_value(serde_json::Value::Object(trimmed)).ok()?;
        let reasoning = value
            .get("reasoning")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string();
        Some(Self { action, reasoning })
    }
}
