//! Error types for rlm-runtime.

use thiserror::Error;

/// Result type alias using rlm-runtime's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during RLM operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Model client call failed
    #[error("Model client error: {provider} - {message}")]
    ModelClient { provider: String, message: String },

    /// Model error (simple variant)
    #[error("Model error: {0}")]
    Model(String),

    /// Memory storage error
    #[error("Memory storage error: {0}")]
    MemoryStorage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Operation was cancelled before completion
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Recursion depth exceeded
    #[error("Maximum recursion depth {max_depth} exceeded")]
    MaxDepthExceeded { max_depth: u32 },

    /// Budget exhausted
    #[error("Budget exhausted: {resource}")]
    BudgetExhausted { resource: String },

    /// Dependency graph contains a cycle
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// Operation failed because one of its dependencies failed
    #[error("Operation {op_id} failed: dependency {dependency} failed")]
    DependencyFailed { op_id: String, dependency: String },

    /// Code interpreter error
    #[error("Interpreter error ({kind}): {message}")]
    Interpreter {
        kind: InterpreterErrorKind,
        message: String,
    },

    /// Decomposition produced nothing usable
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// Synthesis received nothing usable
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Kinds of interpreter failure, used for recovery classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpreterErrorKind {
    /// Syntax error in submitted code
    Syntax,
    /// Undefined name referenced
    Name,
    /// Type mismatch at runtime
    Type,
    /// Transient failure (connection, flaky I/O)
    Transient,
    /// Execution exceeded its deadline
    Timeout,
    /// Hard resource limit violated (memory, CPU)
    ResourceLimit,
    /// Anything else
    Other,
}

impl std::fmt::Display for InterpreterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Syntax => "syntax",
            Self::Name => "name",
            Self::Type => "type",
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::ResourceLimit => "resource_limit",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Recovery classification for an error.
///
/// The orchestrator's recovery wrapper maps every failure into one of these
/// classes and picks retry, degradation, or surfacing accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Worth one more attempt after a delay
    Retryable,
    /// Deadline exceeded; retry once, then degrade
    Timeout,
    /// Internal orchestration failure; fall back to a direct answer
    Degradable,
    /// Surface unchanged; retrying cannot help
    Terminal,
    /// Interpreter hard-limit violation; degrade with a warning
    Resource,
    /// Cancelled; never retried
    Cancelled,
}

impl Error {
    /// Create a model client error.
    pub fn model_client(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelClient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Create a max depth exceeded error.
    pub fn max_depth_exceeded(max_depth: u32) -> Self {
        Self::MaxDepthExceeded { max_depth }
    }

    /// Create a budget exhausted error.
    pub fn budget_exhausted(resource: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            resource: resource.into(),
        }
    }

    /// Create an interpreter error.
    pub fn interpreter(kind: InterpreterErrorKind, message: impl Into<String>) -> Self {
        Self::Interpreter {
            kind,
            message: message.into(),
        }
    }

    /// Classify this error for the recovery wrapper.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Interpreter { kind, .. } => match kind {
                InterpreterErrorKind::Syntax
                | InterpreterErrorKind::Name
                | InterpreterErrorKind::Type
                | InterpreterErrorKind::Transient => ErrorClass::Retryable,
                InterpreterErrorKind::Timeout => ErrorClass::Timeout,
                InterpreterErrorKind::ResourceLimit => ErrorClass::Resource,
                InterpreterErrorKind::Other => ErrorClass::Degradable,
            },
            Self::ModelClient { message, .. } => classify_transport_message(message),
            Self::Model(message) => classify_transport_message(message),
            Self::Decomposition(_) | Self::Synthesis(_) | Self::Internal(_) => {
                ErrorClass::Degradable
            }
            Self::DependencyFailed { .. } => ErrorClass::Degradable,
            Self::PermissionDenied(_)
            | Self::NotFound(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::MaxDepthExceeded { .. }
            | Self::BudgetExhausted { .. }
            | Self::CircularDependency(_) => ErrorClass::Terminal,
            Self::MemoryStorage(_) => ErrorClass::Retryable,
            Self::Serialization(_) => ErrorClass::Degradable,
        }
    }

    /// True when the recovery wrapper may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable | ErrorClass::Timeout)
    }

    /// True when this error came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Heuristic classification for transport-level messages from model clients.
fn classify_transport_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("unauthorized") || lower.contains("forbidden")
    {
        return ErrorClass::Terminal;
    }
    if lower.contains("not found") || lower.contains("invalid") {
        return ErrorClass::Terminal;
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorClass::Timeout;
    }
    ErrorClass::Retryable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = Error::timeout(5_000);
        assert_eq!(err.classify(), ErrorClass::Timeout);
        assert_ne!(Error::Model("boom".into()).classify(), ErrorClass::Timeout);
    }

    #[test]
    fn test_cancellation_never_retryable() {
        let err = Error::cancelled("winner claimed");
        assert_eq!(err.classify(), ErrorClass::Cancelled);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_interpreter_classification() {
        let syntax = Error::interpreter(InterpreterErrorKind::Syntax, "unexpected token");
        assert_eq!(syntax.classify(), ErrorClass::Retryable);

        let limit = Error::interpreter(InterpreterErrorKind::ResourceLimit, "memory cap");
        assert_eq!(limit.classify(), ErrorClass::Resource);

        let timeout = Error::interpreter(InterpreterErrorKind::Timeout, "deadline");
        assert_eq!(timeout.classify(), ErrorClass::Timeout);
    }

    #[test]
    fn test_terminal_errors_surface() {
        assert_eq!(
            Error::PermissionDenied("no api key".into()).classify(),
            ErrorClass::Terminal
        );
        assert_eq!(
            Error::NotFound("node abc".into()).classify(),
            ErrorClass::Terminal
        );
        assert_eq!(
            Error::InvalidArgument("empty plan".into()).classify(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_transport_message_classification() {
        assert_eq!(
            Error::Model("429 too many requests".into()).classify(),
            ErrorClass::Retryable
        );
        assert_eq!(
            Error::model_client("anthropic", "request timed out").classify(),
            ErrorClass::Timeout
        );
        assert_eq!(
            Error::model_client("anthropic", "unauthorized").classify(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_degradable_internal_failures() {
        assert_eq!(
            Error::Decomposition("no chunks produced".into()).classify(),
            ErrorClass::Degradable
        );
        assert_eq!(
            Error::Synthesis("no parts".into()).classify(),
            ErrorClass::Degradable
        );
    }
}
