//! Code interpreter contract.
//!
//! EXECUTE decisions hand code to an external interpreter process; the
//! runtime only sees this trait. Resource limits are enforced on the other
//! side of the contract, and hard-limit violations must surface as
//! [`InterpreterErrorKind::ResourceLimit`] errors so the recovery wrapper
//! can degrade instead of retrying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, InterpreterErrorKind, Result};

/// Outcome of executing code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Captured stdout
    pub stdout: String,
    /// Value of the final expression, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    /// Error message, when execution failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Peak memory used, in bytes
    pub memory_used: u64,
    /// Execution wall-clock time
    pub duration_ms: u64,
}

impl ExecOutcome {
    /// Whether execution succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The most useful textual rendering: return value first, else stdout.
    pub fn as_text(&self) -> String {
        match &self.return_value {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => self.stdout.clone(),
        }
    }
}

/// External code interpreter.
#[async_trait]
pub trait CodeInterpreter: Send + Sync {
    /// Execute a code snippet.
    async fn execute(&self, code: &str) -> Result<ExecOutcome>;

    /// Bind a variable in the interpreter's namespace.
    async fn set_var(&self, name: &str, value: Value) -> Result<()>;

    /// Start the interpreter process.
    async fn start(&self) -> Result<()>;

    /// Stop the interpreter process.
    async fn stop(&self) -> Result<()>;
}

/// Map an interpreter-reported error string onto a typed error.
///
/// Interpreters report failure kinds loosely; this normalizes the common
/// shapes so the recovery wrapper's classification works on all of them.
pub fn classify_exec_error(message: &str) -> Error {
    let lower = message.to_ascii_lowercase();
    let kind = if lower.contains("syntaxerror") || lower.contains("syntax error") {
        InterpreterErrorKind::Syntax
    } else if lower.contains("nameerror") || lower.contains("not defined") {
        InterpreterErrorKind::Name
    } else if lower.contains("typeerror") || lower.contains("type error") {
        InterpreterErrorKind::Type
    } else if lower.contains("memory") || lower.contains("resource") || lower.contains("limit") {
        InterpreterErrorKind::ResourceLimit
    } else if lower.contains("timeout") || lower.contains("timed out") {
        InterpreterErrorKind::Timeout
    } else if lower.contains("connection") || lower.contains("broken pipe") {
        InterpreterErrorKind::Transient
    } else {
        InterpreterErrorKind::Other
    };
    Error::interpreter(kind, message)
}
