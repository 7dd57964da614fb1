//! Recovery planning for failed action dispatches.
//!
//! Each orchestration frame gets one bounded retry cycle. A failure is
//! classified, then mapped to a plan: retry with a jittered delay and an
//! augmented task, degrade to a direct answer, or surface unchanged.
//! Cancellations are never retried.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, ErrorClass};

/// Recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Retries allowed per frame
    pub max_retries: u32,
    /// Base delay before a retry
    pub retry_delay: Duration,
    /// Jitter fraction applied to the delay, in [0,1]
    pub jitter: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay: Duration::from_millis(500),
            jitter: 0.25,
        }
    }
}

/// What the frame should do with a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryPlan {
    /// Sleep, swap in the augmented task, re-dispatch the same action
    Retry { delay: Duration },
    /// Fall back to DIRECT with the current state
    Degrade { reason: String, warning: Option<String> },
    /// Propagate the error up
    Surface,
}

/// Plan recovery for a failure at the given attempt count.
pub fn plan(error: &Error, attempt: u32, config: &RecoveryConfig) -> RecoveryPlan {
    match error.classify() {
        ErrorClass::Cancelled => RecoveryPlan::Surface,
        ErrorClass::Terminal => RecoveryPlan::Surface,
        ErrorClass::Retryable => {
            if attempt < config.max_retries {
                RecoveryPlan::Retry {
                    delay: jittered(config, attempt),
                }
            } else {
                RecoveryPlan::Degrade {
                    reason: format!("retry cap reached: {}", error),
                    warning: None,
                }
            }
        }
        ErrorClass::Timeout => {
            // Timeouts get at most one retry regardless of the cap.
            if attempt < config.max_retries.min(1) {
                RecoveryPlan::Retry {
                    delay: jittered(config, attempt),
                }
            } else {
                RecoveryPlan::Degrade {
                    reason: format!("timed out: {}", error),
                    warning: None,
                }
            }
        }
        ErrorClass::Degradable => RecoveryPlan::Degrade {
            reason: error.to_string(),
            warning: None,
        },
        ErrorClass::Resource => RecoveryPlan::Degrade {
            reason: format!("resource limit: {}", error),
            warning: Some(
                "Note: code execution hit a resource limit; this answer was \
                 produced without it."
                    .to_string(),
            ),
        },
    }
}

/// Augment a task with recovery context for the retry attempt.
pub fn recovery_prompt(task: &str, error: &Error) -> String {
    format!(
        "{}\n\nThe previous attempt failed with: {}. \
         Adjust the approach and avoid repeating that failure.",
        task, error
    )
}

/// Delay with deterministic cheap jitter derived from wall-clock nanos.
fn jittered(config: &RecoveryConfig, attempt: u32) -> Duration {
    let base = config.retry_delay.as_millis() as f64 * (attempt as f64 + 1.0);
    let jitter_span = base * config.jitter.clamp(0.0, 1.0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let fraction = (nanos % 1000) as f64 / 1000.0;
    Duration::from_millis((base + jitter_span * fraction) as u64)
}
