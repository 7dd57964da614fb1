//! Session lifecycle and resumable summaries.
//!
//! A [`SessionTracker`] accumulates what happened while a session runs.
//! Ending the session synthesizes a [`SessionSummary`] and persists it as a
//! read-only longterm node under the reserved `session_summary` subtype;
//! a later invocation resumes by loading the most recent summary into a
//! [`ResumeContext`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::{
    HypergraphStore, Node, NodeFilter, NodeType, Tier, SUBTYPE_SESSION_SUMMARY,
};
use crate::orchestrator::ExecutionOutcome;

/// A compact, resumable record of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: String,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// When the session ended
    pub ended_at: DateTime<Utc>,
    /// Tasks that completed successfully
    pub tasks_completed: Vec<String>,
    /// Tasks that failed
    pub tasks_failed: Vec<String>,
    /// Noteworthy insights gathered along the way
    pub key_insights: Vec<String>,
    /// Files the session touched or discussed
    pub active_files: Vec<String>,
    /// Work left unfinished
    pub unfinished_work: Vec<String>,
    /// Suggested next steps
    pub next_steps: Vec<String>,
}

/// Context handed to a resuming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeContext {
    /// The summary of the previous session
    pub previous_session: SessionSummary,
    /// Next steps carried over
    pub next_steps: Vec<String>,
    /// Active files carried over
    pub active_files: Vec<String>,
}

#[derive(Debug, Default)]
struct SessionLog {
    tasks_completed: Vec<String>,
    tasks_failed: Vec<String>,
    key_insights: Vec<String>,
    active_files: Vec<String>,
    unfinished_work: Vec<String>,
    next_steps: Vec<String>,
}

/// Tracks one running session and writes its summary at the end.
pub struct SessionTracker {
    session_id: String,
    started_at: DateTime<Utc>,
    store: Arc<HypergraphStore>,
    log: Mutex<SessionLog>,
}

impl SessionTracker {
    /// Start a fresh session over a store.
    pub fn new(store: Arc<HypergraphStore>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            store,
            log: Mutex::new(SessionLog::default()),
        }
    }

    /// The session's id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record an executed task and its outcome.
    pub fn record_task(&self, task: &str, outcome: &ExecutionOutcome) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if outcome.is_success() {
            log.tasks_completed.push(task.to_string());
        } else {
            log.tasks_failed.push(task.to_string());
            log.unfinished_work.push(task.to_string());
        }
        for path in extract_paths(task) {
            if !log.active_files.contains(&path) {
                log.active_files.push(path);
            }
        }
    }

    /// Record an insight worth carrying across sessions.
    pub fn add_insight(&self, insight: impl Into<String>) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .key_insights
            .push(insight.into());
    }

    /// Record a suggested next step.
    pub fn add_next_step(&self, step: impl Into<String>) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_steps
            .push(step.into());
    }

    /// Record unfinished work explicitly.
    pub fn add_unfinished(&self, work: impl Into<String>) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unfinished_work
            .push(work.into());
    }

    /// End the session: synthesize the summary and persist it as a
    /// read-only longterm node. Returns the summary.
    pub fn end_session(&self) -> Result<SessionSummary> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let mut next_steps = log.next_steps.clone();
        if next_steps.is_empty() {
            // Unfinished work doubles as the default next steps.
            next_steps = log
                .unfinished_work
                .iter()
                .map(|w| format!("Resume: {}", w))
                .collect();
        }

        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            tasks_completed: log.tasks_completed.clone(),
            tasks_failed: log.tasks_failed.clone(),
            key_insights: log.key_insights.clone(),
            active_files: log.active_files.clone(),
            unfinished_work: log.unfinished_work.clone(),
            next_steps,
        };
        drop(log);

        let node = Node::new(NodeType::Experience, serde_json::to_string(&summary)?)
            .with_subtype(SUBTYPE_SESSION_SUMMARY)
            .with_tier(Tier::LongTerm)
            .with_metadata("session_id", summary.session_id.clone())
            .with_metadata("tasks_completed", summary.tasks_completed.len() as u64);
        self.store.create_node(&node)?;

        info!(session = %summary.session_id, "session summary persisted");
        Ok(summary)
    }
}

/// Load the most recent session summary from a store.
pub fn resume_session(store: &HypergraphStore) -> Result<Option<ResumeContext>> {
    let nodes = store.list_nodes(
        &NodeFilter::new()
            .subtypes(vec![SUBTYPE_SESSION_SUMMARY.to_string()])
            .tiers(vec![Tier::LongTerm])
            .limit(10),
    )?;

    // list_nodes orders by effective access time; newest summary first.
    let Some(node) = nodes.into_iter().max_by_key(|n| n.created_at) else {
        return Ok(None);
    };

    let summary: SessionSummary = serde_json::from_str(&node.content)
        .map_err(|e| Error::Internal(format!("corrupt session summary: {}", e)))?;

    Ok(Some(ResumeContext {
        next_steps: summary.next_steps.clone(),
        active_files: summary.active_files.clone(),
        previous_session: summary,
    }))
}

/// Pull path-looking tokens out of a task description.
fn extract_paths(task: &str) -> Vec<String> {
    task.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '/' && c != '.' && c != '_'))
        .filter(|w| {
            (w.contains('/') || w.contains('.'))
                && w.chars().any(|c| c.is_alphanumeric())
                && !w.starts_with("http")
                && w.rsplit('.').next().map_or(false, |ext| {
                    ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
                })
        })
        .map(|w| w.to_string())
        .collect()
}
