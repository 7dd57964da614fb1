//! Execution trace recording.
//!
//! The recorder is an append-only, bounded ring buffer of structured
//! events. The orchestration loop emits an event before and after every
//! decision dispatch, plus recovery and degradation markers; readers scan
//! by event id, type, or parent. Recording never blocks the hot path beyond
//! a short mutex hold, and the buffer discards the oldest events once full.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Kind of trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEventType {
    /// A decision dispatch began
    DecisionRunning,
    /// A decision dispatch finished successfully
    DecisionCompleted,
    /// A decision dispatch failed
    DecisionFailed,
    /// The recovery wrapper retried an action
    Recovery,
    /// An action was degraded to DIRECT
    Degradation,
    /// A memory read or write
    Memory,
    /// Synthesis step
    Synthesize,
    /// Final answer produced
    Final,
}

impl std::fmt::Display for TraceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DecisionRunning => "DECISION_RUNNING",
            Self::DecisionCompleted => "DECISION_COMPLETED",
            Self::DecisionFailed => "DECISION_FAILED",
            Self::Recovery => "RECOVERY",
            Self::Degradation => "DEGRADATION",
            Self::Memory => "MEMORY",
            Self::Synthesize => "SYNTHESIZE",
            Self::Final => "FINAL",
        };
        write!(f, "{}", s)
    }
}

/// Completion status carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
    Degraded,
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Monotone event id assigned by the recorder
    pub id: u64,
    /// Kind of event
    pub event_type: TraceEventType,
    /// The action involved (DIRECT, DECOMPOSE, ...)
    pub action: String,
    /// Tokens attributed to this step
    pub tokens: u64,
    /// Duration of the step
    pub duration_ms: u64,
    /// Recursion depth
    pub depth: u32,
    /// Parent frame id, when nested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Completion status
    pub status: TraceStatus,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
}

/// Builder-style payload handed to [`TraceRecorder::record`].
#[derive(Debug, Clone)]
pub struct TraceEventDraft {
    pub event_type: TraceEventType,
    pub action: String,
    pub tokens: u64,
    pub duration_ms: u64,
    pub depth: u32,
    pub parent_id: Option<String>,
    pub status: TraceStatus,
}

impl TraceEventDraft {
    /// Create a draft for an action at a depth.
    pub fn new(event_type: TraceEventType, action: impl Into<String>, depth: u32) -> Self {
        Self {
            event_type,
            action: action.into(),
            tokens: 0,
            duration_ms: 0,
            depth,
            parent_id: None,
            status: TraceStatus::Running,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_status(mut self, status: TraceStatus) -> Self {
        self.status = status;
        self
    }
}

/// Append-only bounded trace recorder.
pub struct TraceRecorder {
    events: Mutex<VecDeque<TraceEvent>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
}

impl TraceRecorder {
    /// Default ring capacity.
    pub const DEFAULT_CAPACITY: usize = 4_096;

    /// Create a recorder with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a recorder with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record an event, returning its assigned id.
    pub fn record(&self, draft: TraceEventDraft) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = TraceEvent {
            id,
            event_type: draft.event_type,
            action: draft.action,
            tokens: draft.tokens,
            duration_ms: draft.duration_ms,
            depth: draft.depth,
            parent_id: draft.parent_id,
            status: draft.status,
            timestamp: Utc::now(),
        };

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
        events.push_back(event);
        id
    }

    /// Snapshot all retained events, oldest first.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Look up one event by id.
    pub fn by_id(&self, id: u64) -> Option<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// All retained events of one type, oldest first.
    pub fn by_type(&self, event_type: TraceEventType) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// All retained events under one parent, oldest first.
    pub fn by_parent(&self, parent_id: &str) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect()
    }

    /// Number of events discarded to the ring bound.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Total events ever recorded.
    pub fn total_recorded(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Export retained events as JSON lines.
    pub fn export_jsonl(&self) -> String {
        self.events()
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}
