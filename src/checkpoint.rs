//! Checkpoint observer.
//!
//! The core invokes a [`Checkpointer`] at configurable intervals and at
//! lifecycle boundaries; where checkpoints actually go is the
//! collaborator's concern. An in-memory implementation ships for tests and
//! ephemeral runs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;

/// Saves and restores opaque checkpoint payloads.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a checkpoint payload.
    async fn save(&self, payload: Value) -> Result<()>;

    /// Load the most recent checkpoint, if any.
    async fn load(&self) -> Result<Option<Value>>;

    /// Discard all checkpoints.
    async fn clear(&self) -> Result<()>;
}

/// In-memory checkpointer.
#[derive(Default)]
pub struct MemoryCheckpointer {
    latest: Mutex<Option<Value>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, payload: Value) -> Result<()> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(payload);
        Ok(())
    }

    async fn load(&self) -> Result<Option<Value>> {
        Ok(self
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Drives periodic saves against a [`Checkpointer`].
///
/// The driver is polled from the orchestration loop rather than owning a
/// background task, so saves happen at natural suspension points and stop
/// with the loop.
pub struct CheckpointDriver<C: Checkpointer> {
    checkpointer: C,
    interval: Duration,
    last_save: Mutex<Instant>,
}

impl<C: Checkpointer> CheckpointDriver<C> {
    /// Create a driver saving at most once per `interval`.
    pub fn new(checkpointer: C, interval: Duration) -> Self {
        Self {
            checkpointer,
            interval,
            last_save: Mutex::new(Instant::now()),
        }
    }

    /// Save if the interval elapsed; returns whether a save happened.
    pub async fn maybe_save(&self, payload: impl FnOnce() -> Value) -> Result<bool> {
        let due = {
            let last = self.last_save.lock().unwrap_or_else(|e| e.into_inner());
            last.elapsed() >= self.interval
        };
        if !due {
            return Ok(false);
        }

        self.checkpointer.save(payload()).await?;
        *self.last_save.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        debug!("periodic checkpoint saved");
        Ok(true)
    }

    /// Save unconditionally.
    pub async fn save_now(&self, payload: Value) -> Result<()> {
        self.checkpointer.save(payload).await?;
        *self.last_save.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        Ok(())
    }

    /// Access the underlying checkpointer.
    pub fn checkpointer(&self) -> &C {
        &self.checkpointer
    }
}
