//! Prompt-cache awareness for structured prompts.
//!
//! The runtime does not cache completions itself; providers do. This module
//! generates stable cache keys, decides which blocks of a
//! [`StructuredPrompt`] get `cache_control` markers, and tracks hit
//! statistics so cascade accounting can estimate savings.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::StructuredPrompt;

/// Cache key for a prompt prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Generate a key over the stable prefix of a structured prompt
    /// (system blocks and shared context; the query is excluded).
    pub fn for_prompt(prompt: &StructuredPrompt) -> Self {
        let mut hasher = Sha256::new();
        for block in &prompt.system {
            hasher.update(b"system:");
            hasher.update(block.content.as_bytes());
            hasher.update(b"\n");
        }
        for block in &prompt.shared_context {
            hasher.update(b"context:");
            hasher.update(block.content.as_bytes());
            hasher.update(b"\n");
        }
        let hash = hasher.finalize();
        CacheKey(format!("{:x}", hash))
    }

    /// Generate a key from raw content.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        CacheKey(format!("{:x}", hasher.finalize()))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..16])
    }
}

/// Marker-placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Never emit markers
    Disabled,
    /// Mark only system blocks
    SystemOnly,
    /// Mark system blocks and the last shared-context block
    Aggressive,
}

/// Assign cache markers to a structured prompt in place.
///
/// Blocks below `min_block_tokens` are left unmarked; tiny cache segments
/// cost more to create than they save.
pub fn apply_cache_markers(
    prompt: &mut StructuredPrompt,
    strategy: CacheStrategy,
    min_block_tokens: u64,
) {
    let eligible = |content: &str| crate::state::approx_tokens(content) >= min_block_tokens;

    match strategy {
        CacheStrategy::Disabled => {
            for block in prompt.system.iter_mut().chain(prompt.shared_context.iter_mut()) {
                block.cache_control = None;
            }
        }
        CacheStrategy::SystemOnly => {
            for block in &mut prompt.system {
                if eligible(&block.content) {
                    block.cache_control =
                        Some(super::types::CacheControl::Ephemeral);
                }
            }
        }
        CacheStrategy::Aggressive => {
            for block in &mut prompt.system {
                if eligible(&block.content) {
                    block.cache_control =
                        Some(super::types::CacheControl::Ephemeral);
                }
            }
            if let Some(last) = prompt
                .shared_context
                .iter_mut()
                .rev()
                .find(|b| eligible(&b.content))
            {
                last.cache_control = Some(super::types::CacheControl::Ephemeral);
            }
        }
    }
}

/// Cache entry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: CacheKey,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// When the entry was last accessed
    pub last_accessed: DateTime<Utc>,
    /// Number of hits
    pub hit_count: u64,
    /// Token count of the cached prefix
    pub token_count: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, token_count: u64) -> Self {
        let now = Utc::now();
        Self {
            key,
            created_at: now,
            last_accessed: now,
            hit_count: 0,
            token_count,
        }
    }

    /// Record a cache hit.
    pub fn record_hit(&mut self) {
        self.hit_count += 1;
        self.last_accessed = Utc::now();
    }

    /// Check if the entry has outlived the provider TTL.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() - self.last_accessed > ttl
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total tokens read from cache
    pub cached_tokens: u64,
    /// Number of tracked entries
    pub entry_count: u64,
}

impl CacheStats {
    /// Hit rate over all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Tracks which prompt prefixes are likely warm in the provider cache.
///
/// This is local awareness of provider-side caching, not a cache itself.
pub struct PromptCache {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    stats: Arc<RwLock<CacheStats>>,
    ttl: Duration,
}

impl PromptCache {
    /// Create a tracker with the common 5-minute provider TTL.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
            ttl: Duration::minutes(5),
        }
    }

    /// Override the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Record a lookup: marks a hit when the key is tracked and fresh.
    pub async fn touch(&self, key: &CacheKey, token_count: u64) -> bool {
        let mut entries = self.entries.write().await;
        let mut stats = self.stats.write().await;

        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.record_hit();
                stats.hits += 1;
                stats.cached_tokens += entry.token_count;
                true
            }
            _ => {
                entries.insert(key.clone(), CacheEntry::new(key.clone(), token_count));
                stats.misses += 1;
                stats.entry_count = entries.len() as u64;
                false
            }
        }
    }

    /// Drop expired entries.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| !entry.is_expired(ttl));
        let evicted = before - entries.len();
        self.stats.write().await.entry_count = entries.len() as u64;
        evicted
    }

    /// Snapshot the statistics.
    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::new()
    }
}
