//! Task decomposition strategies.
//!
//! DECOMPOSE splits a task into chunks that become child frames. The
//! strategy comes from the meta-controller's decision: file chunks expand
//! glob patterns, function chunks follow code boundaries, concept chunks
//! slide a token window over long text, and custom falls back to structural
//! heuristics.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::state::{approx_tokens, DecomposeStrategy};

/// One decomposed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Original index; sub-results reassemble in this order
    pub index: usize,
    /// Short label (path, function name, window range)
    pub label: String,
    /// The chunk's task text
    pub content: String,
}

/// Decomposer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposerConfig {
    /// Window size for concept chunks, in tokens
    pub window_tokens: u64,
    /// Overlap between adjacent concept windows, in tokens
    pub overlap_tokens: u64,
    /// Ceiling on produced chunks for any strategy
    pub max_chunks: usize,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            window_tokens: 4_000,
            overlap_tokens: 200,
            max_chunks: 16,
        }
    }
}

/// Strategy-keyed task decomposer.
#[derive(Debug, Clone, Default)]
pub struct Decomposer {
    config: DecomposerConfig,
}

impl Decomposer {
    /// Create a decomposer.
    pub fn new(config: DecomposerConfig) -> Self {
        Self { config }
    }

    /// Split a task into chunks.
    ///
    /// `chunks` are the explicit chunk hints from the decision (paths for
    /// the file strategy, raw pieces otherwise); when empty the task text
    /// itself is split. Producing zero chunks is an error the recovery
    /// wrapper degrades on.
    pub fn decompose(
        &self,
        strategy: DecomposeStrategy,
        task: &str,
        chunks: &[String],
    ) -> Result<Vec<Chunk>> {
        let produced = match strategy {
            DecomposeStrategy::File => self.by_file(task, chunks),
            DecomposeStrategy::Function => self.by_function(task, chunks),
            DecomposeStrategy::Concept => self.by_concept(task, chunks),
            DecomposeStrategy::Custom => self.by_custom(task, chunks),
        };

        let mut produced = produced;
        produced.truncate(self.config.max_chunks);

        if produced.is_empty() {
            return Err(Error::Decomposition(format!(
                "{} strategy produced no chunks",
                strategy
            )));
        }
        debug!(strategy = %strategy, chunks = produced.len(), "task decomposed");
        Ok(produced)
    }

    /// File strategy: each hint is a path or glob pattern; globs expand to
    /// matching paths, non-matching hints pass through as given.
    fn by_file(&self, task: &str, chunks: &[String]) -> Vec<Chunk> {
        let mut paths: Vec<String> = Vec::new();
        for hint in chunks {
            if hint.contains('*') || hint.contains('?') || hint.contains('[') {
                match glob::glob(hint) {
                    Ok(matches) => {
                        let mut found = false;
                        for path in matches.filter_map(|p| p.ok()) {
                            paths.push(path.to_string_lossy().into_owned());
                            found = true;
                        }
                        if !found {
                            paths.push(hint.clone());
                        }
                    }
                    Err(_) => paths.push(hint.clone()),
                }
            } else {
                paths.push(hint.clone());
            }
        }

        paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| Chunk {
                index,
                label: path.clone(),
                content: format!("{}\n\nFocus on file: {}", task, path),
            })
            .collect()
    }

    /// Function strategy: split code-bearing chunks on function boundaries.
    fn by_function(&self, task: &str, chunks: &[String]) -> Vec<Chunk> {
        let source = if chunks.is_empty() {
            task.to_string()
        } else {
            chunks.join("\n")
        };

        let boundaries = function_boundary_pattern();
        let mut starts: Vec<usize> = boundaries.find_iter(&source).map(|m| m.start()).collect();
        if starts.is_empty() || starts[0] != 0 {
            starts.insert(0, 0);
        }

        let mut out = Vec::new();
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(source.len());
            let body = source[start..end].trim();
            if body.is_empty() {
                continue;
            }
            let label = body
                .lines()
                .next()
                .unwrap_or("fragment")
                .chars()
                .take(60)
                .collect::<String>();
            out.push(Chunk {
                index: out.len(),
                label,
                content: format!("{}\n\nUnit:\n{}", task, body),
            });
        }
        out
    }

    /// Concept strategy: sliding token windows with overlap.
    fn by_concept(&self, task: &str, chunks: &[String]) -> Vec<Chunk> {
        let source = if chunks.is_empty() {
            task.to_string()
        } else {
            chunks.join("\n\n")
        };

        let window_chars = (self.config.window_tokens * 4) as usize;
        let overlap_chars = (self.config.overlap_tokens * 4) as usize;
        let step = window_chars.saturating_sub(overlap_chars).max(1);

        if approx_tokens(&source) <= self.config.window_tokens {
            return vec![Chunk {
                index: 0,
                label: "window 0".into(),
                content: source,
            }];
        }

        let chars: Vec<char> = source.chars().collect();
        let mut out = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + window_chars).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            out.push(Chunk {
                index: out.len(),
                label: format!("window {}", out.len()),
                content: window,
            });
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }

    /// Custom strategy: markdown sections, then paragraph groups.
    fn by_custom(&self, task: &str, chunks: &[String]) -> Vec<Chunk> {
        if !chunks.is_empty() {
            return chunks
                .iter()
                .enumerate()
                .map(|(index, piece)| Chunk {
                    index,
                    label: format!("part {}", index + 1),
                    content: format!("{}\n\n{}", task, piece),
                })
                .collect();
        }

        // Prefer markdown section boundaries, then blank-line paragraphs.
        let sections: Vec<&str> = if task.contains("\n#") || task.starts_with('#') {
            split_markdown_sections(task)
        } else {
            task.split("\n\n").filter(|p| !p.trim().is_empty()).collect()
        };

        if sections.len() <= 1 {
            return vec![Chunk {
                index: 0,
                label: "part 1".into(),
                content: task.to_string(),
            }];
        }

        sections
            .into_iter()
            .enumerate()
            .map(|(index, body)| Chunk {
                index,
                label: format!("part {}", index + 1),
                content: body.trim().to_string(),
            })
            .collect()
    }
}

fn function_boundary_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(
            r"(?m)^\s*(pub\s+)?(async\s+)?fn\s+\w+|^\s*def\s+\w+|^\s*function\s+\w+",
        )
        .unwrap()
    })
}

fn split_markdown_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0usize;
    for (offset, line) in text.lines().map(|l| (l.as_ptr() as usize - text.as_ptr() as usize, l)) {
        if line.starts_with('#') && offset > start {
            sections.push(&text[start..offset]);
            start = offset;
        }
    }
    sections.push(&text[start..]);
    sections.into_iter().filter(|s| !s.trim().is_empty()).collect()
}
