//! Result synthesis.
//!
//! Once children return, their parts are folded into one answer. Four
//! strategies cover the range from mechanical joining to model-assisted
//! combination; the weighted strategy scores each part with a cheap
//! heuristic and blends by normalized weight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::ModelClient;

/// A labelled sub-result entering synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResult {
    /// Label (chunk label, "part 3", ...)
    pub label: String,
    /// The sub-result text
    pub content: String,
    /// Tokens the sub-operation consumed
    pub tokens: u64,
    /// Error message when the sub-operation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubResult {
    /// Successful sub-result.
    pub fn ok(label: impl Into<String>, content: impl Into<String>, tokens: u64) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
            tokens,
            error: None,
        }
    }

    /// Failed sub-result.
    pub fn failed(label: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: String::new(),
            tokens: 0,
            error: Some(error.into()),
        }
    }

    /// Whether this part carries usable content.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && !self.content.trim().is_empty()
    }
}

/// Synthesis strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    /// Join parts with a separator
    Concatenate,
    /// Ask a model to combine the parts
    Llm,
    /// Regroup markdown sections across parts
    Merge,
    /// Score parts and blend by normalized weight
    Weighted,
}

/// Synthesizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Strategy in effect
    pub strategy: SynthesisStrategy,
    /// Separator for concatenation
    pub separator: String,
    /// Emit a `## label` header above each part when concatenating
    pub include_headers: bool,
    /// Output-token cap for the LLM strategy
    pub llm_token_cap: u64,
    /// Character ceiling for merge output; 0 disables
    pub max_output_length: usize,
    /// Weighted parts scoring below this confidence are dropped
    pub min_confidence: f64,
    /// Weight variance above this sets the warning flag
    pub variance_warning_threshold: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            strategy: SynthesisStrategy::Concatenate,
            separator: "\n\n".to_string(),
            include_headers: false,
            llm_token_cap: 2_000,
            max_output_length: 0,
            min_confidence: 0.1,
            variance_warning_threshold: 0.08,
        }
    }
}

/// Synthesis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    /// Combined response text
    pub response: String,
    /// Tokens consumed by synthesis itself (zero for mechanical strategies)
    pub tokens: u64,
    /// Number of parts that contributed
    pub part_count: usize,
    /// Blended confidence, for the weighted strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Set when weight variance crossed the warning threshold
    #[serde(default)]
    pub variance_warning: bool,
}

/// The synthesizer.
pub struct Synthesizer {
    config: SynthesisConfig,
    client: Option<Arc<dyn ModelClient>>,
}

impl Synthesizer {
    /// Create a synthesizer; the client is only needed for the LLM strategy.
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Attach a model client for the LLM strategy.
    pub fn with_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// The configuration in effect.
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Combine sub-results into one answer.
    pub async fn synthesize(&self, task: &str, results: &[SubResult]) -> Result<Synthesis> {
        let usable: Vec<&SubResult> = results.iter().filter(|r| r.is_usable()).collect();
        if usable.is_empty() {
            return Err(Error::Synthesis("no usable sub-results".into()));
        }

        debug!(
            strategy = ?self.config.strategy,
            parts = usable.len(),
            "synthesizing"
        );

        match self.config.strategy {
            SynthesisStrategy::Concatenate => Ok(self.concatenate(&usable)),
            SynthesisStrategy::Llm => self.combine_with_model(task, &usable).await,
            SynthesisStrategy::Merge => Ok(self.merge(&usable)),
            SynthesisStrategy::Weighted => Ok(self.weighted(&usable)),
        }
    }

    fn concatenate(&self, parts: &[&SubResult]) -> Synthesis {
        let rendered: Vec<String> = parts
            .iter()
            .map(|part| {
                if self.config.include_headers {
                    format!("## {}\n{}", part.label, part.content)
                } else {
                    part.content.clone()
                }
            })
            .collect();

        Synthesis {
            response: rendered.join(&self.config.separator),
            tokens: 0,
            part_count: parts.len(),
            confidence: None,
            variance_warning: false,
        }
    }

    async fn combine_with_model(&self, task: &str, parts: &[&SubResult]) -> Result<Synthesis> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::Config("LLM synthesis needs a model client".into()))?;

        let mut prompt = format!(
            "Combine the following partial answers into one coherent answer \
             to the task.\n\nTask: {}\n\n",
            task
        );
        for part in parts {
            prompt.push_str(&format!("--- {} ---\n{}\n\n", part.label, part.content));
        }

        let completion = client.complete(&prompt, self.config.llm_token_cap).await?;
        Ok(Synthesis {
            response: completion.text,
            tokens: completion.usage.total(),
            part_count: parts.len(),
            confidence: None,
            variance_warning: false,
        })
    }

    /// Regroup markdown sections: lines are bucketed by their nearest
    /// heading across all parts, main-section content comes first, the
    /// remaining sections follow in first-seen order.
    fn merge(&self, parts: &[&SubResult]) -> Synthesis {
        const MAIN: &str = "";
        let mut order: Vec<String> = Vec::new();
        let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for part in parts {
            let mut current = MAIN.to_string();
            for line in part.content.lines() {
                if line.trim_start().starts_with('#') {
                    current = line.trim().to_string();
                    if !order.contains(&current) {
                        order.push(current.clone());
                    }
                    continue;
                }
                if !line.trim().is_empty() {
                    sections.entry(current.clone()).or_default().push(line.to_string());
                }
            }
        }

        let mut out = String::new();
        if let Some(main_lines) = sections.get(MAIN) {
            out.push_str(&main_lines.join("\n"));
        }
        for heading in &order {
            if let Some(lines) = sections.get(heading) {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(heading);
                out.push('\n');
                out.push_str(&lines.join("\n"));
            }
        }

        if self.config.max_output_length > 0 && out.chars().count() > self.config.max_output_length
        {
            out = out.chars().take(self.config.max_output_length).collect();
        }

        Synthesis {
            response: out,
            tokens: 0,
            part_count: parts.len(),
            confidence: None,
            variance_warning: false,
        }
    }

    fn weighted(&self, parts: &[&SubResult]) -> Synthesis {
        let scores: Vec<f64> = parts.iter().map(|p| score_part(&p.content)).collect();

        // Drop parts below the confidence floor, keeping at least one.
        let mut kept: Vec<(usize, f64)> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s >= self.config.min_confidence)
            .map(|(i, s)| (i, *s))
            .collect();
        if kept.is_empty() {
            let best = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, s)| (i, *s))
                .unwrap_or((0, 0.0));
            kept.push(best);
        }

        let weights = normalize_weights(&kept.iter().map(|(_, s)| *s).collect::<Vec<_>>());
        let variance = weight_variance(&weights);
        let variance_warning = variance > self.config.variance_warning_threshold;
        if variance_warning {
            warn!(variance, "weighted synthesis has uneven part weights");
        }

        // Present strongest parts first.
        let mut ranked: Vec<(usize, f64, f64)> = kept
            .iter()
            .zip(weights.iter())
            .map(|((i, s), w)| (*i, *s, *w))
            .collect();
        ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let response = ranked
            .iter()
            .map(|(i, _, _)| parts[*i].content.clone())
            .collect::<Vec<_>>()
            .join(&self.config.separator);

        // Weighted confidence: sum of weight * score, never above 1.
        let confidence = ranked
            .iter()
            .map(|(_, s, w)| s * w)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        Synthesis {
            response,
            tokens: 0,
            part_count: ranked.len(),
            confidence: Some(confidence),
            variance_warning,
        }
    }
}

/// Score one part's content into [0,1].
///
/// Length band: mid-sized answers beat fragments and walls of text.
/// Structure (headings, lists, code fences) and specificity (numbers,
/// paths, identifiers) raise the score; hedging lowers it.
pub fn score_part(content: &str) -> f64 {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let len = trimmed.chars().count();
    let length_score = match len {
        0..=40 => 0.2,
        41..=400 => 0.5,
        401..=4_000 => 0.4,
        _ => 0.25,
    };

    let mut score: f64 = length_score;

    let has_structure = trimmed.contains("\n- ")
        || trimmed.contains("\n* ")
        || trimmed.contains("```")
        || trimmed.lines().any(|l| l.trim_start().starts_with('#'));
    if has_structure {
        score += 0.15;
    }

    let lower = trimmed.to_lowercase();
    let hedges = ["maybe", "possibly", "not sure", "it depends", "i think", "unclear"];
    let hedge_hits = hedges.iter().filter(|h| lower.contains(*h)).count();
    score -= 0.1 * hedge_hits as f64;

    let has_specifics = trimmed.chars().any(|c| c.is_ascii_digit())
        || trimmed.contains('/')
        || trimmed.contains("::")
        || trimmed.contains('`');
    if has_specifics {
        score += 0.15;
    }

    score.clamp(0.0, 1.0)
}

/// Normalize scores into weights: same length, all entries >= 0, sum 1.
///
/// A zero or degenerate score vector yields uniform weights.
pub fn normalize_weights(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let clamped: Vec<f64> = scores.iter().map(|s| s.max(0.0)).collect();
    let total: f64 = clamped.iter().sum();
    if total <= f64::EPSILON {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    clamped.iter().map(|s| s / total).collect()
}

fn weight_variance(weights: &[f64]) -> f64 {
    if weights.len() <= 1 {
        return 0.0;
    }
    let mean = weights.iter().sum::<f64>() / weights.len() as f64;
    weights.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / weights.len() as f64
}
