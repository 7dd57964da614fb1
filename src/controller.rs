//! Meta-controller: turns a [`TaskState`] into a [`Decision`].
//!
//! The controller consults a model client with a compact structured prompt
//! and parses the reply as a JSON decision. It is deliberately unable to
//! fail: guard rails (depth, budget) and every parse or transport problem
//! collapse into a DIRECT decision whose reasoning records what happened,
//! so the orchestration loop can always produce an answer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::ModelClient;
use crate::state::{Decision, TaskState};

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Output-token cap for the decision call
    pub max_decision_tokens: u64,
    /// Memory hints are truncated to this many characters in the prompt
    pub hint_digest_chars: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_decision_tokens: 500,
            hint_digest_chars: 160,
        }
    }
}

/// The meta-controller.
pub struct MetaController {
    client: Arc<dyn ModelClient>,
    config: ControllerConfig,
}

impl MetaController {
    /// Create a controller over a model client.
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            config: ControllerConfig::default(),
        }
    }

    /// Override the configuration.
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Produce a decision for the given state.
    ///
    /// Returns the tokens consumed alongside the decision; guard-rail
    /// decisions consume none.
    pub async fn decide(&self, state: &TaskState) -> (Decision, u64) {
        if state.at_max_depth() {
            return (Decision::direct("max depth"), 0);
        }
        if state.budget_exhausted() {
            return (Decision::direct("budget exhausted"), 0);
        }

        let prompt = self.build_prompt(state);
        match self
            .client
            .complete(&prompt, self.config.max_decision_tokens)
            .await
        {
            Ok(completion) => {
                let tokens = completion.usage.total();
                let decision = parse_decision(&completion.text).unwrap_or_else(|| {
                    warn!("decision reply unparseable, falling back to DIRECT");
                    Decision::direct("parse failure")
                });
                debug!(action = decision.action.name(), "controller decided");
                (decision, tokens)
            }
            Err(e) => {
                warn!(error = %e, "decision call failed, falling back to DIRECT");
                (
                    Decision::direct(format!("model error: {}", e)),
                    0,
                )
            }
        }
    }

    fn build_prompt(&self, state: &TaskState) -> String {
        let mut prompt = String::with_capacity(1024);
        prompt.push_str(
            "You are the meta-controller of a recursive language model runtime. \
             Choose the next action for the task below.\n\n",
        );
        prompt.push_str(&format!("Task: {}\n", state.task));
        prompt.push_str(&format!(
            "Budget remaining: {} tokens\nRecursion depth: {} of {}\n",
            state.budget_remain, state.recursion_depth, state.max_depth
        ));
        prompt.push_str(&format!(
            "Partial results so far: {}\n",
            state.partial_results.len()
        ));

        if !state.memory_hints.is_empty() {
            prompt.push_str("Relevant memory:\n");
            for hint in &state.memory_hints {
                let digest: String = hint.chars().take(self.config.hint_digest_chars).collect();
                prompt.push_str(&format!("- {}\n", digest));
            }
        }

        prompt.push_str(
            "\nReply with a single JSON object:\n\
             {\"action\": \"DIRECT|DECOMPOSE|MEMORY_QUERY|SUBCALL|SYNTHESIZE|EXECUTE\", \
             \"params\": {...}, \"reasoning\": \"...\"}\n\
             DECOMPOSE params: {\"strategy\": \"file|function|concept|custom\", \"chunks\": [...]}\n\
             MEMORY_QUERY params: {\"query\": \"...\"}\n\
             SUBCALL params: {\"prompt\": \"...\", \"snippet\": \"...\", \"token_budget\": n}\n\
             EXECUTE params: {\"code\": \"...\"}\n",
        );
        prompt
    }
}

/// Extract and parse the first balanced `{...}` block of a model reply.
///
/// Tolerates fenced code blocks and surrounding prose. String literals and
/// escapes inside the JSON are honored while scanning for balance; when
/// balanced extraction fails, one coarse first-`{` to last-`}` attempt is
/// made before giving up.
pub fn parse_decision(reply: &str) -> Option<Decision> {
    if let Some(block) = first_balanced_block(reply) {
        if let Some(decision) = decision_from_str(block) {
            return Some(decision);
        }
    }

    // Coarse fallback: everything between the outermost braces.
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    decision_from_str(&reply[start..=end])
}

fn decision_from_str(json: &str) -> Option<Decision> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    Decision::from_model_json(&value)
}

/// Locate the first balanced top-level `{...}` substring.
fn first_balanced_block(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::llm::testing::ScriptedClient;
    use crate::state::{Action, DecomposeStrategy};
    use pretty_assertions::assert_eq;

    fn state(budget: u64, depth: u32, max_depth: u32) -> TaskState {
        let mut s = TaskState::new("analyze the repo", budget, max_depth);
        s.recursion_depth = depth;
        s
    }

    fn controller(reply: &str) -> MetaController {
        MetaController::new(Arc::new(ScriptedClient::always(reply)))
    }

    #[tokio::test]
    async fn test_max_depth_forces_direct() {
        // The model would say DECOMPOSE; the guard never lets it speak.
        let ctl = controller(r#"{"action":"DECOMPOSE","params":{"strategy":"file"}}"#);
        for depth in [3, 4, 10] {
            let (decision, tokens) = ctl.decide(&state(10_000, depth, 3)).await;
            assert_eq!(decision.action, Action::Direct);
            assert_eq!(decision.reasoning, "max depth");
            assert_eq!(tokens, 0);
        }
    }

    #[tokio::test]
    async fn test_budget_exhausted_forces_direct() {
        let ctl = controller(r#"{"action":"SYNTHESIZE","params":null}"#);
        let (decision, _) = ctl.decide(&state(0, 0, 3)).await;
        assert_eq!(decision.action, Action::Direct);
        assert_eq!(decision.reasoning, "budget exhausted");
    }

    #[tokio::test]
    async fn test_clean_json_reply() {
        let ctl = controller(
            r#"{"action":"DECOMPOSE","params":{"strategy":"concept","chunks":[]},"reasoning":"large input"}"#,
        );
        let (decision, tokens) = ctl.decide(&state(10_000, 0, 3)).await;
        match decision.action {
            Action::Decompose { strategy, .. } => {
                assert_eq!(strategy, DecomposeStrategy::Concept)
            }
            other => panic!("expected decompose, got {:?}", other),
        }
        assert_eq!(decision.reasoning, "large input");
        assert!(tokens > 0);
    }

    #[tokio::test]
    async fn test_fenced_reply_tolerated() {
        let ctl = controller(
            "Here is my decision:\n```json\n{\"action\":\"MEMORY_QUERY\",\"params\":{\"query\":\"auth flow\"}}\n```\nLet me know.",
        );
        let (decision, _) = ctl.decide(&state(10_000, 0, 3)).await;
        assert_eq!(
            decision.action,
            Action::MemoryQuery {
                query: "auth flow".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_action_falls_back_to_direct() {
        let ctl = controller(r#"{"action":"TELEPORT","params":{}}"#);
        let (decision, _) = ctl.decide(&state(10_000, 0, 3)).await;
        assert_eq!(decision.action, Action::Direct);
        assert_eq!(decision.reasoning, "parse failure");
    }

    #[tokio::test]
    async fn test_malformed_json_falls_back_to_direct() {
        let ctl = controller("I think we should decompose the problem into parts.");
        let (decision, _) = ctl.decide(&state(10_000, 0, 3)).await;
        assert_eq!(decision.action, Action::Direct);
        assert_eq!(decision.reasoning, "parse failure");
    }

    #[tokio::test]
    async fn test_model_error_never_propagates() {
        let client = ScriptedClient::new(vec![Err(Error::Model("503 overloaded".into()))]);
        let ctl = MetaController::new(Arc::new(client));
        let (decision, _) = ctl.decide(&state(10_000, 0, 3)).await;
        assert_eq!(decision.action, Action::Direct);
        assert!(decision.reasoning.contains("503 overloaded"));
    }

    #[test]
    fn test_balanced_block_with_nested_braces() {
        let text = r#"prose {"action":"EXECUTE","params":{"code":"d = {'a': 1}"}} trailing"#;
        let block = first_balanced_block(text).unwrap();
        assert!(block.starts_with('{'));
        assert!(block.ends_with('}'));
        let decision = parse_decision(block).unwrap();
        assert_eq!(
            decision.action,
            Action::Execute {
                code: "d = {'a': 1}".into()
            }
        );
    }

    #[test]
    fn test_balanced_block_honors_string_escapes() {
        let text = r#"{"action":"SUBCALL","params":{"prompt":"say \"}\" please","snippet":""}}"#;
        let decision = parse_decision(text).unwrap();
        match decision.action {
            Action::Subcall { prompt, .. } => assert!(prompt.contains('}')),
            other => panic!("expected subcall, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decision_no_json() {
        assert!(parse_decision("no braces here").is_none());
        assert!(parse_decision("unbalanced { only").is_none());
    }

    #[test]
    fn test_prompt_contains_state_digest() {
        let ctl = controller("{}");
        let mut s = state(5_000, 1, 4);
        s.memory_hints = vec!["Users authenticate via JWT tokens".into()];
        s.partial_results = vec!["part one".into(), "part two".into()];

        let prompt = ctl.build_prompt(&s);
        assert!(prompt.contains("Budget remaining: 5000"));
        assert!(prompt.contains("Recursion depth: 1 of 4"));
        assert!(prompt.contains("Partial results so far: 2"));
        assert!(prompt.contains("Users authenticate via JWT"));
    }
}
