//! End-to-end scenarios exercising the full runtime surface.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use rlm_runtime::{
    resume_session, AsyncExecutor, CodeInterpreter, Completion, Error, ExecOutcome,
    HypergraphStore, ModelClient, Node, NodeType, OpOutput, Operation, Orchestrator,
    RecoveryConfig, Result, SessionTracker, TaskState, TokenUsage, TraceEventType,
};

/// Client that pops scripted replies in order, repeating the last one, and
/// records every prompt it sees.
struct ScriptedClient {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
    tokens_per_call: u64,
    delay: Option<Duration>,
}

impl ScriptedClient {
    fn new(replies: Vec<&str>, tokens_per_call: u64) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            tokens_per_call,
            delay: None,
        }
    }

    fn always(reply: &str, tokens_per_call: u64) -> Self {
        let client = Self::new(vec![reply], tokens_per_call);
        *client.last.lock().unwrap() = Some(reply.to_string());
        client
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(&self, prompt: &str, _max_output_tokens: u64) -> Result<Completion> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        let text = match next {
            Some(text) => {
                *self.last.lock().unwrap() = Some(text.clone());
                text
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::Model("scripted client exhausted".into()))?,
        };
        Ok(Completion::new(
            text,
            TokenUsage::new(self.tokens_per_call / 2, self.tokens_per_call / 2),
        ))
    }

    fn provider(&self) -> &str {
        "scripted"
    }
}

/// Client that answers `R_<file>` when the prompt focuses on a file.
struct FileEchoClient {
    tokens_per_call: u64,
}

#[async_trait]
impl ModelClient for FileEchoClient {
    async fn complete(&self, prompt: &str, _max_output_tokens: u64) -> Result<Completion> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let text = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Focus on file: "))
            .map(|file| format!("R_{}", file.trim()))
            .unwrap_or_else(|| "R_?".to_string());
        Ok(Completion::new(
            text,
            TokenUsage::new(self.tokens_per_call / 2, self.tokens_per_call / 2),
        ))
    }

    fn provider(&self) -> &str {
        "file-echo"
    }
}

/// Interpreter that pops scripted outcomes in order.
struct ScriptedInterpreter {
    outcomes: Mutex<VecDeque<ExecOutcome>>,
}

#[async_trait]
impl CodeInterpreter for ScriptedInterpreter {
    async fn execute(&self, _code: &str) -> Result<ExecOutcome> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn set_var(&self, _name: &str, _value: serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

fn direct_json() -> &'static str {
    r#"{"action":"DIRECT","params":null,"reasoning":"answer directly"}"#
}

// Scenario 1: simple direct answer.
#[tokio::test]
async fn scenario_simple_direct() {
    let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("4", 20)))
        .decision_client(Arc::new(ScriptedClient::always(direct_json(), 0)))
        .total_budget(1_000)
        .build();

    let outcome = orchestrator.execute("What is 2+2?").await;

    assert!(outcome.is_success());
    assert!(outcome.response.contains('4'));

    // Depth never exceeded 0 and exactly one decision was made.
    let trace = orchestrator.trace();
    assert!(trace.events().iter().all(|e| e.depth == 0));
    assert_eq!(trace.by_type(TraceEventType::DecisionRunning).len(), 1);
}

// Scenario 2: decomposition fanned out through the async executor.
#[tokio::test(start_paused = true)]
async fn scenario_decomposition_async() {
    let decompose_json =
        r#"{"action":"DECOMPOSE","params":{"strategy":"file","chunks":["a","b","c"]},"reasoning":"per file"}"#;
    let decision_client = ScriptedClient::new(vec![decompose_json, direct_json()], 0);

    let orchestrator = Orchestrator::builder(Arc::new(FileEchoClient { tokens_per_call: 100 }))
        .decision_client(Arc::new(decision_client))
        .total_budget(10_000)
        .executor_config(
            rlm_runtime::ExecutorConfig::default()
                .with_max_parallel(4)
                .with_estimated_cost_per_op(100),
        )
        .build();

    let started = tokio::time::Instant::now();
    let outcome = orchestrator.execute("summarize these files").await;
    let elapsed = started.elapsed();

    assert!(outcome.is_success());
    // Sub-results reassembled in original chunk order.
    assert_eq!(outcome.response, "R_a\n\nR_b\n\nR_c");
    // 3 sub-ops at 100 tokens each; concatenation adds no overhead.
    assert_eq!(outcome.total_tokens, 300);
    // Parallel fan-out: well under 2x the single-op latency of 50ms.
    assert!(elapsed < Duration::from_millis(100), "elapsed {:?}", elapsed);
}

// Scenario 3: speculative racing keeps the fast alternative.
#[tokio::test(start_paused = true)]
async fn scenario_speculative_racing() {
    let executor = AsyncExecutor::default();
    let state = TaskState::new("race", 1_000, 3);
    let alts = vec![
        Operation::new("fast", "fast alternative", state.clone()),
        Operation::new("slow", "slow alternative", state),
    ];

    let started = tokio::time::Instant::now();
    let result = executor
        .execute_speculative(alts, |op, token| async move {
            let delay = if op.id == "fast" { 10 } else { 500 };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {
                    Ok(OpOutput::new("ok", 10))
                }
                _ = token.cancelled() => Err(Error::cancelled("lost the race")),
            }
        })
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.winner, "fast");
    assert!(result.cancelled.contains(&"slow".to_string()));
    assert_eq!(result.result.output, "ok");
    assert!(elapsed < Duration::from_millis(150), "elapsed {:?}", elapsed);
}

// Scenario 4: EXECUTE fails twice, the frame retries once, then degrades.
#[tokio::test]
async fn scenario_retry_then_degrade() {
    let syntax = ExecOutcome {
        error: Some("SyntaxError: invalid syntax".into()),
        ..ExecOutcome::default()
    };
    let interpreter = ScriptedInterpreter {
        outcomes: Mutex::new(vec![syntax.clone(), syntax].into()),
    };
    let execute_json = r#"{"action":"EXECUTE","params":{"code":"print(x"},"reasoning":"run"}"#;

    let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always(
        "degraded but present answer",
        50,
    )))
    .decision_client(Arc::new(ScriptedClient::new(vec![execute_json], 0)))
    .interpreter(Arc::new(interpreter))
    .recovery_config(RecoveryConfig {
        max_retries: 1,
        retry_delay: Duration::from_millis(1),
        jitter: 0.0,
    })
    .build();

    let outcome = orchestrator.execute("run the snippet").await;

    assert!(outcome.is_success());
    assert!(outcome.degraded);
    assert!(!outcome.response.is_empty());

    let trace = orchestrator.trace();
    assert_eq!(trace.by_type(TraceEventType::Recovery).len(), 2);
    assert_eq!(trace.by_type(TraceEventType::Degradation).len(), 1);
}

// Scenario 5: memory recall feeds hints and bumps access exactly once.
#[tokio::test]
async fn scenario_memory_recall() {
    let store = Arc::new(HypergraphStore::in_memory().unwrap());
    let fact = Node::new(NodeType::Fact, "Users authenticate via JWT");
    store.create_node(&fact).unwrap();

    let main = Arc::new(ScriptedClient::always("With JWT.", 20));
    let orchestrator = Orchestrator::builder(Arc::clone(&main) as Arc<dyn ModelClient>)
        .decision_client(Arc::new(ScriptedClient::always(direct_json(), 0)))
        .store(Arc::clone(&store))
        .build();

    let outcome = orchestrator.execute("How do we auth?").await;
    assert!(outcome.is_success());

    // The fact's content reached the model as a memory hint.
    let prompts = main.prompts();
    assert!(prompts
        .iter()
        .any(|p| p.contains("Users authenticate via JWT")));

    // Access bumped exactly once.
    let updated = store.get_node(&fact.id).unwrap().unwrap();
    assert_eq!(updated.access_count, 1);
}

// Scenario 6: a session ends and a later invocation resumes it.
#[tokio::test]
async fn scenario_session_resume() {
    let store = Arc::new(HypergraphStore::in_memory().unwrap());

    let orchestrator = Orchestrator::builder(Arc::new(ScriptedClient::always("done", 10)))
        .decision_client(Arc::new(ScriptedClient::always(direct_json(), 0)))
        .store(Arc::clone(&store))
        .build();

    let tracker = SessionTracker::new(Arc::clone(&store));
    let task = "tighten error handling in src/executor/mod.rs";
    let outcome = orchestrator.execute(task).await;
    tracker.record_task(task, &outcome);
    tracker.add_next_step("add timeout coverage for the plan runner");
    let ended = tracker.end_session().unwrap();

    // A later invocation resumes from the stored summary.
    let resume = resume_session(&store).unwrap().expect("summary present");
    assert_eq!(resume.previous_session.session_id, ended.session_id);
    assert_eq!(
        resume.next_steps,
        vec!["add timeout coverage for the plan runner".to_string()]
    );
    assert_eq!(
        resume.active_files,
        vec!["src/executor/mod.rs".to_string()]
    );
}

// Cross-cutting: budget pressure serializes parallel admission.
#[tokio::test(start_paused = true)]
async fn scenario_budget_backpressure() {
    let executor = AsyncExecutor::new(
        rlm_runtime::ExecutorConfig::default()
            .with_max_parallel(8)
            .with_estimated_cost_per_op(1_000),
    );
    let gauge = Arc::new(AtomicU64::new(0));
    let high_water = Arc::new(AtomicU64::new(0));

    let state = TaskState::new("t", 1_000, 3);
    let ops: Vec<Operation> = (0..5)
        .map(|i| Operation::new(format!("op{}", i), "t", state.clone()))
        .collect();

    // Budget only admits one op at a time.
    let result = executor
        .execute_parallel(ops, 1_500, |_op, _token| {
            let gauge = Arc::clone(&gauge);
            let high_water = Arc::clone(&high_water);
            async move {
                let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                gauge.fetch_sub(1, Ordering::SeqCst);
                Ok(OpOutput::new("ok", 100))
            }
        })
        .await
        .unwrap();

    assert_eq!(result.success_ids.len(), 5);
    assert_eq!(high_water.load(Ordering::SeqCst), 1);
}
