//! Model client contract.
//!
//! The runtime never talks to a provider directly; callers wire in anything
//! that satisfies [`ModelClient`]. The trait is deliberately small: one
//! completion call with an output-token cap, plus a caching-aware variant
//! that accepts a [`StructuredPrompt`] and defaults to flattening it.

use async_trait::async_trait;

use crate::error::Result;

use super::types::{Completion, StructuredPrompt};

/// Abstract request to a remote language model.
///
/// Implementations must be `Send + Sync`; every call is independent and
/// reentrant, so a single client may serve many concurrent frames.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Complete a prompt, generating at most `max_output_tokens` tokens.
    async fn complete(&self, prompt: &str, max_output_tokens: u64) -> Result<Completion>;

    /// Complete a structured prompt whose blocks may carry cache markers.
    ///
    /// The default implementation flattens the prompt and ignores markers;
    /// providers with prompt caching override this to pass the markers
    /// through and report cache token counters in the returned usage.
    async fn complete_with_caching(
        &self,
        prompt: &StructuredPrompt,
        max_output_tokens: u64,
    ) -> Result<Completion> {
        self.complete(&prompt.flatten(), max_output_tokens).await
    }

    /// Identifier for the backing provider, used in error messages.
    fn provider(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for std::sync::Arc<T> {
    async fn complete(&self, prompt: &str, max_output_tokens: u64) -> Result<Completion> {
        (**self).complete(prompt, max_output_tokens).await
    }

    async fn complete_with_caching(
        &self,
        prompt: &StructuredPrompt,
        max_output_tokens: u64,
    ) -> Result<Completion> {
        (**self).complete_with_caching(prompt, max_output_tokens).await
    }

    fn provider(&self) -> &str {
        (**self).provider()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted clients shared by unit tests across the crate.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::llm::types::TokenUsage;

    /// Client that pops scripted replies in order, then repeats the last.
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String>>>,
        last: Mutex<Option<String>>,
        pub calls: AtomicU64,
        tokens_per_call: u64,
    }

    impl ScriptedClient {
        pub fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                last: Mutex::new(None),
                calls: AtomicU64::new(0),
                tokens_per_call: 100,
            }
        }

        pub fn always(reply: impl Into<String>) -> Self {
            let reply = reply.into();
            let client = Self::new(vec![Ok(reply.clone())]);
            *client.last.lock().unwrap() = Some(reply);
            client
        }

        pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
            self.tokens_per_call = tokens;
            self
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(&self, _prompt: &str, _max_output_tokens: u64) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => {
                    *self.last.lock().unwrap() = Some(text.clone());
                    Ok(Completion::new(
                        text,
                        TokenUsage::new(self.tokens_per_call / 2, self.tokens_per_call / 2),
                    ))
                }
                Some(Err(e)) => Err(e),
                None => {
                    let last = self.last.lock().unwrap().clone();
                    match last {
                        Some(text) => Ok(Completion::new(
                            text,
                            TokenUsage::new(self.tokens_per_call / 2, self.tokens_per_call / 2),
                        )),
                        None => Err(Error::Model("scripted client exhausted".into())),
                    }
                }
            }
        }

        fn provider(&self) -> &str {
            "scripted"
        }
    }
}
