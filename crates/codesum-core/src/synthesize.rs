//! Grounded answer generation from retrieved chunks.

use std::sync::Arc;
use std::time::Duration;

use codesum_index::{RetrievalResult, estimate_tokens, format_as_context};
use codesum_llm::{LlmError, LlmProvider, Message};

use crate::conversation::{ConversationTurn, history_messages};
use crate::pipeline::PipelineError;
use crate::prompt::{PromptVars, SystemPrompt};
use crate::repo::HeadCommit;
use crate::rewrite::chat_with_timeout;

/// Everything one synthesis call needs.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub retrieved: &'a RetrievalResult,
    pub history: &'a [ConversationTurn],
    pub question: &'a str,
    pub head: &'a HeadCommit,
    pub repository: &'a str,
}

/// Builds the system/history/question request and enforces the prompt budget.
///
/// Context is never truncated: a prompt estimated to exceed the model's context window
/// (minus the tokens reserved for the reply) fails with `ContextTooLarge`.
pub struct AnswerSynthesizer<P> {
    provider: Arc<P>,
    prompt: SystemPrompt,
    timeout: Duration,
    context_window: Option<usize>,
    reserved_output: usize,
}

impl<P: LlmProvider> AnswerSynthesizer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, prompt: SystemPrompt, timeout: Duration) -> Self {
        Self {
            provider,
            prompt,
            timeout,
            context_window: None,
            reserved_output: 0,
        }
    }

    /// Override the provider's context window and reserve `max_tokens` for the reply.
    #[must_use]
    pub fn with_budget(mut self, context_window: Option<usize>, max_tokens: u32) -> Self {
        self.context_window = context_window;
        self.reserved_output = usize::try_from(max_tokens).unwrap_or(usize::MAX);
        self
    }

    #[must_use]
    pub fn build_messages(&self, input: &SynthesisInput<'_>) -> Vec<Message> {
        let context = format_as_context(input.retrieved);
        let system = self.prompt.render(&PromptVars {
            context: &context,
            commit_message: &input.head.message,
            commit_author: &input.head.author,
            repository: input.repository,
        });

        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history_messages(input.history));
        messages.push(Message::user(input.question));
        messages
    }

    /// Token limit available for the prompt, if the window is known.
    #[must_use]
    pub fn prompt_limit(&self) -> Option<usize> {
        self.context_window
            .or_else(|| self.provider.context_window())
            .map(|window| window.saturating_sub(self.reserved_output))
    }

    /// # Errors
    ///
    /// Returns `PipelineError::ContextTooLarge` if the estimate exceeds the limit.
    pub fn check_budget(&self, messages: &[Message]) -> Result<usize, PipelineError> {
        let estimated: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        if let Some(limit) = self.prompt_limit()
            && estimated > limit
        {
            return Err(PipelineError::ContextTooLarge(format!(
                "prompt needs about {estimated} tokens, the model accepts {limit}"
            )));
        }
        Ok(estimated)
    }

    /// # Errors
    ///
    /// Returns `ContextTooLarge` when the prompt does not fit (estimated locally or
    /// reported by the backend) and `Generation` when the call fails, times out or
    /// returns nothing.
    pub async fn synthesize(&self, input: &SynthesisInput<'_>) -> Result<String, PipelineError> {
        let messages = self.build_messages(input);
        let estimated = self.check_budget(&messages)?;
        tracing::debug!(
            chunks = input.retrieved.len(),
            history = input.history.len(),
            estimated_tokens = estimated,
            "synthesizing answer"
        );

        let answer = chat_with_timeout(self.provider.as_ref(), &messages, self.timeout)
            .await
            .map_err(PipelineError::from_generation)?;
        if answer.trim().is_empty() {
            return Err(PipelineError::Generation(LlmError::EmptyResponse {
                provider: "synthesizer",
            }));
        }
        Ok(answer)
    }
}
