//! Turns a conversational follow-up into a standalone search query.

use std::sync::Arc;
use std::time::Duration;

use codesum_llm::{LlmError, LlmProvider, Message};

use crate::conversation::{ConversationTurn, history_messages};
use crate::pipeline::PipelineError;

pub const REWRITE_INSTRUCTION: &str = "Given the above conversation, generate a search query to look up to get information relevant to the conversation. Only respond with the query, nothing else.";

/// Send `messages` with a deadline, mapping expiry to `LlmError::Timeout`.
pub(crate) async fn chat_with_timeout<P: LlmProvider>(
    provider: &P,
    messages: &[Message],
    timeout: Duration,
) -> Result<String, LlmError> {
    tokio::time::timeout(timeout, provider.chat(messages))
        .await
        .map_err(|_| LlmError::Timeout {
            operation: "chat",
            seconds: timeout.as_secs(),
        })?
}

pub struct QueryRewriter<P> {
    provider: Arc<P>,
    timeout: Duration,
    rewrite_without_history: bool,
}

impl<P: LlmProvider> QueryRewriter<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            rewrite_without_history: false,
        }
    }

    /// Ask the model even when there is no history to resolve.
    #[must_use]
    pub fn rewrite_without_history(mut self, enabled: bool) -> Self {
        self.rewrite_without_history = enabled;
        self
    }

    /// Produce a search query for `new_turn` in light of `history`.
    ///
    /// With empty history the turn is already standalone and is returned unchanged,
    /// unless the rewriter was configured to ask the model anyway. A blank model reply
    /// also falls back to `new_turn`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Generation` if the model call fails or times out, including
    /// when the model rejects the history as too long.
    pub async fn rewrite(
        &self,
        history: &[ConversationTurn],
        new_turn: &str,
    ) -> Result<String, PipelineError> {
        if history.is_empty() && !self.rewrite_without_history {
            tracing::debug!("no history, using the question as search query");
            return Ok(new_turn.to_owned());
        }

        let mut messages = history_messages(history);
        messages.push(Message::user(new_turn));
        messages.push(Message::user(REWRITE_INSTRUCTION));

        let reply = chat_with_timeout(self.provider.as_ref(), &messages, self.timeout)
            .await
            .map_err(PipelineError::Generation)?;

        let query = clean_query(&reply);
        if query.is_empty() {
            tracing::warn!("model returned an empty search query, using the question");
            return Ok(new_turn.to_owned());
        }
        tracing::info!(turns = history.len(), query, "rewrote search query");
        Ok(query.to_owned())
    }
}

/// Trim whitespace and one pair of surrounding quotes.
fn clean_query(reply: &str) -> &str {
    let trimmed = reply.trim();
    ['"', '\'', '`']
        .into_iter()
        .find_map(|q| trimmed.strip_prefix(q).and_then(|s| s.strip_suffix(q)))
        .map_or(trimmed, str::trim)
}

#[cfg(test)]
mod tests {
    use codesum_llm::Role;
    use codesum_llm::mock::MockProvider;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("What does the cache module do?"),
            ConversationTurn::assistant("It stores repository snapshots for 24 hours."),
        ]
    }

    #[tokio::test]
    async fn empty_history_returns_question_without_model_call() {
        let provider = MockProvider::default();
        let rewriter = QueryRewriter::new(Arc::new(provider.clone()), TIMEOUT);

        let query = rewriter.rewrite(&[], "What does this repo do?").await.unwrap();
        assert_eq!(query, "What does this repo do?");
        assert!(provider.chat_calls().is_empty());
    }

    #[tokio::test]
    async fn empty_history_can_still_ask_the_model() {
        let provider = MockProvider::with_responses(vec!["repository purpose overview".into()]);
        let rewriter =
            QueryRewriter::new(Arc::new(provider.clone()), TIMEOUT).rewrite_without_history(true);

        let query = rewriter.rewrite(&[], "What does this repo do?").await.unwrap();
        assert_eq!(query, "repository purpose overview");

        let calls = provider.chat_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![
                Message::user("What does this repo do?"),
                Message::user(REWRITE_INSTRUCTION),
            ]
        );
    }

    #[tokio::test]
    async fn history_precedes_turn_and_instruction() {
        let provider = MockProvider::with_responses(vec!["cache eviction TTL".into()]);
        let rewriter = QueryRewriter::new(Arc::new(provider.clone()), TIMEOUT);

        let query = rewriter.rewrite(&history(), "When is it evicted?").await.unwrap();
        assert_eq!(query, "cache eviction TTL");

        let calls = provider.chat_calls();
        let sent = &calls[0];
        let roles: Vec<Role> = sent.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User, Role::User]);
        assert_eq!(sent[2].content, "When is it evicted?");
        assert_eq!(sent[3].content, REWRITE_INSTRUCTION);
    }

    #[tokio::test]
    async fn blank_reply_falls_back_to_turn() {
        let provider = MockProvider::with_responses(vec!["  \n".into()]);
        let rewriter = QueryRewriter::new(Arc::new(provider), TIMEOUT);
        let query = rewriter.rewrite(&history(), "When is it evicted?").await.unwrap();
        assert_eq!(query, "When is it evicted?");
    }

    #[tokio::test]
    async fn backend_failure_is_generation_error() {
        let rewriter = QueryRewriter::new(Arc::new(MockProvider::failing()), TIMEOUT);
        let err = rewriter.rewrite(&history(), "q").await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)), "{err}");
    }

    struct OverflowingProvider;

    impl LlmProvider for OverflowingProvider {
        async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
            Err(LlmError::ContextLengthExceeded("history too long".into()))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![1.0])
        }

        fn supports_embeddings(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "overflowing"
        }
    }

    #[tokio::test]
    async fn context_overflow_during_rewrite_is_generation_error() {
        let rewriter = QueryRewriter::new(Arc::new(OverflowingProvider), TIMEOUT);
        let err = rewriter.rewrite(&history(), "q").await.unwrap_err();
        assert!(
            matches!(
                err,
                PipelineError::Generation(LlmError::ContextLengthExceeded(_))
            ),
            "{err}"
        );
        assert_eq!(err.kind().as_str(), "generation");
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let provider = MockProvider::default().with_delay(500);
        let rewriter = QueryRewriter::new(Arc::new(provider), Duration::from_millis(20));
        let err = rewriter.rewrite(&history(), "q").await.unwrap_err();
        assert!(
            matches!(err, PipelineError::Generation(LlmError::Timeout { .. })),
            "{err}"
        );
    }

    #[test]
    fn quotes_are_stripped() {
        assert_eq!(clean_query("  \"cache TTL\" \n"), "cache TTL");
        assert_eq!(clean_query("`eviction`"), "eviction");
        assert_eq!(clean_query("it's fine"), "it's fine");
        assert_eq!(clean_query("\"\""), "");
    }
}
