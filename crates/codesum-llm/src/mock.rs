//! Test-only mock LLM provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

pub const MOCK_EMBEDDING_DIMS: usize = 64;

/// Scripted provider for tests.
///
/// Chat replies are popped from a queue, falling back to `default_response`. Embeddings are
/// a bag-of-words hash of the input, so texts sharing words have positive cosine similarity.
#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    chat_log: Arc<Mutex<Vec<Vec<Message>>>>,
    embed_calls: Arc<AtomicUsize>,
    embedded_texts: Arc<AtomicUsize>,
    pub default_response: String,
    /// Return this vector for every text instead of the word hash.
    pub embedding: Option<Vec<f32>>,
    pub supports_embeddings: bool,
    pub fail_chat: bool,
    pub fail_embed: bool,
    pub context_window: Option<usize>,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            chat_log: Arc::new(Mutex::new(Vec::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            embedded_texts: Arc::new(AtomicUsize::new(0)),
            default_response: "mock response".into(),
            embedding: None,
            supports_embeddings: true,
            fail_chat: false,
            fail_embed: false,
            context_window: None,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Return `vector` for every embedded text.
    #[must_use]
    pub fn with_embedding(mut self, vector: Vec<f32>) -> Self {
        self.embedding = Some(vector);
        self
    }

    #[must_use]
    pub fn with_fail_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    #[must_use]
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    #[must_use]
    pub fn without_embeddings(mut self) -> Self {
        self.supports_embeddings = false;
        self
    }

    /// Every chat request received so far, in call order.
    #[must_use]
    pub fn chat_calls(&self) -> Vec<Vec<Message>> {
        self.chat_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `embed`/`embed_batch` invocations.
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Total number of texts embedded across all calls.
    #[must_use]
    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.embedding
            .clone()
            .unwrap_or_else(|| bag_of_words(text))
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

/// Hash lowercase alphanumeric words into `MOCK_EMBEDDING_DIMS` buckets and L2-normalize.
#[must_use]
pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_EMBEDDING_DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        #[allow(clippy::cast_possible_truncation)]
        let bucket = (hash % MOCK_EMBEDDING_DIMS as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        vector[MOCK_EMBEDDING_DIMS - 1] = 1.0;
    } else {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

impl LlmProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    fn context_window(&self) -> Option<usize> {
        self.context_window
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.pause().await;
        self.chat_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self.embed_batch(&[text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or(LlmError::EmptyResponse { provider: "mock" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.pause().await;
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported { provider: "mock" });
        }
        if self.fail_embed {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }
}
