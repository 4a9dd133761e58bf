use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};

use codesum_llm::{LlmError, LlmProvider};

use crate::document::Chunk;
use crate::error::{IndexError, Result};
use crate::index::{IndexEntry, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Texts sent per embedding request.
    pub batch_size: usize,
    /// Embedding requests in flight at once.
    pub concurrency: usize,
    /// Deadline for a single embedding request.
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            concurrency: 4,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Embeds chunks and assembles a [`VectorIndex`].
///
/// A build either embeds every chunk or fails; a partially embedded index is never
/// returned.
pub struct IndexBuilder<P> {
    provider: Arc<P>,
    config: EmbeddingConfig,
}

impl<P: LlmProvider> IndexBuilder<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: EmbeddingConfig) -> Self {
        Self { provider, config }
    }

    /// # Errors
    ///
    /// Returns `IndexError::Embedding` if any request fails or times out, and
    /// `IndexError::Malformed` if the returned vectors are missing, empty, non-finite or of
    /// inconsistent dimension.
    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<VectorIndex> {
        if chunks.is_empty() {
            tracing::debug!("no chunks to index");
            return Ok(VectorIndex::new());
        }

        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<String>> = chunks
            .chunks(batch_size)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();
        let batch_count = batches.len();

        let vectors: Vec<Vec<f32>> = futures::stream::iter(batches)
            .map(|texts| self.embed_texts(texts))
            .buffered(self.config.concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        let dimensions = validate_vectors(&vectors, chunks.len())?;
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        tracing::info!(
            chunks = entries.len(),
            batches = batch_count,
            dimensions,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "index built"
        );
        Ok(VectorIndex::from_entries(entries))
    }

    /// Embed a search query, checking it matches the index dimension when one is given.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Embedding` on backend failure and `IndexError::Malformed` on a
    /// dimension mismatch.
    pub async fn embed_query(&self, query: &str, dimensions: Option<usize>) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(vec![query.to_owned()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| IndexError::Malformed("no vector for query".into()))?;
        validate_vectors(std::slice::from_ref(&vector), 1)?;
        if let Some(expected) = dimensions
            && vector.len() != expected
        {
            return Err(IndexError::Malformed(format!(
                "query vector has dimension {} but the index has {expected}",
                vector.len()
            )));
        }
        Ok(vector)
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let vectors = tokio::time::timeout(self.config.timeout, self.provider.embed_batch(&texts))
            .await
            .map_err(|_| LlmError::Timeout {
                operation: "embedding",
                seconds: self.config.timeout.as_secs(),
            })??;
        if vectors.len() != expected {
            return Err(IndexError::Malformed(format!(
                "{} vectors returned for {expected} texts",
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

fn validate_vectors(vectors: &[Vec<f32>], expected: usize) -> Result<usize> {
    if vectors.len() != expected {
        return Err(IndexError::Malformed(format!(
            "{} vectors returned for {expected} chunks",
            vectors.len()
        )));
    }
    let dimensions = vectors.first().map_or(0, Vec::len);
    if dimensions == 0 {
        return Err(IndexError::Malformed("empty embedding vector".into()));
    }
    for (i, vector) in vectors.iter().enumerate() {
        if vector.len() != dimensions {
            return Err(IndexError::Malformed(format!(
                "vector {i} has dimension {} (expected {dimensions})",
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::Malformed(format!(
                "vector {i} contains non-finite values"
            )));
        }
    }
    Ok(dimensions)
}
