//! Diversity-aware retrieval: similarity shortlist, MMR re-ranking, context formatting.

use std::cmp::Ordering;
use std::fmt::Write;

use crate::document::Chunk;
use crate::estimate_tokens;
use crate::index::{VectorIndex, cosine_similarity};

/// Retrieval configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Chunks to return; saturates at the index size.
    pub k: usize,
    /// Candidates shortlisted by raw similarity before re-ranking. Never less than `k`.
    pub fetch_k: usize,
    /// Relevance weight in `[0, 1]`: 1 ranks by similarity only, 0 by diversity only.
    pub lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 20,
            fetch_k: 20,
            lambda: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Chunks in selection order, which is not necessarily similarity order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    pub total_tokens: usize,
}

impl RetrievalResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Maximal-marginal-relevance retriever over a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct DiverseRetriever {
    config: RetrievalConfig,
}

impl DiverseRetriever {
    #[must_use]
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Select `min(k, index.len())` distinct chunks for `query`.
    ///
    /// Each round picks the candidate maximizing
    /// `lambda * sim(query, c) - (1 - lambda) * max(sim(c, s) for s in selected)`,
    /// preferring the lower index position on equal scores.
    #[must_use]
    pub fn retrieve(&self, index: &VectorIndex, query: &[f32]) -> RetrievalResult {
        let k = self.config.k.min(index.len());
        if k == 0 {
            return RetrievalResult::default();
        }

        let fetch_k = self.config.fetch_k.max(k);
        let lambda = self.config.lambda.clamp(0.0, 1.0);
        let mut candidates = index.search(query, fetch_k);
        let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k);

        while selected.len() < k && !candidates.is_empty() {
            let mut best: Option<(usize, f32)> = None;
            for (slot, &(position, relevance)) in candidates.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .filter_map(|&(chosen, _)| {
                        let a = index.get(position)?;
                        let b = index.get(chosen)?;
                        Some(cosine_similarity(&a.vector, &b.vector))
                    })
                    .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |m| m.max(s))))
                    .unwrap_or(0.0);
                let score = lambda * relevance - (1.0 - lambda) * redundancy;
                let better = match best {
                    None => true,
                    Some((best_slot, best_score)) => match score.total_cmp(&best_score) {
                        Ordering::Greater => true,
                        Ordering::Equal => position < candidates[best_slot].0,
                        Ordering::Less => false,
                    },
                };
                if better {
                    best = Some((slot, score));
                }
            }
            let Some((slot, _)) = best else {
                break;
            };
            selected.push(candidates.swap_remove(slot));
        }

        let chunks: Vec<RetrievedChunk> = selected
            .into_iter()
            .filter_map(|(position, score)| {
                index.get(position).map(|entry| RetrievedChunk {
                    chunk: entry.chunk.clone(),
                    score,
                })
            })
            .collect();
        let total_tokens = chunks.iter().map(|c| estimate_tokens(&c.chunk.text)).sum();

        tracing::debug!(
            requested = self.config.k,
            fetch_k,
            returned = chunks.len(),
            total_tokens,
            "retrieval complete"
        );
        RetrievalResult {
            chunks,
            total_tokens,
        }
    }
}

/// Format retrieved chunks as XML grounding context. Empty for an empty result.
#[must_use]
pub fn format_as_context(result: &RetrievalResult) -> String {
    if result.chunks.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");
    for retrieved in &result.chunks {
        let chunk = &retrieved.chunk;
        let _ = writeln!(
            out,
            "  <chunk file=\"{}\" lines=\"{}-{}\">",
            chunk.path, chunk.lines.0, chunk.lines.1,
        );
        out.push_str(&chunk.text);
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}
