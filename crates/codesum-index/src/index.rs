use crate::document::Chunk;

/// A chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Request-scoped in-memory vector index with exhaustive cosine search.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimensions: Option<usize>,
}

impl VectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble an index from already validated entries of equal dimension.
    pub(crate) fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let dimensions = entries.first().map(|e| e.vector.len());
        Self {
            entries,
            dimensions,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension, `None` for an empty index.
    #[must_use]
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&IndexEntry> {
        self.entries.get(position)
    }

    /// Positions and cosine scores of the `limit` entries most similar to `query`,
    /// best first. Equal scores keep index order.
    #[must_use]
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }
}

/// Cosine similarity, `0.0` when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
