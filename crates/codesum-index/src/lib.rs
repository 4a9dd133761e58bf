//! Turn a repository snapshot into a searchable chunk index and retrieve from it.

pub mod builder;
pub mod document;
pub mod error;
pub mod index;
pub mod retriever;

pub use builder::{EmbeddingConfig, IndexBuilder};
pub use document::{
    Chunk, DEFAULT_EXCLUDES, Document, ExclusionSet, RecursiveSplitter, SnapshotLoader,
    SplitterConfig,
};
pub use error::IndexError;
pub use index::{VectorIndex, cosine_similarity};
pub use retriever::{
    DiverseRetriever, RetrievalConfig, RetrievalResult, RetrievedChunk, format_as_context,
};

/// Rough token estimate (four characters per token) used for prompt budgeting.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}
