//! Error types for codesum-index.

/// Errors raised while loading, embedding or indexing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading snapshot files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An exclusion glob could not be compiled.
    #[error("invalid exclusion pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The embedding service failed or timed out.
    #[error("embedding failed: {0}")]
    Embedding(#[from] codesum_llm::LlmError),

    /// The embedding service answered with vectors that cannot be indexed.
    #[error("malformed embedding output: {0}")]
    Malformed(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
