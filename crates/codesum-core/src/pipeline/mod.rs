pub mod builder;
pub mod stages;
pub mod step;

pub use builder::Pipeline;
pub use step::Step;

use codesum_index::IndexError;
use codesum_llm::LlmError;
use serde::Serialize;

use crate::repo::FetchError;

/// Failure of one request. Every variant is fatal; no partial answer is produced.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Embedding(IndexError),

    #[error("generation failed: {0}")]
    Generation(#[source] LlmError),

    #[error("prompt does not fit the model context: {0}")]
    ContextTooLarge(String),
}

/// Stable, machine-readable error category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Fetch,
    Embedding,
    Generation,
    ContextTooLarge,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Fetch => "fetch",
            Self::Embedding => "embedding",
            Self::Generation => "generation",
            Self::ContextTooLarge => "context_too_large",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Fetch(_) => ErrorKind::Fetch,
            Self::Embedding(_) => ErrorKind::Embedding,
            Self::Generation(_) => ErrorKind::Generation,
            Self::ContextTooLarge(_) => ErrorKind::ContextTooLarge,
        }
    }

    /// Map a chat failure, recognising backend context-length rejections.
    #[must_use]
    pub fn from_generation(err: LlmError) -> Self {
        match err {
            LlmError::ContextLengthExceeded(message) => Self::ContextTooLarge(message),
            other => Self::Generation(other),
        }
    }
}

impl From<IndexError> for PipelineError {
    fn from(err: IndexError) -> Self {
        match err {
            // Reading the snapshot is part of obtaining the repository.
            IndexError::Io(e) => Self::Fetch(FetchError::Io(e)),
            IndexError::Pattern { pattern, source } => {
                Self::Validation(format!("invalid exclusion pattern {pattern:?}: {source}"))
            }
            e @ (IndexError::Embedding(_) | IndexError::Malformed(_)) => Self::Embedding(e),
        }
    }
}
