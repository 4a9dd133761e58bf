#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("{provider} API returned {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: &'static str },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Rate limits, timeouts, connection failures and server-side (5xx) errors are
    /// transient. Malformed input, authentication failures and oversized prompts are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            Self::Json(_)
            | Self::ContextLengthExceeded(_)
            | Self::EmptyResponse { .. }
            | Self::EmbedUnsupported { .. }
            | Self::Other(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
