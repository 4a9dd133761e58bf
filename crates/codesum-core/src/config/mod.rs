mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};
use codesum_index::ExclusionSet;

use crate::secret::Secret;

impl Config {
    /// Load configuration from a TOML file with env var overrides, then validate it.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read provider API keys from the environment.
    pub fn resolve_secrets(&mut self) {
        self.secrets.openai_api_key = Secret::from_env("CODESUM_OPENAI_API_KEY");
        self.secrets.azure_api_key = Secret::from_env("CODESUM_AZURE_API_KEY");
        self.secrets.compatible_api_key = Secret::from_env("CODESUM_COMPATIBLE_API_KEY");
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.max_size == 0 {
            bail!("chunking.max_size must be greater than zero");
        }
        if self.chunking.overlap >= self.chunking.max_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.max_size ({})",
                self.chunking.overlap,
                self.chunking.max_size
            );
        }
        if self.retrieval.k == 0 {
            bail!("retrieval.k must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.retrieval.lambda) {
            bail!(
                "retrieval.lambda must be within [0, 1], got {}",
                self.retrieval.lambda
            );
        }
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be greater than zero");
        }
        if self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            bail!("embedding.batch_size and embedding.concurrency must be greater than zero");
        }
        ExclusionSet::new(&self.documents.exclude).context("invalid documents.exclude")?;
        Ok(())
    }

    /// Embedding settings for the index builder, including the per-call deadline.
    #[must_use]
    pub fn index_embedding(&self) -> codesum_index::EmbeddingConfig {
        codesum_index::EmbeddingConfig {
            batch_size: self.embedding.batch_size,
            concurrency: self.embedding.concurrency,
            timeout: self.timeouts.embedding(),
        }
    }
}
