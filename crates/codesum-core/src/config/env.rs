use std::path::PathBuf;
use std::str::FromStr;

use super::Config;

/// Parse `key` from the environment, warning and returning `None` on a bad value.
fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    match v.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {v}");
            None
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_pipeline();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("CODESUM_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODESUM_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODESUM_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("CODESUM_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CODESUM_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Some(secs) = parsed::<u64>("CODESUM_TIMEOUT_LLM") {
            self.timeouts.llm_seconds = secs;
        }
        if let Some(secs) = parsed::<u64>("CODESUM_TIMEOUT_EMBEDDING") {
            self.timeouts.embedding_seconds = secs;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Ok(v) = std::env::var("CODESUM_CACHE_ROOT") {
            self.cache.root = PathBuf::from(v);
        }
        if let Some(ttl) = parsed::<u64>("CODESUM_CACHE_TTL_SECS") {
            self.cache.ttl_secs = ttl;
        }
        if let Some(size) = parsed::<usize>("CODESUM_CHUNK_MAX_SIZE") {
            self.chunking.max_size = size;
        }
        if let Some(overlap) = parsed::<usize>("CODESUM_CHUNK_OVERLAP") {
            self.chunking.overlap = overlap;
        }
        if let Some(k) = parsed::<usize>("CODESUM_RETRIEVAL_K") {
            self.retrieval.k = k;
        }
        if let Some(lambda) = parsed::<f32>("CODESUM_RETRIEVAL_LAMBDA") {
            self.retrieval.lambda = lambda;
        }
        if let Ok(v) = std::env::var("CODESUM_PROMPT_PATH") {
            self.prompt.system_path = PathBuf::from(v);
        }
        if let Some(secs) = parsed::<u64>("CODESUM_TIMEOUT_FETCH") {
            self.timeouts.fetch_seconds = secs;
        }
    }
}
