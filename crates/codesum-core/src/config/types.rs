use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use codesum_index::{DEFAULT_EXCLUDES, SplitterConfig};
use codesum_llm::GenerationParams;

use crate::secret::Secret;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// LLM provider backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAi,
    Azure,
    Compatible,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Compatible => "compatible",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Prompt size limit in tokens; overrides what the backend reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<OpenAiConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatible: Option<CompatibleConfig>,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "llama3.1:8b".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_retries() -> u32 {
    5
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: 0.0,
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            context_window: None,
            openai: None,
            azure: None,
            compatible: None,
        }
    }
}

impl LlmConfig {
    #[must_use]
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AzureConfig {
    pub endpoint: String,
    pub chat_deployment: String,
    #[serde(default)]
    pub embedding_deployment: Option<String>,
    #[serde(default = "default_azure_api_version")]
    pub api_version: String,
}

fn default_azure_api_version() -> String {
    codesum_llm::openai::DEFAULT_AZURE_API_VERSION.into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompatibleConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./repos")
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentsConfig {
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_exclude() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|&p| p.to_owned()).collect()
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            exclude: default_exclude(),
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_max_size")]
    pub max_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

fn default_chunk_max_size() -> usize {
    2000
}

fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_chunk_max_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

impl From<ChunkingConfig> for SplitterConfig {
    fn from(c: ChunkingConfig) -> Self {
        Self {
            max_size: c.max_size,
            overlap: c.overlap,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_batch_size() -> usize {
    16
}

fn default_concurrency() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default = "default_lambda")]
    pub lambda: f32,
}

fn default_k() -> usize {
    20
}

fn default_fetch_k() -> usize {
    20
}

fn default_lambda() -> f32 {
    0.5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda: default_lambda(),
        }
    }
}

impl From<RetrievalConfig> for codesum_index::RetrievalConfig {
    fn from(c: RetrievalConfig) -> Self {
        Self {
            k: c.k,
            fetch_k: c.fetch_k,
            lambda: c.lambda,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_path")]
    pub system_path: PathBuf,
    /// Question asked when a request carries none.
    #[serde(default = "default_question")]
    pub default_question: String,
    /// Ask the model to rewrite the question even without prior turns.
    #[serde(default)]
    pub rewrite_without_history: bool,
}

fn default_system_path() -> PathBuf {
    PathBuf::from("prompts/codesum.txt")
}

fn default_question() -> String {
    "Summarize what this repository does, how it is organized and how the latest commit \
     changes it."
        .into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_path: default_system_path(),
            default_question: default_question(),
            rewrite_without_history: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_fetch_timeout")]
    pub fetch_seconds: u64,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_seconds: u64,
    #[serde(default = "default_llm_timeout")]
    pub llm_seconds: u64,
}

fn default_fetch_timeout() -> u64 {
    300
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_seconds: default_fetch_timeout(),
            embedding_seconds: default_embedding_timeout(),
            llm_seconds: default_llm_timeout(),
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_seconds)
    }

    #[must_use]
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_seconds)
    }

    #[must_use]
    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_seconds)
    }
}

/// API keys read from the environment after loading; never serialized.
#[derive(Debug, Default, Clone)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
    pub azure_api_key: Option<Secret>,
    pub compatible_api_key: Option<Secret>,
}
