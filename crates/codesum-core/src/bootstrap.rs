//! Startup helpers: config path resolution and provider construction.

use std::path::PathBuf;

use anyhow::Context;
use codesum_llm::AnyProvider;
use codesum_llm::compatible::CompatibleProvider;
use codesum_llm::ollama::OllamaProvider;
use codesum_llm::openai::{AzureDeployment, OpenAiProvider};

use crate::config::{Config, ProviderKind};

pub const CONFIG_ENV: &str = "CODESUM_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Priority: `--config` flag > `CODESUM_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Build the configured backend. Secrets must already be resolved.
///
/// # Errors
///
/// Returns an error if the provider's config section or API key is missing.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let llm = &config.llm;
    let params = llm.generation_params();

    let provider = match llm.provider {
        ProviderKind::Ollama => {
            let mut provider = OllamaProvider::new(
                &llm.base_url,
                llm.model.clone(),
                llm.embedding_model.clone(),
            )
            .with_params(params);
            if let Some(window) = llm.context_window {
                provider.set_context_window(window);
            }
            AnyProvider::Ollama(provider)
        }
        ProviderKind::OpenAi => {
            let openai = llm
                .openai
                .as_ref()
                .context("llm.openai config section required for OpenAI provider")?;
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("CODESUM_OPENAI_API_KEY required for OpenAI provider")?
                .expose()
                .to_owned();
            let provider = OpenAiProvider::new(
                api_key,
                &openai.base_url,
                openai.model.clone(),
                openai.embedding_model.clone(),
            );
            AnyProvider::OpenAi(tune(provider, config))
        }
        ProviderKind::Azure => {
            let azure = llm
                .azure
                .as_ref()
                .context("llm.azure config section required for Azure OpenAI provider")?;
            let api_key = config
                .secrets
                .azure_api_key
                .as_ref()
                .context("CODESUM_AZURE_API_KEY required for Azure OpenAI provider")?
                .expose()
                .to_owned();
            let provider = OpenAiProvider::azure(
                api_key,
                AzureDeployment {
                    endpoint: azure.endpoint.clone(),
                    chat_deployment: azure.chat_deployment.clone(),
                    embedding_deployment: azure.embedding_deployment.clone(),
                    api_version: azure.api_version.clone(),
                },
            );
            AnyProvider::OpenAi(tune(provider, config))
        }
        ProviderKind::Compatible => {
            let entry = llm
                .compatible
                .as_ref()
                .context("llm.compatible config section required for compatible provider")?;
            let api_key = config
                .secrets
                .compatible_api_key
                .as_ref()
                .with_context(|| {
                    format!("CODESUM_COMPATIBLE_API_KEY required for {}", entry.name)
                })?
                .expose()
                .to_owned();
            let inner = OpenAiProvider::new(
                api_key,
                &entry.base_url,
                entry.model.clone(),
                entry.embedding_model.clone(),
            );
            AnyProvider::Compatible(CompatibleProvider::new(
                entry.name.clone(),
                tune(inner, config),
            ))
        }
    };

    tracing::info!(provider = %llm.provider, "created LLM provider");
    Ok(provider)
}

fn tune(provider: OpenAiProvider, config: &Config) -> OpenAiProvider {
    let provider = provider
        .with_params(config.llm.generation_params())
        .with_max_retries(config.llm.max_retries);
    match config.llm.context_window {
        Some(window) => provider.with_context_window(window),
        None => provider,
    }
}

/// Ask Ollama for the model's context length when none is configured.
///
/// Failures are logged and leave the provider unchanged.
pub async fn detect_context_window(provider: &mut AnyProvider, config: &Config) {
    if config.llm.context_window.is_some() {
        return;
    }
    if let AnyProvider::Ollama(ollama) = provider {
        match ollama.fetch_context_length().await {
            Ok(Some(ctx)) => {
                ollama.set_context_window(ctx);
                tracing::info!(context_window = ctx, "detected Ollama model context window");
            }
            Ok(None) => tracing::debug!("Ollama did not report a context length"),
            Err(e) => tracing::warn!("failed to query Ollama model info: {e}"),
        }
    }
}
