use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{GenerationParams, LlmProvider, Message};
use crate::retry::send_with_retry;

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";
const DEFAULT_MAX_RETRIES: u32 = 3;
const MAX_ERROR_MESSAGE_CHARS: usize = 512;

/// Azure OpenAI resource and the deployments serving chat and embeddings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureDeployment {
    pub endpoint: String,
    pub chat_deployment: String,
    pub embedding_deployment: Option<String>,
    pub api_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Endpoint {
    OpenAi { base_url: String },
    Azure(AzureDeployment),
}

/// Client for the OpenAI REST API and Azure OpenAI deployments.
///
/// Both flavours share request and response bodies; they differ in URL layout and in
/// the authentication header.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: Endpoint,
    model: String,
    embedding_model: Option<String>,
    params: GenerationParams,
    max_retries: u32,
    context_window: Option<usize>,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("params", &self.params)
            .field("max_retries", &self.max_retries)
            .field("context_window", &self.context_window)
            .finish()
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        api_key: String,
        base_url: &str,
        model: String,
        embedding_model: Option<String>,
    ) -> Self {
        Self {
            client: crate::http::default_client(),
            api_key,
            endpoint: Endpoint::OpenAi {
                base_url: base_url.trim_end_matches('/').to_owned(),
            },
            model,
            embedding_model,
            params: GenerationParams::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            context_window: None,
        }
    }

    #[must_use]
    pub fn azure(api_key: String, mut deployment: AzureDeployment) -> Self {
        deployment.endpoint = deployment.endpoint.trim_end_matches('/').to_owned();
        Self {
            client: crate::http::default_client(),
            api_key,
            model: deployment.chat_deployment.clone(),
            embedding_model: deployment.embedding_deployment.clone(),
            endpoint: Endpoint::Azure(deployment),
            params: GenerationParams::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            context_window: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the context window inferred from the model name.
    #[must_use]
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    fn label(&self) -> &'static str {
        match self.endpoint {
            Endpoint::OpenAi { .. } => "openai",
            Endpoint::Azure(_) => "azure",
        }
    }

    fn chat_url(&self) -> String {
        match &self.endpoint {
            Endpoint::OpenAi { base_url } => format!("{base_url}/chat/completions"),
            Endpoint::Azure(d) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                d.endpoint, d.chat_deployment, d.api_version
            ),
        }
    }

    fn embeddings_url(&self) -> Option<String> {
        match &self.endpoint {
            Endpoint::OpenAi { base_url } => Some(format!("{base_url}/embeddings")),
            Endpoint::Azure(d) => d.embedding_deployment.as_ref().map(|dep| {
                format!(
                    "{}/openai/deployments/{dep}/embeddings?api-version={}",
                    d.endpoint, d.api_version
                )
            }),
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match self.endpoint {
            Endpoint::OpenAi { .. } => {
                builder.header("Authorization", format!("Bearer {}", self.api_key))
            }
            Endpoint::Azure(_) => builder.header("api-key", &self.api_key),
        }
    }

    async fn read_success(&self, response: reqwest::Response) -> Result<String, LlmError> {
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            return Ok(text);
        }
        tracing::error!(provider = self.label(), %status, body = %text, "API request failed");
        Err(api_error(self.label(), status.as_u16(), &text))
    }
}

impl LlmProvider for OpenAiProvider {
    fn context_window(&self) -> Option<usize> {
        self.context_window.or_else(|| known_context_window(&self.model))
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            max_tokens: self.params.max_tokens,
        };
        let url = self.chat_url();

        let response = send_with_retry(self.label(), self.max_retries, || {
            self.post(&url).json(&body).send()
        })
        .await?;
        let text = self.read_success(response).await?;
        let resp: ChatResponse = serde_json::from_str(&text)?;

        if let Some(usage) = resp.usage {
            tracing::debug!(
                provider = self.label(),
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat usage"
            );
        }

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse {
                provider: self.label(),
            })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self.embed_batch(&[text.to_owned()]).await?;
        vectors.pop().ok_or(LlmError::EmptyResponse {
            provider: self.label(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let (Some(url), Some(model)) = (self.embeddings_url(), self.embedding_model.as_deref())
        else {
            return Err(LlmError::EmbedUnsupported {
                provider: self.label(),
            });
        };
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            input: texts,
            model,
        };
        let response = send_with_retry(self.label(), self.max_retries, || {
            self.post(&url).json(&body).send()
        })
        .await?;
        let text = self.read_success(response).await?;
        let mut resp: EmbeddingResponse = serde_json::from_str(&text)?;

        if resp.data.len() != texts.len() {
            return Err(LlmError::Other(format!(
                "{} returned {} embeddings for {} inputs",
                self.label(),
                resp.data.len(),
                texts.len()
            )));
        }
        resp.data.sort_by_key(|d| d.index);
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.embeddings_url().is_some() && self.embedding_model.is_some()
    }

    fn name(&self) -> &str {
        self.label()
    }
}

fn known_context_window(model: &str) -> Option<usize> {
    if model.starts_with("gpt-4.1") {
        Some(1_047_576)
    } else if model.starts_with("gpt-4o") || model.starts_with("gpt-4-turbo") {
        Some(128_000)
    } else if model.starts_with("gpt-4-32k") {
        Some(32_768)
    } else if model.starts_with("gpt-4") {
        Some(8_192)
    } else if model.starts_with("gpt-35") || model.starts_with("gpt-3.5") {
        Some(16_385)
    } else {
        None
    }
}

fn api_error(provider: &'static str, status: u16, body: &str) -> LlmError {
    let parsed = serde_json::from_str::<ApiErrorEnvelope>(body).ok();
    let message = parsed.as_ref().map_or_else(
        || body.chars().take(MAX_ERROR_MESSAGE_CHARS).collect(),
        |e| e.error.message.clone(),
    );
    let code = parsed.and_then(|e| e.error.code);

    if code.as_deref() == Some("context_length_exceeded")
        || message.contains("maximum context length")
    {
        return LlmError::ContextLengthExceeded(message);
    }
    LlmError::Api {
        provider,
        status,
        message,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn openai(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(
            "sk-test".into(),
            &format!("{}/v1/", server.uri()),
            "gpt-4o-mini".into(),
            Some("text-embedding-3-small".into()),
        )
        .with_max_retries(0)
    }

    fn azure(server: &MockServer, embedding: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::azure(
            "az-key".into(),
            AzureDeployment {
                endpoint: server.uri(),
                chat_deployment: "chat-dep".into(),
                embedding_deployment: embedding.map(str::to_owned),
                api_version: DEFAULT_AZURE_API_VERSION.into(),
            },
        )
        .with_max_retries(0)
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3}
        })
    }

    #[tokio::test]
    async fn chat_sends_bearer_and_sampling_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "temperature": 0.0,
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hello")))
            .expect(1)
            .mount(&server)
            .await;

        let reply = openai(&server).chat(&[Message::user("hi")]).await.unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn azure_chat_uses_deployment_url_and_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/chat-dep/chat/completions"))
            .and(query_param("api-version", DEFAULT_AZURE_API_VERSION))
            .and(header("api-key", "az-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("from azure")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = azure(&server, None);
        assert_eq!(provider.name(), "azure");
        let reply = provider.chat(&[Message::user("q")]).await.unwrap();
        assert_eq!(reply, "from azure");
    }

    #[tokio::test]
    async fn missing_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = openai(&server).chat(&[Message::user("q")]).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { provider: "openai" }));
    }

    #[tokio::test]
    async fn context_length_error_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "This model's maximum context length is 8192 tokens.",
                    "code": "context_length_exceeded"
                }
            })))
            .mount(&server)
            .await;

        let err = openai(&server).chat(&[Message::user("q")]).await.unwrap_err();
        assert!(matches!(err, LlmError::ContextLengthExceeded(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn auth_failure_is_permanent_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = openai(&server).chat(&[Message::user("q")]).await.unwrap_err();
        match err {
            LlmError::Api {
                provider,
                status,
                ref message,
            } => {
                assert_eq!(provider, "openai");
                assert_eq!(status, 401);
                assert_eq!(message, "unauthorized");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn embed_batch_restores_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"embedding": [0.0, 1.0], "index": 1},
                    {"embedding": [1.0, 0.0], "index": 0}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vectors = openai(&server)
            .embed_batch(&["first".into(), "second".into()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_batch_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [1.0], "index": 0}]
            })))
            .mount(&server)
            .await;

        let err = openai(&server)
            .embed_batch(&["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 embeddings for 2 inputs"));
    }

    #[tokio::test]
    async fn azure_embed_uses_embedding_deployment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/embed-dep/embeddings"))
            .and(header("api-key", "az-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5, 0.5], "index": 0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = azure(&server, Some("embed-dep"));
        assert!(provider.supports_embeddings());
        assert_eq!(provider.embed("x").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn azure_without_embedding_deployment_is_unsupported() {
        let server = MockServer::start().await;
        let provider = azure(&server, None);
        assert!(!provider.supports_embeddings());
        let err = provider.embed("x").await.unwrap_err();
        assert!(matches!(err, LlmError::EmbedUnsupported { provider: "azure" }));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_network() {
        let server = MockServer::start().await;
        let vectors = openai(&server).embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn context_window_from_model_name() {
        assert_eq!(known_context_window("gpt-4o-mini"), Some(128_000));
        assert_eq!(known_context_window("gpt-4"), Some(8_192));
        assert_eq!(known_context_window("gpt-35-turbo"), Some(16_385));
        assert!(known_context_window("my-finetune").is_none());
    }

    #[test]
    fn context_window_override_wins() {
        let p = OpenAiProvider::new("k".into(), "http://x", "gpt-4o".into(), None)
            .with_context_window(4_000);
        assert_eq!(p.context_window(), Some(4_000));
    }

    #[test]
    fn debug_redacts_api_key() {
        let p = OpenAiProvider::new("sk-secret".into(), "http://x", "gpt-4o".into(), None);
        let debug = format!("{p:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
