use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;

use crate::error::LlmError;
use crate::provider::{GenerationParams, LlmProvider, Message, Role};

const DEFAULT_PORT: u16 = 11434;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
    params: GenerationParams,
    context_window_size: Option<usize>,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
            params: GenerationParams::default(),
            context_window_size: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Prompt size limit in tokens, from config or `/api/show`.
    pub fn set_context_window(&mut self, size: usize) {
        self.context_window_size = Some(size);
    }

    /// Query `/api/show` for the chat model's context length.
    ///
    /// # Errors
    ///
    /// Returns an error if Ollama is unreachable or the model is unknown.
    pub async fn fetch_context_length(&self) -> Result<Option<usize>, LlmError> {
        let info = self
            .client
            .show_model_info(self.model.clone())
            .await
            .map_err(|e| LlmError::Other(format!("failed to fetch model info from Ollama: {e}")))?;

        Ok(info
            .model_info
            .iter()
            .filter(|(key, _)| key.ends_with(".context_length"))
            .find_map(|(_, value)| value.as_u64().and_then(|n| usize::try_from(n).ok()))
            .or_else(|| parse_num_ctx(&info.parameters)))
    }

    fn options(&self) -> ModelOptions {
        ModelOptions::default()
            .temperature(self.params.temperature)
            .top_p(self.params.top_p)
    }
}

impl LlmProvider for OllamaProvider {
    fn context_window(&self) -> Option<usize> {
        self.context_window_size
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();
        let request =
            ChatMessageRequest::new(self.model.clone(), ollama_messages).options(self.options());

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama chat request failed: {e}")))?;

        Ok(response.message.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self.embed_batch(&[text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or(LlmError::EmptyResponse { provider: "ollama" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama embedding request failed: {e}")))?;

        if response.embeddings.len() != texts.len() {
            return Err(LlmError::Other(format!(
                "ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            )));
        }
        Ok(response.embeddings)
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }
}

fn convert_message(message: &Message) -> ChatMessage {
    let content = message.content.clone();
    match message.role {
        Role::System => ChatMessage::system(content),
        Role::User => ChatMessage::user(content),
        Role::Assistant => ChatMessage::assistant(content),
    }
}

/// `num_ctx` from the modelfile parameter block, e.g. `num_ctx 8192`.
fn parse_num_ctx(parameters: &str) -> Option<usize> {
    parameters.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("num_ctx"), Some(value)) => value.parse().ok(),
            _ => None,
        }
    })
}

/// Split `http://host:port` into the pieces `Ollama::new` expects.
fn parse_host_port(base_url: &str) -> (String, u16) {
    let base = base_url.trim_end_matches('/');
    base.rsplit_once(':')
        .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
        .map_or_else(
            || (base.to_owned(), DEFAULT_PORT),
            |(host, port)| (host.to_owned(), port),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_window_none_by_default() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3".into(), "nomic".into());
        assert!(provider.context_window().is_none());
    }

    #[test]
    fn context_window_after_set() {
        let mut provider =
            OllamaProvider::new("http://localhost:11434", "llama3".into(), "nomic".into());
        provider.set_context_window(32768);
        assert_eq!(provider.context_window(), Some(32768));
    }

    #[test]
    fn parse_num_ctx_from_parameters() {
        assert_eq!(parse_num_ctx("num_ctx 4096"), Some(4096));
        assert_eq!(parse_num_ctx("stop \"<|eot|>\"\nnum_ctx    8192"), Some(8192));
        assert!(parse_num_ctx("temperature 0.7").is_none());
        assert!(parse_num_ctx("").is_none());
    }

    #[test]
    fn parse_host_port_variants() {
        assert_eq!(
            parse_host_port("http://localhost:11434/"),
            ("http://localhost".to_owned(), 11434)
        );
        assert_eq!(
            parse_host_port("http://gpu-box:9000"),
            ("http://gpu-box".to_owned(), 9000)
        );
        assert_eq!(
            parse_host_port("http://localhost"),
            ("http://localhost".to_owned(), DEFAULT_PORT)
        );
    }

    #[test]
    fn convert_message_keeps_content() {
        let cm = convert_message(&Message::assistant("earlier answer"));
        assert_eq!(cm.content, "earlier answer");
    }

    #[tokio::test]
    async fn empty_batch_needs_no_server() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
        assert!(provider.supports_embeddings());
        assert_eq!(provider.name(), "ollama");
    }
}
