//! Ollama local model provider.
//!
//! Talks to a local Ollama server over its JSON HTTP API. Vision models
//! (llava and friends) receive images through the message `images` field.
//!
//! # Example
//!
//! ```ignore
//! use reelcheck_models::providers::OllamaProvider;
//!
//! let provider = OllamaProvider::new();  // Uses localhost:11434
//! let provider = OllamaProvider::with_base_url("http://192.168.1.100:11434");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatRequest, ChatResponse, Content, ModelProvider, StopReason, Usage};
use crate::{Error, Result};

/// Default Ollama API base URL.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

// ────────────────────────────────────────────────────────────────────────────
// Ollama API Types
// ────────────────────────────────────────────────────────────────────────────

/// Response from Ollama's `/api/tags` endpoint.
#[derive(Debug, Deserialize)]
pub struct OllamaTagsResponse {
    pub models: Vec<OllamaModel>,
}

/// Model information from Ollama's API.
#[derive(Debug, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

/// Message in an Ollama chat request/response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaChatMessage {
    pub role: String,
    pub content: String,
    /// Base64 images attached to the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Request body for Ollama's `/api/chat` endpoint.
#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaChatOptions>,
}

/// Chat options for Ollama.
#[derive(Debug, Serialize)]
pub struct OllamaChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// Response from Ollama's `/api/chat` endpoint.
#[derive(Debug, Deserialize)]
pub struct OllamaChatResponse {
    pub model: String,
    pub message: OllamaChatMessage,
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

impl From<OllamaChatResponse> for ChatResponse {
    fn from(response: OllamaChatResponse) -> Self {
        let stop_reason = match response.done_reason.as_deref() {
            None | Some("stop") => StopReason::EndTurn,
            Some("length") => StopReason::MaxTokens,
            Some(_) => StopReason::Other,
        };
        let usage = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (input, output) => Some(Usage::new(input.unwrap_or(0), output.unwrap_or(0))),
        };
        Self {
            content: Content::text(response.message.content),
            stop_reason,
            filtered_categories: vec![],
            usage,
        }
    }
}

impl From<&ChatRequest> for OllamaChatRequest {
    fn from(request: &ChatRequest) -> Self {
        let messages = request
            .messages
            .iter()
            .map(|m| OllamaChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.as_text(),
                images: m
                    .content
                    .images()
                    .into_iter()
                    .map(|img| img.base64.clone())
                    .collect(),
            })
            .collect();

        let options = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(OllamaChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            })
        } else {
            None
        };

        Self {
            model: request.model.clone(),
            messages,
            stream: false,
            options,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OllamaProvider
// ────────────────────────────────────────────────────────────────────────────

/// Ollama local model provider.
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl OllamaProvider {
    /// Create a new Ollama provider with default URL (localhost:11434).
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_BASE_URL)
    }

    /// Create a new Ollama provider with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: None,
        }
    }

    /// Bound each chat call by a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the base URL for this provider.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List the names of models installed on the server.
    ///
    /// Doubles as a readiness probe: an unreachable server is an error.
    pub async fn list_models(&self, timeout: Duration) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(Error::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("Ollama", status, &body));
        }

        let tags: OllamaTagsResponse = response.json().await.map_err(Error::from_reqwest)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Perform a chat completion request.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest::from(&request);
        let image_count: usize = body.messages.iter().map(|m| m.images.len()).sum();
        debug!(model = %body.model, image_count, "sending Ollama chat request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(Error::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("Ollama", status, &body));
        }

        let ollama_response: OllamaChatResponse =
            response.json().await.map_err(Error::from_reqwest)?;
        Ok(ollama_response.into())
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        OllamaProvider::chat(self, request).await
    }

    fn supports_vision(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ImageData, Message};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn new_creates_provider_with_default_url() {
        let provider = OllamaProvider::new();
        assert_eq!(provider.base_url(), "http://localhost:11434");
    }

    #[test]
    fn with_base_url_trims_trailing_slash() {
        let provider = OllamaProvider::with_base_url("http://192.168.1.100:11434/");
        assert_eq!(provider.base_url(), "http://192.168.1.100:11434");
    }

    #[test]
    fn parse_tags_response_extracts_models() {
        let json = r#"{
            "models": [
                {"name": "llava:34b", "model": "llava:34b", "size": 20166497526, "digest": "abc"},
                {"name": "llama3.1:8b-instruct", "model": "llama3.1:8b-instruct", "size": 4661224676}
            ]
        }"#;

        let response: OllamaTagsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.models.len(), 2);
        assert_eq!(response.models[0].name, "llava:34b");
    }

    #[test]
    fn request_conversion_moves_images_into_images_field() {
        let request = ChatRequest::new(
            "llava:34b",
            vec![Message::user_with_images(
                "batch 1 of 3",
                vec![ImageData::new("image/jpeg", "AAAA")],
            )],
        );
        let body = OllamaChatRequest::from(&request);
        assert_eq!(body.messages[0].content, "batch 1 of 3");
        assert_eq!(body.messages[0].images, vec!["AAAA".to_string()]);
        assert!(!body.stream);
        assert!(body.options.is_none());
    }

    #[test]
    fn text_only_message_omits_images_key() {
        let request = ChatRequest::new("llama3.1:8b-instruct", vec![Message::user("synthesize")]);
        let json = serde_json::to_value(OllamaChatRequest::from(&request)).unwrap();
        assert!(json["messages"][0].get("images").is_none());
    }

    #[test]
    fn chat_response_converts_usage_and_stop_reason() {
        let json = r#"{
            "model": "llava:34b",
            "created_at": "2024-01-15T10:00:00Z",
            "message": {"role": "assistant", "content": "Frames show a kitchen."},
            "done": true,
            "done_reason": "length",
            "prompt_eval_count": 10,
            "eval_count": 15
        }"#;

        let response: OllamaChatResponse = serde_json::from_str(json).unwrap();
        let response: ChatResponse = response.into();
        assert_eq!(response.content.as_text(), "Frames show a kitchen.");
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
        assert_eq!(response.usage, Some(Usage::new(10, 15)));
    }

    #[tokio::test]
    async fn chat_posts_to_api_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3.1:8b-instruct",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.1:8b-instruct",
                "message": {"role": "assistant", "content": "final report"},
                "done": true,
                "prompt_eval_count": 120,
                "eval_count": 40
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::with_base_url(server.uri());
        let response = provider
            .chat(ChatRequest::new(
                "llama3.1:8b-instruct",
                vec![Message::user("synthesize")],
            ))
            .await
            .unwrap();

        assert_eq!(response.content.as_text(), "final report");
        assert_eq!(response.usage, Some(Usage::new(120, 40)));
    }

    #[tokio::test]
    async fn chat_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::with_base_url(server.uri());
        let err = provider
            .chat(ChatRequest::new("missing", vec![Message::user("hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProviderApi(_)));
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llava:34b"}, {"name": "llama3.1:8b-instruct"}]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::with_base_url(server.uri());
        let names = provider.list_models(Duration::from_secs(2)).await.unwrap();
        assert_eq!(names, vec!["llava:34b", "llama3.1:8b-instruct"]);
    }

    #[tokio::test]
    async fn chat_timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let provider =
            OllamaProvider::with_base_url(server.uri()).with_timeout(Duration::from_millis(50));
        let err = provider
            .chat(ChatRequest::new("llava:34b", vec![Message::user("hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    #[ignore = "requires Ollama running locally"]
    async fn integration_list_models_from_local_server() {
        let base_url = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| DEFAULT_OLLAMA_BASE_URL.to_string());
        let provider = OllamaProvider::with_base_url(&base_url);
        let models = provider.list_models(Duration::from_secs(2)).await.unwrap();
        println!("Found {} models from Ollama", models.len());
    }
}
