//! Google Gemini provider over the `generateContent` REST endpoint.
//!
//! Images travel inline with the prompt. Safety settings are part of the
//! provider configuration, since evaluation prompts discuss sensitive content
//! and the default filters would block many of them.
//!
//! A blocked generation is reported by Gemini either as a candidate with
//! `finishReason: "SAFETY"` (value 2 in the protobuf enum) or as
//! `promptFeedback.blockReason`. Both are surfaced as
//! [`StopReason::ContentFiltered`] with the categories whose rating was marked
//! `blocked`. This mapping is specific to Gemini.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatRequest, ChatResponse, Content, ModelProvider, Role, StopReason, Usage};
use crate::auth::ApiKey;
use crate::{Error, Result};

/// Default Gemini API base URL.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Harm categories that accept a configurable block threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmCategory {
    HarmCategoryHarassment,
    HarmCategoryHateSpeech,
    HarmCategorySexuallyExplicit,
    HarmCategoryDangerousContent,
}

impl HarmCategory {
    /// Every category that accepts a threshold.
    pub const ALL: [HarmCategory; 4] = [
        HarmCategory::HarmCategoryHarassment,
        HarmCategory::HarmCategoryHateSpeech,
        HarmCategory::HarmCategorySexuallyExplicit,
        HarmCategory::HarmCategoryDangerousContent,
    ];
}

/// Block threshold for a harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

impl HarmBlockThreshold {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockNone => "BLOCK_NONE",
            Self::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            Self::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            Self::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

impl std::fmt::Display for HarmBlockThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HarmBlockThreshold {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BLOCK_NONE" | "NONE" => Ok(Self::BlockNone),
            "BLOCK_ONLY_HIGH" | "HIGH" => Ok(Self::BlockOnlyHigh),
            "BLOCK_MEDIUM_AND_ABOVE" | "MEDIUM" => Ok(Self::BlockMediumAndAbove),
            "BLOCK_LOW_AND_ABOVE" | "LOW" => Ok(Self::BlockLowAndAbove),
            other => Err(format!("unknown harm block threshold: {other}")),
        }
    }
}

/// One safety setting sent with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

impl SafetySetting {
    /// The same threshold applied to every category.
    pub fn uniform(threshold: HarmBlockThreshold) -> Vec<SafetySetting> {
        HarmCategory::ALL
            .into_iter()
            .map(|category| SafetySetting {
                category,
                threshold,
            })
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gemini API Types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
struct SafetyRating {
    category: String,
    #[serde(default)]
    blocked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

fn blocked_categories(ratings: &[SafetyRating]) -> Vec<String> {
    ratings
        .iter()
        .filter(|r| r.blocked)
        .map(|r| r.category.clone())
        .collect()
}

impl From<GenerateContentResponse> for ChatResponse {
    fn from(response: GenerateContentResponse) -> Self {
        let usage = response
            .usage_metadata
            .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count));

        if let Some(feedback) = response.prompt_feedback
            && feedback.block_reason.is_some()
        {
            return ChatResponse {
                content: Content::text(""),
                stop_reason: StopReason::ContentFiltered,
                filtered_categories: blocked_categories(&feedback.safety_ratings),
                usage,
            };
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            return ChatResponse {
                content: Content::text(""),
                stop_reason: StopReason::Other,
                filtered_categories: vec![],
                usage,
            };
        };

        let stop_reason = match candidate.finish_reason.as_deref() {
            None | Some("STOP") => StopReason::EndTurn,
            Some("MAX_TOKENS") => StopReason::MaxTokens,
            Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => {
                StopReason::ContentFiltered
            }
            Some(_) => StopReason::Other,
        };
        let filtered_categories = if stop_reason == StopReason::ContentFiltered {
            blocked_categories(&candidate.safety_ratings)
        } else {
            vec![]
        };
        let text = candidate
            .content
            .unwrap_or_default()
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        ChatResponse {
            content: Content::text(text),
            stop_reason,
            filtered_categories,
            usage,
        }
    }
}

impl From<&ChatRequest> for GenerateContentRequest {
    fn from(request: &ChatRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            let mut parts = Vec::new();
            let text = message.content.as_text();
            if !text.is_empty() {
                parts.push(GeminiPart {
                    text: Some(text),
                    inline_data: None,
                });
            }
            parts.extend(message.content.images().into_iter().map(|img| GeminiPart {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: img.media_type.clone(),
                    data: img.base64.clone(),
                }),
            }));

            match message.role {
                Role::System => system_parts.extend(parts),
                Role::User => contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts,
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts,
                }),
            }
        }

        let generation_config = if request.max_tokens.is_some() || request.temperature.is_some() {
            Some(GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            })
        } else {
            None
        };

        Self {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| GeminiContent {
                role: None,
                parts: system_parts,
            }),
            safety_settings: Vec::new(),
            generation_config,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GeminiProvider
// ────────────────────────────────────────────────────────────────────────────

/// Gemini multimodal provider.
pub struct GeminiProvider {
    base_url: String,
    api_key: ApiKey,
    client: reqwest::Client,
    safety_settings: Vec<SafetySetting>,
    timeout: Option<Duration>,
}

impl GeminiProvider {
    /// Create a provider against the public Gemini endpoint.
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            api_key,
            client: reqwest::Client::new(),
            safety_settings: Vec::new(),
            timeout: None,
        }
    }

    /// Point the provider at a different base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Safety settings sent with every request.
    pub fn with_safety_settings(mut self, settings: Vec<SafetySetting>) -> Self {
        self.safety_settings = settings;
        self
    }

    /// Bound each call by a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the base URL for this provider.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, model: &str) -> String {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/v1beta/{}:generateContent", self.base_url, model)
    }

    /// Perform a generateContent call.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = self.endpoint(&request.model);
        let mut body = GenerateContentRequest::from(&request);
        body.safety_settings = self.safety_settings.clone();
        debug!(model = %request.model, parts = body.contents.iter().map(|c| c.parts.len()).sum::<usize>(), "sending Gemini request");

        let mut builder = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(Error::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("Gemini", status, &body));
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(Error::from_reqwest)?;
        let chat: ChatResponse = parsed.into();
        if chat.is_filtered() {
            warn!(categories = ?chat.filtered_categories, "Gemini response blocked by safety filter");
        }
        Ok(chat)
    }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        GeminiProvider::chat(self, request).await
    }

    fn supports_vision(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ImageData, Message};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(ApiKey::new("test-key"))
            .with_base_url(server.uri())
            .with_safety_settings(SafetySetting::uniform(HarmBlockThreshold::BlockNone))
    }

    #[test]
    fn endpoint_adds_models_prefix_when_missing() {
        let p = GeminiProvider::new(ApiKey::new("k")).with_base_url("http://host/");
        assert_eq!(
            p.endpoint("gemini-2.5-flash"),
            "http://host/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            p.endpoint("models/gemini-2.5-pro"),
            "http://host/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn request_serializes_inline_images_and_config() {
        let request = ChatRequest::new(
            "models/gemini-2.5-flash",
            vec![Message::user_with_images(
                "evaluate",
                vec![ImageData::new("image/jpeg", "AAAA")],
            )],
        )
        .max_tokens(16384)
        .temperature(0.7);

        let mut body = GenerateContentRequest::from(&request);
        body.safety_settings = SafetySetting::uniform(HarmBlockThreshold::BlockNone);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "evaluate");
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 16384);
        assert_eq!(json["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(
            json["safetySettings"][0]["category"],
            "HARM_CATEGORY_HARASSMENT"
        );
        assert_eq!(json["safetySettings"][0]["threshold"], "BLOCK_NONE");
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn threshold_parses_short_and_long_names() {
        assert_eq!(
            "none".parse::<HarmBlockThreshold>().unwrap(),
            HarmBlockThreshold::BlockNone
        );
        assert_eq!(
            "BLOCK_ONLY_HIGH".parse::<HarmBlockThreshold>().unwrap(),
            HarmBlockThreshold::BlockOnlyHigh
        );
        assert!("sometimes".parse::<HarmBlockThreshold>().is_err());
    }

    #[test]
    fn safety_finish_reason_maps_to_content_filtered() {
        let json = r#"{
            "candidates": [{
                "finishReason": "SAFETY",
                "safetyRatings": [
                    {"category": "HARM_CATEGORY_HARASSMENT", "probability": "HIGH", "blocked": true},
                    {"category": "HARM_CATEGORY_HATE_SPEECH", "probability": "LOW"}
                ]
            }]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let response: ChatResponse = parsed.into();
        assert!(response.is_filtered());
        assert_eq!(response.filtered_categories, vec!["HARM_CATEGORY_HARASSMENT"]);
        assert!(response.usage.is_none());
    }

    #[test]
    fn prompt_block_reason_maps_to_content_filtered() {
        let json = r#"{
            "promptFeedback": {
                "blockReason": "SAFETY",
                "safetyRatings": [{"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "blocked": true}]
            }
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let response: ChatResponse = parsed.into();
        assert!(response.is_filtered());
        assert_eq!(
            response.filtered_categories,
            vec!["HARM_CATEGORY_DANGEROUS_CONTENT"]
        );
    }

    #[test]
    fn empty_stop_response_is_not_filtered() {
        let json = r#"{
            "candidates": [{"content": {"parts": [], "role": "model"}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 0}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let response: ChatResponse = parsed.into();
        assert!(!response.is_filtered());
        assert!(response.content.is_empty());
        assert_eq!(response.usage, Some(Usage::new(10, 0)));
    }

    #[tokio::test]
    async fn chat_sends_key_header_and_parses_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "safetySettings": [{"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "## Report"}, {"text": "\nok"}], "role": "model"},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 2000, "candidatesTokenCount": 500, "totalTokenCount": 2500}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .chat(ChatRequest::new(
                "models/gemini-2.5-flash",
                vec![Message::user("evaluate")],
            ))
            .await
            .unwrap();

        assert_eq!(response.content.as_text(), "## Report\nok");
        assert_eq!(response.usage, Some(Usage::new(2000, 500)));
    }

    #[tokio::test]
    async fn chat_maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat(ChatRequest::new("gemini-2.5-flash", vec![Message::user("x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RateLimited(_)));
    }
}
