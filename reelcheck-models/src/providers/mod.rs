//! Model provider trait and implementations.
//!
//! The [`ModelProvider`] trait is the seam between evaluation backends and
//! the services that actually run inference, whether cloud-hosted (Gemini)
//! or local (Ollama).
//!
//! # Example
//!
//! ```ignore
//! use reelcheck_models::providers::{ChatRequest, Message, ModelProvider};
//!
//! async fn ask(provider: &dyn ModelProvider) -> reelcheck_models::Result<String> {
//!     let request = ChatRequest::new("llama3.1:8b-instruct", vec![Message::user("Hello")]);
//!     let response = provider.chat(request).await?;
//!     Ok(response.content.as_text())
//! }
//! ```

mod gemini;
mod ollama;
mod types;

use async_trait::async_trait;

pub use gemini::{
    DEFAULT_GEMINI_BASE_URL, GeminiProvider, HarmBlockThreshold, HarmCategory, SafetySetting,
};
pub use ollama::{DEFAULT_OLLAMA_BASE_URL, OllamaProvider};
pub use types::*;

use crate::Result;

/// Trait for model providers (cloud and local).
///
/// # Required Methods
///
/// - [`name`](ModelProvider::name) - Provider identifier (e.g., "gemini", "ollama")
/// - [`chat`](ModelProvider::chat) - Non-streaming chat completion
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the provider name.
    fn name(&self) -> &str;

    /// Perform a chat completion request.
    ///
    /// A response withheld by the provider's content filter is returned as
    /// `Ok` with [`StopReason::ContentFiltered`] so callers can tell it apart
    /// from transport failures.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Whether this provider accepts image inputs.
    fn supports_vision(&self) -> bool {
        false
    }
}
