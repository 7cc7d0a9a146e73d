//! Model providers for reelcheck.
//!
//! This crate provides:
//! - A provider trait for multimodal chat inference
//! - HTTP providers for Gemini and a local Ollama server
//! - Credential management for API keys
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                ModelProvider (trait)                 │
//! │     ┌──────────────────┐   ┌──────────────────┐     │
//! │     │  GeminiProvider  │   │  OllamaProvider  │     │
//! │     │  (cloud, keyed)  │   │  (local server)  │     │
//! │     └──────────────────┘   └──────────────────┘     │
//! └─────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                  CredentialStore                     │
//! │         (System Keyring + Env Fallback)             │
//! └─────────────────────────────────────────────────────┘
//! ```

mod error;
mod types;

pub mod auth;
pub mod providers;

pub use error::{Error, Result};
pub use types::Pricing;
