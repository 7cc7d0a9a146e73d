//! Evaluation requests and per-backend configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reelcheck_models::providers::{
    DEFAULT_GEMINI_BASE_URL, DEFAULT_OLLAMA_BASE_URL, HarmBlockThreshold,
};
use serde::{Deserialize, Serialize};

use crate::rubric::Rubric;
use crate::sampler::{FrameSelection, SamplingStrategy};
use crate::{Error, Result};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// The closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Installed model CLI, invoked as a subprocess.
    ClaudeCli,
    /// Gemini multimodal HTTP API.
    Gemini,
    /// Local Ollama batch-then-synthesize pipeline.
    Ollama,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::ClaudeCli, BackendKind::Gemini, BackendKind::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCli => "claude-cli",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    /// Frame bound used when the caller does not give one.
    pub fn default_max_frames(&self) -> usize {
        match self {
            Self::ClaudeCli => 30,
            Self::Gemini | Self::Ollama => 50,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude-cli" | "claude" => Ok(Self::ClaudeCli),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(Error::BackendUnavailable {
                backend: other.to_string(),
                reason: "unknown backend (expected claude-cli, gemini, or ollama)".to_string(),
            }),
        }
    }
}

/// Settings for the CLI-invoked backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaudeCliConfig {
    pub binary: PathBuf,
    pub model: String,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("claude"),
            model: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

/// Settings for the HTTP-invoked backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub model: String,
    pub base_url: String,
    /// Threshold applied to every harm category.
    pub safety_threshold: HarmBlockThreshold,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.5-flash".to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            safety_threshold: HarmBlockThreshold::BlockNone,
            max_output_tokens: 16384,
            temperature: 0.7,
        }
    }
}

/// Settings for the local batch-then-synthesize backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    pub base_url: String,
    pub vision_model: String,
    pub synthesis_model: String,
    pub batch_size: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            vision_model: "llava:34b".to_string(),
            synthesis_model: "llama3.1:8b-instruct".to_string(),
            batch_size: 8,
        }
    }
}

/// Backend choice with its configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    ClaudeCli(ClaudeCliConfig),
    Gemini(GeminiConfig),
    Ollama(OllamaConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::ClaudeCli(_) => BackendKind::ClaudeCli,
            Self::Gemini(_) => BackendKind::Gemini,
            Self::Ollama(_) => BackendKind::Ollama,
        }
    }

    /// Model recorded in results.
    pub fn model(&self) -> &str {
        match self {
            Self::ClaudeCli(c) => &c.model,
            Self::Gemini(c) => &c.model,
            Self::Ollama(c) => &c.vision_model,
        }
    }

    /// Default configuration for a backend.
    pub fn default_for(kind: BackendKind) -> Self {
        match kind {
            BackendKind::ClaudeCli => Self::ClaudeCli(ClaudeCliConfig::default()),
            BackendKind::Gemini => Self::Gemini(GeminiConfig::default()),
            BackendKind::Ollama => Self::Ollama(OllamaConfig::default()),
        }
    }
}

/// Settings every backend shares.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub rubric: Rubric,
    pub selection: FrameSelection,
    pub timeout: Duration,
    /// Append `[MM:SS - MM:SS]` transcript lines to prompts when available.
    pub timestamped_transcript: bool,
}

/// One evaluation invocation. Built once and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub rubric: Rubric,
    pub selection: FrameSelection,
    pub timeout: Duration,
    pub timestamped_transcript: bool,
    pub backend: BackendConfig,
}

impl EvaluationRequest {
    /// Request with the backend's default frame bound, even sampling, and
    /// the default timeout.
    pub fn new(rubric: Rubric, backend: BackendConfig) -> Self {
        let max_frames = backend.kind().default_max_frames();
        Self {
            rubric,
            selection: FrameSelection::new(SamplingStrategy::Even, max_frames),
            timeout: DEFAULT_TIMEOUT,
            timestamped_transcript: false,
            backend,
        }
    }

    pub fn sampling(mut self, strategy: SamplingStrategy) -> Self {
        self.selection.strategy = strategy;
        self
    }

    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.selection.max_frames = max_frames;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timestamped_transcript(mut self, enabled: bool) -> Self {
        self.timestamped_transcript = enabled;
        self
    }

    /// Split into backend configuration and shared settings.
    pub fn into_parts(self) -> (BackendConfig, RunSettings) {
        (
            self.backend,
            RunSettings {
                rubric: self.rubric,
                selection: self.selection,
                timeout: self.timeout,
                timestamped_transcript: self.timestamped_transcript,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_and_displays() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("claude".parse::<BackendKind>().unwrap(), BackendKind::ClaudeCli);
        assert!(matches!(
            "openai".parse::<BackendKind>(),
            Err(Error::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn request_defaults_follow_backend() {
        let rubric = Rubric::new("safety", "rate it");
        let req = EvaluationRequest::new(rubric.clone(), BackendConfig::default_for(BackendKind::ClaudeCli));
        assert_eq!(req.selection.max_frames, 30);
        assert_eq!(req.selection.strategy, SamplingStrategy::Even);
        assert_eq!(req.timeout, DEFAULT_TIMEOUT);
        assert_eq!(req.backend.model(), "claude-sonnet-4-20250514");

        let req = EvaluationRequest::new(rubric, BackendConfig::default_for(BackendKind::Ollama))
            .sampling(SamplingStrategy::FirstN)
            .max_frames(22)
            .timeout(Duration::from_secs(60));
        assert_eq!(req.selection, FrameSelection::new(SamplingStrategy::FirstN, 22));
        assert_eq!(req.backend.model(), "llava:34b");

        let (backend, settings) = req.into_parts();
        assert_eq!(backend.kind(), BackendKind::Ollama);
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert_eq!(settings.rubric.name, "safety");
        assert!(!settings.timestamped_transcript);
    }

    #[test]
    fn gemini_defaults_relax_filters() {
        let config = GeminiConfig::default();
        assert_eq!(config.safety_threshold, HarmBlockThreshold::BlockNone);
        assert_eq!(config.max_output_tokens, 16384);
        assert_eq!(config.model, "models/gemini-2.5-flash");
    }
}
