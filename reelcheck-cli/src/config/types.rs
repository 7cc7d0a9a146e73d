use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use reelcheck_evals::{
    BackendKind, ClaudeCliConfig, GeminiConfig, OllamaConfig, ProbeOptions, RetryPolicy,
    RubricCatalog, SamplingStrategy,
};
use reelcheck_models::providers::{DEFAULT_GEMINI_BASE_URL, DEFAULT_OLLAMA_BASE_URL, HarmBlockThreshold};
use serde::{Deserialize, Serialize};

/// Default evaluation timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

/// Default retry count after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default fixed delay between retries in seconds
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawReelcheckConfig {
    /// Directory holding one sub-directory per video
    pub data_dir: Option<PathBuf>,

    pub ledger_path: Option<PathBuf>,

    #[serde(default)]
    pub evaluation: RawEvaluationSection,

    #[serde(default)]
    pub claude: RawClaudeSection,

    #[serde(default)]
    pub gemini: RawGeminiSection,

    #[serde(default)]
    pub ollama: RawOllamaSection,

    #[serde(default)]
    pub rubrics: RawRubricsSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEvaluationSection {
    pub backend: Option<BackendKind>,
    pub sampling: Option<SamplingStrategy>,
    pub max_frames: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawClaudeSection {
    pub binary: Option<PathBuf>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawGeminiSection {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub safety_threshold: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawOllamaSection {
    pub host: Option<String>,
    pub vision_model: Option<String>,
    pub synthesis_model: Option<String>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRubricsSection {
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReelcheckConfig {
    pub data_dir: PathBuf,

    pub ledger_path: PathBuf,

    #[serde(default)]
    pub evaluation: EvaluationSection,

    #[serde(default)]
    pub claude: ClaudeSection,

    #[serde(default)]
    pub gemini: GeminiSection,

    #[serde(default)]
    pub ollama: OllamaSection,

    #[serde(default)]
    pub rubrics: RubricsSection,
}

impl Default for ReelcheckConfig {
    fn default() -> Self {
        Self {
            data_dir: reelcheck_paths::videos_dir(),
            ledger_path: reelcheck_paths::cost_ledger_path(),
            evaluation: EvaluationSection::default(),
            claude: ClaudeSection::default(),
            gemini: GeminiSection::default(),
            ollama: OllamaSection::default(),
            rubrics: RubricsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSection {
    pub backend: BackendKind,

    pub sampling: SamplingStrategy,

    /// Frame bound; the backend's own default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<usize>,

    pub timeout_seconds: u64,

    pub max_retries: u32,

    pub retry_delay_seconds: u64,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::ClaudeCli,
            sampling: SamplingStrategy::Even,
            max_frames: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSection {
    pub binary: PathBuf,
    pub model: String,
}

impl Default for ClaudeSection {
    fn default() -> Self {
        let defaults = ClaudeCliConfig::default();
        Self {
            binary: defaults.binary,
            model: defaults.model,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSection {
    pub model: String,
    pub base_url: String,
    /// One of BLOCK_NONE, BLOCK_ONLY_HIGH, BLOCK_MEDIUM_AND_ABOVE, BLOCK_LOW_AND_ABOVE
    pub safety_threshold: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GeminiSection {
    fn default() -> Self {
        let defaults = GeminiConfig::default();
        Self {
            model: defaults.model,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            safety_threshold: defaults.safety_threshold.to_string(),
            max_output_tokens: defaults.max_output_tokens,
            temperature: defaults.temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaSection {
    pub host: String,
    pub vision_model: String,
    pub synthesis_model: String,
    pub batch_size: usize,
}

impl Default for OllamaSection {
    fn default() -> Self {
        let defaults = OllamaConfig::default();
        Self {
            host: DEFAULT_OLLAMA_BASE_URL.to_string(),
            vision_model: defaults.vision_model,
            synthesis_model: defaults.synthesis_model,
            batch_size: defaults.batch_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricsSection {
    pub dir: PathBuf,
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
}

impl Default for RubricsSection {
    fn default() -> Self {
        Self {
            dir: reelcheck_paths::rubrics_dir(),
            paths: BTreeMap::new(),
        }
    }
}

impl ReelcheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation.timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.evaluation.max_retries,
            Duration::from_secs(self.evaluation.retry_delay_seconds),
        )
    }

    pub fn claude_config(&self) -> ClaudeCliConfig {
        ClaudeCliConfig {
            binary: self.claude.binary.clone(),
            model: self.claude.model.clone(),
        }
    }

    pub fn gemini_config(&self) -> anyhow::Result<GeminiConfig> {
        let safety_threshold: HarmBlockThreshold = self
            .gemini
            .safety_threshold
            .parse()
            .map_err(|e: String| anyhow::anyhow!("gemini.safety_threshold: {e}"))?;
        Ok(GeminiConfig {
            model: self.gemini.model.clone(),
            base_url: self.gemini.base_url.clone(),
            safety_threshold,
            max_output_tokens: self.gemini.max_output_tokens,
            temperature: self.gemini.temperature,
        })
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.ollama.host.clone(),
            vision_model: self.ollama.vision_model.clone(),
            synthesis_model: self.ollama.synthesis_model.clone(),
            batch_size: self.ollama.batch_size,
        }
    }

    pub fn rubric_catalog(&self) -> RubricCatalog {
        self.rubrics
            .paths
            .iter()
            .fold(RubricCatalog::new(&self.rubrics.dir), |catalog, (name, path)| {
                catalog.with_path(name.clone(), path.clone())
            })
    }

    /// What the capability probe checks for each backend.
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            claude_binary: self.claude.binary.clone(),
            ollama_base_url: self.ollama.host.clone(),
            ..Default::default()
        }
    }

    /// Catalog file kept next to the cost ledger.
    pub fn catalog_path(&self) -> PathBuf {
        self.ledger_path.with_file_name("catalog.jsonl")
    }
}
