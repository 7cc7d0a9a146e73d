use super::types::{
    ClaudeSection, EvaluationSection, GeminiSection, OllamaSection, RawClaudeSection,
    RawEvaluationSection, RawGeminiSection, RawOllamaSection, RawReelcheckConfig,
    RawRubricsSection, ReelcheckConfig, RubricsSection,
};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<ReelcheckConfig> {
        let mut raw = RawReelcheckConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        Ok(Self::finalize(raw))
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "reelcheck").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with REELCHECK_PROJECT_CONFIG_DIR env var (useful for isolated e2e tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("REELCHECK_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".reelcheck/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawReelcheckConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawReelcheckConfig, overlay: RawReelcheckConfig) -> RawReelcheckConfig {
        let mut paths = base.rubrics.paths;
        paths.extend(overlay.rubrics.paths);

        RawReelcheckConfig {
            data_dir: overlay.data_dir.or(base.data_dir),
            ledger_path: overlay.ledger_path.or(base.ledger_path),
            evaluation: RawEvaluationSection {
                backend: overlay.evaluation.backend.or(base.evaluation.backend),
                sampling: overlay.evaluation.sampling.or(base.evaluation.sampling),
                max_frames: overlay.evaluation.max_frames.or(base.evaluation.max_frames),
                timeout_seconds: overlay
                    .evaluation
                    .timeout_seconds
                    .or(base.evaluation.timeout_seconds),
                max_retries: overlay.evaluation.max_retries.or(base.evaluation.max_retries),
                retry_delay_seconds: overlay
                    .evaluation
                    .retry_delay_seconds
                    .or(base.evaluation.retry_delay_seconds),
            },
            claude: RawClaudeSection {
                binary: overlay.claude.binary.or(base.claude.binary),
                model: overlay.claude.model.or(base.claude.model),
            },
            gemini: RawGeminiSection {
                model: overlay.gemini.model.or(base.gemini.model),
                base_url: overlay.gemini.base_url.or(base.gemini.base_url),
                safety_threshold: overlay
                    .gemini
                    .safety_threshold
                    .or(base.gemini.safety_threshold),
                max_output_tokens: overlay
                    .gemini
                    .max_output_tokens
                    .or(base.gemini.max_output_tokens),
                temperature: overlay.gemini.temperature.or(base.gemini.temperature),
            },
            ollama: RawOllamaSection {
                host: overlay.ollama.host.or(base.ollama.host),
                vision_model: overlay.ollama.vision_model.or(base.ollama.vision_model),
                synthesis_model: overlay.ollama.synthesis_model.or(base.ollama.synthesis_model),
                batch_size: overlay.ollama.batch_size.or(base.ollama.batch_size),
            },
            rubrics: RawRubricsSection {
                dir: overlay.rubrics.dir.or(base.rubrics.dir),
                paths,
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawReelcheckConfig) -> ReelcheckConfig {
        let defaults = ReelcheckConfig::default();
        let evaluation = EvaluationSection::default();
        let claude = ClaudeSection::default();
        let gemini = GeminiSection::default();
        let ollama = OllamaSection::default();
        let rubrics = RubricsSection::default();

        ReelcheckConfig {
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            ledger_path: raw.ledger_path.unwrap_or(defaults.ledger_path),
            evaluation: EvaluationSection {
                backend: raw.evaluation.backend.unwrap_or(evaluation.backend),
                sampling: raw.evaluation.sampling.unwrap_or(evaluation.sampling),
                max_frames: raw.evaluation.max_frames,
                timeout_seconds: raw
                    .evaluation
                    .timeout_seconds
                    .unwrap_or(evaluation.timeout_seconds),
                max_retries: raw.evaluation.max_retries.unwrap_or(evaluation.max_retries),
                retry_delay_seconds: raw
                    .evaluation
                    .retry_delay_seconds
                    .unwrap_or(evaluation.retry_delay_seconds),
            },
            claude: ClaudeSection {
                binary: raw.claude.binary.unwrap_or(claude.binary),
                model: raw.claude.model.unwrap_or(claude.model),
            },
            gemini: GeminiSection {
                model: raw.gemini.model.unwrap_or(gemini.model),
                base_url: raw.gemini.base_url.unwrap_or(gemini.base_url),
                safety_threshold: raw.gemini.safety_threshold.unwrap_or(gemini.safety_threshold),
                max_output_tokens: raw
                    .gemini
                    .max_output_tokens
                    .unwrap_or(gemini.max_output_tokens),
                temperature: raw.gemini.temperature.unwrap_or(gemini.temperature),
            },
            ollama: OllamaSection {
                host: raw.ollama.host.unwrap_or(ollama.host),
                vision_model: raw.ollama.vision_model.unwrap_or(ollama.vision_model),
                synthesis_model: raw.ollama.synthesis_model.unwrap_or(ollama.synthesis_model),
                batch_size: raw.ollama.batch_size.unwrap_or(ollama.batch_size),
            },
            rubrics: RubricsSection {
                dir: raw.rubrics.dir.unwrap_or(rubrics.dir),
                paths: raw.rubrics.paths,
            },
        }
    }

    /// Load config from a specific path (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<ReelcheckConfig> {
        if path.exists() {
            Ok(Self::finalize(Self::read_raw(path)?))
        } else {
            Ok(ReelcheckConfig::default())
        }
    }
}
