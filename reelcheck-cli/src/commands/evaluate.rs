//! `reelcheck evaluate`: run one video through a backend and save the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use reelcheck_evals::{
    BackendConfig, BackendKind, BackendRegistry, CostLedger, EvaluationOrchestrator,
    EvaluationRequest, EvaluationRun, Evaluator, JsonlCatalog, SamplingStrategy,
};
use reelcheck_models::auth::CredentialStore;
use tracing::info;

use super::CREDENTIAL_SERVICE;
use crate::config::{ConfigLoader, ReelcheckConfig};

/// Rubric used when neither flag nor config names one.
pub const DEFAULT_RUBRIC: &str = "content_rating";

const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Video directory name under the data directory
    #[arg(long)]
    pub video_id: String,

    /// Rubric name, resolved in the rubrics directory
    #[arg(long, default_value = DEFAULT_RUBRIC)]
    pub rubric: String,

    /// Backend to use (claude-cli, gemini, ollama)
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Model override (the vision model for ollama)
    #[arg(long)]
    pub model: Option<String>,

    /// Frame sampling strategy (even, all, first_n, last_n)
    #[arg(long)]
    pub sampling: Option<SamplingStrategy>,

    /// Upper bound on frames sent
    #[arg(long)]
    pub max_frames: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries after the first attempt on rate limits and timeouts
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Directory holding one sub-directory per video
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Frames per batch (ollama)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Vision model (ollama)
    #[arg(long)]
    pub vision_model: Option<String>,

    /// Synthesis model (ollama)
    #[arg(long)]
    pub synthesis_model: Option<String>,

    /// Append timestamped transcript segments to the prompt
    #[arg(long)]
    pub timestamped_transcript: bool,
}

impl EvaluateArgs {
    /// Fold per-invocation flags over the loaded configuration.
    fn apply(&self, config: &mut ReelcheckConfig) {
        if let Some(backend) = self.backend {
            config.evaluation.backend = backend;
        }
        if let Some(sampling) = self.sampling {
            config.evaluation.sampling = sampling;
        }
        if let Some(max_frames) = self.max_frames {
            config.evaluation.max_frames = Some(max_frames);
        }
        if let Some(timeout) = self.timeout {
            config.evaluation.timeout_seconds = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.evaluation.max_retries = max_retries;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.ollama.batch_size = batch_size;
        }
        if let Some(model) = &self.synthesis_model {
            config.ollama.synthesis_model = model.clone();
        }
        if let Some(model) = self.vision_model.as_ref().or(self.model.as_ref()) {
            config.ollama.vision_model = model.clone();
        }
        if let Some(model) = &self.model {
            match config.evaluation.backend {
                BackendKind::ClaudeCli => config.claude.model = model.clone(),
                BackendKind::Gemini => config.gemini.model = model.clone(),
                BackendKind::Ollama => {}
            }
        }
    }
}

fn backend_config(config: &ReelcheckConfig) -> Result<BackendConfig> {
    Ok(match config.evaluation.backend {
        BackendKind::ClaudeCli => BackendConfig::ClaudeCli(config.claude_config()),
        BackendKind::Gemini => BackendConfig::Gemini(config.gemini_config()?),
        BackendKind::Ollama => BackendConfig::Ollama(config.ollama_config()),
    })
}

fn build_request(
    config: &ReelcheckConfig,
    rubric_name: &str,
    timestamped: bool,
) -> Result<EvaluationRequest> {
    let rubric = config
        .rubric_catalog()
        .load(rubric_name)
        .with_context(|| format!("loading rubric '{rubric_name}'"))?;

    let mut request = EvaluationRequest::new(rubric, backend_config(config)?)
        .sampling(config.evaluation.sampling)
        .timeout(config.timeout())
        .timestamped_transcript(timestamped);
    if let Some(max_frames) = config.evaluation.max_frames {
        request = request.max_frames(max_frames);
    }
    Ok(request)
}

pub async fn run(args: EvaluateArgs) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    args.apply(&mut config);

    let credentials = CredentialStore::new(CREDENTIAL_SERVICE).with_env_fallback();
    let registry = BackendRegistry::probe(&config.probe_options(), &credentials).await;
    registry.require(config.evaluation.backend)?;

    let request = build_request(&config, &args.rubric, args.timestamped_transcript)?;
    let evaluator =
        Evaluator::connect(request, CostLedger::new(&config.ledger_path), &credentials).await?;

    info!(
        video_id = %args.video_id,
        backend = %config.evaluation.backend,
        rubric = %args.rubric,
        "starting evaluation"
    );

    let orchestrator = EvaluationOrchestrator::new(evaluator, &config.data_dir)
        .with_retry(config.retry_policy())
        .with_catalog(Arc::new(JsonlCatalog::new(config.catalog_path())));
    let run = orchestrator.run(&args.video_id).await?;

    print_summary(&run);
    Ok(())
}

fn print_summary(run: &EvaluationRun) {
    let result = &run.result;
    println!("Saved: {}", run.artifact.display());
    println!(
        "Processing time: {:.1}s",
        result.performance_metrics.processing_time_seconds
    );
    println!(
        "Frames analyzed: {} of {}",
        result.metadata.frames_analyzed, result.metadata.total_frames_available
    );
    match run.version {
        Some(version) => println!("Catalog: version {} ({})", version, run.status),
        None => println!("Catalog: not recorded ({})", run.status),
    }
    println!();
    println!("{}", preview(&result.evaluation_markdown));
}

fn preview(markdown: &str) -> String {
    let mut chars = markdown.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: EvaluateArgs,
    }

    fn parse(argv: &[&str]) -> EvaluateArgs {
        let mut full = vec!["reelcheck", "--video-id", "vid_001"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).unwrap().args
    }

    #[test]
    fn defaults_keep_config_values() {
        let args = parse(&[]);
        assert_eq!(args.rubric, DEFAULT_RUBRIC);

        let mut config = ReelcheckConfig::default();
        args.apply(&mut config);
        assert_eq!(config.evaluation.backend, BackendKind::ClaudeCli);
        assert_eq!(config.ollama.vision_model, "llava:34b");
        assert!(config.evaluation.max_frames.is_none());
    }

    #[test]
    fn flags_override_config() {
        let args = parse(&[
            "--backend",
            "gemini",
            "--model",
            "models/gemini-2.5-pro",
            "--sampling",
            "last_n",
            "--max-frames",
            "12",
            "--timeout",
            "90",
            "--max-retries",
            "0",
            "--data-dir",
            "/tmp/videos",
        ]);
        let mut config = ReelcheckConfig::default();
        args.apply(&mut config);

        assert_eq!(config.evaluation.backend, BackendKind::Gemini);
        assert_eq!(config.gemini.model, "models/gemini-2.5-pro");
        assert_eq!(config.claude.model, "claude-sonnet-4-20250514");
        assert_eq!(config.evaluation.sampling, SamplingStrategy::LastN);
        assert_eq!(config.evaluation.max_frames, Some(12));
        assert_eq!(config.timeout(), Duration::from_secs(90));
        assert_eq!(config.retry_policy().max_attempts(), 1);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/videos"));
    }

    #[test]
    fn ollama_model_flags() {
        let args = parse(&["--backend", "ollama", "--model", "llava:13b", "--batch-size", "4"]);
        let mut config = ReelcheckConfig::default();
        args.apply(&mut config);
        assert_eq!(config.ollama.vision_model, "llava:13b");
        assert_eq!(config.ollama.batch_size, 4);

        let args = parse(&[
            "--backend",
            "ollama",
            "--model",
            "llava:13b",
            "--vision-model",
            "bakllava",
            "--synthesis-model",
            "qwen2.5:7b",
        ]);
        let mut config = ReelcheckConfig::default();
        args.apply(&mut config);
        assert_eq!(config.ollama.vision_model, "bakllava");
        assert_eq!(config.ollama.synthesis_model, "qwen2.5:7b");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = Harness::try_parse_from(["reelcheck", "--video-id", "v", "--backend", "openai"]);
        assert!(result.is_err());
    }

    #[test]
    fn request_uses_configured_rubric_and_bounds() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("safety.md"), "Rate the safety.\n").unwrap();

        let mut config = ReelcheckConfig::default();
        config.rubrics.dir = temp.path().to_path_buf();
        config.evaluation.backend = BackendKind::Ollama;
        config.evaluation.max_frames = Some(22);

        let request = build_request(&config, "safety", true).unwrap();
        assert_eq!(request.rubric.name, "safety");
        assert!(request.rubric.prompt.contains("Rate the safety."));
        assert_eq!(request.selection.max_frames, 22);
        assert!(request.timestamped_transcript);
        assert_eq!(request.backend.kind(), BackendKind::Ollama);

        config.evaluation.max_frames = None;
        let request = build_request(&config, "safety", false).unwrap();
        assert_eq!(request.selection.max_frames, 50);
    }

    #[test]
    fn missing_rubric_fails() {
        let temp = TempDir::new().unwrap();
        let mut config = ReelcheckConfig::default();
        config.rubrics.dir = temp.path().to_path_buf();
        assert!(build_request(&config, "nope", false).is_err());
    }

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(600);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
        assert!(cut.ends_with("..."));
    }
}
