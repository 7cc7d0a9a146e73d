//! Evaluation results and the artifact file they are written to.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::asset::{VideoAsset, VideoMetadata};
use crate::sampler::SamplingStrategy;
use crate::Result;

/// Metadata key listing failed batch numbers in degraded local runs.
pub const FAILED_BATCHES_KEY: &str = "failed_batches";

/// The `metadata` block of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub video_metadata: VideoMetadata,
    pub frames_analyzed: usize,
    pub total_frames_available: usize,
    pub sampling_strategy: SamplingStrategy,
    pub transcript_word_count: usize,
    /// Backend-specific keys, written alongside the shared ones.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The `performance_metrics` block of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub processing_time_seconds: f64,
    pub frames_processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batches_processed: Option<usize>,
}

/// Output of one `evaluate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub video_id: String,
    pub evaluator: String,
    pub rubric: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub evaluation_markdown: String,
    pub metadata: ResultMetadata,
    pub performance_metrics: PerformanceMetrics,
}

impl EvaluationResult {
    /// Start a result for an asset.
    pub fn builder(asset: &VideoAsset) -> EvaluationResultBuilder {
        EvaluationResultBuilder::new(asset)
    }

    /// A local run in which at least one batch failed.
    pub fn is_degraded(&self) -> bool {
        self.metadata
            .extra
            .get(FAILED_BATCHES_KEY)
            .and_then(|v| v.as_array())
            .is_some_and(|a| !a.is_empty())
    }

    /// `<evaluator>_<rubric>_<YYYYMMDD_HHMMSS>`, without extension.
    pub fn artifact_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize(&self.evaluator),
            sanitize(&self.rubric),
            self.timestamp.format("%Y%m%d_%H%M%S")
        )
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '-' } else { c })
        .collect()
}

/// Builder for [`EvaluationResult`].
#[derive(Debug)]
pub struct EvaluationResultBuilder {
    video_id: String,
    video_metadata: VideoMetadata,
    total_frames: usize,
    word_count: usize,
    evaluator: String,
    rubric: String,
    model: String,
    markdown: String,
    strategy: SamplingStrategy,
    frames_analyzed: usize,
    extra: serde_json::Map<String, serde_json::Value>,
    elapsed: Duration,
    batches: Option<usize>,
}

impl EvaluationResultBuilder {
    fn new(asset: &VideoAsset) -> Self {
        Self {
            video_id: asset.id.clone(),
            video_metadata: asset.metadata.clone(),
            total_frames: asset.frames.len(),
            word_count: asset.transcript.word_count(),
            evaluator: String::new(),
            rubric: String::new(),
            model: String::new(),
            markdown: String::new(),
            strategy: SamplingStrategy::default(),
            frames_analyzed: 0,
            extra: serde_json::Map::new(),
            elapsed: Duration::ZERO,
            batches: None,
        }
    }

    pub fn evaluator(mut self, name: impl Into<String>) -> Self {
        self.evaluator = name.into();
        self
    }

    pub fn rubric(mut self, name: impl Into<String>) -> Self {
        self.rubric = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn markdown(mut self, text: impl Into<String>) -> Self {
        self.markdown = text.into();
        self
    }

    pub fn sampling(mut self, strategy: SamplingStrategy, frames_analyzed: usize) -> Self {
        self.strategy = strategy;
        self.frames_analyzed = frames_analyzed;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn batches(mut self, batches: usize) -> Self {
        self.batches = Some(batches);
        self
    }

    pub fn build(self) -> EvaluationResult {
        EvaluationResult {
            video_id: self.video_id,
            evaluator: self.evaluator,
            rubric: self.rubric,
            model: self.model,
            timestamp: Utc::now(),
            evaluation_markdown: self.markdown,
            metadata: ResultMetadata {
                video_metadata: self.video_metadata,
                frames_analyzed: self.frames_analyzed,
                total_frames_available: self.total_frames,
                sampling_strategy: self.strategy,
                transcript_word_count: self.word_count,
                extra: self.extra,
            },
            performance_metrics: PerformanceMetrics {
                processing_time_seconds: self.elapsed.as_secs_f64(),
                frames_processed: self.frames_analyzed,
                batches_processed: self.batches,
            },
        }
    }
}

/// Write a result as pretty JSON under `output_dir`.
///
/// Never overwrites: when the second-resolution name is taken, `_2`, `_3`,
/// and so on are appended until a free name is found.
pub async fn write_artifact(result: &EvaluationResult, output_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    let json = serde_json::to_string_pretty(result)?;
    let stem = result.artifact_stem();

    let mut suffix = 1u32;
    loop {
        let name = if suffix == 1 {
            format!("{stem}.json")
        } else {
            format!("{stem}_{suffix}.json")
        };
        let path = output_dir.join(name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(json.as_bytes()).await?;
                file.flush().await?;
                info!(path = %path.display(), "saved evaluation artifact");
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
