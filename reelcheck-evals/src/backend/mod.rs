//! The evaluator backend contract and its three implementations.
//!
//! ```text
//!                 ┌────────────────────────┐
//!                 │    EvaluatorBackend    │
//!                 │  load → sample → eval  │
//!                 │        → save          │
//!                 └───────────┬────────────┘
//!          ┌──────────────────┼───────────────────┐
//!          ▼                  ▼                   ▼
//!  ┌───────────────┐  ┌───────────────┐  ┌──────────────────┐
//!  │ ClaudeCli     │  │ Gemini        │  │ Ollama           │
//!  │ subprocess,   │  │ HTTP, inline  │  │ batches of frames│
//!  │ tool reads    │  │ image bytes   │  │ then synthesis   │
//!  │ frame paths   │  │               │  │                  │
//!  └───────────────┘  └───────────────┘  └──────────────────┘
//! ```
//!
//! Backend selection is the [`Evaluator`] enum, fixed when it is connected.

mod claude_cli;
mod gemini;
mod ollama;
mod registry;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reelcheck_models::auth::CredentialStore;

pub use claude_cli::{CLAUDE_MAX_FRAMES, ClaudeCliBackend, VERSION_PROBE_TIMEOUT};
pub use gemini::GeminiBackend;
pub use ollama::{BatchOutcome, OllamaBackend, PartialBatchAnalysis};
pub use registry::{Availability, BackendRegistry, ProbeOptions};

use crate::asset::VideoAsset;
use crate::cost::CostLedger;
use crate::request::{BackendConfig, BackendKind, EvaluationRequest};
use crate::result::{EvaluationResult, write_artifact};
use crate::rubric::Rubric;
use crate::sampler::FrameSelection;
use crate::{Error, Result};

/// Lifecycle of a single `evaluate` call, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    Init,
    FramesSampled,
    BackendInvoked,
    Success,
    Failed,
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::FramesSampled => "FRAMES_SAMPLED",
            Self::BackendInvoked => "BACKEND_INVOKED",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        })
    }
}

/// Capability every evaluator backend provides.
///
/// # Required Methods
///
/// - [`evaluator_name`](EvaluatorBackend::evaluator_name) - name recorded in results
/// - [`model_name`](EvaluatorBackend::model_name) - model recorded in results
/// - [`rubric`](EvaluatorBackend::rubric) - rubric fixed at construction
/// - [`frame_selection`](EvaluatorBackend::frame_selection) - effective sampling bound
/// - [`evaluate`](EvaluatorBackend::evaluate) - the backend's strategy
///
/// The rest have shared default implementations.
#[async_trait]
pub trait EvaluatorBackend: Send + Sync {
    fn evaluator_name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn rubric(&self) -> &Rubric;

    fn frame_selection(&self) -> FrameSelection;

    /// The rubric text, verbatim.
    fn get_rubric(&self) -> &str {
        &self.rubric().prompt
    }

    /// Reduce an asset's frames with this backend's selection.
    fn sample_frames(&self, frames: &[PathBuf]) -> Vec<PathBuf> {
        self.frame_selection().apply(frames)
    }

    /// Load `<videos_root>/<video_id>`, failing on any missing piece.
    async fn load_video_data(&self, video_id: &str, videos_root: &Path) -> Result<VideoAsset> {
        VideoAsset::load(video_id, videos_root).await
    }

    /// Run the backend strategy over an asset.
    async fn evaluate(&self, asset: &VideoAsset) -> Result<EvaluationResult>;

    /// Persist a result as `<evaluator>_<rubric>_<timestamp>.json`.
    async fn save_evaluation(&self, result: &EvaluationResult, output_dir: &Path) -> Result<PathBuf> {
        write_artifact(result, output_dir).await
    }
}

/// Run a model call under a deadline, mapping expiry to [`Error::Timeout`].
pub(crate) async fn with_deadline<T, F>(timeout: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::Timeout(format!("{what} after {}s", timeout.as_secs())))?
}

/// A connected backend, one of the closed set.
pub enum Evaluator {
    ClaudeCli(ClaudeCliBackend),
    Gemini(GeminiBackend),
    Ollama(OllamaBackend),
}

impl Evaluator {
    /// Build and health-check the backend named by the request.
    ///
    /// Fails here, not on first use, when the backend's dependency is
    /// missing.
    pub async fn connect(
        request: EvaluationRequest,
        ledger: CostLedger,
        credentials: &CredentialStore,
    ) -> Result<Self> {
        let (backend, settings) = request.into_parts();
        Ok(match backend {
            BackendConfig::ClaudeCli(config) => Self::ClaudeCli(
                ClaudeCliBackend::connect(config, settings)
                    .await?
                    .with_ledger(ledger),
            ),
            BackendConfig::Gemini(config) => Self::Gemini(
                GeminiBackend::connect(config, settings, credentials)?.with_ledger(ledger),
            ),
            BackendConfig::Ollama(config) => Self::Ollama(
                OllamaBackend::connect(config, settings)
                    .await?
                    .with_ledger(ledger),
            ),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::ClaudeCli(_) => BackendKind::ClaudeCli,
            Self::Gemini(_) => BackendKind::Gemini,
            Self::Ollama(_) => BackendKind::Ollama,
        }
    }

    fn inner(&self) -> &dyn EvaluatorBackend {
        match self {
            Self::ClaudeCli(b) => b,
            Self::Gemini(b) => b,
            Self::Ollama(b) => b,
        }
    }
}

#[async_trait]
impl EvaluatorBackend for Evaluator {
    fn evaluator_name(&self) -> &str {
        self.inner().evaluator_name()
    }

    fn model_name(&self) -> &str {
        self.inner().model_name()
    }

    fn rubric(&self) -> &Rubric {
        self.inner().rubric()
    }

    fn frame_selection(&self) -> FrameSelection {
        self.inner().frame_selection()
    }

    async fn load_video_data(&self, video_id: &str, videos_root: &Path) -> Result<VideoAsset> {
        self.inner().load_video_data(video_id, videos_root).await
    }

    async fn evaluate(&self, asset: &VideoAsset) -> Result<EvaluationResult> {
        self.inner().evaluate(asset).await
    }

    async fn save_evaluation(&self, result: &EvaluationResult, output_dir: &Path) -> Result<PathBuf> {
        self.inner().save_evaluation(result, output_dir).await
    }
}

/// Append a ledger entry, logging rather than failing when the ledger is
/// not writable; the evaluation text is still valid.
pub(crate) async fn record_cost(ledger: &CostLedger, entry: crate::cost::CostLedgerEntry) {
    if let Err(e) = ledger.append(&entry).await {
        tracing::warn!(
            path = %ledger.path().display(),
            error = %e,
            "failed to append cost ledger entry"
        );
    }
}
