//! CLI-invoked backend.
//!
//! Sends one text prompt to an installed model CLI running in print mode.
//! The prompt lists absolute frame paths and the tool reads the images
//! itself; no image bytes pass through this process.
//!
//! ```text
//! connect ── `<binary> --version` (5s) ── ToolUnavailable on failure
//!    │
//! evaluate
//!    ├─ sample frames (capped at 100)
//!    ├─ build prompt: header, numbered frame paths, rubric, transcript
//!    ├─ spawn `<binary> --print --dangerously-skip-permissions --model <m>`
//!    │    prompt on stdin, bounded by the request timeout
//!    ├─ non-zero exit or empty stdout → BackendInvocation
//!    └─ estimate tokens (chars / 4) → cost ledger, marked estimated
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{EvaluationState, EvaluatorBackend, record_cost};
use crate::asset::VideoAsset;
use crate::cost::{CostLedger, CostLedgerEntry, estimate_tokens};
use crate::request::{ClaudeCliConfig, RunSettings};
use crate::result::EvaluationResult;
use crate::rubric::Rubric;
use crate::sampler::FrameSelection;
use crate::{Error, Result};

/// Most frames the tool will accept in one prompt.
pub const CLAUDE_MAX_FRAMES: usize = 100;

/// Deadline for the `--version` probe.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const EVALUATOR_NAME: &str = "claude-cli";

pub struct ClaudeCliBackend {
    config: ClaudeCliConfig,
    rubric: Rubric,
    selection: FrameSelection,
    timeout: Duration,
    timestamped_transcript: bool,
    ledger: CostLedger,
    version: String,
}

impl ClaudeCliBackend {
    /// Probe the tool and build the backend.
    ///
    /// # Errors
    ///
    /// `ToolUnavailable` if the binary is missing, exits non-zero, or does
    /// not answer `--version` within [`VERSION_PROBE_TIMEOUT`].
    pub async fn connect(config: ClaudeCliConfig, settings: RunSettings) -> Result<Self> {
        let version = probe_version(&config.binary).await?;
        info!(binary = %config.binary.display(), %version, "claude CLI available");

        let mut selection = settings.selection;
        if selection.max_frames > CLAUDE_MAX_FRAMES {
            warn!(
                requested = selection.max_frames,
                cap = CLAUDE_MAX_FRAMES,
                "requested more frames than the CLI accepts, capping"
            );
            selection.max_frames = CLAUDE_MAX_FRAMES;
        }

        Ok(Self {
            config,
            rubric: settings.rubric,
            selection,
            timeout: settings.timeout,
            timestamped_transcript: settings.timestamped_transcript,
            ledger: CostLedger::default_location(),
            version,
        })
    }

    /// Write cost entries to this ledger.
    pub fn with_ledger(mut self, ledger: CostLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Version string reported by the tool.
    pub fn version(&self) -> &str {
        &self.version
    }

    async fn invoke(&self, prompt: &str, working_dir: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args([
            "--print",
            "--dangerously-skip-permissions",
            "--model",
            self.config.model.as_str(),
        ])
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| spawn_error(&self.config.binary, e))?;

        let stdin = child.stdin.take();
        let exchange = async move {
            let send = async {
                let Some(mut stdin) = stdin else {
                    return Ok(());
                };
                // A tool that exits early closes its end; its exit status tells the story.
                match write_prompt(&mut stdin, prompt).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                }
            };
            let (sent, output) = tokio::join!(send, child.wait_with_output());
            sent.and(output)
        };

        // The deadline covers the prompt write too: a tool that never drains
        // stdin would otherwise block a large write forever.
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "claude CLI did not finish within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let detail = if stderr.is_empty() { &stdout } else { &stderr };
            if mentions_rate_limit(detail) {
                return Err(Error::RateLimited(detail.clone()));
            }
            return Err(Error::BackendInvocation(format!(
                "claude CLI exited with {}: {}",
                output.status,
                if detail.is_empty() { "no output" } else { detail.as_str() }
            )));
        }

        if stdout.is_empty() {
            return Err(Error::BackendInvocation(
                "claude CLI returned an empty response".to_string(),
            ));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl EvaluatorBackend for ClaudeCliBackend {
    fn evaluator_name(&self) -> &str {
        EVALUATOR_NAME
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    fn frame_selection(&self) -> FrameSelection {
        self.selection
    }

    async fn evaluate(&self, asset: &VideoAsset) -> Result<EvaluationResult> {
        let started = Instant::now();
        debug!(video_id = %asset.id, state = %EvaluationState::Init, "evaluation started");

        let frames = self.sample_frames(&asset.frames);
        info!(
            video_id = %asset.id,
            state = %EvaluationState::FramesSampled,
            frames = frames.len(),
            available = asset.frames.len(),
            strategy = %self.selection.strategy,
            "frames sampled"
        );

        let transcript = asset.transcript.prompt_text(self.timestamped_transcript);
        let prompt = build_prompt(asset, &frames, self.get_rubric(), &transcript);
        debug!(chars = prompt.len(), "built claude CLI prompt");

        info!(video_id = %asset.id, state = %EvaluationState::BackendInvoked, model = %self.config.model, "calling claude CLI");
        let text = match self.invoke(&prompt, &asset.root).await {
            Ok(text) => text,
            Err(e) => {
                error!(video_id = %asset.id, state = %EvaluationState::Failed, error = %e, "claude CLI evaluation failed");
                return Err(e);
            }
        };

        let input_tokens = estimate_tokens(&prompt);
        let output_tokens = estimate_tokens(&text);
        let entry = CostLedgerEntry::priced(
            &self.config.model,
            &asset.id,
            &self.rubric.name,
            input_tokens,
            output_tokens,
        )
        .estimated();
        info!(
            input_tokens,
            output_tokens,
            cost = entry.cost,
            "estimated token usage (approximation, not billing data)"
        );
        record_cost(&self.ledger, entry).await;

        let elapsed = started.elapsed();
        info!(
            video_id = %asset.id,
            state = %EvaluationState::Success,
            elapsed_secs = elapsed.as_secs_f64(),
            "claude CLI evaluation complete"
        );

        Ok(EvaluationResult::builder(asset)
            .evaluator(EVALUATOR_NAME)
            .rubric(&self.rubric.name)
            .model(&self.config.model)
            .markdown(text)
            .sampling(self.selection.strategy, frames.len())
            .extra("cli_version", self.version.clone())
            .extra("tokens_estimated", true)
            .elapsed(elapsed)
            .build())
    }
}

async fn probe_version(binary: &Path) -> Result<String> {
    let unavailable = |reason: String| Error::ToolUnavailable {
        tool: binary.display().to_string(),
        reason,
    };

    let child = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => unavailable("not found on PATH".to_string()),
            _ => unavailable(e.to_string()),
        })?;

    let output = tokio::time::timeout(VERSION_PROBE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            unavailable(format!(
                "--version did not respond within {}s",
                VERSION_PROBE_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| unavailable(e.to_string()))?;

    if !output.status.success() {
        return Err(unavailable(format!("--version exited with {}", output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn write_prompt(stdin: &mut tokio::process::ChildStdin, prompt: &str) -> std::io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    stdin.shutdown().await
}

fn spawn_error(binary: &Path, err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::ToolUnavailable {
            tool: binary.display().to_string(),
            reason: "not found on PATH".to_string(),
        },
        _ => Error::BackendInvocation(format!("failed to spawn {}: {err}", binary.display())),
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("429")
}

/// Prompt for a single CLI call.
pub(crate) fn build_prompt(
    asset: &VideoAsset,
    frames: &[PathBuf],
    rubric: &str,
    transcript: &str,
) -> String {
    let count = frames.len();
    let mut prompt = format!(
        "# Video Evaluation Task\n\n\
         VIDEO ID: {}\n\
         DURATION: {} seconds\n\
         FRAMES: {count} frames extracted at regular intervals\n\n\
         ## Instructions\n\n\
         I have extracted {count} frames from this video. Please read and analyze ALL of these frames along with the transcript below.\n\n\
         **IMPORTANT**: First, use the Read tool to view each of these image files:\n\n",
        asset.id, asset.metadata.duration_seconds,
    );

    for (i, frame) in frames.iter().enumerate() {
        let absolute = std::path::absolute(frame).unwrap_or_else(|_| frame.clone());
        prompt.push_str(&format!("{}. {}\n", i + 1, absolute.display()));
    }

    prompt.push_str(&format!(
        "\nAfter reading all {count} frames, analyze them along with the transcript to provide a comprehensive evaluation.\n\n\
         ---\n\n\
         ## EVALUATION RUBRIC\n\n\
         {rubric}\n\n\
         ---\n\n\
         ## VIDEO TRANSCRIPT\n\n\
         {}\n\n\
         ---\n\n\
         ## Your Task\n\n\
         1. First, read all {count} frame images using the Read tool\n\
         2. Then analyze them comprehensively using the evaluation framework above\n\
         3. Provide specific examples with timestamps from the transcript\n\
         4. Follow the rubric's output format requirements exactly\n\n\
         Please provide a thorough evaluation following the rubric framework.\n",
        transcript,
    ));
    prompt
}
