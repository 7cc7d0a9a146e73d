//! Local batch-then-synthesize backend.
//!
//! ```text
//! frames ──chunks(batch_size)──► batch 1 ─► vision model ─► analysis
//!                                batch 2 ─► vision model ─► [Batch analysis failed: ..]
//!                                batch 3 ─► vision model ─► analysis
//!                                        │
//!                    ordered sections ───┴──► synthesis model ─► report
//! ```
//!
//! Batches run one after another. A failed batch becomes a placeholder and
//! the pipeline continues; a failed synthesis fails the evaluation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reelcheck_models::providers::{
    ChatRequest, ImageData, Message, ModelProvider, OllamaProvider, Usage,
};
use tracing::{debug, error, info, warn};

use super::{EvaluationState, EvaluatorBackend, record_cost, with_deadline};
use crate::asset::{VideoAsset, frame_media_type};
use crate::cost::{CostLedger, CostLedgerEntry};
use crate::request::{OllamaConfig, RunSettings};
use crate::result::{EvaluationResult, FAILED_BATCHES_KEY};
use crate::rubric::Rubric;
use crate::sampler::FrameSelection;
use crate::{Error, Result};

const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one vision call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Analysis(String),
    Failed(String),
}

impl BatchOutcome {
    /// Text placed in the synthesis prompt for this batch.
    pub fn text(&self) -> String {
        match self {
            Self::Analysis(text) => text.clone(),
            Self::Failed(reason) => format!("[Batch analysis failed: {reason}]"),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One batch's frames and what the vision model said about them.
#[derive(Debug, Clone)]
pub struct PartialBatchAnalysis {
    /// 1-based position in frame order.
    pub number: usize,
    pub frames: Vec<PathBuf>,
    pub outcome: BatchOutcome,
}

pub struct OllamaBackend {
    config: OllamaConfig,
    vision: Arc<dyn ModelProvider>,
    synthesis: Arc<dyn ModelProvider>,
    evaluator_name: String,
    rubric: Rubric,
    selection: FrameSelection,
    timeout: Duration,
    timestamped_transcript: bool,
    ledger: CostLedger,
}

impl OllamaBackend {
    /// Check the local server and build the backend.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` when the server does not answer `/api/tags`.
    /// Models that are not pulled yet only produce a warning.
    pub async fn connect(config: OllamaConfig, settings: RunSettings) -> Result<Self> {
        let provider = OllamaProvider::with_base_url(config.base_url.clone())
            .with_timeout(settings.timeout);

        let models = provider
            .list_models(READINESS_TIMEOUT)
            .await
            .map_err(|e| Error::BackendUnavailable {
                backend: "ollama".to_string(),
                reason: format!("server at {} is not reachable: {e}", config.base_url),
            })?;
        for wanted in [&config.vision_model, &config.synthesis_model] {
            if !models.iter().any(|m| m == wanted) {
                warn!(model = %wanted, "model not found locally; run `ollama pull {wanted}`");
            }
        }
        info!(
            host = %config.base_url,
            vision_model = %config.vision_model,
            synthesis_model = %config.synthesis_model,
            "ollama backend configured"
        );

        let provider: Arc<dyn ModelProvider> = Arc::new(provider);
        Ok(Self::with_providers(config, settings, provider.clone(), provider))
    }

    /// Build the backend around existing vision and synthesis providers.
    pub fn with_providers(
        mut config: OllamaConfig,
        settings: RunSettings,
        vision: Arc<dyn ModelProvider>,
        synthesis: Arc<dyn ModelProvider>,
    ) -> Self {
        if config.batch_size == 0 {
            warn!("batch_size 0 is not usable, using 1");
            config.batch_size = 1;
        }
        Self {
            evaluator_name: evaluator_name_for(&config.vision_model),
            config,
            vision,
            synthesis,
            rubric: settings.rubric,
            selection: settings.selection,
            timeout: settings.timeout,
            timestamped_transcript: settings.timestamped_transcript,
            ledger: CostLedger::default_location(),
        }
    }

    pub fn with_ledger(mut self, ledger: CostLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Phase one. Never fails; failures become placeholders.
    async fn analyze_batches(
        &self,
        frames: &[PathBuf],
        duration: f64,
        usage: &mut Usage,
    ) -> Vec<PartialBatchAnalysis> {
        let batches: Vec<&[PathBuf]> = frames.chunks(self.config.batch_size).collect();
        let total = batches.len();
        let mut partials = Vec::with_capacity(total);

        for (index, batch) in batches.into_iter().enumerate() {
            let number = index + 1;
            let started = Instant::now();
            debug!(batch = number, total, frames = batch.len(), "analyzing batch");

            let outcome = match self.analyze_batch(number, total, batch, duration).await {
                Ok((text, batch_usage)) => {
                    *usage = *usage + batch_usage;
                    info!(
                        batch = number,
                        total,
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        "batch analyzed"
                    );
                    BatchOutcome::Analysis(text)
                }
                Err(e) => {
                    warn!(batch = number, total, error = %e, "batch analysis failed, continuing");
                    BatchOutcome::Failed(e.to_string())
                }
            };
            partials.push(PartialBatchAnalysis {
                number,
                frames: batch.to_vec(),
                outcome,
            });
        }
        partials
    }

    async fn analyze_batch(
        &self,
        number: usize,
        total: usize,
        frames: &[PathBuf],
        duration: f64,
    ) -> Result<(String, Usage)> {
        let batch_error = |reason: String| Error::BatchAnalysis {
            batch: number,
            reason,
        };

        let mut images = Vec::with_capacity(frames.len());
        for frame in frames {
            let bytes = tokio::fs::read(frame)
                .await
                .map_err(|e| batch_error(format!("cannot read {}: {e}", frame.display())))?;
            images.push(ImageData::new(frame_media_type(frame), STANDARD.encode(bytes)));
        }

        let prompt = batch_prompt(number, total, frames.len(), duration);
        let request = ChatRequest::new(
            self.config.vision_model.clone(),
            vec![Message::user_with_images(prompt, images)],
        );
        let response = with_deadline(self.timeout, "vision call", async {
            self.vision.chat(request).await.map_err(Error::from)
        })
        .await
        .map_err(|e| batch_error(e.to_string()))?;

        let text = response.content.as_text();
        if text.trim().is_empty() {
            return Err(batch_error("vision model returned no text".to_string()));
        }
        Ok((text, response.usage.unwrap_or_default()))
    }

    /// Phase two. Any failure here is a [`Error::Synthesis`].
    async fn synthesize(&self, prompt: String, usage: &mut Usage) -> Result<String> {
        info!(
            model = %self.config.synthesis_model,
            chars = prompt.len(),
            approx_tokens = prompt.len() / 4,
            "calling synthesis model"
        );
        let started = Instant::now();
        let request = ChatRequest::new(
            self.config.synthesis_model.clone(),
            vec![Message::user(prompt)],
        );
        let response = with_deadline(self.timeout, "synthesis call", async {
            self.synthesis.chat(request).await.map_err(Error::from)
        })
        .await
        .map_err(|e| Error::Synthesis(e.to_string()))?;

        let text = response.content.as_text();
        if text.trim().is_empty() {
            return Err(Error::Synthesis(
                "synthesis model returned no text".to_string(),
            ));
        }
        *usage = *usage + response.usage.unwrap_or_default();
        info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            chars = text.len(),
            "synthesis complete"
        );
        Ok(text)
    }
}

#[async_trait]
impl EvaluatorBackend for OllamaBackend {
    fn evaluator_name(&self) -> &str {
        &self.evaluator_name
    }

    fn model_name(&self) -> &str {
        &self.config.vision_model
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
            batch_size = self.config.batch_size,
            "frames sampled"
        );

        info!(
            video_id = %asset.id,
            state = %EvaluationState::BackendInvoked,
            vision_model = %self.config.vision_model,
            synthesis_model = %self.config.synthesis_model,
            "starting batch analysis"
        );
        let mut usage = Usage::default();
        let partials = self
            .analyze_batches(&frames, asset.metadata.duration_seconds, &mut usage)
            .await;
        let failed: Vec<usize> = partials
            .iter()
            .filter(|p| p.outcome.is_failed())
            .map(|p| p.number)
            .collect();
        if !failed.is_empty() {
            warn!(video_id = %asset.id, failed = ?failed, "evaluation is degraded");
        }

        let transcript = asset.transcript.prompt_text(self.timestamped_transcript);
        let prompt = synthesis_prompt(asset, &partials, &transcript, self.get_rubric());
        let text = match self.synthesize(prompt, &mut usage).await {
            Ok(text) => text,
            Err(e) => {
                error!(video_id = %asset.id, state = %EvaluationState::Failed, error = %e, "synthesis failed");
                return Err(e);
            }
        };

        let ledger_model = format!(
            "ollama/{}+{}",
            self.config.vision_model, self.config.synthesis_model
        );
        let entry = CostLedgerEntry::priced(
            &ledger_model,
            &asset.id,
            &self.rubric.name,
            usage.input_tokens,
            usage.output_tokens,
        );
        record_cost(&self.ledger, entry).await;

        let elapsed = started.elapsed();
        info!(
            video_id = %asset.id,
            state = %EvaluationState::Success,
            batches = partials.len(),
            elapsed_secs = elapsed.as_secs_f64(),
            "ollama evaluation complete"
        );

        let mut builder = EvaluationResult::builder(asset)
            .evaluator(self.evaluator_name.clone())
            .rubric(&self.rubric.name)
            .model(&self.config.vision_model)
            .markdown(text)
            .sampling(self.selection.strategy, frames.len())
            .extra("batch_size", self.config.batch_size)
            .extra("num_batches", partials.len())
            .extra("vision_model", self.config.vision_model.clone())
            .extra("synthesis_model", self.config.synthesis_model.clone())
            .elapsed(elapsed)
            .batches(partials.len());
        if !failed.is_empty() {
            builder = builder.extra(FAILED_BATCHES_KEY, failed);
        }
        Ok(builder.build())
    }
}

fn evaluator_name_for(vision_model: &str) -> String {
    let family = vision_model.split(':').next().unwrap_or(vision_model);
    format!("ollama-{family}")
}

pub(crate) fn batch_prompt(number: usize, total: usize, frames: usize, duration: f64) -> String {
    format!(
        "You are analyzing batch {number} of {total} from a children's educational video (duration: {duration}s).\n\n\
         I will show you {frames} frames. Analyze them for CONTENT SAFETY and AGE-APPROPRIATENESS.\n\n\
         Focus on identifying:\n\
         1. **Violence**: Any physical aggression, fighting, or harmful behavior\n\
         2. **Fear/Scary Content**: Frightening characters, monsters, scary visuals, dark threatening scenes\n\
         3. **Inappropriate Content**: Sexual content, drugs, alcohol, or other inappropriate elements\n\
         4. **Language Concerns**: Any visible text with profanity, crude language, or inappropriate messaging\n\
         5. **Discrimination**: Stereotypes, biased representations, or exclusionary content\n\
         6. **Dangerous Behaviors**: Activities children might imitate dangerously\n\
         7. **Visual Stimulation**: Color intensity, visual complexity, overly stimulating elements\n\n\
         For each concern you find, note:\n\
         - What you see\n\
         - Severity (none/mild/moderate/significant)\n\
         - Which frame(s) show it\n\n\
         If frames are appropriate and safe, say so clearly.\n\n\
         Be thorough but concise. This is a partial analysis that will be combined with other batches.\n"
    )
}

/// Synthesis prompt with one section per batch, in batch order.
pub(crate) fn synthesis_prompt(
    asset: &VideoAsset,
    partials: &[PartialBatchAnalysis],
    transcript: &str,
    rubric: &str,
) -> String {
    let total_frames: usize = partials.iter().map(|p| p.frames.len()).sum();
    let mut prompt = format!(
        "# Video Evaluation Synthesis Task\n\n\
         You are synthesizing multiple partial analyses into a comprehensive content rating evaluation.\n\n\
         VIDEO ID: {}\n\
         DURATION: {} seconds\n\
         TOTAL FRAMES ANALYZED: {total_frames} frames across {} batches\n\n\
         ---\n\n\
         ## PARTIAL VISUAL ANALYSES\n\n",
        asset.id,
        asset.metadata.duration_seconds,
        partials.len(),
    );

    for partial in partials {
        prompt.push_str(&format!(
            "\n### Batch {} Analysis:\n{}\n\n",
            partial.number,
            partial.outcome.text()
        ));
    }

    prompt.push_str(&format!(
        "\n---\n\n\
         ## VIDEO TRANSCRIPT\n\n\
         {transcript}\n\n\
         ---\n\n\
         ## YOUR TASK\n\n\
         Using the visual analyses above AND the transcript, create a COMPREHENSIVE content rating evaluation following this rubric:\n\n\
         {rubric}\n\n\
         ---\n\n\
         ## IMPORTANT INSTRUCTIONS\n\n\
         1. **Combine visual and transcript analysis**: Use both the frame analyses above AND the transcript content\n\
         2. **Follow the rubric format exactly**: Provide all sections as specified in the rubric\n\
         3. **Be specific with evidence**: Reference specific batch findings and transcript quotes\n\
         4. **Estimate timestamps**: Based on batch numbers and video duration, estimate timestamps for concerning content\n\
         5. **Provide complete ratings**: Include all required sections, metrics, and ratings from the rubric\n\
         6. **Be thorough**: This is the final evaluation - make it comprehensive and actionable\n\n\
         Create the full evaluation now, following the rubric structure precisely.\n"
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::fixtures::write_asset;
    use crate::sampler::SamplingStrategy;
    use tempfile::TempDir;

    fn partial(number: usize, outcome: BatchOutcome) -> PartialBatchAnalysis {
        PartialBatchAnalysis {
            number,
            frames: vec![PathBuf::from(format!("f{number}.jpg"))],
            outcome,
        }
    }

    #[test]
    fn failed_outcome_renders_placeholder() {
        let failed = BatchOutcome::Failed("connection reset".to_string());
        assert!(failed.is_failed());
        assert_eq!(failed.text(), "[Batch analysis failed: connection reset]");
        assert_eq!(BatchOutcome::Analysis("fine".into()).text(), "fine");
    }

    #[test]
    fn evaluator_name_uses_model_family() {
        assert_eq!(evaluator_name_for("llava:34b"), "ollama-llava");
        assert_eq!(evaluator_name_for("bakllava"), "ollama-bakllava");
    }

    #[test]
    fn batch_prompt_states_position() {
        let prompt = batch_prompt(2, 3, 8, 90.5);
        assert!(prompt.starts_with("You are analyzing batch 2 of 3"));
        assert!(prompt.contains("I will show you 8 frames"));
        assert!(prompt.contains("partial analysis that will be combined"));
    }

    #[tokio::test]
    async fn synthesis_sections_are_in_batch_order() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 3);
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();

        let partials = vec![
            partial(1, BatchOutcome::Analysis("first".into())),
            partial(2, BatchOutcome::Failed("boom".into())),
            partial(3, BatchOutcome::Analysis("third".into())),
        ];
        let prompt = synthesis_prompt(&asset, &partials, "the transcript", "THE RUBRIC");

        assert!(prompt.contains("TOTAL FRAMES ANALYZED: 3 frames across 3 batches"));
        let positions: Vec<usize> = (1..=3)
            .map(|n| prompt.find(&format!("### Batch {n} Analysis:")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.contains("### Batch 2 Analysis:\n[Batch analysis failed: boom]"));
        assert!(prompt.contains("## VIDEO TRANSCRIPT\n\nthe transcript"));
        assert!(prompt.contains("following this rubric:\n\nTHE RUBRIC"));
    }

    #[tokio::test]
    async fn unreachable_server_is_backend_unavailable() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let settings = RunSettings {
            rubric: Rubric::new("r", "p"),
            selection: FrameSelection::new(SamplingStrategy::Even, 50),
            timeout: Duration::from_secs(5),
            timestamped_transcript: false,
        };
        let err = OllamaBackend::connect(config, settings).await.err().unwrap();
        assert!(matches!(err, Error::BackendUnavailable { ref backend, .. } if backend == "ollama"));
    }
}
