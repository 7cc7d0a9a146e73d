//! Hosted multimodal API backend.
//!
//! One request carries the prompt text followed by every sampled frame as
//! inline base64 image data.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reelcheck_models::auth::CredentialStore;
use reelcheck_models::providers::{
    ChatRequest, GeminiProvider, ImageData, Message, ModelProvider, SafetySetting,
};
use tracing::{debug, error, info, warn};

use super::{EvaluationState, EvaluatorBackend, record_cost, with_deadline};
use crate::asset::{VideoAsset, frame_media_type};
use crate::cost::{CostLedger, CostLedgerEntry};
use crate::request::{GeminiConfig, RunSettings};
use crate::result::EvaluationResult;
use crate::rubric::Rubric;
use crate::sampler::FrameSelection;
use crate::{Error, Result};

const CREDENTIAL_PROVIDER: &str = "google";

pub struct GeminiBackend {
    config: GeminiConfig,
    provider: Arc<dyn ModelProvider>,
    evaluator_name: String,
    rubric: Rubric,
    selection: FrameSelection,
    timeout: Duration,
    timestamped_transcript: bool,
    ledger: CostLedger,
}

impl GeminiBackend {
    /// Build the backend from stored credentials.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` when no Google API key is in the keyring or
    /// the environment.
    pub fn connect(
        config: GeminiConfig,
        settings: RunSettings,
        credentials: &CredentialStore,
    ) -> Result<Self> {
        let key = credentials
            .get(CREDENTIAL_PROVIDER)
            .map_err(|e| Error::BackendUnavailable {
                backend: "gemini".to_string(),
                reason: e.to_string(),
            })?;

        let provider = GeminiProvider::new(key)
            .with_base_url(config.base_url.clone())
            .with_safety_settings(SafetySetting::uniform(config.safety_threshold))
            .with_timeout(settings.timeout);
        info!(model = %config.model, threshold = ?config.safety_threshold, "gemini backend configured");

        Ok(Self::with_provider(config, settings, Arc::new(provider)))
    }

    /// Build the backend around an existing provider.
    pub fn with_provider(
        config: GeminiConfig,
        settings: RunSettings,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            evaluator_name: evaluator_name_for(&config.model),
            config,
            provider,
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

    async fn load_frames(&self, frames: &[PathBuf]) -> Result<Vec<ImageData>> {
        let mut images = Vec::with_capacity(frames.len());
        for frame in frames {
            match tokio::fs::read(frame).await {
                Ok(bytes) => images.push(ImageData::new(
                    frame_media_type(frame),
                    STANDARD.encode(bytes),
                )),
                Err(e) => warn!(frame = %frame.display(), error = %e, "skipping unreadable frame"),
            }
        }
        if images.is_empty() {
            return Err(Error::BackendInvocation(
                "no frames could be loaded".to_string(),
            ));
        }
        debug!(loaded = images.len(), requested = frames.len(), "loaded frame images");
        Ok(images)
    }

    async fn call(&self, asset: &VideoAsset, frames: &[PathBuf]) -> Result<(String, Option<CostLedgerEntry>)> {
        let images = self.load_frames(frames).await?;
        let transcript = asset.transcript.prompt_text(self.timestamped_transcript);
        let prompt = build_prompt(asset, images.len(), self.get_rubric(), &transcript);

        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![Message::user_with_images(prompt, images)],
        )
        .max_tokens(self.config.max_output_tokens)
        .temperature(self.config.temperature);

        let call_started = Instant::now();
        let response = with_deadline(self.timeout, "gemini call", async {
            self.provider.chat(request).await.map_err(Error::from)
        })
        .await?;
        info!(elapsed_secs = call_started.elapsed().as_secs_f64(), "gemini call completed");

        if response.is_filtered() {
            return Err(Error::ResponseBlocked {
                categories: response.filtered_categories,
            });
        }

        let text = response.content.as_text();
        if text.trim().is_empty() {
            return Err(Error::EmptyResponse("gemini returned no text".to_string()));
        }

        let entry = response.usage.map(|usage| {
            let entry = CostLedgerEntry::priced(
                &self.config.model,
                &asset.id,
                &self.rubric.name,
                usage.input_tokens,
                usage.output_tokens,
            );
            info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                cost = entry.cost,
                "gemini token usage"
            );
            entry
        });
        Ok((text, entry))
    }
}

#[async_trait]
impl EvaluatorBackend for GeminiBackend {
    fn evaluator_name(&self) -> &str {
        &self.evaluator_name
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
            rubric = %self.rubric.name,
            "frames sampled"
        );

        info!(video_id = %asset.id, state = %EvaluationState::BackendInvoked, model = %self.config.model, "calling gemini");
        let (text, entry) = match self.call(asset, &frames).await {
            Ok(out) => out,
            Err(e) => {
                error!(video_id = %asset.id, state = %EvaluationState::Failed, error = %e, "gemini evaluation failed");
                return Err(e);
            }
        };

        if let Some(entry) = entry {
            record_cost(&self.ledger, entry).await;
        }

        let elapsed = started.elapsed();
        info!(
            video_id = %asset.id,
            state = %EvaluationState::Success,
            elapsed_secs = elapsed.as_secs_f64(),
            "gemini evaluation complete"
        );

        Ok(EvaluationResult::builder(asset)
            .evaluator(self.evaluator_name.clone())
            .rubric(&self.rubric.name)
            .model(&self.config.model)
            .markdown(text)
            .sampling(self.selection.strategy, frames.len())
            .extra("safety_threshold", self.config.safety_threshold.to_string())
            .elapsed(elapsed)
            .build())
    }
}

fn evaluator_name_for(model: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    if model.contains("flash") {
        "gemini-flash".to_string()
    } else if model.contains("pro") {
        "gemini-pro".to_string()
    } else {
        "gemini".to_string()
    }
}

fn build_prompt(asset: &VideoAsset, frame_count: usize, rubric: &str, transcript: &str) -> String {
    format!(
        "# Video Evaluation Task\n\n\
         VIDEO ID: {id}\n\
         DURATION: {duration} seconds\n\
         FRAMES: {frame_count} frames extracted at regular intervals\n\n\
         ## Instructions\n\n\
         You are analyzing {frame_count} frames from this video along with its transcript. These frames represent the full video at regular intervals.\n\n\
         ## EVALUATION RUBRIC\n\n\
         {rubric}\n\n\
         ---\n\n\
         ## VIDEO TRANSCRIPT\n\n\
         {transcript}\n\n\
         ---\n\n\
         ## Your Task\n\n\
         Analyze all {frame_count} frames shown above along with the transcript to provide a comprehensive evaluation following the rubric framework exactly.\n\n\
         1. Review all frames to understand the full video content\n\
         2. Analyze both visual content and transcript together\n\
         3. Provide specific examples with timestamps\n\
         4. Follow the rubric's output format requirements precisely\n\n\
         Please provide a thorough evaluation following the rubric framework.\n",
        id = asset.id,
        duration = asset.metadata.duration_seconds,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::fixtures::write_asset;
    use crate::sampler::SamplingStrategy;
    use reelcheck_models::providers::{ChatResponse, Content, StopReason, Usage};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedProvider {
        response: ChatResponse,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: ChatRequest) -> reelcheck_models::Result<ChatResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn response(text: &str, stop_reason: StopReason, usage: Option<Usage>) -> ChatResponse {
        ChatResponse {
            content: Content::text(text),
            stop_reason,
            filtered_categories: Vec::new(),
            usage,
        }
    }

    fn settings() -> RunSettings {
        RunSettings {
            rubric: Rubric::new("content_rating", "Rate the video."),
            selection: FrameSelection::new(SamplingStrategy::Even, 2),
            timeout: Duration::from_secs(30),
            timestamped_transcript: false,
        }
    }

    #[test]
    fn evaluator_names_follow_model_family() {
        assert_eq!(evaluator_name_for("models/gemini-2.5-flash"), "gemini-flash");
        assert_eq!(evaluator_name_for("gemini-1.5-pro"), "gemini-pro");
        assert_eq!(evaluator_name_for("gemini-exp"), "gemini");
    }

    #[tokio::test]
    async fn sends_prompt_then_sampled_images() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 5);
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();

        let provider = Arc::new(ScriptedProvider {
            response: response("# Verdict", StopReason::EndTurn, Some(Usage::new(1000, 200))),
            seen: Mutex::new(Vec::new()),
        });
        let ledger = CostLedger::new(dir.path().join("cost_log.jsonl"));
        let backend = GeminiBackend::with_provider(GeminiConfig::default(), settings(), provider.clone())
            .with_ledger(ledger.clone());

        let result = backend.evaluate(&asset).await.unwrap();
        assert_eq!(result.evaluator, "gemini-flash");
        assert_eq!(result.evaluation_markdown, "# Verdict");
        assert_eq!(result.metadata.frames_analyzed, 2);
        assert_eq!(result.metadata.extra["safety_threshold"], "BLOCK_NONE");

        let seen = provider.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.max_tokens, Some(16384));
        let images = request.messages[0].content.images();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].media_type, "image/jpeg");
        assert!(request.messages[0].content.as_text().contains("FRAMES: 2 frames"));

        let entries = ledger.read_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].input_tokens, 1000);
        assert!(!entries[0].estimated);
    }

    #[tokio::test]
    async fn filtered_response_is_blocked_error() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 2);
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();

        let mut blocked = response("", StopReason::ContentFiltered, None);
        blocked.filtered_categories = vec!["HARM_CATEGORY_HARASSMENT".to_string()];
        let provider = Arc::new(ScriptedProvider {
            response: blocked,
            seen: Mutex::new(Vec::new()),
        });
        let ledger = CostLedger::new(dir.path().join("cost_log.jsonl"));
        let backend = GeminiBackend::with_provider(GeminiConfig::default(), settings(), provider)
            .with_ledger(ledger.clone());

        let err = backend.evaluate(&asset).await.unwrap_err();
        assert!(matches!(err, Error::ResponseBlocked { ref categories } if categories == &["HARM_CATEGORY_HARASSMENT"]));
        assert!(ledger.read_entries().await.unwrap().is_empty());
    }

    struct StalledProvider;

    #[async_trait]
    impl ModelProvider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn chat(&self, _request: ChatRequest) -> reelcheck_models::Result<ChatResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(response("late", StopReason::EndTurn, None))
        }
    }

    #[tokio::test]
    async fn slow_provider_hits_run_timeout() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 2);
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();

        let mut settings = settings();
        settings.timeout = Duration::from_millis(200);
        let ledger = CostLedger::new(dir.path().join("cost_log.jsonl"));
        let backend =
            GeminiBackend::with_provider(GeminiConfig::default(), settings, Arc::new(StalledProvider))
                .with_ledger(ledger.clone());

        let started = Instant::now();
        let err = backend.evaluate(&asset).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ledger.read_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_frames_are_skipped_until_none_remain() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 2);
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();

        let provider = Arc::new(ScriptedProvider {
            response: response("ok", StopReason::EndTurn, None),
            seen: Mutex::new(Vec::new()),
        });
        let backend = GeminiBackend::with_provider(GeminiConfig::default(), settings(), provider)
            .with_ledger(CostLedger::new(dir.path().join("cost_log.jsonl")));

        let mut frames = asset.frames.clone();
        frames.push(dir.path().join("vid/frames/missing.jpg"));
        assert_eq!(backend.load_frames(&frames).await.unwrap().len(), 2);

        let err = backend
            .load_frames(&[dir.path().join("nope.jpg")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendInvocation(_)));
    }
}
