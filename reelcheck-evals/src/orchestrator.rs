//! Retry wrapper and the load → evaluate → save pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::asset::VideoAsset;
use crate::backend::{Evaluator, EvaluatorBackend};
use crate::catalog::{EvaluationCatalog, EvaluationStatus};
use crate::result::EvaluationResult;
use crate::{Error, Result};

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(5))
    }
}

/// Run `backend.evaluate`, retrying rate limits and timeouts.
///
/// Any other error is returned after the first attempt. When every attempt
/// fails transiently the result is [`Error::RetriesExhausted`] carrying the
/// last failure.
pub async fn evaluate_with_retry<B>(
    backend: &B,
    asset: &VideoAsset,
    policy: &RetryPolicy,
) -> Result<EvaluationResult>
where
    B: EvaluatorBackend + ?Sized,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        match backend.evaluate(asset).await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                warn!(
                    video_id = %asset.id,
                    attempt,
                    max_attempts,
                    delay_secs = policy.delay.as_secs_f64(),
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

/// Output of one orchestrated evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    pub result: EvaluationResult,
    pub artifact: PathBuf,
    /// Catalog version, when a catalog is configured and accepted the record.
    pub version: Option<u32>,
    pub status: EvaluationStatus,
}

/// Drives one backend over video assets stored under `videos_root`.
pub struct EvaluationOrchestrator<B: EvaluatorBackend = Evaluator> {
    backend: B,
    videos_root: PathBuf,
    retry: RetryPolicy,
    catalog: Option<Arc<dyn EvaluationCatalog>>,
}

impl<B: EvaluatorBackend> EvaluationOrchestrator<B> {
    pub fn new(backend: B, videos_root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            videos_root: videos_root.into(),
            retry: RetryPolicy::default(),
            catalog: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn EvaluationCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn videos_root(&self) -> &Path {
        &self.videos_root
    }

    /// Load the asset, evaluate it with retry, and save the artifact.
    ///
    /// Nothing is written when evaluation fails.
    pub async fn run(&self, video_id: &str) -> Result<EvaluationRun> {
        let asset = self
            .backend
            .load_video_data(video_id, &self.videos_root)
            .await?;
        info!(
            video_id,
            evaluator = self.backend.evaluator_name(),
            model = self.backend.model_name(),
            rubric = %self.backend.rubric().name,
            frames = asset.frames.len(),
            "starting evaluation"
        );

        let result = evaluate_with_retry(&self.backend, &asset, &self.retry).await?;
        let artifact = self
            .backend
            .save_evaluation(&result, &asset.evaluations_dir())
            .await?;
        let status = EvaluationStatus::for_result(&result);

        let version = match &self.catalog {
            Some(catalog) => match catalog.record(&result, &artifact, status).await {
                Ok(version) => Some(version),
                Err(e) => {
                    warn!(video_id, error = %e, "failed to record evaluation in catalog");
                    None
                }
            },
            None => None,
        };

        Ok(EvaluationRun {
            result,
            artifact,
            version,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::fixtures::write_asset;
    use crate::catalog::InMemoryCatalog;
    use crate::rubric::Rubric;
    use crate::sampler::{FrameSelection, SamplingStrategy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Fails with the scripted errors in order, then succeeds.
    struct FlakyBackend {
        rubric: Rubric,
        failures: std::sync::Mutex<Vec<Error>>,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: Vec<Error>) -> Self {
            Self {
                rubric: Rubric::new("safety", "rate it"),
                failures: std::sync::Mutex::new(failures),
                calls: AtomicU32::new(0),
            }
        }

        fn always(make: fn() -> Error, times: usize) -> Self {
            Self::new((0..times).map(|_| make()).collect())
        }
    }

    #[async_trait]
    impl EvaluatorBackend for FlakyBackend {
        fn evaluator_name(&self) -> &str {
            "flaky"
        }

        fn model_name(&self) -> &str {
            "flaky-1"
        }

        fn rubric(&self) -> &Rubric {
            &self.rubric
        }

        fn frame_selection(&self) -> FrameSelection {
            FrameSelection::new(SamplingStrategy::Even, 10)
        }

        async fn evaluate(&self, asset: &VideoAsset) -> Result<EvaluationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut failures = self.failures.lock().unwrap();
                if failures.is_empty() { None } else { Some(failures.remove(0)) }
            };
            match next {
                Some(e) => Err(e),
                None => Ok(EvaluationResult::builder(asset)
                    .evaluator("flaky")
                    .rubric("safety")
                    .model("flaky-1")
                    .markdown("# Fine")
                    .sampling(SamplingStrategy::Even, asset.frames.len())
                    .build()),
            }
        }
    }

    async fn asset(dir: &TempDir) -> VideoAsset {
        write_asset(dir.path(), "vid", 3);
        VideoAsset::load("vid", dir.path()).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rate_limit_makes_three_attempts() {
        let dir = TempDir::new().unwrap();
        let asset = asset(&dir).await;
        let backend = FlakyBackend::always(|| Error::RateLimited("429".into()), 10);

        let err = evaluate_with_retry(&backend, &asset, &RetryPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::RateLimited(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let dir = TempDir::new().unwrap();
        let asset = asset(&dir).await;
        let backend = FlakyBackend::new(vec![Error::Timeout("slow".into())]);

        let started = tokio::time::Instant::now();
        let result = evaluate_with_retry(&backend, &asset, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(result.evaluation_markdown, "# Fine");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let asset = asset(&dir).await;
        let backend = FlakyBackend::new(vec![Error::ResponseBlocked {
            categories: vec!["HARM_CATEGORY_HARASSMENT".into()],
        }]);

        let err = evaluate_with_retry(&backend, &asset, &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResponseBlocked { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_saves_artifact_and_records_version() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 3);
        let catalog = Arc::new(InMemoryCatalog::new());
        let orchestrator = EvaluationOrchestrator::new(FlakyBackend::new(Vec::new()), dir.path())
            .with_catalog(catalog);

        let run = orchestrator.run("vid").await.unwrap();
        assert!(run.artifact.starts_with(dir.path().join("vid/evaluations")));
        assert!(run.artifact.exists());
        assert_eq!(run.version, Some(1));
        assert_eq!(run.status, EvaluationStatus::Completed);

        let second = orchestrator.run("vid").await.unwrap();
        assert_eq!(second.version, Some(2));
    }

    #[tokio::test]
    async fn failed_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 3);
        let orchestrator = EvaluationOrchestrator::new(
            FlakyBackend::new(vec![Error::EmptyResponse("nothing".into())]),
            dir.path(),
        );

        assert!(orchestrator.run("vid").await.is_err());
        assert!(!dir.path().join("vid/evaluations").exists());
    }

    #[tokio::test]
    async fn missing_asset_fails_before_evaluate() {
        let dir = TempDir::new().unwrap();
        let backend = FlakyBackend::new(Vec::new());
        let orchestrator = EvaluationOrchestrator::new(backend, dir.path());

        let err = orchestrator.run("ghost").await.unwrap_err();
        assert!(matches!(err, Error::AssetNotFound { .. }));
        assert_eq!(orchestrator.backend().calls.load(Ordering::SeqCst), 0);
    }
}
