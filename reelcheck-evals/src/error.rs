//! Error taxonomy for video evaluation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for evaluation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, evaluating, or persisting.
#[derive(Debug, Error)]
pub enum Error {
    /// A required file or directory of the video asset is missing.
    #[error("video asset {video_id}: missing {}", .missing.display())]
    AssetNotFound { video_id: String, missing: PathBuf },

    /// The asset exists but a required file could not be parsed.
    #[error("invalid video asset {video_id}: {reason}")]
    InvalidAsset { video_id: String, reason: String },

    /// The external model tool is absent or not responding.
    #[error("tool unavailable: {tool}: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// The requested backend cannot be used on this host.
    #[error("backend unavailable: {backend}: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The backend call failed or returned something unusable.
    #[error("backend invocation failed: {0}")]
    BackendInvocation(String),

    /// The provider asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The backend call did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The provider's content filter withheld the response.
    #[error("response blocked by safety filter (categories: {})", format_categories(.categories))]
    ResponseBlocked { categories: Vec<String> },

    /// The provider returned no text and did not report a block.
    #[error("empty response from {0}")]
    EmptyResponse(String),

    /// One batch of the local pipeline failed. Converted to a placeholder
    /// by the pipeline and never returned from `evaluate`.
    #[error("batch {batch} analysis failed: {reason}")]
    BatchAnalysis { batch: usize, reason: String },

    /// The synthesis pass of the local pipeline failed.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Unknown frame sampling strategy token.
    #[error("invalid sampling strategy: {0} (expected even, all, first_n, or last_n)")]
    InvalidStrategy(String),

    /// A transient failure persisted through every retry.
    #[error("evaluation failed after {attempts} attempts: retries exhausted (last error: {last})")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// Rubric text could not be resolved.
    #[error("rubric error: {0}")]
    Rubric(String),

    /// Downstream catalog rejected a record.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_categories(categories: &[String]) -> String {
    if categories.is_empty() {
        "unspecified".to_string()
    } else {
        categories.join(", ")
    }
}

impl Error {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Timeout(_))
    }
}

impl From<reelcheck_models::Error> for Error {
    fn from(err: reelcheck_models::Error) -> Self {
        use reelcheck_models::Error as ModelError;
        match err {
            ModelError::RateLimited(msg) => Error::RateLimited(msg),
            ModelError::Timeout(msg) => Error::Timeout(msg),
            ModelError::CredentialsNotFound(provider) => Error::BackendUnavailable {
                backend: provider,
                reason: "no API key configured".to_string(),
            },
            other => Error::BackendInvocation(other.to_string()),
        }
    }
}
