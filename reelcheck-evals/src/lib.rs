//! Video evaluation orchestration.
//!
//! Runs an extracted video asset (frames, transcript, metadata) through one
//! of several model backends against a text rubric and writes a JSON
//! evaluation artifact plus a cost ledger entry.
//!
//! # Architecture
//!
//! ```text
//! EvaluationRequest ──► Evaluator::connect ──► EvaluationOrchestrator::run
//!                                                   │
//!                 load_video_data ◄─────────────────┤
//!                 evaluate_with_retry ◄─────────────┤
//!                   └─ sample frames → backend call │
//!                      → CostLedger::append         │
//!                 save_evaluation ◄─────────────────┤
//!                 EvaluationCatalog::record ◄───────┘
//! ```
//!
//! - [`sampler`] reduces frames to a bounded subset
//! - [`cost`] holds the price table and the append-only ledger
//! - [`backend`] defines [`EvaluatorBackend`] and the three backends
//! - [`orchestrator`] adds retry and persistence around a backend

pub mod asset;
pub mod backend;
pub mod catalog;
pub mod cost;
mod error;
pub mod orchestrator;
pub mod request;
pub mod result;
pub mod rubric;
pub mod sampler;

pub use error::{Error, Result};

pub use asset::{Transcript, TranscriptSegment, VideoAsset, VideoMetadata};
pub use backend::{
    Availability, BackendRegistry, BatchOutcome, ClaudeCliBackend, EvaluationState, Evaluator,
    EvaluatorBackend, GeminiBackend, OllamaBackend, PartialBatchAnalysis, ProbeOptions,
};
pub use catalog::{EvaluationCatalog, EvaluationStatus, InMemoryCatalog, JsonlCatalog};
pub use cost::{CostLedger, CostLedgerEntry, CostSummary, calculate_cost, pricing_for};
pub use orchestrator::{EvaluationOrchestrator, EvaluationRun, RetryPolicy, evaluate_with_retry};
pub use request::{
    BackendConfig, BackendKind, ClaudeCliConfig, EvaluationRequest, GeminiConfig, OllamaConfig,
    RunSettings,
};
pub use result::{EvaluationResult, write_artifact};
pub use rubric::{FileRubric, InlineRubric, Rubric, RubricBuilder, RubricCatalog};
pub use sampler::{FrameSelection, SamplingStrategy, sample};
