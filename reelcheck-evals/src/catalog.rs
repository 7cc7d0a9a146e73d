//! Hand-off of saved evaluations to a catalog.
//!
//! The orchestrator calls [`EvaluationCatalog::record`] after an artifact
//! is written. Each (video, rubric) pair gets an increasing version number.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::result::EvaluationResult;
use crate::{Error, Result};

/// Catalog status of a saved evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Completed,
    /// Saved, but one or more batches failed.
    Degraded,
}

impl EvaluationStatus {
    pub fn for_result(result: &EvaluationResult) -> Self {
        if result.is_degraded() {
            Self::Degraded
        } else {
            Self::Completed
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Degraded => "degraded",
        })
    }
}

/// Downstream record of saved evaluations.
#[async_trait]
pub trait EvaluationCatalog: Send + Sync {
    /// Record a saved artifact and return its version for this video and
    /// rubric, starting at 1.
    async fn record(
        &self,
        result: &EvaluationResult,
        artifact: &Path,
        status: EvaluationStatus,
    ) -> Result<u32>;
}

/// Catalog kept in memory. Versions reset when dropped.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    versions: Mutex<HashMap<(String, String), u32>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvaluationCatalog for InMemoryCatalog {
    async fn record(
        &self,
        result: &EvaluationResult,
        _artifact: &Path,
        _status: EvaluationStatus,
    ) -> Result<u32> {
        let mut versions = self.versions.lock().await;
        let version = versions
            .entry((result.video_id.clone(), result.rubric.clone()))
            .or_insert(0);
        *version += 1;
        Ok(*version)
    }
}

/// One line of a [`JsonlCatalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub video_id: String,
    pub rubric: String,
    pub evaluator: String,
    pub model: String,
    pub version: u32,
    pub status: EvaluationStatus,
    pub artifact: PathBuf,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only catalog file, one JSON object per line.
#[derive(Debug)]
pub struct JsonlCatalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn entries(&self) -> Result<Vec<CatalogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "skipping malformed catalog line");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl EvaluationCatalog for JsonlCatalog {
    async fn record(
        &self,
        result: &EvaluationResult,
        artifact: &Path,
        status: EvaluationStatus,
    ) -> Result<u32> {
        let _guard = self.lock.lock().await;

        let version = self
            .entries()
            .await?
            .iter()
            .filter(|e| e.video_id == result.video_id && e.rubric == result.rubric)
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
            + 1;

        let entry = CatalogEntry {
            video_id: result.video_id.clone(),
            rubric: result.rubric.clone(),
            evaluator: result.evaluator.clone(),
            model: result.model.clone(),
            version,
            status,
            artifact: artifact.to_path_buf(),
            recorded_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Catalog(format!("cannot open {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(video_id = %entry.video_id, rubric = %entry.rubric, version, %status, "recorded evaluation");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::VideoAsset;
    use crate::asset::fixtures::write_asset;
    use tempfile::TempDir;

    async fn result(dir: &TempDir, rubric: &str) -> EvaluationResult {
        write_asset(dir.path(), "vid", 2);
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();
        EvaluationResult::builder(&asset)
            .evaluator("gemini-flash")
            .rubric(rubric)
            .model("models/gemini-2.5-flash")
            .markdown("ok")
            .build()
    }

    #[tokio::test]
    async fn in_memory_versions_count_per_rubric() {
        let dir = TempDir::new().unwrap();
        let catalog = InMemoryCatalog::new();
        let a = result(&dir, "safety").await;
        let b = result(&dir, "quality").await;
        let path = Path::new("x.json");

        assert_eq!(catalog.record(&a, path, EvaluationStatus::Completed).await.unwrap(), 1);
        assert_eq!(catalog.record(&a, path, EvaluationStatus::Completed).await.unwrap(), 2);
        assert_eq!(catalog.record(&b, path, EvaluationStatus::Completed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn jsonl_catalog_persists_versions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.jsonl");
        let res = result(&dir, "safety").await;

        let catalog = JsonlCatalog::new(&path);
        assert_eq!(
            catalog.record(&res, Path::new("a.json"), EvaluationStatus::Completed).await.unwrap(),
            1
        );

        let reopened = JsonlCatalog::new(&path);
        assert_eq!(
            reopened.record(&res, Path::new("b.json"), EvaluationStatus::Degraded).await.unwrap(),
            2
        );

        let entries = reopened.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].status, EvaluationStatus::Degraded);
        assert_eq!(entries[1].artifact, PathBuf::from("b.json"));
    }

    #[tokio::test]
    async fn status_follows_failed_batches() {
        let dir = TempDir::new().unwrap();
        let res = result(&dir, "safety").await;
        assert_eq!(EvaluationStatus::for_result(&res), EvaluationStatus::Completed);
    }
}
