//! Cost accounting: price table, cost calculation, and the append-only ledger.
//!
//! The ledger is newline-delimited JSON, one entry per evaluation call.
//! Lines are only ever appended; nothing rewrites the file in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use reelcheck_models::Pricing;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::Result;

/// Price per million tokens, keyed by model identifier.
pub const PRICING: &[(&str, Pricing)] = &[
    ("claude-sonnet-4-20250514", Pricing::new(3.0, 15.0)),
    ("claude-opus-4-5-20251101", Pricing::new(15.0, 75.0)),
    ("claude-3-5-sonnet-20241022", Pricing::new(3.0, 15.0)),
    ("claude-3-haiku-20240307", Pricing::new(0.25, 1.25)),
    ("models/gemini-2.5-flash", Pricing::new(0.075, 0.30)),
    ("models/gemini-2.5-pro", Pricing::new(1.25, 5.00)),
    ("ollama", Pricing::FREE),
];

/// Find pricing for a model.
///
/// Exact match first, then a substring match in either direction so minor
/// variants (`gemini-2.5-flash` vs `models/gemini-2.5-flash`) still resolve.
pub fn pricing_for(model: &str) -> Option<Pricing> {
    if model.is_empty() {
        return None;
    }
    PRICING
        .iter()
        .find(|(key, _)| *key == model)
        .or_else(|| {
            PRICING
                .iter()
                .find(|(key, _)| model.contains(key) || key.contains(model))
        })
        .map(|(_, pricing)| *pricing)
}

/// Cost in USD for a call. Unknown models cost zero.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match pricing_for(model) {
        Some(pricing) => pricing.calculate(input_tokens, output_tokens),
        None => {
            debug!(model, "no pricing for model, recording zero cost");
            0.0
        }
    }
}

/// Whether a ledger model string refers to `model`, using the same alias rule
/// as [`pricing_for`].
pub fn model_matches(entry_model: &str, model: &str) -> bool {
    entry_model == model
        || (!model.is_empty()
            && !entry_model.is_empty()
            && (entry_model.contains(model) || model.contains(entry_model)))
}

/// Rough token count for text that was never tokenized by the provider.
///
/// Four characters per token. English prose usually lands within about 25%
/// of the real count; code, non-Latin scripts, and file paths drift further.
/// Anything derived from this must be shown as an estimate.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// One line of the cost ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub model: String,
    pub video_id: String,
    pub rubric: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    /// Offset-less timestamps written by older tools are read as UTC.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Token counts came from [`estimate_tokens`] rather than the provider.
    #[serde(default)]
    pub estimated: bool,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// RFC 3339 first, then naive ISO-8601 with either a `T` or space separator.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl CostLedgerEntry {
    /// Build an entry, pricing it through the table.
    pub fn priced(
        model: impl Into<String>,
        video_id: impl Into<String>,
        rubric: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        let model = model.into();
        let cost = round4(calculate_cost(&model, input_tokens, output_tokens));
        Self {
            model,
            video_id: video_id.into(),
            rubric: rubric.into(),
            input_tokens,
            output_tokens,
            cost,
            timestamp: Utc::now(),
            estimated: false,
        }
    }

    /// Mark the token counts as heuristic.
    pub fn estimated(mut self) -> Self {
        self.estimated = true;
        self
    }
}

/// Totals over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostTotals {
    pub total: f64,
    pub by_model: BTreeMap<String, f64>,
}

/// Per-model aggregate for reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelCost {
    pub count: usize,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// At least one entry used estimated token counts.
    pub estimated: bool,
}

/// Per-video aggregate for reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoCost {
    pub count: usize,
    pub cost: f64,
}

/// Everything the cost report shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_evaluations: usize,
    pub by_model: BTreeMap<String, ModelCost>,
    pub by_video: BTreeMap<String, VideoCost>,
    /// Most recent entries, newest first.
    pub recent: Vec<CostLedgerEntry>,
}

/// Fold entries into totals. Pure.
pub fn total_cost(entries: &[CostLedgerEntry]) -> CostTotals {
    let mut totals = CostTotals::default();
    for entry in entries {
        totals.total += entry.cost;
        *totals.by_model.entry(entry.model.clone()).or_default() += entry.cost;
    }
    totals.total = round4(totals.total);
    for cost in totals.by_model.values_mut() {
        *cost = round4(*cost);
    }
    totals
}

/// Total cost of entries that refer to `model`, exactly or by alias.
pub fn cost_for_model(entries: &[CostLedgerEntry], model: &str) -> f64 {
    round4(
        entries
            .iter()
            .filter(|e| model_matches(&e.model, model))
            .map(|e| e.cost)
            .sum(),
    )
}

/// Build a report summary. Pure.
pub fn summarize(entries: &[CostLedgerEntry], recent: usize) -> CostSummary {
    let mut summary = CostSummary {
        total_cost: total_cost(entries).total,
        total_evaluations: entries.len(),
        ..Default::default()
    };

    for entry in entries {
        let model = summary.by_model.entry(entry.model.clone()).or_default();
        model.count += 1;
        model.cost += entry.cost;
        model.input_tokens += entry.input_tokens;
        model.output_tokens += entry.output_tokens;
        model.estimated |= entry.estimated;

        let video = summary.by_video.entry(entry.video_id.clone()).or_default();
        video.count += 1;
        video.cost += entry.cost;
    }
    for model in summary.by_model.values_mut() {
        model.cost = round4(model.cost);
    }
    for video in summary.by_video.values_mut() {
        video.cost = round4(video.cost);
    }

    let mut newest: Vec<_> = entries.to_vec();
    newest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    newest.truncate(recent);
    summary.recent = newest;
    summary
}

/// Handle to an append-only cost ledger file.
///
/// Writers do not lock the file. Each entry is written with a single
/// append-mode write, which keeps concurrent line-sized appends intact on
/// local filesystems.
#[derive(Debug, Clone)]
pub struct CostLedger {
    path: PathBuf,
}

impl CostLedger {
    /// Ledger at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger at the default data-directory location.
    pub fn default_location() -> Self {
        Self::new(reelcheck_paths::cost_ledger_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, creating parent directories as needed.
    pub async fn append(&self, entry: &CostLedgerEntry) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            path = %self.path.display(),
            model = %entry.model,
            cost = entry.cost,
            "appended cost ledger entry"
        );
        Ok(())
    }

    /// Read every well-formed entry. A missing ledger reads as empty.
    ///
    /// Lines that fail to parse are skipped with a warning so one corrupted
    /// write cannot hide the rest of the history.
    pub async fn read_entries(&self) -> Result<Vec<CostLedgerEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CostLedgerEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping malformed cost ledger line"
                ),
            }
        }
        Ok(entries)
    }

    /// Total cost overall and per model.
    pub async fn total_cost(&self) -> Result<CostTotals> {
        Ok(total_cost(&self.read_entries().await?))
    }

    /// Report summary with the `recent` newest entries.
    pub async fn summary(&self, recent: usize) -> Result<CostSummary> {
        Ok(summarize(&self.read_entries().await?, recent))
    }
}
