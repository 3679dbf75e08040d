use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ErrorKind, ItemError};

/// One source object scheduled for conversion. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionTask {
    pub source_key: String,
    pub destination_key: String,
    pub quality: u8,
    pub delete_original: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The WebP output was already present at the destination key.
    AlreadyExists,
    /// Early termination was requested before the task started.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum ConversionOutcome {
    Converted,
    /// Dry run: nothing was fetched, written or deleted.
    Previewed,
    Skipped(SkipReason),
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub source_key: String,
    pub destination_key: String,
    pub outcome: ConversionOutcome,
    pub success: bool,
    pub original_size_bytes: u64,
    pub webp_size_bytes: u64,
    pub compression_ratio: Option<f64>,
    pub error: Option<ItemError>,
    /// Secondary problem on an otherwise successful conversion (failed delete).
    pub warning: Option<String>,
    pub duration_millis: u64,
}

/// Percentage of bytes saved; undefined for empty sources.
pub fn compression_ratio(original: u64, webp: u64) -> Option<f64> {
    if original == 0 {
        return None;
    }
    Some((1.0 - webp as f64 / original as f64) * 100.0)
}

impl ConversionResult {
    fn base(task: &ConversionTask, outcome: ConversionOutcome, duration_millis: u64) -> Self {
        Self {
            source_key: task.source_key.clone(),
            destination_key: task.destination_key.clone(),
            outcome,
            success: matches!(
                outcome,
                ConversionOutcome::Converted | ConversionOutcome::Previewed
            ),
            original_size_bytes: 0,
            webp_size_bytes: 0,
            compression_ratio: None,
            error: None,
            warning: None,
            duration_millis,
        }
    }

    pub fn converted(
        task: &ConversionTask,
        original_size_bytes: u64,
        webp_size_bytes: u64,
        duration_millis: u64,
    ) -> Self {
        Self {
            original_size_bytes,
            webp_size_bytes,
            compression_ratio: compression_ratio(original_size_bytes, webp_size_bytes),
            ..Self::base(task, ConversionOutcome::Converted, duration_millis)
        }
    }

    pub fn previewed(task: &ConversionTask) -> Self {
        Self::base(task, ConversionOutcome::Previewed, 0)
    }

    pub fn skipped(task: &ConversionTask, reason: SkipReason, duration_millis: u64) -> Self {
        Self::base(task, ConversionOutcome::Skipped(reason), duration_millis)
    }

    pub fn failed(task: &ConversionTask, error: ItemError, duration_millis: u64) -> Self {
        Self {
            error: Some(error),
            ..Self::base(task, ConversionOutcome::Failed, duration_millis)
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, ConversionOutcome::Skipped(_))
    }
}

/// Running totals. `attempted == successful + failed + skipped` at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub attempted: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total_original_bytes: u64,
    pub total_webp_bytes: u64,
}

impl BatchStats {
    pub fn compression_ratio(&self) -> Option<f64> {
        compression_ratio(self.total_original_bytes, self.total_webp_bytes)
    }

    pub fn saved_bytes(&self) -> i64 {
        self.total_original_bytes as i64 - self.total_webp_bytes as i64
    }
}

/// Final snapshot handed back by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub stats: BatchStats,
    /// In task dispatch order.
    pub results: Vec<ConversionResult>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ConversionReport {
    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == ConversionOutcome::Failed)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
