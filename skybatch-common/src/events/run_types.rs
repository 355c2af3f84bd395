//! Batch run type definitions
//!
//! Supporting types for run progress, per-item outcomes and the final
//! aggregate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Progress value carried by progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProgressValue {
    /// Percentage of items started (0-100)
    Percent(u8),
    /// A pacing or backoff wait is in progress; the bar should not move
    RateLimiting,
}

/// Artifact produced by the transformation service for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Where the artifact was written
    pub path: PathBuf,
    /// MIME type reported by the service
    pub mime_type: String,
    /// Number of bytes written
    pub size_bytes: u64,
    /// True when the service returned no image and the input was copied through
    #[serde(default)]
    pub passthrough: bool,
}

/// Terminal outcome of one input within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Transformed and written
    Succeeded { output_path: PathBuf },
    /// Permanent failure or retry budget exhausted
    Failed { error: String },
    /// Output already existed before the run
    Skipped { output_path: PathBuf },
}

impl ItemOutcome {
    /// Succeeded and Skipped both count as success
    pub fn is_success(&self) -> bool {
        !matches!(self, ItemOutcome::Failed { .. })
    }

    /// Output path, if any
    pub fn output_path(&self) -> Option<&Path> {
        match self {
            ItemOutcome::Succeeded { output_path } | ItemOutcome::Skipped { output_path } => {
                Some(output_path)
            }
            ItemOutcome::Failed { .. } => None,
        }
    }

    /// Error message, if failed
    pub fn error(&self) -> Option<&str> {
        match self {
            ItemOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Per-input outcomes of a run, ordered by input path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunResult {
    outcomes: BTreeMap<PathBuf, ItemOutcome>,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the outcome for an input
    pub fn record(&mut self, input: impl Into<PathBuf>, outcome: ItemOutcome) {
        self.outcomes.insert(input.into(), outcome);
    }

    pub fn get(&self, input: &Path) -> Option<&ItemOutcome> {
        self.outcomes.get(input)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &ItemOutcome)> {
        self.outcomes.iter()
    }

    /// Number of successful outcomes (Succeeded + Skipped)
    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    /// Inputs whose outcome is Failed
    pub fn failed_inputs(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Merge a later result over this one
    ///
    /// Only inputs present in `newer` are replaced; everything else is kept.
    pub fn merge(&mut self, newer: &RunResult) {
        for (input, outcome) in &newer.outcomes {
            self.outcomes.insert(input.clone(), outcome.clone());
        }
    }
}

/// Aggregate counts for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items handed to the run (pending + skipped)
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Items interrupted during a backoff or pacing wait after dispatch
    pub cancelled: usize,
    /// Items never dispatched because the run was cancelled
    pub not_started: usize,
}

impl RunSummary {
    /// Items that reached a terminal status
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.cancelled
    }

    /// Succeeded + Skipped
    pub fn successful(&self) -> usize {
        self.succeeded + self.skipped
    }
}
