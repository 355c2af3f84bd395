//! Run request and report

use crate::models::{ItemStatus, WorkItem};
use crate::services::result_path::OutputDirPolicy;
use crate::services::transformer::RequestParameters;
use serde::Serialize;
use skybatch_common::events::{RunResult, RunSummary};
use skybatch_common::RateTier;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Input to one orchestrator run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Inputs to process, in dispatch order
    pub inputs: Vec<PathBuf>,
    /// Inputs whose output already exists (input → output); never dispatched
    pub skipped: BTreeMap<PathBuf, PathBuf>,
    pub output_policy: OutputDirPolicy,
    /// Passed through to the transformer untouched
    pub params: RequestParameters,
    pub tier: RateTier,
}

impl RunRequest {
    pub fn new(
        inputs: Vec<PathBuf>,
        output_policy: OutputDirPolicy,
        params: RequestParameters,
        tier: RateTier,
    ) -> Self {
        Self {
            inputs,
            skipped: BTreeMap::new(),
            output_policy,
            params,
            tier,
        }
    }

    /// Attach already-processed inputs from discovery
    pub fn with_skipped(mut self, skipped: BTreeMap<PathBuf, PathBuf>) -> Self {
        self.skipped = skipped;
        self
    }
}

/// Final state of one orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Item snapshots, skipped items first, then inputs in dispatch order
    pub items: Vec<WorkItem>,
    pub results: RunResult,
    pub summary: RunSummary,
    pub cancelled: bool,
}

impl RunReport {
    pub fn item(&self, input: &Path) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.input_path() == input)
    }
}

/// Count item statuses into a run summary
pub fn summarize(items: &[WorkItem]) -> RunSummary {
    let mut summary = RunSummary {
        total: items.len(),
        ..Default::default()
    };

    for item in items {
        match item.status {
            ItemStatus::Succeeded => summary.succeeded += 1,
            ItemStatus::Failed => summary.failed += 1,
            ItemStatus::Skipped => summary.skipped += 1,
            ItemStatus::Cancelled => summary.cancelled += 1,
            ItemStatus::Queued
            | ItemStatus::Dispatched
            | ItemStatus::RateLimited
            | ItemStatus::Retrying => summary.not_started += 1,
        }
    }

    summary
}
