//! Session result aggregation
//!
//! Keeps the latest outcome per input across scans and runs, so a retry
//! over the failed subset only replaces what it actually resolved.

use crate::models::RunReport;
use crate::services::file_scanner::ScanResult;
use skybatch_common::events::{ItemOutcome, RunResult, RunSummary};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Outcomes accumulated over one working session
#[derive(Debug, Clone, Default)]
pub struct BatchSession {
    results: RunResult,
    /// Inputs known from discovery that no run has resolved yet
    pending: BTreeSet<PathBuf>,
    runs: usize,
}

impl BatchSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session seeded from a discovery result
    pub fn from_scan(scan: &ScanResult) -> Self {
        let mut session = Self::new();
        session.seed(scan);
        session
    }

    /// Add a scan: already-processed inputs become Skipped, pending inputs
    /// are remembered until a run resolves them
    pub fn seed(&mut self, scan: &ScanResult) {
        for (input, output) in &scan.already_processed {
            self.results.record(input, ItemOutcome::Skipped { output_path: output.clone() });
            self.pending.remove(input);
        }
        for input in &scan.pending {
            if self.results.get(input).is_none() {
                self.pending.insert(input.clone());
            }
        }
    }

    /// Merge a finished run; only inputs the run resolved are overwritten
    pub fn absorb(&mut self, report: &RunReport) {
        for (input, _) in report.results.iter() {
            self.pending.remove(input);
        }
        self.results.merge(&report.results);
        self.runs += 1;

        tracing::debug!(
            run_id = %report.run_id,
            resolved = report.results.len(),
            known = self.results.len(),
            "Run absorbed into session"
        );
    }

    pub fn results(&self) -> &RunResult {
        &self.results
    }

    pub fn outcome(&self, input: &Path) -> Option<&ItemOutcome> {
        self.results.get(input)
    }

    /// Inputs whose latest outcome is a failure
    pub fn failed_inputs(&self) -> Vec<PathBuf> {
        self.results.failed_inputs()
    }

    /// Inputs whose latest outcome is Succeeded or Skipped
    pub fn succeeded_inputs(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Discovered inputs not yet resolved by any run
    pub fn pending_inputs(&self) -> Vec<PathBuf> {
        self.pending.iter().cloned().collect()
    }

    pub fn runs_absorbed(&self) -> usize {
        self.runs
    }

    /// Counts over the latest outcomes; unresolved discoveries count as not started
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.results.len() + self.pending.len(),
            not_started: self.pending.len(),
            ..Default::default()
        };

        for (_, outcome) in self.results.iter() {
            match outcome {
                ItemOutcome::Succeeded { .. } => summary.succeeded += 1,
                ItemOutcome::Failed { .. } => summary.failed += 1,
                ItemOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{summarize, WorkItem};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn report(results: RunResult) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            items: Vec::<WorkItem>::new(),
            summary: summarize(&[]),
            results,
            cancelled: false,
        }
    }

    fn scan() -> ScanResult {
        let mut already_processed = BTreeMap::new();
        already_processed.insert(PathBuf::from("/p/done.jpg"), PathBuf::from("/p/done_gemini.jpg"));
        ScanResult {
            pending: vec![PathBuf::from("/p/a.jpg"), PathBuf::from("/p/b.jpg")],
            already_processed,
            ..Default::default()
        }
    }

    #[test]
    fn test_seed_from_scan() {
        let session = BatchSession::from_scan(&scan());

        assert!(matches!(
            session.outcome(Path::new("/p/done.jpg")),
            Some(ItemOutcome::Skipped { .. })
        ));
        assert_eq!(session.pending_inputs().len(), 2);
        let summary = session.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.not_started, 2);
    }

    #[test]
    fn test_retry_overwrites_only_resolved_inputs() {
        let mut session = BatchSession::from_scan(&scan());

        let mut first = RunResult::new();
        first.record("/p/a.jpg", ItemOutcome::Succeeded { output_path: "/o/a_gemini.jpg".into() });
        first.record("/p/b.jpg", ItemOutcome::Failed { error: "Failed to process b.jpg: boom".into() });
        session.absorb(&report(first));
        assert_eq!(session.failed_inputs(), vec![PathBuf::from("/p/b.jpg")]);

        let mut second = RunResult::new();
        second.record("/p/b.jpg", ItemOutcome::Succeeded { output_path: "/o/b_gemini.jpg".into() });
        session.absorb(&report(second));

        assert!(session.failed_inputs().is_empty());
        assert_eq!(session.succeeded_inputs().len(), 3);
        assert!(matches!(
            session.outcome(Path::new("/p/a.jpg")),
            Some(ItemOutcome::Succeeded { .. })
        ));
        assert_eq!(session.runs_absorbed(), 2);
        assert_eq!(session.summary().not_started, 0);
    }
}
