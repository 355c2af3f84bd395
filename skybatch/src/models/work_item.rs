//! Work item state
//!
//! A work item is one input image plus its processing state within a run.
//! Items are owned by the orchestrator while a run is active; consumers see
//! cloned snapshots in the run report.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Work item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for its turn
    Queued,
    /// External call in flight
    Dispatched,
    /// Waiting on the pacing interval
    RateLimited,
    /// Waiting out a backoff after a transient error
    Retrying,
    /// Output written
    Succeeded,
    /// Permanent failure or retry budget exhausted
    Failed,
    /// Output already existed
    Skipped,
    /// Interrupted after dispatch by a cancellation
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Succeeded | ItemStatus::Failed | ItemStatus::Skipped | ItemStatus::Cancelled
        )
    }
}

/// One input and its processing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    input_path: PathBuf,
    pub status: ItemStatus,
    /// Transient errors seen for this item in the current run
    pub attempt: u32,
    pub output_path: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl WorkItem {
    /// New queued item
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            status: ItemStatus::Queued,
            attempt: 0,
            output_path: None,
            last_error: None,
        }
    }

    /// Item whose output already exists
    pub fn skipped(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            status: ItemStatus::Skipped,
            attempt: 0,
            output_path: Some(output_path.into()),
            last_error: None,
        }
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// Reset per-run counters before the first attempt
    pub fn begin(&mut self) {
        self.attempt = 0;
        self.last_error = None;
    }

    pub fn mark_rate_limited(&mut self) {
        self.transition_to(ItemStatus::RateLimited);
    }

    pub fn mark_dispatched(&mut self) {
        self.transition_to(ItemStatus::Dispatched);
    }

    pub fn mark_retrying(&mut self, attempt: u32, error: impl Into<String>) {
        self.attempt = attempt;
        self.last_error = Some(error.into());
        self.transition_to(ItemStatus::Retrying);
    }

    pub fn mark_succeeded(&mut self, output_path: impl Into<PathBuf>) {
        self.output_path = Some(output_path.into());
        self.transition_to(ItemStatus::Succeeded);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.transition_to(ItemStatus::Failed);
    }

    pub fn mark_cancelled(&mut self) {
        self.transition_to(ItemStatus::Cancelled);
    }

    /// Return a waiting item to the queue (run aborted before its first dispatch)
    pub fn requeue(&mut self) {
        self.transition_to(ItemStatus::Queued);
    }

    /// Terminal statuses are final for the run
    fn transition_to(&mut self, status: ItemStatus) {
        if self.status.is_terminal() {
            tracing::warn!(
                file = %self.input_path.display(),
                from = ?self.status,
                to = ?status,
                "Ignoring transition out of terminal status"
            );
            return;
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_queued() {
        let item = WorkItem::new("/in/a.jpg");
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.attempt, 0);
        assert!(item.output_path.is_none());
    }

    #[test]
    fn test_retry_then_success() {
        let mut item = WorkItem::new("/in/a.jpg");
        item.begin();
        item.mark_dispatched();
        item.mark_retrying(1, "429 Too Many Requests");
        assert_eq!(item.status, ItemStatus::Retrying);
        item.mark_dispatched();
        item.mark_succeeded("/out/a_gemini.jpg");

        assert_eq!(item.status, ItemStatus::Succeeded);
        assert_eq!(item.attempt, 1);
        assert_eq!(item.output_path, Some(PathBuf::from("/out/a_gemini.jpg")));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut item = WorkItem::new("/in/a.jpg");
        item.mark_dispatched();
        item.mark_failed("bad request");
        item.mark_succeeded("/out/a_gemini.jpg");
        assert_eq!(item.status, ItemStatus::Failed);

        let mut skipped = WorkItem::skipped("/in/b.jpg", "/in/b_gemini.jpg");
        skipped.mark_dispatched();
        assert_eq!(skipped.status, ItemStatus::Skipped);
    }

    #[test]
    fn test_begin_resets_attempt() {
        let mut item = WorkItem::new("/in/a.jpg");
        item.mark_retrying(2, "quota exceeded");
        item.requeue();
        item.begin();
        assert_eq!(item.attempt, 0);
        assert!(item.last_error.is_none());
    }
}
