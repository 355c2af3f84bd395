//! Event types for the skybatch event system
//!
//! Provides shared event definitions and the EventBus. Discovery and the
//! orchestrator publish; any consumer (CLI printer, logger, test harness)
//! subscribes.

mod run_types;

pub use run_types::{Artifact, ItemOutcome, ProgressValue, RunResult, RunSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

/// skybatch event types
///
/// Events are broadcast via EventBus and serialize as tagged JSON objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchEvent {
    /// Discovery finished (or was cancelled) and produced its pending list
    FilesFound {
        scan_id: Uuid,
        pending: Vec<PathBuf>,
        /// True when the walk was cut short; `pending` is partial
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },

    /// Discovery completed; total = pending + already processed
    ScanFinished {
        scan_id: Uuid,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Run progress update
    Progress {
        run_id: Uuid,
        value: ProgressValue,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// One item transformed and written
    ItemCompleted {
        run_id: Uuid,
        input_path: PathBuf,
        output_path: PathBuf,
        artifact: Artifact,
        timestamp: DateTime<Utc>,
    },

    /// One item failed permanently
    ItemFailed {
        run_id: Uuid,
        message: String,
        input_path: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// Run finished (completed or cancelled); emitted exactly once per run
    RunFinished {
        run_id: Uuid,
        results: RunResult,
        summary: RunSummary,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &str {
        match self {
            BatchEvent::FilesFound { .. } => "FilesFound",
            BatchEvent::ScanFinished { .. } => "ScanFinished",
            BatchEvent::Progress { .. } => "Progress",
            BatchEvent::ItemCompleted { .. } => "ItemCompleted",
            BatchEvent::ItemFailed { .. } => "ItemFailed",
            BatchEvent::RunFinished { .. } => "RunFinished",
        }
    }

    /// Run id for run events, scan id for discovery events
    pub fn correlation_id(&self) -> Uuid {
        match self {
            BatchEvent::FilesFound { scan_id, .. } | BatchEvent::ScanFinished { scan_id, .. } => {
                *scan_id
            }
            BatchEvent::Progress { run_id, .. }
            | BatchEvent::ItemCompleted { run_id, .. }
            | BatchEvent::ItemFailed { run_id, .. }
            | BatchEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the orchestrator)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use skybatch_common::events::{BatchEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(BatchEvent::ScanFinished {
///     scan_id: uuid::Uuid::new_v4(),
///     total: 3,
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "ScanFinished");
/// ```
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<BatchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: BatchEvent,
    ) -> Result<usize, broadcast::error::SendError<BatchEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BatchEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
