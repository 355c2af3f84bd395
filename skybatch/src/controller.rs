//! Batch controller
//!
//! Owns the event bus, the transformer, the session and the cancellation
//! tokens. Discovery and runs execute as background tasks; at most one run
//! is active at a time.

use crate::error::{BatchError, BatchResult};
use crate::models::{RunReport, RunRequest};
use crate::services::file_scanner::{FileScanner, ScanResult};
use crate::services::orchestrator::BatchOrchestrator;
use crate::services::result_path::OutputDirPolicy;
use crate::services::retry::{ErrorClassifier, RetryPolicy};
use crate::services::session::BatchSession;
use crate::services::transformer::{ImageTransformer, RequestParameters};
use skybatch_common::events::EventBus;
use skybatch_common::RateTier;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle to a spawned background task
#[derive(Debug)]
pub struct TaskHandle<T> {
    /// Correlation id carried by the task's events
    pub id: Uuid,
    pub handle: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task to finish
    pub async fn join(self) -> BatchResult<T> {
        self.handle
            .await
            .map_err(|e| BatchError::Other(anyhow::anyhow!("Task {} failed: {}", self.id, e)))
    }
}

#[derive(Debug, Clone)]
struct ActiveTask {
    id: Uuid,
    cancel: CancellationToken,
}

/// Coordinates discovery, runs and the session
#[derive(Clone)]
pub struct BatchController {
    event_bus: EventBus,
    transformer: Arc<dyn ImageTransformer>,
    scanner: FileScanner,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
    session: Arc<RwLock<BatchSession>>,
    active_run: Arc<RwLock<Option<ActiveTask>>>,
    active_scan: Arc<RwLock<Option<ActiveTask>>>,
}

impl BatchController {
    pub fn new(transformer: Arc<dyn ImageTransformer>, event_bus: EventBus) -> Self {
        Self {
            event_bus,
            transformer,
            scanner: FileScanner::default(),
            classifier: ErrorClassifier::default(),
            policy: RetryPolicy::default(),
            session: Arc::new(RwLock::new(BatchSession::new())),
            active_run: Arc::new(RwLock::new(None)),
            active_scan: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_scanner(mut self, scanner: FileScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Snapshot of the session
    pub async fn session(&self) -> BatchSession {
        self.session.read().await.clone()
    }

    /// Start discovery under `root`
    ///
    /// A scan already in progress is cancelled first. The finished scan
    /// seeds the session.
    pub async fn start_scan(&self, root: PathBuf) -> TaskHandle<ScanResult> {
        let scan_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        {
            let mut slot = self.active_scan.write().await;
            if let Some(previous) = slot.take() {
                tracing::info!(scan_id = %previous.id, "Cancelling previous scan");
                previous.cancel.cancel();
            }
            *slot = Some(ActiveTask { id: scan_id, cancel: cancel.clone() });
        }

        tracing::info!(scan_id = %scan_id, root = %root.display(), "Starting scan");

        let scanner = self.scanner.clone();
        let event_bus = self.event_bus.clone();
        let session = Arc::clone(&self.session);
        let active_scan = Arc::clone(&self.active_scan);

        let handle = tokio::spawn(async move {
            let result = scanner.scan_and_publish(scan_id, root, cancel, &event_bus).await;

            if !result.cancelled {
                session.write().await.seed(&result);
            }
            clear_slot(&active_scan, scan_id).await;
            result
        });

        TaskHandle { id: scan_id, handle }
    }

    /// Start a run
    ///
    /// Fails with [`BatchError::RunInProgress`] while another run is active.
    pub async fn start_run(&self, request: RunRequest) -> BatchResult<TaskHandle<RunReport>> {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        {
            let mut slot = self.active_run.write().await;
            if let Some(active) = slot.as_ref() {
                tracing::warn!(active_run = %active.id, "Run requested while another is active");
                return Err(BatchError::RunInProgress);
            }
            *slot = Some(ActiveTask { id: run_id, cancel: cancel.clone() });
        }

        let orchestrator = BatchOrchestrator::new(Arc::clone(&self.transformer), self.event_bus.clone())
            .with_naming(self.scanner.naming().clone())
            .with_classifier(self.classifier.clone())
            .with_retry_policy(self.policy);
        let session = Arc::clone(&self.session);
        let active_run = Arc::clone(&self.active_run);

        let handle = tokio::spawn(async move {
            let report = orchestrator.execute(run_id, request, &cancel).await;

            session.write().await.absorb(&report);
            clear_slot(&active_run, run_id).await;

            // Consumers may start the next run on this event
            orchestrator.publish_finished(&report);
            report
        });

        Ok(TaskHandle { id: run_id, handle })
    }

    /// Start a run over the inputs whose latest outcome is a failure
    pub async fn retry_failed(
        &self,
        output_policy: OutputDirPolicy,
        params: RequestParameters,
        tier: RateTier,
    ) -> BatchResult<TaskHandle<RunReport>> {
        let failed = self.session.read().await.failed_inputs();
        if failed.is_empty() {
            return Err(BatchError::InvalidInput("No failed items to retry".to_string()));
        }

        tracing::info!(count = failed.len(), "Retrying failed items");
        self.start_run(RunRequest::new(failed, output_policy, params, tier)).await
    }

    /// Cancel the active run; returns false when none is active
    pub async fn cancel_run(&self) -> bool {
        cancel_slot(&self.active_run, "run").await
    }

    /// Cancel the active scan; returns false when none is active
    pub async fn cancel_scan(&self) -> bool {
        cancel_slot(&self.active_scan, "scan").await
    }

    pub async fn is_running(&self) -> bool {
        self.active_run.read().await.is_some()
    }

    pub async fn is_scanning(&self) -> bool {
        self.active_scan.read().await.is_some()
    }
}

async fn cancel_slot(slot: &RwLock<Option<ActiveTask>>, kind: &str) -> bool {
    match slot.read().await.as_ref() {
        Some(active) => {
            if !active.cancel.is_cancelled() {
                tracing::info!(id = %active.id, "Cancelling {}", kind);
                active.cancel.cancel();
            }
            true
        }
        None => false,
    }
}

/// Clear the slot if it still belongs to `id`
async fn clear_slot(slot: &RwLock<Option<ActiveTask>>, id: Uuid) {
    let mut guard = slot.write().await;
    if guard.as_ref().map(|a| a.id) == Some(id) {
        *guard = None;
    }
}
