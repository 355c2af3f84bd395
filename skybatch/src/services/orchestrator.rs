//! Batch processing orchestrator
//!
//! Drives one run over an ordered list of inputs:
//!
//! ```text
//! for each item:  cancelled? → stop
//!   loop:  pacing wait → progress → transform
//!            ok        → Succeeded
//!            transient → backoff → loop        (budget left)
//!            otherwise → Failed
//! Progress(100) → RunFinished
//! ```
//!
//! Exactly one transformer call is in flight per run. The orchestrator owns
//! its items until it hands back the report.

use crate::models::{summarize, RunReport, RunRequest, WorkItem};
use crate::services::rate_limiter::{sleep_with_cancel, RateLimiter};
use crate::services::result_path::{file_name, resolve_output_path};
use crate::services::retry::{ErrorClass, ErrorClassifier, RetryController, RetryDecision, RetryPolicy};
use crate::services::transformer::{ImageTransformer, TransformError};
use chrono::Utc;
use skybatch_common::events::{BatchEvent, EventBus, ItemOutcome, ProgressValue, RunResult};
use skybatch_common::ResultNaming;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Polling increment for backoff waits
pub const BACKOFF_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How one item's processing ended
enum ItemRun {
    /// Item reached Succeeded or Failed
    Finished(ItemOutcome),
    /// Cancellation observed during a wait; the run stops here
    Aborted,
}

/// Sequential, rate-limited batch processor
pub struct BatchOrchestrator {
    transformer: Arc<dyn ImageTransformer>,
    event_bus: EventBus,
    naming: ResultNaming,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
}

impl BatchOrchestrator {
    pub fn new(transformer: Arc<dyn ImageTransformer>, event_bus: EventBus) -> Self {
        Self {
            transformer,
            event_bus,
            naming: ResultNaming::default(),
            classifier: ErrorClassifier::default(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_naming(mut self, naming: ResultNaming) -> Self {
        self.naming = naming;
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

    /// Process a run under a fresh run id
    pub async fn run(&self, request: RunRequest, cancel: &CancellationToken) -> RunReport {
        self.run_with_id(Uuid::new_v4(), request, cancel).await
    }

    /// Process a run under a caller-chosen run id and publish `RunFinished`
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> RunReport {
        let report = self.execute(run_id, request, cancel).await;
        self.publish_finished(&report);
        report
    }

    /// Process a run without publishing `RunFinished`
    ///
    /// Callers that keep state about the run publish the event themselves,
    /// once that state reflects the report.
    pub async fn execute(&self, run_id: Uuid, request: RunRequest, cancel: &CancellationToken) -> RunReport {
        let inputs = dispatch_list(&request);
        let total = inputs.len();
        tracing::info!(
            run_id = %run_id,
            total,
            skipped = request.skipped.len(),
            tier = %request.tier,
            transformer = self.transformer.name(),
            "Starting batch run"
        );

        let mut results = RunResult::new();
        let mut items: Vec<WorkItem> = Vec::with_capacity(request.skipped.len() + total);

        for (input, output) in &request.skipped {
            items.push(WorkItem::skipped(input, output));
            results.record(input, ItemOutcome::Skipped { output_path: output.clone() });
        }

        let first_pending = items.len();
        items.extend(inputs.iter().map(WorkItem::new));

        let mut limiter = RateLimiter::for_tier(request.tier);
        let mut cancelled = false;

        for (index, item) in items[first_pending..].iter_mut().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            match self
                .process_item(run_id, item, index + 1, total, &request, &mut limiter, cancel)
                .await
            {
                ItemRun::Finished(outcome) => {
                    results.record(item.input_path(), outcome);
                }
                ItemRun::Aborted => {
                    cancelled = true;
                    break;
                }
            }
        }

        // A cancel that lands during the last call still marks the run
        cancelled |= cancel.is_cancelled();

        let summary = summarize(&items);
        let message = if cancelled {
            "Processing cancelled"
        } else {
            "Processing complete!"
        };
        self.emit_progress(run_id, ProgressValue::Percent(100), message.to_string());

        tracing::info!(
            run_id = %run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled_items = summary.cancelled,
            not_started = summary.not_started,
            cancelled,
            "Batch run finished"
        );

        RunReport {
            run_id,
            items,
            results,
            summary,
            cancelled,
        }
    }

    /// Publish `RunFinished` for a finished report
    pub fn publish_finished(&self, report: &RunReport) {
        self.event_bus.emit_lossy(BatchEvent::RunFinished {
            run_id: report.run_id,
            results: report.results.clone(),
            summary: report.summary,
            cancelled: report.cancelled,
            timestamp: Utc::now(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_item(
        &self,
        run_id: Uuid,
        item: &mut WorkItem,
        position: usize,
        total: usize,
        request: &RunRequest,
        limiter: &mut RateLimiter,
        cancel: &CancellationToken,
    ) -> ItemRun {
        let input = item.input_path().to_path_buf();
        let name = file_name(&input);
        let mut retry = RetryController::new(self.policy);
        let mut dispatched = false;
        item.begin();

        loop {
            let wait = limiter.remaining_wait();
            if !wait.is_zero() {
                item.mark_rate_limited();
                self.emit_progress(
                    run_id,
                    ProgressValue::RateLimiting,
                    format!("Rate limiting: waiting {:.1}s before next request...", wait.as_secs_f64()),
                );
            }

            if !limiter.await_slot(cancel).await {
                retry.cancel();
                if dispatched {
                    item.mark_cancelled();
                } else {
                    item.requeue();
                }
                tracing::info!(run_id = %run_id, file = %input.display(), "Cancelled while waiting for dispatch slot");
                return ItemRun::Aborted;
            }

            retry.begin_attempt();
            item.mark_dispatched();
            dispatched = true;

            let percent = ((position - 1) * 100 / total.max(1)) as u8;
            self.emit_progress(
                run_id,
                ProgressValue::Percent(percent),
                format!("Processing {}/{}: {}", position, total, name),
            );

            let output = resolve_output_path(&input, &request.output_policy, &self.naming);
            tracing::info!(
                run_id = %run_id,
                file = %input.display(),
                output = %output.display(),
                attempt = retry.attempt(),
                "Dispatching"
            );

            let attempt_result = match ensure_parent_dir(&output).await {
                Ok(()) => self.transformer.transform(&input, &output, &request.params).await,
                Err(e) => Err(TransformError::Io(e)),
            };

            match attempt_result {
                Ok(artifact) => {
                    retry.record_success();
                    item.mark_succeeded(&output);
                    tracing::info!(
                        run_id = %run_id,
                        file = %input.display(),
                        output = %output.display(),
                        passthrough = artifact.passthrough,
                        "Item succeeded"
                    );
                    self.event_bus.emit_lossy(BatchEvent::ItemCompleted {
                        run_id,
                        input_path: input.clone(),
                        output_path: output.clone(),
                        artifact,
                        timestamp: Utc::now(),
                    });
                    return ItemRun::Finished(ItemOutcome::Succeeded { output_path: output });
                }
                Err(e) => {
                    let description = e.to_string();
                    let class = self.classifier.classify(&e);

                    // No retries once cancellation is requested
                    if cancel.is_cancelled() && class == ErrorClass::Transient {
                        retry.cancel();
                        item.last_error = Some(description);
                        item.mark_cancelled();
                        tracing::info!(run_id = %run_id, file = %input.display(), "Cancelled after throttled request");
                        return ItemRun::Aborted;
                    }

                    match retry.record_failure(class, &description) {
                        RetryDecision::Backoff { attempt, delay } => {
                            item.mark_retrying(attempt, description.as_str());
                            tracing::warn!(
                                run_id = %run_id,
                                file = %input.display(),
                                attempt,
                                backoff_secs = delay.as_secs(),
                                error = %description,
                                "Throttled, backing off"
                            );
                            self.emit_progress(
                                run_id,
                                ProgressValue::RateLimiting,
                                format!(
                                    "Rate limit hit! Retrying in {}s (attempt {}/{})...",
                                    delay.as_secs(),
                                    attempt,
                                    self.policy.max_retries
                                ),
                            );

                            if !sleep_with_cancel(delay, cancel, BACKOFF_POLL_INTERVAL).await {
                                retry.cancel();
                                item.mark_cancelled();
                                tracing::info!(run_id = %run_id, file = %input.display(), "Cancelled during backoff");
                                return ItemRun::Aborted;
                            }
                        }
                        RetryDecision::Fail { message, exhausted } => {
                            let message = if exhausted {
                                message
                            } else {
                                format!("Failed to process {}: {}", name, description)
                            };
                            item.mark_failed(message.as_str());
                            tracing::warn!(
                                run_id = %run_id,
                                file = %input.display(),
                                exhausted,
                                error = %description,
                                "Item failed"
                            );
                            self.event_bus.emit_lossy(BatchEvent::ItemFailed {
                                run_id,
                                message: message.clone(),
                                input_path: input.clone(),
                                timestamp: Utc::now(),
                            });
                            return ItemRun::Finished(ItemOutcome::Failed { error: message });
                        }
                    }
                }
            }
        }
    }

    fn emit_progress(&self, run_id: Uuid, value: ProgressValue, message: String) {
        tracing::debug!(run_id = %run_id, ?value, %message, "Progress");
        self.event_bus.emit_lossy(BatchEvent::Progress {
            run_id,
            value,
            message,
            timestamp: Utc::now(),
        });
    }
}

/// Inputs to dispatch: already-processed ones and repeats are dropped
fn dispatch_list(request: &RunRequest) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    request
        .inputs
        .iter()
        .filter(|input| {
            if request.skipped.contains_key(*input) {
                tracing::warn!(file = %input.display(), "Input already processed, not dispatching");
                return false;
            }
            seen.insert(input.to_path_buf())
        })
        .cloned()
        .collect()
}

async fn ensure_parent_dir(output: &Path) -> std::io::Result<()> {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}
