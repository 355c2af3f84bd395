//! Retry/backoff for throttled requests
//!
//! Per-item state machine:
//!
//! ```text
//! Pending → InFlight → Succeeded
//!                    → PermanentError
//!                    → TransientError → (backoff) → InFlight   while attempt ≤ max_retries
//!                                     → Failed                 once attempt > max_retries
//! waiting phases → Cancelled
//! ```
//!
//! Classification prefers the structured `Throttled` error kind and falls
//! back to marker matching on the error text. Markers live here and nowhere
//! else.

use crate::services::transformer::TransformError;
use std::time::Duration;

/// Default case-insensitive markers identifying throttling errors
pub const DEFAULT_TRANSIENT_MARKERS: &[&str] = &["rate limit", "quota exceeded", "429"];

/// Backoff limits for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Backoff before the first retry; doubles for each later retry
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the n-th transient error (n ≥ 1): `base * 2^(n-1)`
    pub fn backoff(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }

    /// Message for an item that ran out of retries
    pub fn exhausted_message(&self) -> String {
        format!(
            "Rate limit exceeded after {} retries. Please wait before trying again.",
            self.max_retries
        )
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary throttling; eligible for retry
    Transient,
    /// Anything else; the item fails immediately
    Permanent,
}

/// Decides whether a collaborator error is throttling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    markers: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_markers(DEFAULT_TRANSIENT_MARKERS.iter().copied())
    }
}

impl ErrorClassifier {
    /// Classifier with custom markers (matched case-insensitively)
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn classify(&self, error: &TransformError) -> ErrorClass {
        if error.is_throttled() {
            return ErrorClass::Transient;
        }
        self.classify_text(&error.to_string())
    }

    pub fn classify_text(&self, description: &str) -> ErrorClass {
        let lower = description.to_lowercase();
        if self.markers.iter().any(|m| lower.contains(m.as_str())) {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Phase of one item's retry state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Pending,
    InFlight,
    Succeeded,
    TransientError,
    PermanentError,
    Failed,
    Cancelled,
}

/// What the orchestrator should do after a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then dispatch again
    Backoff { attempt: u32, delay: Duration },
    /// Give up on the item with this message
    Fail { message: String, exhausted: bool },
}

/// Retry state for one item within one run
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    phase: RetryPhase,
    attempt: u32,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            phase: RetryPhase::Pending,
            attempt: 0,
        }
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Transient errors seen so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True while another dispatch is allowed
    pub fn can_dispatch(&self) -> bool {
        matches!(self.phase, RetryPhase::Pending | RetryPhase::TransientError)
            && self.attempt <= self.policy.max_retries
    }

    /// Request going out
    pub fn begin_attempt(&mut self) {
        debug_assert!(self.can_dispatch(), "dispatch in phase {:?}", self.phase);
        self.phase = RetryPhase::InFlight;
    }

    pub fn record_success(&mut self) {
        self.phase = RetryPhase::Succeeded;
    }

    /// Record a failed request and decide what comes next
    pub fn record_failure(&mut self, class: ErrorClass, description: &str) -> RetryDecision {
        match class {
            ErrorClass::Permanent => {
                self.phase = RetryPhase::PermanentError;
                RetryDecision::Fail {
                    message: description.to_string(),
                    exhausted: false,
                }
            }
            ErrorClass::Transient => {
                self.attempt += 1;
                if self.attempt <= self.policy.max_retries {
                    self.phase = RetryPhase::TransientError;
                    RetryDecision::Backoff {
                        attempt: self.attempt,
                        delay: self.policy.backoff(self.attempt),
                    }
                } else {
                    self.phase = RetryPhase::Failed;
                    RetryDecision::Fail {
                        message: self.policy.exhausted_message(),
                        exhausted: true,
                    }
                }
            }
        }
    }

    /// Cancellation fired while waiting
    pub fn cancel(&mut self) {
        if matches!(
            self.phase,
            RetryPhase::Pending | RetryPhase::TransientError | RetryPhase::InFlight
        ) {
            self.phase = RetryPhase::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(3), Duration::from_secs(120));
    }

    #[test]
    fn test_classify_markers_case_insensitive() {
        let classifier = ErrorClassifier::default();
        assert_eq!(classifier.classify_text("Rate Limit reached"), ErrorClass::Transient);
        assert_eq!(classifier.classify_text("QUOTA EXCEEDED for project"), ErrorClass::Transient);
        assert_eq!(classifier.classify_text("HTTP 429"), ErrorClass::Transient);
        assert_eq!(classifier.classify_text("400 invalid argument"), ErrorClass::Permanent);
    }

    #[test]
    fn test_classify_structured_throttle() {
        let classifier = ErrorClassifier::with_markers(Vec::<String>::new());
        let err = TransformError::Throttled("slow down".to_string());
        assert_eq!(classifier.classify(&err), ErrorClass::Transient);

        let err = TransformError::Api { status: 500, message: "internal".to_string() };
        assert_eq!(classifier.classify(&err), ErrorClass::Permanent);
    }

    #[test]
    fn test_classify_custom_markers() {
        let classifier = ErrorClassifier::with_markers(["Resource Exhausted", "  "]);
        assert_eq!(classifier.markers(), &["resource exhausted".to_string()]);
        assert_eq!(classifier.classify_text("RESOURCE_EXHAUSTED"), ErrorClass::Permanent);
        assert_eq!(classifier.classify_text("resource exhausted"), ErrorClass::Transient);
        assert_eq!(classifier.classify_text("429"), ErrorClass::Permanent);
    }

    #[test]
    fn test_permanent_error_fails_immediately() {
        let mut ctl = RetryController::new(RetryPolicy::default());
        ctl.begin_attempt();
        let decision = ctl.record_failure(ErrorClass::Permanent, "bad image");

        assert_eq!(
            decision,
            RetryDecision::Fail { message: "bad image".to_string(), exhausted: false }
        );
        assert_eq!(ctl.phase(), RetryPhase::PermanentError);
        assert_eq!(ctl.attempt(), 0);
        assert!(!ctl.can_dispatch());
    }

    #[test]
    fn test_transient_errors_exhaust_budget() {
        let mut ctl = RetryController::new(RetryPolicy::default());
        let mut delays = Vec::new();

        loop {
            ctl.begin_attempt();
            match ctl.record_failure(ErrorClass::Transient, "429") {
                RetryDecision::Backoff { delay, .. } => delays.push(delay),
                RetryDecision::Fail { message, exhausted } => {
                    assert!(exhausted);
                    assert!(message.contains("after 3 retries"));
                    break;
                }
            }
        }

        assert_eq!(
            delays,
            vec![Duration::from_secs(30), Duration::from_secs(60), Duration::from_secs(120)]
        );
        assert_eq!(ctl.attempt(), 4);
        assert_eq!(ctl.phase(), RetryPhase::Failed);
    }

    #[test]
    fn test_success_after_transient() {
        let mut ctl = RetryController::new(RetryPolicy::default());
        ctl.begin_attempt();
        assert!(matches!(
            ctl.record_failure(ErrorClass::Transient, "rate limit"),
            RetryDecision::Backoff { attempt: 1, .. }
        ));
        assert!(ctl.can_dispatch());
        ctl.begin_attempt();
        ctl.record_success();
        assert_eq!(ctl.phase(), RetryPhase::Succeeded);
        assert_eq!(ctl.attempt(), 1);
    }

    #[test]
    fn test_cancel_during_backoff() {
        let mut ctl = RetryController::new(RetryPolicy::default());
        ctl.begin_attempt();
        ctl.record_failure(ErrorClass::Transient, "quota exceeded");
        ctl.cancel();
        assert_eq!(ctl.phase(), RetryPhase::Cancelled);
        assert!(!ctl.can_dispatch());

        // Terminal phases are not overwritten
        let mut done = RetryController::new(RetryPolicy::default());
        done.begin_attempt();
        done.record_success();
        done.cancel();
        assert_eq!(done.phase(), RetryPhase::Succeeded);
    }
}
