//! Test Helper Utilities
//!
//! Shared utilities for testing skybatch: a scripted transformer, image
//! fixtures and event collection.

#![allow(dead_code)]

use async_trait::async_trait;
use skybatch::services::{ImageTransformer, RequestParameters, TransformError};
use skybatch_common::events::{Artifact, BatchEvent};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Scripted reply for one call
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Write the output and succeed
    Success,
    /// Structured throttling error
    Throttled,
    /// Non-success HTTP status
    ApiError(u16, String),
    /// Untyped error whose text is classified by markers
    Text(String),
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct MockCall {
    pub input: PathBuf,
    pub output: PathBuf,
    pub prompt: String,
    pub at: Instant,
}

/// Transformer replaying per-input scripts; unscripted calls succeed
pub struct MockTransformer {
    scripts: Mutex<HashMap<PathBuf, VecDeque<MockResponse>>>,
    calls: Mutex<Vec<MockCall>>,
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockTransformer {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            cancel_on_call: Mutex::new(None),
        }
    }

    /// Queue replies for an input, consumed one per call
    pub fn script(self, input: &Path, responses: Vec<MockResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(input.to_path_buf(), responses.into());
        self
    }

    /// Cancel `token` while the n-th call (1-based) is in flight
    pub fn cancel_during_call(self, n: usize, token: CancellationToken) -> Self {
        *self.cancel_on_call.lock().unwrap() = Some((n, token));
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, input: &Path) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.input == input)
            .collect()
    }
}

#[async_trait]
impl ImageTransformer for MockTransformer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &RequestParameters,
    ) -> Result<Artifact, TransformError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(MockCall {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
                prompt: params.prompt.clone(),
                at: Instant::now(),
            });
            calls.len()
        };

        if let Some((n, token)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *n == call_number {
                token.cancel();
            }
        }

        let response = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(input)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(MockResponse::Success);

        match response {
            MockResponse::Success => {
                let bytes = b"mock image bytes";
                std::fs::write(output, bytes)?;
                Ok(Artifact {
                    path: output.to_path_buf(),
                    mime_type: "image/jpeg".to_string(),
                    size_bytes: bytes.len() as u64,
                    passthrough: false,
                })
            }
            MockResponse::Throttled => Err(TransformError::Throttled("Resource exhausted".to_string())),
            MockResponse::ApiError(status, message) => Err(TransformError::Api { status, message }),
            MockResponse::Text(message) => Err(TransformError::Other(message)),
        }
    }
}

/// Write small placeholder images; returns their paths in order
pub fn create_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"\xFF\xD8\xFF fake jpeg").unwrap();
            path
        })
        .collect()
}

pub fn test_params() -> RequestParameters {
    RequestParameters::new("default", "Remove the sky.")
}

/// Everything currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<BatchEvent>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Progress messages in emission order
pub fn progress_messages(events: &[BatchEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::Progress { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}
