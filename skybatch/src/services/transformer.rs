//! External image-transformation collaborator
//!
//! The orchestrator only knows this trait. A call takes an input image, the
//! output path and the request parameters, and either writes the output and
//! returns the artifact or fails with a described error. Calls cannot be
//! cancelled once dispatched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skybatch_common::events::Artifact;
use std::path::Path;
use thiserror::Error;

/// Collaborator errors
#[derive(Debug, Error)]
pub enum TransformError {
    /// Service signalled throttling (HTTP 429 or equivalent)
    #[error("Rate limit hit (429): {0}")]
    Throttled(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl TransformError {
    /// Structured throttling signal
    pub fn is_throttled(&self) -> bool {
        matches!(self, TransformError::Throttled(_))
    }
}

/// Request parameters, opaque to the orchestrator
///
/// Built once at startup and passed through unchanged to every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParameters {
    /// Prompt preset name (`default`, `conservative`, or `custom`)
    pub prompt_type: String,
    /// Final prompt text sent with the image
    pub prompt: String,
}

impl RequestParameters {
    pub fn new(prompt_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt_type: prompt_type.into(),
            prompt: prompt.into(),
        }
    }
}

/// Image transformation service
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    /// Service identifier for logs
    fn name(&self) -> &str;

    /// Transform `input` and write the result to `output`
    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &RequestParameters,
    ) -> Result<Artifact, TransformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_display_carries_marker() {
        let err = TransformError::Throttled("Resource has been exhausted".to_string());
        assert!(err.is_throttled());
        assert!(err.to_string().contains("429"));

        let err = TransformError::Api { status: 400, message: "bad".to_string() };
        assert!(!err.is_throttled());
        assert_eq!(err.to_string(), "API error 400: bad");
    }
}
