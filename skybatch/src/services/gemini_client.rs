//! Gemini API client
//!
//! `generateContent` with the prompt text and the input image inline. The
//! first inline image of the reply is written to the output path. When the
//! model answers with text only, the input is copied through unchanged and
//! the artifact is flagged as a passthrough.

use crate::services::transformer::{ImageTransformer, RequestParameters, TransformError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use skybatch_common::events::Artifact;
use std::path::Path;
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const USER_AGENT: &str = concat!("skybatch/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 180;

/// Default image-editing model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    Image { inline_data: RequestInlineData },
}

#[derive(Debug, Serialize)]
struct RequestInlineData {
    mime_type: String,
    data: String,
}

/// generateContent response (only the fields we read)
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
struct ResponseInlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: String,
    data: String,
}

/// Decoded image from a response
#[derive(Debug, PartialEq, Eq)]
struct ReturnedImage {
    mime_type: String,
    bytes: Vec<u8>,
}

/// Gemini image transformer
pub struct GeminiTransformer {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiTransformer {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Result<Self, TransformError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(TransformError::Other("Gemini API key is empty".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransformError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate(&self, prompt: &str, image: &[u8], mime_type: &str) -> Result<GenerateResponse, TransformError> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text { text: prompt },
                    RequestPart::Image {
                        inline_data: RequestInlineData {
                            mime_type: mime_type.to_string(),
                            data: BASE64.encode(image),
                        },
                    },
                ],
            }],
        };

        tracing::debug!(model = %self.model, bytes = image.len(), "Calling Gemini generateContent");

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransformError::Network(e.to_string()))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TransformError::Throttled(error_text));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TransformError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        response
            .json()
            .await
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ImageTransformer for GeminiTransformer {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &RequestParameters,
    ) -> Result<Artifact, TransformError> {
        let image = tokio::fs::read(input).await?;
        let response = self.generate(&params.prompt, &image, mime_type_for(input)).await?;

        match extract_image(&response)? {
            Some(returned) => {
                if !mime_matches_path(&returned.mime_type, output) {
                    tracing::warn!(
                        output = %output.display(),
                        mime_type = %returned.mime_type,
                        "Returned image format does not match the output extension"
                    );
                }
                tokio::fs::write(output, &returned.bytes).await?;
                tracing::info!(
                    file = %input.display(),
                    output = %output.display(),
                    bytes = returned.bytes.len(),
                    "Saved generated image"
                );
                Ok(Artifact {
                    path: output.to_path_buf(),
                    mime_type: returned.mime_type,
                    size_bytes: returned.bytes.len() as u64,
                    passthrough: false,
                })
            }
            None => {
                tracing::warn!(
                    file = %input.display(),
                    reply = %response_text(&response).chars().take(300).collect::<String>(),
                    "Model returned no image, copying input through"
                );
                tokio::fs::write(output, &image).await?;
                Ok(Artifact {
                    path: output.to_path_buf(),
                    mime_type: mime_type_for(input).to_string(),
                    size_bytes: image.len() as u64,
                    passthrough: true,
                })
            }
        }
    }
}

/// First inline image of the reply
fn extract_image(response: &GenerateResponse) -> Result<Option<ReturnedImage>, TransformError> {
    let inline = response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .find_map(|p| p.inline_data.as_ref());

    match inline {
        Some(data) => {
            let bytes = BASE64
                .decode(data.data.as_bytes())
                .map_err(|e| TransformError::InvalidResponse(format!("inline image: {}", e)))?;
            Ok(Some(ReturnedImage {
                mime_type: data.mime_type.clone(),
                bytes,
            }))
        }
        None => Ok(None),
    }
}

/// Concatenated text parts of the reply
fn response_text(response: &GenerateResponse) -> String {
    response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// True when a returned MIME type fits the extension of `path`
fn mime_matches_path(mime_type: &str, path: &Path) -> bool {
    let essence = mime_type.split(';').next().unwrap_or_default().trim().to_lowercase();
    let essence = if essence == "image/jpg" { "image/jpeg".to_string() } else { essence };
    essence == mime_type_for(path)
}
