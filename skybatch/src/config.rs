//! Startup configuration resolution for skybatch
//!
//! Resolves the API key (ENV → TOML), the request parameters and the error
//! classifier once, before any run starts. Nothing here is consulted again
//! while a run is active.

use crate::services::retry::ErrorClassifier;
use crate::services::transformer::RequestParameters;
use skybatch_common::config::TomlConfig;
use skybatch_common::{Error, Result};
use tracing::{info, warn};

/// Primary API key variable
pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
/// Fallback API key variable
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// Longest prompt sent to the service, in characters
pub const MAX_PROMPT_LENGTH: usize = 500;

/// Built-in prompt for photogrammetry masking
pub const DEFAULT_PROMPT: &str = "Remove the sky and clouds from this image and replace them with solid black background. This is for photogrammetric processing and 3D reconstruction. Preserve all buildings, trees, people, vehicles, and ground-level objects completely intact. Set sky areas to pure black (RGB 0,0,0) for clean masking in RealityScan workflows.";

/// Built-in minimal-removal prompt
pub const CONSERVATIVE_PROMPT: &str = "Carefully remove only the sky from this image, keeping all foreground elements intact. Replace the sky with transparency while maintaining the original lighting and color balance.";

/// Prompt type recorded when `--prompt` supplies the text
pub const CUSTOM_PROMPT_TYPE: &str = "custom";

/// Resolve the Gemini API key
///
/// **Priority:** `GEMINI_API_KEY` → `GOOGLE_API_KEY` → TOML
pub fn resolve_api_key(toml_config: &TomlConfig) -> Result<String> {
    let candidates = [
        (GEMINI_API_KEY_VAR, std::env::var(GEMINI_API_KEY_VAR).ok()),
        (GOOGLE_API_KEY_VAR, std::env::var(GOOGLE_API_KEY_VAR).ok()),
        ("TOML", toml_config.api_key.clone()),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, key)| key.filter(|k| is_valid_key(k)).map(|k| (source, k)))
        .collect();

    if valid.len() > 1 {
        let names: Vec<&str> = valid.iter().map(|(source, _)| *source).collect();
        warn!(
            "Gemini API key found in multiple sources: {}. Using {} (highest priority).",
            names.join(", "),
            names[0]
        );
    }

    match valid.into_iter().next() {
        Some((source, key)) => {
            info!("Gemini API key loaded from {}", source);
            Ok(key.trim().to_string())
        }
        None => Err(Error::Config(format!(
            "Gemini API key not configured. Please configure using one of:\n\
             1. Environment: {}=your-key-here\n\
             2. Environment: {}=your-key-here\n\
             3. TOML config: api_key = \"your-key-here\"",
            GEMINI_API_KEY_VAR, GOOGLE_API_KEY_VAR
        ))),
    }
}

/// Key is non-empty after trimming
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Built-in prompt for a type, if there is one
pub fn builtin_prompt(prompt_type: &str) -> Option<&'static str> {
    match prompt_type {
        "default" => Some(DEFAULT_PROMPT),
        "conservative" => Some(CONSERVATIVE_PROMPT),
        _ => None,
    }
}

/// Prompt types known to this configuration
pub fn available_prompt_types(toml_config: &TomlConfig) -> Vec<String> {
    let mut types: Vec<String> = ["default", "conservative"].iter().map(|s| s.to_string()).collect();
    for name in toml_config.prompts.keys() {
        if !types.contains(name) {
            types.push(name.clone());
        }
    }
    types
}

/// Build the request parameters for every call of a run
///
/// An explicit prompt wins. Otherwise `prompt_type` is looked up in the
/// TOML `[prompts]` table, then in the built-in set; unknown types fall back
/// to `default`.
pub fn resolve_request_parameters(
    toml_config: &TomlConfig,
    prompt_type: &str,
    custom_prompt: Option<&str>,
) -> RequestParameters {
    if let Some(text) = custom_prompt.filter(|t| !t.trim().is_empty()) {
        info!("Using custom prompt");
        return RequestParameters::new(CUSTOM_PROMPT_TYPE, normalize_prompt(text));
    }

    let lookup = |name: &str| -> Option<String> {
        toml_config
            .prompts
            .get(name)
            .cloned()
            .or_else(|| builtin_prompt(name).map(str::to_string))
    };

    let (resolved_type, text) = match lookup(prompt_type) {
        Some(text) => (prompt_type.to_string(), text),
        None => {
            warn!("Unknown prompt type '{}', using default", prompt_type);
            let text = lookup("default").unwrap_or_else(|| DEFAULT_PROMPT.to_string());
            ("default".to_string(), text)
        }
    };

    info!(prompt_type = %resolved_type, "Prompt resolved");
    RequestParameters::new(resolved_type, normalize_prompt(&text))
}

/// Cap length, collapse whitespace and end with punctuation
pub fn normalize_prompt(prompt: &str) -> String {
    let mut text = if prompt.chars().count() > MAX_PROMPT_LENGTH {
        warn!("Prompt truncated to {} characters", MAX_PROMPT_LENGTH);
        let mut cut: String = prompt.chars().take(MAX_PROMPT_LENGTH - 3).collect();
        cut.push_str("...");
        cut
    } else {
        prompt.to_string()
    };

    text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if !text.is_empty() && !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }
    text
}

/// Error classifier with any configured marker override
pub fn classifier_from_config(toml_config: &TomlConfig) -> ErrorClassifier {
    match &toml_config.transient_markers {
        Some(markers) => {
            info!(markers = ?markers, "Using configured transient-error markers");
            ErrorClassifier::with_markers(markers)
        }
        None => ErrorClassifier::default(),
    }
}
