//! Configuration loading and config file resolution
//!
//! The TOML file is bootstrap-only: it is read once at startup and never
//! written back. Every field has a built-in default, so a missing file is
//! not an error.

use crate::{Error, RateTier, Result, ResultNaming};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SKYBATCH_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Gemini API key (environment variables take priority)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Rate-limit tier
    #[serde(default)]
    pub tier: RateTier,

    /// Model name used for generateContent calls
    #[serde(default)]
    pub model: Option<String>,

    /// Explicit output directory (otherwise derived from the inputs)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Output and results-folder naming
    #[serde(default)]
    pub naming: ResultNaming,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Prompt texts by prompt type, layered over the built-in set
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,

    /// Override for the transient-error markers
    #[serde(default)]
    pub transient_markers: Option<Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Config file resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. OS-dependent default (`<config_dir>/skybatch/config.toml`)
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// OS-dependent default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("skybatch").join("config.toml"))
}

/// Load TOML config, falling back to defaults when the file does not exist
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), tier = %config.tier, "Loaded config file");
    Ok(config)
}
