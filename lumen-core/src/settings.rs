use std::fmt;
use std::fs;
use std::path::Path;

use lumen_catalog::DEFAULT_SAMPLE_CAP;
use lumen_context::MatchMode;
use lumen_infer::ModelConfig;
use lumen_interpret::DEFAULT_MARKER;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PRE_PROMPT: &str = "You are an AI assistant helping with dashboard data analysis.";

/// Environment variable overriding `api_key`.
pub const ENV_API_KEY: &str = "LUMEN_API_KEY";
/// Environment variable overriding `model.endpoint`.
pub const ENV_MODEL_ENDPOINT: &str = "LUMEN_MODEL_ENDPOINT";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings: {0}")]
    Io(String),
    #[error("parsing settings: {0}")]
    Parse(String),
    #[error("no API key configured (set api_key or {ENV_API_KEY})")]
    MissingApiKey,
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Chat widget settings, as exposed in the dashboard's property panel.
///
/// ```yaml
/// api_key: "..."
/// object_ids: "kpi-1, sales-table"
/// pre_prompt: "You are an AI assistant helping with dashboard data analysis."
/// model:
///   backend: messages        # or chat_completions
///   max_tokens: 1024
/// ```
#[derive(Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,
    /// Comma-separated dashboard object ids attached to every question.
    #[serde(default)]
    pub object_ids: String,
    #[serde(default = "default_pre_prompt")]
    pub pre_prompt: String,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_sample_cap")]
    pub sample_cap: usize,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default = "default_cache_summaries")]
    pub cache_summaries: bool,
    #[serde(default = "default_marker")]
    pub marker: String,
}

fn default_pre_prompt() -> String {
    DEFAULT_PRE_PROMPT.into()
}

fn default_sample_cap() -> usize {
    DEFAULT_SAMPLE_CAP
}

fn default_cache_summaries() -> bool {
    true
}

fn default_marker() -> String {
    DEFAULT_MARKER.into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            object_ids: String::new(),
            pre_prompt: default_pre_prompt(),
            model: ModelConfig::default(),
            sample_cap: default_sample_cap(),
            match_mode: MatchMode::default(),
            cache_summaries: default_cache_summaries(),
            marker: default_marker(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("object_ids", &self.object_ids)
            .field("pre_prompt", &self.pre_prompt)
            .field("model", &self.model)
            .field("sample_cap", &self.sample_cap)
            .field("match_mode", &self.match_mode)
            .field("cache_summaries", &self.cache_summaries)
            .field("marker", &self.marker)
            .finish()
    }
}

impl Settings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| SettingsError::Io(format!("{}: {e}", path.as_ref().display())))?;
        serde_yaml::from_str(&text).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Apply `LUMEN_API_KEY` / `LUMEN_MODEL_ENDPOINT` when set and non-empty.
    pub fn apply_env(mut self) -> Self {
        if let Some(key) = non_empty_env(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Some(endpoint) = non_empty_env(ENV_MODEL_ENDPOINT) {
            self.model.endpoint = Some(endpoint);
        }
        self
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.api_key.trim().is_empty() {
            return Err(SettingsError::MissingApiKey);
        }
        if self.marker.trim().is_empty() {
            return Err(SettingsError::Invalid("marker must not be empty".into()));
        }
        if self.sample_cap == 0 {
            return Err(SettingsError::Invalid("sample_cap must be positive".into()));
        }
        Ok(())
    }

    /// Parsed `object_ids`: trimmed, empties dropped, order kept.
    pub fn object_ids(&self) -> Vec<String> {
        self.object_ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
