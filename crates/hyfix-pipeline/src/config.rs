//! Pipeline configuration
//!
//! Read from the plugin's `config.json`. The file is shared with the runtime
//! half of the plugin, so unknown sections are ignored and every field has a
//! default. A missing file means defaults.
//!
//! ```json
//! {
//!   "transformers": { "tickingThread": false },
//!   "interactionTimeout": { "baseTimeoutMs": 8000, "pingMultiplier": 3.0 },
//!   "pipeline": { "partialFailure": "abortUnit" },
//!   "early": { "logging": { "verbose": true } }
//! }
//! ```

use crate::error::ConfigError;
use hyfix_rules::RuleSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file name
pub const CONFIG_FILE: &str = "config.json";

/// Path reported for errors in text passed to [`PatchConfig::from_json`]
const INLINE_SOURCE: &str = "<inline>";

/// What to do when one of several rules on a unit fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartialFailurePolicy {
    /// Roll back only the failing rule and keep going
    #[default]
    SkipRule,

    /// Discard every edit and deliver the original bytes
    AbortUnit,
}

/// `pipeline` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub partial_failure: PartialFailurePolicy,
    /// Re-derive stack depth for every method, not only modified ones
    pub deep_validation: bool,
}

/// `early.logging` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EarlyLogging {
    pub verbose: bool,
}

/// `early` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EarlySettings {
    pub logging: EarlyLogging,
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatchConfig {
    /// `transformers` and `interactionTimeout`
    #[serde(flatten)]
    pub rules: RuleSettings,
    pub pipeline: PipelineSettings,
    pub early: EarlySettings,
}

impl PatchConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With partial-failure policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: PartialFailurePolicy) -> Self {
        self.pipeline.partial_failure = policy;
        self
    }

    /// Load from `path`; a missing file yields defaults
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file exists but cannot be read
    /// - `ConfigError::Json` if it is not valid JSON of this shape
    /// - `ConfigError::Invalid` if a value is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::io_error(path, e)),
        };
        let config = Self::parse(&text, path)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse from JSON text
    ///
    /// # Errors
    /// - `ConfigError::Json` (path `<inline>`) for malformed JSON
    /// - `ConfigError::Invalid` for out-of-range values
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, Path::new(INLINE_SOURCE))
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.rules.interaction_timeout.problem() {
            Some(problem) => Err(ConfigError::Invalid(problem)),
            None => Ok(()),
        }
    }
}
