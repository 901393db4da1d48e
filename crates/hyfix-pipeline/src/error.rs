//! Error types for the rewrite pipeline
//!
//! Nothing here crosses the host boundary: every [`EngineError`] turns into
//! the original bytes plus a `failed` diagnostic.

use hyfix_classfile::validate::ValidationError;
use hyfix_classfile::{ClassError, WriteError};
use hyfix_rules::RuleError;
use std::path::PathBuf;

/// Reasons a unit fell back to its original bytes
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Input bytes do not parse as a class file
    #[error("malformed unit {unit}: {source}")]
    MalformedUnit {
        unit: String,
        #[source]
        source: ClassError,
    },

    /// Edited class could not be re-encoded
    #[error("cannot serialize {unit}: {source}")]
    SerializationFailure {
        unit: String,
        #[source]
        source: WriteError,
    },

    /// Encoded output does not re-parse
    #[error("output for {unit} does not re-parse: {source}")]
    Reparse {
        unit: String,
        #[source]
        source: ClassError,
    },

    /// Output failed the structural integrity check
    #[error("integrity check failed for {unit}: {source}")]
    Integrity {
        unit: String,
        #[source]
        source: ValidationError,
    },

    /// A rule panicked; the structural form is not trusted any more
    #[error("rule {rule} panicked on {unit}: {message}")]
    RulePanicked {
        unit: String,
        rule: String,
        message: String,
    },

    /// A rule failed under the abort-unit policy
    #[error("rule {rule} failed on {unit}: {source}")]
    RuleAborted {
        unit: String,
        rule: String,
        #[source]
        source: RuleError,
    },

    /// Every matched rule failed
    #[error("all {failed} matched rules failed on {unit}; first: {first}")]
    AllRulesFailed {
        unit: String,
        failed: usize,
        first: RuleError,
    },
}

impl EngineError {
    /// Short machine-readable kind, used in diagnostics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedUnit { .. } => "MalformedUnit",
            Self::SerializationFailure { .. } | Self::Reparse { .. } => "SerializationFailure",
            Self::Integrity { .. } => "IntegrityFailure",
            Self::RulePanicked { .. } => "RulePanicked",
            Self::RuleAborted { source, .. } => source.kind(),
            Self::AllRulesFailed { first, .. } => first.kind(),
        }
    }

    /// Unit the error belongs to
    #[must_use]
    pub fn unit(&self) -> &str {
        match self {
            Self::MalformedUnit { unit, .. }
            | Self::SerializationFailure { unit, .. }
            | Self::Reparse { unit, .. }
            | Self::Integrity { unit, .. }
            | Self::RulePanicked { unit, .. }
            | Self::RuleAborted { unit, .. }
            | Self::AllRulesFailed { unit, .. } => unit,
        }
    }
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file exists but cannot be read
    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid JSON of the expected shape
    #[error("invalid config {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Values parse but are out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_failures_report_the_rule_kind() {
        let err = EngineError::AllRulesFailed {
            unit: "world/BedManager".into(),
            failed: 1,
            first: RuleError::pattern_not_found("onBedBreak", "releaseStructure"),
        };
        assert_eq!(err.kind(), "TargetPatternNotFound");
        assert_eq!(err.unit(), "world/BedManager");
        assert!(err.to_string().contains("onBedBreak"));
    }

    #[test]
    fn malformed_unit_kind() {
        let err = EngineError::MalformedUnit {
            unit: "a/B".into(),
            source: ClassError::PoolOverflow,
        };
        assert_eq!(err.kind(), "MalformedUnit");
    }
}
