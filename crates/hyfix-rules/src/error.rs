//! Rule error types
//!
//! Every variant is non-fatal: the engine rolls back the failing rule's edit
//! and records a diagnostic.

use hyfix_classfile::analysis::AnalysisError;
use hyfix_classfile::ClassError;

/// Errors raised by [`crate::TransformRule::apply`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// Expected method signature is absent
    #[error("method not found: {class}.{method}")]
    TargetMethodNotFound { class: String, method: String },

    /// Method exists but the instruction pattern the rule anchors on does not
    #[error("pattern not found in {method}: {pattern}")]
    TargetPatternNotFound { method: String, pattern: String },

    /// Edit would leave the class structurally invalid
    #[error("structural conflict: {0}")]
    StructuralConflict(String),

    /// Class model error while editing
    #[error("class model error: {0}")]
    Class(#[from] ClassError),
}

impl RuleError {
    /// Create method-not-found error
    pub fn method_not_found(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::TargetMethodNotFound {
            class: class.into(),
            method: method.into(),
        }
    }

    /// Create pattern-not-found error
    pub fn pattern_not_found(method: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::TargetPatternNotFound {
            method: method.into(),
            pattern: pattern.into(),
        }
    }

    /// Create structural conflict
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::StructuralConflict(reason.into())
    }

    /// Short machine-readable kind, used in diagnostics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TargetMethodNotFound { .. } => "TargetMethodNotFound",
            Self::TargetPatternNotFound { .. } => "TargetPatternNotFound",
            Self::StructuralConflict(_) | Self::Class(_) => "StructuralConflict",
        }
    }
}

impl From<AnalysisError> for RuleError {
    fn from(e: AnalysisError) -> Self {
        Self::StructuralConflict(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_class_errors_as_conflicts() {
        assert_eq!(
            RuleError::from(ClassError::PoolOverflow).kind(),
            "StructuralConflict"
        );
        assert_eq!(
            RuleError::pattern_not_found("a()V", "athrow").kind(),
            "TargetPatternNotFound"
        );
    }

    #[test]
    fn analysis_errors_become_conflicts() {
        let err = RuleError::from(AnalysisError::FallsOffEnd);
        assert!(matches!(err, RuleError::StructuralConflict(_)));
    }

    #[test]
    fn display_names_the_method() {
        let err = RuleError::method_not_found("world/BedManager", "onBedBreak(Lworld/Location;)V");
        assert_eq!(
            err.to_string(),
            "method not found: world/BedManager.onBedBreak(Lworld/Location;)V"
        );
    }
}
