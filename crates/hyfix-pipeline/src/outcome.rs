//! Per-unit and per-rule outcomes

use hyfix_rules::{RuleEffect, RuleError};
use serde::Serialize;
use std::fmt;

/// Tri-state result of one load event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Delivered unmodified: no rule matched, or every matched rule was
    /// already applied
    Passthrough,

    /// Delivered rewritten and structurally valid
    Patched,

    /// A rule matched but the unit fell back to its original bytes
    Failed,
}

impl Outcome {
    /// Lowercase name as used in diagnostics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Patched => "patched",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one rule did to one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleStatus {
    /// Rule edited the class
    Applied { edits: usize },

    /// Rule found its own edit already present
    AlreadyApplied,

    /// Rule failed; its edits were rolled back
    Failed(RuleError),

    /// Not run: the unit was abandoned before this rule's turn
    Skipped,
}

impl RuleStatus {
    /// Outcome this rule contributes to the unit record
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Applied { .. } => Outcome::Patched,
            Self::AlreadyApplied | Self::Skipped => Outcome::Passthrough,
            Self::Failed(_) => Outcome::Failed,
        }
    }
}

impl From<RuleEffect> for RuleStatus {
    fn from(effect: RuleEffect) -> Self {
        match effect {
            RuleEffect::Applied { edits } => Self::Applied { edits },
            RuleEffect::AlreadyApplied => Self::AlreadyApplied,
        }
    }
}

/// One rule's status on a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub rule: &'static str,
    pub status: RuleStatus,
}

impl RuleReport {
    /// Create report
    #[must_use]
    pub fn new(rule: &'static str, status: RuleStatus) -> Self {
        Self { rule, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_names() {
        assert_eq!(Outcome::Passthrough.to_string(), "passthrough");
        assert_eq!(
            serde_json::to_string(&Outcome::Patched).unwrap(),
            "\"patched\""
        );
    }

    #[test]
    fn rule_status_outcomes() {
        assert_eq!(
            RuleStatus::from(RuleEffect::Applied { edits: 2 }).outcome(),
            Outcome::Patched
        );
        assert_eq!(
            RuleStatus::from(RuleEffect::AlreadyApplied).outcome(),
            Outcome::Passthrough
        );
        assert_eq!(
            RuleStatus::Failed(RuleError::conflict("x")).outcome(),
            Outcome::Failed
        );
    }
}
