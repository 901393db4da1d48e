//! Transformation rule trait and core types
//!
//! Provides the [`TransformRule`] trait: one independent, named patch per
//! host defect.

use crate::error::RuleError;
use hyfix_classfile::ClassFile;
use std::fmt;

/// Unit names a rule is registered for, in internal form (`a/b/C`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Exactly this class
    Exact(String),

    /// Every class whose name starts with this prefix (e.g. `a/b/Outer$`)
    Prefix(String),
}

impl Target {
    /// Exact target, accepting binary or internal names
    #[must_use]
    pub fn exact(name: &str) -> Self {
        Self::Exact(internal_name(name))
    }

    /// Prefix target, accepting binary or internal names
    #[must_use]
    pub fn prefix(prefix: &str) -> Self {
        Self::Prefix(internal_name(prefix))
    }

    /// Does this target cover `name` (internal form)
    #[must_use]
    pub fn covers(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Convert a binary name (`a.b.C`) to internal form; internal names pass
/// through unchanged
#[must_use]
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

/// What a successful [`TransformRule::apply`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    /// The class was edited at `edits` sites
    Applied { edits: usize },

    /// The rule's own edit is already present; nothing changed
    AlreadyApplied,
}

impl RuleEffect {
    /// Did this application change the class
    #[inline]
    #[must_use]
    pub fn changed(self) -> bool {
        matches!(self, Self::Applied { edits } if edits > 0)
    }
}

/// A single load-time patch
///
/// Rules are registered once, immutable afterwards, and shared between
/// loader threads.
///
/// # Contract
/// - `apply` checks its preconditions (method signature, instruction
///   pattern) before editing and locates patterns by content, never by offset
/// - `apply` must assume earlier rules already edited the same class
/// - a second `apply` on its own output returns [`RuleEffect::AlreadyApplied`]
pub trait TransformRule: Send + Sync + fmt::Debug {
    /// Stable identifier, also the configuration toggle key
    fn id(&self) -> &'static str;

    /// One-line summary of the defect being corrected
    fn description(&self) -> &'static str;

    /// Unit names this rule is indexed under
    fn targets(&self) -> Vec<Target>;

    /// Does this rule apply to `unit_name` (binary or internal form)
    fn matches(&self, unit_name: &str) -> bool {
        let name = internal_name(unit_name);
        self.targets().iter().any(|t| t.covers(&name))
    }

    /// Edit the parsed class in place
    ///
    /// # Errors
    /// Returns a [`RuleError`] when a precondition fails or the edit would
    /// be structurally invalid. The class may be partially edited on error.
    fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError>;
}
