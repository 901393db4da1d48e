//! HyFix Transformation Rules
//!
//! Named, independent class patches and the selector that decides which of
//! them see a given class.
//!
//! # Core Concepts
//!
//! - [`TransformRule`]: one patch per host defect, applied to a parsed
//!   [`hyfix_classfile::ClassFile`]
//! - [`Target`]: exact class name or class-name prefix a rule is indexed under
//! - [`TargetSelector`]: hash map for exact names, radix trie for prefixes
//! - [`builtin_rules`]: the shipped rule set, filtered by [`RuleSettings`]
//! - [`CoordinateStore`]: the storage contract behind the `respawnBlock`
//!   bridge
//!
//! # Example
//!
//! ```rust,ignore
//! use hyfix_rules::{builtin_rules, RuleSettings, TargetSelector};
//!
//! let selector = TargetSelector::with_rules(builtin_rules(&RuleSettings::default()));
//! for rule in selector.classify("world.BedManager") {
//!     let effect = rule.apply(&mut class)?;
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod builtin;
mod error;
mod rule;
mod selector;
mod settings;
mod store;

// Re-exports
pub use builtin::{
    builtin_rules, InteractionTimeoutRule, LivingEntityRule, RespawnBlockRule,
    SpawnMarkerEntityRule, TickingThreadRule, WorldAddPlayerRule, BUILTIN_IDS,
};
pub use error::RuleError;
pub use rule::{internal_name, RuleEffect, Target, TransformRule};
pub use selector::TargetSelector;
pub use settings::{InteractionTimeoutSettings, RuleSettings, TransformerToggles};
pub use store::{CoordinateKey, CoordinateStore, JsonFileStore, MemoryCoordinateStore, StoreError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
