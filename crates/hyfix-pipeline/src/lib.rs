//! HyFix Load Pipeline
//!
//! The fallback-safe path between the host's class loader and the rule set.
//!
//! # Core Operations
//!
//! - **Classify**: [`TargetSelector`](hyfix_rules::TargetSelector) picks the
//!   rules for a class name
//! - **Rewrite**: [`RewriteEngine`] parses, applies rules with per-rule
//!   rollback, re-encodes and validates
//! - **Deliver**: [`LoadInterceptor`] hands bytes back exactly once, falling
//!   back to the original bytes on any failure
//!
//! # Architecture
//!
//! ```text
//! host loader → LoadInterceptor → TargetSelector ─(no match)──────────────→ original bytes
//!                                       └─(match)→ RewriteEngine → patched | original bytes
//!                                                        ↓
//!                                                  DiagnosticsSink
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use hyfix_pipeline::{LoadInterceptor, PatchConfig, TracingSink};
//! use std::sync::Arc;
//!
//! let config = PatchConfig::load("config.json")?;
//! let interceptor = LoadInterceptor::from_config(&config, Arc::new(TracingSink));
//! let bytes = interceptor.on_load("world.BedManager", &class_bytes);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod interceptor;
pub mod outcome;

// Re-exports for convenience
pub use config::{EarlySettings, PartialFailurePolicy, PatchConfig, PipelineSettings, CONFIG_FILE};
pub use diagnostics::{
    short_digest, DiagnosticRecord, DiagnosticsSink, FanoutSink, MemorySink, TracingSink,
};
pub use engine::{Rewrite, RewriteEngine};
pub use error::{ConfigError, EngineError};
pub use interceptor::{Delivery, LoadHook, LoadInterceptor, LoadPhase, LoadStats, Route, HOOK_PRIORITY};
pub use outcome::{Outcome, RuleReport, RuleStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
