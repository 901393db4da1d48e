//! Load interceptor
//!
//! The single boundary function the host calls for every class it loads.
//! Per load event:
//!
//! ```text
//! Requested → Classified ─┬─────────────────────────────→ Passthrough ─┐
//!                         └→ Transforming ─┬→ Transformed ─────────────┼→ Delivered
//!                                          └→ FailedFallback ──────────┘
//! ```
//!
//! Unmatched classes are returned borrowed, without copying or hashing.
//! Nothing panics or errors across [`LoadInterceptor::on_load`].

use crate::config::PatchConfig;
use crate::diagnostics::{DiagnosticRecord, DiagnosticsSink};
use crate::engine::{panic_message, RewriteEngine};
use crate::error::EngineError;
use crate::outcome::{Outcome, RuleReport};
use hyfix_rules::{builtin_rules, internal_name, TargetSelector};
use serde::Serialize;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Priority the hook registers with; transformers run in descending order
pub const HOOK_PRIORITY: i32 = 100;

/// Host-facing class transformer contract
pub trait LoadHook: Send + Sync {
    /// Registration priority
    fn priority(&self) -> i32 {
        HOOK_PRIORITY
    }

    /// Final bytes for `unit_name`; never fails, never panics
    fn transform<'a>(&self, unit_name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]>;
}

/// States of one load event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadPhase {
    Requested,
    Classified,
    Passthrough,
    Transforming,
    Transformed,
    FailedFallback,
    Delivered,
}

/// Path a load event took through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Route {
    /// No rule matched
    Passthrough,
    /// Rules ran; every one found its edit already present
    Unchanged,
    /// Rules ran and the rewritten bytes validated
    Transformed,
    /// Rules ran and the unit fell back to its original bytes
    FailedFallback,
}

impl Route {
    /// Phases visited, `Requested` through `Delivered`
    #[must_use]
    pub fn phases(self) -> &'static [LoadPhase] {
        use LoadPhase::{Classified, Delivered, FailedFallback, Passthrough, Requested, Transformed, Transforming};
        match self {
            Self::Passthrough => &[Requested, Classified, Passthrough, Delivered],
            Self::Unchanged | Self::Transformed => {
                &[Requested, Classified, Transforming, Transformed, Delivered]
            }
            Self::FailedFallback => &[Requested, Classified, Transforming, FailedFallback, Delivered],
        }
    }

    /// Final phase before `Delivered`
    #[must_use]
    pub fn terminal(self) -> LoadPhase {
        let phases = self.phases();
        phases[phases.len() - 2]
    }
}

/// Everything the interceptor decided for one load event
#[derive(Debug)]
pub struct Delivery<'a> {
    /// Unit name in internal form
    pub unit: String,
    /// Bytes handed to the host; borrowed unless the unit was patched
    pub bytes: Cow<'a, [u8]>,
    pub outcome: Outcome,
    pub route: Route,
    /// Per-rule results, empty for unmatched units
    pub rules: Vec<RuleReport>,
    /// Cause of a fallback
    pub error: Option<EngineError>,
}

impl<'a> Delivery<'a> {
    fn borrowed(unit: String, bytes: &'a [u8], outcome: Outcome, route: Route) -> Self {
        Self {
            unit,
            bytes: Cow::Borrowed(bytes),
            outcome,
            route,
            rules: Vec::new(),
            error: None,
        }
    }

    /// Did the host get the input back untouched
    #[must_use]
    pub fn is_original(&self) -> bool {
        matches!(self.bytes, Cow::Borrowed(_))
    }
}

/// Snapshot of delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub passthrough: u64,
    pub patched: u64,
    pub failed: u64,
}

impl LoadStats {
    /// Load events seen
    #[must_use]
    pub fn total(&self) -> u64 {
        self.passthrough + self.patched + self.failed
    }
}

#[derive(Debug, Default)]
struct Counters {
    passthrough: AtomicU64,
    patched: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn count(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Passthrough => &self.passthrough,
            Outcome::Patched => &self.patched,
            Outcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoadStats {
        LoadStats {
            passthrough: self.passthrough.load(Ordering::Relaxed),
            patched: self.patched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Selector + engine behind a fallback-safe boundary
///
/// Immutable after construction apart from its counters; share it between
/// loader threads with an `Arc`.
#[derive(Debug)]
pub struct LoadInterceptor {
    selector: TargetSelector,
    engine: RewriteEngine,
    counters: Counters,
}

impl LoadInterceptor {
    /// Create interceptor
    #[must_use]
    pub fn new(selector: TargetSelector, engine: RewriteEngine) -> Self {
        Self {
            selector,
            engine,
            counters: Counters::default(),
        }
    }

    /// Built-in rules enabled by `config`, reporting to `sink`
    #[must_use]
    pub fn from_config(config: &PatchConfig, sink: Arc<dyn DiagnosticsSink>) -> Self {
        let selector = TargetSelector::with_rules(builtin_rules(&config.rules));
        let engine = RewriteEngine::from_settings(&config.pipeline, sink);
        tracing::info!(
            rules = selector.len(),
            policy = ?engine.policy(),
            "load interceptor ready"
        );
        Self::new(selector, engine)
    }

    /// Registered rules
    #[inline]
    #[must_use]
    pub fn selector(&self) -> &TargetSelector {
        &self.selector
    }

    /// Engine used for matched units
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &RewriteEngine {
        &self.engine
    }

    /// Delivery counters so far
    #[must_use]
    pub fn stats(&self) -> LoadStats {
        self.counters.snapshot()
    }

    /// Bytes for the host
    ///
    /// Units no rule targets are counted and handed back without building a
    /// [`Delivery`].
    pub fn on_load<'a>(&self, unit_name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        if !self.selector.is_candidate(unit_name) {
            self.counters.count(Outcome::Passthrough);
            return Cow::Borrowed(bytes);
        }
        self.intercept(unit_name, bytes).bytes
    }

    /// Full delivery for one load event
    pub fn intercept<'a>(&self, unit_name: &str, bytes: &'a [u8]) -> Delivery<'a> {
        let delivery = match catch_unwind(AssertUnwindSafe(|| self.route(unit_name, bytes))) {
            Ok(delivery) => delivery,
            Err(payload) => {
                let unit = internal_name(unit_name);
                let message = panic_message(payload.as_ref());
                tracing::error!(unit = %unit, "pipeline panicked: {message}");
                self.engine.sink().record(
                    DiagnosticRecord::unit(&unit, Outcome::Failed, bytes, bytes)
                        .with_error("PipelinePanicked", message),
                );
                Delivery::borrowed(unit, bytes, Outcome::Failed, Route::FailedFallback)
            }
        };
        self.counters.count(delivery.outcome);
        delivery
    }

    fn route<'a>(&self, unit_name: &str, bytes: &'a [u8]) -> Delivery<'a> {
        if !self.selector.is_candidate(unit_name) {
            return Delivery::borrowed(
                internal_name(unit_name),
                bytes,
                Outcome::Passthrough,
                Route::Passthrough,
            );
        }
        let rules = self.selector.classify(unit_name);
        if rules.is_empty() {
            return Delivery::borrowed(
                internal_name(unit_name),
                bytes,
                Outcome::Passthrough,
                Route::Passthrough,
            );
        }

        tracing::debug!(unit = unit_name, rules = rules.len(), "transforming");
        let rewrite = self.engine.rewrite(unit_name, bytes, &rules);
        let (bytes, route) = match (rewrite.outcome, rewrite.bytes) {
            (Outcome::Patched, Some(out)) => (Cow::Owned(out), Route::Transformed),
            (Outcome::Failed, _) => (Cow::Borrowed(bytes), Route::FailedFallback),
            _ => (Cow::Borrowed(bytes), Route::Unchanged),
        };
        Delivery {
            unit: rewrite.unit,
            bytes,
            outcome: rewrite.outcome,
            route,
            rules: rewrite.rules,
            error: rewrite.error,
        }
    }
}

impl LoadHook for LoadInterceptor {
    fn transform<'a>(&self, unit_name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        self.on_load(unit_name, bytes)
    }
}
