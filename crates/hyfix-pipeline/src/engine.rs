//! Rewrite engine
//!
//! ```text
//! bytes → parse → rule₁ → rule₂ → … → recompute maxima → encode → re-parse → integrity check
//!                   ↑ snapshot / rollback per rule (SkipRule)
//! ```
//!
//! Any failure on the way out delivers the original bytes. The engine never
//! returns an error: the [`Rewrite`] carries the outcome, the reports and
//! the error that caused a fallback.

use crate::config::{PartialFailurePolicy, PipelineSettings};
use crate::diagnostics::{DiagnosticRecord, DiagnosticsSink, TracingSink};
use crate::error::EngineError;
use crate::outcome::{Outcome, RuleReport, RuleStatus};
use hyfix_classfile::analysis::{compute_max_locals, compute_max_stack};
use hyfix_classfile::validate::check_integrity;
use hyfix_classfile::ClassFile;
use hyfix_rules::{internal_name, RuleError, TransformRule};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Result of one engine pass over one unit
#[derive(Debug)]
pub struct Rewrite {
    /// Unit name in internal form
    pub unit: String,
    pub outcome: Outcome,
    /// Rewritten bytes; `None` means the original bytes are delivered
    pub bytes: Option<Vec<u8>>,
    /// One entry per matched rule, in application order
    pub rules: Vec<RuleReport>,
    /// Cause of a `failed` outcome
    pub error: Option<EngineError>,
}

impl Rewrite {
    fn passthrough(unit: String, rules: Vec<RuleReport>) -> Self {
        Self {
            unit,
            outcome: Outcome::Passthrough,
            bytes: None,
            rules,
            error: None,
        }
    }

    fn failed(unit: String, rules: Vec<RuleReport>, error: EngineError) -> Self {
        Self {
            unit,
            outcome: Outcome::Failed,
            bytes: None,
            rules,
            error: Some(error),
        }
    }

    /// Bytes to hand to the host
    #[must_use]
    pub fn output<'a>(&'a self, input: &'a [u8]) -> &'a [u8] {
        self.bytes.as_deref().unwrap_or(input)
    }

    /// Ids of rules that edited the unit
    #[must_use]
    pub fn applied(&self) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|r| matches!(r.status, RuleStatus::Applied { .. }))
            .map(|r| r.rule)
            .collect()
    }
}

/// Parse → apply → serialize → validate, with fallback to the input
#[derive(Debug, Clone)]
pub struct RewriteEngine {
    policy: PartialFailurePolicy,
    deep_validation: bool,
    sink: Arc<dyn DiagnosticsSink>,
}

impl Default for RewriteEngine {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl RewriteEngine {
    /// Engine with default settings reporting to `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            policy: PartialFailurePolicy::default(),
            deep_validation: false,
            sink,
        }
    }

    /// Engine configured from the `pipeline` section
    #[must_use]
    pub fn from_settings(settings: &PipelineSettings, sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            policy: settings.partial_failure,
            deep_validation: settings.deep_validation,
            sink,
        }
    }

    /// With partial-failure policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: PartialFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Partial-failure policy in use
    #[inline]
    #[must_use]
    pub fn policy(&self) -> PartialFailurePolicy {
        self.policy
    }

    /// Sink receiving this engine's records
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn DiagnosticsSink> {
        &self.sink
    }

    /// Run `rules` over `input` and record diagnostics
    ///
    /// `rules` is expected in registration order; the same rules and input
    /// always give the same output bytes.
    pub fn rewrite(&self, unit: &str, input: &[u8], rules: &[Arc<dyn TransformRule>]) -> Rewrite {
        let unit = internal_name(unit);
        let span = tracing::debug_span!("rewrite", unit = %unit, rules = rules.len());
        let _guard = span.enter();

        let rewrite = self.run(unit, input, rules);
        self.report(&rewrite, input);
        rewrite
    }

    fn run(&self, unit: String, input: &[u8], rules: &[Arc<dyn TransformRule>]) -> Rewrite {
        let mut class = match ClassFile::parse(input) {
            Ok(class) => class,
            Err(source) => {
                let reports = skipped(rules);
                return Rewrite::failed(unit.clone(), reports, EngineError::MalformedUnit { unit, source });
            }
        };

        let mut reports = Vec::with_capacity(rules.len());
        let mut first_failure: Option<RuleError> = None;
        for (position, rule) in rules.iter().enumerate() {
            let snapshot = match self.policy {
                PartialFailurePolicy::SkipRule => Some(class.clone()),
                PartialFailurePolicy::AbortUnit => None,
            };

            let result = catch_unwind(AssertUnwindSafe(|| rule.apply(&mut class)));
            match result {
                Ok(Ok(effect)) => {
                    tracing::debug!(rule = rule.id(), ?effect, "rule finished");
                    reports.push(RuleReport::new(rule.id(), effect.into()));
                }
                Ok(Err(err)) => {
                    tracing::debug!(rule = rule.id(), kind = err.kind(), "rule failed: {err}");
                    reports.push(RuleReport::new(rule.id(), RuleStatus::Failed(err.clone())));
                    match snapshot {
                        Some(snapshot) => class = snapshot,
                        None => {
                            reports.extend(skipped(&rules[position + 1..]));
                            let error = EngineError::RuleAborted {
                                unit: unit.clone(),
                                rule: rule.id().to_owned(),
                                source: err,
                            };
                            return Rewrite::failed(unit, reports, error);
                        }
                    }
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    reports.push(RuleReport::new(
                        rule.id(),
                        RuleStatus::Failed(RuleError::conflict(format!("panicked: {message}"))),
                    ));
                    reports.extend(skipped(&rules[position + 1..]));
                    let error = EngineError::RulePanicked {
                        unit: unit.clone(),
                        rule: rule.id().to_owned(),
                        message,
                    };
                    return Rewrite::failed(unit, reports, error);
                }
            }
        }

        let applied = reports
            .iter()
            .any(|r| matches!(r.status, RuleStatus::Applied { .. }));
        if !applied {
            return match first_failure {
                Some(first) => {
                    let failed = reports
                        .iter()
                        .filter(|r| matches!(r.status, RuleStatus::Failed(_)))
                        .count();
                    let error = EngineError::AllRulesFailed {
                        unit: unit.clone(),
                        failed,
                        first,
                    };
                    Rewrite::failed(unit, reports, error)
                }
                None => Rewrite::passthrough(unit, reports),
            };
        }

        match self.finish(&unit, &mut class) {
            Ok(bytes) => Rewrite {
                unit,
                outcome: Outcome::Patched,
                bytes: Some(bytes),
                rules: reports,
                error: None,
            },
            Err(error) => Rewrite::failed(unit, reports, error),
        }
    }

    /// Recompute maxima of modified methods, encode, re-parse and check
    fn finish(&self, unit: &str, class: &mut ClassFile) -> Result<Vec<u8>, EngineError> {
        let modified = class.modified_methods();
        for &index in &modified {
            let Ok(context) = class.method_context(index) else {
                continue;
            };
            let stack = class.methods[index]
                .code()
                .map(|code| compute_max_stack(code, &class.pool));
            let Some(code) = class.methods[index].code_mut() else {
                continue;
            };
            // an analysis failure is left for the integrity check to report
            if let Some(Ok(stack)) = stack {
                code.max_stack = stack;
            }
            code.max_locals = code.max_locals.max(compute_max_locals(code, &context));
        }

        let bytes = class
            .to_bytes()
            .map_err(|source| EngineError::SerializationFailure {
                unit: unit.to_owned(),
                source,
            })?;
        let reparsed = ClassFile::parse(&bytes).map_err(|source| EngineError::Reparse {
            unit: unit.to_owned(),
            source,
        })?;
        let deep: Vec<usize> = if self.deep_validation {
            (0..reparsed.methods.len()).collect()
        } else {
            modified
        };
        check_integrity(&reparsed, &deep).map_err(|source| EngineError::Integrity {
            unit: unit.to_owned(),
            source,
        })?;
        Ok(bytes)
    }

    fn report(&self, rewrite: &Rewrite, input: &[u8]) {
        let base = DiagnosticRecord::unit(&rewrite.unit, rewrite.outcome, input, rewrite.output(input));
        for report in &rewrite.rules {
            let mut record = base.clone().with_rule(report.rule);
            record.outcome = report.status.outcome();
            record = match &report.status {
                RuleStatus::Failed(err) => record.with_error(err.kind(), err.to_string()),
                RuleStatus::Applied { edits } => record.with_detail(format!("{edits} edits")),
                RuleStatus::AlreadyApplied => record.with_detail("already applied"),
                RuleStatus::Skipped => record.with_detail("skipped"),
            };
            self.sink.record(record);
        }

        let record = match &rewrite.error {
            Some(error) => base.with_error(error.kind(), error.to_string()),
            None if rewrite.outcome == Outcome::Patched => {
                base.with_detail(format!("applied {}", rewrite.applied().join(", ")))
            }
            None => base.with_detail("every matched rule already applied"),
        };
        self.sink.record(record);
    }
}

fn skipped(rules: &[Arc<dyn TransformRule>]) -> Vec<RuleReport> {
    rules
        .iter()
        .map(|r| RuleReport::new(r.id(), RuleStatus::Skipped))
        .collect()
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use hyfix_classfile::{Insn, Opcode, WriteError};
    use hyfix_rules::{RespawnBlockRule, RuleEffect, Target};
    use hyfix_test_utils as fixtures;
    use pretty_assertions::assert_eq;

    fn engine() -> (RewriteEngine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (RewriteEngine::new(sink.clone()), sink)
    }

    /// Adds a method, then fails: the rollback must remove the method
    #[derive(Debug)]
    struct HalfDone;

    impl TransformRule for HalfDone {
        fn id(&self) -> &'static str {
            "halfDone"
        }
        fn description(&self) -> &'static str {
            "edits then fails"
        }
        fn targets(&self) -> Vec<Target> {
            vec![Target::exact(fixtures::BED_MANAGER)]
        }
        fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
            let code = hyfix_classfile::Code::new(1);
            class.add_method(0, "junk", "()V", code)?;
            Err(RuleError::conflict("gave up"))
        }
    }

    #[derive(Debug)]
    struct Panics;

    impl TransformRule for Panics {
        fn id(&self) -> &'static str {
            "panics"
        }
        fn description(&self) -> &'static str {
            "panics"
        }
        fn targets(&self) -> Vec<Target> {
            vec![Target::exact(fixtures::BED_MANAGER)]
        }
        fn apply(&self, _class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
            panic!("rule bug")
        }
    }

    /// Pushes the `goto` in `run()` past the reach of a 16-bit offset
    #[derive(Debug)]
    struct Bloat;

    impl TransformRule for Bloat {
        fn id(&self) -> &'static str {
            "bloat"
        }
        fn description(&self) -> &'static str {
            "inserts a long run of nops after a short branch"
        }
        fn targets(&self) -> Vec<Target> {
            vec![Target::exact("t/Runner")]
        }
        fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
            let index = class
                .find_method("run", "()V")
                .ok_or_else(|| RuleError::conflict("no run()"))?;
            let code = class.methods[index]
                .code_mut()
                .ok_or_else(|| RuleError::conflict("abstract run()"))?;
            let goto = code
                .find_from(0, |i| matches!(i, Insn::Jump { op: Opcode::Goto, .. }))
                .ok_or_else(|| RuleError::conflict("no goto"))?;
            code.insert(goto + 1, std::iter::repeat(Insn::simple(Opcode::Nop)).take(40_000));
            Ok(RuleEffect::Applied { edits: 1 })
        }
    }

    fn respawn() -> Arc<dyn TransformRule> {
        Arc::new(RespawnBlockRule::new())
    }

    #[test]
    fn skip_rule_rolls_back_only_the_failing_rule() {
        let (engine, sink) = engine();
        let input = fixtures::bed_manager(true);
        let rules: Vec<Arc<dyn TransformRule>> = vec![Arc::new(HalfDone), respawn()];
        let rewrite = engine.rewrite("world.BedManager", &input, &rules);

        assert_eq!(rewrite.outcome, Outcome::Patched);
        assert_eq!(rewrite.applied(), vec!["respawnBlock"]);
        let out = ClassFile::parse(rewrite.output(&input)).unwrap();
        assert!(out.methods_named("junk").is_empty());

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].rule.as_deref(), Some("halfDone"));
        assert_eq!(records[0].outcome, Outcome::Failed);
        assert_eq!(records[0].error_kind.as_deref(), Some("StructuralConflict"));
        assert_eq!(records[2].outcome, Outcome::Patched);
        assert_eq!(records[2].rule, None);
    }

    #[test]
    fn abort_unit_discards_earlier_edits() {
        let (engine, sink) = engine();
        let engine = engine.with_policy(PartialFailurePolicy::AbortUnit);
        let input = fixtures::bed_manager(true);
        let rules: Vec<Arc<dyn TransformRule>> = vec![respawn(), Arc::new(HalfDone)];
        let rewrite = engine.rewrite(fixtures::BED_MANAGER, &input, &rules);

        assert_eq!(rewrite.outcome, Outcome::Failed);
        assert_eq!(rewrite.output(&input), input.as_slice());
        assert_eq!(rewrite.error.as_ref().unwrap().kind(), "StructuralConflict");
        let unit = sink.records().pop().unwrap();
        assert_eq!(unit.outcome, Outcome::Failed);
        assert_eq!(unit.input_digest, unit.output_digest);
    }

    #[test]
    fn panicking_rule_falls_back_whole_unit() {
        let (engine, _) = engine();
        let input = fixtures::bed_manager(true);
        let rules: Vec<Arc<dyn TransformRule>> = vec![respawn(), Arc::new(Panics), respawn()];
        let rewrite = engine.rewrite(fixtures::BED_MANAGER, &input, &rules);

        assert_eq!(rewrite.outcome, Outcome::Failed);
        assert!(rewrite.bytes.is_none());
        assert_eq!(rewrite.error.as_ref().unwrap().kind(), "RulePanicked");
        assert_eq!(rewrite.rules[2].status, RuleStatus::Skipped);
    }

    #[test]
    fn malformed_input_is_failed() {
        let (engine, sink) = engine();
        let rewrite = engine.rewrite("world.BedManager", b"\xCA\xFE\xBA\xBE\x00", &[respawn()]);
        assert_eq!(rewrite.outcome, Outcome::Failed);
        assert_eq!(rewrite.error.as_ref().unwrap().kind(), "MalformedUnit");
        assert_eq!(sink.records().last().unwrap().error_kind.as_deref(), Some("MalformedUnit"));
    }

    #[test]
    fn overflowing_short_branch_falls_back() {
        let (engine, sink) = engine();
        let input = fixtures::guarded_runner("t/Runner");
        let rewrite = engine.rewrite("t.Runner", &input, &[Arc::new(Bloat)]);

        assert_eq!(rewrite.outcome, Outcome::Failed);
        assert!(rewrite.bytes.is_none());
        assert_eq!(rewrite.output(&input), input.as_slice());
        assert!(matches!(
            rewrite.error,
            Some(EngineError::SerializationFailure {
                source: WriteError::BranchOutOfRange { .. },
                ..
            })
        ));
        let unit = sink.records().pop().unwrap();
        assert_eq!(unit.error_kind.as_deref(), Some("SerializationFailure"));
        assert_eq!(unit.input_digest, unit.output_digest);
    }

    #[test]
    fn already_patched_unit_passes_through_unchanged() {
        let (engine, _) = engine();
        let input = fixtures::bed_manager(true);
        let once = engine.rewrite(fixtures::BED_MANAGER, &input, &[respawn()]);
        let patched = once.bytes.unwrap();

        let twice = engine.rewrite(fixtures::BED_MANAGER, &patched, &[respawn()]);
        assert_eq!(twice.outcome, Outcome::Passthrough);
        assert!(twice.bytes.is_none());
        assert_eq!(twice.rules[0].status, RuleStatus::AlreadyApplied);
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
