//! Diagnostics sink
//!
//! Write-only from the pipeline: one record per transformed unit and one per
//! rule that ran on it. The sink is the only state shared between concurrent
//! load events.

use crate::outcome::Outcome;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tracing::Level;

/// Leading digest bytes kept in records
const DIGEST_BYTES: usize = 8;

/// Short content digest used to tell inputs and outputs apart in logs
#[must_use]
pub fn short_digest(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hex::encode(&hash.as_bytes()[..DIGEST_BYTES])
}

/// One diagnostic line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRecord {
    /// Unit name in internal form
    pub unit: String,
    pub outcome: Outcome,
    /// Set on per-rule records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Error kind for failures (`TargetPatternNotFound`, `MalformedUnit`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub input_len: usize,
    pub output_len: usize,
    pub input_digest: String,
    pub output_digest: String,
}

impl DiagnosticRecord {
    /// Unit-level record; digests are computed from both payloads
    #[must_use]
    pub fn unit(unit: impl Into<String>, outcome: Outcome, input: &[u8], output: &[u8]) -> Self {
        let input_digest = short_digest(input);
        let output_digest = if input == output {
            input_digest.clone()
        } else {
            short_digest(output)
        };
        Self {
            unit: unit.into(),
            outcome,
            rule: None,
            error_kind: None,
            detail: None,
            input_len: input.len(),
            output_len: output.len(),
            input_digest,
            output_digest,
        }
    }

    /// Attach the rule this record is about
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Attach failure kind and detail
    #[must_use]
    pub fn with_error(mut self, kind: impl Into<String>, detail: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self.detail = Some(detail.into());
        self
    }

    /// Attach free-form detail
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.unit, self.outcome)?;
        if let Some(rule) = &self.rule {
            write!(f, " [{rule}]")?;
        }
        if let Some(kind) = &self.error_kind {
            write!(f, " {kind}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Receiver of diagnostic records
///
/// Called from any loader thread; implementations must not block for long.
pub trait DiagnosticsSink: Send + Sync + fmt::Debug {
    /// Accept one record
    fn record(&self, record: DiagnosticRecord);
}

/// Emits each record as a structured `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Failures warn and the unit-level record of a patched unit is info;
    /// per-rule successes and passthroughs are debug
    #[must_use]
    pub fn level_of(record: &DiagnosticRecord) -> Level {
        match record.outcome {
            Outcome::Failed => Level::WARN,
            Outcome::Patched if record.rule.is_none() => Level::INFO,
            Outcome::Patched | Outcome::Passthrough => Level::DEBUG,
        }
    }
}

impl DiagnosticsSink for TracingSink {
    fn record(&self, record: DiagnosticRecord) {
        let rule = record.rule.as_deref().unwrap_or("-");
        let kind = record.error_kind.as_deref().unwrap_or("-");
        let detail = record.detail.as_deref().unwrap_or("");
        let level = Self::level_of(&record);
        if level == Level::WARN {
            tracing::warn!(
                unit = %record.unit,
                rule,
                kind,
                input = %record.input_digest,
                "{detail}"
            );
        } else if level == Level::INFO {
            tracing::info!(
                unit = %record.unit,
                input_len = record.input_len,
                output_len = record.output_len,
                input = %record.input_digest,
                output = %record.output_digest,
                "patched: {detail}"
            );
        } else {
            tracing::debug!(
                unit = %record.unit,
                rule,
                outcome = %record.outcome,
                "{detail}"
            );
        }
    }
}

/// Keeps records in memory, for tests and offline reports
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl MemorySink {
    /// Create empty sink
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record so far, in arrival order
    #[must_use]
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().clone()
    }

    /// Remove and return every record
    pub fn take(&self) -> Vec<DiagnosticRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Records for one unit (internal form)
    #[must_use]
    pub fn for_unit(&self, unit: &str) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.unit == unit)
            .cloned()
            .collect()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// No records yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, record: DiagnosticRecord) {
        self.records.lock().push(record);
    }
}

/// Forwards every record to several sinks in order
#[derive(Debug, Default)]
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn DiagnosticsSink>>,
}

impl FanoutSink {
    /// Create fan-out over these sinks
    #[must_use]
    pub fn new(sinks: Vec<std::sync::Arc<dyn DiagnosticsSink>>) -> Self {
        Self { sinks }
    }
}

impl DiagnosticsSink for FanoutSink {
    fn record(&self, record: DiagnosticRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(record.clone());
            }
            last.record(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn one_info_line_per_patched_unit() {
        let unit = DiagnosticRecord::unit("a/B", Outcome::Patched, b"1", b"2");
        let applied = unit.clone().with_rule("respawnBlock").with_detail("2 edits");
        let failed = DiagnosticRecord::unit("a/B", Outcome::Failed, b"1", b"1")
            .with_rule("world")
            .with_error("PreconditionFailed", "no call site");
        let passthrough = DiagnosticRecord::unit("a/B", Outcome::Passthrough, b"1", b"1");

        assert_eq!(TracingSink::level_of(&unit), Level::INFO);
        assert_eq!(TracingSink::level_of(&applied), Level::DEBUG);
        assert_eq!(TracingSink::level_of(&failed), Level::WARN);
        assert_eq!(TracingSink::level_of(&passthrough), Level::DEBUG);
        TracingSink.record(applied);
    }

    #[test]
    fn digest_is_short_hex() {
        let digest = short_digest(b"class bytes");
        assert_eq!(digest.len(), DIGEST_BYTES * 2);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, short_digest(b"class bytes"));
        assert_ne!(digest, short_digest(b"other bytes"));
    }

    #[test]
    fn passthrough_record_shares_digest() {
        let record = DiagnosticRecord::unit("a/B", Outcome::Passthrough, b"xyz", b"xyz");
        assert_eq!(record.input_digest, record.output_digest);
        assert_eq!(record.to_string(), "a/B passthrough");
    }

    #[test]
    fn failed_record_display_and_json() {
        let record = DiagnosticRecord::unit("a/B", Outcome::Failed, b"in", b"in")
            .with_rule("respawnBlock")
            .with_error("TargetPatternNotFound", "no anchor");
        assert_eq!(
            record.to_string(),
            "a/B failed [respawnBlock] TargetPatternNotFound: no anchor"
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["errorKind"], "TargetPatternNotFound");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["inputLen"], 2);
    }

    #[test]
    fn memory_sink_collects_concurrently() {
        let sink = Arc::new(MemorySink::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        sink.record(DiagnosticRecord::unit(
                            format!("u/{i}"),
                            Outcome::Passthrough,
                            b"",
                            b"",
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.len(), 400);
        assert_eq!(sink.for_unit("u/3").len(), 50);
        assert_eq!(sink.take().len(), 400);
        assert!(sink.is_empty());
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let sinks: Vec<Arc<dyn DiagnosticsSink>> = vec![a.clone(), b.clone(), Arc::new(TracingSink)];
        let fanout = FanoutSink::new(sinks);
        fanout.record(DiagnosticRecord::unit("a/B", Outcome::Patched, b"1", b"2"));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
