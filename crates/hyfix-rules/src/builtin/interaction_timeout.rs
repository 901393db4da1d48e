//! `interactionTimeout`: configurable `PacketHandler` operation timeout
//!
//! The host computes `(long) (averagePing * 2.0) + 3000`, which kicks
//! players on unstable connections mid-interaction. The rule redirects the
//! two `ldc2_w` constants to the configured multiplier and base, or, with
//! `fixedTimeoutMs` set, replaces the whole body with that constant.

use super::support::require_method;
use crate::error::RuleError;
use crate::rule::{RuleEffect, Target, TransformRule};
use crate::settings::InteractionTimeoutSettings;
use hyfix_classfile::{ClassFile, Code, Constant, ConstantPool, Insn, Opcode};

const TARGET: &str = "com/hypixel/hytale/server/core/io/PacketHandler";
const METHOD: &str = "getOperationTimeoutThreshold";
const DESCRIPTOR: &str = "()J";
const HOST_MULTIPLIER: f64 = 2.0;
const HOST_BASE_MS: i64 = 3000;

/// Apply configured timeout values to `getOperationTimeoutThreshold`
#[derive(Debug, Clone, Default)]
pub struct InteractionTimeoutRule {
    settings: InteractionTimeoutSettings,
}

impl InteractionTimeoutRule {
    /// Create rule with these settings
    #[must_use]
    pub fn new(settings: InteractionTimeoutSettings) -> Self {
        Self { settings }
    }

    /// Settings in use
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &InteractionTimeoutSettings {
        &self.settings
    }

    fn replace_body(class: &mut ClassFile, index: usize, fixed: i64) -> Result<RuleEffect, RuleError> {
        let code = class.methods[index]
            .code()
            .ok_or_else(|| RuleError::conflict(format!("{METHOD} has no body")))?;
        let body: Vec<&Insn> = code.instructions().map(|(_, i)| i).collect();
        if let [Insn::Ldc { op: Opcode::Ldc2W, index }, Insn::Simple(Opcode::Lreturn)] = body.as_slice() {
            if matches!(class.pool.get(*index), Ok(Constant::Long(v)) if *v == fixed) {
                return Ok(RuleEffect::AlreadyApplied);
            }
        }

        let edit = class.edit_method(index)?;
        let constant = edit.pool.intern_long(fixed)?;
        edit.code.clear();
        edit.code.insns = vec![Insn::ldc2(constant), Insn::simple(Opcode::Lreturn)];
        edit.code.max_stack = 2;
        tracing::debug!(rule = "interactionTimeout", fixed, "replaced timeout body");
        Ok(RuleEffect::Applied { edits: 1 })
    }

    fn redirect_constants(&self, class: &mut ClassFile, index: usize) -> Result<RuleEffect, RuleError> {
        let multiplier = self.settings.ping_multiplier;
        let base = self.settings.base_timeout_ms;
        let code = class.methods[index]
            .code()
            .ok_or_else(|| RuleError::conflict(format!("{METHOD} has no body")))?;

        let host_multiplier = wide_constants(code, &class.pool, |c| is_double(c, HOST_MULTIPLIER));
        let host_base = wide_constants(code, &class.pool, |c| is_long(c, HOST_BASE_MS));
        let configured = !wide_constants(code, &class.pool, |c| is_double(c, multiplier)).is_empty()
            && !wide_constants(code, &class.pool, |c| is_long(c, base)).is_empty();

        let pending_multiplier = if is_double_value(multiplier, HOST_MULTIPLIER) {
            Vec::new()
        } else {
            host_multiplier
        };
        let pending_base = if base == HOST_BASE_MS { Vec::new() } else { host_base };

        if pending_multiplier.is_empty() && pending_base.is_empty() {
            return if configured {
                Ok(RuleEffect::AlreadyApplied)
            } else {
                Err(RuleError::pattern_not_found(
                    format!("{METHOD}{DESCRIPTOR}"),
                    "ldc2_w 2.0d ... ldc2_w 3000L",
                ))
            };
        }

        let edit = class.edit_method(index)?;
        let edits = pending_multiplier.len() + pending_base.len();
        if !pending_multiplier.is_empty() {
            let constant = edit.pool.intern_double(multiplier)?;
            for pos in pending_multiplier {
                edit.code.insns[pos] = Insn::ldc2(constant);
            }
        }
        if !pending_base.is_empty() {
            let constant = edit.pool.intern_long(base)?;
            for pos in pending_base {
                edit.code.insns[pos] = Insn::ldc2(constant);
            }
        }
        tracing::debug!(
            rule = "interactionTimeout",
            multiplier,
            base,
            edits,
            "redirected timeout constants"
        );
        Ok(RuleEffect::Applied { edits })
    }
}

fn is_double_value(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits()
}

fn is_double(constant: &Constant, value: f64) -> bool {
    matches!(constant, Constant::Double(bits) if *bits == value.to_bits())
}

fn is_long(constant: &Constant, value: i64) -> bool {
    matches!(constant, Constant::Long(v) if *v == value)
}

/// Positions of `ldc2_w` instructions whose constant satisfies `pred`
fn wide_constants(code: &Code, pool: &ConstantPool, pred: impl Fn(&Constant) -> bool) -> Vec<usize> {
    code.instructions()
        .filter_map(|(pos, insn)| match insn {
            Insn::Ldc {
                op: Opcode::Ldc2W,
                index,
            } if pool.get(*index).is_ok_and(&pred) => Some(pos),
            _ => None,
        })
        .collect()
}

impl TransformRule for InteractionTimeoutRule {
    fn id(&self) -> &'static str {
        "interactionTimeout"
    }

    fn description(&self) -> &'static str {
        "PacketHandler.getOperationTimeoutThreshold: use the configured ping multiplier and base timeout"
    }

    fn targets(&self) -> Vec<Target> {
        vec![Target::exact(TARGET)]
    }

    fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
        if let Some(problem) = self.settings.problem() {
            return Err(RuleError::conflict(problem));
        }
        let index = require_method(class, METHOD, DESCRIPTOR)?;
        match self.settings.fixed_timeout_ms {
            Some(fixed) => Self::replace_body(class, index, fixed),
            None => self.redirect_constants(class, index),
        }
    }
}
