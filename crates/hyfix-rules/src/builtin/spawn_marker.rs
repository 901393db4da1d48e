//! `spawnMarkerEntity`: never store a null `npcReferences` array
//!
//! Markers saved with a null array deserialize back to null and later crash
//! the marker systems. The rule prepends
//!
//! ```text
//!     aload refs
//!     ifnonnull skip
//!     iconst_0
//!     anewarray InvalidatablePersistentRef
//!     astore refs
//! skip:
//! ```
//!
//! to `setNpcReferences`, with an explicit frame at `skip`.

use super::support::{framed_label_at, is_type_insn, leading, require_method};
use crate::error::RuleError;
use crate::rule::{RuleEffect, Target, TransformRule};
use hyfix_classfile::{ClassFile, Insn, Opcode};

const TARGET: &str = "com/hypixel/hytale/server/spawning/spawnmarkers/SpawnMarkerEntity";
const METHOD: &str = "setNpcReferences";
const REFERENCE: &str = "com/hypixel/hytale/server/core/entity/reference/InvalidatablePersistentRef";

/// Replace a null `npcReferences` argument with an empty array
#[derive(Debug, Default)]
pub struct SpawnMarkerEntityRule;

impl SpawnMarkerEntityRule {
    /// Create rule
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn descriptor() -> String {
        format!("([L{REFERENCE};)V")
    }
}

impl TransformRule for SpawnMarkerEntityRule {
    fn id(&self) -> &'static str {
        "spawnMarkerEntity"
    }

    fn description(&self) -> &'static str {
        "SpawnMarkerEntity.setNpcReferences: replace a null array with an empty one"
    }

    fn targets(&self) -> Vec<Target> {
        vec![Target::exact(TARGET)]
    }

    fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
        let descriptor = Self::descriptor();
        let index = require_method(class, METHOD, &descriptor)?;
        let context = class.method_context(index)?;
        let slot = u16::from(!context.is_static);

        let code = class.methods[index]
            .code()
            .ok_or_else(|| RuleError::conflict(format!("{METHOD} has no body")))?;
        let head = leading(code, 4);
        let guarded = matches!(
            head.as_slice(),
            [Insn::Var { op: Opcode::Aload, index: a }, Insn::Jump { op: Opcode::Ifnonnull, .. }, Insn::Simple(Opcode::Iconst0), array]
                if *a == slot && is_type_insn(&class.pool, array, Opcode::Anewarray, REFERENCE)
        );
        if guarded {
            return Ok(RuleEffect::AlreadyApplied);
        }

        let edit = class.edit_method(index)?;
        let array = edit.pool.intern_class(REFERENCE)?;
        let skip = match framed_label_at(edit.code, 0) {
            Some(label) => label,
            None => {
                let label = edit.code.new_label();
                edit.code.frames.insert(label, context.initial_frame());
                edit.code.insns.insert(0, Insn::Label(label));
                label
            }
        };
        edit.code.insert(
            0,
            [
                Insn::aload(slot),
                Insn::jump(Opcode::Ifnonnull, skip),
                Insn::simple(Opcode::Iconst0),
                Insn::type_insn(Opcode::Anewarray, array),
                Insn::astore(slot),
            ],
        );
        edit.code.max_stack = edit.code.max_stack.max(1);
        tracing::debug!(rule = "spawnMarkerEntity", "injected null check into {METHOD}");
        Ok(RuleEffect::Applied { edits: 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyfix_classfile::validate::check_integrity;
    use hyfix_classfile::{Frame, VType};
    use hyfix_test_utils as fixtures;
    use pretty_assertions::assert_eq;

    fn marker() -> ClassFile {
        ClassFile::parse(&fixtures::spawn_marker_entity()).unwrap()
    }

    #[test]
    fn injects_null_check_with_frame() {
        let mut class = marker();
        assert_eq!(
            SpawnMarkerEntityRule.apply(&mut class).unwrap(),
            RuleEffect::Applied { edits: 1 }
        );
        let index = class.methods_named(METHOD)[0];
        let code = class.methods[index].code().unwrap();
        let Insn::Jump { target, .. } = code.insns[1] else {
            panic!("expected ifnonnull, got {:?}", code.insns[1]);
        };
        assert_eq!(
            code.frames[&target],
            Frame::new(
                vec![
                    VType::object(fixtures::SPAWN_MARKER_ENTITY),
                    VType::object(format!("[L{REFERENCE};")),
                ],
                vec![],
            )
        );
        check_integrity(&class, &[index]).unwrap();
    }

    #[test]
    fn patched_bytes_reparse() {
        let mut class = marker();
        SpawnMarkerEntityRule.apply(&mut class).unwrap();
        let reparsed = ClassFile::parse(&class.to_bytes().unwrap()).unwrap();
        let index = reparsed.methods_named(METHOD)[0];
        assert_eq!(reparsed.methods[index].code().unwrap().frames.len(), 1);
    }

    #[test]
    fn second_application_is_noop() {
        let mut class = marker();
        SpawnMarkerEntityRule.apply(&mut class).unwrap();
        assert_eq!(
            SpawnMarkerEntityRule.apply(&mut class).unwrap(),
            RuleEffect::AlreadyApplied
        );
    }

    #[test]
    fn wrong_signature_is_method_error() {
        let mut class = ClassFile::parse(&fixtures::bed_manager(true)).unwrap();
        assert!(matches!(
            SpawnMarkerEntityRule.apply(&mut class),
            Err(RuleError::TargetMethodNotFound { .. })
        ));
    }
}
