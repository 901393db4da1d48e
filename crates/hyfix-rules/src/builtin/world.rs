//! `world`: let `World.addPlayer` proceed when the player still looks
//! attached to another world
//!
//! Teleporting through an instance portal can call `addPlayer` before the
//! asynchronous removal from the previous world finished; the guard then
//! throws `IllegalStateException("Player is already in a world")` and the
//! player is stuck. The rule keeps the exception construction but drops the
//! `athrow`, logging a warning instead.

use super::support::{conclude, is_string_ldc, println, Site, Stream};
use crate::error::RuleError;
use crate::rule::{RuleEffect, Target, TransformRule};
use hyfix_classfile::{ClassFile, Insn, Opcode};

const TARGET: &str = "com/hypixel/hytale/server/core/universe/world/World";
const METHOD: &str = "addPlayer";
const GUARD_MESSAGE: &str = "Player is already in a world";
const WARNING: &str = "[HyFixes-Early] WARNING: Player already in world during addPlayer - proceeding anyway (race condition handled)";

/// Replace the already-in-world `athrow` with `pop` and a warning
#[derive(Debug, Default)]
pub struct WorldAddPlayerRule;

impl WorldAddPlayerRule {
    /// Create rule
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn locate(class: &ClassFile, index: usize) -> (Site, Option<usize>) {
        let Some(code) = class.methods[index].code() else {
            return (Site::Missing, None);
        };
        let pool = &class.pool;
        if code.insns.iter().any(|i| is_string_ldc(pool, i, WARNING)) {
            return (Site::Already, None);
        }
        let Some(message) = code.find_from(0, |i| is_string_ldc(pool, i, GUARD_MESSAGE)) else {
            return (Site::Missing, None);
        };
        // the first block end after the message must be the throw
        let end = code.find_from(message + 1, Insn::ends_block);
        match end {
            Some(pos) if code.insns[pos] == Insn::simple(Opcode::Athrow) => {
                (Site::Patched(1), Some(pos))
            }
            _ => (Site::Missing, None),
        }
    }
}

impl TransformRule for WorldAddPlayerRule {
    fn id(&self) -> &'static str {
        "world"
    }

    fn description(&self) -> &'static str {
        "World.addPlayer: log instead of throwing when the player is still attached to another world"
    }

    fn targets(&self) -> Vec<Target> {
        vec![Target::exact(TARGET)]
    }

    fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
        let methods = class.methods_named(METHOD);
        if methods.is_empty() {
            return Err(RuleError::method_not_found(class.name()?, METHOD));
        }

        let mut sites = Vec::with_capacity(methods.len());
        for index in methods {
            let (site, athrow) = Self::locate(class, index);
            if let Some(pos) = athrow {
                let edit = class.edit_method(index)?;
                let next = edit.code.next_insn(pos).ok_or_else(|| {
                    RuleError::conflict("athrow is the last instruction of addPlayer")
                })?;
                let stack_carrying_frame = edit.code.insns[pos + 1..next].iter().any(|i| {
                    matches!(i, Insn::Label(l) if edit.code.frames.get(l).is_some_and(|f| !f.stack.is_empty()))
                });
                if stack_carrying_frame {
                    return Err(RuleError::conflict(
                        "code after the addPlayer guard expects operands on the stack",
                    ));
                }

                let warn = println(edit.pool, Stream::Out, WARNING)?;
                edit.code
                    .replace(pos, std::iter::once(Insn::simple(Opcode::Pop)).chain(warn));
                tracing::debug!(rule = "world", position = pos, "replaced athrow with warning");
            }
            sites.push(site);
        }
        conclude(sites, METHOD, "ldc \"Player is already in a world\" ... athrow")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyfix_classfile::validate::check_integrity;
    use hyfix_test_utils as fixtures;

    fn world() -> ClassFile {
        ClassFile::parse(&fixtures::world()).unwrap()
    }

    #[test]
    fn replaces_throw_with_warning() {
        let mut class = world();
        let effect = WorldAddPlayerRule.apply(&mut class).unwrap();
        assert_eq!(effect, RuleEffect::Applied { edits: 1 });

        let index = class.methods_named(METHOD)[0];
        let code = class.methods[index].code().unwrap();
        assert!(!code.insns.contains(&Insn::simple(Opcode::Athrow)));
        assert!(code.insns.iter().any(|i| is_string_ldc(&class.pool, i, WARNING)));
    }

    #[test]
    fn second_application_is_noop() {
        let mut class = world();
        WorldAddPlayerRule.apply(&mut class).unwrap();
        let once = class.clone();
        assert_eq!(
            WorldAddPlayerRule.apply(&mut class).unwrap(),
            RuleEffect::AlreadyApplied
        );
        assert_eq!(class, once);
    }

    #[test]
    fn patched_class_keeps_integrity() {
        let mut class = world();
        WorldAddPlayerRule.apply(&mut class).unwrap();
        let index = class.methods_named(METHOD)[0];
        class.methods[index].code_mut().unwrap().max_stack = 3;
        check_integrity(&class, &[index]).unwrap();
    }

    #[test]
    fn missing_guard_is_pattern_error() {
        let mut class = ClassFile::parse(&fixtures::bed_manager(true)).unwrap();
        assert!(matches!(
            WorldAddPlayerRule.apply(&mut class),
            Err(RuleError::TargetMethodNotFound { .. })
        ));

        let mut class = world();
        let index = class.methods_named(METHOD)[0];
        let code = class.methods[index].code_mut().unwrap();
        code.insns.retain(|i| *i != Insn::simple(Opcode::Athrow));
        code.insns.insert(code.insns.len() - 2, Insn::simple(Opcode::Return));
        assert!(matches!(
            WorldAddPlayerRule.apply(&mut class),
            Err(RuleError::TargetPatternNotFound { .. })
        ));
    }
}
