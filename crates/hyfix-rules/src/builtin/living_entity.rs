//! `livingEntity`: guard inventory ownership on `setInventory`
//!
//! Two entities sharing one `Inventory` instance duplicate items. Every
//! `setInventory(Inventory, ...)` overload first passes its argument through
//! `InventoryOwnershipGuard.validateAndClone`, which clones inventories owned
//! by someone else. The call lives in a private helper appended to the class
//! so that a missing guard class (`Throwable` at link time) falls back to
//! the original argument.

use super::support::{is_call, leading};
use crate::error::RuleError;
use crate::rule::{RuleEffect, Target, TransformRule};
use hyfix_classfile::{access, ClassFile, Code, Frame, Handler, Insn, Opcode, VType};

const TARGET: &str = "com/hypixel/hytale/server/core/entity/LivingEntity";
const INVENTORY: &str = "com/hypixel/hytale/server/core/inventory/Inventory";
const GUARD: &str = "com/hyfixes/guard/InventoryOwnershipGuard";
const METHOD: &str = "setInventory";
const HELPER: &str = "hyfix$guardInventory";

/// Route `setInventory` arguments through the ownership guard
#[derive(Debug, Default)]
pub struct LivingEntityRule;

impl LivingEntityRule {
    /// Create rule
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn helper_descriptor(owner: &str) -> String {
    format!("(L{owner};L{INVENTORY};)L{INVENTORY};")
}

/// `setInventory` overloads taking an `Inventory` first
fn targets(class: &ClassFile) -> Vec<usize> {
    let prefix = format!("(L{INVENTORY};");
    class
        .methods_named(METHOD)
        .into_iter()
        .filter(|&i| {
            !class.methods[i].is_static()
                && class.method_descriptor(i).is_ok_and(|d| d.starts_with(&prefix))
        })
        .collect()
}

/// Entry sequence `aload_0; aload_1; invokestatic helper; astore_1`
fn entry_call(helper: hyfix_classfile::CpIndex) -> [Insn; 4] {
    [
        Insn::aload(0),
        Insn::aload(1),
        Insn::method(Opcode::Invokestatic, helper),
        Insn::astore(1),
    ]
}

fn is_guarded(class: &ClassFile, index: usize, owner: &str) -> bool {
    let Some(code) = class.methods[index].code() else {
        return false;
    };
    let descriptor = helper_descriptor(owner);
    matches!(
        leading(code, 4).as_slice(),
        [Insn::Var { op: Opcode::Aload, index: 0 }, Insn::Var { op: Opcode::Aload, index: 1 }, call, Insn::Var { op: Opcode::Astore, index: 1 }]
            if is_call(&class.pool, call, owner, HELPER, &descriptor)
    )
}

/// Private static helper:
///
/// ```text
/// start:  aload_0; aload_1; invokestatic Guard.validateAndClone; areturn
/// handler (Throwable): pop; aload_1; areturn
/// ```
fn add_helper(class: &mut ClassFile, owner: &str) -> Result<usize, RuleError> {
    let guard = class.pool.intern_method_ref(
        GUARD,
        "validateAndClone",
        &format!("(L{TARGET};L{INVENTORY};)L{INVENTORY};"),
    )?;
    let throwable = class.pool.intern_class("java/lang/Throwable")?;

    let mut code = Code::new(2);
    let start = code.new_label();
    let end = code.new_label();
    let handler = code.new_label();
    code.max_stack = 2;
    code.insns = vec![
        Insn::Label(start),
        Insn::aload(0),
        Insn::aload(1),
        Insn::method(Opcode::Invokestatic, guard),
        Insn::Label(end),
        Insn::simple(Opcode::Areturn),
        Insn::Label(handler),
        Insn::simple(Opcode::Pop),
        Insn::aload(1),
        Insn::simple(Opcode::Areturn),
    ];
    code.handlers.push(Handler {
        start,
        end,
        handler,
        catch_type: Some(throwable),
    });
    code.frames.insert(
        handler,
        Frame::new(
            vec![VType::object(owner), VType::object(INVENTORY)],
            vec![VType::object("java/lang/Throwable")],
        ),
    );
    Ok(class.add_method(
        access::PRIVATE | access::STATIC | access::SYNTHETIC,
        HELPER,
        &helper_descriptor(owner),
        code,
    )?)
}

impl TransformRule for LivingEntityRule {
    fn id(&self) -> &'static str {
        "livingEntity"
    }

    fn description(&self) -> &'static str {
        "LivingEntity.setInventory: clone inventories already owned by another entity"
    }

    fn targets(&self) -> Vec<Target> {
        vec![Target::exact(TARGET)]
    }

    fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
        let owner = class.name()?.to_owned();
        let methods = targets(class);
        if methods.is_empty() {
            return Err(RuleError::method_not_found(
                owner,
                format!("{METHOD}(L{INVENTORY};...)"),
            ));
        }
        let pending: Vec<usize> = methods
            .into_iter()
            .filter(|&i| !is_guarded(class, i, &owner))
            .collect();
        if pending.is_empty() {
            return Ok(RuleEffect::AlreadyApplied);
        }

        let descriptor = helper_descriptor(&owner);
        let mut edits = 0;
        if class.find_method(HELPER, &descriptor).is_none() {
            add_helper(class, &owner)?;
            edits += 1;
        }
        let helper = class.pool.intern_method_ref(&owner, HELPER, &descriptor)?;

        for index in pending {
            let edit = class.edit_method(index)?;
            edit.code.insert(0, entry_call(helper));
            edit.code.max_stack = edit.code.max_stack.max(2);
            tracing::debug!(
                rule = "livingEntity",
                descriptor = %edit.context.descriptor,
                "guarded setInventory"
            );
            edits += 1;
        }
        Ok(RuleEffect::Applied { edits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyfix_classfile::validate::check_integrity;
    use hyfix_test_utils as fixtures;

    fn entity() -> ClassFile {
        ClassFile::parse(&fixtures::living_entity()).unwrap()
    }

    #[test]
    fn guards_every_overload_through_one_helper() {
        let mut class = entity();
        let methods_before = class.methods.len();
        assert_eq!(
            LivingEntityRule.apply(&mut class).unwrap(),
            RuleEffect::Applied { edits: 3 }
        );
        assert_eq!(class.methods.len(), methods_before + 1);

        let owner = class.name().unwrap().to_owned();
        for index in targets(&class) {
            assert!(is_guarded(&class, index, &owner));
        }
        let helper = class.find_method(HELPER, &helper_descriptor(&owner)).unwrap();
        assert_eq!(
            class.methods[helper].access,
            access::PRIVATE | access::STATIC | access::SYNTHETIC
        );
        let every: Vec<usize> = (0..class.methods.len()).collect();
        check_integrity(&class, &every).unwrap();
    }

    #[test]
    fn second_application_is_noop() {
        let mut class = entity();
        LivingEntityRule.apply(&mut class).unwrap();
        let once = class.clone();
        assert_eq!(
            LivingEntityRule.apply(&mut class).unwrap(),
            RuleEffect::AlreadyApplied
        );
        assert_eq!(class, once);
    }

    #[test]
    fn helper_reused_for_new_overload() {
        let mut class = entity();
        LivingEntityRule.apply(&mut class).unwrap();
        let owner = class.name().unwrap().to_owned();
        let index = targets(&class)[0];
        class.methods[index].code_mut().unwrap().insns.drain(..4);

        assert_eq!(
            LivingEntityRule.apply(&mut class).unwrap(),
            RuleEffect::Applied { edits: 1 }
        );
        assert!(is_guarded(&class, index, &owner));
    }

    #[test]
    fn helper_round_trips() {
        let mut class = entity();
        LivingEntityRule.apply(&mut class).unwrap();
        let bytes = class.to_bytes().unwrap();
        let reparsed = ClassFile::parse(&bytes).unwrap();
        let owner = reparsed.name().unwrap().to_owned();
        let helper = reparsed
            .find_method(HELPER, &helper_descriptor(&owner))
            .unwrap();
        let code = reparsed.methods[helper].code().unwrap();
        assert_eq!(code.handlers.len(), 1);
        assert_eq!(code.frames.len(), 1);
    }
}
