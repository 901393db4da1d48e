//! Structural integrity checks
//!
//! Not a bytecode verifier. Checks what a rewrite can plausibly break:
//! constant pool reference kinds, the method table, label binding in
//! bodies, and (for selected methods) stack depth consistency against the
//! declared maxima.

use crate::analysis::{compute_max_locals, compute_max_stack, AnalysisError};
use crate::class::{access, ClassFile, Method};
use crate::code::Code;
use crate::descriptor::{FieldType, MethodDescriptor};
use crate::insn::{Insn, Label};
use crate::opcode::Opcode;
use crate::pool::{Constant, ConstantPool, CpIndex};
use std::collections::{HashMap, HashSet};

/// Integrity violation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Bad constant pool entry
    #[error("constant #{index}: {reason}")]
    Pool { index: u16, reason: String },

    /// Bad class header, interface or field
    #[error("class structure: {0}")]
    Structure(String),

    /// Two methods share name and descriptor
    #[error("duplicate method {0}")]
    DuplicateMethod(String),

    /// Bad method declaration or body
    #[error("method {method}: {reason}")]
    Method { method: String, reason: String },

    /// Stack or locals analysis failed for a method
    #[error("method {method}: {source}")]
    Analysis {
        method: String,
        #[source]
        source: AnalysisError,
    },
}

impl ValidationError {
    fn pool(index: CpIndex, reason: impl Into<String>) -> Self {
        Self::Pool {
            index: index.0,
            reason: reason.into(),
        }
    }

    fn method(method: &str, reason: impl Into<String>) -> Self {
        Self::Method {
            method: method.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Check the whole class; `deep` lists methods whose stack depth and
/// maxima are re-derived (normally the ones a rewrite touched)
///
/// # Errors
/// Returns the first violation found.
pub fn check_integrity(class: &ClassFile, deep: &[usize]) -> Result<(), ValidationError> {
    check_pool(&class.pool)?;
    check_header(class)?;

    let mut seen = HashSet::new();
    for (index, method) in class.methods.iter().enumerate() {
        let label = check_method_signature(&class.pool, method)?;
        if !seen.insert(label.clone()) {
            return Err(ValidationError::DuplicateMethod(label));
        }
        check_method_body(&class.pool, method, &label)?;

        if deep.contains(&index) {
            if let Some(code) = method.code() {
                check_depth(class, index, code, &label)?;
            }
        }
    }
    Ok(())
}

fn check_pool(pool: &ConstantPool) -> Result<(), ValidationError> {
    let kind = |index: CpIndex, want: fn(&Constant) -> bool, what: &str| {
        match pool.get(index) {
            Ok(c) if want(c) => Ok(()),
            Ok(c) => Err(format!("#{} is {}, expected {what}", index.0, c.kind_name())),
            Err(e) => Err(e.to_string()),
        }
    };
    let utf8 = |c: &Constant| matches!(c, Constant::Utf8(_));
    let class = |c: &Constant| matches!(c, Constant::Class(_));
    let nat = |c: &Constant| matches!(c, Constant::NameAndType { .. });
    let member = |c: &Constant| {
        matches!(
            c,
            Constant::FieldRef { .. } | Constant::MethodRef { .. } | Constant::InterfaceMethodRef { .. }
        )
    };

    for (index, constant) in pool.iter() {
        let result = match constant {
            Constant::Class(i)
            | Constant::String(i)
            | Constant::MethodType(i)
            | Constant::Module(i)
            | Constant::Package(i) => kind(*i, utf8, "Utf8"),
            Constant::FieldRef { class: c, name_and_type }
            | Constant::MethodRef { class: c, name_and_type }
            | Constant::InterfaceMethodRef { class: c, name_and_type } => {
                kind(*c, class, "Class").and_then(|()| kind(*name_and_type, nat, "NameAndType"))
            }
            Constant::NameAndType { name, descriptor } => {
                kind(*name, utf8, "Utf8").and_then(|()| kind(*descriptor, utf8, "Utf8"))
            }
            Constant::MethodHandle { kind: k, reference } => {
                if (1..=9).contains(k) {
                    kind(*reference, member, "member reference")
                } else {
                    Err(format!("invalid method handle kind {k}"))
                }
            }
            Constant::Dynamic { name_and_type, .. } | Constant::InvokeDynamic { name_and_type, .. } => {
                kind(*name_and_type, nat, "NameAndType")
            }
            _ => Ok(()),
        };
        result.map_err(|reason| ValidationError::pool(index, reason))?;
    }
    Ok(())
}

fn check_header(class: &ClassFile) -> Result<(), ValidationError> {
    let structure = |e: crate::error::ClassError| ValidationError::Structure(e.to_string());

    class.name().map_err(structure)?;
    class.super_name().map_err(structure)?;
    for interface in &class.interfaces {
        class.pool.class_name(*interface).map_err(structure)?;
    }
    for field in &class.fields {
        class.pool.utf8(field.name).map_err(structure)?;
        FieldType::parse(class.pool.utf8(field.descriptor).map_err(structure)?).map_err(structure)?;
    }
    Ok(())
}

fn check_method_signature(pool: &ConstantPool, method: &Method) -> Result<String, ValidationError> {
    let name = pool
        .utf8(method.name)
        .map_err(|e| ValidationError::Structure(e.to_string()))?;
    let descriptor = pool
        .utf8(method.descriptor)
        .map_err(|e| ValidationError::Structure(e.to_string()))?;
    let label = format!("{name}{descriptor}");
    MethodDescriptor::parse(descriptor).map_err(|e| ValidationError::method(&label, e.to_string()))?;
    Ok(label)
}

fn check_method_body(pool: &ConstantPool, method: &Method, label: &str) -> Result<(), ValidationError> {
    let bodiless = method.access & (access::ABSTRACT | access::NATIVE) != 0;
    let Some(code) = method.code() else {
        if bodiless {
            return Ok(());
        }
        return Err(ValidationError::method(label, "concrete method without code"));
    };
    if bodiless {
        return Err(ValidationError::method(label, "abstract or native method with code"));
    }

    let mut bound: HashMap<Label, usize> = HashMap::new();
    for (position, insn) in code.insns.iter().enumerate() {
        if let Insn::Label(l) = insn {
            if bound.insert(*l, position).is_some() {
                return Err(ValidationError::method(label, format!("label {l} bound twice")));
            }
        }
    }
    let position = |l: Label| {
        bound
            .get(&l)
            .copied()
            .ok_or_else(|| ValidationError::method(label, format!("label {l} is not bound")))
    };

    for insn in &code.insns {
        for target in insn.targets() {
            position(target)?;
        }
        check_insn_operand(pool, insn).map_err(|reason| ValidationError::method(label, reason))?;
    }

    for handler in &code.handlers {
        if position(handler.start)? >= position(handler.end)? {
            return Err(ValidationError::method(label, "empty exception handler range"));
        }
        position(handler.handler)?;
        if let Some(catch) = handler.catch_type {
            pool.class_name(catch)
                .map_err(|e| ValidationError::method(label, e.to_string()))?;
        }
    }

    for frame_label in code.frames.keys() {
        position(*frame_label)?;
    }
    for entry in &code.line_numbers {
        position(entry.start)?;
    }
    for entry in code.local_variables.iter().chain(&code.local_variable_types) {
        position(entry.start)?;
        position(entry.end)?;
    }
    Ok(())
}

fn check_insn_operand(pool: &ConstantPool, insn: &Insn) -> Result<(), String> {
    let Some(index) = insn.pool_index() else {
        return Ok(());
    };
    let constant = pool.get(index).map_err(|e| e.to_string())?;
    let ok = match insn {
        Insn::Ldc { op: Opcode::Ldc2W, .. } => {
            matches!(constant, Constant::Long(_) | Constant::Double(_) | Constant::Dynamic { .. })
        }
        Insn::Ldc { .. } => matches!(
            constant,
            Constant::Integer(_)
                | Constant::Float(_)
                | Constant::String(_)
                | Constant::Class(_)
                | Constant::MethodType(_)
                | Constant::MethodHandle { .. }
                | Constant::Dynamic { .. }
        ),
        Insn::Field { .. } => matches!(constant, Constant::FieldRef { .. }),
        Insn::Method {
            op: Opcode::Invokevirtual,
            ..
        } => matches!(constant, Constant::MethodRef { .. }),
        Insn::Method { .. } => matches!(
            constant,
            Constant::MethodRef { .. } | Constant::InterfaceMethodRef { .. }
        ),
        Insn::InvokeInterface { .. } => matches!(constant, Constant::InterfaceMethodRef { .. }),
        Insn::InvokeDynamic { .. } => matches!(constant, Constant::InvokeDynamic { .. }),
        Insn::Type { .. } | Insn::MultiANewArray { .. } => matches!(constant, Constant::Class(_)),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "{} refers to {} ({})",
            insn.opcode().map_or("?", Opcode::mnemonic),
            index,
            constant.kind_name()
        ))
    }
}

fn check_depth(class: &ClassFile, index: usize, code: &Code, label: &str) -> Result<(), ValidationError> {
    let analysis = |source: AnalysisError| ValidationError::Analysis {
        method: label.to_owned(),
        source,
    };
    let context = class
        .method_context(index)
        .map_err(|e| analysis(AnalysisError::Class(e)))?;

    let max_stack = compute_max_stack(code, &class.pool).map_err(analysis)?;
    if max_stack > code.max_stack {
        return Err(ValidationError::method(
            label,
            format!("needs {max_stack} stack slots, declares {}", code.max_stack),
        ));
    }
    let max_locals = compute_max_locals(code, &context);
    if max_locals > code.max_locals {
        return Err(ValidationError::method(
            label,
            format!("needs {max_locals} locals, declares {}", code.max_locals),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::access;

    fn class() -> ClassFile {
        let mut class = ClassFile::new("t/V", Some("java/lang/Object"), access::PUBLIC, 52).unwrap();
        let mut code = Code::new(1);
        code.max_stack = 1;
        code.insns = vec![Insn::aload(0), Insn::simple(Opcode::Areturn)];
        class
            .add_method(access::PUBLIC, "self", "()Lt/V;", code)
            .unwrap();
        class
    }

    #[test]
    fn well_formed_class_passes() {
        check_integrity(&class(), &[0]).unwrap();
    }

    #[test]
    fn duplicate_method_rejected() {
        let mut class = class();
        let copy = class.methods[0].clone();
        class.methods.push(copy);
        assert_eq!(
            check_integrity(&class, &[]).unwrap_err(),
            ValidationError::DuplicateMethod("self()Lt/V;".into())
        );
    }

    #[test]
    fn understated_max_stack_rejected() {
        let mut class = class();
        class.methods[0].code_mut().unwrap().max_stack = 0;
        assert!(matches!(
            check_integrity(&class, &[0]),
            Err(ValidationError::Method { .. })
        ));
        // shallow checks do not re-derive depth
        check_integrity(&class, &[]).unwrap();
    }

    #[test]
    fn wrong_operand_kind_rejected() {
        let mut class = class();
        let utf8 = class.pool.intern_utf8("not a class").unwrap();
        class.methods[0]
            .code_mut()
            .unwrap()
            .insns
            .insert(0, Insn::type_insn(Opcode::Checkcast, utf8));
        assert!(matches!(
            check_integrity(&class, &[]),
            Err(ValidationError::Method { .. })
        ));
    }

    #[test]
    fn unbound_branch_rejected() {
        let mut class = class();
        let code = class.methods[0].code_mut().unwrap();
        let nowhere = code.new_label();
        code.insns.insert(0, Insn::jump(Opcode::Goto, nowhere));
        assert!(check_integrity(&class, &[]).is_err());
    }
}
