//! Human-readable listing of a class file
//!
//! Used by the CLI `inspect` command and in test failure output.

use crate::class::ClassFile;
use crate::code::Code;
use crate::error::ClassError;
use crate::frame::{Frame, VType};
use crate::insn::Insn;
use crate::pool::{Constant, ConstantPool};
use std::fmt::Write;

/// Render a listing of every method body
///
/// # Errors
/// Fails if names or descriptors in the pool are malformed.
pub fn disassemble(class: &ClassFile) -> Result<String, ClassError> {
    let mut out = String::new();
    let _ = write!(out, "class {}", class.name()?);
    if let Some(super_name) = class.super_name()? {
        let _ = write!(out, " extends {super_name}");
    }
    let _ = writeln!(
        out,
        " (version {}.{}, {} constants)",
        class.major_version,
        class.minor_version,
        class.pool.count()
    );

    for index in 0..class.methods.len() {
        let method = &class.methods[index];
        let _ = writeln!(
            out,
            "\n  method {}{} [access {:#06x}]{}",
            class.method_name(index)?,
            class.method_descriptor(index)?,
            method.access,
            if method.is_modified() { " (modified)" } else { "" }
        );
        if let Some(code) = method.code() {
            write_code(&mut out, code, &class.pool)?;
        }
    }
    Ok(out)
}

fn write_code(out: &mut String, code: &Code, pool: &ConstantPool) -> Result<(), ClassError> {
    let _ = writeln!(out, "    max_stack={} max_locals={}", code.max_stack, code.max_locals);
    for insn in &code.insns {
        match insn {
            Insn::Label(label) => {
                let _ = write!(out, "    {label}:");
                if let Some(frame) = code.frames.get(label) {
                    let _ = write!(out, "  {}", render_frame(frame));
                }
                let _ = writeln!(out);
            }
            other => {
                let _ = writeln!(out, "      {}", render_insn(other, pool)?);
            }
        }
    }
    for handler in &code.handlers {
        let catch = match handler.catch_type {
            Some(index) => pool.class_name(index)?,
            None => "any",
        };
        let _ = writeln!(
            out,
            "    try {}..{} -> {} catch {catch}",
            handler.start, handler.end, handler.handler
        );
    }
    Ok(())
}

fn render_vtype(ty: &VType) -> String {
    match ty {
        VType::Top => "top".into(),
        VType::Integer => "int".into(),
        VType::Float => "float".into(),
        VType::Long => "long".into(),
        VType::Double => "double".into(),
        VType::Null => "null".into(),
        VType::UninitializedThis => "uninit_this".into(),
        VType::Object(name) => name.clone(),
        VType::Uninitialized(label) => format!("uninit@{label}"),
    }
}

fn render_frame(frame: &Frame) -> String {
    let list = |types: &[VType]| types.iter().map(render_vtype).collect::<Vec<_>>().join(", ");
    format!("[locals: {}] [stack: {}]", list(&frame.locals), list(&frame.stack))
}

/// One-line rendering of an instruction with resolved operands
///
/// # Errors
/// Fails if a referenced pool entry is malformed.
pub fn render_insn(insn: &Insn, pool: &ConstantPool) -> Result<String, ClassError> {
    let Some(op) = insn.opcode() else {
        return Ok(String::new());
    };
    let name = op.mnemonic();
    Ok(match insn {
        Insn::Label(_) | Insn::Simple(_) => name.to_owned(),
        Insn::Push { value, .. } => format!("{name} {value}"),
        Insn::NewArray(kind) => format!("{name} {kind}"),
        Insn::Var { index, .. } => format!("{name} {index}"),
        Insn::Iinc { index, delta } => format!("{name} {index} {delta}"),
        Insn::Jump { target, .. } => format!("{name} {target}"),
        Insn::Ldc { index, .. } => {
            let value = match pool.get(*index)? {
                Constant::String(_) => format!("{:?}", pool.string(*index)?),
                Constant::Integer(v) => v.to_string(),
                Constant::Long(v) => format!("{v}L"),
                Constant::Float(bits) => format!("{}f", f32::from_bits(*bits)),
                Constant::Double(bits) => format!("{}d", f64::from_bits(*bits)),
                Constant::Class(_) => format!("{}.class", pool.class_name(*index)?),
                other => other.kind_name().to_owned(),
            };
            format!("{name} {value}")
        }
        Insn::Field { index, .. }
        | Insn::Method { index, .. }
        | Insn::InvokeInterface { index, .. } => {
            let member = pool.member(*index)?;
            format!("{name} {}.{}:{}", member.owner, member.name, member.descriptor)
        }
        Insn::InvokeDynamic { index } => {
            let (method, descriptor) = pool.dynamic(*index)?;
            format!("{name} {method}:{descriptor}")
        }
        Insn::Type { index, .. } => format!("{name} {}", pool.class_name(*index)?),
        Insn::MultiANewArray { index, dims } => {
            format!("{name} {} {dims}", pool.class_name(*index)?)
        }
        Insn::TableSwitch {
            default,
            low,
            targets,
        } => {
            let arms = targets
                .iter()
                .zip(*low..)
                .map(|(t, k)| format!("{k}: {t}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{name} {{{arms}, default: {default}}}")
        }
        Insn::LookupSwitch { default, pairs } => {
            let arms = pairs
                .iter()
                .map(|(k, t)| format!("{k}: {t}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{name} {{{arms}, default: {default}}}")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::access;
    use crate::opcode::Opcode;

    #[test]
    fn listing_names_members() {
        let mut class = ClassFile::new("t/L", Some("java/lang/Object"), access::PUBLIC, 52).unwrap();
        let out = class
            .pool
            .intern_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        let mut code = Code::new(0);
        code.insns = vec![
            Insn::field(Opcode::Getstatic, out),
            Insn::simple(Opcode::Pop),
            Insn::simple(Opcode::Return),
        ];
        class.add_method(access::STATIC, "go", "()V", code).unwrap();

        let listing = disassemble(&class).unwrap();
        assert!(listing.contains("class t/L extends java/lang/Object"));
        assert!(listing.contains("getstatic java/lang/System.out:Ljava/io/PrintStream;"));
        assert!(listing.contains("method go()V"));
    }
}
