//! Class file encoding
//!
//! Methods whose body was never borrowed mutably are written from their
//! original `Code` bytes. Modified bodies are laid out in a single pass; a
//! short branch that cannot reach its target is an error rather than being
//! widened. Offset-bearing type annotation attributes are dropped from
//! re-encoded bodies since their offsets would be stale.

use crate::class::{Attribute, ClassFile, Method, MethodContext};
use crate::code::{Code, LocalVariable};
use crate::descriptor::MethodDescriptor;
use crate::error::WriteError;
use crate::frame::{Frame, VType};
use crate::insn::{Insn, Label};
use crate::mutf8;
use crate::opcode::Opcode;
use crate::pool::{Constant, ConstantPool, CpIndex};
use crate::reader::MAGIC;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Big-endian append helpers
trait Put {
    fn put_u8(&mut self, v: u8);
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_i32(&mut self, v: i32);
}

impl Put for Vec<u8> {
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.extend_from_slice(&v.to_be_bytes());
    }
}

fn count(n: usize, what: &'static str) -> Result<u16, WriteError> {
    u16::try_from(n).map_err(|_| WriteError::TooManyEntries(what))
}

pub(crate) fn write_class(class: &ClassFile) -> Result<Vec<u8>, WriteError> {
    // Encoding new bodies may add attribute names and frame class entries.
    let mut pool = class.pool.clone();
    let class_name = class.name()?.to_owned();

    let mut body = Vec::new();
    body.put_u16(class.access);
    body.put_u16(class.this_class.0);
    body.put_u16(class.super_class.map_or(0, |c| c.0));

    body.put_u16(count(class.interfaces.len(), "interface")?);
    for interface in &class.interfaces {
        body.put_u16(interface.0);
    }

    body.put_u16(count(class.fields.len(), "field")?);
    for field in &class.fields {
        body.put_u16(field.access);
        body.put_u16(field.name.0);
        body.put_u16(field.descriptor.0);
        write_attributes(&mut body, &field.attributes)?;
    }

    body.put_u16(count(class.methods.len(), "method")?);
    for method in &class.methods {
        write_method(&mut body, method, &mut pool, &class_name)?;
    }

    write_attributes(&mut body, &class.attributes)?;

    let mut out = Vec::with_capacity(body.len() + pool.count() * 8 + 10);
    out.put_u32(MAGIC);
    out.put_u16(class.minor_version);
    out.put_u16(class.major_version);
    write_pool(&mut out, &pool)?;
    out.extend_from_slice(&body);
    Ok(out)
}

fn write_pool(out: &mut Vec<u8>, pool: &ConstantPool) -> Result<(), WriteError> {
    out.put_u16(count(pool.count(), "constant pool")?);
    for (_, constant) in pool.iter() {
        out.put_u8(constant.tag());
        match constant {
            Constant::Unusable => {}
            Constant::Utf8(s) => {
                let bytes = mutf8::encode(s);
                out.put_u16(count(bytes.len(), "utf8 byte")?);
                out.extend_from_slice(&bytes);
            }
            Constant::Integer(v) => out.put_i32(*v),
            Constant::Float(bits) => out.put_u32(*bits),
            Constant::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
            Constant::Double(bits) => out.extend_from_slice(&bits.to_be_bytes()),
            Constant::Class(i)
            | Constant::String(i)
            | Constant::MethodType(i)
            | Constant::Module(i)
            | Constant::Package(i) => out.put_u16(i.0),
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => {
                out.put_u16(class.0);
                out.put_u16(name_and_type.0);
            }
            Constant::NameAndType { name, descriptor } => {
                out.put_u16(name.0);
                out.put_u16(descriptor.0);
            }
            Constant::MethodHandle { kind, reference } => {
                out.put_u8(*kind);
                out.put_u16(reference.0);
            }
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                out.put_u16(*bootstrap);
                out.put_u16(name_and_type.0);
            }
        }
    }
    Ok(())
}

fn write_attribute(out: &mut Vec<u8>, name: CpIndex, info: &[u8]) -> Result<(), WriteError> {
    out.put_u16(name.0);
    out.put_u32(u32::try_from(info.len()).map_err(|_| WriteError::TooManyEntries("attribute byte"))?);
    out.extend_from_slice(info);
    Ok(())
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute]) -> Result<(), WriteError> {
    out.put_u16(count(attributes.len(), "attribute")?);
    for attribute in attributes {
        write_attribute(out, attribute.name, &attribute.info)?;
    }
    Ok(())
}

fn write_method(
    out: &mut Vec<u8>,
    method: &Method,
    pool: &mut ConstantPool,
    class_name: &str,
) -> Result<(), WriteError> {
    out.put_u16(method.access);
    out.put_u16(method.name.0);
    out.put_u16(method.descriptor.0);

    let total = method.attributes.len() + usize::from(method.body.is_some());
    out.put_u16(count(total, "method attribute")?);

    let code_at = method.body_position.min(method.attributes.len());
    for (i, attribute) in method.attributes.iter().enumerate() {
        if i == code_at {
            write_body(out, method, pool, class_name)?;
        }
        write_attribute(out, attribute.name, &attribute.info)?;
    }
    if code_at == method.attributes.len() {
        write_body(out, method, pool, class_name)?;
    }
    Ok(())
}

fn write_body(
    out: &mut Vec<u8>,
    method: &Method,
    pool: &mut ConstantPool,
    class_name: &str,
) -> Result<(), WriteError> {
    let Some(body) = &method.body else {
        return Ok(());
    };
    if let Some(original) = &body.original {
        return write_attribute(out, body.attr_name, original);
    }
    let context = MethodContext {
        class_name: class_name.to_owned(),
        name: pool.utf8(method.name)?.to_owned(),
        descriptor: MethodDescriptor::parse(pool.utf8(method.descriptor)?)?,
        is_static: method.is_static(),
    };
    let info = encode_code(&body.code, pool, &context)?;
    write_attribute(out, body.attr_name, &info)
}

/// Encoded size of one element placed at `offset`
fn insn_size(insn: &Insn, offset: u32) -> u32 {
    let padding = (4 - (offset + 1) % 4) % 4;
    match insn {
        Insn::Label(_) => 0,
        Insn::Simple(_) => 1,
        Insn::Push { op, .. } => {
            if *op == Opcode::Bipush {
                2
            } else {
                3
            }
        }
        Insn::NewArray(_) => 2,
        Insn::Var { op, index } => {
            if *index <= 3 && op.short_form_base().is_some() {
                1
            } else if *index <= 255 {
                2
            } else {
                4
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= 255 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Jump { op, .. } => {
            if matches!(op, Opcode::GotoW | Opcode::JsrW) {
                5
            } else {
                3
            }
        }
        Insn::Ldc { op, index } => {
            if *op == Opcode::Ldc && index.0 <= 255 {
                2
            } else {
                3
            }
        }
        Insn::Field { .. } | Insn::Method { .. } | Insn::Type { .. } => 3,
        Insn::InvokeInterface { .. } | Insn::InvokeDynamic { .. } => 5,
        Insn::MultiANewArray { .. } => 4,
        Insn::TableSwitch { targets, .. } => 1 + padding + 12 + 4 * targets.len() as u32,
        Insn::LookupSwitch { pairs, .. } => 1 + padding + 8 + 8 * pairs.len() as u32,
    }
}

/// Label offsets of a laid-out body
struct Layout {
    offsets: HashMap<Label, u32>,
    code_len: u32,
}

impl Layout {
    fn of(code: &Code) -> Result<Self, WriteError> {
        let mut offsets = HashMap::new();
        let mut offset: u32 = 0;
        for insn in &code.insns {
            if let Insn::Label(label) = insn {
                if offsets.insert(*label, offset).is_some() {
                    return Err(WriteError::DuplicateLabel(*label));
                }
            }
            offset += insn_size(insn, offset);
            if offset > u32::from(u16::MAX) {
                return Err(WriteError::CodeTooLarge(offset as usize));
            }
        }
        if offset == 0 {
            return Err(WriteError::EmptyCode);
        }
        Ok(Self {
            offsets,
            code_len: offset,
        })
    }

    fn resolve(&self, label: Label) -> Result<u32, WriteError> {
        self.offsets
            .get(&label)
            .copied()
            .ok_or(WriteError::UnboundLabel(label))
    }

    fn pc(&self, label: Label) -> Result<u16, WriteError> {
        // code_len <= 65535 so every bound offset fits
        Ok(self.resolve(label)? as u16)
    }
}

fn encode_code(
    code: &Code,
    pool: &mut ConstantPool,
    context: &MethodContext,
) -> Result<Vec<u8>, WriteError> {
    let layout = Layout::of(code)?;

    let mut bytecode = Vec::with_capacity(layout.code_len as usize);
    for insn in &code.insns {
        let offset = bytecode.len() as u32;
        encode_insn(&mut bytecode, insn, offset, &layout)?;
    }

    let mut out = Vec::with_capacity(bytecode.len() + 64);
    out.put_u16(code.max_stack);
    out.put_u16(code.max_locals);
    out.put_u32(layout.code_len);
    out.extend_from_slice(&bytecode);

    out.put_u16(count(code.handlers.len(), "exception handler")?);
    for handler in &code.handlers {
        out.put_u16(layout.pc(handler.start)?);
        out.put_u16(layout.pc(handler.end)?);
        out.put_u16(layout.pc(handler.handler)?);
        out.put_u16(handler.catch_type.map_or(0, |c| c.0));
    }

    let mut attributes: Vec<(CpIndex, Vec<u8>)> = Vec::new();

    if !code.frames.is_empty() {
        let info = encode_frames(code, pool, context, &layout)?;
        attributes.push((pool.intern_utf8("StackMapTable")?, info));
    }

    if !code.line_numbers.is_empty() {
        let mut info = Vec::new();
        info.put_u16(count(code.line_numbers.len(), "line number")?);
        for entry in &code.line_numbers {
            info.put_u16(layout.pc(entry.start)?);
            info.put_u16(entry.line);
        }
        attributes.push((pool.intern_utf8("LineNumberTable")?, info));
    }

    for (name, table) in [
        ("LocalVariableTable", &code.local_variables),
        ("LocalVariableTypeTable", &code.local_variable_types),
    ] {
        if !table.is_empty() {
            let info = encode_locals(table, &layout)?;
            attributes.push((pool.intern_utf8(name)?, info));
        }
    }

    for attribute in &code.attributes {
        let name = pool.utf8(attribute.name)?;
        if name == "RuntimeVisibleTypeAnnotations" || name == "RuntimeInvisibleTypeAnnotations" {
            continue;
        }
        attributes.push((attribute.name, attribute.info.clone()));
    }

    out.put_u16(count(attributes.len(), "code attribute")?);
    for (name, info) in &attributes {
        write_attribute(&mut out, *name, info)?;
    }
    Ok(out)
}

fn encode_locals(table: &[LocalVariable], layout: &Layout) -> Result<Vec<u8>, WriteError> {
    let mut info = Vec::new();
    info.put_u16(count(table.len(), "local variable")?);
    for entry in table {
        let start = layout.pc(entry.start)?;
        let end = layout.pc(entry.end)?;
        if end < start {
            return Err(WriteError::BadRange {
                start: u32::from(start),
                end: u32::from(end),
            });
        }
        info.put_u16(start);
        info.put_u16(end - start);
        info.put_u16(entry.name.0);
        info.put_u16(entry.descriptor.0);
        info.put_u16(entry.index);
    }
    Ok(info)
}

fn encode_insn(out: &mut Vec<u8>, insn: &Insn, offset: u32, layout: &Layout) -> Result<(), WriteError> {
    let relative = |target: Label| -> Result<i64, WriteError> {
        Ok(i64::from(layout.resolve(target)?) - i64::from(offset))
    };
    let wide32 = |target: Label| -> Result<i32, WriteError> {
        i32::try_from(relative(target)?).map_err(|_| WriteError::BranchOutOfRange {
            from: offset,
            to: layout.resolve(target).unwrap_or(0),
        })
    };

    match insn {
        Insn::Label(_) => {}
        Insn::Simple(op) => out.put_u8(op.byte()),
        Insn::Push { op, value } => {
            out.put_u8(op.byte());
            if *op == Opcode::Bipush {
                out.extend_from_slice(&value.to_be_bytes()[1..]);
            } else {
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        Insn::NewArray(kind) => {
            out.put_u8(Opcode::Newarray.byte());
            out.put_u8(*kind);
        }
        Insn::Var { op, index } => match (op.short_form_base(), u8::try_from(*index)) {
            (Some(base), Ok(i)) if i <= 3 => out.put_u8(base + i),
            (_, Ok(i)) => {
                out.put_u8(op.byte());
                out.put_u8(i);
            }
            (_, Err(_)) => {
                out.put_u8(Opcode::Wide.byte());
                out.put_u8(op.byte());
                out.put_u16(*index);
            }
        },
        Insn::Iinc { index, delta } => match (u8::try_from(*index), i8::try_from(*delta)) {
            (Ok(i), Ok(d)) => {
                out.put_u8(Opcode::Iinc.byte());
                out.put_u8(i);
                out.extend_from_slice(&d.to_be_bytes());
            }
            _ => {
                out.put_u8(Opcode::Wide.byte());
                out.put_u8(Opcode::Iinc.byte());
                out.put_u16(*index);
                out.extend_from_slice(&delta.to_be_bytes());
            }
        },
        Insn::Jump { op, target } => {
            out.put_u8(op.byte());
            if matches!(op, Opcode::GotoW | Opcode::JsrW) {
                out.put_i32(wide32(*target)?);
            } else {
                let delta = i16::try_from(relative(*target)?).map_err(|_| {
                    WriteError::BranchOutOfRange {
                        from: offset,
                        to: layout.resolve(*target).unwrap_or(0),
                    }
                })?;
                out.extend_from_slice(&delta.to_be_bytes());
            }
        }
        Insn::Ldc { op, index } => {
            if *op == Opcode::Ldc {
                if let Ok(short) = u8::try_from(index.0) {
                    out.put_u8(Opcode::Ldc.byte());
                    out.put_u8(short);
                } else {
                    out.put_u8(Opcode::LdcW.byte());
                    out.put_u16(index.0);
                }
            } else {
                out.put_u8(op.byte());
                out.put_u16(index.0);
            }
        }
        Insn::Field { op, index } | Insn::Method { op, index } | Insn::Type { op, index } => {
            out.put_u8(op.byte());
            out.put_u16(index.0);
        }
        Insn::InvokeInterface { index, count } => {
            out.put_u8(Opcode::Invokeinterface.byte());
            out.put_u16(index.0);
            out.put_u8(*count);
            out.put_u8(0);
        }
        Insn::InvokeDynamic { index } => {
            out.put_u8(Opcode::Invokedynamic.byte());
            out.put_u16(index.0);
            out.put_u16(0);
        }
        Insn::MultiANewArray { index, dims } => {
            out.put_u8(Opcode::Multianewarray.byte());
            out.put_u16(index.0);
            out.put_u8(*dims);
        }
        Insn::TableSwitch {
            default,
            low,
            targets,
        } => {
            out.put_u8(Opcode::Tableswitch.byte());
            pad(out);
            out.put_i32(wide32(*default)?);
            out.put_i32(*low);
            let high = i64::from(*low) + targets.len() as i64 - 1;
            out.put_i32(i32::try_from(high).map_err(|_| WriteError::TooManyEntries("tableswitch"))?);
            for target in targets {
                out.put_i32(wide32(*target)?);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            out.put_u8(Opcode::Lookupswitch.byte());
            pad(out);
            out.put_i32(wide32(*default)?);
            out.put_i32(i32::try_from(pairs.len()).map_err(|_| WriteError::TooManyEntries("lookupswitch"))?);
            for (key, target) in pairs {
                out.put_i32(*key);
                out.put_i32(wide32(*target)?);
            }
        }
    }
    Ok(())
}

fn pad(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.put_u8(0);
    }
}

fn encode_vtype(
    out: &mut Vec<u8>,
    ty: &VType,
    pool: &mut ConstantPool,
    layout: &Layout,
) -> Result<(), WriteError> {
    match ty {
        VType::Top => out.put_u8(0),
        VType::Integer => out.put_u8(1),
        VType::Float => out.put_u8(2),
        VType::Double => out.put_u8(3),
        VType::Long => out.put_u8(4),
        VType::Null => out.put_u8(5),
        VType::UninitializedThis => out.put_u8(6),
        VType::Object(name) => {
            out.put_u8(7);
            out.put_u16(pool.intern_class(name)?.0);
        }
        VType::Uninitialized(site) => {
            out.put_u8(8);
            out.put_u16(layout.pc(*site)?);
        }
    }
    Ok(())
}

fn encode_vtypes(
    out: &mut Vec<u8>,
    types: &[VType],
    pool: &mut ConstantPool,
    layout: &Layout,
) -> Result<(), WriteError> {
    for ty in types {
        encode_vtype(out, ty, pool, layout)?;
    }
    Ok(())
}

fn encode_frames(
    code: &Code,
    pool: &mut ConstantPool,
    context: &MethodContext,
    layout: &Layout,
) -> Result<Vec<u8>, WriteError> {
    let mut by_offset: BTreeMap<u32, &Frame> = BTreeMap::new();
    for (label, frame) in &code.frames {
        let offset = layout.resolve(*label)?;
        if offset >= layout.code_len {
            return Err(WriteError::FrameOutOfCode(offset));
        }
        match by_offset.entry(offset) {
            Entry::Vacant(slot) => {
                slot.insert(frame);
            }
            Entry::Occupied(existing) => {
                if *existing.get() != frame {
                    return Err(WriteError::ConflictingFrames(offset));
                }
            }
        }
    }

    let mut out = Vec::new();
    out.put_u16(count(by_offset.len(), "stack map frame")?);

    let mut previous_locals = context.initial_frame().locals;
    let mut previous_offset: Option<u32> = None;

    for (offset, frame) in by_offset {
        let delta = match previous_offset {
            None => offset,
            Some(prev) => offset - prev - 1,
        };
        // offsets are below 65536
        let delta = delta as u16;
        let locals = &frame.locals;
        let stack = &frame.stack;
        let same_locals = *locals == previous_locals;

        if same_locals && stack.is_empty() {
            if delta < 64 {
                out.put_u8(delta as u8);
            } else {
                out.put_u8(251);
                out.put_u16(delta);
            }
        } else if same_locals && stack.len() == 1 {
            if delta < 64 {
                out.put_u8(64 + delta as u8);
            } else {
                out.put_u8(247);
                out.put_u16(delta);
            }
            encode_vtypes(&mut out, stack, pool, layout)?;
        } else if stack.is_empty()
            && locals.len() < previous_locals.len()
            && previous_locals.len() - locals.len() <= 3
            && previous_locals.starts_with(locals)
        {
            out.put_u8(251 - (previous_locals.len() - locals.len()) as u8);
            out.put_u16(delta);
        } else if stack.is_empty()
            && locals.len() > previous_locals.len()
            && locals.len() - previous_locals.len() <= 3
            && locals.starts_with(&previous_locals)
        {
            out.put_u8(251 + (locals.len() - previous_locals.len()) as u8);
            out.put_u16(delta);
            encode_vtypes(&mut out, &locals[previous_locals.len()..], pool, layout)?;
        } else {
            out.put_u8(255);
            out.put_u16(delta);
            out.put_u16(count(locals.len(), "frame local")?);
            encode_vtypes(&mut out, locals, pool, layout)?;
            out.put_u16(count(stack.len(), "frame stack")?);
            encode_vtypes(&mut out, stack, pool, layout)?;
        }

        previous_locals.clone_from(locals);
        previous_offset = Some(offset);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::access;

    fn class_with(code: Code) -> ClassFile {
        let mut class = ClassFile::new("t/Sample", Some("java/lang/Object"), access::PUBLIC, 52).unwrap();
        class
            .add_method(access::PUBLIC | access::STATIC, "run", "(I)I", code)
            .unwrap();
        class
    }

    #[test]
    fn short_forms_chosen() {
        let mut code = Code::new(1);
        code.insns = vec![Insn::var(Opcode::Iload, 0), Insn::simple(Opcode::Ireturn)];
        code.max_stack = 1;
        let bytes = class_with(code).to_bytes().unwrap();
        assert_eq!(bytes[..4], MAGIC.to_be_bytes());
        let parsed = ClassFile::parse(&bytes).unwrap();
        let body = parsed.methods[0].code().unwrap();
        assert_eq!(body.insns, vec![Insn::var(Opcode::Iload, 0), Insn::simple(Opcode::Ireturn)]);
    }

    #[test]
    fn branch_with_frame_round_trips() {
        let mut code = Code::new(1);
        let target = code.new_label();
        code.insns = vec![
            Insn::var(Opcode::Iload, 0),
            Insn::jump(Opcode::Ifeq, target),
            Insn::simple(Opcode::Iconst1),
            Insn::simple(Opcode::Ireturn),
            Insn::Label(target),
            Insn::simple(Opcode::Iconst0),
            Insn::simple(Opcode::Ireturn),
        ];
        code.max_stack = 1;
        code.frames.insert(target, Frame::new(vec![VType::Integer], Vec::new()));

        let bytes = class_with(code).to_bytes().unwrap();
        let parsed = ClassFile::parse(&bytes).unwrap();
        let body = parsed.methods[0].code().unwrap();
        assert_eq!(body.frames.len(), 1);
        let (label, frame) = body.frames.iter().next().unwrap();
        assert_eq!(frame.locals, vec![VType::Integer]);
        assert_eq!(body.position_of(*label), Some(4));
    }

    #[test]
    fn unbound_label_rejected() {
        let mut code = Code::new(1);
        let nowhere = code.new_label();
        code.insns = vec![Insn::jump(Opcode::Goto, nowhere)];
        assert_eq!(
            class_with(code).to_bytes().unwrap_err(),
            WriteError::UnboundLabel(nowhere)
        );
    }

    #[test]
    fn duplicate_label_rejected() {
        let mut code = Code::new(1);
        let l = code.new_label();
        code.insns = vec![Insn::Label(l), Insn::Label(l), Insn::simple(Opcode::Return)];
        assert_eq!(class_with(code).to_bytes().unwrap_err(), WriteError::DuplicateLabel(l));
    }

    #[test]
    fn empty_body_rejected() {
        assert_eq!(class_with(Code::new(0)).to_bytes().unwrap_err(), WriteError::EmptyCode);
    }

    #[test]
    fn conflicting_frames_rejected() {
        let mut code = Code::new(1);
        let a = code.new_label();
        let b = code.new_label();
        code.insns = vec![
            Insn::simple(Opcode::Nop),
            Insn::Label(a),
            Insn::Label(b),
            Insn::simple(Opcode::Iconst0),
            Insn::simple(Opcode::Ireturn),
        ];
        code.frames.insert(a, Frame::new(vec![VType::Integer], Vec::new()));
        code.frames.insert(b, Frame::new(vec![VType::Top], Vec::new()));
        assert_eq!(
            class_with(code).to_bytes().unwrap_err(),
            WriteError::ConflictingFrames(1)
        );
    }
}
