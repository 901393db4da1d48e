//! Class file decoding
//!
//! Method bodies are decoded eagerly: every byte offset that something refers
//! to (branch, handler, frame, debug entry, `new` site) becomes a [`Label`]
//! bound in the instruction stream. The raw `Code` attribute is kept so an
//! untouched method is written back unchanged.

use crate::class::{Attribute, ClassFile, Field, Method, MethodBody, MethodContext};
use crate::code::{Code, Handler, LineNumber, LocalVariable};
use crate::descriptor::MethodDescriptor;
use crate::error::ClassError;
use crate::frame::{Frame, VType};
use crate::insn::{Insn, Label};
use crate::mutf8;
use crate::opcode::Opcode;
use crate::pool::{Constant, ConstantPool, CpIndex};
use std::collections::{BTreeMap, BTreeSet};

/// Class file magic number
pub(crate) const MAGIC: u32 = 0xCAFE_BABE;

/// Oldest accepted major version (JDK 1.1)
pub const MIN_MAJOR_VERSION: u16 = 45;

/// Newest accepted major version (Java 25)
pub const MAX_MAJOR_VERSION: u16 = 69;

/// Big-endian reader over a byte slice
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], ClassError> {
        if n > self.remaining() {
            return Err(ClassError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ClassError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ClassError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn i8(&mut self) -> Result<i8, ClassError> {
        Ok(i8::from_be_bytes(self.array()?))
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ClassError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn i16(&mut self) -> Result<i16, ClassError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ClassError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ClassError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, ClassError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn cp(&mut self) -> Result<CpIndex, ClassError> {
        Ok(CpIndex(self.u16()?))
    }
}

pub(crate) fn read_class(bytes: &[u8]) -> Result<ClassFile, ClassError> {
    let mut cur = Cursor::new(bytes);

    let magic = cur.u32()?;
    if magic != MAGIC {
        return Err(ClassError::BadMagic(magic));
    }
    let minor_version = cur.u16()?;
    let major_version = cur.u16()?;
    if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
        return Err(ClassError::UnsupportedVersion {
            major: major_version,
            minor: minor_version,
        });
    }

    let pool = read_pool(&mut cur)?;
    let access = cur.u16()?;
    let this_class = cur.cp()?;
    let class_name = pool.class_name(this_class)?.to_owned();
    let super_class = match cur.u16()? {
        0 => None,
        index => {
            pool.class_name(CpIndex(index))?;
            Some(CpIndex(index))
        }
    };

    let interface_count = cur.u16()?;
    let mut interfaces = Vec::with_capacity(usize::from(interface_count));
    for _ in 0..interface_count {
        interfaces.push(cur.cp()?);
    }

    let field_count = cur.u16()?;
    let mut fields = Vec::with_capacity(usize::from(field_count));
    for _ in 0..field_count {
        fields.push(Field {
            access: cur.u16()?,
            name: cur.cp()?,
            descriptor: cur.cp()?,
            attributes: read_attributes(&mut cur)?,
        });
    }

    let method_count = cur.u16()?;
    let mut methods = Vec::with_capacity(usize::from(method_count));
    for _ in 0..method_count {
        methods.push(read_method(&mut cur, &pool, &class_name)?);
    }

    let attributes = read_attributes(&mut cur)?;

    if cur.remaining() > 0 {
        return Err(ClassError::TrailingBytes(cur.remaining()));
    }

    Ok(ClassFile {
        minor_version,
        major_version,
        pool,
        access,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn read_pool(cur: &mut Cursor<'_>) -> Result<ConstantPool, ClassError> {
    let count = cur.u16()?;
    let mut pool = ConstantPool::new();
    let mut index: u16 = 1;

    while index < count {
        let tag = cur.u8()?;
        let constant = match tag {
            1 => {
                let len = cur.u16()?;
                Constant::Utf8(mutf8::decode(cur.take(usize::from(len))?)?)
            }
            3 => Constant::Integer(cur.i32()?),
            4 => Constant::Float(cur.u32()?),
            5 => Constant::Long(i64::from_be_bytes(cur.u64()?.to_be_bytes())),
            6 => Constant::Double(cur.u64()?),
            7 => Constant::Class(cur.cp()?),
            8 => Constant::String(cur.cp()?),
            9 => Constant::FieldRef {
                class: cur.cp()?,
                name_and_type: cur.cp()?,
            },
            10 => Constant::MethodRef {
                class: cur.cp()?,
                name_and_type: cur.cp()?,
            },
            11 => Constant::InterfaceMethodRef {
                class: cur.cp()?,
                name_and_type: cur.cp()?,
            },
            12 => Constant::NameAndType {
                name: cur.cp()?,
                descriptor: cur.cp()?,
            },
            15 => Constant::MethodHandle {
                kind: cur.u8()?,
                reference: cur.cp()?,
            },
            16 => Constant::MethodType(cur.cp()?),
            17 => Constant::Dynamic {
                bootstrap: cur.u16()?,
                name_and_type: cur.cp()?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap: cur.u16()?,
                name_and_type: cur.cp()?,
            },
            19 => Constant::Module(cur.cp()?),
            20 => Constant::Package(cur.cp()?),
            _ => return Err(ClassError::UnknownConstantTag { tag, index }),
        };

        let slots = if constant.is_wide() { 2 } else { 1 };
        if u32::from(index) + slots > u32::from(count) {
            return Err(ClassError::BadPoolIndex(index));
        }
        pool.push(constant)?;
        index += u16::try_from(slots).map_err(|_| ClassError::BadPoolIndex(index))?;
    }

    Ok(pool)
}

fn read_attributes(cur: &mut Cursor<'_>) -> Result<Vec<Attribute>, ClassError> {
    let count = cur.u16()?;
    let mut attributes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = cur.cp()?;
        let len = cur.u32()? as usize;
        attributes.push(Attribute {
            name,
            info: cur.take(len)?.to_vec(),
        });
    }
    Ok(attributes)
}

fn read_method(
    cur: &mut Cursor<'_>,
    pool: &ConstantPool,
    class_name: &str,
) -> Result<Method, ClassError> {
    let access = cur.u16()?;
    let name = cur.cp()?;
    let descriptor = cur.cp()?;

    let mut attributes = Vec::new();
    let mut body = None;
    let mut body_position = 0;

    for attribute in read_attributes(cur)? {
        if body.is_none() && pool.utf8(attribute.name)? == "Code" {
            let context = MethodContext {
                class_name: class_name.to_owned(),
                name: pool.utf8(name)?.to_owned(),
                descriptor: MethodDescriptor::parse(pool.utf8(descriptor)?)?,
                is_static: access & crate::class::access::STATIC != 0,
            };
            let code = read_code(&attribute.info, pool, &context)?;
            body_position = attributes.len();
            body = Some(MethodBody {
                attr_name: attribute.name,
                original: Some(attribute.info),
                code,
            });
        } else {
            attributes.push(attribute);
        }
    }

    Ok(Method {
        access,
        name,
        descriptor,
        attributes,
        body,
        body_position,
    })
}

/// Offsets that may carry a label: instruction starts plus the end of code
struct Boundaries {
    starts: BTreeSet<u32>,
    end: u32,
}

impl Boundaries {
    fn instruction(&self, offset: u32) -> Result<u32, ClassError> {
        if self.starts.contains(&offset) {
            Ok(offset)
        } else {
            Err(ClassError::BadOffset(offset))
        }
    }

    fn instruction_or_end(&self, offset: u32) -> Result<u32, ClassError> {
        if offset == self.end {
            Ok(offset)
        } else {
            self.instruction(offset)
        }
    }
}

pub(crate) fn read_code(
    info: &[u8],
    pool: &ConstantPool,
    context: &MethodContext,
) -> Result<Code, ClassError> {
    let mut cur = Cursor::new(info);
    let max_stack = cur.u16()?;
    let max_locals = cur.u16()?;
    let code_len = cur.u32()? as usize;
    if code_len == 0 || code_len > usize::from(u16::MAX) {
        return Err(ClassError::bad_attribute(
            "Code",
            format!("code length {code_len} out of range"),
        ));
    }
    let decoded = decode_bytecode(cur.take(code_len)?)?;

    let bounds = Boundaries {
        starts: decoded.iter().map(|(offset, _)| *offset).collect(),
        end: code_len as u32,
    };
    let mut referenced = BTreeSet::new();

    for (_, insn) in &decoded {
        for target in insn.targets() {
            referenced.insert(bounds.instruction(target.0)?);
        }
    }

    let handler_count = cur.u16()?;
    let mut raw_handlers = Vec::with_capacity(usize::from(handler_count));
    for _ in 0..handler_count {
        let start = bounds.instruction(u32::from(cur.u16()?))?;
        let end = bounds.instruction_or_end(u32::from(cur.u16()?))?;
        let handler = bounds.instruction(u32::from(cur.u16()?))?;
        let catch_type = match cur.u16()? {
            0 => None,
            index => Some(CpIndex(index)),
        };
        if start >= end {
            return Err(ClassError::bad_attribute(
                "Code",
                format!("empty handler range {start}..{end}"),
            ));
        }
        referenced.extend([start, end, handler]);
        raw_handlers.push((start, end, handler, catch_type));
    }

    let mut raw_frames = Vec::new();
    let mut raw_lines = Vec::new();
    let mut raw_locals = Vec::new();
    let mut raw_local_types = Vec::new();
    let mut attributes = Vec::new();

    let attribute_count = cur.u16()?;
    for _ in 0..attribute_count {
        let name = cur.cp()?;
        let len = cur.u32()? as usize;
        let data = cur.take(len)?;
        match pool.utf8(name)? {
            "StackMapTable" => {
                raw_frames = read_stack_map(data, pool, &context.initial_frame())?;
                for (offset, frame) in &raw_frames {
                    referenced.insert(bounds.instruction(*offset)?);
                    for ty in frame.locals.iter().chain(&frame.stack) {
                        if let VType::Uninitialized(site) = ty {
                            referenced.insert(bounds.instruction(site.0)?);
                        }
                    }
                }
            }
            "LineNumberTable" => {
                let mut table = Cursor::new(data);
                for _ in 0..table.u16()? {
                    let start = bounds.instruction(u32::from(table.u16()?))?;
                    let line = table.u16()?;
                    referenced.insert(start);
                    raw_lines.push((start, line));
                }
            }
            kind @ ("LocalVariableTable" | "LocalVariableTypeTable") => {
                let mut table = Cursor::new(data);
                let out = if kind == "LocalVariableTable" {
                    &mut raw_locals
                } else {
                    &mut raw_local_types
                };
                for _ in 0..table.u16()? {
                    let start = bounds.instruction_or_end(u32::from(table.u16()?))?;
                    let end = bounds.instruction_or_end(start + u32::from(table.u16()?))?;
                    let entry = (start, end, table.cp()?, table.cp()?, table.u16()?);
                    referenced.extend([start, end]);
                    out.push(entry);
                }
            }
            _ => attributes.push(Attribute {
                name,
                info: data.to_vec(),
            }),
        }
    }

    if cur.remaining() > 0 {
        return Err(ClassError::bad_attribute(
            "Code",
            format!("{} trailing bytes", cur.remaining()),
        ));
    }

    // Labels are numbered in offset order.
    let labels: BTreeMap<u32, Label> = referenced
        .iter()
        .zip(0u32..)
        .map(|(&offset, id)| (offset, Label(id)))
        .collect();
    let label = |offset: u32| labels.get(&offset).copied().ok_or(ClassError::BadOffset(offset));

    let mut insns = Vec::with_capacity(decoded.len() + labels.len());
    for (offset, mut insn) in decoded {
        if let Some(&bound) = labels.get(&offset) {
            insns.push(Insn::Label(bound));
        }
        let mut missing = None;
        insn.map_labels(|target| {
            labels.get(&target.0).copied().unwrap_or_else(|| {
                missing = Some(target.0);
                target
            })
        });
        if let Some(offset) = missing {
            return Err(ClassError::BadOffset(offset));
        }
        insns.push(insn);
    }
    if let Some(&end) = labels.get(&bounds.end) {
        insns.push(Insn::Label(end));
    }

    let handlers = raw_handlers
        .into_iter()
        .map(|(start, end, handler, catch_type)| {
            Ok(Handler {
                start: label(start)?,
                end: label(end)?,
                handler: label(handler)?,
                catch_type,
            })
        })
        .collect::<Result<Vec<_>, ClassError>>()?;

    let relabel = |ty: VType| -> Result<VType, ClassError> {
        match ty {
            VType::Uninitialized(site) => Ok(VType::Uninitialized(label(site.0)?)),
            other => Ok(other),
        }
    };
    let mut frames = BTreeMap::new();
    for (offset, frame) in raw_frames {
        let locals = frame.locals.into_iter().map(relabel).collect::<Result<_, _>>()?;
        let stack = frame.stack.into_iter().map(relabel).collect::<Result<_, _>>()?;
        frames.insert(label(offset)?, Frame::new(locals, stack));
    }

    let line_numbers = raw_lines
        .into_iter()
        .map(|(start, line)| {
            Ok(LineNumber {
                start: label(start)?,
                line,
            })
        })
        .collect::<Result<Vec<_>, ClassError>>()?;

    let to_local = |(start, end, name, descriptor, index): (u32, u32, CpIndex, CpIndex, u16)| {
        Ok(LocalVariable {
            start: label(start)?,
            end: label(end)?,
            name,
            descriptor,
            index,
        })
    };
    let local_variables = raw_locals
        .into_iter()
        .map(to_local)
        .collect::<Result<Vec<_>, ClassError>>()?;
    let local_variable_types = raw_local_types
        .into_iter()
        .map(to_local)
        .collect::<Result<Vec<_>, ClassError>>()?;

    let label_count = u32::try_from(labels.len()).map_err(|_| ClassError::BadOffset(bounds.end))?;
    let mut code = Code::new(max_locals).with_label_count(label_count);
    code.max_stack = max_stack;
    code.insns = insns;
    code.handlers = handlers;
    code.frames = frames;
    code.line_numbers = line_numbers;
    code.local_variables = local_variables;
    code.local_variable_types = local_variable_types;
    code.attributes = attributes;
    Ok(code)
}

/// Decode raw bytecode. Branch targets come back as provisional labels
/// holding absolute byte offsets.
fn decode_bytecode(bytes: &[u8]) -> Result<Vec<(u32, Insn)>, ClassError> {
    let mut cur = Cursor::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() / 2);

    while cur.remaining() > 0 {
        let offset = cur.position() as u32;
        let opcode = cur.u8()?;
        let op = Opcode::try_from(opcode).map_err(|opcode| ClassError::UnknownOpcode { opcode, offset })?;
        let branch = |delta: i32| -> Result<Label, ClassError> {
            let target = i64::from(offset) + i64::from(delta);
            u32::try_from(target)
                .map(Label)
                .map_err(|_| ClassError::BadOffset(offset))
        };
        let pad = |cur: &mut Cursor<'_>| -> Result<(), ClassError> {
            let padding = (4 - cur.position() % 4) % 4;
            cur.take(padding).map(|_| ())
        };

        let insn = match op {
            Opcode::Bipush => Insn::Push {
                op,
                value: i16::from(cur.i8()?),
            },
            Opcode::Sipush => Insn::Push {
                op,
                value: cur.i16()?,
            },
            Opcode::Newarray => Insn::NewArray(cur.u8()?),
            Opcode::Ldc => Insn::Ldc {
                op,
                index: CpIndex(u16::from(cur.u8()?)),
            },
            Opcode::LdcW | Opcode::Ldc2W => Insn::Ldc { op, index: cur.cp()? },
            Opcode::Iload
            | Opcode::Lload
            | Opcode::Fload
            | Opcode::Dload
            | Opcode::Aload
            | Opcode::Istore
            | Opcode::Lstore
            | Opcode::Fstore
            | Opcode::Dstore
            | Opcode::Astore
            | Opcode::Ret => Insn::Var {
                op,
                index: u16::from(cur.u8()?),
            },
            Opcode::Iinc => Insn::Iinc {
                index: u16::from(cur.u8()?),
                delta: i16::from(cur.i8()?),
            },
            Opcode::Goto | Opcode::Jsr => Insn::Jump {
                op,
                target: branch(i32::from(cur.i16()?))?,
            },
            _ if op.is_conditional() => Insn::Jump {
                op,
                target: branch(i32::from(cur.i16()?))?,
            },
            Opcode::GotoW | Opcode::JsrW => Insn::Jump {
                op,
                target: branch(cur.i32()?)?,
            },
            Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield => {
                Insn::Field { op, index: cur.cp()? }
            }
            Opcode::Invokevirtual | Opcode::Invokespecial | Opcode::Invokestatic => {
                Insn::Method { op, index: cur.cp()? }
            }
            Opcode::Invokeinterface => {
                let index = cur.cp()?;
                let count = cur.u8()?;
                cur.u8()?;
                Insn::InvokeInterface { index, count }
            }
            Opcode::Invokedynamic => {
                let index = cur.cp()?;
                cur.u16()?;
                Insn::InvokeDynamic { index }
            }
            Opcode::New | Opcode::Anewarray | Opcode::Checkcast | Opcode::Instanceof => {
                Insn::Type { op, index: cur.cp()? }
            }
            Opcode::Multianewarray => Insn::MultiANewArray {
                index: cur.cp()?,
                dims: cur.u8()?,
            },
            Opcode::Tableswitch => {
                pad(&mut cur)?;
                let default = branch(cur.i32()?)?;
                let low = cur.i32()?;
                let high = cur.i32()?;
                if high < low {
                    return Err(ClassError::BadOffset(offset));
                }
                let count = i64::from(high) - i64::from(low) + 1;
                if count > i64::from(u16::MAX) {
                    return Err(ClassError::BadOffset(offset));
                }
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    targets.push(branch(cur.i32()?)?);
                }
                Insn::TableSwitch {
                    default,
                    low,
                    targets,
                }
            }
            Opcode::Lookupswitch => {
                pad(&mut cur)?;
                let default = branch(cur.i32()?)?;
                let npairs = cur.i32()?;
                if !(0..=i32::from(u16::MAX)).contains(&npairs) {
                    return Err(ClassError::BadOffset(offset));
                }
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = cur.i32()?;
                    pairs.push((key, branch(cur.i32()?)?));
                }
                Insn::LookupSwitch { default, pairs }
            }
            Opcode::Wide => {
                let inner = cur.u8()?;
                let inner_op = Opcode::try_from(inner)
                    .map_err(|opcode| ClassError::UnknownOpcode { opcode, offset })?;
                match inner_op {
                    Opcode::Iinc => Insn::Iinc {
                        index: cur.u16()?,
                        delta: cur.i16()?,
                    },
                    Opcode::Iload
                    | Opcode::Lload
                    | Opcode::Fload
                    | Opcode::Dload
                    | Opcode::Aload
                    | Opcode::Istore
                    | Opcode::Lstore
                    | Opcode::Fstore
                    | Opcode::Dstore
                    | Opcode::Astore
                    | Opcode::Ret => Insn::Var {
                        op: inner_op,
                        index: cur.u16()?,
                    },
                    _ => {
                        return Err(ClassError::UnknownOpcode {
                            opcode: inner,
                            offset,
                        })
                    }
                }
            }
            _ => match op.expand_short_form() {
                Some((op, index)) => Insn::Var { op, index },
                None => Insn::Simple(op),
            },
        };
        out.push((offset, insn));
    }

    Ok(out)
}

fn read_vtype(cur: &mut Cursor<'_>, pool: &ConstantPool) -> Result<VType, ClassError> {
    Ok(match cur.u8()? {
        0 => VType::Top,
        1 => VType::Integer,
        2 => VType::Float,
        3 => VType::Double,
        4 => VType::Long,
        5 => VType::Null,
        6 => VType::UninitializedThis,
        7 => VType::Object(pool.class_name(cur.cp()?)?.to_owned()),
        8 => VType::Uninitialized(Label(u32::from(cur.u16()?))),
        tag => {
            return Err(ClassError::bad_attribute(
                "StackMapTable",
                format!("unknown verification type tag {tag}"),
            ))
        }
    })
}

/// Decode a `StackMapTable` into full frames at absolute offsets.
/// `Uninitialized` entries carry provisional offset labels.
fn read_stack_map(
    data: &[u8],
    pool: &ConstantPool,
    initial: &Frame,
) -> Result<Vec<(u32, Frame)>, ClassError> {
    let mut cur = Cursor::new(data);
    let count = cur.u16()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut locals = initial.locals.clone();
    let mut previous: Option<u32> = None;

    for _ in 0..count {
        let frame_type = cur.u8()?;
        let (delta, stack) = match frame_type {
            0..=63 => (u16::from(frame_type), Vec::new()),
            64..=127 => (u16::from(frame_type - 64), vec![read_vtype(&mut cur, pool)?]),
            247 => {
                let delta = cur.u16()?;
                (delta, vec![read_vtype(&mut cur, pool)?])
            }
            248..=250 => {
                let delta = cur.u16()?;
                let chopped = usize::from(251 - frame_type);
                if chopped > locals.len() {
                    return Err(ClassError::bad_attribute(
                        "StackMapTable",
                        "chop frame removes more locals than exist",
                    ));
                }
                locals.truncate(locals.len() - chopped);
                (delta, Vec::new())
            }
            251 => (cur.u16()?, Vec::new()),
            252..=254 => {
                let delta = cur.u16()?;
                for _ in 0..(frame_type - 251) {
                    locals.push(read_vtype(&mut cur, pool)?);
                }
                (delta, Vec::new())
            }
            255 => {
                let delta = cur.u16()?;
                let local_count = cur.u16()?;
                locals = (0..local_count)
                    .map(|_| read_vtype(&mut cur, pool))
                    .collect::<Result<_, _>>()?;
                let stack_count = cur.u16()?;
                let stack = (0..stack_count)
                    .map(|_| read_vtype(&mut cur, pool))
                    .collect::<Result<_, _>>()?;
                (delta, stack)
            }
            reserved => {
                return Err(ClassError::bad_attribute(
                    "StackMapTable",
                    format!("reserved frame type {reserved}"),
                ))
            }
        };

        let offset = match previous {
            None => u32::from(delta),
            Some(prev) => prev + u32::from(delta) + 1,
        };
        previous = Some(offset);
        frames.push((offset, Frame::new(locals.clone(), stack)));
    }

    if cur.remaining() > 0 {
        return Err(ClassError::bad_attribute("StackMapTable", "trailing bytes"));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52];
        assert_eq!(read_class(&bytes).unwrap_err(), ClassError::BadMagic(0xDEAD_BEEF));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(
            read_class(&[0xCA, 0xFE]),
            Err(ClassError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_future_version() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 99];
        assert!(matches!(
            read_class(&bytes),
            Err(ClassError::UnsupportedVersion { major: 99, .. })
        ));
    }

    #[test]
    fn decodes_branches_as_offsets() {
        // 0: iload_0; 1: ifeq +5 -> 6; 4: iconst_1; 5: ireturn; 6: iconst_0; 7: ireturn
        let code = [0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let decoded = decode_bytecode(&code).unwrap();
        assert_eq!(decoded.len(), 6);
        assert_eq!(
            decoded[1],
            (
                1,
                Insn::Jump {
                    op: Opcode::Ifeq,
                    target: Label(6)
                }
            )
        );
        assert_eq!(decoded[0].1, Insn::Var { op: Opcode::Iload, index: 0 });
    }

    #[test]
    fn tableswitch_padding() {
        // 0: iload_0; 1: tableswitch, pad 2; default +19, low 0, high 0, [+19]
        let mut code = vec![0x1a, 0xaa, 0x00, 0x00];
        code.extend_from_slice(&19i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&19i32.to_be_bytes());
        code.push(0xb1);
        let decoded = decode_bytecode(&code).unwrap();
        assert_eq!(decoded[2].0, 20);
        assert!(matches!(
            &decoded[1].1,
            Insn::TableSwitch { default, targets, .. } if *default == Label(20) && targets == &[Label(20)]
        ));
    }

    #[test]
    fn wide_iinc() {
        let code = [0xc4, 0x84, 0x01, 0x00, 0xff, 0xff];
        let decoded = decode_bytecode(&code).unwrap();
        assert_eq!(decoded[0].1, Insn::Iinc { index: 256, delta: -1 });
    }

    #[test]
    fn unknown_opcode() {
        assert_eq!(
            decode_bytecode(&[0x00, 0xcb]).unwrap_err(),
            ClassError::UnknownOpcode {
                opcode: 0xcb,
                offset: 1
            }
        );
    }
}
