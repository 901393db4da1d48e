//! Dataflow over instruction streams
//!
//! - [`compute_max_stack`]: operand stack depth propagation over the control
//!   flow graph, rejecting underflow and inconsistent merge depths
//! - [`compute_max_locals`]: highest local slot touched
//! - [`infer_frame`]: forward type simulation from the nearest explicit frame,
//!   used to produce frames for newly inserted branch targets and handlers

use crate::class::MethodContext;
use crate::code::Code;
use crate::descriptor::{FieldType, MethodDescriptor};
use crate::error::ClassError;
use crate::frame::{Frame, VType};
use crate::insn::{Insn, Label};
use crate::opcode::Opcode;
use crate::pool::{Constant, ConstantPool};
use std::collections::HashMap;

/// Errors raised by code analysis
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// Instruction pops more than the stack holds
    #[error("stack underflow at position {position}")]
    StackUnderflow { position: usize },

    /// Two paths reach one point with different stack depths
    #[error("inconsistent stack depth at position {position}: {expected} vs {found}")]
    InconsistentDepth {
        position: usize,
        expected: u16,
        found: u16,
    },

    /// Stack depth exceeds what `max_stack` can express
    #[error("stack depth overflow at position {position}")]
    StackOverflow { position: usize },

    /// Execution can run past the last instruction
    #[error("control falls off the end of the code")]
    FallsOffEnd,

    /// Label used but not bound in the stream
    #[error("label {0} is not bound")]
    UnboundLabel(Label),

    /// Position has no incoming state (dead code without a frame)
    #[error("position {position} is not reachable from a known frame")]
    Unreachable { position: usize },

    /// Category-1 operation applied to half of a long/double
    #[error("instruction at position {position} splits a wide value")]
    SplitWideValue { position: usize },

    /// Local slot read that holds no value
    #[error("local {index} is undefined at position {position}")]
    BadLocal { position: usize, index: u16 },

    /// Instruction kind the type simulation does not handle
    #[error("{mnemonic} at position {position} is not supported by type inference")]
    Unsupported {
        position: usize,
        mnemonic: &'static str,
    },

    #[error(transparent)]
    Class(#[from] ClassError),
}

fn label_positions(code: &Code) -> HashMap<Label, usize> {
    code.insns
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| match insn {
            Insn::Label(l) => Some((*l, i)),
            _ => None,
        })
        .collect()
}

fn descriptor_of<'a>(pool: &'a ConstantPool, insn: &Insn) -> Result<&'a str, ClassError> {
    match insn {
        Insn::InvokeDynamic { index } => Ok(pool.dynamic(*index)?.1),
        _ => match insn.pool_index() {
            Some(index) => Ok(pool.member(index)?.descriptor),
            None => Ok(""),
        },
    }
}

/// Operand stack slots popped and pushed by one instruction
///
/// # Errors
/// Fails when a referenced pool entry or descriptor is malformed.
pub fn stack_effect(insn: &Insn, pool: &ConstantPool) -> Result<(u16, u16), ClassError> {
    use Opcode as O;

    Ok(match insn {
        Insn::Label(_) | Insn::Iinc { .. } => (0, 0),
        Insn::Push { .. } => (0, 1),
        Insn::NewArray(_) => (1, 1),
        Insn::Var { op, .. } => match op {
            O::Ret => (0, 0),
            _ if op.is_store() => (op.local_width(), 0),
            _ => (0, op.local_width()),
        },
        Insn::Jump { op, .. } => match op {
            O::Goto | O::GotoW => (0, 0),
            O::Jsr | O::JsrW => (0, 1),
            O::IfIcmpeq
            | O::IfIcmpne
            | O::IfIcmplt
            | O::IfIcmpge
            | O::IfIcmpgt
            | O::IfIcmple
            | O::IfAcmpeq
            | O::IfAcmpne => (2, 0),
            _ => (1, 0),
        },
        Insn::Ldc { op, .. } => (0, if *op == O::Ldc2W { 2 } else { 1 }),
        Insn::Field { op, .. } => {
            let size = FieldType::parse(descriptor_of(pool, insn)?)?.slots();
            match op {
                O::Getstatic => (0, size),
                O::Putstatic => (size, 0),
                O::Getfield => (1, size),
                _ => (1 + size, 0),
            }
        }
        Insn::Method { op, .. } => {
            let d = MethodDescriptor::parse(descriptor_of(pool, insn)?)?;
            let receiver = u16::from(*op != O::Invokestatic);
            (d.param_slots() + receiver, d.return_slots())
        }
        Insn::InvokeInterface { .. } => {
            let d = MethodDescriptor::parse(descriptor_of(pool, insn)?)?;
            (d.param_slots() + 1, d.return_slots())
        }
        Insn::InvokeDynamic { .. } => {
            let d = MethodDescriptor::parse(descriptor_of(pool, insn)?)?;
            (d.param_slots(), d.return_slots())
        }
        Insn::Type { op, .. } => match op {
            O::New => (0, 1),
            _ => (1, 1),
        },
        Insn::MultiANewArray { dims, .. } => (u16::from(*dims), 1),
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::Simple(op) => simple_effect(*op),
    })
}

fn simple_effect(op: Opcode) -> (u16, u16) {
    use Opcode as O;

    match op {
        O::AconstNull
        | O::IconstM1
        | O::Iconst0
        | O::Iconst1
        | O::Iconst2
        | O::Iconst3
        | O::Iconst4
        | O::Iconst5
        | O::Fconst0
        | O::Fconst1
        | O::Fconst2 => (0, 1),
        O::Lconst0 | O::Lconst1 | O::Dconst0 | O::Dconst1 => (0, 2),
        O::Iaload | O::Faload | O::Aaload | O::Baload | O::Caload | O::Saload => (2, 1),
        O::Laload | O::Daload => (2, 2),
        O::Iastore | O::Fastore | O::Aastore | O::Bastore | O::Castore | O::Sastore => (3, 0),
        O::Lastore | O::Dastore => (4, 0),
        O::Pop => (1, 0),
        O::Pop2 => (2, 0),
        O::Dup => (1, 2),
        O::DupX1 => (2, 3),
        O::DupX2 => (3, 4),
        O::Dup2 => (2, 4),
        O::Dup2X1 => (3, 5),
        O::Dup2X2 => (4, 6),
        O::Swap => (2, 2),
        O::Iadd
        | O::Isub
        | O::Imul
        | O::Idiv
        | O::Irem
        | O::Ishl
        | O::Ishr
        | O::Iushr
        | O::Iand
        | O::Ior
        | O::Ixor
        | O::Fadd
        | O::Fsub
        | O::Fmul
        | O::Fdiv
        | O::Frem
        | O::Fcmpl
        | O::Fcmpg => (2, 1),
        O::Ladd
        | O::Lsub
        | O::Lmul
        | O::Ldiv
        | O::Lrem
        | O::Land
        | O::Lor
        | O::Lxor
        | O::Dadd
        | O::Dsub
        | O::Dmul
        | O::Ddiv
        | O::Drem => (4, 2),
        O::Lshl | O::Lshr | O::Lushr => (3, 2),
        O::Ineg | O::Fneg | O::I2f | O::F2i | O::I2b | O::I2c | O::I2s => (1, 1),
        O::Lneg | O::Dneg | O::L2d | O::D2l => (2, 2),
        O::I2l | O::I2d | O::F2l | O::F2d => (1, 2),
        O::L2i | O::L2f | O::D2i | O::D2f => (2, 1),
        O::Lcmp | O::Dcmpl | O::Dcmpg => (4, 1),
        O::Ireturn | O::Freturn | O::Areturn | O::Athrow => (1, 0),
        O::Lreturn | O::Dreturn => (2, 0),
        O::Arraylength => (1, 1),
        O::Monitorenter | O::Monitorexit => (1, 0),
        _ => (0, 0),
    }
}

/// Maximum operand stack depth over all reachable paths
///
/// Exception handlers are entered with exactly one stack slot.
///
/// # Errors
/// Fails on stack underflow, inconsistent merge depths, unbound labels or
/// control flow that runs past the last instruction.
pub fn compute_max_stack(code: &Code, pool: &ConstantPool) -> Result<u16, AnalysisError> {
    let positions = label_positions(code);
    let resolve = |label: Label| positions.get(&label).copied().ok_or(AnalysisError::UnboundLabel(label));

    let len = code.insns.len();
    let mut depth: Vec<Option<u16>> = vec![None; len];
    let mut work = Vec::new();
    let mut max: u16 = 0;

    let flow = |at: usize, d: u16, depth: &mut Vec<Option<u16>>, work: &mut Vec<usize>| {
        if at >= len {
            return Err(AnalysisError::FallsOffEnd);
        }
        match depth[at] {
            None => {
                depth[at] = Some(d);
                work.push(at);
                Ok(())
            }
            Some(expected) if expected != d => Err(AnalysisError::InconsistentDepth {
                position: at,
                expected,
                found: d,
            }),
            Some(_) => Ok(()),
        }
    };

    flow(0, 0, &mut depth, &mut work)?;
    for handler in &code.handlers {
        flow(resolve(handler.handler)?, 1, &mut depth, &mut work)?;
        max = max.max(1);
    }

    while let Some(at) = work.pop() {
        let before = depth[at].unwrap_or(0);
        let insn = &code.insns[at];

        let (pop, push) = stack_effect(insn, pool)?;
        if before < pop {
            return Err(AnalysisError::StackUnderflow { position: at });
        }
        let after = (before - pop)
            .checked_add(push)
            .ok_or(AnalysisError::StackOverflow { position: at })?;
        max = max.max(after);

        for target in insn.targets() {
            flow(resolve(target)?, after, &mut depth, &mut work)?;
        }
        match insn.opcode() {
            // the subroutine returns to the next instruction without the address
            Some(Opcode::Jsr | Opcode::JsrW) => flow(at + 1, before, &mut depth, &mut work)?,
            Some(op) if op.ends_block() => {}
            _ => flow(at + 1, after, &mut depth, &mut work)?,
        }
    }

    Ok(max)
}

/// Highest local slot used by the arguments, the code, or any frame
#[must_use]
pub fn compute_max_locals(code: &Code, context: &MethodContext) -> u16 {
    let mut max = context.argument_slots();
    for insn in &code.insns {
        let needed = match insn {
            Insn::Var { op, index } => index.saturating_add(op.local_width()),
            Insn::Iinc { index, .. } => index.saturating_add(1),
            _ => continue,
        };
        max = max.max(needed);
    }
    for frame in code.frames.values() {
        max = max.max(frame.locals_size());
    }
    max
}

/// Type state of the simulation: locals per slot, stack per entry
struct State {
    locals: Vec<VType>,
    stack: Vec<VType>,
}

impl State {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            locals: frame.local_slots(),
            stack: frame.stack.clone(),
        }
    }

    fn pop(&mut self, position: usize) -> Result<VType, AnalysisError> {
        self.stack
            .pop()
            .ok_or(AnalysisError::StackUnderflow { position })
    }

    fn pop_n(&mut self, n: usize, position: usize) -> Result<(), AnalysisError> {
        for _ in 0..n {
            self.pop(position)?;
        }
        Ok(())
    }

    /// Pop entries covering exactly `slots` slots, returned bottom to top
    fn take_slots(&mut self, slots: u16, position: usize) -> Result<Vec<VType>, AnalysisError> {
        let mut taken = Vec::new();
        let mut covered = 0;
        while covered < slots {
            let ty = self.pop(position)?;
            covered += ty.slots();
            taken.push(ty);
        }
        if covered != slots {
            return Err(AnalysisError::SplitWideValue { position });
        }
        taken.reverse();
        Ok(taken)
    }

    fn push_all(&mut self, groups: &[&[VType]]) {
        for group in groups {
            self.stack.extend_from_slice(group);
        }
    }

    fn load(&self, index: u16, position: usize) -> Result<VType, AnalysisError> {
        self.locals
            .get(usize::from(index))
            .cloned()
            .ok_or(AnalysisError::BadLocal { position, index })
    }

    fn store(&mut self, index: u16, ty: VType) {
        let index = usize::from(index);
        let needed = index + usize::from(ty.slots());
        if self.locals.len() < needed {
            self.locals.resize(needed, VType::Top);
        }
        // overwriting the second half of a wide value invalidates it
        if index > 0 && self.locals[index - 1].is_wide() {
            self.locals[index - 1] = VType::Top;
        }
        if ty.is_wide() {
            self.locals[index + 1] = VType::Top;
        }
        self.locals[index] = ty;
    }

    fn replace_all(&mut self, from: &VType, to: &VType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == from {
                *slot = to.clone();
            }
        }
    }
}

fn array_of(component: &str) -> String {
    if component.starts_with('[') {
        format!("[{component}")
    } else {
        format!("[L{component};")
    }
}

fn primitive_array(kind: u8) -> &'static str {
    match kind {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        11 => "[J",
        _ => "[I",
    }
}

/// Type state at position `at`, simulated forward from the nearest frame
///
/// Binds a label before every unlabeled `new` ahead of `at` so that
/// uninitialized values can be expressed; the returned position is where the
/// element originally at `at` now sits.
///
/// # Errors
/// Fails when `at` cannot be reached from the entry frame or an explicit
/// frame, or when an instruction on the way cannot be simulated.
pub fn infer_frame(
    code: &mut Code,
    pool: &ConstantPool,
    context: &MethodContext,
    at: usize,
) -> Result<(Frame, usize), AnalysisError> {
    let mut at = at.min(code.insns.len());
    let mut pos = 0;
    while pos < at {
        if matches!(code.insns[pos], Insn::Type { op: Opcode::New, .. }) {
            let (_, shifted) = code.label_before(pos);
            at += shifted - pos;
            pos = shifted;
        }
        pos += 1;
    }

    let code: &Code = code;
    let mut state = Some(State::from_frame(&context.initial_frame()));

    for position in 0..at {
        let insn = &code.insns[position];
        if let Insn::Label(label) = insn {
            if let Some(frame) = code.frames.get(label) {
                state = Some(State::from_frame(frame));
            }
            continue;
        }
        let Some(current) = state.as_mut() else {
            continue;
        };
        step(current, code, pool, context, position, insn)?;
        if insn.ends_block() {
            state = None;
        }
    }

    let state = state.ok_or(AnalysisError::Unreachable { position: at })?;
    Ok((Frame::from_slots(&state.locals, state.stack), at))
}

#[allow(clippy::too_many_lines)]
fn step(
    s: &mut State,
    code: &Code,
    pool: &ConstantPool,
    context: &MethodContext,
    position: usize,
    insn: &Insn,
) -> Result<(), AnalysisError> {
    use Opcode as O;

    match insn {
        Insn::Label(_) | Insn::Iinc { .. } => {}
        Insn::Push { .. } => s.stack.push(VType::Integer),
        Insn::NewArray(kind) => {
            s.pop(position)?;
            s.stack.push(VType::object(primitive_array(*kind)));
        }
        Insn::Var { op, index } => {
            let ty = match op {
                O::Iload | O::Istore => VType::Integer,
                O::Lload | O::Lstore => VType::Long,
                O::Fload | O::Fstore => VType::Float,
                O::Dload | O::Dstore => VType::Double,
                O::Aload => s.load(*index, position)?,
                O::Astore => s.pop(position)?,
                _ => {
                    return Err(AnalysisError::Unsupported {
                        position,
                        mnemonic: op.mnemonic(),
                    })
                }
            };
            if *op == O::Astore {
                s.store(*index, ty);
            } else if op.is_store() {
                s.pop(position)?;
                s.store(*index, ty);
            } else {
                s.stack.push(ty);
            }
        }
        Insn::Jump { op, .. } => match op {
            O::Goto | O::GotoW => {}
            O::Jsr | O::JsrW => {
                return Err(AnalysisError::Unsupported {
                    position,
                    mnemonic: op.mnemonic(),
                })
            }
            O::IfIcmpeq
            | O::IfIcmpne
            | O::IfIcmplt
            | O::IfIcmpge
            | O::IfIcmpgt
            | O::IfIcmple
            | O::IfAcmpeq
            | O::IfAcmpne => s.pop_n(2, position)?,
            _ => {
                s.pop(position)?;
            }
        },
        Insn::Ldc { index, .. } => {
            let ty = match pool.get(*index)? {
                Constant::Integer(_) => VType::Integer,
                Constant::Float(_) => VType::Float,
                Constant::Long(_) => VType::Long,
                Constant::Double(_) => VType::Double,
                Constant::String(_) => VType::object("java/lang/String"),
                Constant::Class(_) => VType::object("java/lang/Class"),
                Constant::MethodType(_) => VType::object("java/lang/invoke/MethodType"),
                Constant::MethodHandle { .. } => VType::object("java/lang/invoke/MethodHandle"),
                Constant::Dynamic { .. } => FieldType::parse(pool.dynamic(*index)?.1)?.to_vtype(),
                other => {
                    return Err(ClassError::PoolKindMismatch {
                        index: index.0,
                        expected: "loadable constant",
                        actual: other.kind_name(),
                    }
                    .into())
                }
            };
            s.stack.push(ty);
        }
        Insn::Field { op, index } => {
            let ty = FieldType::parse(pool.member(*index)?.descriptor)?.to_vtype();
            match op {
                O::Getstatic => s.stack.push(ty),
                O::Putstatic => {
                    s.pop(position)?;
                }
                O::Getfield => {
                    s.pop(position)?;
                    s.stack.push(ty);
                }
                _ => s.pop_n(2, position)?,
            }
        }
        Insn::Method { op, index } => {
            let member = pool.member(*index)?;
            let d = MethodDescriptor::parse(member.descriptor)?;
            s.pop_n(d.params.len(), position)?;
            if *op != O::Invokestatic {
                let receiver = s.pop(position)?;
                if *op == O::Invokespecial && member.name == "<init>" {
                    let initialized = match &receiver {
                        VType::UninitializedThis => Some(VType::object(context.class_name.clone())),
                        VType::Uninitialized(site) => {
                            let new_at = code
                                .position_of(*site)
                                .and_then(|p| code.next_insn(p))
                                .ok_or(AnalysisError::UnboundLabel(*site))?;
                            match &code.insns[new_at] {
                                Insn::Type { op: O::New, index } => {
                                    Some(VType::object(pool.class_name(*index)?))
                                }
                                _ => return Err(AnalysisError::UnboundLabel(*site)),
                            }
                        }
                        _ => None,
                    };
                    if let Some(to) = initialized {
                        s.replace_all(&receiver, &to);
                    }
                }
            }
            if let Some(ret) = &d.ret {
                s.stack.push(ret.to_vtype());
            }
        }
        Insn::InvokeInterface { index, .. } => {
            let d = MethodDescriptor::parse(pool.member(*index)?.descriptor)?;
            s.pop_n(d.params.len() + 1, position)?;
            if let Some(ret) = &d.ret {
                s.stack.push(ret.to_vtype());
            }
        }
        Insn::InvokeDynamic { index } => {
            let d = MethodDescriptor::parse(pool.dynamic(*index)?.1)?;
            s.pop_n(d.params.len(), position)?;
            if let Some(ret) = &d.ret {
                s.stack.push(ret.to_vtype());
            }
        }
        Insn::Type { op, index } => {
            let name = pool.class_name(*index)?;
            match op {
                O::New => {
                    let site = match position.checked_sub(1).map(|p| &code.insns[p]) {
                        Some(Insn::Label(label)) => *label,
                        _ => {
                            return Err(AnalysisError::Unsupported {
                                position,
                                mnemonic: op.mnemonic(),
                            })
                        }
                    };
                    s.stack.push(VType::Uninitialized(site));
                }
                O::Anewarray => {
                    s.pop(position)?;
                    s.stack.push(VType::Object(array_of(name)));
                }
                O::Checkcast => {
                    s.pop(position)?;
                    s.stack.push(VType::object(name));
                }
                _ => {
                    s.pop(position)?;
                    s.stack.push(VType::Integer);
                }
            }
        }
        Insn::MultiANewArray { index, dims } => {
            s.pop_n(usize::from(*dims), position)?;
            s.stack.push(VType::object(pool.class_name(*index)?));
        }
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
            s.pop(position)?;
        }
        Insn::Simple(op) => simple_step(s, *op, position)?,
    }
    Ok(())
}

fn simple_step(s: &mut State, op: Opcode, position: usize) -> Result<(), AnalysisError> {
    use Opcode as O;

    let binary = |s: &mut State, ty: VType| -> Result<(), AnalysisError> {
        s.pop_n(2, position)?;
        s.stack.push(ty);
        Ok(())
    };
    let unary = |s: &mut State, ty: VType| -> Result<(), AnalysisError> {
        s.pop(position)?;
        s.stack.push(ty);
        Ok(())
    };

    match op {
        O::Nop => {}
        O::AconstNull => s.stack.push(VType::Null),
        O::IconstM1 | O::Iconst0 | O::Iconst1 | O::Iconst2 | O::Iconst3 | O::Iconst4 | O::Iconst5 => {
            s.stack.push(VType::Integer);
        }
        O::Lconst0 | O::Lconst1 => s.stack.push(VType::Long),
        O::Fconst0 | O::Fconst1 | O::Fconst2 => s.stack.push(VType::Float),
        O::Dconst0 | O::Dconst1 => s.stack.push(VType::Double),
        O::Iaload | O::Baload | O::Caload | O::Saload => binary(s, VType::Integer)?,
        O::Laload => binary(s, VType::Long)?,
        O::Faload => binary(s, VType::Float)?,
        O::Daload => binary(s, VType::Double)?,
        O::Aaload => {
            s.pop(position)?;
            let component = match s.pop(position)? {
                VType::Object(array) if array.starts_with('[') => {
                    FieldType::parse(&array[1..])?.to_vtype()
                }
                VType::Null => VType::Null,
                _ => VType::object("java/lang/Object"),
            };
            s.stack.push(component);
        }
        O::Iastore | O::Lastore | O::Fastore | O::Dastore | O::Aastore | O::Bastore | O::Castore | O::Sastore => {
            s.pop_n(3, position)?;
        }
        O::Pop => {
            s.take_slots(1, position)?;
        }
        O::Pop2 => {
            s.take_slots(2, position)?;
        }
        O::Dup => {
            let a = s.take_slots(1, position)?;
            s.push_all(&[&a, &a]);
        }
        O::DupX1 => {
            let a = s.take_slots(1, position)?;
            let b = s.take_slots(1, position)?;
            s.push_all(&[&a, &b, &a]);
        }
        O::DupX2 => {
            let a = s.take_slots(1, position)?;
            let b = s.take_slots(2, position)?;
            s.push_all(&[&a, &b, &a]);
        }
        O::Dup2 => {
            let a = s.take_slots(2, position)?;
            s.push_all(&[&a, &a]);
        }
        O::Dup2X1 => {
            let a = s.take_slots(2, position)?;
            let b = s.take_slots(1, position)?;
            s.push_all(&[&a, &b, &a]);
        }
        O::Dup2X2 => {
            let a = s.take_slots(2, position)?;
            let b = s.take_slots(2, position)?;
            s.push_all(&[&a, &b, &a]);
        }
        O::Swap => {
            let a = s.take_slots(1, position)?;
            let b = s.take_slots(1, position)?;
            s.push_all(&[&a, &b]);
        }
        O::Iadd | O::Isub | O::Imul | O::Idiv | O::Irem | O::Ishl | O::Ishr | O::Iushr | O::Iand | O::Ior | O::Ixor => {
            binary(s, VType::Integer)?;
        }
        O::Ladd | O::Lsub | O::Lmul | O::Ldiv | O::Lrem | O::Lshl | O::Lshr | O::Lushr | O::Land | O::Lor | O::Lxor => {
            binary(s, VType::Long)?;
        }
        O::Fadd | O::Fsub | O::Fmul | O::Fdiv | O::Frem => binary(s, VType::Float)?,
        O::Dadd | O::Dsub | O::Dmul | O::Ddiv | O::Drem => binary(s, VType::Double)?,
        O::Lcmp | O::Fcmpl | O::Fcmpg | O::Dcmpl | O::Dcmpg => binary(s, VType::Integer)?,
        O::Ineg | O::L2i | O::F2i | O::D2i | O::I2b | O::I2c | O::I2s | O::Arraylength => {
            unary(s, VType::Integer)?;
        }
        O::Lneg | O::I2l | O::F2l | O::D2l => unary(s, VType::Long)?,
        O::Fneg | O::I2f | O::L2f | O::D2f => unary(s, VType::Float)?,
        O::Dneg | O::I2d | O::L2d | O::F2d => unary(s, VType::Double)?,
        O::Monitorenter | O::Monitorexit => {
            s.pop(position)?;
        }
        // control leaves the method; the caller drops the state
        O::Ireturn | O::Lreturn | O::Freturn | O::Dreturn | O::Areturn | O::Return | O::Athrow => {}
        other => {
            return Err(AnalysisError::Unsupported {
                position,
                mnemonic: other.mnemonic(),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Handler;

    fn context(descriptor: &str, is_static: bool) -> MethodContext {
        MethodContext {
            class_name: "t/Sample".into(),
            name: "run".into(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            is_static,
        }
    }

    #[test]
    fn straight_line_depth() {
        let mut pool = ConstantPool::new();
        let println = pool
            .intern_method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V")
            .unwrap();
        let out = pool
            .intern_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        let msg = pool.intern_string("hi").unwrap();
        let mut code = Code::new(0);
        code.insns = vec![
            Insn::field(Opcode::Getstatic, out),
            Insn::ldc(msg),
            Insn::method(Opcode::Invokevirtual, println),
            Insn::simple(Opcode::Return),
        ];
        assert_eq!(compute_max_stack(&code, &pool).unwrap(), 2);
    }

    #[test]
    fn underflow_detected() {
        let pool = ConstantPool::new();
        let mut code = Code::new(0);
        code.insns = vec![Insn::simple(Opcode::Pop), Insn::simple(Opcode::Return)];
        assert_eq!(
            compute_max_stack(&code, &pool).unwrap_err(),
            AnalysisError::StackUnderflow { position: 0 }
        );
    }

    #[test]
    fn falls_off_end() {
        let pool = ConstantPool::new();
        let mut code = Code::new(0);
        code.insns = vec![Insn::simple(Opcode::Nop)];
        assert_eq!(compute_max_stack(&code, &pool).unwrap_err(), AnalysisError::FallsOffEnd);
    }

    #[test]
    fn merge_depth_mismatch() {
        let pool = ConstantPool::new();
        let mut code = Code::new(1);
        let join = code.new_label();
        code.insns = vec![
            Insn::var(Opcode::Iload, 0),
            Insn::jump(Opcode::Ifeq, join),
            Insn::simple(Opcode::Iconst1),
            Insn::Label(join),
            Insn::simple(Opcode::Return),
        ];
        assert!(matches!(
            compute_max_stack(&code, &pool),
            Err(AnalysisError::InconsistentDepth { position: 3, .. })
        ));
    }

    #[test]
    fn handler_enters_with_one_slot() {
        let pool = ConstantPool::new();
        let mut code = Code::new(0);
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.insns = vec![
            Insn::Label(start),
            Insn::simple(Opcode::Nop),
            Insn::Label(end),
            Insn::simple(Opcode::Return),
            Insn::Label(handler),
            Insn::simple(Opcode::Athrow),
        ];
        code.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type: None,
        });
        assert_eq!(compute_max_stack(&code, &pool).unwrap(), 1);
    }

    #[test]
    fn max_locals_covers_wide_stores() {
        let mut code = Code::new(0);
        code.insns = vec![
            Insn::simple(Opcode::Lconst0),
            Insn::Var {
                op: Opcode::Lstore,
                index: 3,
            },
            Insn::simple(Opcode::Return),
        ];
        assert_eq!(compute_max_locals(&code, &context("(I)V", false)), 5);
    }

    #[test]
    fn inference_tracks_stores_and_calls() {
        let mut pool = ConstantPool::new();
        let current = pool
            .intern_method_ref("java/lang/Thread", "currentThread", "()Ljava/lang/Thread;")
            .unwrap();
        let mut code = Code::new(2);
        code.insns = vec![
            Insn::method(Opcode::Invokestatic, current),
            Insn::astore(1),
            Insn::aload(1),
            Insn::simple(Opcode::Return),
        ];
        let ctx = context("()V", false);
        let (frame, at) = infer_frame(&mut code, &pool, &ctx, 3).unwrap();
        assert_eq!(at, 3);
        assert_eq!(
            frame.locals,
            vec![VType::object("t/Sample"), VType::object("java/lang/Thread")]
        );
        assert_eq!(frame.stack, vec![VType::object("java/lang/Thread")]);
    }

    #[test]
    fn inference_restarts_at_explicit_frames() {
        let pool = ConstantPool::new();
        let mut code = Code::new(1);
        let target = code.new_label();
        code.insns = vec![
            Insn::jump(Opcode::Goto, target),
            Insn::Label(target),
            Insn::simple(Opcode::Return),
        ];
        code.frames
            .insert(target, Frame::new(vec![VType::Integer], Vec::new()));
        let ctx = context("(I)V", true);
        let (frame, _) = infer_frame(&mut code, &pool, &ctx, 2).unwrap();
        assert_eq!(frame.locals, vec![VType::Integer]);
    }

    #[test]
    fn inference_fails_in_dead_code() {
        let pool = ConstantPool::new();
        let mut code = Code::new(0);
        code.insns = vec![Insn::simple(Opcode::Return), Insn::simple(Opcode::Return)];
        let ctx = context("()V", true);
        assert_eq!(
            infer_frame(&mut code, &pool, &ctx, 1).unwrap_err(),
            AnalysisError::Unreachable { position: 1 }
        );
    }

    #[test]
    fn inference_labels_new_sites() {
        let mut pool = ConstantPool::new();
        let class = pool.intern_class("java/lang/StringBuilder").unwrap();
        let mut code = Code::new(0);
        code.insns = vec![
            Insn::simple(Opcode::Nop),
            Insn::type_insn(Opcode::New, class),
            Insn::simple(Opcode::Return),
        ];
        let ctx = context("()V", true);
        let (frame, at) = infer_frame(&mut code, &pool, &ctx, 2).unwrap();
        assert_eq!(at, 3);
        assert!(matches!(frame.stack.as_slice(), [VType::Uninitialized(_)]));
        assert!(code.insns[1].is_label());
    }
}
