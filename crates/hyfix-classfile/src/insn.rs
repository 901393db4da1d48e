//! Instruction stream elements
//!
//! Branch targets are [`Label`] handles rather than byte offsets, so inserting
//! or removing instructions never invalidates a jump, handler range, frame or
//! debug entry. Offsets only exist while reading and writing.

use crate::opcode::Opcode;
use crate::pool::CpIndex;
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};

/// Position marker inside an instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Numeric id, unique within one method body
    #[inline]
    #[must_use]
    pub fn id(self) -> u32 {
        self.0
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One element of a method's instruction stream
///
/// Local loads and stores are always held in their long form
/// (`Var { op: Aload, index: 1 }` for `aload_1`); the writer picks the
/// shortest encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Binds a label to this position; encodes to nothing
    Label(Label),
    /// Opcode without operands
    Simple(Opcode),
    /// `bipush` / `sipush`
    Push { op: Opcode, value: i16 },
    /// `newarray` of a primitive type code
    NewArray(u8),
    /// Local variable load, store or `ret`
    Var { op: Opcode, index: u16 },
    /// `iinc`
    Iinc { index: u16, delta: i16 },
    /// Conditional or unconditional branch, `jsr`
    Jump { op: Opcode, target: Label },
    /// `ldc`, `ldc_w`, `ldc2_w`
    Ldc { op: Opcode, index: CpIndex },
    /// `getstatic`, `putstatic`, `getfield`, `putfield`
    Field { op: Opcode, index: CpIndex },
    /// `invokevirtual`, `invokespecial`, `invokestatic`
    Method { op: Opcode, index: CpIndex },
    /// `invokeinterface` with its argument slot count
    InvokeInterface { index: CpIndex, count: u8 },
    /// `invokedynamic`
    InvokeDynamic { index: CpIndex },
    /// `new`, `anewarray`, `checkcast`, `instanceof`
    Type { op: Opcode, index: CpIndex },
    /// `multianewarray`
    MultiANewArray { index: CpIndex, dims: u8 },
    /// `tableswitch` over `low..=low + targets.len() - 1`
    TableSwitch {
        default: Label,
        low: i32,
        targets: Vec<Label>,
    },
    /// `lookupswitch` with sorted keys
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
}

impl Insn {
    /// Operand-less instruction
    #[inline]
    #[must_use]
    pub fn simple(op: Opcode) -> Self {
        Self::Simple(op)
    }

    /// Local variable access, normalizing short forms
    #[must_use]
    pub fn var(op: Opcode, index: u16) -> Self {
        match op.expand_short_form() {
            Some((op, index)) => Self::Var { op, index },
            None => Self::Var { op, index },
        }
    }

    /// `aload index`
    #[inline]
    #[must_use]
    pub fn aload(index: u16) -> Self {
        Self::Var {
            op: Opcode::Aload,
            index,
        }
    }

    /// `astore index`
    #[inline]
    #[must_use]
    pub fn astore(index: u16) -> Self {
        Self::Var {
            op: Opcode::Astore,
            index,
        }
    }

    /// Branch to `target`
    #[inline]
    #[must_use]
    pub fn jump(op: Opcode, target: Label) -> Self {
        Self::Jump { op, target }
    }

    /// Field access
    #[inline]
    #[must_use]
    pub fn field(op: Opcode, index: CpIndex) -> Self {
        Self::Field { op, index }
    }

    /// Non-interface method invocation
    #[inline]
    #[must_use]
    pub fn method(op: Opcode, index: CpIndex) -> Self {
        Self::Method { op, index }
    }

    /// `ldc` of a single-slot constant
    #[inline]
    #[must_use]
    pub fn ldc(index: CpIndex) -> Self {
        Self::Ldc {
            op: Opcode::Ldc,
            index,
        }
    }

    /// `ldc2_w` of a long or double constant
    #[inline]
    #[must_use]
    pub fn ldc2(index: CpIndex) -> Self {
        Self::Ldc {
            op: Opcode::Ldc2W,
            index,
        }
    }

    /// Type instruction (`new`, `anewarray`, `checkcast`, `instanceof`)
    #[inline]
    #[must_use]
    pub fn type_insn(op: Opcode, index: CpIndex) -> Self {
        Self::Type { op, index }
    }

    /// Is this a label marker
    #[inline]
    #[must_use]
    pub fn is_label(&self) -> bool {
        matches!(self, Self::Label(_))
    }

    /// Opcode of a real instruction; `None` for labels
    #[must_use]
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Self::Label(_) => return None,
            Self::Simple(op)
            | Self::Push { op, .. }
            | Self::Var { op, .. }
            | Self::Jump { op, .. }
            | Self::Ldc { op, .. }
            | Self::Field { op, .. }
            | Self::Method { op, .. }
            | Self::Type { op, .. } => *op,
            Self::NewArray(_) => Opcode::Newarray,
            Self::Iinc { .. } => Opcode::Iinc,
            Self::InvokeInterface { .. } => Opcode::Invokeinterface,
            Self::InvokeDynamic { .. } => Opcode::Invokedynamic,
            Self::MultiANewArray { .. } => Opcode::Multianewarray,
            Self::TableSwitch { .. } => Opcode::Tableswitch,
            Self::LookupSwitch { .. } => Opcode::Lookupswitch,
        })
    }

    /// Pool entry referenced by this instruction
    #[must_use]
    pub fn pool_index(&self) -> Option<CpIndex> {
        match self {
            Self::Ldc { index, .. }
            | Self::Field { index, .. }
            | Self::Method { index, .. }
            | Self::InvokeInterface { index, .. }
            | Self::InvokeDynamic { index }
            | Self::Type { index, .. }
            | Self::MultiANewArray { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Labels this instruction can transfer control to
    #[must_use]
    pub fn targets(&self) -> SmallVec<[Label; 2]> {
        match self {
            Self::Jump { target, .. } => SmallVec::from_slice(&[*target]),
            Self::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Self::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, l)| *l))
                .collect(),
            _ => SmallVec::new(),
        }
    }

    /// Control never reaches the next instruction
    #[must_use]
    pub fn ends_block(&self) -> bool {
        self.opcode().is_some_and(Opcode::ends_block)
    }

    /// Rewrite every label held by this instruction
    pub fn map_labels(&mut self, mut f: impl FnMut(Label) -> Label) {
        match self {
            Self::Label(label) | Self::Jump { target: label, .. } => *label = f(*label),
            Self::TableSwitch {
                default, targets, ..
            } => {
                *default = f(*default);
                for target in targets {
                    *target = f(*target);
                }
            }
            Self::LookupSwitch { default, pairs } => {
                *default = f(*default);
                for (_, target) in pairs {
                    *target = f(*target);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_normalizes_short_forms() {
        assert_eq!(Insn::var(Opcode::Aload0, 0), Insn::aload(0));
        assert_eq!(
            Insn::var(Opcode::Istore2, 0),
            Insn::Var {
                op: Opcode::Istore,
                index: 2
            }
        );
    }

    #[test]
    fn switch_targets_include_default() {
        let insn = Insn::TableSwitch {
            default: Label(9),
            low: 0,
            targets: vec![Label(1), Label(2)],
        };
        assert_eq!(insn.targets().as_slice(), &[Label(9), Label(1), Label(2)]);
    }

    #[test]
    fn labels_have_no_opcode() {
        assert_eq!(Insn::Label(Label(0)).opcode(), None);
        assert!(!Insn::Label(Label(0)).ends_block());
    }
}
