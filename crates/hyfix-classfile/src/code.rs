//! Method bodies
//!
//! A [`Code`] is the editable form of a `Code` attribute: a flat instruction
//! stream with [`Insn::Label`] markers, plus handler ranges, stack-map frames
//! and debug tables that refer to those labels.

use crate::class::Attribute;
use crate::frame::Frame;
use crate::insn::{Insn, Label};
use crate::pool::CpIndex;
use std::collections::BTreeMap;

/// Exception handler covering `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything (`finally`)
    pub catch_type: Option<CpIndex>,
}

/// `LineNumberTable` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start: Label,
    pub line: u16,
}

/// `LocalVariableTable` / `LocalVariableTypeTable` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: Label,
    pub end: Label,
    pub name: CpIndex,
    /// Descriptor (or signature, for the type table)
    pub descriptor: CpIndex,
    pub index: u16,
}

/// Editable method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub insns: Vec<Insn>,
    pub handlers: Vec<Handler>,
    /// Explicit frames, keyed by the label they describe
    pub frames: BTreeMap<Label, Frame>,
    pub line_numbers: Vec<LineNumber>,
    pub local_variables: Vec<LocalVariable>,
    pub local_variable_types: Vec<LocalVariable>,
    /// Code attributes kept verbatim
    pub attributes: Vec<Attribute>,
    next_label: u32,
}

impl Code {
    /// Empty body
    #[must_use]
    pub fn new(max_locals: u16) -> Self {
        Self {
            max_stack: 0,
            max_locals,
            insns: Vec::new(),
            handlers: Vec::new(),
            frames: BTreeMap::new(),
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            local_variable_types: Vec::new(),
            attributes: Vec::new(),
            next_label: 0,
        }
    }

    pub(crate) fn with_label_count(mut self, next_label: u32) -> Self {
        self.next_label = next_label;
        self
    }

    /// Allocate a fresh, unbound label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Number of labels allocated so far
    #[inline]
    #[must_use]
    pub fn label_count(&self) -> u32 {
        self.next_label
    }

    /// Stream position where `label` is bound
    #[must_use]
    pub fn position_of(&self, label: Label) -> Option<usize> {
        self.insns.iter().position(|i| *i == Insn::Label(label))
    }

    /// Insert instructions before position `at`
    pub fn insert(&mut self, at: usize, insns: impl IntoIterator<Item = Insn>) {
        let tail = self.insns.split_off(at);
        self.insns.extend(insns);
        self.insns.extend(tail);
    }

    /// Replace the instruction at `at` with a sequence
    pub fn replace(&mut self, at: usize, insns: impl IntoIterator<Item = Insn>) {
        self.insns.splice(at..=at, insns);
    }

    /// Position of the first element at or after `from` matching `pred`
    pub fn find_from(&self, from: usize, mut pred: impl FnMut(&Insn) -> bool) -> Option<usize> {
        self.insns
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, insn)| pred(insn))
            .map(|(i, _)| i)
    }

    /// First real instruction after `pos`, skipping labels
    #[must_use]
    pub fn next_insn(&self, pos: usize) -> Option<usize> {
        self.find_from(pos + 1, |i| !i.is_label())
    }

    /// Last real instruction before `pos`, skipping labels
    #[must_use]
    pub fn prev_insn(&self, pos: usize) -> Option<usize> {
        self.insns[..pos.min(self.insns.len())]
            .iter()
            .rposition(|i| !i.is_label())
    }

    /// Real instructions with their stream positions
    pub fn instructions(&self) -> impl Iterator<Item = (usize, &Insn)> {
        self.insns.iter().enumerate().filter(|(_, i)| !i.is_label())
    }

    /// A label bound immediately before position `pos`, binding a new one if
    /// there is none. Returns the label and the (possibly shifted) position
    /// of the element that was at `pos`.
    pub fn label_before(&mut self, pos: usize) -> (Label, usize) {
        if pos > 0 {
            if let Insn::Label(label) = self.insns[pos - 1] {
                return (label, pos);
            }
        }
        let label = self.new_label();
        self.insns.insert(pos, Insn::Label(label));
        (label, pos + 1)
    }

    /// Drop the whole body, keeping label numbering
    pub fn clear(&mut self) {
        self.insns.clear();
        self.handlers.clear();
        self.frames.clear();
        self.line_numbers.clear();
        self.local_variables.clear();
        self.local_variable_types.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn body() -> Code {
        let mut code = Code::new(1);
        let l = code.new_label();
        code.insns = vec![
            Insn::Label(l),
            Insn::aload(0),
            Insn::simple(Opcode::Pop),
            Insn::simple(Opcode::Return),
        ];
        code
    }

    #[test]
    fn labels_are_unique() {
        let mut code = Code::new(0);
        let a = code.new_label();
        let b = code.new_label();
        assert_ne!(a, b);
        assert_eq!(code.label_count(), 2);
    }

    #[test]
    fn insert_and_replace() {
        let mut code = body();
        code.insert(1, [Insn::simple(Opcode::Nop)]);
        assert_eq!(code.insns[1], Insn::simple(Opcode::Nop));
        code.replace(3, [Insn::simple(Opcode::Nop), Insn::simple(Opcode::Nop)]);
        assert_eq!(code.insns.len(), 6);
        assert_eq!(code.insns[5], Insn::simple(Opcode::Return));
    }

    #[test]
    fn navigation_skips_labels() {
        let code = body();
        assert_eq!(code.next_insn(0), Some(1));
        assert_eq!(code.prev_insn(1), None);
        assert_eq!(code.instructions().count(), 3);
    }

    #[test]
    fn label_before_reuses_existing() {
        let mut code = body();
        let (label, pos) = code.label_before(1);
        assert_eq!(pos, 1);
        assert_eq!(code.position_of(label), Some(0));

        let (fresh, pos) = code.label_before(3);
        assert_eq!(pos, 4);
        assert_eq!(code.position_of(fresh), Some(3));
    }
}
