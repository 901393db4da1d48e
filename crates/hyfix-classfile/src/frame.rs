//! Stack-map frames
//!
//! Frames are held fully expanded (no delta encoding). The reader resolves
//! `same`/`chop`/`append` entries against the previous frame; the writer picks
//! the most compact encoding again.

use crate::descriptor::MethodDescriptor;
use crate::insn::Label;

/// Verification type of a local or stack entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Class internal name or array descriptor
    Object(String),
    /// Result of the `new` instruction placed right after the label
    Uninitialized(Label),
}

impl VType {
    /// `Long` and `Double` take two slots
    #[inline]
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Number of slots
    #[inline]
    #[must_use]
    pub fn slots(&self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    /// Object type from an internal name
    #[inline]
    #[must_use]
    pub fn object(name: impl Into<String>) -> Self {
        Self::Object(name.into())
    }
}

/// Types of locals and operand stack at one point in a method
///
/// Wide values appear once (their second slot is implicit), matching the
/// on-disk representation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

impl Frame {
    /// Frame with the given locals and stack
    #[inline]
    #[must_use]
    pub fn new(locals: Vec<VType>, stack: Vec<VType>) -> Self {
        Self { locals, stack }
    }

    /// Implicit frame at method entry
    #[must_use]
    pub fn initial(
        class_name: &str,
        method_name: &str,
        descriptor: &MethodDescriptor,
        is_static: bool,
    ) -> Self {
        let mut locals = Vec::with_capacity(descriptor.params.len() + 1);
        if !is_static {
            if method_name == "<init>" && class_name != "java/lang/Object" {
                locals.push(VType::UninitializedThis);
            } else {
                locals.push(VType::Object(class_name.to_owned()));
            }
        }
        locals.extend(descriptor.params.iter().map(crate::descriptor::FieldType::to_vtype));
        Self {
            locals,
            stack: Vec::new(),
        }
    }

    /// Locals expanded to one entry per slot (`Top` after wide values)
    #[must_use]
    pub fn local_slots(&self) -> Vec<VType> {
        expand(&self.locals)
    }

    /// Total slot count of the locals
    #[must_use]
    pub fn locals_size(&self) -> u16 {
        self.locals.iter().map(VType::slots).sum()
    }

    /// Total slot count of the operand stack
    #[must_use]
    pub fn stack_size(&self) -> u16 {
        self.stack.iter().map(VType::slots).sum()
    }

    /// Build a frame from per-slot locals, dropping implicit second slots
    /// and trailing `Top` entries
    #[must_use]
    pub fn from_slots(slots: &[VType], stack: Vec<VType>) -> Self {
        let mut locals = compress(slots);
        while locals.last() == Some(&VType::Top) {
            locals.pop();
        }
        Self { locals, stack }
    }
}

/// One entry per slot
pub(crate) fn expand(types: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(types.len() + 2);
    for ty in types {
        out.push(ty.clone());
        if ty.is_wide() {
            out.push(VType::Top);
        }
    }
    out
}

/// Inverse of [`expand`]
pub(crate) fn compress(slots: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(slots.len());
    let mut i = 0;
    while i < slots.len() {
        let ty = &slots[i];
        out.push(ty.clone());
        i += if ty.is_wide() { 2 } else { 1 };
    }
    out
}
