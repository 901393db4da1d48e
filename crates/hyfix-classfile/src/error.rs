//! Error types for the class-file model
//!
//! - [`ClassError`]: malformed input or an invalid structural request
//! - [`WriteError`]: a structural form that cannot be encoded

use crate::insn::Label;

/// Errors while reading or querying a class file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassError {
    /// Input ended before a complete structure was read
    #[error("unexpected end of input at offset {offset} (need {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },

    /// Magic number is not `0xCAFEBABE`
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    /// Class file version outside the supported range
    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// Constant pool entry with an unknown tag
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    /// Reference to a missing or unusable pool slot
    #[error("constant pool index {0} is out of range or unusable")]
    BadPoolIndex(u16),

    /// Pool entry exists but is of the wrong kind
    #[error("constant #{index} is {actual}, expected {expected}")]
    PoolKindMismatch {
        index: u16,
        expected: &'static str,
        actual: &'static str,
    },

    /// Invalid modified UTF-8 in a string constant
    #[error("invalid modified UTF-8: {0}")]
    BadUtf8(String),

    /// No room left for new constant pool entries
    #[error("constant pool is full")]
    PoolOverflow,

    /// Undefined opcode byte in a method body
    #[error("unknown opcode {opcode:#04x} at bytecode offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u32 },

    /// Field or method descriptor that does not parse
    #[error("invalid descriptor '{0}'")]
    BadDescriptor(String),

    /// Branch, handler or table offset that is not an instruction boundary
    #[error("bytecode offset {0} is not an instruction boundary")]
    BadOffset(u32),

    /// Attribute contents that do not match their declared layout
    #[error("malformed {attribute} attribute: {reason}")]
    BadAttribute {
        attribute: &'static str,
        reason: String,
    },

    /// Bytes remain after the class structure ended
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),

    /// Method index outside the method table
    #[error("no method at index {0}")]
    NoSuchMethod(usize),

    /// Method has no code (abstract or native)
    #[error("method {0} has no code")]
    NoCode(String),
}

impl ClassError {
    /// Create malformed attribute error
    pub fn bad_attribute(attribute: &'static str, reason: impl Into<String>) -> Self {
        Self::BadAttribute {
            attribute,
            reason: reason.into(),
        }
    }
}

/// Errors while encoding a structural form back to bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Encoded method body exceeds 65535 bytes
    #[error("code length {0} exceeds the 65535 byte limit")]
    CodeTooLarge(usize),

    /// Method body contains no instructions
    #[error("method body is empty")]
    EmptyCode,

    /// Short branch cannot reach its target
    #[error("branch at offset {from} cannot reach offset {to}")]
    BranchOutOfRange { from: u32, to: u32 },

    /// Label referenced but never placed in the instruction stream
    #[error("label {0} is referenced but not bound")]
    UnboundLabel(Label),

    /// Label placed twice in the instruction stream
    #[error("label {0} is bound more than once")]
    DuplicateLabel(Label),

    /// Two different frames resolve to the same bytecode offset
    #[error("conflicting stack map frames at offset {0}")]
    ConflictingFrames(u32),

    /// Frame bound at or past the end of the code
    #[error("stack map frame at offset {0} is outside the code")]
    FrameOutOfCode(u32),

    /// Range whose end precedes its start
    #[error("range {start}..{end} is inverted")]
    BadRange { start: u32, end: u32 },

    /// A table exceeded its u16 entry count
    #[error("too many {0} entries")]
    TooManyEntries(&'static str),

    /// Underlying model error (pool growth, lookups)
    #[error(transparent)]
    Class(#[from] ClassError),
}
