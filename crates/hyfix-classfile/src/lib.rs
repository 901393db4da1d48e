//! HyFix Class File Model
//!
//! Binary ⇄ structural round trip for JVM class files, built for small,
//! targeted rewrites.
//!
//! # Core Concepts
//!
//! - [`ClassFile`]: parsed class; untouched method bodies keep their original
//!   bytes and are written back unchanged
//! - [`ConstantPool`] / [`CpIndex`]: pool arena with deduplicating interning
//! - [`Code`] / [`Insn`] / [`Label`]: label-addressed instruction streams,
//!   so edits never invalidate branch, handler or frame references
//! - [`Frame`] / [`VType`]: fully expanded stack-map frames
//! - [`analysis`]: stack depth, local count and frame inference
//! - [`validate`]: integrity checks run after a rewrite
//!
//! # Example
//!
//! ```rust,ignore
//! use hyfix_classfile::{ClassFile, Insn, Opcode};
//!
//! let mut class = ClassFile::parse(&bytes)?;
//! let index = class.find_method("tick", "()V").unwrap();
//! let edit = class.edit_method(index)?;
//! edit.code.insert(0, [Insn::simple(Opcode::Nop)]);
//! let patched = class.to_bytes()?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod class;
mod code;
mod descriptor;
mod error;
mod frame;
mod insn;
mod opcode;
mod pool;
mod reader;
mod writer;

pub mod analysis;
pub mod disasm;
pub mod mutf8;
pub mod validate;

// Re-exports
pub use class::{access, Attribute, ClassFile, Field, Method, MethodContext, MethodEdit};
pub use code::{Code, Handler, LineNumber, LocalVariable};
pub use descriptor::{FieldType, MethodDescriptor};
pub use error::{ClassError, WriteError};
pub use frame::{Frame, VType};
pub use insn::{Insn, Label};
pub use opcode::Opcode;
pub use pool::{Constant, ConstantPool, CpIndex, MemberRef};
pub use reader::{MAX_MAJOR_VERSION, MIN_MAJOR_VERSION};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
