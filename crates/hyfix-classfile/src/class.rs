//! The class file structural form

use crate::code::Code;
use crate::descriptor::MethodDescriptor;
use crate::error::{ClassError, WriteError};
use crate::frame::Frame;
use crate::pool::{ConstantPool, CpIndex};

/// Access flag bits
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
}

/// Attribute kept as raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: CpIndex,
    pub info: Vec<u8>,
}

/// Field declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access: u16,
    pub name: CpIndex,
    pub descriptor: CpIndex,
    pub attributes: Vec<Attribute>,
}

/// Parsed `Code` attribute together with its original encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    pub(crate) attr_name: CpIndex,
    /// Raw attribute bytes; dropped as soon as the code is borrowed mutably
    pub(crate) original: Option<Vec<u8>>,
    pub(crate) code: Code,
}

/// Method declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access: u16,
    pub name: CpIndex,
    pub descriptor: CpIndex,
    /// Attributes other than `Code`
    pub attributes: Vec<Attribute>,
    pub(crate) body: Option<MethodBody>,
    /// Index in the attribute list where `Code` is written back
    pub(crate) body_position: usize,
}

impl Method {
    /// Parsed body, if the method has one
    #[inline]
    #[must_use]
    pub fn code(&self) -> Option<&Code> {
        self.body.as_ref().map(|b| &b.code)
    }

    /// Mutable body; marks the method as modified
    pub fn code_mut(&mut self) -> Option<&mut Code> {
        self.body.as_mut().map(|b| {
            b.original = None;
            &mut b.code
        })
    }

    /// Body was borrowed mutably since parsing (or was created in memory)
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.body.as_ref().is_some_and(|b| b.original.is_none())
    }

    /// `ACC_STATIC` set
    #[inline]
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }
}

/// Name, descriptor and owner of one method, detached from the class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodContext {
    pub class_name: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub is_static: bool,
}

impl MethodContext {
    /// Implicit frame at method entry
    #[must_use]
    pub fn initial_frame(&self) -> Frame {
        Frame::initial(&self.class_name, &self.name, &self.descriptor, self.is_static)
    }

    /// Slots used by the receiver and parameters
    #[must_use]
    pub fn argument_slots(&self) -> u16 {
        self.descriptor.param_slots() + u16::from(!self.is_static)
    }
}

/// Mutable view of one method body alongside the class pool
#[derive(Debug)]
pub struct MethodEdit<'a> {
    pub pool: &'a mut ConstantPool,
    pub code: &'a mut Code,
    pub context: MethodContext,
}

/// A whole class file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access: u16,
    pub this_class: CpIndex,
    pub super_class: Option<CpIndex>,
    pub interfaces: Vec<CpIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Empty class with the given names and version
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] only in theory; the pool is empty.
    pub fn new(
        name: &str,
        super_name: Option<&str>,
        access: u16,
        major_version: u16,
    ) -> Result<Self, ClassError> {
        let mut pool = ConstantPool::new();
        let this_class = pool.intern_class(name)?;
        let super_class = super_name.map(|s| pool.intern_class(s)).transpose()?;
        Ok(Self {
            minor_version: 0,
            major_version,
            pool,
            access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Parse class file bytes
    ///
    /// # Errors
    /// Any structural malformation is reported as a [`ClassError`].
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassError> {
        crate::reader::read_class(bytes)
    }

    /// Encode back to bytes
    ///
    /// # Errors
    /// Returns a [`WriteError`] when a modified body cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        crate::writer::write_class(self)
    }

    /// Internal name of this class
    ///
    /// # Errors
    /// Fails if `this_class` is not a valid `Class` entry.
    pub fn name(&self) -> Result<&str, ClassError> {
        self.pool.class_name(self.this_class)
    }

    /// Internal name of the superclass
    ///
    /// # Errors
    /// Fails if `super_class` is not a valid `Class` entry.
    pub fn super_name(&self) -> Result<Option<&str>, ClassError> {
        self.super_class
            .map(|i| self.pool.class_name(i))
            .transpose()
    }

    fn method(&self, index: usize) -> Result<&Method, ClassError> {
        self.methods.get(index).ok_or(ClassError::NoSuchMethod(index))
    }

    /// Name of method `index`
    ///
    /// # Errors
    /// Fails on a bad index or malformed name constant.
    pub fn method_name(&self, index: usize) -> Result<&str, ClassError> {
        self.pool.utf8(self.method(index)?.name)
    }

    /// Descriptor of method `index`
    ///
    /// # Errors
    /// Fails on a bad index or malformed descriptor constant.
    pub fn method_descriptor(&self, index: usize) -> Result<&str, ClassError> {
        self.pool.utf8(self.method(index)?.descriptor)
    }

    /// Index of the method with exactly this name and descriptor
    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        (0..self.methods.len()).find(|&i| {
            self.method_name(i).is_ok_and(|n| n == name)
                && self.method_descriptor(i).is_ok_and(|d| d == descriptor)
        })
    }

    /// Indices of all methods with this name
    #[must_use]
    pub fn methods_named(&self, name: &str) -> Vec<usize> {
        (0..self.methods.len())
            .filter(|&i| self.method_name(i).is_ok_and(|n| n == name))
            .collect()
    }

    /// Detached name/descriptor/owner of method `index`
    ///
    /// # Errors
    /// Fails on a bad index or malformed constants.
    pub fn method_context(&self, index: usize) -> Result<MethodContext, ClassError> {
        let method = self.method(index)?;
        Ok(MethodContext {
            class_name: self.name()?.to_owned(),
            name: self.pool.utf8(method.name)?.to_owned(),
            descriptor: MethodDescriptor::parse(self.pool.utf8(method.descriptor)?)?,
            is_static: method.is_static(),
        })
    }

    /// Borrow method `index` for editing; marks it modified
    ///
    /// # Errors
    /// Fails on a bad index, a malformed signature, or a method without code.
    pub fn edit_method(&mut self, index: usize) -> Result<MethodEdit<'_>, ClassError> {
        let context = self.method_context(index)?;
        let method = self
            .methods
            .get_mut(index)
            .ok_or(ClassError::NoSuchMethod(index))?;
        let code = method
            .code_mut()
            .ok_or_else(|| ClassError::NoCode(context.name.clone()))?;
        Ok(MethodEdit {
            pool: &mut self.pool,
            code,
            context,
        })
    }

    /// Append a method with a body; returns its index
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the names cannot be interned.
    pub fn add_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Code,
    ) -> Result<usize, ClassError> {
        let attr_name = self.pool.intern_utf8("Code")?;
        let name = self.pool.intern_utf8(name)?;
        let descriptor = self.pool.intern_utf8(descriptor)?;
        self.methods.push(Method {
            access,
            name,
            descriptor,
            attributes: Vec::new(),
            body: Some(MethodBody {
                attr_name,
                original: None,
                code,
            }),
            body_position: 0,
        });
        Ok(self.methods.len() - 1)
    }

    /// Append a field; returns its index
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the names cannot be interned.
    pub fn add_field(&mut self, access: u16, name: &str, descriptor: &str) -> Result<usize, ClassError> {
        let name = self.pool.intern_utf8(name)?;
        let descriptor = self.pool.intern_utf8(descriptor)?;
        self.fields.push(Field {
            access,
            name,
            descriptor,
            attributes: Vec::new(),
        });
        Ok(self.fields.len() - 1)
    }

    /// Indices of methods whose bodies were modified or added
    #[must_use]
    pub fn modified_methods(&self) -> Vec<usize> {
        (0..self.methods.len())
            .filter(|&i| self.methods[i].is_modified())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::Insn;
    use crate::opcode::Opcode;

    fn sample() -> ClassFile {
        let mut class = ClassFile::new("a/B", Some("java/lang/Object"), access::PUBLIC, 52).unwrap();
        let mut code = Code::new(1);
        code.insns.push(Insn::simple(Opcode::Return));
        class.add_method(access::PUBLIC, "run", "()V", code).unwrap();
        class
    }

    #[test]
    fn lookup_by_name_and_descriptor() {
        let class = sample();
        assert_eq!(class.find_method("run", "()V"), Some(0));
        assert_eq!(class.find_method("run", "(I)V"), None);
        assert_eq!(class.methods_named("run"), vec![0]);
        assert_eq!(class.name().unwrap(), "a/B");
    }

    #[test]
    fn edit_reports_context() {
        let mut class = sample();
        let edit = class.edit_method(0).unwrap();
        assert_eq!(edit.context.class_name, "a/B");
        assert_eq!(edit.context.argument_slots(), 1);
        assert!(class.methods[0].is_modified());
    }

    #[test]
    fn missing_method_index() {
        let mut class = sample();
        assert_eq!(class.edit_method(4).unwrap_err(), ClassError::NoSuchMethod(4));
    }
}
