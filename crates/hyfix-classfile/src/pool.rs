//! Constant pool arena
//!
//! Entries are addressed by [`CpIndex`] handles. Interning returns the
//! existing index when an identical entry is already present, so repeated
//! edits never grow the pool needlessly.

use crate::error::ClassError;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

/// Handle to a constant pool slot (1-based, as on disk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpIndex(pub u16);

impl Display for CpIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One constant pool entry
///
/// Floating point values are kept as raw bits so entries can be hashed and
/// compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Slot 0 and the second slot of `Long`/`Double`
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(CpIndex),
    String(CpIndex),
    FieldRef { class: CpIndex, name_and_type: CpIndex },
    MethodRef { class: CpIndex, name_and_type: CpIndex },
    InterfaceMethodRef { class: CpIndex, name_and_type: CpIndex },
    NameAndType { name: CpIndex, descriptor: CpIndex },
    MethodHandle { kind: u8, reference: CpIndex },
    MethodType(CpIndex),
    Dynamic { bootstrap: u16, name_and_type: CpIndex },
    InvokeDynamic { bootstrap: u16, name_and_type: CpIndex },
    Module(CpIndex),
    Package(CpIndex),
}

impl Constant {
    /// On-disk tag byte
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Unusable => 0,
            Self::Utf8(_) => 1,
            Self::Integer(_) => 3,
            Self::Float(_) => 4,
            Self::Long(_) => 5,
            Self::Double(_) => 6,
            Self::Class(_) => 7,
            Self::String(_) => 8,
            Self::FieldRef { .. } => 9,
            Self::MethodRef { .. } => 10,
            Self::InterfaceMethodRef { .. } => 11,
            Self::NameAndType { .. } => 12,
            Self::MethodHandle { .. } => 15,
            Self::MethodType(_) => 16,
            Self::Dynamic { .. } => 17,
            Self::InvokeDynamic { .. } => 18,
            Self::Module(_) => 19,
            Self::Package(_) => 20,
        }
    }

    /// Human-readable kind, used in error messages
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unusable => "unusable",
            Self::Utf8(_) => "Utf8",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Long(_) => "Long",
            Self::Double(_) => "Double",
            Self::Class(_) => "Class",
            Self::String(_) => "String",
            Self::FieldRef { .. } => "Fieldref",
            Self::MethodRef { .. } => "Methodref",
            Self::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Self::NameAndType { .. } => "NameAndType",
            Self::MethodHandle { .. } => "MethodHandle",
            Self::MethodType(_) => "MethodType",
            Self::Dynamic { .. } => "Dynamic",
            Self::InvokeDynamic { .. } => "InvokeDynamic",
            Self::Module(_) => "Module",
            Self::Package(_) => "Package",
        }
    }

    /// `Long` and `Double` occupy two slots
    #[inline]
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }

    /// Pool indices this entry refers to
    #[must_use]
    pub fn references(&self) -> Vec<CpIndex> {
        match *self {
            Self::Class(i)
            | Self::String(i)
            | Self::MethodType(i)
            | Self::Module(i)
            | Self::Package(i) => vec![i],
            Self::FieldRef { class, name_and_type }
            | Self::MethodRef { class, name_and_type }
            | Self::InterfaceMethodRef { class, name_and_type } => vec![class, name_and_type],
            Self::NameAndType { name, descriptor } => vec![name, descriptor],
            Self::MethodHandle { reference, .. } => vec![reference],
            Self::Dynamic { name_and_type, .. } | Self::InvokeDynamic { name_and_type, .. } => {
                vec![name_and_type]
            }
            _ => Vec::new(),
        }
    }
}

/// Resolved field or method reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// The constant pool of one class
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, CpIndex>,
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for ConstantPool {}

impl ConstantPool {
    /// Empty pool (slot 0 reserved)
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }

    /// Value of `constant_pool_count` when written
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Append an entry without deduplication
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] if the pool would exceed 65535
    /// slots.
    pub fn push(&mut self, constant: Constant) -> Result<CpIndex, ClassError> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > usize::from(u16::MAX) {
            return Err(ClassError::PoolOverflow);
        }
        let index = CpIndex(u16::try_from(self.entries.len()).map_err(|_| ClassError::PoolOverflow)?);
        let wide = constant.is_wide();
        self.lookup.entry(constant.clone()).or_insert(index);
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    fn intern(&mut self, constant: Constant) -> Result<CpIndex, ClassError> {
        if let Some(&index) = self.lookup.get(&constant) {
            return Ok(index);
        }
        self.push(constant)
    }

    /// Entry at `index`
    ///
    /// # Errors
    /// Returns [`ClassError::BadPoolIndex`] for slot 0, out-of-range indices
    /// and the second slot of wide entries.
    pub fn get(&self, index: CpIndex) -> Result<&Constant, ClassError> {
        match self.entries.get(usize::from(index.0)) {
            Some(Constant::Unusable) | None => Err(ClassError::BadPoolIndex(index.0)),
            Some(constant) => Ok(constant),
        }
    }

    /// Iterate over usable entries
    pub fn iter(&self) -> impl Iterator<Item = (CpIndex, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .filter_map(|(i, c)| u16::try_from(i).ok().map(|i| (CpIndex(i), c)))
    }

    fn mismatch(index: CpIndex, expected: &'static str, actual: &Constant) -> ClassError {
        ClassError::PoolKindMismatch {
            index: index.0,
            expected,
            actual: actual.kind_name(),
        }
    }

    /// Text of a `Utf8` entry
    ///
    /// # Errors
    /// Fails if the index is unusable or not a `Utf8` entry.
    pub fn utf8(&self, index: CpIndex) -> Result<&str, ClassError> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            other => Err(Self::mismatch(index, "Utf8", other)),
        }
    }

    /// Internal name of a `Class` entry
    ///
    /// # Errors
    /// Fails if the index is unusable or not a `Class` entry.
    pub fn class_name(&self, index: CpIndex) -> Result<&str, ClassError> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(Self::mismatch(index, "Class", other)),
        }
    }

    /// Text of a `String` entry
    ///
    /// # Errors
    /// Fails if the index is unusable or not a `String` entry.
    pub fn string(&self, index: CpIndex) -> Result<&str, ClassError> {
        match self.get(index)? {
            Constant::String(value) => self.utf8(*value),
            other => Err(Self::mismatch(index, "String", other)),
        }
    }

    /// Name and descriptor of a `NameAndType` entry
    ///
    /// # Errors
    /// Fails if the index is unusable or not a `NameAndType` entry.
    pub fn name_and_type(&self, index: CpIndex) -> Result<(&str, &str), ClassError> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(Self::mismatch(index, "NameAndType", other)),
        }
    }

    /// Resolve a field, method or interface method reference
    ///
    /// # Errors
    /// Fails if the index is not a member reference or any part is malformed.
    pub fn member(&self, index: CpIndex) -> Result<MemberRef<'_>, ClassError> {
        match self.get(index)? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    owner: self.class_name(*class)?,
                    name,
                    descriptor,
                })
            }
            other => Err(Self::mismatch(index, "member reference", other)),
        }
    }

    /// Name and descriptor of an `InvokeDynamic` or `Dynamic` entry
    ///
    /// # Errors
    /// Fails if the index is not a dynamic entry.
    pub fn dynamic(&self, index: CpIndex) -> Result<(&str, &str), ClassError> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. }
            | Constant::Dynamic { name_and_type, .. } => self.name_and_type(*name_and_type),
            other => Err(Self::mismatch(index, "InvokeDynamic", other)),
        }
    }

    /// Find an existing `Utf8` entry without growing the pool
    #[must_use]
    pub fn find_utf8(&self, value: &str) -> Option<CpIndex> {
        self.lookup.get(&Constant::Utf8(value.to_owned())).copied()
    }

    /// Find an existing `Class` entry without growing the pool
    #[must_use]
    pub fn find_class(&self, name: &str) -> Option<CpIndex> {
        let utf8 = self.find_utf8(name)?;
        self.lookup.get(&Constant::Class(utf8)).copied()
    }

    /// Intern a `Utf8` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_utf8(&mut self, value: &str) -> Result<CpIndex, ClassError> {
        self.intern(Constant::Utf8(value.to_owned()))
    }

    /// Intern a `Class` entry by internal name
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_class(&mut self, name: &str) -> Result<CpIndex, ClassError> {
        let utf8 = self.intern_utf8(name)?;
        self.intern(Constant::Class(utf8))
    }

    /// Intern a `String` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_string(&mut self, value: &str) -> Result<CpIndex, ClassError> {
        let utf8 = self.intern_utf8(value)?;
        self.intern(Constant::String(utf8))
    }

    /// Intern an `Integer` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_integer(&mut self, value: i32) -> Result<CpIndex, ClassError> {
        self.intern(Constant::Integer(value))
    }

    /// Intern a `Long` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_long(&mut self, value: i64) -> Result<CpIndex, ClassError> {
        self.intern(Constant::Long(value))
    }

    /// Intern a `Double` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_double(&mut self, value: f64) -> Result<CpIndex, ClassError> {
        self.intern(Constant::Double(value.to_bits()))
    }

    /// Intern a `NameAndType` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<CpIndex, ClassError> {
        let name = self.intern_utf8(name)?;
        let descriptor = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
    }

    /// Intern a `Fieldref` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_field_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<CpIndex, ClassError> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::FieldRef { class, name_and_type })
    }

    /// Intern a `Methodref` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<CpIndex, ClassError> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::MethodRef { class, name_and_type })
    }

    /// Intern an `InterfaceMethodref` entry
    ///
    /// # Errors
    /// Returns [`ClassError::PoolOverflow`] when the pool is full.
    pub fn intern_interface_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<CpIndex, ClassError> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::InterfaceMethodRef { class, name_and_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.intern_method_ref("java/lang/Thread", "stop", "()V").unwrap();
        let count = pool.count();
        let b = pool.intern_method_ref("java/lang/Thread", "stop", "()V").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.count(), count);
    }

    #[test]
    fn wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.intern_long(30_000).unwrap();
        let next = pool.intern_utf8("x").unwrap();
        assert_eq!(next.0, long.0 + 2);
        assert!(pool.get(CpIndex(long.0 + 1)).is_err());
    }

    #[test]
    fn member_resolves_all_parts() {
        let mut pool = ConstantPool::new();
        let idx = pool
            .intern_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        let member = pool.member(idx).unwrap();
        assert_eq!(member.owner, "java/lang/System");
        assert_eq!(member.name, "out");
        assert_eq!(member.descriptor, "Ljava/io/PrintStream;");
    }

    #[test]
    fn kind_mismatch_reported() {
        let mut pool = ConstantPool::new();
        let utf8 = pool.intern_utf8("plain").unwrap();
        assert!(matches!(
            pool.class_name(utf8),
            Err(ClassError::PoolKindMismatch { expected: "Class", .. })
        ));
    }

    #[test]
    fn slot_zero_unusable() {
        let pool = ConstantPool::new();
        assert_eq!(pool.get(CpIndex(0)), Err(ClassError::BadPoolIndex(0)));
    }
}
