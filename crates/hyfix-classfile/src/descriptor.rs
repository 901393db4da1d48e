//! Field and method descriptors

use crate::error::ClassError;
use crate::frame::VType;
use std::fmt::{self, Display, Formatter};

/// A parsed field type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal class name, e.g. `java/lang/String`
    Object(String),
    /// Full array descriptor, e.g. `[Ljava/lang/String;`
    Array(String),
}

impl FieldType {
    /// Parse a complete field descriptor
    ///
    /// # Errors
    /// Returns [`ClassError::BadDescriptor`] on malformed input or trailing
    /// characters.
    pub fn parse(descriptor: &str) -> Result<Self, ClassError> {
        match Self::parse_prefix(descriptor)? {
            (ty, "") => Ok(ty),
            _ => Err(ClassError::BadDescriptor(descriptor.to_owned())),
        }
    }

    /// Parse one field type from the front of `s`, returning the rest
    ///
    /// # Errors
    /// Returns [`ClassError::BadDescriptor`] on malformed input.
    pub fn parse_prefix(s: &str) -> Result<(Self, &str), ClassError> {
        let bad = || ClassError::BadDescriptor(s.to_owned());
        let first = s.chars().next().ok_or_else(bad)?;
        let rest = &s[first.len_utf8()..];
        let ty = match first {
            'B' => Self::Byte,
            'C' => Self::Char,
            'D' => Self::Double,
            'F' => Self::Float,
            'I' => Self::Int,
            'J' => Self::Long,
            'S' => Self::Short,
            'Z' => Self::Boolean,
            'L' => {
                let end = rest.find(';').ok_or_else(bad)?;
                if end == 0 {
                    return Err(bad());
                }
                return Ok((Self::Object(rest[..end].to_owned()), &rest[end + 1..]));
            }
            '[' => {
                let dims = s.bytes().take_while(|&b| b == b'[').count();
                if dims > 255 {
                    return Err(bad());
                }
                let (_, after) = Self::parse_prefix(&s[dims..])?;
                let len = s.len() - after.len();
                return Ok((Self::Array(s[..len].to_owned()), after));
            }
            _ => return Err(bad()),
        };
        Ok((ty, rest))
    }

    /// Number of local/stack slots a value of this type occupies
    #[inline]
    #[must_use]
    pub fn slots(&self) -> u16 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    /// Verification type of a value of this type
    #[must_use]
    pub fn to_vtype(&self) -> VType {
        match self {
            Self::Byte | Self::Char | Self::Int | Self::Short | Self::Boolean => VType::Integer,
            Self::Float => VType::Float,
            Self::Long => VType::Long,
            Self::Double => VType::Double,
            Self::Object(name) => VType::Object(name.clone()),
            Self::Array(descriptor) => VType::Object(descriptor.clone()),
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => f.write_str("B"),
            Self::Char => f.write_str("C"),
            Self::Double => f.write_str("D"),
            Self::Float => f.write_str("F"),
            Self::Int => f.write_str("I"),
            Self::Long => f.write_str("J"),
            Self::Short => f.write_str("S"),
            Self::Boolean => f.write_str("Z"),
            Self::Object(name) => write!(f, "L{name};"),
            Self::Array(descriptor) => f.write_str(descriptor),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `void`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parse a method descriptor such as `(ILjava/lang/String;)V`
    ///
    /// # Errors
    /// Returns [`ClassError::BadDescriptor`] on malformed input.
    pub fn parse(descriptor: &str) -> Result<Self, ClassError> {
        let bad = || ClassError::BadDescriptor(descriptor.to_owned());
        let mut rest = descriptor.strip_prefix('(').ok_or_else(bad)?;
        let mut params = Vec::new();
        while !rest.starts_with(')') {
            let (ty, after) = FieldType::parse_prefix(rest).map_err(|_| bad())?;
            params.push(ty);
            rest = after;
        }
        let rest = &rest[1..];
        let ret = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest).map_err(|_| bad())?)
        };
        Ok(Self { params, ret })
    }

    /// Slots taken by the parameters (receiver excluded)
    #[must_use]
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }

    /// Slots pushed by the return value
    #[must_use]
    pub fn return_slots(&self) -> u16 {
        self.ret.as_ref().map_or(0, FieldType::slots)
    }
}

impl Display for MethodDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ret) => write!(f, "{ret}"),
            None => f.write_str("V"),
        }
    }
}
