//! Parsed, unresolved class-file structures.
//!
//! A [`RawClass`] mirrors the binary layout one-to-one. Cross references are
//! kept as constant pool indices; the parser has already checked that each
//! one points at an entry of the right tag.

use crate::access_flags::{ClassAccess, FieldAccess, MethodAccess};
use crate::constant_pool::ConstantPool;
use core_types::VmResult;

/// Lowest supported major version.
pub const MIN_MAJOR_VERSION: u16 = 45;
/// Highest supported major version.
pub const MAX_MAJOR_VERSION: u16 = 65;
/// Required first four bytes of every class file.
pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// One row of a method's exception table. Offsets are byte pcs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// First covered pc (inclusive)
    pub start_pc: u16,
    /// End of the covered range (exclusive)
    pub end_pc: u16,
    /// Handler entry pc
    pub handler_pc: u16,
    /// Class index of the caught type, 0 for catch-all
    pub catch_type: u16,
}

/// A `LineNumberTable` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// First byte pc of the line
    pub start_pc: u16,
    /// Source line
    pub line: u16,
}

/// The `Code` attribute of a concrete method.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    /// Operand stack bound
    pub max_stack: u16,
    /// Local-variable array size
    pub max_locals: u16,
    /// Raw instruction bytes
    pub code: Vec<u8>,
    /// Handlers in priority order
    pub exception_table: Vec<ExceptionTableEntry>,
    /// Nested attributes (line numbers and anything unrecognised)
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    /// Concatenated line-number rows of every `LineNumberTable`.
    pub fn line_numbers(&self) -> Vec<LineNumber> {
        self.attributes
            .iter()
            .filter_map(|a| match &a.body {
                Attribute::LineNumberTable(rows) => Some(rows.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Decoded attribute body.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Method body
    Code(CodeAttribute),
    /// Initial value of a static field
    ConstantValue(u16),
    /// Declared checked exceptions (class indices)
    Exceptions(Vec<u16>),
    /// Source file name (Utf8 index)
    SourceFile(u16),
    /// Byte pc to source line mapping
    LineNumberTable(Vec<LineNumber>),
    /// Any attribute this reader does not interpret
    Unknown(Vec<u8>),
}

/// An attribute with its name index.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    /// Utf8 index of the attribute name
    pub name_index: u16,
    /// Decoded body
    pub body: Attribute,
}

/// A declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Access flags
    pub access: FieldAccess,
    /// Utf8 index of the name
    pub name_index: u16,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Field attributes
    pub attributes: Vec<AttributeInfo>,
}

impl FieldInfo {
    /// Pool index of the `ConstantValue` attribute, if present.
    pub fn constant_value(&self) -> Option<u16> {
        self.attributes.iter().find_map(|a| match a.body {
            Attribute::ConstantValue(index) => Some(index),
            _ => None,
        })
    }

    /// Returns true for static fields.
    pub fn is_static(&self) -> bool {
        self.access.contains(FieldAccess::STATIC)
    }
}

/// A declared method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    /// Access flags
    pub access: MethodAccess,
    /// Utf8 index of the name
    pub name_index: u16,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Method attributes
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    /// The method's `Code` attribute, if it has one.
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match &a.body {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    /// Class indices listed by the `Exceptions` attribute.
    pub fn declared_exceptions(&self) -> &[u16] {
        self.attributes
            .iter()
            .find_map(|a| match &a.body {
                Attribute::Exceptions(list) => Some(list.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

/// A fully parsed class file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawClass {
    /// Minor version
    pub minor_version: u16,
    /// Major version, within the supported range
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access: ClassAccess,
    /// Class index naming this class
    pub this_class: u16,
    /// Class index of the superclass, 0 only for the root class
    pub super_class: u16,
    /// Class indices of direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
    /// Declared methods
    pub methods: Vec<MethodInfo>,
    /// Class attributes
    pub attributes: Vec<AttributeInfo>,
}

impl RawClass {
    /// Binary name of this class.
    pub fn name(&self) -> VmResult<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Binary name of the superclass, `None` for the root class.
    pub fn super_name(&self) -> VmResult<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    /// Binary names of the direct superinterfaces.
    pub fn interface_names(&self) -> VmResult<Vec<&str>> {
        self.interfaces
            .iter()
            .map(|&i| self.constant_pool.class_name(i))
            .collect()
    }

    /// Value of the `SourceFile` attribute.
    pub fn source_file(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a.body {
            Attribute::SourceFile(index) => self.constant_pool.utf8(index).ok(),
            _ => None,
        })
    }

    /// Returns true if this is an interface.
    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccess::INTERFACE)
    }

    /// Finds a declared method by name and descriptor.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| {
            self.constant_pool.utf8(m.name_index).ok() == Some(name)
                && self.constant_pool.utf8(m.descriptor_index).ok() == Some(descriptor)
        })
    }
}
