//! Constant pool entries and typed accessors.
//!
//! The pool is indexed from 1; slot 0 and the slot following every `Long` or
//! `Double` hold [`ConstantPoolEntry::Unusable`]. Accessors check both bounds
//! and tags, turning any bad index into a `ClassFormatError`.

use core_types::{VmError, VmResult};

/// Constant pool tag values as they appear in the binary format.
pub mod tags {
    /// CONSTANT_Utf8
    pub const UTF8: u8 = 1;
    /// CONSTANT_Integer
    pub const INTEGER: u8 = 3;
    /// CONSTANT_Float
    pub const FLOAT: u8 = 4;
    /// CONSTANT_Long
    pub const LONG: u8 = 5;
    /// CONSTANT_Double
    pub const DOUBLE: u8 = 6;
    /// CONSTANT_Class
    pub const CLASS: u8 = 7;
    /// CONSTANT_String
    pub const STRING: u8 = 8;
    /// CONSTANT_Fieldref
    pub const FIELDREF: u8 = 9;
    /// CONSTANT_Methodref
    pub const METHODREF: u8 = 10;
    /// CONSTANT_InterfaceMethodref
    pub const INTERFACE_METHODREF: u8 = 11;
    /// CONSTANT_NameAndType
    pub const NAME_AND_TYPE: u8 = 12;
    /// CONSTANT_MethodHandle
    pub const METHOD_HANDLE: u8 = 15;
    /// CONSTANT_MethodType
    pub const METHOD_TYPE: u8 = 16;
    /// CONSTANT_InvokeDynamic
    pub const INVOKE_DYNAMIC: u8 = 18;
}

/// A single constant pool entry, with cross references kept as raw indices.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolEntry {
    /// Slot 0, or the second slot of a `Long`/`Double`
    Unusable,
    /// Decoded modified-UTF-8 string
    Utf8(String),
    /// 32-bit integer literal
    Integer(i32),
    /// 32-bit float literal
    Float(f32),
    /// 64-bit integer literal
    Long(i64),
    /// 64-bit float literal
    Double(f64),
    /// Class or interface reference
    Class {
        /// Utf8 binary name
        name_index: u16,
    },
    /// String literal
    String {
        /// Utf8 contents
        string_index: u16,
    },
    /// Field reference
    FieldRef {
        /// Owning class
        class_index: u16,
        /// Name and descriptor
        name_and_type_index: u16,
    },
    /// Class method reference
    MethodRef {
        /// Owning class
        class_index: u16,
        /// Name and descriptor
        name_and_type_index: u16,
    },
    /// Interface method reference
    InterfaceMethodRef {
        /// Owning interface
        class_index: u16,
        /// Name and descriptor
        name_and_type_index: u16,
    },
    /// Member name and descriptor pair
    NameAndType {
        /// Utf8 member name
        name_index: u16,
        /// Utf8 descriptor
        descriptor_index: u16,
    },
    /// Method handle constant
    MethodHandle {
        /// Reference kind, 1..=9
        reference_kind: u8,
        /// Referenced member
        reference_index: u16,
    },
    /// Method type constant
    MethodType {
        /// Utf8 method descriptor
        descriptor_index: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into the BootstrapMethods attribute
        bootstrap_method_attr_index: u16,
        /// Name and descriptor
        name_and_type_index: u16,
    },
}

impl ConstantPoolEntry {
    /// Binary tag of this entry, or 0 for unusable slots.
    pub fn tag(&self) -> u8 {
        match self {
            ConstantPoolEntry::Unusable => 0,
            ConstantPoolEntry::Utf8(_) => tags::UTF8,
            ConstantPoolEntry::Integer(_) => tags::INTEGER,
            ConstantPoolEntry::Float(_) => tags::FLOAT,
            ConstantPoolEntry::Long(_) => tags::LONG,
            ConstantPoolEntry::Double(_) => tags::DOUBLE,
            ConstantPoolEntry::Class { .. } => tags::CLASS,
            ConstantPoolEntry::String { .. } => tags::STRING,
            ConstantPoolEntry::FieldRef { .. } => tags::FIELDREF,
            ConstantPoolEntry::MethodRef { .. } => tags::METHODREF,
            ConstantPoolEntry::InterfaceMethodRef { .. } => tags::INTERFACE_METHODREF,
            ConstantPoolEntry::NameAndType { .. } => tags::NAME_AND_TYPE,
            ConstantPoolEntry::MethodHandle { .. } => tags::METHOD_HANDLE,
            ConstantPoolEntry::MethodType { .. } => tags::METHOD_TYPE,
            ConstantPoolEntry::InvokeDynamic { .. } => tags::INVOKE_DYNAMIC,
        }
    }

    /// Human-readable tag name for diagnostics.
    pub fn tag_name(&self) -> &'static str {
        match self {
            ConstantPoolEntry::Unusable => "unusable",
            ConstantPoolEntry::Utf8(_) => "Utf8",
            ConstantPoolEntry::Integer(_) => "Integer",
            ConstantPoolEntry::Float(_) => "Float",
            ConstantPoolEntry::Long(_) => "Long",
            ConstantPoolEntry::Double(_) => "Double",
            ConstantPoolEntry::Class { .. } => "Class",
            ConstantPoolEntry::String { .. } => "String",
            ConstantPoolEntry::FieldRef { .. } => "Fieldref",
            ConstantPoolEntry::MethodRef { .. } => "Methodref",
            ConstantPoolEntry::InterfaceMethodRef { .. } => "InterfaceMethodref",
            ConstantPoolEntry::NameAndType { .. } => "NameAndType",
            ConstantPoolEntry::MethodHandle { .. } => "MethodHandle",
            ConstantPoolEntry::MethodType { .. } => "MethodType",
            ConstantPoolEntry::InvokeDynamic { .. } => "InvokeDynamic",
        }
    }

    /// Returns true for entries `ldc`/`ConstantValue` may load.
    pub fn is_loadable(&self) -> bool {
        matches!(
            self,
            ConstantPoolEntry::Integer(_)
                | ConstantPoolEntry::Float(_)
                | ConstantPoolEntry::Long(_)
                | ConstantPoolEntry::Double(_)
                | ConstantPoolEntry::Class { .. }
                | ConstantPoolEntry::String { .. }
                | ConstantPoolEntry::MethodHandle { .. }
                | ConstantPoolEntry::MethodType { .. }
        )
    }
}

/// A member reference with its owner, name and descriptor looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Binary name of the owning class
    pub class_name: &'a str,
    /// Member name
    pub name: &'a str,
    /// Field or method descriptor
    pub descriptor: &'a str,
}

/// The ordered constant pool of a class file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstantPool {
    entries: Vec<ConstantPoolEntry>,
}

impl ConstantPool {
    /// Wraps already-decoded entries (slot 0 included).
    pub fn from_entries(entries: Vec<ConstantPoolEntry>) -> Self {
        Self { entries }
    }

    /// Number of slots, equal to the declared `constant_pool_count`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the pool has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(index, entry)` pairs, skipping unusable slots.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &ConstantPoolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !matches!(e, ConstantPoolEntry::Unusable))
            .map(|(i, e)| (i as u16, e))
    }

    /// Returns the entry at `index`, failing for out-of-range or unusable slots.
    pub fn get(&self, index: u16) -> VmResult<&ConstantPoolEntry> {
        match self.entries.get(index as usize) {
            Some(ConstantPoolEntry::Unusable) | None => Err(VmError::ClassFormat(format!(
                "invalid constant pool index {} (pool size {})",
                index,
                self.entries.len()
            ))),
            Some(entry) => Ok(entry),
        }
    }

    /// Fails unless the entry at `index` carries `tag`.
    pub fn expect_tag(&self, index: u16, tag: u8, context: &str) -> VmResult<&ConstantPoolEntry> {
        let entry = self.get(index)?;
        if entry.tag() != tag {
            return Err(VmError::ClassFormat(format!(
                "{}: constant pool index {} is {}, expected tag {}",
                context,
                index,
                entry.tag_name(),
                tag
            )));
        }
        Ok(entry)
    }

    /// Returns the string of a Utf8 entry.
    pub fn utf8(&self, index: u16) -> VmResult<&str> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(s) => Ok(s),
            other => Err(wrong_tag(index, other, "Utf8")),
        }
    }

    /// Returns the binary name of a Class entry.
    pub fn class_name(&self, index: u16) -> VmResult<&str> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8(*name_index),
            other => Err(wrong_tag(index, other, "Class")),
        }
    }

    /// Returns the `(name, descriptor)` of a NameAndType entry.
    pub fn name_and_type(&self, index: u16) -> VmResult<(&str, &str)> {
        match self.get(index)? {
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            other => Err(wrong_tag(index, other, "NameAndType")),
        }
    }

    /// Looks up a Fieldref, Methodref or InterfaceMethodref entry.
    pub fn member_ref(&self, index: u16) -> VmResult<MemberRef<'_>> {
        let (class_index, nat_index) = match self.get(index)? {
            ConstantPoolEntry::FieldRef {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::MethodRef {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            other => return Err(wrong_tag(index, other, "member reference")),
        };
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok(MemberRef {
            class_name: self.class_name(class_index)?,
            name,
            descriptor,
        })
    }
}

fn wrong_tag(index: u16, entry: &ConstantPoolEntry, expected: &str) -> VmError {
    VmError::ClassFormat(format!(
        "constant pool index {} is {}, expected {}",
        index,
        entry.tag_name(),
        expected
    ))
}

/// Decodes the modified UTF-8 encoding used by Utf8 entries.
///
/// Differences from standard UTF-8: NUL is encoded as `C0 80`, and
/// supplementary characters are encoded as two 3-byte surrogate halves.
/// Bytes `00` and `F0..FF` never appear.
///
/// # Examples
///
/// ```
/// use classfile::decode_modified_utf8;
///
/// assert_eq!(decode_modified_utf8(b"Main").unwrap(), "Main");
/// assert_eq!(decode_modified_utf8(&[0xC0, 0x80]).unwrap(), "\0");
/// assert!(decode_modified_utf8(&[0x00]).is_err());
/// ```
pub fn decode_modified_utf8(bytes: &[u8]) -> VmResult<String> {
    let bad = |at: usize| VmError::ClassFormat(format!("malformed modified UTF-8 at byte {}", at));
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            0x01..=0x7F => {
                units.push(b as u16);
                i += 1;
            }
            0xC0..=0xDF => {
                let b2 = *bytes.get(i + 1).ok_or_else(|| bad(i))?;
                if b2 & 0xC0 != 0x80 {
                    return Err(bad(i));
                }
                units.push((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16);
                i += 2;
            }
            0xE0..=0xEF => {
                let b2 = *bytes.get(i + 1).ok_or_else(|| bad(i))?;
                let b3 = *bytes.get(i + 2).ok_or_else(|| bad(i))?;
                if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                    return Err(bad(i));
                }
                units.push(
                    (((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16,
                );
                i += 3;
            }
            _ => return Err(bad(i)),
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

/// Encodes a string in modified UTF-8.
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
