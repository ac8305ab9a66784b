//! Field and method descriptor parsing.
//!
//! Descriptors are the compact type strings of the class-file format:
//! `I`, `[J`, `Ljava/lang/String;` for fields and `(I[J)V` for methods.

use core_types::{Value, VmError, VmResult};
use std::fmt;

/// A parsed field type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `L<binary name>;`
    Object(String),
    /// `[<component>`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parses a complete field descriptor.
    ///
    /// # Examples
    ///
    /// ```
    /// use classfile::FieldType;
    ///
    /// let ty = FieldType::parse("[Ljava/lang/String;").unwrap();
    /// assert_eq!(ty, FieldType::Array(Box::new(FieldType::Object("java/lang/String".into()))));
    /// assert!(FieldType::parse("Q").is_err());
    /// ```
    pub fn parse(descriptor: &str) -> VmResult<FieldType> {
        let bytes = descriptor.as_bytes();
        let (ty, used) = parse_field(bytes, 0, descriptor)?;
        if used != bytes.len() {
            return Err(invalid(descriptor));
        }
        Ok(ty)
    }

    /// Number of local-variable slots a value of this type occupies.
    pub fn slot_size(&self) -> usize {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Returns true for object and array types.
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Zero value a field of this type holds before any assignment.
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Int
            | FieldType::Short
            | FieldType::Boolean => Value::Int(0),
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
            FieldType::Object(_) | FieldType::Array(_) => Value::Null,
        }
    }

    /// Name of the class a value of this type belongs to: the binary name for
    /// objects, the descriptor itself for arrays, `None` for primitives.
    pub fn class_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => write!(f, "B"),
            FieldType::Char => write!(f, "C"),
            FieldType::Double => write!(f, "D"),
            FieldType::Float => write!(f, "F"),
            FieldType::Int => write!(f, "I"),
            FieldType::Long => write!(f, "J"),
            FieldType::Short => write!(f, "S"),
            FieldType::Boolean => write!(f, "Z"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(component) => write!(f, "[{}", component),
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type, `None` for `V`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parses a complete method descriptor.
    ///
    /// # Examples
    ///
    /// ```
    /// use classfile::MethodDescriptor;
    ///
    /// let desc = MethodDescriptor::parse("(IJ[Ljava/lang/Object;)V").unwrap();
    /// assert_eq!(desc.params.len(), 3);
    /// assert_eq!(desc.arg_slots(), 4);
    /// assert!(desc.ret.is_none());
    /// ```
    pub fn parse(descriptor: &str) -> VmResult<MethodDescriptor> {
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(invalid(descriptor));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (ty, next) = parse_field(bytes, pos, descriptor)?;
                    params.push(ty);
                    pos = next;
                }
                None => return Err(invalid(descriptor)),
            }
        }
        let ret = if bytes.get(pos) == Some(&b'V') {
            pos += 1;
            None
        } else {
            let (ty, next) = parse_field(bytes, pos, descriptor)?;
            pos = next;
            Some(ty)
        };
        if pos != bytes.len() {
            return Err(invalid(descriptor));
        }
        Ok(MethodDescriptor { params, ret })
    }

    /// Local-variable slots taken by the arguments, not counting `this`.
    pub fn arg_slots(&self) -> usize {
        self.params.iter().map(FieldType::slot_size).sum()
    }

    /// Operand-stack words the return value pushes (0, 1 or 2).
    pub fn return_slots(&self) -> usize {
        self.ret.as_ref().map_or(0, FieldType::slot_size)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for p in &self.params {
            write!(f, "{}", p)?;
        }
        write!(f, ")")?;
        match &self.ret {
            Some(ty) => write!(f, "{}", ty),
            None => write!(f, "V"),
        }
    }
}

fn invalid(descriptor: &str) -> VmError {
    VmError::ClassFormat(format!("invalid descriptor \"{}\"", descriptor))
}

// Array dimensions are capped at 255 by the format.
const MAX_ARRAY_DIMENSIONS: usize = 255;

fn parse_field(bytes: &[u8], start: usize, descriptor: &str) -> VmResult<(FieldType, usize)> {
    let mut dims = 0;
    let mut pos = start;
    while bytes.get(pos) == Some(&b'[') {
        dims += 1;
        pos += 1;
    }
    if dims > MAX_ARRAY_DIMENSIONS {
        return Err(invalid(descriptor));
    }
    let base = match bytes.get(pos) {
        Some(b'B') => FieldType::Byte,
        Some(b'C') => FieldType::Char,
        Some(b'D') => FieldType::Double,
        Some(b'F') => FieldType::Float,
        Some(b'I') => FieldType::Int,
        Some(b'J') => FieldType::Long,
        Some(b'S') => FieldType::Short,
        Some(b'Z') => FieldType::Boolean,
        Some(b'L') => {
            let rest = &bytes[pos + 1..];
            let end = rest
                .iter()
                .position(|&b| b == b';')
                .ok_or_else(|| invalid(descriptor))?;
            let name = &descriptor[pos + 1..pos + 1 + end];
            if name.is_empty() || name.contains(|c: char| c == '.' || c == '[') {
                return Err(invalid(descriptor));
            }
            pos += end + 1;
            FieldType::Object(name.to_string())
        }
        _ => return Err(invalid(descriptor)),
    };
    pos += 1;
    let mut ty = base;
    for _ in 0..dims {
        ty = FieldType::Array(Box::new(ty));
    }
    Ok((ty, pos))
}
