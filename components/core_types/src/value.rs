//! Operand value representation.
//!
//! Every slot of an operand stack, local-variable array, instance field or
//! static field holds a [`Value`]. Primitive values are stored inline while
//! objects and arrays are referenced by an [`ObjectRef`] handle into the heap
//! arena, so the object graph can be cyclic without any reference counting.

use std::fmt;

/// Handle of a heap-resident object or array.
///
/// Handles are slot indices into the heap arena. A handle stays valid for as
/// long as the object is reachable from a root; after the collector reclaims
/// the object the slot may be reused by a later allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u32);

impl ObjectRef {
    /// Creates a handle for the given arena slot.
    pub fn from_index(index: usize) -> Self {
        ObjectRef(index as u32)
    }

    /// Returns the arena slot this handle points at.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:x}", self.0)
    }
}

/// A single operand-stack or local-variable value.
///
/// `Long` and `Double` are *category 2* values: in the local-variable array
/// they occupy two consecutive indices, the second of which holds
/// [`Value::Top`]. On the operand stack they are one entry that counts as two
/// words for the `pop2`/`dup2` family.
///
/// # Examples
///
/// ```
/// use core_types::{ObjectRef, Value};
///
/// assert_eq!(Value::Int(3).category(), 1);
/// assert_eq!(Value::Double(1.5).category(), 2);
/// assert!(Value::Null.is_reference());
/// assert_eq!(Value::Reference(ObjectRef::from_index(4)).as_object(), Some(ObjectRef::from_index(4)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit two's-complement integer (also boolean, byte, char, short)
    Int(i32),
    /// 64-bit two's-complement integer
    Long(i64),
    /// IEEE 754 binary32
    Float(f32),
    /// IEEE 754 binary64
    Double(f64),
    /// The null reference
    Null,
    /// Reference to a heap object or array
    Reference(ObjectRef),
    /// Return address pushed by `jsr`, as an instruction index
    ReturnAddress(usize),
    /// Unset local slot, or the upper half of a category-2 local
    Top,
}

impl Value {
    /// Returns the number of words this value occupies (1 or 2).
    pub fn category(&self) -> usize {
        if self.is_category2() {
            2
        } else {
            1
        }
    }

    /// Returns true for `Long` and `Double`.
    pub fn is_category2(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// Returns true for `Null` and `Reference`.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Null | Value::Reference(_))
    }

    /// Returns the integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the long payload, if this is a `Long`.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float payload, if this is a `Float`.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the double payload, if this is a `Double`.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the referenced object, or `None` for null and non-references.
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Converts an optional handle into a reference value.
    pub fn from_object(object: Option<ObjectRef>) -> Self {
        match object {
            Some(r) => Value::Reference(r),
            None => Value::Null,
        }
    }

    /// Short type tag used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Null => "null",
            Value::Reference(_) => "reference",
            Value::ReturnAddress(_) => "returnAddress",
            Value::Top => "top",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Top
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{}f", v),
            Value::Double(v) => write!(f, "{}d", v),
            Value::Null => write!(f, "null"),
            Value::Reference(r) => write!(f, "{}", r),
            Value::ReturnAddress(pc) => write!(f, "ret:{}", pc),
            Value::Top => write!(f, "<top>"),
        }
    }
}
