//! Heap object layout.
//!
//! Every arena slot holds a [`HeapObject`]: a small header (class, mark bit,
//! identity hash, monitor, accounted size) followed by either the instance
//! field values or the typed element storage of an array.

use core_types::{ObjectRef, Value};

/// Accounted bytes of every object header.
pub const HEADER_BYTES: usize = 16;

/// Accounted bytes of one instance field slot.
pub const FIELD_BYTES: usize = 8;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// `boolean[]`, stored as bytes
    Boolean,
    /// `byte[]`
    Byte,
    /// `char[]`
    Char,
    /// `short[]`
    Short,
    /// `int[]`
    Int,
    /// `long[]`
    Long,
    /// `float[]`
    Float,
    /// `double[]`
    Double,
    /// Array of references
    Reference,
}

impl ElementKind {
    /// Accounted bytes per element.
    pub fn element_bytes(self) -> usize {
        match self {
            ElementKind::Boolean | ElementKind::Byte => 1,
            ElementKind::Char | ElementKind::Short => 2,
            ElementKind::Int | ElementKind::Float => 4,
            ElementKind::Long | ElementKind::Double | ElementKind::Reference => 8,
        }
    }
}

/// Typed element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// `boolean[]` and `byte[]`
    Byte(Vec<i8>),
    /// `char[]`
    Char(Vec<u16>),
    /// `short[]`
    Short(Vec<i16>),
    /// `int[]`
    Int(Vec<i32>),
    /// `long[]`
    Long(Vec<i64>),
    /// `float[]`
    Float(Vec<f32>),
    /// `double[]`
    Double(Vec<f64>),
    /// Reference array; `None` is null
    Reference(Vec<Option<ObjectRef>>),
}

impl ArrayData {
    /// Zero-initialized storage for `length` elements.
    pub fn new(kind: ElementKind, length: usize) -> Self {
        match kind {
            ElementKind::Boolean | ElementKind::Byte => ArrayData::Byte(vec![0; length]),
            ElementKind::Char => ArrayData::Char(vec![0; length]),
            ElementKind::Short => ArrayData::Short(vec![0; length]),
            ElementKind::Int => ArrayData::Int(vec![0; length]),
            ElementKind::Long => ArrayData::Long(vec![0; length]),
            ElementKind::Float => ArrayData::Float(vec![0.0; length]),
            ElementKind::Double => ArrayData::Double(vec![0.0; length]),
            ElementKind::Reference => ArrayData::Reference(vec![None; length]),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Byte(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Short(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Reference(v) => v.len(),
        }
    }

    /// Returns true for zero-length arrays.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index` as an operand value. Sub-int elements widen to
    /// `Int` (sign-extended, except `char` which zero-extends).
    pub fn load(&self, index: usize) -> Option<Value> {
        Some(match self {
            ArrayData::Byte(v) => Value::Int(*v.get(index)? as i32),
            ArrayData::Char(v) => Value::Int(*v.get(index)? as i32),
            ArrayData::Short(v) => Value::Int(*v.get(index)? as i32),
            ArrayData::Int(v) => Value::Int(*v.get(index)?),
            ArrayData::Long(v) => Value::Long(*v.get(index)?),
            ArrayData::Float(v) => Value::Float(*v.get(index)?),
            ArrayData::Double(v) => Value::Double(*v.get(index)?),
            ArrayData::Reference(v) => Value::from_object(*v.get(index)?),
        })
    }

    /// Stores `value` at `index`, narrowing ints to the element width.
    /// Returns false if the index is out of range or the value has the
    /// wrong type.
    pub fn store(&mut self, index: usize, value: Value) -> bool {
        match (self, value) {
            (ArrayData::Byte(v), Value::Int(i)) => put(v, index, i as i8),
            (ArrayData::Char(v), Value::Int(i)) => put(v, index, i as u16),
            (ArrayData::Short(v), Value::Int(i)) => put(v, index, i as i16),
            (ArrayData::Int(v), Value::Int(i)) => put(v, index, i),
            (ArrayData::Long(v), Value::Long(l)) => put(v, index, l),
            (ArrayData::Float(v), Value::Float(f)) => put(v, index, f),
            (ArrayData::Double(v), Value::Double(d)) => put(v, index, d),
            (ArrayData::Reference(v), Value::Null) => put(v, index, None),
            (ArrayData::Reference(v), Value::Reference(r)) => put(v, index, Some(r)),
            _ => false,
        }
    }

    /// Copy of `len` elements starting at `from`.
    pub fn slice(&self, from: usize, len: usize) -> Option<ArrayData> {
        let end = from.checked_add(len)?;
        Some(match self {
            ArrayData::Byte(v) => ArrayData::Byte(v.get(from..end)?.to_vec()),
            ArrayData::Char(v) => ArrayData::Char(v.get(from..end)?.to_vec()),
            ArrayData::Short(v) => ArrayData::Short(v.get(from..end)?.to_vec()),
            ArrayData::Int(v) => ArrayData::Int(v.get(from..end)?.to_vec()),
            ArrayData::Long(v) => ArrayData::Long(v.get(from..end)?.to_vec()),
            ArrayData::Float(v) => ArrayData::Float(v.get(from..end)?.to_vec()),
            ArrayData::Double(v) => ArrayData::Double(v.get(from..end)?.to_vec()),
            ArrayData::Reference(v) => ArrayData::Reference(v.get(from..end)?.to_vec()),
        })
    }

    /// Overwrites elements starting at `at` with `src`. Returns false if the
    /// storage types differ or the range does not fit.
    pub fn write_slice(&mut self, at: usize, src: &ArrayData) -> bool {
        fn copy<T: Copy>(dst: &mut [T], at: usize, src: &[T]) -> bool {
            match at
                .checked_add(src.len())
                .and_then(|end| dst.get_mut(at..end))
            {
                Some(target) => {
                    target.copy_from_slice(src);
                    true
                }
                None => false,
            }
        }
        match (self, src) {
            (ArrayData::Byte(d), ArrayData::Byte(s)) => copy(d, at, s),
            (ArrayData::Char(d), ArrayData::Char(s)) => copy(d, at, s),
            (ArrayData::Short(d), ArrayData::Short(s)) => copy(d, at, s),
            (ArrayData::Int(d), ArrayData::Int(s)) => copy(d, at, s),
            (ArrayData::Long(d), ArrayData::Long(s)) => copy(d, at, s),
            (ArrayData::Float(d), ArrayData::Float(s)) => copy(d, at, s),
            (ArrayData::Double(d), ArrayData::Double(s)) => copy(d, at, s),
            (ArrayData::Reference(d), ArrayData::Reference(s)) => copy(d, at, s),
            _ => false,
        }
    }

    /// UTF-16 contents of a `char[]`.
    pub fn as_chars(&self) -> Option<&[u16]> {
        match self {
            ArrayData::Char(v) => Some(v),
            _ => None,
        }
    }
}

fn put<T>(slots: &mut [T], index: usize, value: T) -> bool {
    match slots.get_mut(index) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

/// Object payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    /// Instance field values in layout order
    Instance(Vec<Value>),
    /// Array elements
    Array {
        /// Declared element type
        kind: ElementKind,
        /// Storage
        data: ArrayData,
    },
}

impl ObjectBody {
    /// Accounted size including the header.
    pub fn size_bytes(&self) -> usize {
        match self {
            ObjectBody::Instance(fields) => instance_bytes(fields.len()),
            ObjectBody::Array { kind, data } => array_bytes(*kind, data.len()),
        }
    }

    /// Calls `f` with every reference held by the body.
    pub fn for_each_reference(&self, mut f: impl FnMut(ObjectRef)) {
        match self {
            ObjectBody::Instance(fields) => {
                for v in fields {
                    if let Value::Reference(r) = v {
                        f(*r);
                    }
                }
            }
            ObjectBody::Array {
                data: ArrayData::Reference(elements),
                ..
            } => elements.iter().flatten().for_each(|r| f(*r)),
            ObjectBody::Array { .. } => {}
        }
    }
}

/// Accounted size of an instance with `fields` slots.
pub fn instance_bytes(fields: usize) -> usize {
    HEADER_BYTES + fields * FIELD_BYTES
}

/// Accounted size of an array, saturating for absurd lengths.
pub fn array_bytes(kind: ElementKind, length: usize) -> usize {
    length
        .saturating_mul(kind.element_bytes())
        .saturating_add(HEADER_BYTES + 8)
}

/// Owner and recursion count of an object's monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    owner: Option<u64>,
    count: u32,
}

impl MonitorState {
    /// Acquires for `thread` if free or already owned by it.
    pub fn try_enter(&mut self, thread: u64) -> bool {
        match self.owner {
            None => {
                self.owner = Some(thread);
                self.count = 1;
                true
            }
            Some(owner) if owner == thread => {
                self.count += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Releases one level. `None` if `thread` is not the owner, otherwise
    /// whether the monitor became free.
    pub fn exit(&mut self, thread: u64) -> Option<bool> {
        if self.owner != Some(thread) {
            return None;
        }
        self.count -= 1;
        if self.count == 0 {
            self.owner = None;
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Current owner thread id.
    pub fn owner(&self) -> Option<u64> {
        self.owner
    }

    /// Recursion depth of the current owner.
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// An object or array in the arena.
#[derive(Debug, Clone)]
pub struct HeapObject<C> {
    /// Runtime class handle
    pub class: C,
    /// Payload
    pub body: ObjectBody,
    /// Monitor state
    pub monitor: MonitorState,
    pub(crate) marked: bool,
    pub(crate) age: u8,
    pub(crate) hash: i32,
    pub(crate) size: usize,
    pub(crate) block: usize,
}

impl<C> HeapObject<C> {
    /// Identity hash code assigned at allocation.
    pub fn identity_hash(&self) -> i32 {
        self.hash
    }

    /// Number of collections this object has survived, saturating.
    pub fn age(&self) -> u8 {
        self.age
    }

    /// Accounted size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true for arrays.
    pub fn is_array(&self) -> bool {
        matches!(self.body, ObjectBody::Array { .. })
    }

    /// Array storage, for arrays.
    pub fn array(&self) -> Option<&ArrayData> {
        match &self.body {
            ObjectBody::Array { data, .. } => Some(data),
            ObjectBody::Instance(_) => None,
        }
    }

    /// Mutable array storage, for arrays.
    pub fn array_mut(&mut self) -> Option<&mut ArrayData> {
        match &mut self.body {
            ObjectBody::Array { data, .. } => Some(data),
            ObjectBody::Instance(_) => None,
        }
    }

    /// Instance fields, for non-arrays.
    pub fn fields(&self) -> Option<&[Value]> {
        match &self.body {
            ObjectBody::Instance(fields) => Some(fields),
            ObjectBody::Array { .. } => None,
        }
    }

    /// Mutable instance fields, for non-arrays.
    pub fn fields_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.body {
            ObjectBody::Instance(fields) => Some(fields),
            ObjectBody::Array { .. } => None,
        }
    }
}
