//! `java/lang/String` objects.
//!
//! A string is an instance whose single field `value` holds a `char[]` of
//! UTF-16 code units.

use crate::thread::VmThread;
use bytecode_system::PrimitiveType;
use class_linker::bootstrap::{CLASS, STRING};
use class_linker::RuntimeClass;
use classfile::ConstantPoolEntry;
use core_types::{ObjectRef, Value, VmError, VmResult};
use memory_manager::{Allocation, ArrayData, ElementKind, Heap, ObjectBody};
use std::sync::Arc;

/// Slot of `String.value` in the instance layout.
pub(crate) const VALUE_SLOT: usize = 0;

/// Reads the contents of string object `string`.
pub(crate) fn read_string(heap: &Heap<Arc<RuntimeClass>>, string: ObjectRef) -> VmResult<String> {
    Ok(String::from_utf16_lossy(&read_chars(heap, string)?))
}

/// UTF-16 code units of string object `string`.
pub(crate) fn read_chars(heap: &Heap<Arc<RuntimeClass>>, string: ObjectRef) -> VmResult<Vec<u16>> {
    let class = heap.class_of(string)?;
    if class.name() != STRING {
        return Err(VmError::Internal(format!(
            "{} is a {}, not a string",
            string,
            class.name()
        )));
    }
    match heap.get_field(string, VALUE_SLOT)? {
        Value::Reference(chars) => heap
            .array(chars)?
            .as_chars()
            .map(<[u16]>::to_vec)
            .ok_or_else(|| VmError::Internal(format!("value of {} is not a char[]", string))),
        _ => Ok(Vec::new()),
    }
}

impl VmThread {
    /// Creates a new (not interned) string object.
    pub(crate) fn new_string(&mut self, value: &str) -> VmResult<ObjectRef> {
        let chars: Vec<u16> = value.encode_utf16().collect();
        self.new_string_from_chars(chars)
    }

    pub(crate) fn new_string_from_chars(&mut self, chars: Vec<u16>) -> VmResult<ObjectRef> {
        let char_array = self.vm.registry.primitive_array_class(PrimitiveType::Char)?;
        let string_class = self.bootstrap_class(STRING)?;
        let value = self.allocate(Allocation::Body {
            class: char_array,
            body: ObjectBody::Array {
                kind: ElementKind::Char,
                data: ArrayData::Char(chars),
            },
        })?;
        let mark = self.pinned.len();
        self.pinned.push(value);
        let string = self.new_instance(&string_class);
        self.unpin_to(mark);
        let string = string?;
        self.vm
            .heap()
            .set_field(string, VALUE_SLOT, Value::Reference(value))?;
        Ok(string)
    }

    /// The canonical string object for `value`.
    pub(crate) fn intern(&mut self, value: &str) -> VmResult<ObjectRef> {
        let vm = self.vm.clone();
        vm.registry.intern(value, || self.new_string(value))
    }

    /// The string object for the `String` pool entry `index` of `class`,
    /// interned and cached in the pool.
    pub(crate) fn string_constant(&mut self, class: &Arc<RuntimeClass>, index: u16) -> VmResult<ObjectRef> {
        let pool = class.constant_pool();
        if let Some(cached) = pool.cached_string(index) {
            return Ok(cached);
        }
        let value = match pool.raw().get(index)? {
            ConstantPoolEntry::String { string_index } => pool.raw().utf8(*string_index)?.to_string(),
            other => {
                return Err(VmError::ClassFormat(format!(
                    "constant pool index {} of {} is {}, expected String",
                    index,
                    class.name(),
                    other.tag_name()
                )))
            }
        };
        let string = self.intern(&value)?;
        Ok(pool.cache_string(index, string))
    }

    /// The `java/lang/Class` object of `class`, created on first use.
    pub(crate) fn mirror_of(&mut self, class: &Arc<RuntimeClass>) -> VmResult<ObjectRef> {
        if let Some(mirror) = class.mirror() {
            return Ok(mirror);
        }
        let class_class = self.bootstrap_class(CLASS)?;
        let name_slot = self.bootstrap_field(CLASS, "name", "Ljava/lang/String;")?;
        // Interned strings are registry roots, so the name survives the
        // allocation below.
        let name = self.intern(&class.java_name())?;
        let mirror = self.new_instance(&class_class)?;
        self.vm
            .heap()
            .set_field(mirror, name_slot, Value::Reference(name))?;
        Ok(class.set_mirror(mirror))
    }

    /// A `String[]` holding fresh copies of `values`.
    pub(crate) fn new_string_array(&mut self, values: &[String]) -> VmResult<ObjectRef> {
        let string_class = self.bootstrap_class(STRING)?;
        let array_class = self.vm.registry.array_class_of(&string_class)?;
        let array = self.allocate(Allocation::Array {
            class: array_class,
            kind: ElementKind::Reference,
            length: values.len(),
        })?;
        let mark = self.pinned.len();
        self.pinned.push(array);
        let result = self.fill_string_array(array, values);
        self.unpin_to(mark);
        result.map(|()| array)
    }

    fn fill_string_array(&mut self, array: ObjectRef, values: &[String]) -> VmResult<()> {
        for (i, value) in values.iter().enumerate() {
            let string = self.new_string(value)?;
            self.vm
                .heap()
                .array_mut(array)?
                .store(i, Value::Reference(string));
        }
        Ok(())
    }

    /// Contents of string object `string`.
    pub(crate) fn read_string(&self, string: ObjectRef) -> VmResult<String> {
        read_string(&self.vm.heap(), string)
    }
}

/// `String.hashCode`: `s[0]*31^(n-1) + ... + s[n-1]` with wrapping.
pub fn string_hash(chars: &[u16]) -> i32 {
    chars
        .iter()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(*c as i32))
}

/// Binary class name in source form: `java/lang/String` becomes
/// `java.lang.String`, array names keep their descriptor shape.
pub fn java_name(binary: &str) -> String {
    binary.replace('/', ".")
}
