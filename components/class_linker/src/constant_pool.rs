//! Runtime constant pool.
//!
//! Wraps the parsed pool of a class with per-entry resolution caches. Each
//! cache slot is written at most once; a slot is only filled after the
//! resolution it records has completed, so no slot is ever locked while the
//! registry loads other classes.

use crate::runtime_class::{RuntimeClass, RuntimeMethod};
use classfile::{ConstantPool, ConstantPoolEntry, FieldType};
use core_types::{ObjectRef, VmError};
use std::sync::{Arc, OnceLock, Weak};

/// A resolved field reference.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    /// Class that declares the field
    pub owner: Arc<RuntimeClass>,
    /// Slot in the instance layout or in the owner's statics
    pub slot: usize,
    /// True for static fields
    pub is_static: bool,
    /// Declared type
    pub field_type: FieldType,
}

#[derive(Debug, Clone)]
pub(crate) struct CachedField {
    owner: Weak<RuntimeClass>,
    slot: usize,
    is_static: bool,
    field_type: FieldType,
}

impl CachedField {
    pub(crate) fn from_resolved(field: &ResolvedField) -> Self {
        Self {
            owner: Arc::downgrade(&field.owner),
            slot: field.slot,
            is_static: field.is_static,
            field_type: field.field_type.clone(),
        }
    }

    fn upgrade(&self) -> Option<ResolvedField> {
        Some(ResolvedField {
            owner: self.owner.upgrade()?,
            slot: self.slot,
            is_static: self.is_static,
            field_type: self.field_type.clone(),
        })
    }
}

type Cache<T> = Vec<OnceLock<Result<T, VmError>>>;

fn cache<T>(len: usize) -> Cache<T> {
    (0..len).map(|_| OnceLock::new()).collect()
}

/// Constant pool with resolution caches.
#[derive(Debug)]
pub struct RuntimeConstantPool {
    raw: ConstantPool,
    classes: Cache<Weak<RuntimeClass>>,
    fields: Cache<CachedField>,
    methods: Cache<Weak<RuntimeMethod>>,
    strings: Vec<OnceLock<ObjectRef>>,
}

impl RuntimeConstantPool {
    /// Wraps a parsed pool.
    pub fn new(raw: ConstantPool) -> Self {
        let len = raw.len();
        Self {
            raw,
            classes: cache(len),
            fields: cache(len),
            methods: cache(len),
            strings: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// The parsed pool.
    pub fn raw(&self) -> &ConstantPool {
        &self.raw
    }

    /// Entry at `index`.
    pub fn entry(&self, index: u16) -> Option<&ConstantPoolEntry> {
        self.raw.get(index).ok()
    }

    pub(crate) fn cached_class(&self, index: u16) -> Option<Result<Arc<RuntimeClass>, VmError>> {
        match self.classes.get(index as usize)?.get()? {
            Ok(weak) => weak.upgrade().map(Ok),
            Err(e) => Some(Err(e.clone())),
        }
    }

    pub(crate) fn cache_class(&self, index: u16, result: &Result<Arc<RuntimeClass>, VmError>) {
        if let Some(slot) = self.classes.get(index as usize) {
            let _ = slot.set(result.as_ref().map(Arc::downgrade).map_err(Clone::clone));
        }
    }

    pub(crate) fn cached_field(&self, index: u16) -> Option<Result<ResolvedField, VmError>> {
        match self.fields.get(index as usize)?.get()? {
            Ok(f) => f.upgrade().map(Ok),
            Err(e) => Some(Err(e.clone())),
        }
    }

    pub(crate) fn cache_field(&self, index: u16, result: &Result<ResolvedField, VmError>) {
        if let Some(slot) = self.fields.get(index as usize) {
            let _ = slot.set(
                result
                    .as_ref()
                    .map(CachedField::from_resolved)
                    .map_err(Clone::clone),
            );
        }
    }

    pub(crate) fn cached_method(&self, index: u16) -> Option<Result<Arc<RuntimeMethod>, VmError>> {
        match self.methods.get(index as usize)?.get()? {
            Ok(weak) => weak.upgrade().map(Ok),
            Err(e) => Some(Err(e.clone())),
        }
    }

    pub(crate) fn cache_method(&self, index: u16, result: &Result<Arc<RuntimeMethod>, VmError>) {
        if let Some(slot) = self.methods.get(index as usize) {
            let _ = slot.set(result.as_ref().map(Arc::downgrade).map_err(Clone::clone));
        }
    }

    /// String object previously created for the `String` entry at `index`.
    pub fn cached_string(&self, index: u16) -> Option<ObjectRef> {
        self.strings.get(index as usize)?.get().copied()
    }

    /// Records the string object for `index`; returns the one that won.
    pub fn cache_string(&self, index: u16, object: ObjectRef) -> ObjectRef {
        match self.strings.get(index as usize) {
            Some(slot) => *slot.get_or_init(|| object),
            None => object,
        }
    }

    /// String objects held by the cache; they are roots until teardown.
    pub fn cached_strings(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.strings.iter().filter_map(|s| s.get().copied())
    }
}
