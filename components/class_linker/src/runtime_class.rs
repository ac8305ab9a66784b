//! Linked, executable class representation.
//!
//! A [`RuntimeClass`] is created once per (loader, name) by the registry and
//! shared through `Arc`. Methods point back at their class through a `Weak`
//! so the vtables of a hierarchy never form reference cycles.

use crate::constant_pool::RuntimeConstantPool;
use bytecode_system::{DecodedCode, PrimitiveType};
use classfile::{ClassAccess, FieldAccess, FieldType, LineNumber, MethodAccess, MethodDescriptor};
use core_types::{ObjectRef, Value, VmError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

/// Class-loader namespace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u8);

impl LoaderId {
    /// Namespace of the built-in classes.
    pub const BOOTSTRAP: LoaderId = LoaderId(0);
    /// Namespace of classes found on the host class path.
    pub const APPLICATION: LoaderId = LoaderId(1);
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LoaderId::BOOTSTRAP => write!(f, "bootstrap"),
            LoaderId::APPLICATION => write!(f, "application"),
            LoaderId(n) => write!(f, "loader#{}", n),
        }
    }
}

/// Class initialization state. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    /// Loaded but not yet linked
    Unlinked,
    /// Linked; `<clinit>` has not started
    Linked,
    /// `<clinit>` is running on the given thread
    Initializing(ThreadId),
    /// Ready for use
    Initialized,
    /// `<clinit>` failed; every later use fails with this error
    InError(VmError),
}

#[derive(Debug)]
pub(crate) struct InitLock {
    pub(crate) state: Mutex<InitState>,
    pub(crate) cond: Condvar,
}

impl InitLock {
    fn new(state: InitState) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }
}

/// Element type of an array class.
#[derive(Debug, Clone)]
pub enum ComponentType {
    /// `[I`, `[Z`, ...
    Primitive(PrimitiveType),
    /// `[Ljava/lang/String;`, `[[I`, ...
    Reference(Arc<RuntimeClass>),
}

/// What sort of type a runtime class is.
#[derive(Debug, Clone)]
pub enum ClassKind {
    /// Ordinary or abstract class
    Class,
    /// Interface
    Interface,
    /// Array class with its component type
    Array(ComponentType),
}

/// A declared field.
#[derive(Debug, Clone)]
pub struct RuntimeField {
    /// Field name
    pub name: Arc<str>,
    /// Field descriptor
    pub descriptor: Arc<str>,
    /// Parsed descriptor
    pub field_type: FieldType,
    /// Access flags
    pub access: FieldAccess,
    /// Index into the instance layout, or into the class statics
    pub slot: usize,
    /// Pool index of a `ConstantValue`, for static fields
    pub constant_value: Option<u16>,
}

impl RuntimeField {
    /// Returns true for static fields.
    pub fn is_static(&self) -> bool {
        self.access.contains(FieldAccess::STATIC)
    }
}

/// Exception handler with instruction-index bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    /// First covered instruction
    pub start: usize,
    /// First instruction past the covered range
    pub end: usize,
    /// Handler entry instruction
    pub handler: usize,
    /// Class pool index of the caught type, `None` for catch-all
    pub catch_type: Option<u16>,
}

/// Verified, decoded method body.
#[derive(Debug, Clone)]
pub struct MethodCode {
    /// Operand stack bound
    pub max_stack: usize,
    /// Local-variable array size
    pub max_locals: usize,
    /// Decoded instructions
    pub decoded: DecodedCode,
    /// Exception handlers in priority order
    pub handlers: Vec<Handler>,
    pub(crate) line_numbers: Vec<LineNumber>,
}

impl MethodCode {
    /// Source line of the instruction at `index`, if known.
    pub fn line_at(&self, index: usize) -> Option<u16> {
        let pc = self.decoded.pc_of(index)?;
        self.line_numbers
            .iter()
            .filter(|row| row.start_pc <= pc)
            .max_by_key(|row| row.start_pc)
            .map(|row| row.line)
    }
}

/// A declared method.
pub struct RuntimeMethod {
    pub(crate) owner: Weak<RuntimeClass>,
    pub(crate) class_name: Arc<str>,
    pub(crate) name: Arc<str>,
    pub(crate) descriptor: Arc<str>,
    pub(crate) parsed: MethodDescriptor,
    pub(crate) access: MethodAccess,
    pub(crate) code: Option<Arc<MethodCode>>,
    pub(crate) vtable_slot: Option<usize>,
    pub(crate) in_interface: bool,
}

impl RuntimeMethod {
    /// The declaring class, while the registry keeps it alive.
    pub fn class(&self) -> Option<Arc<RuntimeClass>> {
        self.owner.upgrade()
    }

    /// Binary name of the declaring class.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Parsed descriptor.
    pub fn parsed_descriptor(&self) -> &MethodDescriptor {
        &self.parsed
    }

    /// Access flags.
    pub fn access(&self) -> MethodAccess {
        self.access
    }

    /// Decoded body, absent for abstract and native methods.
    pub fn code(&self) -> Option<&Arc<MethodCode>> {
        self.code.as_ref()
    }

    /// Slot in the declaring class's vtable, `None` for static, private and
    /// initializer methods.
    pub fn vtable_slot(&self) -> Option<usize> {
        self.vtable_slot
    }

    /// Returns true if declared by an interface.
    pub fn is_interface_method(&self) -> bool {
        self.in_interface
    }

    /// Local slots taken by the arguments, including `this` for instance methods.
    pub fn arg_slots(&self) -> usize {
        self.parsed.arg_slots() + usize::from(!self.is_static())
    }

    /// `ACC_STATIC`
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    /// `ACC_ABSTRACT`
    pub fn is_abstract(&self) -> bool {
        self.access.contains(MethodAccess::ABSTRACT)
    }

    /// `ACC_NATIVE`
    pub fn is_native(&self) -> bool {
        self.access.contains(MethodAccess::NATIVE)
    }

    /// `ACC_PRIVATE`
    pub fn is_private(&self) -> bool {
        self.access.contains(MethodAccess::PRIVATE)
    }

    /// `ACC_FINAL`
    pub fn is_final(&self) -> bool {
        self.access.contains(MethodAccess::FINAL)
    }

    /// `ACC_SYNCHRONIZED`
    pub fn is_synchronized(&self) -> bool {
        self.access.contains(MethodAccess::SYNCHRONIZED)
    }
}

impl fmt::Debug for RuntimeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeMethod")
            .field("class", &self.class_name)
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("access", &self.access)
            .field("vtable_slot", &self.vtable_slot)
            .finish()
    }
}

impl fmt::Display for RuntimeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

pub(crate) type MethodIndex = HashMap<Arc<str>, Vec<(Arc<str>, usize)>>;

pub(crate) fn index_lookup(index: &MethodIndex, name: &str, descriptor: &str) -> Option<usize> {
    index
        .get(name)?
        .iter()
        .find(|(d, _)| &**d == descriptor)
        .map(|(_, slot)| *slot)
}

pub(crate) fn index_insert(index: &mut MethodIndex, name: &Arc<str>, descriptor: &Arc<str>, slot: usize) {
    index
        .entry(name.clone())
        .or_default()
        .push((descriptor.clone(), slot));
}

/// A linked class, interface or array class.
pub struct RuntimeClass {
    pub(crate) name: Arc<str>,
    pub(crate) loader: LoaderId,
    pub(crate) access: ClassAccess,
    pub(crate) kind: ClassKind,
    pub(crate) superclass: Option<Arc<RuntimeClass>>,
    pub(crate) interfaces: Vec<Arc<RuntimeClass>>,
    pub(crate) fields: Vec<RuntimeField>,
    pub(crate) instance_template: Vec<Value>,
    pub(crate) statics: RwLock<Vec<Value>>,
    pub(crate) methods: Vec<Arc<RuntimeMethod>>,
    pub(crate) vtable: Vec<Arc<RuntimeMethod>>,
    pub(crate) vtable_index: MethodIndex,
    pub(crate) constant_pool: RuntimeConstantPool,
    pub(crate) source_file: Option<Arc<str>>,
    pub(crate) mirror: OnceLock<ObjectRef>,
    pub(crate) init: InitLock,
}

impl RuntimeClass {
    pub(crate) fn new_init_lock(state: InitState) -> InitLock {
        InitLock::new(state)
    }

    /// Binary name (`java/lang/String`, `[I`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared binary name.
    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Dotted name (`java.lang.String`), as reported by `Class.getName`.
    pub fn java_name(&self) -> String {
        self.name.replace('/', ".")
    }

    /// Defining loader namespace.
    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    /// Access flags.
    pub fn access(&self) -> ClassAccess {
        self.access
    }

    /// Class, interface or array.
    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    /// Returns true for interfaces.
    pub fn is_interface(&self) -> bool {
        matches!(self.kind, ClassKind::Interface)
    }

    /// Returns true for array classes.
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array(_))
    }

    /// Returns true if the class may not be instantiated.
    pub fn is_abstract(&self) -> bool {
        self.access.contains(ClassAccess::ABSTRACT) || self.is_interface()
    }

    /// Component type, for array classes.
    pub fn component(&self) -> Option<&ComponentType> {
        match &self.kind {
            ClassKind::Array(c) => Some(c),
            _ => None,
        }
    }

    /// Direct superclass; `None` only for `java/lang/Object`.
    pub fn superclass(&self) -> Option<&Arc<RuntimeClass>> {
        self.superclass.as_ref()
    }

    /// Direct superinterfaces.
    pub fn interfaces(&self) -> &[Arc<RuntimeClass>] {
        &self.interfaces
    }

    /// Declared fields.
    pub fn fields(&self) -> &[RuntimeField] {
        &self.fields
    }

    /// Declared methods.
    pub fn methods(&self) -> &[Arc<RuntimeMethod>] {
        &self.methods
    }

    /// Declared method with the given name and descriptor.
    pub fn find_declared_method(&self, name: &str, descriptor: &str) -> Option<&Arc<RuntimeMethod>> {
        self.methods
            .iter()
            .find(|m| &*m.name == name && &*m.descriptor == descriptor)
    }

    /// Declared field with the given name and descriptor.
    pub fn find_declared_field(&self, name: &str, descriptor: &str) -> Option<&RuntimeField> {
        self.fields
            .iter()
            .find(|f| &*f.name == name && &*f.descriptor == descriptor)
    }

    /// Virtual method table.
    pub fn vtable(&self) -> &[Arc<RuntimeMethod>] {
        &self.vtable
    }

    /// Vtable slot of the method with the given signature.
    pub fn vtable_slot(&self, name: &str, descriptor: &str) -> Option<usize> {
        index_lookup(&self.vtable_index, name, descriptor)
    }

    /// Selects the implementation of a virtual or interface method for an
    /// instance of this class.
    pub fn lookup_virtual(&self, name: &str, descriptor: &str) -> Option<&Arc<RuntimeMethod>> {
        self.vtable_slot(name, descriptor).and_then(|s| self.vtable.get(s))
    }

    /// Vtable slots still occupied by abstract methods.
    pub fn abstract_slots(&self) -> Vec<usize> {
        self.vtable
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_abstract())
            .map(|(i, _)| i)
            .collect()
    }

    /// Initial values of every instance field, inherited slots first.
    pub fn instance_template(&self) -> &[Value] {
        &self.instance_template
    }

    /// Number of instance field slots.
    pub fn instance_field_count(&self) -> usize {
        self.instance_template.len()
    }

    /// Reads a static field slot.
    pub fn get_static(&self, slot: usize) -> Option<Value> {
        self.statics.read().get(slot).copied()
    }

    /// Writes a static field slot.
    pub fn set_static(&self, slot: usize, value: Value) -> bool {
        match self.statics.write().get_mut(slot) {
            Some(s) => {
                *s = value;
                true
            }
            None => false,
        }
    }

    /// Calls `f` with every object referenced from static fields or the
    /// class mirror.
    pub fn for_each_root(&self, mut f: impl FnMut(ObjectRef)) {
        for v in self.statics.read().iter() {
            if let Value::Reference(r) = v {
                f(*r);
            }
        }
        if let Some(m) = self.mirror.get() {
            f(*m);
        }
    }

    /// Runtime constant pool.
    pub fn constant_pool(&self) -> &RuntimeConstantPool {
        &self.constant_pool
    }

    /// `SourceFile` attribute value.
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// The `java/lang/Class` object of this class, once created.
    pub fn mirror(&self) -> Option<ObjectRef> {
        self.mirror.get().copied()
    }

    /// Publishes the class object; returns the winner if one already exists.
    pub fn set_mirror(&self, mirror: ObjectRef) -> ObjectRef {
        *self.mirror.get_or_init(|| mirror)
    }

    /// Current initialization state.
    pub fn init_state(&self) -> InitState {
        self.init.state.lock().clone()
    }

    /// Returns true if `self` is `other` or inherits from it through
    /// superclasses.
    pub fn is_subclass_of(&self, other: &RuntimeClass) -> bool {
        let mut current = Some(self);
        while let Some(c) = current {
            if std::ptr::eq(c, other) {
                return true;
            }
            current = c.superclass.as_deref();
        }
        false
    }

    /// Returns true if `self` is, extends or implements the interface `iface`.
    pub fn implements(&self, iface: &RuntimeClass) -> bool {
        fn walk(c: &RuntimeClass, iface: &RuntimeClass) -> bool {
            std::ptr::eq(c, iface) || c.interfaces.iter().any(|i| walk(i, iface))
        }
        let mut current = Some(self);
        while let Some(c) = current {
            if walk(c, iface) {
                return true;
            }
            current = c.superclass.as_deref();
        }
        false
    }

    /// Assignment compatibility as used by `checkcast`, `instanceof` and
    /// `aastore`: may a value of runtime class `self` be stored in a
    /// variable of type `target`?
    pub fn is_assignable_to(&self, target: &RuntimeClass) -> bool {
        if std::ptr::eq(self, target) {
            return true;
        }
        match (&self.kind, &target.kind) {
            (ClassKind::Array(sc), ClassKind::Array(tc)) => match (sc, tc) {
                (ComponentType::Primitive(a), ComponentType::Primitive(b)) => a == b,
                (ComponentType::Reference(a), ComponentType::Reference(b)) => a.is_assignable_to(b),
                _ => false,
            },
            (_, ClassKind::Array(_)) => false,
            (_, ClassKind::Interface) => self.implements(target),
            _ => self.is_subclass_of(target),
        }
    }
}

impl fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeClass")
            .field("name", &self.name)
            .field("loader", &self.loader)
            .field("kind", &self.kind)
            .field("super", &self.superclass.as_ref().map(|s| s.name.clone()))
            .field("vtable_len", &self.vtable.len())
            .finish()
    }
}

impl fmt::Display for RuntimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
