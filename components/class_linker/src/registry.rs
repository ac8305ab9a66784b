//! Runtime class registry.
//!
//! Maps (loader, binary name) to the linked class. Each key owns a once-cell
//! in a sharded map, so every caller for the same key shares one linking
//! attempt and its outcome, while unrelated classes load in parallel.
//! Failures are recorded and returned to every later caller.

use crate::bootstrap::{self, CLONEABLE, OBJECT, SERIALIZABLE};
use crate::class_path::ClassPath;
use crate::constant_pool::ResolvedField;
use crate::linker::{link_array_class, link_class};
use crate::runtime_class::{ComponentType, LoaderId, RuntimeClass, RuntimeMethod};
use bytecode_system::PrimitiveType;
use classfile::{ClassFileReader, ConstantPoolEntry, FieldType};
use core_types::{ObjectRef, VmError, VmResult};
use dashmap::DashMap;
use std::cell::RefCell;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

type ClassCell = Arc<OnceLock<VmResult<Arc<RuntimeClass>>>>;
type ClassKey = (LoaderId, Arc<str>);

thread_local! {
    static LOADING: RefCell<Vec<(LoaderId, Arc<str>)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a class as being defined by the current thread.
struct LoadingGuard;

impl LoadingGuard {
    fn enter(loader: LoaderId, name: &Arc<str>) -> VmResult<Self> {
        LOADING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|(l, n)| *l == loader && n == name) {
                return Err(VmError::ClassCircularity(name.to_string()));
            }
            stack.push((loader, name.clone()));
            Ok(LoadingGuard)
        })
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        LOADING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Which thread is defining each in-flight class, and which class each
/// blocked thread waits for. A wait that leads back to the waiting thread
/// is a circular superclass chain split across threads.
#[derive(Default)]
struct LoadTracker {
    owners: DashMap<ClassKey, ThreadId>,
    waiting: DashMap<ThreadId, ClassKey>,
}

impl LoadTracker {
    /// Records that the current thread is about to wait for `key`, failing
    /// if its owner is itself waiting, directly or not, on this thread.
    fn wait_for(&self, key: &ClassKey) -> VmResult<WaitGuard<'_>> {
        let me = thread::current().id();
        self.waiting.insert(me, key.clone());
        let guard = WaitGuard { tracker: self, thread: me };
        let mut next = key.clone();
        for _ in 0..=self.waiting.len() {
            let owner = match self.owners.get(&next) {
                Some(owner) => *owner,
                None => break,
            };
            if owner == me {
                return Err(VmError::ClassCircularity(key.1.to_string()));
            }
            next = match self.waiting.get(&owner) {
                Some(waited) => waited.clone(),
                None => break,
            };
        }
        Ok(guard)
    }

    /// Marks the current thread as the one defining `key`.
    fn own(&self, key: &ClassKey) -> OwnerGuard<'_> {
        let me = thread::current().id();
        self.waiting.remove(&me);
        self.owners.insert(key.clone(), me);
        OwnerGuard { tracker: self, key: key.clone() }
    }
}

struct WaitGuard<'a> {
    tracker: &'a LoadTracker,
    thread: ThreadId,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.tracker.waiting.remove(&self.thread);
    }
}

struct OwnerGuard<'a> {
    tracker: &'a LoadTracker,
    key: ClassKey,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.tracker.owners.remove(&self.key);
    }
}

fn primitive_of(field_type: &FieldType) -> Option<PrimitiveType> {
    Some(match field_type {
        FieldType::Boolean => PrimitiveType::Boolean,
        FieldType::Char => PrimitiveType::Char,
        FieldType::Float => PrimitiveType::Float,
        FieldType::Double => PrimitiveType::Double,
        FieldType::Byte => PrimitiveType::Byte,
        FieldType::Short => PrimitiveType::Short,
        FieldType::Int => PrimitiveType::Int,
        FieldType::Long => PrimitiveType::Long,
        FieldType::Object(_) | FieldType::Array(_) => return None,
    })
}

/// Shared table of loaded classes and interned strings.
pub struct ClassRegistry {
    bootstrap: Arc<dyn ClassPath>,
    application: Arc<dyn ClassPath>,
    classes: DashMap<ClassKey, ClassCell>,
    interned: DashMap<Arc<str>, ObjectRef>,
    in_flight: LoadTracker,
}

impl ClassRegistry {
    /// Creates a registry with the built-in bootstrap classes and the given
    /// application class path.
    pub fn new(application: Arc<dyn ClassPath>) -> VmResult<Self> {
        let bootstrap = Arc::new(bootstrap::bootstrap_class_path()?);
        Ok(Self::with_class_paths(bootstrap, application))
    }

    /// Creates a registry with explicit class paths for both namespaces.
    pub fn with_class_paths(bootstrap: Arc<dyn ClassPath>, application: Arc<dyn ClassPath>) -> Self {
        Self {
            bootstrap,
            application,
            classes: DashMap::new(),
            interned: DashMap::new(),
            in_flight: LoadTracker::default(),
        }
    }

    /// Returns the class `name` as seen from `loader`, loading and linking it
    /// on first request. The application namespace delegates to the
    /// bootstrap namespace first.
    pub fn load_class(&self, loader: LoaderId, name: &str) -> VmResult<Arc<RuntimeClass>> {
        if loader != LoaderId::BOOTSTRAP {
            match self.define_in(LoaderId::BOOTSTRAP, name) {
                Err(VmError::ClassNotFound(_)) => {}
                other => return other,
            }
        }
        self.define_in(loader, name)
    }

    /// Returns the class if `loader` has already linked it successfully.
    pub fn find_loaded(&self, loader: LoaderId, name: &str) -> Option<Arc<RuntimeClass>> {
        let cell = self.classes.get(&(loader, Arc::from(name)))?.clone();
        match cell.get() {
            Some(Ok(class)) => Some(class.clone()),
            _ => None,
        }
    }

    /// Every successfully linked class.
    pub fn loaded_classes(&self) -> Vec<Arc<RuntimeClass>> {
        self.classes
            .iter()
            .filter_map(|e| match e.value().get() {
                Some(Ok(class)) => Some(class.clone()),
                _ => None,
            })
            .collect()
    }

    fn define_in(&self, loader: LoaderId, name: &str) -> VmResult<Arc<RuntimeClass>> {
        let key: Arc<str> = Arc::from(name);
        let cell = self
            .classes
            .entry((loader, key.clone()))
            .or_default()
            .clone();
        if let Some(result) = cell.get() {
            return result.clone();
        }
        let _guard = LoadingGuard::enter(loader, &key)?;
        let class_key = (loader, key);
        let _wait = self.in_flight.wait_for(&class_key)?;
        cell.get_or_init(|| {
            let _owner = self.in_flight.own(&class_key);
            let result = self.define_uncached(loader, name);
            if let Err(e) = &result {
                log::trace!("{} loader failed to define {}: {}", loader, name, e);
            }
            result
        })
        .clone()
    }

    fn define_uncached(&self, loader: LoaderId, name: &str) -> VmResult<Arc<RuntimeClass>> {
        if name.starts_with('[') {
            return self.define_array(loader, name);
        }
        let path = if loader == LoaderId::BOOTSTRAP {
            &self.bootstrap
        } else {
            &self.application
        };
        let bytes = path
            .find_class(name)
            .map_err(|e| VmError::ClassNotFound(format!("{} ({})", name, e)))?
            .ok_or_else(|| VmError::ClassNotFound(name.to_string()))?;
        let raw = ClassFileReader::parse(&bytes)?;
        log::trace!("loaded {} ({} bytes) in {} loader", name, bytes.len(), loader);
        link_class(self, loader, name, raw)
    }

    fn define_array(&self, loader: LoaderId, name: &str) -> VmResult<Arc<RuntimeClass>> {
        let element = match FieldType::parse(name) {
            Ok(FieldType::Array(element)) => element,
            _ => return Err(VmError::ClassNotFound(name.to_string())),
        };
        let component = match primitive_of(&element) {
            Some(p) if loader == LoaderId::BOOTSTRAP => ComponentType::Primitive(p),
            Some(_) => return self.load_class(LoaderId::BOOTSTRAP, name),
            None => {
                let component_name = match &*element {
                    FieldType::Object(n) => n.as_str(),
                    _ => &name[1..],
                };
                let component = self.load_class(loader, component_name)?;
                if component.loader() != loader {
                    return self.load_class(component.loader(), name);
                }
                ComponentType::Reference(component)
            }
        };
        let object = self.load_class(LoaderId::BOOTSTRAP, OBJECT)?;
        let cloneable = self.load_class(LoaderId::BOOTSTRAP, CLONEABLE)?;
        let serializable = self.load_class(LoaderId::BOOTSTRAP, SERIALIZABLE)?;
        Ok(link_array_class(name, loader, component, object, cloneable, serializable))
    }

    /// Array class whose elements are instances of `component`.
    pub fn array_class_of(&self, component: &RuntimeClass) -> VmResult<Arc<RuntimeClass>> {
        let name = if component.is_array() {
            format!("[{}", component.name())
        } else {
            format!("[L{};", component.name())
        };
        self.load_class(component.loader(), &name)
    }

    /// Array class of a primitive element type.
    pub fn primitive_array_class(&self, element: PrimitiveType) -> VmResult<Arc<RuntimeClass>> {
        self.load_class(LoaderId::BOOTSTRAP, &format!("[{}", element.descriptor()))
    }

    /// Resolves the `Class` entry `index` of `from`'s constant pool.
    pub fn resolve_class(&self, from: &RuntimeClass, index: u16) -> VmResult<Arc<RuntimeClass>> {
        let pool = from.constant_pool();
        if let Some(cached) = pool.cached_class(index) {
            return cached;
        }
        let result = pool
            .raw()
            .class_name(index)
            .and_then(|name| self.load_class(from.loader(), name));
        pool.cache_class(index, &result);
        result
    }

    /// Resolves the `Fieldref` entry `index` of `from`'s constant pool.
    pub fn resolve_field(&self, from: &RuntimeClass, index: u16) -> VmResult<ResolvedField> {
        let pool = from.constant_pool();
        if let Some(cached) = pool.cached_field(index) {
            return cached;
        }
        let result = (|| -> VmResult<ResolvedField> {
            let member = pool.raw().member_ref(index)?;
            let class = self.load_class(from.loader(), member.class_name)?;
            find_field(&class, member.name, member.descriptor).ok_or_else(|| {
                VmError::NoSuchField(format!(
                    "{}.{}:{}",
                    member.class_name, member.name, member.descriptor
                ))
            })
        })();
        pool.cache_field(index, &result);
        result
    }

    /// Resolves the `Methodref` or `InterfaceMethodref` entry `index` of
    /// `from`'s constant pool.
    pub fn resolve_method(&self, from: &RuntimeClass, index: u16) -> VmResult<Arc<RuntimeMethod>> {
        let pool = from.constant_pool();
        if let Some(cached) = pool.cached_method(index) {
            return cached;
        }
        let result = (|| -> VmResult<Arc<RuntimeMethod>> {
            let interface_ref = matches!(
                pool.raw().get(index)?,
                ConstantPoolEntry::InterfaceMethodRef { .. }
            );
            let member = pool.raw().member_ref(index)?;
            let class = self.load_class(from.loader(), member.class_name)?;
            let found = if interface_ref {
                if !class.is_interface() {
                    return Err(VmError::IncompatibleClassChange(format!(
                        "found class {}, but interface was expected",
                        class.name()
                    )));
                }
                self.find_interface_method(&class, member.name, member.descriptor)?
            } else {
                if class.is_interface() {
                    return Err(VmError::IncompatibleClassChange(format!(
                        "found interface {}, but class was expected",
                        class.name()
                    )));
                }
                find_class_method(&class, member.name, member.descriptor)
            };
            found.ok_or_else(|| {
                VmError::NoSuchMethod(format!(
                    "{}.{}{}",
                    member.class_name, member.name, member.descriptor
                ))
            })
        })();
        pool.cache_method(index, &result);
        result
    }

    fn find_interface_method(
        &self,
        iface: &Arc<RuntimeClass>,
        name: &str,
        descriptor: &str,
    ) -> VmResult<Option<Arc<RuntimeMethod>>> {
        if let Some(m) = iface.find_declared_method(name, descriptor) {
            return Ok(Some(m.clone()));
        }
        let object = self.load_class(LoaderId::BOOTSTRAP, OBJECT)?;
        if let Some(m) = object.find_declared_method(name, descriptor) {
            if !m.is_static() && !m.is_private() {
                return Ok(Some(m.clone()));
            }
        }
        Ok(find_in_superinterfaces(iface, name, descriptor))
    }

    /// Returns the interned string object for `value`, creating it with
    /// `create` on first use. `create` runs without any registry lock held.
    pub fn intern(
        &self,
        value: &str,
        create: impl FnOnce() -> VmResult<ObjectRef>,
    ) -> VmResult<ObjectRef> {
        if let Some(existing) = self.interned.get(value) {
            return Ok(*existing);
        }
        let object = create()?;
        Ok(*self.interned.entry(Arc::from(value)).or_insert(object))
    }

    /// Previously interned string object for `value`.
    pub fn interned(&self, value: &str) -> Option<ObjectRef> {
        self.interned.get(value).map(|r| *r)
    }

    /// Number of interned strings.
    pub fn interned_count(&self) -> usize {
        self.interned.len()
    }

    /// Calls `f` with every object the registry keeps alive: statics, class
    /// mirrors, pool string constants and interned strings.
    pub fn for_each_root(&self, mut f: impl FnMut(ObjectRef)) {
        for entry in self.classes.iter() {
            if let Some(Ok(class)) = entry.value().get() {
                class.for_each_root(&mut f);
                class.constant_pool().cached_strings().for_each(&mut f);
            }
        }
        for entry in self.interned.iter() {
            f(*entry.value());
        }
    }

    /// Drops every class and interned string.
    pub fn teardown(&self) {
        let classes = self.classes.len();
        self.classes.clear();
        self.interned.clear();
        log::debug!("registry torn down ({} entries)", classes);
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.classes.len())
            .field("interned", &self.interned.len())
            .finish()
    }
}

/// Field lookup: declared fields, then superinterfaces, then the superclass.
pub fn find_field(class: &Arc<RuntimeClass>, name: &str, descriptor: &str) -> Option<ResolvedField> {
    if let Some(f) = class.find_declared_field(name, descriptor) {
        return Some(ResolvedField {
            owner: class.clone(),
            slot: f.slot,
            is_static: f.is_static(),
            field_type: f.field_type.clone(),
        });
    }
    for iface in class.interfaces() {
        if let Some(found) = find_field(iface, name, descriptor) {
            return Some(found);
        }
    }
    class
        .superclass()
        .and_then(|s| find_field(s, name, descriptor))
}

/// Method lookup for a class reference: the class and its superclasses,
/// then its superinterfaces.
pub fn find_class_method(class: &Arc<RuntimeClass>, name: &str, descriptor: &str) -> Option<Arc<RuntimeMethod>> {
    let mut current = Some(class);
    while let Some(c) = current {
        if let Some(m) = c.find_declared_method(name, descriptor) {
            return Some(m.clone());
        }
        current = c.superclass();
    }
    find_in_superinterfaces(class, name, descriptor)
}

/// Searches every superinterface of `class`, preferring a default method
/// over an abstract declaration.
fn find_in_superinterfaces(class: &Arc<RuntimeClass>, name: &str, descriptor: &str) -> Option<Arc<RuntimeMethod>> {
    fn collect(c: &Arc<RuntimeClass>, out: &mut Vec<Arc<RuntimeClass>>) {
        for iface in c.interfaces() {
            if !out.iter().any(|seen| Arc::ptr_eq(seen, iface)) {
                out.push(iface.clone());
                collect(iface, out);
            }
        }
        if let Some(s) = c.superclass() {
            collect(s, out);
        }
    }
    let mut all = Vec::new();
    collect(class, &mut all);
    let candidates: Vec<Arc<RuntimeMethod>> = all
        .iter()
        .filter_map(|i| i.find_declared_method(name, descriptor))
        .filter(|m| !m.is_static() && !m.is_private())
        .cloned()
        .collect();
    candidates
        .iter()
        .find(|m| !m.is_abstract())
        .or_else(|| candidates.first())
        .cloned()
}
