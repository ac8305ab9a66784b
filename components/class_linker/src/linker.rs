//! Linking: turns a parsed class into a [`RuntimeClass`].
//!
//! Linking loads the superclass and superinterfaces through the registry,
//! checks the hierarchy, verifies every method, lays out instance and static
//! fields, and builds the vtable. Nothing is published until all of that has
//! succeeded.

use crate::bootstrap::OBJECT;
use crate::constant_pool::RuntimeConstantPool;
use crate::registry::ClassRegistry;
use crate::runtime_class::{
    index_insert, index_lookup, ClassKind, ComponentType, InitState, LoaderId, MethodIndex,
    RuntimeClass, RuntimeField, RuntimeMethod,
};
use crate::verify::{prepare_method, PreparedMethod};
use classfile::{ClassAccess, ConstantPoolEntry, FieldType, RawClass};
use core_types::{Value, VmError, VmResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

enum Slot {
    Inherited(Arc<RuntimeMethod>),
    Declared(usize),
}

struct VtablePlan {
    slots: Vec<Slot>,
    index: MethodIndex,
    own_slots: Vec<Option<usize>>,
}

fn plan_vtable(
    class_name: &str,
    superclass: Option<&Arc<RuntimeClass>>,
    interfaces: &[Arc<RuntimeClass>],
    methods: &[PreparedMethod],
    is_interface: bool,
) -> VmResult<VtablePlan> {
    let (mut slots, mut index) = match superclass {
        Some(s) if !is_interface => (
            s.vtable.iter().cloned().map(Slot::Inherited).collect::<Vec<_>>(),
            s.vtable_index.clone(),
        ),
        _ => (Vec::new(), HashMap::new()),
    };
    let mut own_slots = vec![None; methods.len()];

    for (i, m) in methods.iter().enumerate() {
        if !m.is_virtual() {
            continue;
        }
        match index_lookup(&index, &m.name, &m.descriptor) {
            Some(slot) => {
                if let Slot::Inherited(overridden) = &slots[slot] {
                    if overridden.is_final() {
                        return Err(VmError::Linkage(format!(
                            "{}.{}{} overrides final method in {}",
                            class_name,
                            m.name,
                            m.descriptor,
                            overridden.class_name()
                        )));
                    }
                }
                slots[slot] = Slot::Declared(i);
                own_slots[i] = Some(slot);
            }
            None => {
                let slot = slots.len();
                slots.push(Slot::Declared(i));
                index_insert(&mut index, &m.name, &m.descriptor, slot);
                own_slots[i] = Some(slot);
            }
        }
    }

    // Default and abstract interface methods fill the remaining signatures.
    for iface in interfaces {
        for m in &iface.vtable {
            match index_lookup(&index, &m.name, &m.descriptor) {
                None => {
                    let slot = slots.len();
                    slots.push(Slot::Inherited(m.clone()));
                    index_insert(&mut index, &m.name, &m.descriptor, slot);
                }
                Some(slot) => {
                    let replace = match &slots[slot] {
                        Slot::Inherited(existing) => {
                            existing.in_interface && existing.is_abstract() && !m.is_abstract()
                        }
                        Slot::Declared(_) => false,
                    };
                    if replace {
                        slots[slot] = Slot::Inherited(m.clone());
                    }
                }
            }
        }
    }

    Ok(VtablePlan {
        slots,
        index,
        own_slots,
    })
}

fn constant_value(raw: &RawClass, index: u16, field_type: &FieldType, field: &str) -> VmResult<Value> {
    let entry = raw.constant_pool.get(index)?;
    let value = match (entry, field_type) {
        (
            ConstantPoolEntry::Integer(v),
            FieldType::Int | FieldType::Short | FieldType::Char | FieldType::Byte | FieldType::Boolean,
        ) => Value::Int(*v),
        (ConstantPoolEntry::Long(v), FieldType::Long) => Value::Long(*v),
        (ConstantPoolEntry::Float(v), FieldType::Float) => Value::Float(*v),
        (ConstantPoolEntry::Double(v), FieldType::Double) => Value::Double(*v),
        // Strings need the heap; the initializer driver stores them.
        (ConstantPoolEntry::String { .. }, FieldType::Object(name)) if name == "java/lang/String" => {
            Value::Null
        }
        _ => {
            return Err(VmError::ClassFormat(format!(
                "ConstantValue of field {} is {}, which does not match its type {}",
                field,
                entry.tag_name(),
                field_type
            )))
        }
    };
    Ok(value)
}

/// Links `raw`, which was found under `expected_name` by `loader`.
pub(crate) fn link_class(
    registry: &ClassRegistry,
    loader: LoaderId,
    expected_name: &str,
    raw: RawClass,
) -> VmResult<Arc<RuntimeClass>> {
    let name = raw.name()?.to_string();
    if name != expected_name {
        return Err(VmError::ClassNotFound(format!(
            "{} (wrong name: {})",
            expected_name, name
        )));
    }
    let is_interface = raw.is_interface();

    let superclass = match raw.super_name()? {
        Some(super_name) => {
            let sup = registry.load_class(loader, super_name)?;
            if sup.is_interface() {
                return Err(VmError::IncompatibleClassChange(format!(
                    "class {} has interface {} as super class",
                    name, super_name
                )));
            }
            if sup.is_array() {
                return Err(VmError::ClassFormat(format!(
                    "class {} has array class {} as super class",
                    name, super_name
                )));
            }
            if sup.access().contains(ClassAccess::FINAL) {
                return Err(VmError::Verify(format!(
                    "cannot inherit from final class {}",
                    super_name
                )));
            }
            if is_interface && super_name != OBJECT {
                return Err(VmError::ClassFormat(format!(
                    "interface {} must have {} as super class",
                    name, OBJECT
                )));
            }
            Some(sup)
        }
        None if name == OBJECT => None,
        None => {
            return Err(VmError::ClassFormat(format!("class {} has no super class", name)));
        }
    };

    let mut interfaces = Vec::with_capacity(raw.interfaces.len());
    for iface_name in raw.interface_names()? {
        let iface = registry.load_class(loader, iface_name)?;
        if !iface.is_interface() {
            return Err(VmError::IncompatibleClassChange(format!(
                "class {} can not implement {}, because it is not an interface",
                name, iface_name
            )));
        }
        interfaces.push(iface);
    }

    let mut instance_template = superclass
        .as_ref()
        .map(|s| s.instance_template.clone())
        .unwrap_or_default();
    let mut statics = Vec::new();
    let mut fields = Vec::with_capacity(raw.fields.len());
    for f in &raw.fields {
        let field_name = raw.constant_pool.utf8(f.name_index)?;
        let descriptor = raw.constant_pool.utf8(f.descriptor_index)?;
        let field_type = FieldType::parse(descriptor)?;
        let constant = if f.is_static() { f.constant_value() } else { None };
        let slot = if f.is_static() {
            let initial = match constant {
                Some(index) => constant_value(&raw, index, &field_type, field_name)?,
                None => field_type.default_value(),
            };
            statics.push(initial);
            statics.len() - 1
        } else {
            instance_template.push(field_type.default_value());
            instance_template.len() - 1
        };
        fields.push(RuntimeField {
            name: Arc::from(field_name),
            descriptor: Arc::from(descriptor),
            field_type,
            access: f.access,
            slot,
            constant_value: constant,
        });
    }

    let prepared = raw
        .methods
        .iter()
        .map(|m| prepare_method(&raw.constant_pool, &name, is_interface, m))
        .collect::<VmResult<Vec<_>>>()?;

    let plan = plan_vtable(&name, superclass.as_ref(), &interfaces, &prepared, is_interface)?;

    let name: Arc<str> = Arc::from(name.as_str());
    let source_file = raw.source_file().map(Arc::from);
    let mut access = raw.access;
    if is_interface {
        access |= ClassAccess::ABSTRACT;
    }
    let kind = if is_interface {
        ClassKind::Interface
    } else {
        ClassKind::Class
    };
    let constant_pool = RuntimeConstantPool::new(raw.constant_pool);

    let class = Arc::new_cyclic(|weak| {
        let methods: Vec<Arc<RuntimeMethod>> = prepared
            .into_iter()
            .zip(plan.own_slots.iter())
            .map(|(m, slot)| {
                Arc::new(RuntimeMethod {
                    owner: weak.clone(),
                    class_name: name.clone(),
                    name: m.name,
                    descriptor: m.descriptor,
                    parsed: m.parsed,
                    access: m.access,
                    code: m.code,
                    vtable_slot: *slot,
                    in_interface: is_interface,
                })
            })
            .collect();
        let vtable = plan
            .slots
            .into_iter()
            .map(|s| match s {
                Slot::Inherited(m) => m,
                Slot::Declared(i) => methods[i].clone(),
            })
            .collect();
        RuntimeClass {
            name: name.clone(),
            loader,
            access,
            kind,
            superclass,
            interfaces,
            fields,
            instance_template,
            statics: RwLock::new(statics),
            methods,
            vtable,
            vtable_index: plan.index,
            constant_pool,
            source_file,
            mirror: OnceLock::new(),
            init: RuntimeClass::new_init_lock(InitState::Linked),
        }
    });

    log::debug!(
        "linked {} ({} loader, {} vtable slots)",
        class.name(),
        loader,
        class.vtable.len()
    );
    Ok(class)
}

/// Synthesises the array class `name` with the given component.
pub(crate) fn link_array_class(
    name: &str,
    loader: LoaderId,
    component: ComponentType,
    object: Arc<RuntimeClass>,
    cloneable: Arc<RuntimeClass>,
    serializable: Arc<RuntimeClass>,
) -> Arc<RuntimeClass> {
    Arc::new(RuntimeClass {
        name: Arc::from(name),
        loader,
        access: ClassAccess::PUBLIC | ClassAccess::FINAL | ClassAccess::ABSTRACT,
        kind: ClassKind::Array(component),
        vtable: object.vtable.clone(),
        vtable_index: object.vtable_index.clone(),
        superclass: Some(object),
        interfaces: vec![cloneable, serializable],
        fields: Vec::new(),
        instance_template: Vec::new(),
        statics: RwLock::new(Vec::new()),
        methods: Vec::new(),
        constant_pool: RuntimeConstantPool::new(Default::default()),
        source_file: None,
        mirror: OnceLock::new(),
        init: RuntimeClass::new_init_lock(InitState::Initialized),
    })
}
