//! Method invocation: selection, frame entry and the native bridge.

use crate::dispatch::Flow;
use crate::frame::Frame;
use crate::native::NativeEnv;
use crate::thread::VmThread;
use crate::throw::{ExecResult, Throw};
use classfile::{ClassAccess, FieldType};
use class_linker::{RuntimeClass, RuntimeMethod};
use core_types::{ObjectRef, Value, VmError};
use std::sync::Arc;

/// Number of operand-stack values `method` takes, receiver included.
fn arg_count(method: &RuntimeMethod) -> usize {
    method.parsed_descriptor().params.len() + usize::from(!method.is_static())
}

fn receiver(method: &RuntimeMethod, args: &[Value]) -> ExecResult<ObjectRef> {
    match args.first() {
        Some(Value::Reference(r)) => Ok(*r),
        Some(Value::Null) => Err(Throw::null_pointer()),
        _ => Err(Throw::Error(VmError::Verify(format!(
            "missing receiver for {}",
            method
        )))),
    }
}

fn incompatible(message: String) -> Throw {
    Throw::Error(VmError::IncompatibleClassChange(message))
}

impl VmThread {
    /// Runs `method` with `args` to completion on this thread.
    pub(crate) fn invoke(&mut self, method: &Arc<RuntimeMethod>, args: Vec<Value>) -> ExecResult<Option<Value>> {
        if method.is_native() {
            return self.call_native(method, args);
        }
        let base = self.frames.len();
        self.push_frame(method, args)?;
        self.run(base)
    }

    /// Runs `method` for a host entry point. Pins above `mark` are dropped
    /// as soon as an interpreted frame holds `args`.
    pub(crate) fn invoke_entry(
        &mut self,
        method: &Arc<RuntimeMethod>,
        args: Vec<Value>,
        mark: usize,
    ) -> ExecResult<Option<Value>> {
        if method.is_native() {
            return self.call_native(method, args);
        }
        let base = self.frames.len();
        self.push_frame(method, args)?;
        self.unpin_to(mark);
        self.run(base)
    }

    /// Calls the implementation of `name`/`descriptor` selected by the
    /// runtime class of `args[0]`.
    pub(crate) fn invoke_virtual_by_name(
        &mut self,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> ExecResult<Option<Value>> {
        let this = match args.first() {
            Some(Value::Reference(r)) => *r,
            _ => return Err(Throw::null_pointer()),
        };
        let class = self.vm.heap().class_of(this)?;
        let method = class.lookup_virtual(name, descriptor).cloned().ok_or_else(|| {
            Throw::Error(VmError::NoSuchMethod(format!(
                "{}.{}{}",
                class.name(),
                name,
                descriptor
            )))
        })?;
        if method.is_abstract() {
            return Err(Throw::Error(VmError::AbstractMethod(method.to_string())));
        }
        self.invoke(&method, args)
    }

    /// Pushes a frame for interpreted `method`, acquiring its monitor if it
    /// is `synchronized`.
    pub(crate) fn push_frame(&mut self, method: &Arc<RuntimeMethod>, args: Vec<Value>) -> ExecResult<()> {
        if self.frames.len() >= self.vm.config.max_frames {
            return Err(Throw::Error(VmError::StackOverflow));
        }
        let code = match method.code() {
            Some(code) => code.clone(),
            None if method.is_abstract() => {
                return Err(Throw::Error(VmError::AbstractMethod(method.to_string())))
            }
            None => {
                return Err(Throw::Error(VmError::Internal(format!(
                    "{} has no code",
                    method
                ))))
            }
        };
        let class = method
            .class()
            .ok_or_else(|| VmError::Internal(format!("class of {} was unloaded", method)))?;
        let monitor = self.enter_method_monitor(method, &class, &args)?;
        let mut frame = Frame::new(method.clone(), class, code, &args);
        frame.monitor = monitor;
        self.frames.push(frame);
        Ok(())
    }

    /// Acquires the monitor of a `synchronized` method: the receiver, or the
    /// class object for static methods.
    fn enter_method_monitor(
        &mut self,
        method: &RuntimeMethod,
        class: &Arc<RuntimeClass>,
        args: &[Value],
    ) -> ExecResult<Option<ObjectRef>> {
        if !method.is_synchronized() {
            return Ok(None);
        }
        let object = if method.is_static() {
            let mark = self.pinned.len();
            self.pin_values(args);
            let mirror = self.mirror_of(class);
            self.unpin_to(mark);
            mirror?
        } else {
            receiver(method, args)?
        };
        let mark = self.pinned.len();
        self.pin_values(args);
        let entered = self.monitor_enter(object);
        self.unpin_to(mark);
        entered?;
        Ok(Some(object))
    }

    /// Crosses into a native implementation. Reference arguments stay
    /// pinned for the duration of the call.
    pub(crate) fn call_native(&mut self, method: &Arc<RuntimeMethod>, args: Vec<Value>) -> ExecResult<Option<Value>> {
        let native = self
            .vm
            .natives
            .lookup(method.class_name(), method.name(), method.descriptor())
            .ok_or_else(|| VmError::UnsatisfiedLink(method.to_string()))?;
        let class = method
            .class()
            .ok_or_else(|| VmError::Internal(format!("class of {} was unloaded", method)))?;
        let mark = self.pinned.len();
        self.pin_values(&args);
        let monitor = match self.enter_method_monitor(method, &class, &args) {
            Ok(m) => m,
            Err(t) => {
                self.unpin_to(mark);
                return Err(t);
            }
        };
        let result = (*native)(&mut NativeEnv::new(self), &args);
        let released = match monitor {
            Some(m) => self.monitor_exit(m),
            None => Ok(()),
        };
        self.unpin_to(mark);
        let value = result?;
        released?;
        check_native_return(method, value)?;
        Ok(value)
    }

    // ========================================================================
    // Invocation instructions
    // ========================================================================

    /// Enters `method` from the current frame: interpreted methods get a new
    /// frame, natives run to completion and push their result.
    fn enter(&mut self, method: &Arc<RuntimeMethod>, args: Vec<Value>) -> ExecResult<Flow> {
        if method.is_native() {
            let result = self.call_native(method, args)?;
            if let Some(value) = result {
                self.frame()?.push(value)?;
            }
            return Ok(Flow::Next);
        }
        self.push_frame(method, args)?;
        Ok(Flow::Stay)
    }

    pub(crate) fn current_class(&self) -> ExecResult<Arc<RuntimeClass>> {
        match self.frames.last() {
            Some(f) => Ok(f.class.clone()),
            None => Err(Throw::Error(VmError::Internal("no current frame".to_string()))),
        }
    }

    pub(crate) fn invoke_static_at(&mut self, index: u16) -> ExecResult<Flow> {
        let current = self.current_class()?;
        let method = self.vm.registry.resolve_method(&current, index)?;
        if !method.is_static() {
            return Err(incompatible(format!("Expected static method {}", method)));
        }
        if let Some(owner) = method.class() {
            self.ensure_initialized(&owner)?;
        }
        let args = self.frame()?.pop_args(arg_count(&method))?;
        self.enter(&method, args)
    }

    pub(crate) fn invoke_special_at(&mut self, index: u16) -> ExecResult<Flow> {
        let current = self.current_class()?;
        let resolved = self.vm.registry.resolve_method(&current, index)?;
        if resolved.is_static() {
            return Err(incompatible(format!("Expected non-static method {}", resolved)));
        }
        let selected = self.select_special(&current, &resolved);
        let args = self.frame()?.pop_args(arg_count(&resolved))?;
        receiver(&resolved, &args)?;
        if selected.is_abstract() {
            return Err(Throw::Error(VmError::AbstractMethod(selected.to_string())));
        }
        self.enter(&selected, args)
    }

    /// `invokespecial` selection: constructors and private methods run as
    /// resolved; a call to a superclass method of the current class is
    /// looked up again starting from the direct superclass.
    fn select_special(&self, current: &Arc<RuntimeClass>, resolved: &Arc<RuntimeMethod>) -> Arc<RuntimeMethod> {
        if resolved.name() == "<init>" || resolved.is_private() {
            return resolved.clone();
        }
        let owner = match resolved.class() {
            Some(o) => o,
            None => return resolved.clone(),
        };
        let is_super_call = current.access().contains(ClassAccess::SUPER)
            && !owner.is_interface()
            && !Arc::ptr_eq(&owner, current)
            && current.is_subclass_of(&owner);
        if !is_super_call {
            return resolved.clone();
        }
        current
            .superclass()
            .and_then(|s| s.lookup_virtual(resolved.name(), resolved.descriptor()))
            .cloned()
            .unwrap_or_else(|| resolved.clone())
    }

    pub(crate) fn invoke_virtual_at(&mut self, index: u16) -> ExecResult<Flow> {
        let current = self.current_class()?;
        let resolved = self.vm.registry.resolve_method(&current, index)?;
        if resolved.is_static() {
            return Err(incompatible(format!("Expected non-static method {}", resolved)));
        }
        let args = self.frame()?.pop_args(arg_count(&resolved))?;
        let this = receiver(&resolved, &args)?;
        let selected = if resolved.is_private() {
            resolved
        } else {
            let class = self.vm.heap().class_of(this)?;
            select_virtual(&class, &resolved)
                .ok_or_else(|| VmError::AbstractMethod(resolved.to_string()))?
        };
        if selected.is_abstract() {
            return Err(Throw::Error(VmError::AbstractMethod(selected.to_string())));
        }
        self.enter(&selected, args)
    }

    pub(crate) fn invoke_interface_at(&mut self, index: u16) -> ExecResult<Flow> {
        let current = self.current_class()?;
        let resolved = self.vm.registry.resolve_method(&current, index)?;
        if resolved.is_static() {
            return Err(incompatible(format!("Expected non-static method {}", resolved)));
        }
        let args = self.frame()?.pop_args(arg_count(&resolved))?;
        let this = receiver(&resolved, &args)?;
        let selected = if resolved.is_private() {
            resolved
        } else {
            let class = self.vm.heap().class_of(this)?;
            if let Some(iface) = resolved.class() {
                if iface.is_interface() && !class.is_assignable_to(&iface) {
                    return Err(incompatible(format!(
                        "Class {} does not implement the requested interface {}",
                        class.java_name(),
                        iface.java_name()
                    )));
                }
            }
            class
                .lookup_virtual(resolved.name(), resolved.descriptor())
                .cloned()
                .ok_or_else(|| {
                    incompatible(format!(
                        "{} has no implementation of {}",
                        class.java_name(),
                        resolved
                    ))
                })?
        };
        if selected.is_abstract() {
            return Err(Throw::Error(VmError::AbstractMethod(selected.to_string())));
        }
        self.enter(&selected, args)
    }
}

/// The receiver class's vtable entry for `resolved`'s slot, falling back to
/// a signature search when the slot holds a different method (as it can for
/// methods inherited through interfaces).
fn select_virtual(class: &RuntimeClass, resolved: &RuntimeMethod) -> Option<Arc<RuntimeMethod>> {
    if let Some(candidate) = resolved.vtable_slot().and_then(|s| class.vtable().get(s)) {
        if candidate.name() == resolved.name() && candidate.descriptor() == resolved.descriptor() {
            return Some(candidate.clone());
        }
    }
    class
        .lookup_virtual(resolved.name(), resolved.descriptor())
        .cloned()
}

/// A native's result must match the declared return type.
fn check_native_return(method: &RuntimeMethod, value: Option<Value>) -> Result<(), Throw> {
    let ok = match (&method.parsed_descriptor().ret, value) {
        (None, None) => true,
        (Some(FieldType::Long), Some(Value::Long(_))) => true,
        (Some(FieldType::Float), Some(Value::Float(_))) => true,
        (Some(FieldType::Double), Some(Value::Double(_))) => true,
        (Some(t), Some(Value::Null | Value::Reference(_))) => t.is_reference(),
        (
            Some(
                FieldType::Int
                | FieldType::Short
                | FieldType::Char
                | FieldType::Byte
                | FieldType::Boolean,
            ),
            Some(Value::Int(_)),
        ) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Throw::Error(VmError::Linkage(format!(
            "native {} returned {}",
            method,
            value.map_or("nothing", |v| v.type_name())
        ))))
    }
}
