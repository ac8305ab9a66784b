//! Interpreter threads.
//!
//! A [`VmThread`] is one frame stack executing against a shared [`Vm`]. It is
//! registered with the safe-point coordinator for its whole lifetime, and is
//! the only place that allocates, so every allocation is also a safe point.

use crate::frame::Frame;
use crate::throw::{ExecResult, Throw};
use crate::vm::{Vm, MAIN_DESCRIPTOR};
use class_linker::{
    find_class_method, find_field, initialize, InitDriver, InitState, LoaderId, RuntimeClass,
    RuntimeMethod,
};
use classfile::{ConstantPoolEntry, MethodAccess};
use core_types::{ObjectRef, Value, VmError, VmResult};
use memory_manager::Allocation;
use std::sync::Arc;

/// An interpreter thread attached to a [`Vm`].
pub struct VmThread {
    pub(crate) vm: Arc<Vm>,
    pub(crate) id: u64,
    name: String,
    pub(crate) frames: Vec<Frame>,
    /// Objects held by host code (natives, the unwinder, array builders)
    /// that must survive collections triggered before they are stored.
    pub(crate) pinned: Vec<ObjectRef>,
}

impl VmThread {
    /// Attaches a thread with a fresh id.
    pub fn new(vm: Arc<Vm>, name: &str) -> Self {
        let id = vm.next_thread_id();
        Self::with_id(vm, id, name)
    }

    pub(crate) fn with_id(vm: Arc<Vm>, id: u64, name: &str) -> Self {
        vm.safepoint.register(id);
        log::trace!("thread {} ({}) attached", id, name);
        Self {
            vm,
            id,
            name: name.to_string(),
            frames: Vec::new(),
            pinned: Vec::new(),
        }
    }

    /// Thread name, as shown in uncaught-exception reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier used for monitor ownership.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The VM this thread runs on.
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    /// Current frame-stack depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Keeps every reference in `values` alive until unpinned.
    pub(crate) fn pin_values(&mut self, values: &[Value]) {
        self.pinned.extend(values.iter().filter_map(Value::as_object));
    }

    pub(crate) fn unpin_to(&mut self, mark: usize) {
        self.pinned.truncate(mark);
    }

    /// Everything this thread keeps alive.
    pub(crate) fn roots(&self) -> Vec<ObjectRef> {
        let mut roots = self.pinned.clone();
        for frame in &self.frames {
            frame.for_each_root(|r| roots.push(r));
        }
        roots
    }

    /// Safe point: parks here if another thread is collecting.
    pub(crate) fn poll(&self) {
        self.vm.safepoint.poll(|| self.roots());
    }

    // ========================================================================
    // Allocation and collection
    // ========================================================================

    /// Allocates an object, collecting and then growing the heap when the
    /// current budget is exhausted.
    pub(crate) fn allocate(&mut self, request: Allocation<Arc<RuntimeClass>>) -> VmResult<ObjectRef> {
        self.poll();
        let mut request = match self.vm.heap().try_allocate(request) {
            Ok(r) => return Ok(r),
            Err(request) => request,
        };
        loop {
            if let Some(stw) = self.vm.safepoint.stop_the_world(self.id) {
                let mut roots = self.roots();
                self.vm.registry.for_each_root(|r| roots.push(r));
                let mut heap = self.vm.heap();
                let summary = heap.collect(&(stw.roots(), roots.as_slice()));
                log::debug!(
                    "thread {} collected {} objects ({} bytes) for a {} byte request",
                    self.name,
                    summary.reclaimed,
                    summary.reclaimed_bytes,
                    request.size()
                );
                return match heap.try_allocate(request) {
                    Ok(r) => Ok(r),
                    Err(request) => heap.grow_and_allocate(request),
                };
            }
            // Someone else is collecting; wait it out, then retry.
            self.vm.safepoint.park(self.roots());
            request = match self.vm.heap().try_allocate(request) {
                Ok(r) => return Ok(r),
                Err(request) => request,
            };
        }
    }

    /// Runs a full collection on behalf of `System.gc`.
    pub(crate) fn collect_garbage(&mut self) {
        loop {
            if let Some(stw) = self.vm.safepoint.stop_the_world(self.id) {
                let mut roots = self.roots();
                self.vm.registry.for_each_root(|r| roots.push(r));
                self.vm.heap().collect(&(stw.roots(), roots.as_slice()));
                return;
            }
            self.vm.safepoint.park(self.roots());
        }
    }

    /// Allocates a zero-initialized instance of `class`.
    pub(crate) fn new_instance(&mut self, class: &Arc<RuntimeClass>) -> VmResult<ObjectRef> {
        self.allocate(Allocation::Instance {
            class: class.clone(),
            fields: class.instance_template().to_vec(),
        })
    }

    /// Loads a built-in class.
    pub(crate) fn bootstrap_class(&self, name: &str) -> VmResult<Arc<RuntimeClass>> {
        self.vm.registry.load_class(LoaderId::BOOTSTRAP, name)
    }

    /// Instance-field slot of a built-in class's field.
    pub(crate) fn bootstrap_field(&self, class: &str, name: &str, descriptor: &str) -> VmResult<usize> {
        let class = self.bootstrap_class(class)?;
        find_field(&class, name, descriptor)
            .map(|f| f.slot)
            .ok_or_else(|| VmError::NoSuchField(format!("{}.{}:{}", class.name(), name, descriptor)))
    }

    // ========================================================================
    // Class initialization
    // ========================================================================

    /// Initializes `class` unless it already is.
    pub(crate) fn ensure_initialized(&mut self, class: &Arc<RuntimeClass>) -> VmResult<()> {
        if class.init_state() == InitState::Initialized {
            return Ok(());
        }
        initialize(class, self)
    }

    // ========================================================================
    // Monitors
    // ========================================================================

    /// Acquires the monitor of `object`, blocking while another thread owns
    /// it. A blocked thread counts as parked for collections.
    pub(crate) fn monitor_enter(&mut self, object: ObjectRef) -> VmResult<()> {
        if self.vm.heap().monitor_mut(object)?.try_enter(self.id) {
            return Ok(());
        }
        let mut roots = self.roots();
        roots.push(object);
        self.vm.safepoint.begin_blocking(self.id, roots);
        let result = self.wait_for_monitor(object);
        self.vm.safepoint.end_blocking(self.id);
        result
    }

    fn wait_for_monitor(&self, object: ObjectRef) -> VmResult<()> {
        let mut guard = self.vm.monitor_lock.lock();
        loop {
            if self.vm.heap().monitor_mut(object)?.try_enter(self.id) {
                return Ok(());
            }
            self.vm.monitor_cond.wait(&mut guard);
        }
    }

    /// Releases one hold on the monitor of `object`.
    pub(crate) fn monitor_exit(&mut self, object: ObjectRef) -> ExecResult<()> {
        let released = self.vm.heap().monitor_mut(object)?.exit(self.id);
        match released {
            None => Err(Throw::raise(
                core_types::ExceptionKind::IllegalMonitorState,
                format!("current thread is not owner of {}", object),
            )),
            Some(true) => {
                let _guard = self.vm.monitor_lock.lock();
                self.vm.monitor_cond.notify_all();
                Ok(())
            }
            Some(false) => Ok(()),
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Runs `public static void main(String[])` of `class_name` with `args`.
    pub fn run_main(&mut self, class_name: &str, args: &[String]) -> VmResult<()> {
        let class = self.vm.load_class(class_name)?;
        let main = class
            .find_declared_method("main", MAIN_DESCRIPTOR)
            .filter(|m| m.is_static() && m.access().contains(MethodAccess::PUBLIC))
            .cloned()
            .ok_or_else(|| {
                VmError::NoSuchMethod(format!("{}.main{}", class.name(), MAIN_DESCRIPTOR))
            })?;
        self.ensure_initialized(&class)?;
        let argv = self.new_string_array(args)?;
        log::debug!("running {}", main);
        let mark = self.pinned.len();
        self.pinned.push(argv);
        let result = self.invoke_entry(&main, vec![Value::Reference(argv)], mark);
        self.unpin_to(mark);
        match result {
            Ok(_) => Ok(()),
            Err(throw) => Err(self.escape(throw)),
        }
    }

    /// Runs a static method to completion and returns its result.
    pub fn invoke_static(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> VmResult<Option<Value>> {
        let mark = self.pinned.len();
        self.invoke_static_releasing(class_name, name, descriptor, args, mark)
    }

    /// [`invoke_static`](Self::invoke_static) that drops every pin above
    /// `mark` once the method's frame holds `args`. Pins below `mark` are
    /// the caller's.
    pub(crate) fn invoke_static_releasing(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
        mark: usize,
    ) -> VmResult<Option<Value>> {
        let found = self.vm.load_class(class_name).and_then(|class| {
            let method = find_class_method(&class, name, descriptor)
                .filter(|m| m.is_static())
                .ok_or_else(|| VmError::NoSuchMethod(format!("{}.{}{}", class_name, name, descriptor)))?;
            let owner = method.class().unwrap_or(class);
            Ok((method, owner))
        });
        self.pin_values(args);
        let result = match found {
            Ok((method, owner)) => match self.ensure_initialized(&owner) {
                Ok(()) => self
                    .invoke_entry(&method, args.to_vec(), mark)
                    .map_err(|t| self.escape(t)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.unpin_to(mark);
        result
    }

    /// Converts an abrupt completion that escaped every frame into the
    /// error reported to the host.
    ///
    /// A native entry method fails without an interpreted frame to unwind,
    /// so its errors that have a throwable class are materialized here.
    fn escape(&mut self, throw: Throw) -> VmError {
        let throw = match throw {
            Throw::Error(e) if e.throwable_class().is_some() => {
                match self.materialize(Throw::Error(e.clone())) {
                    Ok(exception) => Throw::Object(exception),
                    Err(_) => Throw::Error(e),
                }
            }
            other => other,
        };
        self.into_vm_error(throw)
    }

    fn into_vm_error(&self, throw: Throw) -> VmError {
        match throw {
            Throw::Object(exception) => self.uncaught_error(exception),
            Throw::Raise(kind, message) => VmError::UncaughtException {
                thread: self.name.clone(),
                class: kind.class_name().to_string(),
                message,
                stack_trace: Vec::new(),
            },
            Throw::Error(e) => e,
        }
    }
}

impl InitDriver for VmThread {
    fn initialize_constants(&mut self, class: &Arc<RuntimeClass>) -> VmResult<()> {
        let constants: Vec<(usize, u16)> = class
            .fields()
            .iter()
            .filter(|f| f.is_static())
            .filter_map(|f| f.constant_value.map(|c| (f.slot, c)))
            .collect();
        for (slot, index) in constants {
            if let Some(ConstantPoolEntry::String { .. }) = class.constant_pool().entry(index) {
                let string = self.string_constant(class, index)?;
                class.set_static(slot, Value::Reference(string));
            }
        }
        Ok(())
    }

    fn run_initializer(&mut self, class: &Arc<RuntimeClass>, clinit: &Arc<RuntimeMethod>) -> VmResult<()> {
        match self.invoke(clinit, Vec::new()) {
            Ok(_) => Ok(()),
            Err(Throw::Object(exception)) => Err(VmError::Initialization {
                class: class.name().to_string(),
                message: self.describe_exception(exception),
            }),
            Err(Throw::Raise(kind, message)) => Err(VmError::Initialization {
                class: class.name().to_string(),
                message: match message {
                    Some(m) => format!("{}: {}", crate::strings::java_name(kind.class_name()), m),
                    None => crate::strings::java_name(kind.class_name()),
                },
            }),
            Err(Throw::Error(e)) => Err(e),
        }
    }

    fn begin_wait(&mut self) {
        self.vm.safepoint.begin_blocking(self.id, self.roots());
    }

    fn end_wait(&mut self) {
        self.vm.safepoint.end_blocking(self.id);
    }
}

impl Drop for VmThread {
    fn drop(&mut self) {
        self.vm.safepoint.unregister(self.id);
        log::trace!("thread {} ({}) detached", self.id, self.name);
    }
}

impl std::fmt::Debug for VmThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depth", &self.frames.len())
            .finish()
    }
}
