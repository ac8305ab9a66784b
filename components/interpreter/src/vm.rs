//! Virtual machine instance
//!
//! A [`Vm`] owns everything threads share: the class registry, the heap, the
//! safe-point coordinator and the native symbol table. Interpreted code runs
//! on [`VmThread`]s attached to it.

use crate::config::VmConfig;
use crate::native::{NativeRegistry, NativeSymbolTable};
use crate::thread::VmThread;
use class_linker::bootstrap::STRING;
use class_linker::{ClassPath, ClassRegistry, LoaderId, RuntimeClass};
use core_types::{ObjectRef, Value, VmError, VmResult};
use memory_manager::{GcStats, Heap, SafepointCoordinator};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Descriptor of the program entry point
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

/// Shared state of one virtual machine.
pub struct Vm {
    pub(crate) config: VmConfig,
    pub(crate) registry: ClassRegistry,
    pub(crate) heap: Mutex<Heap<Arc<RuntimeClass>>>,
    pub(crate) safepoint: SafepointCoordinator,
    pub(crate) natives: Arc<dyn NativeSymbolTable>,
    pub(crate) monitor_lock: Mutex<()>,
    pub(crate) monitor_cond: Condvar,
    next_thread: AtomicU64,
    started: Instant,
}

impl Vm {
    /// Creates a VM loading application classes from `class_path`, with the
    /// built-in natives.
    ///
    /// # Example
    ///
    /// ```
    /// use class_linker::MemoryClassPath;
    /// use interpreter::{Vm, VmConfig};
    /// use std::sync::Arc;
    ///
    /// let vm = Vm::new(VmConfig::default(), Arc::new(MemoryClassPath::new())).unwrap();
    /// assert!(vm.load_class("java/lang/String").is_ok());
    /// assert!(vm.load_class("NoSuchClass").is_err());
    /// ```
    pub fn new(config: VmConfig, class_path: Arc<dyn ClassPath>) -> VmResult<Arc<Self>> {
        Self::with_natives(config, class_path, Arc::new(NativeRegistry::with_builtins()))
    }

    /// Creates a VM with a custom native symbol table. The table must cover
    /// the natives of the bootstrap classes for them to be usable.
    pub fn with_natives(
        config: VmConfig,
        class_path: Arc<dyn ClassPath>,
        natives: Arc<dyn NativeSymbolTable>,
    ) -> VmResult<Arc<Self>> {
        let registry = ClassRegistry::new(class_path)?;
        let heap = Heap::new(config.heap);
        log::debug!(
            "vm created: heap {}..{} bytes in {} byte blocks, {} frames per thread",
            config.heap.initial_size,
            config.heap.max_size,
            config.heap.block_size,
            config.max_frames
        );
        Ok(Arc::new(Self {
            config,
            registry,
            heap: Mutex::new(heap),
            safepoint: SafepointCoordinator::new(),
            natives,
            monitor_lock: Mutex::new(()),
            monitor_cond: Condvar::new(),
            next_thread: AtomicU64::new(1),
            started: Instant::now(),
        }))
    }

    /// Configuration in effect.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The class registry.
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Loads `name` through the application namespace.
    pub fn load_class(&self, name: &str) -> VmResult<Arc<RuntimeClass>> {
        self.registry.load_class(LoaderId::APPLICATION, name)
    }

    pub(crate) fn heap(&self) -> MutexGuard<'_, Heap<Arc<RuntimeClass>>> {
        self.heap.lock()
    }

    pub(crate) fn next_thread_id(&self) -> u64 {
        self.next_thread.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn nanos_since_start(&self) -> i64 {
        self.started.elapsed().as_nanos() as i64
    }

    /// Attaches a new interpreter thread to this VM on the calling OS thread.
    pub fn attach(self: &Arc<Self>, name: &str) -> VmThread {
        VmThread::new(self.clone(), name)
    }

    /// Runs `public static void main(String[])` of `class_name` on a fresh
    /// thread named `main`.
    ///
    /// Load, link and initialization failures are returned as errors; an
    /// exception escaping `main` is reported on the configured error sink and
    /// returned as [`VmError::UncaughtException`].
    pub fn run_main(self: &Arc<Self>, class_name: &str, args: &[String]) -> VmResult<()> {
        let mut thread = self.attach("main");
        let result = thread.run_main(class_name, args);
        if let Err(e @ VmError::UncaughtException { .. }) = &result {
            self.report_uncaught(e);
        }
        result
    }

    /// Runs a static method on the calling OS thread and returns its result.
    pub fn invoke_static(
        self: &Arc<Self>,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> VmResult<Option<Value>> {
        let mut thread = self.attach("main");
        thread.invoke_static(class_name, name, descriptor, args)
    }

    /// Runs a static method on a new OS thread with its own interpreter
    /// thread. Reference arguments stay reachable until the method's frame
    /// holds them.
    pub fn spawn(
        self: &Arc<Self>,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> VmResult<std::thread::JoinHandle<VmResult<Option<Value>>>> {
        let id = self.next_thread_id();
        let thread_name = format!("Thread-{}", id);
        let mut thread = VmThread::with_id(self.clone(), id, &thread_name);
        thread.pin_values(&args);
        let vm = self.clone();
        let (class_name, name, descriptor) =
            (class_name.to_string(), name.to_string(), descriptor.to_string());
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let result = thread.invoke_static_releasing(&class_name, &name, &descriptor, &args, 0);
                if let Err(e @ VmError::UncaughtException { .. }) = &result {
                    vm.report_uncaught(e);
                }
                result
            })
            .map_err(|e| VmError::Internal(format!("cannot start thread: {}", e)))
    }

    fn report_uncaught(&self, err: &VmError) {
        if let VmError::UncaughtException { stack_trace, .. } = err {
            let mut report = format!("{}\n", err);
            for line in stack_trace {
                report.push_str(&format!("\tat {}\n", line));
            }
            if let Err(e) = self.config.stderr.write_str(&report) {
                log::warn!("cannot write uncaught exception report: {}", e);
            }
        }
    }

    /// Runs a full collection. Must be called from an OS thread with no
    /// attached [`VmThread`], since every attached thread has to park.
    pub fn gc(&self) {
        let id = self.next_thread_id();
        if let Some(stw) = self.safepoint.stop_the_world(id) {
            let mut roots = Vec::new();
            self.registry.for_each_root(|r| roots.push(r));
            self.heap().collect(&(stw.roots(), roots.as_slice()));
        }
    }

    /// Heap statistics.
    pub fn heap_stats(&self) -> GcStats {
        self.heap().stats()
    }

    /// Number of attached threads.
    pub fn thread_count(&self) -> usize {
        self.safepoint.thread_count()
    }

    /// Contents of a `java/lang/String` object.
    pub fn string_value(&self, string: ObjectRef) -> VmResult<String> {
        crate::strings::read_string(&self.heap(), string)
    }

    /// Whether `object` is a `java/lang/String`.
    pub fn is_string(&self, object: ObjectRef) -> bool {
        matches!(self.heap().class_of(object), Ok(c) if c.name() == STRING)
    }

    /// Drops all classes and interned strings.
    pub fn shutdown(&self) {
        self.registry.teardown();
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("registry", &self.registry)
            .field("threads", &self.thread_count())
            .finish()
    }
}

/// Process exit status for the outcome of [`Vm::run_main`].
pub fn exit_status(result: &VmResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}
