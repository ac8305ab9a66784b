//! Native method bridge
//!
//! Methods declared `native` are bound by `(class, name, descriptor)` to host
//! functions through a [`NativeSymbolTable`]. A native receives its
//! arguments (receiver first for instance methods) and a [`NativeEnv`] giving
//! it the thread's heap, strings and exception machinery. It returns the
//! method's result, `None` for `void`.

mod builtins;

use crate::config::OutputSink;
use crate::thread::VmThread;
use crate::throw::{ExecResult, Throw};
use class_linker::RuntimeClass;
use core_types::{ObjectRef, Value};
use memory_manager::{Allocation, Heap};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A host implementation of a native method.
pub type NativeFn =
    Arc<dyn Fn(&mut NativeEnv<'_>, &[Value]) -> ExecResult<Option<Value>> + Send + Sync>;

/// Resolves native methods to host functions.
pub trait NativeSymbolTable: Send + Sync + fmt::Debug {
    /// The implementation of `class.name(descriptor)`, if any.
    fn lookup(&self, class: &str, name: &str, descriptor: &str) -> Option<NativeFn>;
}

/// Native symbol table backed by a hash map.
///
/// # Example
///
/// ```
/// use interpreter::{NativeRegistry, NativeSymbolTable};
/// use core_types::Value;
///
/// let mut natives = NativeRegistry::with_builtins();
/// natives.register("Calc", "answer", "()I", |_, _| Ok(Some(Value::Int(42))));
/// assert!(natives.lookup("Calc", "answer", "()I").is_some());
/// assert!(natives.lookup("java/lang/Object", "hashCode", "()I").is_some());
/// ```
#[derive(Default, Clone)]
pub struct NativeRegistry {
    methods: HashMap<(String, String, String), NativeFn>,
}

impl NativeRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the natives of the bootstrap classes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    /// Binds `class.name(descriptor)` to `f`, replacing any previous binding.
    pub fn register<F>(&mut self, class: &str, name: &str, descriptor: &str, f: F) -> &mut Self
    where
        F: Fn(&mut NativeEnv<'_>, &[Value]) -> ExecResult<Option<Value>> + Send + Sync + 'static,
    {
        self.methods.insert(
            (class.to_string(), name.to_string(), descriptor.to_string()),
            Arc::new(f),
        );
        self
    }

    /// Number of bound methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl NativeSymbolTable for NativeRegistry {
    fn lookup(&self, class: &str, name: &str, descriptor: &str) -> Option<NativeFn> {
        self.methods
            .get(&(class.to_string(), name.to_string(), descriptor.to_string()))
            .cloned()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// What a native method can do with the calling thread.
///
/// Objects created through the environment are pinned until the native
/// returns, so they survive collections triggered by later allocations.
pub struct NativeEnv<'a> {
    thread: &'a mut VmThread,
}

impl<'a> NativeEnv<'a> {
    pub(crate) fn new(thread: &'a mut VmThread) -> Self {
        Self { thread }
    }

    /// Name of the calling thread.
    pub fn thread_name(&self) -> &str {
        self.thread.name()
    }

    /// Keeps `object` alive until the native returns.
    pub fn pin(&mut self, object: ObjectRef) {
        self.thread.pinned.push(object);
    }

    /// Creates a string object.
    pub fn new_string(&mut self, value: &str) -> ExecResult<ObjectRef> {
        let string = self.thread.new_string(value)?;
        self.pin(string);
        Ok(string)
    }

    /// Creates a string object from UTF-16 code units.
    pub fn new_string_from_chars(&mut self, chars: Vec<u16>) -> ExecResult<ObjectRef> {
        let string = self.thread.new_string_from_chars(chars)?;
        self.pin(string);
        Ok(string)
    }

    /// Contents of a string object.
    pub fn read_string(&self, string: ObjectRef) -> ExecResult<String> {
        Ok(self.thread.read_string(string)?)
    }

    /// UTF-16 code units of a string object.
    pub fn read_chars(&self, string: ObjectRef) -> ExecResult<Vec<u16>> {
        Ok(crate::strings::read_chars(&self.thread.vm.heap(), string)?)
    }

    /// The canonical string equal to `string`; `string` itself becomes
    /// canonical if none exists yet.
    pub fn intern(&mut self, string: ObjectRef) -> ExecResult<ObjectRef> {
        let value = self.read_string(string)?;
        Ok(self.thread.vm.registry.intern(&value, || Ok(string))?)
    }

    /// Runtime class of `object`.
    pub fn class_of(&self, object: ObjectRef) -> ExecResult<Arc<RuntimeClass>> {
        Ok(self.thread.vm.heap().class_of(object)?)
    }

    /// Loads a built-in class.
    pub fn bootstrap_class(&self, name: &str) -> ExecResult<Arc<RuntimeClass>> {
        Ok(self.thread.bootstrap_class(name)?)
    }

    /// Instance-field slot of a built-in class's field.
    pub fn field_slot(&self, class: &str, name: &str, descriptor: &str) -> ExecResult<usize> {
        Ok(self.thread.bootstrap_field(class, name, descriptor)?)
    }

    /// The `java/lang/Class` object of `class`.
    pub fn mirror(&mut self, class: &Arc<RuntimeClass>) -> ExecResult<ObjectRef> {
        Ok(self.thread.mirror_of(class)?)
    }

    /// Allocates an object; may collect.
    pub fn allocate(&mut self, request: Allocation<Arc<RuntimeClass>>) -> ExecResult<ObjectRef> {
        let object = self.thread.allocate(request)?;
        self.pin(object);
        Ok(object)
    }

    /// Runs `f` with the heap locked. `f` must not call back into the VM.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<Arc<RuntimeClass>>) -> R) -> R {
        f(&mut self.thread.vm.heap())
    }

    /// Identity hash code of `object`.
    pub fn identity_hash(&self, object: ObjectRef) -> ExecResult<i32> {
        Ok(self.thread.vm.heap().identity_hash(object)?)
    }

    /// Invokes the implementation of `name`/`descriptor` selected by
    /// `receiver`'s class.
    pub fn call_virtual(
        &mut self,
        receiver: ObjectRef,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> ExecResult<Option<Value>> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(Value::Reference(receiver));
        all.extend_from_slice(args);
        self.thread.invoke_virtual_by_name(name, descriptor, all)
    }

    /// A new exception of throwable class `class_name`, ready to be
    /// returned as the native's abrupt completion.
    pub fn exception(&mut self, class_name: &str, message: Option<&str>) -> Throw {
        match self.thread.new_throwable(class_name, message) {
            Ok(exception) => Throw::Object(exception),
            Err(e) => Throw::Error(e),
        }
    }

    /// Records the interpreted frames as `exception`'s stack trace, leaving
    /// out the constructors of `exception` itself.
    pub fn fill_in_stack_trace(&mut self, exception: ObjectRef) -> ExecResult<()> {
        Ok(self.thread.fill_in_stack_trace(exception, true)?)
    }

    /// Stack trace stored in `exception`, innermost frame first.
    pub fn stack_trace(&self, exception: ObjectRef) -> Vec<String> {
        self.thread.stored_trace(exception)
    }

    /// `java.lang.Foo: message` for `exception`.
    pub fn describe(&self, exception: ObjectRef) -> String {
        self.thread.describe_exception(exception)
    }

    /// Standard output of the VM.
    pub fn stdout(&self) -> &OutputSink {
        &self.thread.vm.config.stdout
    }

    /// Standard error of the VM.
    pub fn stderr(&self) -> &OutputSink {
        &self.thread.vm.config.stderr
    }

    /// Runs a full collection.
    pub fn gc(&mut self) {
        self.thread.collect_garbage();
    }

    /// Monotonic nanoseconds since the VM started.
    pub fn nanos(&self) -> i64 {
        self.thread.vm.nanos_since_start()
    }
}

impl fmt::Debug for NativeEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEnv")
            .field("thread", &self.thread)
            .finish()
    }
}
