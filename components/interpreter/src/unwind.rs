//! Exception objects and frame unwinding.

use crate::frame::Frame;
use crate::strings::{java_name, read_string};
use crate::thread::VmThread;
use crate::throw::{ExecResult, Throw};
use class_linker::bootstrap::{STRING, THROWABLE};
use core_types::{ObjectRef, Value, VmError, VmResult};
use memory_manager::{Allocation, ElementKind};

const MESSAGE_FIELD: (&str, &str) = ("detailMessage", "Ljava/lang/String;");
const TRACE_FIELD: (&str, &str) = ("stackTrace", "[Ljava/lang/String;");

impl VmThread {
    /// Transfers control to the innermost handler for `throw` at or above
    /// frame `base`.
    ///
    /// Returns `Ok` with the handler's frame on top, ready to continue, or
    /// the exception once every frame down to `base` has been popped. Errors
    /// with no throwable counterpart unwind the same frames and are returned
    /// unchanged.
    pub(crate) fn handle_throw(&mut self, throw: Throw, base: usize) -> ExecResult<()> {
        let exception = match self.materialize(throw) {
            Ok(e) => e,
            Err(fatal) => {
                while self.frames.len() > base {
                    self.pop_frame_releasing();
                }
                return Err(fatal);
            }
        };
        while self.frames.len() > base {
            if let Some(target) = self.find_handler(exception)? {
                let frame = self.frame()?;
                frame.stack.clear();
                frame.push(Value::Reference(exception))?;
                frame.pc = target;
                return Ok(());
            }
            self.pop_frame_releasing();
        }
        Err(Throw::Object(exception))
    }

    /// Pops the top frame, releasing a monitor held by a `synchronized`
    /// method.
    pub(crate) fn pop_frame_releasing(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        if let Some(monitor) = frame.monitor {
            if let Err(e) = self.monitor_exit(monitor) {
                log::warn!("{}: monitor of {} not released on unwind: {:?}", frame.method, monitor, e);
            }
        }
        Some(frame)
    }

    fn find_handler(&mut self, exception: ObjectRef) -> ExecResult<Option<usize>> {
        let (code, class, pc) = match self.frames.last() {
            Some(f) => (f.code.clone(), f.class.clone(), f.pc),
            None => return Ok(None),
        };
        let thrown = self.vm.heap().class_of(exception)?;
        for handler in &code.handlers {
            if pc < handler.start || pc >= handler.end {
                continue;
            }
            let index = match handler.catch_type {
                None => return Ok(Some(handler.handler)),
                Some(index) => index,
            };
            match self.vm.registry.resolve_class(&class, index) {
                Ok(catch) if thrown.is_assignable_to(&catch) => return Ok(Some(handler.handler)),
                Ok(_) => {}
                // A catch type that cannot be loaded matches nothing.
                Err(e) => log::warn!("skipping handler in {}: {}", class.name(), e),
            }
        }
        Ok(None)
    }

    /// The throwable object for `throw`, creating one for runtime checks and
    /// errors that have a throwable class.
    pub(crate) fn materialize(&mut self, throw: Throw) -> ExecResult<ObjectRef> {
        let (class_name, message) = match throw {
            Throw::Object(exception) => return Ok(exception),
            Throw::Raise(kind, message) => (kind.class_name(), message),
            Throw::Error(e) => match e.throwable_class() {
                Some(class) => (class, e.detail_message()),
                None => return Err(Throw::Error(e)),
            },
        };
        self.new_throwable(class_name, message.as_deref())
            .map_err(Throw::Error)
    }

    /// Allocates an instance of throwable class `class_name` with its message
    /// and stack trace filled in, without running a constructor.
    pub(crate) fn new_throwable(&mut self, class_name: &str, message: Option<&str>) -> VmResult<ObjectRef> {
        let class = self.bootstrap_class(class_name)?;
        self.ensure_initialized(&class)?;
        let exception = self.new_instance(&class)?;
        let mark = self.pinned.len();
        self.pinned.push(exception);
        let result = self.init_throwable(exception, message);
        self.unpin_to(mark);
        result.map(|()| exception)
    }

    fn init_throwable(&mut self, exception: ObjectRef, message: Option<&str>) -> VmResult<()> {
        if let Some(message) = message {
            let slot = self.bootstrap_field(THROWABLE, MESSAGE_FIELD.0, MESSAGE_FIELD.1)?;
            let string = self.new_string(message)?;
            self.vm
                .heap()
                .set_field(exception, slot, Value::Reference(string))?;
        }
        self.fill_in_stack_trace(exception, false)
    }

    /// Records the current frames as the stack trace of `exception`. With
    /// `skip_constructors`, frames constructing `exception` itself are left
    /// out.
    pub(crate) fn fill_in_stack_trace(&mut self, exception: ObjectRef, skip_constructors: bool) -> VmResult<()> {
        let lines = self.trace_lines(skip_constructors.then_some(exception));
        let string_class = self.bootstrap_class(STRING)?;
        let array_class = self.vm.registry.array_class_of(&string_class)?;
        let slot = self.bootstrap_field(THROWABLE, TRACE_FIELD.0, TRACE_FIELD.1)?;
        let mark = self.pinned.len();
        self.pinned.push(exception);
        let trace = self.allocate(Allocation::Array {
            class: array_class,
            kind: ElementKind::Reference,
            length: lines.len(),
        });
        let result = match trace {
            Ok(trace) => {
                self.pinned.push(trace);
                self.store_trace(exception, trace, slot, &lines)
            }
            Err(e) => Err(e),
        };
        self.unpin_to(mark);
        result
    }

    fn store_trace(&mut self, exception: ObjectRef, trace: ObjectRef, slot: usize, lines: &[String]) -> VmResult<()> {
        for (i, line) in lines.iter().enumerate() {
            let string = self.new_string(line)?;
            self.vm
                .heap()
                .array_mut(trace)?
                .store(i, Value::Reference(string));
        }
        self.vm
            .heap()
            .set_field(exception, slot, Value::Reference(trace))
    }

    /// `Class.method(File:line)` for each frame, innermost first.
    fn trace_lines(&self, constructing: Option<ObjectRef>) -> Vec<String> {
        let mut frames = self.frames.iter().rev().peekable();
        if let Some(exception) = constructing {
            while let Some(frame) = frames.peek() {
                let is_own_constructor = frame.method.name() == "<init>"
                    && frame.locals.first() == Some(&Value::Reference(exception));
                if !is_own_constructor {
                    break;
                }
                frames.next();
            }
        }
        frames.map(trace_line).collect()
    }

    /// `java.lang.Foo: message`, or just the class name without a message.
    pub(crate) fn describe_exception(&self, exception: ObjectRef) -> String {
        let class = match self.vm.heap().class_of(exception) {
            Ok(c) => c.java_name(),
            Err(_) => return format!("<invalid exception {}>", exception),
        };
        match self.exception_message(exception) {
            Some(m) => format!("{}: {}", class, m),
            None => class,
        }
    }

    pub(crate) fn exception_message(&self, exception: ObjectRef) -> Option<String> {
        let slot = self.bootstrap_field(THROWABLE, MESSAGE_FIELD.0, MESSAGE_FIELD.1).ok()?;
        let heap = self.vm.heap();
        match heap.get_field(exception, slot).ok()? {
            Value::Reference(s) => read_string(&heap, s).ok(),
            _ => None,
        }
    }

    /// Stack trace stored in `exception`.
    pub(crate) fn stored_trace(&self, exception: ObjectRef) -> Vec<String> {
        let slot = match self.bootstrap_field(THROWABLE, TRACE_FIELD.0, TRACE_FIELD.1) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let heap = self.vm.heap();
        let trace = match heap.get_field(exception, slot) {
            Ok(Value::Reference(t)) => t,
            _ => return Vec::new(),
        };
        let len = heap.array_length(trace).unwrap_or(0);
        (0..len)
            .filter_map(|i| match heap.array(trace).ok()?.load(i)? {
                Value::Reference(s) => read_string(&heap, s).ok(),
                _ => None,
            })
            .collect()
    }

    /// The host-level error for an exception that escaped the thread.
    pub(crate) fn uncaught_error(&self, exception: ObjectRef) -> VmError {
        let class = match self.vm.heap().class_of(exception) {
            Ok(c) => c,
            Err(e) => return e,
        };
        VmError::UncaughtException {
            thread: self.name().to_string(),
            class: class.name().to_string(),
            message: self.exception_message(exception),
            stack_trace: self.stored_trace(exception),
        }
    }
}

fn trace_line(frame: &Frame) -> String {
    let location = match (frame.class.source_file(), frame.line()) {
        (Some(file), Some(line)) => format!("{}:{}", file, line),
        (Some(file), None) => file.to_string(),
        (None, _) => "Unknown Source".to_string(),
    };
    format!(
        "{}.{}({})",
        java_name(frame.method.class_name()),
        frame.method.name(),
        location
    )
}
