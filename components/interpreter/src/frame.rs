//! Activation records.

use crate::throw::Throw;
use class_linker::{MethodCode, RuntimeClass, RuntimeMethod};
use core_types::{ObjectRef, Value, VmError};
use std::sync::Arc;

/// One method activation on a thread's frame stack.
#[derive(Debug)]
pub struct Frame {
    /// Executing method
    pub method: Arc<RuntimeMethod>,
    /// Declaring class of the method
    pub class: Arc<RuntimeClass>,
    /// Verified body
    pub code: Arc<MethodCode>,
    /// Index of the current instruction
    pub pc: usize,
    /// Local-variable slots
    pub locals: Vec<Value>,
    /// Operand stack, bounded by `code.max_stack`
    pub stack: Vec<Value>,
    /// Monitor acquired on entry to a `synchronized` method
    pub monitor: Option<ObjectRef>,
}

impl Frame {
    /// Creates a frame with `args` in the leading locals. Category-2
    /// arguments take two slots, the second holding `Top`.
    pub fn new(
        method: Arc<RuntimeMethod>,
        class: Arc<RuntimeClass>,
        code: Arc<MethodCode>,
        args: &[Value],
    ) -> Self {
        let mut locals = Vec::with_capacity(code.max_locals.max(args.len()));
        for arg in args {
            locals.push(*arg);
            if arg.is_category2() {
                locals.push(Value::Top);
            }
        }
        if locals.len() < code.max_locals {
            locals.resize(code.max_locals, Value::Top);
        }
        let stack = Vec::with_capacity(code.max_stack);
        Self {
            method,
            class,
            code,
            pc: 0,
            locals,
            stack,
            monitor: None,
        }
    }

    pub(crate) fn verify_error(&self, what: &str) -> Throw {
        Throw::Error(VmError::Verify(format!(
            "{} at instruction {} of {}",
            what, self.pc, self.method
        )))
    }

    /// Pushes an operand.
    #[inline]
    pub fn push(&mut self, value: Value) -> Result<(), Throw> {
        if self.stack.len() >= self.code.max_stack {
            return Err(self.verify_error("operand stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pops an operand.
    #[inline]
    pub fn pop(&mut self) -> Result<Value, Throw> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => Err(self.verify_error("operand stack underflow")),
        }
    }

    /// Top operand without popping.
    pub fn peek(&self, depth: usize) -> Result<Value, Throw> {
        match self.stack.len().checked_sub(depth + 1) {
            Some(i) => Ok(self.stack[i]),
            None => Err(self.verify_error("operand stack underflow")),
        }
    }

    fn mismatch(&self, expected: &str, found: Value) -> Throw {
        self.verify_error(&format!("expected {}, found {}", expected, found.type_name()))
    }

    /// Pops an `int`.
    #[inline]
    pub fn pop_int(&mut self) -> Result<i32, Throw> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(self.mismatch("int", other)),
        }
    }

    /// Pops a `long`.
    pub fn pop_long(&mut self) -> Result<i64, Throw> {
        match self.pop()? {
            Value::Long(v) => Ok(v),
            other => Err(self.mismatch("long", other)),
        }
    }

    /// Pops a `float`.
    pub fn pop_float(&mut self) -> Result<f32, Throw> {
        match self.pop()? {
            Value::Float(v) => Ok(v),
            other => Err(self.mismatch("float", other)),
        }
    }

    /// Pops a `double`.
    pub fn pop_double(&mut self) -> Result<f64, Throw> {
        match self.pop()? {
            Value::Double(v) => Ok(v),
            other => Err(self.mismatch("double", other)),
        }
    }

    /// Pops a reference; `None` is null.
    pub fn pop_reference(&mut self) -> Result<Option<ObjectRef>, Throw> {
        match self.pop()? {
            Value::Null => Ok(None),
            Value::Reference(r) => Ok(Some(r)),
            other => Err(self.mismatch("reference", other)),
        }
    }

    /// Reads local `index`.
    #[inline]
    pub fn load(&self, index: u16) -> Result<Value, Throw> {
        match self.locals.get(index as usize) {
            Some(v) => Ok(*v),
            None => Err(self.verify_error("local index out of range")),
        }
    }

    /// Writes local `index`; a category-2 value also claims `index + 1`.
    pub fn store(&mut self, index: u16, value: Value) -> Result<(), Throw> {
        let index = index as usize;
        let width = value.category();
        if index + width > self.locals.len() {
            return Err(self.verify_error("local index out of range"));
        }
        self.locals[index] = value;
        if width == 2 {
            self.locals[index + 1] = Value::Top;
        }
        // Overwriting the upper half of a long/double kills the pair.
        if index > 0 && self.locals[index - 1].is_category2() {
            self.locals[index - 1] = Value::Top;
        }
        Ok(())
    }

    /// Pops `count` values, returned in push order.
    pub fn pop_args(&mut self, count: usize) -> Result<Vec<Value>, Throw> {
        if self.stack.len() < count {
            return Err(self.verify_error("operand stack underflow"));
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    /// References held in locals and on the operand stack.
    pub fn for_each_root(&self, mut f: impl FnMut(ObjectRef)) {
        for v in self.locals.iter().chain(self.stack.iter()) {
            if let Value::Reference(r) = v {
                f(*r);
            }
        }
        if let Some(m) = self.monitor {
            f(m);
        }
    }

    /// Source line of the current instruction.
    pub fn line(&self) -> Option<u16> {
        self.code.line_at(self.pc)
    }
}
