//! Dispatch loop for bytecode execution
//!
//! Fetches the decoded instruction at the top frame's pc and executes it with
//! a single `match`. Instructions that complete normally advance the pc by
//! one and branches set it. An invocation leaves the caller's pc on the
//! invoke instruction until the callee returns, so handler lookup and stack
//! traces see the call site.

use crate::frame::Frame;
use crate::numeric;
use crate::thread::VmThread;
use crate::throw::{ExecResult, Throw};
use arrayvec::ArrayVec;
use bytecode_system::{ArrayKind, IntKind, LocalKind, NumKind, Opcode, PrimitiveType, ReturnKind};
use class_linker::{ComponentType, ResolvedField, RuntimeClass};
use classfile::{ConstantPoolEntry, FieldType};
use core_types::{ExceptionKind, ObjectRef, Value, VmError};
use memory_manager::{Allocation, ArrayData, ElementKind, NegativeArraySize};
use std::sync::Arc;

/// What the dispatcher does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Flow {
    /// Continue with the next instruction
    Next,
    /// Continue at an instruction index of the same frame
    Jump(usize),
    /// The frame stack changed and the new top frame's pc is already right
    Stay,
    /// The frame at the base depth returned
    Done(Option<Value>),
}

impl VmThread {
    pub(crate) fn frame(&mut self) -> ExecResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| Throw::Error(VmError::Internal("no current frame".to_string())))
    }

    /// Executes until the frame at depth `base` returns. Exceptions are
    /// dispatched to handlers in the frames above `base`; one that escapes
    /// them is returned.
    pub(crate) fn run(&mut self, base: usize) -> ExecResult<Option<Value>> {
        loop {
            match self.step(base) {
                Ok(Flow::Done(value)) => return Ok(value),
                Ok(_) => {}
                Err(throw) => self.handle_throw(throw, base)?,
            }
        }
    }

    fn step(&mut self, base: usize) -> ExecResult<Flow> {
        let (opcode, pc) = self.fetch()?;
        let flow = self.execute(opcode, pc, base)?;
        match flow {
            Flow::Next => self.frame()?.pc = pc + 1,
            Flow::Jump(target) => {
                if target <= pc {
                    self.poll();
                }
                self.frame()?.pc = target;
            }
            Flow::Stay | Flow::Done(_) => {}
        }
        Ok(flow)
    }

    fn fetch(&self) -> ExecResult<(Opcode, usize)> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| Throw::Error(VmError::Internal("no current frame".to_string())))?;
        match frame.code.decoded.get(frame.pc) {
            Some(insn) => Ok((insn.opcode, frame.pc)),
            None => Err(frame.verify_error("execution fell off the end of the code")),
        }
    }

    fn execute(&mut self, opcode: Opcode, pc: usize, base: usize) -> ExecResult<Flow> {
        if opcode.is_invoke() {
            self.poll();
        }
        let frame = self.frame()?;
        match opcode {
            Opcode::Nop => {}
            Opcode::AconstNull => frame.push(Value::Null)?,
            Opcode::Iconst(v) => frame.push(Value::Int(v))?,
            Opcode::Lconst(v) => frame.push(Value::Long(v))?,
            Opcode::Fconst(v) => frame.push(Value::Float(v))?,
            Opcode::Dconst(v) => frame.push(Value::Double(v))?,
            Opcode::Ldc(index) => return self.ldc(index, false),
            Opcode::Ldc2(index) => return self.ldc(index, true),

            Opcode::Load(kind, index) => {
                let value = frame.load(index)?;
                if !local_matches(kind, &value, false) {
                    return Err(frame.verify_error(&format!(
                        "{:?} load of local {} holding {}",
                        kind,
                        index,
                        value.type_name()
                    )));
                }
                frame.push(value)?;
            }
            Opcode::Store(kind, index) => {
                let value = frame.pop()?;
                if !local_matches(kind, &value, true) {
                    return Err(frame.verify_error(&format!(
                        "{:?} store of {}",
                        kind,
                        value.type_name()
                    )));
                }
                frame.store(index, value)?;
            }
            Opcode::ArrayLoad(kind) => {
                let index = frame.pop_int()?;
                let array = frame.pop_reference()?.ok_or_else(Throw::null_pointer)?;
                let value = self.array_load(kind, array, index)?;
                self.frame()?.push(value)?;
            }
            Opcode::ArrayStore(kind) => {
                let value = frame.pop()?;
                let index = frame.pop_int()?;
                let array = frame.pop_reference()?.ok_or_else(Throw::null_pointer)?;
                self.array_store(kind, array, index, value)?;
            }

            // Operand stack
            Opcode::Pop => {
                if frame.pop()?.is_category2() {
                    return Err(frame.verify_error("pop of a category 2 value"));
                }
            }
            Opcode::Pop2 => {
                pop_words(frame, 2)?;
            }
            Opcode::Dup => dup_words(frame, 1, 0)?,
            Opcode::DupX1 => dup_words(frame, 1, 1)?,
            Opcode::DupX2 => dup_words(frame, 1, 2)?,
            Opcode::Dup2 => dup_words(frame, 2, 0)?,
            Opcode::Dup2X1 => dup_words(frame, 2, 1)?,
            Opcode::Dup2X2 => dup_words(frame, 2, 2)?,
            Opcode::Swap => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                if a.is_category2() || b.is_category2() {
                    return Err(frame.verify_error("swap of a category 2 value"));
                }
                frame.push(a)?;
                frame.push(b)?;
            }

            // Arithmetic
            Opcode::Add(k) => arith(frame, k, i32::wrapping_add, i64::wrapping_add, |a, b| a + b, |a, b| a + b)?,
            Opcode::Sub(k) => arith(frame, k, i32::wrapping_sub, i64::wrapping_sub, |a, b| a - b, |a, b| a - b)?,
            Opcode::Mul(k) => arith(frame, k, i32::wrapping_mul, i64::wrapping_mul, |a, b| a * b, |a, b| a * b)?,
            Opcode::Div(k) => divide(frame, k, numeric::idiv, numeric::ldiv, |a, b| a / b, |a, b| a / b)?,
            Opcode::Rem(k) => divide(frame, k, numeric::irem, numeric::lrem, numeric::frem, numeric::drem)?,
            Opcode::Neg(k) => {
                let value = match k {
                    NumKind::Int => Value::Int(frame.pop_int()?.wrapping_neg()),
                    NumKind::Long => Value::Long(frame.pop_long()?.wrapping_neg()),
                    NumKind::Float => Value::Float(-frame.pop_float()?),
                    NumKind::Double => Value::Double(-frame.pop_double()?),
                };
                frame.push(value)?;
            }
            Opcode::Shl(k) => shift(frame, k, numeric::ishl, numeric::lshl)?,
            Opcode::Shr(k) => shift(frame, k, numeric::ishr, numeric::lshr)?,
            Opcode::Ushr(k) => shift(frame, k, numeric::iushr, numeric::lushr)?,
            Opcode::And(k) => bitwise(frame, k, |a, b| a & b, |a, b| a & b)?,
            Opcode::Or(k) => bitwise(frame, k, |a, b| a | b, |a, b| a | b)?,
            Opcode::Xor(k) => bitwise(frame, k, |a, b| a ^ b, |a, b| a ^ b)?,
            Opcode::Iinc(index, delta) => {
                let value = match frame.load(index)? {
                    Value::Int(v) => v,
                    other => {
                        return Err(frame.verify_error(&format!("iinc of {}", other.type_name())))
                    }
                };
                frame.store(index, Value::Int(value.wrapping_add(delta as i32)))?;
            }

            // Conversions and comparisons
            Opcode::Convert(from, to) => {
                let value = frame.pop()?;
                match convert(from, to, value) {
                    Some(converted) => frame.push(converted)?,
                    None => {
                        return Err(frame.verify_error(&format!(
                            "{:?} to {:?} conversion of {}",
                            from,
                            to,
                            value.type_name()
                        )))
                    }
                }
            }
            Opcode::I2b => {
                let v = frame.pop_int()?;
                frame.push(Value::Int(numeric::i2b(v)))?;
            }
            Opcode::I2c => {
                let v = frame.pop_int()?;
                frame.push(Value::Int(numeric::i2c(v)))?;
            }
            Opcode::I2s => {
                let v = frame.pop_int()?;
                frame.push(Value::Int(numeric::i2s(v)))?;
            }
            Opcode::Lcmp => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Int(numeric::lcmp(a, b)))?;
            }
            Opcode::Fcmpl | Opcode::Fcmpg => {
                let b = frame.pop_float()?;
                let a = frame.pop_float()?;
                let nan = if opcode == Opcode::Fcmpl { -1 } else { 1 };
                frame.push(Value::Int(numeric::fcmp(a, b, nan)))?;
            }
            Opcode::Dcmpl | Opcode::Dcmpg => {
                let b = frame.pop_double()?;
                let a = frame.pop_double()?;
                let nan = if opcode == Opcode::Dcmpl { -1 } else { 1 };
                frame.push(Value::Int(numeric::dcmp(a, b, nan)))?;
            }

            // Control transfer
            Opcode::If(cond, target) => {
                if cond.holds(frame.pop_int()?.cmp(&0)) {
                    return Ok(Flow::Jump(target));
                }
            }
            Opcode::IfICmp(cond, target) => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if cond.holds(a.cmp(&b)) {
                    return Ok(Flow::Jump(target));
                }
            }
            Opcode::IfACmp(equal, target) => {
                let b = frame.pop_reference()?;
                let a = frame.pop_reference()?;
                if (a == b) == equal {
                    return Ok(Flow::Jump(target));
                }
            }
            Opcode::IfNull(target) => {
                if frame.pop_reference()?.is_none() {
                    return Ok(Flow::Jump(target));
                }
            }
            Opcode::IfNonNull(target) => {
                if frame.pop_reference()?.is_some() {
                    return Ok(Flow::Jump(target));
                }
            }
            Opcode::Goto(target) => return Ok(Flow::Jump(target)),
            Opcode::Jsr(target) => {
                frame.push(Value::ReturnAddress(pc + 1))?;
                return Ok(Flow::Jump(target));
            }
            Opcode::Ret(index) => match frame.load(index)? {
                Value::ReturnAddress(target) => return Ok(Flow::Jump(target)),
                other => {
                    return Err(frame.verify_error(&format!("ret through {}", other.type_name())))
                }
            },
            Opcode::TableSwitch(table) | Opcode::LookupSwitch(table) => {
                let key = frame.pop_int()?;
                let target = match frame.code.decoded.switch_tables.get(table) {
                    Some(t) => t.target(key),
                    None => return Err(frame.verify_error("missing switch table")),
                };
                return Ok(Flow::Jump(target));
            }
            Opcode::Return(kind) => {
                let value = pop_return(frame, kind)?;
                return self.return_from(value, base);
            }

            // Fields
            Opcode::GetStatic(index) => self.get_static(index)?,
            Opcode::PutStatic(index) => self.put_static(index)?,
            Opcode::GetField(index) => self.get_field(index)?,
            Opcode::PutField(index) => self.put_field(index)?,

            // Invocation
            Opcode::InvokeVirtual(index) => return self.invoke_virtual_at(index),
            Opcode::InvokeSpecial(index) => return self.invoke_special_at(index),
            Opcode::InvokeStatic(index) => return self.invoke_static_at(index),
            Opcode::InvokeInterface(index, _) => return self.invoke_interface_at(index),
            Opcode::InvokeDynamic(_) => {
                return Err(Throw::Error(VmError::IncompatibleClassChange(
                    "invokedynamic is not supported".to_string(),
                )))
            }

            // Objects and arrays
            Opcode::New(index) => self.new_object(index)?,
            Opcode::NewArray(element) => {
                let count = frame.pop_int()?;
                let class = self.vm.registry.primitive_array_class(element)?;
                let array = self.new_array(class, count)?;
                self.frame()?.push(Value::Reference(array))?;
            }
            Opcode::ANewArray(index) => {
                let count = frame.pop_int()?;
                let current = self.current_class()?;
                let component = self.vm.registry.resolve_class(&current, index)?;
                let class = self.vm.registry.array_class_of(&component)?;
                let array = self.new_array(class, count)?;
                self.frame()?.push(Value::Reference(array))?;
            }
            Opcode::MultiANewArray(index, dimensions) => self.multi_new_array(index, dimensions)?,
            Opcode::ArrayLength => {
                let array = frame.pop_reference()?.ok_or_else(Throw::null_pointer)?;
                let length = self.vm.heap().array_length(array)?;
                self.frame()?.push(Value::Int(length as i32))?;
            }
            Opcode::AThrow => {
                let exception = frame.pop_reference()?.ok_or_else(Throw::null_pointer)?;
                return Err(Throw::Object(exception));
            }
            Opcode::CheckCast(index) => match frame.peek(0)? {
                Value::Null => {}
                Value::Reference(object) => {
                    let (class, target) = self.cast_classes(object, index)?;
                    if !class.is_assignable_to(&target) {
                        return Err(Throw::raise(
                            ExceptionKind::ClassCast,
                            format!(
                                "class {} cannot be cast to class {}",
                                class.java_name(),
                                target.java_name()
                            ),
                        ));
                    }
                }
                other => {
                    return Err(frame.verify_error(&format!("checkcast of {}", other.type_name())))
                }
            },
            Opcode::InstanceOf(index) => {
                let result = match frame.pop_reference()? {
                    None => false,
                    Some(object) => {
                        let (class, target) = self.cast_classes(object, index)?;
                        class.is_assignable_to(&target)
                    }
                };
                self.frame()?.push(Value::Int(result as i32))?;
            }
            Opcode::MonitorEnter => {
                let object = frame.pop_reference()?.ok_or_else(Throw::null_pointer)?;
                self.monitor_enter(object)?;
            }
            Opcode::MonitorExit => {
                let object = frame.pop_reference()?.ok_or_else(Throw::null_pointer)?;
                self.monitor_exit(object)?;
            }
        }
        Ok(Flow::Next)
    }

    /// Pops the returning frame and hands `value` to its caller.
    fn return_from(&mut self, value: Option<Value>, base: usize) -> ExecResult<Flow> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Throw::Error(VmError::Internal("return without a frame".to_string())))?;
        if let Some(monitor) = frame.monitor {
            self.monitor_exit(monitor)?;
        }
        if self.frames.len() == base {
            return Ok(Flow::Done(value));
        }
        let caller = self.frame()?;
        caller.pc += 1;
        if let Some(value) = value {
            caller.push(value)?;
        }
        Ok(Flow::Stay)
    }

    fn ldc(&mut self, index: u16, wide: bool) -> ExecResult<Flow> {
        let class = self.current_class()?;
        let value = match (class.constant_pool().entry(index), wide) {
            (Some(ConstantPoolEntry::Integer(v)), false) => Value::Int(*v),
            (Some(ConstantPoolEntry::Float(v)), false) => Value::Float(*v),
            (Some(ConstantPoolEntry::String { .. }), false) => {
                Value::Reference(self.string_constant(&class, index)?)
            }
            (Some(ConstantPoolEntry::Class { .. }), false) => {
                let target = self.vm.registry.resolve_class(&class, index)?;
                Value::Reference(self.mirror_of(&target)?)
            }
            (Some(ConstantPoolEntry::Long(v)), true) => Value::Long(*v),
            (Some(ConstantPoolEntry::Double(v)), true) => Value::Double(*v),
            (Some(other), _) => {
                return Err(Throw::Error(VmError::IncompatibleClassChange(format!(
                    "unsupported {} constant at index {} of {}",
                    other.tag_name(),
                    index,
                    class.name()
                ))))
            }
            (None, _) => {
                return Err(Throw::Error(VmError::Verify(format!(
                    "ldc of unusable constant pool index {} in {}",
                    index,
                    class.name()
                ))))
            }
        };
        self.frame()?.push(value)?;
        Ok(Flow::Next)
    }

    // ========================================================================
    // Fields
    // ========================================================================

    fn resolve_field_at(&mut self, index: u16, want_static: bool) -> ExecResult<ResolvedField> {
        let current = self.current_class()?;
        let field = self.vm.registry.resolve_field(&current, index)?;
        if field.is_static != want_static {
            let member = current.constant_pool().raw().member_ref(index)?;
            return Err(Throw::Error(VmError::IncompatibleClassChange(format!(
                "Expected {} field {}.{}",
                if want_static { "static" } else { "non-static" },
                member.class_name,
                member.name
            ))));
        }
        Ok(field)
    }

    fn get_static(&mut self, index: u16) -> ExecResult<()> {
        let field = self.resolve_field_at(index, true)?;
        self.ensure_initialized(&field.owner)?;
        let value = field
            .owner
            .get_static(field.slot)
            .ok_or_else(|| VmError::Internal(format!("no static slot {} in {}", field.slot, field.owner.name())))?;
        self.frame()?.push(value)
    }

    fn put_static(&mut self, index: u16) -> ExecResult<()> {
        let field = self.resolve_field_at(index, true)?;
        self.ensure_initialized(&field.owner)?;
        let frame = self.frame()?;
        let value = frame.pop()?;
        let value = coerce_to_field(&field.field_type, value)
            .ok_or_else(|| frame.verify_error(&format!("putstatic of {} into {}", value.type_name(), field.field_type)))?;
        if !field.owner.set_static(field.slot, value) {
            return Err(Throw::Error(VmError::Internal(format!(
                "no static slot {} in {}",
                field.slot,
                field.owner.name()
            ))));
        }
        Ok(())
    }

    fn get_field(&mut self, index: u16) -> ExecResult<()> {
        let field = self.resolve_field_at(index, false)?;
        let object = self.frame()?.pop_reference()?.ok_or_else(Throw::null_pointer)?;
        let value = self.vm.heap().get_field(object, field.slot)?;
        self.frame()?.push(value)
    }

    fn put_field(&mut self, index: u16) -> ExecResult<()> {
        let field = self.resolve_field_at(index, false)?;
        let frame = self.frame()?;
        let value = frame.pop()?;
        let value = coerce_to_field(&field.field_type, value)
            .ok_or_else(|| frame.verify_error(&format!("putfield of {} into {}", value.type_name(), field.field_type)))?;
        let object = frame.pop_reference()?.ok_or_else(Throw::null_pointer)?;
        self.vm.heap().set_field(object, field.slot, value)?;
        Ok(())
    }

    // ========================================================================
    // Objects and arrays
    // ========================================================================

    fn new_object(&mut self, index: u16) -> ExecResult<()> {
        let current = self.current_class()?;
        let class = self.vm.registry.resolve_class(&current, index)?;
        if class.is_interface() || class.is_abstract() || class.is_array() {
            return Err(Throw::Error(VmError::IncompatibleClassChange(format!(
                "cannot instantiate {}",
                class.java_name()
            ))));
        }
        self.ensure_initialized(&class)?;
        let object = self.new_instance(&class)?;
        self.frame()?.push(Value::Reference(object))
    }

    fn new_array(&mut self, class: Arc<RuntimeClass>, count: i32) -> ExecResult<ObjectRef> {
        let kind = element_kind(&class).ok_or_else(|| {
            VmError::Internal(format!("{} is not an array class", class.name()))
        })?;
        let request = Allocation::array(class, kind, count).map_err(negative_size)?;
        Ok(self.allocate(request)?)
    }

    fn multi_new_array(&mut self, index: u16, dimensions: u8) -> ExecResult<()> {
        let current = self.current_class()?;
        let class = self.vm.registry.resolve_class(&current, index)?;
        let frame = self.frame()?;
        let counts = frame
            .pop_args(dimensions as usize)?
            .into_iter()
            .map(|v| match v {
                Value::Int(n) => Ok(n),
                other => Err(other),
            })
            .collect::<Result<Vec<i32>, Value>>()
            .map_err(|v| frame.verify_error(&format!("multianewarray dimension of {}", v.type_name())))?;
        if let Some(negative) = counts.iter().find(|n| **n < 0) {
            return Err(negative_size(NegativeArraySize(*negative)));
        }
        let array = self.new_multi_array(&class, &counts)?;
        self.frame()?.push(Value::Reference(array))
    }

    fn new_multi_array(&mut self, class: &Arc<RuntimeClass>, counts: &[i32]) -> ExecResult<ObjectRef> {
        let (count, rest) = counts
            .split_first()
            .ok_or_else(|| VmError::Verify("multianewarray with no dimensions".to_string()))?;
        let array = self.new_array(class.clone(), *count)?;
        if rest.is_empty() {
            return Ok(array);
        }
        let component = match class.component() {
            Some(ComponentType::Reference(c)) => c.clone(),
            _ => {
                return Err(Throw::Error(VmError::Verify(format!(
                    "{} has fewer than {} dimensions",
                    class.name(),
                    counts.len()
                ))))
            }
        };
        let mark = self.pinned.len();
        self.pinned.push(array);
        let result = self.fill_multi_array(array, &component, *count, rest);
        self.unpin_to(mark);
        result.map(|()| array)
    }

    fn fill_multi_array(
        &mut self,
        array: ObjectRef,
        component: &Arc<RuntimeClass>,
        count: i32,
        rest: &[i32],
    ) -> ExecResult<()> {
        for i in 0..count as usize {
            let sub = self.new_multi_array(component, rest)?;
            self.vm
                .heap()
                .array_mut(array)?
                .store(i, Value::Reference(sub));
        }
        Ok(())
    }

    fn array_load(&self, kind: ArrayKind, array: ObjectRef, index: i32) -> ExecResult<Value> {
        let heap = self.vm.heap();
        let data = heap.array(array)?;
        if !array_matches(kind, data) {
            return Err(Throw::Error(VmError::Verify(format!(
                "{:?} element load from {}",
                kind,
                heap.class_of(array)?.name()
            ))));
        }
        if index < 0 || index as usize >= data.len() {
            return Err(Throw::index_out_of_bounds(index, data.len()));
        }
        data.load(index as usize)
            .ok_or_else(|| Throw::index_out_of_bounds(index, data.len()))
    }

    fn array_store(&self, kind: ArrayKind, array: ObjectRef, index: i32, value: Value) -> ExecResult<()> {
        let mut heap = self.vm.heap();
        let array_class = heap.class_of(array)?;
        let length = {
            let data = heap.array(array)?;
            if !array_matches(kind, data) {
                return Err(Throw::Error(VmError::Verify(format!(
                    "{:?} element store into {}",
                    kind,
                    array_class.name()
                ))));
            }
            data.len()
        };
        if index < 0 || index as usize >= length {
            return Err(Throw::index_out_of_bounds(index, length));
        }
        let value = match (value, array_class.component()) {
            (Value::Reference(r), Some(ComponentType::Reference(component))) => {
                let stored = heap.class_of(r)?;
                if !stored.is_assignable_to(component) {
                    return Err(Throw::raise(ExceptionKind::ArrayStore, stored.java_name()));
                }
                value
            }
            (Value::Int(v), Some(ComponentType::Primitive(PrimitiveType::Boolean))) => Value::Int(v & 1),
            _ => value,
        };
        if !heap.array_mut(array)?.store(index as usize, value) {
            return Err(Throw::Error(VmError::Verify(format!(
                "{:?} element store of {}",
                kind,
                value.type_name()
            ))));
        }
        Ok(())
    }

    /// Runtime class of `object` and the class at pool `index`.
    fn cast_classes(&mut self, object: ObjectRef, index: u16) -> ExecResult<(Arc<RuntimeClass>, Arc<RuntimeClass>)> {
        let current = self.current_class()?;
        let target = self.vm.registry.resolve_class(&current, index)?;
        let class = self.vm.heap().class_of(object)?;
        Ok((class, target))
    }
}

fn negative_size(e: NegativeArraySize) -> Throw {
    Throw::raise(ExceptionKind::NegativeArraySize, e.0.to_string())
}

/// Storage kind of an array class's elements.
pub(crate) fn element_kind(class: &RuntimeClass) -> Option<ElementKind> {
    Some(match class.component()? {
        ComponentType::Reference(_) => ElementKind::Reference,
        ComponentType::Primitive(p) => match p {
            PrimitiveType::Boolean => ElementKind::Boolean,
            PrimitiveType::Byte => ElementKind::Byte,
            PrimitiveType::Char => ElementKind::Char,
            PrimitiveType::Short => ElementKind::Short,
            PrimitiveType::Int => ElementKind::Int,
            PrimitiveType::Long => ElementKind::Long,
            PrimitiveType::Float => ElementKind::Float,
            PrimitiveType::Double => ElementKind::Double,
        },
    })
}

fn local_matches(kind: LocalKind, value: &Value, storing: bool) -> bool {
    match (kind, value) {
        (LocalKind::Int, Value::Int(_))
        | (LocalKind::Long, Value::Long(_))
        | (LocalKind::Float, Value::Float(_))
        | (LocalKind::Double, Value::Double(_))
        | (LocalKind::Reference, Value::Null | Value::Reference(_)) => true,
        // astore also saves jsr return addresses
        (LocalKind::Reference, Value::ReturnAddress(_)) => storing,
        _ => false,
    }
}

fn array_matches(kind: ArrayKind, data: &ArrayData) -> bool {
    matches!(
        (kind, data),
        (ArrayKind::Int, ArrayData::Int(_))
            | (ArrayKind::Long, ArrayData::Long(_))
            | (ArrayKind::Float, ArrayData::Float(_))
            | (ArrayKind::Double, ArrayData::Double(_))
            | (ArrayKind::Reference, ArrayData::Reference(_))
            | (ArrayKind::Byte, ArrayData::Byte(_))
            | (ArrayKind::Char, ArrayData::Char(_))
            | (ArrayKind::Short, ArrayData::Short(_))
    )
}

/// Narrows an `int` to a sub-int field type; other values must already
/// have the field's type.
fn coerce_to_field(field_type: &FieldType, value: Value) -> Option<Value> {
    match (field_type, value) {
        (FieldType::Boolean, Value::Int(v)) => Some(Value::Int(v & 1)),
        (FieldType::Byte, Value::Int(v)) => Some(Value::Int(numeric::i2b(v))),
        (FieldType::Char, Value::Int(v)) => Some(Value::Int(numeric::i2c(v))),
        (FieldType::Short, Value::Int(v)) => Some(Value::Int(numeric::i2s(v))),
        (FieldType::Int, Value::Int(_))
        | (FieldType::Long, Value::Long(_))
        | (FieldType::Float, Value::Float(_))
        | (FieldType::Double, Value::Double(_)) => Some(value),
        (t, Value::Null | Value::Reference(_)) if t.is_reference() => Some(value),
        _ => None,
    }
}

fn pop_return(frame: &mut Frame, kind: ReturnKind) -> ExecResult<Option<Value>> {
    Ok(match kind {
        ReturnKind::Void => None,
        ReturnKind::Int => Some(Value::Int(frame.pop_int()?)),
        ReturnKind::Long => Some(Value::Long(frame.pop_long()?)),
        ReturnKind::Float => Some(Value::Float(frame.pop_float()?)),
        ReturnKind::Double => Some(Value::Double(frame.pop_double()?)),
        ReturnKind::Reference => Some(Value::from_object(frame.pop_reference()?)),
    })
}

fn convert(from: NumKind, to: NumKind, value: Value) -> Option<Value> {
    use NumKind::*;
    Some(match (from, to, value) {
        (Int, Long, Value::Int(v)) => Value::Long(v as i64),
        (Int, Float, Value::Int(v)) => Value::Float(v as f32),
        (Int, Double, Value::Int(v)) => Value::Double(v as f64),
        (Long, Int, Value::Long(v)) => Value::Int(v as i32),
        (Long, Float, Value::Long(v)) => Value::Float(v as f32),
        (Long, Double, Value::Long(v)) => Value::Double(v as f64),
        (Float, Int, Value::Float(v)) => Value::Int(numeric::f2i(v)),
        (Float, Long, Value::Float(v)) => Value::Long(numeric::f2l(v)),
        (Float, Double, Value::Float(v)) => Value::Double(v as f64),
        (Double, Int, Value::Double(v)) => Value::Int(numeric::d2i(v)),
        (Double, Long, Value::Double(v)) => Value::Long(numeric::d2l(v)),
        (Double, Float, Value::Double(v)) => Value::Float(v as f32),
        _ => return None,
    })
}

fn arith(
    frame: &mut Frame,
    kind: NumKind,
    int: fn(i32, i32) -> i32,
    long: fn(i64, i64) -> i64,
    float: fn(f32, f32) -> f32,
    double: fn(f64, f64) -> f64,
) -> ExecResult<()> {
    let value = match kind {
        NumKind::Int => {
            let b = frame.pop_int()?;
            Value::Int(int(frame.pop_int()?, b))
        }
        NumKind::Long => {
            let b = frame.pop_long()?;
            Value::Long(long(frame.pop_long()?, b))
        }
        NumKind::Float => {
            let b = frame.pop_float()?;
            Value::Float(float(frame.pop_float()?, b))
        }
        NumKind::Double => {
            let b = frame.pop_double()?;
            Value::Double(double(frame.pop_double()?, b))
        }
    };
    frame.push(value)
}

fn divide(
    frame: &mut Frame,
    kind: NumKind,
    int: fn(i32, i32) -> Option<i32>,
    long: fn(i64, i64) -> Option<i64>,
    float: fn(f32, f32) -> f32,
    double: fn(f64, f64) -> f64,
) -> ExecResult<()> {
    let by_zero = || Throw::raise(ExceptionKind::Arithmetic, "/ by zero");
    let value = match kind {
        NumKind::Int => {
            let b = frame.pop_int()?;
            Value::Int(int(frame.pop_int()?, b).ok_or_else(by_zero)?)
        }
        NumKind::Long => {
            let b = frame.pop_long()?;
            Value::Long(long(frame.pop_long()?, b).ok_or_else(by_zero)?)
        }
        NumKind::Float => {
            let b = frame.pop_float()?;
            Value::Float(float(frame.pop_float()?, b))
        }
        NumKind::Double => {
            let b = frame.pop_double()?;
            Value::Double(double(frame.pop_double()?, b))
        }
    };
    frame.push(value)
}

fn shift(frame: &mut Frame, kind: IntKind, int: fn(i32, i32) -> i32, long: fn(i64, i32) -> i64) -> ExecResult<()> {
    let distance = frame.pop_int()?;
    let value = match kind {
        IntKind::Int => Value::Int(int(frame.pop_int()?, distance)),
        IntKind::Long => Value::Long(long(frame.pop_long()?, distance)),
    };
    frame.push(value)
}

fn bitwise(frame: &mut Frame, kind: IntKind, int: fn(i32, i32) -> i32, long: fn(i64, i64) -> i64) -> ExecResult<()> {
    let value = match kind {
        IntKind::Int => {
            let b = frame.pop_int()?;
            Value::Int(int(frame.pop_int()?, b))
        }
        IntKind::Long => {
            let b = frame.pop_long()?;
            Value::Long(long(frame.pop_long()?, b))
        }
    };
    frame.push(value)
}

/// Pops values covering exactly `words` stack words, returned in push
/// order. `long` and `double` count as two words.
fn pop_words(frame: &mut Frame, words: usize) -> ExecResult<ArrayVec<Value, 2>> {
    let mut values = ArrayVec::new();
    let mut covered = 0;
    while covered < words {
        let value = frame.pop()?;
        covered += value.category();
        values.push(value);
    }
    if covered != words {
        return Err(frame.verify_error("stack shuffle splits a category 2 value"));
    }
    values.reverse();
    Ok(values)
}

/// The `dup` family: copies the top `copy` words and inserts the copy
/// beneath the `skip` words below them.
fn dup_words(frame: &mut Frame, copy: usize, skip: usize) -> ExecResult<()> {
    let top = pop_words(frame, copy)?;
    let below = pop_words(frame, skip)?;
    for value in top.iter().chain(below.iter()).chain(top.iter()) {
        frame.push(*value)?;
    }
    Ok(())
}
