//! Class-file assembler.
//!
//! [`ClassBuilder`] produces well-formed class-file bytes from a list of
//! members; [`CodeBuilder`] emits instructions with symbolic labels that are
//! patched once the method body is complete. The runtime builds its bootstrap
//! classes with it, and tests use it to produce programs.

use crate::access_flags::{ClassAccess, FieldAccess, MethodAccess};
use crate::class_file::CLASS_MAGIC;
use crate::constant_pool::{encode_modified_utf8, ConstantPoolEntry};
use crate::descriptor::MethodDescriptor;
use crate::opcodes as op;
use core_types::{VmError, VmResult};
use std::collections::HashMap;

/// Major version written by the builder.
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

const DEFAULT_MAX_STACK: u16 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Field(u16, u16),
    Method(u16, u16),
    InterfaceMethod(u16, u16),
    NameAndType(u16, u16),
}

/// Deduplicating constant pool under construction.
#[derive(Debug, Default)]
pub struct PoolBuilder {
    entries: Vec<ConstantPoolEntry>,
    index: HashMap<PoolKey, u16>,
    overflow: bool,
}

impl PoolBuilder {
    fn intern(&mut self, key: PoolKey, entry: ConstantPoolEntry) -> u16 {
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let wide = matches!(entry, ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_));
        let i = self.push(entry);
        if wide {
            self.entries.push(ConstantPoolEntry::Unusable);
        }
        self.index.insert(key, i);
        i
    }

    fn push(&mut self, entry: ConstantPoolEntry) -> u16 {
        let next = self.entries.len() + 1;
        if next > u16::MAX as usize - 1 {
            self.overflow = true;
        }
        self.entries.push(entry);
        next as u16
    }

    /// Adds (or reuses) a Utf8 entry.
    pub fn utf8(&mut self, s: &str) -> u16 {
        self.intern(PoolKey::Utf8(s.to_string()), ConstantPoolEntry::Utf8(s.to_string()))
    }

    /// Adds an Integer entry.
    pub fn integer(&mut self, v: i32) -> u16 {
        self.intern(PoolKey::Integer(v), ConstantPoolEntry::Integer(v))
    }

    /// Adds a Float entry.
    pub fn float(&mut self, v: f32) -> u16 {
        self.intern(PoolKey::Float(v.to_bits()), ConstantPoolEntry::Float(v))
    }

    /// Adds a Long entry (two slots).
    pub fn long(&mut self, v: i64) -> u16 {
        self.intern(PoolKey::Long(v), ConstantPoolEntry::Long(v))
    }

    /// Adds a Double entry (two slots).
    pub fn double(&mut self, v: f64) -> u16 {
        self.intern(PoolKey::Double(v.to_bits()), ConstantPoolEntry::Double(v))
    }

    /// Adds a Class entry.
    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.intern(PoolKey::Class(name_index), ConstantPoolEntry::Class { name_index })
    }

    /// Adds a String entry.
    pub fn string(&mut self, s: &str) -> u16 {
        let string_index = self.utf8(s);
        self.intern(
            PoolKey::String(string_index),
            ConstantPoolEntry::String { string_index },
        )
    }

    /// Adds a NameAndType entry.
    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.intern(
            PoolKey::NameAndType(name_index, descriptor_index),
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            },
        )
    }

    /// Adds a Fieldref entry.
    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(
            PoolKey::Field(class_index, name_and_type_index),
            ConstantPoolEntry::FieldRef {
                class_index,
                name_and_type_index,
            },
        )
    }

    /// Adds a Methodref entry.
    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(
            PoolKey::Method(class_index, name_and_type_index),
            ConstantPoolEntry::MethodRef {
                class_index,
                name_and_type_index,
            },
        )
    }

    /// Adds an InterfaceMethodref entry.
    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(
            PoolKey::InterfaceMethod(class_index, name_and_type_index),
            ConstantPoolEntry::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            },
        )
    }

    /// Appends an entry without deduplication.
    pub fn raw(&mut self, entry: ConstantPoolEntry) -> u16 {
        let wide = matches!(entry, ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_));
        let i = self.push(entry);
        if wide {
            self.entries.push(ConstantPoolEntry::Unusable);
        }
        i
    }

    fn write(&self, out: &mut Vec<u8>) {
        put_u2(out, (self.entries.len() + 1) as u16);
        for entry in &self.entries {
            match entry {
                ConstantPoolEntry::Unusable => {}
                ConstantPoolEntry::Utf8(s) => {
                    let bytes = encode_modified_utf8(s);
                    out.push(entry.tag());
                    put_u2(out, bytes.len() as u16);
                    out.extend_from_slice(&bytes);
                }
                ConstantPoolEntry::Integer(v) => {
                    out.push(entry.tag());
                    out.extend_from_slice(&v.to_be_bytes());
                }
                ConstantPoolEntry::Float(v) => {
                    out.push(entry.tag());
                    out.extend_from_slice(&v.to_bits().to_be_bytes());
                }
                ConstantPoolEntry::Long(v) => {
                    out.push(entry.tag());
                    out.extend_from_slice(&v.to_be_bytes());
                }
                ConstantPoolEntry::Double(v) => {
                    out.push(entry.tag());
                    out.extend_from_slice(&v.to_bits().to_be_bytes());
                }
                ConstantPoolEntry::Class { name_index } => {
                    out.push(entry.tag());
                    put_u2(out, *name_index);
                }
                ConstantPoolEntry::String { string_index } => {
                    out.push(entry.tag());
                    put_u2(out, *string_index);
                }
                ConstantPoolEntry::FieldRef {
                    class_index: a,
                    name_and_type_index: b,
                }
                | ConstantPoolEntry::MethodRef {
                    class_index: a,
                    name_and_type_index: b,
                }
                | ConstantPoolEntry::InterfaceMethodRef {
                    class_index: a,
                    name_and_type_index: b,
                }
                | ConstantPoolEntry::NameAndType {
                    name_index: a,
                    descriptor_index: b,
                }
                | ConstantPoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index: a,
                    name_and_type_index: b,
                } => {
                    out.push(entry.tag());
                    put_u2(out, *a);
                    put_u2(out, *b);
                }
                ConstantPoolEntry::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    out.push(entry.tag());
                    out.push(*reference_kind);
                    put_u2(out, *reference_index);
                }
                ConstantPoolEntry::MethodType { descriptor_index } => {
                    out.push(entry.tag());
                    put_u2(out, *descriptor_index);
                }
            }
        }
    }
}

fn put_u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Initial value of a constant static field.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// `int`, `short`, `char`, `byte` or `boolean`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `java/lang/String`
    String(String),
}

/// A branch target inside a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug)]
enum Fixup {
    /// 2-byte offset at `at`, relative to the instruction at `base`
    Short { at: usize, base: usize, label: Label },
    /// 4-byte offset at `at`, relative to the instruction at `base`
    Wide { at: usize, base: usize, label: Label },
}

#[derive(Debug)]
struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: u16,
}

/// Emits the body of one method.
///
/// Local-variable usage is tracked automatically; `max_stack` defaults to a
/// fixed bound unless set explicitly.
#[derive(Debug)]
pub struct CodeBuilder<'p> {
    pool: &'p mut PoolBuilder,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    handlers: Vec<PendingHandler>,
    lines: Vec<(u16, u16)>,
    max_stack: u16,
    max_locals: u16,
    error: Option<VmError>,
}

impl<'p> CodeBuilder<'p> {
    fn new(pool: &'p mut PoolBuilder, arg_slots: u16) -> Self {
        Self {
            pool,
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            max_stack: DEFAULT_MAX_STACK,
            max_locals: arg_slots,
            error: None,
        }
    }

    /// Byte offset of the next instruction.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Direct access to the constant pool.
    pub fn pool(&mut self) -> &mut PoolBuilder {
        &mut *self.pool
    }

    /// Overrides the operand-stack bound.
    pub fn max_stack(&mut self, max_stack: u16) -> &mut Self {
        self.max_stack = max_stack;
        self
    }

    /// Raises the local-variable bound to at least `max_locals`.
    pub fn max_locals(&mut self, max_locals: u16) -> &mut Self {
        self.max_locals = self.max_locals.max(max_locals);
        self
    }

    /// Emits a single opcode byte.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    /// Emits a raw byte.
    pub fn u1(&mut self, v: u8) -> &mut Self {
        self.code.push(v);
        self
    }

    /// Emits a raw big-endian 16-bit operand.
    pub fn u2(&mut self, v: u16) -> &mut Self {
        put_u2(&mut self.code, v);
        self
    }

    /// Emits a raw big-endian 32-bit operand.
    pub fn u4(&mut self, v: u32) -> &mut Self {
        put_u4(&mut self.code, v);
        self
    }

    /// Emits an opcode followed by a 16-bit constant pool index.
    pub fn op_u2(&mut self, opcode: u8, index: u16) -> &mut Self {
        self.op(opcode).u2(index)
    }

    /// Records that the following instructions belong to `line`.
    pub fn line(&mut self, line: u16) -> &mut Self {
        self.lines.push((self.pc() as u16, line));
        self
    }

    /// Pushes an int constant with the shortest encoding.
    pub fn iconst(&mut self, v: i32) -> &mut Self {
        match v {
            -1..=5 => self.op((op::ICONST_0 as i32 + v) as u8),
            -128..=127 => self.op(op::BIPUSH).u1(v as i8 as u8),
            -32768..=32767 => self.op(op::SIPUSH).u2(v as i16 as u16),
            _ => {
                let i = self.pool.integer(v);
                self.ldc_index(i)
            }
        }
    }

    /// Pushes a long constant.
    pub fn lconst(&mut self, v: i64) -> &mut Self {
        match v {
            0 => self.op(op::LCONST_0),
            1 => self.op(op::LCONST_1),
            _ => {
                let i = self.pool.long(v);
                self.op_u2(op::LDC2_W, i)
            }
        }
    }

    /// Pushes a float constant.
    pub fn fconst(&mut self, v: f32) -> &mut Self {
        if v.to_bits() == 0.0f32.to_bits() {
            self.op(op::FCONST_0)
        } else if v == 1.0 {
            self.op(op::FCONST_1)
        } else if v == 2.0 {
            self.op(op::FCONST_2)
        } else {
            let i = self.pool.float(v);
            self.ldc_index(i)
        }
    }

    /// Pushes a double constant.
    pub fn dconst(&mut self, v: f64) -> &mut Self {
        if v.to_bits() == 0.0f64.to_bits() {
            self.op(op::DCONST_0)
        } else if v == 1.0 {
            self.op(op::DCONST_1)
        } else {
            let i = self.pool.double(v);
            self.op_u2(op::LDC2_W, i)
        }
    }

    /// Pushes a string literal.
    pub fn ldc_string(&mut self, s: &str) -> &mut Self {
        let i = self.pool.string(s);
        self.ldc_index(i)
    }

    /// Pushes a class literal.
    pub fn ldc_class(&mut self, name: &str) -> &mut Self {
        let i = self.pool.class(name);
        self.ldc_index(i)
    }

    fn ldc_index(&mut self, index: u16) -> &mut Self {
        if index <= u8::MAX as u16 {
            self.op(op::LDC).u1(index as u8)
        } else {
            self.op_u2(op::LDC_W, index)
        }
    }

    fn local(&mut self, short_base: u8, long_op: u8, index: u16, size: u16) -> &mut Self {
        self.max_locals = self.max_locals.max(index + size);
        match index {
            0..=3 => self.op(short_base + index as u8),
            4..=255 => self.op(long_op).u1(index as u8),
            _ => self.op(op::WIDE).op(long_op).u2(index),
        }
    }

    /// `iload`
    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.local(op::ILOAD_0, op::ILOAD, index, 1)
    }

    /// `lload`
    pub fn lload(&mut self, index: u16) -> &mut Self {
        self.local(op::LLOAD_0, op::LLOAD, index, 2)
    }

    /// `fload`
    pub fn fload(&mut self, index: u16) -> &mut Self {
        self.local(op::FLOAD_0, op::FLOAD, index, 1)
    }

    /// `dload`
    pub fn dload(&mut self, index: u16) -> &mut Self {
        self.local(op::DLOAD_0, op::DLOAD, index, 2)
    }

    /// `aload`
    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.local(op::ALOAD_0, op::ALOAD, index, 1)
    }

    /// `istore`
    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.local(op::ISTORE_0, op::ISTORE, index, 1)
    }

    /// `lstore`
    pub fn lstore(&mut self, index: u16) -> &mut Self {
        self.local(op::LSTORE_0, op::LSTORE, index, 2)
    }

    /// `fstore`
    pub fn fstore(&mut self, index: u16) -> &mut Self {
        self.local(op::FSTORE_0, op::FSTORE, index, 1)
    }

    /// `dstore`
    pub fn dstore(&mut self, index: u16) -> &mut Self {
        self.local(op::DSTORE_0, op::DSTORE, index, 2)
    }

    /// `astore`
    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.local(op::ASTORE_0, op::ASTORE, index, 1)
    }

    /// `iinc`, widened when the operands need it.
    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        self.max_locals = self.max_locals.max(index + 1);
        if index <= u8::MAX as u16 && (-128..=127).contains(&delta) {
            self.op(op::IINC).u1(index as u8).u1(delta as i8 as u8)
        } else {
            self.op(op::WIDE).op(op::IINC).u2(index).u2(delta as u16)
        }
    }

    /// `getstatic`
    pub fn getstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let i = self.pool.field_ref(owner, name, descriptor);
        self.op_u2(op::GETSTATIC, i)
    }

    /// `putstatic`
    pub fn putstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let i = self.pool.field_ref(owner, name, descriptor);
        self.op_u2(op::PUTSTATIC, i)
    }

    /// `getfield`
    pub fn getfield(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let i = self.pool.field_ref(owner, name, descriptor);
        self.op_u2(op::GETFIELD, i)
    }

    /// `putfield`
    pub fn putfield(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let i = self.pool.field_ref(owner, name, descriptor);
        self.op_u2(op::PUTFIELD, i)
    }

    /// `invokestatic` on a class method.
    pub fn invokestatic(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let i = self.pool.method_ref(owner, name, descriptor);
        self.op_u2(op::INVOKESTATIC, i)
    }

    /// `invokevirtual`
    pub fn invokevirtual(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let i = self.pool.method_ref(owner, name, descriptor);
        self.op_u2(op::INVOKEVIRTUAL, i)
    }

    /// `invokespecial`
    pub fn invokespecial(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let i = self.pool.method_ref(owner, name, descriptor);
        self.op_u2(op::INVOKESPECIAL, i)
    }

    /// `invokeinterface`; the argument count operand is derived from the
    /// descriptor.
    pub fn invokeinterface(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let count = match MethodDescriptor::parse(descriptor) {
            Ok(d) => d.arg_slots() + 1,
            Err(e) => {
                self.error.get_or_insert(e);
                1
            }
        };
        let i = self.pool.interface_method_ref(owner, name, descriptor);
        self.op_u2(op::INVOKEINTERFACE, i).u1(count as u8).u1(0)
    }

    /// `new`
    pub fn new_object(&mut self, class: &str) -> &mut Self {
        let i = self.pool.class(class);
        self.op_u2(op::NEW, i)
    }

    /// `newarray` with an [`atype`](crate::opcodes::atype) code.
    pub fn newarray(&mut self, atype: u8) -> &mut Self {
        self.op(op::NEWARRAY).u1(atype)
    }

    /// `anewarray`
    pub fn anewarray(&mut self, component: &str) -> &mut Self {
        let i = self.pool.class(component);
        self.op_u2(op::ANEWARRAY, i)
    }

    /// `multianewarray`
    pub fn multianewarray(&mut self, array_descriptor: &str, dimensions: u8) -> &mut Self {
        let i = self.pool.class(array_descriptor);
        self.op_u2(op::MULTIANEWARRAY, i).u1(dimensions)
    }

    /// `checkcast`
    pub fn checkcast(&mut self, class: &str) -> &mut Self {
        let i = self.pool.class(class);
        self.op_u2(op::CHECKCAST, i)
    }

    /// `instanceof`
    pub fn instanceof(&mut self, class: &str) -> &mut Self {
        let i = self.pool.class(class);
        self.op_u2(op::INSTANCEOF, i)
    }

    /// Creates an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current pc.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let pc = self.pc();
        match self.labels.get_mut(label.0) {
            Some(slot) if slot.is_none() => *slot = Some(pc),
            Some(_) => {
                self.error
                    .get_or_insert(VmError::Internal(format!("label {} bound twice", label.0)));
            }
            None => {
                self.error
                    .get_or_insert(VmError::Internal(format!("unknown label {}", label.0)));
            }
        }
        self
    }

    /// Emits a branch instruction with a 16-bit offset (`if*`, `goto`, `jsr`).
    pub fn branch(&mut self, opcode: u8, target: Label) -> &mut Self {
        let base = self.pc();
        self.op(opcode);
        self.fixups.push(Fixup::Short {
            at: self.pc(),
            base,
            label: target,
        });
        self.u2(0)
    }

    /// Emits `goto_w` or `jsr_w`.
    pub fn branch_wide(&mut self, opcode: u8, target: Label) -> &mut Self {
        let base = self.pc();
        self.op(opcode);
        self.fixups.push(Fixup::Wide {
            at: self.pc(),
            base,
            label: target,
        });
        self.u4(0)
    }

    /// `goto`
    pub fn goto(&mut self, target: Label) -> &mut Self {
        self.branch(op::GOTO, target)
    }

    fn pad_switch(&mut self) {
        while self.pc() % 4 != 0 {
            self.code.push(0);
        }
    }

    fn wide_target(&mut self, base: usize, label: Label) {
        self.fixups.push(Fixup::Wide {
            at: self.pc(),
            base,
            label,
        });
        self.u4(0);
    }

    /// `tableswitch` over `low..=low + targets.len() - 1`.
    pub fn tableswitch(&mut self, low: i32, default: Label, targets: &[Label]) -> &mut Self {
        let base = self.pc();
        self.op(op::TABLESWITCH);
        self.pad_switch();
        self.wide_target(base, default);
        let high = low.wrapping_add(targets.len() as i32 - 1);
        self.u4(low as u32).u4(high as u32);
        for &t in targets {
            self.wide_target(base, t);
        }
        self
    }

    /// `lookupswitch`; pairs are sorted by key before emission.
    pub fn lookupswitch(&mut self, default: Label, pairs: &[(i32, Label)]) -> &mut Self {
        let base = self.pc();
        self.op(op::LOOKUPSWITCH);
        self.pad_switch();
        self.wide_target(base, default);
        let mut sorted = pairs.to_vec();
        sorted.sort_by_key(|(k, _)| *k);
        self.u4(sorted.len() as u32);
        for (key, t) in sorted {
            self.u4(key as u32);
            self.wide_target(base, t);
        }
        self
    }

    /// Adds an exception table row; `catch_type` of `None` catches everything.
    pub fn try_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> &mut Self {
        let catch_type = catch_type.map_or(0, |c| self.pool.class(c));
        self.handlers.push(PendingHandler {
            start,
            end,
            handler,
            catch_type,
        });
        self
    }

    fn resolve(&self, label: Label) -> VmResult<usize> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| VmError::Internal(format!("label {} was never bound", label.0)))
    }

    fn finish(mut self) -> VmResult<Vec<u8>> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for fixup in &self.fixups {
            match *fixup {
                Fixup::Short { at, base, label } => {
                    let offset = self.resolve(label)? as i64 - base as i64;
                    let offset = i16::try_from(offset).map_err(|_| {
                        VmError::Internal(format!("branch offset {} exceeds 16 bits", offset))
                    })?;
                    self.code[at..at + 2].copy_from_slice(&offset.to_be_bytes());
                }
                Fixup::Wide { at, base, label } => {
                    let offset = (self.resolve(label)? as i64 - base as i64) as i32;
                    self.code[at..at + 4].copy_from_slice(&offset.to_be_bytes());
                }
            }
        }

        let mut body = Vec::new();
        put_u2(&mut body, self.max_stack);
        put_u2(&mut body, self.max_locals);
        put_u4(&mut body, self.code.len() as u32);
        body.extend_from_slice(&self.code);
        put_u2(&mut body, self.handlers.len() as u16);
        for h in &self.handlers {
            put_u2(&mut body, self.resolve(h.start)? as u16);
            put_u2(&mut body, self.resolve(h.end)? as u16);
            put_u2(&mut body, self.resolve(h.handler)? as u16);
            put_u2(&mut body, h.catch_type);
        }
        if self.lines.is_empty() {
            put_u2(&mut body, 0);
        } else {
            put_u2(&mut body, 1);
            let name = self.pool.utf8("LineNumberTable");
            put_u2(&mut body, name);
            put_u4(&mut body, 2 + 4 * self.lines.len() as u32);
            put_u2(&mut body, self.lines.len() as u16);
            for (pc, line) in &self.lines {
                put_u2(&mut body, *pc);
                put_u2(&mut body, *line);
            }
        }
        Ok(body)
    }
}

struct MemberSpec {
    access: u16,
    name: u16,
    descriptor: u16,
    attributes: Vec<(u16, Vec<u8>)>,
}

/// Builds one class file.
///
/// # Examples
///
/// ```
/// use classfile::{ClassBuilder, ClassFileReader, MethodAccess};
///
/// let mut builder = ClassBuilder::new("Adder", Some("java/lang/Object"));
/// builder.method(MethodAccess::PUBLIC | MethodAccess::STATIC, "add", "(II)I", |code| {
///     code.iload(0).iload(1).op(classfile::opcodes::IADD).op(classfile::opcodes::IRETURN);
/// });
/// let class = ClassFileReader::parse(&builder.build().unwrap()).unwrap();
/// let add = class.find_method("add", "(II)I").unwrap();
/// assert_eq!(add.code().unwrap().max_locals, 2);
/// ```
pub struct ClassBuilder {
    pool: PoolBuilder,
    access: ClassAccess,
    major_version: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<MemberSpec>,
    methods: Vec<MemberSpec>,
    attributes: Vec<(u16, Vec<u8>)>,
    error: Option<VmError>,
}

impl ClassBuilder {
    /// Starts a public class named `name` extending `super_name`.
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut pool = PoolBuilder::default();
        let this_class = pool.class(name);
        let super_class = super_name.map_or(0, |s| pool.class(s));
        Self {
            pool,
            access: ClassAccess::PUBLIC | ClassAccess::SUPER,
            major_version: DEFAULT_MAJOR_VERSION,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            error: None,
        }
    }

    /// Replaces the class access flags.
    pub fn access(&mut self, access: ClassAccess) -> &mut Self {
        self.access = access;
        self
    }

    /// Sets the major version written to the header.
    pub fn major_version(&mut self, version: u16) -> &mut Self {
        self.major_version = version;
        self
    }

    /// Adds a direct superinterface.
    pub fn interface(&mut self, name: &str) -> &mut Self {
        let i = self.pool.class(name);
        self.interfaces.push(i);
        self
    }

    /// Direct access to the constant pool.
    pub fn pool(&mut self) -> &mut PoolBuilder {
        &mut self.pool
    }

    /// Declares a field.
    pub fn field(&mut self, access: FieldAccess, name: &str, descriptor: &str) -> &mut Self {
        let spec = MemberSpec {
            access: access.bits(),
            name: self.pool.utf8(name),
            descriptor: self.pool.utf8(descriptor),
            attributes: Vec::new(),
        };
        self.fields.push(spec);
        self
    }

    /// Declares a field with a `ConstantValue` attribute.
    pub fn constant_field(
        &mut self,
        access: FieldAccess,
        name: &str,
        descriptor: &str,
        value: ConstantValue,
    ) -> &mut Self {
        let index = match &value {
            ConstantValue::Int(v) => self.pool.integer(*v),
            ConstantValue::Long(v) => self.pool.long(*v),
            ConstantValue::Float(v) => self.pool.float(*v),
            ConstantValue::Double(v) => self.pool.double(*v),
            ConstantValue::String(s) => self.pool.string(s),
        };
        let attr_name = self.pool.utf8("ConstantValue");
        let spec = MemberSpec {
            access: access.bits(),
            name: self.pool.utf8(name),
            descriptor: self.pool.utf8(descriptor),
            attributes: vec![(attr_name, index.to_be_bytes().to_vec())],
        };
        self.fields.push(spec);
        self
    }

    /// Declares a method with a body emitted by `body`.
    pub fn method<F>(&mut self, access: MethodAccess, name: &str, descriptor: &str, body: F) -> &mut Self
    where
        F: FnOnce(&mut CodeBuilder<'_>),
    {
        let arg_slots = match MethodDescriptor::parse(descriptor) {
            Ok(d) => d.arg_slots() + usize::from(!access.contains(MethodAccess::STATIC)),
            Err(e) => {
                self.error.get_or_insert(e);
                0
            }
        };
        let name_index = self.pool.utf8(name);
        let descriptor_index = self.pool.utf8(descriptor);
        let code_name = self.pool.utf8("Code");

        let mut code = CodeBuilder::new(&mut self.pool, arg_slots as u16);
        body(&mut code);
        match code.finish() {
            Ok(bytes) => self.methods.push(MemberSpec {
                access: access.bits(),
                name: name_index,
                descriptor: descriptor_index,
                attributes: vec![(code_name, bytes)],
            }),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Declares a method without a `Code` attribute (abstract or native).
    pub fn bodiless_method(
        &mut self,
        access: MethodAccess,
        name: &str,
        descriptor: &str,
    ) -> &mut Self {
        let spec = MemberSpec {
            access: access.bits(),
            name: self.pool.utf8(name),
            descriptor: self.pool.utf8(descriptor),
            attributes: Vec::new(),
        };
        self.methods.push(spec);
        self
    }

    /// Records the `SourceFile` attribute.
    pub fn source_file(&mut self, file: &str) -> &mut Self {
        let attr_name = self.pool.utf8("SourceFile");
        let index = self.pool.utf8(file);
        self.attributes.push((attr_name, index.to_be_bytes().to_vec()));
        self
    }

    /// Serialises the class.
    pub fn build(&self) -> VmResult<Vec<u8>> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.pool.overflow {
            return Err(VmError::ClassFormat("constant pool overflow".to_string()));
        }
        let mut out = Vec::new();
        put_u4(&mut out, CLASS_MAGIC);
        put_u2(&mut out, 0);
        put_u2(&mut out, self.major_version);
        self.pool.write(&mut out);
        put_u2(&mut out, self.access.bits());
        put_u2(&mut out, self.this_class);
        put_u2(&mut out, self.super_class);
        put_u2(&mut out, self.interfaces.len() as u16);
        for &i in &self.interfaces {
            put_u2(&mut out, i);
        }
        for members in [&self.fields, &self.methods] {
            put_u2(&mut out, members.len() as u16);
            for m in members.iter() {
                put_u2(&mut out, m.access);
                put_u2(&mut out, m.name);
                put_u2(&mut out, m.descriptor);
                write_attributes(&mut out, &m.attributes);
            }
        }
        write_attributes(&mut out, &self.attributes);
        Ok(out)
    }
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[(u16, Vec<u8>)]) {
    put_u2(out, attributes.len() as u16);
    for (name, body) in attributes {
        put_u2(out, *name);
        put_u4(out, body.len() as u32);
        out.extend_from_slice(body);
    }
}
