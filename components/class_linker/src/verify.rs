//! Structural verification of method bodies.
//!
//! Checks everything that can be decided from one method in isolation:
//! decodability, local-variable bounds, operand tags of pool references,
//! return instructions against the descriptor, and exception-table ranges.
//! Type-state (stack map) verification is not performed.

use crate::runtime_class::{Handler, MethodCode};
use bytecode_system::{decode, Opcode, ReturnKind};
use classfile::constant_pool::tags;
use classfile::{
    ConstantPool, ConstantPoolEntry, FieldType, MethodAccess, MethodDescriptor, MethodInfo,
};
use core_types::{VmError, VmResult};
use std::sync::Arc;

/// A method that passed verification, ready to be attached to its class.
#[derive(Debug)]
pub(crate) struct PreparedMethod {
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
    pub parsed: MethodDescriptor,
    pub access: MethodAccess,
    pub code: Option<Arc<MethodCode>>,
}

impl PreparedMethod {
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    pub fn is_private(&self) -> bool {
        self.access.contains(MethodAccess::PRIVATE)
    }

    /// Initializers and static methods never take part in virtual dispatch.
    pub fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_private() && !self.name.starts_with('<')
    }
}

fn verify_error(class: &str, name: &str, descriptor: &str, message: impl std::fmt::Display) -> VmError {
    VmError::Verify(format!("{}.{}{}: {}", class, name, descriptor, message))
}

fn expected_return(descriptor: &MethodDescriptor) -> ReturnKind {
    match &descriptor.ret {
        None => ReturnKind::Void,
        Some(FieldType::Long) => ReturnKind::Long,
        Some(FieldType::Float) => ReturnKind::Float,
        Some(FieldType::Double) => ReturnKind::Double,
        Some(t) if t.is_reference() => ReturnKind::Reference,
        Some(_) => ReturnKind::Int,
    }
}

/// Verifies `method` of `class_name` and decodes its body.
pub(crate) fn prepare_method(
    pool: &ConstantPool,
    class_name: &str,
    is_interface: bool,
    method: &MethodInfo,
) -> VmResult<PreparedMethod> {
    let name = pool.utf8(method.name_index)?;
    let descriptor = pool.utf8(method.descriptor_index)?;
    let parsed = MethodDescriptor::parse(descriptor)?;
    let access = method.access;
    let err = |m: String| verify_error(class_name, name, descriptor, m);

    let bodiless = access.intersects(MethodAccess::ABSTRACT | MethodAccess::NATIVE);
    if access.contains(MethodAccess::ABSTRACT)
        && access.intersects(MethodAccess::FINAL | MethodAccess::PRIVATE | MethodAccess::STATIC)
    {
        return Err(err("abstract method with final, private or static".into()));
    }
    if is_interface && name == "<init>" {
        return Err(err("interface declares an instance initializer".into()));
    }
    if name == "<init>" && (parsed.ret.is_some() || access.contains(MethodAccess::STATIC)) {
        return Err(err("instance initializer must be a non-static void method".into()));
    }
    if name == "<clinit>" && parsed.ret.is_some() {
        return Err(err("static initializer must return void".into()));
    }

    let code = match (method.code(), bodiless) {
        (Some(_), true) => return Err(err("abstract or native method has a Code attribute".into())),
        (None, false) => return Err(err("missing Code attribute".into())),
        (None, true) => None,
        (Some(attr), false) => {
            let decoded = decode(&attr.code).map_err(|e| err(e.to_string()))?;
            let max_locals = attr.max_locals as usize;
            let arg_slots = parsed.arg_slots() + usize::from(!access.contains(MethodAccess::STATIC));
            if max_locals < arg_slots {
                return Err(err(format!(
                    "max_locals {} is smaller than the {} argument slots",
                    max_locals, arg_slots
                )));
            }

            let expected = expected_return(&parsed);
            for insn in &decoded.instructions {
                if let Some((index, width)) = insn.opcode.local_access() {
                    if index as usize + width as usize > max_locals {
                        return Err(err(format!(
                            "local {} out of range at pc {} (max_locals {})",
                            index, insn.pc, max_locals
                        )));
                    }
                }
                if let Opcode::Return(kind) = insn.opcode {
                    if kind != expected {
                        return Err(err(format!(
                            "{:?} return at pc {} does not match descriptor",
                            kind, insn.pc
                        )));
                    }
                }
                check_pool_operand(pool, &insn.opcode)
                    .map_err(|m| err(format!("pc {}: {}", insn.pc, m)))?;
            }

            let mut handlers = Vec::with_capacity(attr.exception_table.len());
            for entry in &attr.exception_table {
                let bounds = (
                    decoded.index_of_pc(entry.start_pc as usize),
                    decoded.boundary_index(entry.end_pc as usize),
                    decoded.index_of_pc(entry.handler_pc as usize),
                );
                let (start, end, handler) = match bounds {
                    (Some(s), Some(e), Some(h)) if s < e => (s, e, h),
                    _ => {
                        return Err(err(format!(
                            "bad exception table entry [{}, {}) -> {}",
                            entry.start_pc, entry.end_pc, entry.handler_pc
                        )))
                    }
                };
                handlers.push(Handler {
                    start,
                    end,
                    handler,
                    catch_type: (entry.catch_type != 0).then_some(entry.catch_type),
                });
            }

            Some(Arc::new(MethodCode {
                max_stack: attr.max_stack as usize,
                max_locals,
                decoded,
                handlers,
                line_numbers: attr.line_numbers(),
            }))
        }
    };

    Ok(PreparedMethod {
        name: Arc::from(name),
        descriptor: Arc::from(descriptor),
        parsed,
        access,
        code,
    })
}

fn tag_of(pool: &ConstantPool, index: u16) -> Result<&ConstantPoolEntry, String> {
    pool.get(index).map_err(|e| e.to_string())
}

fn check_pool_operand(pool: &ConstantPool, opcode: &Opcode) -> Result<(), String> {
    let expect = |index: u16, allowed: &[u8], what: &str| -> Result<(), String> {
        let entry = tag_of(pool, index)?;
        if allowed.contains(&entry.tag()) {
            Ok(())
        } else {
            Err(format!(
                "{} operand #{} is {}, expected tag {}",
                what,
                index,
                entry.tag_name(),
                allowed
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(" or tag ")
            ))
        }
    };

    match *opcode {
        Opcode::Ldc(i) => {
            let entry = tag_of(pool, i)?;
            let wide = matches!(entry, ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_));
            if !entry.is_loadable() || wide {
                return Err(format!("ldc operand #{} is {}", i, entry.tag_name()));
            }
            Ok(())
        }
        Opcode::Ldc2(i) => expect(i, &[tags::LONG, tags::DOUBLE], "ldc2_w"),
        Opcode::GetStatic(i) | Opcode::PutStatic(i) | Opcode::GetField(i) | Opcode::PutField(i) => {
            expect(i, &[tags::FIELDREF], "field access")
        }
        Opcode::InvokeVirtual(i) => {
            expect(i, &[tags::METHODREF], "invokevirtual")?;
            no_initializer(pool, i)
        }
        Opcode::InvokeStatic(i) => {
            expect(i, &[tags::METHODREF, tags::INTERFACE_METHODREF], "invokestatic")?;
            no_initializer(pool, i)
        }
        Opcode::InvokeSpecial(i) => {
            expect(i, &[tags::METHODREF, tags::INTERFACE_METHODREF], "invokespecial")?;
            let name = pool.member_ref(i).map_err(|e| e.to_string())?.name;
            if name == "<clinit>" {
                return Err("invokespecial of <clinit>".to_string());
            }
            Ok(())
        }
        Opcode::InvokeInterface(i, count) => {
            expect(i, &[tags::INTERFACE_METHODREF], "invokeinterface")?;
            no_initializer(pool, i)?;
            let member = pool.member_ref(i).map_err(|e| e.to_string())?;
            let desc = MethodDescriptor::parse(member.descriptor).map_err(|e| e.to_string())?;
            if count as usize != desc.arg_slots() + 1 {
                return Err(format!(
                    "invokeinterface count {} does not match {}",
                    count, member.descriptor
                ));
            }
            Ok(())
        }
        Opcode::InvokeDynamic(i) => expect(i, &[tags::INVOKE_DYNAMIC], "invokedynamic"),
        Opcode::New(i) | Opcode::ANewArray(i) | Opcode::CheckCast(i) | Opcode::InstanceOf(i) => {
            expect(i, &[tags::CLASS], "class operand")
        }
        Opcode::MultiANewArray(i, dims) => {
            expect(i, &[tags::CLASS], "multianewarray")?;
            let name = pool.class_name(i).map_err(|e| e.to_string())?;
            let depth = name.bytes().take_while(|b| *b == b'[').count();
            if depth < dims as usize {
                return Err(format!("multianewarray of {} with {} dimensions", name, dims));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn no_initializer(pool: &ConstantPool, index: u16) -> Result<(), String> {
    let name = pool.member_ref(index).map_err(|e| e.to_string())?.name;
    if name.starts_with('<') {
        Err(format!("{} may only be invoked with invokespecial", name))
    } else {
        Ok(())
    }
}
