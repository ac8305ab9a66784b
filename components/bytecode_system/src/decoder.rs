//! Bytecode decoder.
//!
//! Turns a raw `Code` array into a [`DecodedCode`]. Decoding is two-pass: the
//! first pass reads every instruction and records branch targets as byte
//! offsets, the second maps those offsets to instruction indices and rejects
//! any that do not land on the start of an instruction.

use crate::instruction::{DecodedCode, Instruction, SwitchCases, SwitchTable};
use crate::opcode::{
    ArrayKind, Cond, IntKind, LocalKind, NumKind, Opcode, PrimitiveType, ReturnKind,
};
use classfile::opcodes as op;
use core_types::VmError;
use thiserror::Error;

/// Structural defect found while decoding a method body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The code array is empty
    #[error("empty code array")]
    Empty,
    /// An opcode byte has no assigned instruction
    #[error("unknown opcode 0x{opcode:02x} at pc {pc}")]
    UnknownOpcode {
        /// Offset of the instruction
        pc: usize,
        /// The opcode byte
        opcode: u8,
    },
    /// Operands run past the end of the code
    #[error("instruction at pc {pc} is truncated")]
    Truncated {
        /// Offset of the instruction
        pc: usize,
    },
    /// Branch or switch target outside the code or inside an instruction
    #[error("branch at pc {pc} targets {target}, which is not an instruction start")]
    BadTarget {
        /// Offset of the branching instruction
        pc: usize,
        /// Absolute target offset
        target: i64,
    },
    /// `wide` applied to an instruction that has no wide form
    #[error("wide at pc {pc} modifies opcode 0x{opcode:02x}")]
    InvalidWide {
        /// Offset of the `wide` prefix
        pc: usize,
        /// The modified opcode
        opcode: u8,
    },
    /// Malformed operand (switch bounds, array type, counts)
    #[error("invalid operand at pc {pc}: {reason}")]
    InvalidOperand {
        /// Offset of the instruction
        pc: usize,
        /// What is wrong
        reason: String,
    },
    /// The last instruction lets control run off the end of the code
    #[error("control falls off the end of the code")]
    FallsOffEnd,
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        VmError::Verify(err.to_string())
    }
}

struct Cursor<'a> {
    code: &'a [u8],
    pos: usize,
    start: usize,
}

impl<'a> Cursor<'a> {
    fn u1(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .code
            .get(self.pos)
            .ok_or(DecodeError::Truncated { pc: self.start })?;
        self.pos += 1;
        Ok(b)
    }

    fn i1(&mut self) -> Result<i8, DecodeError> {
        Ok(self.u1()? as i8)
    }

    fn u2(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes([self.u1()?, self.u1()?]))
    }

    fn i2(&mut self) -> Result<i16, DecodeError> {
        Ok(self.u2()? as i16)
    }

    fn i4(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes([self.u1()?, self.u1()?, self.u1()?, self.u1()?]))
    }

    fn remaining(&self) -> usize {
        self.code.len().saturating_sub(self.pos)
    }

    /// Absolute byte target of a relative branch offset.
    fn target(&self, offset: i64) -> Result<usize, DecodeError> {
        let target = self.start as i64 + offset;
        if target < 0 || target >= self.code.len() as i64 {
            return Err(DecodeError::BadTarget {
                pc: self.start,
                target,
            });
        }
        Ok(target as usize)
    }

    fn branch2(&mut self) -> Result<usize, DecodeError> {
        let offset = self.i2()? as i64;
        self.target(offset)
    }

    fn branch4(&mut self) -> Result<usize, DecodeError> {
        let offset = self.i4()? as i64;
        self.target(offset)
    }
}

/// Decodes a method's code array.
///
/// # Examples
///
/// ```
/// use bytecode_system::{decode, Opcode, NumKind, ReturnKind};
///
/// // iconst_2; iconst_3; iadd; ireturn
/// let code = decode(&[0x05, 0x06, 0x60, 0xac]).unwrap();
/// assert_eq!(code.len(), 4);
/// assert_eq!(code.instructions[2].opcode, Opcode::Add(NumKind::Int));
/// assert_eq!(code.instructions[3].opcode, Opcode::Return(ReturnKind::Int));
///
/// // goto into the middle of itself
/// assert!(decode(&[0xa7, 0x00, 0x01]).is_err());
/// ```
pub fn decode(code: &[u8]) -> Result<DecodedCode, DecodeError> {
    if code.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut instructions = Vec::new();
    let mut switch_tables = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let mut cursor = Cursor {
            code,
            pos: pc,
            start: pc,
        };
        let opcode = decode_one(&mut cursor, &mut switch_tables)?;
        instructions.push(Instruction::new(opcode, pc as u16));
        pc = cursor.pos;
    }

    let mut decoded = DecodedCode::new(instructions, Vec::new(), code.len());

    // Second pass: byte offsets to instruction indices.
    let lookup = |decoded: &DecodedCode, pc: u16, target: usize| {
        decoded
            .index_of_pc(target)
            .ok_or(DecodeError::BadTarget {
                pc: pc as usize,
                target: target as i64,
            })
    };
    for i in 0..decoded.instructions.len() {
        let insn = decoded.instructions[i];
        let mut opcode = insn.opcode;
        if let Some(target) = opcode.branch_target_mut() {
            *target = lookup(&decoded, insn.pc, *target)?;
        }
        if let Opcode::TableSwitch(t) | Opcode::LookupSwitch(t) = opcode {
            for target in switch_tables[t].targets_mut() {
                *target = lookup(&decoded, insn.pc, *target)?;
            }
        }
        decoded.instructions[i].opcode = opcode;
    }
    decoded.switch_tables = switch_tables;

    match decoded.instructions.last() {
        Some(last) if last.opcode.ends_block() => Ok(decoded),
        _ => Err(DecodeError::FallsOffEnd),
    }
}

fn decode_one(
    c: &mut Cursor<'_>,
    switch_tables: &mut Vec<SwitchTable>,
) -> Result<Opcode, DecodeError> {
    let pc = c.start;
    let byte = c.u1()?;
    let opcode = match byte {
        op::NOP => Opcode::Nop,
        op::ACONST_NULL => Opcode::AconstNull,
        op::ICONST_M1..=op::ICONST_5 => Opcode::Iconst(byte as i32 - op::ICONST_0 as i32),
        op::LCONST_0 | op::LCONST_1 => Opcode::Lconst((byte - op::LCONST_0) as i64),
        op::FCONST_0..=op::FCONST_2 => Opcode::Fconst((byte - op::FCONST_0) as f32),
        op::DCONST_0 | op::DCONST_1 => Opcode::Dconst((byte - op::DCONST_0) as f64),
        op::BIPUSH => Opcode::Iconst(c.i1()? as i32),
        op::SIPUSH => Opcode::Iconst(c.i2()? as i32),
        op::LDC => Opcode::Ldc(c.u1()? as u16),
        op::LDC_W => Opcode::Ldc(c.u2()?),
        op::LDC2_W => Opcode::Ldc2(c.u2()?),

        op::ILOAD..=op::ALOAD => Opcode::Load(local_kind(byte - op::ILOAD), c.u1()? as u16),
        op::ILOAD_0..=op::ALOAD_3 => {
            let n = byte - op::ILOAD_0;
            Opcode::Load(local_kind(n / 4), (n % 4) as u16)
        }
        op::ISTORE..=op::ASTORE => Opcode::Store(local_kind(byte - op::ISTORE), c.u1()? as u16),
        op::ISTORE_0..=op::ASTORE_3 => {
            let n = byte - op::ISTORE_0;
            Opcode::Store(local_kind(n / 4), (n % 4) as u16)
        }
        op::IALOAD..=op::SALOAD => Opcode::ArrayLoad(array_kind(byte - op::IALOAD)),
        op::IASTORE..=op::SASTORE => Opcode::ArrayStore(array_kind(byte - op::IASTORE)),

        op::POP => Opcode::Pop,
        op::POP2 => Opcode::Pop2,
        op::DUP => Opcode::Dup,
        op::DUP_X1 => Opcode::DupX1,
        op::DUP_X2 => Opcode::DupX2,
        op::DUP2 => Opcode::Dup2,
        op::DUP2_X1 => Opcode::Dup2X1,
        op::DUP2_X2 => Opcode::Dup2X2,
        op::SWAP => Opcode::Swap,

        op::IADD..=op::DADD => Opcode::Add(num_kind(byte - op::IADD)),
        op::ISUB..=op::DSUB => Opcode::Sub(num_kind(byte - op::ISUB)),
        op::IMUL..=op::DMUL => Opcode::Mul(num_kind(byte - op::IMUL)),
        op::IDIV..=op::DDIV => Opcode::Div(num_kind(byte - op::IDIV)),
        op::IREM..=op::DREM => Opcode::Rem(num_kind(byte - op::IREM)),
        op::INEG..=op::DNEG => Opcode::Neg(num_kind(byte - op::INEG)),
        op::ISHL | op::LSHL => Opcode::Shl(int_kind(byte - op::ISHL)),
        op::ISHR | op::LSHR => Opcode::Shr(int_kind(byte - op::ISHR)),
        op::IUSHR | op::LUSHR => Opcode::Ushr(int_kind(byte - op::IUSHR)),
        op::IAND | op::LAND => Opcode::And(int_kind(byte - op::IAND)),
        op::IOR | op::LOR => Opcode::Or(int_kind(byte - op::IOR)),
        op::IXOR | op::LXOR => Opcode::Xor(int_kind(byte - op::IXOR)),
        op::IINC => Opcode::Iinc(c.u1()? as u16, c.i1()? as i16),

        op::I2L => Opcode::Convert(NumKind::Int, NumKind::Long),
        op::I2F => Opcode::Convert(NumKind::Int, NumKind::Float),
        op::I2D => Opcode::Convert(NumKind::Int, NumKind::Double),
        op::L2I => Opcode::Convert(NumKind::Long, NumKind::Int),
        op::L2F => Opcode::Convert(NumKind::Long, NumKind::Float),
        op::L2D => Opcode::Convert(NumKind::Long, NumKind::Double),
        op::F2I => Opcode::Convert(NumKind::Float, NumKind::Int),
        op::F2L => Opcode::Convert(NumKind::Float, NumKind::Long),
        op::F2D => Opcode::Convert(NumKind::Float, NumKind::Double),
        op::D2I => Opcode::Convert(NumKind::Double, NumKind::Int),
        op::D2L => Opcode::Convert(NumKind::Double, NumKind::Long),
        op::D2F => Opcode::Convert(NumKind::Double, NumKind::Float),
        op::I2B => Opcode::I2b,
        op::I2C => Opcode::I2c,
        op::I2S => Opcode::I2s,
        op::LCMP => Opcode::Lcmp,
        op::FCMPL => Opcode::Fcmpl,
        op::FCMPG => Opcode::Fcmpg,
        op::DCMPL => Opcode::Dcmpl,
        op::DCMPG => Opcode::Dcmpg,

        op::IFEQ..=op::IFLE => Opcode::If(cond(byte - op::IFEQ), c.branch2()?),
        op::IF_ICMPEQ..=op::IF_ICMPLE => {
            Opcode::IfICmp(cond(byte - op::IF_ICMPEQ), c.branch2()?)
        }
        op::IF_ACMPEQ => Opcode::IfACmp(true, c.branch2()?),
        op::IF_ACMPNE => Opcode::IfACmp(false, c.branch2()?),
        op::IFNULL => Opcode::IfNull(c.branch2()?),
        op::IFNONNULL => Opcode::IfNonNull(c.branch2()?),
        op::GOTO => Opcode::Goto(c.branch2()?),
        op::GOTO_W => Opcode::Goto(c.branch4()?),
        op::JSR => Opcode::Jsr(c.branch2()?),
        op::JSR_W => Opcode::Jsr(c.branch4()?),
        op::RET => Opcode::Ret(c.u1()? as u16),
        op::TABLESWITCH => {
            skip_padding(c)?;
            let default = c.branch4()?;
            let low = c.i4()?;
            let high = c.i4()?;
            if low > high {
                return Err(DecodeError::InvalidOperand {
                    pc,
                    reason: format!("tableswitch low {} exceeds high {}", low, high),
                });
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count.saturating_mul(4) > c.remaining() {
                return Err(DecodeError::Truncated { pc });
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(c.branch4()?);
            }
            switch_tables.push(SwitchTable {
                default,
                cases: SwitchCases::Table { low, targets },
            });
            Opcode::TableSwitch(switch_tables.len() - 1)
        }
        op::LOOKUPSWITCH => {
            skip_padding(c)?;
            let default = c.branch4()?;
            let npairs = c.i4()?;
            if npairs < 0 {
                return Err(DecodeError::InvalidOperand {
                    pc,
                    reason: format!("lookupswitch with {} pairs", npairs),
                });
            }
            if (npairs as usize).saturating_mul(8) > c.remaining() {
                return Err(DecodeError::Truncated { pc });
            }
            let mut pairs: Vec<(i32, usize)> = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = c.i4()?;
                if let Some(&(prev, _)) = pairs.last() {
                    if key <= prev {
                        return Err(DecodeError::InvalidOperand {
                            pc,
                            reason: "lookupswitch keys are not sorted".to_string(),
                        });
                    }
                }
                pairs.push((key, c.branch4()?));
            }
            switch_tables.push(SwitchTable {
                default,
                cases: SwitchCases::Lookup(pairs),
            });
            Opcode::LookupSwitch(switch_tables.len() - 1)
        }

        op::IRETURN => Opcode::Return(ReturnKind::Int),
        op::LRETURN => Opcode::Return(ReturnKind::Long),
        op::FRETURN => Opcode::Return(ReturnKind::Float),
        op::DRETURN => Opcode::Return(ReturnKind::Double),
        op::ARETURN => Opcode::Return(ReturnKind::Reference),
        op::RETURN => Opcode::Return(ReturnKind::Void),

        op::GETSTATIC => Opcode::GetStatic(c.u2()?),
        op::PUTSTATIC => Opcode::PutStatic(c.u2()?),
        op::GETFIELD => Opcode::GetField(c.u2()?),
        op::PUTFIELD => Opcode::PutField(c.u2()?),
        op::INVOKEVIRTUAL => Opcode::InvokeVirtual(c.u2()?),
        op::INVOKESPECIAL => Opcode::InvokeSpecial(c.u2()?),
        op::INVOKESTATIC => Opcode::InvokeStatic(c.u2()?),
        op::INVOKEINTERFACE => {
            let index = c.u2()?;
            let count = c.u1()?;
            c.u1()?;
            if count == 0 {
                return Err(DecodeError::InvalidOperand {
                    pc,
                    reason: "invokeinterface count is zero".to_string(),
                });
            }
            Opcode::InvokeInterface(index, count)
        }
        op::INVOKEDYNAMIC => {
            let index = c.u2()?;
            c.u2()?;
            Opcode::InvokeDynamic(index)
        }
        op::NEW => Opcode::New(c.u2()?),
        op::NEWARRAY => {
            let code = c.u1()?;
            Opcode::NewArray(PrimitiveType::from_atype(code).ok_or_else(|| {
                DecodeError::InvalidOperand {
                    pc,
                    reason: format!("newarray type code {}", code),
                }
            })?)
        }
        op::ANEWARRAY => Opcode::ANewArray(c.u2()?),
        op::ARRAYLENGTH => Opcode::ArrayLength,
        op::ATHROW => Opcode::AThrow,
        op::CHECKCAST => Opcode::CheckCast(c.u2()?),
        op::INSTANCEOF => Opcode::InstanceOf(c.u2()?),
        op::MONITORENTER => Opcode::MonitorEnter,
        op::MONITOREXIT => Opcode::MonitorExit,
        op::MULTIANEWARRAY => {
            let index = c.u2()?;
            let dims = c.u1()?;
            if dims == 0 {
                return Err(DecodeError::InvalidOperand {
                    pc,
                    reason: "multianewarray with zero dimensions".to_string(),
                });
            }
            Opcode::MultiANewArray(index, dims)
        }
        op::WIDE => {
            let modified = c.u1()?;
            match modified {
                op::ILOAD..=op::ALOAD => Opcode::Load(local_kind(modified - op::ILOAD), c.u2()?),
                op::ISTORE..=op::ASTORE => {
                    Opcode::Store(local_kind(modified - op::ISTORE), c.u2()?)
                }
                op::RET => Opcode::Ret(c.u2()?),
                op::IINC => Opcode::Iinc(c.u2()?, c.i2()?),
                other => return Err(DecodeError::InvalidWide { pc, opcode: other }),
            }
        }
        other => return Err(DecodeError::UnknownOpcode { pc, opcode: other }),
    };
    Ok(opcode)
}

fn skip_padding(c: &mut Cursor<'_>) -> Result<(), DecodeError> {
    while c.pos % 4 != 0 {
        c.u1()?;
    }
    Ok(())
}

fn local_kind(n: u8) -> LocalKind {
    match n {
        0 => LocalKind::Int,
        1 => LocalKind::Long,
        2 => LocalKind::Float,
        3 => LocalKind::Double,
        _ => LocalKind::Reference,
    }
}

fn array_kind(n: u8) -> ArrayKind {
    match n {
        0 => ArrayKind::Int,
        1 => ArrayKind::Long,
        2 => ArrayKind::Float,
        3 => ArrayKind::Double,
        4 => ArrayKind::Reference,
        5 => ArrayKind::Byte,
        6 => ArrayKind::Char,
        _ => ArrayKind::Short,
    }
}

fn num_kind(n: u8) -> NumKind {
    match n {
        0 => NumKind::Int,
        1 => NumKind::Long,
        2 => NumKind::Float,
        _ => NumKind::Double,
    }
}

// Shift and logic opcodes alternate int/long.
fn int_kind(n: u8) -> IntKind {
    if n == 0 {
        IntKind::Int
    } else {
        IntKind::Long
    }
}

fn cond(n: u8) -> Cond {
    match n {
        0 => Cond::Eq,
        1 => Cond::Ne,
        2 => Cond::Lt,
        3 => Cond::Ge,
        4 => Cond::Gt,
        _ => Cond::Le,
    }
}
