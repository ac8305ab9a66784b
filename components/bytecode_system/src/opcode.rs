//! Decoded instruction set.
//!
//! Each variant folds together the opcode family it stands for: the typed
//! `iload`/`lload`/.../`aload_3` forms all become [`Opcode::Load`], the
//! `iconst_*`/`bipush`/`sipush` forms become [`Opcode::Iconst`], and so on.
//! Branch operands hold instruction indices rather than byte offsets, so the
//! interpreter can jump without translating pcs.

/// Type of a local-variable load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalKind {
    /// `i*`
    Int,
    /// `l*`
    Long,
    /// `f*`
    Float,
    /// `d*`
    Double,
    /// `a*`
    Reference,
}

impl LocalKind {
    /// Slots occupied in the local-variable array.
    pub fn slots(self) -> u16 {
        match self {
            LocalKind::Long | LocalKind::Double => 2,
            _ => 1,
        }
    }
}

/// Element type of an array load or store.
///
/// `Byte` covers both `byte[]` and `boolean[]`, as the `baload`/`bastore`
/// instructions do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// `iaload`/`iastore`
    Int,
    /// `laload`/`lastore`
    Long,
    /// `faload`/`fastore`
    Float,
    /// `daload`/`dastore`
    Double,
    /// `aaload`/`aastore`
    Reference,
    /// `baload`/`bastore`
    Byte,
    /// `caload`/`castore`
    Char,
    /// `saload`/`sastore`
    Short,
}

/// Primitive element type of `newarray`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// `T_BOOLEAN`
    Boolean,
    /// `T_CHAR`
    Char,
    /// `T_FLOAT`
    Float,
    /// `T_DOUBLE`
    Double,
    /// `T_BYTE`
    Byte,
    /// `T_SHORT`
    Short,
    /// `T_INT`
    Int,
    /// `T_LONG`
    Long,
}

impl PrimitiveType {
    /// Maps a `newarray` type code.
    pub fn from_atype(code: u8) -> Option<Self> {
        Some(match code {
            4 => PrimitiveType::Boolean,
            5 => PrimitiveType::Char,
            6 => PrimitiveType::Float,
            7 => PrimitiveType::Double,
            8 => PrimitiveType::Byte,
            9 => PrimitiveType::Short,
            10 => PrimitiveType::Int,
            11 => PrimitiveType::Long,
            _ => return None,
        })
    }

    /// Descriptor character of the type.
    pub fn descriptor(self) -> char {
        match self {
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Char => 'C',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Short => 'S',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
        }
    }
}

/// Operand type of an arithmetic or conversion instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumKind {
    /// `int`
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
}

/// Operand type of a shift or bitwise instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    /// `int`
    Int,
    /// `long`
    Long,
}

/// Comparison of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    /// `== 0` / `==`
    Eq,
    /// `!= 0` / `!=`
    Ne,
    /// `< 0` / `<`
    Lt,
    /// `>= 0` / `>=`
    Ge,
    /// `> 0` / `>`
    Gt,
    /// `<= 0` / `<=`
    Le,
}

impl Cond {
    /// Evaluates the condition for an ordering of the operands.
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Cond::Eq => ordering == Equal,
            Cond::Ne => ordering != Equal,
            Cond::Lt => ordering == Less,
            Cond::Ge => ordering != Less,
            Cond::Gt => ordering == Greater,
            Cond::Le => ordering != Greater,
        }
    }
}

/// Kind of value a return instruction hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// `return`
    Void,
    /// `ireturn`
    Int,
    /// `lreturn`
    Long,
    /// `freturn`
    Float,
    /// `dreturn`
    Double,
    /// `areturn`
    Reference,
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Opcode {
    /// `nop`
    Nop,
    /// `aconst_null`
    AconstNull,
    /// `iconst_*`, `bipush`, `sipush`
    Iconst(i32),
    /// `lconst_*`
    Lconst(i64),
    /// `fconst_*`
    Fconst(f32),
    /// `dconst_*`
    Dconst(f64),
    /// `ldc`, `ldc_w` with a pool index
    Ldc(u16),
    /// `ldc2_w` with a pool index
    Ldc2(u16),
    /// Typed local load
    Load(LocalKind, u16),
    /// Typed local store
    Store(LocalKind, u16),
    /// Typed array element load
    ArrayLoad(ArrayKind),
    /// Typed array element store
    ArrayStore(ArrayKind),
    /// `pop`
    Pop,
    /// `pop2`
    Pop2,
    /// `dup`
    Dup,
    /// `dup_x1`
    DupX1,
    /// `dup_x2`
    DupX2,
    /// `dup2`
    Dup2,
    /// `dup2_x1`
    Dup2X1,
    /// `dup2_x2`
    Dup2X2,
    /// `swap`
    Swap,
    /// `*add`
    Add(NumKind),
    /// `*sub`
    Sub(NumKind),
    /// `*mul`
    Mul(NumKind),
    /// `*div`
    Div(NumKind),
    /// `*rem`
    Rem(NumKind),
    /// `*neg`
    Neg(NumKind),
    /// `ishl`, `lshl`
    Shl(IntKind),
    /// `ishr`, `lshr`
    Shr(IntKind),
    /// `iushr`, `lushr`
    Ushr(IntKind),
    /// `iand`, `land`
    And(IntKind),
    /// `ior`, `lor`
    Or(IntKind),
    /// `ixor`, `lxor`
    Xor(IntKind),
    /// `iinc index, delta`
    Iinc(u16, i16),
    /// Widening and narrowing numeric conversions (`i2l` .. `d2f`)
    Convert(NumKind, NumKind),
    /// `i2b`
    I2b,
    /// `i2c`
    I2c,
    /// `i2s`
    I2s,
    /// `lcmp`
    Lcmp,
    /// `fcmpl`
    Fcmpl,
    /// `fcmpg`
    Fcmpg,
    /// `dcmpl`
    Dcmpl,
    /// `dcmpg`
    Dcmpg,
    /// `if<cond>` against zero
    If(Cond, usize),
    /// `if_icmp<cond>`
    IfICmp(Cond, usize),
    /// `if_acmpeq` (`true`) or `if_acmpne` (`false`)
    IfACmp(bool, usize),
    /// `ifnull`
    IfNull(usize),
    /// `ifnonnull`
    IfNonNull(usize),
    /// `goto`, `goto_w`
    Goto(usize),
    /// `jsr`, `jsr_w`
    Jsr(usize),
    /// `ret index`
    Ret(u16),
    /// `tableswitch`, indexing the decoded switch tables
    TableSwitch(usize),
    /// `lookupswitch`, indexing the decoded switch tables
    LookupSwitch(usize),
    /// Typed return
    Return(ReturnKind),
    /// `getstatic`
    GetStatic(u16),
    /// `putstatic`
    PutStatic(u16),
    /// `getfield`
    GetField(u16),
    /// `putfield`
    PutField(u16),
    /// `invokevirtual`
    InvokeVirtual(u16),
    /// `invokespecial`
    InvokeSpecial(u16),
    /// `invokestatic`
    InvokeStatic(u16),
    /// `invokeinterface index, count`
    InvokeInterface(u16, u8),
    /// `invokedynamic`
    InvokeDynamic(u16),
    /// `new`
    New(u16),
    /// `newarray`
    NewArray(PrimitiveType),
    /// `anewarray`
    ANewArray(u16),
    /// `arraylength`
    ArrayLength,
    /// `athrow`
    AThrow,
    /// `checkcast`
    CheckCast(u16),
    /// `instanceof`
    InstanceOf(u16),
    /// `monitorenter`
    MonitorEnter,
    /// `monitorexit`
    MonitorExit,
    /// `multianewarray index, dimensions`
    MultiANewArray(u16, u8),
}

impl Opcode {
    /// Branch target of a single-target jump, if this is one.
    pub fn branch_target(&self) -> Option<usize> {
        match *self {
            Opcode::If(_, t)
            | Opcode::IfICmp(_, t)
            | Opcode::IfACmp(_, t)
            | Opcode::IfNull(t)
            | Opcode::IfNonNull(t)
            | Opcode::Goto(t)
            | Opcode::Jsr(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn branch_target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Opcode::If(_, t)
            | Opcode::IfICmp(_, t)
            | Opcode::IfACmp(_, t)
            | Opcode::IfNull(t)
            | Opcode::IfNonNull(t)
            | Opcode::Goto(t)
            | Opcode::Jsr(t) => Some(t),
            _ => None,
        }
    }

    /// Returns true if control never continues with the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Opcode::Goto(_)
                | Opcode::Ret(_)
                | Opcode::TableSwitch(_)
                | Opcode::LookupSwitch(_)
                | Opcode::Return(_)
                | Opcode::AThrow
        )
    }

    /// Constant pool index operand, if the instruction has one.
    pub fn pool_index(&self) -> Option<u16> {
        match *self {
            Opcode::Ldc(i)
            | Opcode::Ldc2(i)
            | Opcode::GetStatic(i)
            | Opcode::PutStatic(i)
            | Opcode::GetField(i)
            | Opcode::PutField(i)
            | Opcode::InvokeVirtual(i)
            | Opcode::InvokeSpecial(i)
            | Opcode::InvokeStatic(i)
            | Opcode::InvokeInterface(i, _)
            | Opcode::InvokeDynamic(i)
            | Opcode::New(i)
            | Opcode::ANewArray(i)
            | Opcode::CheckCast(i)
            | Opcode::InstanceOf(i)
            | Opcode::MultiANewArray(i, _) => Some(i),
            _ => None,
        }
    }

    /// Local-variable slot range `(index, width)` touched by the instruction.
    pub fn local_access(&self) -> Option<(u16, u16)> {
        match *self {
            Opcode::Load(kind, i) | Opcode::Store(kind, i) => Some((i, kind.slots())),
            Opcode::Iinc(i, _) | Opcode::Ret(i) => Some((i, 1)),
            _ => None,
        }
    }

    /// Returns true for the invocation instructions.
    pub fn is_invoke(&self) -> bool {
        matches!(
            self,
            Opcode::InvokeVirtual(_)
                | Opcode::InvokeSpecial(_)
                | Opcode::InvokeStatic(_)
                | Opcode::InvokeInterface(..)
                | Opcode::InvokeDynamic(_)
        )
    }
}
