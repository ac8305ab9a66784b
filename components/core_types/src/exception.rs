//! Exceptions raised by the machine inside interpreted code.
//!
//! These correspond to the built-in throwable classes the interpreter
//! instantiates itself (as opposed to exceptions created by `athrow` on
//! objects the program allocated).

/// The kind of exception the interpreter raises on a failed runtime check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// Field access, method call, `athrow` or monitor operation on null
    NullPointer,
    /// Array index outside `[0, length)`
    ArrayIndexOutOfBounds,
    /// Integer division or remainder by zero
    Arithmetic,
    /// `checkcast` to an incompatible type
    ClassCast,
    /// Array created with a negative length
    NegativeArraySize,
    /// `aastore` of a value incompatible with the array's component type
    ArrayStore,
    /// `monitorexit` by a thread that does not own the monitor
    IllegalMonitorState,
}

impl ExceptionKind {
    /// Binary name of the throwable class for this kind.
    pub fn class_name(self) -> &'static str {
        match self {
            ExceptionKind::NullPointer => "java/lang/NullPointerException",
            ExceptionKind::ArrayIndexOutOfBounds => "java/lang/ArrayIndexOutOfBoundsException",
            ExceptionKind::Arithmetic => "java/lang/ArithmeticException",
            ExceptionKind::ClassCast => "java/lang/ClassCastException",
            ExceptionKind::NegativeArraySize => "java/lang/NegativeArraySizeException",
            ExceptionKind::ArrayStore => "java/lang/ArrayStoreException",
            ExceptionKind::IllegalMonitorState => "java/lang/IllegalMonitorStateException",
        }
    }

    /// All kinds, in declaration order.
    pub fn all() -> &'static [ExceptionKind] {
        &[
            ExceptionKind::NullPointer,
            ExceptionKind::ArrayIndexOutOfBounds,
            ExceptionKind::Arithmetic,
            ExceptionKind::ClassCast,
            ExceptionKind::NegativeArraySize,
            ExceptionKind::ArrayStore,
            ExceptionKind::IllegalMonitorState,
        ]
    }
}
