//! Abrupt completion of interpreted code.

use core_types::{ExceptionKind, ObjectRef, VmError};

/// Why an instruction, invocation or native call did not complete normally.
///
/// `Raise` and `Error` are turned into throwable objects by the unwinder
/// when it first needs to match them against a handler; errors without a
/// throwable counterpart stay fatal to the thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Throw {
    /// An exception object in flight
    Object(ObjectRef),
    /// A runtime check failed
    Raise(ExceptionKind, Option<String>),
    /// A loading, linking or resource failure
    Error(VmError),
}

impl Throw {
    /// A failed runtime check with a detail message.
    pub fn raise(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Throw::Raise(kind, Some(message.into()))
    }

    /// `NullPointerException` without a message.
    pub fn null_pointer() -> Self {
        Throw::Raise(ExceptionKind::NullPointer, None)
    }

    /// `ArrayIndexOutOfBoundsException` for `index` against `length`.
    pub fn index_out_of_bounds(index: i32, length: usize) -> Self {
        Self::raise(
            ExceptionKind::ArrayIndexOutOfBounds,
            format!("Index {} out of bounds for length {}", index, length),
        )
    }
}

impl From<VmError> for Throw {
    fn from(e: VmError) -> Self {
        Throw::Error(e)
    }
}

/// Result of interpreted work.
pub type ExecResult<T> = Result<T, Throw>;
