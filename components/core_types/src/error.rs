//! Error taxonomy of the virtual machine.
//!
//! Failures while reading or linking a class are infrastructural: they are
//! returned as [`VmError`] values to whoever asked for the class. Once a
//! thread is executing, the interpreter converts the errors that have a
//! throwable counterpart (see [`VmError::throwable_class`]) into exception
//! objects so interpreted code can catch them.

use thiserror::Error;

/// Result alias used across the runtime components.
pub type VmResult<T> = Result<T, VmError>;

/// A failure of the machine itself.
///
/// # Examples
///
/// ```
/// use core_types::VmError;
///
/// let err = VmError::ClassFormat("bad magic 0xdeadbeef".to_string());
/// assert_eq!(err.to_string(), "ClassFormatError: bad magic 0xdeadbeef");
/// assert_eq!(err.throwable_class(), Some("java/lang/ClassFormatError"));
/// assert!(VmError::Internal("oops".into()).throwable_class().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Malformed binary class file
    #[error("ClassFormatError: {0}")]
    ClassFormat(String),
    /// Structural or link-time inconsistency in otherwise well-formed bytes
    #[error("VerifyError: {0}")]
    Verify(String),
    /// The class-path resolver reported the class as not found
    #[error("NoClassDefFoundError: {0}")]
    ClassNotFound(String),
    /// Illegal override or other loader constraint violation
    #[error("LinkageError: {0}")]
    Linkage(String),
    /// A class is its own superclass or superinterface
    #[error("ClassCircularityError: {0}")]
    ClassCircularity(String),
    /// A class's shape changed incompatibly relative to a reference to it
    #[error("IncompatibleClassChangeError: {0}")]
    IncompatibleClassChange(String),
    /// Symbolic method reference did not resolve
    #[error("NoSuchMethodError: {0}")]
    NoSuchMethod(String),
    /// Symbolic field reference did not resolve
    #[error("NoSuchFieldError: {0}")]
    NoSuchField(String),
    /// Invocation selected an abstract method
    #[error("AbstractMethodError: {0}")]
    AbstractMethod(String),
    /// A native method has no registered implementation
    #[error("UnsatisfiedLinkError: {0}")]
    UnsatisfiedLink(String),
    /// A static initializer failed; later users of the class see the same error
    #[error("ExceptionInInitializerError: {class}: {message}")]
    Initialization {
        /// Class whose initializer failed
        class: String,
        /// Description of the original failure
        message: String,
    },
    /// Heap exhausted after both collection and growth
    #[error("OutOfMemoryError: {0}")]
    OutOfMemory(String),
    /// Frame-stack depth bound exceeded
    #[error("StackOverflowError")]
    StackOverflow,
    /// An exception escaped every frame of a thread
    #[error("Exception in thread \"{thread}\" {}{}", .class.replace('/', "."), .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    UncaughtException {
        /// Name of the terminated thread
        thread: String,
        /// Binary name of the exception class
        class: String,
        /// Detail message, if any
        message: Option<String>,
        /// Rendered stack trace lines, innermost first
        stack_trace: Vec<String>,
    },
    /// Broken internal invariant; never expected for any input
    #[error("internal error: {0}")]
    Internal(String),
}

impl VmError {
    /// Binary name of the throwable class this error is raised as inside a
    /// running thread, or `None` if the error is fatal to the thread.
    pub fn throwable_class(&self) -> Option<&'static str> {
        match self {
            VmError::ClassFormat(_) => Some("java/lang/ClassFormatError"),
            VmError::Verify(_) => Some("java/lang/VerifyError"),
            VmError::ClassNotFound(_) => Some("java/lang/NoClassDefFoundError"),
            VmError::Linkage(_) => Some("java/lang/LinkageError"),
            VmError::ClassCircularity(_) => Some("java/lang/ClassCircularityError"),
            VmError::IncompatibleClassChange(_) => {
                Some("java/lang/IncompatibleClassChangeError")
            }
            VmError::NoSuchMethod(_) => Some("java/lang/NoSuchMethodError"),
            VmError::NoSuchField(_) => Some("java/lang/NoSuchFieldError"),
            VmError::AbstractMethod(_) => Some("java/lang/AbstractMethodError"),
            VmError::UnsatisfiedLink(_) => Some("java/lang/UnsatisfiedLinkError"),
            VmError::Initialization { .. } => Some("java/lang/ExceptionInInitializerError"),
            VmError::OutOfMemory(_) => Some("java/lang/OutOfMemoryError"),
            VmError::StackOverflow => Some("java/lang/StackOverflowError"),
            VmError::UncaughtException { .. } | VmError::Internal(_) => None,
        }
    }

    /// Detail message carried into the throwable created for this error.
    pub fn detail_message(&self) -> Option<String> {
        match self {
            VmError::ClassFormat(m)
            | VmError::Verify(m)
            | VmError::ClassNotFound(m)
            | VmError::Linkage(m)
            | VmError::ClassCircularity(m)
            | VmError::IncompatibleClassChange(m)
            | VmError::NoSuchMethod(m)
            | VmError::NoSuchField(m)
            | VmError::AbstractMethod(m)
            | VmError::UnsatisfiedLink(m)
            | VmError::OutOfMemory(m)
            | VmError::Internal(m) => Some(m.clone()),
            VmError::Initialization { class, message } => Some(format!("{}: {}", class, message)),
            VmError::StackOverflow => None,
            VmError::UncaughtException { class, message, .. } => Some(match message {
                Some(m) => format!("{}: {}", class, m),
                None => class.clone(),
            }),
        }
    }
}
