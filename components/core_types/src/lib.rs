//! Core value types and error handling for the class-file virtual machine.
//!
//! This crate provides the foundational types shared by every component of
//! the runtime: the tagged operand value, the heap handle, and the error
//! taxonomy for both infrastructural failures and interpreted exceptions.
//!
//! # Overview
//!
//! - [`Value`] - Tagged operand-stack / local-variable value
//! - [`ObjectRef`] - Handle of a heap-resident object or array
//! - [`VmError`] - Loading, linking and runtime failures of the machine itself
//! - [`ExceptionKind`] - Exceptions the machine raises inside interpreted code
//!
//! # Examples
//!
//! ```
//! use core_types::{ExceptionKind, Value, VmError};
//!
//! let sum = Value::Int(i32::MAX).as_int().unwrap().wrapping_add(1);
//! assert_eq!(sum, i32::MIN);
//! assert!(Value::Long(7).is_category2());
//!
//! let err = VmError::NoSuchField("Point.z:I".to_string());
//! assert_eq!(err.throwable_class(), Some("java/lang/NoSuchFieldError"));
//! assert_eq!(ExceptionKind::Arithmetic.class_name(), "java/lang/ArithmeticException");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod exception;
mod value;

pub use error::{VmError, VmResult};
pub use exception::ExceptionKind;
pub use value::{ObjectRef, Value};
