//! Bytecode interpreter for linked classes
//!
//! This crate executes methods of classes linked by `class_linker` against a
//! garbage-collected `memory_manager` heap:
//! - One frame per invocation with typed locals and a bounded operand stack
//! - Virtual, interface, special and static method selection
//! - Exceptions unwound through handler tables, with stack traces
//! - Monitors for `synchronized` methods and blocks
//! - Native methods bound through a [`NativeSymbolTable`]
//! - Several interpreter threads sharing one [`Vm`], with stop-the-world
//!   collections at safe points
//!
//! # Example
//!
//! ```
//! use class_linker::MemoryClassPath;
//! use classfile::{opcodes as op, ClassBuilder, MethodAccess};
//! use core_types::Value;
//! use interpreter::{Vm, VmConfig};
//! use std::sync::Arc;
//!
//! let mut calc = ClassBuilder::new("Calc", Some("java/lang/Object"));
//! calc.method(MethodAccess::PUBLIC | MethodAccess::STATIC, "twice", "(I)I", |c| {
//!     c.iload(0).iload(0).op(op::IADD).op(op::IRETURN);
//! });
//! let path = MemoryClassPath::new().with_class("Calc", calc.build().unwrap());
//!
//! let vm = Vm::new(VmConfig::default(), Arc::new(path)).unwrap();
//! let result = vm.invoke_static("Calc", "twice", "(I)I", &[Value::Int(21)]).unwrap();
//! assert_eq!(result, Some(Value::Int(42)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod dispatch;
pub mod frame;
mod invoke;
pub mod native;
pub mod numeric;
mod strings;
pub mod thread;
pub mod throw;
mod unwind;
pub mod vm;

// Re-export main types at crate root
pub use config::{CapturedOutput, OutputSink, VmConfig, DEFAULT_MAX_FRAMES};
pub use frame::Frame;
pub use native::{NativeEnv, NativeFn, NativeRegistry, NativeSymbolTable};
pub use strings::{java_name, string_hash};
pub use thread::VmThread;
pub use throw::{ExecResult, Throw};
pub use vm::{exit_status, Vm, MAIN_DESCRIPTOR};
