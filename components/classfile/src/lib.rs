//! Binary class-file format support.
//!
//! This crate reads class files into an unresolved, fully validated
//! [`RawClass`], parses type descriptors, and assembles new class files.
//!
//! # Features
//!
//! - Bounds-checked big-endian reader; every malformed input is a `ClassFormatError`
//! - Constant pool tag checking for every cross reference
//! - Typed `Code`, `ConstantValue`, `Exceptions`, `SourceFile` and `LineNumberTable` attributes
//! - Field and method descriptor parsing
//! - [`ClassBuilder`] / [`CodeBuilder`] assembler with labels and exception tables
//!
//! # Example
//!
//! ```
//! use classfile::{opcodes, ClassBuilder, ClassFileReader, MethodAccess};
//!
//! let mut builder = ClassBuilder::new("Hello", Some("java/lang/Object"));
//! builder.method(MethodAccess::PUBLIC | MethodAccess::STATIC, "answer", "()I", |code| {
//!     code.iconst(42).op(opcodes::IRETURN);
//! });
//! let bytes = builder.build().unwrap();
//!
//! let class = ClassFileReader::parse(&bytes).unwrap();
//! assert_eq!(class.name().unwrap(), "Hello");
//! assert_eq!(class.super_name().unwrap(), Some("java/lang/Object"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access_flags;
pub mod class_file;
pub mod constant_pool;
pub mod descriptor;
pub mod opcodes;
pub mod parser;
pub mod reader;
pub mod writer;

// Re-export main types at crate root
pub use access_flags::{ClassAccess, FieldAccess, MethodAccess};
pub use class_file::{
    Attribute, AttributeInfo, CodeAttribute, ExceptionTableEntry, FieldInfo, LineNumber,
    MethodInfo, RawClass, CLASS_MAGIC, MAX_MAJOR_VERSION, MIN_MAJOR_VERSION,
};
pub use constant_pool::{
    decode_modified_utf8, encode_modified_utf8, ConstantPool, ConstantPoolEntry, MemberRef,
};
pub use descriptor::{FieldType, MethodDescriptor};
pub use parser::ClassFileReader;
pub use reader::ByteReader;
pub use writer::{ClassBuilder, CodeBuilder, ConstantValue, Label, PoolBuilder};
