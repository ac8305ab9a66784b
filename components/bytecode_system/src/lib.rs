//! Bytecode system for the class-file virtual machine
//!
//! This crate provides the decoded instruction set and the decoder that turns
//! a method's raw `Code` array into it.
//!
//! # Features
//!
//! - Tagged-enum instruction set with operand families folded together
//! - Branch and switch targets expressed as instruction indices
//! - Structural checks during decoding (unknown opcodes, truncated operands,
//!   targets inside instructions, malformed switches, `wide` misuse)
//!
//! # Example
//!
//! ```
//! use bytecode_system::{decode, Cond, Opcode};
//!
//! // iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
//! let code = decode(&[0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]).unwrap();
//! assert_eq!(code.instructions[1].opcode, Opcode::If(Cond::Eq, 4));
//! assert_eq!(code.pc_of(4), Some(6));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod instruction;
pub mod opcode;

// Re-export main types at crate root
pub use decoder::{decode, DecodeError};
pub use instruction::{DecodedCode, Instruction, SwitchCases, SwitchTable};
pub use opcode::{
    ArrayKind, Cond, IntKind, LocalKind, NumKind, Opcode, PrimitiveType, ReturnKind,
};
