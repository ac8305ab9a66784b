//! Integration test suite for the Corten class-file VM
//!
//! This crate provides the shared helpers used by tests that verify
//! components work together correctly across component boundaries.

use class_linker::MemoryClassPath;
use classfile::{ClassBuilder, ClassFileReader, MethodAccess};
use interpreter::{CapturedOutput, OutputSink, Vm, VmConfig};
use std::sync::Arc;

/// Re-export components for test convenience
pub mod components {
    pub use bytecode_system;
    pub use class_linker;
    pub use classfile;
    pub use core_types;
    pub use interpreter;
    pub use jvm_cli;
    pub use memory_manager;
}

/// `public static`
pub const PUBLIC_STATIC: MethodAccess = MethodAccess::PUBLIC.union(MethodAccess::STATIC);

/// Descriptor of `main(String[])`
pub const MAIN: &str = "([Ljava/lang/String;)V";

/// Builds every class and serves them from memory, keyed by their own names.
pub fn class_path(classes: &[ClassBuilder]) -> Arc<MemoryClassPath> {
    let mut cp = MemoryClassPath::new();
    for class in classes {
        let bytes = class.build().expect("class builds");
        let raw = ClassFileReader::parse(&bytes).expect("class parses");
        let name = raw.name().expect("class has a name").to_string();
        cp.insert(name, bytes);
    }
    Arc::new(cp)
}

/// A VM over `classes` whose standard streams are captured.
pub fn capturing_vm(classes: &[ClassBuilder]) -> (Arc<Vm>, CapturedOutput, CapturedOutput) {
    capturing_vm_with(VmConfig::default(), classes)
}

/// Like [`capturing_vm`] with a base configuration.
pub fn capturing_vm_with(
    config: VmConfig,
    classes: &[ClassBuilder],
) -> (Arc<Vm>, CapturedOutput, CapturedOutput) {
    let (out, stdout) = OutputSink::capture();
    let (err, stderr) = OutputSink::capture();
    let config = config.with_stdout(out).with_stderr(err);
    let vm = Vm::new(config, class_path(classes)).expect("vm starts");
    (vm, stdout, stderr)
}

/// A class with a no-argument constructor chaining to `super_name`.
pub fn class_with_ctor(name: &str, super_name: &str) -> ClassBuilder {
    let mut b = ClassBuilder::new(name, Some(super_name));
    let sup = super_name.to_string();
    b.method(MethodAccess::PUBLIC, "<init>", "()V", move |c| {
        c.aload(0)
            .invokespecial(&sup, "<init>", "()V")
            .op(classfile::opcodes::RETURN);
    });
    b
}
