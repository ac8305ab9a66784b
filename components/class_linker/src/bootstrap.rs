//! Built-in classes of the bootstrap namespace.
//!
//! The classes are assembled with the class-file writer and parsed by the
//! same reader as user classes, so they go through ordinary linking. Native
//! methods declared here are implemented by the interpreter's native bridge.

use crate::class_path::MemoryClassPath;
use classfile::opcodes::{self as op, atype};
use classfile::{ClassAccess, ClassBuilder, FieldAccess, MethodAccess};
use core_types::VmResult;

/// `java/lang/Object`
pub const OBJECT: &str = "java/lang/Object";
/// `java/lang/Class`
pub const CLASS: &str = "java/lang/Class";
/// `java/lang/String`
pub const STRING: &str = "java/lang/String";
/// `java/lang/System`
pub const SYSTEM: &str = "java/lang/System";
/// `java/lang/Throwable`
pub const THROWABLE: &str = "java/lang/Throwable";
/// `java/lang/Cloneable`
pub const CLONEABLE: &str = "java/lang/Cloneable";
/// `java/io/Serializable`
pub const SERIALIZABLE: &str = "java/io/Serializable";
/// `java/io/PrintStream`
pub const PRINT_STREAM: &str = "java/io/PrintStream";

/// Throwable subclasses as `(name, superclass)`, parents before children.
pub const THROWABLE_HIERARCHY: &[(&str, &str)] = &[
    ("java/lang/Exception", THROWABLE),
    ("java/lang/Error", THROWABLE),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/CloneNotSupportedException", "java/lang/Exception"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
    ("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/ClassFormatError", "java/lang/LinkageError"),
    ("java/lang/VerifyError", "java/lang/LinkageError"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/ClassCircularityError", "java/lang/LinkageError"),
    ("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError"),
    ("java/lang/ExceptionInInitializerError", "java/lang/LinkageError"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
    ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/AbstractMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
];

const PUBLIC: MethodAccess = MethodAccess::PUBLIC;
const NATIVE: MethodAccess = MethodAccess::PUBLIC.union(MethodAccess::NATIVE);
const STATIC_NATIVE: MethodAccess = NATIVE.union(MethodAccess::STATIC);

fn source_name(class: &str) -> String {
    let simple = class.rsplit('/').next().unwrap_or(class);
    format!("{}.java", simple)
}

fn begin(name: &str, super_name: Option<&str>) -> ClassBuilder {
    let mut b = ClassBuilder::new(name, super_name);
    b.source_file(&source_name(name));
    b
}

fn default_constructor(b: &mut ClassBuilder, super_name: &str) {
    b.method(PUBLIC, "<init>", "()V", |c| {
        c.aload(0)
            .invokespecial(super_name, "<init>", "()V")
            .op(op::RETURN);
    });
}

fn object_class() -> VmResult<Vec<u8>> {
    let mut b = begin(OBJECT, None);
    b.method(PUBLIC, "<init>", "()V", |c| {
        c.op(op::RETURN);
    });
    b.method(PUBLIC, "equals", "(Ljava/lang/Object;)Z", |c| {
        let differ = c.new_label();
        c.line(1)
            .aload(0)
            .aload(1)
            .branch(op::IF_ACMPNE, differ)
            .op(op::ICONST_1)
            .op(op::IRETURN)
            .bind(differ)
            .op(op::ICONST_0)
            .op(op::IRETURN);
    });
    b.bodiless_method(NATIVE, "hashCode", "()I")
        .bodiless_method(NATIVE, "getClass", "()Ljava/lang/Class;")
        .bodiless_method(NATIVE, "toString", "()Ljava/lang/String;")
        .bodiless_method(
            MethodAccess::PROTECTED | MethodAccess::NATIVE,
            "clone",
            "()Ljava/lang/Object;",
        );
    b.build()
}

fn marker_interface(name: &str) -> VmResult<Vec<u8>> {
    let mut b = begin(name, Some(OBJECT));
    b.access(ClassAccess::PUBLIC | ClassAccess::INTERFACE | ClassAccess::ABSTRACT);
    b.build()
}

fn class_class() -> VmResult<Vec<u8>> {
    let mut b = begin(CLASS, Some(OBJECT));
    b.access(ClassAccess::PUBLIC | ClassAccess::FINAL | ClassAccess::SUPER);
    b.field(FieldAccess::PRIVATE | FieldAccess::FINAL, "name", "Ljava/lang/String;");
    b.method(PUBLIC, "getName", "()Ljava/lang/String;", |c| {
        c.aload(0).getfield(CLASS, "name", "Ljava/lang/String;").op(op::ARETURN);
    });
    b.method(PUBLIC, "toString", "()Ljava/lang/String;", |c| {
        c.aload(0)
            .invokevirtual(CLASS, "getName", "()Ljava/lang/String;")
            .op(op::ARETURN);
    });
    b.build()
}

fn string_class() -> VmResult<Vec<u8>> {
    let mut b = begin(STRING, Some(OBJECT));
    b.access(ClassAccess::PUBLIC | ClassAccess::FINAL | ClassAccess::SUPER)
        .interface(SERIALIZABLE);
    b.field(FieldAccess::PRIVATE | FieldAccess::FINAL, "value", "[C");
    b.method(PUBLIC, "<init>", "()V", |c| {
        c.aload(0)
            .invokespecial(OBJECT, "<init>", "()V")
            .aload(0)
            .op(op::ICONST_0)
            .newarray(atype::CHAR)
            .putfield(STRING, "value", "[C")
            .op(op::RETURN);
    });
    b.method(PUBLIC, "<init>", "([C)V", |c| {
        c.aload(0)
            .invokespecial(OBJECT, "<init>", "()V")
            .aload(1)
            .op(op::ARRAYLENGTH)
            .istore(2)
            .aload(0)
            .iload(2)
            .newarray(atype::CHAR)
            .putfield(STRING, "value", "[C")
            .aload(1)
            .op(op::ICONST_0)
            .aload(0)
            .getfield(STRING, "value", "[C")
            .op(op::ICONST_0)
            .iload(2)
            .invokestatic(SYSTEM, "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V")
            .op(op::RETURN);
    });
    b.method(PUBLIC, "length", "()I", |c| {
        c.aload(0)
            .getfield(STRING, "value", "[C")
            .op(op::ARRAYLENGTH)
            .op(op::IRETURN);
    });
    b.method(PUBLIC, "isEmpty", "()Z", |c| {
        let empty = c.new_label();
        c.aload(0)
            .invokevirtual(STRING, "length", "()I")
            .branch(op::IFEQ, empty)
            .op(op::ICONST_0)
            .op(op::IRETURN)
            .bind(empty)
            .op(op::ICONST_1)
            .op(op::IRETURN);
    });
    b.method(PUBLIC, "charAt", "(I)C", |c| {
        c.aload(0)
            .getfield(STRING, "value", "[C")
            .iload(1)
            .op(op::CALOAD)
            .op(op::IRETURN);
    });
    b.method(PUBLIC, "toString", "()Ljava/lang/String;", |c| {
        c.aload(0).op(op::ARETURN);
    });
    b.bodiless_method(NATIVE, "intern", "()Ljava/lang/String;")
        .bodiless_method(NATIVE, "equals", "(Ljava/lang/Object;)Z")
        .bodiless_method(NATIVE, "hashCode", "()I")
        .bodiless_method(NATIVE, "concat", "(Ljava/lang/String;)Ljava/lang/String;")
        .bodiless_method(STATIC_NATIVE, "valueOf", "(I)Ljava/lang/String;")
        .bodiless_method(STATIC_NATIVE, "valueOf", "(J)Ljava/lang/String;")
        .bodiless_method(STATIC_NATIVE, "valueOf", "(Ljava/lang/Object;)Ljava/lang/String;");
    b.build()
}

fn system_class() -> VmResult<Vec<u8>> {
    let mut b = begin(SYSTEM, Some(OBJECT));
    b.access(ClassAccess::PUBLIC | ClassAccess::FINAL | ClassAccess::SUPER);
    let stream = "Ljava/io/PrintStream;";
    b.field(FieldAccess::PUBLIC | FieldAccess::STATIC | FieldAccess::FINAL, "out", stream)
        .field(FieldAccess::PUBLIC | FieldAccess::STATIC | FieldAccess::FINAL, "err", stream);
    b.method(MethodAccess::STATIC, "<clinit>", "()V", |c| {
        for (fd, field) in [(1, "out"), (2, "err")] {
            c.new_object(PRINT_STREAM)
                .op(op::DUP)
                .iconst(fd)
                .invokespecial(PRINT_STREAM, "<init>", "(I)V")
                .putstatic(SYSTEM, field, stream);
        }
        c.op(op::RETURN);
    });
    b.bodiless_method(
        STATIC_NATIVE,
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
    )
    .bodiless_method(STATIC_NATIVE, "identityHashCode", "(Ljava/lang/Object;)I")
    .bodiless_method(STATIC_NATIVE, "gc", "()V")
    .bodiless_method(STATIC_NATIVE, "nanoTime", "()J")
    .bodiless_method(STATIC_NATIVE, "currentTimeMillis", "()J");
    b.build()
}

/// Descriptors of the `print`/`println` overloads.
pub const PRINT_DESCRIPTORS: &[&str] = &[
    "(Ljava/lang/String;)V",
    "(Ljava/lang/Object;)V",
    "(I)V",
    "(J)V",
    "(C)V",
    "(Z)V",
    "(F)V",
    "(D)V",
];

fn print_stream_class() -> VmResult<Vec<u8>> {
    let mut b = begin(PRINT_STREAM, Some(OBJECT));
    b.field(FieldAccess::PRIVATE | FieldAccess::FINAL, "fd", "I");
    b.method(PUBLIC, "<init>", "(I)V", |c| {
        c.aload(0)
            .invokespecial(OBJECT, "<init>", "()V")
            .aload(0)
            .iload(1)
            .putfield(PRINT_STREAM, "fd", "I")
            .op(op::RETURN);
    });
    b.method(PUBLIC, "flush", "()V", |c| {
        c.op(op::RETURN);
    });
    b.bodiless_method(NATIVE, "println", "()V");
    for desc in PRINT_DESCRIPTORS {
        b.bodiless_method(NATIVE, "print", desc)
            .bodiless_method(NATIVE, "println", desc);
    }
    b.build()
}

fn throwable_class() -> VmResult<Vec<u8>> {
    let mut b = begin(THROWABLE, Some(OBJECT));
    b.interface(SERIALIZABLE);
    b.field(FieldAccess::PRIVATE, "detailMessage", "Ljava/lang/String;")
        .field(FieldAccess::PRIVATE, "stackTrace", "[Ljava/lang/String;");
    b.method(PUBLIC, "<init>", "()V", |c| {
        c.aload(0)
            .invokespecial(OBJECT, "<init>", "()V")
            .aload(0)
            .invokevirtual(THROWABLE, "fillInStackTrace", "()Ljava/lang/Throwable;")
            .op(op::POP)
            .op(op::RETURN);
    });
    b.method(PUBLIC, "<init>", "(Ljava/lang/String;)V", |c| {
        c.aload(0)
            .invokespecial(OBJECT, "<init>", "()V")
            .aload(0)
            .aload(1)
            .putfield(THROWABLE, "detailMessage", "Ljava/lang/String;")
            .aload(0)
            .invokevirtual(THROWABLE, "fillInStackTrace", "()Ljava/lang/Throwable;")
            .op(op::POP)
            .op(op::RETURN);
    });
    b.method(PUBLIC, "getMessage", "()Ljava/lang/String;", |c| {
        c.aload(0)
            .getfield(THROWABLE, "detailMessage", "Ljava/lang/String;")
            .op(op::ARETURN);
    });
    b.bodiless_method(NATIVE, "fillInStackTrace", "()Ljava/lang/Throwable;")
        .bodiless_method(NATIVE, "toString", "()Ljava/lang/String;")
        .bodiless_method(NATIVE, "printStackTrace", "()V");
    b.build()
}

fn throwable_subclass(name: &str, super_name: &str) -> VmResult<Vec<u8>> {
    let mut b = begin(name, Some(super_name));
    default_constructor(&mut b, super_name);
    b.method(PUBLIC, "<init>", "(Ljava/lang/String;)V", |c| {
        c.aload(0)
            .aload(1)
            .invokespecial(super_name, "<init>", "(Ljava/lang/String;)V")
            .op(op::RETURN);
    });
    b.build()
}

/// Assembles every bootstrap class into an in-memory class path.
pub fn bootstrap_class_path() -> VmResult<MemoryClassPath> {
    let mut cp = MemoryClassPath::new();
    cp.insert(OBJECT, object_class()?);
    cp.insert(CLONEABLE, marker_interface(CLONEABLE)?);
    cp.insert(SERIALIZABLE, marker_interface(SERIALIZABLE)?);
    cp.insert(CLASS, class_class()?);
    cp.insert(STRING, string_class()?);
    cp.insert(SYSTEM, system_class()?);
    cp.insert(PRINT_STREAM, print_stream_class()?);
    cp.insert(THROWABLE, throwable_class()?);
    for (name, super_name) in THROWABLE_HIERARCHY {
        cp.insert(*name, throwable_subclass(name, super_name)?);
    }
    log::trace!("assembled {} bootstrap classes", cp.len());
    Ok(cp)
}
