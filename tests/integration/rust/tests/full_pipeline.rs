//! Full Pipeline Integration Tests
//!
//! Tests the complete flow: ClassBuilder -> class-file bytes -> reader ->
//! linker -> registry -> interpreter -> result.

use bytecode_system::{decode, Opcode};
use class_linker::{ClassRegistry, LoaderId};
use classfile::opcodes::{self as op, atype};
use classfile::{ClassBuilder, ClassFileReader, ConstantValue, FieldAccess, MethodAccess};
use core_types::{Value, VmError};
use integration_tests::{capturing_vm, class_path, class_with_ctor, MAIN, PUBLIC_STATIC};

const OBJECT: &str = "java/lang/Object";

/// Test: a counting loop computes 1 + 2 + ... + 10
#[test]
fn test_full_pipeline_sum_loop() {
    let mut b = ClassBuilder::new("Sum", Some(OBJECT));
    b.method(PUBLIC_STATIC, "sum", "(I)I", |c| {
        let top = c.new_label();
        let done = c.new_label();
        c.iconst(0).istore(1).iconst(1).istore(2);
        c.bind(top)
            .iload(2)
            .iload(0)
            .branch(op::IF_ICMPGT, done)
            .iload(1)
            .iload(2)
            .op(op::IADD)
            .istore(1)
            .iinc(2, 1)
            .goto(top);
        c.bind(done).iload(1).op(op::IRETURN);
    });
    let (vm, _, _) = capturing_vm(&[b]);

    let result = vm.invoke_static("Sum", "sum", "(I)I", &[Value::Int(10)]).unwrap();
    assert_eq!(result, Some(Value::Int(55)));
}

/// Test: the bytes written by the builder decode back into instructions
#[test]
fn test_full_pipeline_reader_and_decoder_agree() {
    let mut b = ClassBuilder::new("Shape", Some(OBJECT));
    b.source_file("Shape.java");
    b.field(FieldAccess::PRIVATE, "sides", "I");
    b.method(PUBLIC_STATIC, "twice", "(I)I", |c| {
        c.iload(0).iconst(2).op(op::IMUL).op(op::IRETURN);
    });
    let bytes = b.build().unwrap();

    let raw = ClassFileReader::parse(&bytes).unwrap();
    assert_eq!(raw.name().unwrap(), "Shape");
    assert_eq!(raw.super_name().unwrap(), Some(OBJECT));
    assert_eq!(raw.source_file(), Some("Shape.java"));
    let method = raw.find_method("twice", "(I)I").unwrap();
    let code = method.code().unwrap();

    let decoded = decode(&code.code).unwrap();
    let opcodes: Vec<Opcode> = decoded.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(opcodes.len(), 4);
    assert_eq!(opcodes[3], Opcode::Return(bytecode_system::ReturnKind::Int));
}

/// Test: linking lays out the vtable with overrides in inherited slots
#[test]
fn test_full_pipeline_vtable_layout() {
    let mut animal = class_with_ctor("Animal", OBJECT);
    animal.method(MethodAccess::PUBLIC, "sound", "()I", |c| {
        c.iconst(1).op(op::IRETURN);
    });
    animal.method(MethodAccess::PUBLIC, "legs", "()I", |c| {
        c.iconst(4).op(op::IRETURN);
    });
    let mut dog = class_with_ctor("Dog", "Animal");
    dog.method(MethodAccess::PUBLIC, "sound", "()I", |c| {
        c.iconst(2).op(op::IRETURN);
    });
    dog.method(MethodAccess::PUBLIC, "fetch", "()V", |c| {
        c.op(op::RETURN);
    });

    let registry = ClassRegistry::new(class_path(&[animal, dog])).unwrap();
    let dog = registry.load_class(LoaderId::APPLICATION, "Dog").unwrap();
    let animal = registry.find_loaded(LoaderId::APPLICATION, "Animal").unwrap();

    let slot = animal.vtable_slot("sound", "()I").unwrap();
    assert_eq!(dog.vtable_slot("sound", "()I"), Some(slot));
    assert_eq!(dog.vtable()[slot].class_name(), "Dog");
    let legs = animal.vtable_slot("legs", "()I").unwrap();
    assert_eq!(dog.vtable()[legs].class_name(), "Animal");
    assert_eq!(dog.vtable().len(), animal.vtable().len() + 1);
    assert!(dog.is_subclass_of(&animal));
}

/// Test: virtual calls over an array of mixed subclasses
#[test]
fn test_full_pipeline_polymorphic_array() {
    let mut animal = class_with_ctor("Animal", OBJECT);
    animal.method(MethodAccess::PUBLIC, "sound", "()I", |c| {
        c.iconst(1).op(op::IRETURN);
    });
    let mut dog = class_with_ctor("Dog", "Animal");
    dog.method(MethodAccess::PUBLIC, "sound", "()I", |c| {
        c.iconst(10).op(op::IRETURN);
    });
    let cat = class_with_ctor("Cat", "Animal");
    let mut zoo = ClassBuilder::new("Zoo", Some(OBJECT));
    zoo.method(PUBLIC_STATIC, "total", "()I", |c| {
        // Animal[] a = {new Dog(), new Cat(), new Dog()}; sum a[i].sound()
        c.iconst(3).anewarray("Animal").astore(0);
        for (i, class) in ["Dog", "Cat", "Dog"].iter().enumerate() {
            c.aload(0)
                .iconst(i as i32)
                .new_object(class)
                .op(op::DUP)
                .invokespecial(class, "<init>", "()V")
                .op(op::AASTORE);
        }
        let top = c.new_label();
        let done = c.new_label();
        c.iconst(0).istore(1).iconst(0).istore(2);
        c.bind(top)
            .iload(2)
            .aload(0)
            .op(op::ARRAYLENGTH)
            .branch(op::IF_ICMPGE, done)
            .iload(1)
            .aload(0)
            .iload(2)
            .op(op::AALOAD)
            .invokevirtual("Animal", "sound", "()I")
            .op(op::IADD)
            .istore(1)
            .iinc(2, 1)
            .goto(top);
        c.bind(done).iload(1).op(op::IRETURN);
    });
    let (vm, _, _) = capturing_vm(&[animal, dog, cat, zoo]);

    let result = vm.invoke_static("Zoo", "total", "()I", &[]).unwrap();
    assert_eq!(result, Some(Value::Int(21)));
}

/// Test: an interface method implemented by an inherited superclass method
#[test]
fn test_full_pipeline_interface_call() {
    let mut named = ClassBuilder::new("Named", Some(OBJECT));
    named
        .access(classfile::ClassAccess::PUBLIC | classfile::ClassAccess::INTERFACE | classfile::ClassAccess::ABSTRACT)
        .bodiless_method(MethodAccess::PUBLIC | MethodAccess::ABSTRACT, "id", "()I");
    let mut base = class_with_ctor("Base", OBJECT);
    base.method(MethodAccess::PUBLIC, "id", "()I", |c| {
        c.iconst(5).op(op::IRETURN);
    });
    let mut derived = class_with_ctor("Derived", "Base");
    derived.interface("Named");
    let mut main = ClassBuilder::new("Main", Some(OBJECT));
    main.method(PUBLIC_STATIC, "run", "()I", |c| {
        c.new_object("Derived")
            .op(op::DUP)
            .invokespecial("Derived", "<init>", "()V")
            .invokeinterface("Named", "id", "()I")
            .op(op::IRETURN);
    });
    let (vm, _, _) = capturing_vm(&[named, base, derived, main]);

    assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap(), Some(Value::Int(5)));
}

/// Test: ConstantValue statics are set before <clinit> runs
#[test]
fn test_full_pipeline_constant_statics() {
    let mut config = ClassBuilder::new("Config", Some(OBJECT));
    config.constant_field(
        FieldAccess::PUBLIC | FieldAccess::STATIC | FieldAccess::FINAL,
        "LIMIT",
        "J",
        ConstantValue::Long(1 << 40),
    );
    config.field(FieldAccess::PUBLIC | FieldAccess::STATIC, "doubled", "J");
    config.method(MethodAccess::STATIC, "<clinit>", "()V", |c| {
        c.getstatic("Config", "LIMIT", "J")
            .lconst(2)
            .op(op::LMUL)
            .putstatic("Config", "doubled", "J")
            .op(op::RETURN);
    });
    let mut main = ClassBuilder::new("Main", Some(OBJECT));
    main.method(PUBLIC_STATIC, "run", "()J", |c| {
        c.getstatic("Config", "doubled", "J").op(op::LRETURN);
    });
    let (vm, _, _) = capturing_vm(&[config, main]);

    assert_eq!(vm.invoke_static("Main", "run", "()J", &[]).unwrap(), Some(Value::Long(1 << 41)));
}

/// Test: long, float and double arithmetic through locals
#[test]
fn test_full_pipeline_wide_arithmetic() {
    let mut b = ClassBuilder::new("Wide", Some(OBJECT));
    b.method(PUBLIC_STATIC, "mix", "(JD)D", |c| {
        // (double) (a * 3) + d / 2.0
        c.lload(0)
            .lconst(3)
            .op(op::LMUL)
            .op(op::L2D)
            .dload(2)
            .dconst(2.0)
            .op(op::DDIV)
            .op(op::DADD)
            .op(op::DRETURN);
    });
    b.method(PUBLIC_STATIC, "cmp", "(FF)I", |c| {
        c.fload(0).fload(1).op(op::FCMPL).op(op::IRETURN);
    });
    let (vm, _, _) = capturing_vm(&[b]);

    let mixed = vm
        .invoke_static("Wide", "mix", "(JD)D", &[Value::Long(5), Value::Double(3.0)])
        .unwrap();
    assert_eq!(mixed, Some(Value::Double(16.5)));
    let nan = vm
        .invoke_static("Wide", "cmp", "(FF)I", &[Value::Float(f32::NAN), Value::Float(1.0)])
        .unwrap();
    assert_eq!(nan, Some(Value::Int(-1)));
}

/// Test: arrays of every primitive kind keep their element type
#[test]
fn test_full_pipeline_primitive_arrays() {
    let mut b = ClassBuilder::new("Arrays", Some(OBJECT));
    b.method(PUBLIC_STATIC, "bytes", "()I", |c| {
        // byte[] b = new byte[1]; b[0] = 200; return b[0];
        c.iconst(1)
            .newarray(atype::BYTE)
            .op(op::DUP)
            .iconst(0)
            .iconst(200)
            .op(op::BASTORE)
            .iconst(0)
            .op(op::BALOAD)
            .op(op::IRETURN);
    });
    b.method(PUBLIC_STATIC, "chars", "()I", |c| {
        c.iconst(1)
            .newarray(atype::CHAR)
            .op(op::DUP)
            .iconst(0)
            .iconst(-1)
            .op(op::CASTORE)
            .iconst(0)
            .op(op::CALOAD)
            .op(op::IRETURN);
    });
    let (vm, _, _) = capturing_vm(&[b]);

    assert_eq!(vm.invoke_static("Arrays", "bytes", "()I", &[]).unwrap(), Some(Value::Int(-56)));
    assert_eq!(vm.invoke_static("Arrays", "chars", "()I", &[]).unwrap(), Some(Value::Int(0xFFFF)));
}

/// Test: a class whose superclass is missing fails to load
#[test]
fn test_full_pipeline_missing_superclass() {
    let orphan = class_with_ctor("Orphan", "Missing");
    let mut main = ClassBuilder::new("Main", Some(OBJECT));
    main.method(PUBLIC_STATIC, "main", MAIN, |c| {
        c.op(op::RETURN);
    });
    let (vm, _, _) = capturing_vm(&[orphan, main]);

    assert!(matches!(vm.load_class("Orphan"), Err(VmError::ClassNotFound(_))));
    assert!(vm.run_main("Main", &[]).is_ok());
}

/// Test: a malformed class file never loads
#[test]
fn test_full_pipeline_malformed_class() {
    let mut bytes = class_with_ctor("Good", OBJECT).build().unwrap();
    bytes.truncate(bytes.len() - 3);
    let cp = class_linker::MemoryClassPath::new().with_class("Good", bytes);
    let registry = ClassRegistry::new(std::sync::Arc::new(cp)).unwrap();

    assert!(matches!(
        registry.load_class(LoaderId::APPLICATION, "Good"),
        Err(VmError::ClassFormat(_))
    ));
}
