//! Unit tests for the interpreter, the native bridge and VM threads

use class_linker::MemoryClassPath;
use classfile::opcodes::{self as op, atype};
use classfile::{ClassAccess, ClassBuilder, MethodAccess};
use core_types::{Value, VmError, VmResult};
use interpreter::{exit_status, CapturedOutput, NativeRegistry, OutputSink, Vm, VmConfig};
use memory_manager::HeapConfig;
use std::sync::Arc;

const OBJECT: &str = "java/lang/Object";
const STRING: &str = "java/lang/String";
const PRINT_STREAM: &str = "java/io/PrintStream";
const STATIC: MethodAccess = MethodAccess::PUBLIC.union(MethodAccess::STATIC);

fn class_path(classes: Vec<ClassBuilder>) -> Arc<MemoryClassPath> {
    let mut cp = MemoryClassPath::new();
    for b in classes {
        let bytes = b.build().unwrap();
        let raw = classfile::ClassFileReader::parse(&bytes).unwrap();
        let name = raw.name().unwrap().to_string();
        cp.insert(name, bytes);
    }
    Arc::new(cp)
}

fn vm(classes: Vec<ClassBuilder>) -> Arc<Vm> {
    Vm::new(VmConfig::default(), class_path(classes)).unwrap()
}

fn capturing_vm(classes: Vec<ClassBuilder>) -> (Arc<Vm>, CapturedOutput, CapturedOutput) {
    let (out, stdout) = OutputSink::capture();
    let (err, stderr) = OutputSink::capture();
    let config = VmConfig::default().with_stdout(out).with_stderr(err);
    (Vm::new(config, class_path(classes)).unwrap(), stdout, stderr)
}

fn class_with_ctor(name: &str, super_name: &str) -> ClassBuilder {
    let mut b = ClassBuilder::new(name, Some(super_name));
    let sup = super_name.to_string();
    b.method(MethodAccess::PUBLIC, "<init>", "()V", move |c| {
        c.aload(0).invokespecial(&sup, "<init>", "()V").op(op::RETURN);
    });
    b
}

/// A class `Test` with one static method `run` of `descriptor`.
fn test_method(descriptor: &str, body: impl FnOnce(&mut classfile::CodeBuilder<'_>)) -> ClassBuilder {
    let mut b = ClassBuilder::new("Test", Some(OBJECT));
    b.method(STATIC, "run", descriptor, body);
    b
}

fn run(vm: &Arc<Vm>, descriptor: &str, args: &[Value]) -> VmResult<Option<Value>> {
    vm.invoke_static("Test", "run", descriptor, args)
}

fn run_int(body: impl FnOnce(&mut classfile::CodeBuilder<'_>)) -> VmResult<Option<Value>> {
    let vm = vm(vec![test_method("()I", body)]);
    run(&vm, "()I", &[])
}

fn assert_uncaught(result: VmResult<Option<Value>>, class: &str, message: Option<&str>) {
    match result {
        Err(VmError::UncaughtException {
            class: c,
            message: m,
            ..
        }) => {
            assert_eq!(c, class);
            assert_eq!(m.as_deref(), message);
        }
        other => panic!("expected uncaught {}, got {:?}", class, other),
    }
}

// ============================================================================
// Arithmetic and stack manipulation
// ============================================================================

#[test]
fn test_integer_division_semantics() {
    let vm = vm(vec![{
        let mut b = ClassBuilder::new("Test", Some(OBJECT));
        b.method(STATIC, "div", "(II)I", |c| {
            c.iload(0).iload(1).op(op::IDIV).op(op::IRETURN);
        });
        b.method(STATIC, "rem", "(II)I", |c| {
            c.iload(0).iload(1).op(op::IREM).op(op::IRETURN);
        });
        b
    }]);
    let call = |name: &str, a: i32, b: i32| vm.invoke_static("Test", name, "(II)I", &[Value::Int(a), Value::Int(b)]);

    assert_eq!(call("div", 7, -2).unwrap(), Some(Value::Int(-3)));
    assert_eq!(call("rem", -7, 2).unwrap(), Some(Value::Int(-1)));
    assert_eq!(call("div", i32::MIN, -1).unwrap(), Some(Value::Int(i32::MIN)));
    assert_eq!(call("rem", i32::MIN, -1).unwrap(), Some(Value::Int(0)));
    assert_uncaught(call("div", 1, 0), "java/lang/ArithmeticException", Some("/ by zero"));
    assert_uncaught(call("rem", 1, 0), "java/lang/ArithmeticException", Some("/ by zero"));
}

#[test]
fn test_long_and_floating_conversions() {
    let vm = vm(vec![{
        let mut b = ClassBuilder::new("Test", Some(OBJECT));
        b.method(STATIC, "low", "(J)I", |c| {
            c.lload(0).op(op::L2I).op(op::IRETURN);
        });
        b.method(STATIC, "trunc", "(D)I", |c| {
            c.dload(0).op(op::D2I).op(op::IRETURN);
        });
        b.method(STATIC, "widen", "(I)J", |c| {
            c.iload(0).op(op::I2L).lconst(1 << 40).op(op::LADD).op(op::LRETURN);
        });
        b
    }]);
    let low = vm.invoke_static("Test", "low", "(J)I", &[Value::Long((1 << 32) | 5)]);
    assert_eq!(low.unwrap(), Some(Value::Int(5)));
    let nan = vm.invoke_static("Test", "trunc", "(D)I", &[Value::Double(f64::NAN)]);
    assert_eq!(nan.unwrap(), Some(Value::Int(0)));
    let big = vm.invoke_static("Test", "trunc", "(D)I", &[Value::Double(1e12)]);
    assert_eq!(big.unwrap(), Some(Value::Int(i32::MAX)));
    let wide = vm.invoke_static("Test", "widen", "(I)J", &[Value::Int(-1)]);
    assert_eq!(wide.unwrap(), Some(Value::Long((1 << 40) - 1)));
}

#[test]
fn test_floating_division_by_zero() {
    let vm = vm(vec![{
        let mut b = ClassBuilder::new("Test", Some(OBJECT));
        b.method(STATIC, "fdiv", "(FF)F", |c| {
            c.fload(0).fload(1).op(op::FDIV).op(op::FRETURN);
        });
        b.method(STATIC, "ddiv", "(DD)D", |c| {
            c.dload(0).dload(2).op(op::DDIV).op(op::DRETURN);
        });
        b
    }]);
    let fdiv = |a: f32, b: f32| {
        match vm.invoke_static("Test", "fdiv", "(FF)F", &[Value::Float(a), Value::Float(b)]) {
            Ok(Some(Value::Float(v))) => v,
            other => panic!("unexpected result {:?}", other),
        }
    };
    assert_eq!(fdiv(1.0, -0.0), f32::NEG_INFINITY);
    assert_eq!(fdiv(-1.0, 0.0), f32::NEG_INFINITY);
    assert_eq!(fdiv(1.0, 0.0), f32::INFINITY);
    assert!(fdiv(0.0, 0.0).is_nan());
    let d = vm.invoke_static("Test", "ddiv", "(DD)D", &[Value::Double(-3.0), Value::Double(-0.0)]);
    assert_eq!(d.unwrap(), Some(Value::Double(f64::INFINITY)));
}

#[test]
fn test_loop_sums_one_to_ten() {
    let result = run_int(|c| {
        let top = c.new_label();
        let done = c.new_label();
        c.iconst(0).istore(0).iconst(1).istore(1);
        c.bind(top)
            .iload(1)
            .iconst(10)
            .branch(op::IF_ICMPGT, done)
            .iload(0)
            .iload(1)
            .op(op::IADD)
            .istore(0)
            .iinc(1, 1)
            .goto(top);
        c.bind(done).iload(0).op(op::IRETURN);
    });
    assert_eq!(result.unwrap(), Some(Value::Int(55)));
}

#[test]
fn test_dup_x1_reorders_words() {
    // [1, 2] -> dup_x1 -> [2, 1, 2] -> isub -> [2, -1] -> iadd -> [1]
    let result = run_int(|c| {
        c.iconst(1)
            .iconst(2)
            .op(op::DUP_X1)
            .op(op::ISUB)
            .op(op::IADD)
            .op(op::IRETURN);
    });
    assert_eq!(result.unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_dup2_copies_a_long() {
    let vm = vm(vec![test_method("()J", |c| {
        c.lconst(21).op(op::DUP2).op(op::LADD).op(op::LRETURN);
    })]);
    assert_eq!(run(&vm, "()J", &[]).unwrap(), Some(Value::Long(42)));
}

#[test]
fn test_switches_select_targets() {
    let vm = vm(vec![{
        let mut b = ClassBuilder::new("Test", Some(OBJECT));
        b.method(STATIC, "table", "(I)I", |c| {
            let default = c.new_label();
            let cases: Vec<_> = (0..3).map(|_| c.new_label()).collect();
            c.iload(0).tableswitch(1, default, &cases);
            for (i, label) in cases.iter().enumerate() {
                c.bind(*label).iconst(10 * (i as i32 + 1)).op(op::IRETURN);
            }
            c.bind(default).iconst(-1).op(op::IRETURN);
        });
        b.method(STATIC, "lookup", "(I)I", |c| {
            let default = c.new_label();
            let low = c.new_label();
            let high = c.new_label();
            c.iload(0).lookupswitch(default, &[(-5, low), (100, high)]);
            c.bind(low).iconst(1).op(op::IRETURN);
            c.bind(high).iconst(2).op(op::IRETURN);
            c.bind(default).iconst(0).op(op::IRETURN);
        });
        b
    }]);
    let table = |k: i32| vm.invoke_static("Test", "table", "(I)I", &[Value::Int(k)]).unwrap();
    assert_eq!(table(0), Some(Value::Int(-1)));
    assert_eq!(table(1), Some(Value::Int(10)));
    assert_eq!(table(3), Some(Value::Int(30)));
    assert_eq!(table(4), Some(Value::Int(-1)));
    let lookup = |k: i32| vm.invoke_static("Test", "lookup", "(I)I", &[Value::Int(k)]).unwrap();
    assert_eq!(lookup(-5), Some(Value::Int(1)));
    assert_eq!(lookup(100), Some(Value::Int(2)));
    assert_eq!(lookup(7), Some(Value::Int(0)));
}

// ============================================================================
// Objects, arrays and dispatch
// ============================================================================

fn animals() -> Vec<ClassBuilder> {
    let mut animal = class_with_ctor("Animal", OBJECT);
    animal.method(MethodAccess::PUBLIC, "sound", "()I", |c| {
        c.iconst(1).op(op::IRETURN);
    });
    let mut dog = class_with_ctor("Dog", "Animal");
    dog.method(MethodAccess::PUBLIC, "sound", "()I", |c| {
        c.iconst(2).op(op::IRETURN);
    });
    dog.method(MethodAccess::PUBLIC, "parent", "()I", |c| {
        c.aload(0).invokespecial("Animal", "sound", "()I").op(op::IRETURN);
    });
    vec![animal, dog]
}

#[test]
fn test_virtual_dispatch_uses_runtime_class() {
    let mut classes = animals();
    classes.push(test_method("()I", |c| {
        c.new_object("Dog")
            .op(op::DUP)
            .invokespecial("Dog", "<init>", "()V")
            .invokevirtual("Animal", "sound", "()I")
            .op(op::IRETURN);
    }));
    let vm = vm(classes);
    assert_eq!(run(&vm, "()I", &[]).unwrap(), Some(Value::Int(2)));
}

#[test]
fn test_invokespecial_reaches_superclass_method() {
    let mut classes = animals();
    classes.push(test_method("()I", |c| {
        c.new_object("Dog")
            .op(op::DUP)
            .invokespecial("Dog", "<init>", "()V")
            .invokevirtual("Dog", "parent", "()I")
            .op(op::IRETURN);
    }));
    let vm = vm(classes);
    assert_eq!(run(&vm, "()I", &[]).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_interface_dispatch() {
    let mut shape = ClassBuilder::new("Shape", Some(OBJECT));
    shape
        .access(ClassAccess::PUBLIC | ClassAccess::INTERFACE | ClassAccess::ABSTRACT)
        .bodiless_method(MethodAccess::PUBLIC | MethodAccess::ABSTRACT, "area", "()I");
    let mut square = class_with_ctor("Square", OBJECT);
    square.interface("Shape");
    square.method(MethodAccess::PUBLIC, "area", "()I", |c| {
        c.iconst(9).op(op::IRETURN);
    });
    let test = test_method("()I", |c| {
        c.new_object("Square")
            .op(op::DUP)
            .invokespecial("Square", "<init>", "()V")
            .invokeinterface("Shape", "area", "()I")
            .op(op::IRETURN);
    });
    let vm = vm(vec![shape, square, test]);
    assert_eq!(run(&vm, "()I", &[]).unwrap(), Some(Value::Int(9)));
}

#[test]
fn test_multi_dimensional_arrays() {
    let result = run_int(|c| {
        c.iconst(3)
            .iconst(4)
            .multianewarray("[[I", 2)
            .iconst(2)
            .op(op::AALOAD)
            .op(op::ARRAYLENGTH)
            .op(op::IRETURN);
    });
    assert_eq!(result.unwrap(), Some(Value::Int(4)));
}

#[test]
fn test_array_bounds_and_size_checks() {
    let out_of_bounds = run_int(|c| {
        c.iconst(2)
            .newarray(atype::INT)
            .iconst(5)
            .op(op::IALOAD)
            .op(op::IRETURN);
    });
    assert_uncaught(
        out_of_bounds,
        "java/lang/ArrayIndexOutOfBoundsException",
        Some("Index 5 out of bounds for length 2"),
    );

    let negative = run_int(|c| {
        c.iconst(-1).newarray(atype::INT).op(op::ARRAYLENGTH).op(op::IRETURN);
    });
    assert_uncaught(negative, "java/lang/NegativeArraySizeException", Some("-1"));
}

#[test]
fn test_array_store_checks_element_type() {
    let result = run_int(|c| {
        c.iconst(1)
            .anewarray(STRING)
            .iconst(0)
            .new_object(OBJECT)
            .op(op::DUP)
            .invokespecial(OBJECT, "<init>", "()V")
            .op(op::AASTORE)
            .iconst(0)
            .op(op::IRETURN);
    });
    assert_uncaught(result, "java/lang/ArrayStoreException", Some("java.lang.Object"));
}

#[test]
fn test_checkcast_and_instanceof() {
    let cast = run_int(|c| {
        c.new_object(OBJECT)
            .op(op::DUP)
            .invokespecial(OBJECT, "<init>", "()V")
            .checkcast(STRING)
            .op(op::POP)
            .iconst(0)
            .op(op::IRETURN);
    });
    assert_uncaught(
        cast,
        "java/lang/ClassCastException",
        Some("class java.lang.Object cannot be cast to class java.lang.String"),
    );

    let instance = run_int(|c| {
        c.ldc_string("s")
            .instanceof(OBJECT)
            .op(op::ACONST_NULL)
            .instanceof(OBJECT)
            .op(op::IADD)
            .op(op::IRETURN);
    });
    assert_eq!(instance.unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_null_receiver_is_npe() {
    let result = run_int(|c| {
        c.op(op::ACONST_NULL)
            .invokevirtual(OBJECT, "hashCode", "()I")
            .op(op::IRETURN);
    });
    assert_uncaught(result, "java/lang/NullPointerException", None);
}

// ============================================================================
// Exceptions
// ============================================================================

#[test]
fn test_exception_caught_in_caller_frame() {
    let mut b = ClassBuilder::new("Test", Some(OBJECT));
    b.method(STATIC, "thrower", "()V", |c| {
        c.iconst(1).iconst(0).op(op::IDIV).op(op::POP).op(op::RETURN);
    });
    b.method(STATIC, "run", "()I", |c| {
        let start = c.new_label();
        let end = c.new_label();
        let handler = c.new_label();
        c.bind(start)
            .invokestatic("Test", "thrower", "()V")
            .iconst(0)
            .op(op::IRETURN)
            .bind(end);
        c.bind(handler).op(op::POP).iconst(42).op(op::IRETURN);
        c.try_catch(start, end, handler, Some("java/lang/RuntimeException"));
    });
    let vm = vm(vec![b]);
    assert_eq!(run(&vm, "()I", &[]).unwrap(), Some(Value::Int(42)));
}

#[test]
fn test_handler_for_other_type_is_skipped() {
    let result = run_int(|c| {
        let start = c.new_label();
        let end = c.new_label();
        let handler = c.new_label();
        c.bind(start)
            .iconst(1)
            .iconst(0)
            .op(op::IDIV)
            .op(op::IRETURN)
            .bind(end);
        c.bind(handler).op(op::POP).iconst(-1).op(op::IRETURN);
        c.try_catch(start, end, handler, Some("java/lang/NullPointerException"));
    });
    assert_uncaught(result, "java/lang/ArithmeticException", Some("/ by zero"));
}

#[test]
fn test_user_exception_reaches_catch_all() {
    let result = run_int(|c| {
        let start = c.new_label();
        let end = c.new_label();
        let handler = c.new_label();
        c.bind(start)
            .new_object("java/lang/IllegalArgumentException")
            .op(op::DUP)
            .ldc_string("bad")
            .invokespecial("java/lang/IllegalArgumentException", "<init>", "(Ljava/lang/String;)V")
            .op(op::ATHROW)
            .bind(end);
        c.bind(handler)
            .invokevirtual("java/lang/Throwable", "getMessage", "()Ljava/lang/String;")
            .invokevirtual(STRING, "length", "()I")
            .op(op::IRETURN);
        c.try_catch(start, end, handler, None);
    });
    assert_eq!(result.unwrap(), Some(Value::Int(3)));
}

#[test]
fn test_uncaught_exception_report() {
    let mut main = ClassBuilder::new("Main", Some(OBJECT));
    main.source_file("Main.java");
    main.method(STATIC, "main", "([Ljava/lang/String;)V", |c| {
        c.line(3)
            .new_object("java/lang/RuntimeException")
            .op(op::DUP)
            .ldc_string("boom")
            .invokespecial("java/lang/RuntimeException", "<init>", "(Ljava/lang/String;)V")
            .op(op::ATHROW);
    });
    let (vm, _, stderr) = capturing_vm(vec![main]);
    let result = vm.run_main("Main", &[]);
    match &result {
        Err(VmError::UncaughtException {
            thread,
            class,
            message,
            stack_trace,
        }) => {
            assert_eq!(thread, "main");
            assert_eq!(class, "java/lang/RuntimeException");
            assert_eq!(message.as_deref(), Some("boom"));
            assert_eq!(stack_trace.first().map(String::as_str), Some("Main.main(Main.java:3)"));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(exit_status(&result), 1);
    let report = stderr.contents();
    assert!(report.starts_with("Exception in thread \"main\" java.lang.RuntimeException: boom\n"));
    assert!(report.contains("\tat Main.main(Main.java:3)"));
}

#[test]
fn test_stack_overflow_is_raised() {
    let mut b = ClassBuilder::new("Test", Some(OBJECT));
    b.method(STATIC, "run", "()V", |c| {
        c.invokestatic("Test", "run", "()V").op(op::RETURN);
    });
    let config = VmConfig::default().with_max_frames(64);
    let vm = Vm::new(config, class_path(vec![b])).unwrap();
    assert_uncaught(run(&vm, "()V", &[]), "java/lang/StackOverflowError", None);
}

#[test]
fn test_failed_initializer_is_sticky() {
    let mut bad = ClassBuilder::new("Bad", Some(OBJECT));
    bad.method(MethodAccess::STATIC, "<clinit>", "()V", |c| {
        c.iconst(1).iconst(0).op(op::IDIV).op(op::POP).op(op::RETURN);
    });
    bad.method(STATIC, "get", "()I", |c| {
        c.iconst(1).op(op::IRETURN);
    });
    let vm = vm(vec![bad]);
    let first = vm.invoke_static("Bad", "get", "()I", &[]);
    match &first {
        Err(VmError::Initialization { class, message }) => {
            assert_eq!(class, "Bad");
            assert!(message.contains("java.lang.ArithmeticException: / by zero"), "{}", message);
        }
        other => panic!("unexpected result {:?}", other),
    }
    let second = vm.invoke_static("Bad", "get", "()I", &[]);
    assert_eq!(first.unwrap_err(), second.unwrap_err());
}

// ============================================================================
// Strings, output and natives
// ============================================================================

#[test]
fn test_println_overloads() {
    let mut main = ClassBuilder::new("Main", Some(OBJECT));
    main.method(STATIC, "main", "([Ljava/lang/String;)V", |c| {
        let out = |c: &mut classfile::CodeBuilder<'_>| {
            c.getstatic("java/lang/System", "out", "Ljava/io/PrintStream;");
        };
        out(c);
        c.ldc_string("hello").invokevirtual(PRINT_STREAM, "println", "(Ljava/lang/String;)V");
        out(c);
        c.iconst(42).invokevirtual(PRINT_STREAM, "println", "(I)V");
        out(c);
        c.dconst(1.5).invokevirtual(PRINT_STREAM, "println", "(D)V");
        out(c);
        c.iconst(1).invokevirtual(PRINT_STREAM, "print", "(Z)V");
        out(c);
        c.iconst('!' as i32).invokevirtual(PRINT_STREAM, "println", "(C)V");
        out(c);
        c.op(op::ACONST_NULL).invokevirtual(PRINT_STREAM, "println", "(Ljava/lang/Object;)V");
        c.getstatic("java/lang/System", "err", "Ljava/io/PrintStream;")
            .ldc_string("oops")
            .invokevirtual(PRINT_STREAM, "println", "(Ljava/lang/String;)V");
        c.op(op::RETURN);
    });
    let (vm, stdout, stderr) = capturing_vm(vec![main]);
    vm.run_main("Main", &[]).unwrap();
    assert_eq!(stdout.contents(), "hello\n42\n1.5\ntrue!\nnull\n");
    assert_eq!(stderr.contents(), "oops\n");
}

#[test]
fn test_main_receives_arguments() {
    let mut main = ClassBuilder::new("Main", Some(OBJECT));
    main.method(STATIC, "main", "([Ljava/lang/String;)V", |c| {
        c.getstatic("java/lang/System", "out", "Ljava/io/PrintStream;")
            .aload(0)
            .iconst(1)
            .op(op::AALOAD)
            .invokevirtual(PRINT_STREAM, "println", "(Ljava/lang/String;)V")
            .op(op::RETURN);
    });
    let (vm, stdout, _) = capturing_vm(vec![main]);
    vm.run_main("Main", &["a".to_string(), "b".to_string()]).unwrap();
    assert_eq!(stdout.contents(), "b\n");
}

#[test]
fn test_missing_main_is_no_such_method() {
    let vm = vm(vec![class_with_ctor("Main", OBJECT)]);
    let result = vm.run_main("Main", &[]);
    assert!(matches!(result, Err(VmError::NoSuchMethod(_))));
    assert_ne!(exit_status(&result), 0);
}

#[test]
fn test_string_natives() {
    let concat_equals = run_int(|c| {
        c.ldc_string("ab")
            .ldc_string("cd")
            .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")
            .ldc_string("abcd")
            .invokevirtual(STRING, "equals", "(Ljava/lang/Object;)Z")
            .op(op::IRETURN);
    });
    assert_eq!(concat_equals.unwrap(), Some(Value::Int(1)));

    let hash = run_int(|c| {
        c.ldc_string("hello")
            .invokevirtual(STRING, "hashCode", "()I")
            .op(op::IRETURN);
    });
    assert_eq!(hash.unwrap(), Some(Value::Int(99162322)));
}

#[test]
fn test_string_literals_are_interned() {
    let mut other = ClassBuilder::new("Other", Some(OBJECT));
    other.method(STATIC, "name", "()Ljava/lang/String;", |c| {
        c.ldc_string("shared").op(op::ARETURN);
    });
    let test = test_method("()I", |c| {
        let differ = c.new_label();
        c.ldc_string("shared")
            .invokestatic("Other", "name", "()Ljava/lang/String;")
            .branch(op::IF_ACMPNE, differ)
            .iconst(1)
            .op(op::IRETURN)
            .bind(differ)
            .iconst(0)
            .op(op::IRETURN);
    });
    let vm = vm(vec![other, test]);
    assert_eq!(run(&vm, "()I", &[]).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_string_value_of_long() {
    let vm = vm(vec![test_method("()Ljava/lang/String;", |c| {
        c.lconst(-7)
            .invokestatic(STRING, "valueOf", "(J)Ljava/lang/String;")
            .op(op::ARETURN);
    })]);
    let result = run(&vm, "()Ljava/lang/String;", &[]).unwrap();
    let string = result.and_then(|v| v.as_object()).unwrap();
    assert_eq!(vm.string_value(string).unwrap(), "-7");
}

#[test]
fn test_custom_native_binding() {
    let mut calc = ClassBuilder::new("Calc", Some(OBJECT));
    calc.bodiless_method(STATIC | MethodAccess::NATIVE, "triple", "(I)I");
    calc.bodiless_method(STATIC | MethodAccess::NATIVE, "missing", "()V");
    calc.method(STATIC, "run", "()I", |c| {
        c.iconst(5).invokestatic("Calc", "triple", "(I)I").op(op::IRETURN);
    });
    let mut natives = NativeRegistry::with_builtins();
    natives.register("Calc", "triple", "(I)I", |_, args| match args {
        [Value::Int(v)] => Ok(Some(Value::Int(v * 3))),
        _ => Ok(None),
    });
    let vm = Vm::with_natives(VmConfig::default(), class_path(vec![calc]), Arc::new(natives)).unwrap();
    assert_eq!(vm.invoke_static("Calc", "run", "()I", &[]).unwrap(), Some(Value::Int(15)));
    assert_uncaught(
        vm.invoke_static("Calc", "missing", "()V", &[]),
        "java/lang/UnsatisfiedLinkError",
        Some("Calc.missing()V"),
    );
}

#[test]
fn test_native_entry_failure_matches_interpreted_call() {
    let mut calc = ClassBuilder::new("Calc", Some(OBJECT));
    calc.bodiless_method(STATIC | MethodAccess::NATIVE, "missing", "()V");
    calc.method(STATIC, "viaBytecode", "()V", |c| {
        c.invokestatic("Calc", "missing", "()V").op(op::RETURN);
    });
    let vm = vm(vec![calc]);
    let direct = vm.invoke_static("Calc", "missing", "()V", &[]);
    let nested = vm.invoke_static("Calc", "viaBytecode", "()V", &[]);
    for result in [direct, nested] {
        assert_uncaught(result, "java/lang/UnsatisfiedLinkError", Some("Calc.missing()V"));
    }
}

#[test]
fn test_object_clone_requires_cloneable() {
    let plain = class_with_ctor("Plain", OBJECT);
    let mut copyable = class_with_ctor("Copyable", OBJECT);
    copyable.interface("java/lang/Cloneable");
    copyable.method(MethodAccess::PUBLIC, "copy", "()Ljava/lang/Object;", |c| {
        c.aload(0).invokespecial(OBJECT, "clone", "()Ljava/lang/Object;").op(op::ARETURN);
    });
    let mut plain_copy = plain;
    plain_copy.method(MethodAccess::PUBLIC, "copy", "()Ljava/lang/Object;", |c| {
        c.aload(0).invokespecial(OBJECT, "clone", "()Ljava/lang/Object;").op(op::ARETURN);
    });
    let make = |class: &'static str| {
        move |c: &mut classfile::CodeBuilder<'_>| {
            let same = c.new_label();
            c.new_object(class)
                .op(op::DUP)
                .invokespecial(class, "<init>", "()V")
                .op(op::DUP)
                .invokevirtual(class, "copy", "()Ljava/lang/Object;")
                .branch(op::IF_ACMPEQ, same)
                .iconst(1)
                .op(op::IRETURN)
                .bind(same)
                .iconst(0)
                .op(op::IRETURN);
        }
    };
    let mut test = ClassBuilder::new("Test", Some(OBJECT));
    test.method(STATIC, "good", "()I", make("Copyable"));
    test.method(STATIC, "bad", "()I", make("Plain"));
    let vm = vm(vec![plain_copy, copyable, test]);
    assert_eq!(vm.invoke_static("Test", "good", "()I", &[]).unwrap(), Some(Value::Int(1)));
    assert_uncaught(
        vm.invoke_static("Test", "bad", "()I", &[]),
        "java/lang/CloneNotSupportedException",
        Some("Plain"),
    );
}

#[test]
fn test_arraycopy_overlapping_ranges() {
    // a = {0,1,2,3,4}; arraycopy(a, 0, a, 1, 4) -> {0,0,1,2,3}; return a[4]
    let result = run_int(|c| {
        c.iconst(5).newarray(atype::INT).astore(0);
        for i in 0..5 {
            c.aload(0).iconst(i).iconst(i).op(op::IASTORE);
        }
        c.aload(0)
            .iconst(0)
            .aload(0)
            .iconst(1)
            .iconst(4)
            .invokestatic("java/lang/System", "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V")
            .aload(0)
            .iconst(4)
            .op(op::IALOAD)
            .op(op::IRETURN);
    });
    assert_eq!(result.unwrap(), Some(Value::Int(3)));
}

#[test]
fn test_arraycopy_rejects_mismatched_arrays() {
    let result = run_int(|c| {
        c.iconst(1)
            .newarray(atype::INT)
            .iconst(0)
            .iconst(1)
            .newarray(atype::LONG)
            .iconst(0)
            .iconst(1)
            .invokestatic("java/lang/System", "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V")
            .iconst(0)
            .op(op::IRETURN);
    });
    assert_uncaught(
        result,
        "java/lang/ArrayStoreException",
        Some("arraycopy: type mismatch: can not copy int[] into long[]"),
    );
}

// ============================================================================
// Monitors
// ============================================================================

#[test]
fn test_synchronized_block_balances() {
    let result = run_int(|c| {
        c.new_object(OBJECT)
            .op(op::DUP)
            .invokespecial(OBJECT, "<init>", "()V")
            .astore(0)
            .aload(0)
            .op(op::MONITORENTER)
            .aload(0)
            .op(op::MONITORENTER)
            .aload(0)
            .op(op::MONITOREXIT)
            .aload(0)
            .op(op::MONITOREXIT)
            .iconst(1)
            .op(op::IRETURN);
    });
    assert_eq!(result.unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_unowned_monitor_exit_is_illegal() {
    let result = run_int(|c| {
        c.new_object(OBJECT)
            .op(op::DUP)
            .invokespecial(OBJECT, "<init>", "()V")
            .op(op::MONITOREXIT)
            .iconst(0)
            .op(op::IRETURN);
    });
    match result {
        Err(VmError::UncaughtException { class, .. }) => {
            assert_eq!(class, "java/lang/IllegalMonitorStateException")
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_synchronized_static_method() {
    let mut b = ClassBuilder::new("Test", Some(OBJECT));
    b.method(STATIC | MethodAccess::SYNCHRONIZED, "locked", "()I", |c| {
        c.iconst(7).op(op::IRETURN);
    });
    b.method(STATIC, "run", "()I", |c| {
        c.invokestatic("Test", "locked", "()I")
            .invokestatic("Test", "locked", "()I")
            .op(op::IADD)
            .op(op::IRETURN);
    });
    let vm = vm(vec![b]);
    assert_eq!(run(&vm, "()I", &[]).unwrap(), Some(Value::Int(14)));
}

// ============================================================================
// Garbage collection and threads
// ============================================================================

#[test]
fn test_garbage_is_collected_while_running() {
    // keep = new int[10]; keep[3] = 7; 4000 x new int[100]; return keep[3]
    let test = test_method("()I", |c| {
        let top = c.new_label();
        let done = c.new_label();
        c.iconst(10)
            .newarray(atype::INT)
            .astore(0)
            .aload(0)
            .iconst(3)
            .iconst(7)
            .op(op::IASTORE)
            .iconst(0)
            .istore(1);
        c.bind(top)
            .iload(1)
            .iconst(4000)
            .branch(op::IF_ICMPGE, done)
            .iconst(100)
            .newarray(atype::INT)
            .op(op::POP)
            .iinc(1, 1)
            .goto(top);
        c.bind(done).aload(0).iconst(3).op(op::IALOAD).op(op::IRETURN);
    });
    let heap = HeapConfig::default()
        .with_block_size(16 * 1024)
        .with_initial_size(256 * 1024)
        .with_max_size(1 << 20);
    let vm = Vm::new(VmConfig::default().with_heap(heap), class_path(vec![test])).unwrap();
    assert_eq!(run(&vm, "()I", &[]).unwrap(), Some(Value::Int(7)));
    assert!(vm.heap_stats().collections > 0);
    assert!(vm.heap_stats().objects_reclaimed >= 1000);
}

#[test]
fn test_heap_exhaustion_is_out_of_memory() {
    // Keeps every array reachable through a growing chain of Object[2].
    let test = test_method("()V", |c| {
        let top = c.new_label();
        c.op(op::ACONST_NULL).astore(0);
        c.bind(top)
            .iconst(2)
            .anewarray(OBJECT)
            .astore(1)
            .aload(1)
            .iconst(0)
            .aload(0)
            .op(op::AASTORE)
            .aload(1)
            .iconst(1)
            .iconst(1000)
            .newarray(atype::INT)
            .op(op::AASTORE)
            .aload(1)
            .astore(0)
            .goto(top);
    });
    let heap = HeapConfig::default()
        .with_block_size(16 * 1024)
        .with_initial_size(64 * 1024)
        .with_max_size(512 * 1024);
    let vm = Vm::new(VmConfig::default().with_heap(heap), class_path(vec![test])).unwrap();
    match run(&vm, "()V", &[]) {
        Err(VmError::UncaughtException { class, .. }) => {
            assert_eq!(class, "java/lang/OutOfMemoryError")
        }
        // No room left even for the throwable itself.
        Err(VmError::OutOfMemory(_)) => {}
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_class_initialized_once_across_threads() {
    let mut counter = ClassBuilder::new("Counter", Some(OBJECT));
    counter.field(
        classfile::FieldAccess::PUBLIC | classfile::FieldAccess::STATIC,
        "hits",
        "I",
    );
    counter.method(MethodAccess::STATIC, "<clinit>", "()V", |c| {
        c.getstatic("Counter", "hits", "I")
            .iconst(1)
            .op(op::IADD)
            .putstatic("Counter", "hits", "I")
            .op(op::RETURN);
    });
    counter.method(STATIC, "get", "()I", |c| {
        c.getstatic("Counter", "hits", "I").op(op::IRETURN);
    });
    let vm = vm(vec![counter]);
    let handles: Vec<_> = (0..4)
        .map(|_| vm.spawn("Counter", "get", "()I", Vec::new()).unwrap())
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), Some(Value::Int(1)));
    }
    assert_eq!(vm.thread_count(), 0);
}

#[test]
fn test_threads_allocate_concurrently() {
    let test = test_method("()I", |c| {
        let top = c.new_label();
        let done = c.new_label();
        c.iconst(0).istore(0);
        c.bind(top)
            .iload(0)
            .iconst(2000)
            .branch(op::IF_ICMPGE, done)
            .iconst(64)
            .newarray(atype::LONG)
            .op(op::POP)
            .iinc(0, 1)
            .goto(top);
        c.bind(done).iload(0).op(op::IRETURN);
    });
    let heap = HeapConfig::default()
        .with_block_size(16 * 1024)
        .with_initial_size(128 * 1024)
        .with_max_size(2 << 20);
    let vm = Vm::new(VmConfig::default().with_heap(heap), class_path(vec![test])).unwrap();
    let handles: Vec<_> = (0..3)
        .map(|_| vm.spawn("Test", "run", "()I", Vec::new()).unwrap())
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), Some(Value::Int(2000)));
    }
    assert!(vm.heap_stats().collections > 0);
}

#[test]
fn test_spawned_argument_collectable_once_dropped() {
    let mut b = ClassBuilder::new("Test", Some(OBJECT));
    b.bodiless_method(STATIC | MethodAccess::NATIVE, "usedBytes", "()J");
    b.method(STATIC, "make", "()[I", |c| {
        c.iconst(50_000).newarray(atype::INT).op(op::ARETURN);
    });
    b.method(STATIC, "release", "([I)J", |c| {
        // gc; before = usedBytes(); arg = null; gc; return before - usedBytes()
        c.invokestatic("java/lang/System", "gc", "()V")
            .invokestatic("Test", "usedBytes", "()J")
            .lstore(1)
            .op(op::ACONST_NULL)
            .astore(0)
            .invokestatic("java/lang/System", "gc", "()V")
            .lload(1)
            .invokestatic("Test", "usedBytes", "()J")
            .op(op::LSUB)
            .op(op::LRETURN);
    });
    let mut natives = NativeRegistry::with_builtins();
    natives.register("Test", "usedBytes", "()J", |env, _| {
        Ok(Some(Value::Long(env.with_heap(|heap| heap.used_bytes()) as i64)))
    });
    let vm = Vm::with_natives(VmConfig::default(), class_path(vec![b]), Arc::new(natives)).unwrap();

    let array = vm.invoke_static("Test", "make", "()[I", &[]).unwrap().unwrap();
    let handle = vm.spawn("Test", "release", "([I)J", vec![array]).unwrap();
    match handle.join().unwrap() {
        Ok(Some(Value::Long(freed))) => assert!(freed >= 200_000, "freed {} bytes", freed),
        other => panic!("unexpected result {:?}", other),
    }
}
