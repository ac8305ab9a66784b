//! End-to-End CLI Integration Tests
//!
//! Runs programs through the jvm_cli launcher the way `corten-jvm` does:
//! options parsed from an argument list, classes read from a directory.

use clap::Parser as ClapParser;
use classfile::opcodes as op;
use classfile::{ClassBuilder, FieldAccess, MethodAccess};
use core_types::VmError;
use integration_tests::{class_with_ctor, MAIN, PUBLIC_STATIC};
use jvm_cli::{exit_code, normalize_args, Cli, CliError, Launcher};
use std::ffi::OsString;
use std::path::Path;
use tempfile::TempDir;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(normalize_args(args.iter().map(OsString::from))).unwrap()
}

fn write_class(root: &Path, class: &ClassBuilder) {
    let bytes = class.build().unwrap();
    let raw = classfile::ClassFileReader::parse(&bytes).unwrap();
    let path = root.join(format!("{}.class", raw.name().unwrap()));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn launch(root: &Path, extra: &[&str], main: &str) -> Result<(), CliError> {
    let class_path = root.to_str().unwrap();
    let mut args = vec!["corten-jvm", "-cp", class_path];
    args.extend_from_slice(extra);
    args.push(main);
    let cli = parse(&args);
    Launcher::from_cli(&cli)?.run(&cli.main_class_name(), &cli.args)
}

/// Test: a packaged class runs from its dotted name
#[test]
fn test_e2e_cli_packaged_main() {
    let dir = TempDir::new().unwrap();
    let mut main = ClassBuilder::new("app/Main", Some("java/lang/Object"));
    main.method(PUBLIC_STATIC, "main", MAIN, |c| {
        c.op(op::RETURN);
    });
    write_class(dir.path(), &main);

    let result = launch(dir.path(), &[], "app.Main");
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(exit_code(&result), 0);
}

/// Test: classes spread over two class-path directories link together
#[test]
fn test_e2e_cli_multiple_directories() {
    let lib = TempDir::new().unwrap();
    let app = TempDir::new().unwrap();
    let mut util = class_with_ctor("Util", "java/lang/Object");
    util.method(PUBLIC_STATIC, "check", "()V", |c| {
        c.op(op::RETURN);
    });
    write_class(lib.path(), &util);
    let mut main = ClassBuilder::new("Main", Some("java/lang/Object"));
    main.method(PUBLIC_STATIC, "main", MAIN, |c| {
        c.invokestatic("Util", "check", "()V").op(op::RETURN);
    });
    write_class(app.path(), &main);

    let class_path = format!("{}:{}", app.path().display(), lib.path().display());
    let cli = parse(&["corten-jvm", "-cp", &class_path, "Main"]);
    let result = Launcher::from_cli(&cli).unwrap().run("Main", &[]);
    assert!(result.is_ok(), "{:?}", result);
}

/// Test: an uncaught exception gives a failing exit code
#[test]
fn test_e2e_cli_uncaught_exit_code() {
    let dir = TempDir::new().unwrap();
    let mut main = ClassBuilder::new("Main", Some("java/lang/Object"));
    main.method(PUBLIC_STATIC, "main", MAIN, |c| {
        c.op(op::ACONST_NULL).op(op::ATHROW);
    });
    write_class(dir.path(), &main);

    let result = launch(dir.path(), &[], "Main");
    assert!(matches!(
        result,
        Err(CliError::Vm(VmError::UncaughtException { ref class, .. })) if class == "java/lang/NullPointerException"
    ));
    assert_eq!(exit_code(&result), 1);
}

/// Test: a tight heap limit surfaces as OutOfMemoryError
#[test]
fn test_e2e_cli_heap_limit() {
    let dir = TempDir::new().unwrap();
    let mut hoard = ClassBuilder::new("Hoard", Some("java/lang/Object"));
    hoard.field(FieldAccess::PUBLIC | FieldAccess::STATIC, "keep", "[Ljava/lang/Object;");
    hoard.method(PUBLIC_STATIC, "main", MAIN, |c| {
        // keep = new Object[100000]; then a 1M int array per iteration, all kept
        let top = c.new_label();
        c.iconst(100_000)
            .anewarray("java/lang/Object")
            .putstatic("Hoard", "keep", "[Ljava/lang/Object;")
            .iconst(0)
            .istore(1);
        c.bind(top)
            .getstatic("Hoard", "keep", "[Ljava/lang/Object;")
            .iload(1)
            .iconst(1 << 18)
            .newarray(classfile::opcodes::atype::INT)
            .op(op::AASTORE)
            .iinc(1, 1)
            .goto(top);
    });
    write_class(dir.path(), &hoard);

    let result = launch(dir.path(), &["--max-heap", "4m"], "Hoard");
    match &result {
        Err(CliError::Vm(VmError::UncaughtException { class, .. })) => {
            assert_eq!(class, "java/lang/OutOfMemoryError")
        }
        Err(CliError::Vm(VmError::OutOfMemory(_))) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(exit_code(&result), 1);
}

/// Test: a shallow stack limit surfaces as StackOverflowError
#[test]
fn test_e2e_cli_max_frames() {
    let dir = TempDir::new().unwrap();
    let mut main = ClassBuilder::new("Main", Some("java/lang/Object"));
    main.method(PUBLIC_STATIC, "main", MAIN, |c| {
        c.iconst(0).invokestatic("Main", "down", "(I)V").op(op::RETURN);
    });
    main.method(MethodAccess::STATIC, "down", "(I)V", |c| {
        let stop = c.new_label();
        c.iload(0)
            .iconst(20)
            .branch(op::IF_ICMPGE, stop)
            .iload(0)
            .iconst(1)
            .op(op::IADD)
            .invokestatic("Main", "down", "(I)V")
            .bind(stop)
            .op(op::RETURN);
    });
    write_class(dir.path(), &main);

    assert!(launch(dir.path(), &["--max-frames", "64"], "Main").is_ok());
    let result = launch(dir.path(), &["--max-frames", "8"], "Main");
    assert!(matches!(
        result,
        Err(CliError::Vm(VmError::UncaughtException { ref class, .. })) if class == "java/lang/StackOverflowError"
    ));
}
