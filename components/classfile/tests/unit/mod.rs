//! Unit tests for the class-file reader and writer

use classfile::{
    opcodes, Attribute, ClassAccess, ClassBuilder, ClassFileReader, ConstantPoolEntry,
    ConstantValue, FieldAccess, FieldType, MethodAccess, MethodDescriptor,
};
use core_types::VmError;

fn point_class() -> Vec<u8> {
    let mut b = ClassBuilder::new("geo/Point", Some("java/lang/Object"));
    b.interface("java/lang/Cloneable");
    b.field(FieldAccess::PRIVATE, "x", "I");
    b.field(FieldAccess::PRIVATE, "y", "I");
    b.constant_field(
        FieldAccess::PUBLIC | FieldAccess::STATIC | FieldAccess::FINAL,
        "ORIGIN_NAME",
        "Ljava/lang/String;",
        ConstantValue::String("origin".into()),
    );
    b.method(MethodAccess::PUBLIC, "<init>", "()V", |code| {
        code.aload(0)
            .invokespecial("java/lang/Object", "<init>", "()V")
            .op(opcodes::RETURN);
    });
    b.method(MethodAccess::PUBLIC, "getX", "()I", |code| {
        code.aload(0).getfield("geo/Point", "x", "I").op(opcodes::IRETURN);
    });
    b.bodiless_method(MethodAccess::PUBLIC | MethodAccess::NATIVE, "hash", "()I");
    b.source_file("Point.java");
    b.build().unwrap()
}

fn expect_format_error(bytes: &[u8], needle: &str) {
    match ClassFileReader::parse(bytes) {
        Err(VmError::ClassFormat(msg)) => {
            assert!(msg.contains(needle), "message {:?} lacks {:?}", msg, needle)
        }
        other => panic!("expected ClassFormatError containing {:?}, got {:?}", needle, other),
    }
}

/// Offset of the u2 following the constant pool (the access flags).
fn after_pool(bytes: &[u8]) -> usize {
    let class = ClassFileReader::parse(bytes).unwrap();
    let mut pos = 10;
    for (_, entry) in class.constant_pool.iter() {
        pos += 1 + match entry {
            ConstantPoolEntry::Utf8(s) => 2 + classfile::encode_modified_utf8(s).len(),
            ConstantPoolEntry::Integer(_) | ConstantPoolEntry::Float(_) => 4,
            ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_) => 8,
            ConstantPoolEntry::Class { .. }
            | ConstantPoolEntry::String { .. }
            | ConstantPoolEntry::MethodType { .. } => 2,
            ConstantPoolEntry::MethodHandle { .. } => 3,
            _ => 4,
        };
    }
    pos
}

// ============================================================================
// Well-formed input
// ============================================================================

#[test]
fn test_parse_point_structure() {
    let class = ClassFileReader::parse(&point_class()).unwrap();
    assert_eq!(class.name().unwrap(), "geo/Point");
    assert_eq!(class.super_name().unwrap(), Some("java/lang/Object"));
    assert_eq!(class.interface_names().unwrap(), vec!["java/lang/Cloneable"]);
    assert!(class.access.contains(ClassAccess::PUBLIC));
    assert_eq!(class.fields.len(), 3);
    assert_eq!(class.methods.len(), 3);
    assert_eq!(class.source_file(), Some("Point.java"));
}

#[test]
fn test_constant_value_attribute() {
    let class = ClassFileReader::parse(&point_class()).unwrap();
    let field = &class.fields[2];
    assert!(field.is_static());
    let index = field.constant_value().unwrap();
    match class.constant_pool.get(index).unwrap() {
        ConstantPoolEntry::String { string_index } => {
            assert_eq!(class.constant_pool.utf8(*string_index).unwrap(), "origin")
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_native_method_has_no_code() {
    let class = ClassFileReader::parse(&point_class()).unwrap();
    let hash = class.find_method("hash", "()I").unwrap();
    assert!(hash.code().is_none());
    assert!(hash.access.contains(MethodAccess::NATIVE));
}

#[test]
fn test_getfield_operand_resolves_symbolically() {
    let class = ClassFileReader::parse(&point_class()).unwrap();
    let code = class.find_method("getX", "()I").unwrap().code().unwrap();
    assert_eq!(code.code[1], opcodes::GETFIELD);
    let index = u16::from_be_bytes([code.code[2], code.code[3]]);
    let member = class.constant_pool.member_ref(index).unwrap();
    assert_eq!(
        (member.class_name, member.name, member.descriptor),
        ("geo/Point", "x", "I")
    );
}

#[test]
fn test_exception_table_roundtrip() {
    let mut b = ClassBuilder::new("T", Some("java/lang/Object"));
    b.method(MethodAccess::STATIC, "f", "()I", |code| {
        let start = code.new_label();
        let end = code.new_label();
        let handler = code.new_label();
        code.bind(start);
        code.iconst(1).iconst(0).op(opcodes::IDIV).op(opcodes::IRETURN);
        code.bind(end);
        code.bind(handler);
        code.op(opcodes::POP).iconst(-1).op(opcodes::IRETURN);
        code.try_catch(start, end, handler, Some("java/lang/ArithmeticException"));
    });
    let class = ClassFileReader::parse(&b.build().unwrap()).unwrap();
    let code = class.find_method("f", "()I").unwrap().code().unwrap();
    assert_eq!(code.exception_table.len(), 1);
    let row = code.exception_table[0];
    assert_eq!((row.start_pc, row.end_pc, row.handler_pc), (0, 4, 4));
    assert_eq!(
        class.constant_pool.class_name(row.catch_type).unwrap(),
        "java/lang/ArithmeticException"
    );
}

#[test]
fn test_wide_locals_and_constants() {
    let mut b = ClassBuilder::new("W", Some("java/lang/Object"));
    b.method(MethodAccess::STATIC, "f", "()V", |code| {
        code.iconst(100_000).istore(300).lconst(7).lstore(4).op(opcodes::RETURN);
    });
    let class = ClassFileReader::parse(&b.build().unwrap()).unwrap();
    let code = class.find_method("f", "()V").unwrap().code().unwrap();
    assert_eq!(code.max_locals, 301);
    assert_eq!(code.code[0], opcodes::LDC);
    assert_eq!(code.code[2], opcodes::WIDE);
    assert_eq!(code.code[3], opcodes::ISTORE);
}

#[test]
fn test_unknown_attribute_kept_raw() {
    let mut b = ClassBuilder::new("U", Some("java/lang/Object"));
    let name = b.pool().utf8("Custom");
    let mut bytes = b.build().unwrap();
    // Replace the trailing attributes_count (0) with one custom attribute.
    bytes.truncate(bytes.len() - 2);
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&name.to_be_bytes());
    bytes.extend_from_slice(&3u32.to_be_bytes());
    bytes.extend_from_slice(&[1, 2, 3]);
    let class = ClassFileReader::parse(&bytes).unwrap();
    assert_eq!(class.attributes[0].body, Attribute::Unknown(vec![1, 2, 3]));
}

// ============================================================================
// Malformed input
// ============================================================================

#[test]
fn test_every_truncation_is_rejected() {
    let bytes = point_class();
    for len in 0..bytes.len() {
        assert!(
            ClassFileReader::parse(&bytes[..len]).is_err(),
            "prefix of length {} parsed",
            len
        );
    }
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = point_class();
    bytes.push(0);
    expect_format_error(&bytes, "trailing");
}

#[test]
fn test_bad_magic_rejected() {
    let mut bytes = point_class();
    bytes[0] = 0xCB;
    expect_format_error(&bytes, "magic");
}

#[test]
fn test_version_range() {
    let mut bytes = point_class();
    bytes[7] = 44;
    expect_format_error(&bytes, "unsupported");
    bytes[7] = 66;
    expect_format_error(&bytes, "unsupported");
    bytes[7] = 65;
    assert!(ClassFileReader::parse(&bytes).is_ok());
}

#[test]
fn test_this_class_wrong_tag() {
    let mut bytes = point_class();
    let pos = after_pool(&bytes) + 2;
    // Index 1 is the Utf8 "geo/Point", not a Class entry.
    bytes[pos..pos + 2].copy_from_slice(&1u16.to_be_bytes());
    expect_format_error(&bytes, "this_class");
}

#[test]
fn test_super_class_out_of_range() {
    let mut bytes = point_class();
    let pos = after_pool(&bytes) + 4;
    bytes[pos..pos + 2].copy_from_slice(&0xFFF0u16.to_be_bytes());
    expect_format_error(&bytes, "invalid constant pool index");
}

#[test]
fn test_class_entry_pointing_at_integer() {
    let mut b = ClassBuilder::new("C", Some("java/lang/Object"));
    let int_index = b.pool().integer(99_999);
    b.pool().raw(ConstantPoolEntry::Class {
        name_index: int_index,
    });
    expect_format_error(&b.build().unwrap(), "expected tag 1");
}

#[test]
fn test_method_descriptor_must_parse() {
    let mut b = ClassBuilder::new("D", Some("java/lang/Object"));
    b.bodiless_method(MethodAccess::ABSTRACT | MethodAccess::PUBLIC, "f", "(I");
    expect_format_error(&b.build().unwrap(), "invalid descriptor");
}

#[test]
fn test_duplicate_field_rejected() {
    let mut b = ClassBuilder::new("Dup", Some("java/lang/Object"));
    b.field(FieldAccess::PUBLIC, "a", "I");
    b.field(FieldAccess::PUBLIC, "a", "I");
    expect_format_error(&b.build().unwrap(), "duplicate field");
}

#[test]
fn test_attribute_length_mismatch() {
    let mut b = ClassBuilder::new("L", Some("java/lang/Object"));
    b.source_file("L.java");
    let mut bytes = b.build().unwrap();
    // SourceFile is the last attribute: its u4 length sits 6 bytes from the end.
    let at = bytes.len() - 6;
    bytes[at..at + 4].copy_from_slice(&4u32.to_be_bytes());
    bytes.extend_from_slice(&[0, 0]);
    expect_format_error(&bytes, "SourceFile attribute declares 4 bytes");
}

#[test]
fn test_empty_input() {
    expect_format_error(&[], "truncated");
}

// ============================================================================
// Descriptors
// ============================================================================

#[test]
fn test_descriptor_display_roundtrip() {
    for d in ["(Ljava/lang/String;[[IJ)Ljava/lang/Object;", "()V", "([C)Z"] {
        assert_eq!(MethodDescriptor::parse(d).unwrap().to_string(), d);
    }
}

#[test]
fn test_default_values() {
    assert_eq!(FieldType::parse("J").unwrap().default_value(), core_types::Value::Long(0));
    assert_eq!(FieldType::parse("Z").unwrap().default_value(), core_types::Value::Int(0));
    assert_eq!(
        FieldType::parse("Ljava/lang/Object;").unwrap().default_value(),
        core_types::Value::Null
    );
}
