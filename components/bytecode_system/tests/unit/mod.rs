//! Unit tests for the bytecode decoder

use bytecode_system::{
    decode, ArrayKind, Cond, DecodeError, LocalKind, NumKind, Opcode, PrimitiveType, ReturnKind,
    SwitchCases,
};
use classfile::{opcodes as op, ClassBuilder, ClassFileReader, MethodAccess};

/// Assembles a static method body and returns its raw code bytes.
fn assemble<F>(descriptor: &str, body: F) -> Vec<u8>
where
    F: FnOnce(&mut classfile::CodeBuilder<'_>),
{
    let mut builder = ClassBuilder::new("T", Some("java/lang/Object"));
    builder.method(MethodAccess::STATIC, "m", descriptor, body);
    let class = ClassFileReader::parse(&builder.build().unwrap()).unwrap();
    class.methods[0].code().unwrap().code.clone()
}

// ============================================================================
// Instruction families
// ============================================================================

#[test]
fn test_constants_fold_into_iconst() {
    let code = assemble("()V", |c| {
        c.iconst(-1).iconst(5).iconst(100).iconst(-300).op(op::RETURN);
    });
    let ops: Vec<_> = decode(&code).unwrap().instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(
        &ops[..4],
        &[
            Opcode::Iconst(-1),
            Opcode::Iconst(5),
            Opcode::Iconst(100),
            Opcode::Iconst(-300)
        ]
    );
}

#[test]
fn test_typed_array_and_arithmetic() {
    let code = [
        op::CALOAD,
        op::SASTORE,
        op::BALOAD,
        op::LREM,
        op::DNEG,
        op::LUSHR,
        op::D2I,
        op::RETURN,
    ];
    let ops: Vec<_> = decode(&code).unwrap().instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::ArrayLoad(ArrayKind::Char),
            Opcode::ArrayStore(ArrayKind::Short),
            Opcode::ArrayLoad(ArrayKind::Byte),
            Opcode::Rem(NumKind::Long),
            Opcode::Neg(NumKind::Double),
            Opcode::Ushr(bytecode_system::IntKind::Long),
            Opcode::Convert(NumKind::Double, NumKind::Int),
            Opcode::Return(ReturnKind::Void),
        ]
    );
}

#[test]
fn test_wide_load_store() {
    let code = assemble("()V", |c| {
        c.iconst(1).istore(400).dload(260).op(op::POP2).op(op::RETURN);
    });
    let decoded = decode(&code).unwrap();
    assert_eq!(decoded.instructions[1].opcode, Opcode::Store(LocalKind::Int, 400));
    assert_eq!(decoded.instructions[2].opcode, Opcode::Load(LocalKind::Double, 260));
}

#[test]
fn test_loop_targets_are_indices() {
    let code = assemble("(I)V", |c| {
        let top = c.new_label();
        let done = c.new_label();
        c.bind(top);
        c.iload(0).branch(op::IFLE, done);
        c.iinc(0, -1).goto(top);
        c.bind(done);
        c.op(op::RETURN);
    });
    let decoded = decode(&code).unwrap();
    assert_eq!(decoded.instructions[1].opcode, Opcode::If(Cond::Le, 4));
    assert_eq!(decoded.instructions[3].opcode, Opcode::Goto(0));
}

// ============================================================================
// Switches
// ============================================================================

#[test]
fn test_tableswitch_decoding() {
    let code = assemble("(I)I", |c| {
        let a = c.new_label();
        let b = c.new_label();
        let d = c.new_label();
        c.iload(0).tableswitch(1, d, &[a, b]);
        c.bind(a);
        c.iconst(10).op(op::IRETURN);
        c.bind(b);
        c.iconst(20).op(op::IRETURN);
        c.bind(d);
        c.iconst(0).op(op::IRETURN);
    });
    let decoded = decode(&code).unwrap();
    let table = match decoded.instructions[1].opcode {
        Opcode::TableSwitch(t) => &decoded.switch_tables[t],
        other => panic!("unexpected {:?}", other),
    };
    assert!(matches!(table.cases, SwitchCases::Table { low: 1, .. }));
    assert_eq!(table.target(1), 2);
    assert_eq!(table.target(2), 4);
    assert_eq!(table.target(3), 6);
    assert_eq!(table.target(-7), 6);
}

#[test]
fn test_lookupswitch_decoding() {
    let code = assemble("(I)I", |c| {
        let a = c.new_label();
        let d = c.new_label();
        c.iload(0).lookupswitch(d, &[(1000, a), (-5, d)]);
        c.bind(a);
        c.iconst(1).op(op::IRETURN);
        c.bind(d);
        c.iconst(0).op(op::IRETURN);
    });
    let decoded = decode(&code).unwrap();
    let table = &decoded.switch_tables[0];
    assert_eq!(table.target(1000), 2);
    assert_eq!(table.target(-5), 4);
    assert_eq!(table.target(7), 4);
    assert_eq!(table.all_targets().len(), 3);
}

#[test]
fn test_unsorted_lookupswitch_rejected() {
    // lookupswitch at 0, 3 pad bytes, default=+28, npairs=2, (5,+28), (1,+28), return
    let mut code = vec![op::LOOKUPSWITCH, 0, 0, 0];
    for v in [28, 2, 5, 28, 1, 28] {
        code.extend_from_slice(&(v as i32).to_be_bytes());
    }
    code.push(op::RETURN);
    assert!(matches!(decode(&code), Err(DecodeError::InvalidOperand { .. })));
}

#[test]
fn test_tableswitch_low_above_high() {
    let mut code = vec![op::TABLESWITCH, 0, 0, 0];
    for v in [16, 5, 4] {
        code.extend_from_slice(&(v as i32).to_be_bytes());
    }
    code.push(op::RETURN);
    assert!(matches!(decode(&code), Err(DecodeError::InvalidOperand { .. })));
}

// ============================================================================
// Structural errors
// ============================================================================

#[test]
fn test_unknown_opcode() {
    assert_eq!(
        decode(&[op::NOP, 0xcb]),
        Err(DecodeError::UnknownOpcode { pc: 1, opcode: 0xcb })
    );
}

#[test]
fn test_invalid_wide() {
    assert_eq!(
        decode(&[op::WIDE, op::NOP, op::RETURN]),
        Err(DecodeError::InvalidWide { pc: 0, opcode: op::NOP })
    );
}

#[test]
fn test_newarray_type_code() {
    assert!(matches!(
        decode(&[op::NEWARRAY, 3, op::ARETURN]),
        Err(DecodeError::InvalidOperand { .. })
    ));
    let ok = decode(&[op::NEWARRAY, 4, op::ARETURN]).unwrap();
    assert_eq!(ok.instructions[0].opcode, Opcode::NewArray(PrimitiveType::Boolean));
}

#[test]
fn test_invokeinterface_zero_count() {
    assert!(matches!(
        decode(&[op::INVOKEINTERFACE, 0, 1, 0, 0, op::RETURN]),
        Err(DecodeError::InvalidOperand { .. })
    ));
}

#[test]
fn test_multianewarray_zero_dimensions() {
    assert!(matches!(
        decode(&[op::MULTIANEWARRAY, 0, 1, 0, op::ARETURN]),
        Err(DecodeError::InvalidOperand { .. })
    ));
}

#[test]
fn test_branch_into_operand_bytes() {
    // sipush 1; goto -2 (lands inside sipush's operand); return
    let code = [op::SIPUSH, 0, 1, op::GOTO, 0xff, 0xfe, op::RETURN];
    assert!(matches!(
        decode(&code),
        Err(DecodeError::BadTarget { pc: 3, target: 1 })
    ));
}

#[test]
fn test_empty_code() {
    assert_eq!(decode(&[]), Err(DecodeError::Empty));
}
