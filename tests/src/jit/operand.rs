use kestrel_jit::x86_64::regs::{FpReg, Reg};
use kestrel_jit::{copy, CodeBuffer, JitError, Operand};

#[test]
fn register_to_register_same_is_a_noop() {
    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Cpu(Reg::Rax), &Operand::Cpu(Reg::Rax), 8).unwrap();
    assert_eq!(buf.offset(), 0);
}

#[test]
fn constant_to_register() {
    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Cpu(Reg::Rax), &Operand::Const(42), 4).unwrap();
    // mov eax, 42
    assert_eq!(buf.as_slice(), &[0xB8, 42, 0, 0, 0]);
}

#[test]
fn stack_to_stack_goes_through_scratch() {
    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Stack(-8), &Operand::Stack(-16), 8).unwrap();
    // mov r11, [rbp-16]; mov [rbp-8], r11
    assert_eq!(
        buf.as_slice(),
        &[0x4C, 0x8B, 0x5D, 0xF0, 0x4C, 0x89, 0x5D, 0xF8]
    );
}

#[test]
fn sub_width_store_is_width_restricted() {
    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Stack(-4), &Operand::Cpu(Reg::Rax), 4).unwrap();
    // 32-bit store form, no REX.W
    assert_eq!(buf.as_slice(), &[0x89, 0x45, 0xFC]);

    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Stack(-1), &Operand::Cpu(Reg::Rax), 1).unwrap();
    // byte store form
    assert_eq!(buf.as_slice(), &[0x88, 0x45, 0xFF]);
}

#[test]
fn float_moves_use_sse_forms() {
    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Fpu(FpReg::Xmm0), &Operand::Stack(-8), 8).unwrap();
    assert_eq!(buf.as_slice(), &[0xF2, 0x0F, 0x10, 0x45, 0xF8]);

    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Stack(-8), &Operand::Fpu(FpReg::Xmm0), 8).unwrap();
    assert_eq!(buf.as_slice(), &[0xF2, 0x0F, 0x11, 0x45, 0xF8]);
}

#[test]
fn int_float_moves_use_the_dedicated_instruction() {
    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Fpu(FpReg::Xmm1), &Operand::Cpu(Reg::Rax), 8).unwrap();
    // movq xmm1, rax
    assert_eq!(buf.as_slice(), &[0x66, 0x48, 0x0F, 0x6E, 0xC8]);
}

#[test]
fn indexed_memory_operands() {
    let mut buf = CodeBuffer::new();
    let field = Operand::mem(Reg::Rax, 12);
    copy(&mut buf, &Operand::Cpu(Reg::Rcx), &field, 4).unwrap();
    // mov ecx, [rax+12]
    assert_eq!(buf.as_slice(), &[0x8B, 0x48, 0x0C]);
}

#[test]
fn absolute_address_destination() {
    let mut buf = CodeBuffer::new();
    copy(
        &mut buf,
        &Operand::Abs(0x1000),
        &Operand::Cpu(Reg::Rax),
        8,
    )
    .unwrap();
    // address materialized in the scratch register, then stored through:
    // mov r11d, 0x1000; mov [r11], rax
    assert_eq!(buf.as_slice()[..2], [0x41, 0xBB]);
}

#[test]
fn unsupported_combinations_are_reported() {
    let mut buf = CodeBuffer::new();
    // byte-wide float register copy has no rule
    let err = copy(&mut buf, &Operand::Fpu(FpReg::Xmm0), &Operand::Cpu(Reg::Rax), 1);
    assert!(matches!(err, Err(JitError::BadCopy { width: 1, .. })));

    // constants are not destinations
    let err = copy(&mut buf, &Operand::Const(1), &Operand::Cpu(Reg::Rax), 8);
    assert!(matches!(err, Err(JitError::BadCopy { .. })));

    // unused operands have no moves
    let err = copy(&mut buf, &Operand::Unused, &Operand::Unused, 8);
    assert!(matches!(err, Err(JitError::BadCopy { .. })));
}

#[test]
fn void_width_copies_emit_nothing() {
    let mut buf = CodeBuffer::new();
    copy(&mut buf, &Operand::Stack(-8), &Operand::Stack(-16), 0).unwrap();
    assert_eq!(buf.offset(), 0);
}
