use kestrel_jit::x86_64::emitter::*;
use kestrel_jit::x86_64::regs::{FpReg, Reg};
use kestrel_jit::CodeBuffer;

fn emitted(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
    let mut buf = CodeBuffer::new();
    f(&mut buf);
    buf.as_slice().to_vec()
}

#[test]
fn mov_rr_64() {
    // mov rax, rbx
    let b = emitted(|buf| emit_mov_rr(buf, true, Reg::Rax, Reg::Rbx));
    assert_eq!(b, vec![0x48, 0x89, 0xD8]);
}

#[test]
fn push_pop() {
    assert_eq!(emitted(|b| emit_push(b, Reg::Rbp)), vec![0x55]);
    assert_eq!(emitted(|b| emit_push(b, Reg::R10)), vec![0x41, 0x52]);
    assert_eq!(emitted(|b| emit_pop(b, Reg::Rbp)), vec![0x5D]);
}

#[test]
fn store_32_rbp_disp8() {
    // mov [rbp-8], eax
    let b = emitted(|buf| emit_store_w(buf, 4, Reg::Rax, Reg::Rbp, -8));
    assert_eq!(b, vec![0x89, 0x45, 0xF8]);
}

#[test]
fn load_byte_zero_extends() {
    // movzx eax, byte [rbp-1]
    let b = emitted(|buf| emit_load_w(buf, 1, Reg::Rax, Reg::Rbp, -1));
    assert_eq!(b, vec![0x0F, 0xB6, 0x45, 0xFF]);
}

#[test]
fn byte_store_sil_needs_rex() {
    // mov [rax], sil
    let b = emitted(|buf| emit_store_w(buf, 1, Reg::Rsi, Reg::Rax, 0));
    assert_eq!(b, vec![0x40, 0x88, 0x30]);
}

#[test]
fn store_16_has_data16_prefix() {
    let b = emitted(|buf| emit_store_w(buf, 2, Reg::Rcx, Reg::Rax, 4));
    assert_eq!(b, vec![0x66, 0x89, 0x48, 0x04]);
}

#[test]
fn movsd_load() {
    // movsd xmm0, [rbp-16]
    let b = emitted(|buf| emit_fp_load(buf, 8, FpReg::Xmm0, Reg::Rbp, -16));
    assert_eq!(b, vec![0xF2, 0x0F, 0x10, 0x45, 0xF0]);
}

#[test]
fn movss_store() {
    // movss [rbp-4], xmm1
    let b = emitted(|buf| emit_fp_store(buf, 4, FpReg::Xmm1, Reg::Rbp, -4));
    assert_eq!(b, vec![0xF3, 0x0F, 0x11, 0x4D, 0xFC]);
}

#[test]
fn movq_gp_from_xmm() {
    // movq rax, xmm0
    let b = emitted(|buf| emit_mov_gp_fp(buf, true, Reg::Rax, FpReg::Xmm0));
    assert_eq!(b, vec![0x66, 0x48, 0x0F, 0x7E, 0xC0]);
}

#[test]
fn addsd_rr() {
    // addsd xmm0, xmm1
    let b = emitted(|buf| emit_fp_arith_rr(buf, FpOp::Add, 8, FpReg::Xmm0, FpReg::Xmm1));
    assert_eq!(b, vec![0xF2, 0x0F, 0x58, 0xC1]);
}

#[test]
fn ucomisd() {
    let b = emitted(|buf| emit_fp_ucomi(buf, 8, FpReg::Xmm0, FpReg::Xmm1));
    assert_eq!(b, vec![0x66, 0x0F, 0x2E, 0xC1]);
}

#[test]
fn sub_rsp_imm8() {
    // sub rsp, 0x40
    let b = emitted(|buf| emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, 0x40));
    assert_eq!(b, vec![0x48, 0x83, 0xEC, 0x40]);
}

#[test]
fn xor_zeroing_mov() {
    // mov reg, 0 uses the xor form
    let b = emitted(|buf| emit_mov_ri(buf, false, Reg::Rdi, 0));
    assert_eq!(b, vec![0x31, 0xFF]);
}

#[test]
fn mov_imm64_slot_is_patchable() {
    let mut buf = CodeBuffer::new();
    let slot = emit_mov_ri64_slot(&mut buf, Reg::R11, 0);
    assert_eq!(buf.offset() - slot, 8);
    buf.patch_u64(slot, 0x1111_2222_3333_4444);
    // 10-byte movabs: REX.W+B, B8+3, imm64
    assert_eq!(buf.as_slice()[0], 0x49);
    assert_eq!(buf.as_slice()[1], 0xBB);
}

#[test]
fn indirect_jump_through_table() {
    // jmp [r10 + rdx*8]
    let b = emitted(|buf| emit_jmp_sib(buf, Reg::R10, Reg::Rdx, 0));
    assert_eq!(b, vec![0x41, 0xFF, 0x24, 0xD2]);
}

#[test]
fn rip_relative_lea() {
    let mut buf = CodeBuffer::new();
    let slot = emit_lea_rip(&mut buf, Reg::R10);
    assert_eq!(buf.as_slice()[..3], [0x4C, 0x8D, 0x15]);
    assert_eq!(slot, 3);
    assert_eq!(buf.offset(), 7);
}

#[test]
fn shift_by_cl() {
    // shl edx, cl
    let b = emitted(|buf| emit_shift_cl(buf, ShiftOp::Shl, false, Reg::Rdx));
    assert_eq!(b, vec![0xD3, 0xE2]);
}

#[test]
fn short_branch_binding() {
    let mut buf = CodeBuffer::new();
    let l = emit_jcc8(&mut buf, X86Cond::Je);
    buf.emit_u8(0x90);
    buf.emit_u8(0x90);
    bind_local8(&mut buf, l);
    // disp from byte after the placeholder to the bind point
    assert_eq!(buf.as_slice(), &[0x74, 0x02, 0x90, 0x90]);
}

#[test]
#[should_panic]
fn short_branch_overflow_hard_fails() {
    let mut buf = CodeBuffer::new();
    let l = emit_jmp8(&mut buf);
    for _ in 0..200 {
        buf.emit_u8(0x90);
    }
    bind_local8(&mut buf, l);
}

#[test]
fn near_branch_binding() {
    let mut buf = CodeBuffer::new();
    let l = emit_jmp32(&mut buf);
    buf.emit_u8(0x90);
    bind_local32(&mut buf, l);
    assert_eq!(buf.as_slice(), &[0xE9, 0x01, 0x00, 0x00, 0x00, 0x90]);
}

#[test]
fn condition_inversion() {
    assert_eq!(X86Cond::Je.invert(), X86Cond::Jne);
    assert_eq!(X86Cond::Jl.invert(), X86Cond::Jge);
    assert_eq!(X86Cond::Jb.invert(), X86Cond::Jae);
}
