//! Calling-convention adapter.
//!
//! Three call shapes with distinct marshaling:
//! - bytecode→bytecode: every argument on the stack, arg 0 at the lowest
//!   address, stack padded to 16 bytes at the call including the
//!   return-address/frame-pointer pair, caller cleans up.
//! - bytecode→native: full System V classification driven by the
//!   native's declared signature.
//! - native→bytecode: one fixed trampoline per module that loops the
//!   argument array onto the stack and forwards the floating return
//!   value out of XMM0 when asked to.

use crate::code_buffer::CodeBuffer;
use crate::operand::{copy, Operand};
use crate::x86_64::emitter::*;
use crate::x86_64::regs::{
    Reg, CALL_ARG_REGS, CALL_SCRATCH, FP_ARG_REGS, SCRATCH,
};

/// Call an absolute native address through the call scratch register.
pub fn emit_call_abs(buf: &mut CodeBuffer, addr: usize) {
    emit_mov_ri(buf, true, CALL_SCRATCH, addr as u64);
    emit_call_reg(buf, CALL_SCRATCH);
}

/// Push bytecode-convention arguments. `args` are (home slot, width)
/// pairs; `bound` optionally prepends `[base + offset]` as the implicit
/// first argument of a bound closure. Values are pushed right-to-left
/// through the scratch register (widened loads, so no neighbouring
/// frame bytes leak into the argument slots). Returns the byte count to
/// pop after the call.
///
/// The caller's frame is 16-byte aligned at every call site, so the
/// only padding needed is one slot when the argument count is odd.
pub fn emit_bytecode_args(
    buf: &mut CodeBuffer,
    args: &[(i32, u8)],
    bound: Option<(Reg, i32)>,
) -> u32 {
    let n = args.len() + usize::from(bound.is_some());
    let pad: u32 = if n % 2 == 1 { 8 } else { 0 };
    if pad != 0 {
        emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, pad as i32);
    }
    for &(slot, width) in args.iter().rev() {
        emit_load_w(buf, width, SCRATCH, Reg::Rbp, slot);
        emit_push(buf, SCRATCH);
    }
    if let Some((base, offset)) = bound {
        emit_load_w(buf, 8, SCRATCH, base, offset);
        emit_push(buf, SCRATCH);
    }
    n as u32 * 8 + pad
}

/// Marshal arguments for a native call per System V: integer positions
/// into RDI..R9, float positions into XMM0..7, the overflow pushed
/// right-to-left. `args` are (home slot, width, is_float) triples read
/// from the caller's frame. Returns the byte count to pop.
pub fn emit_native_args(buf: &mut CodeBuffer, args: &[(i32, u8, bool)]) -> u32 {
    let mut int_idx = 0usize;
    let mut fp_idx = 0usize;
    let mut overflow: Vec<(i32, u8)> = Vec::new();

    for &(slot, width, float) in args {
        if float && fp_idx < FP_ARG_REGS.len() {
            copy(
                buf,
                &Operand::Fpu(FP_ARG_REGS[fp_idx]),
                &Operand::Stack(slot),
                width,
            )
            .expect("float argument marshaling");
            fp_idx += 1;
        } else if !float && int_idx < CALL_ARG_REGS.len() {
            copy(
                buf,
                &Operand::Cpu(CALL_ARG_REGS[int_idx]),
                &Operand::Stack(slot),
                width,
            )
            .expect("integer argument marshaling");
            int_idx += 1;
        } else {
            overflow.push((slot, width));
        }
    }

    let pad: u32 = if overflow.len() % 2 == 1 { 8 } else { 0 };
    if pad != 0 {
        emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, pad as i32);
    }
    for &(slot, width) in overflow.iter().rev() {
        emit_load_w(buf, width, SCRATCH, Reg::Rbp, slot);
        emit_push(buf, SCRATCH);
    }
    overflow.len() as u32 * 8 + pad
}

/// Build the native→bytecode callback entry at the current buffer
/// offset, once per module.
///
/// Native signature: `fn(fn_ptr, args: *const u64, count: u64,
/// ret_float: u64) -> u64`. Loops pushing `args[count-1] .. args[0]`
/// onto the stack (bytecode-call order), keeps the stack 16-byte
/// aligned for the call, and transfers XMM0 into RAX as raw bits when
/// the callee returns a float.
pub fn build_callback_trampoline(buf: &mut CodeBuffer) -> usize {
    let entry = buf.offset();

    emit_push(buf, Reg::Rbp);
    emit_mov_rr(buf, true, Reg::Rbp, Reg::Rsp);
    emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, 16);
    emit_store_w(buf, 8, Reg::Rcx, Reg::Rbp, -8); // ret_float flag

    // Odd argument count needs one pad slot to stay 16-byte aligned.
    emit_mov_rr(buf, true, Reg::Rax, Reg::Rdx);
    emit_arith_ri(buf, ArithOp::And, true, Reg::Rax, 1);
    emit_shift_ri(buf, ShiftOp::Shl, true, Reg::Rax, 3);
    emit_arith_rr(buf, ArithOp::Sub, true, Reg::Rsp, Reg::Rax);

    // Push args[count-1] .. args[0].
    emit_mov_rr(buf, true, SCRATCH, Reg::Rdx);
    let loop_top = buf.offset();
    emit_test_rr(buf, true, SCRATCH, SCRATCH);
    let done = emit_jcc8(buf, X86Cond::Je);
    emit_load_sib_w(buf, 8, CALL_SCRATCH, Reg::Rsi, SCRATCH, 3, -8);
    emit_push(buf, CALL_SCRATCH);
    emit_arith_ri(buf, ArithOp::Sub, true, SCRATCH, 1);
    emit_jmp8_to(buf, loop_top);
    bind_local8(buf, done);

    emit_call_reg(buf, Reg::Rdi);

    // Floating results come back in XMM0; hand them to the native
    // caller as raw bits in RAX.
    emit_load_w(buf, 8, Reg::Rcx, Reg::Rbp, -8);
    emit_test_rr(buf, true, Reg::Rcx, Reg::Rcx);
    let skip = emit_jcc8(buf, X86Cond::Je);
    emit_mov_gp_fp(buf, true, Reg::Rax, crate::x86_64::regs::FpReg::Xmm0);
    bind_local8(buf, skip);

    emit_leave(buf);
    emit_ret(buf);

    entry
}
