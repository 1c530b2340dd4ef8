#![allow(non_upper_case_globals)]

use crate::code_buffer::CodeBuffer;
use crate::x86_64::regs::{FpReg, Reg};

// -- Prefix flags --

pub const P_EXT: u32 = 0x100; // 0x0F prefix
pub const P_EXT38: u32 = 0x200; // 0x0F 0x38 prefix
pub const P_DATA16: u32 = 0x400; // 0x66 prefix
pub const P_REXW: u32 = 0x1000; // REX.W = 1
pub const P_REXB_R: u32 = 0x2000; // REG field as byte register
pub const P_REXB_RM: u32 = 0x4000; // R/M field as byte register
pub const P_SIMDF3: u32 = 0x20000; // 0xF3 prefix
pub const P_SIMDF2: u32 = 0x40000; // 0xF2 prefix

// -- Opcode constants (OPC_*) --

// Arithmetic
pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_ARITH_EvIz: u32 = 0x81;
pub const OPC_ARITH_GvEv: u32 = 0x03;
pub const OPC_ARITH_EvGv: u32 = 0x01;

// Shift
pub const OPC_SHIFT_1: u32 = 0xD1;
pub const OPC_SHIFT_Ib: u32 = 0xC1;
pub const OPC_SHIFT_cl: u32 = 0xD3;

// Data movement
pub const OPC_MOVB_EvGv: u32 = 0x88;
pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVL_GvEv: u32 = 0x8B;
pub const OPC_MOVB_EvIz: u32 = 0xC6;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVL_Iv: u32 = 0xB8;

// Extensions
pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_MOVSBL: u32 = 0xBE | P_EXT;
pub const OPC_MOVSWL: u32 = 0xBF | P_EXT;
pub const OPC_MOVSLQ: u32 = 0x63 | P_REXW;

// Branch
pub const OPC_JCC_long: u32 = 0x80 | P_EXT;
pub const OPC_JCC_short: u32 = 0x70;
pub const OPC_JMP_short: u32 = 0xEB;
pub const OPC_JMP_long: u32 = 0xE9;
pub const OPC_CALL_Jz: u32 = 0xE8;

// Compare / conditional
pub const OPC_SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
pub const OPC_TESTL: u32 = 0x85;

// Group opcodes
pub const OPC_GRP3_Ev: u32 = 0xF7;
pub const OPC_GRP5: u32 = 0xFF;

// Multiply
pub const OPC_IMUL_GvEv: u32 = 0xAF | P_EXT;
pub const OPC_IMUL_GvEvIb: u32 = 0x6B;
pub const OPC_IMUL_GvEvIz: u32 = 0x69;

// Misc
pub const OPC_LEA: u32 = 0x8D;
pub const OPC_PUSH_r32: u32 = 0x50;
pub const OPC_POP_r32: u32 = 0x58;
pub const OPC_RET: u32 = 0xC3;
pub const OPC_LEAVE: u32 = 0xC9;
pub const OPC_UD2: u32 = 0x0B | P_EXT;

// SSE scalar group. The F2/F3 prefixes select double/single precision.
pub const OPC_SSE_LD: u32 = 0x10 | P_EXT; // MOVSS/MOVSD xmm, r/m
pub const OPC_SSE_ST: u32 = 0x11 | P_EXT; // MOVSS/MOVSD r/m, xmm
pub const OPC_SSE_ADD: u32 = 0x58 | P_EXT;
pub const OPC_SSE_MUL: u32 = 0x59 | P_EXT;
pub const OPC_SSE_SUB: u32 = 0x5C | P_EXT;
pub const OPC_SSE_DIV: u32 = 0x5E | P_EXT;
pub const OPC_UCOMIS: u32 = 0x2E | P_EXT; // + P_DATA16 for double
pub const OPC_XORP: u32 = 0x57 | P_EXT; // + P_DATA16 for double
pub const OPC_MOVD_VyEy: u32 = 0x6E | P_EXT | P_DATA16; // xmm <- gp
pub const OPC_MOVD_EyVy: u32 = 0x7E | P_EXT | P_DATA16; // gp <- xmm

// -- Sub-operation enums --

/// Arithmetic sub-opcodes (used in /r field of 0x81/0x83 and shifted into GvEv).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Shift sub-opcodes (used in /r field of 0xC1/0xD1/0xD3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Group 3 extension codes (used in /r field of 0xF7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext3Op {
    Not = 2,
    Neg = 3,
    Mul = 4,
    Imul = 5,
    Div = 6,
    Idiv = 7,
}

/// Group 5 extension codes (used in /r field of 0xFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext5Op {
    CallN = 2,
    JmpN = 4,
    PushEv = 6,
}

/// SSE scalar arithmetic selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl FpOp {
    const fn opc(self) -> u32 {
        match self {
            FpOp::Add => OPC_SSE_ADD,
            FpOp::Sub => OPC_SSE_SUB,
            FpOp::Mul => OPC_SSE_MUL,
            FpOp::Div => OPC_SSE_DIV,
        }
    }
}

/// x86 condition codes for Jcc/SETcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

impl X86Cond {
    /// Return the inverted condition.
    pub fn invert(self) -> Self {
        // Flip the low bit
        unsafe { core::mem::transmute(self as u8 ^ 1) }
    }
}

// -- Core encoding functions --

/// Helper: return P_REXW if `rexw` is true.
#[inline]
fn rexw_flag(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

/// SSE prefix selecting scalar width: F2 (double) for 8 bytes,
/// F3 (single) for 4.
#[inline]
fn sse_width_flag(width: u8) -> u32 {
    if width == 8 {
        P_SIMDF2
    } else {
        P_SIMDF3
    }
}

/// Emit prefixes + opcode byte. `r` is the reg field, `rm` the r/m
/// field, both raw register numbers (0-15). Pass 0 for unused fields.
pub fn emit_opc(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08; // REX.W
    }
    if r >= 8 {
        rex |= 0x04; // REX.R
    }
    if rm >= 8 {
        rex |= 0x01; // REX.B
    }
    // Byte-register access to SPL/BPL/SIL/DIL needs a REX prefix even
    // without any high bits set.
    if (opc & P_REXB_R != 0 && (4..8).contains(&r))
        || (opc & P_REXB_RM != 0 && (4..8).contains(&rm))
    {
        rex |= 0x40;
    }

    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if opc & P_SIMDF3 != 0 {
        buf.emit_u8(0xF3);
    } else if opc & P_SIMDF2 != 0 {
        buf.emit_u8(0xF2);
    }

    if rex != 0 {
        buf.emit_u8(0x40 | (rex & 0x0F));
    }

    if opc & (P_EXT | P_EXT38) != 0 {
        buf.emit_u8(0x0F);
        if opc & P_EXT38 != 0 {
            buf.emit_u8(0x38);
        }
    }

    buf.emit_u8(opc as u8);
}

/// Emit opcode + ModR/M for a register-register operation (raw ids).
fn emit_modrm_raw(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    emit_opc(buf, opc, r, rm);
    buf.emit_u8(0xC0 | ((r & 7) << 3) | (rm & 7));
}

/// Emit opcode + ModR/M for register-register operation.
pub fn emit_modrm(buf: &mut CodeBuffer, opc: u32, r: Reg, rm: Reg) {
    emit_modrm_raw(buf, opc, r as u8, rm as u8);
}

/// Emit opcode + ModR/M with /r extension (for group opcodes).
pub fn emit_modrm_ext(buf: &mut CodeBuffer, opc: u32, ext: u8, rm: Reg) {
    emit_opc(buf, opc, ext & 7, rm as u8);
    buf.emit_u8(0xC0 | ((ext & 7) << 3) | rm.low3());
}

/// ModR/M + displacement body shared by all [base + offset] forms.
/// Handles the special cases: RBP/R13 need an explicit disp8, RSP/R12
/// need a SIB byte.
fn modrm_offset_body(buf: &mut CodeBuffer, r3: u8, base: Reg, offset: i32) {
    let b3 = base.low3();
    if offset == 0 && b3 != 5 {
        if b3 == 4 {
            buf.emit_u8((r3 << 3) | 0x04);
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8((r3 << 3) | b3);
        }
    } else if (-128..=127).contains(&offset) {
        if b3 == 4 {
            buf.emit_u8(0x44 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x40 | (r3 << 3) | b3);
        }
        buf.emit_u8(offset as u8);
    } else {
        if b3 == 4 {
            buf.emit_u8(0x84 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x80 | (r3 << 3) | b3);
        }
        buf.emit_u32(offset as u32);
    }
}

/// Emit opcode + ModR/M + displacement for memory [base + offset]
/// (raw reg-field id, so SSE registers work too).
fn emit_modrm_offset_raw(buf: &mut CodeBuffer, opc: u32, r: u8, base: Reg, offset: i32) {
    emit_opc(buf, opc, r, base as u8);
    modrm_offset_body(buf, r & 7, base, offset);
}

/// Emit opcode + ModR/M + displacement for memory [base + offset].
pub fn emit_modrm_offset(buf: &mut CodeBuffer, opc: u32, r: Reg, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, opc, r as u8, base, offset);
}

/// Emit opcode + ModR/M with /r extension for memory [base + offset].
pub fn emit_modrm_ext_offset(buf: &mut CodeBuffer, opc: u32, ext: u8, base: Reg, offset: i32) {
    emit_opc(buf, opc, ext & 7, base as u8);
    modrm_offset_body(buf, ext & 7, base, offset);
}

/// Emit opcode with REX prefix, 3-register variant (r, rm, index).
fn emit_opc_3(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8, index: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08;
    }
    if r >= 8 {
        rex |= 0x04;
    }
    if index >= 8 {
        rex |= 0x02; // REX.X
    }
    if rm >= 8 {
        rex |= 0x01;
    }

    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if opc & P_SIMDF3 != 0 {
        buf.emit_u8(0xF3);
    } else if opc & P_SIMDF2 != 0 {
        buf.emit_u8(0xF2);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & (P_EXT | P_EXT38) != 0 {
        buf.emit_u8(0x0F);
        if opc & P_EXT38 != 0 {
            buf.emit_u8(0x38);
        }
    }
    buf.emit_u8(opc as u8);
}

/// Emit opcode + ModR/M + SIB for memory [base + index*scale + offset]
/// (raw reg-field id).
fn emit_modrm_sib_raw(
    buf: &mut CodeBuffer,
    opc: u32,
    r: u8,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    assert!(index != Reg::Rsp, "RSP cannot be an index register");
    emit_opc_3(buf, opc, r, base as u8, index as u8);

    let r3 = r & 7;
    let b3 = base.low3();
    let x3 = index.low3();
    let sib = (shift << 6) | (x3 << 3) | b3;

    if offset == 0 && b3 != 5 {
        buf.emit_u8((r3 << 3) | 0x04);
        buf.emit_u8(sib);
    } else if (-128..=127).contains(&offset) {
        buf.emit_u8(0x44 | (r3 << 3));
        buf.emit_u8(sib);
        buf.emit_u8(offset as u8);
    } else {
        buf.emit_u8(0x84 | (r3 << 3));
        buf.emit_u8(sib);
        buf.emit_u32(offset as u32);
    }
}

/// Emit opcode + ModR/M + SIB for memory [base + index*scale + offset].
pub fn emit_modrm_sib(
    buf: &mut CodeBuffer,
    opc: u32,
    r: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    emit_modrm_sib_raw(buf, opc, r as u8, base, index, shift, offset);
}

// -- Arithmetic instructions --

/// Emit arithmetic reg, reg (ADD/SUB/AND/OR/XOR/CMP).
pub fn emit_arith_rr(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    let opc = (OPC_ARITH_GvEv + ((op as u32) << 3)) | rexw_flag(rexw);
    emit_modrm(buf, opc, dst, src);
}

/// Emit arithmetic reg, [base+offset] (load-op).
pub fn emit_arith_rm(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    dst: Reg,
    base: Reg,
    offset: i32,
) {
    let opc = (OPC_ARITH_GvEv + ((op as u32) << 3)) | rexw_flag(rexw);
    emit_modrm_offset(buf, opc, dst, base, offset);
}

/// Emit arithmetic reg, imm (auto-selects imm8 vs imm32).
pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    let w = rexw_flag(rexw);
    if (-128..=127).contains(&imm) {
        emit_modrm_ext(buf, OPC_ARITH_EvIb | w, op as u8, dst);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm_ext(buf, OPC_ARITH_EvIz | w, op as u8, dst);
        buf.emit_u32(imm as u32);
    }
}

/// Emit NEG reg.
pub fn emit_neg(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Neg as u8, reg);
}

// -- Shift instructions --

/// Emit shift reg, imm8.
pub fn emit_shift_ri(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, dst: Reg, imm: u8) {
    let w = rexw_flag(rexw);
    if imm == 1 {
        emit_modrm_ext(buf, OPC_SHIFT_1 | w, op as u8, dst);
    } else {
        emit_modrm_ext(buf, OPC_SHIFT_Ib | w, op as u8, dst);
        buf.emit_u8(imm);
    }
}

/// Emit shift reg, CL.
pub fn emit_shift_cl(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, dst: Reg) {
    emit_modrm_ext(buf, OPC_SHIFT_cl | rexw_flag(rexw), op as u8, dst);
}

// -- Data movement --

/// Emit MOV reg, reg (32-bit or 64-bit).
pub fn emit_mov_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, dst);
}

/// Emit MOV reg, imm with the shortest usable encoding.
pub fn emit_mov_ri(buf: &mut CodeBuffer, rexw: bool, reg: Reg, val: u64) {
    if val == 0 {
        // xor reg, reg
        emit_modrm(buf, 0x31, reg, reg);
    } else if !rexw || val <= u32::MAX as u64 {
        emit_opc(buf, OPC_MOVL_Iv + (reg.low3() as u32), 0, reg as u8);
        buf.emit_u32(val as u32);
    } else if val as i64 >= i32::MIN as i64 && val as i64 <= i32::MAX as i64 {
        emit_modrm_ext(buf, OPC_MOVL_EvIz | P_REXW, 0, reg);
        buf.emit_u32(val as u32);
    } else {
        emit_opc(buf, (OPC_MOVL_Iv + (reg.low3() as u32)) | P_REXW, 0, reg as u8);
        buf.emit_u64(val);
    }
}

/// Emit a MOV reg, imm64 using the full 10-byte form regardless of the
/// value, leaving an 8-byte slot that can be patched later. Returns the
/// buffer offset of the imm64 slot.
pub fn emit_mov_ri64_slot(buf: &mut CodeBuffer, reg: Reg, val: u64) -> usize {
    emit_opc(buf, (OPC_MOVL_Iv + (reg.low3() as u32)) | P_REXW, 0, reg as u8);
    let slot = buf.offset();
    buf.emit_u64(val);
    slot
}

/// Width-dispatched load: zero-extends 1/2/4-byte values into the full
/// register, so sub-width values never carry stale upper bits.
pub fn emit_load_w(buf: &mut CodeBuffer, width: u8, dst: Reg, base: Reg, offset: i32) {
    let opc = match width {
        1 => OPC_MOVZBL,
        2 => OPC_MOVZWL,
        4 => OPC_MOVL_GvEv,
        8 => OPC_MOVL_GvEv | P_REXW,
        _ => panic!("invalid load width {width}"),
    };
    emit_modrm_offset(buf, opc, dst, base, offset);
}

/// Width-dispatched store. Sub-width stores use the width-restricted
/// store forms so bytes outside the requested width are never written.
pub fn emit_store_w(buf: &mut CodeBuffer, width: u8, src: Reg, base: Reg, offset: i32) {
    let opc = match width {
        1 => OPC_MOVB_EvGv | P_REXB_R,
        2 => OPC_MOVL_EvGv | P_DATA16,
        4 => OPC_MOVL_EvGv,
        8 => OPC_MOVL_EvGv | P_REXW,
        _ => panic!("invalid store width {width}"),
    };
    emit_modrm_offset(buf, opc, src, base, offset);
}

/// Width-dispatched store of an immediate.
pub fn emit_store_imm_w(buf: &mut CodeBuffer, width: u8, base: Reg, offset: i32, imm: i32) {
    match width {
        1 => {
            emit_modrm_ext_offset(buf, OPC_MOVB_EvIz, 0, base, offset);
            buf.emit_u8(imm as u8);
        }
        2 => {
            emit_modrm_ext_offset(buf, OPC_MOVL_EvIz | P_DATA16, 0, base, offset);
            buf.emit_u16(imm as u16);
        }
        4 => {
            emit_modrm_ext_offset(buf, OPC_MOVL_EvIz, 0, base, offset);
            buf.emit_u32(imm as u32);
        }
        8 => {
            // imm32 sign-extended to 64 bits
            emit_modrm_ext_offset(buf, OPC_MOVL_EvIz | P_REXW, 0, base, offset);
            buf.emit_u32(imm as u32);
        }
        _ => panic!("invalid store width {width}"),
    }
}

/// Width-dispatched indexed load [base + index*scale + offset].
pub fn emit_load_sib_w(
    buf: &mut CodeBuffer,
    width: u8,
    dst: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    let opc = match width {
        1 => OPC_MOVZBL,
        2 => OPC_MOVZWL,
        4 => OPC_MOVL_GvEv,
        8 => OPC_MOVL_GvEv | P_REXW,
        _ => panic!("invalid load width {width}"),
    };
    emit_modrm_sib(buf, opc, dst, base, index, shift, offset);
}

/// Width-dispatched indexed store [base + index*scale + offset].
pub fn emit_store_sib_w(
    buf: &mut CodeBuffer,
    width: u8,
    src: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    let opc = match width {
        1 => OPC_MOVB_EvGv | P_REXB_R,
        2 => OPC_MOVL_EvGv | P_DATA16,
        4 => OPC_MOVL_EvGv,
        8 => OPC_MOVL_EvGv | P_REXW,
        _ => panic!("invalid store width {width}"),
    };
    emit_modrm_sib(buf, opc, src, base, index, shift, offset);
}

/// Emit LEA dst, [base+offset].
pub fn emit_lea(buf: &mut CodeBuffer, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_LEA | P_REXW, dst, base, offset);
}

/// Emit LEA dst, [rip + disp32]; returns the offset of the disp32 slot.
/// The displacement is relative to the end of the instruction.
pub fn emit_lea_rip(buf: &mut CodeBuffer, dst: Reg) -> usize {
    emit_opc(buf, OPC_LEA | P_REXW, dst as u8, 0);
    buf.emit_u8(0x05 | (dst.low3() << 3)); // mod=00 rm=101: RIP-relative
    let slot = buf.offset();
    buf.emit_u32(0);
    slot
}

// -- SSE scalar moves and arithmetic --

/// Emit MOVSS/MOVSD xmm, [base+offset].
pub fn emit_fp_load(buf: &mut CodeBuffer, width: u8, dst: FpReg, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, OPC_SSE_LD | sse_width_flag(width), dst as u8, base, offset);
}

/// Emit MOVSS/MOVSD [base+offset], xmm.
pub fn emit_fp_store(buf: &mut CodeBuffer, width: u8, src: FpReg, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, OPC_SSE_ST | sse_width_flag(width), src as u8, base, offset);
}

/// Emit MOVSS/MOVSD xmm, xmm.
pub fn emit_fp_mov_rr(buf: &mut CodeBuffer, width: u8, dst: FpReg, src: FpReg) {
    if dst == src {
        return;
    }
    emit_modrm_raw(buf, OPC_SSE_LD | sse_width_flag(width), dst as u8, src as u8);
}

/// Emit MOVSS/MOVSD xmm, [base+index*scale+offset].
pub fn emit_fp_load_sib(
    buf: &mut CodeBuffer,
    width: u8,
    dst: FpReg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    emit_modrm_sib_raw(
        buf,
        OPC_SSE_LD | sse_width_flag(width),
        dst as u8,
        base,
        index,
        shift,
        offset,
    );
}

/// Emit MOVSS/MOVSD [base+index*scale+offset], xmm.
pub fn emit_fp_store_sib(
    buf: &mut CodeBuffer,
    width: u8,
    src: FpReg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    emit_modrm_sib_raw(
        buf,
        OPC_SSE_ST | sse_width_flag(width),
        src as u8,
        base,
        index,
        shift,
        offset,
    );
}

/// Emit scalar ADDS/SUBS/MULS/DIVS xmm, xmm.
pub fn emit_fp_arith_rr(buf: &mut CodeBuffer, op: FpOp, width: u8, dst: FpReg, src: FpReg) {
    emit_modrm_raw(buf, op.opc() | sse_width_flag(width), dst as u8, src as u8);
}

/// Emit scalar ADDS/SUBS/MULS/DIVS xmm, [base+offset].
pub fn emit_fp_arith_rm(
    buf: &mut CodeBuffer,
    op: FpOp,
    width: u8,
    dst: FpReg,
    base: Reg,
    offset: i32,
) {
    emit_modrm_offset_raw(buf, op.opc() | sse_width_flag(width), dst as u8, base, offset);
}

/// Emit UCOMISS/UCOMISD a, b (sets flags like an unsigned compare).
pub fn emit_fp_ucomi(buf: &mut CodeBuffer, width: u8, a: FpReg, b: FpReg) {
    let opc = if width == 8 {
        OPC_UCOMIS | P_DATA16
    } else {
        OPC_UCOMIS
    };
    emit_modrm_raw(buf, opc, a as u8, b as u8);
}

/// Emit XORPS/XORPD dst, src (used for negation via a sign mask).
pub fn emit_fp_xor(buf: &mut CodeBuffer, width: u8, dst: FpReg, src: FpReg) {
    let opc = if width == 8 { OPC_XORP | P_DATA16 } else { OPC_XORP };
    emit_modrm_raw(buf, opc, dst as u8, src as u8);
}

/// Emit MOVD/MOVQ xmm, gp.
pub fn emit_mov_fp_gp(buf: &mut CodeBuffer, wide: bool, dst: FpReg, src: Reg) {
    emit_modrm_raw(buf, OPC_MOVD_VyEy | rexw_flag(wide), dst as u8, src as u8);
}

/// Emit MOVD/MOVQ gp, xmm.
pub fn emit_mov_gp_fp(buf: &mut CodeBuffer, wide: bool, dst: Reg, src: FpReg) {
    emit_modrm_raw(buf, OPC_MOVD_EyVy | rexw_flag(wide), src as u8, dst as u8);
}

// -- Multiply / divide --

/// Emit two-operand IMUL: dst = dst * src.
pub fn emit_imul_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_IMUL_GvEv | rexw_flag(rexw), dst, src);
}

/// Emit two-operand IMUL: dst = dst * [base+offset].
pub fn emit_imul_rm(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_IMUL_GvEv | rexw_flag(rexw), dst, base, offset);
}

/// Emit three-operand IMUL: dst = src * imm.
pub fn emit_imul_ri(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg, imm: i32) {
    let w = rexw_flag(rexw);
    if (-128..=127).contains(&imm) {
        emit_modrm(buf, OPC_IMUL_GvEvIb | w, dst, src);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm(buf, OPC_IMUL_GvEvIz | w, dst, src);
        buf.emit_u32(imm as u32);
    }
}

/// Emit DIV (unsigned): RAX = RDX:RAX / reg, RDX = remainder.
pub fn emit_div(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Div as u8, reg);
}

/// Emit IDIV (signed): RAX = RDX:RAX / reg, RDX = remainder.
pub fn emit_idiv(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Idiv as u8, reg);
}

/// Emit CDQ: sign-extend EAX into EDX:EAX.
pub fn emit_cdq(buf: &mut CodeBuffer) {
    buf.emit_u8(0x99);
}

/// Emit CQO: sign-extend RAX into RDX:RAX.
pub fn emit_cqo(buf: &mut CodeBuffer) {
    buf.emit_u8(0x48);
    buf.emit_u8(0x99);
}

// -- Branches and comparisons --

/// Emit TEST reg, reg.
pub fn emit_test_rr(buf: &mut CodeBuffer, rexw: bool, r1: Reg, r2: Reg) {
    emit_modrm(buf, OPC_TESTL | rexw_flag(rexw), r1, r2);
}

/// Emit SETcc dst (low byte of dst).
pub fn emit_setcc(buf: &mut CodeBuffer, cond: X86Cond, dst: Reg) {
    emit_modrm_ext(buf, OPC_SETCC + (cond as u32), 0, dst);
}

/// Emit indirect JMP through register.
pub fn emit_jmp_reg(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, Ext5Op::JmpN as u8, reg);
}

/// Emit indirect CALL through register.
pub fn emit_call_reg(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, Ext5Op::CallN as u8, reg);
}

/// Emit indirect CALL through [base+offset].
pub fn emit_call_mem(buf: &mut CodeBuffer, base: Reg, offset: i32) {
    emit_modrm_ext_offset(buf, OPC_GRP5, Ext5Op::CallN as u8, base, offset);
}

/// Emit indirect JMP through [base+index*8+offset] (switch tables).
pub fn emit_jmp_sib(buf: &mut CodeBuffer, base: Reg, index: Reg, offset: i32) {
    emit_modrm_sib_raw(buf, OPC_GRP5, Ext5Op::JmpN as u8, base, index, 3, offset);
}

// -- Local (compiler-internal) branches --
//
// Micro-branches inside a single opcode's lowering. The short forms
// hard-fail when the displacement outgrows i8; sequences that may grow
// (call arms, slow paths with hook calls) use the 32-bit forms.

/// Pending short forward branch; resolved by `bind_local8`.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct LocalLabel8(usize);

/// Pending near forward branch; resolved by `bind_local32`.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct LocalLabel32(usize);

pub fn emit_jcc8(buf: &mut CodeBuffer, cond: X86Cond) -> LocalLabel8 {
    buf.emit_u8((OPC_JCC_short as u8) + cond as u8);
    let pos = buf.offset();
    buf.emit_u8(0);
    LocalLabel8(pos)
}

pub fn emit_jmp8(buf: &mut CodeBuffer) -> LocalLabel8 {
    buf.emit_u8(OPC_JMP_short as u8);
    let pos = buf.offset();
    buf.emit_u8(0);
    LocalLabel8(pos)
}

/// Bind a short forward branch to the current offset.
pub fn bind_local8(buf: &mut CodeBuffer, label: LocalLabel8) {
    let disp = buf.offset() as i64 - (label.0 as i64 + 1);
    assert!(
        (-128..=127).contains(&disp),
        "short branch displacement {disp} out of range"
    );
    buf.patch_u8(label.0, disp as u8);
}

pub fn emit_jcc32(buf: &mut CodeBuffer, cond: X86Cond) -> LocalLabel32 {
    emit_opc(buf, OPC_JCC_long + cond as u32, 0, 0);
    let pos = buf.offset();
    buf.emit_u32(0);
    LocalLabel32(pos)
}

pub fn emit_jmp32(buf: &mut CodeBuffer) -> LocalLabel32 {
    buf.emit_u8(OPC_JMP_long as u8);
    let pos = buf.offset();
    buf.emit_u32(0);
    LocalLabel32(pos)
}

/// Bind a near forward branch to the current offset.
pub fn bind_local32(buf: &mut CodeBuffer, label: LocalLabel32) {
    let disp = buf.offset() as i64 - (label.0 as i64 + 4);
    assert!(
        (i32::MIN as i64..=i32::MAX as i64).contains(&disp),
        "near branch displacement {disp} out of range"
    );
    buf.patch_u32(label.0, disp as u32);
}

/// Emit a short backward JMP to a known offset.
pub fn emit_jmp8_to(buf: &mut CodeBuffer, target: usize) {
    let disp = target as i64 - (buf.offset() as i64 + 2);
    assert!(
        (-128..=127).contains(&disp),
        "short branch displacement {disp} out of range"
    );
    buf.emit_u8(OPC_JMP_short as u8);
    buf.emit_u8(disp as u8);
}

// -- Miscellaneous --

/// Emit PUSH reg.
pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_PUSH_r32 + (reg.low3() as u32), 0, reg as u8);
}

/// Emit POP reg.
pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_POP_r32 + (reg.low3() as u32), 0, reg as u8);
}

/// Emit RET.
pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(OPC_RET as u8);
}

/// Emit LEAVE (mov rsp, rbp; pop rbp).
pub fn emit_leave(buf: &mut CodeBuffer) {
    buf.emit_u8(OPC_LEAVE as u8);
}

/// Emit UD2 (must never be reached; placed after diverging calls).
pub fn emit_ud2(buf: &mut CodeBuffer) {
    emit_opc(buf, OPC_UD2, 0, 0);
}
