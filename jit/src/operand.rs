//! Operand kinds and the copy algebra.
//!
//! Every value movement in the compiler goes through [`copy`]: constants
//! into registers, registers to stack slots, stack to stack, absolute
//! addresses, indexed object fields — for widths 1/2/4/8 and both
//! register files. The (kind, kind) dispatch is exhaustive; combinations
//! with no rule are reported as errors, never silently skipped.

use crate::code_buffer::CodeBuffer;
use crate::error::JitError;
use crate::x86_64::emitter::*;
use crate::x86_64::regs::{FpReg, Reg, CALL_SCRATCH, SCRATCH};

/// A physical operand: a hardware register of either file, or one of the
/// pseudo-kinds (frame-relative memory, immediate, absolute address,
/// indexed memory, unused).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Cpu(Reg),
    Fpu(FpReg),
    /// `[rbp + disp]` — a virtual register's home slot.
    Stack(i32),
    /// Immediate. Floating constants travel as raw bits.
    Const(i64),
    /// Memory at an absolute 64-bit address.
    Abs(u64),
    /// `[base + index*scale + disp]`.
    Indexed {
        base: Reg,
        index: Option<Reg>,
        scale: u8,
        disp: i32,
    },
    Unused,
}

impl Operand {
    /// Plain `[base + disp]` memory operand.
    pub fn mem(base: Reg, disp: i32) -> Operand {
        Operand::Indexed {
            base,
            index: None,
            scale: 1,
            disp,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Operand::Cpu(_) => "cpu",
            Operand::Fpu(_) => "fpu",
            Operand::Stack(_) => "stack",
            Operand::Const(_) => "const",
            Operand::Abs(_) => "abs",
            Operand::Indexed { .. } => "indexed",
            Operand::Unused => "unused",
        }
    }

    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Stack(_) | Operand::Indexed { .. })
    }
}

/// Scale factor as a SIB shift amount.
fn scale_shift(scale: u8) -> u8 {
    match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => panic!("invalid index scale {scale}"),
    }
}

fn bad(dst: &Operand, src: &Operand, width: u8) -> JitError {
    JitError::BadCopy {
        dst: dst.kind_name(),
        src: src.kind_name(),
        width,
    }
}

fn load_gp(buf: &mut CodeBuffer, width: u8, dst: Reg, mem: &Operand) {
    match *mem {
        Operand::Stack(disp) => emit_load_w(buf, width, dst, Reg::Rbp, disp),
        Operand::Indexed {
            base,
            index: None,
            disp,
            ..
        } => emit_load_w(buf, width, dst, base, disp),
        Operand::Indexed {
            base,
            index: Some(index),
            scale,
            disp,
        } => emit_load_sib_w(buf, width, dst, base, index, scale_shift(scale), disp),
        _ => unreachable!("load_gp on non-memory operand"),
    }
}

fn store_gp(buf: &mut CodeBuffer, width: u8, src: Reg, mem: &Operand) {
    match *mem {
        Operand::Stack(disp) => emit_store_w(buf, width, src, Reg::Rbp, disp),
        Operand::Indexed {
            base,
            index: None,
            disp,
            ..
        } => emit_store_w(buf, width, src, base, disp),
        Operand::Indexed {
            base,
            index: Some(index),
            scale,
            disp,
        } => emit_store_sib_w(buf, width, src, base, index, scale_shift(scale), disp),
        _ => unreachable!("store_gp on non-memory operand"),
    }
}

fn load_fp(buf: &mut CodeBuffer, width: u8, dst: FpReg, mem: &Operand) {
    match *mem {
        Operand::Stack(disp) => emit_fp_load(buf, width, dst, Reg::Rbp, disp),
        Operand::Indexed {
            base,
            index: None,
            disp,
            ..
        } => emit_fp_load(buf, width, dst, base, disp),
        Operand::Indexed {
            base,
            index: Some(index),
            scale,
            disp,
        } => emit_fp_load_sib(buf, width, dst, base, index, scale_shift(scale), disp),
        _ => unreachable!("load_fp on non-memory operand"),
    }
}

fn store_fp(buf: &mut CodeBuffer, width: u8, src: FpReg, mem: &Operand) {
    match *mem {
        Operand::Stack(disp) => emit_fp_store(buf, width, src, Reg::Rbp, disp),
        Operand::Indexed {
            base,
            index: None,
            disp,
            ..
        } => emit_fp_store(buf, width, src, base, disp),
        Operand::Indexed {
            base,
            index: Some(index),
            scale,
            disp,
        } => emit_fp_store_sib(buf, width, src, base, index, scale_shift(scale), disp),
        _ => unreachable!("store_fp on non-memory operand"),
    }
}

/// Truncate a constant to the requested width, zero-extended.
fn const_bits(val: i64, width: u8) -> u64 {
    match width {
        1 => val as u64 & 0xFF,
        2 => val as u64 & 0xFFFF,
        4 => val as u64 & 0xFFFF_FFFF,
        8 => val as u64,
        _ => panic!("invalid width {width}"),
    }
}

/// Move `width` bytes from `src` to `dst`.
///
/// Never writes bytes outside the requested width: sub-register stores
/// use width-restricted store forms, and loads zero-extend so stale
/// upper bits cannot leak into a later full-width store. Memory-to-memory
/// moves go through the R11 scratch; absolute-address operands
/// additionally use R10 when both sides need a scratch.
pub fn copy(
    buf: &mut CodeBuffer,
    dst: &Operand,
    src: &Operand,
    width: u8,
) -> Result<(), JitError> {
    if width == 0 {
        // void-typed moves have no storage
        return Ok(());
    }
    match (dst, src) {
        // -- register destinations --
        (Operand::Cpu(d), Operand::Cpu(s)) => {
            if d != s {
                emit_mov_rr(buf, width == 8, *d, *s);
            }
            Ok(())
        }
        (Operand::Cpu(d), Operand::Fpu(s)) => match width {
            4 => {
                emit_mov_gp_fp(buf, false, *d, *s);
                Ok(())
            }
            8 => {
                emit_mov_gp_fp(buf, true, *d, *s);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },
        (Operand::Cpu(d), Operand::Const(c)) => {
            emit_mov_ri(buf, width == 8, *d, const_bits(*c, width));
            Ok(())
        }
        (Operand::Cpu(d), m @ (Operand::Stack(_) | Operand::Indexed { .. })) => {
            load_gp(buf, width, *d, m);
            Ok(())
        }
        (Operand::Cpu(d), Operand::Abs(a)) => {
            emit_mov_ri(buf, true, *d, *a);
            emit_load_w(buf, width, *d, *d, 0);
            Ok(())
        }

        (Operand::Fpu(d), Operand::Fpu(s)) => match width {
            4 | 8 => {
                emit_fp_mov_rr(buf, width, *d, *s);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },
        (Operand::Fpu(d), Operand::Cpu(s)) => match width {
            4 => {
                emit_mov_fp_gp(buf, false, *d, *s);
                Ok(())
            }
            8 => {
                emit_mov_fp_gp(buf, true, *d, *s);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },
        (Operand::Fpu(d), Operand::Const(c)) => match width {
            4 | 8 => {
                emit_mov_ri(buf, width == 8, SCRATCH, const_bits(*c, width));
                emit_mov_fp_gp(buf, width == 8, *d, SCRATCH);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },
        (Operand::Fpu(d), m @ (Operand::Stack(_) | Operand::Indexed { .. })) => match width {
            4 | 8 => {
                load_fp(buf, width, *d, m);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },
        (Operand::Fpu(d), Operand::Abs(a)) => match width {
            4 | 8 => {
                emit_mov_ri(buf, true, SCRATCH, *a);
                emit_fp_load(buf, width, *d, SCRATCH, 0);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },

        // -- memory destinations --
        (m @ (Operand::Stack(_) | Operand::Indexed { .. }), Operand::Cpu(s)) => {
            store_gp(buf, width, *s, m);
            Ok(())
        }
        (m @ (Operand::Stack(_) | Operand::Indexed { .. }), Operand::Fpu(s)) => match width {
            4 | 8 => {
                store_fp(buf, width, *s, m);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },
        (m @ (Operand::Stack(_) | Operand::Indexed { .. }), Operand::Const(c)) => {
            let bits = const_bits(*c, width);
            // An imm32 store sign-extends in the 8-byte form; fall back
            // to the scratch register when the value does not survive it.
            if width < 8 || (bits as i64) == (bits as u32 as i32 as i64) {
                match *m {
                    Operand::Stack(disp) => {
                        emit_store_imm_w(buf, width, Reg::Rbp, disp, bits as u32 as i32)
                    }
                    Operand::Indexed {
                        base,
                        index: None,
                        disp,
                        ..
                    } => emit_store_imm_w(buf, width, base, disp, bits as u32 as i32),
                    _ => {
                        emit_mov_ri(buf, width == 8, SCRATCH, bits);
                        store_gp(buf, width, SCRATCH, m);
                    }
                }
            } else {
                emit_mov_ri(buf, true, SCRATCH, bits);
                store_gp(buf, width, SCRATCH, m);
            }
            Ok(())
        }
        (
            m1 @ (Operand::Stack(_) | Operand::Indexed { .. }),
            m2 @ (Operand::Stack(_) | Operand::Indexed { .. }),
        ) => {
            // No memory-to-memory move on x86; route through scratch.
            load_gp(buf, width, SCRATCH, m2);
            store_gp(buf, width, SCRATCH, m1);
            Ok(())
        }
        (m @ (Operand::Stack(_) | Operand::Indexed { .. }), Operand::Abs(a)) => {
            emit_mov_ri(buf, true, CALL_SCRATCH, *a);
            emit_load_w(buf, width, CALL_SCRATCH, CALL_SCRATCH, 0);
            store_gp(buf, width, CALL_SCRATCH, m);
            Ok(())
        }

        // -- absolute-address destinations --
        (Operand::Abs(a), Operand::Cpu(s)) => {
            emit_mov_ri(buf, true, SCRATCH, *a);
            emit_store_w(buf, width, *s, SCRATCH, 0);
            Ok(())
        }
        (Operand::Abs(a), Operand::Fpu(s)) => match width {
            4 | 8 => {
                emit_mov_ri(buf, true, SCRATCH, *a);
                emit_fp_store(buf, width, *s, SCRATCH, 0);
                Ok(())
            }
            _ => Err(bad(dst, src, width)),
        },
        (Operand::Abs(a), Operand::Const(c)) => {
            let bits = const_bits(*c, width);
            emit_mov_ri(buf, true, CALL_SCRATCH, *a);
            if width < 8 || (bits as i64) == (bits as u32 as i32 as i64) {
                emit_store_imm_w(buf, width, CALL_SCRATCH, 0, bits as u32 as i32);
            } else {
                emit_mov_ri(buf, true, SCRATCH, bits);
                emit_store_w(buf, width, SCRATCH, CALL_SCRATCH, 0);
            }
            Ok(())
        }
        (Operand::Abs(a), m @ (Operand::Stack(_) | Operand::Indexed { .. })) => {
            emit_mov_ri(buf, true, CALL_SCRATCH, *a);
            load_gp(buf, width, SCRATCH, m);
            emit_store_w(buf, width, SCRATCH, CALL_SCRATCH, 0);
            Ok(())
        }
        (Operand::Abs(a), Operand::Abs(b)) => {
            emit_mov_ri(buf, true, SCRATCH, *b);
            emit_load_w(buf, width, SCRATCH, SCRATCH, 0);
            emit_mov_ri(buf, true, CALL_SCRATCH, *a);
            emit_store_w(buf, width, SCRATCH, CALL_SCRATCH, 0);
            Ok(())
        }

        _ => Err(bad(dst, src, width)),
    }
}
