//! Per-function virtual register table and stack frame layout.

use kestrel_core::{Function, OpCode, RegIdx, TypeCatalogue, TypeIdx};

use crate::error::JitError;
use crate::operand::Operand;
use crate::ralloc::PReg;
use crate::x86_64::regs::{STACK_ALIGN, TRAP_FRAME_SIZE};

/// One virtual register: declared type, natural size, home stack slot,
/// and the physical register currently caching its value (if any).
#[derive(Debug, Clone)]
pub struct VRegInfo {
    pub ty: TypeIdx,
    pub width: u8,
    pub float: bool,
    pub ptr: bool,
    /// rbp-relative home slot. Arguments sit above the frame base in
    /// the caller-pushed argument area; locals below it.
    pub slot: i32,
    /// Current physical binding. Kept consistent with the allocator's
    /// back-pointers at all times.
    pub binding: Option<PReg>,
}

/// The function's register file plus frame layout, computed once before
/// emission begins. Slot offsets are immutable afterwards.
#[derive(Debug)]
pub struct VRegTable {
    regs: Vec<VRegInfo>,
    pub nargs: usize,
    /// Total frame allocation below rbp, 16-byte aligned.
    pub frame_size: u32,
    /// rbp-relative offsets of the trap save areas, one per static
    /// nesting level.
    trap_slots: Vec<i32>,
}

impl VRegTable {
    pub fn layout(fun: &Function, types: &TypeCatalogue) -> Result<Self, JitError> {
        let sig = types.fun_sig(fun.ty);
        let nargs = sig.args.len();
        if nargs > fun.regs.len() {
            return Err(JitError::Malformed(format!(
                "function f{} has {} registers for {} arguments",
                fun.fidx.0,
                fun.regs.len(),
                nargs
            )));
        }

        let mut regs = Vec::with_capacity(fun.regs.len());

        // Arguments: ascending 8-byte slots above the frame base,
        // matching the caller-pushed incoming argument area.
        for (i, &ty) in fun.regs.iter().take(nargs).enumerate() {
            let desc = types.get(ty);
            regs.push(VRegInfo {
                ty,
                width: desc.width(),
                float: desc.is_float(),
                ptr: desc.is_ptr(),
                slot: 16 + 8 * i as i32,
                binding: None,
            });
        }

        // Locals: descending below the frame base, each padded to its
        // own natural alignment.
        let mut cur: i64 = 0;
        for &ty in fun.regs.iter().skip(nargs) {
            let desc = types.get(ty);
            let w = desc.width();
            let slot = if w == 0 {
                0
            } else {
                cur -= w as i64;
                cur &= !((w as i64) - 1);
                cur as i32
            };
            regs.push(VRegInfo {
                ty,
                width: w,
                float: desc.is_float(),
                ptr: desc.is_ptr(),
                slot,
                binding: None,
            });
        }

        // One trap save area per static nesting level.
        let mut trap_slots = Vec::new();
        let mut depth: u32 = 0;
        let mut max_depth: u32 = 0;
        for op in &fun.ops {
            match op {
                OpCode::Trap { .. } => {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                }
                OpCode::EndTrap => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        for _ in 0..max_depth {
            cur -= TRAP_FRAME_SIZE as i64;
            cur &= !15;
            trap_slots.push(cur as i32);
        }

        let frame_size = (-cur as u64 + (STACK_ALIGN as u64 - 1)) & !(STACK_ALIGN as u64 - 1);
        if frame_size > i32::MAX as u64 / 2 {
            return Err(JitError::FrameTooLarge(frame_size as i64));
        }

        Ok(Self {
            regs,
            nargs,
            frame_size: frame_size as u32,
            trap_slots,
        })
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn info(&self, r: RegIdx) -> &VRegInfo {
        &self.regs[r.0 as usize]
    }

    pub fn binding(&self, r: RegIdx) -> Option<PReg> {
        self.regs[r.0 as usize].binding
    }

    pub fn set_binding(&mut self, r: RegIdx, b: Option<PReg>) {
        self.regs[r.0 as usize].binding = b;
    }

    /// The register's home slot as a memory operand.
    pub fn slot_operand(&self, r: RegIdx) -> Operand {
        Operand::Stack(self.regs[r.0 as usize].slot)
    }

    /// rbp-relative offset of the trap save area at `depth` (0-based).
    pub fn trap_slot(&self, depth: u32) -> i32 {
        self.trap_slots[depth as usize]
    }
}
