//! Intra-function control-flow linking.
//!
//! Records the first-instruction offset of every opcode, emits branches
//! with placeholder displacements, and resolves them in one pass once
//! the whole function has been emitted. Backward branches resolve
//! immediately. Switch tables emit 8-byte absolute slots that are
//! resolved against the executable base at finalize time.

use kestrel_core::{OpCode, OpIdx};

use crate::code_buffer::CodeBuffer;
use crate::error::JitError;
use crate::x86_64::emitter::{emit_opc, X86Cond, OPC_JCC_long, OPC_JMP_long};

/// Per-function linker state.
pub struct FunctionLinker {
    /// Buffer-absolute offset of each opcode's first instruction.
    op_offsets: Vec<usize>,
    known: Vec<bool>,
    /// Pending rel32 displacement slots: (slot offset, target opcode).
    pending: Vec<(usize, OpIdx)>,
    /// Absolute 8-byte slots pointing at opcodes (switch tables).
    abs_entries: Vec<(usize, OpIdx)>,
    /// Opcodes reachable through more than the fall-through edge; all
    /// register bindings are discarded before their first instruction.
    is_target: Vec<bool>,
}

impl FunctionLinker {
    /// Build linker state for a function, marking every branch-target
    /// opcode as a register-discard point.
    pub fn new(ops: &[OpCode]) -> Self {
        let mut is_target = vec![false; ops.len()];
        let mut targets = Vec::new();
        for op in ops {
            targets.clear();
            op.jump_targets(&mut targets);
            for t in &targets {
                if let Some(flag) = is_target.get_mut(t.0 as usize) {
                    *flag = true;
                }
            }
        }
        Self {
            op_offsets: vec![0; ops.len()],
            known: vec![false; ops.len()],
            pending: Vec::new(),
            abs_entries: Vec::new(),
            is_target,
        }
    }

    pub fn is_target(&self, idx: usize) -> bool {
        self.is_target[idx]
    }

    /// Record that opcode `idx`'s code starts at the current offset.
    pub fn mark(&mut self, idx: usize, offset: usize) {
        self.op_offsets[idx] = offset;
        self.known[idx] = true;
    }

    pub fn op_offset(&self, idx: OpIdx) -> usize {
        self.op_offsets[idx.0 as usize]
    }

    fn emit_disp(&mut self, buf: &mut CodeBuffer, target: OpIdx) {
        let slot = buf.offset();
        if self.known[target.0 as usize] {
            // Backward branch: the target offset is already final.
            let disp = self.op_offsets[target.0 as usize] as i64 - (slot as i64 + 4);
            buf.emit_u32(disp as u32);
        } else {
            buf.emit_u32(0);
            self.pending.push((slot, target));
        }
    }

    /// Emit `jmp` to a logical opcode.
    pub fn emit_jmp(&mut self, buf: &mut CodeBuffer, target: OpIdx) {
        buf.emit_u8(OPC_JMP_long as u8);
        self.emit_disp(buf, target);
    }

    /// Emit `jcc` to a logical opcode.
    pub fn emit_jcc(&mut self, buf: &mut CodeBuffer, cond: X86Cond, target: OpIdx) {
        emit_opc(buf, OPC_JCC_long + cond as u32, 0, 0);
        self.emit_disp(buf, target);
    }

    /// Register an 8-byte switch-table slot that must hold the absolute
    /// address of `target` once the executable base is known.
    pub fn add_abs_entry(&mut self, slot: usize, target: OpIdx) {
        self.abs_entries.push((slot, target));
    }

    /// Resolve every pending displacement. Returns the absolute-slot
    /// list as (slot offset, buffer offset) pairs for the module-level
    /// finalize pass.
    pub fn finish(mut self, buf: &mut CodeBuffer) -> Result<Vec<(usize, usize)>, JitError> {
        for (slot, target) in self.pending.drain(..) {
            let ti = target.0 as usize;
            if !self.known[ti] {
                return Err(JitError::Malformed(format!(
                    "branch to opcode {ti} which was never emitted"
                )));
            }
            let disp = self.op_offsets[ti] as i64 - (slot as i64 + 4);
            if !(i32::MIN as i64..=i32::MAX as i64).contains(&disp) {
                return Err(JitError::Displacement { at: slot });
            }
            buf.patch_u32(slot, disp as u32);
        }
        let mut abs = Vec::with_capacity(self.abs_entries.len());
        for (slot, target) in self.abs_entries {
            let ti = target.0 as usize;
            if !self.known[ti] {
                return Err(JitError::Malformed(format!(
                    "switch entry to opcode {ti} which was never emitted"
                )));
            }
            abs.push((slot, self.op_offsets[ti]));
        }
        Ok(abs)
    }
}
