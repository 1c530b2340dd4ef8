//! Physical register allocator.
//!
//! Owns the two fixed register files and the binding back-pointers.
//! The single invariant everything here protects: at most one physical
//! register points at a given virtual register, and that virtual
//! register's forward pointer names exactly that physical register (or
//! none). Eviction flushes a dirty value to its owner's home slot before
//! the register is rebound, so a spilled value is always recoverable
//! byte-for-byte.

use kestrel_core::RegIdx;

use crate::code_buffer::CodeBuffer;
use crate::operand::{copy, Operand};
use crate::vreg::VRegTable;
use crate::x86_64::regs::{FpReg, Reg, ALLOC_CPU, ALLOC_FPU};

/// Which register file a physical register belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegFile {
    Cpu,
    Fpu,
}

/// Handle to one allocatable physical register (index into the file's
/// allocation order, not the machine encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PReg {
    pub file: RegFile,
    pub slot: u8,
}

impl PReg {
    /// The machine register as an instruction operand.
    pub fn operand(self) -> Operand {
        match self.file {
            RegFile::Cpu => Operand::Cpu(ALLOC_CPU[self.slot as usize]),
            RegFile::Fpu => Operand::Fpu(ALLOC_FPU[self.slot as usize]),
        }
    }

    /// The machine GP register. Panics for FPU handles.
    pub fn cpu(self) -> Reg {
        match self.file {
            RegFile::Cpu => ALLOC_CPU[self.slot as usize],
            RegFile::Fpu => panic!("cpu() on an FPU register"),
        }
    }

    /// The machine SSE register. Panics for CPU handles.
    pub fn fpu(self) -> FpReg {
        match self.file {
            RegFile::Fpu => ALLOC_FPU[self.slot as usize],
            RegFile::Cpu => panic!("fpu() on a CPU register"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PhysState {
    owner: Option<RegIdx>,
    lock: u32,
    dirty: bool,
}

/// Pluggable victim-selection strategy. Returns the scan start offset
/// for the next allocation; correctness does not depend on the choice,
/// only on the allocator never evicting a locked register.
pub trait EvictionPolicy {
    fn next_start(&mut self, nregs: usize) -> usize;
}

/// Default policy: rotate the scan start on every allocation.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl EvictionPolicy for RoundRobin {
    fn next_start(&mut self, nregs: usize) -> usize {
        let start = self.cursor % nregs;
        self.cursor = self.cursor.wrapping_add(1);
        start
    }
}

/// Always scans from slot 0; useful for deterministic unit tests.
#[derive(Debug, Default)]
pub struct FirstFit;

impl EvictionPolicy for FirstFit {
    fn next_start(&mut self, _nregs: usize) -> usize {
        0
    }
}

/// Allocator state for one function compilation. Never shared across
/// concurrent compilations.
pub struct AllocatorState {
    cpu: Vec<PhysState>,
    fpu: Vec<PhysState>,
    lock_gen: u32,
    policy: Box<dyn EvictionPolicy>,
}

impl AllocatorState {
    pub fn new(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            cpu: vec![PhysState::default(); ALLOC_CPU.len()],
            fpu: vec![PhysState::default(); ALLOC_FPU.len()],
            lock_gen: 1,
            policy,
        }
    }

    fn file(&self, file: RegFile) -> &[PhysState] {
        match file {
            RegFile::Cpu => &self.cpu,
            RegFile::Fpu => &self.fpu,
        }
    }

    fn state_mut(&mut self, p: PReg) -> &mut PhysState {
        match p.file {
            RegFile::Cpu => &mut self.cpu[p.slot as usize],
            RegFile::Fpu => &mut self.fpu[p.slot as usize],
        }
    }

    fn state(&self, p: PReg) -> &PhysState {
        match p.file {
            RegFile::Cpu => &self.cpu[p.slot as usize],
            RegFile::Fpu => &self.fpu[p.slot as usize],
        }
    }

    /// Start lowering a new opcode: locks from the previous opcode
    /// expire.
    pub fn begin_op(&mut self) {
        self.lock_gen = self.lock_gen.wrapping_add(1);
    }

    /// Pin a register for the remainder of the current opcode so a later
    /// acquire cannot evict it.
    pub fn lock(&mut self, p: PReg) {
        let gen = self.lock_gen;
        self.state_mut(p).lock = gen;
    }

    pub fn is_locked(&self, p: PReg) -> bool {
        self.state(p).lock == self.lock_gen
    }

    pub fn owner(&self, p: PReg) -> Option<RegIdx> {
        self.state(p).owner
    }

    pub fn is_dirty(&self, p: PReg) -> bool {
        self.state(p).dirty
    }

    /// Flush a dirty value to its owner's home slot, keeping the
    /// binding.
    pub fn sync(&mut self, buf: &mut CodeBuffer, vregs: &VRegTable, p: PReg) {
        let st = self.state(p);
        if let (Some(owner), true) = (st.owner, st.dirty) {
            let info = vregs.info(owner);
            copy(buf, &Operand::Stack(info.slot), &p.operand(), info.width)
                .expect("register spill must be copyable");
        }
        self.state_mut(p).dirty = false;
    }

    /// Drop the binding of `p`, if any. The old owner must already be
    /// flushed or about to be overwritten.
    pub fn unbind(&mut self, vregs: &mut VRegTable, p: PReg) {
        if let Some(owner) = self.state(p).owner {
            vregs.set_binding(owner, None);
        }
        let st = self.state_mut(p);
        st.owner = None;
        st.dirty = false;
    }

    /// Bind virtual register `v` to `p`, first severing `v`'s previous
    /// binding. Unbinding the old holder happens before the new binding
    /// is recorded, keeping the pointers one-to-one at every step.
    pub fn bind(&mut self, vregs: &mut VRegTable, v: RegIdx, p: PReg, dirty: bool) {
        if let Some(old) = vregs.binding(v) {
            if old == p {
                let st = self.state_mut(p);
                st.dirty = st.dirty || dirty;
                return;
            }
            // The value moved; the stale cache is simply dropped.
            let st = self.state_mut(old);
            st.owner = None;
            st.dirty = false;
            vregs.set_binding(v, None);
        }
        assert!(
            self.state(p).owner.is_none(),
            "binding over a live register"
        );
        let st = self.state_mut(p);
        st.owner = Some(v);
        st.dirty = dirty;
        vregs.set_binding(v, Some(p));
    }

    /// Acquire a free register of `file`, evicting an unlocked holder if
    /// none is free. Panics if every register is locked — the per-opcode
    /// operand arity is fixed, so this is a compiler bug, not an input
    /// error.
    pub fn acquire(
        &mut self,
        file: RegFile,
        buf: &mut CodeBuffer,
        vregs: &mut VRegTable,
    ) -> PReg {
        let n = self.file(file).len();
        let start = self.policy.next_start(n);

        // First free, scanning from the rotation point.
        for i in 0..n {
            let slot = ((start + i) % n) as u8;
            let p = PReg { file, slot };
            if self.state(p).owner.is_none() && !self.is_locked(p) {
                return p;
            }
        }
        // Then first unlocked holder: flush and take it.
        for i in 0..n {
            let slot = ((start + i) % n) as u8;
            let p = PReg { file, slot };
            if !self.is_locked(p) {
                self.sync(buf, vregs, p);
                self.unbind(vregs, p);
                return p;
            }
        }
        panic!("register allocator exhausted: every {file:?} register is locked");
    }

    /// Acquire one specific machine register (shift counts in CL,
    /// division in RAX/RDX). Panics if it is locked by the current
    /// opcode.
    pub fn acquire_named(
        &mut self,
        reg: Reg,
        buf: &mut CodeBuffer,
        vregs: &mut VRegTable,
    ) -> PReg {
        let slot = ALLOC_CPU
            .iter()
            .position(|&r| r == reg)
            .unwrap_or_else(|| panic!("{reg:?} is not an allocatable register"));
        let p = PReg {
            file: RegFile::Cpu,
            slot: slot as u8,
        };
        assert!(!self.is_locked(p), "fixed operand register {reg:?} is locked");
        if self.state(p).owner.is_some() {
            self.sync(buf, vregs, p);
            self.unbind(vregs, p);
        }
        p
    }

    fn all_pregs(&self) -> Vec<PReg> {
        let mut out = Vec::with_capacity(self.cpu.len() + self.fpu.len());
        for slot in 0..self.cpu.len() {
            out.push(PReg {
                file: RegFile::Cpu,
                slot: slot as u8,
            });
        }
        for slot in 0..self.fpu.len() {
            out.push(PReg {
                file: RegFile::Fpu,
                slot: slot as u8,
            });
        }
        out
    }

    /// Flush every dirty value to its home slot, keeping all bindings.
    /// Emitted before conditional branches so both paths see memory
    /// truth.
    pub fn sync_all(&mut self, buf: &mut CodeBuffer, vregs: &VRegTable) {
        for p in self.all_pregs() {
            self.sync(buf, vregs, p);
        }
    }

    /// Flush and drop every binding. Emitted at register-discard points
    /// (branch targets) and before anything that clobbers the
    /// caller-saved files (calls).
    pub fn discard_all(&mut self, buf: &mut CodeBuffer, vregs: &mut VRegTable) {
        for p in self.all_pregs() {
            self.sync(buf, vregs, p);
            self.unbind(vregs, p);
        }
    }

    /// Check the binding invariant; used by tests after every lowering.
    pub fn check_invariant(&self, vregs: &VRegTable) {
        for p in self.all_pregs() {
            if let Some(owner) = self.state(p).owner {
                assert_eq!(
                    vregs.binding(owner),
                    Some(p),
                    "back-pointer of {p:?} disagrees with vreg {owner:?}"
                );
            }
        }
        for i in 0..vregs.len() {
            let v = RegIdx(i as u32);
            if let Some(p) = vregs.binding(v) {
                assert_eq!(
                    self.state(p).owner,
                    Some(v),
                    "vreg {v:?} points at {p:?} which is not its holder"
                );
            }
        }
    }
}
