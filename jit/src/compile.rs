//! Function compiler: walks one function's opcodes in order and lowers
//! each through the register allocator, the copy algebra and the
//! control-flow linker into the module's shared code buffer.

use kestrel_core::{FunIdx, Function, Module, OpCode, OpIdx, RegIdx, TypeDesc};

use crate::abi;
use crate::code_buffer::CodeBuffer;
use crate::error::JitError;
use crate::linker::FunctionLinker;
use crate::operand::{copy, Operand};
use crate::ralloc::{AllocatorState, EvictionPolicy, PReg, RegFile};
use crate::runtime::{
    RuntimeHooks, ALLOC_RAW, ALLOC_WITH_PTRS, CELL_PAYLOAD, CLOSURE_FUN,
    CLOSURE_HAS_VALUE, CLOSURE_SIZE, CLOSURE_TYPE, CLOSURE_VALUE, ENUM_TAG,
    RT_PROTOS, VIRTUAL_SLOTS,
};
use crate::trap;
use crate::vreg::VRegTable;
use crate::x86_64::emitter::*;
use crate::x86_64::regs::{
    FpReg, Reg, ALLOC_CPU, ALLOC_FPU, CALL_SCRATCH, FP_SCRATCH, SCRATCH,
    TRAP_RBX, TRAP_RBP, TRAP_RESUME, TRAP_RSP, TRAP_SAVED_REGS,
};

/// Where an absolute 8-byte patch slot must point once the executable
/// base is known.
#[derive(Debug, Clone, Copy)]
pub enum AbsTarget {
    /// Entry of a compiled function (static closures).
    Function(FunIdx),
    /// A fixed offset in the shared buffer (switch-table entries).
    Offset(usize),
}

/// An 8-byte slot in the buffer awaiting an absolute address.
#[derive(Debug, Clone, Copy)]
pub struct AbsPatch {
    pub slot: usize,
    pub target: AbsTarget,
}

/// A rel32 call displacement awaiting another function's entry offset.
#[derive(Debug, Clone, Copy)]
pub struct CallPatch {
    pub slot: usize,
    pub fidx: FunIdx,
}

/// Debug map entry: return address in the buffer back to the calling
/// (function, opcode index). Recorded only in debug mode.
#[derive(Debug, Clone, Copy)]
pub struct CallSite {
    pub ret_offset: usize,
    pub fun: FunIdx,
    pub op: u32,
}

pub(crate) struct CompiledFunction {
    pub start: usize,
    pub calls: Vec<CallPatch>,
    pub abs: Vec<AbsPatch>,
    pub sites: Vec<CallSite>,
}

/// Payload kind selecting the dynamic-access entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DynKind {
    Ptr,
    I32,
    F32,
    F64,
}

fn dyn_kind(desc: &TypeDesc) -> DynKind {
    match desc {
        TypeDesc::F32 => DynKind::F32,
        TypeDesc::F64 => DynKind::F64,
        TypeDesc::Bool | TypeDesc::U8 | TypeDesc::U16 | TypeDesc::I32 => DynKind::I32,
        // 64-bit integers travel through the pointer-width entry point.
        _ => DynKind::Ptr,
    }
}

pub(crate) fn compile_function(
    module: &Module,
    fun: &Function,
    hooks: &RuntimeHooks,
    buf: &mut CodeBuffer,
    debug: bool,
    policy: Box<dyn EvictionPolicy>,
) -> Result<CompiledFunction, JitError> {
    debug_assert_eq!(ALLOC_CPU[0], Reg::Rax);
    debug_assert_eq!(ALLOC_FPU[0], FpReg::Xmm0);

    let vregs = VRegTable::layout(fun, &module.types)?;
    let link = FunctionLinker::new(&fun.ops);
    let mut fc = FunctionCompiler {
        module,
        fun,
        hooks,
        buf,
        vregs,
        alloc: AllocatorState::new(policy),
        link,
        trap_depth: 0,
        calls: Vec::new(),
        abs: Vec::new(),
        sites: Vec::new(),
        debug,
        cur_op: 0,
    };
    fc.run()
}

struct FunctionCompiler<'a> {
    module: &'a Module,
    fun: &'a Function,
    hooks: &'a RuntimeHooks,
    buf: &'a mut CodeBuffer,
    vregs: VRegTable,
    alloc: AllocatorState,
    link: FunctionLinker,
    trap_depth: u32,
    calls: Vec<CallPatch>,
    abs: Vec<AbsPatch>,
    sites: Vec<CallSite>,
    debug: bool,
    cur_op: usize,
}

impl<'a> FunctionCompiler<'a> {
    fn run(mut self) -> Result<CompiledFunction, JitError> {
        let start = self.buf.offset();

        // Prologue. All allocatable registers are caller-saved, so only
        // the frame pointer needs saving.
        emit_push(self.buf, Reg::Rbp);
        emit_mov_rr(self.buf, true, Reg::Rbp, Reg::Rsp);
        let frame = self.vregs.frame_size;
        if frame > 0 {
            emit_arith_ri(self.buf, ArithOp::Sub, true, Reg::Rsp, frame as i32);
        }

        let fun = self.fun;
        let ops = &fun.ops;
        for i in 0..ops.len() {
            self.cur_op = i;
            if self.link.is_target(i) {
                // Register-discard point: this opcode is reachable from
                // more than one edge, so no binding survives into it.
                self.alloc.discard_all(self.buf, &mut self.vregs);
            }
            let off = self.buf.offset();
            self.link.mark(i, off);
            self.alloc.begin_op();
            self.lower(&ops[i])?;
        }

        // The verifier guarantees the last opcode leaves the function;
        // a fall-off lands on a trap instruction rather than running
        // into the next function's prologue.
        emit_ud2(self.buf);

        let abs_ops = self.link.finish(self.buf)?;
        for (slot, off) in abs_ops {
            self.abs.push(AbsPatch {
                slot,
                target: AbsTarget::Offset(off),
            });
        }

        Ok(CompiledFunction {
            start,
            calls: self.calls,
            abs: self.abs,
            sites: self.sites,
        })
    }

    // -- register-table helpers --

    fn width_of(&self, r: RegIdx) -> u8 {
        self.vregs.info(r).width
    }

    fn is_float(&self, r: RegIdx) -> bool {
        self.vregs.info(r).float
    }

    fn slot_of(&self, r: RegIdx) -> i32 {
        self.vregs.info(r).slot
    }

    fn type_of(&self, r: RegIdx) -> &TypeDesc {
        self.module.types.get(self.vregs.info(r).ty)
    }

    fn type_id_of(&self, r: RegIdx) -> u32 {
        self.vregs.info(r).ty.0
    }

    fn unsupported(&self, op: &OpCode, detail: impl Into<String>) -> JitError {
        JitError::Unsupported {
            op: op.name(),
            at: self.cur_op,
            detail: detail.into(),
        }
    }

    /// Current operand of a virtual register: its physical binding if it
    /// has one (locked for the rest of this opcode), its home slot
    /// otherwise.
    fn operand_of(&mut self, r: RegIdx) -> Operand {
        if let Some(p) = self.vregs.binding(r) {
            self.alloc.lock(p);
            p.operand()
        } else {
            self.vregs.slot_operand(r)
        }
    }

    /// Force a virtual register into a physical register of its file,
    /// loading from the home slot on a miss. Locked for this opcode.
    fn load_vreg(&mut self, r: RegIdx) -> Result<PReg, JitError> {
        if let Some(p) = self.vregs.binding(r) {
            self.alloc.lock(p);
            return Ok(p);
        }
        let info = self.vregs.info(r);
        let file = if info.float { RegFile::Fpu } else { RegFile::Cpu };
        let (width, slot) = (info.width, info.slot);
        let p = self.alloc.acquire(file, self.buf, &mut self.vregs);
        self.alloc.lock(p);
        copy(self.buf, &p.operand(), &Operand::Stack(slot), width)?;
        self.alloc.bind(&mut self.vregs, r, p, false);
        Ok(p)
    }

    /// Acquire a result register for `dst` without binding it yet; the
    /// old value (and any alias through other operands) stays readable
    /// until `bind_dst`.
    fn alloc_dst(&mut self, dst: RegIdx) -> PReg {
        let file = if self.vregs.info(dst).float {
            RegFile::Fpu
        } else {
            RegFile::Cpu
        };
        let p = self.alloc.acquire(file, self.buf, &mut self.vregs);
        self.alloc.lock(p);
        p
    }

    fn bind_dst(&mut self, dst: RegIdx, p: PReg) {
        self.alloc.bind(&mut self.vregs, dst, p, true);
    }

    /// Bind a call-shaped result (RAX / XMM0) to `dst`. Only valid when
    /// every binding was discarded for the call.
    fn bind_result(&mut self, dst: RegIdx) {
        if self.width_of(dst) == 0 {
            return;
        }
        let p = PReg {
            file: if self.is_float(dst) {
                RegFile::Fpu
            } else {
                RegFile::Cpu
            },
            slot: 0,
        };
        self.alloc.bind(&mut self.vregs, dst, p, true);
    }

    /// Record the just-emitted call for the debug call-site table.
    fn record_site(&mut self) {
        if self.debug {
            self.sites.push(CallSite {
                ret_offset: self.buf.offset(),
                fun: self.fun.fidx,
                op: self.cur_op as u32,
            });
        }
    }

    // -- emission helpers --

    /// Integer ALU op with a flexible right operand.
    fn emit_arith_operand(
        &mut self,
        op: ArithOp,
        rexw: bool,
        d: Reg,
        src: &Operand,
    ) -> Result<(), JitError> {
        match *src {
            Operand::Cpu(s) => emit_arith_rr(self.buf, op, rexw, d, s),
            Operand::Stack(off) => emit_arith_rm(self.buf, op, rexw, d, Reg::Rbp, off),
            Operand::Indexed {
                base,
                index: None,
                disp,
                ..
            } => emit_arith_rm(self.buf, op, rexw, d, base, disp),
            Operand::Const(c) if (i32::MIN as i64..=i32::MAX as i64).contains(&c) => {
                emit_arith_ri(self.buf, op, rexw, d, c as i32)
            }
            ref other => {
                copy(
                    self.buf,
                    &Operand::Cpu(SCRATCH),
                    other,
                    if rexw { 8 } else { 4 },
                )?;
                emit_arith_rr(self.buf, op, rexw, d, SCRATCH);
            }
        }
        Ok(())
    }

    /// Float ALU op with a flexible right operand.
    fn emit_fp_operand(
        &mut self,
        op: FpOp,
        width: u8,
        d: FpReg,
        src: &Operand,
    ) -> Result<(), JitError> {
        match *src {
            Operand::Fpu(s) => emit_fp_arith_rr(self.buf, op, width, d, s),
            Operand::Stack(off) => emit_fp_arith_rm(self.buf, op, width, d, Reg::Rbp, off),
            Operand::Indexed {
                base,
                index: None,
                disp,
                ..
            } => emit_fp_arith_rm(self.buf, op, width, d, base, disp),
            ref other => {
                copy(self.buf, &Operand::Fpu(FP_SCRATCH), other, width)?;
                emit_fp_arith_rr(self.buf, op, width, d, FP_SCRATCH);
            }
        }
        Ok(())
    }

    /// Result := a <op> b for the commutative/ordinary integer ALU ops.
    /// Reads both sources before rebinding the destination, so every
    /// aliasing combination (dst==a, dst==b, a==b) sees pre-op values.
    fn lower_int_binop(
        &mut self,
        dst: RegIdx,
        a: RegIdx,
        b: RegIdx,
        op: ArithOp,
    ) -> Result<(), JitError> {
        let w = self.width_of(dst);
        let rexw = w == 8;
        let pd = self.alloc_dst(dst);
        let av = self.operand_of(a);
        copy(self.buf, &pd.operand(), &av, w)?;
        let bv = self.operand_of(b);
        self.emit_arith_operand(op, rexw, pd.cpu(), &bv)?;
        self.bind_dst(dst, pd);
        Ok(())
    }

    fn lower_fp_binop(
        &mut self,
        dst: RegIdx,
        a: RegIdx,
        b: RegIdx,
        op: FpOp,
    ) -> Result<(), JitError> {
        let w = self.width_of(dst);
        let pd = self.alloc_dst(dst);
        let av = self.operand_of(a);
        copy(self.buf, &pd.operand(), &av, w)?;
        let bv = self.operand_of(b);
        self.emit_fp_operand(op, w, pd.fpu(), &bv)?;
        self.bind_dst(dst, pd);
        Ok(())
    }

    /// Shifts: the count is fixed to CL by the ISA.
    fn lower_shift(
        &mut self,
        dst: RegIdx,
        a: RegIdx,
        b: RegIdx,
        op: ShiftOp,
    ) -> Result<(), JitError> {
        let w = self.width_of(dst);
        let rexw = w == 8;
        let wb = self.width_of(b);
        let pcl = self.alloc.acquire_named(Reg::Rcx, self.buf, &mut self.vregs);
        self.alloc.lock(pcl);
        let bv = self.operand_of(b);
        copy(self.buf, &Operand::Cpu(Reg::Rcx), &bv, wb)?;
        let pd = self.alloc_dst(dst);
        let av = self.operand_of(a);
        copy(self.buf, &pd.operand(), &av, w)?;
        emit_shift_cl(self.buf, op, rexw, pd.cpu());
        self.bind_dst(dst, pd);
        Ok(())
    }

    /// Division/remainder: dividend fixed to RDX:RAX by the ISA.
    /// Division by zero faults in hardware and is routed to the host
    /// fault handler like any other runtime fault.
    fn lower_div(
        &mut self,
        dst: RegIdx,
        a: RegIdx,
        b: RegIdx,
        signed: bool,
        remainder: bool,
    ) -> Result<(), JitError> {
        let w = self.width_of(dst);
        let rexw = w == 8;
        let prax = self.alloc.acquire_named(Reg::Rax, self.buf, &mut self.vregs);
        self.alloc.lock(prax);
        let prdx = self.alloc.acquire_named(Reg::Rdx, self.buf, &mut self.vregs);
        self.alloc.lock(prdx);

        let bv = self.operand_of(b);
        let divisor = match bv {
            Operand::Cpu(r) => r,
            ref other => {
                copy(self.buf, &Operand::Cpu(SCRATCH), other, w)?;
                SCRATCH
            }
        };
        let av = self.operand_of(a);
        copy(self.buf, &Operand::Cpu(Reg::Rax), &av, w)?;

        if signed {
            if rexw {
                emit_cqo(self.buf);
            } else {
                emit_cdq(self.buf);
            }
            emit_idiv(self.buf, rexw, divisor);
        } else {
            emit_mov_ri(self.buf, false, Reg::Rdx, 0);
            emit_div(self.buf, rexw, divisor);
        }

        let p = if remainder { prdx } else { prax };
        self.bind_dst(dst, p);
        Ok(())
    }

    /// cmp a, b then jcc to a logical opcode; the dynamic fallback goes
    /// through the runtime's comparison entry points.
    fn lower_cond_jump(
        &mut self,
        op: &OpCode,
        a: RegIdx,
        b: RegIdx,
        target: OpIdx,
        int_cc: X86Cond,
        fp_cc: X86Cond,
    ) -> Result<(), JitError> {
        if matches!(self.type_of(a), TypeDesc::Dyn) {
            // Runtime fallback. same-type for equality, the ordering
            // entry otherwise.
            let (slot_a, slot_b) = (self.slot_of(a), self.slot_of(b));
            self.alloc.discard_all(self.buf, &mut self.vregs);
            emit_load_w(self.buf, 8, Reg::Rdi, Reg::Rbp, slot_a);
            emit_load_w(self.buf, 8, Reg::Rsi, Reg::Rbp, slot_b);
            let equality = matches!(op, OpCode::JEq { .. } | OpCode::JNe { .. });
            if equality {
                abi::emit_call_abs(self.buf, self.hooks.same_type as usize);
                emit_test_rr(self.buf, false, Reg::Rax, Reg::Rax);
                let cc = if matches!(op, OpCode::JEq { .. }) {
                    X86Cond::Jne
                } else {
                    X86Cond::Je
                };
                self.link.emit_jcc(self.buf, cc, target);
            } else {
                abi::emit_call_abs(self.buf, self.hooks.generic_compare as usize);
                emit_arith_ri(self.buf, ArithOp::Cmp, false, Reg::Rax, 0);
                self.link.emit_jcc(self.buf, int_cc, target);
            }
            return Ok(());
        }

        if self.is_float(a) {
            let w = self.width_of(a);
            let pa = self.load_vreg(a)?;
            let pb = self.load_vreg(b)?;
            self.alloc.sync_all(self.buf, &self.vregs);
            emit_fp_ucomi(self.buf, w, pa.fpu(), pb.fpu());
            self.link.emit_jcc(self.buf, fp_cc, target);
        } else {
            let w = self.width_of(a);
            let rexw = w == 8;
            let pa = self.load_vreg(a)?;
            let bv = self.operand_of(b);
            self.alloc.sync_all(self.buf, &self.vregs);
            self.emit_arith_operand(ArithOp::Cmp, rexw, pa.cpu(), &bv)?;
            self.link.emit_jcc(self.buf, int_cc, target);
        }
        Ok(())
    }

    /// Raise the exception value already in RDI: dispatch to the
    /// innermost trap frame, or hand the value to the runtime's
    /// uncaught-fault entry. The restore sequence is the only code that
    /// knows the trap-frame layout, so it is emitted here rather than
    /// living in the runtime.
    fn emit_throw_from_rdi(&mut self) {
        abi::emit_call_abs(self.buf, trap::throw_dispatch_addr());
        emit_test_rr(self.buf, true, Reg::Rax, Reg::Rax);
        let caught = emit_jcc32(self.buf, X86Cond::Jne);

        abi::emit_call_abs(self.buf, trap::current_exception_addr());
        emit_mov_rr(self.buf, true, Reg::Rdi, Reg::Rax);
        abi::emit_call_abs(self.buf, self.hooks.uncaught as usize);
        emit_ud2(self.buf);

        bind_local32(self.buf, caught);
        // Restore the snapshot and land on the trap's resume point with
        // the exception-path flag set.
        emit_load_w(self.buf, 8, Reg::Rsp, Reg::Rax, TRAP_RSP);
        emit_load_w(self.buf, 8, Reg::Rbp, Reg::Rax, TRAP_RBP);
        for (i, &r) in TRAP_SAVED_REGS.iter().enumerate() {
            emit_load_w(self.buf, 8, r, Reg::Rax, TRAP_RBX + 8 * i as i32);
        }
        emit_load_w(self.buf, 8, SCRATCH, Reg::Rax, TRAP_RESUME);
        emit_mov_ri(self.buf, false, Reg::Rax, 1);
        emit_jmp_reg(self.buf, SCRATCH);
    }

    // -- opcode dispatch --

    fn lower(&mut self, op: &OpCode) -> Result<(), JitError> {
        match op {
            OpCode::Nop => Ok(()),

            OpCode::Mov { dst, src } => {
                let w = self.width_of(*dst);
                if w == 0 {
                    return Ok(());
                }
                let pd = self.alloc_dst(*dst);
                let sv = self.operand_of(*src);
                copy(self.buf, &pd.operand(), &sv, w)?;
                self.bind_dst(*dst, pd);
                Ok(())
            }

            OpCode::Int { dst, value } => {
                let w = self.width_of(*dst);
                let pd = self.alloc_dst(*dst);
                copy(self.buf, &pd.operand(), &Operand::Const(*value), w)?;
                self.bind_dst(*dst, pd);
                Ok(())
            }

            OpCode::Float { dst, value } => {
                let w = self.width_of(*dst);
                let bits = if w == 4 {
                    (*value as f32).to_bits() as i64
                } else {
                    value.to_bits() as i64
                };
                let pd = self.alloc_dst(*dst);
                copy(self.buf, &pd.operand(), &Operand::Const(bits), w)?;
                self.bind_dst(*dst, pd);
                Ok(())
            }

            OpCode::Bool { dst, value } => {
                let pd = self.alloc_dst(*dst);
                copy(
                    self.buf,
                    &pd.operand(),
                    &Operand::Const(i64::from(*value)),
                    1,
                )?;
                self.bind_dst(*dst, pd);
                Ok(())
            }

            OpCode::Null { dst } => {
                let pd = self.alloc_dst(*dst);
                copy(self.buf, &pd.operand(), &Operand::Const(0), 8)?;
                self.bind_dst(*dst, pd);
                Ok(())
            }

            OpCode::Add { dst, a, b } => {
                if self.is_float(*dst) {
                    self.lower_fp_binop(*dst, *a, *b, FpOp::Add)
                } else {
                    self.lower_int_binop(*dst, *a, *b, ArithOp::Add)
                }
            }
            OpCode::Sub { dst, a, b } => {
                if self.is_float(*dst) {
                    self.lower_fp_binop(*dst, *a, *b, FpOp::Sub)
                } else {
                    self.lower_int_binop(*dst, *a, *b, ArithOp::Sub)
                }
            }
            OpCode::Mul { dst, a, b } => {
                if self.is_float(*dst) {
                    self.lower_fp_binop(*dst, *a, *b, FpOp::Mul)
                } else {
                    let w = self.width_of(*dst);
                    let rexw = w == 8;
                    let pd = self.alloc_dst(*dst);
                    let av = self.operand_of(*a);
                    copy(self.buf, &pd.operand(), &av, w)?;
                    let bv = self.operand_of(*b);
                    match bv {
                        Operand::Cpu(s) => emit_imul_rr(self.buf, rexw, pd.cpu(), s),
                        Operand::Stack(off) => {
                            emit_imul_rm(self.buf, rexw, pd.cpu(), Reg::Rbp, off)
                        }
                        ref other => {
                            copy(self.buf, &Operand::Cpu(SCRATCH), other, w)?;
                            emit_imul_rr(self.buf, rexw, pd.cpu(), SCRATCH);
                        }
                    }
                    self.bind_dst(*dst, pd);
                    Ok(())
                }
            }
            OpCode::SDiv { dst, a, b } => {
                if self.is_float(*dst) {
                    self.lower_fp_binop(*dst, *a, *b, FpOp::Div)
                } else {
                    self.lower_div(*dst, *a, *b, true, false)
                }
            }
            OpCode::UDiv { dst, a, b } => self.lower_div(*dst, *a, *b, false, false),
            OpCode::SMod { dst, a, b } => self.lower_div(*dst, *a, *b, true, true),
            OpCode::UMod { dst, a, b } => self.lower_div(*dst, *a, *b, false, true),
            OpCode::Shl { dst, a, b } => self.lower_shift(*dst, *a, *b, ShiftOp::Shl),
            OpCode::SShr { dst, a, b } => self.lower_shift(*dst, *a, *b, ShiftOp::Sar),
            OpCode::UShr { dst, a, b } => self.lower_shift(*dst, *a, *b, ShiftOp::Shr),
            OpCode::And { dst, a, b } => self.lower_int_binop(*dst, *a, *b, ArithOp::And),
            OpCode::Or { dst, a, b } => self.lower_int_binop(*dst, *a, *b, ArithOp::Or),
            OpCode::Xor { dst, a, b } => self.lower_int_binop(*dst, *a, *b, ArithOp::Xor),

            OpCode::Neg { dst, src } => {
                let w = self.width_of(*dst);
                if self.is_float(*dst) {
                    let pd = self.alloc_dst(*dst);
                    let sv = self.operand_of(*src);
                    copy(self.buf, &pd.operand(), &sv, w)?;
                    let mask: u64 = if w == 8 {
                        0x8000_0000_0000_0000
                    } else {
                        0x8000_0000
                    };
                    emit_mov_ri(self.buf, w == 8, SCRATCH, mask);
                    emit_mov_fp_gp(self.buf, w == 8, FP_SCRATCH, SCRATCH);
                    emit_fp_xor(self.buf, w, pd.fpu(), FP_SCRATCH);
                    self.bind_dst(*dst, pd);
                } else {
                    let pd = self.alloc_dst(*dst);
                    let sv = self.operand_of(*src);
                    copy(self.buf, &pd.operand(), &sv, w)?;
                    emit_neg(self.buf, w == 8, pd.cpu());
                    self.bind_dst(*dst, pd);
                }
                Ok(())
            }

            // -- control flow --

            OpCode::Jmp { target } => {
                self.alloc.sync_all(self.buf, &self.vregs);
                self.link.emit_jmp(self.buf, *target);
                Ok(())
            }

            OpCode::JTrue { cond, target } | OpCode::JFalse { cond, target } => {
                let pc = self.load_vreg(*cond)?;
                self.alloc.sync_all(self.buf, &self.vregs);
                emit_test_rr(self.buf, false, pc.cpu(), pc.cpu());
                let cc = if matches!(op, OpCode::JTrue { .. }) {
                    X86Cond::Jne
                } else {
                    X86Cond::Je
                };
                self.link.emit_jcc(self.buf, cc, *target);
                Ok(())
            }

            OpCode::JNull { reg, target } | OpCode::JNotNull { reg, target } => {
                let pr = self.load_vreg(*reg)?;
                self.alloc.sync_all(self.buf, &self.vregs);
                emit_test_rr(self.buf, true, pr.cpu(), pr.cpu());
                let cc = if matches!(op, OpCode::JNull { .. }) {
                    X86Cond::Je
                } else {
                    X86Cond::Jne
                };
                self.link.emit_jcc(self.buf, cc, *target);
                Ok(())
            }

            OpCode::JEq { a, b, target } => {
                self.lower_cond_jump(op, *a, *b, *target, X86Cond::Je, X86Cond::Je)
            }
            OpCode::JNe { a, b, target } => {
                self.lower_cond_jump(op, *a, *b, *target, X86Cond::Jne, X86Cond::Jne)
            }
            OpCode::JSLt { a, b, target } => {
                self.lower_cond_jump(op, *a, *b, *target, X86Cond::Jl, X86Cond::Jb)
            }
            OpCode::JSGte { a, b, target } => {
                self.lower_cond_jump(op, *a, *b, *target, X86Cond::Jge, X86Cond::Jae)
            }
            OpCode::JULt { a, b, target } => {
                self.lower_cond_jump(op, *a, *b, *target, X86Cond::Jb, X86Cond::Jb)
            }

            OpCode::Switch { reg, targets } => {
                let pidx = self.load_vreg(*reg)?;
                self.alloc.sync_all(self.buf, &self.vregs);
                // Bounds check falls through to the default path (the
                // next opcode).
                emit_arith_ri(
                    self.buf,
                    ArithOp::Cmp,
                    false,
                    pidx.cpu(),
                    targets.len() as i32,
                );
                let default = emit_jcc32(self.buf, X86Cond::Jae);

                // Indexed jump through an inline table of absolute
                // addresses, resolved once the executable base is known.
                let lea_slot = emit_lea_rip(self.buf, CALL_SCRATCH);
                emit_jmp_sib(self.buf, CALL_SCRATCH, pidx.cpu(), 0);
                let table = self.buf.offset();
                let disp = table as i64 - (lea_slot as i64 + 4);
                self.buf.patch_u32(lea_slot, disp as u32);
                for t in targets {
                    self.link.add_abs_entry(self.buf.offset(), *t);
                    self.buf.emit_u64(0);
                }
                bind_local32(self.buf, default);
                Ok(())
            }

            OpCode::Ret { reg } => {
                let sig = self.module.sig_of(self.fun);
                let ret_ty = self.module.types.get(sig.ret);
                let w = ret_ty.width();
                if w > 0 {
                    let rv = self.operand_of(*reg);
                    let dst = if ret_ty.is_float() {
                        Operand::Fpu(FpReg::Xmm0)
                    } else {
                        Operand::Cpu(Reg::Rax)
                    };
                    copy(self.buf, &dst, &rv, w)?;
                }
                emit_leave(self.buf);
                emit_ret(self.buf);
                Ok(())
            }

            // -- calls --

            OpCode::Call { dst, fun, args } => {
                self.alloc.discard_all(self.buf, &mut self.vregs);
                let arg_slots: Vec<(i32, u8)> = args
                    .iter()
                    .map(|r| (self.slot_of(*r), self.width_of(*r)))
                    .collect();
                let cleanup = abi::emit_bytecode_args(self.buf, &arg_slots, None);

                self.buf.emit_u8(0xE8);
                let slot = self.buf.offset();
                self.buf.emit_u32(0);
                self.calls.push(CallPatch { slot, fidx: *fun });
                self.record_site();

                if cleanup > 0 {
                    emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, cleanup as i32);
                }
                self.bind_result(*dst);
                Ok(())
            }

            OpCode::CallNative { dst, native, args } => {
                self.alloc.discard_all(self.buf, &mut self.vregs);
                let native = &self.module.natives[native.0 as usize];
                let triples: Vec<(i32, u8, bool)> = args
                    .iter()
                    .map(|r| (self.slot_of(*r), self.width_of(*r), self.is_float(*r)))
                    .collect();
                let cleanup = abi::emit_native_args(self.buf, &triples);
                abi::emit_call_abs(self.buf, native.addr);
                self.record_site();
                if cleanup > 0 {
                    emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, cleanup as i32);
                }
                self.bind_result(*dst);
                Ok(())
            }

            OpCode::CallClosure { dst, fun, args } => {
                match self.type_of(*fun) {
                    TypeDesc::Fun(_) => {}
                    TypeDesc::Dyn => return self.lower_dyn_call(*dst, *fun, args),
                    other => {
                        return Err(self.unsupported(
                            op,
                            format!("closure register has type {}", other.name()),
                        ))
                    }
                }
                let fun_slot = self.slot_of(*fun);
                self.alloc.discard_all(self.buf, &mut self.vregs);
                let arg_slots: Vec<(i32, u8)> = args
                    .iter()
                    .map(|r| (self.slot_of(*r), self.width_of(*r)))
                    .collect();

                emit_load_w(self.buf, 8, CALL_SCRATCH, Reg::Rbp, fun_slot);
                emit_modrm_ext_offset(
                    self.buf,
                    OPC_ARITH_EvIb,
                    ArithOp::Cmp as u8,
                    CALL_SCRATCH,
                    CLOSURE_HAS_VALUE,
                );
                self.buf.emit_u8(0);
                let bound = emit_jcc32(self.buf, X86Cond::Jne);

                // Plain closure: declared arguments only.
                let cleanup = abi::emit_bytecode_args(self.buf, &arg_slots, None);
                emit_call_mem(self.buf, CALL_SCRATCH, CLOSURE_FUN);
                self.record_site();
                if cleanup > 0 {
                    emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, cleanup as i32);
                }
                let join = emit_jmp32(self.buf);

                // Bound closure: the captured value becomes the implicit
                // first argument.
                bind_local32(self.buf, bound);
                let cleanup = abi::emit_bytecode_args(
                    self.buf,
                    &arg_slots,
                    Some((CALL_SCRATCH, CLOSURE_VALUE)),
                );
                emit_call_mem(self.buf, CALL_SCRATCH, CLOSURE_FUN);
                self.record_site();
                if cleanup > 0 {
                    emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, cleanup as i32);
                }

                bind_local32(self.buf, join);
                self.bind_result(*dst);
                Ok(())
            }

            // -- closures --

            OpCode::StaticClosure { dst, fun } => {
                self.lower_make_closure(*dst, Some(*fun), None, None)
            }
            OpCode::InstanceClosure { dst, fun, obj } => {
                self.lower_make_closure(*dst, Some(*fun), Some(*obj), None)
            }
            OpCode::VirtualClosure { dst, obj, proto } => {
                self.lower_make_closure(*dst, None, Some(*obj), Some(*proto))
            }

            // -- objects --

            OpCode::New { dst } => {
                self.alloc.discard_all(self.buf, &mut self.vregs);
                let tid = self.type_id_of(*dst);
                match self.type_of(*dst) {
                    TypeDesc::Obj(_) => {
                        emit_mov_ri(self.buf, false, Reg::Rdi, tid as u64);
                        abi::emit_call_abs(self.buf, self.hooks.alloc_obj as usize);
                    }
                    TypeDesc::Virtual(_) => {
                        emit_mov_ri(self.buf, false, Reg::Rdi, tid as u64);
                        abi::emit_call_abs(self.buf, self.hooks.alloc_virtual as usize);
                    }
                    TypeDesc::Dyn => {
                        abi::emit_call_abs(self.buf, self.hooks.alloc_dynobj as usize);
                    }
                    other => {
                        return Err(self.unsupported(
                            op,
                            format!("cannot allocate type {}", other.name()),
                        ))
                    }
                }
                self.bind_result(*dst);
                Ok(())
            }

            OpCode::GetField { dst, obj, field } => self.lower_get_field(op, *dst, *obj, *field),
            OpCode::SetField { obj, field, src } => self.lower_set_field(op, *obj, *field, *src),

            OpCode::DynGet { dst, obj, hash } => {
                let obj_slot = self.slot_of(*obj);
                let hook = self.dyn_get_hook(dyn_kind(self.type_of(*dst)));
                self.alloc.discard_all(self.buf, &mut self.vregs);
                emit_load_w(self.buf, 8, Reg::Rdi, Reg::Rbp, obj_slot);
                emit_mov_ri(self.buf, true, Reg::Rsi, *hash as u64);
                abi::emit_call_abs(self.buf, hook);
                self.bind_result(*dst);
                Ok(())
            }

            OpCode::DynSet { obj, hash, src } => {
                let obj_slot = self.slot_of(*obj);
                let kind = dyn_kind(self.type_of(*src));
                let hook = self.dyn_set_hook(kind);
                let (w, slot) = (self.width_of(*src), self.slot_of(*src));
                self.alloc.discard_all(self.buf, &mut self.vregs);
                emit_load_w(self.buf, 8, Reg::Rdi, Reg::Rbp, obj_slot);
                emit_mov_ri(self.buf, true, Reg::Rsi, *hash as u64);
                match kind {
                    DynKind::F32 | DynKind::F64 => {
                        emit_fp_load(self.buf, w, FpReg::Xmm0, Reg::Rbp, slot)
                    }
                    _ => emit_load_w(self.buf, w, Reg::Rdx, Reg::Rbp, slot),
                }
                abi::emit_call_abs(self.buf, hook);
                Ok(())
            }

            // -- enums --

            OpCode::MakeEnum { dst, construct, args } => {
                let (size, offsets, widths, flag) = {
                    let desc = match self.type_of(*dst) {
                        TypeDesc::Enum(e) => e,
                        other => {
                            return Err(self.unsupported(
                                op,
                                format!("make_enum on type {}", other.name()),
                            ))
                        }
                    };
                    let c = &desc.constructs[*construct as usize];
                    let widths: Vec<u8> = c
                        .field_types
                        .iter()
                        .map(|t| self.module.types.width(*t))
                        .collect();
                    let flag = if c
                        .field_types
                        .iter()
                        .any(|t| self.module.types.is_ptr(*t))
                    {
                        ALLOC_WITH_PTRS
                    } else {
                        ALLOC_RAW
                    };
                    (c.size, c.offsets.clone(), widths, flag)
                };

                self.alloc.discard_all(self.buf, &mut self.vregs);
                emit_mov_ri(self.buf, true, Reg::Rdi, size as u64);
                emit_mov_ri(self.buf, false, Reg::Rsi, flag as u64);
                abi::emit_call_abs(self.buf, self.hooks.alloc_bytes as usize);

                emit_store_imm_w(self.buf, 4, Reg::Rax, ENUM_TAG, *construct as i32);
                for (i, r) in args.iter().enumerate() {
                    let w = widths[i];
                    let slot = self.slot_of(*r);
                    emit_load_w(self.buf, w, SCRATCH, Reg::Rbp, slot);
                    emit_store_w(self.buf, w, SCRATCH, Reg::Rax, offsets[i] as i32);
                }
                self.bind_result(*dst);
                Ok(())
            }

            OpCode::EnumField { dst, value, construct, field } => {
                let (off, w) = self.enum_field_info(op, *value, *construct, *field)?;
                let pv = self.load_vreg(*value)?;
                let pd = self.alloc_dst(*dst);
                copy(self.buf, &pd.operand(), &Operand::mem(pv.cpu(), off), w)?;
                self.bind_dst(*dst, pd);
                Ok(())
            }

            OpCode::SetEnumField { value, construct, field, src } => {
                let (off, w) = self.enum_field_info(op, *value, *construct, *field)?;
                let pv = self.load_vreg(*value)?;
                let sv = self.operand_of(*src);
                copy(self.buf, &Operand::mem(pv.cpu(), off), &sv, w)?;
                Ok(())
            }

            // -- dynamic values --

            OpCode::ToDyn { dst, src } => {
                let (w, slot, tid) = (
                    self.width_of(*src),
                    self.slot_of(*src),
                    self.type_id_of(*src),
                );
                let nullable = self.type_of(*src).is_ptr();
                self.alloc.discard_all(self.buf, &mut self.vregs);

                // A null pointer boxes to null without allocating.
                let mut null_path = None;
                if nullable {
                    emit_load_w(self.buf, 8, SCRATCH, Reg::Rbp, slot);
                    emit_test_rr(self.buf, true, SCRATCH, SCRATCH);
                    null_path = Some(emit_jcc32(self.buf, X86Cond::Je));
                }

                emit_mov_ri(self.buf, false, Reg::Rdi, tid as u64);
                abi::emit_call_abs(self.buf, self.hooks.box_value as usize);
                // Raw bits into the payload, width-restricted.
                emit_load_w(self.buf, w, SCRATCH, Reg::Rbp, slot);
                emit_store_w(self.buf, w, SCRATCH, Reg::Rax, CELL_PAYLOAD);

                if let Some(null_path) = null_path {
                    let done = emit_jmp32(self.buf);
                    bind_local32(self.buf, null_path);
                    emit_mov_ri(self.buf, false, Reg::Rax, 0);
                    bind_local32(self.buf, done);
                }
                self.bind_result(*dst);
                Ok(())
            }

            OpCode::SafeCast { dst, src } => {
                let src_tid = self.type_id_of(*src);
                let dst_tid = self.type_id_of(*dst);
                let src_slot = self.slot_of(*src);
                self.alloc.discard_all(self.buf, &mut self.vregs);
                emit_load_w(self.buf, 8, Reg::Rdi, Reg::Rbp, src_slot);
                emit_mov_ri(self.buf, false, Reg::Rsi, src_tid as u64);
                emit_mov_ri(self.buf, false, Reg::Rdx, dst_tid as u64);
                abi::emit_call_abs(self.buf, self.hooks.unbox_cast as usize);
                if self.is_float(*dst) {
                    // Raw bits come back in RAX.
                    emit_mov_fp_gp(
                        self.buf,
                        self.width_of(*dst) == 8,
                        FpReg::Xmm0,
                        Reg::Rax,
                    );
                }
                self.bind_result(*dst);
                Ok(())
            }

            // -- exceptions --

            OpCode::Trap { dst, handler } => {
                self.alloc.discard_all(self.buf, &mut self.vregs);
                let area = self.vregs.trap_slot(self.trap_depth);
                self.trap_depth += 1;

                // Fill the snapshot.
                emit_lea(self.buf, Reg::Rdi, Reg::Rbp, area);
                emit_store_w(self.buf, 8, Reg::Rsp, Reg::Rdi, TRAP_RSP);
                emit_store_w(self.buf, 8, Reg::Rbp, Reg::Rdi, TRAP_RBP);
                for (i, &r) in TRAP_SAVED_REGS.iter().enumerate() {
                    emit_store_w(self.buf, 8, r, Reg::Rdi, TRAP_RBX + 8 * i as i32);
                }
                let resume_slot = emit_lea_rip(self.buf, Reg::Rax);
                emit_store_w(self.buf, 8, Reg::Rax, Reg::Rdi, TRAP_RESUME);

                abi::emit_call_abs(self.buf, trap::trap_push_addr());
                emit_mov_ri(self.buf, false, Reg::Rax, 0);

                // Resume point: RAX is 0 on the normal path, 1 when
                // arriving from a throw.
                let resume = self.buf.offset();
                let disp = resume as i64 - (resume_slot as i64 + 4);
                self.buf.patch_u32(resume_slot, disp as u32);

                emit_test_rr(self.buf, false, Reg::Rax, Reg::Rax);
                let no_exc = emit_jcc32(self.buf, X86Cond::Je);
                abi::emit_call_abs(self.buf, trap::current_exception_addr());
                let dst_slot = self.slot_of(*dst);
                emit_store_w(self.buf, 8, Reg::Rax, Reg::Rbp, dst_slot);
                self.link.emit_jmp(self.buf, *handler);
                bind_local32(self.buf, no_exc);
                Ok(())
            }

            OpCode::EndTrap => {
                if self.trap_depth == 0 {
                    return Err(self.unsupported(op, "end_trap outside a protected region"));
                }
                self.trap_depth -= 1;
                self.alloc.discard_all(self.buf, &mut self.vregs);
                abi::emit_call_abs(self.buf, trap::trap_pop_addr());
                Ok(())
            }

            OpCode::Throw { exc } => {
                let exc_slot = self.slot_of(*exc);
                self.alloc.discard_all(self.buf, &mut self.vregs);
                emit_load_w(self.buf, 8, Reg::Rdi, Reg::Rbp, exc_slot);
                self.emit_throw_from_rdi();
                Ok(())
            }

            OpCode::NullCheck { reg } => {
                let pr = self.load_vreg(*reg)?;
                self.alloc.sync_all(self.buf, &self.vregs);
                emit_test_rr(self.buf, true, pr.cpu(), pr.cpu());
                let ok = emit_jcc32(self.buf, X86Cond::Jne);
                abi::emit_call_abs(self.buf, self.hooks.null_access as usize);
                emit_mov_rr(self.buf, true, Reg::Rdi, Reg::Rax);
                self.emit_throw_from_rdi();
                bind_local32(self.buf, ok);
                Ok(())
            }
        }
    }

    // -- structured lowering bodies --

    fn dyn_get_hook(&self, kind: DynKind) -> usize {
        match kind {
            DynKind::Ptr => self.hooks.dyn_get_ptr as usize,
            DynKind::I32 => self.hooks.dyn_get_i32 as usize,
            DynKind::F32 => self.hooks.dyn_get_f32 as usize,
            DynKind::F64 => self.hooks.dyn_get_f64 as usize,
        }
    }

    fn dyn_set_hook(&self, kind: DynKind) -> usize {
        match kind {
            DynKind::Ptr => self.hooks.dyn_set_ptr as usize,
            DynKind::I32 => self.hooks.dyn_set_i32 as usize,
            DynKind::F32 => self.hooks.dyn_set_f32 as usize,
            DynKind::F64 => self.hooks.dyn_set_f64 as usize,
        }
    }

    fn enum_field_info(
        &self,
        op: &OpCode,
        value: RegIdx,
        construct: u32,
        field: u32,
    ) -> Result<(i32, u8), JitError> {
        match self.type_of(value) {
            TypeDesc::Enum(e) => {
                let c = &e.constructs[construct as usize];
                let off = c.offsets[field as usize] as i32;
                let w = self.module.types.width(c.field_types[field as usize]);
                Ok((off, w))
            }
            other => Err(self.unsupported(
                op,
                format!("enum access on type {}", other.name()),
            )),
        }
    }

    fn lower_get_field(
        &mut self,
        op: &OpCode,
        dst: RegIdx,
        obj: RegIdx,
        field: u32,
    ) -> Result<(), JitError> {
        match self.type_of(obj) {
            TypeDesc::Obj(o) => {
                let fd = &o.fields[field as usize];
                let off = fd.offset as i32;
                let w = self.module.types.width(fd.ty);
                let pobj = self.load_vreg(obj)?;
                let pd = self.alloc_dst(dst);
                copy(self.buf, &pd.operand(), &Operand::mem(pobj.cpu(), off), w)?;
                self.bind_dst(dst, pd);
                Ok(())
            }
            TypeDesc::Virtual(v) => {
                let fd = &v.fields[field as usize];
                let hash = fd.hash;
                let kind = dyn_kind(self.module.types.get(fd.ty));
                let w = self.module.types.width(fd.ty);
                let float = matches!(kind, DynKind::F32 | DynKind::F64);
                let obj_slot = self.slot_of(obj);

                self.alloc.discard_all(self.buf, &mut self.vregs);
                emit_load_w(self.buf, 8, CALL_SCRATCH, Reg::Rbp, obj_slot);
                // Per-instance indirection slot: populated means a
                // direct pointer to the field storage.
                emit_load_w(
                    self.buf,
                    8,
                    SCRATCH,
                    CALL_SCRATCH,
                    VIRTUAL_SLOTS + 8 * field as i32,
                );
                emit_test_rr(self.buf, true, SCRATCH, SCRATCH);
                let slow = emit_jcc32(self.buf, X86Cond::Je);

                if float {
                    emit_fp_load(self.buf, w, FpReg::Xmm0, SCRATCH, 0);
                } else {
                    emit_load_w(self.buf, w, Reg::Rax, SCRATCH, 0);
                }
                let done = emit_jmp32(self.buf);

                // Hashed dynamic lookup fallback.
                bind_local32(self.buf, slow);
                emit_mov_rr(self.buf, true, Reg::Rdi, CALL_SCRATCH);
                emit_mov_ri(self.buf, true, Reg::Rsi, hash as u64);
                let hook = self.dyn_get_hook(kind);
                abi::emit_call_abs(self.buf, hook);

                bind_local32(self.buf, done);
                self.bind_result(dst);
                Ok(())
            }
            other => Err(self.unsupported(
                op,
                format!("field access on type {}", other.name()),
            )),
        }
    }

    fn lower_set_field(
        &mut self,
        op: &OpCode,
        obj: RegIdx,
        field: u32,
        src: RegIdx,
    ) -> Result<(), JitError> {
        match self.type_of(obj) {
            TypeDesc::Obj(o) => {
                let fd = &o.fields[field as usize];
                let off = fd.offset as i32;
                let w = self.module.types.width(fd.ty);
                let pobj = self.load_vreg(obj)?;
                let sv = self.operand_of(src);
                copy(self.buf, &Operand::mem(pobj.cpu(), off), &sv, w)?;
                Ok(())
            }
            TypeDesc::Virtual(v) => {
                let fd = &v.fields[field as usize];
                let hash = fd.hash;
                let kind = dyn_kind(self.module.types.get(fd.ty));
                let w = self.module.types.width(fd.ty);
                let (obj_slot, src_slot) = (self.slot_of(obj), self.slot_of(src));

                self.alloc.discard_all(self.buf, &mut self.vregs);
                emit_load_w(self.buf, 8, CALL_SCRATCH, Reg::Rbp, obj_slot);
                emit_load_w(
                    self.buf,
                    8,
                    SCRATCH,
                    CALL_SCRATCH,
                    VIRTUAL_SLOTS + 8 * field as i32,
                );
                emit_test_rr(self.buf, true, SCRATCH, SCRATCH);
                let slow = emit_jcc32(self.buf, X86Cond::Je);

                // Direct store through the indirection pointer,
                // width-restricted so neighbouring fields stay intact.
                emit_load_w(self.buf, w, Reg::Rax, Reg::Rbp, src_slot);
                emit_store_w(self.buf, w, Reg::Rax, SCRATCH, 0);
                let done = emit_jmp32(self.buf);

                bind_local32(self.buf, slow);
                emit_mov_rr(self.buf, true, Reg::Rdi, CALL_SCRATCH);
                emit_mov_ri(self.buf, true, Reg::Rsi, hash as u64);
                match kind {
                    DynKind::F32 | DynKind::F64 => {
                        emit_fp_load(self.buf, w, FpReg::Xmm0, Reg::Rbp, src_slot)
                    }
                    _ => emit_load_w(self.buf, w, Reg::Rdx, Reg::Rbp, src_slot),
                }
                let hook = self.dyn_set_hook(kind);
                abi::emit_call_abs(self.buf, hook);

                bind_local32(self.buf, done);
                Ok(())
            }
            other => Err(self.unsupported(
                op,
                format!("field store on type {}", other.name()),
            )),
        }
    }

    /// Allocate and fill a closure cell. `fun` is present for the
    /// statically-resolved shapes (the entry address is patched in at
    /// finalize); `proto` selects a slot of the object's per-type
    /// dispatch table, read at allocation time, not at call time.
    fn lower_make_closure(
        &mut self,
        dst: RegIdx,
        fun: Option<FunIdx>,
        obj: Option<RegIdx>,
        proto: Option<u32>,
    ) -> Result<(), JitError> {
        let tid = self.type_id_of(dst);
        let obj_slot = obj.map(|o| self.slot_of(o));
        self.alloc.discard_all(self.buf, &mut self.vregs);

        emit_mov_ri(self.buf, false, Reg::Rdi, CLOSURE_SIZE as u64);
        emit_mov_ri(self.buf, false, Reg::Rsi, ALLOC_WITH_PTRS as u64);
        abi::emit_call_abs(self.buf, self.hooks.alloc_bytes as usize);

        match (fun, proto) {
            (Some(fidx), _) => {
                // Entry address patched once the function is placed.
                let slot = emit_mov_ri64_slot(self.buf, SCRATCH, 0);
                self.abs.push(AbsPatch {
                    slot,
                    target: AbsTarget::Function(fidx),
                });
                emit_store_w(self.buf, 8, SCRATCH, Reg::Rax, CLOSURE_FUN);
            }
            (None, Some(proto)) => {
                // Dispatch-table lookup against the object's runtime
                // type.
                let obj_slot = obj_slot.expect("virtual closure without object");
                emit_load_w(self.buf, 8, CALL_SCRATCH, Reg::Rbp, obj_slot);
                emit_load_w(self.buf, 8, SCRATCH, CALL_SCRATCH, 0);
                emit_load_w(self.buf, 8, SCRATCH, SCRATCH, RT_PROTOS);
                emit_load_w(self.buf, 8, SCRATCH, SCRATCH, 8 * proto as i32);
                emit_store_w(self.buf, 8, SCRATCH, Reg::Rax, CLOSURE_FUN);
            }
            (None, None) => unreachable!("closure without function or proto"),
        }

        emit_store_imm_w(self.buf, 8, Reg::Rax, CLOSURE_TYPE, tid as i32);
        if let Some(obj_slot) = obj_slot {
            emit_store_imm_w(self.buf, 4, Reg::Rax, CLOSURE_HAS_VALUE, 1);
            emit_load_w(self.buf, 8, CALL_SCRATCH, Reg::Rbp, obj_slot);
            emit_store_w(self.buf, 8, CALL_SCRATCH, Reg::Rax, CLOSURE_VALUE);
        } else {
            emit_store_imm_w(self.buf, 4, Reg::Rax, CLOSURE_HAS_VALUE, 0);
        }

        self.bind_result(dst);
        Ok(())
    }

    /// Dynamic closure invocation: box the arguments into an on-stack
    /// array and let the runtime dispatch.
    fn lower_dyn_call(
        &mut self,
        dst: RegIdx,
        fun: RegIdx,
        args: &[RegIdx],
    ) -> Result<(), JitError> {
        let arg_slots: Vec<(i32, u8)> = args
            .iter()
            .map(|r| (self.slot_of(*r), self.width_of(*r)))
            .collect();
        let fun_slot = self.slot_of(fun);
        self.alloc.discard_all(self.buf, &mut self.vregs);

        let area = ((arg_slots.len() * 8 + 15) & !15) as i32;
        if area > 0 {
            emit_arith_ri(self.buf, ArithOp::Sub, true, Reg::Rsp, area);
        }
        for (i, &(slot, w)) in arg_slots.iter().enumerate() {
            emit_load_w(self.buf, w, SCRATCH, Reg::Rbp, slot);
            emit_store_w(self.buf, 8, SCRATCH, Reg::Rsp, 8 * i as i32);
        }
        emit_load_w(self.buf, 8, Reg::Rdi, Reg::Rbp, fun_slot);
        emit_mov_rr(self.buf, true, Reg::Rsi, Reg::Rsp);
        emit_mov_ri(self.buf, false, Reg::Rdx, arg_slots.len() as u64);
        abi::emit_call_abs(self.buf, self.hooks.dyn_call as usize);
        self.record_site();
        if area > 0 {
            emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, area);
        }
        self.bind_result(dst);
        Ok(())
    }
}
