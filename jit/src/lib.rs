//! Function-at-a-time JIT backend for the kestrel register VM.
//!
//! The loader/verifier hands over one [`kestrel_core::Module`] (typed
//! opcodes, register files, type catalogue); this crate compiles each
//! function into a shared code buffer and finalizes the module into
//! executable memory. Exactly two entry points face the caller:
//! [`JitModule::compile`] and [`JitModule::finalize`].

pub mod abi;
pub mod code_buffer;
pub mod compile;
pub mod error;
pub mod exec_memory;
pub mod linker;
pub mod operand;
pub mod ralloc;
pub mod runtime;
pub mod trap;
pub mod vreg;
pub mod x86_64;

pub use code_buffer::CodeBuffer;
pub use compile::{AbsPatch, AbsTarget, CallPatch, CallSite};
pub use error::JitError;
pub use exec_memory::ExecMemory;
pub use operand::{copy, Operand};
pub use ralloc::{AllocatorState, EvictionPolicy, FirstFit, PReg, RegFile, RoundRobin};
pub use runtime::RuntimeHooks;
pub use vreg::VRegTable;

use kestrel_core::{FunIdx, Module};

use compile::{compile_function, AbsTarget as Target, CompiledFunction};
use ralloc::RoundRobin as DefaultPolicy;

/// One module's compilation session: the shared code buffer, the
/// per-function entry offsets, and the patch lists resolved at the end
/// of module compilation. Owns no state shared with other modules, so
/// independent modules may compile on separate threads.
pub struct JitModule<'m> {
    module: &'m Module,
    hooks: RuntimeHooks,
    buf: CodeBuffer,
    fn_offsets: Vec<Option<usize>>,
    calls: Vec<CallPatch>,
    abs: Vec<AbsPatch>,
    call_sites: Vec<CallSite>,
    callback_offset: usize,
    debug: bool,
}

impl<'m> JitModule<'m> {
    /// Start a compilation session. The native→bytecode callback
    /// trampoline is built immediately at the head of the buffer.
    pub fn new(module: &'m Module, hooks: RuntimeHooks) -> Self {
        let mut buf = CodeBuffer::new();
        let callback_offset = abi::build_callback_trampoline(&mut buf);
        Self {
            fn_offsets: vec![None; module.functions.len()],
            module,
            hooks,
            buf,
            calls: Vec::new(),
            abs: Vec::new(),
            call_sites: Vec::new(),
            callback_offset,
            debug: false,
        }
    }

    /// Record call sites for stack-trace reconstruction.
    pub fn enable_debug_info(&mut self) {
        self.debug = true;
    }

    /// Compile one function into the shared buffer and return its entry
    /// offset. Compiling the same function again replaces its entry;
    /// later finalization links every caller against the newest code.
    pub fn compile(&mut self, fidx: FunIdx) -> Result<usize, JitError> {
        self.compile_with_policy(fidx, Box::new(DefaultPolicy::default()))
    }

    /// Compile with a caller-chosen eviction policy.
    pub fn compile_with_policy(
        &mut self,
        fidx: FunIdx,
        policy: Box<dyn EvictionPolicy>,
    ) -> Result<usize, JitError> {
        let fun = self.module.function(fidx);
        let CompiledFunction {
            start,
            calls,
            abs,
            sites,
        } = compile_function(self.module, fun, &self.hooks, &mut self.buf, self.debug, policy)?;
        self.fn_offsets[fidx.0 as usize] = Some(start);
        self.calls.extend(calls);
        self.abs.extend(abs);
        self.call_sites.extend(sites);
        Ok(start)
    }

    /// Current size of the emitted code.
    pub fn code_size(&self) -> usize {
        self.buf.offset()
    }

    /// Resolve every deferred call displacement, copy the buffer into
    /// executable memory, resolve the absolute patches against the
    /// final base address, and seal the mapping.
    pub fn finalize(mut self) -> Result<FinalizedModule, JitError> {
        // Inter-function calls are rel32 within the shared buffer, so
        // they resolve before relocation to the final base.
        for patch in &self.calls {
            let target = self.fn_offsets[patch.fidx.0 as usize]
                .ok_or(JitError::MissingFunction(patch.fidx.0))?;
            let disp = target as i64 - (patch.slot as i64 + 4);
            if !(i32::MIN as i64..=i32::MAX as i64).contains(&disp) {
                return Err(JitError::Displacement { at: patch.slot });
            }
            self.buf.patch_u32(patch.slot, disp as u32);
        }

        let mut mem = ExecMemory::new(self.buf.offset())?;
        mem.copy_from(self.buf.as_slice());
        let base = mem.base_ptr() as u64;

        for patch in &self.abs {
            let offset = match patch.target {
                Target::Function(fidx) => self.fn_offsets[fidx.0 as usize]
                    .ok_or(JitError::MissingFunction(fidx.0))?,
                Target::Offset(offset) => offset,
            };
            mem.patch_u64(patch.slot, base + offset as u64);
        }

        mem.make_executable()?;

        Ok(FinalizedModule {
            mem,
            fn_offsets: self.fn_offsets,
            callback_offset: self.callback_offset,
            patched_call_sites: self.calls.len() + self.abs.len(),
            call_sites: self.call_sites,
        })
    }
}

/// A finalized module: read/execute-only memory, safe to call from any
/// number of threads.
pub struct FinalizedModule {
    mem: ExecMemory,
    fn_offsets: Vec<Option<usize>>,
    callback_offset: usize,
    /// Number of deferred call/address sites resolved at finalize.
    pub patched_call_sites: usize,
    /// Debug map from return addresses to (function, opcode index);
    /// empty unless debug info was enabled.
    pub call_sites: Vec<CallSite>,
}

impl FinalizedModule {
    pub fn code_size(&self) -> usize {
        self.mem.size()
    }

    /// Entry pointer of a compiled function.
    pub fn entry(&self, fidx: FunIdx) -> *const u8 {
        let offset = self.fn_offsets[fidx.0 as usize]
            .unwrap_or_else(|| panic!("function f{} was never compiled", fidx.0));
        self.mem.ptr_at(offset)
    }

    /// Entry pointer of the native→bytecode callback trampoline.
    pub fn callback_entry(&self) -> *const u8 {
        self.mem.ptr_at(self.callback_offset)
    }

    /// Invoke a compiled function through the callback trampoline with
    /// arguments boxed into a raw word array. Floating results come
    /// back as raw bits.
    ///
    /// # Safety
    /// `args` must match the function's declared signature word for
    /// word, and the runtime hooks the module was compiled against must
    /// still be alive.
    pub unsafe fn callback(&self, fidx: FunIdx, args: &[u64], ret_float: bool) -> u64 {
        let entry = self.entry(fidx);
        let f: extern "C" fn(*const u8, *const u64, u64, u64) -> u64 =
            core::mem::transmute(self.callback_entry());
        f(entry, args.as_ptr(), args.len() as u64, u64::from(ret_float))
    }

    /// Map a return address offset back to its call site, debug mode
    /// only.
    pub fn find_call_site(&self, ret_offset: usize) -> Option<&CallSite> {
        self.call_sites.iter().find(|s| s.ret_offset == ret_offset)
    }
}
