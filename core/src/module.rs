use crate::opcode::{FunIdx, OpCode};
use crate::types::{FunSig, TypeCatalogue, TypeIdx};

/// One VM function as delivered by the loader/verifier: a typed register
/// file and an ordered opcode list.
///
/// The first `sig.args.len()` registers are the arguments, in order; the
/// rest are locals. Register types are final — the verifier has already
/// checked every opcode against them.
#[derive(Debug, Clone)]
pub struct Function {
    pub fidx: FunIdx,
    /// `Fun` type of this function in the catalogue.
    pub ty: TypeIdx,
    /// Declared type of every register, arguments first.
    pub regs: Vec<TypeIdx>,
    pub ops: Vec<OpCode>,
}

/// A native import: resolved entry point plus its declared signature.
/// Address resolution is the loader's job; the compiler only marshals.
#[derive(Debug, Clone)]
pub struct Native {
    pub ty: TypeIdx,
    pub addr: usize,
}

/// A loaded module: type catalogue, functions and native imports.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: TypeCatalogue,
    pub functions: Vec<Function>,
    pub natives: Vec<Native>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, fidx: FunIdx) -> &Function {
        &self.functions[fidx.0 as usize]
    }

    pub fn sig_of(&self, fun: &Function) -> &FunSig {
        self.types.fun_sig(fun.ty)
    }
}

impl Function {
    pub fn nargs(&self, types: &TypeCatalogue) -> usize {
        types.fun_sig(self.ty).args.len()
    }
}
