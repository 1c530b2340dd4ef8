/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX prefix (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }

    pub const fn from_u8(v: u8) -> Reg {
        match v {
            0 => Reg::Rax,
            1 => Reg::Rcx,
            2 => Reg::Rdx,
            3 => Reg::Rbx,
            4 => Reg::Rsp,
            5 => Reg::Rbp,
            6 => Reg::Rsi,
            7 => Reg::Rdi,
            8 => Reg::R8,
            9 => Reg::R9,
            10 => Reg::R10,
            11 => Reg::R11,
            12 => Reg::R12,
            13 => Reg::R13,
            14 => Reg::R14,
            15 => Reg::R15,
            _ => panic!("invalid GP register id"),
        }
    }
}

/// SSE scalar register indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FpReg {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl FpReg {
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }

    pub const fn from_u8(v: u8) -> FpReg {
        match v {
            0 => FpReg::Xmm0,
            1 => FpReg::Xmm1,
            2 => FpReg::Xmm2,
            3 => FpReg::Xmm3,
            4 => FpReg::Xmm4,
            5 => FpReg::Xmm5,
            6 => FpReg::Xmm6,
            7 => FpReg::Xmm7,
            8 => FpReg::Xmm8,
            9 => FpReg::Xmm9,
            10 => FpReg::Xmm10,
            11 => FpReg::Xmm11,
            12 => FpReg::Xmm12,
            13 => FpReg::Xmm13,
            14 => FpReg::Xmm14,
            15 => FpReg::Xmm15,
            _ => panic!("invalid SSE register id"),
        }
    }
}

/// Integer argument registers (System V AMD64 ABI), used for calls into
/// the runtime's native entry points.
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Float argument registers (System V AMD64 ABI).
pub const FP_ARG_REGS: &[FpReg] = &[
    FpReg::Xmm0,
    FpReg::Xmm1,
    FpReg::Xmm2,
    FpReg::Xmm3,
    FpReg::Xmm4,
    FpReg::Xmm5,
    FpReg::Xmm6,
    FpReg::Xmm7,
];

/// General-purpose registers available to the allocator. All of them are
/// caller-saved, so a call discards every binding and the prologue never
/// has to preserve anything beyond RBP.
pub const ALLOC_CPU: &[Reg] = &[
    Reg::Rax,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
];

/// SSE registers available to the allocator.
pub const ALLOC_FPU: &[FpReg] = &[
    FpReg::Xmm0,
    FpReg::Xmm1,
    FpReg::Xmm2,
    FpReg::Xmm3,
    FpReg::Xmm4,
    FpReg::Xmm5,
    FpReg::Xmm6,
    FpReg::Xmm7,
];

/// Scratch register of the copy algebra. Never allocated, so `copy` may
/// clobber it at any point.
pub const SCRATCH: Reg = Reg::R11;

/// Second scratch, used for absolute call targets and two-address memory
/// copies. Never allocated.
pub const CALL_SCRATCH: Reg = Reg::R10;

/// SSE scratch for float constants and negation masks.
pub const FP_SCRATCH: FpReg = FpReg::Xmm15;

/// Required stack alignment at native call sites.
pub const STACK_ALIGN: u32 = 16;

// -- Trap save area layout --
//
// One 80-byte area per static trap-nesting level lives in the function
// frame. The snapshot holds everything needed to resume at the matching
// handler: the previous trap frame, RSP/RBP, the callee-saved registers
// of the enclosing native caller, and the resume address.

pub const TRAP_PREV: i32 = 0;
pub const TRAP_RSP: i32 = 8;
pub const TRAP_RBP: i32 = 16;
pub const TRAP_RBX: i32 = 24;
pub const TRAP_R12: i32 = 32;
pub const TRAP_R13: i32 = 40;
pub const TRAP_R14: i32 = 48;
pub const TRAP_R15: i32 = 56;
pub const TRAP_RESUME: i32 = 64;
pub const TRAP_FRAME_SIZE: i32 = 80;

/// Registers snapshotted into a trap save area besides RSP/RBP, in
/// frame-offset order starting at `TRAP_RBX`.
pub const TRAP_SAVED_REGS: &[Reg] = &[Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];
