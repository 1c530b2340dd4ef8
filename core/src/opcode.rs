/// Index of a virtual register within one function's register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegIdx(pub u32);

/// Index of an opcode within one function's opcode list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpIdx(pub u32);

/// Index of a function within the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunIdx(pub u32);

/// Index of a native import within the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeIdx(pub u32);

/// Bytecode opcodes of the register VM.
///
/// Register operands are indices into the enclosing function's typed
/// register file; the verifier has already checked operand types, so the
/// compiler reads types from the register file rather than the opcode.
/// Branch operands are logical opcode indices.
#[derive(Debug, Clone)]
pub enum OpCode {
    // -- Moves and constants --
    Mov { dst: RegIdx, src: RegIdx },
    Int { dst: RegIdx, value: i64 },
    Float { dst: RegIdx, value: f64 },
    Bool { dst: RegIdx, value: bool },
    Null { dst: RegIdx },

    // -- Integer arithmetic (dst type selects 32/64-bit forms) --
    Add { dst: RegIdx, a: RegIdx, b: RegIdx },
    Sub { dst: RegIdx, a: RegIdx, b: RegIdx },
    Mul { dst: RegIdx, a: RegIdx, b: RegIdx },
    SDiv { dst: RegIdx, a: RegIdx, b: RegIdx },
    UDiv { dst: RegIdx, a: RegIdx, b: RegIdx },
    SMod { dst: RegIdx, a: RegIdx, b: RegIdx },
    UMod { dst: RegIdx, a: RegIdx, b: RegIdx },
    Shl { dst: RegIdx, a: RegIdx, b: RegIdx },
    SShr { dst: RegIdx, a: RegIdx, b: RegIdx },
    UShr { dst: RegIdx, a: RegIdx, b: RegIdx },
    And { dst: RegIdx, a: RegIdx, b: RegIdx },
    Or { dst: RegIdx, a: RegIdx, b: RegIdx },
    Xor { dst: RegIdx, a: RegIdx, b: RegIdx },
    Neg { dst: RegIdx, src: RegIdx },

    // -- Calls --
    Call { dst: RegIdx, fun: FunIdx, args: Vec<RegIdx> },
    CallNative { dst: RegIdx, native: NativeIdx, args: Vec<RegIdx> },
    CallClosure { dst: RegIdx, fun: RegIdx, args: Vec<RegIdx> },

    // -- Closures --
    StaticClosure { dst: RegIdx, fun: FunIdx },
    InstanceClosure { dst: RegIdx, fun: FunIdx, obj: RegIdx },
    VirtualClosure { dst: RegIdx, obj: RegIdx, proto: u32 },

    // -- Control flow --
    Jmp { target: OpIdx },
    JTrue { cond: RegIdx, target: OpIdx },
    JFalse { cond: RegIdx, target: OpIdx },
    JNull { reg: RegIdx, target: OpIdx },
    JNotNull { reg: RegIdx, target: OpIdx },
    JEq { a: RegIdx, b: RegIdx, target: OpIdx },
    JNe { a: RegIdx, b: RegIdx, target: OpIdx },
    JSLt { a: RegIdx, b: RegIdx, target: OpIdx },
    JSGte { a: RegIdx, b: RegIdx, target: OpIdx },
    JULt { a: RegIdx, b: RegIdx, target: OpIdx },
    /// Bounds-checked table dispatch; an out-of-range selector falls
    /// through to the next opcode.
    Switch { reg: RegIdx, targets: Vec<OpIdx> },
    Ret { reg: RegIdx },

    // -- Objects --
    New { dst: RegIdx },
    GetField { dst: RegIdx, obj: RegIdx, field: u32 },
    SetField { obj: RegIdx, field: u32, src: RegIdx },
    DynGet { dst: RegIdx, obj: RegIdx, hash: i64 },
    DynSet { obj: RegIdx, hash: i64, src: RegIdx },

    // -- Enums --
    MakeEnum { dst: RegIdx, construct: u32, args: Vec<RegIdx> },
    EnumField { dst: RegIdx, value: RegIdx, construct: u32, field: u32 },
    SetEnumField { value: RegIdx, construct: u32, field: u32, src: RegIdx },

    // -- Dynamic values --
    ToDyn { dst: RegIdx, src: RegIdx },
    SafeCast { dst: RegIdx, src: RegIdx },

    // -- Exceptions --
    Trap { dst: RegIdx, handler: OpIdx },
    EndTrap,
    Throw { exc: RegIdx },
    NullCheck { reg: RegIdx },

    Nop,
}

impl OpCode {
    /// Opcode name for diagnostics and dumps.
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Mov { .. } => "mov",
            OpCode::Int { .. } => "int",
            OpCode::Float { .. } => "float",
            OpCode::Bool { .. } => "bool",
            OpCode::Null { .. } => "null",
            OpCode::Add { .. } => "add",
            OpCode::Sub { .. } => "sub",
            OpCode::Mul { .. } => "mul",
            OpCode::SDiv { .. } => "sdiv",
            OpCode::UDiv { .. } => "udiv",
            OpCode::SMod { .. } => "smod",
            OpCode::UMod { .. } => "umod",
            OpCode::Shl { .. } => "shl",
            OpCode::SShr { .. } => "sshr",
            OpCode::UShr { .. } => "ushr",
            OpCode::And { .. } => "and",
            OpCode::Or { .. } => "or",
            OpCode::Xor { .. } => "xor",
            OpCode::Neg { .. } => "neg",
            OpCode::Call { .. } => "call",
            OpCode::CallNative { .. } => "call_native",
            OpCode::CallClosure { .. } => "call_closure",
            OpCode::StaticClosure { .. } => "static_closure",
            OpCode::InstanceClosure { .. } => "instance_closure",
            OpCode::VirtualClosure { .. } => "virtual_closure",
            OpCode::Jmp { .. } => "jmp",
            OpCode::JTrue { .. } => "jtrue",
            OpCode::JFalse { .. } => "jfalse",
            OpCode::JNull { .. } => "jnull",
            OpCode::JNotNull { .. } => "jnotnull",
            OpCode::JEq { .. } => "jeq",
            OpCode::JNe { .. } => "jne",
            OpCode::JSLt { .. } => "jslt",
            OpCode::JSGte { .. } => "jsgte",
            OpCode::JULt { .. } => "jult",
            OpCode::Switch { .. } => "switch",
            OpCode::Ret { .. } => "ret",
            OpCode::New { .. } => "new",
            OpCode::GetField { .. } => "get_field",
            OpCode::SetField { .. } => "set_field",
            OpCode::DynGet { .. } => "dyn_get",
            OpCode::DynSet { .. } => "dyn_set",
            OpCode::MakeEnum { .. } => "make_enum",
            OpCode::EnumField { .. } => "enum_field",
            OpCode::SetEnumField { .. } => "set_enum_field",
            OpCode::ToDyn { .. } => "to_dyn",
            OpCode::SafeCast { .. } => "safe_cast",
            OpCode::Trap { .. } => "trap",
            OpCode::EndTrap => "end_trap",
            OpCode::Throw { .. } => "throw",
            OpCode::NullCheck { .. } => "null_check",
            OpCode::Nop => "nop",
        }
    }

    /// All opcode indices this opcode may transfer control to.
    ///
    /// Every returned index becomes a register-discard point: the code
    /// generator drops all virtual-to-physical bindings there, since the
    /// opcode is reachable from more than one edge.
    pub fn jump_targets(&self, out: &mut Vec<OpIdx>) {
        match self {
            OpCode::Jmp { target }
            | OpCode::JTrue { target, .. }
            | OpCode::JFalse { target, .. }
            | OpCode::JNull { target, .. }
            | OpCode::JNotNull { target, .. }
            | OpCode::JEq { target, .. }
            | OpCode::JNe { target, .. }
            | OpCode::JSLt { target, .. }
            | OpCode::JSGte { target, .. }
            | OpCode::JULt { target, .. } => out.push(*target),
            OpCode::Switch { targets, .. } => out.extend_from_slice(targets),
            OpCode::Trap { handler, .. } => out.push(*handler),
            _ => {}
        }
    }
}
