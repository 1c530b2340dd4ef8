pub mod dump;
pub mod module;
pub mod opcode;
pub mod types;

pub use module::{Function, Module, Native};
pub use opcode::{FunIdx, NativeIdx, OpCode, OpIdx, RegIdx};
pub use types::{
    EnumConstruct, EnumDesc, FieldDesc, FunSig, ObjDesc, TypeCatalogue,
    TypeDesc, TypeIdx, VirtualDesc,
};
