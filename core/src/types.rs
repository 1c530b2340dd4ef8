/// Index into a module's type catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeIdx(pub u32);

/// Static type of a virtual register or field.
///
/// The loader/verifier resolves every register and field to one of these
/// before the compiler runs; layout data for the structured kinds
/// (objects, virtuals, enums) is precomputed by the external RTTI builder
/// and carried in the descriptor.
#[derive(Debug, Clone)]
pub enum TypeDesc {
    Void,
    Bool,
    U8,
    U16,
    I32,
    I64,
    F32,
    F64,
    /// Raw byte buffer pointer.
    Bytes,
    /// Dynamic value: pointer to a boxed cell, or null.
    Dyn,
    /// Function signature (closure values have this type).
    Fun(FunSig),
    /// Fixed-layout object with precomputed field offsets.
    Obj(ObjDesc),
    /// Extensible object with per-instance field indirection slots.
    Virtual(VirtualDesc),
    /// Tagged union; per-construct sizes and offsets are precomputed.
    Enum(EnumDesc),
}

/// Function signature: argument types and return type.
#[derive(Debug, Clone)]
pub struct FunSig {
    pub args: Vec<TypeIdx>,
    pub ret: TypeIdx,
}

/// One named field of an object or virtual type.
///
/// `hash` is the hashed field name used by the dynamic get/set entry
/// points; `offset` is only meaningful for fixed-layout objects.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    pub hash: i64,
    pub ty: TypeIdx,
    pub offset: u32,
}

/// Fixed-layout object descriptor. Field offsets include the
/// runtime-type header word at offset 0.
#[derive(Debug, Clone)]
pub struct ObjDesc {
    pub size: u32,
    pub fields: Vec<FieldDesc>,
    /// Number of entries in the per-type dispatch table.
    pub nprotos: u32,
}

/// Extensible object descriptor. Instances carry one indirection slot
/// per declared field; `offset` in the field descriptors is unused.
#[derive(Debug, Clone)]
pub struct VirtualDesc {
    pub fields: Vec<FieldDesc>,
}

/// One enum construct: allocation size and per-field byte offsets,
/// both including the tag word at offset 0.
#[derive(Debug, Clone)]
pub struct EnumConstruct {
    pub size: u32,
    pub field_types: Vec<TypeIdx>,
    pub offsets: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct EnumDesc {
    pub constructs: Vec<EnumConstruct>,
}

impl TypeDesc {
    /// Natural value width in bytes. Void registers occupy no storage.
    pub fn width(&self) -> u8 {
        match self {
            TypeDesc::Void => 0,
            TypeDesc::Bool | TypeDesc::U8 => 1,
            TypeDesc::U16 => 2,
            TypeDesc::I32 | TypeDesc::F32 => 4,
            TypeDesc::I64 | TypeDesc::F64 => 8,
            TypeDesc::Bytes
            | TypeDesc::Dyn
            | TypeDesc::Fun(_)
            | TypeDesc::Obj(_)
            | TypeDesc::Virtual(_)
            | TypeDesc::Enum(_) => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeDesc::F32 | TypeDesc::F64)
    }

    /// Whether values of this type are pointers (nullable).
    pub fn is_ptr(&self) -> bool {
        matches!(
            self,
            TypeDesc::Bytes
                | TypeDesc::Dyn
                | TypeDesc::Fun(_)
                | TypeDesc::Obj(_)
                | TypeDesc::Virtual(_)
                | TypeDesc::Enum(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeDesc::Void => "void",
            TypeDesc::Bool => "bool",
            TypeDesc::U8 => "u8",
            TypeDesc::U16 => "u16",
            TypeDesc::I32 => "i32",
            TypeDesc::I64 => "i64",
            TypeDesc::F32 => "f32",
            TypeDesc::F64 => "f64",
            TypeDesc::Bytes => "bytes",
            TypeDesc::Dyn => "dyn",
            TypeDesc::Fun(_) => "fun",
            TypeDesc::Obj(_) => "obj",
            TypeDesc::Virtual(_) => "virtual",
            TypeDesc::Enum(_) => "enum",
        }
    }
}

/// The module's type catalogue, produced by the external loader.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalogue {
    types: Vec<TypeDesc>,
}

impl TypeCatalogue {
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    pub fn add(&mut self, desc: TypeDesc) -> TypeIdx {
        let idx = TypeIdx(self.types.len() as u32);
        self.types.push(desc);
        idx
    }

    pub fn get(&self, idx: TypeIdx) -> &TypeDesc {
        &self.types[idx.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn width(&self, idx: TypeIdx) -> u8 {
        self.get(idx).width()
    }

    pub fn is_float(&self, idx: TypeIdx) -> bool {
        self.get(idx).is_float()
    }

    pub fn is_ptr(&self, idx: TypeIdx) -> bool {
        self.get(idx).is_ptr()
    }

    /// Signature of a `Fun` type. Panics on non-function types: the
    /// verifier guarantees call targets are function-typed.
    pub fn fun_sig(&self, idx: TypeIdx) -> &FunSig {
        match self.get(idx) {
            TypeDesc::Fun(sig) => sig,
            other => panic!("fun_sig on non-function type {}", other.name()),
        }
    }
}
