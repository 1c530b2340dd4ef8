//! The native entry points the compiler emits calls to, and the value
//! layouts shared between generated code and the runtime.
//!
//! Everything behind these pointers is implemented by the surrounding
//! runtime (allocator, dynamic field store, comparison fallbacks); the
//! compiler only marshals arguments per the native convention and
//! consumes results. Type parameters are catalogue indices — the runtime
//! owns the catalogue, so an index identifies the type on both sides.

/// Runtime entry points, called from generated code using the native
/// calling convention.
#[derive(Clone, Copy)]
pub struct RuntimeHooks {
    // -- allocation --
    pub alloc_obj: extern "C" fn(u32) -> *mut u8,
    pub alloc_virtual: extern "C" fn(u32) -> *mut u8,
    pub alloc_dynobj: extern "C" fn() -> *mut u8,
    pub alloc_bytes: extern "C" fn(usize, u32) -> *mut u8,

    // -- dynamic field access, keyed by payload kind --
    pub dyn_get_ptr: extern "C" fn(*mut u8, i64) -> *mut u8,
    pub dyn_get_i32: extern "C" fn(*mut u8, i64) -> i32,
    pub dyn_get_f32: extern "C" fn(*mut u8, i64) -> f32,
    pub dyn_get_f64: extern "C" fn(*mut u8, i64) -> f64,
    pub dyn_set_ptr: extern "C" fn(*mut u8, i64, *mut u8),
    pub dyn_set_i32: extern "C" fn(*mut u8, i64, i32),
    pub dyn_set_f32: extern "C" fn(*mut u8, i64, f32),
    pub dyn_set_f64: extern "C" fn(*mut u8, i64, f64),

    // -- dynamic dispatch --
    pub dyn_call: extern "C" fn(*mut u8, *const u64, u32) -> *mut u8,

    // -- boxing / casting --
    pub box_value: extern "C" fn(u32) -> *mut u8,
    pub unbox_cast: extern "C" fn(*mut u8, u32, u32) -> u64,

    // -- comparison fallbacks --
    pub generic_compare: extern "C" fn(*mut u8, *mut u8) -> i32,
    pub same_type: extern "C" fn(*mut u8, *mut u8) -> i32,

    // -- faults --
    /// Builds and returns the exception value for a null access; the
    /// generated code raises it through the trap dispatch.
    pub null_access: extern "C" fn() -> *mut u8,
    /// Terminal handler for a throw with no active trap. Diverges.
    pub uncaught: extern "C" fn(*mut u8) -> !,
}

// -- Value layouts --
//
// These offsets are the contract between generated code and the
// runtime's allocators. All headers are one pointer-sized word.

/// Boxed cell: `[type][payload]`.
pub const CELL_PAYLOAD: i32 = 8;

/// Virtual object: `[type][fallback][slot 0][slot 1]…`. A populated
/// slot points directly at the field storage; an empty one routes the
/// access through the hashed dynamic lookup.
pub const VIRTUAL_SLOTS: i32 = 16;

/// Closure: `[fun][type][has_value][bound value]`.
pub const CLOSURE_FUN: i32 = 0;
pub const CLOSURE_TYPE: i32 = 8;
pub const CLOSURE_HAS_VALUE: i32 = 16;
pub const CLOSURE_VALUE: i32 = 24;
pub const CLOSURE_SIZE: u32 = 32;

/// Enum value: `[tag][…fields at catalogue offsets]`.
pub const ENUM_TAG: i32 = 0;

/// Runtime type info: the per-type dispatch table pointer is the first
/// word of whatever the runtime stores in object headers.
pub const RT_PROTOS: i32 = 0;

/// `alloc_bytes` kind flags.
pub const ALLOC_RAW: u32 = 0;
pub const ALLOC_WITH_PTRS: u32 = 1;
