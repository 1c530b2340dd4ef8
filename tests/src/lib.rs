//! Test suite for the kestrel JIT backend.
//!
//! `runtime` is the in-process test runtime: it implements every native
//! entry point the compiler emits calls to, plus builders for modules
//! and helpers to run finalized code.
