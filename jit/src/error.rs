use thiserror::Error;

/// Compiler-level failures.
///
/// Everything here is fatal to the current compilation — these indicate
/// either a compiler bug or input the verifier should have rejected, so
/// there is no recovery path. The variants carry enough context (opcode
/// name, operand kinds, opcode index) to diagnose without replaying the
/// original input.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("unsupported opcode `{op}` at index {at}: {detail}")]
    Unsupported {
        op: &'static str,
        at: usize,
        detail: String,
    },

    #[error("no copy rule for {dst} <- {src} (width {width})")]
    BadCopy {
        dst: &'static str,
        src: &'static str,
        width: u8,
    },

    #[error("branch displacement out of range at offset {at}")]
    Displacement { at: usize },

    #[error("function f{0} referenced but never compiled")]
    MissingFunction(u32),

    #[error("frame too large ({0} bytes)")]
    FrameTooLarge(i64),

    #[error("malformed function: {0}")]
    Malformed(String),

    #[error("executable mapping failed: {0}")]
    Map(#[from] std::io::Error),
}
