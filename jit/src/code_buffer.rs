/// Growable machine-code emission buffer.
///
/// One buffer is shared by every function of a module; `finalize` copies
/// the finished contents into executable memory. Patching back into
/// already-emitted code is the normal case (forward branches, call
/// displacements), so the buffer keeps random write access to its whole
/// extent.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(4096),
        }
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.bytes.push(val);
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    // -- Patching --

    /// Patch a u8 at the given offset (for back-patching short jumps).
    #[inline]
    pub fn patch_u8(&mut self, offset: usize, val: u8) {
        self.bytes[offset] = val;
    }

    /// Patch a u32 at the given offset.
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
    }

    /// Patch a u64 at the given offset.
    #[inline]
    pub fn patch_u64(&mut self, offset: usize, val: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&val.to_le_bytes());
    }

    /// Read back a u32 at the given offset.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_le_bytes(b)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}
