use std::io;
use std::ptr;

/// Executable memory region backed by mmap.
///
/// Follows W^X discipline: the region is writable while the finalizer
/// copies code and resolves absolute patches, then flipped to
/// read+execute for the rest of its life.
pub struct ExecMemory {
    ptr: *mut u8,
    size: usize,
}

// SAFETY: ExecMemory owns its mmap'd region exclusively; once executable
// it is immutable and may be called from any thread.
unsafe impl Send for ExecMemory {}
unsafe impl Sync for ExecMemory {}

impl ExecMemory {
    /// Allocate a writable region of at least `size` bytes (rounded up
    /// to the page size).
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size.max(1) + page_size - 1) & !(page_size - 1);

        // SAFETY: mmap with MAP_ANONYMOUS | MAP_PRIVATE, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
        })
    }

    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    /// Copy the assembled code into the region. Only valid while still
    /// writable.
    pub fn copy_from(&mut self, code: &[u8]) {
        assert!(code.len() <= self.size, "code larger than mapping");
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), self.ptr, code.len());
        }
    }

    /// Patch an absolute 64-bit slot. Only valid while still writable.
    pub fn patch_u64(&mut self, offset: usize, val: u64) {
        assert!(offset + 8 <= self.size);
        unsafe {
            (self.ptr.add(offset) as *mut u64).write_unaligned(val);
        }
    }

    /// Make the region executable and non-writable.
    pub fn make_executable(&self) -> io::Result<()> {
        let ret = unsafe {
            libc::mprotect(
                self.ptr as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for ExecMemory {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
