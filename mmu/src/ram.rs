use std::io;
use std::ptr;

use crate::error::MmuError;

/// A contiguous block of guest RAM backed by an anonymous mapping.
pub struct RamBlock {
    ptr: *mut u8,
    size: usize,
}

// SAFETY: the mapping lives as long as the block. Guest memory is
// shared between vCPUs; concurrent accesses go through raw
// pointers or host atomics, never through Rust references.
unsafe impl Send for RamBlock {}
unsafe impl Sync for RamBlock {}

impl RamBlock {
    /// Allocate `size` bytes of zeroed RAM.
    pub fn new(size: usize) -> Result<Self, MmuError> {
        // SAFETY: anonymous private mapping, checked for failure.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MmuError::RamAlloc(io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Host pointer to byte `offset`.
    pub fn host_ptr(&self, offset: u64) -> *mut u8 {
        assert!(
            (offset as usize) < self.size,
            "RAM offset {offset:#x} out of range"
        );
        // SAFETY: bounds checked above.
        unsafe { self.ptr.add(offset as usize) }
    }

    fn check(&self, offset: u64, len: usize) -> Result<(), MmuError> {
        match (offset as usize).checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(MmuError::OutOfRange {
                addr: offset,
                len: len as u64,
            }),
        }
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), MmuError> {
        self.check(offset, data.len())?;
        // SAFETY: range checked, the source is a distinct host buffer.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset as usize), data.len());
        }
        Ok(())
    }

    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), MmuError> {
        self.check(offset, out.len())?;
        // SAFETY: as in `write`.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}

impl Drop for RamBlock {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from a successful mmap.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

impl std::fmt::Debug for RamBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamBlock").field("size", &self.size).finish()
    }
}
