use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared buffer for generated host code, backed by mmap'd memory.
///
/// The buffer is split into fixed-size regions that are filled and
/// recycled as a unit. All accessors take `&self`: translation writes
/// into space no published TB references, chaining patches aligned
/// words atomically, and recycling a region only happens while no
/// vCPU executes generated code.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    region_size: usize,
    nb_regions: usize,
}

// SAFETY: the buffer owns its mapping; concurrent access follows the
// discipline described on the type (disjoint writes, atomic patches).
unsafe impl Send for CodeBuffer {}
unsafe impl Sync for CodeBuffer {}

impl CodeBuffer {
    /// Allocate `size` bytes (rounded up to whole pages per region)
    /// split into `nb_regions` regions.
    pub fn new(size: usize, nb_regions: usize) -> io::Result<Self> {
        if nb_regions == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "code buffer needs at least one region",
            ));
        }
        let page_size = page_size();
        let per_region = size.div_ceil(nb_regions);
        let region_size = per_region.div_ceil(page_size).max(1) * page_size;
        let size = region_size * nb_regions;

        // SAFETY: anonymous private mapping, no file backing.
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
            region_size,
            nb_regions,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    #[inline]
    pub fn nb_regions(&self) -> usize {
        self.nb_regions
    }

    /// Byte range `[start, end)` of region `n`.
    pub fn region_bounds(&self, n: usize) -> (usize, usize) {
        assert!(n < self.nb_regions, "region {n} out of range");
        let start = n * self.region_size;
        (start, start + self.region_size)
    }

    /// Region containing `offset`.
    pub fn region_of(&self, offset: usize) -> usize {
        offset / self.region_size
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: in bounds of the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    /// Write a u32 at `offset`. The caller guarantees no thread
    /// executes or reads the word concurrently.
    #[inline]
    pub fn write_u32(&self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size, "code buffer overflow");
        // SAFETY: in bounds; exclusivity is the caller's contract.
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    /// Read a u32 at `offset`.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        // SAFETY: in bounds.
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    /// Atomically replace an aligned u32 that may be read concurrently
    /// by executing code (jump patching).
    #[inline]
    pub fn patch_u32_atomic(&self, offset: usize, val: u32) {
        assert!(offset % 4 == 0, "unaligned jump patch at {offset:#x}");
        assert!(offset + 4 <= self.size);
        // SAFETY: in bounds and 4-byte aligned (the mapping is page
        // aligned); every concurrent access to patch sites is atomic.
        let word = unsafe { &*(self.ptr.add(offset) as *const AtomicU32) };
        word.store(val, Ordering::Release);
    }

    /// Atomically read an aligned u32 that may be patched concurrently.
    #[inline]
    pub fn load_u32_atomic(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0);
        assert!(offset + 4 <= self.size);
        // SAFETY: see `patch_u32_atomic`.
        let word = unsafe { &*(self.ptr.add(offset) as *const AtomicU32) };
        word.load(Ordering::Acquire)
    }

    /// Bytes in `[start, end)`. The range must not be written
    /// concurrently.
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        assert!(start <= end && end <= self.size);
        // SAFETY: in bounds; immutability is the caller's contract.
        unsafe { std::slice::from_raw_parts(self.ptr.add(start), end - start) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: unmapping the region mapped in `new`.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

/// Emission cursor for one translation into a `CodeBuffer` range.
///
/// Running past `limit` sets the overflow flag instead of writing;
/// the translation is then discarded and retried after eviction.
pub struct CodeWriter<'a> {
    buf: &'a CodeBuffer,
    offset: usize,
    limit: usize,
    overflow: bool,
    /// `(target word offset, reset offset)` of each `goto_tb` slot
    /// emitted so far.
    pub goto_tb: [Option<(usize, usize)>; 2],
}

impl<'a> CodeWriter<'a> {
    pub fn new(buf: &'a CodeBuffer, start: usize, limit: usize) -> Self {
        assert!(start <= limit && limit <= buf.capacity());
        Self {
            buf,
            offset: start,
            limit,
            overflow: false,
            goto_tb: [None; 2],
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.offset
    }

    #[inline]
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn buffer(&self) -> &'a CodeBuffer {
        self.buf
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        if self.overflow || self.offset + 4 > self.limit {
            self.overflow = true;
            return;
        }
        self.buf.write_u32(self.offset, val);
        self.offset += 4;
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.emit_u32(val as u32);
        self.emit_u32((val >> 32) as u32);
    }

    /// Patch a previously emitted word.
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        if self.overflow {
            return;
        }
        assert!(offset + 4 <= self.offset, "patch beyond emitted code");
        self.buf.write_u32(offset, val);
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        self.buf.read_u32(offset)
    }
}

pub fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
