use std::io::{self, Error};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the system page size, cached after the first query.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

pub struct MmapInner {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MmapInner {
    /// Maps `len` bytes of private anonymous memory.
    ///
    /// # Safety
    ///
    /// Calls `mmap`; the caller owns the returned region.
    pub unsafe fn map_anon(len: usize) -> io::Result<Self> {
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
        let prot = libc::PROT_READ | libc::PROT_WRITE;

        let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
        if ptr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }

        Ok(Self { ptr, len })
    }

    /// Unmaps everything outside `[offset, offset + keep)` and returns the
    /// new offset of the kept range, which is always 0.
    ///
    /// # Safety
    ///
    /// `offset` and `keep` must be page-aligned and describe a range inside
    /// the mapping. No pointer into the released parts may be in use.
    pub unsafe fn trim(&mut self, offset: usize, keep: usize) -> usize {
        let base = self.ptr.cast::<u8>();
        let tail = self.len - offset - keep;

        unsafe {
            if offset > 0 {
                libc::munmap(base.cast(), offset);
            }
            if tail > 0 {
                libc::munmap(base.add(offset + keep).cast(), tail);
            }
            self.ptr = base.add(offset).cast();
        }
        self.len = keep;
        0
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

unsafe impl Send for MmapInner {}
unsafe impl Sync for MmapInner {}
