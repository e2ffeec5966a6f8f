//! Page-level memory reservation for the collector's block arenas.
//!
//! The collector needs regions whose base address is a multiple of the block
//! size so that any interior pointer can be masked down to its block header.
//! The OS only guarantees page (or, on Windows, allocation granularity)
//! alignment, so stricter alignments are obtained by over-reserving and
//! trimming.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows this is typically 64KB. On Unix it is the page size.
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// A reserved, readable and writable, zero-filled region.
///
/// The region is released when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
    offset: usize,
    len: usize,
}

impl Mmap {
    /// Returns a pointer to the start of the usable region.
    pub fn ptr(&self) -> *mut u8 {
        // SAFETY: `offset + len` never exceeds the reserved length.
        unsafe { self.inner.ptr().add(self.offset) }
    }

    /// Returns the usable length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the usable region is empty. Never true for a mapping
    /// produced by [`MmapOptions::map_anon`].
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of bytes actually held from the OS, including any
    /// alignment slack that could not be returned.
    pub fn reserved_len(&self) -> usize {
        self.inner.len()
    }
}

impl std::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmap")
            .field("ptr", &self.ptr())
            .field("len", &self.len)
            .field("reserved_len", &self.reserved_len())
            .finish()
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for creating an anonymous mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    align: usize,
}

impl MmapOptions {
    /// Creates options with length 0 and the platform's natural alignment.
    /// A length must be set before mapping.
    pub const fn new() -> Self {
        Self { len: 0, align: 0 }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Requires the returned pointer to be a multiple of `align`.
    ///
    /// `align` must be a power of two. Alignments at or below
    /// [`allocation_granularity`] cost nothing; larger ones reserve
    /// `len + align` bytes and give back what the platform allows.
    #[must_use]
    pub const fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// Creates an anonymous mapping.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero length or a non power of two
    /// alignment, and the OS error if the reservation fails.
    ///
    /// # Safety
    ///
    /// The returned pointer is only valid while the `Mmap` is alive. Callers
    /// that hand out raw pointers into the region must not outlive it.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }
        if self.align != 0 && !self.align.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "alignment must be a power of two",
            ));
        }

        let granularity = allocation_granularity();
        if self.align <= granularity {
            let inner = unsafe { os::MmapInner::map_anon(self.len)? };
            return Ok(Mmap {
                inner,
                offset: 0,
                len: self.len,
            });
        }

        let reserve = self
            .len
            .checked_add(self.align)
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
        let mut inner = unsafe { os::MmapInner::map_anon(reserve)? };
        let base = inner.ptr() as usize;
        let offset = base.next_multiple_of(self.align) - base;
        let offset = unsafe { inner.trim(offset, self.len) };

        Ok(Mmap {
            inner,
            offset,
            len: self.len,
        })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}
