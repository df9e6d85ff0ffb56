//! Volatile access to a mapped register window.

use core::ptr::NonNull;

use super::RegisterIo;

/// A register window backed by mapped device memory.
///
/// Every access is a single volatile 32-bit load or store, so the compiler
/// never merges, splits or elides register traffic.
pub struct MmioWindow {
    base: NonNull<u32>,
    len: usize,
}

// SAFETY: the window is plain device memory with no thread affinity, and
// `RegisterIo` takes `&mut self`, so accesses through one `MmioWindow` are
// never concurrent.
unsafe impl Send for MmioWindow {}

impl MmioWindow {
    /// Wrap `len` bytes of mapped registers starting at `base`.
    ///
    /// Returns `None` for a null or misaligned base.
    ///
    /// # Safety
    ///
    /// `base..base + len` must stay mapped, readable and writable for the
    /// lifetime of the returned value, and must not be accessed through any
    /// other path that assumes ordinary memory semantics.
    pub unsafe fn new(base: *mut u8, len: usize) -> Option<Self> {
        if base.align_offset(core::mem::align_of::<u32>()) != 0 {
            return None;
        }
        let base = NonNull::new(base.cast::<u32>())?;
        Some(Self { base, len })
    }
}

impl RegisterIo for MmioWindow {
    fn len(&self) -> usize {
        self.len
    }

    fn read32(&mut self, offset: usize) -> u32 {
        // SAFETY: `Registers` keeps `offset` aligned and inside `len`, and
        // the constructor contract keeps the mapping alive.
        unsafe { self.base.as_ptr().add(offset / 4).read_volatile() }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        // SAFETY: see `read32`.
        unsafe { self.base.as_ptr().add(offset / 4).write_volatile(value) }
    }
}
