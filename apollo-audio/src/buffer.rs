//! Transfer buffer manager.
//!
//! A [`TransferBuffer`] is the ring the DMA engine reads (playback) or
//! fills (capture). Storage is allocated once, word-aligned, and never
//! moves while the buffer exists, so its address can be handed to the
//! device. The ring geometry (frame size, period size, period count) is
//! bound separately at configure time and may be any size up to the
//! allocated capacity.
//!
//! ```text
//!  base_address()
//!  │
//!  ▼
//!  ┌──────────┬──────────┬──────────┬──────────┬ ─ ─ ─ ─ ─ ┐
//!  │ period 0 │ period 1 │ period 2 │ period 3 │  (unused)
//!  └──────────┴──────────┴──────────┴──────────┴ ─ ─ ─ ─ ─ ┘
//!  ◀──────────────── ring_bytes() ────────────▶
//!  ◀──────────────────────── capacity() ──────────────────▶
//! ```
//!
//! The application cursor is tracked in bytes and grows monotonically;
//! its ring offset is the cursor modulo the ring length.

use crate::constants::BUFFER_BYTES_MAX;
use crate::error::{Error, Result};

/// Ring layout bound to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    /// Bytes per frame (channels × bytes per sample).
    pub frame_bytes: usize,
    pub period_frames: usize,
    pub periods: usize,
}

impl BufferGeometry {
    pub fn period_bytes(&self) -> usize {
        self.period_frames * self.frame_bytes
    }

    pub fn ring_frames(&self) -> usize {
        self.period_frames * self.periods
    }

    pub fn ring_bytes(&self) -> usize {
        self.ring_frames() * self.frame_bytes
    }
}

/// A DMA-addressable ring of audio frames.
pub struct TransferBuffer {
    storage: Box<[u32]>,
    geometry: Option<BufferGeometry>,
    cursor_bytes: u64,
}

impl TransferBuffer {
    /// Reserve `capacity_bytes` of zeroed storage.
    ///
    /// Fails with `ResourceExhausted` when the allocator refuses or the
    /// request is larger than the device can address.
    pub fn allocate(capacity_bytes: usize) -> Result<Self> {
        if capacity_bytes == 0 {
            return Err(Error::InvalidParameter(
                "transfer buffer capacity must be non-zero".into(),
            ));
        }
        if capacity_bytes > BUFFER_BYTES_MAX {
            return Err(Error::ResourceExhausted(capacity_bytes));
        }

        let words = capacity_bytes.div_ceil(4);
        let mut storage: Vec<u32> = Vec::new();
        storage
            .try_reserve_exact(words)
            .map_err(|_| Error::ResourceExhausted(capacity_bytes))?;
        storage.resize(words, 0);

        Ok(Self {
            storage: storage.into_boxed_slice(),
            geometry: None,
            cursor_bytes: 0,
        })
    }

    /// Address the device is programmed with, split across `DMA_ADDR` and
    /// `DMA_ADDR_HI`.
    ///
    /// This is the storage's address in this process. It equals a bus
    /// address only under an identity-mapped IOMMU or a simulated engine;
    /// bus mastering on real hardware needs a pinned, DMA-mapped
    /// allocation from the platform.
    pub fn base_address(&self) -> u64 {
        self.storage.as_ptr() as usize as u64
    }

    pub fn capacity(&self) -> usize {
        self.storage.len() * 4
    }

    pub fn geometry(&self) -> Option<BufferGeometry> {
        self.geometry
    }

    /// Bind a ring layout. The ring must fit inside the allocation.
    pub fn set_geometry(&mut self, geometry: BufferGeometry) -> Result<()> {
        if geometry.frame_bytes == 0 || geometry.ring_bytes() == 0 {
            return Err(Error::InvalidParameter("empty ring geometry".into()));
        }
        if geometry.ring_bytes() > self.capacity() {
            return Err(Error::InvalidParameter(format!(
                "ring of {} bytes exceeds {}-byte buffer",
                geometry.ring_bytes(),
                self.capacity()
            )));
        }
        self.geometry = Some(geometry);
        self.cursor_bytes = 0;
        Ok(())
    }

    /// Total bytes the application has produced or consumed.
    pub fn write_cursor_bytes(&self) -> u64 {
        self.cursor_bytes
    }

    /// Cursor position inside the ring, in bytes.
    pub fn write_offset_bytes(&self) -> usize {
        match self.geometry {
            Some(g) => (self.cursor_bytes % g.ring_bytes() as u64) as usize,
            None => 0,
        }
    }

    /// Move the application cursor forward by `frames`.
    ///
    /// Keeping the cursor within one ring of the hardware position is the
    /// caller's job. Without a geometry this is a no-op.
    pub fn advance(&mut self, frames: u64) {
        if let Some(g) = self.geometry {
            self.cursor_bytes = self
                .cursor_bytes
                .wrapping_add(frames.wrapping_mul(g.frame_bytes as u64));
        }
    }

    pub(crate) fn rewind(&mut self) {
        self.cursor_bytes = 0;
    }

    /// The ring contents.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.geometry.map_or(0, |g| g.ring_bytes());
        // SAFETY: `storage` is `capacity()` initialized bytes and
        // `set_geometry` keeps `len <= capacity()`.
        unsafe { core::slice::from_raw_parts(self.storage.as_ptr().cast::<u8>(), len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.geometry.map_or(0, |g| g.ring_bytes());
        // SAFETY: see `as_bytes`; `&mut self` makes the borrow unique.
        unsafe { core::slice::from_raw_parts_mut(self.storage.as_mut_ptr().cast::<u8>(), len) }
    }
}
