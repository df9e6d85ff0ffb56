//! Register interface over the device's memory-mapped window.
//!
//! [`Registers`] is a thin typed layer: bounds-checked `read`/`write` for
//! arbitrary offsets plus accessors for the fixed registers in
//! [`registers`]. [`RegisterBank`] wraps it in the one mutual-exclusion
//! region shared by the control path and the interrupt path:
//!
//! ```text
//!   control path ── lock() ──────────┐
//!   stream ops   ── lock() ──────────┼──▶ Mutex<Registers<IO>> ──▶ IO
//!   interrupt    ── try_acquire() ───┘     (Deferred if held)
//! ```

pub mod mmio;
pub mod registers;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::stream::Direction;

use registers as reg;

pub use mmio::MmioWindow;

// ── Raw access ─────────────────────────────────────────────────────────────

/// 32-bit access to a register window.
///
/// Offsets are in bytes from the start of the window. Callers guarantee
/// `offset + 4 <= len()` and 4-byte alignment; [`Registers`] enforces it.
pub trait RegisterIo: Send {
    /// Window length in bytes.
    fn len(&self) -> usize;

    fn read32(&mut self, offset: usize) -> u32;

    fn write32(&mut self, offset: usize, value: u32);
}

bitflags! {
    /// STATUS register bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        const READY = 1 << 0;
        const RUNNING = 1 << 1;
        const ERROR = 1 << 2;
        const PERIOD = 1 << 3;
    }
}

// ── Typed layer ────────────────────────────────────────────────────────────

/// Bounds-checked register accessors.
pub struct Registers<IO> {
    io: IO,
}

impl<IO: RegisterIo> Registers<IO> {
    /// Wrap a window. Fails if it cannot hold the full register map.
    pub fn new(io: IO) -> Result<Self> {
        if io.len() < reg::WINDOW_MIN_BYTES {
            return Err(Error::InvalidParameter(format!(
                "register window of {} bytes is smaller than {}",
                io.len(),
                reg::WINDOW_MIN_BYTES
            )));
        }
        Ok(Self { io })
    }

    pub fn window_len(&self) -> usize {
        self.io.len()
    }

    fn check(&self, offset: usize) -> Result<()> {
        if offset % 4 != 0 || offset.checked_add(4).map_or(true, |end| end > self.io.len()) {
            return Err(Error::InvalidParameter(format!(
                "register offset {offset:#x} outside {}-byte window",
                self.io.len()
            )));
        }
        Ok(())
    }

    /// Read any register in the window.
    pub fn read(&mut self, offset: usize) -> Result<u32> {
        self.check(offset)?;
        Ok(self.io.read32(offset))
    }

    /// Write any register in the window.
    pub fn write(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset)?;
        self.io.write32(offset, value);
        Ok(())
    }

    // Fixed offsets below are covered by the length check in `new`.

    pub(crate) fn get(&mut self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= reg::WINDOW_MIN_BYTES);
        self.io.read32(offset)
    }

    pub(crate) fn set(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= reg::WINDOW_MIN_BYTES);
        self.io.write32(offset, value);
    }

    /// Read STATUS once.
    pub fn status(&mut self) -> Status {
        Status::from_bits_retain(self.get(reg::STATUS))
    }

    /// Write observed bits back to STATUS to acknowledge them.
    pub fn acknowledge(&mut self, observed: Status) {
        self.set(reg::STATUS, observed.bits());
    }

    pub fn command(&mut self, cmd: u32) {
        self.set(reg::CONTROL, cmd);
    }

    pub(crate) fn dma_get(&mut self, direction: Direction, field: usize) -> u32 {
        self.get(dma_block(direction) + field)
    }

    pub(crate) fn dma_set(&mut self, direction: Direction, field: usize, value: u32) {
        self.set(dma_block(direction) + field, value);
    }

    /// Release the underlying window.
    pub fn release(self) -> IO {
        self.io
    }
}

fn dma_block(direction: Direction) -> usize {
    match direction {
        Direction::Playback => reg::PLAYBACK_DMA,
        Direction::Capture => reg::CAPTURE_DMA,
    }
}

// ── Shared region ──────────────────────────────────────────────────────────

/// Result of a non-blocking acquisition attempt.
pub enum Acquire<'a, IO> {
    Acquired(MutexGuard<'a, Registers<IO>>),
    /// Another context holds the region.
    Deferred,
}

/// The register window behind the single lock shared by every context.
pub struct RegisterBank<IO> {
    inner: Mutex<Registers<IO>>,
}

impl<IO: RegisterIo> RegisterBank<IO> {
    pub fn new(regs: Registers<IO>) -> Self {
        Self {
            inner: Mutex::new(regs),
        }
    }

    /// Block until the region is free.
    pub fn lock(&self) -> MutexGuard<'_, Registers<IO>> {
        self.inner.lock()
    }

    /// Take the region only if it is free right now.
    pub fn try_acquire(&self) -> Acquire<'_, IO> {
        match self.inner.try_lock() {
            Some(guard) => Acquire::Acquired(guard),
            None => Acquire::Deferred,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
