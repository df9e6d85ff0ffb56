//! Apollo register offsets and bitfield definitions.
//!
//! All registers are 32 bits wide, little-endian, and addressed by byte
//! offset from the start of BAR0.

// ── Device block ───────────────────────────────────────────────────────────

/// Device command register (write-only).
/// - `CMD_RESET` returns the device to its power-on state. READY drops
///   until the reset completes.
pub const CONTROL: usize = 0x00;

pub const CMD_RESET: u32 = 3;

/// Status register.
/// - Bit 0: READY (level, read-only)
/// - Bit 1: RUNNING (level, read-only)
/// - Bit 2: ERROR (write 1 to clear)
/// - Bit 3: PERIOD (write 1 to clear)
pub const STATUS: usize = 0x04;

/// Sample rate in Hz.
pub const SAMPLE_RATE: usize = 0x08;

/// Sample format code.
/// - 0: signed 16-bit
/// - 1: signed 24-bit in 32-bit container
/// - 2: signed 32-bit
pub const FORMAT: usize = 0x0C;

pub const FORMAT_S16: u32 = 0;
pub const FORMAT_S24_IN_32: u32 = 1;
pub const FORMAT_S32: u32 = 2;

/// Channel count shared by both directions.
pub const CHANNELS: usize = 0x10;

// ── DMA blocks ─────────────────────────────────────────────────────────────

/// Playback DMA register block.
pub const PLAYBACK_DMA: usize = 0x20;

/// Capture DMA register block.
pub const CAPTURE_DMA: usize = 0x40;

/// Lower 32 bits of the transfer buffer bus address (block-relative).
pub const DMA_ADDR: usize = 0x00;

/// Upper 32 bits of the transfer buffer bus address (block-relative).
/// Latched together with `DMA_ADDR` when the engine starts.
pub const DMA_ADDR_HI: usize = 0x14;

/// Transfer ring length in bytes (block-relative).
pub const DMA_SIZE: usize = 0x04;

/// DMA engine command (block-relative). Write `DMA_START` or `DMA_STOP`.
pub const DMA_CONTROL: usize = 0x08;

pub const DMA_START: u32 = 1;
pub const DMA_STOP: u32 = 2;

/// Current DMA bus address, lower 32 bits (block-relative, read-only).
pub const DMA_POSITION: usize = 0x0C;

/// Period length in bytes (block-relative). PERIOD is raised each time the
/// DMA position crosses a multiple of this value.
pub const DMA_PERIOD: usize = 0x10;

// ── Control mailbox ────────────────────────────────────────────────────────

/// Write 1 to hand the TX buffer to the device.
pub const MBOX_DOORBELL: usize = 0x80;

/// Length of the frame in the TX buffer, in bytes.
pub const MBOX_TX_LEN: usize = 0x84;

/// Length of the frame in the RX buffer, in bytes. Non-zero means a
/// response is waiting; the host writes 0 to release the buffer.
pub const MBOX_RX_LEN: usize = 0x88;

/// Host-to-device frame buffer.
pub const MBOX_TX_DATA: usize = 0x100;

/// Device-to-host frame buffer.
pub const MBOX_RX_DATA: usize = 0x200;

/// Capacity of each mailbox buffer in bytes.
pub const MBOX_CAPACITY: usize = 0x100;

/// Smallest register window that holds every register above.
pub const WINDOW_MIN_BYTES: usize = MBOX_RX_DATA + MBOX_CAPACITY;
