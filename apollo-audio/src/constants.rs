//! Hardware limits and timing constants for the Apollo Twin.

use core::time::Duration;

// ── Stream capabilities ────────────────────────────────────────────────────

/// Sample rates the device clock can be programmed to, in Hz.
pub const SUPPORTED_RATES: [u32; 6] = [44_100, 48_000, 88_200, 96_000, 176_400, 192_000];

/// Minimum channel count per stream.
pub const CHANNELS_MIN: u16 = 2;

/// Maximum channel count per stream.
pub const CHANNELS_MAX: u16 = 8;

/// Smallest period the DMA engine will signal, in bytes.
pub const PERIOD_BYTES_MIN: usize = 64;

/// Largest period the DMA engine will signal, in bytes.
pub const PERIOD_BYTES_MAX: usize = 512 * 1024;

/// Minimum number of periods in the transfer ring.
pub const PERIODS_MIN: u32 = 2;

/// Maximum number of periods in the transfer ring.
pub const PERIODS_MAX: u32 = 32;

/// Largest transfer buffer the device can address, in bytes.
pub const BUFFER_BYTES_MAX: usize = 1024 * 1024;

/// Sample rate programmed by a device reset and offered on `open()`.
pub const DEFAULT_RATE: u32 = 48_000;

/// Channel count offered on `open()`.
pub const DEFAULT_CHANNELS: u16 = 2;

/// Period size offered on `open()`, in frames.
pub const DEFAULT_PERIOD_FRAMES: u32 = 256;

/// Period count offered on `open()`.
pub const DEFAULT_PERIODS: u32 = 4;

// ── Bounded waits ──────────────────────────────────────────────────────────

/// Number of STATUS polls before `prepare()` gives up on READY.
pub const READY_POLL_ATTEMPTS: u32 = 100;

/// Spacing between READY polls, in microseconds.
pub const READY_POLL_INTERVAL_US: u32 = 1_000;

/// Settle time after writing the RESET command, in milliseconds.
pub const RESET_SETTLE_MS: u32 = 10;

/// Default control-channel response timeout.
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(100);

/// Spacing between mailbox polls while waiting for a response, in microseconds.
pub const CONTROL_POLL_INTERVAL_US: u32 = 1_000;

// ── Mixer ranges ───────────────────────────────────────────────────────────

/// Number of analog preamp inputs (gain, phantom power, pad).
pub const ANALOG_INPUTS: u8 = 4;

/// Number of logical input channels (routing, high-pass filter).
pub const INPUT_CHANNELS: u8 = 8;

/// Preamp gain range in dB.
pub const ANALOG_GAIN_MIN_DB: f32 = 0.0;
pub const ANALOG_GAIN_MAX_DB: f32 = 65.0;

/// Device gain resolution in dB. Raw register value = dB / step.
pub const GAIN_STEP_DB: f32 = 0.5;

/// Output and monitor attenuation range in dB.
pub const OUTPUT_GAIN_MIN_DB: f32 = -96.0;
pub const OUTPUT_GAIN_MAX_DB: f32 = 0.0;

/// High-pass filter corner frequency range in Hz.
pub const HPF_FREQ_MIN_HZ: f32 = 20.0;
pub const HPF_FREQ_MAX_HZ: f32 = 500.0;

/// High-pass filter corner frequency after reset, in Hz.
pub const HPF_FREQ_DEFAULT_HZ: f32 = 75.0;

// ── PCI identity ───────────────────────────────────────────────────────────

/// Universal Audio PCI vendor ID.
pub const PCI_VENDOR_ID: u16 = 0x1176;

/// Apollo Twin MkII PCI device ID.
pub const PCI_DEVICE_ID: u16 = 0x0005;
