//! Stream state machine.
//!
//! One [`Stream`] exists per open direction. It owns the transfer buffer
//! and the negotiated parameters, and is the only code that writes the
//! DMA start/stop commands.
//!
//! ```text
//!            open()          configure()        prepare()
//!  Closed ─────────▶ Open ─────────────▶ Configured ─────────▶ Prepared
//!                                  ▲  │                  ▲        │
//!                                  └──┘ configure()      │        │ trigger_start()
//!                                                prepare()│        ▼
//!                                                  Stopped ◀──── Running
//!                                                     │  trigger_stop() / fault
//!                                                     └──▶ trigger_start()
//!  close(): any state ─▶ Closed
//! ```
//!
//! State that the interrupt bridge also touches (state, notification
//! gate, position, fault latch, ring geometry) lives in [`StreamShared`]
//! as atomics so the interrupt path never takes a lock to read it.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use tracing::debug;

use crate::buffer::{BufferGeometry, TransferBuffer};
use crate::constants::*;
use crate::error::{Error, Result};
use crate::link::LinkState;
use crate::regs::registers as reg;
use crate::regs::{RegisterBank, RegisterIo, Status};

// ── Public types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Playback,
    Capture,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Playback, Direction::Capture];

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Playback => 0,
            Direction::Capture => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Playback => "playback",
            Direction::Capture => "capture",
        })
    }
}

/// Lifecycle states, ordered along the normal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StreamState {
    Closed = 0,
    Open = 1,
    Configured = 2,
    Prepared = 3,
    Running = 4,
    Stopped = 5,
}

impl StreamState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => StreamState::Open,
            2 => StreamState::Configured,
            3 => StreamState::Prepared,
            4 => StreamState::Running,
            5 => StreamState::Stopped,
            _ => StreamState::Closed,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamState::Closed => "closed",
            StreamState::Open => "open",
            StreamState::Configured => "configured",
            StreamState::Prepared => "prepared",
            StreamState::Running => "running",
            StreamState::Stopped => "stopped",
        })
    }
}

/// Sample encodings the DMA engine understands. All are signed and
/// native-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    S16,
    /// 24 significant bits in a 32-bit container.
    S24In32,
    S32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S24In32 | SampleFormat::S32 => 4,
        }
    }

    pub(crate) fn register_code(self) -> u32 {
        match self {
            SampleFormat::S16 => reg::FORMAT_S16,
            SampleFormat::S24In32 => reg::FORMAT_S24_IN_32,
            SampleFormat::S32 => reg::FORMAT_S32,
        }
    }

    pub(crate) fn from_register_code(code: u32) -> Option<Self> {
        match code {
            reg::FORMAT_S16 => Some(SampleFormat::S16),
            reg::FORMAT_S24_IN_32 => Some(SampleFormat::S24In32),
            reg::FORMAT_S32 => Some(SampleFormat::S32),
            _ => None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleFormat::S16 => "s16",
            SampleFormat::S24In32 => "s24-in-32",
            SampleFormat::S32 => "s32",
        })
    }
}

/// Hardware parameters for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    pub rate: u32,
    pub format: SampleFormat,
    pub channels: u16,
    pub period_frames: u32,
    pub periods: u32,
}

impl Default for HwParams {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            format: SampleFormat::S32,
            channels: DEFAULT_CHANNELS,
            period_frames: DEFAULT_PERIOD_FRAMES,
            periods: DEFAULT_PERIODS,
        }
    }
}

impl HwParams {
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * self.format.bytes_per_sample()
    }

    pub fn period_bytes(&self) -> usize {
        self.period_frames as usize * self.frame_bytes()
    }

    pub fn buffer_frames(&self) -> usize {
        self.period_frames as usize * self.periods as usize
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_frames() * self.frame_bytes()
    }

    pub fn geometry(&self) -> BufferGeometry {
        BufferGeometry {
            frame_bytes: self.frame_bytes(),
            period_frames: self.period_frames as usize,
            periods: self.periods as usize,
        }
    }

    /// Whether two parameter sets can share one device clock.
    pub fn same_clock(&self, other: &HwParams) -> bool {
        self.rate == other.rate && self.format == other.format && self.channels == other.channels
    }

    /// Check against the device capability table.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_RATES.contains(&self.rate) {
            return Err(invalid(format!("unsupported sample rate {}", self.rate)));
        }
        if !(CHANNELS_MIN..=CHANNELS_MAX).contains(&self.channels) {
            return Err(invalid(format!(
                "channel count {} outside {CHANNELS_MIN}-{CHANNELS_MAX}",
                self.channels
            )));
        }
        if !(PERIODS_MIN..=PERIODS_MAX).contains(&self.periods) {
            return Err(invalid(format!(
                "period count {} outside {PERIODS_MIN}-{PERIODS_MAX}",
                self.periods
            )));
        }
        let period_bytes = self.period_bytes();
        if !(PERIOD_BYTES_MIN..=PERIOD_BYTES_MAX).contains(&period_bytes) {
            return Err(invalid(format!(
                "period of {period_bytes} bytes outside {PERIOD_BYTES_MIN}-{PERIOD_BYTES_MAX}"
            )));
        }
        if self.buffer_bytes() > BUFFER_BYTES_MAX {
            return Err(invalid(format!(
                "buffer of {} bytes exceeds {BUFFER_BYTES_MAX}",
                self.buffer_bytes()
            )));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> Error {
    Error::InvalidParameter(msg)
}

// ── Shared with the interrupt path ─────────────────────────────────────────

pub(crate) struct StreamShared {
    state: AtomicU8,
    /// Gate for interrupt-driven position updates and notifications.
    notify: AtomicBool,
    /// Interrupt handlers currently past the gate.
    in_flight: AtomicU32,
    faulted: AtomicBool,
    position: AtomicU64,
    base_lo: AtomicU32,
    ring_bytes: AtomicU32,
    frame_bytes: AtomicU32,
}

impl StreamShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(StreamState::Closed as u8),
            notify: AtomicBool::new(false),
            in_flight: AtomicU32::new(0),
            faulted: AtomicBool::new(false),
            position: AtomicU64::new(0),
            base_lo: AtomicU32::new(0),
            ring_bytes: AtomicU32::new(0),
            frame_bytes: AtomicU32::new(0),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn position(&self) -> u64 {
        match self.state() {
            StreamState::Closed | StreamState::Open => 0,
            _ => self.position.load(Ordering::Acquire),
        }
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn bind(&self, base: u64, geometry: BufferGeometry) {
        self.base_lo.store(base as u32, Ordering::Relaxed);
        self.ring_bytes.store(geometry.ring_bytes() as u32, Ordering::Relaxed);
        self.frame_bytes.store(geometry.frame_bytes as u32, Ordering::Relaxed);
        self.position.store(0, Ordering::Release);
    }

    fn enable_notify(&self) {
        self.notify.store(true, Ordering::SeqCst);
    }

    /// Close the gate, then wait for handlers already past it.
    fn disable_notify_and_drain(&self) {
        self.notify.store(false, Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
    }

    /// Interrupt side: pass the gate if notifications are enabled.
    pub(crate) fn begin_notify(&self) -> bool {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.notify.load(Ordering::SeqCst) {
            true
        } else {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    pub(crate) fn end_notify(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Interrupt side: latch the DMA address reported by the device as a
    /// frame position inside the ring.
    pub(crate) fn record_position(&self, dma_addr: u32) -> u64 {
        let ring = self.ring_bytes.load(Ordering::Relaxed);
        let frame = self.frame_bytes.load(Ordering::Relaxed);
        if ring == 0 || frame == 0 {
            return self.position.load(Ordering::Relaxed);
        }
        let offset = dma_addr.wrapping_sub(self.base_lo.load(Ordering::Relaxed)) % ring;
        let frames = u64::from(offset / frame);
        self.position.store(frames, Ordering::Release);
        frames
    }

    /// Interrupt side: force a running stream to `Stopped` with a latched
    /// fault. Returns whether this stream was affected.
    pub(crate) fn force_fault(&self) -> bool {
        let was_running = self
            .state
            .compare_exchange(
                StreamState::Running as u8,
                StreamState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if was_running {
            self.notify.store(false, Ordering::SeqCst);
            self.faulted.store(true, Ordering::Release);
        }
        was_running
    }

    fn reset(&self) {
        self.notify.store(false, Ordering::SeqCst);
        self.faulted.store(false, Ordering::Release);
        self.position.store(0, Ordering::Release);
        self.ring_bytes.store(0, Ordering::Relaxed);
    }
}

// ── Stream ─────────────────────────────────────────────────────────────────

/// Hardware context a transition needs.
pub(crate) struct Hw<'a, IO, D> {
    pub regs: &'a RegisterBank<IO>,
    pub delay: &'a mut D,
    pub link: &'a LinkState,
}

/// One open direction.
pub struct Stream {
    direction: Direction,
    params: HwParams,
    buffer: TransferBuffer,
    shared: Arc<StreamShared>,
}

impl Stream {
    /// `Closed → Open`. Allocates the transfer buffer at the largest size
    /// the device can address so any valid configuration fits.
    pub(crate) fn open(direction: Direction, shared: Arc<StreamShared>) -> Result<Self> {
        let buffer = TransferBuffer::allocate(BUFFER_BYTES_MAX)?;
        shared.reset();
        shared.set_state(StreamState::Open);
        debug!(%direction, "stream open");
        Ok(Self {
            direction,
            params: HwParams::default(),
            buffer,
            shared,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn params(&self) -> &HwParams {
        &self.params
    }

    pub fn buffer(&self) -> &TransferBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut TransferBuffer {
        &mut self.buffer
    }

    pub fn position_frames(&self) -> u64 {
        self.shared.position()
    }

    fn require(&self, op: &'static str, allowed: &[StreamState]) -> Result<StreamState> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(Error::InvalidState {
                op,
                direction: self.direction,
                state,
            })
        }
    }

    fn check_fault(&self) -> Result<()> {
        if self.shared.is_faulted() {
            Err(Error::HardwareFault(self.direction))
        } else {
            Ok(())
        }
    }

    /// `Open | Configured → Configured`.
    pub(crate) fn configure(&mut self, params: HwParams) -> Result<()> {
        let state = self.require("configure", &[StreamState::Open, StreamState::Configured])?;
        params.validate()?;
        if state == StreamState::Configured && params == self.params {
            return Ok(());
        }
        self.buffer.set_geometry(params.geometry())?;
        self.params = params;
        self.shared.set_state(StreamState::Configured);
        debug!(direction = %self.direction, ?params, "stream configured");
        Ok(())
    }

    /// `Configured | Prepared | Stopped → Prepared`.
    ///
    /// Programs clock and DMA registers, zeroes the position, then waits
    /// for READY. On `DeviceNotReady` the state does not change.
    pub(crate) fn prepare<IO, D>(&mut self, hw: Hw<'_, IO, D>) -> Result<()>
    where
        IO: RegisterIo,
        D: DelayNs,
    {
        let state = self.require(
            "prepare",
            &[StreamState::Configured, StreamState::Prepared, StreamState::Stopped],
        )?;
        hw.link.check()?;

        let base = self.buffer.base_address();
        let geometry = self.params.geometry();
        {
            let mut regs = hw.regs.lock();
            // A fault latches Stopped without touching the engine.
            if state == StreamState::Stopped && self.shared.is_faulted() {
                regs.dma_set(self.direction, reg::DMA_CONTROL, reg::DMA_STOP);
            }
            regs.set(reg::SAMPLE_RATE, self.params.rate);
            regs.set(reg::FORMAT, self.params.format.register_code());
            regs.set(reg::CHANNELS, u32::from(self.params.channels));
            regs.dma_set(self.direction, reg::DMA_ADDR, base as u32);
            regs.dma_set(self.direction, reg::DMA_ADDR_HI, (base >> 32) as u32);
            regs.dma_set(self.direction, reg::DMA_SIZE, geometry.ring_bytes() as u32);
            regs.dma_set(self.direction, reg::DMA_PERIOD, geometry.period_bytes() as u32);
        }
        self.buffer.rewind();
        self.shared.bind(base, geometry);

        let regs = hw.regs;
        let ready = hw.link.poll_until(
            hw.delay,
            READY_POLL_ATTEMPTS,
            READY_POLL_INTERVAL_US,
            || regs.lock().status().contains(Status::READY),
        )?;
        if !ready {
            return Err(Error::DeviceNotReady);
        }

        self.shared.faulted.store(false, Ordering::Release);
        self.shared.set_state(StreamState::Prepared);
        debug!(direction = %self.direction, "stream prepared");
        Ok(())
    }

    /// `Prepared | Stopped → Running`.
    pub(crate) fn trigger_start<IO: RegisterIo>(
        &mut self,
        regs: &RegisterBank<IO>,
        link: &LinkState,
    ) -> Result<()> {
        self.check_fault()?;
        self.require("start", &[StreamState::Prepared, StreamState::Stopped])?;
        link.check()?;

        // Publish Running under the register lock so an ERROR raised by the
        // start reaches `force_fault`.
        let mut regs = regs.lock();
        self.shared.enable_notify();
        self.shared.set_state(StreamState::Running);
        regs.dma_set(self.direction, reg::DMA_CONTROL, reg::DMA_START);
        drop(regs);
        debug!(direction = %self.direction, "stream running");
        Ok(())
    }

    /// `Running → Stopped`. Notifications are disabled before the
    /// hardware stop and drained after it.
    pub(crate) fn trigger_stop<IO: RegisterIo>(
        &mut self,
        regs: &RegisterBank<IO>,
        link: &LinkState,
    ) -> Result<()> {
        self.check_fault()?;
        self.require("stop", &[StreamState::Running])?;
        link.check()?;
        self.halt(regs);
        self.shared.set_state(StreamState::Stopped);
        debug!(direction = %self.direction, position = self.position_frames(), "stream stopped");
        Ok(())
    }

    fn halt<IO: RegisterIo>(&self, regs: &RegisterBank<IO>) {
        self.shared.notify.store(false, Ordering::SeqCst);
        regs.lock()
            .dma_set(self.direction, reg::DMA_CONTROL, reg::DMA_STOP);
        self.shared.disable_notify_and_drain();
    }

    /// Any state `→ Closed`. Stops the engine if it is running and clears
    /// the DMA registers when the device is still present.
    pub(crate) fn close<IO: RegisterIo>(self, regs: &RegisterBank<IO>, link: &LinkState) {
        let state = self.state();
        if link.is_present() {
            if state == StreamState::Running {
                self.halt(regs);
            }
            if matches!(
                state,
                StreamState::Prepared | StreamState::Running | StreamState::Stopped
            ) {
                let mut regs = regs.lock();
                regs.dma_set(self.direction, reg::DMA_SIZE, 0);
                regs.dma_set(self.direction, reg::DMA_ADDR, 0);
                regs.dma_set(self.direction, reg::DMA_ADDR_HI, 0);
            }
        }
        self.detach();
    }

    /// Close without touching hardware.
    pub(crate) fn detach(self) {
        self.shared.disable_notify_and_drain();
        self.shared.reset();
        self.shared.set_state(StreamState::Closed);
        debug!(direction = %self.direction, "stream closed");
    }
}
