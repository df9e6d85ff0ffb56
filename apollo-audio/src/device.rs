//! Device handle.
//!
//! A [`Device`] is created from the bus layer's "device present" event
//! and owns everything tied to that physical interface: the register
//! bank, both stream slots, the control session and the interrupt
//! bridge's shared state. There is no global registry; callers hold the
//! handle and pass it where it is needed.
//!
//! Playback and capture share one clock domain, so once either stream is
//! configured the other must use the same rate, format and channel count.

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use tracing::{info, warn};

use crate::buffer::TransferBuffer;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::irq::{InterruptBridge, PeriodSink};
use crate::link::{LinkState, ShutdownHandle};
use crate::regs::registers as reg;
use crate::regs::{RegisterBank, RegisterIo, Registers, Status};
use crate::session::ControlSession;
use crate::stream::{Direction, HwParams, Hw, SampleFormat, Stream, StreamShared, StreamState};
use crate::transport::MailboxTransport;

/// Bus-layer event: a device appeared with register window `window` on
/// interrupt line `irq_line`.
pub struct DevicePresent<IO> {
    pub window: IO,
    pub irq_line: u32,
}

/// State reachable from the interrupt bridge.
pub(crate) struct DeviceShared<IO> {
    pub(crate) regs: Arc<RegisterBank<IO>>,
    pub(crate) link: Arc<LinkState>,
    pub(crate) sink: Arc<dyn PeriodSink>,
    streams: [Arc<StreamShared>; 2],
}

impl<IO> DeviceShared<IO> {
    pub(crate) fn stream(&self, direction: Direction) -> &StreamShared {
        &self.streams[direction.index()]
    }
}

/// Clock settings shared by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    pub rate: u32,
    pub format: SampleFormat,
    pub channels: u16,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            format: SampleFormat::S32,
            channels: DEFAULT_CHANNELS,
        }
    }
}

/// Register snapshot for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub status: Status,
    pub rate: u32,
    /// `None` if the register holds an unknown code.
    pub format: Option<SampleFormat>,
    pub channels: u32,
    pub irq_line: u32,
    pub window_len: usize,
}

/// Control session type a [`Device`] hands out.
pub type DeviceSession<IO, D> = ControlSession<MailboxTransport<IO, D>>;

/// One physical Apollo interface.
pub struct Device<IO, D>
where
    IO: RegisterIo,
    D: DelayNs + Clone + Send,
{
    shared: Arc<DeviceShared<IO>>,
    streams: [Option<Stream>; 2],
    control: Arc<DeviceSession<IO, D>>,
    delay: D,
    irq_line: u32,
    clock: ClockConfig,
}

impl<IO, D> Device<IO, D>
where
    IO: RegisterIo,
    D: DelayNs + Clone + Send,
{
    /// Take ownership of a newly present device. Does not touch hardware;
    /// call [`reset`](Self::reset) to bring it to a known state.
    pub fn attach(present: DevicePresent<IO>, delay: D, sink: Arc<dyn PeriodSink>) -> Result<Self> {
        Self::attach_with_timeout(present, delay, sink, CONTROL_TIMEOUT)
    }

    /// [`attach`](Self::attach) with a non-default control response timeout.
    pub fn attach_with_timeout(
        present: DevicePresent<IO>,
        delay: D,
        sink: Arc<dyn PeriodSink>,
        control_timeout: Duration,
    ) -> Result<Self> {
        let regs = Arc::new(RegisterBank::new(Registers::new(present.window)?));
        let link = Arc::new(LinkState::new());
        let control = Arc::new(
            ControlSession::new(MailboxTransport::new(regs.clone(), delay.clone()), link.clone())
                .with_timeout(control_timeout),
        );
        let shared = Arc::new(DeviceShared {
            regs,
            link,
            sink,
            streams: [Arc::new(StreamShared::new()), Arc::new(StreamShared::new())],
        });
        info!(irq = present.irq_line, "device attached");
        Ok(Self {
            shared,
            streams: [None, None],
            control,
            delay,
            irq_line: present.irq_line,
            clock: ClockConfig::default(),
        })
    }

    /// Handle for the platform interrupt handler.
    pub fn interrupt_bridge(&self) -> InterruptBridge<IO> {
        InterruptBridge::new(self.shared.clone())
    }

    /// The control session; clones share the single-flight channel.
    pub fn control(&self) -> Arc<DeviceSession<IO, D>> {
        self.control.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shared.link.clone())
    }

    pub fn is_present(&self) -> bool {
        self.shared.link.is_present()
    }

    pub fn irq_line(&self) -> u32 {
        self.irq_line
    }

    pub fn clock(&self) -> ClockConfig {
        self.clock
    }

    #[cfg(test)]
    pub(crate) fn register_bank(&self) -> &RegisterBank<IO> {
        &self.shared.regs
    }

    // ── Hardware lifecycle ─────────────────────────────────────────────

    /// Reset the device and program the default clock.
    ///
    /// Running streams are stopped first. Fails with `DeviceNotReady`
    /// if READY does not come back within the bounded wait.
    pub fn reset(&mut self) -> Result<()> {
        self.suspend()?;
        self.shared.regs.lock().command(reg::CMD_RESET);
        self.delay.delay_ms(RESET_SETTLE_MS);

        let regs = &self.shared.regs;
        let ready = self.shared.link.poll_until(
            &mut self.delay,
            READY_POLL_ATTEMPTS,
            READY_POLL_INTERVAL_US,
            || regs.lock().status().contains(Status::READY),
        )?;
        if !ready {
            warn!("device did not become ready after reset");
            return Err(Error::DeviceNotReady);
        }

        let clock = ClockConfig::default();
        {
            let mut regs = self.shared.regs.lock();
            regs.set(reg::SAMPLE_RATE, clock.rate);
            regs.set(reg::FORMAT, clock.format.register_code());
            regs.set(reg::CHANNELS, u32::from(clock.channels));
        }
        if !self.streams.iter().flatten().any(|s| s.state() >= StreamState::Configured) {
            self.clock = clock;
        }
        info!(rate = clock.rate, "device reset");
        Ok(())
    }

    /// Stop every running stream ahead of a power transition.
    pub fn suspend(&mut self) -> Result<()> {
        self.shared.link.check()?;
        for slot in &mut self.streams {
            if let Some(stream) = slot.as_mut().filter(|s| s.state() == StreamState::Running) {
                stream.trigger_stop(&self.shared.regs, &self.shared.link)?;
            }
        }
        Ok(())
    }

    /// Reset the device and re-prepare streams that were ready to run.
    pub fn resume(&mut self) -> Result<()> {
        self.reset()?;
        for direction in Direction::ALL {
            if matches!(
                self.state(direction),
                StreamState::Prepared | StreamState::Stopped
            ) {
                self.prepare(direction)?;
            }
        }
        Ok(())
    }

    /// Bus-layer event: the device is gone. Every stream is closed
    /// without touching hardware and every control call fails with
    /// `DeviceGone` from now on.
    pub fn remove(&mut self) {
        self.shared.link.mark_removed();
        for slot in &mut self.streams {
            if let Some(stream) = slot.take() {
                stream.detach();
            }
        }
        info!("device removed");
    }

    pub fn status_report(&self) -> Result<StatusReport> {
        self.shared.link.check()?;
        let mut regs = self.shared.regs.lock();
        Ok(StatusReport {
            status: regs.status(),
            rate: regs.get(reg::SAMPLE_RATE),
            format: SampleFormat::from_register_code(regs.get(reg::FORMAT)),
            channels: regs.get(reg::CHANNELS),
            irq_line: self.irq_line,
            window_len: regs.window_len(),
        })
    }

    /// Bounds-checked access to any register, for diagnostics.
    pub fn read_register(&self, offset: usize) -> Result<u32> {
        self.shared.link.check()?;
        self.shared.regs.lock().read(offset)
    }

    // ── Streams ────────────────────────────────────────────────────────

    fn slot(&mut self, direction: Direction) -> &mut Option<Stream> {
        &mut self.streams[direction.index()]
    }

    fn stream_mut(&mut self, direction: Direction, op: &'static str) -> Result<&mut Stream> {
        self.shared.link.check()?;
        self.streams[direction.index()]
            .as_mut()
            .ok_or(Error::InvalidState {
                op,
                direction,
                state: StreamState::Closed,
            })
    }

    pub fn state(&self, direction: Direction) -> StreamState {
        self.shared.stream(direction).state()
    }

    pub fn position_frames(&self, direction: Direction) -> u64 {
        self.shared.stream(direction).position()
    }

    pub fn params(&self, direction: Direction) -> Option<HwParams> {
        self.streams[direction.index()].as_ref().map(|s| *s.params())
    }

    pub fn buffer(&self, direction: Direction) -> Option<&TransferBuffer> {
        self.streams[direction.index()].as_ref().map(Stream::buffer)
    }

    pub fn buffer_mut(&mut self, direction: Direction) -> Option<&mut TransferBuffer> {
        self.streams[direction.index()].as_mut().map(Stream::buffer_mut)
    }

    /// `Closed → Open`.
    pub fn open(&mut self, direction: Direction) -> Result<()> {
        self.shared.link.check()?;
        if let Some(stream) = &self.streams[direction.index()] {
            return Err(Error::InvalidState {
                op: "open",
                direction,
                state: stream.state(),
            });
        }
        let shared = self.shared.streams[direction.index()].clone();
        let stream = Stream::open(direction, shared)?;
        *self.slot(direction) = Some(stream);
        Ok(())
    }

    /// `Open | Configured → Configured`.
    pub fn configure(&mut self, direction: Direction, params: HwParams) -> Result<()> {
        let other = match direction {
            Direction::Playback => Direction::Capture,
            Direction::Capture => Direction::Playback,
        };
        if let Some(peer) = &self.streams[other.index()] {
            if peer.state() >= StreamState::Configured && !peer.params().same_clock(&params) {
                return Err(Error::InvalidParameter(format!(
                    "{direction} stream must match the {other} stream's rate, format and channels"
                )));
            }
        }
        self.stream_mut(direction, "configure")?.configure(params)?;
        self.clock = ClockConfig {
            rate: params.rate,
            format: params.format,
            channels: params.channels,
        };
        Ok(())
    }

    /// `Configured | Prepared | Stopped → Prepared`.
    pub fn prepare(&mut self, direction: Direction) -> Result<()> {
        self.shared.link.check()?;
        let Self {
            shared,
            streams,
            delay,
            ..
        } = self;
        let stream = streams[direction.index()].as_mut().ok_or(Error::InvalidState {
            op: "prepare",
            direction,
            state: StreamState::Closed,
        })?;
        stream.prepare(Hw {
            regs: &shared.regs,
            delay,
            link: &shared.link,
        })
    }

    /// `Prepared | Stopped → Running`.
    pub fn trigger_start(&mut self, direction: Direction) -> Result<()> {
        let shared = self.shared.clone();
        self.stream_mut(direction, "start")?
            .trigger_start(&shared.regs, &shared.link)
    }

    /// `Running → Stopped`.
    pub fn trigger_stop(&mut self, direction: Direction) -> Result<()> {
        let shared = self.shared.clone();
        self.stream_mut(direction, "stop")?
            .trigger_stop(&shared.regs, &shared.link)
    }

    /// Any state `→ Closed`. Closing a closed stream is a no-op.
    pub fn close(&mut self, direction: Direction) {
        if let Some(stream) = self.slot(direction).take() {
            stream.close(&self.shared.regs, &self.shared.link);
        }
    }
}

impl<IO, D> Drop for Device<IO, D>
where
    IO: RegisterIo,
    D: DelayNs + Clone + Send,
{
    fn drop(&mut self) {
        // The DMA engine must not outlive the buffers it points at.
        for direction in Direction::ALL {
            self.close(direction);
        }
        self.shared.link.shutdown();
    }
}
