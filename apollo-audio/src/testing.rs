//! Test doubles shared by the unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use parking_lot::Mutex;

use crate::control::{InputSource, MonitorSource};
use crate::error::{Error, Result};
use crate::irq::{PeriodEvent, PeriodSink};
use crate::link::LinkState;
use crate::protocol::{self, response_payload, Command, Request};
use crate::regs::registers as reg;
use crate::regs::{RegisterIo, Status};
use crate::session::ControlSession;
use crate::stream::Direction;
use crate::transport::ControlTransport;

// ── Mock delay (no-op) ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

// ── Fake register window ───────────────────────────────────────────────────

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;
type WriteHook = Box<dyn FnMut(usize, u32) + Send>;

struct WindowState {
    words: Vec<u32>,
    /// Write log in chronological order: (offset, value).
    log: Vec<(usize, u32)>,
    sent: Vec<Vec<u8>>,
    ready_after_reset: bool,
    responder: Option<Responder>,
    on_write: Option<WriteHook>,
}

/// A register window with device-like side effects.
///
/// - STATUS: READY and RUNNING are levels; ERROR and PERIOD clear when
///   written as 1.
/// - CONTROL ← RESET: READY follows `ready_after_reset`.
/// - DMA_CONTROL ← START/STOP: sets or clears RUNNING.
/// - DOORBELL: the TX frame is recorded and passed to the responder,
///   whose answer (if any) is placed in the RX mailbox.
///
/// Clones share state, so a test keeps one handle while the device owns
/// another.
#[derive(Clone)]
pub struct FakeWindow {
    state: Arc<Mutex<WindowState>>,
}

impl FakeWindow {
    pub fn new() -> Self {
        Self::with_len(reg::WINDOW_MIN_BYTES)
    }

    pub fn with_len(len: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState {
                words: vec![0; len / 4],
                log: Vec::new(),
                sent: Vec::new(),
                ready_after_reset: true,
                responder: None,
                on_write: None,
            })),
        }
    }

    /// A device that reports READY and answers control frames from a
    /// simulated mixer.
    pub fn ready_device() -> Self {
        let fake = Self::new();
        fake.raise(Status::READY);
        let mut mixer = SimulatedMixer::default();
        fake.respond_with(move |frame| mixer.handle(frame));
        fake
    }

    pub fn peek(&self, offset: usize) -> u32 {
        self.state.lock().words[offset / 4]
    }

    pub fn poke(&self, offset: usize, value: u32) {
        self.state.lock().words[offset / 4] = value;
    }

    pub fn raise(&self, bits: Status) {
        self.state.lock().words[reg::STATUS / 4] |= bits.bits();
    }

    pub fn lower(&self, bits: Status) {
        self.state.lock().words[reg::STATUS / 4] &= !bits.bits();
    }

    pub fn status(&self) -> Status {
        Status::from_bits_retain(self.peek(reg::STATUS))
    }

    pub fn set_ready_after_reset(&self, ready: bool) {
        self.state.lock().ready_after_reset = ready;
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Run `hook` on every register write, before the write takes effect
    /// and while the caller still holds whatever lock it took.
    pub fn on_write<F>(&self, hook: F)
    where
        F: FnMut(usize, u32) + Send + 'static,
    {
        self.state.lock().on_write = Some(Box::new(hook));
    }

    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state.lock().log.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().log.clear();
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// Advance `direction`'s DMA position by one period, wrapping inside
    /// the programmed ring, and raise PERIOD.
    pub fn complete_period(&self, direction: Direction) {
        let block = match direction {
            Direction::Playback => reg::PLAYBACK_DMA,
            Direction::Capture => reg::CAPTURE_DMA,
        };
        let mut s = self.state.lock();
        let base = s.words[(block + reg::DMA_ADDR) / 4];
        let size = s.words[(block + reg::DMA_SIZE) / 4];
        let period = s.words[(block + reg::DMA_PERIOD) / 4];
        let pos = s.words[(block + reg::DMA_POSITION) / 4];
        let offset = pos.wrapping_sub(base);
        let next = if size == 0 { 0 } else { (offset.wrapping_add(period)) % size };
        s.words[(block + reg::DMA_POSITION) / 4] = base.wrapping_add(next);
        s.words[reg::STATUS / 4] |= Status::PERIOD.bits();
    }
}

impl Default for FakeWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowState {
    fn doorbell(&mut self) {
        let len = (self.words[reg::MBOX_TX_LEN / 4] as usize).min(reg::MBOX_CAPACITY);
        let mut frame = Vec::with_capacity(len + 3);
        for i in 0..len.div_ceil(4) {
            frame.extend_from_slice(&self.words[(reg::MBOX_TX_DATA / 4) + i].to_le_bytes());
        }
        frame.truncate(len);
        self.sent.push(frame.clone());

        let reply = self.responder.as_mut().and_then(|r| r(&frame));
        if let Some(reply) = reply {
            for (i, chunk) in reply.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.words[(reg::MBOX_RX_DATA / 4) + i] = u32::from_le_bytes(word);
            }
            self.words[reg::MBOX_RX_LEN / 4] = reply.len() as u32;
        }
    }
}

impl RegisterIo for FakeWindow {
    fn len(&self) -> usize {
        self.state.lock().words.len() * 4
    }

    fn read32(&mut self, offset: usize) -> u32 {
        self.state.lock().words[offset / 4]
    }

    fn write32(&mut self, offset: usize, value: u32) {
        let mut s = self.state.lock();
        s.log.push((offset, value));
        if let Some(hook) = s.on_write.as_mut() {
            hook(offset, value);
        }
        let idx = offset / 4;
        match offset {
            reg::STATUS => {
                let clear = value & (Status::ERROR | Status::PERIOD).bits();
                s.words[idx] &= !clear;
            }
            reg::CONTROL => {
                s.words[idx] = value;
                if value == reg::CMD_RESET {
                    let ready = s.ready_after_reset;
                    let status = &mut s.words[reg::STATUS / 4];
                    *status = if ready { Status::READY.bits() } else { 0 };
                }
            }
            reg::MBOX_DOORBELL => {
                s.words[idx] = value;
                s.doorbell();
            }
            o if o == reg::PLAYBACK_DMA + reg::DMA_CONTROL
                || o == reg::CAPTURE_DMA + reg::DMA_CONTROL =>
            {
                s.words[idx] = value;
                match value {
                    reg::DMA_START => s.words[reg::STATUS / 4] |= Status::RUNNING.bits(),
                    reg::DMA_STOP => s.words[reg::STATUS / 4] &= !Status::RUNNING.bits(),
                    _ => {}
                }
            }
            o if o == reg::PLAYBACK_DMA + reg::DMA_ADDR
                || o == reg::CAPTURE_DMA + reg::DMA_ADDR =>
            {
                s.words[idx] = value;
                // The engine restarts from the new base.
                s.words[(o - reg::DMA_ADDR + reg::DMA_POSITION) / 4] = value;
            }
            _ => s.words[idx] = value,
        }
    }
}

// ── Simulated mixer ────────────────────────────────────────────────────────

/// Device-side control logic: decodes a request frame, updates mixer
/// state, and encodes the echoing response.
#[derive(Default)]
pub struct SimulatedMixer {
    analog_gain: HashMap<u8, u16>,
    phantom: HashMap<u8, bool>,
    pad: HashMap<u8, bool>,
    input_source: HashMap<u8, InputSource>,
    hpf: HashMap<u8, (bool, u16)>,
    output_gain: HashMap<u8, i16>,
    monitor_source: MonitorSource,
    monitor_gain: i16,
}

impl SimulatedMixer {
    pub fn handle(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let message = protocol::decode(frame).ok()?;
        let command = message.command();
        let data = match Request::from_message(&message) {
            Ok(request) => self.apply(request),
            Err(_) => return Some(encode_reply(command, 0x0001, &[])),
        };
        Some(encode_reply(command, 0, &data))
    }

    fn apply(&mut self, request: Request) -> Vec<u8> {
        match request {
            Request::Reset => {
                *self = SimulatedMixer::default();
                Vec::new()
            }
            Request::GetAnalogGain { input } => {
                self.analog_gain.get(&input).copied().unwrap_or(0).to_le_bytes().to_vec()
            }
            Request::SetAnalogGain { input, raw } => {
                self.analog_gain.insert(input, raw);
                Vec::new()
            }
            Request::GetPhantomPower { input } => {
                vec![u8::from(self.phantom.get(&input).copied().unwrap_or(false))]
            }
            Request::SetPhantomPower { input, enabled } => {
                self.phantom.insert(input, enabled);
                Vec::new()
            }
            Request::GetInputSource { channel } => vec![self
                .input_source
                .get(&channel)
                .copied()
                .unwrap_or(InputSource::default_for_channel(channel))
                .ordinal()],
            Request::SetInputSource { channel, source } => {
                self.input_source.insert(channel, source);
                Vec::new()
            }
            Request::GetMonitorSource => vec![self.monitor_source.ordinal()],
            Request::SetMonitorSource { source } => {
                self.monitor_source = source;
                Vec::new()
            }
            Request::GetOutputGain { side } => self
                .output_gain
                .get(&side.ordinal())
                .copied()
                .unwrap_or(0)
                .to_le_bytes()
                .to_vec(),
            Request::SetOutputGain { side, raw } => {
                self.output_gain.insert(side.ordinal(), raw);
                Vec::new()
            }
            Request::GetMonitorGain => self.monitor_gain.to_le_bytes().to_vec(),
            Request::SetMonitorGain { raw } => {
                self.monitor_gain = raw;
                Vec::new()
            }
            Request::GetHighPassFilter { channel } => {
                let (on, freq) = self.hpf.get(&channel).copied().unwrap_or((false, 75));
                let [lo, hi] = freq.to_le_bytes();
                vec![u8::from(on), lo, hi]
            }
            Request::SetHighPassFilter {
                channel,
                enabled,
                freq_hz,
            } => {
                self.hpf.insert(channel, (enabled, freq_hz));
                Vec::new()
            }
            Request::GetPad { input } => {
                vec![u8::from(self.pad.get(&input).copied().unwrap_or(false))]
            }
            Request::SetPad { input, enabled } => {
                self.pad.insert(input, enabled);
                Vec::new()
            }
        }
    }
}

fn encode_reply(command: Command, status: u16, data: &[u8]) -> Vec<u8> {
    protocol::Message::from_parts(command, response_payload(status, data)).encode()
}

// ── In-memory transports ───────────────────────────────────────────────────

/// Transport that answers from a [`SimulatedMixer`] without registers.
pub struct MixerTransport {
    mixer: SimulatedMixer,
    pending: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Flip one payload byte of the next reply.
    corrupt_next: Arc<Mutex<bool>>,
    /// Sends left before the device disappears; `None` is unlimited.
    sends_left: Arc<Mutex<Option<usize>>>,
}

impl MixerTransport {
    pub fn new() -> Self {
        Self {
            mixer: SimulatedMixer::default(),
            pending: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            corrupt_next: Arc::new(Mutex::new(false)),
            sends_left: Arc::new(Mutex::new(None)),
        }
    }

    pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.sent.clone()
    }

    pub fn corruptor(&self) -> Arc<Mutex<bool>> {
        self.corrupt_next.clone()
    }

    pub fn send_budget(&self) -> Arc<Mutex<Option<usize>>> {
        self.sends_left.clone()
    }
}

impl ControlTransport for MixerTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(left) = self.sends_left.lock().as_mut() {
            if *left == 0 {
                return Err(Error::DeviceGone);
            }
            *left -= 1;
        }
        self.sent.lock().push(frame.to_vec());
        if let Some(mut reply) = self.mixer.handle(frame) {
            let mut corrupt = self.corrupt_next.lock();
            if *corrupt {
                reply[protocol::frame::HEADER_LEN] ^= 0x5A;
                *corrupt = false;
            }
            self.pending.push_back(reply);
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration, link: &LinkState) -> Result<Vec<u8>> {
        link.check()?;
        self.pending.pop_front().ok_or(Error::TimedOut(timeout))
    }

    fn purge(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}

/// A session over a fresh simulated mixer.
pub fn mixer_session() -> ControlSession<MixerTransport> {
    ControlSession::new(MixerTransport::new(), Arc::new(LinkState::new()))
}

/// One scripted device behaviour per receive.
#[derive(Debug, Clone)]
pub enum Reply {
    Frame(Vec<u8>),
    Silence,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    sent: Vec<Vec<u8>>,
    events: Vec<(&'static str, Command)>,
    purges: usize,
    echo: bool,
    latency: Duration,
    last_sent: Option<Command>,
}

/// Transport that plays back a fixed list of replies and records traffic.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new<I: IntoIterator<Item = Reply>>(replies: I) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: replies.into_iter().collect(),
                ..Script::default()
            })),
        }
    }

    /// Answer every request with an empty success echo.
    pub fn echo() -> Self {
        let t = Self::new([]);
        t.script.lock().echo = true;
        t
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.script.lock().latency = latency;
        self
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.script.lock().sent.clone()
    }

    pub fn events(&self) -> Vec<(&'static str, Command)> {
        self.script.lock().events.clone()
    }

    pub fn purges(&self) -> usize {
        self.script.lock().purges
    }
}

impl ControlTransport for ScriptedTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let command = protocol::decode(frame)?.command();
        let mut s = self.script.lock();
        s.sent.push(frame.to_vec());
        s.events.push(("send", command));
        s.last_sent = Some(command);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration, link: &LinkState) -> Result<Vec<u8>> {
        link.check()?;
        let latency = self.script.lock().latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let mut s = self.script.lock();
        let reply = if s.echo {
            s.last_sent
                .map(|c| Reply::Frame(encode_reply(c, 0, &[0, 0])))
                .unwrap_or(Reply::Silence)
        } else {
            s.replies.pop_front().unwrap_or(Reply::Silence)
        };
        match reply {
            Reply::Frame(frame) => {
                if let Some(command) = s.last_sent {
                    s.events.push(("recv", command));
                }
                Ok(frame)
            }
            Reply::Silence => Err(Error::TimedOut(timeout)),
        }
    }

    fn purge(&mut self) -> Result<()> {
        self.script.lock().purges += 1;
        Ok(())
    }
}

// ── Period sink ────────────────────────────────────────────────────────────

/// Records every notification.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Direction, PeriodEvent)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(Direction, PeriodEvent)> {
        self.events.lock().clone()
    }
}

impl PeriodSink for RecordingSink {
    fn period_elapsed(&self, direction: Direction, event: PeriodEvent) {
        self.events.lock().push((direction, event));
    }
}
