//! # apollo-audio
//!
//! Streaming engine and control-protocol core for Apollo Twin PCIe audio
//! interfaces. The crate owns everything between the bus layer (which
//! hands over a mapped register window and an interrupt line) and the
//! audio subsystem (which fills and drains transfer buffers):
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Registers | [`regs`] | BAR0 window, register map, the shared lock region |
//! | Memory | [`buffer`] | Word-aligned DMA ring with period geometry |
//! | Streams | [`stream`] / [`device`] | Per-direction state machine and the device handle |
//! | Interrupts | [`irq`] / [`notify`] | Status handling, position latching, SPSC notification ring |
//! | Protocol | [`protocol`] | Framed control messages with CRC-32 |
//! | Control | [`transport`] / [`session`] / [`control`] | Mailbox channel, single-flight calls, typed mixer ops |
//! | Persistence | [`config`] | `key=value` settings file and presets |
//!
//! ## Data paths
//!
//! ```text
//! audio:    Device ─▶ Stream ─▶ TransferBuffer ─▶ Registers ─▶ DMA engine
//!           DMA engine ─▶ IRQ ─▶ InterruptBridge ─▶ PeriodSink (position, faults)
//!
//! control:  ConfigStore ─▶ DeviceControl ─▶ ControlSession ─▶ encode ─▶ mailbox
//!           mailbox ─▶ decode ─▶ ControlSession ─▶ ConfigStore (write-through)
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use apollo_audio::{Device, DevicePresent, Direction, HwParams, NullSink, StdDelay};
//! use apollo_audio::control::DeviceControl;
//!
//! let present = DevicePresent { window, irq_line: 17 };
//! let mut device = Device::attach(present, StdDelay, Arc::new(NullSink))?;
//! device.reset()?;
//!
//! device.open(Direction::Playback)?;
//! device.configure(Direction::Playback, HwParams::default())?;
//! device.prepare(Direction::Playback)?;
//! device.trigger_start(Direction::Playback)?;
//!
//! // From the platform's interrupt handler:
//! let bridge = device.interrupt_bridge();
//! bridge.handle();
//!
//! device.control().set_analog_gain(1, 24.0)?;
//! ```
//!
//! ## Stream parameters
//!
//! - **Rates:** 44.1, 48, 88.2, 96, 176.4, 192 kHz ([`constants::SUPPORTED_RATES`])
//! - **Formats:** S16, S24 in 32, S32 ([`SampleFormat`])
//! - **Channels:** 2 to 8, shared by playback and capture
//! - **Ring:** 2 to 32 periods of 64 B to 512 KiB, at most 1 MiB total

pub mod constants;
pub mod error;
pub mod regs;
pub mod buffer;
pub mod link;
pub mod stream;
pub mod irq;
pub mod notify;
pub mod device;
pub mod protocol;
pub mod transport;
pub mod session;
pub mod control;
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigStore, Mutation, Snapshot};
pub use control::{DeviceControl, InputSource, MonitorSource, OutputSide};
pub use device::{ClockConfig, Device, DevicePresent, DeviceSession, StatusReport};
pub use error::{Error, ErrorKind, Result};
pub use irq::{InterruptBridge, IrqOutcome, NullSink, PeriodEvent, PeriodSink};
pub use link::{LinkState, ShutdownHandle, StdDelay};
pub use notify::{Notification, NotificationRing};
pub use regs::{MmioWindow, RegisterIo, Status};
pub use session::ControlSession;
pub use stream::{Direction, HwParams, SampleFormat, StreamState};
pub use transport::{ControlTransport, MailboxTransport};
