//! Control channel transports.
//!
//! A [`ControlTransport`] moves whole frames; it knows nothing about
//! their contents. [`MailboxTransport`] is the PCIe implementation: the
//! host writes a frame into the TX mailbox and rings the doorbell, the
//! device answers by filling the RX mailbox and setting its length.
//!
//! ```text
//!   host                                    device
//!   TX_DATA ← frame, TX_LEN ← n
//!   DOORBELL ← 1  ─────────────────────▶   (process)
//!                                           RX_DATA ← reply, RX_LEN ← m
//!   poll RX_LEN ≠ 0 ◀───────────────────
//!   read RX_DATA, RX_LEN ← 0
//! ```
//!
//! The register lock is taken per register sequence, never across a
//! sleep, so stream operations and the interrupt path are only held off
//! for a handful of register accesses.

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::constants::CONTROL_POLL_INTERVAL_US;
use crate::error::{Error, FrameDefect, Result};
use crate::link::{polls_for, LinkState};
use crate::regs::registers as reg;
use crate::regs::{RegisterBank, RegisterIo, Registers};

/// A half-duplex, frame-at-a-time control channel.
pub trait ControlTransport: Send {
    /// Hand one encoded frame to the device.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one frame from the device.
    ///
    /// Returns `TimedOut` when nothing arrives, and stops early with
    /// `DeviceGone` or `Aborted` when `link` changes.
    fn receive(&mut self, timeout: Duration, link: &LinkState) -> Result<Vec<u8>>;

    /// Discard anything the device has queued for the host.
    fn purge(&mut self) -> Result<()>;
}

/// Control channel over the BAR0 mailbox registers.
pub struct MailboxTransport<IO, D> {
    regs: Arc<RegisterBank<IO>>,
    delay: D,
}

impl<IO, D> MailboxTransport<IO, D>
where
    IO: RegisterIo,
    D: DelayNs + Send,
{
    pub fn new(regs: Arc<RegisterBank<IO>>, delay: D) -> Self {
        Self { regs, delay }
    }
}

fn read_rx<IO: RegisterIo>(regs: &mut Registers<IO>, len: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(len.next_multiple_of(4));
    for word in 0..len.div_ceil(4) {
        frame.extend_from_slice(&regs.get(reg::MBOX_RX_DATA + word * 4).to_le_bytes());
    }
    frame.truncate(len);
    frame
}

impl<IO, D> ControlTransport for MailboxTransport<IO, D>
where
    IO: RegisterIo,
    D: DelayNs + Send,
{
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > reg::MBOX_CAPACITY {
            return Err(Error::MalformedFrame(FrameDefect::PayloadTooLong {
                len: frame.len(),
            }));
        }
        let mut regs = self.regs.lock();
        for (i, chunk) in frame.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            regs.set(reg::MBOX_TX_DATA + i * 4, u32::from_le_bytes(word));
        }
        regs.set(reg::MBOX_TX_LEN, frame.len() as u32);
        regs.set(reg::MBOX_DOORBELL, 1);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration, link: &LinkState) -> Result<Vec<u8>> {
        let polls = polls_for(timeout, CONTROL_POLL_INTERVAL_US);
        for poll in 0..polls {
            link.check()?;
            {
                let mut regs = self.regs.lock();
                let len = regs.get(reg::MBOX_RX_LEN) as usize;
                if len != 0 {
                    let result = if len > reg::MBOX_CAPACITY {
                        Err(Error::MalformedFrame(FrameDefect::LengthMismatch {
                            declared: len,
                            actual: reg::MBOX_CAPACITY,
                        }))
                    } else {
                        Ok(read_rx(&mut regs, len))
                    };
                    regs.set(reg::MBOX_RX_LEN, 0);
                    return result;
                }
            }
            if poll + 1 < polls {
                self.delay.delay_us(CONTROL_POLL_INTERVAL_US);
            }
        }
        link.check()?;
        Err(Error::TimedOut(timeout))
    }

    fn purge(&mut self) -> Result<()> {
        self.regs.lock().set(reg::MBOX_RX_LEN, 0);
        Ok(())
    }
}
