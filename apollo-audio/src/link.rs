//! Device presence and shutdown state, plus the bounded-wait helper.
//!
//! Every blocking wait in the crate (READY polls, control responses)
//! goes through [`LinkState`] between polls so that a device-removed
//! event or a process shutdown ends the wait promptly.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::error::{Error, Result};

const PRESENT: u8 = 0;
const GONE: u8 = 1;
const SHUTDOWN: u8 = 2;

/// Whether the device can still be talked to.
#[derive(Debug)]
pub struct LinkState {
    state: AtomicU8,
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PRESENT),
        }
    }

    pub fn is_present(&self) -> bool {
        self.state.load(Ordering::Acquire) == PRESENT
    }

    /// `DeviceGone` after removal, `Aborted` after shutdown.
    pub fn check(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            PRESENT => Ok(()),
            GONE => Err(Error::DeviceGone),
            _ => Err(Error::Aborted),
        }
    }

    /// Record that the bus layer reported the device removed.
    pub fn mark_removed(&self) {
        self.state.store(GONE, Ordering::Release);
    }

    /// Abort every current and future wait. Removal takes precedence.
    pub fn shutdown(&self) {
        let _ = self
            .state
            .compare_exchange(PRESENT, SHUTDOWN, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Poll `ready` up to `attempts` times, sleeping `interval_us` between
    /// polls. `Ok(false)` means the attempts ran out.
    pub(crate) fn poll_until<D, F>(
        &self,
        delay: &mut D,
        attempts: u32,
        interval_us: u32,
        mut ready: F,
    ) -> Result<bool>
    where
        D: DelayNs,
        F: FnMut() -> bool,
    {
        for attempt in 0..attempts {
            self.check()?;
            if ready() {
                return Ok(true);
            }
            if attempt + 1 < attempts {
                delay.delay_us(interval_us);
            }
        }
        self.check()?;
        Ok(false)
    }
}

/// Clonable handle that triggers shutdown from another thread or a
/// signal handler. Triggering is a single atomic store.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    link: Arc<LinkState>,
}

impl ShutdownHandle {
    pub(crate) fn new(link: Arc<LinkState>) -> Self {
        Self { link }
    }

    pub fn trigger(&self) {
        self.link.shutdown();
    }
}

/// Number of polls at `interval_us` spacing that cover `timeout`.
pub(crate) fn polls_for(timeout: Duration, interval_us: u32) -> u32 {
    let interval = u128::from(interval_us.max(1));
    let polls = timeout.as_micros().div_ceil(interval);
    polls.clamp(1, u128::from(u32::MAX)) as u32
}

// ── Host delay ─────────────────────────────────────────────────────────────

/// [`DelayNs`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}
