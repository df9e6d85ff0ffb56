//! Interrupt bridge.
//!
//! [`InterruptBridge::handle`] is called once per hardware interrupt. It
//! never blocks and never allocates:
//!
//! 1. If the register region is held by another context, return
//!    [`IrqOutcome::Deferred`] without touching hardware. STATUS bits are
//!    sticky, so the next interrupt sees them.
//! 2. Read STATUS exactly once.
//! 3. ERROR: every running stream is forced to `Stopped` with a latched
//!    fault and a [`PeriodEvent::Fault`] is delivered.
//! 4. PERIOD: every stream whose notification gate is open gets its
//!    position recomputed from the device's DMA address and a
//!    [`PeriodEvent::Elapsed`] is delivered.
//! 5. Write the observed bits back to STATUS. This happens in a drop
//!    guard, so it runs on every path out of the handler after step 2.
//!
//! Notifications are delivered while the register region is held; a
//! [`PeriodSink`] must not call back into the device.

use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::device::DeviceShared;
use crate::regs::registers as reg;
use crate::regs::{Acquire, RegisterIo, Registers, Status};
use crate::stream::Direction;

/// What the interrupt path reports for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodEvent {
    /// A period boundary passed; position is in frames within the ring.
    Elapsed { position_frames: u64 },
    /// The device flagged an error and the stream was stopped.
    Fault,
}

/// Receiver of period notifications (the audio subsystem).
pub trait PeriodSink: Send + Sync {
    fn period_elapsed(&self, direction: Direction, event: PeriodEvent);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PeriodSink for NullSink {
    fn period_elapsed(&self, _direction: Direction, _event: PeriodEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    /// STATUS was read, handled, and acknowledged.
    Handled(Status),
    /// The register region was busy; nothing was read or written.
    Deferred,
    /// The device is gone or shutting down.
    NotPresent,
}

/// Writes the observed STATUS bits back when dropped.
struct AckGuard<'a, IO: RegisterIo> {
    regs: MutexGuard<'a, Registers<IO>>,
    observed: Status,
}

impl<'a, IO: RegisterIo> AckGuard<'a, IO> {
    fn read(mut regs: MutexGuard<'a, Registers<IO>>) -> Self {
        let observed = regs.status();
        Self { regs, observed }
    }
}

impl<IO: RegisterIo> Drop for AckGuard<'_, IO> {
    fn drop(&mut self) {
        self.regs.acknowledge(self.observed);
    }
}

/// Cheap handle the platform's interrupt handler calls into.
pub struct InterruptBridge<IO> {
    shared: Arc<DeviceShared<IO>>,
}

impl<IO> Clone for InterruptBridge<IO> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<IO: RegisterIo> InterruptBridge<IO> {
    pub(crate) fn new(shared: Arc<DeviceShared<IO>>) -> Self {
        Self { shared }
    }

    pub fn handle(&self) -> IrqOutcome {
        let shared = &*self.shared;
        if !shared.link.is_present() {
            return IrqOutcome::NotPresent;
        }
        let regs = match shared.regs.try_acquire() {
            Acquire::Acquired(regs) => regs,
            Acquire::Deferred => return IrqOutcome::Deferred,
        };

        let mut ack = AckGuard::read(regs);
        let status = ack.observed;

        if status.contains(Status::ERROR) {
            for direction in Direction::ALL {
                if shared.stream(direction).force_fault() {
                    shared.sink.period_elapsed(direction, PeriodEvent::Fault);
                }
            }
        }

        if status.contains(Status::PERIOD) {
            for direction in Direction::ALL {
                let stream = shared.stream(direction);
                if !stream.begin_notify() {
                    continue;
                }
                let dma = ack.regs.dma_get(direction, reg::DMA_POSITION);
                let position_frames = stream.record_position(dma);
                shared
                    .sink
                    .period_elapsed(direction, PeriodEvent::Elapsed { position_frames });
                stream.end_notify();
            }
        }

        IrqOutcome::Handled(status)
    }
}
