//! Lock-free ring carrying period notifications out of interrupt context.
//!
//! The interrupt bridge is the only producer: it pushes while holding the
//! register region, so two handlers never push at once. The audio
//! subsystem's thread is the only consumer. A full ring drops the newest
//! notification and counts it; the producer never waits.
//!
//! # Safety Contract
//!
//! - Only ONE context may push at a time (the interrupt bridge).
//! - Only ONE context may call [`pop()`](NotificationRing::pop).

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::irq::{PeriodEvent, PeriodSink};
use crate::stream::Direction;

/// One delivered notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub direction: Direction,
    pub event: PeriodEvent,
}

const EMPTY: Notification = Notification {
    direction: Direction::Playback,
    event: PeriodEvent::Fault,
};

/// Fixed-capacity SPSC ring of [`Notification`]s.
///
/// Usable capacity is `N - 1` (Lamport queue: one slot separates full
/// from empty).
pub struct NotificationRing<const N: usize> {
    slots: [UnsafeCell<Notification>; N],
    /// Next slot to write (producer only).
    head: AtomicUsize,
    /// Next slot to read (consumer only).
    tail: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: `Notification` is `Copy`. The single-producer/single-consumer
// contract means `head` and `tail` each have one writer, and the
// release/acquire pairs below order slot writes before the index that
// publishes them.
unsafe impl<const N: usize> Sync for NotificationRing<N> {}
unsafe impl<const N: usize> Send for NotificationRing<N> {}

impl<const N: usize> Default for NotificationRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NotificationRing<N> {
    pub const fn new() -> Self {
        assert!(N >= 2, "ring needs at least 2 slots (1 usable)");
        Self {
            slots: [const { UnsafeCell::new(EMPTY) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Producer side. Returns `false` and counts a drop when full.
    pub fn push(&self, notification: Notification) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % N;
        if next == self.tail.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // SAFETY: sole producer; `next != tail` means the consumer is not
        // reading this slot.
        unsafe { *self.slots[head].get() = notification };
        self.head.store(next, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<Notification> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: sole consumer; `tail != head` means the slot was
        // published by the producer's release store.
        let notification = unsafe { *self.slots[tail].get() };
        self.tail.store((tail + 1) % N, Ordering::Release);
        Some(notification)
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifications lost to a full ring since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> PeriodSink for NotificationRing<N> {
    fn period_elapsed(&self, direction: Direction, event: PeriodEvent) {
        self.push(Notification { direction, event });
    }
}
