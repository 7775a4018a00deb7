//! Zero-cross event queue.
//!
//! Moves zero-cross notifications out of interrupt context: the sender side
//! implements [`ZeroCrossObserver`] with a non-blocking push, a task drains
//! the receiver side. Built on `critical-section` and `heapless::Deque`.

use core::cell::{Cell, RefCell};

use critical_section::Mutex;
use embassy_time::Instant;
use heapless::Deque;

use crate::hal::PhaseId;
use crate::zero_cross::ZeroCrossObserver;

/// One observed zero-cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroCrossEvent {
    pub phase: PhaseId,
    pub timestamp: Instant,
}

/// Bounded queue of zero-cross events.
///
/// When full, new events are dropped and counted instead of blocking the
/// interrupt handler.
pub struct EventQueue<const SIZE: usize> {
    inner: Mutex<RefCell<Deque<ZeroCrossEvent, SIZE>>>,
    dropped: Mutex<Cell<u32>>,
}

impl<const SIZE: usize> EventQueue<SIZE> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Deque::new())),
            dropped: Mutex::new(Cell::new(0)),
        }
    }

    /// Handle to register as a phase observer.
    pub const fn sender(&self) -> EventSender<'_, SIZE> {
        EventSender { queue: self }
    }

    /// Handle for the consuming task.
    pub const fn receiver(&self) -> EventReceiver<'_, SIZE> {
        EventReceiver { queue: self }
    }

    /// Push an event. Returns false if the queue was full.
    pub fn try_push(&self, event: ZeroCrossEvent) -> bool {
        critical_section::with(|cs| {
            let mut queue = self.inner.borrow(cs).borrow_mut();
            if queue.push_back(event).is_ok() {
                return true;
            }
            let dropped = self.dropped.borrow(cs);
            dropped.set(dropped.get().saturating_add(1));
            false
        })
    }

    /// Pop the oldest event, if any.
    pub fn try_pop(&self) -> Option<ZeroCrossEvent> {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().pop_front())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events lost to a full queue since creation.
    pub fn dropped(&self) -> u32 {
        critical_section::with(|cs| self.dropped.borrow(cs).get())
    }
}

impl<const SIZE: usize> Default for EventQueue<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> ZeroCrossObserver for EventQueue<SIZE> {
    fn on_zero_cross(&self, phase: PhaseId, timestamp: Instant) {
        self.try_push(ZeroCrossEvent { phase, timestamp });
    }
}

/// Producer handle for an [`EventQueue`].
#[derive(Clone, Copy)]
pub struct EventSender<'a, const SIZE: usize> {
    queue: &'a EventQueue<SIZE>,
}

impl<const SIZE: usize> EventSender<'_, SIZE> {
    pub fn try_push(&self, event: ZeroCrossEvent) -> bool {
        self.queue.try_push(event)
    }
}

impl<const SIZE: usize> ZeroCrossObserver for EventSender<'_, SIZE> {
    fn on_zero_cross(&self, phase: PhaseId, timestamp: Instant) {
        self.queue.on_zero_cross(phase, timestamp);
    }
}

/// Consumer handle for an [`EventQueue`].
#[derive(Clone, Copy)]
pub struct EventReceiver<'a, const SIZE: usize> {
    queue: &'a EventQueue<SIZE>,
}

impl<const SIZE: usize> EventReceiver<'_, SIZE> {
    pub fn try_pop(&self) -> Option<ZeroCrossEvent> {
        self.queue.try_pop()
    }

    /// Pop every queued event into `handle`, oldest first.
    pub fn drain(&self, mut handle: impl FnMut(ZeroCrossEvent)) -> usize {
        let mut count = 0;
        while let Some(event) = self.queue.try_pop() {
            handle(event);
            count += 1;
        }
        count
    }
}
