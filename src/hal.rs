//! Platform services consumed by the dimmer.
//!
//! Implement [`DimmerGpio`] and [`PulseTimers`] to run the dimmer on a
//! specific chip. Both traits are called from interrupt context, so
//! implementations must not allocate or block.
//!
//! Through [`SharedDimmer`](crate::SharedDimmer) every method, including
//! the setup ones (`configure_output`, `attach_rising_edge`,
//! [`PulseTimers::create`]), runs inside a critical section with
//! interrupts masked. Do not log or wait on a peripheral from them.

use crate::channel::ChannelHandle;

/// Raw GPIO number.
pub type PinId = u8;

/// Index of an independently clocked AC line.
pub type PhaseId = u8;

/// Failure reported by a platform service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The peripheral refused the configuration.
    Rejected,
    /// No free peripheral instance is left.
    Exhausted,
}

/// GPIO access needed by zero-cross detectors and dimmer outputs.
pub trait DimmerGpio {
    /// Returns true if `pin` exists on this chip.
    fn is_valid_pin(&self, pin: PinId) -> bool;

    /// Configure `pin` as a push-pull output, initially low.
    ///
    /// Called with interrupts masked when driven through
    /// [`SharedDimmer`](crate::SharedDimmer).
    fn configure_output(&mut self, pin: PinId) -> Result<(), HalError>;

    /// Configure `pin` as an input and attach a rising-edge interrupt.
    ///
    /// The platform interrupt handler is expected to forward every edge to
    /// [`Dimmer::on_zero_cross`](crate::Dimmer::on_zero_cross). Called with
    /// interrupts masked when driven through
    /// [`SharedDimmer`](crate::SharedDimmer).
    fn attach_rising_edge(&mut self, pin: PinId) -> Result<(), HalError>;

    /// Detach the edge interrupt previously attached to `pin`.
    fn detach_interrupt(&mut self, pin: PinId);

    /// Return `pin` to its reset configuration.
    fn release(&mut self, _pin: PinId) {}

    /// Drive an output pin.
    fn set_level(&mut self, pin: PinId, high: bool);
}

/// Which of the two per-channel timers expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// End of the phase delay: gate goes high.
    Delay,
    /// End of the gate pulse: gate goes low.
    Pulse,
}

/// Routing tag attached to a one-shot timer when it is created.
///
/// The platform hands it back to
/// [`Dimmer::on_timer`](crate::Dimmer::on_timer) when the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub channel: ChannelHandle,
    pub kind: TimerKind,
}

/// One-shot microsecond timers.
pub trait PulseTimers {
    /// Platform handle of a created timer.
    type Timer: Copy;

    /// Allocate a timer that reports `event` on expiry.
    ///
    /// Called with interrupts masked when driven through
    /// [`SharedDimmer`](crate::SharedDimmer).
    fn create(&mut self, event: TimerEvent) -> Result<Self::Timer, HalError>;

    /// Arm `timer` to fire once, `after_us` microseconds from now.
    fn start_once(&mut self, timer: Self::Timer, after_us: u32);

    /// Disarm `timer`. Stopping an idle timer is a no-op.
    fn stop(&mut self, timer: Self::Timer);

    /// Release `timer`.
    fn delete(&mut self, timer: Self::Timer);
}
