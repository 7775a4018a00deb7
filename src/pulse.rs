//! Per-channel gate pulse state machine.
//!
//! Everything here runs in interrupt context: no allocation, no blocking,
//! only pin writes and timer start/stop calls.
//!
//! ```text
//!   Idle --zero-cross--> Delaying --delay timer--> Pulsing --pulse timer--> Idle
//!    ^                                                                       |
//!    +------------------------------ force_idle -----------------------------+
//! ```

use crate::curve::PULSE_WIDTH_US;
use crate::hal::{DimmerGpio, PinId, PulseTimers};

/// Where a channel is within the current half-cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PulseState {
    /// Waiting for the next zero-cross. No timer pending.
    #[default]
    Idle,
    /// Delay timer pending, gate low.
    Delaying,
    /// Pulse timer pending, gate high.
    Pulsing,
}

/// Gate output and the two one-shot timers driving it.
#[derive(Debug)]
pub struct PulseSequencer<Tm: Copy> {
    pin: PinId,
    delay_timer: Tm,
    pulse_timer: Tm,
    state: PulseState,
}

impl<Tm: Copy> PulseSequencer<Tm> {
    pub const fn new(pin: PinId, delay_timer: Tm, pulse_timer: Tm) -> Self {
        Self {
            pin,
            delay_timer,
            pulse_timer,
            state: PulseState::Idle,
        }
    }

    pub const fn state(&self) -> PulseState {
        self.state
    }

    pub const fn pin(&self) -> PinId {
        self.pin
    }

    /// Start a pulse sequence `delay_us` after the zero-cross that just
    /// happened.
    ///
    /// Both timers are armed at the same instant, so the pulse end does not
    /// depend on servicing the delay interrupt. Does nothing unless idle;
    /// returns whether the sequence was armed.
    pub fn arm<T>(&mut self, timers: &mut T, delay_us: u32) -> bool
    where
        T: PulseTimers<Timer = Tm>,
    {
        if self.state != PulseState::Idle {
            return false;
        }

        timers.stop(self.delay_timer);
        timers.stop(self.pulse_timer);
        timers.start_once(self.delay_timer, delay_us);
        timers.start_once(self.pulse_timer, delay_us.saturating_add(PULSE_WIDTH_US));
        self.state = PulseState::Delaying;
        true
    }

    /// Delay timer expired: raise the gate.
    pub fn on_delay_elapsed<G: DimmerGpio>(&mut self, gpio: &mut G) {
        if self.state != PulseState::Delaying {
            return;
        }
        gpio.set_level(self.pin, true);
        self.state = PulseState::Pulsing;
    }

    /// Pulse timer expired: drop the gate.
    ///
    /// Also accepted while still delaying, in case the delay interrupt was
    /// serviced late; the gate is then simply never raised this half-cycle.
    pub fn on_pulse_elapsed<G, T>(&mut self, gpio: &mut G, timers: &mut T)
    where
        G: DimmerGpio,
        T: PulseTimers<Timer = Tm>,
    {
        match self.state {
            PulseState::Pulsing => {}
            PulseState::Delaying => timers.stop(self.delay_timer),
            PulseState::Idle => return,
        }
        gpio.set_level(self.pin, false);
        self.state = PulseState::Idle;
    }

    /// Drive the gate low and cancel both timers, whatever the state.
    pub fn force_idle<G, T>(&mut self, gpio: &mut G, timers: &mut T)
    where
        G: DimmerGpio,
        T: PulseTimers<Timer = Tm>,
    {
        gpio.set_level(self.pin, false);
        timers.stop(self.delay_timer);
        timers.stop(self.pulse_timer);
        self.state = PulseState::Idle;
    }

    /// Force idle and give both timers back to the platform.
    pub(crate) fn release<G, T>(mut self, gpio: &mut G, timers: &mut T)
    where
        G: DimmerGpio,
        T: PulseTimers<Timer = Tm>,
    {
        self.force_idle(gpio, timers);
        timers.delete(self.delay_timer);
        timers.delete(self.pulse_timer);
    }
}
