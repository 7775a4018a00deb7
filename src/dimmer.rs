//! The dimmer: zero-cross registry, channels and transitions in one owner.

use embassy_time::{Duration, Instant};

use crate::channel::{ChannelArena, ChannelConfig, ChannelHandle, DimmerChannel};
use crate::curve::{Curve, CurveTable, LEVELS, LEVEL_MAX};
use crate::error::{DimmerError, Result};
use crate::hal::{DimmerGpio, PhaseId, PinId, PulseTimers, TimerEvent, TimerKind};
use crate::pulse::{PulseSequencer, PulseState};
use crate::transition::{TransitionEngine, TransitionRequest, TransitionTimings};
use crate::zero_cross::{ZeroCrossDetector, ZeroCrossObserver, ZeroCrossRegistry};

/// Default number of phases.
pub const DEFAULT_MAX_PHASES: usize = 4;

/// Default number of channels.
pub const DEFAULT_MAX_CHANNELS: usize = 8;

/// Runtime configuration of a [`Dimmer`].
#[derive(Debug, Clone)]
pub struct DimmerConfig {
    /// Registrations accepted, at most the `PHASES` capacity.
    pub max_phases: usize,
    /// Channels accepted, at most the `CHANNELS` capacity.
    pub max_channels: usize,
    /// Delay-percent table for [`Curve::Custom`].
    pub custom_curve: Option<[u8; LEVELS]>,
    pub transitions: TransitionTimings,
}

impl Default for DimmerConfig {
    fn default() -> Self {
        Self {
            max_phases: DEFAULT_MAX_PHASES,
            max_channels: DEFAULT_MAX_CHANNELS,
            custom_curve: None,
            transitions: TransitionTimings::default(),
        }
    }
}

/// Phase-angle dimmer.
///
/// Owns the platform services, the zero-cross detectors and the channels.
/// Methods taking `&mut self` without an `on_` prefix are task-context
/// operations; [`on_zero_cross`](Self::on_zero_cross) and
/// [`on_timer`](Self::on_timer) are the interrupt entry points and stick to
/// table lookups, pin writes and timer calls.
///
/// `PHASES` and `CHANNELS` are the storage capacities. Wrap the dimmer in a
/// [`SharedDimmer`](crate::SharedDimmer) to reach it from both contexts.
///
/// The dimmer does not log. [`SharedDimmer`](crate::SharedDimmer) logs task
/// operations after leaving its critical section.
pub struct Dimmer<
    'a,
    G: DimmerGpio,
    T: PulseTimers,
    const PHASES: usize = DEFAULT_MAX_PHASES,
    const CHANNELS: usize = DEFAULT_MAX_CHANNELS,
> {
    gpio: G,
    timers: T,
    curves: CurveTable,
    timings: TransitionTimings,
    zero_cross: ZeroCrossRegistry<'a, PHASES>,
    channels: ChannelArena<T::Timer, CHANNELS>,
    transitions: TransitionEngine<CHANNELS>,
}

impl<'a, G, T, const PHASES: usize, const CHANNELS: usize> Dimmer<'a, G, T, PHASES, CHANNELS>
where
    G: DimmerGpio,
    T: PulseTimers,
{
    /// Build the curve tables and empty registries.
    pub fn new(gpio: G, timers: T, config: &DimmerConfig) -> Result<Self> {
        if config.max_phases > PHASES
            || config.max_channels > CHANNELS
            || CHANNELS > usize::from(u8::MAX)
        {
            return Err(DimmerError::InvalidArgument);
        }

        let curves = CurveTable::new(config.custom_curve.as_ref())?;
        Ok(Self {
            gpio,
            timers,
            curves,
            timings: config.transitions,
            zero_cross: ZeroCrossRegistry::new(config.max_phases),
            channels: ChannelArena::new(config.max_channels),
            transitions: TransitionEngine::new(),
        })
    }

    /// Delete every channel and detach every zero-cross interrupt.
    pub fn deinit(&mut self) {
        while let Some(handle) = self.channels.first_handle() {
            let deleted = self.delete_channel(handle);
            debug_assert!(deleted.is_ok(), "live handle failed to delete");
        }
        self.transitions.cancel_all();
        self.zero_cross.clear(&mut self.gpio);
    }

    /// Register the zero-cross input of `phase`.
    ///
    /// `frequency_hint` is 50 or 60 for a fixed frequency, 0 to measure it.
    pub fn register_zero_cross(
        &mut self,
        pin: PinId,
        phase: PhaseId,
        frequency_hint: u16,
    ) -> Result<()> {
        if self.channels.claims_pin(pin) {
            return Err(DimmerError::AlreadyExists);
        }
        self.zero_cross
            .register(&mut self.gpio, pin, phase, frequency_hint)
    }

    /// Create a channel clocked by an already registered phase.
    ///
    /// On any failure every resource acquired so far is released again.
    pub fn create_channel(&mut self, config: &ChannelConfig) -> Result<ChannelHandle> {
        if !self.gpio.is_valid_pin(config.pin) {
            return Err(DimmerError::InvalidArgument);
        }
        if !self.curves.supports(config.curve) {
            return Err(DimmerError::InvalidArgument);
        }
        let half_cycle_us = self
            .zero_cross
            .get(config.phase)
            .ok_or(DimmerError::NotFound)?
            .half_cycle_us();
        if self.zero_cross.claims_pin(config.pin) || self.channels.claims_pin(config.pin) {
            return Err(DimmerError::AlreadyExists);
        }
        let handle = self
            .channels
            .vacant()
            .ok_or(DimmerError::ResourceExhausted)?;

        let pulse = self.acquire_output(config.pin, handle)?;
        let mut channel = DimmerChannel::new(config, pulse);
        channel.recompute(half_cycle_us, &self.curves);

        if let Err(channel) = self.channels.insert(handle, channel) {
            channel.into_pulse().release(&mut self.gpio, &mut self.timers);
            self.gpio.release(config.pin);
            return Err(DimmerError::ResourceExhausted);
        }
        Ok(handle)
    }

    /// Configure the gate pin and allocate both timers, rolling back on error.
    fn acquire_output(
        &mut self,
        pin: PinId,
        handle: ChannelHandle,
    ) -> Result<PulseSequencer<T::Timer>> {
        self.gpio.configure_output(pin)?;
        self.gpio.set_level(pin, false);

        let delay_timer = match self.timers.create(TimerEvent {
            channel: handle,
            kind: TimerKind::Delay,
        }) {
            Ok(timer) => timer,
            Err(err) => {
                self.gpio.release(pin);
                return Err(err.into());
            }
        };

        let pulse_timer = match self.timers.create(TimerEvent {
            channel: handle,
            kind: TimerKind::Pulse,
        }) {
            Ok(timer) => timer,
            Err(err) => {
                self.timers.delete(delay_timer);
                self.gpio.release(pin);
                return Err(err.into());
            }
        };

        Ok(PulseSequencer::new(pin, delay_timer, pulse_timer))
    }

    /// Delete a channel: it leaves the scheduling set first, then its gate is
    /// driven low and its timers and pin are released.
    pub fn delete_channel(&mut self, handle: ChannelHandle) -> Result<()> {
        let channel = self.channels.remove(handle).ok_or(DimmerError::NotFound)?;
        self.transitions.cancel(handle);

        let pin = channel.pin();
        channel.into_pulse().release(&mut self.gpio, &mut self.timers);
        self.gpio.release(pin);
        Ok(())
    }

    /// Set the level of a channel, clamped to 0..=100.
    ///
    /// Cancels a running transition on the channel. Takes effect from the
    /// next zero-cross; a pulse already in flight is not touched.
    pub fn set_level(&mut self, handle: ChannelHandle, level: u8) -> Result<()> {
        self.transitions.cancel(handle);
        self.apply_level(handle, level)
    }

    fn apply_level(&mut self, handle: ChannelHandle, level: u8) -> Result<()> {
        let channel = self.channels.get_mut(handle).ok_or(DimmerError::NotFound)?;
        let half_cycle_us = self.zero_cross.half_cycle_us(channel.phase());
        channel.set_level(level, half_cycle_us, &self.curves);
        Ok(())
    }

    /// Ramp a channel to `level` over `duration`, starting at `now`.
    ///
    /// Short durations apply the level at once. Otherwise the ramp is
    /// stepped by [`service_transitions`](Self::service_transitions) and
    /// replaces any transition already running on the channel.
    pub fn set_level_transition(
        &mut self,
        handle: ChannelHandle,
        level: u8,
        duration: Duration,
        now: Instant,
    ) -> Result<()> {
        let current = self.level(handle)?;
        let level = level.min(LEVEL_MAX);

        if duration < self.timings.immediate_below || current == level {
            return self.set_level(handle, level);
        }

        let request = TransitionRequest::new(handle, current, level, duration, &self.timings);
        self.transitions.start(&request, now);
        Ok(())
    }

    /// Advance all due transitions. Returns when to call again, `None` if
    /// nothing is running.
    pub fn service_transitions(&mut self, now: Instant) -> Option<Instant> {
        let Self {
            channels,
            zero_cross,
            curves,
            transitions,
            ..
        } = self;

        transitions.service(now, |handle, level| {
            let Some(channel) = channels.get_mut(handle) else {
                return false;
            };
            let half_cycle_us = zero_cross.half_cycle_us(channel.phase());
            channel.set_level(level, half_cycle_us, curves);
            true
        })
    }

    /// Earliest pending transition step.
    pub fn next_transition_deadline(&self) -> Option<Instant> {
        self.transitions.next_deadline()
    }

    pub fn is_transitioning(&self, handle: ChannelHandle) -> bool {
        self.transitions.is_running(handle)
    }

    pub fn set_curve(&mut self, handle: ChannelHandle, curve: Curve) -> Result<()> {
        if !self.curves.supports(curve) {
            return Err(DimmerError::InvalidArgument);
        }
        let channel = self.channels.get_mut(handle).ok_or(DimmerError::NotFound)?;
        let half_cycle_us = self.zero_cross.half_cycle_us(channel.phase());
        channel.set_curve(curve, half_cycle_us, &self.curves);
        Ok(())
    }

    /// Enable or disable a channel.
    ///
    /// Disabling drives the gate low and cancels both timers immediately.
    pub fn set_active(&mut self, handle: ChannelHandle, active: bool) -> Result<()> {
        let channel = self.channels.get_mut(handle).ok_or(DimmerError::NotFound)?;
        if channel.is_active() == active {
            return Ok(());
        }

        channel.set_active(active);
        if active {
            let half_cycle_us = self.zero_cross.half_cycle_us(channel.phase());
            channel.recompute(half_cycle_us, &self.curves);
        } else {
            channel
                .pulse_mut()
                .force_idle(&mut self.gpio, &mut self.timers);
            self.transitions.cancel(handle);
        }
        Ok(())
    }

    pub fn level(&self, handle: ChannelHandle) -> Result<u8> {
        self.channel(handle).map(DimmerChannel::level)
    }

    pub fn curve(&self, handle: ChannelHandle) -> Result<Curve> {
        self.channel(handle).map(DimmerChannel::curve)
    }

    /// Current trigger delay in microseconds.
    pub fn delay_us(&self, handle: ChannelHandle) -> Result<u32> {
        self.channel(handle).map(DimmerChannel::delay_us)
    }

    pub fn is_active(&self, handle: ChannelHandle) -> Result<bool> {
        self.channel(handle).map(DimmerChannel::is_active)
    }

    pub fn pulse_state(&self, handle: ChannelHandle) -> Result<PulseState> {
        self.channel(handle).map(DimmerChannel::pulse_state)
    }

    pub fn channel(&self, handle: ChannelHandle) -> Result<&DimmerChannel<T::Timer>> {
        self.channels.get(handle).ok_or(DimmerError::NotFound)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn phase_count(&self) -> usize {
        self.zero_cross.len()
    }

    /// Measured mains frequency of `phase`, 0 if unknown.
    pub fn frequency(&self, phase: PhaseId) -> u16 {
        self.zero_cross.frequency_hz(phase)
    }

    pub fn half_cycle_us(&self, phase: PhaseId) -> Result<u32> {
        self.zero_cross
            .get(phase)
            .map(ZeroCrossDetector::half_cycle_us)
            .ok_or(DimmerError::NotFound)
    }

    /// Install or clear the zero-cross observer of `phase`.
    pub fn set_observer(
        &mut self,
        phase: PhaseId,
        observer: Option<&'a dyn ZeroCrossObserver>,
    ) -> Result<()> {
        self.zero_cross.set_observer(phase, observer)
    }

    /// Forget the measured frequency of `phase` and measure again.
    ///
    /// Channels on the phase fall back to the 50 Hz half-cycle until the new
    /// measurement completes.
    pub fn reset_frequency(&mut self, phase: PhaseId) -> Result<()> {
        self.zero_cross.reset_frequency(phase)?;
        self.refresh_phase(phase);
        Ok(())
    }

    /// Recompute the delay of every active channel.
    pub fn update_all(&mut self) {
        for channel in self.channels.iter_mut() {
            if channel.is_active() {
                channel.invalidate();
                let half_cycle_us = self.zero_cross.half_cycle_us(channel.phase());
                channel.recompute(half_cycle_us, &self.curves);
            }
        }
    }

    fn refresh_phase(&mut self, phase: PhaseId) {
        let half_cycle_us = self.zero_cross.half_cycle_us(phase);
        for channel in self.channels.iter_mut() {
            if channel.phase() == phase {
                channel.invalidate();
                if channel.is_active() {
                    channel.recompute(half_cycle_us, &self.curves);
                }
            }
        }
    }

    /// Interrupt entry point for a rising edge on a zero-cross pin.
    ///
    /// Measures the frequency while unknown, notifies the observer, then arms
    /// the pulse sequence of every active idle channel on the phase.
    pub fn on_zero_cross(&mut self, pin: PinId, now: Instant) {
        let Some(detector) = self.zero_cross.by_pin_mut(pin) else {
            return;
        };
        if !detector.is_active() {
            return;
        }

        let phase = detector.phase();
        if detector.on_edge(now).is_some() {
            self.refresh_phase(phase);
        }

        for channel in self.channels.iter_mut() {
            if channel.phase() != phase || !channel.is_active() {
                continue;
            }
            let delay_us = channel.delay_us();
            channel.pulse_mut().arm(&mut self.timers, delay_us);
        }
    }

    /// Interrupt entry point for an expired channel timer.
    ///
    /// Events for deleted channels are ignored.
    pub fn on_timer(&mut self, event: TimerEvent) {
        let Some(channel) = self.channels.get_mut(event.channel) else {
            return;
        };
        let pulse = channel.pulse_mut();
        match event.kind {
            TimerKind::Delay => pulse.on_delay_elapsed(&mut self.gpio),
            TimerKind::Pulse => pulse.on_pulse_elapsed(&mut self.gpio, &mut self.timers),
        }
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn curves(&self) -> &CurveTable {
        &self.curves
    }
}
