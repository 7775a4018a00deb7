//! Dimmer instance shared between tasks and interrupt handlers.
//!
//! Task-context calls run inside a short critical section. Interrupt entry
//! points do the same but skip the event instead of waiting if the dimmer is
//! not initialised or already borrowed.
//!
//! Platform services (`DimmerGpio`, `PulseTimers`) are called from inside
//! that critical section, with interrupts masked. Logging happens only after
//! it ends.

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

use crate::channel::{ChannelConfig, ChannelHandle};
use crate::curve::{Curve, LEVEL_MAX};
use crate::dimmer::{DEFAULT_MAX_CHANNELS, DEFAULT_MAX_PHASES, Dimmer, DimmerConfig};
use crate::error::{DimmerError, Result};
use crate::frequency::MainsFrequency;
use crate::hal::{DimmerGpio, PhaseId, PinId, PulseTimers, TimerEvent};
use crate::log::{log_info, log_warn};
use crate::pulse::PulseState;
use crate::zero_cross::ZeroCrossObserver;

/// Process-wide dimmer holder, usable from a `static`.
///
/// ```ignore
/// static DIMMER: SharedDimmer<'static, Gpio, Timers> = SharedDimmer::new();
///
/// DIMMER.init(Dimmer::new(gpio, timers, &DimmerConfig::default())?);
/// DIMMER.register_zero_cross(18, 0, 0)?;
/// let lamp = DIMMER.create_channel(&ChannelConfig::new(19, 0).with_level(40))?;
///
/// // GPIO interrupt handler
/// DIMMER.on_zero_cross(pin, Instant::now());
/// // timer interrupt handler
/// DIMMER.on_timer(event);
/// ```
pub struct SharedDimmer<
    'a,
    G: DimmerGpio,
    T: PulseTimers,
    const PHASES: usize = DEFAULT_MAX_PHASES,
    const CHANNELS: usize = DEFAULT_MAX_CHANNELS,
> {
    inner: Mutex<RefCell<Option<Dimmer<'a, G, T, PHASES, CHANNELS>>>>,
    transition_wake: Signal<CriticalSectionRawMutex, ()>,
}

impl<'a, G, T, const PHASES: usize, const CHANNELS: usize> Default
    for SharedDimmer<'a, G, T, PHASES, CHANNELS>
where
    G: DimmerGpio,
    T: PulseTimers,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, G, T, const PHASES: usize, const CHANNELS: usize> SharedDimmer<'a, G, T, PHASES, CHANNELS>
where
    G: DimmerGpio,
    T: PulseTimers,
{
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
            transition_wake: Signal::new(),
        }
    }

    /// Install a dimmer, tearing down any previous one first.
    pub fn init(&self, dimmer: Dimmer<'a, G, T, PHASES, CHANNELS>) {
        let previous = critical_section::with(|cs| self.inner.borrow(cs).replace(Some(dimmer)));
        if let Some(mut previous) = previous {
            previous.deinit();
        }
        self.transition_wake.signal(());
        log_info!("dimmer initialised");
    }

    /// Create and install a dimmer from its parts.
    pub fn init_with(&self, gpio: G, timers: T, config: &DimmerConfig) -> Result<()> {
        match Dimmer::new(gpio, timers, config) {
            Ok(dimmer) => {
                self.init(dimmer);
                Ok(())
            }
            Err(err) => {
                log_warn!(
                    "dimmer init failed ({} phases, {} channels): {}",
                    config.max_phases,
                    config.max_channels,
                    err
                );
                Err(err)
            }
        }
    }

    /// Tear down the dimmer and hand it back.
    pub fn deinit(&self) -> Option<Dimmer<'a, G, T, PHASES, CHANNELS>> {
        let dimmer = critical_section::with(|cs| {
            let mut slot = self.inner.borrow(cs).borrow_mut();
            if let Some(dimmer) = slot.as_mut() {
                dimmer.deinit();
            }
            slot.take()
        });
        self.transition_wake.signal(());
        if dimmer.is_some() {
            log_info!("dimmer deinitialised");
        }
        dimmer
    }

    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().is_some())
    }

    /// Run `f` on the dimmer inside a critical section.
    ///
    /// Returns `NotFound` if no dimmer is installed. Interrupts are masked
    /// while `f` runs, keep it short.
    pub fn with<R>(&self, f: impl FnOnce(&mut Dimmer<'a, G, T, PHASES, CHANNELS>) -> R) -> Result<R> {
        critical_section::with(|cs| {
            let mut slot = self.inner.borrow(cs).borrow_mut();
            slot.as_mut().map(f).ok_or(DimmerError::NotFound)
        })
    }

    /// Run a fallible operation and log its failure once the critical
    /// section is over.
    fn try_with<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Dimmer<'a, G, T, PHASES, CHANNELS>) -> Result<R>,
    ) -> Result<R> {
        let result = self.with(f).and_then(|result| result);
        if let Err(err) = &result {
            log_warn!("{} failed: {}", operation, err);
        }
        result
    }

    pub fn register_zero_cross(&self, pin: PinId, phase: PhaseId, frequency_hint: u16) -> Result<()> {
        self.try_with("register_zero_cross", |d| {
            d.register_zero_cross(pin, phase, frequency_hint)
        })?;
        if frequency_hint != 0 && MainsFrequency::from_hz(frequency_hint).is_none() {
            log_warn!(
                "unsupported frequency hint {} Hz on phase {}, measuring instead",
                frequency_hint,
                phase
            );
        }
        log_info!("zero-cross registered on pin {} for phase {}", pin, phase);
        Ok(())
    }

    pub fn create_channel(&self, config: &ChannelConfig) -> Result<ChannelHandle> {
        let handle = self.try_with("create_channel", |d| d.create_channel(config))?;
        log_info!(
            "channel created on pin {}, phase {}, level {}, curve {}",
            config.pin,
            config.phase,
            config.level.min(LEVEL_MAX),
            config.curve.as_str()
        );
        Ok(handle)
    }

    pub fn delete_channel(&self, handle: ChannelHandle) -> Result<()> {
        self.try_with("delete_channel", |d| d.delete_channel(handle))?;
        log_info!("channel {} deleted", handle.index());
        Ok(())
    }

    pub fn set_level(&self, handle: ChannelHandle, level: u8) -> Result<()> {
        self.try_with("set_level", |d| d.set_level(handle, level))
    }

    /// Ramp to `level` over `duration`, stepped by [`run_transitions`].
    pub fn set_level_transition(&self, handle: ChannelHandle, level: u8, duration: Duration) -> Result<()> {
        let now = Instant::now();
        self.try_with("set_level_transition", |d| {
            d.set_level_transition(handle, level, duration, now)
        })?;
        self.transition_wake.signal(());
        Ok(())
    }

    pub fn set_curve(&self, handle: ChannelHandle, curve: Curve) -> Result<()> {
        self.try_with("set_curve", |d| d.set_curve(handle, curve))?;
        log_info!("channel {} uses curve {}", handle.index(), curve.as_str());
        Ok(())
    }

    pub fn set_active(&self, handle: ChannelHandle, active: bool) -> Result<()> {
        self.try_with("set_active", |d| d.set_active(handle, active))?;
        log_info!("channel {} active: {}", handle.index(), active);
        Ok(())
    }

    pub fn level(&self, handle: ChannelHandle) -> Result<u8> {
        self.with(|d| d.level(handle))?
    }

    pub fn curve(&self, handle: ChannelHandle) -> Result<Curve> {
        self.with(|d| d.curve(handle))?
    }

    pub fn delay_us(&self, handle: ChannelHandle) -> Result<u32> {
        self.with(|d| d.delay_us(handle))?
    }

    pub fn is_active(&self, handle: ChannelHandle) -> Result<bool> {
        self.with(|d| d.is_active(handle))?
    }

    pub fn pulse_state(&self, handle: ChannelHandle) -> Result<PulseState> {
        self.with(|d| d.pulse_state(handle))?
    }

    /// Measured mains frequency of `phase`, 0 if unknown or not initialised.
    pub fn frequency(&self, phase: PhaseId) -> u16 {
        self.with(|d| d.frequency(phase)).unwrap_or(0)
    }

    pub fn set_observer(&self, phase: PhaseId, observer: Option<&'a dyn ZeroCrossObserver>) -> Result<()> {
        self.try_with("set_observer", |d| d.set_observer(phase, observer))
    }

    pub fn reset_frequency(&self, phase: PhaseId) -> Result<()> {
        self.try_with("reset_frequency", |d| d.reset_frequency(phase))?;
        log_info!("frequency measurement restarted on phase {}", phase);
        Ok(())
    }

    pub fn update_all(&self) -> Result<()> {
        self.with(Dimmer::update_all)
    }

    /// Interrupt entry point for a zero-cross edge.
    pub fn on_zero_cross(&self, pin: PinId, now: Instant) {
        self.try_with_isr(|d| d.on_zero_cross(pin, now));
    }

    /// Interrupt entry point for an expired channel timer.
    pub fn on_timer(&self, event: TimerEvent) {
        self.try_with_isr(|d| d.on_timer(event));
    }

    fn try_with_isr(&self, f: impl FnOnce(&mut Dimmer<'a, G, T, PHASES, CHANNELS>)) {
        critical_section::with(|cs| {
            if let Ok(mut slot) = self.inner.borrow(cs).try_borrow_mut() {
                if let Some(dimmer) = slot.as_mut() {
                    f(dimmer);
                }
            }
        });
    }

    /// Step due transitions. Returns the next deadline, if any.
    pub fn service_transitions(&self, now: Instant) -> Option<Instant> {
        self.with(|d| d.service_transitions(now)).ok().flatten()
    }
}

/// Transition stepper loop.
///
/// Spawn it once from an application task. It sleeps until the earliest
/// pending step or until a new transition is requested.
///
/// ```ignore
/// #[embassy_executor::task]
/// async fn transitions() -> ! {
///     run_transitions(&DIMMER).await
/// }
/// ```
pub async fn run_transitions<G, T, const PHASES: usize, const CHANNELS: usize>(
    dimmer: &SharedDimmer<'_, G, T, PHASES, CHANNELS>,
) -> !
where
    G: DimmerGpio,
    T: PulseTimers,
{
    loop {
        match dimmer.service_transitions(Instant::now()) {
            Some(deadline) => {
                select(Timer::at(deadline), dimmer.transition_wake.wait()).await;
            }
            None => dimmer.transition_wake.wait().await,
        }
    }
}
