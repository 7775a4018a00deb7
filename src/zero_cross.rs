//! Zero-cross detectors, one per phase.

use embassy_time::Instant;
use heapless::Vec;

use crate::error::{DimmerError, Result};
use crate::frequency::{FrequencyEstimator, MainsFrequency};
use crate::hal::{DimmerGpio, PhaseId, PinId};

/// Receives zero-cross notifications.
///
/// Called synchronously from interrupt context on every edge, before any
/// channel is scheduled. Implementations must return quickly and must not
/// block, allocate or call back into the dimmer.
pub trait ZeroCrossObserver: Sync {
    fn on_zero_cross(&self, phase: PhaseId, timestamp: Instant);
}

/// State of one phase's zero-cross input.
pub struct ZeroCrossDetector<'a> {
    phase: PhaseId,
    pin: PinId,
    estimator: FrequencyEstimator,
    last_edge: Option<Instant>,
    observer: Option<&'a dyn ZeroCrossObserver>,
    active: bool,
}

impl<'a> ZeroCrossDetector<'a> {
    fn new(pin: PinId, phase: PhaseId, estimator: FrequencyEstimator) -> Self {
        Self {
            phase,
            pin,
            estimator,
            last_edge: None,
            observer: None,
            active: true,
        }
    }

    pub const fn phase(&self) -> PhaseId {
        self.phase
    }

    pub const fn pin(&self) -> PinId {
        self.pin
    }

    /// Measured frequency in Hz, 0 while unknown.
    pub fn frequency_hz(&self) -> u16 {
        self.estimator.frequency_hz()
    }

    pub fn half_cycle_us(&self) -> u32 {
        self.estimator.half_cycle_us()
    }

    pub const fn last_edge(&self) -> Option<Instant> {
        self.last_edge
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Handle one rising edge.
    ///
    /// Feeds the estimator while the frequency is unknown, then notifies the
    /// observer. Returns the standard if this edge completed classification.
    pub(crate) fn on_edge(&mut self, now: Instant) -> Option<MainsFrequency> {
        self.last_edge = Some(now);
        let classified = self.estimator.update(now);

        if let Some(observer) = self.observer {
            observer.on_zero_cross(self.phase, now);
        }

        classified
    }
}

/// Fixed-capacity set of zero-cross detectors.
///
/// `PHASES` is both the storage capacity and the exclusive upper bound of
/// valid phase ids. `limit` may lower the number of registrations further.
pub struct ZeroCrossRegistry<'a, const PHASES: usize> {
    detectors: Vec<ZeroCrossDetector<'a>, PHASES>,
    limit: usize,
}

impl<'a, const PHASES: usize> ZeroCrossRegistry<'a, PHASES> {
    pub const fn new(limit: usize) -> Self {
        Self {
            detectors: Vec::new(),
            limit,
        }
    }

    /// Register a detector and attach its rising-edge interrupt.
    ///
    /// `frequency_hint` of 50 or 60 fixes the frequency; 0 enables
    /// measurement. Any other value falls back to measurement as well.
    pub fn register<G: DimmerGpio>(
        &mut self,
        gpio: &mut G,
        pin: PinId,
        phase: PhaseId,
        frequency_hint: u16,
    ) -> Result<()> {
        if usize::from(phase) >= PHASES || !gpio.is_valid_pin(pin) {
            return Err(DimmerError::InvalidArgument);
        }
        if self.get(phase).is_some() {
            return Err(DimmerError::AlreadyExists);
        }
        if self.detectors.len() >= self.limit {
            return Err(DimmerError::ResourceExhausted);
        }
        if self.claims_pin(pin) {
            return Err(DimmerError::AlreadyExists);
        }

        let estimator = MainsFrequency::from_hz(frequency_hint)
            .map_or_else(FrequencyEstimator::new, FrequencyEstimator::with_known);

        gpio.attach_rising_edge(pin)?;

        let detector = ZeroCrossDetector::new(pin, phase, estimator);
        if self.detectors.push(detector).is_err() {
            gpio.detach_interrupt(pin);
            return Err(DimmerError::ResourceExhausted);
        }
        Ok(())
    }

    pub fn get(&self, phase: PhaseId) -> Option<&ZeroCrossDetector<'a>> {
        self.detectors.iter().find(|zc| zc.phase == phase)
    }

    pub fn get_mut(&mut self, phase: PhaseId) -> Option<&mut ZeroCrossDetector<'a>> {
        self.detectors.iter_mut().find(|zc| zc.phase == phase)
    }

    pub(crate) fn by_pin_mut(&mut self, pin: PinId) -> Option<&mut ZeroCrossDetector<'a>> {
        self.detectors.iter_mut().find(|zc| zc.pin == pin)
    }

    pub fn claims_pin(&self, pin: PinId) -> bool {
        self.detectors.iter().any(|zc| zc.pin == pin)
    }

    /// Half-cycle of `phase`, or the 50 Hz default if it is not registered.
    pub fn half_cycle_us(&self, phase: PhaseId) -> u32 {
        self.get(phase)
            .map_or(crate::frequency::DEFAULT_HALF_CYCLE_US, ZeroCrossDetector::half_cycle_us)
    }

    /// Measured frequency of `phase`, 0 if unknown or unregistered.
    pub fn frequency_hz(&self, phase: PhaseId) -> u16 {
        self.get(phase).map_or(0, ZeroCrossDetector::frequency_hz)
    }

    pub fn set_observer(
        &mut self,
        phase: PhaseId,
        observer: Option<&'a dyn ZeroCrossObserver>,
    ) -> Result<()> {
        let detector = self.get_mut(phase).ok_or(DimmerError::NotFound)?;
        detector.observer = observer;
        Ok(())
    }

    /// Restart frequency measurement on `phase`.
    pub fn reset_frequency(&mut self, phase: PhaseId) -> Result<()> {
        let detector = self.get_mut(phase).ok_or(DimmerError::NotFound)?;
        detector.estimator.reset();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Detach every interrupt and forget all detectors.
    pub fn clear<G: DimmerGpio>(&mut self, gpio: &mut G) {
        for detector in &mut self.detectors {
            detector.active = false;
            gpio.detach_interrupt(detector.pin);
            gpio.release(detector.pin);
        }
        self.detectors.clear();
    }
}
