//! Mains frequency estimation from zero-cross timestamps.

use embassy_time::Instant;

/// Number of accepted half-cycles averaged before classifying.
pub const MEASURE_SAMPLES: u8 = 20;

/// Half-cycle assumed while the frequency is still unknown.
pub const DEFAULT_HALF_CYCLE_US: u32 = 10_000;

/// Intervals outside this open band are treated as glitches.
const PLAUSIBLE_MIN_US: u64 = 5_000;
const PLAUSIBLE_MAX_US: u64 = 15_000;

const BAND_50HZ_US: (u32, u32) = (9_000, 11_000);
const BAND_60HZ_US: (u32, u32) = (7_500, 9_166);

/// Supported mains standards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainsFrequency {
    Hz50,
    Hz60,
}

impl MainsFrequency {
    /// Map a caller hint to a standard. Anything but 50 or 60 is `None`.
    pub const fn from_hz(hz: u16) -> Option<Self> {
        match hz {
            50 => Some(Self::Hz50),
            60 => Some(Self::Hz60),
            _ => None,
        }
    }

    pub const fn hz(self) -> u16 {
        match self {
            Self::Hz50 => 50,
            Self::Hz60 => 60,
        }
    }

    /// Nominal half-cycle duration.
    pub const fn half_cycle_us(self) -> u32 {
        match self {
            Self::Hz50 => 10_000,
            Self::Hz60 => 8_333,
        }
    }

    fn classify(avg_half_cycle_us: u32) -> Option<Self> {
        let in_band = |(lo, hi): (u32, u32)| (lo..=hi).contains(&avg_half_cycle_us);
        if in_band(BAND_50HZ_US) {
            Some(Self::Hz50)
        } else if in_band(BAND_60HZ_US) {
            Some(Self::Hz60)
        } else {
            None
        }
    }
}

/// Rolling half-cycle averager for one phase.
///
/// Once classified the estimator is frozen until [`reset`](Self::reset).
/// An average outside both bands restarts sampling, so an unknown frequency
/// is a steady state rather than an error.
#[derive(Debug, Clone)]
pub struct FrequencyEstimator {
    last_edge: Option<Instant>,
    samples: u8,
    period_sum_us: u32,
    classified: Option<MainsFrequency>,
}

impl Default for FrequencyEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyEstimator {
    /// Create an estimator with no samples.
    pub const fn new() -> Self {
        Self {
            last_edge: None,
            samples: 0,
            period_sum_us: 0,
            classified: None,
        }
    }

    /// Create an estimator that is already frozen on `frequency`.
    pub const fn with_known(frequency: MainsFrequency) -> Self {
        Self {
            last_edge: None,
            samples: 0,
            period_sum_us: 0,
            classified: Some(frequency),
        }
    }

    /// Feed one zero-cross timestamp.
    ///
    /// Returns the standard on the edge that completes classification,
    /// `None` otherwise (including every edge after classification).
    pub fn update(&mut self, now: Instant) -> Option<MainsFrequency> {
        if self.classified.is_some() {
            return None;
        }

        let previous = self.last_edge.replace(now)?;
        let period_us = now.checked_duration_since(previous)?.as_micros();
        if period_us <= PLAUSIBLE_MIN_US || period_us >= PLAUSIBLE_MAX_US {
            return None;
        }

        // Bounded by PLAUSIBLE_MAX_US, and at most MEASURE_SAMPLES of them.
        #[allow(clippy::cast_possible_truncation)]
        let period_us = period_us as u32;
        self.period_sum_us += period_us;
        self.samples += 1;

        if self.samples < MEASURE_SAMPLES {
            return None;
        }

        let average = self.period_sum_us / u32::from(self.samples);
        self.samples = 0;
        self.period_sum_us = 0;
        self.classified = MainsFrequency::classify(average);
        self.classified
    }

    /// Measured frequency in Hz, 0 while unknown.
    pub fn frequency_hz(&self) -> u16 {
        self.classified.map_or(0, MainsFrequency::hz)
    }

    /// Classified standard, if any.
    pub const fn classified(&self) -> Option<MainsFrequency> {
        self.classified
    }

    /// Half-cycle to schedule against: nominal once classified, the 50 Hz
    /// default before.
    pub fn half_cycle_us(&self) -> u32 {
        self.classified
            .map_or(DEFAULT_HALF_CYCLE_US, MainsFrequency::half_cycle_us)
    }

    /// Accepted samples in the current measurement window.
    pub const fn sample_count(&self) -> u8 {
        self.samples
    }

    /// Drop the classification and every sample; measurement starts over.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
