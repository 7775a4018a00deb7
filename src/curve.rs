//! Brightness curves and the level → trigger delay conversion.
//!
//! Curves are precomputed once into [`CurveTable`], so the interrupt path only
//! does a table lookup and integer math.

use core::f32::consts::PI;

use crate::error::{DimmerError, Result};

/// Number of entries per curve (levels 0..=100).
pub const LEVELS: usize = 101;

/// Highest brightness level.
pub const LEVEL_MAX: u8 = 100;

/// Earliest safe trigger point after a zero-cross, in microseconds.
pub const MIN_DELAY_US: u32 = 50;

/// Width of the TRIAC gate pulse, in microseconds.
pub const PULSE_WIDTH_US: u32 = 50;

const CURVE_NAME_LINEAR: &str = "linear";
const CURVE_NAME_RMS: &str = "rms";
const CURVE_NAME_LOGARITHMIC: &str = "logarithmic";
const CURVE_NAME_CUSTOM: &str = "custom";

const CURVE_ID_LINEAR: u8 = 0;
const CURVE_ID_RMS: u8 = 1;
const CURVE_ID_LOGARITHMIC: u8 = 2;
const CURVE_ID_CUSTOM: u8 = 3;

/// Mapping from requested brightness to trigger delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Curve {
    /// Delay falls linearly with level.
    #[default]
    Linear = CURVE_ID_LINEAR,
    /// Delivered power follows level (resistive loads).
    Rms = CURVE_ID_RMS,
    /// Perceptual compensation for LED loads.
    Logarithmic = CURVE_ID_LOGARITHMIC,
    /// Caller-supplied table installed at init.
    Custom = CURVE_ID_CUSTOM,
}

impl Curve {
    pub fn from_raw(value: u8) -> Option<Self> {
        Some(match value {
            CURVE_ID_LINEAR => Self::Linear,
            CURVE_ID_RMS => Self::Rms,
            CURVE_ID_LOGARITHMIC => Self::Logarithmic,
            CURVE_ID_CUSTOM => Self::Custom,
            _ => return None,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => CURVE_NAME_LINEAR,
            Self::Rms => CURVE_NAME_RMS,
            Self::Logarithmic => CURVE_NAME_LOGARITHMIC,
            Self::Custom => CURVE_NAME_CUSTOM,
        }
    }

    pub fn parse_from_str(s: &str) -> Option<Self> {
        match s {
            CURVE_NAME_LINEAR => Some(Self::Linear),
            CURVE_NAME_RMS => Some(Self::Rms),
            CURVE_NAME_LOGARITHMIC => Some(Self::Logarithmic),
            CURVE_NAME_CUSTOM => Some(Self::Custom),
            _ => None,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Precomputed delay percentages (0-100 of the half-cycle) per curve and level.
#[derive(Debug, Clone)]
pub struct CurveTable {
    tables: [[u8; LEVELS]; 4],
    has_custom: bool,
}

impl CurveTable {
    /// Build the built-in curves and, optionally, install a custom one.
    ///
    /// A custom table must stay within 0..=100 and never increase with
    /// level, otherwise `InvalidArgument` is returned.
    pub fn new(custom: Option<&[u8; LEVELS]>) -> Result<Self> {
        let linear = linear_table();
        let mut tables = [linear, rms_table(), logarithmic_table(), linear];

        if let Some(custom) = custom {
            validate_custom(custom)?;
            tables[Curve::Custom.index()] = *custom;
        }

        Ok(Self {
            tables,
            has_custom: custom.is_some(),
        })
    }

    /// Returns true if `curve` can be selected.
    pub const fn supports(&self, curve: Curve) -> bool {
        !matches!(curve, Curve::Custom) || self.has_custom
    }

    /// Delay percentage for `level` (clamped to 100) on `curve`.
    #[inline]
    pub fn delay_percent(&self, curve: Curve, level: u8) -> u8 {
        self.tables[curve.index()][usize::from(level.min(LEVEL_MAX))]
    }

    /// Convert a level into a trigger delay within a half-cycle.
    ///
    /// Full brightness maps to [`MIN_DELAY_US`], zero to the latest safe
    /// trigger `half_cycle_us - PULSE_WIDTH_US`. Everything in between is
    /// looked up and clamped into that window.
    #[inline]
    pub fn delay_us(&self, level: u8, half_cycle_us: u32, curve: Curve) -> u32 {
        let latest = half_cycle_us
            .saturating_sub(PULSE_WIDTH_US)
            .max(MIN_DELAY_US);

        if level >= LEVEL_MAX {
            return MIN_DELAY_US;
        }
        if level == 0 {
            return latest;
        }

        let percent = u32::from(self.delay_percent(curve, level));
        (half_cycle_us * percent / 100).clamp(MIN_DELAY_US, latest)
    }
}

fn linear_table() -> [u8; LEVELS] {
    let mut table = [0u8; LEVELS];
    for (level, entry) in (0u8..).zip(table.iter_mut()) {
        *entry = LEVEL_MAX - level;
    }
    table
}

/// Delay for which the conducted part of a sine half-wave carries `level`
/// percent of the full power: `acos(sqrt(level)) / pi`.
fn rms_table() -> [u8; LEVELS] {
    build_table(|normalized| libm::acosf(libm::sqrtf(normalized)) / PI)
}

/// `1 - log10(1 + 9 * level)`, close to linear for the eye on LED loads.
fn logarithmic_table() -> [u8; LEVELS] {
    build_table(|normalized| 1.0 - libm::log10f(1.0 + 9.0 * normalized))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn build_table(delay_fraction: impl Fn(f32) -> f32) -> [u8; LEVELS] {
    let mut table = [0u8; LEVELS];
    table[0] = LEVEL_MAX;

    for level in 1..LEVELS - 1 {
        let normalized = level as f32 / 100.0;
        let percent = libm::roundf(delay_fraction(normalized) * 100.0);
        table[level] = percent.clamp(0.0, 100.0) as u8;
    }

    table[LEVELS - 1] = 0;
    table
}

fn validate_custom(table: &[u8; LEVELS]) -> Result<()> {
    if table.iter().any(|&percent| percent > LEVEL_MAX) {
        return Err(DimmerError::InvalidArgument);
    }
    if table.windows(2).any(|pair| pair[1] > pair[0]) {
        return Err(DimmerError::InvalidArgument);
    }
    Ok(())
}
