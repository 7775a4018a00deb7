//! Error type shared by every dimmer entry point.

use core::fmt;

use crate::hal::HalError;

/// Errors returned by the dimmer API.
///
/// Every public operation reports failures through this type; none of them
/// panic on caller-supplied input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimmerError {
    /// Malformed pin, phase, curve or configuration value.
    InvalidArgument,
    /// Phase or channel handle is unknown (or the dimmer is not initialised).
    NotFound,
    /// Phase or pin is already registered.
    AlreadyExists,
    /// Phase, channel or timer capacity reached.
    ResourceExhausted,
    /// The GPIO or timer service rejected the configuration.
    HardwareInitFailed,
}

impl fmt::Display for DimmerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "phase or channel not found"),
            Self::AlreadyExists => write!(f, "phase or pin already registered"),
            Self::ResourceExhausted => write!(f, "capacity exhausted"),
            Self::HardwareInitFailed => write!(f, "hardware initialisation failed"),
        }
    }
}

impl core::error::Error for DimmerError {}

impl From<HalError> for DimmerError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::Rejected => Self::HardwareInitFailed,
            HalError::Exhausted => Self::ResourceExhausted,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = DimmerError> = core::result::Result<T, E>;
