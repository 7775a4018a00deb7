#![no_std]

pub mod channel;
pub mod curve;
pub mod dimmer;
pub mod error;
pub mod events;
pub mod frequency;
pub mod hal;
mod log;
pub mod pulse;
pub mod shared;
pub mod transition;
pub mod zero_cross;

pub use channel::{ChannelConfig, ChannelHandle, DimmerChannel};
pub use curve::{Curve, CurveTable, LEVEL_MAX, MIN_DELAY_US, PULSE_WIDTH_US};
pub use dimmer::{Dimmer, DimmerConfig};
pub use error::{DimmerError, Result};
pub use events::{EventQueue, EventReceiver, EventSender, ZeroCrossEvent};
pub use frequency::{FrequencyEstimator, MainsFrequency};
pub use hal::{DimmerGpio, HalError, PhaseId, PinId, PulseTimers, TimerEvent, TimerKind};
pub use pulse::PulseState;
pub use shared::{SharedDimmer, run_transitions};
pub use transition::{TransitionRequest, TransitionTimings};
pub use zero_cross::{ZeroCrossDetector, ZeroCrossObserver};

pub use embassy_time::{Duration, Instant};
