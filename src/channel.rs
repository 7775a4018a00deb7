//! Dimmer output channels and their fixed-capacity arena.

use crate::curve::{Curve, CurveTable, LEVEL_MAX};
use crate::hal::{PhaseId, PinId};
use crate::pulse::{PulseSequencer, PulseState};

/// Opaque, generation-checked reference to a channel.
///
/// A handle stops resolving once its channel is deleted, even if the slot is
/// reused by a newer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    index: u8,
    generation: u16,
}

impl ChannelHandle {
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

/// Parameters for creating a channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Gate output pin.
    pub pin: PinId,
    /// Phase whose zero-crossings clock this channel.
    pub phase: PhaseId,
    /// Initial level, clamped to 0..=100.
    pub level: u8,
    pub curve: Curve,
}

impl ChannelConfig {
    pub const fn new(pin: PinId, phase: PhaseId) -> Self {
        Self {
            pin,
            phase,
            level: 0,
            curve: Curve::Linear,
        }
    }

    pub const fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub const fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }
}

/// One TRIAC output.
///
/// Level, curve and the active flag are written from task context; the delay
/// is recomputed there too, so interrupt context only reads `delay_us`.
#[derive(Debug)]
pub struct DimmerChannel<Tm: Copy> {
    phase: PhaseId,
    level: u8,
    curve: Curve,
    delay_us: u32,
    active: bool,
    needs_recompute: bool,
    pulse: PulseSequencer<Tm>,
}

impl<Tm: Copy> DimmerChannel<Tm> {
    pub(crate) fn new(config: &ChannelConfig, pulse: PulseSequencer<Tm>) -> Self {
        Self {
            phase: config.phase,
            level: config.level.min(LEVEL_MAX),
            curve: config.curve,
            delay_us: 0,
            active: true,
            needs_recompute: true,
            pulse,
        }
    }

    pub const fn pin(&self) -> PinId {
        self.pulse.pin()
    }

    pub const fn phase(&self) -> PhaseId {
        self.phase
    }

    pub const fn level(&self) -> u8 {
        self.level
    }

    pub const fn curve(&self) -> Curve {
        self.curve
    }

    pub const fn delay_us(&self) -> u32 {
        self.delay_us
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub const fn pulse_state(&self) -> PulseState {
        self.pulse.state()
    }

    pub(crate) fn pulse_mut(&mut self) -> &mut PulseSequencer<Tm> {
        &mut self.pulse
    }

    pub(crate) fn into_pulse(self) -> PulseSequencer<Tm> {
        self.pulse
    }

    /// Store a new level. The delay follows immediately if active.
    pub(crate) fn set_level(&mut self, level: u8, half_cycle_us: u32, curves: &CurveTable) {
        let level = level.min(LEVEL_MAX);
        if self.level == level {
            return;
        }
        self.level = level;
        self.needs_recompute = true;
        if self.active {
            self.recompute(half_cycle_us, curves);
        }
    }

    pub(crate) fn set_curve(&mut self, curve: Curve, half_cycle_us: u32, curves: &CurveTable) {
        if self.curve == curve {
            return;
        }
        self.curve = curve;
        self.needs_recompute = true;
        if self.active {
            self.recompute(half_cycle_us, curves);
        }
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
        self.needs_recompute = true;
    }

    /// Flag the delay as stale, e.g. after the half-cycle changed.
    pub(crate) fn invalidate(&mut self) {
        self.needs_recompute = true;
    }

    /// Recompute the delay if anything it depends on changed.
    pub(crate) fn recompute(&mut self, half_cycle_us: u32, curves: &CurveTable) {
        if !self.needs_recompute {
            return;
        }
        self.delay_us = curves.delay_us(self.level, half_cycle_us, self.curve);
        self.needs_recompute = false;
    }
}

struct Slot<Tm: Copy> {
    generation: u16,
    channel: Option<DimmerChannel<Tm>>,
}

impl<Tm: Copy> Slot<Tm> {
    fn is_retired(&self) -> bool {
        self.generation == u16::MAX
    }
}

/// Fixed-capacity channel storage handing out generation-checked handles.
///
/// Each deletion moves the slot's generation on. A slot whose generation
/// reaches `u16::MAX` is retired and never handed out again, so a stale
/// handle can not alias a newer channel. Retired slots count against the
/// capacity.
pub struct ChannelArena<Tm: Copy, const CHANNELS: usize> {
    slots: [Slot<Tm>; CHANNELS],
    len: usize,
    limit: usize,
}

impl<Tm: Copy, const CHANNELS: usize> ChannelArena<Tm, CHANNELS> {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                generation: 0,
                channel: None,
            }),
            len: 0,
            limit: limit.min(CHANNELS),
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    /// Handle the next inserted channel will get, if there is room.
    pub fn vacant(&self) -> Option<ChannelHandle> {
        if self.is_full() {
            return None;
        }
        let (index, slot) = self
            .slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.channel.is_none() && !slot.is_retired())?;
        Some(ChannelHandle {
            index: u8::try_from(index).ok()?,
            generation: slot.generation,
        })
    }

    /// Fill the slot reserved by [`vacant`](Self::vacant).
    ///
    /// Gives the channel back if the handle no longer designates a free slot.
    pub(crate) fn insert(
        &mut self,
        handle: ChannelHandle,
        channel: DimmerChannel<Tm>,
    ) -> Result<(), DimmerChannel<Tm>> {
        match self.slots.get_mut(handle.index()) {
            Some(slot) if slot.generation == handle.generation && slot.channel.is_none() => {
                slot.channel = Some(channel);
                self.len += 1;
                Ok(())
            }
            _ => Err(channel),
        }
    }

    /// Take the channel out of the arena.
    ///
    /// The slot's generation moves on, so `handle` and any copy of it stop
    /// resolving before the caller releases the channel's resources.
    pub(crate) fn remove(&mut self, handle: ChannelHandle) -> Option<DimmerChannel<Tm>> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let channel = slot.channel.take()?;
        slot.generation = slot.generation.saturating_add(1);
        self.len -= 1;
        Some(channel)
    }

    pub fn get(&self, handle: ChannelHandle) -> Option<&DimmerChannel<Tm>> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.channel.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: ChannelHandle) -> Option<&mut DimmerChannel<Tm>> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.channel.as_mut()
    }

    /// Handle of the live channel in the lowest slot.
    pub fn first_handle(&self) -> Option<ChannelHandle> {
        self.handles().next()
    }

    /// Handles of every live channel.
    pub fn handles(&self) -> impl Iterator<Item = ChannelHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.channel.as_ref()?;
            Some(ChannelHandle {
                index: u8::try_from(index).ok()?,
                generation: slot.generation,
            })
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DimmerChannel<Tm>> {
        self.slots.iter().filter_map(|slot| slot.channel.as_ref())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut DimmerChannel<Tm>> {
        self.slots.iter_mut().filter_map(|slot| slot.channel.as_mut())
    }

    /// Returns true if a live channel drives `pin`.
    pub fn claims_pin(&self, pin: PinId) -> bool {
        self.iter().any(|channel| channel.pin() == pin)
    }
}
