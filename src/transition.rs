//! Level ramps, stepped from task context.
//!
//! Each channel owns at most one transition: a new request replaces the
//! previous one. Stepping is deadline driven in the same way as a frame
//! scheduler: [`TransitionEngine::service`] applies every due step and
//! returns when it wants to run again, the caller sleeps until then.

use embassy_time::{Duration, Instant};

use crate::channel::ChannelHandle;

/// Default duration under which a transition is applied at once.
pub const DEFAULT_IMMEDIATE_BELOW: Duration = Duration::from_millis(50);

/// Default lower bound between two steps (one 50 Hz cycle).
pub const DEFAULT_MIN_STEP: Duration = Duration::from_millis(20);

/// Pacing of level transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionTimings {
    /// Requests shorter than this skip the ramp.
    pub immediate_below: Duration,
    /// Minimum interval between two unit steps.
    pub min_step: Duration,
}

impl Default for TransitionTimings {
    fn default() -> Self {
        Self {
            immediate_below: DEFAULT_IMMEDIATE_BELOW,
            min_step: DEFAULT_MIN_STEP,
        }
    }
}

/// A requested ramp from `start` to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRequest {
    pub channel: ChannelHandle,
    pub start: u8,
    pub target: u8,
    pub duration: Duration,
    pub step_interval: Duration,
}

impl TransitionRequest {
    /// Spread `duration` over the unit steps between `start` and `target`,
    /// never stepping faster than `timings.min_step`.
    pub fn new(
        channel: ChannelHandle,
        start: u8,
        target: u8,
        duration: Duration,
        timings: &TransitionTimings,
    ) -> Self {
        let steps = u64::from(start.abs_diff(target)).max(1);
        let per_step = Duration::from_ticks(duration.as_ticks() / steps);
        Self {
            channel,
            start,
            target,
            duration,
            step_interval: per_step.max(timings.min_step),
        }
    }

    pub const fn steps(&self) -> u8 {
        self.start.abs_diff(self.target)
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveTransition {
    channel: ChannelHandle,
    current: u8,
    target: u8,
    step_interval: Duration,
    next_step: Instant,
}

impl ActiveTransition {
    fn advance(&mut self) -> u8 {
        if self.current < self.target {
            self.current += 1;
        } else if self.current > self.target {
            self.current -= 1;
        }
        self.current
    }

    fn is_done(&self) -> bool {
        self.current == self.target
    }
}

fn step_after(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval).unwrap_or(Instant::MAX)
}

/// Transition slots, one per channel index.
pub struct TransitionEngine<const CHANNELS: usize> {
    slots: [Option<ActiveTransition>; CHANNELS],
}

impl<const CHANNELS: usize> Default for TransitionEngine<CHANNELS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CHANNELS: usize> TransitionEngine<CHANNELS> {
    pub const fn new() -> Self {
        Self {
            slots: [None; CHANNELS],
        }
    }

    /// Start `request` at `now`, replacing whatever ran on that channel.
    ///
    /// The first step happens one interval after `now`. A deadline beyond
    /// the clock range saturates to [`Instant::MAX`].
    pub fn start(&mut self, request: &TransitionRequest, now: Instant) {
        let Some(slot) = self.slots.get_mut(request.channel.index()) else {
            return;
        };
        *slot = (request.steps() > 0).then(|| ActiveTransition {
            channel: request.channel,
            current: request.start,
            target: request.target,
            step_interval: request.step_interval,
            next_step: step_after(now, request.step_interval),
        });
    }

    /// Drop the transition running on `channel`, if any.
    pub fn cancel(&mut self, channel: ChannelHandle) {
        if let Some(slot) = self.slots.get_mut(channel.index()) {
            if slot.is_some_and(|active| active.channel == channel) {
                *slot = None;
            }
        }
    }

    pub fn cancel_all(&mut self) {
        self.slots = [None; CHANNELS];
    }

    pub fn is_running(&self, channel: ChannelHandle) -> bool {
        self.slots
            .get(channel.index())
            .is_some_and(|slot| slot.is_some_and(|active| active.channel == channel))
    }

    /// Earliest pending step, if any transition is running.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|active| active.next_step).min()
    }

    /// Apply every step due at `now` through `apply` and return the next
    /// deadline.
    ///
    /// A step that is late is applied once; the following deadline is taken
    /// from `now` so a stalled caller does not replay a burst of steps.
    /// `apply` returns false if the channel is gone, which ends the
    /// transition. The last step always writes the exact target.
    pub fn service(
        &mut self,
        now: Instant,
        mut apply: impl FnMut(ChannelHandle, u8) -> bool,
    ) -> Option<Instant> {
        for slot in &mut self.slots {
            let Some(active) = slot else {
                continue;
            };
            if active.next_step > now {
                continue;
            }

            let level = active.advance();
            let done = active.is_done();
            let alive = apply(active.channel, if done { active.target } else { level });

            if done || !alive {
                *slot = None;
            } else {
                active.next_step = step_after(now, active.step_interval);
            }
        }

        self.next_deadline()
    }
}
