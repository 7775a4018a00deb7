#![allow(dead_code)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use myrtio_phase_dimmer::{
    ChannelConfig, ChannelHandle, Dimmer, DimmerConfig, DimmerGpio, HalError, Instant, PhaseId,
    PinId, PulseTimers, TimerEvent,
};

pub const ZC_PIN: PinId = 4;
pub const PHASE: PhaseId = 0;

/// Simulated microsecond clock shared by the mocks.
#[derive(Clone, Default)]
pub struct Clock(Rc<Cell<u64>>);

impl Clock {
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn set(&self, us: u64) {
        self.0.set(us);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub pin: PinId,
    pub high: bool,
    pub at_us: u64,
}

pub struct MockGpio {
    clock: Clock,
    pub max_pin: PinId,
    pub levels: BTreeMap<PinId, bool>,
    pub history: Vec<Edge>,
    pub outputs: Vec<PinId>,
    pub attached: Vec<PinId>,
    pub released: Vec<PinId>,
    pub fail_output: bool,
    pub fail_attach: bool,
}

impl MockGpio {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            max_pin: 39,
            levels: BTreeMap::new(),
            history: Vec::new(),
            outputs: Vec::new(),
            attached: Vec::new(),
            released: Vec::new(),
            fail_output: false,
            fail_attach: false,
        }
    }

    pub fn level(&self, pin: PinId) -> bool {
        self.levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn rising_edges(&self, pin: PinId) -> Vec<u64> {
        self.edges(pin, true)
    }

    pub fn falling_edges(&self, pin: PinId) -> Vec<u64> {
        self.edges(pin, false)
    }

    fn edges(&self, pin: PinId, high: bool) -> Vec<u64> {
        self.history
            .iter()
            .filter(|edge| edge.pin == pin && edge.high == high)
            .map(|edge| edge.at_us)
            .collect()
    }
}

impl DimmerGpio for MockGpio {
    fn is_valid_pin(&self, pin: PinId) -> bool {
        pin <= self.max_pin
    }

    fn configure_output(&mut self, pin: PinId) -> Result<(), HalError> {
        if self.fail_output {
            return Err(HalError::Rejected);
        }
        self.outputs.push(pin);
        Ok(())
    }

    fn attach_rising_edge(&mut self, pin: PinId) -> Result<(), HalError> {
        if self.fail_attach {
            return Err(HalError::Rejected);
        }
        self.attached.push(pin);
        Ok(())
    }

    fn detach_interrupt(&mut self, pin: PinId) {
        self.attached.retain(|&attached| attached != pin);
    }

    fn release(&mut self, pin: PinId) {
        self.outputs.retain(|&output| output != pin);
        self.released.push(pin);
    }

    fn set_level(&mut self, pin: PinId, high: bool) {
        let previous = self.levels.insert(pin, high).unwrap_or(false);
        if previous != high {
            self.history.push(Edge {
                pin,
                high,
                at_us: self.clock.now(),
            });
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MockTimer {
    event: TimerEvent,
    deadline: Option<u64>,
    live: bool,
}

pub struct MockTimers {
    clock: Clock,
    timers: Vec<MockTimer>,
    pub capacity: usize,
    /// Zero-based index of the `create` call that should fail.
    pub fail_create_at: Option<usize>,
    pub attempts: usize,
    pub deleted: usize,
}

impl MockTimers {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            timers: Vec::new(),
            capacity: usize::MAX,
            fail_create_at: None,
            attempts: 0,
            deleted: 0,
        }
    }

    pub fn live(&self) -> usize {
        self.timers.len() - self.deleted
    }

    pub fn pending(&self) -> usize {
        self.timers
            .iter()
            .filter(|timer| timer.live && timer.deadline.is_some())
            .count()
    }

    /// Earliest armed timer expiring at or before `until_us`.
    pub fn next_due(&self, until_us: u64) -> Option<(usize, u64)> {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.live)
            .filter_map(|(id, timer)| timer.deadline.map(|deadline| (id, deadline)))
            .filter(|&(_, deadline)| deadline <= until_us)
            .min_by_key(|&(id, deadline)| (deadline, id))
    }

    /// Disarm `id` and return the event it reports.
    pub fn fire(&mut self, id: usize) -> TimerEvent {
        let timer = &mut self.timers[id];
        timer.deadline = None;
        timer.event
    }
}

impl PulseTimers for MockTimers {
    type Timer = usize;

    fn create(&mut self, event: TimerEvent) -> Result<usize, HalError> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.fail_create_at == Some(attempt) {
            return Err(HalError::Rejected);
        }
        if self.live() >= self.capacity {
            return Err(HalError::Exhausted);
        }
        self.timers.push(MockTimer {
            event,
            deadline: None,
            live: true,
        });
        Ok(self.timers.len() - 1)
    }

    fn start_once(&mut self, timer: usize, after_us: u32) {
        let now = self.clock.now();
        if let Some(timer) = self.timers.get_mut(timer) {
            timer.deadline = Some(now + u64::from(after_us));
        }
    }

    fn stop(&mut self, timer: usize) {
        if let Some(timer) = self.timers.get_mut(timer) {
            timer.deadline = None;
        }
    }

    fn delete(&mut self, timer: usize) {
        if let Some(timer) = self.timers.get_mut(timer) {
            if timer.live {
                timer.live = false;
                timer.deadline = None;
                self.deleted += 1;
            }
        }
    }
}

pub type MockDimmer<'a> = Dimmer<'a, MockGpio, MockTimers>;

/// Dimmer on mock hardware with a driveable clock.
pub struct Rig<'a> {
    pub clock: Clock,
    pub dimmer: MockDimmer<'a>,
}

impl<'a> Rig<'a> {
    pub fn new() -> Self {
        Self::with_config(&DimmerConfig::default())
    }

    pub fn with_config(config: &DimmerConfig) -> Self {
        let clock = Clock::default();
        let dimmer = Dimmer::new(
            MockGpio::new(clock.clone()),
            MockTimers::new(clock.clone()),
            config,
        )
        .expect("dimmer");
        Self { clock, dimmer }
    }

    /// Rig with phase 0 registered on [`ZC_PIN`].
    pub fn with_phase(frequency_hint: u16) -> Self {
        let mut rig = Self::new();
        rig.dimmer
            .register_zero_cross(ZC_PIN, PHASE, frequency_hint)
            .expect("register zero-cross");
        rig
    }

    pub fn channel(&mut self, pin: PinId, level: u8) -> ChannelHandle {
        self.dimmer
            .create_channel(&ChannelConfig::new(pin, PHASE).with_level(level))
            .expect("create channel")
    }

    /// Advance the clock to `t_us`, firing due timers in deadline order.
    pub fn run_until(&mut self, t_us: u64) {
        while let Some((id, deadline)) = self.dimmer.timers().next_due(t_us) {
            self.clock.set(deadline.max(self.clock.now()));
            let event = self.dimmer.timers_mut().fire(id);
            self.dimmer.on_timer(event);
        }
        self.clock.set(t_us.max(self.clock.now()));
    }

    /// Deliver a zero-cross edge on phase 0 at `t_us`.
    pub fn zero_cross(&mut self, t_us: u64) {
        self.run_until(t_us);
        self.dimmer.on_zero_cross(ZC_PIN, Instant::from_micros(t_us));
    }

    pub fn gpio(&self) -> &MockGpio {
        self.dimmer.gpio()
    }

    pub fn timers(&self) -> &MockTimers {
        self.dimmer.timers()
    }
}
