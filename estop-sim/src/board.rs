//! A scripted [`Board`] recording everything the core does to it.

use estop::Board;
use estop_time::{Duration, Instant, Monotonic};
use parking_lot::Mutex;

use crate::SimClock;

/// Panic payload of [`SimBoard::halt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halted;

/// What happened on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A line written to the serial output.
    Log(String),
    /// The actuator was driven to a level.
    Actuator(bool),
    /// Interrupts were masked for good.
    InterruptsMasked,
}

/// A timestamped board event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// When it happened.
    pub at: Instant,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug)]
struct Leak {
    bytes: u32,
    every: Duration,
}

#[derive(Debug, Default)]
struct BoardState {
    actuator: bool,
    events: Vec<Event>,
    // Sorted by instant.
    trigger: Vec<(Instant, bool)>,
    free_memory: u32,
    leak: Option<Leak>,
}

/// Board whose inputs follow a script and whose outputs are recorded against `clock`.
pub struct SimBoard<'a> {
    clock: &'a SimClock,
    state: Mutex<BoardState>,
}

impl<'a> SimBoard<'a> {
    /// A board with `free_memory` bytes free and the trigger at rest.
    pub fn new(clock: &'a SimClock, free_memory: u32) -> Self {
        Self {
            clock,
            state: Mutex::new(BoardState {
                free_memory,
                ..BoardState::default()
            }),
        }
    }

    /// Set the trigger line to `asserted` from `at` on.
    pub fn schedule_trigger(&self, at: Instant, asserted: bool) {
        let mut state = self.state.lock();
        let index = state.trigger.partition_point(|(when, _)| *when <= at);
        state.trigger.insert(index, (at, asserted));
    }

    /// Lose `bytes` of free memory every `every`.
    pub fn set_leak(&self, bytes: u32, every: Duration) {
        self.state.lock().leak = Some(Leak { bytes, every });
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    /// The log lines written so far, in order.
    pub fn log_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::Log(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current actuator level.
    pub fn actuator(&self) -> bool {
        self.state.lock().actuator
    }

    fn record(&self, kind: EventKind) {
        let at = self.clock.now();
        self.state.lock().events.push(Event { at, kind });
    }
}

impl Board for SimBoard<'_> {
    fn set_actuator(&self, on: bool) {
        self.state.lock().actuator = on;
        self.record(EventKind::Actuator(on));
    }

    fn write_log(&self, line: &str) {
        log::trace!("{line}");
        self.record(EventKind::Log(line.to_owned()));
    }

    fn trigger_asserted(&self) -> bool {
        let now = self.clock.now();
        self.state
            .lock()
            .trigger
            .iter()
            .take_while(|(at, _)| *at <= now)
            .last()
            .map_or(false, |(_, asserted)| *asserted)
    }

    fn free_memory_bytes(&self) -> u32 {
        let now = self.clock.now();
        let state = self.state.lock();

        match &state.leak {
            Some(leak) if leak.every.ticks() > 0 => {
                let periods = now.ticks() / leak.every.ticks();
                let lost = periods.saturating_mul(u64::from(leak.bytes));
                let free = u64::from(state.free_memory).saturating_sub(lost);
                // free <= state.free_memory
                free as u32
            }
            _ => state.free_memory,
        }
    }

    fn mask_interrupts(&self) {
        self.record(EventKind::InterruptsMasked);
    }

    fn halt(&self) -> ! {
        log::error!("board halted at {} ms", self.clock.now().ticks());
        std::panic::panic_any(Halted)
    }
}
