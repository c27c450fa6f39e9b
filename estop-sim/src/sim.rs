//! Drives the three tasks and the hooks against a [`SimBoard`] in simulated time.
//!
//! Time moves one tick at a time, like the SysTick driving [`SimClock`] on target. Within a
//! tick the executor runs every ready task, highest priority first; the rest of the tick is idle
//! time, reported to the idle hook at the calibrated unloaded rate minus what the polls used up.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use estop::{hooks, SharedContext, System, TaskId, Timing};
use estop_time::{Duration, Instant, Monotonic};

use crate::board::{Halted, SimBoard};
use crate::executor::PriorityExecutor;
use crate::SimClock;

/// Why [`Simulation::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The requested instant was reached.
    Completed,
    /// A fatal fault halted the system at this instant.
    Halted(Instant),
}

/// Idle cycles one task poll takes out of its tick unless set otherwise.
pub const DEFAULT_POLL_COST: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    AllocationFailure,
    ResourceExhaustion,
}

/// One simulated system.
pub struct Simulation<'a> {
    sys: System<'a, SimClock, SimBoard<'a>>,
    executor: PriorityExecutor<'a>,
    // Sorted by instant.
    faults: Vec<(Instant, Fault)>,
    emergency_trace: Vec<(Instant, bool)>,
    poll_cost: u32,
    polls_this_tick: u32,
}

impl<'a> Simulation<'a> {
    /// Spawn the emergency, actuator and monitor tasks on `ctx`, `clock` and `board`.
    pub fn new(
        ctx: &'a SharedContext,
        clock: &'a SimClock,
        board: &'a SimBoard<'a>,
        timing: Timing,
    ) -> Self {
        let sys = System::new(ctx, clock, board, timing);

        let mut executor = PriorityExecutor::new();
        executor.spawn(TaskId::Emergency, estop::emergency::run(sys));
        executor.spawn(TaskId::Actuator, estop::actuator::run(sys));
        executor.spawn(TaskId::Monitor, estop::monitor::run(sys));

        Self {
            sys,
            executor,
            faults: Vec::new(),
            emergency_trace: vec![(clock.now(), ctx.emergency_active())],
            poll_cost: DEFAULT_POLL_COST,
            polls_this_tick: 0,
        }
    }

    /// Charge `cycles` idle cycles for every task poll. Zero makes the tasks free.
    pub fn set_poll_cost(&mut self, cycles: u32) {
        self.poll_cost = cycles;
    }

    /// The system handle the tasks run against.
    pub fn system(&self) -> System<'a, SimClock, SimBoard<'a>> {
        self.sys
    }

    /// Current simulated time.
    pub fn now(&self) -> Instant {
        self.sys.mono().now()
    }

    /// Report an allocation failure at `at`.
    pub fn schedule_allocation_failure(&mut self, at: Instant) {
        self.schedule(at, Fault::AllocationFailure);
    }

    /// Report resource exhaustion at `at`.
    pub fn schedule_resource_exhaustion(&mut self, at: Instant) {
        self.schedule(at, Fault::ResourceExhaustion);
    }

    fn schedule(&mut self, at: Instant, fault: Fault) {
        let index = self.faults.partition_point(|(when, _)| *when <= at);
        self.faults.insert(index, (at, fault));
    }

    /// Every change of the emergency state, starting with the initial one.
    pub fn emergency_trace(&self) -> &[(Instant, bool)] {
        &self.emergency_trace
    }

    /// Run until `until` (inclusive of the work due at `until`) or until halted.
    pub fn run_until(&mut self, until: Instant) -> Outcome {
        loop {
            self.fire_due_faults();

            // Dispatching stops for good once halted.
            if self.sys.ctx().is_halted() {
                return Outcome::Halted(self.now());
            }

            self.run_ready();

            let now = self.now();
            if now >= until {
                return Outcome::Completed;
            }

            self.idle_for_one_tick();
            self.sys.mono().advance(Duration::millis(1));
        }
    }

    /// Run for `duration` from now.
    pub fn run_for(&mut self, duration: Duration) -> Outcome {
        let until = self.now() + duration;
        self.run_until(until)
    }

    fn run_ready(&mut self) {
        let ctx = self.sys.ctx();
        while let Some(task) = self.executor.poll_next(ctx.tasks()) {
            log::trace!("polled {task:?} at {} ms", self.now().ticks());
            self.polls_this_tick = self.polls_this_tick.saturating_add(1);
            self.trace_emergency();
        }
    }

    fn idle_for_one_tick(&mut self) {
        let busy = self.polls_this_tick.saturating_mul(self.poll_cost);
        self.polls_this_tick = 0;

        let idle = self.sys.timing().idle_cycles_per_ms_unloaded.saturating_sub(busy);
        for _ in 0..idle {
            hooks::on_idle(self.sys);
        }
    }

    fn fire_due_faults(&mut self) {
        let now = self.now();
        let due = self.faults.partition_point(|(at, _)| *at <= now);

        for (at, fault) in self.faults.drain(..due).collect::<Vec<_>>() {
            if self.sys.ctx().is_halted() {
                return;
            }

            match fault {
                Fault::AllocationFailure => {
                    log::debug!("allocation failure at {} ms", at.ticks());
                    hooks::on_allocation_failure(self.sys);
                    self.trace_emergency();
                }
                Fault::ResourceExhaustion => {
                    let sys = self.sys;
                    let halted = catch_unwind(AssertUnwindSafe(|| {
                        hooks::on_resource_exhaustion(sys)
                    }));
                    if let Err(payload) = halted {
                        if !payload.is::<Halted>() {
                            resume_unwind(payload);
                        }
                    }
                }
            }
        }
    }

    fn trace_emergency(&mut self) {
        let active = self.sys.ctx().emergency_active();
        if self.emergency_trace.last().map(|(_, was)| *was) != Some(active) {
            self.emergency_trace.push((self.now(), active));
        }
    }
}
