//! The Critical task: watches the trigger and runs the emergency procedure.
//!
//! ```text
//! Idle -> Triggered -> Acting -> AwaitingRelease -> Cooling -> Idle
//! ```
//!
//! The emergency state is declared on entering `Triggered` and cleared at the end of `Cooling`,
//! after the trigger returned to rest and the debounce interval elapsed.

use estop_sync::{GuardError, Wait};
use estop_time::Monotonic;

use crate::board::Board;
use crate::context::EmergencyPhase;
use crate::system::System;
use crate::task::TaskId;

const ME: TaskId = TaskId::Emergency;

/// Detects rest-to-asserted transitions of a sampled level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    /// Start from `level`. Starting from rest makes a line asserted at boot count as an edge.
    pub const fn new(level: bool) -> Self {
        Self { last: level }
    }

    /// Feed a new sample; true on a rest-to-asserted transition.
    pub fn update(&mut self, level: bool) -> bool {
        let edge = level && !self.last;
        self.last = level;
        edge
    }
}

/// Entry point of the emergency task. Never returns.
pub async fn run<M: Monotonic, B: Board>(sys: System<'_, M, B>) {
    sys.output(ME)
        .await
        .line(format_args!("EMERGENCY: Task started - Critical priority"));

    let mut edge = EdgeDetector::new(false);

    loop {
        let level = sys.board().trigger_asserted();
        let latched = sys.ctx().take_trigger_latch();

        // Evaluate the detector even when latched so it tracks the line.
        if edge.update(level) | latched {
            respond(sys).await;

            // A line still asserted here needs a fresh edge to fire again.
            edge = EdgeDetector::new(sys.board().trigger_asserted());
        } else {
            sys.mono().delay(sys.timing().trigger_poll).await;
        }
    }
}

async fn respond<M: Monotonic, B: Board>(sys: System<'_, M, B>) {
    let ctx = sys.ctx();
    let timing = *sys.timing();

    ctx.set_emergency_phase(EmergencyPhase::Triggered);
    ctx.emergency().declare();
    let errors = ctx.errors().increment();

    {
        let out = sys.output(ME).await;
        out.line(format_args!("EMERGENCY: System entering safe mode"));
        out.line(format_args!("EMERGENCY: Total system errors: {errors}"));
    }

    ctx.set_emergency_phase(EmergencyPhase::Acting);
    let guard = ctx.actuator_guard();
    ctx.note_actuator_attempt(ME);
    match guard
        .acquire(sys.mono(), ME, Wait::Within(timing.emergency_actuator_timeout))
        .await
    {
        Ok(()) => {
            for _ in 0..timing.pulse_cycles {
                drive(sys, true);
                sys.mono().delay(timing.pulse_half_period).await;
                drive(sys, false);
                sys.mono().delay(timing.pulse_half_period).await;
            }
            let _ = guard.release(ME);

            // Only once the actuator is let go: never hold both guards.
            sys.output(ME)
                .await
                .line(format_args!("EMERGENCY: Pulse pattern complete"));
        }
        Err(GuardError::Busy) | Err(GuardError::NotOwner { .. }) => {
            sys.output(ME)
                .await
                .line(format_args!("EMERGENCY: Actuator busy - pulse pattern skipped"));
        }
    }

    ctx.set_emergency_phase(EmergencyPhase::AwaitingRelease);
    while sys.board().trigger_asserted() {
        sys.mono().delay(timing.release_poll).await;
    }
    sys.output(ME)
        .await
        .line(format_args!("EMERGENCY: Trigger released"));

    ctx.set_emergency_phase(EmergencyPhase::Cooling);
    sys.output(ME)
        .await
        .line(format_args!("EMERGENCY: Cooling down"));
    sys.mono().delay(timing.debounce).await;

    // Clear inside the session so nothing toggles before the line is out.
    let out = sys.output(ME).await;
    ctx.emergency().clear();
    out.line(format_args!("EMERGENCY: Emergency cleared - resuming normal operation"));
    drop(out);

    // Edges that arrived while handling this one belong to it.
    let _ = ctx.take_trigger_latch();
    ctx.set_emergency_phase(EmergencyPhase::Idle);
}

fn drive<M: Monotonic, B: Board>(sys: System<'_, M, B>, on: bool) {
    let guard = sys.ctx().actuator_guard();
    if guard.with(ME, |level| *level = on).is_ok() {
        sys.board().set_actuator(on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_on_rising_edge() {
        let mut edge = EdgeDetector::new(false);

        assert!(!edge.update(false));
        assert!(edge.update(true));
        // Held: no re-fire.
        assert!(!edge.update(true));
        assert!(!edge.update(false));
        assert!(edge.update(true));
    }

    #[test]
    fn starting_asserted_needs_a_fresh_edge() {
        let mut edge = EdgeDetector::new(true);

        assert!(!edge.update(true));
        assert!(!edge.update(false));
        assert!(edge.update(true));
    }
}
