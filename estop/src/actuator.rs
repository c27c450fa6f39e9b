//! The Normal task: toggles the actuator on a fixed period.
//!
//! The period shortens once any error was recorded. While an emergency is active the task stays
//! away from the actuator and only polls the emergency state.

use estop_sync::Wait;
use estop_time::{Duration, Instant, Monotonic};

use crate::board::Board;
use crate::config::Timing;
use crate::system::System;
use crate::task::TaskId;

const ME: TaskId = TaskId::Actuator;

/// Toggle period for the given error count: fast once any error was recorded.
pub fn toggle_period(timing: &Timing, errors: u32) -> Duration {
    if errors > 0 {
        timing.fast_period
    } else {
        timing.normal_period
    }
}

/// Next wake after `previous`, skipping missed periods instead of replaying them.
///
/// Without a previous wake, or when `previous + period` is not later than `now`, the schedule
/// restarts at `now`. The result is always strictly after `now`.
pub fn next_wake(previous: Option<Instant>, period: Duration, now: Instant) -> Instant {
    match previous {
        Some(previous) if previous + period > now => previous + period,
        _ => now + period,
    }
}

/// Entry point of the actuator task. Never returns.
pub async fn run<M: Monotonic, B: Board>(sys: System<'_, M, B>) {
    let ctx = sys.ctx();
    let mono = sys.mono();
    let timing = *sys.timing();
    let guard = ctx.actuator_guard();

    sys.output(ME)
        .await
        .line(format_args!("ACTUATOR: Task started - Normal priority"));

    let mut period = toggle_period(&timing, ctx.error_count());
    let mut previous = Some(mono.now());

    loop {
        if ctx.emergency_active() {
            mono.delay(timing.emergency_yield).await;
            previous = None;
            continue;
        }

        ctx.note_actuator_attempt(ME);
        match guard
            .acquire(mono, ME, Wait::Within(timing.actuator_timeout))
            .await
        {
            Ok(()) => {
                let errors = ctx.error_count();
                period = toggle_period(&timing, errors);

                if let Ok(level) = guard.with(ME, |level| {
                    *level = !*level;
                    *level
                }) {
                    sys.board().set_actuator(level);
                }
                let _ = guard.release(ME);

                sys.output(ME).await.line(format_args!(
                    "ACTUATOR: Toggled (Rate: {} ms, Errors: {})",
                    period.to_millis(),
                    errors
                ));
            }
            Err(_) => {
                sys.output(ME)
                    .await
                    .line(format_args!("ACTUATOR: Resource busy - guard timeout"));
            }
        }

        let wake = next_wake(previous, period, mono.now());
        previous = Some(wake);
        mono.delay_until(wake).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_ticks(ms)
    }

    #[test]
    fn period_depends_on_errors() {
        let timing = Timing::DEFAULT;

        assert_eq!(toggle_period(&timing, 0), Duration::millis(1_000));
        assert_eq!(toggle_period(&timing, 3), Duration::millis(250));
    }

    #[test]
    fn wakes_do_not_drift() {
        let period = Duration::millis(1_000);

        // Work inside the period does not push the schedule.
        assert_eq!(next_wake(Some(at(1_000)), period, at(1_007)), at(2_000));
        assert_eq!(next_wake(Some(at(2_000)), period, at(2_000)), at(3_000));
    }

    #[test]
    fn missed_periods_are_not_replayed() {
        let period = Duration::millis(250);

        assert_eq!(next_wake(Some(at(0)), period, at(1_300)), at(1_550));
        assert_eq!(next_wake(None, period, at(1_300)), at(1_550));
    }

    #[test]
    fn a_timeout_spanning_the_period_waits_a_full_period() {
        let period = Duration::millis(1_000);

        // Acquisition started at 0 and timed out at 1 000: no second attempt at 1 000.
        assert_eq!(next_wake(Some(at(0)), period, at(1_000)), at(2_000));
        assert!(next_wake(Some(at(0)), period, at(1_000)) > at(1_000));
    }
}
