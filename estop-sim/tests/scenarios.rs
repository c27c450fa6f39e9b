//! Whole-system scenarios: all three tasks and the hooks on one simulated board.

use estop::{SharedContext, TaskId, TaskState, Timing};
use estop_sim::{Event, EventKind, Outcome, SimBoard, SimClock, Simulation};
use estop_time::{Duration, Instant};

fn at(ms: u64) -> Instant {
    Instant::from_ticks(ms)
}

fn logged(events: &[Event]) -> Vec<(u64, &str)> {
    events
        .iter()
        .filter_map(|event| match &event.kind {
            EventKind::Log(line) => Some((event.at.ticks(), line.as_str())),
            _ => None,
        })
        .collect()
}

fn actuator_changes(events: &[Event]) -> Vec<(u64, bool)> {
    events
        .iter()
        .filter_map(|event| match event.kind {
            EventKind::Actuator(on) => Some((event.at.ticks(), on)),
            _ => None,
        })
        .collect()
}

#[test]
fn emergency_mid_cycle_end_to_end() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);
    board.schedule_trigger(at(300), true);
    board.schedule_trigger(at(1_500), false);

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.run_until(at(300));
    assert!(ctx.emergency_active());
    let attempts = ctx.actuator_attempts(TaskId::Actuator);

    // Not a single attempt on the actuator guard while the emergency is declared.
    sim.run_until(at(1_999));
    assert!(ctx.emergency_active());
    assert_eq!(ctx.actuator_attempts(TaskId::Actuator), attempts);

    assert_eq!(sim.run_until(at(3_000)), Outcome::Completed);
    assert!(ctx.actuator_attempts(TaskId::Actuator) > attempts);
    assert_eq!(ctx.actuator_attempts(TaskId::Emergency), 1);

    let events = board.events();
    let log = logged(&events);

    let emergency: Vec<_> = log
        .iter()
        .filter(|(_, line)| line.starts_with("EMERGENCY:"))
        .copied()
        .collect();
    assert_eq!(
        emergency,
        [
            (0, "EMERGENCY: Task started - Critical priority"),
            (300, "EMERGENCY: System entering safe mode"),
            (300, "EMERGENCY: Total system errors: 1"),
            (1_300, "EMERGENCY: Pulse pattern complete"),
            (1_500, "EMERGENCY: Trigger released"),
            (1_500, "EMERGENCY: Cooling down"),
            (2_000, "EMERGENCY: Emergency cleared - resuming normal operation"),
        ]
    );

    // No toggling between declaration and clearing; it resumes right after.
    let toggles: Vec<_> = log
        .iter()
        .filter(|(_, line)| line.starts_with("ACTUATOR: Toggled"))
        .copied()
        .collect();
    assert!(toggles.iter().all(|(t, _)| *t < 300 || *t >= 2_000));

    let cleared = log
        .iter()
        .position(|(_, line)| line.starts_with("EMERGENCY: Emergency cleared"))
        .unwrap();
    let resumed = log
        .iter()
        .position(|(_, line)| *line == "ACTUATOR: Toggled (Rate: 250 ms, Errors: 1)")
        .unwrap();
    assert!(resumed > cleared);

    // During the emergency the actuator only shows the pulse pattern.
    let pulses: Vec<_> = actuator_changes(&events)
        .into_iter()
        .filter(|(t, _)| (300..2_000).contains(t))
        .collect();
    assert_eq!(pulses.len(), 20);
    assert_eq!(pulses[0], (300, true));
    assert_eq!(pulses[19], (1_250, false));

    assert_eq!(
        sim.emergency_trace(),
        [(at(0), false), (at(300), true), (at(2_000), false)]
    );
    assert_eq!(ctx.error_count(), 1);
    assert!(!ctx.actuator_guard().is_held());
    assert!(!ctx.output_guard().is_held());
}

#[test]
fn held_trigger_counts_once() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);
    board.schedule_trigger(at(100), true);

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.run_until(at(5_000));

    assert_eq!(ctx.error_count(), 1);
    assert!(ctx.emergency_active());
    assert_eq!(ctx.emergency_phase(), estop::EmergencyPhase::AwaitingRelease);

    // Release and assert again: a second edge.
    board.schedule_trigger(at(5_100), false);
    board.schedule_trigger(at(7_000), true);
    board.schedule_trigger(at(7_200), false);
    sim.run_until(at(10_000));

    assert_eq!(ctx.error_count(), 2);
    assert!(!ctx.emergency_active());
    assert_eq!(
        sim.emergency_trace(),
        [
            (at(0), false),
            (at(100), true),
            (at(5_600), false),
            (at(7_000), true),
            (at(8_500), false),
        ]
    );
}

#[test]
fn trigger_on_the_actuators_wake_tick() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);
    board.schedule_trigger(at(1_000), true);
    board.schedule_trigger(at(1_100), false);

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.run_until(at(3_000));

    let lines = board.log_lines();
    assert!(lines.iter().any(|l| l == "EMERGENCY: Pulse pattern complete"));
    assert!(!lines.iter().any(|l| l.contains("pulse pattern skipped")));
    assert!(!lines.iter().any(|l| l.contains("Resource busy")));
}

#[test]
fn toggle_period_follows_the_error_count() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);
    board.schedule_trigger(at(300), true);
    board.schedule_trigger(at(1_500), false);

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.schedule_allocation_failure(at(100));
    sim.schedule_allocation_failure(at(200));
    sim.run_until(at(3_000));

    assert_eq!(ctx.error_count(), 3);

    let events = board.events();
    let log = logged(&events);
    assert_eq!(
        log.iter()
            .filter(|(_, line)| line.starts_with("ACTUATOR: Toggled"))
            .copied()
            .collect::<Vec<_>>(),
        [
            (0, "ACTUATOR: Toggled (Rate: 1000 ms, Errors: 0)"),
            (2_000, "ACTUATOR: Toggled (Rate: 250 ms, Errors: 3)"),
            (2_250, "ACTUATOR: Toggled (Rate: 250 ms, Errors: 3)"),
            (2_500, "ACTUATOR: Toggled (Rate: 250 ms, Errors: 3)"),
            (2_750, "ACTUATOR: Toggled (Rate: 250 ms, Errors: 3)"),
            (3_000, "ACTUATOR: Toggled (Rate: 250 ms, Errors: 3)"),
        ]
    );

    let after: Vec<_> = actuator_changes(&events)
        .into_iter()
        .filter(|(t, _)| *t >= 2_000)
        .map(|(t, _)| t)
        .collect();
    assert_eq!(after, [2_000, 2_250, 2_500, 2_750, 3_000]);
}

#[test]
fn allocation_failures_degrade_until_an_emergency_cycle() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 4_096);

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.schedule_allocation_failure(at(1_000));
    sim.schedule_allocation_failure(at(2_000));
    assert_eq!(sim.run_until(at(2_900)), Outcome::Completed);

    assert!(ctx.emergency_active());
    assert_eq!(ctx.error_count(), 2);

    let events = board.events();
    let log = logged(&events);
    assert_eq!(
        log.iter()
            .filter(|(_, line)| line.starts_with("HOOK:"))
            .copied()
            .collect::<Vec<_>>(),
        [
            (1_000, "HOOK: Allocation failed!"),
            (1_000, "HOOK: Free memory: 4096 bytes"),
            (1_000, "HOOK: System entering minimal operation mode"),
            (2_000, "HOOK: Allocation failed!"),
            (2_000, "HOOK: Free memory: 4096 bytes"),
            (2_000, "HOOK: System entering minimal operation mode"),
        ]
    );
    assert!(!log
        .iter()
        .any(|(t, line)| *t >= 1_000 && line.starts_with("ACTUATOR: Toggled")));

    // Only a full trigger cycle clears the degraded mode.
    board.schedule_trigger(at(3_000), true);
    board.schedule_trigger(at(3_500), false);
    sim.run_until(at(5_000));

    assert!(!ctx.emergency_active());
    assert_eq!(ctx.error_count(), 3);
    assert_eq!(
        sim.emergency_trace(),
        [(at(0), false), (at(1_000), true), (at(4_500), false)]
    );
}

#[test]
fn resource_exhaustion_halts_everything() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.schedule_resource_exhaustion(at(2_500));

    assert_eq!(sim.run_until(at(10_000)), Outcome::Halted(at(2_500)));
    assert!(ctx.is_halted());
    assert!(board.actuator());

    // Interrupts go off before the safe indicator is driven.
    let events = board.events();
    assert_eq!(
        events[events.len() - 2..],
        [
            Event {
                at: at(2_500),
                kind: EventKind::InterruptsMasked
            },
            Event {
                at: at(2_500),
                kind: EventKind::Actuator(true)
            },
        ]
    );

    // Nothing runs any more.
    assert_eq!(sim.run_for(Duration::millis(5_000)), Outcome::Halted(at(2_500)));
    assert_eq!(board.events().len(), events.len());
}

#[test]
fn status_reports_flag_a_leak() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);
    board.set_leak(100, Duration::millis(10_000));

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.run_until(at(20_000));

    let events = board.events();
    let (cpu, monitor): (Vec<_>, Vec<_>) = logged(&events)
        .into_iter()
        .filter(|(_, line)| line.starts_with("MONITOR:"))
        .partition(|(_, line)| line.starts_with("MONITOR: CPU usage:"));

    // The estimate itself is covered by `cpu_usage_follows_the_polling_load`.
    assert_eq!(
        cpu.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
        [9_800, 19_800]
    );

    assert_eq!(
        monitor,
        [
            (0, "MONITOR: Task started - Monitoring priority"),
            (9_800, "MONITOR: === System Status Report ==="),
            (9_800, "MONITOR: Loop count: 50"),
            (9_800, "MONITOR: Free memory: 32768 bytes"),
            (9_800, "MONITOR: System errors: 0"),
            (9_800, "MONITOR: Emergency active: NO"),
            (19_800, "MONITOR: === System Status Report ==="),
            (19_800, "MONITOR: Loop count: 100"),
            (19_800, "MONITOR: Free memory: 32668 bytes"),
            (19_800, "MONITOR: System errors: 0"),
            (19_800, "MONITOR: Emergency active: NO"),
            (19_800, "MONITOR: WARNING - Possible memory leak detected!"),
        ]
    );
    // Sampled once more at 20 000 ms, after the second leak period.
    assert_eq!(ctx.free_memory_bytes(), 32_568);
}

fn cpu_usage_with_poll_cost(cycles: u32) -> u8 {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.set_poll_cost(cycles);
    sim.run_until(at(5_000));
    ctx.cpu_usage_percent()
}

#[test]
fn cpu_usage_follows_the_polling_load() {
    // Free polls leave the idle hook at its unloaded rate.
    assert_eq!(cpu_usage_with_poll_cost(0), 0);

    // A full tick per poll: the emergency task alone takes every tenth tick.
    let loaded = cpu_usage_with_poll_cost(200);
    assert!((5..=20).contains(&loaded), "{loaded}%");
}

#[test]
fn tasks_are_blocked_between_ticks() {
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, 32_768);

    for task in [TaskId::Emergency, TaskId::Actuator, TaskId::Monitor] {
        assert_eq!(ctx.tasks().state(task), TaskState::Created);
    }

    let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
    sim.run_until(at(500));

    for task in [TaskId::Emergency, TaskId::Actuator, TaskId::Monitor] {
        assert_eq!(ctx.tasks().state(task), TaskState::Blocked);
    }
}
