//! Compile-time configuration of the coordination core.
//!
//! Every interval, count and calibration constant lives in [`Timing`]. The defaults reproduce the
//! reference firmware; a board with different needs builds its own value and hands it to
//! [`System::new`](crate::System::new).

use estop_time::Duration;

use crate::task::{Priority, TaskId};

/// Intervals, counts and calibration constants used by the tasks and hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How often the emergency task samples the trigger line while idle.
    pub trigger_poll: Duration,
    /// Bounded wait of the emergency task on the actuator guard.
    pub emergency_actuator_timeout: Duration,
    /// Half period of the emergency pulse pattern (on time, then off time).
    pub pulse_half_period: Duration,
    /// Number of on/off cycles in the emergency pulse pattern.
    pub pulse_cycles: u32,
    /// How often the emergency task checks whether the trigger returned to rest.
    pub release_poll: Duration,
    /// Settle time after trigger release before the emergency is cleared.
    pub debounce: Duration,

    /// How long the actuator task sleeps while an emergency is active.
    pub emergency_yield: Duration,
    /// Bounded wait of the actuator task on the actuator guard.
    pub actuator_timeout: Duration,
    /// Toggle period while no error was ever recorded.
    pub normal_period: Duration,
    /// Toggle period once at least one error was recorded.
    pub fast_period: Duration,

    /// Health monitor loop interval.
    pub monitor_interval: Duration,
    /// Health monitor loops between two status reports.
    pub report_every: u32,

    /// Idle cycles per utilization estimate.
    pub idle_window: u32,
    /// Idle cycles per millisecond observed on an unloaded system.
    ///
    /// This depends on the target, the clock and the runtime and must be calibrated per board.
    pub idle_cycles_per_ms_unloaded: u32,
}

impl Timing {
    /// The reference configuration.
    pub const DEFAULT: Self = Self {
        trigger_poll: Duration::millis(10),
        emergency_actuator_timeout: Duration::millis(100),
        pulse_half_period: Duration::millis(50),
        pulse_cycles: 10,
        release_poll: Duration::millis(50),
        debounce: Duration::millis(500),

        emergency_yield: Duration::millis(100),
        actuator_timeout: Duration::millis(1_000),
        normal_period: Duration::millis(1_000),
        fast_period: Duration::millis(250),

        monitor_interval: Duration::millis(200),
        report_every: 50,

        idle_window: 10_000,
        idle_cycles_per_ms_unloaded: 200,
    };
}

impl Default for Timing {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Actuator level shown by a system halted on a fatal fault.
pub const SAFE_INDICATOR: bool = true;

/// Capacity of one formatted log line; longer lines are truncated.
pub const LOG_LINE_CAPACITY: usize = 96;

/// Static attributes of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// Which task.
    pub id: TaskId,
    /// Name used in diagnostics.
    pub name: &'static str,
    /// Scheduling tier.
    pub priority: Priority,
    /// Stack budget in bytes.
    pub stack_bytes: usize,
}

/// Number of tasks in the system.
pub const TASK_COUNT: usize = 3;

/// The tasks of the system, highest priority first.
pub const TASKS: [TaskConfig; TASK_COUNT] = [
    TaskConfig {
        id: TaskId::Emergency,
        name: "emergency",
        priority: Priority::Critical,
        // Larger margin for the highest-priority task.
        stack_bytes: 1024,
    },
    TaskConfig {
        id: TaskId::Actuator,
        name: "actuator",
        priority: Priority::Normal,
        stack_bytes: 512,
    },
    TaskConfig {
        id: TaskId::Monitor,
        name: "monitor",
        priority: Priority::Monitoring,
        stack_bytes: 512,
    },
];
