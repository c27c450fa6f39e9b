//! Task identities, priority tiers and lifecycle bookkeeping.

use portable_atomic::{AtomicU8, Ordering};

use crate::config::{TaskConfig, TASKS, TASK_COUNT};

/// Identity of a task; also the owner identity recorded by the resource guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TaskId {
    /// Reacts to the emergency trigger.
    Emergency,
    /// Periodically toggles the actuator.
    Actuator,
    /// Samples and reports system health.
    Monitor,
}

impl TaskId {
    /// Index into per-task tables.
    pub const fn index(self) -> usize {
        match self {
            TaskId::Emergency => 0,
            TaskId::Actuator => 1,
            TaskId::Monitor => 2,
        }
    }

    /// Static attributes of this task.
    pub const fn config(self) -> TaskConfig {
        TASKS[self.index()]
    }
}

/// Scheduling tier. Ordering follows urgency: `Critical > Normal > Monitoring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Priority {
    /// Lowest tier, background monitoring.
    Monitoring,
    /// Regular periodic work.
    Normal,
    /// Preempts everything else.
    Critical,
}

/// Lifecycle state of a task. No task terminates in normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskState {
    /// Registered, never run.
    Created = 0,
    /// Runnable, waiting for the executor.
    Ready = 1,
    /// Currently executing.
    Running = 2,
    /// Suspended on a delay or a guard.
    Blocked = 3,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TaskState::Ready,
            2 => TaskState::Running,
            3 => TaskState::Blocked,
            _ => TaskState::Created,
        }
    }
}

/// Live lifecycle state of every task, updated by the runtime that dispatches them.
pub struct TaskTable {
    states: [AtomicU8; TASK_COUNT],
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    /// All tasks in [`TaskState::Created`].
    pub const fn new() -> Self {
        Self {
            states: [const { AtomicU8::new(TaskState::Created as u8) }; TASK_COUNT],
        }
    }

    /// Current state of `task`.
    pub fn state(&self, task: TaskId) -> TaskState {
        TaskState::from_u8(self.states[task.index()].load(Ordering::Relaxed))
    }

    /// Record a state transition of `task`.
    pub fn set_state(&self, task: TaskId, state: TaskState) {
        self.states[task.index()].store(state as u8, Ordering::Relaxed);
    }
}
