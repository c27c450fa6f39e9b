//! State shared by all tasks and hooks.
//!
//! There is one [`SharedContext`] per system, created before the tasks and handed to each of them
//! by reference. Apart from the two resource guards nothing in here is locked: every field is a
//! single word with one writing role, and readers tolerate stale values.
//!
//! | State              | Writers                                   | Readers                 |
//! |--------------------|-------------------------------------------|-------------------------|
//! | emergency state    | emergency task, allocation-failure hook   | actuator task, monitor  |
//! | error counter      | emergency task, allocation-failure hook   | actuator task, monitor  |
//! | emergency phase    | emergency task                            | diagnostics             |
//! | free memory        | health monitor                            | anyone                  |
//! | CPU usage          | idle hook                                 | health monitor          |
//! | halted             | resource-exhaustion hook                  | runtime                 |
//! | actuator attempts  | each task, for itself                     | diagnostics             |
//!
//! Writes are restricted to this crate; the public surface is read-only except for the inbound
//! trigger event.

use estop_sync::ResourceGuard;
use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::TASK_COUNT;
use crate::hooks::IdleMonitor;
use crate::task::{TaskId, TaskTable};

/// Whether the system is in emergency mode.
///
/// Only the emergency task clears it, after the trigger returned to rest and the debounce
/// interval elapsed.
pub struct EmergencyState {
    active: AtomicBool,
}

impl EmergencyState {
    const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// True while the emergency is declared.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn declare(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Number of emergencies (and allocation failures) seen since startup.
///
/// Never decremented or reset. Saturates at `u32::MAX`.
pub struct ErrorCounter {
    count: AtomicU32,
}

impl ErrorCounter {
    const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// Current count.
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Count one more error and return the new total.
    pub(crate) fn increment(&self) -> u32 {
        let previous = match self.count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            Some(c.saturating_add(1))
        }) {
            Ok(c) | Err(c) => c,
        };
        previous.saturating_add(1)
    }
}

/// Phase of the emergency task's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum EmergencyPhase {
    /// Watching the trigger.
    Idle = 0,
    /// Edge seen, declaring the emergency.
    Triggered = 1,
    /// Running the pulse pattern on the actuator.
    Acting = 2,
    /// Waiting for the trigger to return to rest.
    AwaitingRelease = 3,
    /// Debouncing before the emergency is cleared.
    Cooling = 4,
}

impl EmergencyPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EmergencyPhase::Triggered,
            2 => EmergencyPhase::Acting,
            3 => EmergencyPhase::AwaitingRelease,
            4 => EmergencyPhase::Cooling,
            _ => EmergencyPhase::Idle,
        }
    }
}

/// Process-wide state of the coordination core.
pub struct SharedContext {
    emergency: EmergencyState,
    errors: ErrorCounter,
    phase: AtomicU8,
    trigger_latch: AtomicBool,
    free_memory: AtomicU32,
    cpu_usage: AtomicU8,
    halted: AtomicBool,
    pub(crate) idle: IdleMonitor,
    tasks: TaskTable,
    actuator_attempts: [AtomicU32; TASK_COUNT],
    actuator: ResourceGuard<bool, TaskId>,
    output: ResourceGuard<(), TaskId>,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedContext {
    /// Startup state: no emergency, no errors, both guards free, actuator off.
    pub const fn new() -> Self {
        Self {
            emergency: EmergencyState::new(),
            errors: ErrorCounter::new(),
            phase: AtomicU8::new(EmergencyPhase::Idle as u8),
            trigger_latch: AtomicBool::new(false),
            free_memory: AtomicU32::new(0),
            cpu_usage: AtomicU8::new(0),
            halted: AtomicBool::new(false),
            idle: IdleMonitor::new(),
            tasks: TaskTable::new(),
            actuator_attempts: [const { AtomicU32::new(0) }; TASK_COUNT],
            actuator: ResourceGuard::new("actuator", false),
            output: ResourceGuard::new("output", ()),
        }
    }

    /// The emergency state.
    pub fn emergency(&self) -> &EmergencyState {
        &self.emergency
    }

    /// The error counter.
    pub fn errors(&self) -> &ErrorCounter {
        &self.errors
    }

    /// Shorthand for `emergency().is_active()`.
    pub fn emergency_active(&self) -> bool {
        self.emergency.is_active()
    }

    /// Shorthand for `errors().get()`.
    pub fn error_count(&self) -> u32 {
        self.errors.get()
    }

    /// Current phase of the emergency task.
    pub fn emergency_phase(&self) -> EmergencyPhase {
        EmergencyPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub(crate) fn set_emergency_phase(&self, phase: EmergencyPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    /// Inbound edge event from the trigger interrupt.
    ///
    /// The edge is latched and picked up by the emergency task on its next poll. Edges arriving
    /// while an emergency is being handled are discarded when it ends.
    pub fn on_emergency_trigger(&self) {
        self.trigger_latch.store(true, Ordering::Release);
    }

    pub(crate) fn take_trigger_latch(&self) -> bool {
        self.trigger_latch.swap(false, Ordering::AcqRel)
    }

    /// Free memory as last sampled by the health monitor.
    pub fn free_memory_bytes(&self) -> u32 {
        self.free_memory.load(Ordering::Relaxed)
    }

    pub(crate) fn record_free_memory(&self, bytes: u32) {
        self.free_memory.store(bytes, Ordering::Relaxed);
    }

    /// Last CPU utilization estimate, in percent.
    pub fn cpu_usage_percent(&self) -> u8 {
        self.cpu_usage.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cpu_usage_percent(&self, percent: u8) {
        self.cpu_usage.store(percent.min(100), Ordering::Relaxed);
    }

    /// True once a fatal fault halted the system. The runtime must stop dispatching tasks.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_halted(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Lifecycle state of the tasks.
    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Guard of the actuator. The guarded value is the last level driven by a guard holder.
    pub fn actuator_guard(&self) -> &ResourceGuard<bool, TaskId> {
        &self.actuator
    }

    /// Number of times `task` started acquiring the actuator guard, whatever the outcome.
    pub fn actuator_attempts(&self, task: TaskId) -> u32 {
        self.actuator_attempts[task.index()].load(Ordering::Relaxed)
    }

    pub(crate) fn note_actuator_attempt(&self, task: TaskId) {
        self.actuator_attempts[task.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Guard of the serial output channel.
    pub fn output_guard(&self) -> &ResourceGuard<(), TaskId> {
        &self.output
    }
}
