//! Fault and idle hooks, called synchronously by the runtime.
//!
//! None of these suspend. The allocation-failure hook therefore writes to the board directly
//! instead of going through the output guard.

use estop_time::{Instant, Monotonic};
use portable_atomic::{AtomicU32, AtomicU64, Ordering};

use crate::board::Board;
use crate::config::SAFE_INDICATOR;
use crate::system::System;

/// Idle-cycle bookkeeping of [`on_idle`].
pub(crate) struct IdleMonitor {
    cycles: AtomicU32,
    window_start: AtomicU64,
}

impl IdleMonitor {
    pub(crate) const fn new() -> Self {
        Self {
            cycles: AtomicU32::new(0),
            window_start: AtomicU64::new(0),
        }
    }
}

/// A task ran out of its resources (stack overflow or similar). Halts for good.
///
/// The system is marked halted and interrupts are masked before anything else, so no task can
/// overwrite the actuator afterwards. Then the actuator is forced to the safe indicator level and
/// the board is halted. There is no recovery.
pub fn on_resource_exhaustion<M: Monotonic, B: Board>(sys: System<'_, M, B>) -> ! {
    sys.ctx().mark_halted();
    sys.board().mask_interrupts();
    sys.board().set_actuator(SAFE_INDICATOR);
    sys.board().halt()
}

/// An allocation failed. Degrades into emergency mode.
///
/// Declares the emergency and counts an error; only a full emergency cycle of the emergency task
/// clears it again.
pub fn on_allocation_failure<M: Monotonic, B: Board>(sys: System<'_, M, B>) {
    sys.log_direct(format_args!("HOOK: Allocation failed!"));
    sys.log_direct(format_args!(
        "HOOK: Free memory: {} bytes",
        sys.board().free_memory_bytes()
    ));
    sys.log_direct(format_args!("HOOK: System entering minimal operation mode"));

    let ctx = sys.ctx();
    ctx.emergency().declare();
    ctx.errors().increment();
}

/// Called whenever no task is ready. Every `idle_window` calls it updates the CPU usage estimate.
pub fn on_idle<M: Monotonic, B: Board>(sys: System<'_, M, B>) {
    let idle = &sys.ctx().idle;
    let timing = sys.timing();

    let cycles = idle.cycles.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    if cycles < timing.idle_window.max(1) {
        return;
    }

    let now = sys.mono().now();
    let start = Instant::from_ticks(idle.window_start.swap(now.ticks(), Ordering::Relaxed));
    idle.cycles.store(0, Ordering::Relaxed);

    let elapsed_ms = now
        .checked_duration_since(start)
        .map_or(0, |elapsed| elapsed.to_millis());

    sys.ctx().set_cpu_usage_percent(cpu_usage_percent(
        cycles,
        elapsed_ms,
        timing.idle_cycles_per_ms_unloaded,
    ));
}

/// CPU usage in percent from `cycles` idle calls over `elapsed_ms`.
///
/// `unloaded_cycles_per_ms` is the idle rate of a system with nothing to do; reaching it means 0%.
pub fn cpu_usage_percent(cycles: u32, elapsed_ms: u64, unloaded_cycles_per_ms: u32) -> u8 {
    let per_ms = u64::from(cycles) / elapsed_ms.max(1);
    let idle_share = (per_ms * 100 / u64::from(unloaded_cycles_per_ms.max(1))).min(100);
    // idle_share <= 100
    (100 - idle_share) as u8
}
