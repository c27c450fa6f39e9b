//! Emergency-preemption coordination core.
//!
//! Three priority-ranked tasks share an actuator and a serial output channel through
//! [`ResourceGuard`](estop_sync::ResourceGuard)s:
//!
//! - [`emergency::run`] (Critical) watches the trigger and preempts everything else to run the
//!   emergency procedure,
//! - [`actuator::run`] (Normal) toggles the actuator, faster once errors were seen,
//! - [`monitor::run`] (Monitoring) samples free memory and reports system health.
//!
//! The fault hooks in [`hooks`] are called synchronously by the runtime.
//!
//! Everything runs against a [`System`]: the [`SharedContext`], a [`Monotonic`] clock and a
//! [`Board`]. The crate does not spawn anything itself; an RTIC-style runtime on target, or the
//! host executor of `estop-sim`, polls the task futures by priority.
//!
//! ```
//! use estop::{Board, SharedContext, System, Timing};
//! use estop_time::TickMonotonic;
//!
//! struct Nop;
//!
//! impl Board for Nop {
//!     fn set_actuator(&self, _on: bool) {}
//!     fn write_log(&self, _line: &str) {}
//!     fn trigger_asserted(&self) -> bool {
//!         false
//!     }
//!     fn free_memory_bytes(&self) -> u32 {
//!         0
//!     }
//!     fn mask_interrupts(&self) {}
//!     fn halt(&self) -> ! {
//!         panic!("halted")
//!     }
//! }
//!
//! static CTX: SharedContext = SharedContext::new();
//! static MONO: TickMonotonic<8> = TickMonotonic::new();
//! static BOARD: Nop = Nop;
//!
//! let sys = System::new(&CTX, &MONO, &BOARD, Timing::DEFAULT);
//! let _emergency = estop::emergency::run(sys);
//! let _actuator = estop::actuator::run(sys);
//! let _monitor = estop::monitor::run(sys);
//! ```

#![no_std]
#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod actuator;
mod board;
pub mod config;
pub mod context;
pub mod emergency;
pub mod hooks;
pub mod monitor;
mod system;
pub mod task;

pub use board::Board;
pub use config::Timing;
pub use context::{EmergencyPhase, SharedContext};
pub use system::{format_line, LogLine, OutputSession, System};
pub use task::{Priority, TaskId, TaskState};

pub use estop_time::Monotonic;
