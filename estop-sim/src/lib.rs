//! Host simulation of the estop coordination core.
//!
//! [`Simulation`] spawns the three tasks on a [`PriorityExecutor`], feeds them a scripted
//! [`SimBoard`] and moves a [`SimClock`] forward tick by tick.
//!
//! ```
//! use estop::{SharedContext, Timing};
//! use estop_sim::{Outcome, SimBoard, SimClock, Simulation};
//! use estop_time::{Duration, Instant};
//!
//! let ctx = SharedContext::new();
//! let clock = SimClock::new();
//! let board = SimBoard::new(&clock, 32_768);
//! board.schedule_trigger(Instant::from_ticks(300), true);
//! board.schedule_trigger(Instant::from_ticks(1_500), false);
//!
//! let mut sim = Simulation::new(&ctx, &clock, &board, Timing::DEFAULT);
//! assert_eq!(sim.run_for(Duration::millis(3_000)), Outcome::Completed);
//! assert_eq!(ctx.error_count(), 1);
//! ```

#![deny(missing_docs)]

pub mod board;
pub mod executor;
pub mod sim;

pub use board::{Event, EventKind, Halted, SimBoard};
pub use executor::PriorityExecutor;
pub use sim::{Outcome, Simulation};

/// The clock of a simulated system.
pub type SimClock = estop_time::TickMonotonic<16>;
