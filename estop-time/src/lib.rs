//! Time-related traits & structs.
//!
//! This crate contains the time base every task of the coordination core runs on: a
//! [`Monotonic`] clock with delays and timeouts, and a software-ticked implementation of it
//! ([`TickMonotonic`]) that can be driven from a periodic timer interrupt on target or stepped
//! manually in a host simulation.

#![no_std]
#![deny(missing_docs)]
#![allow(async_fn_in_trait)]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod tick_monotonic;
pub mod timer_queue;

pub use tick_monotonic::TickMonotonic;
pub use timer_queue::TimerQueue;

/// Re-export for users that build durations with `ExtU64`.
pub use fugit;

/// Tick rate of every clock in the core, in Hz. One tick is one millisecond.
pub const TICK_HZ: u32 = 1_000;

/// An instant on the core's time base.
pub type Instant = fugit::TimerInstantU64<TICK_HZ>;

/// A duration on the core's time base.
pub type Duration = fugit::TimerDurationU64<TICK_HZ>;

/// This indicates that there was a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TimeoutError;

impl core::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("deadline expired")
    }
}

/// # A monotonic clock / counter definition.
///
/// Unlike a free-standing hardware clock this trait is implemented on a value, so that several
/// independent clocks can coexist (one per simulated system in tests, for example).
///
/// ## Correctness
///
/// `now` must never go backwards. `delay_until` resolves once `now() >= instant`, and resolves
/// immediately when the instant already passed.
pub trait Monotonic {
    /// Get the current time.
    fn now(&self) -> Instant;

    /// Delay to some specific time instant.
    async fn delay_until(&self, instant: Instant);

    /// Timeout at a specific time.
    ///
    /// `future` is polled before the deadline is checked, so a future that completes at the
    /// deadline still counts as completed.
    async fn timeout_at<F: core::future::Future>(
        &self,
        instant: Instant,
        future: F,
    ) -> Result<F::Output, TimeoutError>;

    /// Delay for some duration of time.
    async fn delay(&self, duration: Duration) {
        let instant = self.now() + duration;
        self.delay_until(instant).await
    }

    /// Timeout after a specific duration.
    async fn timeout_after<F: core::future::Future>(
        &self,
        duration: Duration,
        future: F,
    ) -> Result<F::Output, TimeoutError> {
        let instant = self.now() + duration;
        self.timeout_at(instant, future).await
    }
}
