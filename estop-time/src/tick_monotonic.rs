//! A [`Monotonic`] advanced by software ticks.
//!
//! On target, [`TickMonotonic::on_tick`] is called from a periodic timer interrupt (SysTick at
//! [`TICK_HZ`](crate::TICK_HZ)). In a host simulation the clock is moved with
//! [`TickMonotonic::advance_to`], jumping straight to the next due timer.
//!
//! # Example
//!
//! ```
//! use estop_time::{Instant, Monotonic, TickMonotonic};
//!
//! static MONO: TickMonotonic<4> = TickMonotonic::new();
//!
//! // SysTick handler
//! fn on_systick() {
//!     MONO.on_tick();
//! }
//!
//! # on_systick();
//! assert_eq!(MONO.now(), Instant::from_ticks(1));
//! ```

use core::future::Future;
use core::pin::{pin, Pin};
use core::task::{Context, Poll};

use futures_util::future::{select, Either};
use portable_atomic::{AtomicU64, Ordering};

use crate::timer_queue::TimerQueue;
use crate::{Duration, Instant, Monotonic, TimeoutError};

/// A monotonic clock counting ticks, with room for `N` concurrently sleeping futures.
pub struct TickMonotonic<const N: usize> {
    ticks: AtomicU64,
    queue: TimerQueue<N>,
}

impl<const N: usize> Default for TickMonotonic<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TickMonotonic<N> {
    /// Create a clock at instant zero.
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            queue: TimerQueue::new(),
        }
    }

    /// Advance by one tick and wake everything that became due.
    ///
    /// Call this in the interrupt handler of the periodic timer.
    pub fn on_tick(&self) -> usize {
        let now = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        self.queue.wake_expired(Instant::from_ticks(now))
    }

    /// Move the clock forward to `instant` and wake everything that became due.
    ///
    /// The clock never moves backwards; an instant in the past only expires due timers.
    pub fn advance_to(&self, instant: Instant) -> usize {
        self.ticks.fetch_max(instant.ticks(), Ordering::AcqRel);
        self.queue.wake_expired(self.now())
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) -> usize {
        self.advance_to(self.now() + duration)
    }

    /// The earliest instant at which a sleeping future is due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Number of futures currently sleeping on this clock.
    pub fn sleeping(&self) -> usize {
        self.queue.len()
    }
}

impl<const N: usize> Monotonic for TickMonotonic<N> {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.load(Ordering::Acquire))
    }

    async fn delay_until(&self, instant: Instant) {
        Delay::new(self, instant).await
    }

    async fn timeout_at<F: Future>(
        &self,
        instant: Instant,
        future: F,
    ) -> Result<F::Output, TimeoutError> {
        let future = pin!(future);

        match select(future, Delay::new(self, instant)).await {
            Either::Left((output, _)) => Ok(output),
            Either::Right(((), _)) => Err(TimeoutError),
        }
    }
}

/// Future returned by the delay operations of [`TickMonotonic`].
///
/// The timer entry is removed from the queue when the future is dropped before expiry.
pub struct Delay<'q, const N: usize> {
    clock: &'q TickMonotonic<N>,
    instant: Instant,
    handle: Option<u32>,
}

impl<'q, const N: usize> Delay<'q, N> {
    fn new(clock: &'q TickMonotonic<N>, instant: Instant) -> Self {
        Self {
            clock,
            instant,
            handle: None,
        }
    }
}

impl<const N: usize> Future for Delay<'_, N> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.clock.now() >= this.instant {
            return Poll::Ready(());
        }

        match this
            .clock
            .queue
            .register(this.handle, this.instant, cx.waker())
        {
            Some(handle) => this.handle = Some(handle),
            // Queue full: ask to be polled again instead of losing the wake-up.
            None => cx.waker().wake_by_ref(),
        }

        // The clock may have been advanced between the check and the registration.
        if this.clock.now() >= this.instant {
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

impl<const N: usize> Drop for Delay<'_, N> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.clock.queue.cancel(handle);
        }
    }
}
