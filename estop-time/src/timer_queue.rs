//! A fixed-capacity timer queue for async executors.

use core::cell::RefCell;
use core::task::Waker;

use critical_section::Mutex;
use heapless::Vec;
use portable_atomic::{AtomicU32, Ordering};

use crate::Instant;

/// Holds a waker and at which time instant this waker shall be awoken.
struct WaitingWaker {
    id: u32,
    release_at: Instant,
    waker: Waker,
}

/// A timer queue holding at most `N` sleeping futures.
///
/// # Blocking
///
/// The queue is protected by global critical sections, so registering or expiring a timer locks
/// the entire system for O(N) time. `N` is tiny in this system (one pending delay per task), so
/// the lock duration stays in the tens of clock cycles.
///
/// # Capacity
///
/// When the queue is full a new timer is not stored. The caller is told so and is expected to
/// re-poll (see `Delay` in [`crate::tick_monotonic`]), which turns an undersized queue into busy
/// polling rather than a lost wake-up.
pub struct TimerQueue<const N: usize> {
    waiters: Mutex<RefCell<Vec<WaitingWaker, N>>>,
    next_id: AtomicU32,
}

impl<const N: usize> Default for TimerQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TimerQueue<N> {
    /// Make a new queue.
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(RefCell::new(Vec::new())),
            next_id: AtomicU32::new(0),
        }
    }

    /// Store `waker` to be woken at `release_at`.
    ///
    /// `handle` is the value returned by a previous call for the same sleeper; if that entry is
    /// still queued only its waker is refreshed. Returns the handle of the entry, or `None` when
    /// the queue is full.
    pub fn register(&self, handle: Option<u32>, release_at: Instant, waker: &Waker) -> Option<u32> {
        critical_section::with(|cs| {
            let mut waiters = self.waiters.borrow_ref_mut(cs);

            if let Some(id) = handle {
                if let Some(entry) = waiters.iter_mut().find(|w| w.id == id) {
                    if !entry.waker.will_wake(waker) {
                        entry.waker = waker.clone();
                    }
                    return Some(id);
                }
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            waiters
                .push(WaitingWaker {
                    id,
                    release_at,
                    waker: waker.clone(),
                })
                .ok()
                .map(|()| id)
        })
    }

    /// Remove the entry with the given handle, if it is still queued.
    pub fn cancel(&self, handle: u32) {
        critical_section::with(|cs| {
            let mut waiters = self.waiters.borrow_ref_mut(cs);
            if let Some(pos) = waiters.iter().position(|w| w.id == handle) {
                waiters.swap_remove(pos);
            }
        })
    }

    /// Dequeue and wake every entry due at or before `now`. Returns how many were woken.
    ///
    /// Wakers are invoked outside of the critical section.
    pub fn wake_expired(&self, now: Instant) -> usize {
        let expired: Vec<Waker, N> = critical_section::with(|cs| {
            let mut waiters = self.waiters.borrow_ref_mut(cs);
            let mut expired = Vec::new();

            let mut i = 0;
            while i < waiters.len() {
                if waiters[i].release_at <= now {
                    let due = waiters.swap_remove(i);
                    // Cannot overflow, both vectors share the capacity `N`.
                    let _ = expired.push(due.waker);
                } else {
                    i += 1;
                }
            }

            expired
        });

        let count = expired.len();
        for waker in expired {
            waker.wake();
        }

        count
    }

    /// The earliest release instant in the queue.
    pub fn next_deadline(&self) -> Option<Instant> {
        critical_section::with(|cs| {
            self.waiters
                .borrow_ref(cs)
                .iter()
                .map(|w| w.release_at)
                .min()
        })
    }

    /// Number of queued timers.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.waiters.borrow_ref(cs).len())
    }

    /// True if no timer is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;

    use cooked_waker::{IntoWaker, WakeRef};

    #[derive(Debug, Default)]
    struct WakeCounter {
        count: AtomicUsize,
    }

    impl WakeRef for WakeCounter {
        fn wake_by_ref(&self) {
            self.count.fetch_add(1, StdOrdering::SeqCst);
        }
    }

    fn at(ticks: u64) -> Instant {
        Instant::from_ticks(ticks)
    }

    #[test]
    fn expires_in_deadline_order() {
        let queue: TimerQueue<4> = TimerQueue::new();
        let counter = Arc::new(WakeCounter::default());
        let waker = Arc::clone(&counter).into_waker();

        queue.register(None, at(30), &waker).unwrap();
        queue.register(None, at(10), &waker).unwrap();
        queue.register(None, at(20), &waker).unwrap();

        assert_eq!(queue.next_deadline(), Some(at(10)));
        assert_eq!(queue.wake_expired(at(9)), 0);
        assert_eq!(queue.wake_expired(at(20)), 2);
        assert_eq!(counter.count.load(StdOrdering::SeqCst), 2);
        assert_eq!(queue.next_deadline(), Some(at(30)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn refresh_keeps_a_single_entry() {
        let queue: TimerQueue<2> = TimerQueue::new();
        let waker = Arc::new(WakeCounter::default()).into_waker();

        let handle = queue.register(None, at(5), &waker);
        assert_eq!(queue.register(handle, at(5), &waker), handle);
        assert_eq!(queue.len(), 1);

        queue.cancel(handle.unwrap());
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn full_queue_rejects_new_timers() {
        let queue: TimerQueue<1> = TimerQueue::new();
        let waker = Arc::new(WakeCounter::default()).into_waker();

        assert!(queue.register(None, at(1), &waker).is_some());
        assert!(queue.register(None, at(2), &waker).is_none());
    }
}
