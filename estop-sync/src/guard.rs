//! A binary, owner-tracking mutual-exclusion guard for a shared resource.
//!
//! Example usage:
//!
//! ```rust
//! use estop_sync::guard::{GuardError, ResourceGuard};
//!
//! #[derive(Clone, Copy, PartialEq, Debug)]
//! enum Task {
//!     Blinker,
//!     Logger,
//! }
//!
//! static LED: ResourceGuard<bool, Task> = ResourceGuard::new("led", false);
//!
//! async fn blink() {
//!     LED.lock(Task::Blinker).await;
//!     LED.with(Task::Blinker, |on| *on = !*on).unwrap();
//!     LED.release(Task::Blinker).unwrap();
//! }
//! assert_eq!(LED.release(Task::Logger), Err(GuardError::NotOwner { caller: Task::Logger, holder: None }));
//! ```
//!
//! Unlike a scoped lock the guard is released explicitly. It is not reentrant: a holder that
//! acquires it again waits on itself, forever when unbounded and until its timeout otherwise.

use core::cell::RefCell;
use core::fmt;
use core::future::poll_fn;
use core::task::{Poll, Waker};

use critical_section::Mutex;
use estop_time::{Duration, Monotonic};
use heapless::Vec;

/// Maximum number of tasks that can wait on one guard at the same time.
pub const MAX_WAITERS: usize = 4;

/// How long an acquisition may wait for the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Wait until the guard is free, however long that takes.
    Forever,
    /// Give up with [`GuardError::Busy`] once the duration elapsed.
    Within(Duration),
}

/// Failed guard operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum GuardError<O> {
    /// The guard was not obtained within the allowed wait.
    Busy,
    /// `caller` tried to release or access a guard it does not hold.
    NotOwner {
        /// The task that made the call.
        caller: O,
        /// The task actually holding the guard, if any.
        holder: Option<O>,
    },
}

impl<O: fmt::Debug> fmt::Display for GuardError<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::Busy => f.write_str("resource busy"),
            GuardError::NotOwner { caller, holder } => {
                write!(f, "{caller:?} does not hold the guard (holder: {holder:?})")
            }
        }
    }
}

struct State<O> {
    holder: Option<O>,
    waiters: Vec<Waker, MAX_WAITERS>,
}

impl<O> State<O> {
    fn park(&mut self, waker: &Waker) {
        if self.waiters.iter().any(|w| w.will_wake(waker)) {
            return;
        }

        if self.waiters.push(waker.clone()).is_err() {
            // No room to park, come back on the next poll.
            waker.wake_by_ref();
        }
    }
}

/// Mutual exclusion over a resource of type `T`, held by at most one owner `O` at a time.
///
/// On release every parked waiter is woken; which one wins is decided by the order in which the
/// executor polls them, so under a priority-ordered executor the highest-priority waiter gets the
/// guard first.
pub struct ResourceGuard<T, O> {
    name: &'static str,
    state: Mutex<RefCell<State<O>>>,
    resource: Mutex<RefCell<T>>,
}

impl<T, O: Copy + PartialEq> ResourceGuard<T, O> {
    /// Create a free guard around `resource`.
    pub const fn new(name: &'static str, resource: T) -> Self {
        Self {
            name,
            state: Mutex::new(RefCell::new(State {
                holder: None,
                waiters: Vec::new(),
            })),
            resource: Mutex::new(RefCell::new(resource)),
        }
    }

    /// Name given at construction, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<O> {
        critical_section::with(|cs| self.state.borrow_ref(cs).holder)
    }

    /// True if somebody holds the guard.
    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Take the guard if it is free, without waiting.
    pub fn try_acquire(&self, owner: O) -> Result<(), GuardError<O>> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.holder.is_none() {
                state.holder = Some(owner);
                Ok(())
            } else {
                Err(GuardError::Busy)
            }
        })
    }

    /// Wait for the guard without any bound.
    pub async fn lock(&self, owner: O) {
        poll_fn(|cx| {
            critical_section::with(|cs| {
                let mut state = self.state.borrow_ref_mut(cs);
                if state.holder.is_none() {
                    state.holder = Some(owner);
                    Poll::Ready(())
                } else {
                    state.park(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await
    }

    /// Acquire the guard, waiting according to `wait` on the clock `mono`.
    pub async fn acquire<M: Monotonic>(
        &self,
        mono: &M,
        owner: O,
        wait: Wait,
    ) -> Result<(), GuardError<O>> {
        match wait {
            Wait::Forever => {
                self.lock(owner).await;
                Ok(())
            }
            Wait::Within(timeout) => mono
                .timeout_after(timeout, self.lock(owner))
                .await
                .map_err(|_| GuardError::Busy),
        }
    }

    /// Give the guard back and wake every parked waiter.
    ///
    /// Releasing a guard held by somebody else (or by nobody) leaves the guard untouched and is
    /// reported as [`GuardError::NotOwner`]. With the `hardened` feature it panics instead.
    pub fn release(&self, owner: O) -> Result<(), GuardError<O>> {
        let waiters = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.holder != Some(owner) {
                return Err(GuardError::NotOwner {
                    caller: owner,
                    holder: state.holder,
                });
            }

            state.holder = None;
            Ok(core::mem::take(&mut state.waiters))
        });

        let waiters = match waiters {
            Ok(waiters) => waiters,
            Err(e) => {
                if cfg!(feature = "hardened") {
                    panic!("guard `{}` released by a task that does not hold it", self.name);
                }
                return Err(e);
            }
        };

        for waker in waiters {
            waker.wake();
        }

        Ok(())
    }

    /// Run `f` on the guarded resource. Only the holder may do this.
    ///
    /// `f` runs inside a critical section; keep it short.
    pub fn with<R>(&self, owner: O, f: impl FnOnce(&mut T) -> R) -> Result<R, GuardError<O>> {
        critical_section::with(|cs| {
            let holder = self.state.borrow_ref(cs).holder;
            if holder != Some(owner) {
                return Err(GuardError::NotOwner {
                    caller: owner,
                    holder,
                });
            }

            let mut resource = self.resource.borrow_ref_mut(cs);
            Ok(f(&mut *resource))
        })
    }
}
