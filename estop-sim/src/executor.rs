//! A priority-ordered executor for async tasks on the host.
//!
//! Every task has a pending flag that its waker sets. [`PriorityExecutor::poll_next`] polls the
//! highest-priority pending task once, so after every suspension the most urgent ready task runs
//! next, the way a fixed-priority preemptive scheduler would order them.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use cooked_waker::{IntoWaker, WakeRef};
use estop::task::TaskTable;
use estop::{Priority, TaskId, TaskState};

/// Set by a task's waker; cleared when the executor polls the task.
#[derive(Debug)]
struct PendFlag(AtomicBool);

impl PendFlag {
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl WakeRef for PendFlag {
    fn wake_by_ref(&self) {
        self.0.store(true, Ordering::Release);
    }
}

struct Slot<'a> {
    id: TaskId,
    priority: Priority,
    pending: Arc<PendFlag>,
    waker: Waker,
    future: Pin<Box<dyn Future<Output = ()> + 'a>>,
    finished: bool,
}

/// Polls spawned tasks in priority order.
#[derive(Default)]
pub struct PriorityExecutor<'a> {
    // Highest priority first.
    slots: Vec<Slot<'a>>,
}

impl<'a> PriorityExecutor<'a> {
    /// An executor with no tasks.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Add a task. It is pending, so it runs on the next [`poll_next`](Self::poll_next) that
    /// finds nothing more urgent.
    pub fn spawn(&mut self, id: TaskId, future: impl Future<Output = ()> + 'a) {
        let priority = id.config().priority;
        let pending = Arc::new(PendFlag(AtomicBool::new(true)));
        let waker = pending.clone().into_waker();

        // Equal priorities keep spawn order.
        let at = self
            .slots
            .iter()
            .position(|slot| slot.priority < priority)
            .unwrap_or(self.slots.len());

        self.slots.insert(
            at,
            Slot {
                id,
                priority,
                pending,
                waker,
                future: Box::pin(future),
                finished: false,
            },
        );
    }

    /// Poll the highest-priority pending task once and record its state in `tasks`.
    ///
    /// Returns the task that was polled, or `None` when no task is pending.
    pub fn poll_next(&mut self, tasks: &TaskTable) -> Option<TaskId> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| !slot.finished && slot.pending.take())?;

        tasks.set_state(slot.id, TaskState::Running);

        let mut cx = Context::from_waker(&slot.waker);
        match slot.future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                log::warn!("task {:?} returned", slot.id);
                slot.finished = true;
                tasks.set_state(slot.id, TaskState::Blocked);
            }
            Poll::Pending => {
                let state = if slot.pending.is_set() {
                    TaskState::Ready
                } else {
                    TaskState::Blocked
                };
                tasks.set_state(slot.id, state);
            }
        }

        Some(slot.id)
    }

    /// Poll until no task is pending. Returns the number of polls.
    pub fn run_ready(&mut self, tasks: &TaskTable) -> usize {
        let mut polls = 0;
        while self.poll_next(tasks).is_some() {
            polls += 1;
        }
        polls
    }

    /// True when no task is pending.
    pub fn is_idle(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.finished || !slot.pending.is_set())
    }

    /// Spawned tasks, highest priority first.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots.iter().map(|slot| slot.id)
    }
}
