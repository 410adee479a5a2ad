//! Deferred execution for recomputations.
//!
//! The engine never recomputes directly inside a change notification; it asks
//! a [`Scheduler`] to run the work on the next tick. Hosts with a frame or
//! message loop drive a [`TickScheduler`]; hosts without one use
//! [`Immediate`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

pub trait Scheduler {
    /// Run `task` on the next available tick.
    fn schedule(&self, task: Task);
}

/// Runs tasks inline, at schedule time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn schedule(&self, task: Task) {
        task();
    }
}

/// Queues tasks until the host calls [`TickScheduler::tick`].
///
/// Clones share one queue.
#[derive(Clone, Default)]
pub struct TickScheduler {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run the tasks queued before this call. Tasks scheduled while they run
    /// wait for the following tick. Returns the number of tasks run.
    pub fn tick(&self) -> usize {
        let due = std::mem::take(&mut *self.tasks.borrow_mut());
        let count = due.len();
        for task in due {
            task();
        }
        count
    }

    /// Tick until no task is pending or `max_ticks` is reached. Returns the
    /// number of ticks that ran at least one task.
    pub fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && self.tick() > 0 {
            ticks += 1;
        }
        ticks
    }
}

impl Scheduler for TickScheduler {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}
