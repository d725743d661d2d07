//! "Run this later, not now."
//!
//! Cells never call producers or reactions on the caller's stack. They hand
//! that work to a [`Scheduler`] supplied by the host. Hosts without an event
//! loop of their own can use [`TaskQueue`], a plain FIFO that is driven by
//! hand.
use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};

use tracing::debug;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Accepts tasks to run on a later turn, in the order they were enqueued.
pub trait Scheduler {
    fn enqueue(&self, task: Task);
}

/// Single-threaded FIFO task runner.
///
/// Clones share the same queue.
///
/// # Examples
///
/// ```
/// use deferred_cell::{Scheduler, TaskQueue};
/// use std::{cell::Cell, rc::Rc};
///
/// let queue = TaskQueue::new();
/// let hits = Rc::new(Cell::new(0));
/// let counter = hits.clone();
/// queue.enqueue(Box::new(move || counter.set(counter.get() + 1)));
/// assert_eq!(hits.get(), 0);
/// assert_eq!(queue.run_until_idle(), 1);
/// assert_eq!(hits.get(), 1);
/// ```
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs the oldest queued task. Returns `false` if there was none.
    pub fn run_once(&self) -> bool {
        // The borrow must end before the task runs; tasks enqueue more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones enqueued along the way, until the queue is
    /// empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        debug!(tasks = ran, "task queue idle");
        ran
    }
}

impl Scheduler for TaskQueue {
    fn enqueue(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.len())
            .finish()
    }
}
