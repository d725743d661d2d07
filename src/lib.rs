//! Write-once deferred values with chained reactions.
//!
//! A [`Deferred`] is settled exactly once, to a value or to a reason, by a
//! producer that runs on a later scheduler turn. Consumers chain transforms
//! with [`Deferred::react`], [`Deferred::then`], [`Deferred::catch_failure`]
//! and [`Deferred::finally`]; each returns a new cell. A transform may
//! return another cell (or any [`Awaitable`]) and the chain flattens it.
//! [`Deferred::settle_all`] gathers many cells into one.
//!
//! Nothing runs synchronously: producers and reactions are queued on the
//! [`Scheduler`] the cell was created with. [`TaskQueue`] is a FIFO runner
//! for hosts that have no event loop.
//!
//! ```
//! use deferred_cell::{Deferred, Error, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let spawner = queue.clone();
//! let cell = Deferred::<i32, Error>::fulfilled(&queue, 1)
//!     .then(move |value| Deferred::<i32, Error>::fulfilled(&spawner, value + 1))
//!     .then(|value: i32| Err::<i32, _>(Error::ReactionPanicked(format!("bad {}", value))))
//!     .catch_failure(|_| Ok::<_, Error>(0));
//! queue.run_until_idle();
//! assert_eq!(cell.value(), Some(0));
//! ```
mod deferred;
mod error;
mod resolution;
pub mod scheduler;
mod settle_all;
mod waiter;

pub use deferred::{Deferred, OnFailure, OnSuccess, Reject, Resolve, State};
pub use error::Error;
pub use resolution::{Awaitable, CellId, Resolution};
pub use scheduler::{Scheduler, Task, TaskQueue};
pub use waiter::Waiter;
