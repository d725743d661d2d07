//! The deferred cell: a write-once outcome plus the reactions waiting on it.
//!
//! A cell starts pending and settles at most once, either to a value or to a
//! reason. Reactions registered with [`Deferred::react`] and friends each get
//! a fresh downstream cell, and run in registration order on a later
//! scheduler turn, whether they were registered before or after settlement.
use std::{
    cell::RefCell,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use tracing::{debug, trace, warn};

use crate::error::panic_message;
use crate::resolution::{Awaitable, CellId, Resolution};
use crate::scheduler::Scheduler;
use crate::Error;

/// Boxed success transform accepted by [`Deferred::react`].
pub type OnSuccess<T, U, E> = Box<dyn FnOnce(T) -> Resolution<U, E>>;
/// Boxed failure transform accepted by [`Deferred::react`].
pub type OnFailure<U, E> = Box<dyn FnOnce(E) -> Resolution<U, E>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// A chained reaction. Both arms already know their downstream cell.
pub(crate) struct Reaction<T, E> {
    pub(crate) on_success: Box<dyn FnOnce(T)>,
    pub(crate) on_failure: Box<dyn FnOnce(E)>,
}

struct FinallyReaction<T, E> {
    downstream: Deferred<T, E>,
    side_effect: Box<dyn FnOnce()>,
}

struct Inner<T, E> {
    /// `None` while pending.
    outcome: Option<Result<T, E>>,
    reactions: Vec<Reaction<T, E>>,
    finally: Vec<FinallyReaction<T, E>>,
    drain_scheduled: bool,
}

/// Handle to a deferred cell. Clones refer to the same cell.
///
/// # Examples
///
/// ```
/// use deferred_cell::{Deferred, Error, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let cell = Deferred::<i32, Error>::new(&queue, |resolve, _reject| resolve.resolve(20));
/// let doubled = cell.then(|value| Ok::<_, Error>(value * 2));
/// assert_eq!(doubled.value(), None);
/// queue.run_until_idle();
/// assert_eq!(doubled.value(), Some(40));
/// ```
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

/// Success entry point handed to producers.
pub struct Resolve<T, E> {
    cell: Deferred<T, E>,
}

/// Failure entry point handed to producers.
pub struct Reject<T, E> {
    cell: Deferred<T, E>,
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone() }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone() }
    }
}

impl<T, E> Resolve<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Settles the cell as a success. Ignored if it already settled.
    pub fn resolve(&self, value: T) {
        self.cell.settle(Ok(value));
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Settles the cell as a failure. Ignored if it already settled.
    pub fn reject(&self, reason: E) {
        self.cell.settle(Err(reason));
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a cell whose `producer` runs on a later turn of `scheduler`.
    ///
    /// A panic inside the producer rejects the cell with
    /// [`Error::ProducerPanicked`].
    pub fn new<S, F>(scheduler: &S, producer: F) -> Self
    where
        S: Scheduler + Clone + 'static,
        F: FnOnce(Resolve<T, E>, Reject<T, E>) + 'static,
    {
        Self::with_producer(Rc::new(scheduler.clone()), producer)
    }

    /// Creates a pending cell with no producer, along with its entry points.
    pub fn pending<S>(scheduler: &S) -> (Resolve<T, E>, Reject<T, E>, Self)
    where
        S: Scheduler + Clone + 'static,
    {
        let cell = Self::detached(Rc::new(scheduler.clone()));
        (
            Resolve { cell: cell.clone() },
            Reject { cell: cell.clone() },
            cell,
        )
    }

    /// A cell that fulfills with `value` on a later turn.
    pub fn fulfilled<S>(scheduler: &S, value: T) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::new(scheduler, move |resolve, _| resolve.resolve(value))
    }

    /// A cell that rejects with `reason` on a later turn.
    pub fn rejected<S>(scheduler: &S, reason: E) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::new(scheduler, move |_, reject| reject.reject(reason))
    }

    pub fn state(&self) -> State {
        match self.inner.borrow().outcome {
            None => State::Pending,
            Some(Ok(_)) => State::Fulfilled,
            Some(Err(_)) => State::Rejected,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }

    /// The fulfillment value, if the cell fulfilled.
    pub fn value(&self) -> Option<T> {
        match &self.inner.borrow().outcome {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if the cell rejected.
    pub fn reason(&self) -> Option<E> {
        match &self.inner.borrow().outcome {
            Some(Err(reason)) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Registers optional success and failure transforms and returns the
    /// cell that receives their result.
    ///
    /// A missing success transform passes the value through (converted with
    /// `Into`); a missing failure transform passes the reason through. A
    /// failure transform that returns normally recovers the chain. Use
    /// [`Deferred::react_with`] when the success transform changes the value
    /// type to one `T` does not convert into.
    pub fn react<U>(
        &self,
        on_success: Option<OnSuccess<T, U, E>>,
        on_failure: Option<OnFailure<U, E>>,
    ) -> Deferred<U, E>
    where
        T: Into<U>,
        U: Clone + 'static,
    {
        match on_success {
            Some(transform) => self.react_with(transform, on_failure),
            None => self.link(
                |value, downstream| downstream.settle(Ok(value.into())),
                move |reason, downstream| downstream.reject_or_recover(on_failure, reason),
            ),
        }
    }

    /// Like [`Deferred::react`] with a success transform always present, so
    /// no conversion from `T` to `U` is needed.
    pub fn react_with<U>(
        &self,
        on_success: OnSuccess<T, U, E>,
        on_failure: Option<OnFailure<U, E>>,
    ) -> Deferred<U, E>
    where
        U: Clone + 'static,
    {
        self.link(
            move |value, downstream| downstream.apply(on_success, value),
            move |reason, downstream| downstream.reject_or_recover(on_failure, reason),
        )
    }

    /// Success-only transform. Failures pass through untouched.
    pub fn then<U, F, R>(&self, on_success: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R + 'static,
        R: Into<Resolution<U, E>>,
    {
        self.link(
            move |value, downstream| downstream.apply(move |value| on_success(value).into(), value),
            |reason, downstream| downstream.settle(Err(reason)),
        )
    }

    /// Failure-only transform, `react(None, Some(on_failure))`.
    pub fn catch_failure<F, R>(&self, on_failure: F) -> Deferred<T, E>
    where
        F: FnOnce(E) -> R + 'static,
        R: Into<Resolution<T, E>>,
    {
        self.react(None, Some(Box::new(move |reason| on_failure(reason).into())))
    }

    /// Runs `side_effect` once the cell settles and returns a cell carrying
    /// the same outcome.
    ///
    /// On an already settled cell the side effect runs right away. A panic in
    /// the side effect rejects the returned cell with
    /// [`Error::ReactionPanicked`].
    pub fn finally<F>(&self, side_effect: F) -> Deferred<T, E>
    where
        F: FnOnce() + 'static,
    {
        let settled = self.inner.borrow().outcome.clone();
        match settled {
            Some(outcome) => {
                let outcome = run_side_effect(Box::new(side_effect), outcome);
                Self::with_producer(self.scheduler.clone(), move |resolve, reject| match outcome {
                    Ok(value) => resolve.resolve(value),
                    Err(reason) => reject.reject(reason),
                })
            }
            None => {
                let downstream = Self::detached(self.scheduler.clone());
                self.inner.borrow_mut().finally.push(FinallyReaction {
                    downstream: downstream.clone(),
                    side_effect: Box::new(side_effect),
                });
                downstream
            }
        }
    }

    pub(crate) fn id(&self) -> CellId {
        CellId(Rc::as_ptr(&self.inner) as *const () as usize)
    }

    pub(crate) fn register(&self, reaction: Reaction<T, E>) {
        self.inner.borrow_mut().reactions.push(reaction);
        self.schedule_drain();
    }

    pub(crate) fn settle(&self, outcome: Result<T, E>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                debug!(cell = ?self.id(), "ignoring settlement of a settled cell");
                return;
            }
            trace!(cell = ?self.id(), fulfilled = outcome.is_ok(), "cell settled");
            inner.outcome = Some(outcome);
        }
        self.schedule_drain();
    }

    fn detached(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                reactions: Vec::new(),
                finally: Vec::new(),
                drain_scheduled: false,
            })),
            scheduler,
        }
    }

    fn with_producer<F>(scheduler: Rc<dyn Scheduler>, producer: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) + 'static,
    {
        let cell = Self::detached(scheduler);
        let resolve = Resolve { cell: cell.clone() };
        let reject = Reject { cell: cell.clone() };
        cell.scheduler.enqueue(Box::new(move || {
            let fault = reject.cell.clone();
            let run = AssertUnwindSafe(move || producer(resolve, reject));
            if let Err(payload) = panic::catch_unwind(run) {
                let err = Error::ProducerPanicked(panic_message(&*payload));
                warn!(%err, "rejecting cell");
                fault.settle(Err(err.into()));
            }
        }));
        cell
    }

    /// Creates the downstream cell and registers a reaction feeding it.
    fn link<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T, &Deferred<U, E>) + 'static,
        F: FnOnce(E, &Deferred<U, E>) + 'static,
    {
        let downstream = Deferred::<U, E>::detached(self.scheduler.clone());
        let (ok, err) = (downstream.clone(), downstream.clone());
        self.register(Reaction {
            on_success: Box::new(move |value| on_success(value, &ok)),
            on_failure: Box::new(move |reason| on_failure(reason, &err)),
        });
        downstream
    }

    /// Runs a user transform and settles this cell with its result. A panic
    /// in the transform, or in subscribing to what it returned, rejects this
    /// cell instead.
    fn apply<A, F>(&self, transform: F, input: A)
    where
        F: FnOnce(A) -> Resolution<T, E>,
    {
        let run = AssertUnwindSafe(move || self.adopt(transform(input)));
        if let Err(payload) = panic::catch_unwind(run) {
            let err = Error::ReactionPanicked(panic_message(&*payload));
            warn!(%err, "rejecting downstream cell");
            self.settle(Err(err.into()));
        }
    }

    fn reject_or_recover(&self, on_failure: Option<OnFailure<T, E>>, reason: E) {
        match on_failure {
            Some(transform) => self.apply(transform, reason),
            None => self.settle(Err(reason)),
        }
    }

    fn adopt(&self, resolution: Resolution<T, E>) {
        match resolution {
            Resolution::Value(value) => self.settle(Ok(value)),
            Resolution::Fault(reason) => self.settle(Err(reason)),
            Resolution::Nested(nested) => {
                if nested.cell_id() == Some(self.id()) {
                    self.settle(Err(Error::ChainCycle.into()));
                    return;
                }
                let (ok, err) = (self.clone(), self.clone());
                nested.subscribe(
                    Box::new(move |value| ok.settle(Ok(value))),
                    Box::new(move |reason| err.settle(Err(reason))),
                );
            }
        }
    }

    /// Queues one drain task if the cell is settled and has work waiting.
    fn schedule_drain(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            let idle = inner.reactions.is_empty() && inner.finally.is_empty();
            if inner.outcome.is_none() || inner.drain_scheduled || idle {
                return;
            }
            inner.drain_scheduled = true;
        }
        let cell = self.clone();
        self.scheduler.enqueue(Box::new(move || cell.drain()));
    }

    fn drain(&self) {
        let (outcome, reactions, finally) = {
            let mut inner = self.inner.borrow_mut();
            inner.drain_scheduled = false;
            let Some(outcome) = inner.outcome.clone() else {
                return;
            };
            (
                outcome,
                mem::take(&mut inner.reactions),
                mem::take(&mut inner.finally),
            )
        };
        trace!(
            cell = ?self.id(),
            reactions = reactions.len(),
            finally = finally.len(),
            "draining"
        );
        for reaction in reactions {
            let Reaction { on_success, on_failure } = reaction;
            let run: Box<dyn FnOnce()> = match &outcome {
                Ok(value) => {
                    let value = value.clone();
                    Box::new(move || on_success(value))
                }
                Err(reason) => {
                    let reason = reason.clone();
                    Box::new(move || on_failure(reason))
                }
            };
            // One failing record must not strand the ones behind it.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(run)) {
                warn!(cell = ?self.id(), panic = %panic_message(&*payload), "reaction panicked during drain");
            }
        }
        for record in finally {
            let outcome = run_side_effect(record.side_effect, outcome.clone());
            record.downstream.settle(outcome);
        }
    }
}

/// Runs a finally side effect, swapping the outcome for a failure if it
/// panics.
fn run_side_effect<T, E>(side_effect: Box<dyn FnOnce()>, outcome: Result<T, E>) -> Result<T, E>
where
    E: From<Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(side_effect)) {
        Ok(()) => outcome,
        Err(payload) => {
            let err = Error::ReactionPanicked(panic_message(&*payload));
            warn!(%err, "finally side effect failed");
            Err(err.into())
        }
    }
}

impl<T, E> Awaitable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn subscribe(self: Box<Self>, on_success: Box<dyn FnOnce(T)>, on_failure: Box<dyn FnOnce(E)>) {
        self.register(Reaction { on_success, on_failure });
    }

    fn cell_id(&self) -> Option<CellId> {
        Some(self.id())
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.try_borrow() {
            Ok(inner) => match inner.outcome {
                None => "pending",
                Some(Ok(_)) => "fulfilled",
                Some(Err(_)) => "rejected",
            },
            Err(_) => "busy",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}
