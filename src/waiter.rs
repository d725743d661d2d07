use std::cell::RefCell;
use std::rc::Rc;
use std::{future::Future, pin::Pin, task::{Context, Poll, Waker}};

use crate::deferred::Reaction;
use crate::{Deferred, Error};

/// Future side of a cell, returned by [`Deferred::waiter`].
///
/// Resolves to the cell's outcome once its reactions drain, so the
/// scheduler still has to run for it to complete.
///
/// It resolves to [`Error::ProducerDropped`] only when the cell itself is
/// gone: every `Deferred` clone, `Resolve` and `Reject` dropped while still
/// pending. A producer that drops its entry points while a consumer still
/// holds the cell leaves the waiter pending, as the cell itself is.
///
/// # Examples
///
/// ```
/// use deferred_cell::{Deferred, Error, TaskQueue};
/// use futures::executor::block_on;
///
/// let queue = TaskQueue::new();
/// let cell = Deferred::<String, Error>::fulfilled(&queue, "🍓".into());
/// let waiter = cell.waiter();
/// queue.run_until_idle();
/// assert_eq!(block_on(waiter), Ok("🍓".to_owned()));
/// ```
#[derive(Debug)]
pub struct Waiter<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// Shared by both arms of the waiter's reaction. If it is dropped without
/// having delivered, the cell went away while still pending.
struct Notifier<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

impl<T, E> Notifier<T, E> {
    fn deliver(&self, outcome: Result<T, E>) {
        let waker = {
            let mut slot = self.slot.borrow_mut();
            slot.value = Some(outcome);
            std::mem::replace(&mut slot.waker, Err(WakerState::Tainted))
        };
        // Woken outside the borrow; a waker may poll right away.
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> Drop for Notifier<T, E> {
    fn drop(&mut self) {
        let waker = std::mem::replace(&mut self.slot.borrow_mut().waker, Err(WakerState::Tainted));
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Returns a future that completes with this cell's outcome.
    pub fn waiter(&self) -> Waiter<T, E> {
        let slot = Rc::new(RefCell::new(Slot {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let notifier = Rc::new(Notifier { slot: slot.clone() });
        let on_failure = notifier.clone();
        self.register(Reaction {
            on_success: Box::new(move |value| notifier.deliver(Ok(value))),
            on_failure: Box::new(move |reason| on_failure.deliver(Err(reason))),
        });
        Waiter { slot }
    }
}

impl<T, E> Future for Waiter<T, E>
where
    E: From<Error>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.value.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => match std::mem::replace(&mut slot.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => Poll::Ready(Err(Error::ProducerDropped.into())),
                _ => Poll::Pending,
            },
        }
    }
}
