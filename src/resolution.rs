use std::fmt;

use crate::{Deferred, Error};

/// Identity of a cell, used to catch a transform resolving the very cell
/// it is supposed to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(pub(crate) usize);

/// Anything a downstream cell can adopt the outcome of.
///
/// [`Deferred`] implements this; other deferred-value types can too, and
/// returning one from a transform flattens it into the chain.
pub trait Awaitable<T, E> {
    /// Registers the two continuations. Exactly one of them is expected to
    /// run, at most once.
    fn subscribe(self: Box<Self>, on_success: Box<dyn FnOnce(T)>, on_failure: Box<dyn FnOnce(E)>);

    fn cell_id(&self) -> Option<CellId> {
        None
    }
}

/// What a success or failure transform hands back to its downstream cell.
pub enum Resolution<T, E> {
    /// Settle downstream as a success.
    Value(T),
    /// Settle downstream as a failure.
    Fault(E),
    /// Settle downstream with whatever this settles to.
    Nested(Box<dyn Awaitable<T, E>>),
}

impl<T, E> From<Result<T, E>> for Resolution<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Resolution::Value(value),
            Err(reason) => Resolution::Fault(reason),
        }
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn from(cell: Deferred<T, E>) -> Self {
        Resolution::Nested(Box::new(cell))
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Fault(reason) => f.debug_tuple("Fault").field(reason).finish(),
            Resolution::Nested(nested) => f.debug_tuple("Nested").field(&nested.cell_id()).finish(),
        }
    }
}
