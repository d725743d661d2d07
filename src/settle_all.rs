use std::{cell::RefCell, mem, rc::Rc};

use tracing::trace;

use crate::deferred::Reaction;
use crate::scheduler::Scheduler;
use crate::{Deferred, Error};

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Waits for every input cell to settle, successfully or not.
    ///
    /// The returned cell never rejects. It fulfills with one outcome per
    /// input, in the order the inputs settled rather than the order they were
    /// given. An empty input fulfills with an empty list.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_cell::{Deferred, TaskQueue};
    ///
    /// let queue = TaskQueue::new();
    /// let cells = vec![
    ///     Deferred::<i32, String>::fulfilled(&queue, 1),
    ///     Deferred::rejected(&queue, "nope".to_owned()),
    /// ];
    /// let all = Deferred::settle_all(&queue, cells);
    /// queue.run_until_idle();
    /// assert_eq!(all.value(), Some(vec![Ok(1), Err("nope".to_owned())]));
    /// ```
    pub fn settle_all<S, I>(scheduler: &S, cells: I) -> Deferred<Vec<Result<T, E>>, E>
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator<Item = Deferred<T, E>>,
    {
        let cells: Vec<_> = cells.into_iter().collect();
        let (resolve, _reject, all) = Deferred::pending(scheduler);
        let expected = cells.len();
        if expected == 0 {
            resolve.resolve(Vec::new());
            return all;
        }

        let results = Rc::new(RefCell::new(Vec::with_capacity(expected)));
        for cell in &cells {
            let record = {
                let results = results.clone();
                let resolve = resolve.clone();
                move |outcome: Result<T, E>| {
                    let mut results = results.borrow_mut();
                    results.push(outcome);
                    trace!(settled = results.len(), expected, "settle_all progress");
                    if results.len() == expected {
                        resolve.resolve(mem::take(&mut *results));
                    }
                }
            };
            let on_failure = record.clone();
            cell.register(Reaction {
                on_success: Box::new(move |value| record(Ok(value))),
                on_failure: Box::new(move |reason| on_failure(Err(reason))),
            });
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use crate::{Deferred, Error, TaskQueue};

    #[test]
    fn test_settle_all_empty_input() {
        let queue = TaskQueue::new();
        let all = Deferred::<i32, Error>::settle_all(&queue, Vec::new());
        assert_eq!(all.value(), Some(Vec::new()));
    }

    #[test]
    fn test_settle_all_waits_for_every_input() {
        let queue = TaskQueue::new();
        let (resolve, _, first) = Deferred::<i32, Error>::pending(&queue);
        let (_, reject, second) = Deferred::<i32, Error>::pending(&queue);
        let all = Deferred::settle_all(&queue, vec![first, second]);

        resolve.resolve(1);
        queue.run_until_idle();
        assert!(!all.is_settled());

        reject.reject(Error::ChainCycle);
        queue.run_until_idle();
        assert_eq!(all.value(), Some(vec![Ok(1), Err(Error::ChainCycle)]));
    }
}
