//! Completion cells and the `Waitable`/`Promise` handle pair.
//!
//! A completion cell is the one heap-shared mutable resource in the
//! runtime: the producer side delivers exactly once, the consumer side
//! observes readiness, registers continuations, or parks on it as a
//! future. All sharing is `Rc`-based; the runtime is single-threaded by
//! design.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::chain::{self, Chain};
use crate::fault::Fault;

/// The delivered result of a completed cell, as seen by continuations.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The producer delivered a value.
    Value(T),
    /// The producer delivered a failure.
    Fault(Fault),
}

impl<T> Outcome<T> {
    /// The delivered value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Value(v) => Some(v),
            Outcome::Fault(_) => None,
        }
    }

    /// The delivered failure, if any.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Fault(f) => Some(f),
        }
    }

    fn into_result(self) -> Result<T, Fault> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Fault(f) => Err(f),
        }
    }
}

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>)>;

enum State<T> {
    Pending {
        continuations: Vec<Continuation<T>>,
        waker: Option<Waker>,
    },
    // `None` once the outcome has been consumed (or while continuations
    // borrow it during delivery).
    Done(Option<Outcome<T>>),
}

struct Cell<T> {
    state: State<T>,
    link: Chain,
}

type CellHandle<T> = Rc<RefCell<Cell<T>>>;

/// Consumer handle to a completion cell.
///
/// Move-only: exactly one holder may await or take the outcome. Other
/// observers register [`on_complete`](Waitable::on_complete)
/// continuations, which borrow the outcome instead of consuming it.
///
/// `Waitable<T>` is a `Future` with output `Result<T, Fault>`; awaiting
/// a cell that is already complete returns without touching the
/// scheduler.
pub struct Waitable<T> {
    cell: CellHandle<T>,
}

/// Producer handle to a completion cell.
///
/// Single-writer: exactly one call to [`deliver`](Promise::deliver) or
/// [`fail`](Promise::fail) is valid over its lifetime. Dropping a
/// promise that never delivered is a bug (a broken promise) unless its
/// chain was aborted, since no other producer can satisfy the paired
/// `Waitable`.
pub struct Promise<T> {
    cell: CellHandle<T>,
}

/// Allocates one completion cell and returns both handles.
pub fn pair<T>() -> (Waitable<T>, Promise<T>) {
    let cell = Rc::new(RefCell::new(Cell {
        state: State::Pending {
            continuations: Vec::new(),
            waker: None,
        },
        link: Chain::new(),
    }));
    (
        Waitable {
            cell: Rc::clone(&cell),
        },
        Promise { cell },
    )
}

impl<T> Waitable<T> {
    /// True once the cell left the pending state.
    pub fn ready(&self) -> bool {
        matches!(self.cell.borrow().state, State::Done(_))
    }

    /// Consumes the delivered outcome.
    ///
    /// # Panics
    ///
    /// Panics if the cell is still pending, or if the outcome was
    /// already consumed by an earlier poll. Both indicate wiring bugs,
    /// not runtime conditions.
    pub fn take(self) -> Result<T, Fault> {
        let mut cell = self.cell.borrow_mut();
        match &mut cell.state {
            State::Pending { .. } => panic!("waitable read before completion"),
            State::Done(slot) => slot
                .take()
                .expect("waitable value already taken")
                .into_result(),
        }
    }

    /// Registers a continuation.
    ///
    /// If the cell is already complete the continuation runs
    /// immediately and synchronously; otherwise it is appended and runs
    /// in registration order at delivery.
    pub fn on_complete(&self, f: impl FnOnce(&Outcome<T>) + 'static) {
        let outcome = {
            let mut cell = self.cell.borrow_mut();
            match &mut cell.state {
                State::Pending { continuations, .. } => {
                    continuations.push(Box::new(f));
                    return;
                }
                State::Done(slot) => slot
                    .take()
                    .expect("waitable observed after its value was taken"),
            }
        };
        f(&outcome);
        match &mut self.cell.borrow_mut().state {
            State::Done(slot) => *slot = Some(outcome),
            State::Pending { .. } => unreachable!("completed cell regressed to pending"),
        }
    }

    pub(crate) fn chain(&self) -> Chain {
        self.cell.borrow().link.clone()
    }
}

impl<T> Future for Waitable<T> {
    type Output = Result<T, Fault>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = {
            let mut cell = this.cell.borrow_mut();
            match &mut cell.state {
                State::Done(slot) => {
                    Some(slot.take().expect("waitable polled after its value was taken"))
                }
                State::Pending { waker, .. } => {
                    *waker = Some(cx.waker().clone());
                    None
                }
            }
        };
        match outcome {
            Some(outcome) => {
                if let Some(task) = chain::ambient() {
                    task.release_from(&this.chain());
                }
                Poll::Ready(outcome.into_result())
            }
            None => {
                if let Some(task) = chain::ambient() {
                    task.attach_to(&this.chain());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Promise<T> {
    /// Delivers the value, transitioning the cell out of pending.
    ///
    /// Registered continuations run synchronously in registration
    /// order, then the parked awaiter (if any) is woken.
    ///
    /// # Panics
    ///
    /// Panics if the cell already completed.
    pub fn deliver(&mut self, value: T) {
        complete(&self.cell, Outcome::Value(value));
    }

    /// Delivers a failure; the counterpart of
    /// [`deliver`](Promise::deliver).
    pub fn fail(&mut self, fault: Fault) {
        complete(&self.cell, Outcome::Fault(fault));
    }

    pub(crate) fn chain(&self) -> Chain {
        self.cell.borrow().link.clone()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let cell = self.cell.borrow();
        if matches!(cell.state, State::Pending { .. }) && !cell.link.is_aborted() {
            panic!("promise dropped without delivering (broken promise)");
        }
    }
}

fn complete<T>(cell: &CellHandle<T>, outcome: Outcome<T>) {
    let (continuations, waker) = {
        let mut cell = cell.borrow_mut();
        match &mut cell.state {
            State::Pending {
                continuations,
                waker,
            } => {
                let continuations = std::mem::take(continuations);
                let waker = waker.take();
                cell.state = State::Done(None);
                (continuations, waker)
            }
            State::Done(_) => panic!("completion cell delivered twice"),
        }
    };
    // The cell borrow is released while continuations run, so a
    // continuation may itself deliver another promise.
    for continuation in continuations {
        continuation(&outcome);
    }
    match &mut cell.borrow_mut().state {
        State::Done(slot) => *slot = Some(outcome),
        State::Pending { .. } => unreachable!("completed cell regressed to pending"),
    }
    if let Some(waker) = waker {
        waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn deliver_then_take() {
        let (waitable, mut promise) = pair();
        assert!(!waitable.ready());
        promise.deliver(7);
        assert!(waitable.ready());
        assert_eq!(waitable.take(), Ok(7));
    }

    #[test]
    fn failure_round_trips() {
        let (waitable, mut promise) = pair::<u32>();
        promise.fail(Fault::app("boom"));
        assert_eq!(waitable.take(), Err(Fault::App("boom".into())));
    }

    #[test]
    fn continuations_run_in_registration_order() {
        let (waitable, mut promise) = pair();
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["c1", "c2", "c3"] {
            let order = Rc::clone(&order);
            waitable.on_complete(move |_| order.borrow_mut().push(label));
        }
        promise.deliver(1);
        assert_eq!(*order.borrow(), ["c1", "c2", "c3"]);
    }

    #[test]
    fn on_complete_after_delivery_runs_immediately() {
        let (waitable, mut promise) = pair();
        promise.deliver(3);
        let seen = Rc::new(std::cell::Cell::new(0));
        let inner = Rc::clone(&seen);
        waitable.on_complete(move |outcome| inner.set(*outcome.value().unwrap()));
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn continuation_may_deliver_another_promise() {
        let (first, mut first_promise) = pair();
        let (second, second_promise) = pair();
        let slot = Rc::new(RefCell::new(Some(second_promise)));
        first.on_complete(move |outcome| {
            let value = *outcome.value().unwrap();
            if let Some(mut promise) = slot.borrow_mut().take() {
                promise.deliver(value * 2);
            }
        });
        first_promise.deliver(21);
        assert_eq!(second.take(), Ok(42));
    }

    #[test]
    fn ready_poll_short_circuits_without_waker() {
        let (mut waitable, mut promise) = pair();
        promise.deliver(5);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(Pin::new(&mut waitable).poll(&mut cx), Poll::Ready(Ok(5)));
    }

    #[test]
    #[should_panic(expected = "delivered twice")]
    fn double_delivery_is_a_bug() {
        let (_waitable, mut promise) = pair();
        promise.deliver(1);
        promise.deliver(2);
    }

    #[test]
    #[should_panic(expected = "read before completion")]
    fn take_before_ready_is_a_bug() {
        let (waitable, _promise) = pair::<u32>();
        let _ = waitable.take();
    }

    #[test]
    #[should_panic(expected = "broken promise")]
    fn broken_promise_is_a_bug() {
        let (_waitable, promise) = pair::<u32>();
        drop(promise);
    }

    #[test]
    fn first_delivery_wins() {
        let (waitable, mut promise) = pair();
        promise.deliver(1);
        let second = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            promise.deliver(2);
        }));
        assert!(second.is_err());
        assert_eq!(waitable.take(), Ok(1));
    }
}
