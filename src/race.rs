//! First-completion-wins composition over two waitables.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::fault::Fault;
use crate::promise::Waitable;
use crate::runtime::Runtime;
use crate::time::{Ticks, Timers};

/// Which side of a [`race`] completed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either<A, B> {
    Left(A),
    Right(B),
}

// Polls both sides; the winner's slot is consumed and the loser's chain
// is aborted when the racer is dropped, whether it finished or was
// cancelled itself.
struct Select2<A, B> {
    left: Option<Waitable<A>>,
    right: Option<Waitable<B>>,
}

impl<A, B> Future for Select2<A, B> {
    type Output = Result<Either<A, B>, Fault>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(left) = this.left.as_mut() {
            if let Poll::Ready(out) = Pin::new(left).poll(cx) {
                this.left = None;
                return Poll::Ready(out.map(Either::Left));
            }
        }
        if let Some(right) = this.right.as_mut() {
            if let Poll::Ready(out) = Pin::new(right).poll(cx) {
                this.right = None;
                return Poll::Ready(out.map(Either::Right));
            }
        }
        Poll::Pending
    }
}

impl<A, B> Drop for Select2<A, B> {
    fn drop(&mut self) {
        if let Some(left) = self.left.take() {
            left.chain().abort();
        }
        if let Some(right) = self.right.take() {
            right.chain().abort();
        }
    }
}

/// Races two waitables; the loser's chain is cancelled.
///
/// A failure of the winning side propagates as the race's failure.
pub fn race<A, B>(runtime: &Runtime, left: Waitable<A>, right: Waitable<B>) -> Waitable<Either<A, B>>
where
    A: 'static,
    B: 'static,
{
    runtime.spawn(Select2 {
        left: Some(left),
        right: Some(right),
    })
}

/// Bounds `inner` by a deadline: races it against
/// [`Timers::after`]. If the deadline elapses first, `inner`'s chain is
/// cancelled and the result fails with [`Fault::TimedOut`] carrying the
/// actual elapsed ticks.
pub fn timeout<T>(
    runtime: &Runtime,
    timers: &Timers,
    pause: Ticks,
    inner: Waitable<T>,
) -> Waitable<T>
where
    T: 'static,
{
    let deadline = timers.after(pause);
    let raced = race(runtime, inner, deadline);
    runtime.spawn(async move {
        match raced.await? {
            Either::Left(value) => Ok(value),
            Either::Right(elapsed) => Err(Fault::TimedOut(elapsed)),
        }
    })
}
