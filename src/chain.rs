//! Cancellation chains.
//!
//! Every completion cell owns one chain link. While a computation is
//! parked on an await, its link is attached downstream of the awaited
//! cell's link, so at any moment the links mirror the await graph:
//! many downstream consumers fanning into one upstream producer.
//!
//! Aborting a link detaches it from its upstream and decrements the
//! upstream's attachment count. When the count reaches zero the upstream
//! has no remaining observers and is aborted in turn, collapsing the
//! chain all the way to its deepest pending source. Each aborted link
//! runs its release callback at most once, so a shared upstream fires
//! exactly when its last observer goes away, whether by abort or by
//! normal completion.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

struct Link {
    /// Upstream link this one is attached to, if parked on an await.
    prev: Option<Chain>,
    /// Number of downstream links currently attached to this one.
    attached: usize,
    /// Set once this link's abort has run; suppresses repeated release
    /// effects while still letting the bookkeeping reprocess a link that
    /// was re-attached to a new chain.
    aborted: bool,
    on_abort: Option<Box<dyn FnOnce()>>,
}

/// A reference-counted handle to one cancellation chain link.
#[derive(Clone)]
pub(crate) struct Chain {
    inner: Rc<RefCell<Link>>,
}

impl Chain {
    pub(crate) fn new() -> Self {
        Chain {
            inner: Rc::new(RefCell::new(Link {
                prev: None,
                attached: 0,
                aborted: false,
                on_abort: None,
            })),
        }
    }

    pub(crate) fn same(&self, other: &Chain) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Installs the release callback run when this link aborts.
    pub(crate) fn arm(&self, on_abort: impl FnOnce() + 'static) {
        self.inner.borrow_mut().on_abort = Some(Box::new(on_abort));
    }

    /// Drops the release callback without running it and marks the link
    /// finished. Used when the owning computation retires normally.
    pub(crate) fn disarm(&self) {
        let mut link = self.inner.borrow_mut();
        link.on_abort = None;
        link.aborted = true;
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.inner.borrow().aborted
    }

    /// Attaches this link downstream of `upstream`, replacing any
    /// previous attachment. Called at every pending await, since the
    /// upstream changes as a computation moves from one await to the
    /// next.
    pub(crate) fn attach_to(&self, upstream: &Chain) {
        if self.same(upstream) {
            return;
        }
        {
            let link = self.inner.borrow();
            if let Some(prev) = &link.prev {
                if prev.same(upstream) {
                    return;
                }
            }
        }
        let old = self.inner.borrow_mut().prev.replace(upstream.clone());
        if let Some(old) = old {
            // A plain detach: switching awaits neither cancels nor
            // completes the old upstream.
            let mut link = old.inner.borrow_mut();
            link.attached = link.attached.saturating_sub(1);
        }
        upstream.inner.borrow_mut().attached += 1;
    }

    /// Detaches this link from `upstream` after the awaited cell
    /// completed, collapsing the upstream if this was its last observer.
    pub(crate) fn release_from(&self, upstream: &Chain) {
        let matches = {
            let link = self.inner.borrow();
            link.prev.as_ref().is_some_and(|p| p.same(upstream))
        };
        if !matches {
            return;
        }
        let prev = self.inner.borrow_mut().prev.take();
        if let Some(prev) = prev {
            if prev.detach_one() {
                prev.abort();
            }
        }
    }

    /// Runs the abort algorithm on this link.
    ///
    /// Detaches from the upstream first so the bookkeeping reprocesses
    /// even when this link was aborted before and has since been
    /// re-attached. If the detachment left the upstream with no
    /// observers, the upstream aborts too, recursively. Finally this
    /// link's own release callback runs, at most once over its lifetime.
    pub(crate) fn abort(&self) {
        let prev = self.inner.borrow_mut().prev.take();
        if let Some(prev) = prev {
            if prev.detach_one() {
                trace!("chain collapsed into upstream link");
                prev.abort();
            }
        }
        let callback = {
            let mut link = self.inner.borrow_mut();
            let callback = if link.aborted {
                None
            } else {
                link.on_abort.take()
            };
            link.aborted = true;
            callback
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Decrements the attachment count, reporting whether it reached
    /// zero.
    fn detach_one(&self) -> bool {
        let mut link = self.inner.borrow_mut();
        if link.attached > 0 {
            link.attached -= 1;
        }
        link.attached == 0
    }

    #[cfg(test)]
    fn attached(&self) -> usize {
        self.inner.borrow().attached
    }
}

/// Handle used by domain code to unwind an in-progress chain of
/// suspensions, e.g. when the player dismisses a dialog mid-animation.
///
/// Wraps the root computation's chain link. Dropping the handle is
/// inert; cancellation is always explicit.
pub struct CancelHandle {
    link: Chain,
}

impl CancelHandle {
    pub(crate) fn new(link: Chain) -> Self {
        CancelHandle { link }
    }

    /// Aborts the chain. The root computation and everything it is
    /// transitively parked on are torn down; observers of the root's
    /// result see [`Fault::Canceled`](crate::Fault::Canceled).
    pub fn cancel(&self) {
        debug!("cancel requested");
        self.link.abort();
    }
}

// The chain link of the task currently being polled. The scheduler
// scopes it around every poll so that a pending await can attach the
// running task's link to the awaited cell's link.
thread_local! {
    static AMBIENT: RefCell<Option<Chain>> = const { RefCell::new(None) };
}

pub(crate) fn ambient() -> Option<Chain> {
    AMBIENT.with(|a| a.borrow().clone())
}

pub(crate) fn with_ambient<R>(chain: &Chain, f: impl FnOnce() -> R) -> R {
    struct Reset(Option<Chain>);
    impl Drop for Reset {
        fn drop(&mut self) {
            let previous = self.0.take();
            AMBIENT.with(|a| *a.borrow_mut() = previous);
        }
    }
    let previous = AMBIENT.with(|a| a.borrow_mut().replace(chain.clone()));
    let _reset = Reset(previous);
    f()
}
