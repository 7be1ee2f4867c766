//! The suspension bridge and its single-threaded driver.
//!
//! A spawned computation is an `async` body returning
//! `Result<T, Fault>`. The runtime pairs it with a completion cell,
//! parks it in the task table, and hands the consumer the cell's
//! [`Waitable`]. Awaiting inside the body is the suspension primitive:
//! a pending await registers the task's waker on the awaited cell and
//! attaches the task's chain link downstream of it; delivery enqueues a
//! resume token that the next [`Runtime::turn`] drains.
//!
//! The game's main loop owns the cadence: it calls `turn` once per
//! tick and feeds the time source separately. Tokens enqueued while a
//! turn is draining run on the next turn.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures::task::ArcWake;
use parking_lot::Mutex;
use pin_project::pin_project;
use tracing::{debug, trace};

use crate::chain::{self, CancelHandle, Chain};
use crate::fault::Fault;
use crate::promise::{self, Promise, Waitable};

/// Identifies one parked computation in the task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

// Resume tokens. The queue sits behind a mutex only because the waker
// contract demands `Send + Sync`; every push and drain happens on the
// one logical thread.
struct TokenQueue {
    ready: Mutex<VecDeque<TaskId>>,
    enqueued: AtomicU64,
}

impl TokenQueue {
    fn push(&self, id: TaskId) {
        self.ready.lock().push_back(id);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }
}

struct Resume {
    id: TaskId,
    queue: Arc<TokenQueue>,
}

impl ArcWake for Resume {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.queue.push(arc_self.id);
    }
}

type PromiseSlot<T> = Rc<RefCell<Option<Promise<T>>>>;

// Wraps a spawned body so that its result is delivered into the
// internal promise: `Ok` delivers the value, `Err` delivers the
// failure. The slot is shared with the task's abort callback, which
// fails the promise with `Fault::Canceled` if it gets there first.
#[pin_project]
struct DeliverBody<F, T> {
    #[pin]
    body: F,
    slot: PromiseSlot<T>,
}

impl<F, T> Future for DeliverBody<F, T>
where
    F: Future<Output = Result<T, Fault>>,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        match this.body.poll(cx) {
            Poll::Ready(out) => {
                let promise = this.slot.borrow_mut().take();
                if let Some(mut promise) = promise {
                    match out {
                        Ok(value) => promise.deliver(value),
                        Err(fault) => promise.fail(fault),
                    }
                }
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct TaskRecord {
    body: Pin<Box<dyn Future<Output = ()>>>,
    chain: Chain,
    waker: Waker,
}

struct Inner {
    queue: Arc<TokenQueue>,
    tasks: RefCell<HashMap<TaskId, TaskRecord>>,
    /// Task currently being polled, if any.
    polling: Cell<Option<TaskId>>,
    /// Tasks cancelled while they were out of the table being polled.
    doomed: RefCell<HashSet<TaskId>>,
    next_task: Cell<u64>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Dropping the last runtime handle cancels everything still
        // parked, so outstanding waitables observe `Fault::Canceled`
        // and provider registrations are released.
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        for (_, record) in tasks {
            record.chain.abort();
        }
    }
}

impl Inner {
    fn despawn(inner: &Rc<Inner>, id: TaskId) {
        let record = inner.tasks.borrow_mut().remove(&id);
        if let Some(record) = record {
            debug!(task = id.0, "task despawned");
            drop(record);
        } else if inner.polling.get() == Some(id) {
            inner.doomed.borrow_mut().insert(id);
        }
    }
}

/// The cooperative runtime: task table, resume-token queue, and the
/// per-tick driver.
///
/// Cloning is cheap and shares the same runtime. Dropping the last
/// handle cancels every computation still parked.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            inner: Rc::new(Inner {
                queue: Arc::new(TokenQueue {
                    ready: Mutex::new(VecDeque::new()),
                    enqueued: AtomicU64::new(0),
                }),
                tasks: RefCell::new(HashMap::new()),
                polling: Cell::new(None),
                doomed: RefCell::new(HashSet::new()),
                next_task: Cell::new(0),
            }),
        }
    }

    /// Starts a suspending computation and returns the waitable its
    /// caller observes.
    ///
    /// The body's `Ok` return delivers the waitable; an `Err`
    /// propagating out of the body fails it with the same fault, which
    /// awaiting computations re-raise at their own await sites.
    pub fn spawn<T, F>(&self, body: F) -> Waitable<T>
    where
        T: 'static,
        F: Future<Output = Result<T, Fault>> + 'static,
    {
        let (waitable, promise) = promise::pair();
        let id = TaskId(self.inner.next_task.get());
        self.inner.next_task.set(id.0 + 1);

        let slot: PromiseSlot<T> = Rc::new(RefCell::new(Some(promise)));
        let chain = waitable.chain();
        {
            let slot = Rc::clone(&slot);
            let weak = Rc::downgrade(&self.inner);
            chain.arm(move || {
                let promise = slot.borrow_mut().take();
                if let Some(mut promise) = promise {
                    promise.fail(Fault::Canceled);
                }
                if let Some(inner) = weak.upgrade() {
                    Inner::despawn(&inner, id);
                }
            });
        }

        let waker = futures::task::waker(Arc::new(Resume {
            id,
            queue: Arc::clone(&self.inner.queue),
        }));
        let record = TaskRecord {
            body: Box::pin(DeliverBody { body, slot }),
            chain: chain.clone(),
            waker,
        };
        self.inner.tasks.borrow_mut().insert(id, record);
        self.inner.queue.push(id);
        trace!(task = id.0, "task spawned");
        waitable
    }

    /// As [`spawn`](Runtime::spawn), additionally returning the handle
    /// that unwinds the whole chain of suspensions rooted here.
    pub fn spawn_root<T, F>(&self, body: F) -> (Waitable<T>, CancelHandle)
    where
        T: 'static,
        F: Future<Output = Result<T, Fault>> + 'static,
    {
        let waitable = self.spawn(body);
        let handle = CancelHandle::new(waitable.chain());
        (waitable, handle)
    }

    /// Drains the resume tokens enqueued so far, resuming each parked
    /// computation once per token, in enqueue order. Returns the number
    /// of resumptions performed.
    pub fn turn(&self) -> usize {
        let batch: Vec<TaskId> = self.inner.queue.ready.lock().drain(..).collect();
        let mut resumed = 0;
        for id in batch {
            let record = self.inner.tasks.borrow_mut().remove(&id);
            let Some(mut record) = record else {
                // Token for a task that retired or was despawned.
                continue;
            };
            self.inner.polling.set(Some(id));
            let waker = record.waker.clone();
            let mut cx = Context::from_waker(&waker);
            let poll = chain::with_ambient(&record.chain, || record.body.as_mut().poll(&mut cx));
            self.inner.polling.set(None);
            resumed += 1;
            match poll {
                Poll::Ready(()) => {
                    record.chain.disarm();
                    self.inner.doomed.borrow_mut().remove(&id);
                    trace!(task = id.0, "task completed");
                }
                Poll::Pending => {
                    if self.inner.doomed.borrow_mut().remove(&id) {
                        debug!(task = id.0, "task canceled during poll");
                    } else {
                        self.inner.tasks.borrow_mut().insert(id, record);
                    }
                }
            }
        }
        resumed
    }

    /// Runs turns until one drains nothing. Test and demo convenience;
    /// the game loop calls [`turn`](Runtime::turn) on its own cadence.
    pub fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let resumed = self.turn();
            if resumed == 0 {
                return total;
            }
            total += resumed;
        }
    }

    /// Number of computations currently parked or runnable.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Total resume tokens ever enqueued, including the initial token
    /// each spawn enqueues. Awaits that are ready at poll time must not
    /// move this counter.
    pub fn tokens_enqueued(&self) -> u64 {
        self.inner.queue.enqueued.load(Ordering::Relaxed)
    }
}
