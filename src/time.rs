//! Time and frame suspension providers.
//!
//! Both providers are driven by one inbound tick signal:
//! [`Timers::advance`] moves game time forward by `dt` ticks and counts
//! as one frame. The game loop calls it once per iteration, right
//! before draining the runtime.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::promise::{self, Promise, Waitable};

/// Game time, an integer count of time units.
pub type Ticks = u64;

struct SleepEntry {
    id: u64,
    due: Ticks,
    requested_at: Ticks,
    promise: Promise<Ticks>,
}

struct FrameEntry {
    id: u64,
    remaining: u32,
    promise: Promise<()>,
}

struct TimersInner {
    now: Ticks,
    next_entry: u64,
    sleeps: Vec<SleepEntry>,
    frames: Vec<FrameEntry>,
}

/// Registry of pending sleeps and frame waits.
///
/// Cloning is cheap and shares the same registry.
#[derive(Clone)]
pub struct Timers {
    inner: Rc<RefCell<TimersInner>>,
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Timers {
    pub fn new() -> Self {
        Timers {
            inner: Rc::new(RefCell::new(TimersInner {
                now: 0,
                next_entry: 0,
                sleeps: Vec::new(),
                frames: Vec::new(),
            })),
        }
    }

    /// Current game time.
    pub fn now(&self) -> Ticks {
        self.inner.borrow().now
    }

    /// Resolves once at least `pause` ticks have elapsed, delivering
    /// the *actual* elapsed time, which may exceed the request when the
    /// tick source is coarser than the pause. Callers that care (the
    /// frame throttler does) compensate from the delivered value.
    pub fn after(&self, pause: Ticks) -> Waitable<Ticks> {
        let (waitable, promise) = promise::pair();
        let id = {
            let mut timers = self.inner.borrow_mut();
            let id = timers.next_entry;
            timers.next_entry += 1;
            let now = timers.now;
            timers.sleeps.push(SleepEntry {
                id,
                due: now.saturating_add(pause),
                requested_at: now,
                promise,
            });
            id
        };
        let weak = Rc::downgrade(&self.inner);
        waitable.chain().arm(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().sleeps.retain(|entry| entry.id != id);
                trace!(entry = id, "sleep deregistered");
            }
        });
        trace!(entry = id, pause, "sleep registered");
        waitable
    }

    /// Resolves after `frames` tick-signal arrivals. Zero frames
    /// resolves immediately.
    pub fn after_frames(&self, frames: u32) -> Waitable<()> {
        let (waitable, mut promise) = promise::pair();
        if frames == 0 {
            promise.deliver(());
            return waitable;
        }
        let id = {
            let mut timers = self.inner.borrow_mut();
            let id = timers.next_entry;
            timers.next_entry += 1;
            timers.frames.push(FrameEntry {
                id,
                remaining: frames,
                promise,
            });
            id
        };
        let weak = Rc::downgrade(&self.inner);
        waitable.chain().arm(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().frames.retain(|entry| entry.id != id);
            }
        });
        waitable
    }

    /// The inbound tick signal: advances game time by `dt` and counts
    /// one frame. Entries that became due complete in registration
    /// order, after the registry borrow is released, so their
    /// continuations may register new entries.
    pub fn advance(&self, dt: Ticks) {
        let now = {
            let mut timers = self.inner.borrow_mut();
            timers.now = timers.now.saturating_add(dt);
            timers.now
        };

        let due: Vec<SleepEntry> = {
            let mut timers = self.inner.borrow_mut();
            let entries = std::mem::take(&mut timers.sleeps);
            let mut due = Vec::new();
            for entry in entries {
                if entry.due <= now {
                    due.push(entry);
                } else {
                    timers.sleeps.push(entry);
                }
            }
            due
        };
        for entry in due {
            let mut promise = entry.promise;
            promise.chain().disarm();
            promise.deliver(now - entry.requested_at);
        }

        let finished: Vec<FrameEntry> = {
            let mut timers = self.inner.borrow_mut();
            let entries = std::mem::take(&mut timers.frames);
            let mut finished = Vec::new();
            for mut entry in entries {
                entry.remaining -= 1;
                if entry.remaining == 0 {
                    finished.push(entry);
                } else {
                    timers.frames.push(entry);
                }
            }
            finished
        };
        for entry in finished {
            let mut promise = entry.promise;
            promise.chain().disarm();
            promise.deliver(());
        }
    }

    /// Pending sleep registrations; cancellation must drain the entries
    /// it owned.
    pub fn pending_sleeps(&self) -> usize {
        self.inner.borrow().sleeps.len()
    }

    /// Pending frame registrations.
    pub fn pending_frames(&self) -> usize {
        self.inner.borrow().frames.len()
    }
}
