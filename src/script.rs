//! Bridge into the embedded scripting runtime's cooperative coroutines.
//!
//! The interpreter itself lives outside this crate; it plugs in through
//! [`ScriptHost`] and [`ScriptCoroutine`]. A script call becomes an
//! ordinary spawned computation: the foreign coroutine is resumed until
//! it returns or fails, and every value it yields is treated as a
//! waitable to suspend on, so scripts can call back into game
//! operations and game code can await scripts, symmetrically.
//!
//! A foreign coroutine is a named resource in the other runtime. It is
//! released through a guard whose `Drop` resets and unregisters it, so
//! cleanup happens on every exit path: normal return, failure, or
//! cancellation of the surrounding chain.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::trace;

use crate::fault::{Fault, ScriptLocation};
use crate::promise::Waitable;
use crate::runtime::Runtime;

/// An error reported by the interpreter, before translation into a
/// [`Fault`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{location}: {message}")]
pub struct ScriptError {
    /// Interpreter-reported error text.
    pub message: String,
    /// Chunk and line that raised the error.
    pub location: ScriptLocation,
}

impl From<ScriptError> for Fault {
    fn from(err: ScriptError) -> Self {
        Fault::Script {
            message: err.message,
            location: err.location,
        }
    }
}

/// One step of a foreign coroutine.
pub enum ScriptStep<V> {
    /// The coroutine suspended awaiting a value from this runtime.
    Yielded(Waitable<V>),
    /// The coroutine ran to completion.
    Returned(V),
    /// The coroutine raised an error.
    Failed(ScriptError),
}

/// The embedded interpreter, as seen from this runtime.
pub trait ScriptHost {
    /// A callable value inside the interpreter.
    type Callable;
    /// The interpreter's dynamic value type.
    type Value;
    /// Its cooperative coroutine object.
    type Coroutine: ScriptCoroutine<Value = Self::Value>;

    /// Creates a dedicated coroutine from a callable value.
    fn create_coroutine(&self, callable: Self::Callable) -> Result<Self::Coroutine, ScriptError>;
}

/// One live coroutine inside the interpreter.
pub trait ScriptCoroutine {
    /// The interpreter's dynamic value type.
    type Value;

    /// Resumes the coroutine. `input` carries the result of the
    /// waitable it last yielded, `None` on the first resume.
    fn resume(&mut self, input: Option<Self::Value>) -> ScriptStep<Self::Value>;

    /// Forcibly winds the coroutine down; called during cleanup on
    /// every exit path, including cancellation.
    fn reset(&mut self);
}

struct Registry {
    live: HashSet<u64>,
    next: u64,
}

struct CoroutineGuard<C: ScriptCoroutine> {
    co: C,
    id: u64,
    registry: Weak<RefCell<Registry>>,
}

impl<C: ScriptCoroutine> Drop for CoroutineGuard<C> {
    fn drop(&mut self) {
        self.co.reset();
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().live.remove(&self.id);
        }
        trace!(coroutine = self.id, "foreign coroutine released");
    }
}

/// Adapter turning script calls into spawned computations, tracking
/// every live foreign coroutine.
pub struct ScriptBridge {
    runtime: Runtime,
    registry: Rc<RefCell<Registry>>,
}

impl ScriptBridge {
    pub fn new(runtime: Runtime) -> Self {
        ScriptBridge {
            runtime,
            registry: Rc::new(RefCell::new(Registry {
                live: HashSet::new(),
                next: 0,
            })),
        }
    }

    /// Invokes a callable from the interpreter as a suspending
    /// computation of this runtime.
    ///
    /// Yields suspend on the yielded waitable and feed its value back
    /// into the coroutine; a failure of that waitable fails the whole
    /// call. Errors raised by the interpreter surface as
    /// [`Fault::Script`] with their originating location.
    pub fn call<H>(&self, host: Rc<H>, callable: H::Callable) -> Waitable<H::Value>
    where
        H: ScriptHost + 'static,
        H::Callable: 'static,
        H::Value: 'static,
        H::Coroutine: 'static,
    {
        let registry = Rc::clone(&self.registry);
        self.runtime.spawn(async move {
            let co = host.create_coroutine(callable)?;
            let id = {
                let mut reg = registry.borrow_mut();
                let id = reg.next;
                reg.next += 1;
                reg.live.insert(id);
                id
            };
            trace!(coroutine = id, "foreign coroutine created");
            let mut guard = CoroutineGuard {
                co,
                id,
                registry: Rc::downgrade(&registry),
            };
            let mut input = None;
            loop {
                match guard.co.resume(input.take()) {
                    ScriptStep::Yielded(waitable) => input = Some(waitable.await?),
                    ScriptStep::Returned(value) => return Ok(value),
                    ScriptStep::Failed(err) => return Err(err.into()),
                }
            }
        })
    }

    /// Number of foreign coroutines currently alive. A nonzero count
    /// after all script calls settled means a leak in the host.
    pub fn live_coroutines(&self) -> usize {
        self.registry.borrow().live.len()
    }
}
