//! Cooperative single-threaded future/promise runtime with structured
//! cancellation.
//!
//! Everything above the map in the colony simulation (the turn loop,
//! menus, animations, dialogs, script calls) is a chain of suspending
//! computations built on this crate. A computation is an `async` body
//! spawned on the [`Runtime`]; it suspends by awaiting a [`Waitable`],
//! resumes when the paired [`Promise`] delivers, and re-raises a
//! delivered [`Fault`] at the await site as if no suspension had
//! occurred. A [`CancelHandle`] unwinds a whole chain of nested
//! suspensions, releasing timers and foreign coroutines on the way.
//!
//! The game loop drives it: once per tick, feed the time source with
//! [`Timers::advance`] and drain resume tokens with [`Runtime::turn`].

#![forbid(unsafe_code)]

pub mod chain;
pub mod fault;
pub mod promise;
pub mod race;
pub mod runtime;
pub mod script;
pub mod throttle;
pub mod time;

pub use chain::CancelHandle;
pub use fault::{Fault, ScriptLocation};
pub use promise::{pair, Outcome, Promise, Waitable};
pub use race::{race, timeout, Either};
pub use runtime::{Runtime, TaskId};
pub use script::{ScriptBridge, ScriptCoroutine, ScriptError, ScriptHost, ScriptStep};
pub use throttle::run_throttled;
pub use time::{Ticks, Timers};
