//! Animation frame throttler.
//!
//! Animations want one unit of work per fixed pause, but the tick
//! source is often coarser than the pause. The throttler accumulates
//! the actual elapsed time reported by the time provider and runs
//! enough catch-up iterations to stay synchronized with it.

use std::ops::ControlFlow;

use crate::fault::Fault;
use crate::promise::Waitable;
use crate::time::Ticks;

/// Repeatedly awaits `source(pause)` and runs `tick` once per full
/// pause of accumulated elapsed time.
///
/// The accumulator policy is integer division: each delivery adds the
/// actual elapsed ticks, runs `accum / pause` iterations, and keeps the
/// remainder. A delivery that overshoots the pause therefore always
/// runs at least one iteration, and a short delivery can run none.
///
/// Terminates when `tick` returns [`ControlFlow::Break`].
///
/// The time source is a parameter so callers can pass
/// `move |pause| timers.after(pause)`, or a double in tests.
pub async fn run_throttled(
    mut source: impl FnMut(Ticks) -> Waitable<Ticks>,
    pause: Ticks,
    mut tick: impl FnMut() -> ControlFlow<()>,
) -> Result<(), Fault> {
    assert!(pause > 0, "throttle pause must be nonzero");
    let mut accum: Ticks = 0;
    loop {
        let elapsed = source(pause).await?;
        accum += elapsed;
        let iterations = accum / pause;
        accum -= iterations * pause;
        for _ in 0..iterations {
            if tick().is_break() {
                return Ok(());
            }
        }
    }
}
