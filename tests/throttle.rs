use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::rc::Rc;

use waitable::{pair, run_throttled, Fault, Promise, Runtime, Ticks, Waitable};

// A time-provider double: hands out waitables and stashes the promises
// so the test controls the exact elapsed time each delivery reports.
fn scripted_source(
    stash: &Rc<RefCell<VecDeque<Promise<Ticks>>>>,
) -> impl FnMut(Ticks) -> Waitable<Ticks> {
    let stash = Rc::clone(stash);
    move |_pause| {
        let (waitable, promise) = pair();
        stash.borrow_mut().push_back(promise);
        waitable
    }
}

#[test]
fn accumulator_follows_the_integer_division_policy() {
    let runtime = Runtime::new();
    let stash = Rc::new(RefCell::new(VecDeque::new()));
    let ticks = Rc::new(Cell::new(0usize));

    let (done, handle) = runtime.spawn_root(run_throttled(scripted_source(&stash), 100, {
        let ticks = Rc::clone(&ticks);
        move || {
            ticks.set(ticks.get() + 1);
            ControlFlow::Continue(())
        }
    }));
    runtime.drain();

    let mut deliver = |elapsed: Ticks| {
        let mut promise = stash.borrow_mut().pop_front().expect("source not awaited");
        promise.deliver(elapsed);
        runtime.drain();
    };

    // accum 250, two full pauses, remainder 50
    deliver(250);
    assert_eq!(ticks.get(), 2);
    // accum 90, no full pause
    deliver(40);
    assert_eq!(ticks.get(), 2);
    // accum 170, one full pause, remainder 70
    deliver(80);
    assert_eq!(ticks.get(), 3);

    handle.cancel();
    assert_eq!(done.take(), Err(Fault::Canceled));
}

#[test]
fn break_from_the_tick_callback_terminates() {
    let runtime = Runtime::new();
    let stash = Rc::new(RefCell::new(VecDeque::new()));
    let ticks = Rc::new(Cell::new(0usize));

    let done = runtime.spawn(run_throttled(scripted_source(&stash), 100, {
        let ticks = Rc::clone(&ticks);
        move || {
            ticks.set(ticks.get() + 1);
            if ticks.get() == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }));
    runtime.drain();

    let mut deliver = |elapsed: Ticks| {
        let mut promise = stash.borrow_mut().pop_front().expect("source not awaited");
        promise.deliver(elapsed);
        runtime.drain();
    };

    deliver(100);
    assert_eq!(ticks.get(), 1);
    // Two pauses owed; the callback breaks on the second of them.
    deliver(200);
    assert_eq!(ticks.get(), 3);
    assert_eq!(done.take(), Ok(()));
    assert!(stash.borrow().is_empty(), "no dangling source registration");
}

#[test]
fn a_source_failure_propagates_out() {
    let runtime = Runtime::new();
    let stash = Rc::new(RefCell::new(VecDeque::new()));

    let done = runtime.spawn(run_throttled(scripted_source(&stash), 100, || {
        ControlFlow::Continue(())
    }));
    runtime.drain();

    let mut promise = stash.borrow_mut().pop_front().unwrap();
    promise.fail(Fault::app("clock skew"));
    runtime.drain();

    assert_eq!(done.take(), Err(Fault::App("clock skew".into())));
}

#[test]
fn driven_by_the_real_time_provider() {
    use waitable::Timers;

    let runtime = Runtime::new();
    let timers = Timers::new();
    let ticks = Rc::new(Cell::new(0usize));

    let done = runtime.spawn(run_throttled(
        {
            let timers = timers.clone();
            move |pause| timers.after(pause)
        },
        100,
        {
            let ticks = Rc::clone(&ticks);
            move || {
                ticks.set(ticks.get() + 1);
                if ticks.get() == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        },
    ));
    runtime.drain();

    // A coarse tick source: 250 elapsed against a 100 pause catches up
    // twice, the next delivery of 150 total elapsed supplies the third.
    timers.advance(250);
    runtime.drain();
    assert_eq!(ticks.get(), 2);

    timers.advance(150);
    runtime.drain();
    assert_eq!(ticks.get(), 3);
    assert_eq!(done.take(), Ok(()));
    assert_eq!(timers.pending_sleeps(), 0);
}
