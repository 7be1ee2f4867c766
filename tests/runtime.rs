use waitable::{pair, Fault, Runtime, Timers};

#[test]
fn values_flow_through_a_chain_of_tasks() {
    let runtime = Runtime::new();

    let a = runtime.spawn(async { Ok(2u32) });
    let b = runtime.spawn(async move { Ok(a.await? * 3) });
    let c = runtime.spawn(async move { Ok(b.await? + 1) });
    runtime.drain();

    assert_eq!(c.take(), Ok(7));
    assert_eq!(runtime.pending_tasks(), 0);
}

#[test]
fn ready_await_never_touches_the_scheduler() {
    let runtime = Runtime::new();

    let (w, mut p) = pair();
    p.deliver(7u32);
    let out = runtime.spawn(async move { Ok(w.await? + 1) });
    // One token for the spawn itself.
    assert_eq!(runtime.tokens_enqueued(), 1);
    runtime.drain();

    assert_eq!(out.take(), Ok(8));
    assert_eq!(
        runtime.tokens_enqueued(),
        1,
        "a ready await must not enqueue a resume token"
    );
}

#[test]
fn failure_reraises_at_the_await_site_unchanged() {
    let runtime = Runtime::new();

    let (w, mut p) = pair::<u32>();
    let outer = runtime.spawn(async move { w.await });
    runtime.drain();

    p.fail(Fault::app("granary collapsed"));
    runtime.drain();

    assert_eq!(outer.take(), Err(Fault::App("granary collapsed".into())));
}

#[test]
fn failure_can_be_handled_across_the_suspension() {
    let runtime = Runtime::new();

    let (w, mut p) = pair::<u32>();
    let outer = runtime.spawn(async move {
        match w.await {
            Ok(v) => Ok(v),
            Err(Fault::App(_)) => Ok(99),
            Err(other) => Err(other),
        }
    });
    runtime.drain();

    p.fail(Fault::app("granary collapsed"));
    runtime.drain();

    assert_eq!(outer.take(), Ok(99));
}

#[test]
fn cancel_unwinds_the_whole_chain() {
    let runtime = Runtime::new();
    let timers = Timers::new();

    let inner = runtime.spawn({
        let timers = timers.clone();
        async move {
            timers.after(10).await?;
            Ok(1u32)
        }
    });
    let (root, handle) = runtime.spawn_root(async move { Ok(inner.await? + 1) });
    runtime.drain();
    assert_eq!(runtime.pending_tasks(), 2);
    assert_eq!(timers.pending_sleeps(), 1);

    handle.cancel();
    runtime.drain();

    assert_eq!(root.take(), Err(Fault::Canceled));
    assert_eq!(runtime.pending_tasks(), 0, "both tasks must be torn down");
    assert_eq!(
        timers.pending_sleeps(),
        0,
        "the timer registration must be released"
    );
}

#[test]
fn cancel_after_completion_is_inert() {
    let runtime = Runtime::new();

    let (root, handle) = runtime.spawn_root(async { Ok(5u32) });
    runtime.drain();

    handle.cancel();
    handle.cancel();

    assert_eq!(root.take(), Ok(5));
}

#[test]
fn a_task_may_cancel_another_mid_turn() {
    let runtime = Runtime::new();
    let timers = Timers::new();

    let (victim, handle) = runtime.spawn_root({
        let timers = timers.clone();
        async move {
            timers.after(1000).await?;
            Ok(0u32)
        }
    });
    let canceller = runtime.spawn(async move {
        handle.cancel();
        Ok(1u32)
    });
    runtime.drain();

    assert_eq!(victim.take(), Err(Fault::Canceled));
    assert_eq!(canceller.take(), Ok(1));
    assert_eq!(timers.pending_sleeps(), 0);
}

#[test]
fn tokens_enqueued_during_a_turn_run_next_turn() {
    let runtime = Runtime::new();

    let (w, p) = pair::<u32>();
    let follower = runtime.spawn(async move { w.await });
    let deliverer = runtime.spawn(async move {
        let mut p = p;
        p.deliver(4);
        Ok(())
    });

    // One turn parks the follower, then delivers to it; the resume
    // token lands mid-drain and must wait for the next turn.
    assert_eq!(runtime.turn(), 2);
    assert!(!follower.ready());
    assert_eq!(runtime.turn(), 1);
    assert_eq!(follower.take(), Ok(4));
    assert_eq!(deliverer.take(), Ok(()));
}

#[test]
fn dropping_the_runtime_cancels_parked_tasks() {
    let runtime = Runtime::new();

    let (w, p) = pair::<u32>();
    let parked = runtime.spawn(async move { w.await });
    runtime.drain();

    drop(runtime);

    assert_eq!(parked.take(), Err(Fault::Canceled));
    drop(p); // its cell's chain was aborted, so this is not a broken promise
}
