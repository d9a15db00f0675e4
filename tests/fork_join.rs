//! Fork/join tests: exit identity, fiber refs propagation, daemons and
//! time-driven children.

mod common;

use common::*;
use fiberfx::types::{Cause, Exit};
use fiberfx::{FiberRef, Fx};
use proptest::prelude::*;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Shape {
    Succeed(i32),
    Fail(String),
    Die(String),
    YieldThenSucceed(i32, usize),
    Sleep(u64, i32),
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    prop_oneof![
        any::<i32>().prop_map(Shape::Succeed),
        "[a-z]{1,8}".prop_map(Shape::Fail),
        "[a-z]{1,8}".prop_map(Shape::Die),
        (any::<i32>(), 0usize..5).prop_map(|(n, yields)| Shape::YieldThenSucceed(n, yields)),
        (1u64..50, any::<i32>()).prop_map(|(ms, n)| Shape::Sleep(ms, n)),
    ]
}

fn build(shape: &Shape) -> Fx<i32, String> {
    match shape.clone() {
        Shape::Succeed(n) => Fx::succeed(n),
        Shape::Fail(e) => Fx::fail(e),
        Shape::Die(m) => Fx::die(m),
        Shape::YieldThenSucceed(n, yields) => (0..yields)
            .fold(Fx::unit(), |fx, _| fx.then(Fx::yield_now()))
            .widen()
            .map(move |()| n),
        Shape::Sleep(ms, n) => Fx::sleep(Duration::from_millis(ms)).widen().map(move |()| n),
    }
}

fn fork_join(fx: Fx<i32, String>) -> Fx<i32, String> {
    fx.fork().widen().flat_map(|fiber| fiber.join())
}

proptest! {
    #![proptest_config(test_proptest_config(64))]

    #[test]
    fn fork_then_join_preserves_exit(shape in arb_shape()) {
        init_test_logging();
        let lab = test_lab();
        let direct = lab.run_exit(build(&shape));
        let joined = lab.run_exit(fork_join(build(&shape)));
        prop_assert_eq!(direct, joined);
    }
}

#[test]
fn child_ref_writes_are_visible_after_join() {
    init_test_logging();
    test_phase!("child_ref_writes_are_visible_after_join");
    let lab = test_lab();
    let counter = FiberRef::make(0_u32);

    let child = counter.set(7);
    let program = counter
        .set(5)
        .then(child.fork())
        .flat_map(|fiber| fiber.join())
        .then(counter.get());

    let value = lab.run(program).expect("program succeeds");
    assert_with_log!(value == 7, "child wins on join", 7, value);
    test_complete!("child_ref_writes_are_visible_after_join");
}

#[test]
fn child_ref_writes_are_invisible_before_join() {
    init_test_logging();
    let lab = test_lab();
    let counter = FiberRef::make(0_u32);

    let child = Fx::sleep(Duration::from_millis(5)).then(counter.set(9));
    let program = counter.set(1).then(child.fork()).flat_map(move |fiber| {
        let counter = counter.clone();
        counter
            .get()
            .flat_map(move |before| fiber.join().then(counter.get()).map(move |after| (before, after)))
    });

    assert_eq!(lab.run(program), Ok((1, 9)));
}

#[test]
fn join_policy_combines_values() {
    init_test_logging();
    let lab = test_lab();
    let total = FiberRef::with_policy(0_u64, |_| 0, |parent, child| parent + child);

    let add = |n: u64| total.update(move |v| v + n);
    let program = add(1)
        .then(Fx::zip_all([add(10), add(100)]))
        .then(total.get());

    // Each zip member starts from zero and its delta is added on join.
    assert_eq!(lab.run(program), Ok(111));
}

#[test]
fn locally_restores_previous_value() {
    init_test_logging();
    let lab = test_lab();
    let label = FiberRef::make(String::from("outer"));

    let after = label.clone();
    let program = label
        .locally(String::from("inner"), label.get())
        .flat_map(move |seen| after.get().map(move |now| (seen.clone(), now)));

    assert_eq!(
        lab.run(program),
        Ok((String::from("inner"), String::from("outer")))
    );
}

#[test]
fn sleeping_child_joins_once_time_advances() {
    init_test_logging();
    test_phase!("sleeping_child_joins_once_time_advances");
    let lab = test_lab();
    let program = Fx::sleep(Duration::from_millis(10))
        .map(|()| 1_i32)
        .fork()
        .flat_map(|fiber| fiber.join());

    let fiber = lab.run_fiber(program);
    lab.run_ready();
    assert!(!fiber.is_done(), "child is still sleeping");

    lab.advance(Duration::from_millis(9));
    assert!(!fiber.is_done(), "deadline not reached");

    lab.advance(Duration::from_millis(1));
    assert_exit_success!(fiber.poll().expect("done"), 1);
    assert!(lab.is_quiescent());
    test_complete!("sleeping_child_joins_once_time_advances");
}

#[test]
fn parent_exit_interrupts_unjoined_children() {
    init_test_logging();
    let lab = test_lab();
    let log = ExitLog::new();

    let child = Fx::sleep(Duration::from_secs(3600)).ensuring(log.finalizer());
    // The parent outlives the child's start, so the finalizer is registered.
    let program = child
        .fork()
        .flat_map(|_fiber| Fx::sleep(Duration::from_millis(1)))
        .map(|()| "parent done");

    assert_eq!(lab.run(program), Ok("parent done"));
    assert_eq!(log.len(), 1);
    assert_eq!(log.interrupted(), 1);
    assert!(lab.is_quiescent());
}

#[test]
fn daemon_outlives_parent() {
    init_test_logging();
    let lab = test_lab();
    let log = ExitLog::new();

    let daemon = Fx::sleep(Duration::from_millis(20)).ensuring(log.finalizer());
    let fiber = lab.run_fiber(daemon.fork_daemon().map(|fiber| fiber.id()));
    lab.run_ready();
    assert!(fiber.is_done());
    assert_eq!(log.len(), 0, "daemon still running after its parent ended");

    lab.run_until_idle();
    assert_eq!(log.len(), 1);
    assert!(log.exits()[0].is_success());
}

#[test]
fn interrupting_a_child_yields_its_interrupted_exit() {
    init_test_logging();
    let lab = test_lab();

    let program = Fx::sleep(Duration::from_secs(60))
        .fork()
        .flat_map(|fiber| fiber.interrupt());
    let exit = lab.run(program).expect("interrupt never fails");

    let Exit::Failure(cause) = exit else {
        panic!("child should not have succeeded");
    };
    assert!(cause.is_interrupted_only());
    assert_eq!(cause.interruptors().len(), 1);
    assert!(lab.now() < fiberfx::Time::from_secs(60));
}

#[test]
fn join_of_failed_child_fails_parent() {
    init_test_logging();
    let lab = test_lab();
    let program = Fx::<i32, String>::fail("child broke".into())
        .fork()
        .widen()
        .flat_map(|fiber| fiber.join())
        .map(|n| n + 1);
    let exit = lab.run_exit(program);
    assert_eq!(exit, Exit::Failure(Cause::fail("child broke".to_string())));
}

#[test]
fn forked_fiber_reports_status() {
    init_test_logging();
    let lab = test_lab();
    let fiber = lab.run_fiber(Fx::<(), Infallible>::sleep(Duration::from_millis(5)));
    assert!(matches!(fiber.status(), fiberfx::FiberStatus::Suspended { .. }));
    lab.run_ready();
    assert!(fiber.status().is_suspended());
    assert_eq!(fiber.status().interruptible(), Some(true));
    lab.run_until_idle();
    assert!(fiber.status().is_done());
}

#[test]
fn panicking_exit_observer_does_not_reach_the_host() {
    init_test_logging();
    let lab = test_lab();
    let seen = Arc::new(AtomicUsize::new(0));

    let fiber = lab.run_fiber(Fx::<(), Infallible>::sleep(Duration::from_millis(5)).map(|()| 7));
    let _ = fiber.add_observer(|_| panic!("observer failed"));
    let sink = Arc::clone(&seen);
    let _ = fiber.add_observer(move |exit| {
        assert_eq!(exit, Exit::Success(7));
        sink.fetch_add(1, Ordering::SeqCst);
    });

    lab.run_until_idle();
    assert_eq!(seen.load(Ordering::SeqCst), 1, "later observers still run");
    assert!(fiber.is_done());
    assert_exit_success!(fiber.poll().expect("done"), 7);
}

#[test]
fn removed_exit_observer_is_never_called() {
    init_test_logging();
    let lab = test_lab();
    let seen = Arc::new(AtomicUsize::new(0));

    let fiber = lab.run_fiber(Fx::<(), Infallible>::sleep(Duration::from_millis(5)));
    let sink = Arc::clone(&seen);
    let removed = fiber.add_observer(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    let sink = Arc::clone(&seen);
    let kept = fiber.add_observer(move |_| {
        sink.fetch_add(10, Ordering::SeqCst);
    });

    assert!(removed.remove());
    lab.run_until_idle();
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    assert!(!kept.remove(), "observer already ran");

    let late = fiber.add_observer(|_| {});
    assert!(!late.remove(), "late observers run immediately");
}
