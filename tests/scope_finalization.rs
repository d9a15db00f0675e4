//! Scope and finalizer tests: one-shot close, finalizer ordering and
//! strategies, finalizer failures.

mod common;

use common::*;
use fiberfx::types::{AnyExit, Exit, FiberId};
use fiberfx::{FinalizationStrategy, Fx, LabConfig, Scope};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

fn success_exit(v: u32) -> AnyExit {
    Exit::Success(value(v))
}

fn same_exit(a: &AnyExit, b: &AnyExit) -> bool {
    match (a, b) {
        (Exit::Success(x), Exit::Success(y)) => Arc::ptr_eq(x, y),
        (Exit::Failure(x), Exit::Failure(y)) => x.leaves().len() == y.leaves().len(),
        _ => false,
    }
}

#[test]
fn concurrent_double_close_runs_finalizers_once() {
    init_test_logging();
    test_phase!("concurrent_double_close_runs_finalizers_once");
    let lab = test_lab();
    let scope = Scope::new(FiberId::NONE, FinalizationStrategy::Sequential);
    let runs = Counter::new();
    let counted = runs.clone();
    scope
        .ensuring(move |_| Fx::sleep(Duration::from_millis(3)).then(counted.bump()))
        .expect("scope is open");

    let first = scope.close_or_wait(success_exit(1));
    let second = scope.close_or_wait(success_exit(2));
    let (a, b) = lab.run(first.zip(second)).expect("close never fails");

    assert_with_log!(runs.get() == 1, "finalizer runs once", 1, runs.get());
    assert!(same_exit(&a, &b), "both closers observe one published exit");
    assert!(scope.is_closed());
    test_complete!("concurrent_double_close_runs_finalizers_once");
}

#[test]
fn only_first_close_transitions() {
    init_test_logging();
    let lab = test_lab();
    let scope = Scope::new(FiberId::NONE, FinalizationStrategy::Sequential);

    let closes = scope.close(success_exit(1)).zip(scope.close(success_exit(2)));
    let (first, second) = lab.run(closes).expect("close never fails");
    assert!(first ^ second, "exactly one close wins");

    let published = scope.exit().expect("closed");
    let Exit::Success(v) = published else {
        panic!("scope was closed with a success");
    };
    let winner = v.downcast_ref::<u32>().copied();
    assert_eq!(winner, Some(if first { 1 } else { 2 }));
}

#[test]
fn late_finalizer_registration_is_rejected() {
    init_test_logging();
    let lab = test_lab();
    let scope = Scope::new(FiberId::NONE, FinalizationStrategy::Sequential);
    lab.run(scope.close(success_exit(0))).expect("close never fails");
    assert!(scope.ensuring(|_| Fx::unit()).is_none());
}

#[test]
fn sequential_finalizers_run_in_reverse_registration_order() {
    init_test_logging();
    let lab = test_lab();
    let order = Arc::new(Mutex::new(Vec::new()));
    let push = |tag: &'static str| {
        let order = Arc::clone(&order);
        move |_: AnyExit| {
            let order = Arc::clone(&order);
            Fx::from_lazy(move || order.lock().push(tag))
        }
    };

    let program = Fx::<(), Infallible>::unit()
        .ensuring(push("inner"))
        .ensuring(push("outer"));
    lab.run(program).expect("program succeeds");
    assert_eq!(*order.lock(), vec!["inner", "outer"]);

    order.lock().clear();
    let scope = Scope::new(FiberId::NONE, FinalizationStrategy::Sequential);
    scope.ensuring(push("first")).expect("open");
    scope.ensuring(push("second")).expect("open");
    lab.run(scope.close(success_exit(0))).expect("close never fails");
    assert_eq!(*order.lock(), vec!["second", "first"]);
}

#[test]
fn concurrent_strategy_overlaps_finalizers() {
    init_test_logging();
    let lab = test_lab_with(LabConfig::new().finalization(FinalizationStrategy::Concurrent));
    let scope = Scope::new(FiberId::NONE, FinalizationStrategy::Concurrent);
    for _ in 0..4 {
        scope
            .ensuring(|_| Fx::sleep(Duration::from_millis(10)))
            .expect("open");
    }

    lab.run(scope.close(success_exit(0))).expect("close never fails");
    assert_eq!(lab.now(), fiberfx::Time::from_millis(10));
}

#[test]
fn bounded_concurrent_strategy_limits_overlap() {
    init_test_logging();
    let lab = test_lab();
    let scope = Scope::new(FiberId::NONE, FinalizationStrategy::ConcurrentN(2));
    for _ in 0..4 {
        scope
            .ensuring(|_| Fx::sleep(Duration::from_millis(10)))
            .expect("open");
    }

    lab.run(scope.close(success_exit(0))).expect("close never fails");
    assert_eq!(lab.now(), fiberfx::Time::from_millis(20));
}

#[test]
fn sequential_strategy_serializes_finalizers() {
    init_test_logging();
    let lab = test_lab();
    let scope = Scope::new(FiberId::NONE, FinalizationStrategy::Sequential);
    for _ in 0..3 {
        scope
            .ensuring(|_| Fx::sleep(Duration::from_millis(10)))
            .expect("open");
    }

    lab.run(scope.close(success_exit(0))).expect("close never fails");
    assert_eq!(lab.now(), fiberfx::Time::from_millis(30));
}

#[test]
fn failing_finalizer_is_appended_to_exit() {
    init_test_logging();
    let lab = test_lab();
    let program = Fx::<u32, String>::succeed(5).ensuring(|_| Fx::die("cleanup failed"));
    let exit = lab.run_exit(program);

    let Exit::Failure(cause) = exit else {
        panic!("a failing finalizer fails the program");
    };
    assert!(cause.is_die());
    assert_eq!(cause.defects()[0].message(), "cleanup failed");
}

#[test]
fn failing_finalizer_follows_original_failure() {
    init_test_logging();
    let lab = test_lab();
    let program =
        Fx::<u32, String>::fail("original".into()).ensuring(|_| Fx::die("cleanup failed"));
    let exit = lab.run_exit(program);

    let Exit::Failure(cause) = exit else {
        panic!("program fails");
    };
    assert_eq!(cause.first_failure(), Some(&"original".to_string()));
    assert_eq!(cause.defects().len(), 1);
}

#[test]
fn finalizer_sees_the_exit_it_finalizes() {
    init_test_logging();
    let lab = test_lab();
    let log = ExitLog::new();

    let ok = Fx::<u32, String>::succeed(1).ensuring(log.finalizer());
    let bad = Fx::<u32, String>::fail("no".into()).ensuring(log.finalizer());
    let _ = lab.run_exit(ok);
    let _ = lab.run_exit(bad);

    let exits = log.exits();
    assert!(exits[0].is_success());
    assert!(exits[1].is_failure());
    assert!(!exits[1].is_interrupted());
}

#[test]
fn finalizer_runs_uninterruptibly() {
    init_test_logging();
    let lab = test_lab();
    let finished = Counter::new();
    let done = finished.clone();

    let program = Fx::<(), Infallible>::unit()
        .ensuring(move |_| Fx::sleep(Duration::from_millis(50)).then(done.bump()));
    let fiber = lab.run_fiber(program);
    lab.advance(Duration::from_millis(10));
    assert!(!fiber.is_done(), "finalizer is sleeping");

    fiber.interrupt_as(FiberId::new_for_test(77));
    lab.run_until_idle();

    assert_eq!(finished.get(), 1, "finalizer was not cut short");
    assert!(fiber.is_done());
}

#[test]
fn closing_parent_scope_closes_child_first() {
    init_test_logging();
    let lab = test_lab();
    let order = Arc::new(Mutex::new(Vec::new()));
    let record = |tag: &'static str| {
        let order = Arc::clone(&order);
        move |exit: AnyExit| {
            let order = Arc::clone(&order);
            Fx::from_lazy(move || order.lock().push((tag, exit.is_interrupted())))
        }
    };

    // The parent's own finalizer predates the child, so LIFO closes the
    // child before running it.
    let parent = Scope::new(FiberId::new_for_test(1), FinalizationStrategy::Sequential);
    parent.ensuring(record("parent")).expect("open");
    let child = parent.fork(FiberId::new_for_test(2));
    child.ensuring(record("child")).expect("open");

    lab.run(parent.close(success_exit(0))).expect("close never fails");
    assert_eq!(*order.lock(), vec![("child", true), ("parent", false)]);
    assert!(child.is_closed());
}

#[test]
fn parent_finalizers_registered_after_fork_run_before_the_child() {
    init_test_logging();
    let lab = test_lab();
    let order = Arc::new(Mutex::new(Vec::new()));
    let record = |tag: &'static str| {
        let order = Arc::clone(&order);
        move |_: AnyExit| {
            let order = Arc::clone(&order);
            Fx::from_lazy(move || order.lock().push(tag))
        }
    };

    let parent = Scope::new(FiberId::new_for_test(1), FinalizationStrategy::Sequential);
    let child = parent.fork(FiberId::new_for_test(2));
    child.ensuring(record("child")).expect("open");
    parent.ensuring(record("parent")).expect("open");

    lab.run(parent.close(success_exit(0))).expect("close never fails");
    assert_eq!(*order.lock(), vec!["parent", "child"]);
}
