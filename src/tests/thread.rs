use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::context::Context;
use crate::error::Error;
use crate::status::WakeReason;
use crate::tests::{init_test_logging, spawn_tracked};
use crate::thread::{self, Cancelable, Priority, ThreadImpl, ThreadState};

#[test]
fn lifecycle() {
    init_test_logging();
    let context = Context::default();
    let worker = context.thread();
    assert_eq!(worker.state(), ThreadState::Idle);
    assert!(worker.name().is_some_and(|name| name.starts_with("monitor-sync-")));

    let (go, gate) = channel::<()>();
    worker.start(move || gate.recv().unwrap()).unwrap();
    assert_eq!(worker.state(), ThreadState::Running);

    go.send(()).unwrap();
    worker.join().unwrap();
    assert_eq!(worker.state(), ThreadState::Joined);
    // Joining again returns at once.
    worker.join().unwrap();
    assert!(worker.try_join(Duration::ZERO).unwrap());
    context.shutdown().unwrap();
}

#[test]
fn start_only_once() {
    let context = Context::default();
    let worker = context.spawn(|| {}).unwrap();
    assert!(matches!(worker.start(|| {}), Err(Error::InvalidOperation(_))));
    worker.join().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn join_needs_a_started_managed_thread() {
    let context = Context::default();
    let idle = context.thread();
    assert!(matches!(idle.join(), Err(Error::InvalidOperation(_))));

    let (go, gate) = channel::<()>();
    let (unmanaged, handle) = spawn_tracked(move || gate.recv().unwrap());
    assert!(matches!(unmanaged.join(None), Err(Error::InvalidOperation(_))));
    go.send(()).unwrap();
    handle.join().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn self_join_is_a_deadlock() {
    let context = Context::default();
    let (tx, rx) = channel();
    let worker = context
        .spawn(move || tx.send(ThreadImpl::current().join(None)).unwrap())
        .unwrap();
    assert!(matches!(rx.recv().unwrap(), Err(Error::Deadlock(_))));
    worker.join().unwrap();

    assert!(matches!(ThreadImpl::current().join(None), Err(Error::Deadlock(_))));
    context.shutdown().unwrap();
}

#[test]
fn try_join_times_out() {
    let context = Context::default();
    let (go, gate) = channel::<()>();
    let worker = context.spawn(move || gate.recv().unwrap()).unwrap();

    assert!(!worker.try_join(Duration::ZERO).unwrap());
    let started = Instant::now();
    assert!(!worker.try_join(Duration::from_millis(20)).unwrap());
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(worker.state(), ThreadState::Running);

    go.send(()).unwrap();
    assert!(worker.try_join(Duration::from_secs(10)).unwrap());
    assert_eq!(worker.state(), ThreadState::Joined);

    // Nothing left over from the joins that gave up.
    let me = ThreadImpl::current();
    assert_eq!(me.monitor().lock().wait(Some(Duration::ZERO)), WakeReason::TimedOut);
    context.shutdown().unwrap();
}

#[test]
fn interrupt_ends_a_sleep() {
    let context = Context::default();
    let (tx, rx) = channel();
    let worker = context
        .spawn(move || {
            let started = Instant::now();
            let slept = thread::sleep(Duration::from_secs(10));
            tx.send((slept, started.elapsed())).unwrap();
        })
        .unwrap();

    worker.interrupt();
    let (slept, elapsed) = rx.recv().unwrap();
    assert!(matches!(slept, Err(Error::Interrupted)));
    assert!(elapsed < Duration::from_secs(10));
    worker.join().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn current_is_the_started_thread() {
    let context = Context::default();
    let (tx, rx) = channel();
    let worker = context.spawn(move || tx.send(thread::current().id()).unwrap()).unwrap();
    assert_eq!(rx.recv().unwrap(), worker.id());
    worker.join().unwrap();
    assert_ne!(thread::current().id(), worker.id());
    context.shutdown().unwrap();
}

#[test]
fn cancel_is_permanent_and_once() {
    let context = Context::default();
    let (tx, rx) = channel();
    let worker = context
        .spawn(move || {
            tx.send(thread::current().cancel()).unwrap();
            while !thread::canceled() {
                let _ = thread::sleep(Duration::from_millis(1));
            }
            // Permanent: still canceled after being observed.
            assert!(thread::canceled());
        })
        .unwrap();

    assert!(matches!(rx.recv().unwrap(), Err(Error::InvalidOperation(_))));
    worker.cancel().unwrap();
    assert!(worker.is_canceled());
    assert!(matches!(worker.cancel(), Err(Error::InvalidOperation(_))));
    worker.join().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn daemon_status_is_fixed_at_start() {
    let context = Context::default();
    let (tx, rx) = channel();
    let (go, gate) = channel::<()>();
    let worker = context
        .spawn(move || {
            tx.send(ThreadImpl::current().set_daemon(true)).unwrap();
            gate.recv().unwrap();
        })
        .unwrap();

    assert!(matches!(rx.recv().unwrap(), Err(Error::InvalidOperation(_))));
    assert!(matches!(worker.set_daemon(true), Err(Error::InvalidOperation(_))));
    assert!(!worker.is_daemon());
    go.send(()).unwrap();
    worker.join().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn panic_is_contained() {
    init_test_logging();
    let context = Context::default();
    let worker = context.spawn(|| panic!("task failure")).unwrap();
    worker.join().unwrap();
    assert_eq!(worker.state(), ThreadState::Joined);
    context.shutdown().unwrap();
}

#[test]
fn config_shapes_new_threads() {
    let config = Config::default()
        .thread_name_prefix("worker")
        .default_priority(Priority::Low)
        .stack_size(256 * 1024);
    let context = Context::new(config);

    let (tx, rx) = channel();
    let worker = context
        .spawn(move || {
            let me = thread::current();
            tx.send((me.priority(), std::thread::current().name().map(str::to_owned))).unwrap();
        })
        .unwrap();

    let (priority, os_name) = rx.recv().unwrap();
    assert_eq!(priority, Priority::Low);
    assert_eq!(os_name.as_deref(), worker.name());
    assert!(worker.name().is_some_and(|name| name.starts_with("worker-")));
    worker.join().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn priority_changes_while_running() {
    let context = Context::default();
    let (go, gate) = channel::<()>();
    let worker = context.spawn(move || gate.recv().unwrap()).unwrap();

    worker.set_priority(Priority::Low);
    assert_eq!(worker.priority(), Priority::Low);
    assert_eq!(worker.effective_priority(), Priority::Low);
    go.send(()).unwrap();
    worker.join().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn dropping_the_handle_joins() {
    let context = Context::default();
    let done = Arc::new(AtomicBool::new(false));
    let done2 = done.clone();
    let worker = context
        .spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            done2.store(true, Ordering::SeqCst);
        })
        .unwrap();

    drop(worker);
    assert!(done.load(Ordering::SeqCst));
    context.shutdown().unwrap();
}

#[test]
fn cancel_all_respects_auto_cancel() {
    let context = Context::default();
    let spin = || {
        while !thread::canceled() {
            let _ = thread::sleep(Duration::from_millis(1));
        }
    };

    let reached = context.spawn(spin).unwrap();
    let exempt = context.thread();
    exempt.set_auto_cancel(false);
    exempt.start(spin).unwrap();

    assert_eq!(context.cancel_all(), 1);
    reached.join().unwrap();
    assert!(reached.is_canceled());
    assert!(!exempt.is_canceled());
    assert!(!exempt.try_join(Duration::from_millis(10)).unwrap());

    exempt.cancel().unwrap();
    exempt.join().unwrap();
    context.shutdown().unwrap();
}
