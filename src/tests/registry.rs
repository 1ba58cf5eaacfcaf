use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::mpsc::channel;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::error::Error;
use crate::tests::{init_test_logging, spawn_tracked, wait_blocked, wait_until};
use crate::thread::{self, ThreadState};

fn daemon<F>(context: &Context, task: F) -> crate::thread::Thread
where
    F: FnOnce() + Send + 'static,
{
    let worker = context.thread();
    worker.set_daemon(true).unwrap();
    worker.start(task).unwrap();
    worker
}

#[test]
fn shutdown_waits_for_daemons() {
    init_test_logging();
    let context = Context::default();
    let done = Arc::new(AtomicBool::new(false));

    let done2 = done.clone();
    let worker = daemon(&context, move || {
        std::thread::sleep(Duration::from_millis(30));
        done2.store(true, Ordering::SeqCst);
    });
    assert!(worker.is_daemon());
    // A daemon handle does not join on drop.
    drop(worker);

    context.shutdown().unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(context.pending_daemons(), 0);
    assert!(context.is_shut_down());
}

#[test]
fn shutdown_gives_up_after_timeout() {
    let context = Context::new(Config::default().shutdown_timeout(Duration::from_millis(20)));
    let (go, gate) = channel::<()>();
    let worker = daemon(&context, move || gate.recv().unwrap());

    assert!(matches!(context.shutdown(), Err(Error::Timeout)));
    assert_eq!(context.pending_daemons(), 1);

    go.send(()).unwrap();
    wait_until("daemon to complete", || context.pending_daemons() == 0);
    assert_eq!(worker.state(), ThreadState::Complete);
}

#[test]
fn shutdown_only_once() {
    let context = Context::default();
    context.shutdown().unwrap();
    assert!(matches!(context.shutdown(), Err(Error::InvalidOperation(_))));
}

#[test]
fn no_threads_after_shutdown() {
    let context = Context::default();
    let late = context.thread();
    context.shutdown().unwrap();

    assert!(matches!(late.start(|| {}), Err(Error::Canceled)));
    assert_eq!(late.state(), ThreadState::Idle);
    assert!(matches!(context.spawn(|| {}), Err(Error::Canceled)));
}

#[test]
fn reference_threads_are_kept_until_shutdown() {
    let context = Context::default();
    let me = context.current_thread();
    assert_eq!(me.state(), ThreadState::Reference);
    assert_eq!(context.current_thread(), me);
    assert_eq!(context.reference_threads(), 1);

    let context2 = context.clone();
    let (_, handle) = spawn_tracked(move || {
        context2.current_thread();
    });
    handle.join().unwrap();
    assert_eq!(context.reference_threads(), 2);

    context.shutdown().unwrap();
    assert_eq!(context.reference_threads(), 0);
}

#[test]
fn only_the_context_registers_reference_threads() {
    let context = Context::default();
    let (_, handle) = spawn_tracked(|| thread::current().state());
    assert_eq!(handle.join().unwrap(), ThreadState::Reference);
    assert_eq!(context.reference_threads(), 0);
    context.shutdown().unwrap();
}

#[test]
fn poll_reclaims_finished_daemons() {
    let context = Context::default();
    let worker = daemon(&context, || {});
    wait_until("daemon to complete", || context.pending_daemons() == 0);
    assert_eq!(worker.state(), ThreadState::Complete);

    let mut reclaimed = 0;
    wait_until("daemon to be reclaimed", || {
        reclaimed += context.poll();
        reclaimed == 1
    });
    assert_eq!(context.poll(), 0);
    context.shutdown().unwrap();
}

#[test]
fn shutdown_defers_interruption() {
    let context = Context::default();
    let (go, gate) = channel::<()>();
    let _worker = daemon(&context, move || gate.recv().unwrap());

    let context2 = context.clone();
    let (shutter, handle) = spawn_tracked(move || (context2.shutdown(), thread::interrupted()));
    wait_blocked(&shutter);

    shutter.interrupt();
    std::thread::sleep(Duration::from_millis(10));
    assert!(!handle.is_finished(), "shutdown returned before the daemon finished");

    go.send(()).unwrap();
    let (result, still_interrupted) = handle.join().unwrap();
    result.unwrap();
    assert!(still_interrupted);
}
