use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::error::Error;
use crate::sync::{
    FastMutex, Lockable, Mutex, PriorityInheritanceMutex, PriorityMutex, RecursiveMutex,
};
use crate::tests::{init_test_logging, spawn_tracked, wait_blocked, wait_until};
use crate::thread::{Priority, ThreadImpl};

#[test]
fn smoke() {
    let m = Mutex::new();
    drop(m.lock().unwrap());
    drop(m.lock().unwrap());
    assert!(!m.is_locked());
}

#[test]
fn lots_and_lots() {
    const J: usize = 1000;
    const K: usize = 3;

    let m = Arc::new(Mutex::new());
    // Read and written separately, so an unprotected section loses updates.
    let counter = Arc::new(AtomicUsize::new(0));

    fn inc(m: &Mutex, counter: &AtomicUsize) {
        for _ in 0..J {
            let _held = m.lock().unwrap();
            let value = counter.load(Ordering::Relaxed);
            counter.store(value + 1, Ordering::Relaxed);
        }
    }

    let (tx, rx) = channel();
    for _ in 0..2 * K {
        let tx2 = tx.clone();
        let m2 = m.clone();
        let counter2 = counter.clone();
        thread::spawn(move || {
            inc(&m2, &counter2);
            tx2.send(()).unwrap();
        });
    }

    drop(tx);
    for _ in 0..2 * K {
        rx.recv().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), J * K * 2);
    assert!(!m.is_locked());
}

#[test]
fn try_lock_for_zero_does_not_block() {
    let m = Arc::new(Mutex::new());
    let _held = m.lock().unwrap();

    let m2 = m.clone();
    let got = thread::spawn(move || m2.try_lock_for(Duration::ZERO).unwrap().is_some())
        .join()
        .unwrap();
    assert!(!got);
    assert_eq!(m.waiters(), 0);
}

#[test]
fn try_lock_for_times_out() {
    let m = Arc::new(Mutex::new());
    let _held = m.lock().unwrap();

    let m2 = m.clone();
    let (got, waited) = thread::spawn(move || {
        let started = Instant::now();
        let got = m2.try_lock_for(Duration::from_millis(20)).unwrap().is_some();
        (got, started.elapsed())
    })
    .join()
    .unwrap();
    assert!(!got);
    assert!(waited >= Duration::from_millis(20));
    assert_eq!(m.waiters(), 0);
}

#[test]
fn relock_is_a_deadlock() {
    let m = Mutex::new();
    let _held = m.lock().unwrap();
    assert!(matches!(m.lock(), Err(Error::Deadlock(_))));
    assert!(m.is_held_by_current());
}

#[test]
fn only_the_owner_releases() {
    let m = Arc::new(Mutex::new());
    assert!(matches!(m.release(), Err(Error::InvalidOperation(_))));

    m.acquire().unwrap();
    let m2 = m.clone();
    let stolen = thread::spawn(move || m2.release()).join().unwrap();
    assert!(matches!(stolen, Err(Error::InvalidOperation(_))));
    assert!(m.is_held_by_current());
    m.release().unwrap();
}

#[test]
fn recursive_balance() {
    let m = Arc::new(RecursiveMutex::new());
    m.acquire().unwrap();
    m.acquire().unwrap();
    m.acquire().unwrap();
    m.release().unwrap();
    m.release().unwrap();
    assert!(m.is_held_by_current());

    let m2 = m.clone();
    assert!(!thread::spawn(move || m2.try_acquire(Duration::ZERO).unwrap()).join().unwrap());

    m.release().unwrap();
    assert!(!m.is_locked());
    assert!(matches!(m.release(), Err(Error::InvalidOperation(_))));
}

#[test]
fn waiters_served_in_arrival_order() {
    init_test_logging();
    let m = Arc::new(Mutex::new());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let held = m.lock().unwrap();

    let mut handles = Vec::new();
    for i in 0..3 {
        let m2 = m.clone();
        let order2 = order.clone();
        let (waiter, handle) = spawn_tracked(move || {
            let _held = m2.lock().unwrap();
            order2.lock().unwrap().push(i);
        });
        wait_blocked(&waiter);
        assert_eq!(m.waiters(), i + 1);
        handles.push(handle);
    }

    drop(held);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
}

#[test]
fn priority_mutex_serves_highest_first() {
    let m = Arc::new(PriorityMutex::new());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let held = m.lock().unwrap();

    let mut handles = Vec::new();
    for priority in [Priority::Low, Priority::Medium, Priority::High] {
        let m2 = m.clone();
        let order2 = order.clone();
        let (waiter, handle) = spawn_tracked(move || {
            ThreadImpl::current().set_priority(priority);
            let _held = m2.lock().unwrap();
            order2.lock().unwrap().push(priority);
        });
        wait_blocked(&waiter);
        handles.push(handle);
    }

    drop(held);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), [Priority::High, Priority::Medium, Priority::Low]);
}

#[test]
fn owner_inherits_waiter_priority() {
    init_test_logging();
    let me = ThreadImpl::current();
    me.set_priority(Priority::Medium);

    let m = Arc::new(PriorityInheritanceMutex::new());
    let held = m.lock().unwrap();

    let m2 = m.clone();
    let (waiter, handle) = spawn_tracked(move || {
        ThreadImpl::current().set_priority(Priority::High);
        drop(m2.lock().unwrap());
    });
    wait_blocked(&waiter);

    assert_eq!(me.effective_priority(), Priority::High);
    assert_eq!(me.priority(), Priority::Medium);

    drop(held);
    assert_eq!(me.effective_priority(), Priority::Medium);
    handle.join().unwrap();
}

#[test]
fn boost_ends_when_the_waiter_gives_up() {
    let me = ThreadImpl::current();
    me.set_priority(Priority::Low);

    let m = Arc::new(PriorityInheritanceMutex::new());
    let _held = m.lock().unwrap();

    let m2 = m.clone();
    let timed_out = thread::spawn(move || {
        ThreadImpl::current().set_priority(Priority::High);
        m2.try_lock_for(Duration::from_millis(30)).unwrap().is_none()
    })
    .join()
    .unwrap();

    assert!(timed_out);
    assert_eq!(me.effective_priority(), Priority::Low);
}

#[test]
fn interrupted_waiter_leaves_the_queue() {
    let m = Arc::new(Mutex::new());
    let _held = m.lock().unwrap();

    let m2 = m.clone();
    let (waiter, handle) = spawn_tracked(move || m2.acquire());
    wait_blocked(&waiter);
    assert!(waiter.interrupt());

    assert!(matches!(handle.join().unwrap(), Err(Error::Interrupted)));
    assert_eq!(m.waiters(), 0);
    assert!(m.is_held_by_current());
}

#[test]
fn handoff_skips_abandoned_waiters() {
    let m = Arc::new(Mutex::new());
    let held = m.lock().unwrap();

    let m2 = m.clone();
    let (quitter, quit) = spawn_tracked(move || m2.acquire());
    wait_blocked(&quitter);

    let m3 = m.clone();
    let (patient, stay) = spawn_tracked(move || {
        let _held = m3.lock().unwrap();
    });
    wait_blocked(&patient);

    quitter.interrupt();
    assert!(matches!(quit.join().unwrap(), Err(Error::Interrupted)));
    wait_until("the interrupted waiter to leave", || m.waiters() == 1);

    drop(held);
    stay.join().unwrap();
    assert!(!m.is_locked());
}

#[test]
fn fast_mutex_excludes() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 1000;

    let m = Arc::new(FastMutex::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (m, counter) = (m.clone(), counter.clone());
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let _held = m.lock().unwrap();
                    let seen = counter.load(Ordering::Relaxed);
                    counter.store(seen + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
    assert!(!m.is_locked());
}

#[test]
fn fast_mutex_checks_its_holder() {
    let m = Arc::new(FastMutex::new());
    let held = m.lock().unwrap();
    assert!(matches!(m.acquire(), Err(Error::Deadlock(_))));

    let m2 = m.clone();
    let (tried, released, waited) = thread::spawn(move || {
        let tried = m2.try_acquire(Duration::ZERO);
        let released = m2.release();
        let started = Instant::now();
        let timed = m2.try_acquire(Duration::from_millis(20));
        (tried, released, timed.map(|acquired| (acquired, started.elapsed())))
    })
    .join()
    .unwrap();
    assert!(matches!(tried, Ok(false)));
    assert!(matches!(released, Err(Error::InvalidOperation(_))));
    let (acquired, elapsed) = waited.unwrap();
    assert!(!acquired);
    assert!(elapsed >= Duration::from_millis(20));

    assert!(m.is_locked());
    drop(held);
    assert!(!m.is_locked());
    assert!(m.try_acquire(Duration::ZERO).unwrap());
    m.release().unwrap();
}
